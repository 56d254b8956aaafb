use anyhow::Context;
use backoffice_server::{Config, Server, init_logger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    let _log_guard = init_logger(&config.log_level, config.log_json, config.log_dir.as_deref());

    config.validate().context("Invalid configuration")?;
    tracing::info!(
        port = config.http_port,
        work_dir = %config.work_dir,
        environment = %config.environment,
        "Back-office server starting"
    );

    Server::new(config).run().await.context("Server stopped with an error")?;
    tracing::info!("Back-office server stopped");
    Ok(())
}
