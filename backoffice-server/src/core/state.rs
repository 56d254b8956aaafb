use shared::models::PayrollConfig;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::JwtService;
use crate::core::Config;
use crate::db::{Storage, StorageError};
use crate::features::{FeatureFlags, StaticFlags};
use crate::kds::KdsRouter;
use crate::ledger::ItemLocks;
use crate::observability::alerts::AlertBus;
use crate::observability::{ErrorInbox, HttpReplayer, Replayer};
use crate::orders::OrderService;
use crate::payroll::{self, PayrollError};
use crate::recipes::RecipeBook;
use crate::stock::StockEngine;
use crate::tender::TenderEngine;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("Failed to prepare work directory {path}: {source}")]
    WorkDir {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Payroll(#[from] PayrollError),

    #[error("Failed to build replay client: {0}")]
    Replayer(#[from] reqwest::Error),
}

/// Everything a handler needs, cheap to clone
///
/// | Field | Purpose |
/// |-------|---------|
/// | storage | embedded redb document store |
/// | stock | items, lots, FIFO consumption, counts, procurement |
/// | recipes | menu items, recipes, expansion and costing |
/// | orders | POS sessions and the order state machine |
/// | tender | payments, splits, tips |
/// | kds | stations and ticket lifecycle |
/// | inbox | error capture and replay |
/// | alerts | integrity alerts |
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub storage: Storage,
    pub stock: StockEngine,
    pub recipes: RecipeBook,
    pub orders: OrderService,
    pub tender: TenderEngine,
    pub kds: KdsRouter,
    pub inbox: ErrorInbox,
    pub alerts: AlertBus,
    pub jwt: Arc<JwtService>,
    pub flags: Arc<dyn FeatureFlags>,
    pub payroll: Option<Arc<PayrollConfig>>,
}

impl ServerState {
    /// Open the database under the work directory and build the engines
    pub fn initialize(config: &Config) -> Result<Self, InitError> {
        std::fs::create_dir_all(&config.work_dir).map_err(|source| InitError::WorkDir {
            path: config.work_dir.clone(),
            source,
        })?;
        let storage = Storage::open(config.database_path())?;
        tracing::info!(path = %config.database_path().display(), "Database opened");

        let replayer = HttpReplayer::new(config.replay_base_url.clone(), config.request_timeout())?;
        Self::with_storage(config.clone(), storage, Arc::new(replayer))
    }

    /// Build the state over an existing store; tests pass an in-memory one
    pub fn with_storage(
        config: Config,
        storage: Storage,
        replayer: Arc<dyn Replayer>,
    ) -> Result<Self, InitError> {
        let payroll = match &config.payroll_bands_path {
            Some(path) => {
                let loaded = payroll::load_config(path)?;
                tracing::info!(path = %path, categories = loaded.bands.len(), "Payroll configuration loaded");
                Some(Arc::new(loaded))
            }
            None => None,
        };

        let stock = StockEngine::new(storage.clone(), ItemLocks::new());
        let orders = OrderService::new(storage.clone(), stock.clone());

        Ok(Self {
            recipes: RecipeBook::new(storage.clone()),
            tender: TenderEngine::new(storage.clone()),
            kds: KdsRouter::new(storage.clone(), config.kds_undo_window_seconds),
            inbox: ErrorInbox::new(storage.clone(), config.replay.clone(), replayer),
            alerts: AlertBus::default(),
            jwt: Arc::new(JwtService::with_config(config.jwt.clone())),
            flags: Arc::new(StaticFlags::parse(&config.disabled_modules)),
            payroll,
            stock,
            orders,
            storage,
            config: Arc::new(config),
        })
    }
}
