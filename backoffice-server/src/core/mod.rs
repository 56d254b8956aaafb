//! Server configuration, state and lifecycle
//!
//! - [`Config`] - environment driven configuration
//! - [`ServerState`] - engines and services shared by every handler
//! - [`Server`] - HTTP listener and background tasks
//! - [`BackgroundTasks`] - registry of long-running workers

pub mod config;
pub mod server;
pub mod state;
pub mod tasks;

pub use config::{Config, ConfigError};
pub use server::{Server, ServerError, build_app};
pub use state::ServerState;
pub use tasks::{BackgroundTasks, TaskKind};
