pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{Cli, Command};

pub use adapters::storage::LocalStorage;
pub use app::{IngestReport, IngestService};
pub use config::{IngestMode, TomlConfig};
pub use crate::core::{datex_engine::DatexEngine, datex_request::DatexRequest, traffic_handler::TrafficHandler};
pub use utils::error::{IngestError, Result};
