//! walletd Node
//!
//! HTTP front end for the ledger engine: configuration, routing and
//! operational counters.

pub mod api;
pub mod config;
pub mod metrics;

pub use api::{router, AppState};
pub use config::{DatabaseConfig, LogFormat, NodeConfig};
pub use metrics::{Metrics, SharedMetrics};
