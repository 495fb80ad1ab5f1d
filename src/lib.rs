// Orchestration backend for a local knowledge-graph retrieval system.
// Fronts a columnar artifact store, a subprocess-driven indexer, and an
// external search library behind a single HTTP API.

pub mod artifact_store;
pub mod config;
pub mod contracts;
pub mod error;
pub mod http_server;
pub mod metrics_cache;
pub mod observability;
pub mod progress;
pub mod search_gateway;
pub mod settings;
pub mod supervisor;
pub mod topology;
pub mod types;
pub mod upload_intake;
pub mod validation;

pub use config::Config;
pub use error::AppError;
pub use http_server::{create_server, start_server, AppState};
pub use observability::{get_metrics, init_logging, init_logging_with_level, with_trace_id};
pub use settings::IndexerSettings;
