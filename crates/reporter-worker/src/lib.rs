//! Report worker: configuration, logging bootstrap and the HTTP ingest surface
//! in front of the report pipeline.

pub mod config;
pub mod routes;
pub mod state;

use tracing_subscriber::EnvFilter;

pub use config::{DataSourceConfig, WorkerConfig};
pub use routes::router;
pub use state::{build_pipeline, AppState};

/// Installs the global subscriber. `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
