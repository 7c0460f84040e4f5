//! Report pipeline: idempotency -> template fetch -> datasource queries ->
//! render -> optional pdf -> persist -> finalise.

pub mod circuit_breaker;
pub mod content_type;
pub mod crm;
pub mod datasource;
mod error;
pub mod pdf;
mod pipeline;
pub mod query;
pub mod render;
pub mod schema_resolver;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerManager, CircuitState};
pub use content_type::{get_content_type, report_object_key};
pub use crm::{CrmSecrets, CryptoError};
pub use datasource::{
    ConnectionConfig, DataSource, DataSourceStatus, DatabaseType, SafeDataSources,
};
pub use error::ProcessingError;
pub use pdf::{ChromiumPdfPool, PdfPool, PdfPoolConfig};
pub use pipeline::{PipelineCollaborators, PipelineConfig, ReportOutcome, ReportPipeline};
pub use query::{QueryEngine, ResultMap};
pub use schema_resolver::{get_table_filters, parse_table_key, SchemaResolver};
