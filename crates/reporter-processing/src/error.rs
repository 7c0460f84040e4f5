use reporter_bucket::BucketError;
use reporter_repository::RepositoryError;
use thiserror::Error;

use crate::crm::CryptoError;

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("failed to decode report message: {0}")]
    InputDecode(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] BucketError),

    #[error("datasource unavailable: {datasource}{}", .reason.as_ref().map(|r| format!(" ({r})")).unwrap_or_default())]
    DataSourceUnavailable {
        datasource: String,
        reason: Option<String>,
    },

    #[error("circuit breaker open for datasource '{0}'")]
    CircuitOpen(String),

    #[error("query on datasource '{datasource}' failed: {source}")]
    Query {
        datasource: String,
        #[source]
        source: RepositoryError,
    },

    #[error("unsupported database type '{database_type}' for datasource '{datasource}'")]
    UnsupportedDatabaseType {
        datasource: String,
        database_type: String,
    },

    #[error(
        "table '{table}' in database '{database}' exists in multiple schemas [{}]; qualify it as schema.table or schema__table",
        .schemas.join(", ")
    )]
    SchemaAmbiguity {
        database: String,
        table: String,
        schemas: Vec<String>,
    },

    #[error("unknown table '{table}' in database '{database}'")]
    SchemaUnknown { database: String, table: String },

    #[error("crypto configuration error: {0}")]
    CryptoConfig(String),

    #[error("decryption-data: {0}")]
    CryptoData(String),

    #[error("template render failed: {0}")]
    Render(String),

    #[error("pdf conversion failed: {0}")]
    Pdf(String),

    #[error("failed to update report status: {0}")]
    StatusUpdate(#[source] RepositoryError),

    #[error("report processing cancelled")]
    Cancelled,
}

impl ProcessingError {
    pub fn query(datasource: impl Into<String>, source: RepositoryError) -> Self {
        Self::Query {
            datasource: datasource.into(),
            source,
        }
    }

    pub fn unavailable(datasource: impl Into<String>, reason: Option<String>) -> Self {
        Self::DataSourceUnavailable {
            datasource: datasource.into(),
            reason,
        }
    }
}

impl From<CryptoError> for ProcessingError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::MissingKey(_) | CryptoError::InvalidKey(_) => {
                ProcessingError::CryptoConfig(err.to_string())
            }
            other => ProcessingError::CryptoData(other.to_string()),
        }
    }
}
