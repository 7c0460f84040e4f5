//! Data model and repositories for the report worker: relational and document
//! datasources plus the report-status store.

pub mod document;
pub mod model;
pub mod relational;
pub mod report;

use thiserror::Error;

pub use document::{DocumentRepository, MongoRepository};
pub use model::{
    ColumnInformation, DataQueries, DatabaseFilters, FieldFilters, FilterCondition, LegacyFilter,
    Predicate, ReportRecord, ReportRequest, ReportStatus, Row, TableFilters, TableSchema,
    has_active_filters,
};
pub use relational::{PostgresRepository, RelationalRepository};
pub use report::{MongoReportRepository, ReportStatusRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("invalid status value '{0}'")]
    InvalidStatus(String),

    #[error("record not found for id '{0}'")]
    NotFound(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("failed to decode record: {0}")]
    Decode(String),
}
