//! Registry of named datasources with lazy connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use reporter_repository::{
    DocumentRepository, MongoRepository, PostgresRepository, RelationalRepository,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ProcessingError;

pub const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseType {
    Postgres,
    Mongo,
    Unsupported(String),
}

impl DatabaseType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => DatabaseType::Postgres,
            "mongodb" | "mongo" => DatabaseType::Mongo,
            _ => DatabaseType::Unsupported(value.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DatabaseType::Postgres => "postgresql",
            DatabaseType::Mongo => "mongodb",
            DatabaseType::Unsupported(other) => other,
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceStatus {
    Available,
    Unavailable,
}

/// Where and how to reach a datasource that has not been connected yet.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub url: String,
    /// MongoDB database name; the datasource name is used when absent.
    pub database: Option<String>,
    pub max_connections: Option<u32>,
}

#[derive(Clone)]
pub enum DataSourceRepository {
    Relational(Arc<dyn RelationalRepository>),
    Document(Arc<dyn DocumentRepository>),
}

impl fmt::Debug for DataSourceRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceRepository::Relational(_) => f.write_str("Relational(..)"),
            DataSourceRepository::Document(_) => f.write_str("Document(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataSource {
    pub name: String,
    pub database_type: DatabaseType,
    pub initialized: bool,
    pub status: DataSourceStatus,
    pub last_error: Option<String>,
    pub schemas: Vec<String>,
    pub midaz_organization_id: Option<String>,
    pub connection: ConnectionConfig,
    pub repository: Option<DataSourceRepository>,
}

impl DataSource {
    /// A declared, not yet connected datasource.
    pub fn new(
        name: impl Into<String>,
        database_type: DatabaseType,
        connection: ConnectionConfig,
    ) -> Self {
        Self {
            name: name.into(),
            database_type,
            initialized: false,
            status: DataSourceStatus::Available,
            last_error: None,
            schemas: Vec::new(),
            midaz_organization_id: None,
            connection,
            repository: None,
        }
    }

    /// A connected Postgres datasource around an existing repository.
    pub fn relational(name: impl Into<String>, repository: Arc<dyn RelationalRepository>) -> Self {
        let mut source = Self::new(name, DatabaseType::Postgres, ConnectionConfig::default());
        source.initialized = true;
        source.repository = Some(DataSourceRepository::Relational(repository));
        source
    }

    /// A connected MongoDB datasource around an existing repository.
    pub fn document(name: impl Into<String>, repository: Arc<dyn DocumentRepository>) -> Self {
        let mut source = Self::new(name, DatabaseType::Mongo, ConnectionConfig::default());
        source.initialized = true;
        source.repository = Some(DataSourceRepository::Document(repository));
        source
    }

    pub fn with_schemas(mut self, schemas: impl IntoIterator<Item = String>) -> Self {
        self.schemas = schemas.into_iter().collect();
        self
    }

    pub fn with_midaz_organization_id(mut self, organization_id: impl Into<String>) -> Self {
        self.midaz_organization_id = Some(organization_id.into());
        self
    }

    /// Configured schemas, or `[public]` when none are configured.
    pub fn effective_schemas(&self) -> Vec<String> {
        if self.schemas.is_empty() {
            vec![DEFAULT_SCHEMA.to_string()]
        } else {
            self.schemas.clone()
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.status == DataSourceStatus::Unavailable
    }

    pub fn relational_repository(&self) -> Option<Arc<dyn RelationalRepository>> {
        match &self.repository {
            Some(DataSourceRepository::Relational(repository)) => Some(repository.clone()),
            _ => None,
        }
    }

    pub fn document_repository(&self) -> Option<Arc<dyn DocumentRepository>> {
        match &self.repository {
            Some(DataSourceRepository::Document(repository)) => Some(repository.clone()),
            _ => None,
        }
    }

    fn unavailable_error(&self) -> ProcessingError {
        ProcessingError::unavailable(&self.name, self.last_error.clone())
    }
}

/// Concurrency-safe `name -> DataSource` map.
///
/// Readers get a snapshot copy; connection results are written back under the
/// write lock. An unavailable datasource stays unavailable for the lifetime of
/// the registry.
#[derive(Debug, Default)]
pub struct SafeDataSources {
    sources: RwLock<HashMap<String, DataSource>>,
}

impl SafeDataSources {
    pub fn new(sources: impl IntoIterator<Item = DataSource>) -> Self {
        let sources = sources
            .into_iter()
            .map(|source| (source.name.clone(), source))
            .collect();
        Self {
            sources: RwLock::new(sources),
        }
    }

    pub fn insert(&self, source: DataSource) {
        self.sources.write().insert(source.name.clone(), source);
    }

    pub fn get(&self, name: &str) -> Option<DataSource> {
        self.sources.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }

    /// Copies of every datasource, ordered by name.
    pub fn snapshot(&self) -> Vec<DataSource> {
        let mut sources: Vec<_> = self.sources.read().values().cloned().collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        sources
    }

    /// Connects `source` if it has not been connected yet and stores the
    /// outcome back in the registry.
    pub async fn connect_data_source(
        &self,
        name: &str,
        source: &mut DataSource,
    ) -> Result<(), ProcessingError> {
        if source.is_unavailable() {
            return Err(source.unavailable_error());
        }
        if source.initialized && source.repository.is_some() {
            return Ok(());
        }

        let connected = match &source.database_type {
            DatabaseType::Postgres => PostgresRepository::connect(
                &source.connection.url,
                source
                    .connection
                    .max_connections
                    .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            )
            .await
            .map(|repository| DataSourceRepository::Relational(Arc::new(repository))),
            DatabaseType::Mongo => {
                let database = source.connection.database.as_deref().unwrap_or(name);
                MongoRepository::connect(&source.connection.url, database)
                    .await
                    .map(|repository| DataSourceRepository::Document(Arc::new(repository)))
            }
            DatabaseType::Unsupported(other) => {
                return Err(ProcessingError::UnsupportedDatabaseType {
                    datasource: name.to_string(),
                    database_type: other.clone(),
                });
            }
        };

        match connected {
            Ok(repository) => {
                source.repository = Some(repository);
                source.initialized = true;
                source.status = DataSourceStatus::Available;
                source.last_error = None;
                info!(datasource = name, database_type = %source.database_type, "datasource connected");
                self.sources.write().insert(name.to_string(), source.clone());
                Ok(())
            }
            Err(err) => {
                source.initialized = false;
                source.status = DataSourceStatus::Unavailable;
                source.last_error = Some(err.to_string());
                warn!(datasource = name, error = %err, "datasource connection failed; marking unavailable");
                self.sources.write().insert(name.to_string(), source.clone());
                Err(source.unavailable_error())
            }
        }
    }

    /// Snapshot of `name`, connected on first use. `Ok(None)` means the
    /// datasource is not registered.
    pub async fn ensure_connected(&self, name: &str) -> Result<Option<DataSource>, ProcessingError> {
        let Some(mut source) = self.get(name) else {
            return Ok(None);
        };
        self.connect_data_source(name, &mut source).await?;
        Ok(Some(source))
    }
}
