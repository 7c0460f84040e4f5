//! Data acquisition: runs a request's `dataQueries` against the registered
//! datasources and collects the rows for rendering.

mod document;
mod relational;

use std::collections::HashMap;
use std::sync::Arc;

use reporter_repository::{ReportRequest, Row};
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreakerManager;
use crate::crm::CrmSecrets;
use crate::datasource::{DatabaseType, SafeDataSources};
use crate::error::ProcessingError;

/// `database -> table key -> rows`, handed to the renderer as-is.
pub type ResultMap = HashMap<String, HashMap<String, Vec<Row>>>;

/// Requested fields per table or collection key.
pub(crate) type TableQueries = HashMap<String, Vec<String>>;

#[derive(Clone)]
pub struct QueryEngine {
    datasources: Arc<SafeDataSources>,
    breakers: Arc<CircuitBreakerManager>,
    crm_secrets: CrmSecrets,
}

impl QueryEngine {
    pub fn new(
        datasources: Arc<SafeDataSources>,
        breakers: Arc<CircuitBreakerManager>,
        crm_secrets: CrmSecrets,
    ) -> Self {
        Self {
            datasources,
            breakers,
            crm_secrets,
        }
    }

    pub fn datasources(&self) -> &Arc<SafeDataSources> {
        &self.datasources
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    /// Queries every database named in the request. The first failing
    /// database aborts the rest.
    pub async fn query_all(&self, request: &ReportRequest) -> Result<ResultMap, ProcessingError> {
        let mut results = ResultMap::new();
        for database in request.data_queries.keys() {
            self.query_database(request, database, &mut results).await?;
        }
        Ok(results)
    }

    /// Queries one database into `results`. Databases that are not
    /// registered are skipped.
    pub async fn query_database(
        &self,
        request: &ReportRequest,
        database: &str,
        results: &mut ResultMap,
    ) -> Result<(), ProcessingError> {
        let Some(tables) = request.data_queries.get(database) else {
            return Ok(());
        };

        let Some(source) = self.datasources.ensure_connected(database).await? else {
            warn!(datasource = database, "datasource not registered; skipping");
            return Ok(());
        };

        let filters = request.database_filters(database);
        let rows = match &source.database_type {
            DatabaseType::Postgres => {
                relational::query_tables(&self.breakers, &source, tables, filters).await?
            }
            DatabaseType::Mongo => {
                document::query_collections(
                    &self.breakers,
                    &self.crm_secrets,
                    &source,
                    tables,
                    filters,
                )
                .await?
            }
            DatabaseType::Unsupported(other) => {
                return Err(ProcessingError::UnsupportedDatabaseType {
                    datasource: database.to_string(),
                    database_type: other.clone(),
                });
            }
        };

        debug!(datasource = database, tables = rows.len(), "datasource queried");
        results.insert(database.to_string(), rows);
        Ok(())
    }
}
