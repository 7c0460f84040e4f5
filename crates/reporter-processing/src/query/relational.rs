use std::collections::HashMap;

use reporter_repository::{has_active_filters, Row, TableFilters};
use tracing::debug;

use super::TableQueries;
use crate::circuit_breaker::CircuitBreakerManager;
use crate::datasource::DataSource;
use crate::error::ProcessingError;
use crate::schema_resolver::{get_table_filters, SchemaResolver};

pub(super) async fn query_tables(
    breakers: &CircuitBreakerManager,
    source: &DataSource,
    tables: &TableQueries,
    filters: Option<&TableFilters>,
) -> Result<HashMap<String, Vec<Row>>, ProcessingError> {
    let database = source.name.as_str();
    let repository = source.relational_repository().ok_or_else(|| {
        ProcessingError::unavailable(database, Some("no relational repository".into()))
    })?;

    let schemas = source.effective_schemas();
    let discovered = breakers
        .execute(database, || async {
            repository
                .get_database_schema(&schemas)
                .await
                .map_err(|err| ProcessingError::query(database, err))
        })
        .await?;
    let resolver = SchemaResolver::new(database, discovered);

    let mut results = HashMap::with_capacity(tables.len());
    for (table_key, fields) in tables {
        let table_filters =
            get_table_filters(filters, table_key).filter(|filters| has_active_filters(filters));
        let (schema_name, table) = resolver.resolve_key(table_key)?;

        let rows = breakers
            .execute(database, || async {
                let outcome = match table_filters {
                    Some(filters) => {
                        repository
                            .query_with_advanced_filters(
                                resolver.tables(),
                                &schema_name,
                                table,
                                fields,
                                filters,
                            )
                            .await
                    }
                    None => {
                        repository
                            .query(resolver.tables(), &schema_name, table, fields, None)
                            .await
                    }
                };
                outcome.map_err(|err| ProcessingError::query(database, err))
            })
            .await?;

        debug!(
            datasource = database,
            table = table_key.as_str(),
            schema = schema_name.as_str(),
            rows = rows.len(),
            "table queried"
        );
        results.insert(table_key.clone(), rows);
    }

    Ok(results)
}
