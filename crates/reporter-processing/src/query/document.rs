use std::collections::HashMap;
use std::sync::Arc;

use reporter_repository::{has_active_filters, DocumentRepository, FieldFilters, Row, TableFilters};
use tracing::debug;

use super::TableQueries;
use crate::circuit_breaker::CircuitBreakerManager;
use crate::crm::{self, CrmSecrets};
use crate::datasource::DataSource;
use crate::error::ProcessingError;

pub(super) async fn query_collections(
    breakers: &CircuitBreakerManager,
    secrets: &CrmSecrets,
    source: &DataSource,
    collections: &TableQueries,
    filters: Option<&TableFilters>,
) -> Result<HashMap<String, Vec<Row>>, ProcessingError> {
    let database = source.name.as_str();
    let repository = source.document_repository().ok_or_else(|| {
        ProcessingError::unavailable(database, Some("no document repository".into()))
    })?;
    let is_crm = database == crm::CRM_DATASOURCE;

    let mut results = HashMap::with_capacity(collections.len());
    for (collection, fields) in collections {
        let collection_filters = filters
            .and_then(|filters| filters.get(collection))
            .filter(|filters| has_active_filters(filters));

        let rows = if is_crm {
            if collection == crm::ORGANIZATION_COLLECTION {
                debug!(datasource = database, "skipping crm organization collection");
                continue;
            }
            process_plugin_crm_collection(
                breakers,
                secrets,
                source,
                &repository,
                collection,
                fields,
                collection_filters,
            )
            .await?
        } else {
            query_collection(
                breakers,
                secrets,
                database,
                &repository,
                collection,
                fields,
                collection_filters,
            )
            .await?
        };

        debug!(
            datasource = database,
            collection = collection.as_str(),
            rows = rows.len(),
            "collection queried"
        );
        results.insert(collection.clone(), rows);
    }

    Ok(results)
}

async fn process_plugin_crm_collection(
    breakers: &CircuitBreakerManager,
    secrets: &CrmSecrets,
    source: &DataSource,
    repository: &Arc<dyn DocumentRepository>,
    collection: &str,
    fields: &[String],
    filters: Option<&FieldFilters>,
) -> Result<Vec<Row>, ProcessingError> {
    let database = source.name.as_str();
    let organization_id = source
        .midaz_organization_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            ProcessingError::unavailable(database, Some("midaz organization id is not configured".into()))
        })?;
    let physical = crm::physical_collection(collection, organization_id);

    let rows =
        query_collection(breakers, secrets, database, repository, &physical, fields, filters).await?;

    if !crm::requires_decryption(fields) {
        return Ok(rows);
    }
    let crypto = secrets.crypto()?;
    Ok(crm::decrypt_records(&crypto, &rows)?)
}

async fn query_collection(
    breakers: &CircuitBreakerManager,
    secrets: &CrmSecrets,
    database: &str,
    repository: &Arc<dyn DocumentRepository>,
    collection: &str,
    fields: &[String],
    filters: Option<&FieldFilters>,
) -> Result<Vec<Row>, ProcessingError> {
    breakers
        .execute(database, || async {
            // Search fields hold hashes, so filters on encrypted fields are
            // rewritten before they reach the repository.
            let hashed;
            let filters = match filters {
                Some(filters)
                    if crm::is_encrypted_collection(collection)
                        && crm::has_searchable_fields(filters) =>
                {
                    let crypto = secrets.crypto()?;
                    hashed = crm::transform_filters(&crypto, Some(filters));
                    hashed.as_ref()
                }
                other => other,
            };

            let outcome = match filters {
                Some(filters) => {
                    repository
                        .query_with_advanced_filters(collection, fields, filters)
                        .await
                }
                None => repository.query(collection, fields, None).await,
            };
            outcome.map_err(|err| ProcessingError::query(database, err))
        })
        .await
}
