//! MongoDB datasource: projected, filtered collection reads.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::{Client, Database};
use serde_json::Value;
use tracing::debug;

use crate::model::{FieldFilters, FilterCondition, LegacyFilter, Predicate, Row};
use crate::RepositoryError;

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn query(
        &self,
        collection: &str,
        fields: &[String],
        filter: Option<&LegacyFilter>,
    ) -> Result<Vec<Row>, RepositoryError>;

    async fn query_with_advanced_filters(
        &self,
        collection: &str,
        fields: &[String],
        filters: &FieldFilters,
    ) -> Result<Vec<Row>, RepositoryError>;
}

#[derive(Clone)]
pub struct MongoRepository {
    database: Database,
}

impl MongoRepository {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, RepositoryError> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Self {
            database: client.database(database),
        })
    }

    pub fn from_database(database: Database) -> Self {
        Self { database }
    }

    async fn find(
        &self,
        collection: &str,
        fields: &[String],
        filter: Document,
    ) -> Result<Vec<Row>, RepositoryError> {
        debug!(collection, ?filter, "executing document query");
        let cursor = self
            .database
            .collection::<Document>(collection)
            .find(filter)
            .projection(build_projection(fields))
            .await?;

        let documents: Vec<Document> = cursor.try_collect().await?;
        documents.into_iter().map(document_to_row).collect()
    }
}

#[async_trait]
impl DocumentRepository for MongoRepository {
    async fn query(
        &self,
        collection: &str,
        fields: &[String],
        filter: Option<&LegacyFilter>,
    ) -> Result<Vec<Row>, RepositoryError> {
        let filter_doc = match filter {
            Some(legacy) => build_filter(
                &legacy
                    .iter()
                    .map(|(field, values)| {
                        (field.clone(), FilterCondition::equals(values.iter().cloned()))
                    })
                    .collect(),
            )?,
            None => Document::new(),
        };
        self.find(collection, fields, filter_doc).await
    }

    async fn query_with_advanced_filters(
        &self,
        collection: &str,
        fields: &[String],
        filters: &FieldFilters,
    ) -> Result<Vec<Row>, RepositoryError> {
        let filter_doc = build_filter(filters)?;
        self.find(collection, fields, filter_doc).await
    }
}

/// Includes each requested field; `_id` is only returned when asked for.
pub(crate) fn build_projection(fields: &[String]) -> Document {
    let mut projection = Document::new();
    for field in fields {
        projection.insert(field.clone(), 1);
    }
    if !fields.is_empty() && !fields.iter().any(|field| field == "_id") {
        projection.insert("_id", 0);
    }
    projection
}

/// Predicates on one field share an operator document unless two of them
/// use the same operator. Such a field contributes one clause per predicate
/// to a top-level `$and` instead.
pub(crate) fn build_filter(filters: &FieldFilters) -> Result<Document, RepositoryError> {
    let mut ordered: Vec<_> = filters.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));

    let mut filter_doc = Document::new();
    let mut conjuncts = Vec::new();
    for (field, condition) in ordered {
        let clauses = predicate_clauses(field, condition)?;
        if clauses.is_empty() {
            continue;
        }
        match merge_operators(&clauses) {
            Some(operators) => {
                filter_doc.insert(field.clone(), operators);
            }
            None => conjuncts.extend(
                clauses
                    .into_iter()
                    .map(|operators| Bson::Document(operator(field, Bson::Document(operators)))),
            ),
        }
    }
    if !conjuncts.is_empty() {
        filter_doc.insert("$and", conjuncts);
    }
    Ok(filter_doc)
}

/// One operator document per populated predicate.
fn predicate_clauses(
    field: &str,
    condition: &FilterCondition,
) -> Result<Vec<Document>, RepositoryError> {
    let mut clauses = Vec::new();
    for (predicate, values) in condition.populated() {
        let clause = match predicate {
            Predicate::Equals if values.len() == 1 => operator("$eq", to_bson(field, &values[0])?),
            Predicate::Equals | Predicate::In => operator("$in", to_bson_array(field, values)?),
            Predicate::NotIn => operator("$nin", to_bson_array(field, values)?),
            Predicate::GreaterThan => operator("$gt", to_bson(field, &values[0])?),
            Predicate::GreaterOrEqual => operator("$gte", to_bson(field, &values[0])?),
            Predicate::LessThan => operator("$lt", to_bson(field, &values[0])?),
            Predicate::LessOrEqual => operator("$lte", to_bson(field, &values[0])?),
            Predicate::Between => {
                if values.len() != 2 {
                    return Err(RepositoryError::InvalidFilter(format!(
                        "between on '{field}' requires exactly two values, got {}",
                        values.len()
                    )));
                }
                let mut range = operator("$gte", to_bson(field, &values[0])?);
                range.insert("$lte", to_bson(field, &values[1])?);
                range
            }
        };
        clauses.push(clause);
    }
    Ok(clauses)
}

fn operator(name: &str, value: Bson) -> Document {
    let mut clause = Document::new();
    clause.insert(name, value);
    clause
}

/// `None` when two clauses set the same operator.
fn merge_operators(clauses: &[Document]) -> Option<Document> {
    let mut merged = Document::new();
    for clause in clauses {
        for (operator, value) in clause {
            if merged.insert(operator.clone(), value.clone()).is_some() {
                return None;
            }
        }
    }
    Some(merged)
}

fn to_bson(field: &str, value: &Value) -> Result<Bson, RepositoryError> {
    Bson::try_from(value.clone()).map_err(|err| {
        RepositoryError::InvalidFilter(format!("unsupported value for '{field}': {err}"))
    })
}

fn to_bson_array(field: &str, values: &[Value]) -> Result<Bson, RepositoryError> {
    values
        .iter()
        .map(|value| to_bson(field, value))
        .collect::<Result<Vec<_>, _>>()
        .map(Bson::Array)
}

fn document_to_row(document: Document) -> Result<Row, RepositoryError> {
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(row) => Ok(row),
        other => Err(RepositoryError::Decode(format!(
            "expected a document, got {other}"
        ))),
    }
}

/// Builds `{ "_id": <id> }` selectors used by the report store.
pub(crate) fn id_selector(id: &str) -> Document {
    doc! { "_id": id }
}
