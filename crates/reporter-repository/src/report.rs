//! Report-status store kept in MongoDB.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::{Client, Collection};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::document::id_selector;
use crate::model::{ReportRecord, ReportStatus};
use crate::RepositoryError;

pub const REPORT_COLLECTION: &str = "report";

#[async_trait]
pub trait ReportStatusRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<ReportRecord, RepositoryError>;

    async fn update_status_by_id(
        &self,
        status: ReportStatus,
        id: Uuid,
        updated_at: DateTime<Utc>,
        metadata: Option<Value>,
    ) -> Result<(), RepositoryError>;
}

#[derive(Clone)]
pub struct MongoReportRepository {
    collection: Collection<Document>,
}

impl MongoReportRepository {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, RepositoryError> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Self::new(client.database(database).collection(REPORT_COLLECTION)))
    }

    pub fn new(collection: Collection<Document>) -> Self {
        Self { collection }
    }
}

#[async_trait]
impl ReportStatusRepository for MongoReportRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<ReportRecord, RepositoryError> {
        let document = self
            .collection
            .find_one(id_selector(&id.to_string()))
            .await?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;

        decode_record(id, &document)
    }

    async fn update_status_by_id(
        &self,
        status: ReportStatus,
        id: Uuid,
        updated_at: DateTime<Utc>,
        metadata: Option<Value>,
    ) -> Result<(), RepositoryError> {
        let mut fields = doc! {
            "status": status.as_str(),
            "updated_at": bson::DateTime::from_millis(updated_at.timestamp_millis()),
        };
        if let Some(metadata) = metadata {
            let metadata = Bson::try_from(metadata)
                .map_err(|err| RepositoryError::Decode(format!("metadata: {err}")))?;
            fields.insert("metadata", metadata);
        }

        let result = self
            .collection
            .update_one(id_selector(&id.to_string()), doc! { "$set": fields })
            .await?;

        if result.matched_count == 0 {
            debug!(report_id = %id, %status, "status update matched no report");
        }

        Ok(())
    }
}

fn decode_record(id: Uuid, document: &Document) -> Result<ReportRecord, RepositoryError> {
    let status_str = document
        .get_str("status")
        .map_err(|err| RepositoryError::Decode(format!("status: {err}")))?;
    let status = ReportStatus::parse(status_str)
        .ok_or_else(|| RepositoryError::InvalidStatus(status_str.to_string()))?;

    let updated_at = match document.get("updated_at") {
        Some(Bson::DateTime(value)) => DateTime::<Utc>::from_timestamp_millis(value.timestamp_millis())
            .ok_or_else(|| RepositoryError::Decode("updated_at out of range".into()))?,
        _ => Utc::now(),
    };

    let metadata = match document.get("metadata") {
        None | Some(Bson::Null) => None,
        Some(value) => Some(value.clone().into_relaxed_extjson()),
    };

    Ok(ReportRecord {
        id,
        status,
        updated_at,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_stored_report() {
        let id = Uuid::new_v4();
        let document = doc! {
            "_id": id.to_string(),
            "status": "Error",
            "updated_at": bson::DateTime::from_millis(1_700_000_000_000),
            "metadata": { "error": "boom" },
        };

        let record = decode_record(id, &document).expect("decode");
        assert_eq!(record.status, ReportStatus::Error);
        assert_eq!(record.updated_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(record.metadata, Some(json!({"error": "boom"})));
    }

    #[test]
    fn unknown_status_is_rejected() {
        let document = doc! { "status": "Archived" };
        let err = decode_record(Uuid::nil(), &document).unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidStatus(value) if value == "Archived"));
    }
}
