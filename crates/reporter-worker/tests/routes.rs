use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use reporter_processing::testing::{
    row, table_schema, FakeRelationalRepository, FakeStatusRepository, FakeTemplateStore, Harness,
};
use reporter_processing::{
    ConnectionConfig, DataSource, DataSourceStatus, DatabaseType, PipelineConfig, ProcessingError,
    ReportPipeline, SafeDataSources,
};
use reporter_repository::ReportStatus;
use reporter_worker::{router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn app(harness: &Harness) -> Router {
    let pipeline = ReportPipeline::new(harness.collaborators(), PipelineConfig::default());
    router(AppState::new(Arc::new(pipeline), 2))
}

fn onboarding() -> DataSource {
    DataSource::relational(
        "onboarding",
        Arc::new(
            FakeRelationalRepository::new(vec![table_schema("public", "organization", &["id", "name"])])
                .with_rows("public", "organization", vec![row(json!({"name": "Acme"}))]),
        ),
    )
}

async fn send(app: Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok((status, serde_json::from_slice(&bytes)?))
}

fn generate(body: impl Into<Body>) -> Result<Request<Body>> {
    Ok(Request::post("/v1/reports/generate")
        .header("content-type", "application/json")
        .body(body.into())?)
}

#[tokio::test]
async fn generate_accepts_a_report() -> Result<()> {
    let (template_id, report_id) = (Uuid::new_v4(), Uuid::new_v4());
    let harness = Harness::new(
        FakeTemplateStore::new().with_template(template_id, "{{ onboarding.organization.0.name }}"),
        SafeDataSources::new([onboarding()]),
    );
    let body = serde_json::to_vec(&json!({
        "templateId": template_id,
        "reportId": report_id,
        "outputFormat": "txt",
        "dataQueries": {"onboarding": {"organization": ["name"]}},
    }))?;

    let (status, payload) = send(app(&harness), generate(body)?).await?;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(payload["reportId"], json!(report_id));
    assert_eq!(payload["status"], "Finished");
    assert_eq!(harness.reports.stored()[0].text(), "Acme");
    Ok(())
}

#[tokio::test]
async fn generate_skips_finished_reports() -> Result<()> {
    let (template_id, report_id) = (Uuid::new_v4(), Uuid::new_v4());
    let mut harness = Harness::new(FakeTemplateStore::new(), SafeDataSources::new([]));
    harness.statuses =
        Arc::new(FakeStatusRepository::new().with_status(report_id, ReportStatus::Finished));
    let body = serde_json::to_vec(&json!({
        "templateId": template_id,
        "reportId": report_id,
        "outputFormat": "txt",
        "dataQueries": {},
    }))?;

    let (status, payload) = send(app(&harness), generate(body)?).await?;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(payload["status"], "Finished");
    assert_eq!(harness.templates.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn malformed_message_is_unprocessable() -> Result<()> {
    let harness = Harness::new(FakeTemplateStore::new(), SafeDataSources::new([]));

    let (status, payload) = send(app(&harness), generate("{not json")?).await?;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(payload["error"]
        .as_str()
        .unwrap_or_default()
        .starts_with("failed to decode report message"));
    Ok(())
}

#[tokio::test]
async fn missing_template_is_a_server_error() -> Result<()> {
    let report_id = Uuid::new_v4();
    let harness = Harness::new(FakeTemplateStore::new(), SafeDataSources::new([]));
    let body = serde_json::to_vec(&json!({
        "templateId": Uuid::new_v4(),
        "reportId": report_id,
        "outputFormat": "html",
        "dataQueries": {},
    }))?;

    let (status, payload) = send(app(&harness), generate(body)?).await?;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(payload["error"].as_str().unwrap_or_default().contains("storage error"));
    let last = harness.statuses.last_change().expect("error recorded");
    assert_eq!(last.id, report_id);
    assert_eq!(last.status, ReportStatus::Error);
    Ok(())
}

#[tokio::test]
async fn health_reports_each_datasource() -> Result<()> {
    let mut ledger = DataSource::new(
        "ledger",
        DatabaseType::Postgres,
        ConnectionConfig {
            url: "postgres://localhost/ledger".into(),
            ..ConnectionConfig::default()
        },
    );
    ledger.status = DataSourceStatus::Unavailable;
    ledger.last_error = Some("connection refused".into());

    let harness = Harness::new(FakeTemplateStore::new(), SafeDataSources::new([onboarding(), ledger]));
    for _ in 0..5 {
        let _ = harness
            .breakers
            .execute("ledger", || async {
                Err::<(), _>(ProcessingError::DataSourceUnavailable {
                    datasource: "ledger".into(),
                    reason: Some("connection refused".into()),
                })
            })
            .await;
    }

    let request = Request::get("/health").body(Body::empty())?;
    let (status, payload) = send(app(&harness), request).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], "degraded");

    let sources = payload["datasources"].as_array().cloned().unwrap_or_default();
    assert_eq!(sources.len(), 2);

    assert_eq!(sources[0]["name"], "ledger");
    assert_eq!(sources[0]["databaseType"], "postgresql");
    assert_eq!(sources[0]["status"], "unavailable");
    assert_eq!(sources[0]["initialized"], false);
    assert_eq!(sources[0]["circuitState"], "open");
    assert_eq!(sources[0]["healthy"], false);
    assert_eq!(sources[0]["lastError"], "connection refused");

    assert_eq!(sources[1]["name"], "onboarding");
    assert_eq!(sources[1]["status"], "available");
    assert_eq!(sources[1]["initialized"], true);
    assert_eq!(sources[1]["circuitState"], "closed");
    assert_eq!(sources[1]["healthy"], true);
    assert!(sources[1].get("lastError").is_none());
    Ok(())
}

#[tokio::test]
async fn health_is_ok_when_everything_is_up() -> Result<()> {
    let harness = Harness::new(FakeTemplateStore::new(), SafeDataSources::new([onboarding()]));

    let request = Request::get("/health").body(Body::empty())?;
    let (status, payload) = send(app(&harness), request).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], "ok");
    Ok(())
}
