use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use reporter_processing::{DataSourceStatus, ProcessingError};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/reports/generate", post(generate))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub report_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Runs one broker message through the pipeline.
pub async fn generate(State(state): State<AppState>, body: Bytes) -> Response {
    let Ok(_permit) = state.permits().acquire().await else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "worker is shutting down".into());
    };

    match state.pipeline().process(&body).await {
        Ok(outcome) => (
            StatusCode::ACCEPTED,
            Json(GenerateResponse {
                report_id: outcome.report_id(),
                status: outcome.status().to_string(),
            }),
        )
            .into_response(),
        Err(err) => {
            let status = status_for(&err);
            if status.is_server_error() {
                error!(error = %err, "report generation failed");
            } else {
                warn!(error = %err, "report request rejected");
            }
            error_response(status, err.to_string())
        }
    }
}

fn status_for(err: &ProcessingError) -> StatusCode {
    match err {
        ProcessingError::InputDecode(_)
        | ProcessingError::SchemaAmbiguity { .. }
        | ProcessingError::SchemaUnknown { .. }
        | ProcessingError::Render(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceHealth {
    pub name: String,
    pub database_type: String,
    pub status: DataSourceStatus,
    pub initialized: bool,
    pub circuit_state: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub datasources: Vec<DataSourceHealth>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let pipeline = state.pipeline();
    let breakers = pipeline.breakers();

    let datasources: Vec<DataSourceHealth> = pipeline
        .datasources()
        .snapshot()
        .into_iter()
        .map(|source| {
            let circuit = breakers.get_state(&source.name);
            DataSourceHealth {
                healthy: breakers.is_healthy(&source.name),
                database_type: source.database_type.to_string(),
                status: source.status,
                initialized: source.initialized,
                circuit_state: circuit.to_string(),
                last_error: source.last_error,
                name: source.name,
            }
        })
        .collect();

    let status = if datasources
        .iter()
        .all(|source| source.healthy && source.status == DataSourceStatus::Available)
    {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status,
        datasources,
    })
}
