use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use reporter_bucket::{ReportStore, TemplateStore};
use reporter_repository::{ReportRequest, ReportStatus, ReportStatusRepository};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument, Span};
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreakerManager;
use crate::content_type::{get_content_type, is_pdf, report_object_key};
use crate::crm::CrmSecrets;
use crate::datasource::SafeDataSources;
use crate::error::ProcessingError;
use crate::pdf::{convert_to_pdf, PdfPool};
use crate::query::QueryEngine;
use crate::render::render_template;

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Opaque TTL token handed to the report store; empty disables expiry.
    pub report_ttl: String,
    pub crm_secrets: CrmSecrets,
}

/// Everything the pipeline talks to.
#[derive(Clone)]
pub struct PipelineCollaborators {
    pub templates: Arc<dyn TemplateStore>,
    pub reports: Arc<dyn ReportStore>,
    pub statuses: Arc<dyn ReportStatusRepository>,
    pub datasources: Arc<SafeDataSources>,
    pub breakers: Arc<CircuitBreakerManager>,
    pub pdf_pool: Arc<dyn PdfPool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The artifact was stored under `object_key` and the report finished.
    Generated { report_id: Uuid, object_key: String },
    /// The report already reached a terminal status; nothing was done.
    Skipped { report_id: Uuid, status: ReportStatus },
}

impl ReportOutcome {
    pub fn report_id(&self) -> Uuid {
        match self {
            ReportOutcome::Generated { report_id, .. } | ReportOutcome::Skipped { report_id, .. } => {
                *report_id
            }
        }
    }

    pub fn status(&self) -> ReportStatus {
        match self {
            ReportOutcome::Generated { .. } => ReportStatus::Finished,
            ReportOutcome::Skipped { status, .. } => *status,
        }
    }
}

pub struct ReportPipeline {
    templates: Arc<dyn TemplateStore>,
    reports: Arc<dyn ReportStore>,
    statuses: Arc<dyn ReportStatusRepository>,
    pdf_pool: Arc<dyn PdfPool>,
    queries: QueryEngine,
    config: PipelineConfig,
}

impl ReportPipeline {
    pub fn new(collaborators: PipelineCollaborators, config: PipelineConfig) -> Self {
        let queries = QueryEngine::new(
            collaborators.datasources,
            collaborators.breakers,
            config.crm_secrets.clone(),
        );
        Self {
            templates: collaborators.templates,
            reports: collaborators.reports,
            statuses: collaborators.statuses,
            pdf_pool: collaborators.pdf_pool,
            queries,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn datasources(&self) -> &Arc<SafeDataSources> {
        self.queries.datasources()
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        self.queries.breakers()
    }

    /// Processes one raw broker message.
    pub async fn process(&self, body: &[u8]) -> Result<ReportOutcome, ProcessingError> {
        self.process_with_cancellation(body, &CancellationToken::new())
            .await
    }

    /// Like [`process`](Self::process); cancelling `cancel` aborts the current
    /// stage with [`ProcessingError::Cancelled`]. The `Error` status update is
    /// still attempted.
    pub async fn process_with_cancellation(
        &self,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<ReportOutcome, ProcessingError> {
        let parsed = info_span!("report.parse").in_scope(|| serde_json::from_slice::<ReportRequest>(body));
        let request = match parsed {
            Ok(request) => request,
            Err(err) => {
                let report_id = recover_report_id(body);
                return Err(self.fail(report_id, ProcessingError::InputDecode(err)).await);
            }
        };

        let span = info_span!(
            "report",
            report_id = %request.report_id,
            template_id = %request.template_id,
            output_format = %request.output_format,
        );
        async {
            match self.run(&request, cancel).await {
                Ok(outcome) => Ok(outcome),
                Err(err) => Err(self.fail(request.report_id, err).await),
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: &ReportRequest,
        cancel: &CancellationToken,
    ) -> Result<ReportOutcome, ProcessingError> {
        let report_id = request.report_id;

        let existing = stage(cancel, info_span!("report.idempotency"), async {
            Ok(match self.statuses.find_by_id(report_id).await {
                Ok(record) => Some(record.status),
                Err(err) => {
                    debug!(error = %err, "status lookup failed; treating as first attempt");
                    None
                }
            })
        })
        .await?;
        if let Some(status) = existing.filter(ReportStatus::is_terminal) {
            info!(%status, "report already processed; skipping");
            return Ok(ReportOutcome::Skipped { report_id, status });
        }

        let template = stage(cancel, info_span!("report.template"), async {
            let bytes = self
                .templates
                .get(&request.template_id.to_string())
                .await?;
            String::from_utf8(bytes.to_vec())
                .map_err(|err| ProcessingError::Render(format!("template is not valid utf-8: {err}")))
        })
        .await?;

        let results = stage(
            cancel,
            info_span!("report.query"),
            self.queries.query_all(request),
        )
        .await?;

        let rendered = stage(cancel, info_span!("report.render"), async {
            render_template(&template, &results, &request.output_format)
        })
        .await?;

        let artifact = if is_pdf(&request.output_format) {
            stage(
                cancel,
                info_span!("report.pdf"),
                convert_to_pdf(self.pdf_pool.as_ref(), &rendered),
            )
            .await?
        } else {
            rendered.into_bytes()
        };

        let object_key = report_object_key(request.template_id, report_id, &request.output_format);
        let content_type = get_content_type(&request.output_format);
        stage(cancel, info_span!("report.persist"), async {
            self.reports
                .put(&object_key, content_type, Bytes::from(artifact), &self.config.report_ttl)
                .await
                .map_err(ProcessingError::from)
        })
        .await?;

        stage(cancel, info_span!("report.finalise"), async {
            self.statuses
                .update_status_by_id(ReportStatus::Finished, report_id, Utc::now(), None)
                .await
                .map_err(ProcessingError::StatusUpdate)
        })
        .await?;

        info!(%object_key, "report generated");
        Ok(ReportOutcome::Generated {
            report_id,
            object_key,
        })
    }

    /// Marks the report as failed. A failing status update replaces `err`.
    async fn fail(&self, report_id: Uuid, err: ProcessingError) -> ProcessingError {
        error!(%report_id, error = %err, "report generation failed");
        let metadata = json!({ "error": err.to_string() });
        match self
            .statuses
            .update_status_by_id(ReportStatus::Error, report_id, Utc::now(), Some(metadata))
            .await
        {
            Ok(()) => err,
            Err(update_err) => {
                error!(%report_id, error = %update_err, "failed to record report error status");
                ProcessingError::StatusUpdate(update_err)
            }
        }
    }
}

async fn stage<T, F>(cancel: &CancellationToken, span: Span, work: F) -> Result<T, ProcessingError>
where
    F: Future<Output = Result<T, ProcessingError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProcessingError::Cancelled),
        outcome = work.instrument(span) => outcome,
    }
}

/// Best-effort `reportId` from a message that failed to decode.
fn recover_report_id(body: &[u8]) -> Uuid {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| value.get("reportId")?.as_str()?.parse().ok())
        .unwrap_or(Uuid::nil())
}
