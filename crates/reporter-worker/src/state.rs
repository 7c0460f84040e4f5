use std::sync::Arc;

use anyhow::{Context, Result};
use reporter_bucket::{BucketReportStore, BucketTemplateStore, S3BucketStore};
use reporter_processing::{
    ChromiumPdfPool, CircuitBreakerManager, PipelineCollaborators, PipelineConfig, ReportPipeline,
    SafeDataSources,
};
use reporter_repository::MongoReportRepository;
use tokio::sync::Semaphore;
use tracing::info;

use crate::config::WorkerConfig;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<ReportPipeline>,
    permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(pipeline: Arc<ReportPipeline>, max_in_flight_reports: usize) -> Self {
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(max_in_flight_reports.max(1))),
        }
    }

    pub fn pipeline(&self) -> &Arc<ReportPipeline> {
        &self.pipeline
    }

    pub fn permits(&self) -> &Arc<Semaphore> {
        &self.permits
    }
}

/// Connects the stores and assembles the pipeline. Datasources are only
/// declared here; each connects on first use.
pub async fn build_pipeline(config: &WorkerConfig) -> Result<ReportPipeline> {
    let template_bucket = S3BucketStore::new(config.storage.with_bucket(&config.template_bucket))
        .await
        .context("failed to configure template bucket")?;
    let report_bucket = S3BucketStore::new(config.storage.with_bucket(&config.report_bucket))
        .await
        .context("failed to configure report bucket")?;

    let statuses = MongoReportRepository::connect(&config.mongo_uri, &config.mongo_db_name)
        .await
        .context("failed to connect to the report status store")?;

    let datasources = SafeDataSources::new(
        config
            .datasources
            .iter()
            .cloned()
            .map(|source| source.into_datasource()),
    );
    info!(datasources = datasources.len(), "datasources declared");

    let collaborators = PipelineCollaborators {
        templates: Arc::new(BucketTemplateStore::with_suffix(
            Arc::new(template_bucket),
            config.template_suffix.clone(),
        )),
        reports: Arc::new(BucketReportStore::new(Arc::new(report_bucket))),
        statuses: Arc::new(statuses),
        datasources: Arc::new(datasources),
        breakers: Arc::new(CircuitBreakerManager::new(config.breaker)),
        pdf_pool: Arc::new(ChromiumPdfPool::new(config.pdf.clone())),
    };

    Ok(ReportPipeline::new(
        collaborators,
        PipelineConfig {
            report_ttl: config.report_ttl.clone(),
            crm_secrets: config.crm_secrets.clone(),
        },
    ))
}
