//! HTML to PDF conversion through a bounded pool of headless browsers.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::ProcessingError;

#[async_trait]
pub trait PdfPool: Send + Sync {
    /// Converts `html` and writes the PDF to `output`.
    async fn submit(&self, html: &str, output: &Path) -> Result<(), ProcessingError>;
}

#[derive(Debug, Clone)]
pub struct PdfPoolConfig {
    pub chrome_path: PathBuf,
    pub workers: usize,
    pub timeout: Duration,
}

impl Default for PdfPoolConfig {
    fn default() -> Self {
        Self {
            chrome_path: PathBuf::from("chromium"),
            workers: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Runs at most `workers` concurrent `--print-to-pdf` processes.
#[derive(Debug, Clone)]
pub struct ChromiumPdfPool {
    config: PdfPoolConfig,
    permits: Arc<Semaphore>,
}

impl ChromiumPdfPool {
    pub fn new(config: PdfPoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.workers.max(1)));
        Self { config, permits }
    }

    pub fn config(&self) -> &PdfPoolConfig {
        &self.config
    }
}

#[async_trait]
impl PdfPool for ChromiumPdfPool {
    async fn submit(&self, html: &str, output: &Path) -> Result<(), ProcessingError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ProcessingError::Pdf("pdf pool is closed".into()))?;

        let page = tempfile::Builder::new()
            .prefix("report-")
            .suffix(".html")
            .tempfile()
            .map_err(|err| ProcessingError::Pdf(format!("failed to create html file: {err}")))?;
        tokio::fs::write(page.path(), html)
            .await
            .map_err(|err| ProcessingError::Pdf(format!("failed to write html file: {err}")))?;

        let mut command = Command::new(&self.config.chrome_path);
        command
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--no-pdf-header-footer")
            .arg(format!("--print-to-pdf={}", output.display()))
            .arg(format!("file://{}", page.path().display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(chrome = %self.config.chrome_path.display(), output = %output.display(), "starting pdf conversion");
        let run = command.output();
        let finished = tokio::time::timeout(self.config.timeout, run)
            .await
            .map_err(|_| {
                ProcessingError::Pdf(format!(
                    "conversion timed out after {}s",
                    self.config.timeout.as_secs()
                ))
            })?
            .map_err(|err| {
                ProcessingError::Pdf(format!(
                    "failed to launch {}: {err}",
                    self.config.chrome_path.display()
                ))
            })?;

        if !finished.status.success() {
            let stderr = String::from_utf8_lossy(&finished.stderr);
            return Err(ProcessingError::Pdf(format!(
                "browser exited with {}: {}",
                finished.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Converts `html` through `pool` and returns the PDF bytes. The scratch file
/// is removed on every exit path.
pub async fn convert_to_pdf(pool: &dyn PdfPool, html: &str) -> Result<Vec<u8>, ProcessingError> {
    let scratch = tempfile::Builder::new()
        .prefix("report-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|err| ProcessingError::Pdf(format!("failed to create pdf file: {err}")))?;

    pool.submit(html, scratch.path()).await?;

    tokio::fs::read(scratch.path())
        .await
        .map_err(|err| ProcessingError::Pdf(format!("failed to read pdf output: {err}")))
}
