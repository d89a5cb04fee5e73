//! Print executor: download a job's file, hand it to the spooler, report the
//! outcome.
//!
//! Status sequence per job: `PRINTING`, then exactly one of
//! `COMPLETED_SUCCESSFULLY` / `COMPLETED_WITH_ERROR`.  The download lives in
//! a [`tempfile::NamedTempFile`] that is removed whenever the attempt ends.

use std::sync::Arc;

use log::{error, info};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

use crate::api::ApiClient;
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::job::{Job, JobStatus};
use crate::printer::{PrintBackend, PrintOptions};

pub struct Executor<B: PrintBackend> {
    cfg:     Arc<AgentConfig>,
    api:     ApiClient,
    backend: Arc<B>,
    /// Bounds spooler submissions in flight (`max_print_workers`).
    workers: Arc<Semaphore>,
}

impl<B: PrintBackend> Executor<B> {
    pub fn new(cfg: Arc<AgentConfig>, api: ApiClient, backend: Arc<B>) -> Self {
        let workers = Arc::new(Semaphore::new(cfg.max_print_workers.max(1)));
        Self { cfg, api, backend, workers }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Run one print attempt for `job`.  Never fails; the outcome is reported
    /// to the API.
    pub async fn execute(&self, job: &Job) {
        self.api.report(job.id, JobStatus::Printing, None).await;

        match self.process(job).await {
            Ok(()) => {
                self.api.report(job.id, JobStatus::CompletedSuccessfully, None).await;
            }
            Err(e) => {
                let msg = e.to_string();
                error!("ERROR while job processing: {msg}");
                self.api
                    .report(job.id, JobStatus::CompletedWithError, Some(&msg))
                    .await;
            }
        }
    }

    async fn process(&self, job: &Job) -> Result<()> {
        let tmp = tempfile::Builder::new()
            .prefix(&format!("print-job-{}-", job.id))
            .suffix(&format!("__{}", sanitize_file_name(&job.file.name)))
            .tempfile()?;

        let size = self.download(job, &tmp).await?;
        info!("task #{}: downloaded {size} bytes to {}", job.id, tmp.path().display());

        if self.cfg.dry_run {
            info!(
                "PRINTING SUPPRESSED on {}: {}",
                job.printer,
                self.cfg.job_admin_url(job.id)
            );
            return Ok(());
        }

        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|e| AgentError::Spooler(format!("print workers closed: {e}")))?;

        if self.cfg.enable_printer {
            self.backend.enable_printer(&job.printer).await?;
        }
        let title = format!("Print Job #{}", job.id);
        let request_id = self
            .backend
            .print_file(&job.printer, tmp.path(), &title, &print_options(job))
            .await?;
        info!("task #{} submitted to {} as {request_id:?}", job.id, job.printer);
        Ok(())
    }

    /// Stream the job's file into `tmp` chunk by chunk; returns bytes written.
    async fn download(&self, job: &Job, tmp: &NamedTempFile) -> Result<u64> {
        let mut resp = self
            .api
            .http()
            .get(&job.file.url)
            .timeout(self.cfg.download_timeout)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AgentError::Protocol(format!(
                "download of {} answered {status}",
                job.file.url
            )));
        }

        let mut out = tokio::fs::File::from_std(tmp.reopen()?);
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;
        Ok(written)
    }
}

/// Spooler options for `job`: its extra options plus `copies`.
fn print_options(job: &Job) -> PrintOptions {
    let mut options = job.options.clone();
    options.insert("copies".into(), job.copies.to_string());
    options
}

/// Keep a server-provided file name usable as a temp file suffix.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
        .collect()
}
