//! Job dispatch API client.
//!
//!   POST {base}/reg/                  — register the station
//!   GET  {base}/srv/{station}/jobs    — pending jobs
//!   POST {base}/job/{task}/update     — status transitions

use std::sync::Arc;

use log::{error, info, warn};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::identity::StationIdentity;
use crate::job::{Job, JobStatus};
use crate::printer::PrinterInventory;

/// Body of `POST /reg/`.
#[derive(Debug, Serialize)]
pub struct RegistrationRequest<'a> {
    #[serde(flatten)]
    pub identity:      &'a StationIdentity,
    pub printers_data: &'a PrinterInventory,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Server-assigned station id.
    pub print_server_id: String,
    /// Full answer, kept for logging.
    pub answer: Value,
}

/// Body of `POST /job/{task_id}/update`.
#[derive(Debug, Serialize)]
pub struct StatusUpdate<'a> {
    pub task_id:       i64,
    pub status:        JobStatus,
    pub error_message: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct JobsResponse {
    #[serde(default)]
    jobs: Vec<Value>,
}

/// Thin wrapper over a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    cfg:  Arc<AgentConfig>,
    http: Client,
}

impl ApiClient {
    pub fn new(cfg: Arc<AgentConfig>) -> Result<Self> {
        let http = Client::builder()
            .timeout(cfg.http_timeout)
            .build()
            .map_err(AgentError::Http)?;
        Ok(Self { cfg, http })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Register this station; returns the server-assigned id.
    pub async fn register(
        &self,
        identity:  &StationIdentity,
        inventory: &PrinterInventory,
    ) -> Result<Registration> {
        let url = self.cfg.registration_url();
        let body = RegistrationRequest { identity, printers_data: inventory };
        let resp = self.http.post(&url).json(&body).send().await?;

        let status = resp.status();
        if status.is_success() {
            info!("CALL POST {url}: {status}");
        } else {
            error!("CALL POST {url}: {status}");
        }
        let answer: Value = checked(resp).await?.json().await?;
        let print_server_id = station_id_of(&answer).ok_or_else(|| {
            AgentError::Protocol(format!("registration answer without print_server_id: {answer}"))
        })?;
        Ok(Registration { print_server_id, answer })
    }

    /// Fetch pending jobs for `station_id`.  Malformed entries are skipped.
    pub async fn fetch_jobs(&self, station_id: &str) -> Result<Vec<Job>> {
        let url = self.cfg.jobs_url(station_id);
        let resp = checked(self.http.get(&url).send().await?).await?;
        let body: JobsResponse = resp.json().await?;

        let jobs = body
            .jobs
            .iter()
            .filter_map(|raw| match decode_job(raw) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!("skipping malformed job {raw}: {e}");
                    None
                }
            })
            .collect();
        Ok(jobs)
    }

    /// Report a status transition.  Failures are logged and swallowed.
    pub async fn report(
        &self,
        task_id:       i64,
        status:        JobStatus,
        error_message: Option<&str>,
    ) -> Option<Value> {
        info!("Update task #{task_id} status to {status}...");
        match self.post_status(task_id, status, error_message).await {
            Ok(result) => {
                info!("Task #{task_id} status updating to {status} result: {result}");
                Some(result)
            }
            Err(e) => {
                let detail = error_message.map(|m| format!(" ({m})")).unwrap_or_default();
                error!("Can't update status of task #{task_id} to {status}{detail}: {e}");
                None
            }
        }
    }

    async fn post_status(
        &self,
        task_id:       i64,
        status:        JobStatus,
        error_message: Option<&str>,
    ) -> Result<Value> {
        let url = self.cfg.job_update_url(task_id);
        let body = StatusUpdate { task_id, status, error_message };
        let resp = checked(self.http.post(&url).json(&body).send().await?).await?;
        Ok(resp.json().await?)
    }
}

/// Turn a non-2xx response into a protocol error that carries the body.
async fn checked(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().clone();
    let body = resp.text().await.unwrap_or_default();
    Err(AgentError::Protocol(format!("{url} answered {status}: {}", body.trim())))
}

/// Decode one element of the `jobs` array.
fn decode_job(raw: &Value) -> Result<Job> {
    Ok(Job::deserialize(raw)?)
}

/// `print_server_id` may come back as a number or a string.
fn station_id_of(answer: &Value) -> Option<String> {
    match answer.get("print_server_id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
