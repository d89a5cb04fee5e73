//! Test doubles: an in-process job dispatch API and a recording print backend.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::printer::{PrintBackend, PrintOptions, PrinterAttributes, PrinterInventory};

/// Inventory with one entry per name.
pub fn inventory(names: &[&str]) -> PrinterInventory {
    names
        .iter()
        .map(|name| {
            let mut attrs = PrinterAttributes::new();
            attrs.insert("printer-info".into(), Value::from(*name));
            attrs.insert("printer-state".into(), Value::from(3));
            (name.to_string(), attrs)
        })
        .collect()
}

// ── Mock API ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ApiState {
    registration_attempts: Vec<Instant>,
    registrations:         Vec<Value>,
    fail_registrations:    usize,
    job_batches:           VecDeque<Value>,
    job_fetches:           Vec<String>,
    files:                 HashMap<String, Vec<u8>>,
    file_delays:           HashMap<String, Duration>,
    fail_status:           HashSet<i64>,
    updates:               Vec<(i64, Value)>,
}

type Shared = Arc<Mutex<ApiState>>;

/// Job dispatch API served from a local port.
pub struct MockApi {
    addr:  SocketAddr,
    state: Shared,
    dir:   TempDir,
}

impl MockApi {
    pub async fn start() -> Self {
        Self::start_on(SocketAddr::from(([127, 0, 0, 1], 0))).await
    }

    /// Serve on `addr`, e.g. a port an agent is already retrying against.
    pub async fn start_on(addr: SocketAddr) -> Self {
        let state = Shared::default();
        let app = Router::new()
            .route("/reg/", post(register))
            .route("/srv/{station}/jobs", get(jobs))
            .route("/job/{task}/update", post(update))
            .route("/files/{name}", get(file))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state, dir: tempfile::tempdir().unwrap() }
    }

    /// Config pointing at this API with short intervals.
    pub fn config_value(&self) -> AgentConfig {
        AgentConfig {
            api_url:                  format!("http://{}", self.addr),
            uid_file:                 self.dir.path().join(".uid"),
            connection_retry_timeout: Duration::from_millis(50),
            fetching_jobs_timeout:    Duration::from_millis(50),
            http_timeout:             Duration::from_secs(5),
            ..AgentConfig::default()
        }
    }

    pub fn config(&self) -> Arc<AgentConfig> {
        Arc::new(self.config_value())
    }

    /// A local address nothing listens on until [`MockApi::start_on`] binds it.
    pub async fn free_addr() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    /// Config pointing at a local port nothing listens on.
    pub async fn unreachable_config() -> Arc<AgentConfig> {
        let addr = Self::free_addr().await;
        Arc::new(AgentConfig {
            api_url:      format!("http://{addr}"),
            uid_file:     std::env::temp_dir().join("print-agent-test.uid"),
            http_timeout: Duration::from_secs(5),
            ..AgentConfig::default()
        })
    }

    pub fn file_url(&self, name: &str) -> String {
        format!("http://{}/files/{name}", self.addr)
    }

    pub fn serve_file(&self, name: &str, content: &[u8]) {
        self.lock().files.insert(name.to_string(), content.to_vec());
    }

    /// Serve `name` only after `delay`, before any response header is sent.
    pub fn serve_slow_file(&self, name: &str, content: &[u8], delay: Duration) {
        let mut s = self.lock();
        s.files.insert(name.to_string(), content.to_vec());
        s.file_delays.insert(name.to_string(), delay);
    }

    /// Queue a `jobs` array returned by the next fetch; later fetches get an
    /// empty list once all batches are consumed.
    pub fn push_jobs(&self, jobs: Value) {
        self.lock().job_batches.push_back(jobs);
    }

    /// Answer the next `n` registrations with 503.
    pub fn fail_registrations(&self, n: usize) {
        self.lock().fail_registrations = n;
    }

    /// Answer every status update of `task` with 500 (not recorded).
    pub fn fail_status_for(&self, task: i64) {
        self.lock().fail_status.insert(task);
    }

    pub fn registration_attempts(&self) -> Vec<Instant> {
        self.lock().registration_attempts.clone()
    }

    pub fn registrations(&self) -> Vec<Value> {
        self.lock().registrations.clone()
    }

    pub fn job_fetches(&self) -> Vec<String> {
        self.lock().job_fetches.clone()
    }

    pub fn updates_for(&self, task: i64) -> Vec<Value> {
        self.lock()
            .updates
            .iter()
            .filter(|(id, _)| *id == task)
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn statuses_for(&self, task: i64) -> Vec<String> {
        self.updates_for(task)
            .iter()
            .map(|body| body["status"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ApiState> {
        self.state.lock().unwrap()
    }
}

async fn register(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut s = state.lock().unwrap();
    s.registration_attempts.push(Instant::now());
    if s.fail_registrations > 0 {
        s.fail_registrations -= 1;
        return (StatusCode::SERVICE_UNAVAILABLE, "starting up").into_response();
    }
    s.registrations.push(body);
    Json(json!({"print_server_id": 17, "detail": "registered"})).into_response()
}

async fn jobs(State(state): State<Shared>, UrlPath(station): UrlPath<String>) -> Json<Value> {
    let mut s = state.lock().unwrap();
    s.job_fetches.push(station);
    let jobs = s.job_batches.pop_front().unwrap_or_else(|| json!([]));
    Json(json!({ "jobs": jobs }))
}

async fn update(
    State(state): State<Shared>,
    UrlPath(task): UrlPath<i64>,
    Json(body): Json<Value>,
) -> Response {
    let mut s = state.lock().unwrap();
    if s.fail_status.contains(&task) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    s.updates.push((task, body));
    Json(json!({"ok": true})).into_response()
}

async fn file(State(state): State<Shared>, UrlPath(name): UrlPath<String>) -> Response {
    let (content, delay) = {
        let s = state.lock().unwrap();
        (s.files.get(&name).cloned(), s.file_delays.get(&name).copied())
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    match content {
        Some(content) => content.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ── Recording backend ─────────────────────────────────────────────────────────

/// One submission seen by [`RecordingBackend`].
#[derive(Debug, Clone)]
pub struct PrintCall {
    pub printer:   String,
    pub title:     String,
    pub options:   PrintOptions,
    pub path:      PathBuf,
    pub file_name: String,
    /// File content at submission time.
    pub content:   Vec<u8>,
}

#[derive(Default)]
pub struct RecordingBackend {
    printers: PrinterInventory,
    fail:     Option<String>,
    prints:   Mutex<Vec<PrintCall>>,
    enabled:  Mutex<Vec<String>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_printers(printers: PrinterInventory) -> Self {
        Self { printers, ..Self::default() }
    }

    /// Every submission fails with `msg`.
    pub fn failing(msg: &str) -> Self {
        Self { fail: Some(msg.to_string()), ..Self::default() }
    }

    pub fn prints(&self) -> Vec<PrintCall> {
        self.prints.lock().unwrap().clone()
    }

    pub fn enabled(&self) -> Vec<String> {
        self.enabled.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrintBackend for RecordingBackend {
    async fn list_printers(&self) -> Result<PrinterInventory> {
        Ok(self.printers.clone())
    }

    async fn enable_printer(&self, printer: &str) -> Result<()> {
        self.enabled.lock().unwrap().push(printer.to_string());
        Ok(())
    }

    async fn print_file(
        &self,
        printer: &str,
        path:    &Path,
        title:   &str,
        options: &PrintOptions,
    ) -> Result<String> {
        if let Some(msg) = &self.fail {
            return Err(AgentError::Spooler(msg.clone()));
        }
        let call = PrintCall {
            printer:   printer.to_string(),
            title:     title.to_string(),
            options:   options.clone(),
            path:      path.to_path_buf(),
            file_name: path.file_name().unwrap().to_string_lossy().into_owned(),
            content:   std::fs::read(path)?,
        };
        let mut prints = self.prints.lock().unwrap();
        prints.push(call);
        Ok(format!("{printer}-{}", prints.len()))
    }
}
