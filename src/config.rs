//! Print agent configuration.
//!
//! Options come from a `key = value` file, then from the environment
//! (including a `.env` file in the working directory).  Environment keys are
//! the upper-case spelling of the file keys, e.g. `API_URL` for `api_url`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;

use crate::error::{AgentError, Result};

// Default interval constants (seconds)
const API_URL:                  &str = "http://127.0.0.1:8010";
const CONNECTION_RETRY_TIMEOUT: u64 = 5;
const FETCHING_JOBS_TIMEOUT:    u64 = 5;
const HTTP_TIMEOUT:             u64 = 60;
const DOWNLOAD_TIMEOUT:         u64 = 600;

/// Keys recognised in the config file and the environment.
const KEYS: &[&str] = &[
    "api_url",
    "uid_file",
    "connection_retry_timeout",
    "fetching_jobs_timeout",
    "dry_run",
    "max_print_workers",
    "enable_printer",
    "http_timeout",
    "download_timeout",
    "pid_file",
    "log_syslog",
];

/// Full agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    // ── Job dispatch API ──────────────────────────────────────────────────────
    /// Base URL of the job dispatch API, without a trailing slash.
    pub api_url: String,
    /// Per-request timeout for API calls.
    pub http_timeout: Duration,
    /// Timeout for a whole job file download, body included.
    pub download_timeout: Duration,
    // ── Station identity ──────────────────────────────────────────────────────
    /// File holding the persisted station token.
    pub uid_file: PathBuf,
    // ── Intervals ─────────────────────────────────────────────────────────────
    pub connection_retry_timeout: Duration,
    pub fetching_jobs_timeout:    Duration,
    // ── Printing ──────────────────────────────────────────────────────────────
    /// Run the whole pipeline but never hand files to the spooler.
    pub dry_run: bool,
    /// Number of spooler submissions allowed in flight.
    pub max_print_workers: usize,
    /// Re-enable (resume) the target printer before each submission.
    pub enable_printer: bool,
    // ── Process ───────────────────────────────────────────────────────────────
    pub pid_file:   Option<PathBuf>,
    pub log_syslog: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_url:                  API_URL.to_string(),
            http_timeout:             Duration::from_secs(HTTP_TIMEOUT),
            download_timeout:         Duration::from_secs(DOWNLOAD_TIMEOUT),
            uid_file:                 PathBuf::from(".uid"),
            connection_retry_timeout: Duration::from_secs(CONNECTION_RETRY_TIMEOUT),
            fetching_jobs_timeout:    Duration::from_secs(FETCHING_JOBS_TIMEOUT),
            dry_run:                  false,
            max_print_workers:        1,
            enable_printer:           true,
            pid_file:                 None,
            log_syslog:               false,
        }
    }
}

impl AgentConfig {
    /// `{api_url}/reg/`
    pub fn registration_url(&self) -> String {
        format!("{}/reg/", self.api_url)
    }

    /// `{api_url}/srv/{station_id}/jobs`
    pub fn jobs_url(&self, station_id: &str) -> String {
        format!("{}/srv/{station_id}/jobs", self.api_url)
    }

    /// `{api_url}/job/{task_id}/update`
    pub fn job_update_url(&self, task_id: i64) -> String {
        format!("{}/job/{task_id}/update", self.api_url)
    }

    /// Admin page of a job, logged instead of printing in dry-run mode.
    pub fn job_admin_url(&self, task_id: i64) -> String {
        format!("{}/admin/printer/printjob/{task_id}", self.api_url)
    }

    /// Apply a single option.  Unknown keys and empty values are ignored;
    /// unparsable numbers keep the current value.
    pub fn set_option(&mut self, key: &str, val: &str) {
        let val = val.trim();
        if val.is_empty() {
            return;
        }
        match key.trim().to_ascii_lowercase().as_str() {
            "api_url"                  => self.api_url = val.trim_end_matches('/').to_string(),
            "uid_file"                 => self.uid_file = PathBuf::from(val),
            "connection_retry_timeout" => self.connection_retry_timeout = parse_secs(val, self.connection_retry_timeout),
            "fetching_jobs_timeout"    => self.fetching_jobs_timeout = parse_secs(val, self.fetching_jobs_timeout),
            "http_timeout"             => self.http_timeout = parse_secs(val, self.http_timeout),
            "download_timeout"         => self.download_timeout = parse_secs(val, self.download_timeout),
            "dry_run"                  => self.dry_run = parse_bool(val),
            "max_print_workers"        => self.max_print_workers = val.parse().unwrap_or(self.max_print_workers),
            "enable_printer"           => self.enable_printer = parse_bool(val),
            "pid_file"                 => self.pid_file = Some(PathBuf::from(val)),
            "log_syslog"               => self.log_syslog = parse_bool(val),
            other => warn!("ignoring unknown config key {other:?}"),
        }
    }
}

fn parse_bool(val: &str) -> bool {
    matches!(val.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Seconds, fractional values allowed.
fn parse_secs(val: &str, fallback: Duration) -> Duration {
    match val.parse::<f64>() {
        Ok(s) if s.is_finite() && s >= 0.0 => Duration::from_secs_f64(s),
        _ => fallback,
    }
}

/// Apply `key = value` lines from `content` on top of `cfg`.
pub fn parse_config(content: &str, cfg: &mut AgentConfig) {
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, val)) = line.split_once('=') else {
            continue;
        };
        cfg.set_option(key, val.trim().trim_matches('"'));
    }
}

/// Parse `path` as a `print_agent.conf` file.
///
/// A missing file yields the defaults unless `required` is set.
pub fn load_config(path: &Path, required: bool) -> Result<AgentConfig> {
    let mut cfg = AgentConfig::default();
    match fs::read_to_string(path) {
        Ok(content) => parse_config(&content, &mut cfg),
        Err(e) if e.kind() == ErrorKind::NotFound && !required => {}
        Err(e) => {
            return Err(AgentError::Config(format!("cannot read {}: {e}", path.display())));
        }
    }
    Ok(cfg)
}

/// Overlay recognised variables from `vars` (e.g. `std::env::vars()`).
pub fn apply_env<I>(cfg: &mut AgentConfig, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, val) in vars {
        let key = key.to_ascii_lowercase();
        if KEYS.contains(&key.as_str()) {
            cfg.set_option(&key, &val);
        }
    }
}

/// Load `.env` from the working directory into the process environment.
///
/// A missing file is the normal case; any other failure (unreadable file,
/// malformed line) is returned so the caller can log it.
pub fn load_dotenv() -> Option<dotenvy::Error> {
    dotenv_problem(dotenvy::dotenv())
}

fn dotenv_problem<T>(res: dotenvy::Result<T>) -> Option<dotenvy::Error> {
    match res {
        Err(e) if !e.not_found() => Some(e),
        _ => None,
    }
}

/// Validate that the configuration is usable.
pub fn validate_config(cfg: &AgentConfig) -> Result<()> {
    let url = url::Url::parse(&cfg.api_url)
        .map_err(|e| AgentError::Config(format!("api_url {:?}: {e}", cfg.api_url)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AgentError::Config(format!(
            "api_url must be http or https, got {:?}",
            url.scheme()
        )));
    }
    if cfg.connection_retry_timeout.is_zero() || cfg.fetching_jobs_timeout.is_zero() {
        return Err(AgentError::Config("retry and polling intervals must be positive".into()));
    }
    if cfg.http_timeout.is_zero() || cfg.download_timeout.is_zero() {
        return Err(AgentError::Config("http_timeout and download_timeout must be positive".into()));
    }
    if cfg.max_print_workers == 0 {
        return Err(AgentError::Config("max_print_workers must be at least 1".into()));
    }
    Ok(())
}
