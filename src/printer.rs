//! Local printing subsystem.
//!
//! [`PrintBackend`] is the seam between the agent and the OS spooler.  The
//! production implementation, [`CupsCli`], drives the CUPS command-line
//! tools:
//!
//!   lpstat -e              — configured destinations, one per line
//!   lpoptions -p <name>    — destination attributes as `key=value` tokens
//!   cupsenable <name>      — enable/resume a destination
//!   lp -d <name> ...       — submit a file

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::process::Command;

use crate::error::{AgentError, Result};

/// Attributes of one printer, as reported by the spooler.
pub type PrinterAttributes = BTreeMap<String, Value>;

/// Printer name → attributes.
pub type PrinterInventory = BTreeMap<String, PrinterAttributes>;

/// Spooler options for one submission; `copies` is always present.
pub type PrintOptions = BTreeMap<String, String>;

#[async_trait]
pub trait PrintBackend: Send + Sync {
    /// Enumerate configured printers.
    async fn list_printers(&self) -> Result<PrinterInventory>;

    /// Enable and resume `printer` so a paused queue accepts the job.
    async fn enable_printer(&self, printer: &str) -> Result<()>;

    /// Submit `path` to `printer`; returns the spooler's job id.
    async fn print_file(
        &self,
        printer: &str,
        path:    &Path,
        title:   &str,
        options: &PrintOptions,
    ) -> Result<String>;
}

// ── CUPS command-line binding ─────────────────────────────────────────────────

/// [`PrintBackend`] backed by the CUPS client utilities.
#[derive(Debug, Clone, Default)]
pub struct CupsCli;

impl CupsCli {
    pub fn new() -> Self {
        Self
    }
}

/// Run `program args...`; stdout on success, stderr folded into the error.
async fn run_tool(program: &str, args: &[&str]) -> Result<String> {
    debug!("exec {program} {}", args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| AgentError::Spooler(format!("cannot run {program}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AgentError::Spooler(format!(
            "{program} failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[async_trait]
impl PrintBackend for CupsCli {
    async fn list_printers(&self) -> Result<PrinterInventory> {
        let names = run_tool("lpstat", &["-e"]).await?;
        let mut inventory = PrinterInventory::new();
        for name in names.lines().map(str::trim).filter(|n| !n.is_empty()) {
            let attrs = match run_tool("lpoptions", &["-p", name]).await {
                Ok(out) => parse_lpoptions(&out),
                Err(e) => {
                    warn!("cannot read attributes of printer {name}: {e}");
                    PrinterAttributes::new()
                }
            };
            inventory.insert(name.to_string(), attrs);
        }
        Ok(inventory)
    }

    async fn enable_printer(&self, printer: &str) -> Result<()> {
        run_tool("cupsenable", &[printer]).await.map(|_| ())
    }

    async fn print_file(
        &self,
        printer: &str,
        path:    &Path,
        title:   &str,
        options: &PrintOptions,
    ) -> Result<String> {
        let path = path
            .to_str()
            .ok_or_else(|| AgentError::Spooler(format!("non UTF-8 path {}", path.display())))?;
        let args = lp_args(printer, path, title, options);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = run_tool("lp", &args).await?;
        let request_id = parse_request_id(&out).unwrap_or_default();
        info!("spooler accepted {title} on {printer}: {}", out.trim());
        Ok(request_id)
    }
}

/// Build the `lp` argument list.  `copies` maps to `-n`, every other option
/// to `-o key=value`.
fn lp_args(printer: &str, path: &str, title: &str, options: &PrintOptions) -> Vec<String> {
    let mut args = vec![
        "-d".to_string(), printer.to_string(),
        "-t".to_string(), title.to_string(),
    ];
    for (key, val) in options {
        if key == "copies" {
            args.push("-n".into());
            args.push(val.clone());
        } else {
            args.push("-o".into());
            args.push(format!("{key}={val}"));
        }
    }
    args.push("--".into());
    args.push(path.to_string());
    args
}

/// `"request id is HP1-17 (1 file(s))"` → `"HP1-17"`
fn parse_request_id(out: &str) -> Option<String> {
    let rest = out.trim().strip_prefix("request id is ")?;
    rest.split_whitespace().next().map(String::from)
}

/// Parse `lpoptions -p` output.
///
/// Tokens are whitespace separated `key=value` pairs; values may be single
/// or double quoted and may contain backslash escapes.  A bare key carries an
/// empty value.  Integer and boolean values are typed accordingly.
pub fn parse_lpoptions(out: &str) -> PrinterAttributes {
    let mut attrs = PrinterAttributes::new();
    let mut chars = out.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| !c.is_whitespace() && *c != '=') {
            key.push(c);
        }

        let mut val = String::new();
        if chars.next_if_eq(&'=').is_some() {
            let mut quote: Option<char> = None;
            while let Some(&c) = chars.peek() {
                match (quote, c) {
                    (None, c) if c.is_whitespace() => break,
                    (None, '\'' | '"') => quote = Some(c),
                    (Some(q), c) if c == q => quote = None,
                    (_, '\\') => {
                        chars.next();
                        if let Some(escaped) = chars.peek().copied() {
                            val.push(escaped);
                        }
                    }
                    _ => val.push(c),
                }
                chars.next();
            }
        }

        if !key.is_empty() {
            attrs.insert(key, typed_value(val));
        }
    }
    attrs
}

fn typed_value(val: String) -> Value {
    if let Ok(n) = val.parse::<i64>() {
        return Value::from(n);
    }
    match val.as_str() {
        "true"  => Value::Bool(true),
        "false" => Value::Bool(false),
        _       => Value::String(val),
    }
}

/// Log the inventory: a summary line plus one aligned debug line per
/// attribute.
pub fn log_inventory(inventory: &PrinterInventory) {
    let names: Vec<&str> = inventory.keys().map(String::as_str).collect();
    info!(
        "printers {} found: {}",
        names.len(),
        if names.is_empty() { "...".to_string() } else { names.join(", ") }
    );
    for (name, attrs) in inventory {
        let width = attrs.keys().map(String::len).max().unwrap_or(0);
        debug!("\t- {name}:");
        for (key, val) in attrs {
            debug!("\t\t{key:width$}: {val}");
        }
    }
}
