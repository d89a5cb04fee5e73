//! Station identity: persisted pseudo-MAC token, hostname and outbound IP.
//!
//! The token is a random 48-bit number stored in decimal in `uid_file` and
//! presented to the API as a colon-delimited MAC-style string.  It survives
//! restarts as long as the file does.

use std::fs;
use std::path::Path;

use log::{info, warn};
use rand::Rng;
use serde::Serialize;

use crate::config::AgentConfig;
use crate::util::{self, UNKNOWN};

const TOKEN_MAX: u64 = (1 << 48) - 1;

/// Identity sent with every registration attempt.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StationIdentity {
    pub mac_address: String,
    pub hostname:    String,
    pub ip:          String,
}

impl StationIdentity {
    /// Token from `cfg.uid_file`, hostname and IP resolved fresh.
    pub fn resolve(cfg: &AgentConfig) -> Self {
        Self {
            mac_address: station_token(&cfg.uid_file),
            hostname:    hostname(),
            ip:          util::external_ip(),
        }
    }
}

/// Return the persisted station token, generating and storing a new one if
/// `path` is missing or does not hold a valid 48-bit number.
pub fn station_token(path: &Path) -> String {
    let uid = match read_token(path) {
        Some(uid) => uid,
        None => {
            info!("UID file not found at {}; generating a new one", path.display());
            let uid = rand::thread_rng().gen_range(0..=TOKEN_MAX);
            if let Err(e) = fs::write(path, uid.to_string()) {
                warn!("cannot persist UID to {}: {e}", path.display());
            }
            uid
        }
    };
    format_token(uid)
}

fn read_token(path: &Path) -> Option<u64> {
    let raw = fs::read_to_string(path).ok()?;
    raw.trim().parse::<u64>().ok().filter(|uid| *uid <= TOKEN_MAX)
}

/// `0xa1b2c3d4e5f6` → `"a1:b2:c3:d4:e5:f6"`
pub fn format_token(uid: u64) -> String {
    uid.to_be_bytes()[2..]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// OS hostname, or [`UNKNOWN`] if it cannot be read.
pub fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}
