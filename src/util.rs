//! Miscellaneous utilities: outbound IP detection, PID file.

use std::fs;
use std::io::{self, Write};
use std::net::{IpAddr, UdpSocket};
use std::path::Path;

use log::warn;

/// Placeholder reported when a host property cannot be determined.
pub const UNKNOWN: &str = "<UNKNOWN>";

// ── IP address ────────────────────────────────────────────────────────────────

/// Detect the station's outward-facing IP address by making a dummy UDP
/// connection (no packets actually sent).  Falls back to [`UNKNOWN`].
pub fn external_ip() -> String {
    local_ip_towards("8.8.8.8:80")
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| UNKNOWN.to_string())
}

fn local_ip_towards(target: &str) -> io::Result<IpAddr> {
    let sock = UdpSocket::bind("0.0.0.0:0")?;
    sock.connect(target)?;
    Ok(sock.local_addr()?.ip())
}

// ── PID file ──────────────────────────────────────────────────────────────────

/// Write the current process PID to `path`.
pub fn write_pid_file(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = fs::File::create(path)?;
    writeln!(f, "{}", std::process::id())?;
    Ok(())
}

/// Remove the PID file (best-effort, logs a warning on failure).
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("failed to remove PID file {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_target_reports_loopback() {
        let ip = local_ip_towards("127.0.0.1:9").unwrap();
        assert!(ip.is_loopback(), "ip={ip}");
    }

    #[test]
    fn external_ip_never_empty() {
        let ip = external_ip();
        assert!(ip == UNKNOWN || ip.parse::<IpAddr>().is_ok(), "ip={ip}");
    }

    #[test]
    fn pid_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/print-agent.pid");
        write_pid_file(&path).unwrap();
        let pid: u32 = fs::read_to_string(&path).unwrap().trim().parse().unwrap();
        assert_eq!(pid, std::process::id());
        remove_pid_file(&path);
        assert!(!path.exists());
    }
}
