//! Scoped sysctl changes: reverse-path filtering and ICMP redirects
//! interfere with mesh routing and are turned off for the lifetime of
//! the process, then restored, whichever way the daemon exits.

use std::fs;
use std::path::PathBuf;

const KEYS: [&str; 2] = ["rp_filter", "send_redirects"];

#[derive(Debug, Default)]
pub struct SysctlGuard {
    saved: Vec<(PathBuf, String)>,
}

impl SysctlGuard {
    /// Disable rp_filter and send_redirects globally and for every
    /// mesh interface. Missing paths are skipped with a warning; a mesh
    /// still works without them, just less reliably.
    pub fn apply(interfaces: &[String]) -> SysctlGuard {
        let mut guard = SysctlGuard::default();

        let mut scopes: Vec<String> = vec!["all".to_string()];
        scopes.extend(interfaces.iter().cloned());

        for scope in scopes {
            for key in KEYS {
                let path =
                    PathBuf::from(format!("/proc/sys/net/ipv4/conf/{scope}/{key}"));
                match fs::read_to_string(&path) {
                    Ok(original) => {
                        if let Err(err) = fs::write(&path, "0\n") {
                            tracing::warn!(path = %path.display(), error = %err,
                                "cannot disable sysctl");
                            continue;
                        }
                        guard.saved.push((path, original));
                    }
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err,
                            "cannot read sysctl");
                    }
                }
            }
        }
        guard
    }
}

impl Drop for SysctlGuard {
    fn drop(&mut self) {
        for (path, original) in self.saved.drain(..) {
            if let Err(err) = fs::write(&path, &original) {
                tracing::warn!(path = %path.display(), error = %err,
                    "cannot restore sysctl");
            }
        }
    }
}
