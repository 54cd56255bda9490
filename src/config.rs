use std::str::FromStr;
use std::time::Duration;

use crate::credential::CredentialSource;

/// One remote-shell execution slot: a host plus the device identifier the
/// job binds as its `{device}` parameter (typically a GPU index).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSlot {
    pub host: String,
    pub device: String,
}

impl HostSlot {
    pub fn new(host: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            device: device.into(),
        }
    }

    /// Display name used in dispatch logs and status reports.
    pub fn label(&self) -> String {
        format!("{}[{}]", self.host, self.device)
    }
}

impl FromStr for HostSlot {
    type Err = String;

    /// Parse `host:device`; a bare `host` gets device `0`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, device) = match s.split_once(':') {
            Some((host, device)) => (host, device),
            None => (s, "0"),
        };
        if host.is_empty() {
            return Err(format!("invalid host slot {s:?}: empty host"));
        }
        Ok(Self::new(host, device))
    }
}

/// Which execution backend a scheduler run dispatches onto.
#[derive(Debug, Clone)]
pub enum ResourceKind {
    /// Subprocesses on this machine, `slots` at a time.
    Local { slots: usize },
    /// One slot per `(host, device)` pair, each job running through a
    /// local ssh wrapper process.
    RemoteShell { hosts: Vec<HostSlot>, copy_files: bool },
    /// `qsub`-style submission. The queue owns execution after hand-off;
    /// `queue_header` lines are written into the submission script below
    /// the shebang.
    BatchQueue {
        host: Option<String>,
        queue_header: Vec<String>,
        copy_files: bool,
    },
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Scheduler sleep between loop iterations when nothing can start.
    pub poll_interval_ms: u64,
    /// Minimum spacing between two child status checks on the same job.
    pub status_debounce_ms: u64,
    /// Delay between asking jobs to terminate and force-closing them.
    pub termination_grace_ms: u64,
    pub credential_source: CredentialSource,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            status_debounce_ms: 300,
            termination_grace_ms: 2_000,
            credential_source: CredentialSource::None,
        }
    }
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn status_debounce(&self) -> Duration {
        Duration::from_millis(self.status_debounce_ms)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }
}
