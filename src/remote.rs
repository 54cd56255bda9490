//! Remote access plumbing: wrapping a shell command in an `ssh` (and
//! optionally `sshpass`) invocation, and rsync-based file transfer between
//! the workspace and a remote host.
//!
//! Every wrapped command exists in two renderings. `full` carries the raw
//! credential and is handed only to the spawned process; `redacted` carries
//! `***` in its place and is the only form that may be logged or echoed
//! into a job log.

use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;

use crate::credential::{Credential, REDACTED};

/// File transfer failure, distinct from command-execution failure so
/// callers can record it separately.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{stage} failed: {detail}")]
pub struct SyncFailure {
    pub stage: &'static str,
    pub detail: String,
}

/// A shell command plus its login wrapping.
#[derive(Debug, Clone)]
pub struct LoginCommand {
    /// What actually runs. May contain the raw credential.
    pub full: String,
    /// What may be logged. The credential is replaced by `***`.
    pub redacted: String,
}

impl LoginCommand {
    /// Wrap `inner` for execution on `host`.
    ///
    /// No host means the command runs locally and is returned unchanged
    /// (apart from an `sshpass` prefix when a credential is given, which
    /// covers password-prompting tools like rsync-over-ssh). With a host,
    /// the inner command is double-quoted into `ssh host "..."`.
    pub fn wrap(inner: &str, host: Option<&str>, credential: Option<&Credential>) -> Self {
        let wrapped = match host {
            Some(host) => format!("ssh {} \"{}\"", host, escape_double_quoted(inner)),
            None => inner.to_string(),
        };
        match credential {
            Some(cred) => Self {
                full: format!("sshpass -p '{}' {}", cred.reveal(), wrapped),
                redacted: format!("sshpass -p '{}' {}", REDACTED, wrapped),
            },
            None => Self {
                redacted: wrapped.clone(),
                full: wrapped,
            },
        }
    }
}

/// Escape a command for interpolation between double quotes on the remote
/// side: backslash, double quote, dollar and backtick keep their literal
/// meaning through the local shell.
fn escape_double_quoted(cmd: &str) -> String {
    let mut out = String::with_capacity(cmd.len());
    for c in cmd.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Mirror a job directory to the same absolute path on `host`.
///
/// Ensures the directory exists remotely, then runs an incremental,
/// permission-preserving copy. The remote layout mirrors the local one so
/// rendered commands resolve identically on both sides.
pub async fn push(
    dir: &Path,
    host: &str,
    credential: Option<&Credential>,
) -> Result<(), SyncFailure> {
    let dir = dir.display();
    let mkdir = LoginCommand::wrap(&format!("mkdir -p '{dir}'"), Some(host), credential);
    run_transfer("remote mkdir", &mkdir).await?;

    let rsync = LoginCommand::wrap(&format!("rsync -az '{dir}/' '{host}:{dir}/'"), None, credential);
    run_transfer("rsync push", &rsync).await
}

/// Pull a remote directory back into `local_dir`, excluding the given
/// patterns (typically bulky output data).
pub async fn fetch(
    host: &str,
    remote_dir: &Path,
    local_dir: &Path,
    credential: Option<&Credential>,
    excludes: &[String],
) -> Result<(), SyncFailure> {
    std::fs::create_dir_all(local_dir).map_err(|e| SyncFailure {
        stage: "local mkdir",
        detail: e.to_string(),
    })?;
    let exclude_args: String = excludes
        .iter()
        .map(|pat| format!("--exclude='{pat}' "))
        .collect();
    let cmd = format!(
        "rsync -az {}'{}:{}/' '{}/'",
        exclude_args,
        host,
        remote_dir.display(),
        local_dir.display()
    );
    let rsync = LoginCommand::wrap(&cmd, None, credential);
    run_transfer("rsync fetch", &rsync).await
}

/// Run a transfer command to completion, mapping any failure into
/// [`SyncFailure`]. Only the redacted rendering appears in logs and error
/// details.
async fn run_transfer(stage: &'static str, cmd: &LoginCommand) -> Result<(), SyncFailure> {
    tracing::debug!(command = %cmd.redacted, "Running transfer command");
    let output = Command::new("sh")
        .arg("-c")
        .arg(&cmd.full)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| SyncFailure {
            stage,
            detail: e.to_string(),
        })?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(SyncFailure {
            stage,
            detail: format!("{}: {}", output.status, stderr.trim()),
        })
    }
}
