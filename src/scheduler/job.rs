use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Write as _;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};

use crate::credential::Credential;
use crate::error::{DispatchError, Result};
use crate::persist::{self, PersistedStatus};
use crate::remote::{self, LoginCommand};

/// Where a job has been placed. Assigned exactly once, by the `start_*`
/// call that launches it; a second assignment is a contract violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendBinding {
    Local,
    RemoteShell { host: String, device: String },
    BatchQueue { host: Option<String>, script: PathBuf },
}

impl fmt::Display for BackendBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendBinding::Local => write!(f, "local"),
            BackendBinding::RemoteShell { host, device } => write!(f, "ssh {host}[{device}]"),
            BackendBinding::BatchQueue { host: Some(host), .. } => write!(f, "qsub:{host}"),
            BackendBinding::BatchQueue { host: None, .. } => write!(f, "qsub"),
        }
    }
}

/// Why a finished job counts as failed. Success is `finished` with no
/// failure recorded; exit-by-signal is kept separate from a nonzero exit
/// code instead of being folded into a negative number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobFailure {
    /// Process exited with this nonzero code.
    Exit(i32),
    /// Process was killed by this signal.
    Signal(i32),
    /// The process could not be spawned at all.
    Launch(String),
    /// File transfer to the execution host failed before launch.
    Sync(String),
    /// The batch queue rejected the submission.
    Submission(String),
    /// A stale lock file marked a previous run as crashed.
    Locked,
}

impl JobFailure {
    fn from_exit_status(status: ExitStatus) -> Option<Self> {
        if status.success() {
            None
        } else if let Some(code) = status.code() {
            Some(JobFailure::Exit(code))
        } else {
            Some(JobFailure::Signal(status.signal().unwrap_or(0)))
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobFailure::Exit(code) => write!(f, "exit code {code}"),
            JobFailure::Signal(sig) => write!(f, "signal {sig}"),
            JobFailure::Launch(e) => write!(f, "launch: {e}"),
            JobFailure::Sync(e) => write!(f, "sync: {e}"),
            JobFailure::Submission(e) => write!(f, "submission: {e}"),
            JobFailure::Locked => write!(f, "locked"),
        }
    }
}

/// Ordered shell fragments with `{key}` placeholder substitution.
///
/// Rendering happens just in time, at start, so parameters bound late
/// (like the device of the slot a job lands on) are picked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate(Vec<String>);

impl CommandTemplate {
    pub fn new(fragments: Vec<String>) -> Self {
        Self(fragments)
    }

    /// Substitute `{key}` placeholders in every fragment. Unknown keys
    /// render as empty strings.
    pub fn render(&self, params: &BTreeMap<String, String>) -> Vec<String> {
        self.0.iter().map(|frag| substitute(frag, params)).collect()
    }
}

fn substitute(fragment: &str, params: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut rest = fragment;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        match rest[open + 1..].find('}') {
            Some(close) => {
                let key = &rest[open + 1..open + 1 + close];
                if let Some(value) = params.get(key) {
                    out.push_str(value);
                }
                rest = &rest[open + close + 2..];
            }
            None => {
                // Unbalanced brace, keep it literal.
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Manifest entry describing one job to dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Which command template this job instantiates; also keys the job's
    /// log, status, and lock file names.
    pub name: String,
    /// Directory owned by the job, relative to the workspace base.
    pub location: PathBuf,
    /// Shell fragments joined with ` && ` after a `cd` into the base.
    pub template: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// One dispatchable shell job and everything needed to babysit it:
/// its rendered command, the child process handle, the log sink, and the
/// on-disk status/lock mirror.
///
/// Lifecycle is `unstarted -> running -> finished`, with failures captured
/// into the job rather than thrown: a job that could not launch, sync, or
/// submit is simply finished-and-failed, and the dispatch loop treats it
/// like any other finished job.
pub struct Job {
    pub name: String,
    /// Human-readable identity, derived from the job's location relative
    /// to the workspace base.
    pub id: String,
    base_dir: PathBuf,
    location: PathBuf,
    template: CommandTemplate,
    params: BTreeMap<String, String>,
    binding: Option<BackendBinding>,
    slot_label: Option<String>,
    child: Option<Child>,
    pgid: Option<i32>,
    log: Option<File>,
    submission_id: Option<String>,
    started: bool,
    finished: bool,
    failure: Option<JobFailure>,
    resume: bool,
    last_poll: Option<Instant>,
    debounce: Duration,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("binding", &self.binding)
            .field("started", &self.started)
            .field("finished", &self.finished)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

impl Job {
    pub fn new(spec: JobSpec, base_dir: &Path, debounce: Duration) -> Self {
        let location = base_dir.join(&spec.location);
        let id = if spec.location.as_os_str().is_empty() {
            spec.name.clone()
        } else {
            spec.location.display().to_string()
        };
        let mut params = spec.params;
        params.insert("location".to_string(), location.display().to_string());
        Self {
            name: spec.name,
            id,
            base_dir: base_dir.to_path_buf(),
            location,
            template: CommandTemplate::new(spec.template),
            params,
            binding: None,
            slot_label: None,
            child: None,
            pgid: None,
            log: None,
            submission_id: None,
            started: false,
            finished: false,
            failure: None,
            resume: false,
            last_poll: None,
            debounce,
        }
    }

    /// Reconstruct a job from whatever status and lock files a previous
    /// run left at its location.
    ///
    /// A lock file wins over everything: it means the previous run died
    /// while the job was running, so the job loads as finished-and-failed
    /// (`locked`) until someone cleans up. A status file recording
    /// started-but-not-finished, with no lock, marks a resume candidate:
    /// the job is dispatchable again and preferred over never-started
    /// work.
    pub fn load(spec: JobSpec, base_dir: &Path, debounce: Duration) -> Result<Self> {
        let mut job = Self::new(spec, base_dir, debounce);
        let status = persist::read_status(&job.status_path())?;
        if job.lock_path().exists() {
            job.started = true;
            job.finished = true;
            job.failure = Some(JobFailure::Locked);
            if let Some(status) = status {
                job.binding = status.binding;
                job.slot_label = status.slot_label;
            }
            tracing::warn!(job = %job.id, "Lock file present, loading as crashed");
        } else if let Some(status) = status {
            if status.finished {
                job.started = true;
                job.finished = true;
                job.failure = status.failure;
                job.binding = status.binding;
                job.slot_label = status.slot_label;
            } else if status.started {
                job.resume = true;
            }
        }
        Ok(job)
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn binding(&self) -> Option<&BackendBinding> {
        self.binding.as_ref()
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        self.failure.as_ref()
    }

    pub fn submission_id(&self) -> Option<&str> {
        self.submission_id.as_deref()
    }

    /// Previously started but never finished, and not yet re-dispatched.
    pub fn is_resume_candidate(&self) -> bool {
        self.resume && !self.started && !self.finished
    }

    /// Raw flag, without a status refresh. Selection and report paths use
    /// these after the loop has already polled.
    pub fn has_started(&self) -> bool {
        self.started
    }

    pub fn has_finished(&self) -> bool {
        self.finished
    }

    fn slot_label(&self) -> &str {
        self.slot_label.as_deref().unwrap_or("unscheduled")
    }

    /// `name id (slot)`, used in log lines and the job log header.
    pub fn summary(&self) -> String {
        format!("{} {} ({})", self.name, self.id, self.slot_label())
    }

    /// Render the full shell line: enter the workspace base, then each
    /// template fragment, joined with ` && `.
    pub fn render_command(&self) -> String {
        let mut parts = vec![format!("cd {}", self.base_dir.display())];
        parts.extend(self.template.render(&self.params));
        parts.join(" && ")
    }

    /// Launch the job as a local subprocess in its own process group.
    ///
    /// Returns `ResourceConflict` if the job is already bound and
    /// `LockConflict` if its lock file exists; a spawn failure is captured
    /// into the job state instead.
    pub fn start_local(&mut self) -> Result<()> {
        self.ensure_unbound()?;
        persist::acquire_lock(&self.lock_path())?;
        let filename = format!("{}_local_{}.log", self.name, log_stamp());
        if let Err(e) = self.open_log(&filename) {
            persist::release_lock(&self.lock_path());
            return Err(e);
        }
        self.binding = Some(BackendBinding::Local);
        self.slot_label = Some("local".to_string());
        self.started = true;
        self.log_line(&format!("Start job {}", self.summary()));

        let inner = self.render_command();
        let cmd = LoginCommand {
            redacted: inner.clone(),
            full: inner,
        };
        self.launch(&cmd);
        if self.finished {
            persist::release_lock(&self.lock_path());
            self.log = None;
        }
        self.persist_status();
        self.poll_status();
        Ok(())
    }

    /// Launch the job on a remote host through a local ssh wrapper.
    ///
    /// The slot's `device` is bound into the parameter map before
    /// rendering. With `copy_files`, the job directory is mirrored to the
    /// host first; a transfer failure finishes the job as failed without
    /// launching anything.
    pub async fn start_remote_shell(
        &mut self,
        host: &str,
        device: &str,
        copy_files: bool,
        credential: Option<&Credential>,
    ) -> Result<()> {
        self.ensure_unbound()?;
        persist::acquire_lock(&self.lock_path())?;
        let filename = format!("{}_ssh_{}_{}_{}.log", self.name, host, device, log_stamp());
        if let Err(e) = self.open_log(&filename) {
            persist::release_lock(&self.lock_path());
            return Err(e);
        }
        self.params.insert("device".to_string(), device.to_string());
        self.binding = Some(BackendBinding::RemoteShell {
            host: host.to_string(),
            device: device.to_string(),
        });
        self.slot_label = Some(format!("{host}[{device}]"));
        self.started = true;
        self.log_line(&format!("Start job {}", self.summary()));

        if copy_files {
            if let Err(e) = remote::push(&self.location, host, credential).await {
                self.log_line(&format!("File sync failed: {e}"));
                tracing::error!(job = %self.id, error = %e, "File sync failed");
                self.finished = true;
                self.failure = Some(JobFailure::Sync(e.to_string()));
                persist::release_lock(&self.lock_path());
                self.log = None;
                self.persist_status();
                return Ok(());
            }
        }

        let inner = self.render_command();
        let cmd = LoginCommand::wrap(&inner, Some(host), credential);
        self.launch(&cmd);
        if self.finished {
            persist::release_lock(&self.lock_path());
            self.log = None;
        }
        self.persist_status();
        self.poll_status();
        Ok(())
    }

    /// Hand the job to a `qsub`-style batch queue and forget about it.
    ///
    /// Writes an executable submission script (shebang, queue header
    /// lines, rendered command) into the job directory and submits it
    /// synchronously, through the login wrapper when a host is
    /// configured. The queue owns execution afterwards, so the job is
    /// finished at submission and never occupies a slot or gets polled.
    /// No lock file is taken: nothing stays resident to crash.
    pub async fn start_batch_queue(
        &mut self,
        host: Option<&str>,
        queue_header: &[String],
        copy_files: bool,
        credential: Option<&Credential>,
    ) -> Result<()> {
        self.ensure_unbound()?;
        let script = self.location.join(format!("{}.sub", self.name));
        let mut body = String::from("#!/bin/bash\n");
        for line in queue_header {
            body.push_str(line);
            body.push('\n');
        }
        body.push_str(&self.render_command());
        body.push('\n');
        std::fs::write(&script, body)?;
        let mut perms = std::fs::metadata(&script)?.permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&script, perms)?;

        self.binding = Some(BackendBinding::BatchQueue {
            host: host.map(String::from),
            script: script.clone(),
        });
        self.slot_label = Some(match host {
            Some(host) => format!("qsub:{host}"),
            None => "qsub".to_string(),
        });
        self.started = true;

        if copy_files {
            if let Some(host) = host {
                if let Err(e) = remote::push(&self.location, host, credential).await {
                    tracing::error!(job = %self.id, error = %e, "File sync failed");
                    self.finished = true;
                    self.failure = Some(JobFailure::Sync(e.to_string()));
                    self.persist_status();
                    return Ok(());
                }
            }
        }

        let submit = LoginCommand::wrap(&format!("qsub '{}'", script.display()), host, credential);
        tracing::info!(job = %self.id, command = %submit.redacted, "Submitting job");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&submit.full)
            .stdin(Stdio::null())
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let id = stdout.lines().next().unwrap_or("").trim().to_string();
                tracing::info!(job = %self.id, submission_id = %id, "Job submitted");
                self.submission_id = Some(id);
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let detail = format!("{}: {}", output.status, stderr.trim());
                tracing::error!(job = %self.id, error = %detail, "Submission failed");
                self.failure = Some(JobFailure::Submission(detail));
            }
            Err(e) => {
                tracing::error!(job = %self.id, error = %e, "Submission failed");
                self.failure = Some(JobFailure::Submission(e.to_string()));
            }
        }
        self.finished = true;
        self.persist_status();
        Ok(())
    }

    /// Spawn `sh -c` on the full command with stdout and stderr going to
    /// the job log, in a fresh process group so signals reach the whole
    /// pipeline. A failure to spawn finishes the job as `Launch` failed.
    fn launch(&mut self, cmd: &LoginCommand) {
        self.log_line(&format!("Full shell command:\n{}\n=============", cmd.redacted));
        let stdio = self.log.as_ref().and_then(|log| {
            let out = log.try_clone().ok()?;
            let err = log.try_clone().ok()?;
            Some((out, err))
        });
        let Some((out, err)) = stdio else {
            self.finished = true;
            self.failure = Some(JobFailure::Launch("cannot clone log handle".to_string()));
            return;
        };
        let spawned = Command::new("sh")
            .arg("-c")
            .arg(&cmd.full)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .process_group(0)
            .spawn();
        match spawned {
            Ok(child) => {
                self.pgid = child.id().map(|pid| pid as i32);
                tracing::info!(job = %self.id, slot = %self.slot_label(), pgid = ?self.pgid, "Job launched");
                self.child = Some(child);
            }
            Err(e) => {
                self.log_line(&format!("Exception in subprocess launch of {}: {e}", self.summary()));
                tracing::error!(job = %self.id, error = %e, "Job launch failed");
                self.finished = true;
                self.failure = Some(JobFailure::Launch(e.to_string()));
            }
        }
    }

    /// Refresh the job's view of its child process, at most once per
    /// debounce interval. A no-op for unstarted and finished jobs.
    pub fn poll_status(&mut self) {
        if !self.started || self.finished {
            return;
        }
        if let Some(last) = self.last_poll {
            if last.elapsed() < self.debounce {
                return;
            }
        }
        if matches!(self.binding, Some(BackendBinding::BatchQueue { .. })) {
            // Submission marks the job finished, so this is unreachable
            // unless state got corrupted.
            tracing::error!(job = %self.id, "Status poll on a batch-queue job");
            return;
        }
        self.check_child();
        self.last_poll = Some(Instant::now());
    }

    /// Undebounced child check; records the exit if the process is gone.
    fn check_child(&mut self) {
        let status = match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(job = %self.id, error = %e, "Failed to check child status");
                    None
                }
            },
            None => None,
        };
        if let Some(status) = status {
            self.finish_with(status);
        }
    }

    fn finish_with(&mut self, status: ExitStatus) {
        self.finished = true;
        self.failure = JobFailure::from_exit_status(status);
        self.child = None;
        self.log = None;
        persist::release_lock(&self.lock_path());
        match &self.failure {
            Some(failure) => {
                tracing::info!(job = %self.id, slot = %self.slot_label(), failure = %failure, "Job failed")
            }
            None => tracing::info!(job = %self.id, slot = %self.slot_label(), "Job finished"),
        }
        self.persist_status();
    }

    pub fn is_started(&mut self) -> bool {
        self.poll_status();
        self.started
    }

    pub fn is_finished(&mut self) -> bool {
        self.poll_status();
        self.finished
    }

    pub fn is_failed(&mut self) -> bool {
        self.poll_status();
        self.failure.is_some()
    }

    pub fn is_running(&mut self) -> bool {
        self.poll_status();
        self.started && !self.finished
    }

    /// Ask a running job to wind down by sending SIGINT to its process
    /// group, giving the workload a chance to checkpoint. A no-op for
    /// unstarted and finished jobs.
    ///
    /// Known limitation for remote-shell jobs: the signal reaches the
    /// local ssh wrapper, which does not guarantee the remote process
    /// dies with it.
    pub fn request_termination(&mut self) -> Result<()> {
        if self.started && !self.finished {
            self.check_child();
        }
        if !self.started || self.finished {
            return Ok(());
        }
        match &self.binding {
            Some(BackendBinding::Local) | Some(BackendBinding::RemoteShell { .. }) => {
                if let Some(pgid) = self.pgid {
                    tracing::info!(
                        job = %self.id,
                        slot = %self.slot_label(),
                        pgid,
                        "Sending SIGINT to process group"
                    );
                    signal_process_group(pgid, Signal::SIGINT);
                }
                Ok(())
            }
            Some(BackendBinding::BatchQueue { .. }) => Err(DispatchError::UnsupportedOperation(
                "cannot terminate a batch-queue submission".to_string(),
            )),
            None => Ok(()),
        }
    }

    /// Explicitly dispose of the job. A still-running child gets SIGKILL
    /// on its process group; the lock is released and the on-disk status
    /// records started-but-not-finished, which the next run picks up as a
    /// resume candidate. Idempotent, and safe on finished jobs.
    pub fn close(&mut self) {
        if self.started && !self.finished {
            self.check_child();
        }
        if self.started && !self.finished && self.child.is_some() {
            if let Some(pgid) = self.pgid {
                tracing::info!(
                    job = %self.id,
                    slot = %self.slot_label(),
                    pgid,
                    "Sending SIGKILL to process group"
                );
                signal_process_group(pgid, Signal::SIGKILL);
            }
            if let Some(child) = self.child.as_mut() {
                let _ = child.start_kill();
                let _ = child.try_wait();
            }
            self.child = None;
            persist::release_lock(&self.lock_path());
            self.persist_status();
        }
        self.log = None;
    }

    /// One status report line: `name id (slot): STATE`.
    pub fn status_line(&self) -> String {
        let mut msg = format!("{} {} ({}): ", self.name, self.id, self.slot_label());
        if self.started {
            if let Some(failure) = &self.failure {
                msg.push_str(&format!("FAILED: {failure}"));
            } else if self.finished {
                msg.push_str("FINISHED");
            } else {
                msg.push_str("RUNNING");
            }
        } else if self.resume {
            msg.push_str("TO BE RESUMED");
        } else {
            msg.push_str("NOT STARTED");
        }
        msg
    }

    fn ensure_unbound(&self) -> Result<()> {
        match &self.binding {
            Some(binding) => Err(DispatchError::ResourceConflict {
                job: self.id.clone(),
                binding: binding.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn lock_path(&self) -> PathBuf {
        persist::lock_path(&self.location, &self.name)
    }

    fn status_path(&self) -> PathBuf {
        persist::status_path(&self.location, &self.name)
    }

    fn open_log(&mut self, filename: &str) -> Result<()> {
        let file = File::create(self.location.join(filename))?;
        self.log = Some(file);
        Ok(())
    }

    /// Write a line into the job log and flush it, so header lines land
    /// before the child starts appending.
    fn log_line(&mut self, text: &str) {
        if let Some(log) = self.log.as_mut() {
            let _ = writeln!(log, "{text}");
            let _ = log.flush();
        }
    }

    fn persist_status(&self) {
        let status = PersistedStatus {
            started: self.started,
            finished: self.finished,
            failure: self.failure.clone(),
            binding: self.binding.clone(),
            slot_label: self.slot_label.clone(),
            updated_at: chrono::Utc::now(),
        };
        if let Err(e) = persist::write_status(&self.status_path(), &status) {
            tracing::warn!(job = %self.id, error = %e, "Failed to write status file");
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        // Backstop only; orderly paths go through close().
        if self.started && !self.finished && self.child.is_some() {
            if let Some(pgid) = self.pgid {
                signal_process_group(pgid, Signal::SIGKILL);
            }
            persist::release_lock(&self.lock_path());
        }
    }
}

/// Signal a whole process group, ignoring ESRCH (the group died since the
/// last status check, which is fine).
fn signal_process_group(pgid: i32, sig: Signal) {
    if let Err(e) = signal::killpg(Pid::from_raw(pgid), sig) {
        if e != nix::errno::Errno::ESRCH {
            tracing::warn!(pgid, signal = %sig, error = %e, "Failed to signal process group");
        }
    }
}

fn log_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn template_substitutes_known_keys() {
        let tmpl = CommandTemplate::new(vec!["th main.lua -gpu {device} -conf {conf}".into()]);
        let rendered = tmpl.render(&params(&[("device", "2"), ("conf", "a.cfg")]));
        assert_eq!(rendered, vec!["th main.lua -gpu 2 -conf a.cfg"]);
    }

    #[test]
    fn template_renders_unknown_keys_empty() {
        let tmpl = CommandTemplate::new(vec!["run {missing} now".into()]);
        assert_eq!(tmpl.render(&params(&[])), vec!["run  now"]);
    }

    #[test]
    fn template_keeps_unbalanced_brace_literal() {
        let tmpl = CommandTemplate::new(vec!["echo {oops".into()]);
        assert_eq!(tmpl.render(&params(&[])), vec!["echo {oops"]);
    }

    #[test]
    fn render_command_prefixes_cd_into_base() {
        let spec = JobSpec {
            name: "train".into(),
            location: "exp01/sub00".into(),
            template: vec!["./run.sh {device}".into(), "echo done".into()],
            params: params(&[("device", "1")]),
        };
        let job = Job::new(spec, Path::new("/work"), Duration::from_millis(300));
        assert_eq!(
            job.render_command(),
            "cd /work && ./run.sh 1 && echo done"
        );
    }

    #[test]
    fn location_param_is_injected() {
        let spec = JobSpec {
            name: "train".into(),
            location: "exp01".into(),
            template: vec!["ls {location}".into()],
            params: BTreeMap::new(),
        };
        let job = Job::new(spec, Path::new("/work"), Duration::from_millis(300));
        assert_eq!(job.render_command(), "cd /work && ls /work/exp01");
    }

    #[test]
    fn job_id_falls_back_to_name_for_empty_location() {
        let spec = JobSpec {
            name: "train".into(),
            location: PathBuf::new(),
            template: vec![],
            params: BTreeMap::new(),
        };
        let job = Job::new(spec, Path::new("/work"), Duration::from_millis(300));
        assert_eq!(job.id, "train");
    }

    #[test]
    fn status_line_for_fresh_job() {
        let spec = JobSpec {
            name: "train".into(),
            location: "exp01".into(),
            template: vec![],
            params: BTreeMap::new(),
        };
        let job = Job::new(spec, Path::new("/work"), Duration::from_millis(300));
        assert_eq!(job.status_line(), "train exp01 (unscheduled): NOT STARTED");
    }

    #[test]
    fn failed_launch_finishes_the_job() {
        let spec = JobSpec {
            name: "train".into(),
            location: "exp01".into(),
            template: vec!["true".into()],
            params: BTreeMap::new(),
        };
        let mut job = Job::new(spec, Path::new("/work"), Duration::from_millis(300));
        job.started = true;
        // No log sink open, so launch bails before spawning anything.
        let cmd = LoginCommand {
            full: "true".into(),
            redacted: "true".into(),
        };
        job.launch(&cmd);
        assert!(job.started);
        assert!(job.finished);
        assert!(matches!(job.failure, Some(JobFailure::Launch(_))));
        assert!(job.child.is_none());
    }

    #[test]
    fn failure_display() {
        assert_eq!(JobFailure::Exit(2).to_string(), "exit code 2");
        assert_eq!(JobFailure::Signal(9).to_string(), "signal 9");
        assert_eq!(JobFailure::Locked.to_string(), "locked");
    }

    #[test]
    fn binding_display() {
        assert_eq!(BackendBinding::Local.to_string(), "local");
        assert_eq!(
            BackendBinding::RemoteShell {
                host: "gpu01".into(),
                device: "2".into()
            }
            .to_string(),
            "ssh gpu01[2]"
        );
        assert_eq!(
            BackendBinding::BatchQueue {
                host: Some("hpc".into()),
                script: "/w/train.sub".into()
            }
            .to_string(),
            "qsub:hpc"
        );
    }
}
