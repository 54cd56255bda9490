use async_trait::async_trait;

use crate::config::{HostSlot, ResourceKind};
use crate::credential::Credential;
use crate::error::Result;
use crate::scheduler::job::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    RemoteShell,
    BatchQueue,
}

/// Execution strategy consulted by the scheduler loop: how many slots
/// exist, what to call them, and how to start a job on one of them.
///
/// One scheduler drives any backend; the loop itself never branches on
/// the backend kind.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn slot_count(&self) -> usize;

    /// Display name for dispatch log lines, e.g. `local` or `gpu01[2]`.
    fn describe_slot(&self, slot: usize) -> String;

    /// Whether a run on this backend stays resident and should hold the
    /// workspace lock. Batch submission does not: nothing is left running
    /// once the jobs are handed off.
    fn holds_workspace_lock(&self) -> bool {
        self.kind() != BackendKind::BatchQueue
    }

    /// Start `job` on `slot`. Launch, sync, and submission failures are
    /// captured into the job; only contract violations and local I/O
    /// problems come back as errors.
    async fn start_job(&self, job: &mut Job, slot: usize) -> Result<()>;
}

/// Subprocesses on this machine, `slots` at a time.
pub struct LocalBackend {
    slots: usize,
}

impl LocalBackend {
    pub fn new(slots: usize) -> Self {
        Self { slots }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn slot_count(&self) -> usize {
        self.slots
    }

    fn describe_slot(&self, slot: usize) -> String {
        if self.slots == 1 {
            "local".to_string()
        } else {
            format!("local[{slot}]")
        }
    }

    async fn start_job(&self, job: &mut Job, _slot: usize) -> Result<()> {
        job.start_local()
    }
}

/// One slot per `(host, device)` pair, each job running through a local
/// ssh wrapper process.
pub struct RemoteShellBackend {
    hosts: Vec<HostSlot>,
    copy_files: bool,
    credential: Option<Credential>,
}

impl RemoteShellBackend {
    pub fn new(hosts: Vec<HostSlot>, copy_files: bool, credential: Option<Credential>) -> Self {
        Self {
            hosts,
            copy_files,
            credential,
        }
    }
}

#[async_trait]
impl Backend for RemoteShellBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteShell
    }

    fn slot_count(&self) -> usize {
        self.hosts.len()
    }

    fn describe_slot(&self, slot: usize) -> String {
        self.hosts[slot].label()
    }

    async fn start_job(&self, job: &mut Job, slot: usize) -> Result<()> {
        let host = &self.hosts[slot];
        job.start_remote_shell(
            &host.host,
            &host.device,
            self.copy_files,
            self.credential.as_ref(),
        )
        .await
    }
}

/// `qsub`-style hand-off. Submitted jobs finish immediately from the
/// dispatcher's point of view, so a single slot never fills up.
pub struct BatchQueueBackend {
    host: Option<String>,
    queue_header: Vec<String>,
    copy_files: bool,
    credential: Option<Credential>,
}

impl BatchQueueBackend {
    pub fn new(
        host: Option<String>,
        queue_header: Vec<String>,
        copy_files: bool,
        credential: Option<Credential>,
    ) -> Self {
        Self {
            host,
            queue_header,
            copy_files,
            credential,
        }
    }
}

#[async_trait]
impl Backend for BatchQueueBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::BatchQueue
    }

    fn slot_count(&self) -> usize {
        1
    }

    fn describe_slot(&self, _slot: usize) -> String {
        match &self.host {
            Some(host) => format!("qsub:{host}"),
            None => "qsub".to_string(),
        }
    }

    async fn start_job(&self, job: &mut Job, _slot: usize) -> Result<()> {
        job.start_batch_queue(
            self.host.as_deref(),
            &self.queue_header,
            self.copy_files,
            self.credential.as_ref(),
        )
        .await
    }
}

/// Build the backend for a configured resource.
pub fn from_resource(kind: ResourceKind, credential: Option<Credential>) -> Box<dyn Backend> {
    match kind {
        ResourceKind::Local { slots } => Box::new(LocalBackend::new(slots)),
        ResourceKind::RemoteShell { hosts, copy_files } => {
            Box::new(RemoteShellBackend::new(hosts, copy_files, credential))
        }
        ResourceKind::BatchQueue {
            host,
            queue_header,
            copy_files,
        } => Box::new(BatchQueueBackend::new(host, queue_header, copy_files, credential)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_backend_slots_and_labels() {
        let one = LocalBackend::new(1);
        assert_eq!(one.slot_count(), 1);
        assert_eq!(one.describe_slot(0), "local");
        assert!(one.holds_workspace_lock());

        let four = LocalBackend::new(4);
        assert_eq!(four.describe_slot(2), "local[2]");
    }

    #[test]
    fn remote_backend_one_slot_per_host_entry() {
        let backend = RemoteShellBackend::new(
            vec![HostSlot::new("gpu01", "0"), HostSlot::new("gpu01", "1")],
            false,
            None,
        );
        assert_eq!(backend.slot_count(), 2);
        assert_eq!(backend.describe_slot(1), "gpu01[1]");
        assert!(backend.holds_workspace_lock());
    }

    #[test]
    fn batch_backend_takes_no_workspace_lock() {
        let backend = BatchQueueBackend::new(Some("hpc".into()), vec![], false, None);
        assert_eq!(backend.slot_count(), 1);
        assert_eq!(backend.describe_slot(0), "qsub:hpc");
        assert!(!backend.holds_workspace_lock());
    }

    #[test]
    fn from_resource_picks_matching_backend() {
        let local = from_resource(ResourceKind::Local { slots: 2 }, None);
        assert_eq!(local.kind(), BackendKind::Local);

        let remote = from_resource(
            ResourceKind::RemoteShell {
                hosts: vec![HostSlot::new("a", "0")],
                copy_files: true,
            },
            None,
        );
        assert_eq!(remote.kind(), BackendKind::RemoteShell);

        let batch = from_resource(
            ResourceKind::BatchQueue {
                host: None,
                queue_header: vec!["#PBS -l walltime=24:00:00".into()],
                copy_files: false,
            },
            None,
        );
        assert_eq!(batch.kind(), BackendKind::BatchQueue);
    }
}
