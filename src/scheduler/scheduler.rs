use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use crate::error::{DispatchError, Result};
use crate::persist::WorkspaceLock;
use crate::scheduler::backend::Backend;
use crate::scheduler::job::Job;
use crate::scheduler::slots::SlotPool;

/// Drives a list of jobs over a backend's slots with a single cooperative
/// polling loop: reclaim, dispatch, otherwise report and sleep.
///
/// Jobs overlap as OS processes; the dispatcher itself never runs more
/// than one thing at a time, so no job state needs locking.
pub struct Scheduler {
    jobs: Vec<Job>,
    slots: SlotPool,
    backend: Box<dyn Backend>,
    config: DispatchConfig,
    lock: Option<WorkspaceLock>,
    closed: bool,
}

impl Scheduler {
    /// Build a scheduler over `backend`, holding the workspace lock in
    /// `base_dir` for resident backends.
    ///
    /// Fails with `LockConflict` when another run already holds the lock;
    /// clear up the situation and remove the lock file first.
    pub fn new(
        base_dir: &Path,
        jobs: Vec<Job>,
        backend: Box<dyn Backend>,
        config: DispatchConfig,
    ) -> Result<Self> {
        if backend.slot_count() == 0 {
            return Err(DispatchError::InvalidConfig(
                "backend has no execution slots".to_string(),
            ));
        }
        let lock = if backend.holds_workspace_lock() {
            Some(WorkspaceLock::acquire(base_dir)?)
        } else {
            None
        };
        let slots = SlotPool::new(backend.slot_count());
        Ok(Self {
            jobs,
            slots,
            backend,
            config,
            lock,
            closed: false,
        })
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Drive every job to completion.
    ///
    /// Each iteration, in order:
    /// 1. Reclaim slots whose occupant is no longer running.
    /// 2. Exit when every job reports finished.
    /// 3. Pick the next dispatchable job, resume candidates first.
    /// 4. Start it on the first free slot; when there is no free slot or
    ///    nothing to start, report status and sleep the poll interval.
    ///
    /// Cancellation asks every occupying job to terminate, waits out the
    /// grace interval, and falls through. Every exit path, including
    /// errors, emits a final report and closes the scheduler.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        let result = self.run_inner(&cancel).await;
        self.report_status();
        self.close();
        tracing::info!("Scheduler finished execution");
        result
    }

    async fn run_inner(&mut self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return self.wind_down().await;
            }
            self.reclaim_slots();
            if self.all_finished() {
                return Ok(());
            }
            let free = self.slots.first_free();
            let next = self.next_dispatchable();
            if let (Some(slot), Some(job_ix)) = (free, next) {
                let label = self.backend.describe_slot(slot);
                tracing::info!(
                    job = %self.jobs[job_ix].id,
                    name = %self.jobs[job_ix].name,
                    slot = %label,
                    "Start job"
                );
                self.backend.start_job(&mut self.jobs[job_ix], slot).await?;
                // Batch submissions and captured start failures finish
                // immediately and never occupy the slot.
                if self.jobs[job_ix].is_running() {
                    self.slots.occupy(slot, job_ix);
                }
            } else {
                self.report_status();
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                    _ = cancel.cancelled() => return self.wind_down().await,
                }
            }
        }
    }

    async fn wind_down(&mut self) -> Result<()> {
        tracing::info!("Cancellation requested, terminating running jobs");
        self.terminate()?;
        tokio::time::sleep(self.config.termination_grace()).await;
        Ok(())
    }

    /// Free every slot whose occupant is no longer running. Runs before
    /// dispatch in each iteration, so a slot freed by a finished job is
    /// reusable in the same pass.
    fn reclaim_slots(&mut self) {
        let occupied: Vec<(usize, usize)> = self.slots.occupied().collect();
        for (slot, job_ix) in occupied {
            if !self.jobs[job_ix].is_running() {
                tracing::debug!(job = %self.jobs[job_ix].id, slot, "Slot reclaimed");
                self.slots.release(slot);
            }
        }
    }

    fn all_finished(&mut self) -> bool {
        self.jobs.iter_mut().all(|job| job.is_finished())
    }

    /// Next job to start: resume candidates first in list order, then
    /// never-started jobs in list order. Started jobs (which includes
    /// every slot occupant) are skipped.
    fn next_dispatchable(&self) -> Option<usize> {
        if let Some(ix) = self.jobs.iter().position(Job::is_resume_candidate) {
            return Some(ix);
        }
        self.jobs
            .iter()
            .position(|job| !job.has_started() && !job.is_resume_candidate())
    }

    /// One report line per job, in list order.
    pub fn status_lines(&self) -> Vec<String> {
        self.jobs.iter().map(Job::status_line).collect()
    }

    fn report_status(&self) {
        for line in self.status_lines() {
            tracing::info!("{line}");
        }
    }

    /// Ask every job currently occupying a slot to wind down.
    pub fn terminate(&mut self) -> Result<()> {
        let occupied: Vec<(usize, usize)> = self.slots.occupied().collect();
        for (_slot, job_ix) in occupied {
            self.jobs[job_ix].request_termination()?;
        }
        Ok(())
    }

    /// Append new work. Useful between runs when a driver generates jobs
    /// incrementally.
    pub fn append_job(&mut self, job: Job) {
        self.jobs.push(job);
    }

    /// Remove and return every finished job. Slots are reclaimed first
    /// and their occupant indices rewritten, so no returned job holds a
    /// slot and the remaining bookkeeping stays valid.
    pub fn take_finished(&mut self) -> Vec<Job> {
        self.reclaim_slots();
        let mut taken = Vec::new();
        let mut kept = Vec::new();
        let mut remap = Vec::with_capacity(self.jobs.len());
        for mut job in self.jobs.drain(..) {
            if job.is_finished() {
                remap.push(None);
                taken.push(job);
            } else {
                remap.push(Some(kept.len()));
                kept.push(job);
            }
        }
        self.jobs = kept;
        self.slots.remap(&remap);
        taken
    }

    /// Dispose of everything: close every job (force-killing any that
    /// still runs), clear the slots, release the workspace lock.
    /// Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for job in &mut self.jobs {
            job.close();
        }
        self.slots.clear();
        if let Some(lock) = self.lock.as_mut() {
            lock.release();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.close();
    }
}
