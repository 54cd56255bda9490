use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use dispatch_lite::credential::Credential;
use dispatch_lite::error::DispatchError;
use dispatch_lite::persist::{self, PersistedStatus};
use dispatch_lite::scheduler::{BackendBinding, Job, JobFailure, JobSpec};
use tempfile::TempDir;

/// Build a manifest entry with no extra parameters.
fn spec(name: &str, location: &str, template: &[&str]) -> JobSpec {
    JobSpec {
        name: name.to_string(),
        location: location.into(),
        template: template.iter().map(|s| s.to_string()).collect(),
        params: BTreeMap::new(),
    }
}

/// Create the job directory and a job with no poll debounce, so tests see
/// status changes immediately.
fn make_job(base: &Path, spec: JobSpec) -> Job {
    std::fs::create_dir_all(base.join(&spec.location)).unwrap();
    Job::new(spec, base, Duration::ZERO)
}

async fn wait_finished(job: &mut Job) {
    for _ in 0..400 {
        if job.is_finished() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job did not finish in time: {}", job.status_line());
}

/// Read the single log file at `location` whose name starts with `prefix`.
fn read_log(location: &Path, prefix: &str) -> String {
    let entry = std::fs::read_dir(location)
        .unwrap()
        .filter_map(|e| e.ok())
        .find(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            name.starts_with(prefix) && name.ends_with(".log")
        })
        .expect("log file present");
    std::fs::read_to_string(entry.path()).unwrap()
}

#[tokio::test]
async fn test_local_job_runs_to_success() {
    let dir = TempDir::new().unwrap();
    let location = dir.path().join("exp01");
    let mut job = make_job(dir.path(), spec("hello", "exp01", &["echo hello from the job"]));

    job.start_local().unwrap();
    assert!(job.is_started());
    wait_finished(&mut job).await;

    assert!(!job.is_failed());
    assert!(job.failure().is_none());
    assert_eq!(job.binding(), Some(&BackendBinding::Local));

    // The lock is released once the process is gone.
    assert!(!persist::lock_path(&location, "hello").exists());

    // Header lines land before the child's output.
    let log = read_log(&location, "hello_local_");
    assert!(log.contains("Start job hello exp01 (local)"));
    assert!(log.contains("Full shell command:"));
    assert!(log.contains("============="));
    assert!(log.contains("hello from the job"));

    let status = persist::read_status(&persist::status_path(&location, "hello"))
        .unwrap()
        .expect("status file written");
    assert!(status.started);
    assert!(status.finished);
    assert!(status.failure.is_none());
}

#[tokio::test]
async fn test_local_job_failure_records_exit_code() {
    let dir = TempDir::new().unwrap();
    let mut job = make_job(dir.path(), spec("fail", "exp02", &["exit 3"]));

    job.start_local().unwrap();
    wait_finished(&mut job).await;

    assert!(job.is_failed());
    assert_eq!(job.failure(), Some(&JobFailure::Exit(3)));
    assert_eq!(
        job.status_line(),
        "fail exp02 (local): FAILED: exit code 3"
    );

    let status = persist::read_status(&persist::status_path(&dir.path().join("exp02"), "fail"))
        .unwrap()
        .unwrap();
    assert_eq!(status.failure, Some(JobFailure::Exit(3)));
}

#[tokio::test]
async fn test_second_start_is_a_resource_conflict() {
    let dir = TempDir::new().unwrap();
    let mut job = make_job(dir.path(), spec("once", "exp03", &["echo once"]));

    job.start_local().unwrap();
    wait_finished(&mut job).await;

    // The binding survives the finish, so a restart attempt still conflicts.
    match job.start_local() {
        Err(DispatchError::ResourceConflict { .. }) => {}
        other => panic!("expected resource conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_start_with_existing_lock_is_a_conflict() {
    let dir = TempDir::new().unwrap();
    let location = dir.path().join("exp04");
    let mut job = make_job(dir.path(), spec("locked", "exp04", &["echo never"]));

    persist::acquire_lock(&persist::lock_path(&location, "locked")).unwrap();

    match job.start_local() {
        Err(DispatchError::LockConflict { .. }) => {}
        other => panic!("expected lock conflict, got {other:?}"),
    }
    assert!(!job.has_started());
    // The pre-existing lock is left alone.
    assert!(persist::lock_path(&location, "locked").exists());
}

#[tokio::test]
async fn test_start_with_missing_location_errors_cleanly() {
    let dir = TempDir::new().unwrap();
    let job_spec = spec("ghost", "never/created", &["echo never"]);
    let mut job = Job::new(job_spec, dir.path(), Duration::ZERO);

    match job.start_local() {
        Err(DispatchError::Io(_)) => {}
        other => panic!("expected io error, got {other:?}"),
    }
    assert!(!job.has_started());
    // Nothing was persisted for a job that never got going.
    assert!(!persist::status_path(&dir.path().join("never/created"), "ghost").exists());
}

#[tokio::test]
async fn test_termination_interrupts_the_process_group() {
    let dir = TempDir::new().unwrap();
    let mut job = make_job(dir.path(), spec("long", "exp05", &["sleep 30"]));

    job.start_local().unwrap();
    assert!(job.is_running());

    job.request_termination().unwrap();
    wait_finished(&mut job).await;

    // SIGINT, so the shell dies by signal 2.
    assert_eq!(job.failure(), Some(&JobFailure::Signal(2)));
    assert!(!persist::lock_path(&dir.path().join("exp05"), "long").exists());
}

#[tokio::test]
async fn test_close_kills_and_records_a_resume_candidate() {
    let dir = TempDir::new().unwrap();
    let location = dir.path().join("exp06");
    let job_spec = spec("resumable", "exp06", &["sleep 30"]);
    let mut job = make_job(dir.path(), job_spec.clone());

    job.start_local().unwrap();
    assert!(job.is_running());

    job.close();
    assert!(!persist::lock_path(&location, "resumable").exists());

    // The persisted record says started-but-not-finished, which the next
    // run loads as a resume candidate.
    let reloaded = Job::load(job_spec, dir.path(), Duration::ZERO).unwrap();
    assert!(reloaded.is_resume_candidate());
    assert!(!reloaded.has_started());
    assert_eq!(
        reloaded.status_line(),
        "resumable exp06 (unscheduled): TO BE RESUMED"
    );
}

#[tokio::test]
async fn test_lock_file_loads_as_crashed() {
    let dir = TempDir::new().unwrap();
    let location = dir.path().join("exp07");
    std::fs::create_dir_all(&location).unwrap();

    // A status file claiming a clean finish loses against the crash marker.
    persist::write_status(
        &persist::status_path(&location, "crashed"),
        &PersistedStatus {
            started: true,
            finished: true,
            failure: None,
            binding: None,
            slot_label: None,
            updated_at: chrono::Utc::now(),
        },
    )
    .unwrap();
    persist::acquire_lock(&persist::lock_path(&location, "crashed")).unwrap();

    let job = Job::load(spec("crashed", "exp07", &["echo never"]), dir.path(), Duration::ZERO)
        .unwrap();

    assert!(job.has_started());
    assert!(job.has_finished());
    assert_eq!(job.failure(), Some(&JobFailure::Locked));
    assert!(!job.is_resume_candidate());
    assert_eq!(
        job.status_line(),
        "crashed exp07 (unscheduled): FAILED: locked"
    );
}

#[tokio::test]
async fn test_finished_job_reloads_as_finished() {
    let dir = TempDir::new().unwrap();
    let job_spec = spec("done", "exp08", &["echo done"]);
    let mut job = make_job(dir.path(), job_spec.clone());

    job.start_local().unwrap();
    wait_finished(&mut job).await;
    drop(job);

    let reloaded = Job::load(job_spec, dir.path(), Duration::ZERO).unwrap();
    assert!(reloaded.has_finished());
    assert!(reloaded.failure().is_none());
    assert!(!reloaded.is_resume_candidate());
    // The slot label is restored from the status file.
    assert_eq!(reloaded.status_line(), "done exp08 (local): FINISHED");
}

#[tokio::test]
async fn test_reloaded_finished_job_keeps_its_binding() {
    let dir = TempDir::new().unwrap();
    let job_spec = spec("done", "exp09", &["echo done"]);
    let mut job = make_job(dir.path(), job_spec.clone());

    job.start_local().unwrap();
    wait_finished(&mut job).await;
    drop(job);

    // Backend assignment is one-way and survives a restart: starting a
    // reloaded finished job must fail the same way a second start does.
    let mut reloaded = Job::load(job_spec, dir.path(), Duration::ZERO).unwrap();
    assert_eq!(reloaded.binding(), Some(&BackendBinding::Local));
    match reloaded.start_local() {
        Err(DispatchError::ResourceConflict { .. }) => {}
        other => panic!("expected ResourceConflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_debounce_defers_exit_detection() {
    let dir = TempDir::new().unwrap();
    let job_spec = spec("debounced", "exp09", &["sleep 0.2"]);
    std::fs::create_dir_all(dir.path().join("exp09")).unwrap();
    let mut job = Job::new(job_spec, dir.path(), Duration::from_secs(3600));

    job.start_local().unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    // The process is long gone, but the debounce window hides that.
    assert!(!job.is_finished());
    assert_eq!(job.status_line(), "debounced exp09 (local): RUNNING");

    // close() checks the child without the debounce and reaps the exit.
    job.close();
    assert!(job.has_finished());
    assert!(job.failure().is_none());
}

#[tokio::test]
async fn test_remote_shell_binds_the_slot_device() {
    let dir = TempDir::new().unwrap();
    let location = dir.path().join("rexp");
    let mut job = make_job(dir.path(), spec("rem", "rexp", &["echo dev {device}"]));

    // No such host, so the wrapped command fails quickly; the launch
    // itself succeeds and the job finishes as failed.
    job.start_remote_shell("host.invalid", "3", false, None)
        .await
        .unwrap();
    wait_finished(&mut job).await;
    assert!(job.is_failed());
    assert_eq!(
        job.binding(),
        Some(&BackendBinding::RemoteShell {
            host: "host.invalid".to_string(),
            device: "3".to_string(),
        })
    );

    let log = read_log(&location, "rem_ssh_host.invalid_3_");
    assert!(log.contains("Start job rem rexp (host.invalid[3])"));
    assert!(log.contains("ssh host.invalid"));
    assert!(log.contains("echo dev 3"));
}

#[tokio::test]
async fn test_remote_shell_log_redacts_the_credential() {
    let dir = TempDir::new().unwrap();
    let location = dir.path().join("sexp");
    let mut job = make_job(dir.path(), spec("secret", "sexp", &["echo hi"]));
    let cred = Credential::new("topsecret");

    job.start_remote_shell("host.invalid", "0", false, Some(&cred))
        .await
        .unwrap();
    wait_finished(&mut job).await;

    let log = read_log(&location, "secret_ssh_host.invalid_0_");
    assert!(log.contains("sshpass -p '***'"));
    assert!(!log.contains("topsecret"));
}

#[tokio::test]
async fn test_batch_queue_writes_script_and_captures_submission_failure() {
    let dir = TempDir::new().unwrap();
    let location = dir.path().join("bexp");
    let mut job = make_job(dir.path(), spec("batch", "bexp", &["./run.sh"]));

    let header = vec!["#PBS -q gpu".to_string(), "#PBS -l nodes=1".to_string()];
    job.start_batch_queue(None, &header, false, None)
        .await
        .unwrap();

    // Submission finishes the job either way; qsub is not installed here,
    // so the failure is captured rather than thrown.
    assert!(job.has_finished());
    assert!(matches!(job.failure(), Some(JobFailure::Submission(_))));

    let script = location.join("batch.sub");
    let body = std::fs::read_to_string(&script).unwrap();
    assert!(body.starts_with("#!/bin/bash\n#PBS -q gpu\n#PBS -l nodes=1\n"));
    assert!(body.contains("./run.sh"));

    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(&script).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);

    // Queue submissions never take the lock.
    assert!(!persist::lock_path(&location, "batch").exists());
}

#[tokio::test]
async fn test_termination_is_a_noop_after_batch_submission() {
    let dir = TempDir::new().unwrap();
    let mut job = make_job(dir.path(), spec("batch2", "bexp2", &["./run.sh"]));

    job.start_batch_queue(Some("hpc"), &[], false, None)
        .await
        .unwrap();

    // The queue owns execution after submission; the job is finished on
    // our side and termination has nothing to signal.
    assert!(job.has_finished());
    assert!(job.request_termination().is_ok());
    job.close();
}
