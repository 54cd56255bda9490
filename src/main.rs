use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use dispatch_lite::config::{DispatchConfig, HostSlot, ResourceKind};
use dispatch_lite::credential::CredentialSource;
use dispatch_lite::error::DispatchError;
use dispatch_lite::remote;
use dispatch_lite::scheduler::{backend, Job, JobSpec, Scheduler};
use dispatch_lite::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "dispatch-lite")]
#[command(version)]
#[command(about = "Dispatch shell jobs over local slots, ssh hosts, or a batch queue")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every job in the manifest to completion
    Run(RunArgs),

    /// Report persisted job status without dispatching anything
    Status(StatusArgs),

    /// Pull job results back from a remote host
    Fetch(FetchArgs),
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Workspace base directory; job locations are relative to it
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Job manifest (JSON list of job specs)
    #[arg(long, default_value = "jobs.json")]
    manifest: PathBuf,

    /// Execution backend
    #[arg(long, value_enum, default_value = "local")]
    resource: ResourceArg,

    /// How many jobs run at once on the local backend
    #[arg(long, default_value = "1")]
    slots: usize,

    /// Remote slots (comma-separated, format: "host:device")
    /// Example: "gpu01:0,gpu01:1,gpu02:0"
    #[arg(long, default_value = "")]
    hosts: String,

    /// Submission host for the batch queue; omit to submit from here
    #[arg(long)]
    host: Option<String>,

    /// Header line for generated submission scripts (repeatable)
    #[arg(long)]
    queue_header: Vec<String>,

    /// Mirror each job directory to the execution host before starting
    #[arg(long)]
    copy_files: bool,

    /// Seconds between scheduler passes when nothing can start
    #[arg(long, default_value = "5")]
    poll_interval: u64,

    /// Milliseconds between child status checks on the same job
    #[arg(long, default_value = "300")]
    status_debounce: u64,

    #[command(flatten)]
    credential: CredentialArgs,
}

// =============================================================================
// Status / Fetch Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct StatusArgs {
    /// Workspace base directory; job locations are relative to it
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Job manifest (JSON list of job specs)
    #[arg(long, default_value = "jobs.json")]
    manifest: PathBuf,
}

#[derive(Parser, Debug)]
struct FetchArgs {
    /// Host to pull from
    #[arg(long)]
    host: String,

    /// Remote directory to fetch
    #[arg(long)]
    remote_dir: PathBuf,

    /// Local destination; defaults to the same path as the remote side
    #[arg(long)]
    local_dir: Option<PathBuf>,

    /// Exclude pattern, e.g. bulky output data (repeatable)
    #[arg(long)]
    exclude: Vec<String>,

    #[command(flatten)]
    credential: CredentialArgs,
}

// =============================================================================
// Shared Credential Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct CredentialArgs {
    /// Prompt for a login password (echo disabled)
    #[arg(long)]
    ask_pass: bool,

    /// Read the login password from this environment variable
    #[arg(long, conflicts_with = "ask_pass")]
    pass_env: Option<String>,
}

impl CredentialArgs {
    fn source(&self) -> CredentialSource {
        if self.ask_pass {
            CredentialSource::Prompt
        } else if let Some(var) = &self.pass_env {
            CredentialSource::Env(var.clone())
        } else {
            CredentialSource::None
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum ResourceArg {
    /// Local subprocesses
    Local,
    /// Remote hosts over ssh
    Ssh,
    /// Batch-queue submission
    Qsub,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_hosts(hosts: &str) -> Result<Vec<HostSlot>, Box<dyn std::error::Error>> {
    hosts
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.parse::<HostSlot>().map_err(Into::into))
        .collect()
}

fn load_jobs(
    manifest: &Path,
    base_dir: &Path,
    config: &DispatchConfig,
) -> Result<Vec<Job>, Box<dyn std::error::Error>> {
    let body = std::fs::read_to_string(manifest)?;
    let specs: Vec<JobSpec> = serde_json::from_str(&body)
        .map_err(|e| DispatchError::Manifest(format!("{}: {e}", manifest.display())))?;
    if specs.is_empty() {
        tracing::warn!(manifest = %manifest.display(), "Manifest contains no jobs");
    }
    let jobs = specs
        .into_iter()
        .map(|spec| Job::load(spec, base_dir, config.status_debounce()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(jobs)
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_jobs(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let base_dir = args.base_dir.canonicalize()?;
    let config = DispatchConfig {
        poll_interval_ms: args.poll_interval * 1_000,
        status_debounce_ms: args.status_debounce,
        credential_source: args.credential.source(),
        ..Default::default()
    };
    let credential = config.credential_source.resolve()?;

    let kind = match &args.resource {
        ResourceArg::Local => ResourceKind::Local { slots: args.slots },
        ResourceArg::Ssh => ResourceKind::RemoteShell {
            hosts: parse_hosts(&args.hosts)?,
            copy_files: args.copy_files,
        },
        ResourceArg::Qsub => ResourceKind::BatchQueue {
            host: args.host.clone(),
            queue_header: args.queue_header.clone(),
            copy_files: args.copy_files,
        },
    };

    let jobs = load_jobs(&args.manifest, &base_dir, &config)?;
    tracing::info!(
        jobs = jobs.len(),
        base_dir = %base_dir.display(),
        resource = ?args.resource,
        "Starting scheduler"
    );

    let backend = backend::from_resource(kind, credential);
    let mut scheduler = Scheduler::new(&base_dir, jobs, backend, config)?;
    let cancel = install_shutdown_handler();
    scheduler.run(cancel).await?;

    for line in scheduler.status_lines() {
        println!("{line}");
    }
    Ok(())
}

fn show_status(args: StatusArgs) -> Result<(), Box<dyn std::error::Error>> {
    let base_dir = args.base_dir.canonicalize()?;
    let config = DispatchConfig::default();
    let jobs = load_jobs(&args.manifest, &base_dir, &config)?;
    for job in &jobs {
        println!("{}", job.status_line());
    }
    println!("---");
    Ok(())
}

async fn fetch_results(args: FetchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let credential = args.credential.source().resolve()?;
    let local_dir = args.local_dir.as_deref().unwrap_or(&args.remote_dir);
    remote::fetch(
        &args.host,
        &args.remote_dir,
        local_dir,
        credential.as_ref(),
        &args.exclude,
    )
    .await?;
    println!(
        "Fetched {}:{} into {}",
        args.host,
        args.remote_dir.display(),
        local_dir.display()
    );
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => run_jobs(run_args).await?,
        Commands::Status(status_args) => show_status(status_args)?,
        Commands::Fetch(fetch_args) => fetch_results(fetch_args).await?,
    }

    Ok(())
}
