use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use jobsentry::config::{MonitorConfig, SchedulerConfig, TimeoutPolicy};
use jobsentry::monitor::Monitor;
use jobsentry::provider::{CommandProvider, JobSpec, ProviderCommands};
use jobsentry::sink::{CheckResult, LogSink};

#[derive(Parser, Debug)]
#[command(name = "jobsentry")]
#[command(version)]
#[command(about = "Probe-job lifecycle monitor for remote job-execution endpoints")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Submit a probe job for a target
    Submit(SubmitArgs),

    /// Run one monitor cycle over the tracked jobs
    Monitor(MonitorArgs),

    /// Cancel the tracked job for a target
    Cancel(CancelArgs),
}

// =============================================================================
// Shared arguments
// =============================================================================

#[derive(clap::Args, Debug)]
struct CommonArgs {
    /// Bookkeeping directory (one subdirectory per target)
    #[arg(long, default_value = "/var/lib/jobsentry")]
    workdir: PathBuf,

    /// Override the job submit command template
    #[arg(long)]
    submit_cmd: Option<String>,

    /// Override the job status command template
    #[arg(long)]
    status_cmd: Option<String>,

    /// Override the job cancel command template
    #[arg(long)]
    cancel_cmd: Option<String>,

    /// Override the job purge command template
    #[arg(long)]
    purge_cmd: Option<String>,

    /// Override the job logging-info command template
    #[arg(long)]
    logging_cmd: Option<String>,

    /// Override the job output command template
    #[arg(long)]
    output_cmd: Option<String>,

    /// Registered-state timeout in seconds
    #[arg(long)]
    timeout_registered: Option<u64>,

    /// Queued-state timeout in seconds
    #[arg(long)]
    timeout_queued: Option<u64>,

    /// Scheduled-state timeout in seconds
    #[arg(long)]
    timeout_scheduled: Option<u64>,

    /// Running-state timeout in seconds
    #[arg(long)]
    timeout_running: Option<u64>,

    /// Staleness ceiling before a leftover job is discarded on submit,
    /// in seconds
    #[arg(long)]
    timeout_stale: Option<u64>,

    /// Give-up ceiling for jobs whose status cannot be queried, in seconds
    #[arg(long)]
    timeout_discard: Option<u64>,
}

impl CommonArgs {
    fn provider(&self) -> CommandProvider {
        let defaults = ProviderCommands::default();
        CommandProvider::new(ProviderCommands {
            submit: self.submit_cmd.clone().unwrap_or(defaults.submit),
            status: self.status_cmd.clone().unwrap_or(defaults.status),
            cancel: self.cancel_cmd.clone().unwrap_or(defaults.cancel),
            purge: self.purge_cmd.clone().unwrap_or(defaults.purge),
            logging: self.logging_cmd.clone().unwrap_or(defaults.logging),
            output: self.output_cmd.clone().unwrap_or(defaults.output),
        })
    }

    fn timeouts(&self) -> TimeoutPolicy {
        let mut policy = TimeoutPolicy::default();
        if let Some(secs) = self.timeout_registered {
            policy.registered_secs = secs;
        }
        if let Some(secs) = self.timeout_queued {
            policy.queued_secs = secs;
        }
        if let Some(secs) = self.timeout_scheduled {
            policy.scheduled_secs = secs;
        }
        if let Some(secs) = self.timeout_running {
            policy.running_secs = secs;
        }
        if let Some(secs) = self.timeout_stale {
            policy.stale_after_secs = secs;
        }
        if let Some(secs) = self.timeout_discard {
            policy.discard_after_secs = secs;
        }
        policy
    }

    fn config(&self) -> MonitorConfig {
        MonitorConfig::new(&self.workdir).with_timeouts(self.timeouts())
    }
}

// =============================================================================
// Subcommand arguments
// =============================================================================

#[derive(clap::Args, Debug)]
struct SubmitArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Target the probe job is submitted for
    #[arg(long)]
    target: String,

    /// Service descriptor reported with the job's terminal result
    #[arg(long, default_value = "JobSubmit")]
    service: String,

    /// Job description handed to the provider (e.g. a JDL path)
    #[arg(long)]
    descriptor: String,
}

#[derive(clap::Args, Debug)]
struct MonitorArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Comma-separated target list; all persisted records when omitted
    #[arg(long)]
    targets: Option<String>,

    /// Maximum concurrent poll tasks
    #[arg(long, default_value = "10")]
    max_concurrent: usize,

    /// Per-task wall-clock timeout in seconds
    #[arg(long, default_value = "300")]
    task_timeout: u64,

    /// Print the cycle report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct CancelArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Target whose job should be cancelled
    #[arg(long)]
    target: String,
}

// =============================================================================
// Entry point
// =============================================================================

fn print_check(result: &CheckResult) {
    println!("{}: {}", result.severity, result.summary);
    if !result.detail.is_empty() {
        println!("{}", result.detail);
    }
}

fn monitor_for(common: &CommonArgs, config: MonitorConfig) -> Result<Monitor, ExitCode> {
    Monitor::new(config, Arc::new(common.provider()), Arc::new(LogSink)).map_err(|e| {
        eprintln!("UNKNOWN: failed to open bookkeeping store: {}", e);
        ExitCode::from(3)
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Submit(cmd) => {
            let monitor = match monitor_for(&cmd.common, cmd.common.config()) {
                Ok(monitor) => monitor,
                Err(code) => return code,
            };
            let result = monitor
                .submit(&cmd.target, &cmd.service, &JobSpec::new(&cmd.descriptor))
                .await;
            print_check(&result);
            ExitCode::from(result.severity.exit_code() as u8)
        }
        Commands::Monitor(cmd) => {
            let config = cmd.common.config().with_scheduler(SchedulerConfig {
                max_concurrent: cmd.max_concurrent,
                task_timeout: Duration::from_secs(cmd.task_timeout),
                ..Default::default()
            });
            let mut monitor = match monitor_for(&cmd.common, config) {
                Ok(monitor) => monitor,
                Err(code) => return code,
            };
            let targets: Option<Vec<String>> = cmd.targets.map(|list| {
                list.split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            });
            let report = monitor.run_cycle(targets.as_deref()).await;
            if cmd.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{}", json),
                    Err(e) => eprintln!("failed to encode report: {}", e),
                }
            } else {
                println!("{}: {}", report.severity, report.summary);
                println!("{}", report.detail);
            }
            ExitCode::from(report.severity.exit_code() as u8)
        }
        Commands::Cancel(cmd) => {
            let monitor = match monitor_for(&cmd.common, cmd.common.config()) {
                Ok(monitor) => monitor,
                Err(code) => return code,
            };
            let result = monitor.cancel(&cmd.target).await;
            print_check(&result);
            ExitCode::from(result.severity.exit_code() as u8)
        }
    }
}
