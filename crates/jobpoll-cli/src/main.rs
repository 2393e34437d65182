//! `jobpoll` command line: submit a video or evaluation job and wait for its
//! result, or stream a chat completion.

use clap::{Parser, Subcommand};
use jobpoll_client::{
    ChatClient, ClientConfig, EvalBackend, EvalRunRequest, JobPoller, PollConfig, VideoBackend,
    VideoRequest, DEFAULT_POLL_INTERVAL,
};
use jobpoll_core::{cancel_pair, CancelHandle, CancelToken, JobError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobpoll", about = "Submit long-running AI jobs and wait for their results")]
struct Cli {
    /// Path to config file (environment variables are used if it is missing)
    #[arg(short, long, default_value = "jobpoll.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a video from a text prompt and save it as MP4
    Video {
        /// Text prompt describing the video
        #[arg(long)]
        prompt: String,
        /// Output resolution
        #[arg(long, default_value = "1280x720")]
        size: String,
        /// Video model deployment
        #[arg(long, default_value = "sora-2")]
        model: String,
        /// Directory the video is written to
        #[arg(long, default_value = "videos")]
        out_dir: PathBuf,
        /// Seconds between status checks (overrides config)
        #[arg(long)]
        poll_interval: Option<u64>,
    },
    /// Start an evaluation run over an uploaded JSONL file and print its results
    Eval {
        /// Evaluation group id
        #[arg(long)]
        eval_id: String,
        /// Uploaded JSONL file id
        #[arg(long)]
        file_id: String,
        /// Display name of the run
        #[arg(long, default_value = "jobpoll-eval-run")]
        name: String,
        /// Seconds between status checks (overrides config, default 5)
        #[arg(long)]
        poll_interval: Option<u64>,
    },
    /// Stream a chat completion to stdout
    Chat {
        /// User prompt
        #[arg(long)]
        prompt: String,
        /// Optional system prompt
        #[arg(long)]
        system: Option<String>,
        /// Chat model deployment
        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,
    },
}

/// Interval for eval runs when neither the flag, file nor environment sets one.
const EVAL_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let (handle, cancel) = cancel_pair();
    spawn_ctrl_c(handle);

    match run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<JobError>() {
                Some(job_err) => eprintln!("{}", describe(job_err)),
                None => eprintln!("Error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn spawn_ctrl_c(handle: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            handle.cancel();
        }
    });
}

/// Reads `path` when it exists, otherwise configures from the environment.
fn load_config(path: &Path) -> Result<ClientConfig, JobError> {
    if path.exists() {
        info!(path = %path.display(), "Loading config file");
        ClientConfig::load(path)
    } else {
        ClientConfig::from_env()
    }
}

async fn run(cli: Cli, cancel: CancelToken) -> anyhow::Result<()> {
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Video {
            prompt,
            size,
            model,
            out_dir,
            poll_interval,
        } => {
            let poll = poll_settings(&config, poll_interval, DEFAULT_POLL_INTERVAL);
            let poller = JobPoller::new(VideoBackend::new(&config)?, poll);
            let request = VideoRequest::new(prompt).with_model(model).with_size(size);

            let outcome = poller.run_with_report(&request, &cancel).await?;
            let path = outcome.artifact.save_to(&out_dir).await?;
            println!("{}", path.display());
        }
        Commands::Eval {
            eval_id,
            file_id,
            name,
            poll_interval,
        } => {
            let poll = poll_settings(&config, poll_interval, EVAL_POLL_INTERVAL);
            let poller = JobPoller::new(EvalBackend::new(&config, eval_id)?, poll);
            let request = EvalRunRequest::new(name, file_id);

            let report = poller.run(&request, &cancel).await?;
            for item in &report.output_items {
                println!("{}", serde_json::to_string_pretty(item)?);
            }
            match &report.report_url {
                Some(url) => println!("Report: {url}"),
                None => println!("Report: (no report URL returned)"),
            }
        }
        Commands::Chat {
            prompt,
            system,
            model,
        } => {
            let client = ChatClient::new(&config, model)?;
            let (tx, mut rx) = mpsc::channel::<String>(64);

            let printer = tokio::spawn(async move {
                let mut stdout = std::io::stdout();
                while let Some(delta) = rx.recv().await {
                    let _ = write!(stdout, "{delta}");
                    let _ = stdout.flush();
                }
                let _ = writeln!(stdout);
            });

            let completion = tokio::select! {
                result = client.complete_streaming(system.as_deref(), &prompt, Some(tx)) => result?,
                _ = cancel.cancelled() => {
                    return Err(JobError::Cancelled { job_id: "chat".into() }.into());
                }
            };
            let _ = printer.await;
            info!(
                total_tokens = completion.usage.total_tokens,
                finish_reason = %completion.finish_reason,
                "Chat done"
            );
        }
    }

    Ok(())
}

/// Poll settings for one command. The flag wins, then the file or
/// environment, then the command's own default.
fn poll_settings(config: &ClientConfig, flag_secs: Option<u64>, default: Duration) -> PollConfig {
    let mut poll = config.poll_config_or(default);
    if let Some(secs) = flag_secs {
        poll.poll_interval = Duration::from_secs(secs);
    }
    poll
}

/// One-line user-facing message for a failed command.
fn describe(err: &JobError) -> String {
    match err {
        JobError::Submission { status, body } => {
            format!("Job was not accepted (HTTP {status}): {body}")
        }
        JobError::Timeout { job_id, polls, .. } => format!(
            "Job {job_id} did not finish after {polls} polls: outcome unknown, the job may still be running"
        ),
        JobError::RemoteFailure {
            job_id,
            status,
            payload,
        } => format!("Job {job_id} {status}: {payload}"),
        JobError::Cancelled { job_id } => {
            format!("Interrupted while waiting for {job_id}; the remote job was not cancelled")
        }
        JobError::ArtifactFetch { job_id, source } => {
            format!("Job {job_id} completed but its result could not be downloaded: {source}")
        }
        JobError::Config(msg) => format!("Configuration error: {msg}"),
        other => format!("Error ({}): {other}", other.kind()),
    }
}
