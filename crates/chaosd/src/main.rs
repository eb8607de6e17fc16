use std::path::PathBuf;

use chaos_aws::{AwsBackends, AwsCli};
use chaos_core::config::{load_config, ChaosConfig, ConfigError};
use chaos_core::types::RunId;
use chaos_core::validation::{has_errors, Validate, ValidationLevel};
use chaos_media::FfmpegGenerator;
use chaosd::{
    write_reports, Backends, CancelToken, Orchestrator, ReportError, RestoreFailure, RunError,
    RunJournal, RunOptions, RunOutcome, SystemClock,
};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

/// Chaos experiment against the video analysis pipeline.
#[derive(Debug, Parser)]
#[command(name = "video-chaos", version)]
struct Cli {
    /// Skip the baseline health check.
    #[arg(long)]
    skip_baseline: bool,
    /// Skip the dependency-hang phase.
    #[arg(long)]
    skip_timeout: bool,
    /// Read the worker configuration and report the plan without changing anything.
    #[arg(long)]
    dry_run: bool,
    /// TOML configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Directory for reports and the run journal.
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
    /// Debug logging unless RUST_LOG is set.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("ffmpeg binary `{0}` not found; install ffmpeg or use --dry-run")]
    MissingFfmpeg(String),
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("run aborted: {0}")]
    Aborted(String),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("{0}; MANUAL ACTION REQUIRED")]
    RestoreFailed(RestoreFailure),
}

impl MainError {
    fn exit_code(&self) -> i32 {
        match self {
            MainError::Config(_)
            | MainError::InvalidConfig(_)
            | MainError::MissingFfmpeg(_)
            | MainError::Signals(_) => 1,
            MainError::Run(_) | MainError::Aborted(_) | MainError::Report(_) => {
                RunOutcome::EXIT_FATAL
            }
            MainError::RestoreFailed(_) => RunOutcome::EXIT_RESTORE_FAILED,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(err) = run(cli) {
        eprintln!("video-chaos failed: {err}");
        std::process::exit(err.exit_code());
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn load(cli: &Cli) -> Result<ChaosConfig, MainError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ChaosConfig::default(),
    };
    config.apply_env_overrides(|key| std::env::var(key).ok());
    if let Some(dir) = &cli.output_dir {
        config.report.output_dir = dir.clone();
    }

    if let Err(err) = config.require_addressing() {
        if let ConfigError::MissingAddressing { keys } = &err {
            for key in keys {
                error!("missing required setting; export {key}=...");
            }
        }
        return Err(err.into());
    }

    let issues = config.validate();
    for issue in &issues {
        match issue.level {
            ValidationLevel::Error => error!(code = issue.code, "{}", issue.message),
            ValidationLevel::Warning => warn!(code = issue.code, "{}", issue.message),
        }
    }
    if has_errors(&issues) {
        let codes = issues
            .iter()
            .filter(|issue| issue.level == ValidationLevel::Error)
            .map(|issue| issue.code)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(MainError::InvalidConfig(codes));
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<(), MainError> {
    let config = load(&cli)?;
    let generator = FfmpegGenerator::new(config.workload.ffmpeg_binary.as_str());
    if !cli.dry_run && !generator.is_available() {
        return Err(MainError::MissingFfmpeg(config.workload.ffmpeg_binary.clone()));
    }

    let cancel = CancelToken::new();
    cancel
        .install_signal_handlers()
        .map_err(MainError::Signals)?;

    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    let run_id = RunId::new(id);
    let output_dir = config.report.output_dir.clone();
    let journal = RunJournal::new(output_dir.as_path(), &run_id);

    let aws = AwsBackends::new(AwsCli::new(config.pipeline.region.as_str()));
    let clock = SystemClock;
    let orchestrator = Orchestrator {
        backends: Backends {
            compute: &aws.compute,
            queue: &aws.queue,
            store: &aws.store,
            metrics: &aws.metrics,
        },
        generator: &generator,
        clock: &clock,
        cancel: &cancel,
        config: &config,
        journal: Some(&journal),
    };
    let outcome = orchestrator.run(
        &run_id,
        RunOptions {
            skip_baseline: cli.skip_baseline,
            skip_timeout: cli.skip_timeout,
            dry_run: cli.dry_run,
        },
    )?;

    let written = write_reports(&outcome.report, &config, &output_dir);
    match &written {
        Ok(paths) => info!(
            json = %paths.json.display(),
            markdown = %paths.markdown.display(),
            journal = %journal.path().display(),
            "reports written"
        ),
        Err(err) => error!(error = %err, "failed to write reports"),
    }

    if let Some(failure) = outcome.restore_failure {
        return Err(MainError::RestoreFailed(failure));
    }
    if let Some(reason) = outcome.fatal {
        return Err(MainError::Aborted(reason));
    }
    written?;
    if outcome.report.interrupted {
        warn!(run_id = %run_id, "run interrupted by operator; partial results reported");
    } else {
        info!(run_id = %run_id, "chaos run complete");
    }
    Ok(())
}
