//! rollout-watch - run one container rollout to a recorded outcome.
//!
//! ```text
//! main() -> RolloutConfig -> SqliteStore + HttpOrchestrator + UpstreamNotifier
//!                                      |
//!                                      v
//!                       OperationExecutor::run(request) -> record
//! ```
//!
//! `show` and `pending` only read the store; they never contact the platform.

use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use rollout_config::{RolloutConfig, rollout_dir};
use rollout_engine::{ExecutorSettings, OperationExecutor};
use rollout_platform::{HttpOrchestrator, UpstreamNotifier};
use rollout_store::{OperationLedger, OperationRecord, SqliteStore};
use rollout_types::{DeploymentTarget, OperationId, OperationRequest, ParentId, ResultStatus, UnitId};

#[derive(Parser)]
#[command(name = "rollout-watch", version, about = "Deadline-bounded container rollouts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Roll a container to a new image and wait for the outcome
    Upgrade(UpgradeArgs),

    /// Print one operation record
    Show {
        /// Operation identifier
        id: i64,
    },

    /// List records that never left pending
    Pending,
}

#[derive(clap::Args)]
struct UpgradeArgs {
    #[arg(long)]
    namespace: String,
    #[arg(long)]
    deployment: String,
    /// Version label of the workload subset
    #[arg(long, default_value = "")]
    version: String,
    #[arg(long)]
    container: String,
    /// Image to roll to
    #[arg(long)]
    image: String,
    /// Image currently running, recorded for audit
    #[arg(long, default_value = "")]
    old_image: String,
    #[arg(long)]
    operator: String,
    #[arg(long, default_value_t = 0)]
    unit_id: i64,
    /// External source identifier of the caller
    #[arg(long)]
    source_id: Option<String>,
    /// Parent deployment record to link (0 means none)
    #[arg(long, default_value_t = 0)]
    parent_id: i64,
}

impl UpgradeArgs {
    fn into_request(self) -> OperationRequest {
        OperationRequest {
            target: DeploymentTarget {
                namespace: self.namespace,
                deployment: self.deployment,
                version: self.version,
                container: self.container,
            },
            unit_id: UnitId::new(self.unit_id),
            new_image: self.image,
            old_image: self.old_image,
            operator: self.operator,
            source_id: self.source_id.filter(|s| !s.trim().is_empty()),
            parent_id: ParentId::from_raw(self.parent_id),
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.rollout/logs/rollout.log
    if let Some(dir) = rollout_dir() {
        candidates.push(dir.join("logs").join("rollout.log"));
    }

    // Fallback: ./.rollout/logs/rollout.log
    candidates.push(PathBuf::from(".rollout").join("logs").join("rollout.log"));

    candidates
}

fn open_store(config: &RolloutConfig) -> Result<Arc<SqliteStore>> {
    let path = config
        .store_path()
        .context("no store path: set [store].path or HOME")?;
    let store = SqliteStore::open(&path)
        .with_context(|| format!("failed to open store at {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn upgrade(config: &RolloutConfig, args: UpgradeArgs) -> Result<ExitCode> {
    let Some(platform) = config.platform() else {
        bail!("[platform].base_url is not configured");
    };
    let backend = HttpOrchestrator::new(&platform.base_url, platform.token, platform.timeout)
        .context("failed to build platform client")?;
    let notifier = config
        .upstream()
        .map(|up| UpstreamNotifier::new(&up.base_url, &up.result_path, up.token, up.timeout))
        .transpose()
        .context("failed to build upstream client")?;
    let store = open_store(config)?;

    let executor = OperationExecutor::new(
        store.clone(),
        Arc::new(backend),
        notifier,
        ExecutorSettings::from_config(config),
    );

    let report = tokio::select! {
        report = executor.run(args.into_request()) => report,
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for interrupt")?;
            tracing::warn!("Interrupted; operation record left pending");
            eprintln!("interrupted; the operation record stays pending");
            return Ok(ExitCode::from(130));
        }
    };

    let Some(id) = report.operation_id else {
        bail!("operation was not recorded; see log for details");
    };
    let Some(record) = store.load(id)? else {
        bail!("operation {id} disappeared from the store");
    };
    print_record(&record);

    if report.panicked {
        bail!("operation {id} aborted unexpectedly; record may remain pending");
    }
    Ok(exit_code(record.result))
}

fn show(config: &RolloutConfig, id: i64) -> Result<ExitCode> {
    let store = open_store(config)?;
    let id = OperationId::new(id);
    match store.load(id)? {
        Some(record) => {
            print_record(&record);
            Ok(ExitCode::SUCCESS)
        }
        None => bail!("no operation with id {id}"),
    }
}

fn pending(config: &RolloutConfig) -> Result<ExitCode> {
    let store = open_store(config)?;
    let records = store.pending()?;
    if records.is_empty() {
        println!("no pending operations");
    }
    for record in &records {
        println!(
            "{}\t{}\t{}\t{}",
            record.id,
            record.insert_time.format("%Y-%m-%d %H:%M:%S"),
            record.deployment,
            record.new_image
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn print_record(record: &OperationRecord) {
    println!("id:          {}", record.id);
    println!("deployment:  {}", record.deployment);
    println!("image:       {} -> {}", record.old_image, record.new_image);
    println!("operator:    {}", record.operator);
    println!("created:     {}", record.insert_time.format("%Y-%m-%d %H:%M:%S"));
    println!("online date: {}", record.online_date);
    println!("result:      {}", record.result);
    println!("cost:        {}s", record.cost_secs);
    if !record.message.is_empty() {
        println!("message:     {}", record.message);
    }
}

fn exit_code(result: ResultStatus) -> ExitCode {
    match result {
        ResultStatus::Success => ExitCode::SUCCESS,
        ResultStatus::Failure => ExitCode::FAILURE,
        ResultStatus::Pending => ExitCode::from(2),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    let config = RolloutConfig::load()
        .context("failed to load config")?
        .unwrap_or_default();

    match cli.command {
        Command::Upgrade(args) => upgrade(&config, args).await,
        Command::Show { id } => show(&config, id),
        Command::Pending => pending(&config),
    }
}
