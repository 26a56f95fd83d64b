//! Shield CLI - host loader for a single study install.
//!
//! # Commands
//!
//! ```text
//! shield run [--script FILE]     drive the lifecycle from JSON lines (stdin by default)
//! shield variation [--client-id ID]
//! shield validate
//! ```
//!
//! `run` persists the install state in `<data-dir>/state.json`, appends
//! telemetry records to `<data-dir>/telemetry.jsonl` and prints one JSON
//! report per script line on stdout. Logs never go to stdout.

mod eligibility;
mod script;

use std::fs::{self, OpenOptions};
use std::io::{Write, stdout};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, BufReader, stdin};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use shield_config::ShieldConfig;
use shield_core::{
    FileStore, InstallMetadata, JsonLinesSink, LifecycleController, StudyConfig, StudyStore,
    ensure_client_id, select_variation,
};
use shield_types::{ClientId, InstallIdentity};

use crate::eligibility::CommandEligibility;
use crate::script::ScriptHost;

const STATE_FILE: &str = "state.json";
const TELEMETRY_FILE: &str = "telemetry.jsonl";

#[derive(Parser)]
#[command(name = "shield")]
#[command(about = "Run a Shield study lifecycle from the command line", version)]
struct Cli {
    /// Study config file (default: ~/.shield/study.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory for install state, telemetry and logs
    /// (default: ~/.shield/studies/<study>)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed lifecycle events and extension messages to the study
    Run {
        /// JSON-lines script (reads stdin when omitted)
        #[arg(long)]
        script: Option<PathBuf>,
        /// Do not uninstall automatically after the study ends itself
        #[arg(long)]
        manual_uninstall: bool,
    },
    /// Print the variation a client is assigned to
    Variation {
        /// Client id to evaluate (default: this install's id)
        #[arg(long)]
        client_id: Option<String>,
    },
    /// Check the study config and print its resolved form
    Validate,
}

fn init_tracing(level: Option<&str>, data_dir: Option<&Path>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_log_file(data_dir);

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

    // Stdout carries the JSON reports; without a log file there are no logs.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file(data_dir: Option<&Path>) -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates(data_dir) {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
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

fn log_file_candidates(data_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(dir) = data_dir {
        candidates.push(dir.join("logs").join("shield.log"));
    }

    // Primary: ~/.shield/logs/shield.log
    if let Some(config_path) = shield_config::config_path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("shield.log"));
    }

    // Fallback: ./.shield/logs/shield.log
    candidates.push(PathBuf::from(".shield").join("logs").join("shield.log"));

    candidates
}

fn load_config(path: Option<&Path>) -> Result<ShieldConfig> {
    if let Some(path) = path {
        return Ok(ShieldConfig::load_from(path)?);
    }
    match ShieldConfig::load()? {
        Some(config) => Ok(config),
        None => {
            let expected = shield_config::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "~/.shield/study.toml".to_string());
            bail!("no study config found at {expected}")
        }
    }
}

fn resolve_data_dir(cli: Option<&Path>, config: &ShieldConfig) -> Result<PathBuf> {
    match cli {
        Some(dir) => Ok(dir.to_path_buf()),
        None => config
            .data_dir()
            .context("could not determine a data directory; pass --data-dir"),
    }
}

fn study_config(config: &ShieldConfig) -> Result<StudyConfig> {
    let study = StudyConfig::new(config.settings().clone());
    match config.eligibility_command() {
        Some(command) => Ok(study.with_eligibility(Arc::new(CommandEligibility::new(command)?))),
        None => Ok(study),
    }
}

async fn run(
    config: &ShieldConfig,
    data_dir: &Path,
    script: Option<&Path>,
    manual_uninstall: bool,
) -> Result<usize> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

    let store: Arc<dyn StudyStore> = Arc::new(FileStore::new(data_dir.join(STATE_FILE)));
    let client_id = ensure_client_id(store.as_ref())?;
    let identity = InstallIdentity::new(client_id, config.addon().clone());

    let telemetry_path = data_dir.join(TELEMETRY_FILE);
    let telemetry_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&telemetry_path)
        .with_context(|| format!("failed to open {}", telemetry_path.display()))?;
    let sink = Arc::new(JsonLinesSink::new(telemetry_file));

    let controller = LifecycleController::new(study_config(config)?, identity, sink, store);
    let mut metadata = InstallMetadata::new(&config.addon().id, &config.addon().version);
    metadata.install_path = data_dir.to_path_buf();
    let mut host = ScriptHost::new(controller, metadata).with_auto_uninstall(!manual_uninstall);

    let input: Box<dyn AsyncBufRead + Unpin> = match script {
        Some(path) => {
            let file = File::open(path)
                .await
                .with_context(|| format!("failed to open script {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(stdin())),
    };

    let mut out = stdout().lock();
    let failures = host.run(input, &mut out).await?;
    tracing::info!(
        state = %host.controller().state(),
        failures,
        "Script finished"
    );
    Ok(failures)
}

fn variation(config: &ShieldConfig, data_dir: &Path, client_id: Option<String>) -> Result<()> {
    let client_id = match client_id {
        Some(id) => ClientId::new(id)?,
        None => ensure_client_id(&FileStore::new(data_dir.join(STATE_FILE)))?,
    };
    let settings = config.settings();
    let identity = InstallIdentity::new(client_id, config.addon().clone());
    let variation = select_variation(
        &identity,
        settings.name(),
        settings.variations().as_slice(),
        settings.force_variation(),
    )?;
    print_json(&json!({
        "study": settings.name(),
        "clientId": identity.client_id(),
        "variation": variation,
        "forced": settings.force_variation().is_some(),
    }))
}

fn validate(config: &ShieldConfig) -> Result<()> {
    let settings = config.settings();
    let endings: Vec<_> = settings.endings().iter().map(|(reason, _)| reason).collect();
    print_json(&json!({
        "study": settings.name(),
        "addon": config.addon(),
        "variations": settings.variations(),
        "totalWeight": settings.variations().total_weight(),
        "forceVariation": settings.force_variation(),
        "endings": endings,
        "telemetry": settings.telemetry(),
        "eligibilityCommand": config.eligibility_command(),
    }))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    let mut out = stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    out.write_all(b"\n")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config comes first so `[log] level` can seed the filter.
    let config = load_config(cli.config.as_deref())?;
    let data_dir = resolve_data_dir(cli.data_dir.as_deref(), &config)?;
    init_tracing(config.log_level(), Some(&data_dir));
    tracing::info!(study = %config.settings().name(), "Loaded study");

    match cli.command {
        Commands::Run {
            script,
            manual_uninstall,
        } => {
            let failures = run(&config, &data_dir, script.as_deref(), manual_uninstall).await?;
            if failures > 0 {
                bail!("{failures} script line(s) could not be parsed");
            }
        }
        Commands::Variation { client_id } => variation(&config, &data_dir, client_id)?,
        Commands::Validate => validate(&config)?,
    }
    Ok(())
}
