//! wedge CLI - decompose one failing proof obligation.
//!
//! ```text
//! wedge proof.dfy 42
//!   -> extract `assert ...;` on line 42
//!   -> ask the oracle for a stepping-stone, insert it above
//!   -> re-verify through the language server, promote/retry
//!   -> print the report; exit 0 only when the obligation was proved
//! ```
//!
//! The file is edited in place. Rejected candidates stay in the file as
//! commented-out lines so the history of the run is visible.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{
    env,
    fs::{self, OpenOptions},
    io,
    path::PathBuf,
    process::ExitCode,
    sync::Mutex,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use wedge_engine::wedge_lsp::LspManager;
use wedge_engine::wedge_providers::Provider;
use wedge_engine::wedge_types::{BufferId, Report};
use wedge_engine::{
    FeedbackAdapter, FileDocuments, LlmOracle, LspVerifier, Orchestrator, WedgeConfig,
    config_path, run_decomposition,
};

#[derive(Parser)]
#[command(name = "wedge")]
#[command(author, version, about = "Split a failing assertion into provable steps")]
struct Cli {
    /// Source file containing the obligation
    file: PathBuf,

    /// 1-based line of the obligation
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    line: u32,

    /// Maximum number of candidates to try
    #[arg(long)]
    max_depth: Option<u32>,

    /// Oracle provider (claude or openai)
    #[arg(long, value_parser = parse_provider)]
    provider: Option<Provider>,

    /// Oracle model name
    #[arg(long)]
    model: Option<String>,

    /// Config file (defaults to ~/.wedge/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Also log to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn parse_provider(raw: &str) -> Result<Provider, String> {
    Provider::parse(raw).ok_or_else(|| format!("unknown provider `{raw}`"))
}

fn init_tracing(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_wedge_log_file();
    match log_file {
        Some((log_path, file)) => {
            let stderr = verbose.then(|| fmt::layer().with_writer(io::stderr));
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(stderr)
                .with(env_filter)
                .init();
            tracing::info!(path = %log_path.display(), "Logging initialized");
        }
        None => {
            let stderr = verbose.then(|| fmt::layer().with_writer(io::stderr));
            tracing_subscriber::registry()
                .with(stderr)
                .with(env_filter)
                .init();
        }
    }
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_wedge_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in wedge_log_file_candidates() {
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

fn wedge_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.wedge/logs/wedge.log
    if let Some(config_path) = config_path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("wedge.log"));
    }

    // Fallback: ./.wedge/logs/wedge.log
    candidates.push(PathBuf::from(".wedge").join("logs").join("wedge.log"));

    candidates
}

fn load_config(cli: &Cli) -> Result<WedgeConfig> {
    let mut config = match &cli.config {
        Some(path) => WedgeConfig::load_from(path.clone())?,
        None => WedgeConfig::load()?.unwrap_or_default(),
    };
    if let Some(max_depth) = cli.max_depth {
        config.decompose.max_depth = max_depth;
    }
    if let Some(provider) = cli.provider {
        config.oracle.provider = provider;
        // A model picked for another provider would not resolve.
        config.oracle.model = None;
    }
    if let Some(model) = &cli.model {
        config.oracle.model = Some(model.clone());
    }
    Ok(config)
}

/// The chain of targets the run promoted through, ending at the final one.
/// Empty when nothing was promoted.
fn history_lines(report: &Report) -> Vec<String> {
    if report.history.is_empty() {
        return Vec::new();
    }
    report
        .history
        .iter()
        .chain([&report.final_target])
        .enumerate()
        .map(|(depth, target)| format!("  {depth}: {target}"))
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli)?;
    let path = fs::canonicalize(&cli.file)
        .with_context(|| format!("cannot open {}", cli.file.display()))?;
    let workspace_root = match path.parent() {
        Some(parent) => parent.to_path_buf(),
        None => env::current_dir()?,
    };

    let api = config.oracle.api_config()?;
    tracing::info!(
        provider = %api.provider(),
        model = api.model(),
        file = %path.display(),
        line = cli.line,
        "Starting wedge"
    );
    let oracle = LlmOracle::new(api, config.syntax.clone(), config.decompose.max_buffer_bytes)?;

    let mut manager = LspManager::start(config.lsp_config(), &workspace_root).await;
    if !manager.handles(&path) {
        manager.shutdown().await;
        bail!("no running language server handles {}", path.display());
    }

    let buffer = BufferId::new(&path);
    let mut orchestrator = Orchestrator::new(
        config.orchestrator_config(),
        oracle,
        FileDocuments::new(config.syntax.clone()),
        LspVerifier::new(manager),
    );
    let mut feedback = FeedbackAdapter::new(buffer.clone(), Box::new(config.classifier.clone()));

    let result = run_decomposition(
        &mut orchestrator,
        &mut feedback,
        buffer,
        cli.line - 1,
        &config.driver_options(),
    )
    .await;
    let remaining: Vec<String> = orchestrator
        .verifier_mut()
        .manager()
        .errors_in(&path)
        .map(|d| d.display_with_path(&path))
        .collect();
    orchestrator.verifier_mut().shutdown().await;

    let report = result?;
    println!("{report}");
    for line in history_lines(&report) {
        println!("{line}");
    }
    if !report.outcome.is_success() {
        for line in &remaining {
            eprintln!("{line}");
        }
    }
    Ok(if report.outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
