//! clusterback - versioned cluster state for Kubernetes.
//!
//! This is the main entry point for the clusterback CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use clusterback_core::config::KubectlConfig;
use clusterback_core::{
    CaptureOutcome, CaptureReport, Config, DiffOutcome, Engine, EngineOptions, GateOutcome,
};
use clusterback_kubectl::{Kubectl, KubectlApplier, KubectlProvider};
use clusterback_server::AppState;
use clusterback_store::{GitVersionStore, VersionId};
use clusterback_util::{LogConfig, LogLevel};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "clusterback")]
#[command(author, version, about = "Versioned snapshots, diffs and rollbacks for Kubernetes cluster state", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Version store directory
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// kubeconfig context to use
    #[arg(long, global = true)]
    context: Option<String>,

    /// Path to the kubeconfig file
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Write logs to PATH, or to the default log file when no path is given
    #[arg(long, global = true, value_name = "PATH", num_args = 0..=1)]
    log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture the live cluster state now
    Snapshot {
        /// Respect the minimum interval between versions
        #[arg(long)]
        gated: bool,
    },
    /// Watch the cluster and capture on change until interrupted
    Watch,
    /// List stored versions, newest first
    Versions {
        /// Show at most this many versions
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Compare live state with a stored version
    Diff {
        /// Version id
        id: String,
    },
    /// Re-apply a stored version to the cluster
    Rollback {
        /// Version id
        id: String,
    },
    /// Write a stored version to disk without applying it
    Checkout {
        /// Version id
        id: String,
    },
    /// Start the HTTP server
    Serve {
        /// Address to bind to (defaults to the configured address)
        #[arg(short, long)]
        address: Option<SocketAddr>,
        /// Also watch the cluster while serving
        #[arg(long)]
        watch: bool,
    },
    /// Show configuration
    Config {
        /// Write the effective configuration to this file
        #[arg(long, value_name = "PATH")]
        save: Option<PathBuf>,
    },
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("clusterback {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let cwd = std::env::current_dir()?;
    let (config, sources) = Config::load(Some(&cwd))
        .await
        .context("failed to load configuration")?;
    let config = apply_overrides(config, &cli);

    if let Some(path) = init_logging(cli.verbose, &config) {
        debug!(path = %path.display(), "Logging to file");
    }
    debug!(sources = ?sources, "Configuration loaded");

    match cli.command {
        Commands::Config { save: Some(path) } => {
            config.save(&path).await?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Commands::Config { save: None } => show_config(&config, &sources, cli.json),
        Commands::Snapshot { gated } => {
            let engine = build_engine(&config).await?;
            snapshot(&engine, gated, cli.json).await
        }
        Commands::Watch => {
            let engine = build_engine(&config).await?;
            watch(&engine).await
        }
        Commands::Versions { limit } => {
            let engine = build_engine(&config).await?;
            list_versions(&engine, limit, cli.json).await
        }
        Commands::Diff { id } => {
            let engine = build_engine(&config).await?;
            diff(&engine, &VersionId::from_string(id), cli.json).await
        }
        Commands::Rollback { id } => {
            let engine = build_engine(&config).await?;
            rollback(&engine, &VersionId::from_string(id), cli.json).await
        }
        Commands::Checkout { id } => {
            let engine = build_engine(&config).await?;
            let path = engine.checkout(&VersionId::from_string(id)).await?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Serve { address, watch } => {
            let address = match address {
                Some(address) => address,
                None => config
                    .server_address()
                    .parse()
                    .context("invalid server address in configuration")?,
            };
            let engine = build_engine(&config).await?;
            serve(Arc::new(engine), address, watch).await
        }
        Commands::Version => Ok(()),
    }
}

/// CLI flags win over every config source.
fn apply_overrides(mut config: Config, cli: &Cli) -> Config {
    if let Some(store) = &cli.store {
        config.store_dir = Some(store.clone());
    }
    match &cli.log_file {
        Some(Some(path)) => config.log_file = Some(path.clone()),
        Some(None) => config.log_file = clusterback_util::log::default_log_path(),
        None => {}
    }
    if cli.context.is_some() || cli.kubeconfig.is_some() {
        let kubectl = config.kubectl.get_or_insert_with(KubectlConfig::default);
        if let Some(context) = &cli.context {
            kubectl.context = Some(context.clone());
        }
        if let Some(kubeconfig) = &cli.kubeconfig {
            kubectl.kubeconfig = Some(kubeconfig.clone());
        }
    }
    config
}

fn init_logging(verbose: bool, config: &Config) -> Option<PathBuf> {
    let level = if verbose {
        LogLevel::Debug
    } else {
        config.log_level()
    };
    clusterback_util::log::init(LogConfig {
        level,
        include_location: verbose,
        file: config.log_file.clone(),
    })
}

async fn build_engine(config: &Config) -> anyhow::Result<Engine> {
    let store_dir = config.store_dir();
    let store = GitVersionStore::open(&store_dir)
        .await
        .with_context(|| format!("failed to open version store at {}", store_dir.display()))?
        .with_author(config.commit_author());

    let kubectl = config
        .kubectl
        .as_ref()
        .map(Kubectl::from_config)
        .unwrap_or_default();
    debug!(store = %store_dir.display(), kubectl = kubectl.binary(), "Building engine");

    Ok(Engine::new(
        Arc::new(KubectlProvider::new(kubectl.clone())),
        Arc::new(store),
        Arc::new(KubectlApplier::new(kubectl)),
        EngineOptions::from(config),
    ))
}

fn show_config(config: &Config, sources: &[PathBuf], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("Configuration sources:");
    if sources.is_empty() {
        println!("  (defaults only)");
    }
    for source in sources {
        println!("  {}", source.display());
    }
    println!();
    println!("Store:            {}", config.store_dir().display());
    println!("Minimum interval: {}s", config.min_interval().as_secs());
    println!("Restart backoff:  {}s", config.restart_backoff().as_secs());
    println!("Server address:   {}", config.server_address());
    println!("Log level:        {}", config.log_level().as_str());
    if let Some(path) = &config.log_file {
        println!("Log file:         {}", path.display());
    }
    let kinds: Vec<String> = config.kinds().iter().map(|k| k.to_string()).collect();
    println!("Kinds:            {}", kinds.join(", "));
    Ok(())
}

async fn snapshot(engine: &Engine, gated: bool, json: bool) -> anyhow::Result<()> {
    let report = if gated {
        match engine.request_capture("cli").await? {
            GateOutcome::Captured(report) => report,
            outcome @ GateOutcome::RateLimited { .. } => {
                let reason = outcome.reason().unwrap_or_default();
                if json {
                    println!("{}", serde_json::json!({ "created": false, "reason": reason }));
                } else {
                    println!("{reason}");
                }
                return Ok(());
            }
        }
    } else {
        engine.capture().await?
    };
    print_capture(&report, json)
}

fn print_capture(report: &CaptureReport, json: bool) -> anyhow::Result<()> {
    if json {
        let value = match &report.outcome {
            CaptureOutcome::Created(version) => serde_json::json!({
                "created": true,
                "version": version,
                "summary": report.summary,
            }),
            CaptureOutcome::NoChange { latest } => serde_json::json!({
                "created": false,
                "latest": latest,
                "summary": report.summary,
            }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match &report.outcome {
        CaptureOutcome::Created(version) => println!(
            "Created version {} ({}, {} resources)",
            version.id, version.label, report.summary.documents
        ),
        CaptureOutcome::NoChange { latest } => {
            println!("No changes since {latest}; no new version was created")
        }
    }
    for kind in &report.summary.skipped_kinds {
        eprintln!("warning: could not list {kind}; it is missing from this snapshot");
    }
    Ok(())
}

async fn watch(engine: &Engine) -> anyhow::Result<()> {
    let handle = engine.watch();
    println!(
        "Watching {} kinds, minimum interval {}s. Press Ctrl-C to stop.",
        handle.kinds().len(),
        engine.options().min_interval.as_secs()
    );

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, stopping watches");

    let stats = handle.stats();
    let created: u64 = handle
        .kinds()
        .iter()
        .map(|kind| stats.kind(kind).versions_created)
        .sum();
    handle.shutdown().await;
    println!("Stopped. {created} version(s) created while watching.");
    Ok(())
}

async fn list_versions(engine: &Engine, limit: Option<usize>, json: bool) -> anyhow::Result<()> {
    let mut versions = engine.list_versions().await?;
    versions.reverse();
    if let Some(limit) = limit {
        versions.truncate(limit);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&versions)?);
        return Ok(());
    }
    if versions.is_empty() {
        println!("No versions yet. Run `clusterback snapshot` to capture one.");
        return Ok(());
    }
    for version in &versions {
        println!(
            "{:<12} {}  {}",
            version.id.short(),
            version.timestamp.format("%Y-%m-%d %H:%M:%S"),
            version.label
        );
    }
    Ok(())
}

async fn diff(engine: &Engine, id: &VersionId, json: bool) -> anyhow::Result<()> {
    let outcome = engine.diff(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    match outcome {
        DiffOutcome::Identical { message } => println!("{message}"),
        DiffOutcome::Changed(report) => print!("{}", report.unified),
    }
    Ok(())
}

async fn rollback(engine: &Engine, id: &VersionId, json: bool) -> anyhow::Result<()> {
    let outcome = engine.rollback(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    println!(
        "Rolled back to {} ({}): {} resources applied",
        outcome.version.id,
        outcome.version.label,
        outcome.report.applied.len()
    );
    Ok(())
}

async fn serve(engine: Arc<Engine>, address: SocketAddr, watch: bool) -> anyhow::Result<()> {
    let handle = watch.then(|| engine.watch());
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down server");
        }
        signal.cancel();
    });

    println!("Serving on http://{address}");
    let result = clusterback_server::serve(address, AppState::new(engine), shutdown).await;
    if let Some(handle) = handle {
        handle.shutdown().await;
    }
    result.with_context(|| format!("server on {address} failed"))
}
