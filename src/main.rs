// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use dispsync::reconcile::{ConfigDocument, Presentation, ReconcileOutcome, ResourceTable};
use dispsync::{
    init_logging, DiagnosticLog, FatalCondition, HttpTransport, PathResolver, SyncConfig,
    SyncEngine, SyncError, TransferManager,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// Data error - the server published an unusable index
    pub const DATA_ERR: i32 = 65;
    /// Internal software error - runtime or HTTP client could not start
    pub const SOFTWARE: i32 = 70;
    /// Configuration error - invalid config or unusable cache directory
    pub const CONFIG: i32 = 78;
}

use exit_codes::*;

#[derive(Parser)]
#[command(name = "dispsync")]
#[command(version = VERSION)]
#[command(about = "Keeps a display's local content cache in sync with its server.")]
#[command(long_about = "dispsync - background content sync for display clients\n\n\
    Follow the default server:   dispsync\n\
    Another server:              dispsync --server http://signs.local:7859\n\
    Sync once and exit:          dispsync --once\n\
    Use a local index:           dispsync --index-override ./index.json")]
struct Cli {
    /// Base address for identifiers starting with '/'
    #[arg(long)]
    server: Option<String>,

    /// Directory for downloaded files
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Identifier of the index document
    #[arg(long)]
    index: Option<String>,

    /// Parse this local file instead of the downloaded index
    #[arg(long, alias = "config-override")]
    index_override: Option<PathBuf>,

    /// Settings file (defaults to ~/.dispsync/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Milliseconds between ticks
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Exit after the first configuration is adopted
    #[arg(long)]
    once: bool,

    /// Debug output on stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut SyncConfig) {
        if let Some(server) = &self.server {
            config.server = server.clone();
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = cache_dir.clone();
        }
        if let Some(index) = &self.index {
            config.index = index.clone();
        }
        if let Some(path) = &self.index_override {
            config.index_override = Some(path.clone());
        }
        if let Some(tick_ms) = self.tick_ms {
            config.tick_interval_ms = tick_ms;
        }
    }
}

/// Reports reloads on stdout. Stands in for a real renderer.
#[derive(Default)]
struct LoggingPresentation {
    reloads: usize,
}

fn count(value: &serde_json::Value) -> usize {
    value.as_object().map_or(0, |map| map.len())
}

/// Manifest entries whose external reference points at nothing.
fn dangling(manifest: &serde_json::Value, resources: &ResourceTable) -> Vec<String> {
    let Some(entries) = manifest.as_object() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter(|(_, value)| resources.resolve_external(value).is_null())
        .map(|(name, _)| name.clone())
        .collect()
}

impl Presentation for LoggingPresentation {
    fn resources_changed(&mut self, _document: &ConfigDocument, resources: &Arc<ResourceTable>) {
        self.reloads += 1;
        let names: Vec<&str> = resources.names().collect();
        println!(
            "{} Resources reloaded ({})",
            "[~]".yellow(),
            if names.is_empty() { "none".to_string() } else { names.join(", ") }
        );
    }

    fn configuration_changed(&mut self, document: &ConfigDocument, resources: &Arc<ResourceTable>) {
        self.reloads += 1;
        println!(
            "{} Configuration adopted: {} resource(s), {} sprite(s), {} object(s)",
            "[✓]".green(),
            resources.len(),
            count(document.sprites()),
            count(document.objects())
        );
        match document.refresh() {
            Some(period) => println!("    Refreshing every {:.1}s", period.as_secs_f64()),
            None => println!("    {}", "No refresh period, fetched once".dimmed()),
        }
        for name in dangling(document.sprites(), resources)
            .into_iter()
            .chain(dangling(document.objects(), resources))
        {
            tracing::warn!("\"{}\" refers to a resource node that is not loaded", name);
        }
    }
}

fn exit_code(fatal: &FatalCondition) -> i32 {
    match fatal {
        FatalCondition::InvalidInitialIndex(_) => DATA_ERR,
        FatalCondition::CacheDir { .. } => CONFIG,
        FatalCondition::Runtime(_) | FatalCondition::Client(_) => SOFTWARE,
    }
}

/// Print the final notice plus recent warnings, then exit.
fn die(fatal: &FatalCondition, diagnostics: &DiagnosticLog) -> ! {
    eprint!("{}", fatal.user_message().red());
    let recent = diagnostics.errors();
    if !recent.is_empty() {
        eprintln!("\nRecent warnings:");
        for line in recent.iter().rev().take(10).rev() {
            eprintln!("  {}", line.dimmed());
        }
    }
    std::process::exit(exit_code(fatal));
}

fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load_from(path)?,
        None => SyncConfig::load()?,
    };
    cli.apply(&mut config);
    config.validate().context("Invalid command-line option")?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} Configuration error: {:#}", "[!]".red(), e);
            std::process::exit(CONFIG);
        }
    };

    let diagnostics = init_logging(cli.verbose, config.log_capacity)
        .context("Failed to initialize logging")?;

    let transport = match HttpTransport::new(config.connect_timeout()) {
        Ok(transport) => transport,
        Err(fatal) => die(&fatal, &diagnostics),
    };
    let transfers = match TransferManager::with_transport(
        PathResolver::new(config.server.as_str(), config.cache_dir.as_path()),
        Arc::new(transport),
        config.manager_options(),
    ) {
        Ok(transfers) => transfers,
        Err(fatal) => die(&fatal, &diagnostics),
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    let _ = ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::Relaxed);
    });

    tracing::info!(
        server = %config.server,
        cache = %config.cache_dir.display(),
        "dispsync {} starting",
        VERSION
    );

    let mut engine = SyncEngine::new(
        transfers,
        LoggingPresentation::default(),
        config.engine_options(),
    );
    let tick = config.tick_interval();

    while running.load(Ordering::Relaxed) {
        let started = Instant::now();
        match engine.tick(started) {
            Ok(report) => {
                if cli.once && report.outcome == Some(ReconcileOutcome::Reconfigured) {
                    break;
                }
            }
            Err(SyncError::Fatal(fatal)) => {
                engine.shutdown();
                die(&fatal, &diagnostics);
            }
        }
        if let Some(rest) = tick.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    let cancelled = engine.shutdown();
    tracing::info!(
        reloads = engine.presentation().reloads,
        cancelled,
        "dispsync stopped"
    );
    Ok(())
}
