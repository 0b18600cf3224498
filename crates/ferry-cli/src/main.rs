//! Ferry CLI
//!
//! Relays a file between two endpoint roots through a single spool, running
//! the download and the upload at the same time.

mod config;
mod progress;

use clap::{Parser, Subcommand};
use ferry_core::{Relay, RelayMedium, TransferEndpoint, TransferRequest};
use ferry_files::{LocalEndpoint, hash_file_from};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{TransferProgress, format_bytes, format_rate};

/// Ferry - server-to-server file relay
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay a file from one endpoint root to another
    Relay {
        /// Root directory of the source endpoint
        source_root: PathBuf,

        /// File path on the source endpoint
        source_path: String,

        /// Root directory of the target endpoint
        target_root: PathBuf,

        /// File path on the target endpoint
        target_path: String,

        /// Resume both sides from this byte offset
        #[arg(long, default_value_t = 0)]
        restart_at: u64,

        /// Spool through a bounded in-memory ring instead of a temp file
        #[arg(long)]
        memory: bool,

        /// Compare BLAKE3 digests of both files afterwards
        #[arg(long)]
        verify: bool,
    },

    /// Print the effective configuration
    Config {
        /// Write the default configuration to the config path
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long, requires = "init")]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    if let Commands::Config { init: true, force } = cli.command {
        return init_config(&config_path, force);
    }

    // Load configuration
    let config = if cli.config.is_some() {
        Config::load(&config_path)?
    } else {
        Config::load_or_create(&config_path)?
    };
    config.validate()?;

    init_logging(cli.verbose, &config);

    match cli.command {
        Commands::Relay {
            source_root,
            source_path,
            target_root,
            target_path,
            restart_at,
            memory,
            verify,
        } => {
            let request = TransferRequest::new(source_path, target_path).restart_at(restart_at);
            relay_file(source_root, target_root, request, memory, verify, &config).await?;
        }
        Commands::Config { .. } => {
            show_config(&config_path, &config)?;
        }
    }

    Ok(())
}

/// Install the tracing subscriber, `RUST_LOG` taking precedence
fn init_logging(verbose: bool, config: &Config) {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Relay one file between two local endpoint roots
async fn relay_file(
    source_root: PathBuf,
    target_root: PathBuf,
    request: TransferRequest,
    memory: bool,
    verify: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let source = Arc::new(local_endpoint(source_root, config)?);
    let target = Arc::new(local_endpoint(target_root, config)?);

    let mut relay_config = config.relay.clone();
    if memory {
        relay_config.medium = RelayMedium::Memory;
    }
    relay_config.validate()?;
    let forceful = relay_config.forceful_abort;

    let source_file = source.resolve(&request.source_path)?;
    let target_file = target.resolve(&request.target_path)?;
    let total = std::fs::metadata(&source_file)
        .map(|m| m.len().saturating_sub(request.restart_at))
        .unwrap_or(0);

    println!("Source: {}", source_file.display());
    println!("Target: {}", target_file.display());
    println!("Size: {}", format_bytes(total));
    if request.restart_at > 0 {
        println!("Resuming at: {}", format_bytes(request.restart_at));
    }

    tracing::info!(
        source = %source_file.display(),
        target = %target_file.display(),
        medium = ?relay_config.medium,
        "Relay requested"
    );

    let label = format!("{} -> {}", request.source_path, request.target_path);
    let progress = Arc::new(TransferProgress::new(total, &label));

    let mut relay = {
        let source = Arc::clone(&source);
        let target = Arc::clone(&target);
        let progress = Arc::clone(&progress);
        let request = request.clone();
        tokio::task::spawn_blocking(move || {
            Relay::new(&*source, &*target)
                .with_config(relay_config)
                .run(&request, Some(&*progress))
        })
    };

    let result = tokio::select! {
        joined = &mut relay => joined?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            eprintln!("\nInterrupted, aborting relay...");
            abort_endpoint(source.as_ref(), "source", forceful);
            abort_endpoint(target.as_ref(), "target", forceful);
            relay.await?
        }
    };

    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            progress.abandon();
            let category = e.category();
            return Err(anyhow::Error::new(e).context(format!("relay failed ({category})")));
        }
    };

    progress.finish_with_message("Relay complete".to_string());
    println!(
        "Relayed {} in {:.2?} ({})",
        format_bytes(stats.bytes_relayed),
        stats.elapsed,
        format_rate(stats.bytes_relayed, stats.elapsed)
    );

    if verify {
        verify_relay(&source_file, &target_file, request.restart_at)?;
    }

    Ok(())
}

fn local_endpoint(root: PathBuf, config: &Config) -> anyhow::Result<LocalEndpoint> {
    let mut endpoint = LocalEndpoint::new(root)?.with_chunk_size(config.transfer.chunk_size);
    if let Some(delay) = config.transfer.throttle() {
        endpoint = endpoint.with_throttle(delay);
    }
    Ok(endpoint)
}

/// Best-effort abort; an idle endpoint has nothing to stop
fn abort_endpoint(endpoint: &LocalEndpoint, side: &str, forceful: bool) {
    if let Err(e) = endpoint.abort_current_transfer(forceful) {
        tracing::debug!(side, error = %e, "Abort not applied");
    }
}

/// Compare the relayed ranges of both files
fn verify_relay(source: &Path, target: &Path, offset: u64) -> anyhow::Result<()> {
    let expected = hash_file_from(source, offset)?;
    let actual = hash_file_from(target, offset)?;

    if expected != actual {
        anyhow::bail!(
            "Verification failed: source {} != target {}",
            expected.to_hex(),
            actual.to_hex()
        );
    }

    println!("Verified: BLAKE3 {}", actual.to_hex());
    Ok(())
}

/// Write the default configuration
fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file {} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Print the effective configuration
fn show_config(path: &Path, config: &Config) -> anyhow::Result<()> {
    println!("# {}", path.display());
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
