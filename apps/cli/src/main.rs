//! DocShare CLI
//!
//! Publishes a directory of markdown documents to a share server and manages
//! the resulting shares.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use docshare_sync::{
    AccessSetting, AccessUpdate, HttpRemoteClient, ShareEngine, ShareOptions, ShareTarget,
    SyncConfig, SyncScheduler,
};

mod fs_host;
mod output;

use fs_host::FsHost;
use output::{OutputFormat, TerminalEmitter};

#[derive(Parser)]
#[command(name = "docshare")]
#[command(about = "DocShare - publish markdown notebooks incrementally")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the API key and show server limits
    Verify,
    /// List shares
    #[command(alias = "ls")]
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Share or update a directory as a notebook, or one document in it
    Share {
        /// Notebook directory
        dir: PathBuf,
        /// Share the whole directory (default)
        #[arg(long, conflicts_with = "doc")]
        notebook: bool,
        /// Share a single document by id
        #[arg(long)]
        doc: Option<String>,
        /// Protect the share with a password
        #[arg(long)]
        password: Option<String>,
        /// Expiry (RFC 3339)
        #[arg(long)]
        expires_at: Option<String>,
        /// Maximum number of visitors
        #[arg(long)]
        visitor_limit: Option<u32>,
        /// Upload everything instead of diffing against the server
        #[arg(long)]
        full: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change password, expiry or visitor limit of a share
    Access {
        share_id: String,
        #[arg(long, conflicts_with = "clear_password")]
        password: Option<String>,
        #[arg(long)]
        clear_password: bool,
        /// Expiry (RFC 3339)
        #[arg(long, conflicts_with = "clear_expires")]
        expires_at: Option<String>,
        #[arg(long)]
        clear_expires: bool,
        #[arg(long, conflicts_with = "clear_visitor_limit")]
        visitor_limit: Option<u32>,
        #[arg(long)]
        clear_visitor_limit: bool,
    },
    /// Delete a share
    #[command(alias = "rm")]
    Delete {
        share_id: String,
        /// Also delete stored assets
        #[arg(long)]
        hard: bool,
    },
    /// Run background reconciliation until Ctrl+C
    Watch {
        /// Notebook directory
        dir: PathBuf,
    },
    /// Show the effective configuration, or write a default config file
    Config {
        #[arg(long)]
        init: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "docshare_core=debug,docshare_sync=debug,docshare=debug"
    } else {
        "docshare_sync=info,docshare=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .init();
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid RFC 3339 time: {raw}"))?
        .with_timezone(&Utc))
}

fn setting<T>(value: Option<T>, clear: bool) -> AccessSetting<T> {
    match (value, clear) {
        (Some(v), _) => AccessSetting::Set(v),
        (None, true) => AccessSetting::Clear,
        (None, false) => AccessSetting::Keep,
    }
}

async fn open_engine(config: &SyncConfig, host: Arc<FsHost>) -> Result<Arc<ShareEngine>> {
    let client = Arc::new(HttpRemoteClient::new(&config.server).context(
        "Server URL and API key are required (set them in the config file or DOCSHARE_SERVER_URL / DOCSHARE_API_KEY)",
    )?);
    let engine = ShareEngine::with_emitter(config.clone(), client, host, Arc::new(TerminalEmitter::new()));
    Ok(Arc::new(engine))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = SyncConfig::load(cli.config.clone()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Config { init } => {
            if init {
                let path = cli
                    .config
                    .clone()
                    .or_else(SyncConfig::default_config_path)
                    .context("No config path available")?;
                if path.exists() {
                    bail!("{} already exists", path.display());
                }
                SyncConfig::default().save(Some(path.clone()))?;
                println!("Wrote {}", path.display());
            } else {
                print!("{}", config_preview(&config)?);
            }
        }

        Commands::Verify => {
            let engine = open_engine(&config, Arc::new(FsHost::detached())).await?;
            let info = engine.verify().await?;
            output::print_server_info(&info);
        }

        Commands::List { json } => {
            let engine = open_engine(&config, Arc::new(FsHost::detached())).await?;
            let shares = engine.list_shares().await?;
            output::print_shares(&shares, OutputFormat::from_flag(json))?;
        }

        Commands::Share {
            dir,
            notebook: _,
            doc,
            password,
            expires_at,
            visitor_limit,
            full,
            json,
        } => {
            let host = Arc::new(FsHost::open(&dir).await?);
            let engine = open_engine(&config, host.clone()).await?;

            let target = match doc {
                Some(id) => {
                    if !host.doc_ids().contains(&id) {
                        bail!("No document with id {id} in {}", dir.display());
                    }
                    ShareTarget::Doc(id)
                }
                None => ShareTarget::Notebook(host.notebook_id().to_string()),
            };
            let options = ShareOptions {
                password,
                expires_at: expires_at.as_deref().map(parse_time).transpose()?,
                visitor_limit,
                force_full: full,
            };

            let cancel = engine.cancel_token();
            let share = engine.share(target, options, &cancel);
            tokio::pin!(share);

            let outcome = tokio::select! {
                result = &mut share => result,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("Cancelling...");
                    cancel.cancel();
                    share.await
                }
            }?;
            output::print_outcome(&outcome, OutputFormat::from_flag(json))?;
        }

        Commands::Access {
            share_id,
            password,
            clear_password,
            expires_at,
            clear_expires,
            visitor_limit,
            clear_visitor_limit,
        } => {
            let update = AccessUpdate {
                password: setting(password, clear_password),
                expires_at: setting(expires_at.as_deref().map(parse_time).transpose()?, clear_expires),
                visitor_limit: setting(visitor_limit, clear_visitor_limit),
            };
            if update.is_noop() {
                bail!("Nothing to change");
            }

            let engine = open_engine(&config, Arc::new(FsHost::detached())).await?;
            let record = engine.update_access(&share_id, update).await?;
            output::print_share(&record);
        }

        Commands::Delete { share_id, hard } => {
            let engine = open_engine(&config, Arc::new(FsHost::detached())).await?;
            engine.delete_share(&share_id, hard).await?;
            println!("Deleted {share_id}");
        }

        Commands::Watch { dir } => {
            let host = Arc::new(FsHost::open(&dir).await?);
            let engine = open_engine(&config, host).await?;
            let initial = engine.list_shares().await?;
            info!(shares = initial.len(), "Watching shares");

            let scheduler = SyncScheduler::spawn(engine.clone(), config.scheduler.clone());
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            let mut last_cycles = 0;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let status = scheduler.status().await;
                        if status.cycles_run != last_cycles {
                            last_cycles = status.cycles_run;
                            info!(
                                cycles = status.cycles_run,
                                outcome = ?status.last_outcome,
                                next_in_secs = status.current_delay.as_secs(),
                                "Background sync"
                            );
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            scheduler.shutdown().await?;
            engine.disconnect().await;
        }
    }

    Ok(())
}

/// Effective configuration with the API key masked.
fn config_preview(config: &SyncConfig) -> Result<String> {
    let mut shown = config.clone();
    if shown.server.api_key.is_some() {
        shown.server.api_key = Some("********".to_string());
    }
    Ok(toml::to_string_pretty(&shown)?)
}
