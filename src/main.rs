use std::env;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::{LevelFilter, info, warn};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use coordinator::api::state::AppState;
use coordinator::config::AppConfig;
use coordinator::db::Database;
use coordinator::registry::RunnerRegistry;
use coordinator::session::SessionController;
use coordinator::store::Store;

const APP_NAME: &str = "coordinatord";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common)?;

    match cli.command {
        Command::Serve(cmd) => run_serve(cli.common, cmd),
        Command::Config { command } => handle_config(&cli.common, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[tokio::main]
async fn run_serve(common: CommonOpts, cmd: ServeCommand) -> Result<()> {
    let config = AppConfig::load(common.config.as_ref())?;
    let host = cmd.host.unwrap_or_else(|| config.server.host.clone());
    let port = cmd.port.unwrap_or(config.server.port);

    info!("starting coordinator, store at {}", config.store.url);
    let db = Database::connect(&config.store.url).await?;
    let store = Store::new(db.pool().clone());
    let state = AppState::new(store, &config);

    let seeded = state
        .blueprints
        .seed_from_disk(&config.blueprints.dir)
        .await
        .unwrap_or_else(|err| {
            warn!("blueprint seeding skipped: {err:#}");
            0
        });
    info!("seeded {seeded} blueprint(s) from {}", config.blueprints.dir.display());

    state
        .queue
        .rebuild_ready_index()
        .await
        .context("rebuilding ready index")?;

    let sessions = Arc::clone(&state.sessions);
    let summary = sessions.recover(config.recovery.mode).await?;
    info!(
        "recovery ({:?}): {} reset to pending, {} marked failed, {} marked stopped",
        config.recovery.mode, summary.reset_to_pending, summary.marked_failed, summary.marked_stopped
    );

    let shutdown = CancellationToken::new();
    spawn_timeout_sweeper(state.queue.clone(), config.scheduling.timeout_sweep_interval_seconds, shutdown.clone());
    spawn_registration_gc(state.registry.clone(), config.scheduling.registration_gc_grace_seconds, shutdown.clone());

    let router = coordinator::api::routes::create_router(state);
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    info!("listening on {addr}");

    let shutdown_signal = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, draining");
            shutdown_signal.cancel();
        })
        .await
        .context("serving")?;

    Ok(())
}

fn spawn_timeout_sweeper(queue: Arc<coordinator::queue::RunQueue>, interval_seconds: u64, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_seconds.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match queue.sweep_timeouts().await {
                        Ok(0) => {}
                        Ok(n) => info!("timeout sweep: {n} run(s) timed out"),
                        Err(err) => warn!("timeout sweep failed: {err:#}"),
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });
}

fn spawn_registration_gc(registry: RunnerRegistry, grace_seconds: u64, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(grace_seconds.max(1).min(60)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match registry.collect_garbage().await {
                        Ok(0) => {}
                        Ok(n) => info!("registration gc: removed {n} stale registration(s)"),
                        Err(err) => warn!("registration gc failed: {err:#}"),
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });
}

fn handle_config(common: &CommonOpts, command: ConfigCommand) -> Result<()> {
    let config = AppConfig::load(common.config.as_ref())?;
    match command {
        ConfigCommand::Show => {
            if common.json {
                println!("{}", serde_json::to_string_pretty(&config).context("serializing config to JSON")?);
            } else {
                println!("{config:#?}");
            }
        }
        ConfigCommand::Path => {
            println!("{}", resolved_config_path(common).display());
        }
    }
    Ok(())
}

fn resolved_config_path(common: &CommonOpts) -> PathBuf {
    common.config.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coordinator")
            .join("config.toml")
    })
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

fn init_logging(common: &CommonOpts) -> Result<()> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = effective_log_level(common);
    let level_str = match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("coordinator={level_str},tower_http={level_str}")));

    if common.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        let disable_color = common.no_color
            || env::var_os("NO_COLOR").is_some()
            || !io::stderr().is_terminal();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_ansi(!disable_color))
            .try_init()
            .ok();
    }

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_level(level);
    builder.try_init().ok();

    Ok(())
}

fn effective_log_level(common: &CommonOpts) -> LevelFilter {
    if common.trace {
        LevelFilter::Trace
    } else if common.debug {
        LevelFilter::Debug
    } else {
        match common.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Coordinator control plane server.", propagate_version = true)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true)]
    no_color: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP API server
    Serve(ServeCommand),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to, overrides the config file
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on, overrides the config file
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
}
