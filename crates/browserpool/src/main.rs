//! browserpool server binary.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use tokio::net::TcpListener;

use browserpool::api::{self, AppState};
use browserpool::config::{Settings, StoreBackend};
use browserpool::container::ContainerRuntime;
use browserpool::discovery::{EndpointDiscoverer, PublicHostResolver};
use browserpool::ports::PortPool;
use browserpool::session::{
    JsonSessionStore, SessionController, SessionStore, SqliteSessionStore,
};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.common.verbose);

    let settings =
        Settings::load(cli.common.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Serve(cmd) => run_serve(settings, cmd),
        Command::Config { command } => handle_config(&settings, command),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Capacity-bounded pool of sandboxed headless-browser sessions.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Path to a TOML config file
    #[arg(long, value_name = "PATH", global = true, env = "BROWSERPOOL_CONFIG")]
    config: Option<PathBuf>,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve(ServeCommand),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Args)]
struct ServeCommand {
    /// Override the listen host
    #[arg(long)]
    host: Option<String>,
    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Library code logs through `log`, the api layer through `tracing`;
    // initialize a sink for each.
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_level),
    )
    .try_init();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn handle_config(settings: &Settings, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let toml =
                toml::to_string_pretty(settings).context("serializing configuration")?;
            print!("{toml}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn run_serve(settings: Settings, cmd: ServeCommand) -> Result<()> {
    let store: Arc<dyn SessionStore> = match settings.database.backend {
        StoreBackend::Sqlite => Arc::new(
            SqliteSessionStore::new(&settings.database.path)
                .await
                .context("opening sqlite store")?,
        ),
        StoreBackend::Json => Arc::new(
            JsonSessionStore::new(&settings.database.json_dir)
                .context("opening json store")?,
        ),
    };

    let runtime = Arc::new(ContainerRuntime::new());
    info!("using container runtime '{}'", runtime.runtime_type());

    let ports = Arc::new(PortPool::new(settings.ports.start, settings.ports.end));
    let resolver = PublicHostResolver::new(settings.discovery.public_host.clone());
    let discoverer = Arc::new(EndpointDiscoverer::new(settings.discovery_config(), resolver));

    let controller = Arc::new(SessionController::new(
        runtime,
        store,
        ports,
        discoverer,
        settings.controller_config(),
    ));

    let app = api::build_router(AppState::new(Arc::clone(&controller)));

    let host = cmd.host.unwrap_or_else(|| settings.server.host.clone());
    let port = cmd.port.unwrap_or(settings.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("invalid listen address")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("listening on http://{addr}");

    let shutdown_controller = Arc::clone(&controller);
    let shutdown_signal = async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        info!("shutdown signal received, closing sessions");
        let closed = shutdown_controller.cleanup_all().await;
        info!("shutdown complete, closed {closed} sessions");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("running server")?;

    Ok(())
}
