use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tokio::net::TcpListener;

use gemini_relay::api::{create_router, AppState};
use gemini_relay::config::{self, AppConfig};
use gemini_relay::db::Database;
use gemini_relay::history::MessageRepository;
use gemini_relay::tasks::TaskManager;
use gemini_relay::ws::Hub;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "OpenAI-compatible chat-completions relay backed by a browser-extension agent"
)]
struct Cli {
    /// Path to a config file (TOML or YAML); defaults apply when omitted
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Option<PathBuf>,
    /// Shared secret clients must present as `Authorization: Bearer <key>`
    #[arg(long = "api-key", value_name = "KEY")]
    api_key: Option<String>,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load(cli.config.as_deref())?;

    // CLI key takes precedence over the config file.
    if let Some(api_key) = cli.api_key.clone() {
        cfg.api_key = api_key;
    }

    init_logging(&cli, &cfg);
    match &cli.config {
        Some(path) => info!("config loaded from {}", path.display()),
        None => info!("no config file specified, using defaults"),
    }
    print_config(&cfg);

    serve(cfg)
}

#[tokio::main]
async fn serve(cfg: AppConfig) -> Result<()> {
    let database = Database::open(Path::new(&cfg.database.path))
        .await
        .context("initializing database")?;
    let history = MessageRepository::new(database.pool().clone());
    info!("database initialized at {}", cfg.database.path);

    let (hub, inbound) = Hub::new(&cfg.websocket);
    let tasks = Arc::new(TaskManager::new());
    tasks.start_dispatcher(inbound);

    let state = AppState::new(hub, tasks, history, cfg.api_key.clone());
    let router = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.server.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("server listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

fn init_logging(cli: &Cli, cfg: &AppConfig) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_level = match cli.verbose {
        0 if cfg.server.mode == "debug" => "debug",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "gemini_relay={default_level},tower_http={default_level}"
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .ok();

    // The ws/tasks modules log through the `log` facade.
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    builder.try_init().ok();
}

fn print_config(cfg: &AppConfig) {
    let api_key = if cfg.api_key.is_empty() {
        "(disabled, no auth)".to_string()
    } else {
        let prefix: String = cfg.api_key.chars().take(4).collect();
        format!("{prefix}****")
    };

    eprintln!("========================================");
    eprintln!("  gemini-relay - effective config");
    eprintln!("========================================");
    eprintln!("  server port:      {}", cfg.server.port);
    eprintln!("  database path:    {}", cfg.database.path);
    eprintln!("  ws ping interval: {}s", cfg.websocket.ping_interval);
    eprintln!("  ws pong timeout:  {}s", cfg.websocket.pong_timeout);
    eprintln!("  api key:          {api_key}");
    eprintln!("========================================");
}
