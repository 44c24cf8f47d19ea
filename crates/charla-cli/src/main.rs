use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use charla_agents::{ChatEngine, GeminiProvider};
use charla_channels::{Channel, WhatsAppWebChannel};
use charla_config::{AppConfig, ConfigLoader};
use charla_db::{HistoryStore, SettingsHandle, SettingsStore, UserStore};
use charla_gateway::{AppState, build_router, whatsapp_on_message};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "charla", version, about = "Asistente de chat con puente de WhatsApp")]
struct Cli {
    /// Config file (defaults to ~/.charla/charla.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (and optionally the WhatsApp channel)
    Serve {
        /// Override the listen port
        #[arg(long)]
        port: Option<u16>,

        /// Connect WhatsApp at startup instead of waiting for the admin panel
        #[arg(long)]
        whatsapp: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(ConfigLoader::default_path);
    let mut config = ConfigLoader::load(&config_path).context("failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Serve {
        port: None,
        whatsapp: false,
    }) {
        Commands::Serve { port, whatsapp } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if whatsapp {
                config.whatsapp.autostart = true;
            }
            serve(config).await
        }
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let data_dir = ConfigLoader::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

    let db_path = if config.database.path.is_relative() {
        data_dir.join(&config.database.path)
    } else {
        config.database.path.clone()
    };

    let history = Arc::new(Mutex::new(
        HistoryStore::open(&db_path).context("failed to open history store")?,
    ));
    let users = Arc::new(Mutex::new(
        UserStore::open(&db_path).context("failed to open user store")?,
    ));
    let settings = Arc::new(
        SettingsHandle::load(SettingsStore::open(&db_path).context("failed to open settings store")?)
            .context("failed to load settings")?,
    );

    // Settings override wins, then GEMINI_API_KEY / the config file.
    let api_key = settings
        .current()
        .gemini_api_key
        .or_else(|| config.llm.api_key.clone())
        .unwrap_or_default();
    if api_key.is_empty() {
        warn!("no Gemini API key configured; replies will fall back to the apology message");
    }

    let provider = Arc::new(
        GeminiProvider::new(api_key, config.llm.model.clone())
            .with_timeout(Duration::from_secs(config.llm.timeout_secs)),
    );
    let engine = Arc::new(
        ChatEngine::new(Arc::clone(&history), Arc::clone(&settings), provider)
            .with_llm_timeout(Duration::from_secs(config.llm.timeout_secs)),
    );

    let whatsapp = Arc::new(Mutex::new(WhatsAppWebChannel::new(whatsapp_on_message(
        Arc::clone(&engine),
        Arc::clone(&settings),
    ))));

    if config.whatsapp.autostart {
        let mut channel = whatsapp.lock().await;
        if let Err(e) = channel.connect().await {
            error!("whatsapp autostart failed: {e}");
        }
    }

    let state = AppState::new(history, users, settings, engine, Arc::clone(&whatsapp));
    let router = build_router(state);

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("charla gateway listening on http://{addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server error")?;

    // Leave the WhatsApp session cleanly so the sidecar can persist state.
    let mut channel = whatsapp.lock().await;
    if channel.status().is_ready() {
        if let Err(e) = channel.disconnect().await {
            warn!("whatsapp disconnect on shutdown failed: {e}");
        }
    }

    info!("charla stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
}
