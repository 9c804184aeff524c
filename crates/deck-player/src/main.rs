mod app;
mod display;
mod engine;
mod focus;
mod keys;
mod media;
mod mpv;
mod output;
mod queue;
mod source;
mod state;
#[cfg(test)]
mod testing;
mod theme;

use std::sync::Arc;

use clap::Parser;
use tokio::sync::{broadcast, mpsc};

use crate::engine::{PlayerEngine, PlayerEvent};
use crate::media::LogMediaSession;
use crate::mpv::MpvOutput;
use crate::output::OutputEvent;
use crate::source::DaemonClient;
use crate::state::PlayerBroadcast;

/// Terminal player for a deck daemon.
#[derive(Debug, Parser)]
#[command(name = "deck", version)]
struct Cli {
    /// Daemon base URL, e.g. http://127.0.0.1:8989
    #[arg(long)]
    daemon_url: Option<String>,
    /// Bearer token; falls back to DECK_TOKEN, then the config file.
    #[arg(long, env = "DECK_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// Initial mpv volume, 0.0 to 1.0.
    #[arg(long)]
    volume: Option<f32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = deck_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("player.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // RUST_LOG overrides; HTTP client internals stay quiet by default.
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("deck log: {}", log_path.display());
    tracing::info!("deck starting…");

    let config = deck_proto::config::Config::load().unwrap_or_default();
    let daemon_url = cli.daemon_url.unwrap_or(config.player.daemon_url);
    let token = cli.token.unwrap_or(config.player.token);
    let volume = cli.volume.unwrap_or(config.player.default_volume).clamp(0.0, 1.0);
    tracing::info!("daemon: {}", daemon_url);

    let http = reqwest::Client::builder()
        .user_agent(concat!("deck/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let library = Arc::new(DaemonClient::new(http, &daemon_url, &token));

    // ── Channels ─────────────────────────────────────────────────────────────
    let (broadcast_tx, broadcast_rx) = broadcast::channel::<PlayerBroadcast>(1024);
    let (event_tx, event_rx) = mpsc::channel::<PlayerEvent>(1024);
    let (output_tx, mut output_rx) = mpsc::channel::<OutputEvent>(256);

    // mpv events feed the engine loop.
    let forward_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(evt) = output_rx.recv().await {
            if forward_tx.send(PlayerEvent::Output(evt)).await.is_err() {
                break;
            }
        }
    });

    let output = Arc::new(MpvOutput::new(volume, Some(library.auth_header()), output_tx));
    let media = Arc::new(LogMediaSession::new());

    let engine = PlayerEngine::new(
        library.clone(),
        output.clone(),
        media.clone(),
        broadcast_tx,
        event_tx,
    );
    let player = engine.handle();
    let state_manager = engine.state_manager();

    let engine_task = tokio::spawn(async move {
        if let Err(e) = engine.run(event_rx).await {
            tracing::error!("PlayerEngine exited with error: {}", e);
        }
    });

    let app = app::App::new(library, player.clone(), media, state_manager);
    let result = app.run(broadcast_rx).await;

    player.shutdown().await;
    let _ = engine_task.await;
    output.shutdown().await;
    tracing::info!("deck stopped");

    result
}
