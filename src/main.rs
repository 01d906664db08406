mod config;
mod dispatcher;
mod epd_client;
mod error;
mod fsm;
mod reassembler;
mod ring_buffer;
mod session;
mod stats;
mod stt_client;
mod transport;
mod types;
mod wav;

use std::sync::Arc;

use clap::Parser;
use config::Config;
use dispatcher::{BatchDispatcher, DispatcherCommand};
use session::SessionManager;
use stats::Stats;
use stt_client::SttClient;
use tokio::sync::mpsc;
use tracing::info;
use transport::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();

    let config = Config::parse();
    config.validate()?;
    let config = Arc::new(config);

    info!(
        listen = config.listen_addr(),
        env = %config.env,
        ws_url = %config.ws_url,
        speech_api_batch_url = %config.speech_api_batch_url,
        channel_cap = config.channel_capacity,
        "stt-gateway starting"
    );

    let stats = Stats::new();

    tokio::fs::create_dir_all(&config.temp_dir).await.ok();
    tokio::fs::create_dir_all(&config.wav_dir).await.ok();
    tokio::fs::create_dir_all(&config.result_dir).await.ok();

    // Stats reporter
    {
        let stats = stats.clone();
        let interval = config.stats_interval_secs;
        tokio::spawn(async move {
            stats::stats_reporter(stats, interval).await;
        });
    }

    // Persistent duplex bridge to the EPD engine.
    let (epd_client, epd_events) = epd_client::spawn(config.clone(), stats.clone());

    // Global STT work queue: session FSMs -> batch dispatcher.
    let (work_tx, work_rx) = mpsc::channel(config.channel_capacity);
    // Control channel: sessions -> dispatcher, for TURN_END's session-specific flush.
    let (dispatcher_cmd_tx, dispatcher_cmd_rx) = mpsc::channel::<DispatcherCommand>(config.channel_capacity);

    let sessions = Arc::new(SessionManager::new(
        config.clone(),
        stats.clone(),
        epd_client,
        work_tx,
        dispatcher_cmd_tx,
    ));
    session::spawn_epd_router(sessions.registry(), epd_events);

    let stt_client = SttClient::new(&config);
    let dispatcher = BatchDispatcher::new(config.clone(), stats.clone(), stt_client, sessions.registry());
    dispatcher.spawn(work_rx, dispatcher_cmd_rx);

    let app_state = AppState { config: config.clone(), stats: stats.clone(), sessions };
    let gateway_handle = transport::start_gateway_server(&config, app_state).await?;

    info!("all systems go — accepting client connections");
    gateway_handle.await?;

    Ok(())
}
