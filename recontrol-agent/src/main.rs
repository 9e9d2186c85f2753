//! recontrol agent entry point.
//!
//! ```text
//! recontrol-agent                  Run in the foreground
//! recontrol-agent --config <path>  Load a custom config TOML
//! recontrol-agent --gen-config     Write the default config to stdout
//! ```
//!
//! Credentials come from the environment: `RECONTROL_USER_ID`,
//! `RECONTROL_DEVICE_ID`, `RECONTROL_ACCESS_TOKEN`,
//! `RECONTROL_REFRESH_TOKEN`. Long-lived credential storage is handled by
//! the installer, not here.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use recontrol_core::auth::{Credentials, HttpRefreshApi, TokenAuthority};
use recontrol_core::capture::{BatchQueue, CaptureEngine, ZstdRegionEncoder};
use recontrol_core::commands::{Capabilities, build_router};
use recontrol_core::diag::EventLog;
use recontrol_core::session::SessionTransport;

use recontrol_agent::config::AgentConfig;
use recontrol_agent::system::{
    LogKeyInjector, LogMouseInjector, ShellRunner, SyntheticCapture, SystemPower,
};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "recontrol-agent", about = "recontrol remote-control agent")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "recontrol-agent.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

fn credentials_from_env() -> Credentials {
    let var = |name: &str| std::env::var(name).unwrap_or_default();
    Credentials {
        user_id: var("RECONTROL_USER_ID"),
        device_id: var("RECONTROL_DEVICE_ID"),
        access_token: var("RECONTROL_ACCESS_TOKEN"),
        refresh_token: var("RECONTROL_REFRESH_TOKEN"),
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&AgentConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = AgentConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("recontrol-agent v{}", env!("CARGO_PKG_VERSION"));
    info!("server: {}", config.server.ws_url);
    info!("capture interval: {}ms", config.screen.interval_ms);

    let authority = Arc::new(TokenAuthority::new(
        credentials_from_env(),
        Box::new(HttpRefreshApi::new(&config.server.api_base)),
    ));

    let engine = Arc::new(CaptureEngine::new(
        Box::new(SyntheticCapture::new(1280, 720)),
        Arc::new(ZstdRegionEncoder),
    ));
    let queue = Arc::new(BatchQueue::new(config.screen.queue_depth.max(1)));

    let caps = Capabilities {
        keys: Arc::new(LogKeyInjector),
        mouse: Arc::new(LogMouseInjector),
        processes: Arc::new(ShellRunner::new()),
        power: Arc::new(SystemPower),
    };
    let router = build_router(
        caps,
        Arc::clone(&engine),
        Arc::clone(&queue),
        config.to_capture_config(),
    );

    let events = Arc::new(EventLog::default());
    let transport = SessionTransport::new(
        config.to_transport_config(),
        authority,
        Arc::new(router),
        Arc::clone(&events),
    );

    transport.connect().await?;
    transport.spawn_batch_pump(queue);

    tokio::signal::ctrl_c().await.ok();
    info!("Ctrl-C received, shutting down");

    engine.stop().await;
    transport.shutdown();

    for line in events.snapshot().iter().rev().take(10) {
        info!("recent event: {line}");
    }

    Ok(())
}
