use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use miraie_ha_bridge::bridge::BridgeHandle;
use miraie_ha_bridge::config::AppConfig;
use miraie_ha_bridge::discovery::ClimateDiscovery;
use miraie_ha_bridge::mqtt::RumqttTransport;
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Expose MirAIe air conditioners to Home Assistant over MQTT"
)]
struct Args {
    /// Path to the config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup(args.log_level)?;

    let config_path = match args.config {
        Some(path) => path,
        None => AppConfig::default_path()?,
    };
    AppConfig::ensure_default_config(&config_path).await?;
    let config = AppConfig::load(&config_path).await?;

    let devices = config.devices();
    if devices.is_empty() {
        warn!(
            "No devices configured in {}, only the broker session will be opened",
            config_path.display()
        );
    }

    let (bridge, mut commands) = BridgeHandle::spawn(
        devices.clone(),
        Box::new(RumqttTransport::new()),
        Box::new(ClimateDiscovery::new(config.discovery.prefix.clone())),
        &config.broker,
    )
    .map_err(|e| eyre!("Failed to start bridge: {}", e))?;

    // Queued until the broker accepts the session, then published after discovery
    for device in &devices {
        bridge.publish_connection_status(device.clone()).await?;
        bridge.publish_state(device.clone()).await?;
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => info!("Command {}", command),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        }
    }

    for device in &devices {
        let mut offline = device.clone();
        offline.status.set_online(false);
        bridge.publish_connection_status(offline).await?;
    }
    bridge.shutdown().await?;

    Ok(())
}

fn setup(level: Level) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env(level);
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
