mod command;
mod config;
mod connection;
mod transport;

use clap::Parser;
use command::{HandshakeQueue, ReportLanes, RouteMonitor, TelegramMatcher};
use config::GatewayConfig;
use connection::{Channel, ConnectionConfig, ConnectionEvent, ConnectionManager};
use std::path::PathBuf;
use std::sync::Arc;
use transport::{DeviceRegistry, TelegramSender, UdpTelegramSender};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// AGV telegram gateway
#[derive(Debug, Parser)]
#[command(name = "agv-gateway", version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .init();

    let conn_config = ConnectionConfig {
        bind: config.bind,
        dispatch_bind: config.dispatch_bind,
        ..Default::default()
    };
    let mut conn = ConnectionManager::bind(&conn_config).await?;
    info!("Gateway listening for vehicles on {}", conn.local_addr()?);
    if let Some(addr) = config.dispatch_bind {
        info!("  Dispatch socket: {}", addr);
    }

    let registry = Arc::new(DeviceRegistry::new(&config.devices, config.broadcast));
    let sender = Arc::new(UdpTelegramSender::new(conn.vehicle_socket(), registry.clone()));
    info!(
        "Telegram sender: {} ({} static device addresses)",
        sender.name(),
        registry.count()
    );
    let handshake = Arc::new(HandshakeQueue::with_capacity(config.handshake_capacity));
    let matcher = Arc::new(
        TelegramMatcher::new(config.matcher.clone(), sender).with_handshake_tracker(handshake.clone()),
    );
    info!(
        "Telegram matcher ready: control devices {:?}, handshake listener {}",
        matcher.config().control_devices,
        matcher.is_handshake_listener()
    );

    if let Some(period) = config.monitor_interval() {
        let monitor = RouteMonitor::new(matcher.clone(), period).with_handshake_queue(handshake.clone());
        tokio::spawn(async move {
            monitor.run().await;
        });
        info!("Route monitor started ({}s)", period.as_secs());
    }

    let mut lanes = ReportLanes::new(matcher.clone(), handshake.clone());

    // Main event loop
    let result = loop {
        match conn.recv().await {
            Some(ConnectionEvent::Received { telegram, from }) => {
                registry.learn(&telegram.device_id, from);
                lanes.submit(telegram).await;
            }
            Some(ConnectionEvent::Dispatch(telegram)) => {
                // Awaited in place so dispatches keep their arrival order
                if let Err(e) = matcher.enqueue_request_telegram(telegram).await {
                    error!("Failed to dispatch telegram: {}", e);
                }
            }
            Some(ConnectionEvent::DecodeFailed { channel, from, reason }) => {
                warn!("Dropped {} datagram from {}: {}", channel, from, reason);
            }
            Some(ConnectionEvent::Closed {
                channel: Channel::Vehicle,
                reason,
            }) => {
                break Err(anyhow::anyhow!("vehicle socket closed: {}", reason));
            }
            Some(ConnectionEvent::Closed { channel, reason }) => {
                error!("{} socket closed: {}", channel, reason);
            }
            None => {
                error!("Connection manager closed");
                break Ok(());
            }
        }
    };

    lanes.shutdown().await;
    result
}
