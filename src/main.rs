//! vmview - QEMU D-Bus display listener
//!
//! Attaches to a running VM's `-display dbus` export, registers a private
//! display listener on one console and republishes every scanout and update
//! as a ready-to-present frame.

mod config;
mod dbus;
mod fps;
mod sink;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{BUS_ADDRESS_ENV, Config};
use dbus::VmConnection;
use dbus::listener::{self, BoxedSink};
use sink::StatsSink;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "vmview=debug,vmview_frame=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting vmview");

    let config = Config::load().context("Failed to load configuration")?;

    let address = config
        .connection
        .resolve_bus_address(std::env::var(BUS_ADDRESS_ENV).ok());
    let vm = VmConnection::connect(address.as_deref())
        .await
        .context("Failed to connect to VM")?;

    info!("Connected to VM {:?} ({})", vm.name(), vm.uuid());
    info!(
        "  {} console(s), interfaces {:?}",
        vm.console_ids().len(),
        vm.interfaces()
    );

    let console = vm
        .console(config.connection.console)
        .await
        .context("Failed to open console")?;

    info!(
        "Console {}: {} display {:?}, {}x{}, interfaces {:?}",
        console.id(),
        console.kind(),
        console.label(),
        console.width(),
        console.height(),
        console.interfaces()
    );

    let sink: BoxedSink = Box::new(StatsSink::new(config.sink.stats_interval()));
    let dispatcher =
        listener::shared_dispatcher(sink, config.capabilities.to_capabilities());

    let listener_conn = console
        .register_listener(dispatcher.clone(), config.connection.registration_timeout())
        .await
        .with_context(|| format!("Failed to attach to console {}", console.id()))?;

    info!("Receiving display updates, press Ctrl-C to quit");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;

    info!("Shutting down");

    if let Err(e) = listener_conn.close().await {
        warn!("Failed to close listener connection: {}", e);
    }
    dispatcher.lock().await.disable();

    Ok(())
}
