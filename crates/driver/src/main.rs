//! usb-lifecycle
//!
//! Hot-plug USB device lifecycle driver. Binds to devices matching its id
//! table, exposes them as device nodes and keeps each device alive until the
//! transport has detached it and every open session has closed.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use driver::config::{self, DriverConfig};
use driver::replay::{Replay, parse_script};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "usb-lifecycle")]
#[command(author, version, about = "USB device lifecycle driver")]
#[command(long_about = "
Tracks hot-plugged USB devices from attach to final release.

EXAMPLES:
    # Run against libusb hot-plug (requires the `libusb` feature)
    usb-lifecycle

    # Replay a recorded attach/open/detach/close sequence
    usb-lifecycle --replay session.txt

    # Show the devices the driver binds to
    usb-lifecycle --list-id-table

CONFIGURATION:
    The driver looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-lifecycle/driver.toml
    3. /etc/usb-lifecycle/driver.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Print the id table and exit
    #[arg(long)]
    list_id_table: bool,

    /// Replay a transport/client script instead of watching the bus
    #[arg(long, value_name = "SCRIPT")]
    replay: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = DriverConfig::default();
        let path = DriverConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::load_config(path).context("Failed to load configuration")?
    } else {
        DriverConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.driver.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("{} v{}", config.driver.name, env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    if args.list_id_table {
        list_id_table(&config);
        return Ok(());
    }

    if let Some(script) = args.replay {
        return replay_mode(&config, &script);
    }

    run_service(config).await
}

fn list_id_table(config: &DriverConfig) {
    let entries = &config.devices.id_table;
    if entries.is_empty() {
        println!("Id table is empty: binding to every device.");
        return;
    }

    println!("Binding to {} device pattern(s):\n", entries.len());
    for entry in entries {
        println!("  {}", entry);
    }
}

fn replay_mode(config: &DriverConfig, script: &Path) -> Result<()> {
    let text = std::fs::read_to_string(script)
        .with_context(|| format!("Failed to read replay script: {}", script.display()))?;
    let steps = parse_script(&text)
        .with_context(|| format!("Invalid replay script: {}", script.display()))?;

    info!("Replaying {} step(s) from {}", steps.len(), script.display());
    let mut replay = Replay::new(config);
    for line in replay.run(&steps) {
        println!("{}", line);
    }

    let remaining = replay.controller().list_devices();
    if !remaining.is_empty() {
        println!("\n{} device(s) still registered:", remaining.len());
        for status in remaining {
            println!(
                "  {} /dev/{} {:?} refs={}",
                status.id, status.node_name, status.state, status.refcount
            );
        }
    }
    Ok(())
}

#[cfg(feature = "libusb")]
async fn run_service(config: DriverConfig) -> Result<()> {
    use common::{create_event_channel, create_transport_bridge};
    use driver::LifecycleController;
    use driver::usb::hotplug::start_hotplug;
    use driver::usb::{
        BusNotifier, EventApplier, LoggingObserver, TransportDispatcher, spawn_dispatcher,
    };
    use std::sync::Arc;
    use tracing::error;

    info!("Starting driver in service mode");

    let (publisher, events) = create_event_channel(config.events.capacity);
    let controller = Arc::new(LifecycleController::from_config(&config).with_events(publisher));

    let notifier = Arc::new(BusNotifier::new());
    notifier.register(Arc::new(LoggingObserver));

    let (sender, receiver) = create_transport_bridge(config.events.capacity);
    let applier = EventApplier::new(Arc::clone(&controller), notifier);
    let dispatch_handle = spawn_dispatcher(TransportDispatcher::new(applier, receiver))
        .context("Failed to spawn transport dispatcher")?;

    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!("Device event: {:?}", event);
        }
    });

    let pump = start_hotplug(sender.clone()).context("Failed to start hot-plug source")?;

    info!("Press Ctrl+C to shutdown");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
    }

    pump.stop();
    if let Err(e) = sender.shutdown() {
        error!("Error shutting down transport bridge: {:#}", e);
    }
    drop(sender);

    match dispatch_handle.join() {
        Ok(stats) => info!("Dispatch totals: {:?}", stats),
        Err(e) => error!("Transport dispatcher panicked: {:?}", e),
    }

    let detached = controller.detach_all();
    info!(
        "Detached {} remaining device(s), {} destroyed in total",
        detached,
        controller.destroyed_count()
    );

    // Dropping the controller closes the event channel.
    drop(controller);
    if let Err(e) = event_task.await {
        error!("Event logger task failed: {}", e);
    }

    info!("Driver shutdown complete");
    Ok(())
}

#[cfg(not(feature = "libusb"))]
async fn run_service(_config: DriverConfig) -> Result<()> {
    anyhow::bail!(
        "Built without the `libusb` feature; rebuild with `--features libusb` or use --replay"
    )
}
