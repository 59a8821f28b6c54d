use anyhow::{Context, Result};
use nixieclock::prelude::*;
use nixieclock::{ENGINE_NAME, VERSION};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // 2. Load the runtime settings.
    let settings_path = std::env::var_os("NIXIE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("nixie.toml"));
    let settings = Settings::load(Some(settings_path.as_path()))
        .with_context(|| format!("loading settings from {}", settings_path.display()))?;
    info!("{} v{} starting up...", ENGINE_NAME, VERSION);

    // 3. Wire the bus, the store and the host collaborators.
    let (bus, inbox) = message_bus(settings.queue_capacity);
    let store = shared_store(FileStore::new(&settings.store_dir));
    let notifier = PersistenceNotifier::new();
    let rtc = if settings.rtc_unset {
        SimulatedRtc::unset()
    } else {
        SimulatedRtc::from_system_clock()
    };
    let collaborators = Collaborators {
        rtc: Box::new(rtc),
        time_service: Box::new(TzTimeService::new(bus.clone(), settings.service_latency())),
        display: Box::new(ConsoleDisplay::new()),
    };

    // 4. Boot the engine.
    let engine = ClockEngine::boot(&settings, collaborators, &store, bus.clone(), notifier.clone())
        .await
        .context("booting the clock engine")?;
    let clock = engine.clock_handle();

    // 5. Run every task until Ctrl+C.
    run(settings, engine, inbox, bus, store, notifier, clock).await
}

async fn run(
    settings: Settings,
    engine: ClockEngine,
    inbox: BusReceiver,
    bus: BusSender,
    store: SharedStore,
    notifier: PersistenceNotifier,
    clock: ClockHandle,
) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel(1);

    spawn_event_listener(&clock);

    let worker = PersistenceWorker::new(
        notifier,
        clock.watch_status(),
        store,
        settings.store_lock_timeout(),
    );
    tokio::spawn(worker.run(shutdown_tx.subscribe()));

    let pulses = PulseGenerator::new(settings.tick_period(), bus.tick_sender());
    tokio::spawn(pulses.run(shutdown_tx.subscribe()));

    let engine_task = tokio::spawn(engine.run(inbox, shutdown_tx.subscribe()));

    // The host is online from the start.
    bus.send(Message::NetworkConnected).await;

    info!("Clock running. Press Ctrl+C to shut down.");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Broadcasting to all tasks...");
    if shutdown_tx.send(()).is_err() {
        error!("Failed to send shutdown signal. Some tasks may not terminate gracefully.");
    }
    engine_task.await.context("joining the engine task")?;
    if let Err(e) = clock.save_config().await {
        error!("Final config save failed: {}", e);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    info!("{} has shut down.", ENGINE_NAME);
    Ok(())
}

/// Logs every notable engine event.
fn spawn_event_listener(clock: &ClockHandle) {
    let mut events = clock.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!("[CLOCK] => {:?}", event);
        }
    });
}
