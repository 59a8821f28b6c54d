//! # Nixie Clock
//!
//! The timekeeping core of a network-synchronized nixie tube clock.
//!
//! A single [`ClockEngine`](engine::ClockEngine) owns the wall clock, the
//! timezone, the upcoming UTC offset transitions and the display's sleep
//! calendar. Everything else talks to it through a bounded message bus.
//!
//! ## Core Concepts
//!
//! - **MessageBus**: A bounded queue feeding the engine. The RTC's 1 Hz pulse
//!   enqueues ticks without ever waiting and drops them when the queue is full;
//!   network responses and UI updates use the ordinary path.
//! - **Engine**: A single-step state machine. It advances the clock on each
//!   tick, applies DST transitions when they fall due, and switches the
//!   display on and off following the user's quiet hours.
//! - **Time service**: An asynchronous collaborator answering time and
//!   transitions requests. Corrections smaller than the drift threshold are
//!   ignored so network jitter never shows on the tubes.
//! - **Persistence**: Configuration changes are saved by a low-priority
//!   worker, never on the tick path, through a store lock with a bounded wait.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use nixieclock::prelude::*;
//! use std::time::Duration;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::default();
//!     let (bus, inbox) = message_bus(settings.queue_capacity);
//!     let store = shared_store(MemoryStore::new());
//!     let notifier = PersistenceNotifier::new();
//!
//!     let collaborators = Collaborators {
//!         rtc: Box::new(SimulatedRtc::from_system_clock()),
//!         time_service: Box::new(TzTimeService::new(bus.clone(), Duration::from_millis(100))),
//!         display: Box::new(ConsoleDisplay::new()),
//!     };
//!     let engine = ClockEngine::boot(&settings, collaborators, &store, bus.clone(), notifier).await?;
//!     let clock = engine.clock_handle();
//!
//!     let (shutdown_tx, _) = broadcast::channel(1);
//!     tokio::spawn(engine.run(inbox, shutdown_tx.subscribe()));
//!     bus.send(Message::TimezoneOverride("Europe/Paris".into())).await;
//!
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//!     println!("{:?}", clock.status());
//!     shutdown_tx.send(()).ok();
//!     Ok(())
//! }
//! ```

pub const ENGINE_NAME: &str = "Nixie Clock";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod bus;
pub mod common;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod hardware;
pub mod persistence;
pub mod service;
pub mod settings;
pub mod time;

/// A prelude module for easy importing of the most common clock types.
pub mod prelude {
    pub use crate::bus::{message_bus, BusReceiver, BusSender, TickSender};
    pub use crate::config::{ClockConfig, SleepRule, SleepSchedule, Timezone};
    pub use crate::engine::{ClockEngine, ClockHandle, Collaborators};
    pub use crate::error::{BootError, HardwareError, PersistenceError, ServiceError, StoreError};
    pub use crate::events::{ClockEvent, ClockStatus, Message, SleepAction, SleepEvent};
    pub use crate::hardware::{ConsoleDisplay, DisplayDriver, HardwareClock, SimulatedRtc};
    pub use crate::persistence::{
        shared_store, ConfigStore, FileStore, MemoryStore, PersistenceNotifier, PersistenceWorker,
        SharedStore,
    };
    pub use crate::service::{TimeService, TzTimeService};
    pub use crate::settings::Settings;
    pub use crate::time::PulseGenerator;
}
