//! The bounded multi-producer, single-consumer queue feeding the engine.
//!
//! Collaborators use [`BusSender::send`], which waits for room. The tick
//! producer uses [`TickSender::tick`], which never waits: when the queue is
//! full the pulse is dropped and counted, and the engine catches up on the
//! sleep calendar at the next tick it does receive.

use crate::events::Message;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{trace, warn};

/// Creates a bus holding at most `capacity` pending messages.
pub fn message_bus(capacity: usize) -> (BusSender, BusReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BusSender { tx }, BusReceiver { rx })
}

/// The ordinary producer side. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BusSender {
    tx: mpsc::Sender<Message>,
}

impl BusSender {
    /// Enqueues `message`, waiting while the bus is full.
    ///
    /// Returns false only if the engine is gone.
    pub async fn send(&self, message: Message) -> bool {
        self.tx.send(message).await.is_ok()
    }

    /// Enqueues `message` if there is room right now.
    ///
    /// Used by the engine to post follow-up work to itself, where waiting on
    /// its own queue would deadlock.
    pub fn try_send(&self, message: Message) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!("Message bus full, dropping {} message.", message.kind());
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Creates the non-blocking producer used by the tick interrupt.
    pub fn tick_sender(&self) -> TickSender {
        TickSender {
            tx: self.tx.clone(),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Free slots left in the queue.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// The interrupt-side producer: enqueues ticks without ever waiting.
#[derive(Debug, Clone)]
pub struct TickSender {
    tx: mpsc::Sender<Message>,
    dropped: Arc<AtomicU64>,
}

impl TickSender {
    /// Enqueues one tick, or drops it if the bus is full.
    pub fn tick(&self) -> bool {
        match self.tx.try_send(Message::Tick) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                trace!("Bus full, tick dropped ({} so far).", dropped);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Ticks dropped so far because the bus was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Outcome of waiting on the bus.
#[derive(Debug)]
pub enum Received {
    Message(Message),
    /// Nothing arrived within the idle timeout.
    Idle,
    /// Every producer is gone.
    Closed,
}

/// The single consumer side, owned by the engine task.
#[derive(Debug)]
pub struct BusReceiver {
    rx: mpsc::Receiver<Message>,
}

impl BusReceiver {
    /// Waits for the next message for at most `idle_timeout`.
    pub async fn recv_timeout(&mut self, idle_timeout: Duration) -> Received {
        match tokio::time::timeout(idle_timeout, self.rx.recv()).await {
            Ok(Some(message)) => Received::Message(message),
            Ok(None) => Received::Closed,
            Err(_) => Received::Idle,
        }
    }

    /// Takes the next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}
