//! The clock engine: the single owner of the wall clock and device config.

use crate::bus::{BusReceiver, BusSender, Received};
use crate::common::{FIRST_VALID_YEAR, SECONDS_PER_DAY};
use crate::components::event_list::OrderedEventList;
use crate::components::schedule;
use crate::components::transitions::TransitionTable;
use crate::config::{ClockConfig, SleepSchedule};
use crate::error::{BootError, PersistenceError};
use crate::events::{ClockEvent, ClockStatus, Message, SleepAction, SleepEvent};
use crate::hardware::{DisplayDriver, HardwareClock};
use crate::persistence::{self, load_or_create, PersistenceNotifier, SharedStore};
use crate::service::{parse_time_response, parse_transitions_response, TimeService};
use crate::settings::Settings;
use crate::time::{from_datetime, is_valid_timestamp, to_datetime};
use chrono::Datelike;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, trace, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The peripherals and network client the engine drives.
pub struct Collaborators {
    pub rtc: Box<dyn HardwareClock>,
    pub time_service: Box<dyn TimeService>,
    pub display: Box<dyn DisplayDriver>,
}

/// The clock's state machine.
///
/// The engine is built once at boot and then moved into its own task, where
/// it consumes the `MessageBus` one message at a time. Nothing else mutates
/// the wall clock, the timezone, the transitions table or the sleep
/// calendar. Other tasks observe the engine through a [`ClockHandle`].
pub struct ClockEngine {
    utc_seconds: i64,
    time_set: bool,
    awake: bool,
    config: ClockConfig,
    published_config: Arc<ClockConfig>,
    transitions: TransitionTable,
    sleep_events: OrderedEventList<SleepEvent>,
    /// When to ask for fresh transitions. `None` until the first refresh.
    next_transitions_check: Option<i64>,

    drift_threshold: i64,
    recheck_interval: i64,
    idle_timeout: Duration,
    lock_timeout: Duration,

    rtc: Box<dyn HardwareClock>,
    time_service: Box<dyn TimeService>,
    display: Box<dyn DisplayDriver>,

    bus: BusSender,
    notifier: PersistenceNotifier,
    store: SharedStore,
    status_tx: watch::Sender<ClockStatus>,
    event_tx: broadcast::Sender<ClockEvent>,
}

impl ClockEngine {
    /// Brings the clock up: starts the RTC square wave, reads the RTC, loads
    /// the device config and builds the first sleep calendar.
    ///
    /// A clock that reads before 1971 lost its time; it stays unset (and
    /// ignores ticks) until the network supplies the time.
    pub async fn boot(
        settings: &Settings,
        collaborators: Collaborators,
        store: &SharedStore,
        bus: BusSender,
        notifier: PersistenceNotifier,
    ) -> Result<Self, BootError> {
        let Collaborators {
            mut rtc,
            time_service,
            display,
        } = collaborators;

        rtc.enable_periodic_signal()?;
        let rtc_time = rtc.get_time()?;
        info!("The current RTC time is {}.", rtc_time);
        let (utc_seconds, time_set) = if rtc_time.year() < FIRST_VALID_YEAR {
            warn!("RTC time is not set, waiting for the network.");
            (1, false)
        } else {
            (from_datetime(rtc_time), true)
        };

        let config = load_or_create(store).await?;
        let published_config = Arc::new(config.clone());
        let (status_tx, _) = watch::channel(ClockStatus {
            utc_seconds,
            local_seconds: utc_seconds + config.timezone.offset_seconds as i64,
            time_set,
            awake: true,
            config: Arc::clone(&published_config),
        });
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let mut engine = Self {
            utc_seconds,
            time_set,
            awake: true,
            config,
            published_config,
            transitions: TransitionTable::new(),
            sleep_events: OrderedEventList::new(),
            next_transitions_check: None,
            drift_threshold: settings.drift_threshold_secs,
            recheck_interval: settings.transitions_recheck_secs,
            idle_timeout: settings.idle_timeout(),
            lock_timeout: settings.store_lock_timeout(),
            rtc,
            time_service,
            display,
            bus,
            notifier,
            store: Arc::clone(store),
            status_tx,
            event_tx,
        };
        engine.rebuild_sleep_events();
        Ok(engine)
    }

    /// Consumes the bus until it closes or a shutdown signal is received.
    pub async fn run(mut self, mut inbox: BusReceiver, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Clock engine running.");
        let idle_timeout = self.idle_timeout;
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                received = inbox.recv_timeout(idle_timeout) => match received {
                    Received::Message(message) => self.handle(message),
                    Received::Idle => trace!("No message for {:?}.", idle_timeout),
                    Received::Closed => {
                        warn!("Message bus closed.");
                        break;
                    }
                },
            }
        }
        info!("Clock engine stopped.");
    }

    /// Processes one message, then publishes the new status.
    pub fn handle(&mut self, message: Message) {
        match message {
            Message::Tick => self.tick(),
            Message::NetworkConnected => {
                info!("Network up, requesting the time for {}.", self.config.timezone.name());
                self.time_service.request_time(self.config.timezone.name());
            }
            Message::NetworkDisconnected => debug!("Network down."),
            Message::TimeApiResponse(Ok(payload)) => self.on_time_response(&payload),
            Message::TimeApiResponse(Err(e)) => warn!("Time request failed: {}", e),
            Message::TransitionsApiResponse(Ok(payload)) => self.on_transitions_response(&payload),
            Message::TransitionsApiResponse(Err(e)) => warn!("Transitions request failed: {}", e),
            Message::RequestTransitions => self.request_transitions(),
            Message::SleepScheduleUpdate(schedule) => self.update_sleep_schedule(*schedule),
            Message::TimezoneOverride(name) => {
                info!("Timezone override to {}, asking the time service.", name);
                self.time_service.request_time(&name);
            }
            Message::Unknown { tag } => warn!("Ignoring unknown message tag {}.", tag),
        }
        self.publish();
    }

    /// Applies a network time if it is more than the drift threshold away
    /// from the wall clock. Returns true if the clock moved.
    ///
    /// A failed RTC write is logged; the in-memory clock is corrected anyway.
    /// Times the clock cannot represent are refused.
    pub fn realign(&mut self, new_t: i64) -> bool {
        if !is_valid_timestamp(new_t) {
            warn!("Ignoring out-of-range network time {}.", new_t);
            return false;
        }
        let drift = new_t.abs_diff(self.utc_seconds);
        if drift <= self.drift_threshold.unsigned_abs() {
            debug!("Network time within {}s of the clock, keeping it.", drift);
            return false;
        }

        let from = self.utc_seconds;
        info!("Realigning the clock by {}s.", new_t - from);
        self.utc_seconds = new_t;
        self.time_set = true;
        match to_datetime(new_t) {
            Some(datetime) => {
                if let Err(e) = self.rtc.set_time(datetime) {
                    error!("Could not write the RTC: {}", e);
                }
            }
            None => error!("Timestamp {} is out of the RTC's range.", new_t),
        }
        self.emit(ClockEvent::Realigned { from, to: new_t });
        // The calendar was built around the old time.
        self.rebuild_sleep_events();
        true
    }

    /// A handle for other tasks to observe the engine.
    pub fn clock_handle(&self) -> ClockHandle {
        ClockHandle {
            status: self.status_tx.subscribe(),
            events: self.event_tx.clone(),
            store: Arc::clone(&self.store),
            lock_timeout: self.lock_timeout,
            bus: self.bus.clone(),
        }
    }

    pub fn utc_seconds(&self) -> i64 {
        self.utc_seconds
    }

    pub fn local_seconds(&self) -> i64 {
        self.utc_seconds + self.config.timezone.offset_seconds as i64
    }

    pub fn time_set(&self) -> bool {
        self.time_set
    }

    pub fn is_awake(&self) -> bool {
        self.awake
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn transitions(&self) -> &TransitionTable {
        &self.transitions
    }

    pub fn sleep_events(&self) -> &OrderedEventList<SleepEvent> {
        &self.sleep_events
    }

    pub fn next_transitions_check(&self) -> Option<i64> {
        self.next_transitions_check
    }
}

// Message handlers.
impl ClockEngine {
    fn tick(&mut self) {
        if !self.time_set {
            trace!("Clock not set, tick ignored.");
            return;
        }
        self.utc_seconds += 1;
        let now = self.utc_seconds;

        if let Some(offset) = self.transitions.apply_due(now) {
            let from = self.config.timezone.offset_seconds;
            if offset != from {
                info!("UTC offset changes from {} to {}.", from, offset);
                // The table will soon need refilling.
                self.next_transitions_check = Some(now + self.recheck_interval);
                self.config.timezone.offset_seconds = offset;
                self.emit(ClockEvent::OffsetChanged { from, to: offset });
                self.config_changed();
            }
        }

        if self.next_transitions_check.is_some_and(|check| now >= check) {
            self.next_transitions_check = Some(now + self.recheck_interval);
            self.bus.try_send(Message::RequestTransitions);
        }

        let local_now = self.local_seconds();
        let mut last_action = None;
        while self.sleep_events.peek().is_some_and(|event| event.at <= local_now) {
            last_action = self.sleep_events.pop_front().map(|event| event.action);
        }
        if let Some(action) = last_action {
            self.apply_sleep_action(action);
            if self.sleep_events.is_empty() {
                self.rebuild_sleep_events();
            }
        }

        match to_datetime(local_now) {
            Some(datetime) => {
                trace!("Tick, local time is {}.", datetime);
                self.display.write_time(datetime);
            }
            None => error!("Local time {} cannot be displayed.", local_now),
        }
    }

    fn on_time_response(&mut self, payload: &Value) {
        let update = parse_time_response(payload);

        if let Some(timestamp) = update.timestamp {
            self.realign(timestamp);
            self.time_set = true;
        }

        let mut timezone = self.config.timezone.clone();
        if let Some(name) = &update.zone_name {
            timezone.set_name(name);
        }
        if let Some(offset) = update.zone_offset {
            timezone.offset_seconds = offset;
        }
        if timezone != self.config.timezone {
            if timezone.name() != self.config.timezone.name() {
                // Upcoming transitions belong to the previous zone.
                self.transitions.clear();
            }
            info!(
                "Timezone set to {} (UTC{:+}s).",
                timezone.name(),
                timezone.offset_seconds
            );
            self.config.timezone = timezone.clone();
            self.emit(ClockEvent::TimezoneChanged(timezone));
            self.config_changed();
        }

        self.bus.try_send(Message::RequestTransitions);
    }

    fn on_transitions_response(&mut self, payload: &Value) {
        let entries = parse_transitions_response(payload);
        if entries.is_empty() {
            info!("No upcoming transitions, checking again later.");
            self.next_transitions_check = Some(self.utc_seconds + self.recheck_interval);
            return;
        }
        let count = self.transitions.load(entries);
        info!("Loaded {} upcoming transitions.", count);
        self.emit(ClockEvent::TransitionsLoaded { count });
    }

    fn request_transitions(&mut self) {
        if !self.time_set {
            debug!("Clock not set, transitions request skipped.");
            return;
        }
        let from = self.utc_seconds - SECONDS_PER_DAY;
        let to = self.utc_seconds + 365 * SECONDS_PER_DAY;
        self.time_service
            .request_transitions(&self.config.timezone, from, to);
    }

    fn update_sleep_schedule(&mut self, schedule: SleepSchedule) {
        self.sleep_events = self.build_sleep_events(&schedule);
        if schedule.to_bytes() != self.config.sleep_schedule.to_bytes() {
            info!("Sleep schedule updated.");
            self.config.sleep_schedule = schedule;
            self.config_changed();
        } else {
            debug!("Sleep schedule unchanged.");
        }
    }
}

// Internal helpers.
impl ClockEngine {
    fn apply_sleep_action(&mut self, action: SleepAction) {
        match action {
            SleepAction::Wake => {
                info!("Waking the display.");
                self.display.turn_on();
                self.awake = true;
            }
            SleepAction::Sleep => {
                info!("Putting the display to sleep.");
                self.display.turn_off();
                self.awake = false;
            }
        }
        self.emit(ClockEvent::SleepActionApplied(action));
    }

    fn rebuild_sleep_events(&mut self) {
        self.sleep_events = self.build_sleep_events(&self.config.sleep_schedule);
    }

    fn build_sleep_events(&self, schedule: &SleepSchedule) -> OrderedEventList<SleepEvent> {
        let events = schedule::build(
            schedule,
            self.utc_seconds,
            self.config.timezone.offset_seconds,
        );
        debug!("Sleep calendar rebuilt with {} events.", events.len());
        self.emit(ClockEvent::ScheduleRebuilt {
            events: events.len(),
        });
        events
    }

    /// Publishes the changed config, then wakes the persistence worker so it
    /// saves the new value.
    fn config_changed(&mut self) {
        self.published_config = Arc::new(self.config.clone());
        self.publish();
        self.notifier.notify();
    }

    fn publish(&self) {
        self.status_tx.send_replace(ClockStatus {
            utc_seconds: self.utc_seconds,
            local_seconds: self.local_seconds(),
            time_set: self.time_set,
            awake: self.awake,
            config: Arc::clone(&self.published_config),
        });
    }

    fn emit(&self, event: ClockEvent) {
        // Nobody listening is fine.
        self.event_tx.send(event).ok();
    }
}

/// A cloneable view of a running engine.
#[derive(Clone)]
pub struct ClockHandle {
    status: watch::Receiver<ClockStatus>,
    events: broadcast::Sender<ClockEvent>,
    store: SharedStore,
    lock_timeout: Duration,
    bus: BusSender,
}

impl ClockHandle {
    /// A consistent copy of the engine's state after its last message.
    pub fn status(&self) -> ClockStatus {
        self.status.borrow().clone()
    }

    /// A receiver notified whenever the status changes.
    pub fn watch_status(&self) -> watch::Receiver<ClockStatus> {
        self.status.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClockEvent> {
        self.events.subscribe()
    }

    /// The producer side of the engine's bus.
    pub fn sender(&self) -> BusSender {
        self.bus.clone()
    }

    /// Saves the current config right away, outside the persistence worker.
    pub async fn save_config(&self) -> Result<(), PersistenceError> {
        let config = Arc::clone(&self.status.borrow().config);
        persistence::save_config(&self.store, &config, self.lock_timeout).await?;
        info!("Clock config saved on request.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::message_bus;
    use crate::components::transitions::TransitionEntry;
    use crate::config::{SleepRule, Timezone};
    use crate::error::{HardwareError, ServiceError};
    use crate::persistence::{shared_store, ConfigStore, MemoryStore};
    use chrono::{NaiveDateTime, Weekday};
    use serde_json::json;
    use std::sync::Mutex;

    /// 2024-03-05 00:00:00 UTC, a Tuesday.
    const TUESDAY: i64 = 1_709_596_800;

    #[derive(Debug, Default)]
    struct Recorded {
        rtc_time: Option<NaiveDateTime>,
        rtc_writes: usize,
        time_requests: Vec<String>,
        transition_requests: Vec<(String, i64, i64)>,
        shown: Vec<NaiveDateTime>,
        display_on: Option<bool>,
    }

    type Shared = Arc<Mutex<Recorded>>;

    struct FakeRtc(Shared, bool);

    impl HardwareClock for FakeRtc {
        fn get_time(&mut self) -> Result<NaiveDateTime, HardwareError> {
            self.0
                .lock()
                .unwrap()
                .rtc_time
                .ok_or_else(|| HardwareError::Unreachable("no chip".into()))
        }
        fn set_time(&mut self, time: NaiveDateTime) -> Result<(), HardwareError> {
            let mut recorded = self.0.lock().unwrap();
            recorded.rtc_writes += 1;
            if self.1 {
                return Err(HardwareError::Unreachable("bus stuck".into()));
            }
            recorded.rtc_time = Some(time);
            Ok(())
        }
        fn enable_periodic_signal(&mut self) -> Result<(), HardwareError> {
            Ok(())
        }
    }

    struct FakeService(Shared);

    impl TimeService for FakeService {
        fn request_time(&mut self, tz_name: &str) {
            self.0.lock().unwrap().time_requests.push(tz_name.to_owned());
        }
        fn request_transitions(&mut self, tz: &Timezone, from: i64, to: i64) {
            self.0
                .lock()
                .unwrap()
                .transition_requests
                .push((tz.name().to_owned(), from, to));
        }
    }

    struct FakeDisplay(Shared);

    impl DisplayDriver for FakeDisplay {
        fn write_time(&mut self, local: NaiveDateTime) {
            self.0.lock().unwrap().shown.push(local);
        }
        fn turn_on(&mut self) {
            self.0.lock().unwrap().display_on = Some(true);
        }
        fn turn_off(&mut self) {
            self.0.lock().unwrap().display_on = Some(false);
        }
    }

    struct Rig {
        engine: ClockEngine,
        inbox: BusReceiver,
        recorded: Shared,
        notifier: PersistenceNotifier,
    }

    async fn boot_at(utc: i64, failing_rtc: bool) -> Rig {
        let recorded = Shared::default();
        recorded.lock().unwrap().rtc_time = to_datetime(utc);
        let (bus, inbox) = message_bus(10);
        let notifier = PersistenceNotifier::new();
        let store = shared_store(MemoryStore::new());
        let engine = ClockEngine::boot(
            &Settings::default(),
            Collaborators {
                rtc: Box::new(FakeRtc(recorded.clone(), failing_rtc)),
                time_service: Box::new(FakeService(recorded.clone())),
                display: Box::new(FakeDisplay(recorded.clone())),
            },
            &store,
            bus,
            notifier.clone(),
        )
        .await
        .unwrap();
        Rig {
            engine,
            inbox,
            recorded,
            notifier,
        }
    }

    #[tokio::test]
    async fn boot_fails_when_the_rtc_is_unreachable() {
        let recorded = Shared::default();
        let (bus, _inbox) = message_bus(10);
        let result = ClockEngine::boot(
            &Settings::default(),
            Collaborators {
                rtc: Box::new(FakeRtc(recorded.clone(), false)),
                time_service: Box::new(FakeService(recorded.clone())),
                display: Box::new(FakeDisplay(recorded)),
            },
            &shared_store(MemoryStore::new()),
            bus,
            PersistenceNotifier::new(),
        )
        .await;
        assert!(matches!(result, Err(BootError::Hardware(_))));
    }

    #[tokio::test]
    async fn unset_clock_ignores_ticks() {
        let mut rig = boot_at(0, false).await;
        assert!(!rig.engine.time_set());
        assert_eq!(rig.engine.utc_seconds(), 1);
        rig.engine.handle(Message::Tick);
        assert_eq!(rig.engine.utc_seconds(), 1);
        assert!(rig.recorded.lock().unwrap().shown.is_empty());
    }

    #[tokio::test]
    async fn ticks_advance_and_reach_the_display() {
        let mut rig = boot_at(TUESDAY, false).await;
        for _ in 0..5 {
            rig.engine.handle(Message::Tick);
        }
        assert_eq!(rig.engine.utc_seconds(), TUESDAY + 5);
        let recorded = rig.recorded.lock().unwrap();
        assert_eq!(recorded.shown.len(), 5);
        assert_eq!(recorded.shown.last().copied(), to_datetime(TUESDAY + 5));
    }

    #[tokio::test]
    async fn realign_respects_the_drift_threshold() {
        let mut rig = boot_at(TUESDAY, false).await;
        assert!(!rig.engine.realign(TUESDAY + 60));
        assert_eq!(rig.engine.utc_seconds(), TUESDAY);
        assert_eq!(rig.recorded.lock().unwrap().rtc_writes, 0);

        assert!(rig.engine.realign(TUESDAY - 61));
        assert_eq!(rig.engine.utc_seconds(), TUESDAY - 61);
        assert_eq!(rig.recorded.lock().unwrap().rtc_writes, 1);
    }

    #[tokio::test]
    async fn failed_rtc_write_still_moves_the_clock() {
        let mut rig = boot_at(TUESDAY, true).await;
        assert!(rig.engine.realign(TUESDAY + 3_600));
        assert_eq!(rig.engine.utc_seconds(), TUESDAY + 3_600);
        rig.engine.handle(Message::Tick);
        assert_eq!(rig.engine.utc_seconds(), TUESDAY + 3_601);
    }

    #[tokio::test]
    async fn network_requests_use_the_configured_zone() {
        let mut rig = boot_at(TUESDAY, false).await;
        rig.engine.handle(Message::NetworkConnected);
        rig.engine.handle(Message::TimezoneOverride("Asia/Tokyo".into()));
        rig.engine.handle(Message::NetworkDisconnected);
        assert_eq!(
            rig.recorded.lock().unwrap().time_requests,
            vec!["UTC".to_owned(), "Asia/Tokyo".to_owned()]
        );
        // The override alone does not touch the config.
        assert_eq!(rig.engine.config().timezone.name(), "UTC");
    }

    #[tokio::test]
    async fn time_response_updates_zone_and_asks_for_transitions() {
        let mut rig = boot_at(TUESDAY, false).await;
        let payload = json!({
            "timestamp": TUESDAY + 10,
            "timezone": { "name": "Europe/Paris", "offset": 3600 },
        });
        rig.engine.handle(Message::TimeApiResponse(Ok(payload)));

        assert_eq!(rig.engine.utc_seconds(), TUESDAY, "jitter is ignored");
        assert_eq!(rig.engine.config().timezone, Timezone::new("Europe/Paris", 3600));
        assert_eq!(rig.notifier.requested(), 1);
        assert!(matches!(rig.inbox.try_recv(), Some(Message::RequestTransitions)));

        rig.engine.handle(Message::RequestTransitions);
        let requests = rig.recorded.lock().unwrap().transition_requests.clone();
        assert_eq!(
            requests,
            vec![("Europe/Paris".to_owned(), TUESDAY - 86_400, TUESDAY + 365 * 86_400)]
        );
    }

    #[tokio::test]
    async fn malformed_time_response_still_asks_for_transitions() {
        let mut rig = boot_at(TUESDAY, false).await;
        rig.engine
            .handle(Message::TimeApiResponse(Ok(json!({ "timezone": "nope" }))));
        assert_eq!(rig.notifier.requested(), 0);
        assert!(matches!(rig.inbox.try_recv(), Some(Message::RequestTransitions)));

        rig.engine
            .handle(Message::TimeApiResponse(Err(ServiceError::Timeout)));
        assert!(rig.inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn transitions_are_applied_on_their_tick() {
        let mut rig = boot_at(TUESDAY, false).await;
        let payload = json!({
            "transitions": [
                { "transitionTimestamp": TUESDAY + 2, "toOffset": 7200 },
            ]
        });
        rig.engine.handle(Message::TransitionsApiResponse(Ok(payload)));
        assert_eq!(rig.engine.transitions().len(), 1);

        rig.engine.handle(Message::Tick);
        assert_eq!(rig.engine.config().timezone.offset_seconds, 0);
        rig.engine.handle(Message::Tick);
        assert_eq!(rig.engine.config().timezone.offset_seconds, 7200);
        assert!(rig.engine.transitions().is_empty());
        assert_eq!(rig.engine.next_transitions_check(), Some(TUESDAY + 2 + 15 * 86_400));
        assert_eq!(rig.notifier.requested(), 1);
    }

    #[tokio::test]
    async fn same_offset_transition_leaves_the_recheck_alone() {
        let mut rig = boot_at(TUESDAY, false).await;
        rig.engine.transitions.load([TransitionEntry::new(0, TUESDAY + 1)]);
        rig.engine.handle(Message::Tick);
        assert!(rig.engine.transitions().is_empty());
        assert_eq!(rig.engine.next_transitions_check(), None);
        assert_eq!(rig.notifier.requested(), 0);
    }

    #[tokio::test]
    async fn empty_transitions_schedule_a_recheck() {
        let mut rig = boot_at(TUESDAY, false).await;
        rig.engine.transitions.load([TransitionEntry::new(3600, TUESDAY + 100)]);
        rig.engine
            .handle(Message::TransitionsApiResponse(Ok(json!({ "transitions": [] }))));
        assert_eq!(rig.engine.transitions().len(), 1);
        assert_eq!(rig.engine.next_transitions_check(), Some(TUESDAY + 15 * 86_400));
    }

    #[tokio::test]
    async fn due_recheck_posts_a_request() {
        let mut rig = boot_at(TUESDAY, false).await;
        rig.engine.next_transitions_check = Some(TUESDAY + 1);
        rig.engine.handle(Message::Tick);
        assert!(matches!(rig.inbox.try_recv(), Some(Message::RequestTransitions)));
        assert_eq!(rig.engine.next_transitions_check(), Some(TUESDAY + 1 + 15 * 86_400));
    }

    #[tokio::test]
    async fn sleep_window_turns_the_display_off_then_on() {
        let mut rig = boot_at(TUESDAY, false).await;
        let schedule = SleepSchedule::with_rules(&[SleepRule::on(&[Weekday::Tue], 2, 4)]);
        rig.engine
            .handle(Message::SleepScheduleUpdate(Box::new(schedule)));
        assert_eq!(rig.engine.sleep_events().len(), 4);

        rig.engine.handle(Message::Tick);
        assert!(rig.engine.is_awake());
        rig.engine.handle(Message::Tick);
        assert!(!rig.engine.is_awake());
        assert_eq!(rig.recorded.lock().unwrap().display_on, Some(false));
        rig.engine.handle(Message::Tick);
        rig.engine.handle(Message::Tick);
        assert!(rig.engine.is_awake());
        assert_eq!(rig.recorded.lock().unwrap().display_on, Some(true));
        // Next week's pair is still pending.
        assert_eq!(rig.engine.sleep_events().len(), 2);
    }

    #[tokio::test]
    async fn missed_ticks_apply_only_the_last_due_action() {
        let mut rig = boot_at(TUESDAY, false).await;
        let schedule = SleepSchedule::with_rules(&[SleepRule::on(&[Weekday::Tue], 2, 4)]);
        rig.engine
            .handle(Message::SleepScheduleUpdate(Box::new(schedule)));
        // Jump past both of today's events in a single tick.
        rig.engine.utc_seconds += 10;
        rig.engine.handle(Message::Tick);
        assert!(rig.engine.is_awake());
        assert_eq!(rig.recorded.lock().unwrap().display_on, Some(true));
        assert_eq!(rig.engine.sleep_events().len(), 2);
    }

    #[tokio::test]
    async fn drained_calendar_is_rebuilt_for_next_week() {
        const WEDNESDAY: i64 = TUESDAY + 86_400;
        const NEXT_WEDNESDAY: i64 = WEDNESDAY + 7 * 86_400;
        let mut rig = boot_at(TUESDAY, false).await;
        let schedule = SleepSchedule::with_rules(&[SleepRule::on(&[Weekday::Wed], 2, 4)]);
        rig.engine
            .handle(Message::SleepScheduleUpdate(Box::new(schedule)));
        assert_eq!(
            rig.engine.sleep_events().iter().copied().collect::<Vec<_>>(),
            vec![SleepEvent::sleep(WEDNESDAY + 2), SleepEvent::wake(WEDNESDAY + 4)]
        );

        rig.engine.utc_seconds = WEDNESDAY + 1;
        rig.engine.handle(Message::Tick);
        assert!(!rig.engine.is_awake());
        rig.engine.handle(Message::Tick);
        rig.engine.handle(Message::Tick);
        assert!(rig.engine.is_awake());
        assert_eq!(rig.recorded.lock().unwrap().display_on, Some(true));

        // The last wake emptied the list, so it was rebuilt on Wednesday.
        let rebuilt: Vec<_> = rig.engine.sleep_events().iter().copied().collect();
        assert!(rebuilt.contains(&SleepEvent::sleep(NEXT_WEDNESDAY + 2)));
        assert!(rebuilt.contains(&SleepEvent::wake(NEXT_WEDNESDAY + 4)));

        // Today's copies are already due and drain on the next tick.
        rig.engine.handle(Message::Tick);
        assert!(rig.engine.is_awake());
        assert_eq!(
            rig.engine.sleep_events().iter().copied().collect::<Vec<_>>(),
            vec![SleepEvent::sleep(NEXT_WEDNESDAY + 2), SleepEvent::wake(NEXT_WEDNESDAY + 4)]
        );
    }

    #[tokio::test]
    async fn out_of_range_network_times_are_ignored() {
        let mut rig = boot_at(TUESDAY, false).await;
        for timestamp in [json!(i64::MIN), json!(i64::MAX), json!(1e300), json!(-1e300)] {
            rig.engine
                .handle(Message::TimeApiResponse(Ok(json!({ "timestamp": timestamp }))));
            assert_eq!(rig.engine.utc_seconds(), TUESDAY);
            assert!(matches!(rig.inbox.try_recv(), Some(Message::RequestTransitions)));
            rig.engine.handle(Message::RequestTransitions);
        }
        rig.engine.handle(Message::Tick);
        assert_eq!(rig.engine.utc_seconds(), TUESDAY + 1);
        assert_eq!(rig.recorded.lock().unwrap().rtc_writes, 0);

        assert!(!rig.engine.realign(i64::MIN));
        assert!(!rig.engine.realign(i64::MAX));
        assert_eq!(rig.engine.utc_seconds(), TUESDAY + 1);

        let payload = json!({
            "transitions": [{ "transitionTimestamp": i64::MAX, "toOffset": 3600 }]
        });
        rig.engine.handle(Message::TransitionsApiResponse(Ok(payload)));
        assert!(rig.engine.transitions().is_empty());
        rig.engine.handle(Message::Tick);
        assert_eq!(rig.engine.utc_seconds(), TUESDAY + 2);
    }

    #[tokio::test]
    async fn status_snapshot_follows_each_message() {
        let mut rig = boot_at(TUESDAY, false).await;
        let handle = rig.engine.clock_handle();
        rig.engine.handle(Message::Tick);
        let status = handle.status();
        assert_eq!(status.utc_seconds, TUESDAY + 1);
        assert!(status.time_set);
        assert_eq!(status.config.timezone.name(), "UTC");

        rig.engine.handle(Message::Unknown { tag: 99 });
        assert_eq!(handle.status().utc_seconds, TUESDAY + 1);
    }

    #[tokio::test]
    async fn manual_save_writes_the_published_config() {
        let mut rig = boot_at(TUESDAY, false).await;
        let handle = rig.engine.clock_handle();
        let payload = json!({ "timezone": { "name": "Asia/Tokyo", "offset": 32400 } });
        rig.engine.handle(Message::TimeApiResponse(Ok(payload)));
        handle.save_config().await.unwrap();

        let bytes = rig
            .engine
            .store
            .lock()
            .await
            .load(crate::config::CONF_KEY)
            .unwrap();
        let saved = ClockConfig::from_bytes("conf", &bytes).unwrap();
        assert_eq!(saved.timezone, Timezone::new("Asia/Tokyo", 32400));
    }
}
