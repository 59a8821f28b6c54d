//! Persistent storage of the device configuration, kept off the tick path.
//!
//! The engine never writes to the store itself. When its configuration
//! changes it publishes the new value in its status snapshot and signals the
//! [`PersistenceNotifier`]; a low-priority [`PersistenceWorker`] wakes up,
//! copies the snapshot and writes it. Signals raised while a write is in
//! progress collapse into a single follow-up write.
//!
//! Every writer takes the store lock with a bounded wait. A save that cannot
//! get the lock in time is dropped: the in-memory configuration stays
//! authoritative and the next change triggers a new save.

use crate::config::{ClockConfig, SleepSchedule, Timezone, CONF_KEY, SLEEPMODES_KEY, TZ_KEY};
use crate::error::{PersistenceError, StoreError};
use crate::events::ClockStatus;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

/// A key/value store of binary records.
pub trait ConfigStore: Send {
    fn load(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
}

/// The store shared by every task that persists configuration.
pub type SharedStore = Arc<Mutex<Box<dyn ConfigStore>>>;

/// Wraps `store` so it can be shared behind the persistence lock.
pub fn shared_store(store: impl ConfigStore + 'static) -> SharedStore {
    Arc::new(Mutex::new(Box::new(store)))
}

/// A volatile store, for tests and for running without a disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.records
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_owned()))
    }

    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.records.insert(key.to_owned(), bytes.to_vec());
        Ok(())
    }
}

/// A store keeping one file per record in a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }
}

impl ConfigStore for FileStore {
    fn load(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        fs::read(self.path_of(key)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(key.to_owned()),
            _ => StoreError::Io(e),
        })
    }

    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        // Write then rename, so a crash never leaves a half-written record.
        let staging = self.dir.join(format!("{key}.bin.tmp"));
        fs::write(&staging, bytes)?;
        fs::rename(&staging, self.path_of(key))?;
        Ok(())
    }
}

/// Writes `config` as the `conf` record, waiting at most `lock_timeout` for the store.
pub async fn save_config(
    store: &SharedStore,
    config: &ClockConfig,
    lock_timeout: Duration,
) -> Result<(), PersistenceError> {
    let mut guard = tokio::time::timeout(lock_timeout, Arc::clone(store).lock_owned())
        .await
        .map_err(|_| PersistenceError::LockTimeout(lock_timeout))?;
    let bytes = config.to_bytes();
    // Stores may touch the disk; keep that off the async workers.
    tokio::task::spawn_blocking(move || guard.save(CONF_KEY, &bytes)).await??;
    Ok(())
}

/// Loads the configuration at boot, creating it on first run.
///
/// Falls back to the legacy split `tz`/`sleepmodes` records when there is
/// no `conf` record, and consolidates them into one. A corrupt `conf` record
/// is replaced by the default configuration; any other store failure is
/// returned.
pub async fn load_or_create(store: &SharedStore) -> Result<ClockConfig, StoreError> {
    let mut store = store.lock().await;

    match store.load(CONF_KEY) {
        Ok(bytes) => match ClockConfig::from_bytes(CONF_KEY, &bytes) {
            Ok(config) => {
                info!("Loaded clock config for zone {}.", config.timezone.name());
                return Ok(config);
            }
            Err(e) => error!("{}; resetting to defaults.", e),
        },
        Err(StoreError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    let timezone = load_optional(&**store, TZ_KEY, Timezone::from_bytes)?;
    let sleep_schedule = load_optional(&**store, SLEEPMODES_KEY, SleepSchedule::from_bytes)?;
    if timezone.is_none() && sleep_schedule.is_none() {
        info!("No clock config found, creating the default one.");
    } else {
        info!("Migrating legacy timezone/sleep mode records.");
    }

    let config = ClockConfig {
        timezone: timezone.unwrap_or_default(),
        sleep_schedule: sleep_schedule.unwrap_or_default(),
    };
    store.save(CONF_KEY, &config.to_bytes())?;
    Ok(config)
}

fn load_optional<T>(
    store: &dyn ConfigStore,
    key: &str,
    decode: fn(&str, &[u8]) -> Result<T, StoreError>,
) -> Result<Option<T>, StoreError> {
    match store.load(key) {
        Ok(bytes) => match decode(key, &bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Ignoring legacy record: {}", e);
                Ok(None)
            }
        },
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Wakes the persistence worker. Cheap to clone and never blocks.
#[derive(Debug, Clone, Default)]
pub struct PersistenceNotifier {
    signal: Arc<Notify>,
    requested: Arc<AtomicU64>,
}

impl PersistenceNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks for the current configuration to be saved.
    pub fn notify(&self) {
        let requested = self.requested.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Config save #{} requested.", requested);
        self.signal.notify_one();
    }

    /// How many saves have been requested since startup.
    pub fn requested(&self) -> u64 {
        self.requested.load(Ordering::Relaxed)
    }

    async fn notified(&self) {
        self.signal.notified().await;
    }
}

/// The low-priority task that writes configuration changes to the store.
pub struct PersistenceWorker {
    notifier: PersistenceNotifier,
    status: watch::Receiver<ClockStatus>,
    store: SharedStore,
    lock_timeout: Duration,
}

impl PersistenceWorker {
    pub fn new(
        notifier: PersistenceNotifier,
        status: watch::Receiver<ClockStatus>,
        store: SharedStore,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            notifier,
            status,
            store,
            lock_timeout,
        }
    }

    /// Runs until a shutdown signal is received.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Persistence worker started.");
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = self.notifier.notified() => self.persist().await,
            }
        }
        info!("Persistence worker stopped.");
    }

    async fn persist(&self) {
        let config = Arc::clone(&self.status.borrow().config);
        match save_config(&self.store, &config, self.lock_timeout).await {
            Ok(()) => info!("Clock config saved (zone {}).", config.timezone.name()),
            Err(e) => error!("Clock config not saved: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SleepRule;
    use chrono::Weekday;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("nixie-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn first_run_creates_the_default_record() {
        let store = shared_store(MemoryStore::new());
        let config = load_or_create(&store).await.unwrap();
        assert_eq!(config, ClockConfig::default());
        assert_eq!(config.timezone.name(), "UTC");
        assert!(!config.sleep_schedule.enabled);

        let saved = store.lock().await.load(CONF_KEY).unwrap();
        assert_eq!(saved, config.to_bytes());
    }

    #[tokio::test]
    async fn existing_record_is_loaded() {
        let mut memory = MemoryStore::new();
        let config = ClockConfig {
            timezone: Timezone::new("Asia/Tokyo", 32_400),
            ..ClockConfig::default()
        };
        memory.save(CONF_KEY, &config.to_bytes()).unwrap();
        let store = shared_store(memory);
        assert_eq!(load_or_create(&store).await.unwrap(), config);
    }

    #[tokio::test]
    async fn legacy_records_are_consolidated() {
        let mut memory = MemoryStore::new();
        let tz = Timezone::new("Europe/Berlin", 3_600);
        memory.save(TZ_KEY, &tz.to_bytes()).unwrap();
        let store = shared_store(memory);

        let config = load_or_create(&store).await.unwrap();
        assert_eq!(config.timezone, tz);
        assert_eq!(config.sleep_schedule, SleepSchedule::disabled());
        assert!(store.lock().await.load(CONF_KEY).is_ok());
    }

    #[tokio::test]
    async fn corrupt_record_is_reset() {
        let mut memory = MemoryStore::new();
        memory.save(CONF_KEY, b"garbage").unwrap();
        let store = shared_store(memory);
        assert_eq!(load_or_create(&store).await.unwrap(), ClockConfig::default());
    }

    #[tokio::test]
    async fn save_gives_up_when_the_lock_is_held() {
        let store = shared_store(MemoryStore::new());
        let _held = store.lock().await;
        let err = save_config(&store, &ClockConfig::default(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::LockTimeout(_)));
    }

    #[test]
    fn file_store_round_trips_records() {
        let dir = temp_dir("file-store");
        let mut store = FileStore::new(&dir);
        assert!(matches!(store.load(CONF_KEY), Err(StoreError::NotFound(_))));

        store.save(CONF_KEY, b"abc").unwrap();
        assert_eq!(store.load(CONF_KEY).unwrap(), b"abc");
        store.save(CONF_KEY, b"defg").unwrap();
        assert_eq!(store.load(CONF_KEY).unwrap(), b"defg");

        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn save_config_writes_through_a_file_store() {
        let dir = temp_dir("save-config");
        let store = shared_store(FileStore::new(&dir));
        let config = ClockConfig {
            timezone: Timezone::new("America/New_York", -18_000),
            ..ClockConfig::default()
        };
        save_config(&store, &config, Duration::from_secs(1)).await.unwrap();

        let bytes = fs::read(dir.join("conf.bin")).unwrap();
        assert_eq!(ClockConfig::from_bytes(CONF_KEY, &bytes).unwrap(), config);
        // The lock is released once the write is done.
        assert!(store.try_lock().is_ok());
        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn worker_saves_the_published_config() {
        let store = shared_store(MemoryStore::new());
        let notifier = PersistenceNotifier::new();
        let config = ClockConfig {
            timezone: Timezone::new("UTC+1", 3_600),
            sleep_schedule: SleepSchedule::with_rules(&[SleepRule::on(&[Weekday::Fri], 0, 60)]),
        };
        let (status_tx, status_rx) = watch::channel(ClockStatus::default());
        let worker = PersistenceWorker::new(
            notifier.clone(),
            status_rx,
            Arc::clone(&store),
            Duration::from_millis(100),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(worker.run(shutdown_rx));

        status_tx.send_modify(|status| status.config = Arc::new(config.clone()));
        notifier.notify();
        assert_eq!(notifier.requested(), 1);

        let saved = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(bytes) = store.lock().await.load(CONF_KEY) {
                    return bytes;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(ClockConfig::from_bytes(CONF_KEY, &saved).unwrap(), config);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
