//! Fakes shared by the engine tests.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{
    db::Database,
    error::{ActigramError, Result},
    merge::MergeEngine,
    models::EpochRecord,
    oracle::{IdleOracle, IdleState},
    settings::SettingsStore,
    store::{
        ConfigStore, EpochPredicate, EpochStore, FileConfigStore, RecordRewrite, RecordUpdate,
    },
    utils::clock::testing::ManualClock,
};

use super::EngineDeps;

pub const T0: i64 = 1_700_000_000_000;

pub struct ScriptedOracle {
    state: Mutex<IdleState>,
    failing: AtomicBool,
    sender: broadcast::Sender<IdleState>,
}

impl ScriptedOracle {
    pub fn new(state: IdleState) -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(state),
            failing: AtomicBool::new(false),
            sender,
        }
    }

    pub fn set(&self, state: IdleState) {
        *self.state.lock().unwrap() = state;
    }

    /// Changes the polled state and pushes a notification.
    pub fn transition(&self, state: IdleState) {
        self.set(state);
        let _ = self.sender.send(state);
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn subscribers(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl IdleOracle for ScriptedOracle {
    async fn query_state(&self, _threshold_secs: u32) -> Result<IdleState> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ActigramError::OracleUnavailable("scripted outage".into()));
        }
        Ok(*self.state.lock().unwrap())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<IdleState>> {
        Some(self.sender.subscribe())
    }
}

/// Epoch store that can be switched into an outage.
pub struct FlakyStore {
    inner: Database,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: Database::open_in_memory().unwrap(),
            failing: AtomicBool::new(false),
        }
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(ActigramError::store("scripted outage"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EpochStore for FlakyStore {
    async fn get(&self, timestamp: i64) -> Result<Option<EpochRecord>> {
        self.check()?;
        self.inner.get(timestamp).await
    }

    async fn put(&self, record: EpochRecord) -> Result<()> {
        self.check()?;
        self.inner.put(record).await
    }

    async fn get_range(&self, start: Option<i64>, end: Option<i64>) -> Result<Vec<EpochRecord>> {
        self.check()?;
        self.inner.get_range(start, end).await
    }

    async fn delete_where(&self, predicate: EpochPredicate) -> Result<usize> {
        self.check()?;
        self.inner.delete_where(predicate).await
    }

    async fn clear(&self) -> Result<()> {
        self.check()?;
        self.inner.clear().await
    }

    async fn update(&self, timestamp: i64, update: RecordUpdate) -> Result<Option<EpochRecord>> {
        self.check()?;
        self.inner.update(timestamp, update).await
    }

    async fn rewrite(&self, rewrite: RecordRewrite) -> Result<usize> {
        self.check()?;
        self.inner.rewrite(rewrite).await
    }
}

/// A fully wired engine environment over a temp directory.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub clock: Arc<ManualClock>,
    pub oracle: Arc<ScriptedOracle>,
    pub store: Arc<FlakyStore>,
    pub config: Arc<FileConfigStore>,
    pub settings: SettingsStore,
}

impl Harness {
    pub async fn new(initial: IdleState) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(FileConfigStore::new(dir.path().join("config.json")).unwrap());
        let settings = SettingsStore::new(config.clone());
        settings.load().await.unwrap();
        Self {
            dir,
            clock: Arc::new(ManualClock::at(T0)),
            oracle: Arc::new(ScriptedOracle::new(initial)),
            store: Arc::new(FlakyStore::new()),
            config,
            settings,
        }
    }

    pub fn deps(&self) -> EngineDeps {
        EngineDeps {
            settings: self.settings.clone(),
            config: self.config.clone(),
            merge: MergeEngine::new(self.store.clone()),
            oracle: self.oracle.clone(),
            clock: self.clock.clone(),
        }
    }

    pub async fn records(&self) -> Vec<EpochRecord> {
        self.store.inner.get_range(None, None).await.unwrap()
    }

    pub async fn stored<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config
            .get(key)
            .await
            .unwrap()
            .map(|raw| serde_json::from_value(raw).unwrap())
    }
}
