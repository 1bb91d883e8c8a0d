use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{error, info, warn};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};

use crate::{
    db::Database,
    engine::{EngineController, EngineDeps, EngineSnapshot, EpochEngine, TrackingState},
    error::Result,
    merge::{HistoryRemoval, HistoryVisit, MergeEngine},
    models::{EpochRecord, ImportMode},
    oracle::IdleOracle,
    retention::RetentionSweeper,
    scheduler::{Alarm, Scheduler, CLEANUP_ALARM, CLEANUP_PERIOD_MINUTES, HEARTBEAT_ALARM},
    settings::{Settings, SettingsStore},
    store::FileConfigStore,
    transfer::{build_export, parse_import, ExportDocument},
    utils::Clock,
};

pub const DATABASE_FILE: &str = "actigram.sqlite3";
pub const CONFIG_FILE: &str = "config.json";

/// Everything wired together under one data directory: the stores, the
/// engine task, the alarms and the operations a user can trigger.
pub struct ActigramService {
    data_dir: PathBuf,
    settings: SettingsStore,
    merge: MergeEngine,
    sweeper: RetentionSweeper,
    engine: EngineController,
    scheduler: Scheduler,
    clock: Arc<dyn Clock>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ActigramService {
    /// Opens (or creates) the stores under `data_dir`, starts tracking and
    /// arms the heartbeat and cleanup alarms.
    pub async fn launch(
        data_dir: &Path,
        oracle: Arc<dyn IdleOracle>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let db = Arc::new(Database::new(data_dir.join(DATABASE_FILE))?);
        let config = Arc::new(FileConfigStore::new(data_dir.join(CONFIG_FILE))?);

        let settings = SettingsStore::new(config.clone());
        let loaded = settings.load().await?;
        info!(
            "Loaded settings: {} min epochs, idle after {}s, retention {} days",
            loaded.epoch_duration_minutes, loaded.idle_threshold_seconds, loaded.retention_days
        );

        let merge = MergeEngine::new(db.clone());
        let sweeper = RetentionSweeper::new(db);
        let (scheduler, alarms) = Scheduler::new();

        let engine = EngineController::spawn(
            EpochEngine::new(EngineDeps {
                settings: settings.clone(),
                config,
                merge: merge.clone(),
                oracle,
                clock: clock.clone(),
            }),
            scheduler.clone(),
        );
        engine.start().await?;
        scheduler
            .schedule(CLEANUP_ALARM, CLEANUP_PERIOD_MINUTES)
            .await;

        let dispatcher = tokio::spawn(dispatch_alarms(
            alarms,
            engine.clone(),
            sweeper.clone(),
            settings.clone(),
            clock.clone(),
        ));

        info!("Actigram initialized in {}", data_dir.display());
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            settings,
            merge,
            sweeper,
            engine,
            scheduler,
            clock,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn engine(&self) -> &EngineController {
        &self.engine
    }

    pub fn settings(&self) -> Settings {
        self.settings.current()
    }

    pub async fn start_tracking(&self) -> Result<TrackingState> {
        self.engine.start().await
    }

    pub async fn stop_tracking(&self) -> Result<TrackingState> {
        self.engine.stop().await
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        self.engine.snapshot().await
    }

    /// Validates and stores new settings. A new epoch length applies from the
    /// next epoch boundary.
    pub async fn update_settings(&self, settings: Settings) -> Result<()> {
        self.settings.update(settings).await?;
        info!("Settings updated");
        Ok(())
    }

    pub async fn activity_data(&self, start: Option<i64>, end: Option<i64>) -> Result<Vec<EpochRecord>> {
        self.merge.activity_data(start, end).await
    }

    pub async fn export_data(&self) -> Result<ExportDocument> {
        let settings = self.settings.refresh().await;
        let records = self.merge.activity_data(None, None).await?;
        Ok(build_export(&settings, &records))
    }

    /// Imports an export document (or a legacy dump). Returns the number of
    /// records stored afterwards. A malformed payload writes nothing.
    pub async fn import_data(&self, json: &str, mode: ImportMode) -> Result<usize> {
        let records = parse_import(json)?;
        self.merge.import_bulk(records, mode).await
    }

    /// Folds browsing-history visits in. Uses the configured epoch length when
    /// `epoch_duration_minutes` is not given.
    pub async fn import_history(
        &self,
        visits: &[HistoryVisit],
        epoch_duration_minutes: Option<u32>,
    ) -> Result<usize> {
        let minutes = match epoch_duration_minutes {
            Some(minutes) => minutes,
            None => self.settings.refresh().await.epoch_duration_minutes,
        };
        self.merge.import_history(visits, minutes).await
    }

    pub async fn remove_history(&self) -> Result<HistoryRemoval> {
        self.merge.remove_history().await
    }

    pub async fn clear_all_data(&self) -> Result<()> {
        self.merge.clear_all().await
    }

    pub async fn run_cleanup(&self) -> Result<usize> {
        let retention_days = self.settings.refresh().await.retention_days;
        self.sweeper.sweep(retention_days, self.clock.now_ms()).await
    }

    /// Cancels every alarm and stops tracking. The persisted snapshots stay so
    /// the next launch resumes the epoch in progress.
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.cancel_all().await;
        if let Some(dispatcher) = self.dispatcher.lock().await.take() {
            dispatcher.abort();
        }
        self.engine.stop().await?;
        info!("Actigram shut down");
        Ok(())
    }
}

async fn dispatch_alarms(
    mut alarms: mpsc::UnboundedReceiver<Alarm>,
    engine: EngineController,
    sweeper: RetentionSweeper,
    settings: SettingsStore,
    clock: Arc<dyn Clock>,
) {
    while let Some(alarm) = alarms.recv().await {
        match alarm.name.as_str() {
            HEARTBEAT_ALARM => engine.heartbeat(),
            CLEANUP_ALARM => {
                let retention_days = settings.refresh().await.retention_days;
                if let Err(err) = sweeper.sweep(retention_days, clock.now_ms()).await {
                    error!("Scheduled cleanup failed: {err}");
                }
            }
            other => warn!("Ignoring unknown alarm '{other}'"),
        }
    }
}
