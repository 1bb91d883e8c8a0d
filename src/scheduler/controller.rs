use std::{collections::HashMap, sync::Arc};

use log::info;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{loop_worker::alarm_loop, Alarm};

struct ScheduledAlarm {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Handle to the alarm registry. Clones share the same registry.
#[derive(Clone)]
pub struct Scheduler {
    alarms: mpsc::UnboundedSender<Alarm>,
    scheduled: Arc<Mutex<HashMap<String, ScheduledAlarm>>>,
}

impl Scheduler {
    /// Creates a scheduler and the receiving end of its alarm channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Alarm>) {
        let (alarms, receiver) = mpsc::unbounded_channel();
        (
            Self {
                alarms,
                scheduled: Arc::new(Mutex::new(HashMap::new())),
            },
            receiver,
        )
    }

    pub async fn schedule(&self, name: &str, period_minutes: u32) {
        let minutes = u64::from(period_minutes.max(1));
        self.schedule_every(name, Duration::from_secs(minutes * 60))
            .await;
    }

    /// Starts (or restarts) the alarm `name` with the given period.
    pub async fn schedule_every(&self, name: &str, period: Duration) {
        let mut scheduled = self.scheduled.lock().await;
        if let Some(previous) = scheduled.remove(name) {
            previous.cancel_token.cancel();
            previous.handle.abort();
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(alarm_loop(
            name.to_string(),
            period,
            self.alarms.clone(),
            cancel_token.clone(),
        ));
        scheduled.insert(
            name.to_string(),
            ScheduledAlarm {
                handle,
                cancel_token,
            },
        );
        info!("Scheduled alarm '{name}' every {}s", period.as_secs());
    }

    /// Stops the alarm `name`. Returns whether it was scheduled.
    pub async fn cancel(&self, name: &str) -> bool {
        let removed = self.scheduled.lock().await.remove(name);
        match removed {
            Some(alarm) => {
                alarm.cancel_token.cancel();
                let _ = alarm.handle.await;
                true
            }
            None => false,
        }
    }

    pub async fn is_scheduled(&self, name: &str) -> bool {
        self.scheduled.lock().await.contains_key(name)
    }

    pub async fn cancel_all(&self) {
        let drained: Vec<ScheduledAlarm> = self
            .scheduled
            .lock()
            .await
            .drain()
            .map(|(_, alarm)| alarm)
            .collect();
        for alarm in drained {
            alarm.cancel_token.cancel();
            let _ = alarm.handle.await;
        }
    }
}
