use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    error::{ActigramError, Result},
    oracle::{IdleOracle, IdleState},
    scheduler::{Scheduler, HEARTBEAT_ALARM, HEARTBEAT_PERIOD_MINUTES},
};

use super::{
    epoch_engine::{EngineSnapshot, EpochEngine},
    state::TrackingState,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub enum EngineCommand {
    Start(oneshot::Sender<TrackingState>),
    Stop(oneshot::Sender<TrackingState>),
    Heartbeat,
    IdleStateChanged(IdleState),
    Snapshot(oneshot::Sender<EngineSnapshot>),
}

/// Handle to the engine task. Every command is handled to completion before
/// the next one starts, so heartbeats and notifications never interleave.
#[derive(Clone)]
pub struct EngineController {
    commands: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineController {
    /// Moves `engine` into its own task. The heartbeat alarm is armed through
    /// `scheduler` while tracking.
    pub fn spawn(engine: EpochEngine, scheduler: Scheduler) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let weak = commands.downgrade();
        tokio::spawn(run(engine, scheduler, weak, receiver));
        Self { commands }
    }

    pub async fn start(&self) -> Result<TrackingState> {
        self.request(EngineCommand::Start).await
    }

    pub async fn stop(&self) -> Result<TrackingState> {
        self.request(EngineCommand::Stop).await
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        self.request(EngineCommand::Snapshot).await
    }

    pub fn heartbeat(&self) {
        self.send(EngineCommand::Heartbeat);
    }

    pub fn idle_state_changed(&self, state: IdleState) {
        self.send(EngineCommand::IdleStateChanged(state));
    }

    fn send(&self, command: EngineCommand) {
        if self.commands.send(command).is_err() {
            log_warn!("engine task has exited; command dropped");
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| ActigramError::EngineStopped("engine task has exited".into()))?;
        response
            .await
            .map_err(|_| ActigramError::EngineStopped("engine task dropped the reply".into()))
    }
}

async fn run(
    mut engine: EpochEngine,
    scheduler: Scheduler,
    commands: mpsc::WeakUnboundedSender<EngineCommand>,
    mut receiver: mpsc::UnboundedReceiver<EngineCommand>,
) {
    let mut forwarder: Option<JoinHandle<()>> = None;

    while let Some(command) = receiver.recv().await {
        match command {
            EngineCommand::Start(reply) => {
                let state = engine.start().await;
                if !scheduler.is_scheduled(HEARTBEAT_ALARM).await {
                    scheduler
                        .schedule(HEARTBEAT_ALARM, HEARTBEAT_PERIOD_MINUTES)
                        .await;
                }
                if forwarder.is_none() {
                    forwarder = forward_transitions(engine.oracle().as_ref(), commands.clone());
                }
                let _ = reply.send(state);
            }
            EngineCommand::Stop(reply) => {
                let state = engine.stop().await;
                scheduler.cancel(HEARTBEAT_ALARM).await;
                if let Some(handle) = forwarder.take() {
                    handle.abort();
                }
                let _ = reply.send(state);
            }
            EngineCommand::Heartbeat => engine.on_heartbeat().await,
            EngineCommand::IdleStateChanged(state) => engine.on_idle_state_change(state).await,
            EngineCommand::Snapshot(reply) => {
                let _ = reply.send(engine.snapshot());
            }
        }
    }

    if let Some(handle) = forwarder.take() {
        handle.abort();
    }
    log_info!("Engine task finished");
}

/// Relays oracle transitions into the command queue. Holds only a weak sender
/// so the engine task ends once every controller handle is gone.
fn forward_transitions(
    oracle: &dyn IdleOracle,
    commands: mpsc::WeakUnboundedSender<EngineCommand>,
) -> Option<JoinHandle<()>> {
    let Some(mut transitions) = oracle.subscribe() else {
        log_debug!("oracle has no push channel; relying on heartbeats");
        return None;
    };

    Some(tokio::spawn(async move {
        loop {
            let state = match transitions.recv().await {
                Ok(state) => state,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    // The heartbeat resync recovers whatever was coalesced.
                    log_warn!("missed {} idle transitions", skipped);
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            let Some(sender) = commands.upgrade() else {
                break;
            };
            if sender.send(EngineCommand::IdleStateChanged(state)).is_err() {
                break;
            }
        }
    }))
}
