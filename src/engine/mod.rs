//! The epoch engine: turns idle/active observations and wall time into
//! finalized epochs, one serialized tick at a time.

mod controller;
mod epoch_engine;
pub mod state;
#[cfg(test)]
pub(crate) mod testing;

pub use controller::{EngineCommand, EngineController};
pub use epoch_engine::{EngineDeps, EngineSnapshot, EpochEngine};
pub use state::{CurrentEpoch, TrackingState};
