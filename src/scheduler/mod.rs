//! Coarse periodic alarms delivered as messages.
//!
//! Each named alarm runs its own ticker task. Alarms are sent into one channel
//! so that whoever consumes them handles them strictly one at a time.

mod controller;
mod loop_worker;

pub use controller::Scheduler;

pub const HEARTBEAT_ALARM: &str = "heartbeat";
pub const CLEANUP_ALARM: &str = "cleanup";

pub const HEARTBEAT_PERIOD_MINUTES: u32 = 1;
pub const CLEANUP_PERIOD_MINUTES: u32 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alarm {
    pub name: String,
}
