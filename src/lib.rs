//! Actigram: continuous idle/active observation compressed into fixed-length
//! scored epochs, merged with browsing-history scores and kept in SQLite.
//!
//! [`ActigramService`] is the entry point. It owns the epoch engine task,
//! the alarms that drive it and the user-facing data operations.

pub mod db;
pub mod engine;
pub mod error;
pub mod merge;
pub mod models;
pub mod oracle;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod settings;
pub mod store;
pub mod transfer;
pub mod utils;

pub use error::{ActigramError, Result};
pub use models::{EpochRecord, ImportMode};
pub use oracle::{IdleOracle, IdleSignal, IdleState};
pub use service::ActigramService;
pub use settings::Settings;
