mod engine;
pub mod fold;

pub use engine::MergeEngine;
pub use fold::{HistoryRemoval, HistoryVisit};
