pub mod epoch;

pub use epoch::{Contribution, EpochRecord, ImportMode, TrackerContribution, MAX_SCORE};
