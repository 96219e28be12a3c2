//! # Pattern Layer
//!
//! Statistical pattern learning, real-time matching/prediction, and
//! filesystem pattern persistence. No ML libraries anywhere; every
//! signal is plain arithmetic over the event history.

pub mod learner;
pub mod matcher;
pub mod storage;

pub use learner::{Pattern, PatternKind, PatternLearner};
pub use matcher::{PatternMatch, PatternMatcher, Prediction};
pub use storage::PatternStorage;
