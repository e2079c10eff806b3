//! Virtual folder / saved-search engine.

pub mod engine;
pub mod search;

pub use engine::{VeeFolder, VeeStore, SharedVeeStore, UNMATCHED_NAME};
pub use search::{ExpressionEvaluator, SimpleEvaluator};
