//! Infrastructure adapters for the deferral queue and the history store.

pub mod history;
pub mod queue;

pub use history::{HistoryBackend, InMemoryHistoryStore, JsonlHistoryStore};
pub use queue::InMemoryDeferralQueue;
