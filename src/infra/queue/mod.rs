//! Deferral queue backends.

pub mod memory;

pub use memory::InMemoryDeferralQueue;
