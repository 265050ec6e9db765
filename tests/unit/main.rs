//! Unit tests for individual components

#[path = "../support/mod.rs"]
mod support;

mod audit_test;
mod builders_test;
mod error_test;
mod history_test;
mod queue_test;
mod runtime_test;
mod util_test;
