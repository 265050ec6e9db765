//! # Carbon-Aware Scheduler
//!
//! A deferral engine that decides, for each unit of work, whether to run it
//! now or wait for a cleaner grid, and which execution strategy to use.
//!
//! Carbon-intensity forecasts are uncertain and so is a workload's energy
//! cost. The engine never trusts a point estimate: it only defers when the
//! lower edge of the forecast's confidence interval is still above the
//! threshold, sizes strategies against a risk-adjusted energy figure, and
//! falls back to the most conservative strategy whenever its inputs are thin.
//!
//! ## Components
//!
//! - **Uncertainty model** ([`core::uncertainty`]): conservative carbon
//!   estimates (`point - half_width`) and online per-fingerprint energy
//!   profiles (Welford mean/variance).
//! - **Carbon-aware selector** ([`core::selector`]): a pure decision function
//!   fusing the conservative estimate, the energy profile and the request's
//!   urgency and deadline into Execute/Defer plus a strategy.
//! - **Deferral scheduler** ([`core::scheduler`]): parks deferred requests in a
//!   min-heap keyed by next check time, re-evaluates them with exponential
//!   backoff, forces execution before deadlines, and retries failed runs.
//! - **Feedback path** ([`core::feedback`]): persists every decision and
//!   execution record and folds measurements back into energy profiles.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use carbon_aware_scheduler::builders::{build_scheduler, open_history};
//! use carbon_aware_scheduler::config::EngineConfig;
//! use carbon_aware_scheduler::core::WorkRequest;
//! use carbon_aware_scheduler::runtime::spawn_control_loop;
//! use carbon_aware_scheduler::util::{init_tracing_with, now_ms, SystemClock, Urgency};
//!
//! let cfg = EngineConfig::from_env()?;
//! init_tracing_with(cfg.log_level.as_deref().unwrap_or("info"));
//!
//! let history = Arc::new(open_history(&cfg.history)?);
//! let scheduler = Arc::new(build_scheduler(
//!     &cfg,
//!     my_gateway,   // implements ForecastGateway
//!     my_executor,  // implements WorkloadExecutor
//!     history,
//!     Arc::new(SystemClock),
//! )?);
//! let control = spawn_control_loop(Arc::clone(&scheduler), cfg.scheduler.tick_interval());
//!
//! let request = WorkRequest::new("job-1", "fp-abc", Urgency::Normal, "eu-west", now_ms());
//! let disposition = scheduler.submit(request).await?;
//!
//! control.shutdown().await;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Domain model, decision logic and the deferral scheduler.
pub mod core;
/// Configuration models for the selector, forecast cache, scheduler and history.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// Infrastructure adapters for the deferral queue and history stores.
pub mod infra;
/// Tokio control loop and intake API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
