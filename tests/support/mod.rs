//! Fakes shared by the integration tests: a scripted forecast gateway, a
//! recording executor and a scheduler wired to a manual clock.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use carbon_aware_scheduler::builders::{build_scheduler, EngineScheduler};
use carbon_aware_scheduler::config::EngineConfig;
use carbon_aware_scheduler::core::{
    CarbonForecast, ExecutionError, ExecutionMeasurement, ForecastError, ForecastGateway,
    WorkRequest, WorkloadExecutor,
};
use carbon_aware_scheduler::infra::InMemoryHistoryStore;
use carbon_aware_scheduler::util::{Clock, ManualClock, RequestId, Strategy, Urgency};

/// Clock start for every scenario.
pub const T0: u64 = 1_700_000_000_000;

/// How long a hanging fake blocks; far beyond any configured timeout.
const HANG: Duration = Duration::from_secs(3_600);

#[derive(Default)]
struct GatewayState {
    forecast: Mutex<Option<(f64, f64)>>,
    calls: AtomicUsize,
    hanging: AtomicBool,
}

/// Gateway returning whatever the test last scripted.
#[derive(Clone, Default)]
pub struct ScriptedGateway(Arc<GatewayState>);

impl ScriptedGateway {
    pub fn new(point: f64, half_width: f64) -> Self {
        let gw = Self::default();
        gw.set(point, half_width);
        gw
    }

    pub fn down() -> Self {
        Self::default()
    }

    pub fn set(&self, point: f64, half_width: f64) {
        *self.0.forecast.lock() = Some((point, half_width));
    }

    pub fn outage(&self) {
        *self.0.forecast.lock() = None;
    }

    /// Make every call block until long after the fetch timeout.
    pub fn hang(&self) {
        self.0.hanging.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.0.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ForecastGateway for ScriptedGateway {
    async fn get_forecast(
        &self,
        region: &str,
        _lead_time: Duration,
    ) -> Result<CarbonForecast, ForecastError> {
        self.0.calls.fetch_add(1, Ordering::SeqCst);
        if self.0.hanging.load(Ordering::SeqCst) {
            tokio::time::sleep(HANG).await;
        }
        let current = *self.0.forecast.lock();
        let (point, half_width) =
            current.ok_or_else(|| ForecastError::Unavailable("scripted outage".into()))?;
        Ok(CarbonForecast {
            region: region.to_string(),
            target_ms: 0,
            point,
            half_width,
            confidence: 0.95,
            age_ms: 0,
        })
    }
}

struct ExecutorState {
    runs: Mutex<Vec<(RequestId, Strategy)>>,
    failures_left: AtomicU32,
    hangs_left: AtomicU32,
    energy_joules: f64,
}

/// Executor recording every call; fails the first `failures_left` calls.
#[derive(Clone)]
pub struct RecordingExecutor(Arc<ExecutorState>);

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(times: u32) -> Self {
        Self(Arc::new(ExecutorState {
            runs: Mutex::new(Vec::new()),
            failures_left: AtomicU32::new(times),
            hangs_left: AtomicU32::new(0),
            energy_joules: 100.0,
        }))
    }

    /// Blocks past the execution timeout on the first `times` calls.
    pub fn hanging(times: u32) -> Self {
        let executor = Self::new();
        executor.0.hangs_left.store(times, Ordering::SeqCst);
        executor
    }

    pub fn always_failing() -> Self {
        Self::failing(u32::MAX)
    }

    pub fn runs(&self) -> Vec<(RequestId, Strategy)> {
        self.0.runs.lock().clone()
    }

    pub fn run_count(&self) -> usize {
        self.0.runs.lock().len()
    }
}

#[async_trait]
impl WorkloadExecutor for RecordingExecutor {
    async fn execute(
        &self,
        request: &WorkRequest,
        strategy: Strategy,
    ) -> Result<ExecutionMeasurement, ExecutionError> {
        self.0.runs.lock().push((request.id.clone(), strategy));
        let hangs = self
            .0
            .hangs_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if hangs {
            tokio::time::sleep(HANG).await;
        }
        let failed = self
            .0
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ExecutionError::Failed("boom".into()));
        }
        Ok(ExecutionMeasurement {
            energy_joules: self.0.energy_joules,
            carbon_intensity: 200.0,
            duration_ms: 10,
        })
    }
}

pub type TestScheduler = EngineScheduler<ScriptedGateway, RecordingExecutor, InMemoryHistoryStore>;

/// Config used by the scenarios: threshold 100, base interval 60s, cap 600s,
/// retry delay 5s, two retries, no forecast caching.
pub fn test_config(threshold: f64) -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.selector.carbon_threshold = threshold;
    cfg.forecast.cache_ttl_secs = 0;
    cfg.scheduler.base_interval_secs = 60;
    cfg.scheduler.max_interval_secs = 600;
    cfg.scheduler.backoff_factor = 2.0;
    cfg.scheduler.retry_delay_secs = 5;
    cfg.scheduler.max_execution_retries = 2;
    cfg.scheduler.execution_timeout_secs = 5;
    cfg.scheduler.max_parallel_evaluations = Some(4);
    cfg
}

pub struct Harness {
    pub scheduler: Arc<TestScheduler>,
    pub gateway: ScriptedGateway,
    pub executor: RecordingExecutor,
    pub history: Arc<InMemoryHistoryStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(threshold: f64, gateway: ScriptedGateway, executor: RecordingExecutor) -> Self {
        Self::with_config(&test_config(threshold), gateway, executor)
    }

    pub fn with_config(
        cfg: &EngineConfig,
        gateway: ScriptedGateway,
        executor: RecordingExecutor,
    ) -> Self {
        let history = Arc::new(InMemoryHistoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let scheduler = build_scheduler(
            cfg,
            gateway.clone(),
            executor.clone(),
            Arc::clone(&history),
            Arc::clone(&clock) as Arc<dyn Clock>,
        )
        .expect("scheduler builds");
        Self {
            scheduler: Arc::new(scheduler),
            gateway,
            executor,
            history,
            clock,
        }
    }

    pub fn now(&self) -> u128 {
        self.clock.now_ms()
    }

    pub fn advance_secs(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }

    /// Seed a stable energy profile so strategy tiers apply.
    pub fn seed_profile(&self, fingerprint: &str) {
        for _ in 0..3 {
            self.scheduler.profiles().update(&fingerprint.into(), 100.0);
        }
    }

    pub fn request(&self, id: &str, urgency: Urgency) -> WorkRequest {
        WorkRequest::new(id, "fp-report", urgency, "eu-west", self.now())
    }
}
