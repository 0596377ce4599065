//! Scheduling and resilience engine
//!
//! Drives the probe loop: waits for the test interval, runs a probe cycle
//! with exponential backoff between attempts, and opens a circuit breaker
//! after repeated failed cycles.
//!
//! # Timing
//! Waiting is a bounded poll, never longer than [`MAX_POLL_INTERVAL`] per
//! sleep, so a probe may start up to that much later than its interval.
//! Every sleep also wakes on shutdown.
//!
//! # Failure layers
//! - Backoff: within one cycle, at most `max_retries` retries
//! - Circuit breaker: across cycles, opens after `circuit_breaker_threshold`
//!   consecutive failed cycles and closes after `circuit_breaker_timeout_ms`

pub mod health;
pub mod state;

use crate::config::ScheduleConfig;
use crate::output;
use crate::probe::ProbeRunner;
use crate::storage::MetricsStore;
use anyhow::Result;
use model::constants::{MAX_POLL_INTERVAL, RETENTION_DAYS};
use model::{HealthReport, ProbeError, ProbeResult};
use state::ResilienceState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Result of one probe cycle
#[derive(Debug)]
pub enum CycleOutcome {
    Success(ProbeResult),
    /// Retries exhausted; carries the last error
    Failed(ProbeError),
    /// Shutdown was requested between attempts
    Cancelled,
}

/// What one loop iteration did
#[derive(Debug)]
pub enum Step {
    /// Slept because the interval or the open circuit is not yet due
    Waited,
    Probed(CycleOutcome),
}

/// Cloneable handle for observers: health queries and shutdown requests
#[derive(Clone)]
pub struct EngineHandle {
    state: Arc<RwLock<ResilienceState>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl EngineHandle {
    pub async fn health(&self) -> HealthReport {
        let state = self.state.read().await;
        health::report(&state, Instant::now())
    }

    /// Ask the loop to stop at its next sleep or attempt boundary
    pub async fn shutdown(&self) {
        self.state.write().await.running = false;
        self.shutdown_tx.send_replace(true);
        info!("Shutdown requested");
    }

    /// Resolves once shutdown has been requested
    pub async fn stopped(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

pub struct Engine<P, S> {
    schedule: ScheduleConfig,
    probe: P,
    store: S,
    state: Arc<RwLock<ResilienceState>>,
    shutdown: watch::Receiver<bool>,
    verbose: bool,
}

impl<P: ProbeRunner, S: MetricsStore> Engine<P, S> {
    pub fn new(schedule: ScheduleConfig, probe: P, store: S) -> (Self, EngineHandle) {
        let state = Arc::new(RwLock::new(ResilienceState::new(Instant::now())));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = EngineHandle {
            state: state.clone(),
            shutdown_tx: Arc::new(shutdown_tx),
        };

        let engine = Self {
            schedule,
            probe,
            store,
            state,
            shutdown: shutdown_rx,
            verbose: false,
        };

        (engine, handle)
    }

    /// Print each successful result to the console
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Run until shutdown, then close the store
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Probe loop started (interval: {}ms, retries: {}, circuit threshold: {})",
            self.schedule.test_interval_ms,
            self.schedule.max_retries,
            self.schedule.circuit_breaker_threshold
        );

        while self.is_running().await {
            self.step().await;
        }

        info!("Probe loop stopped");
        self.close()
    }

    /// Release the store. Consumes the engine so this happens once.
    pub fn close(self) -> Result<()> {
        self.store.close()
    }

    /// One loop iteration
    pub async fn step(&mut self) -> Step {
        let now = Instant::now();

        let (circuit_open, circuit_remaining, interval_remaining) = {
            let state = self.state.read().await;
            (
                state.circuit_open,
                state.circuit_remaining(now),
                state.interval_remaining(now, self.schedule.interval()),
            )
        };

        if circuit_open {
            let closed = self.state.write().await.try_close_circuit(now);
            if !closed {
                debug!("Circuit open, {}ms until reset", circuit_remaining.as_millis());
                self.sleep(circuit_remaining.min(MAX_POLL_INTERVAL)).await;
                return Step::Waited;
            }
        } else if !interval_remaining.is_zero() {
            self.sleep(interval_remaining.min(MAX_POLL_INTERVAL)).await;
            return Step::Waited;
        }

        let outcome = self.run_cycle().await;

        if !matches!(outcome, CycleOutcome::Cancelled) {
            self.prune();
        }

        Step::Probed(outcome)
    }

    /// One scheduled probe, retrying with exponential backoff
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let max_retries = self.schedule.max_retries;
        let mut attempt: u32 = 0;

        loop {
            match self.probe.execute().await {
                Ok(result) => {
                    self.persist(&result);
                    self.state
                        .write()
                        .await
                        .record_success(Instant::now(), result.timestamp);

                    info!(
                        quality = %result.connection_quality,
                        network = %result.network_type,
                        "Probe succeeded: {:.1}ms ping, {:.1}/{:.1} Mbps down/up",
                        result.ping_ms,
                        result.download_mbps,
                        result.upload_mbps
                    );
                    if self.verbose {
                        output::print_result(&result);
                    }

                    return CycleOutcome::Success(result);
                }
                Err(e) => {
                    attempt += 1;

                    if attempt > max_retries {
                        error!(kind = e.kind(), attempts = attempt, "Probe cycle failed: {}", e);
                        self.state.write().await.record_failure(
                            Instant::now(),
                            self.schedule.circuit_breaker_threshold,
                            self.schedule.circuit_breaker_timeout(),
                        );
                        return CycleOutcome::Failed(e);
                    }

                    let delay = self.schedule.backoff_delay(attempt);
                    warn!(
                        kind = e.kind(),
                        attempt,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Probe attempt failed: {}",
                        e
                    );

                    if !self.sleep(delay).await || !self.is_running().await {
                        info!("Probe cycle cancelled by shutdown");
                        return CycleOutcome::Cancelled;
                    }
                }
            }
        }
    }

    fn persist(&self, result: &ProbeResult) {
        // Store errors are logged only; they do not count as probe failures
        if let Err(e) = self.store.insert(result) {
            error!("Failed to store result: {:#}", e);
        }
    }

    fn prune(&self) {
        if let Err(e) = self.store.prune(RETENTION_DAYS) {
            error!("Failed to prune old results: {:#}", e);
        }
    }

    async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    /// Sleep unless shutdown arrives first. Returns false on shutdown.
    async fn sleep(&mut self, duration: Duration) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            // Only `true` is ever sent; a dropped sender disables this branch
            Ok(()) = self.shutdown.changed() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::Utc;
    use model::HealthStatus;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Plays back a fixed list of outcomes, failing once it runs dry
    #[derive(Clone, Default)]
    struct ScriptedProbe {
        script: Arc<Mutex<VecDeque<Result<ProbeResult, ProbeError>>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedProbe {
        fn new() -> Self {
            Self::default()
        }

        fn fail(self, times: usize) -> Self {
            {
                let mut script = self.script.lock().unwrap();
                for _ in 0..times {
                    script.push_back(Err(ProbeError::ParseError("empty output".to_string())));
                }
            }
            self
        }

        fn succeed(self, times: usize) -> Self {
            {
                let mut script = self.script.lock().unwrap();
                for _ in 0..times {
                    let mut result = ProbeResult::new(Utc::now(), "test".to_string());
                    result.ping_ms = 15.0;
                    result.download_mbps = 100.0;
                    result.classify();
                    script.push_back(Ok(result));
                }
            }
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ProbeRunner for ScriptedProbe {
        async fn execute(&self) -> Result<ProbeResult, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(ProbeError::Timeout(Duration::from_secs(1))))
        }
    }

    fn schedule() -> ScheduleConfig {
        ScheduleConfig {
            test_interval_ms: 60_000,
            max_retries: 2,
            backoff_delay_ms: 100,
            max_backoff_delay_ms: 1_000,
            circuit_breaker_threshold: 3,
            circuit_breaker_timeout_ms: 1_000,
        }
    }

    fn engine(
        schedule: ScheduleConfig,
        probe: &ScriptedProbe,
    ) -> (Engine<ScriptedProbe, Database>, EngineHandle) {
        let db = Database::new(":memory:").unwrap();
        db.initialize().unwrap();
        Engine::new(schedule, probe.clone(), db)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_counts_one_failure() {
        let probe = ScriptedProbe::new().fail(3);
        let (mut engine, handle) = engine(schedule(), &probe);

        let started = Instant::now();
        let outcome = engine.run_cycle().await;

        assert!(matches!(outcome, CycleOutcome::Failed(ProbeError::ParseError(_))));
        assert_eq!(probe.calls(), 3);
        assert_eq!(handle.health().await.consecutive_failures, 1);

        // 100ms before the first retry, 200ms before the second
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(400), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_resets_failures() {
        let probe = ScriptedProbe::new().fail(3).succeed(1).fail(1).succeed(1);
        let (mut engine, handle) = engine(schedule(), &probe);

        assert!(matches!(engine.run_cycle().await, CycleOutcome::Failed(_)));
        assert_eq!(handle.health().await.status, HealthStatus::Degraded);

        assert!(matches!(engine.run_cycle().await, CycleOutcome::Success(_)));
        let health = handle.health().await;
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.last_test_time.is_some());

        // a failed attempt that recovers within the cycle is not a cycle failure
        assert!(matches!(engine.run_cycle().await, CycleOutcome::Success(_)));
        assert_eq!(handle.health().await.consecutive_failures, 0);
        assert_eq!(probe.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_is_persisted() {
        let probe = ScriptedProbe::new().succeed(1);
        let (mut engine, _handle) = engine(schedule(), &probe);

        let stored = match engine.step().await {
            Step::Probed(CycleOutcome::Success(result)) => result,
            other => panic!("unexpected: {:?}", other),
        };

        let latest = engine.store.latest().unwrap().unwrap();
        assert_eq!(latest.ping_ms, stored.ping_ms);
        assert_eq!(latest.device_name, "test");
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_and_recovers() {
        let probe = ScriptedProbe::new().fail(9).succeed(1);
        let (mut engine, handle) = engine(schedule(), &probe);

        for _ in 0..3 {
            assert!(matches!(engine.run_cycle().await, CycleOutcome::Failed(_)));
        }
        assert_eq!(probe.calls(), 9);

        let health = handle.health().await;
        assert!(health.circuit_open);
        assert_eq!(health.status, HealthStatus::Unhealthy);

        tokio::time::advance(Duration::from_millis(1_001)).await;

        match engine.step().await {
            Step::Probed(CycleOutcome::Success(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(probe.calls(), 10);

        let health = handle.health().await;
        assert!(!health.circuit_open);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_blocks_probes() {
        let probe = ScriptedProbe::new().fail(9);
        let mut schedule = schedule();
        schedule.circuit_breaker_timeout_ms = 12_000;
        let (mut engine, handle) = engine(schedule, &probe);

        for _ in 0..3 {
            engine.run_cycle().await;
        }

        // polls in bounded sleeps without probing
        let started = Instant::now();
        assert!(matches!(engine.step().await, Step::Waited));
        let elapsed = started.elapsed();
        assert!(elapsed >= MAX_POLL_INTERVAL, "{:?}", elapsed);
        assert!(elapsed < MAX_POLL_INTERVAL + Duration::from_millis(100), "{:?}", elapsed);
        assert!(matches!(engine.step().await, Step::Waited));
        assert_eq!(probe.calls(), 9);
        assert!(handle.health().await.circuit_open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_interval_after_success() {
        let probe = ScriptedProbe::new().succeed(2);
        let (mut engine, _handle) = engine(schedule(), &probe);

        assert!(matches!(engine.step().await, Step::Probed(CycleOutcome::Success(_))));

        let mut waits = 0;
        loop {
            match engine.step().await {
                Step::Waited => waits += 1,
                Step::Probed(_) => break,
            }
        }

        // 60s interval in polls of at most 5s
        assert_eq!(waits, 12);
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_idle_loop() {
        let probe = ScriptedProbe::new().succeed(1);
        let (engine, handle) = engine(schedule(), &probe);

        let started = Instant::now();
        let stopper = handle.clone();
        let (result, _) = tokio::join!(engine.run(), async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.shutdown().await;
        });

        assert!(result.is_ok());
        assert!(started.elapsed() < MAX_POLL_INTERVAL);
        assert_eq!(probe.calls(), 1);
        assert_eq!(handle.health().await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let probe = ScriptedProbe::new().fail(10);
        let mut schedule = schedule();
        schedule.max_retries = 5;
        schedule.backoff_delay_ms = 60_000;
        schedule.max_backoff_delay_ms = 60_000;
        let (engine, handle) = engine(schedule, &probe);

        let stopper = handle.clone();
        let started = Instant::now();
        let (result, _) = tokio::join!(engine.run(), async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            stopper.shutdown().await;
        });

        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(probe.calls(), 1);
        // a cancelled cycle is not a failure
        assert_eq!(handle.health().await.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_shutdown() {
        let probe = ScriptedProbe::new();
        let (_engine, handle) = engine(schedule(), &probe);

        let waiter = handle.clone();
        let waiting = tokio::spawn(async move { waiter.stopped().await });
        handle.shutdown().await;

        tokio::time::timeout(Duration::from_secs(1), waiting).await.unwrap().unwrap();
        // already stopped: returns immediately
        handle.stopped().await;
    }

    /// Store whose writes always fail, counting the attempts
    #[derive(Clone, Default)]
    struct BrokenStore {
        inserts: Arc<AtomicUsize>,
        prunes: Arc<AtomicUsize>,
    }

    impl MetricsStore for BrokenStore {
        fn insert(&self, _result: &ProbeResult) -> Result<()> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("disk I/O error")
        }

        fn latest(&self) -> Result<Option<ProbeResult>> {
            Ok(None)
        }

        fn prune(&self, _older_than_days: u32) -> Result<usize> {
            self.prunes.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("database is locked")
        }

        fn close(self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_errors_do_not_count_as_failures() {
        let probe = ScriptedProbe::new().succeed(1);
        let store = BrokenStore::default();
        let (mut engine, handle) = Engine::new(schedule(), probe.clone(), store.clone());

        match engine.step().await {
            Step::Probed(CycleOutcome::Success(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }

        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
        assert_eq!(store.prunes.load(Ordering::SeqCst), 1);
        assert_eq!(probe.calls(), 1);

        let health = handle.health().await;
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.last_test_time.is_some());
        assert!(engine.close().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probed_step_prunes_expired_results() {
        let probe = ScriptedProbe::new().succeed(1);
        let (mut engine, _handle) = engine(schedule(), &probe);

        let now = Utc::now();
        engine
            .store
            .insert(&ProbeResult::new(now - chrono::Duration::days(45), "expired".to_string()))
            .unwrap();
        engine
            .store
            .insert(&ProbeResult::new(now - chrono::Duration::days(2), "recent".to_string()))
            .unwrap();

        assert!(matches!(engine.step().await, Step::Probed(CycleOutcome::Success(_))));

        let mut devices: Vec<String> = engine
            .store
            .query_range(0, i64::MAX)
            .unwrap()
            .into_iter()
            .map(|r| r.device_name)
            .collect();
        devices.sort();
        assert_eq!(devices, vec!["recent".to_string(), "test".to_string()]);

        // idle polls leave the store alone
        engine
            .store
            .insert(&ProbeResult::new(now - chrono::Duration::days(60), "expired".to_string()))
            .unwrap();
        assert!(matches!(engine.step().await, Step::Waited));
        assert_eq!(engine.store.query_range(0, i64::MAX).unwrap().len(), 3);
    }
}
