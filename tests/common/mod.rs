//! Shared integration test helpers for freshness.
//!
//! Provides a virtual-clock harness over the pure scheduler plus instrumented
//! fakes for every platform seam.
//!
//! ```ignore
//! mod common;
//! use common::{Sim, ScriptedProbe, RecordingReloader};
//! ```
//!
//! The `#[allow(dead_code)]` attribute suppresses warnings when only a subset
//! of helpers are used per file.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use freshness::config::FreshnessConfig;
use freshness::invalidator::CacheInvalidator;
use freshness::platform::{CacheStorage, KeyStore, PlatformError, Reloader};
use freshness::probe::{ProbeError, Verdict, VersionProbe};
use freshness::scheduler::{Effect, Event, FreshnessState, Phase, SchedulerMachine, SchedulerPolicy, Timer};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Virtual-clock harness
// ---------------------------------------------------------------------------

/// Drives a [`SchedulerMachine`] the way the tokio driver does, against a
/// millisecond clock that only moves when the test says so.
///
/// Every step checks that `is_checking` mirrors the in-flight probe exactly.
pub struct Sim {
    pub machine: SchedulerMachine,
    pub now_ms: u64,
    interval_ms: u64,
    next_tick_ms: u64,
    probe_latency_ms: u64,
    timers: HashMap<Timer, u64>,
    in_flight: Option<u64>,
    verdicts: VecDeque<Verdict>,
    pub probes: usize,
    pub reloads: usize,
    /// Transitions into `UpdatePending`, i.e. prompts shown.
    pub prompts: usize,
    pub shut_down: bool,
}

impl Sim {
    pub fn new(policy: SchedulerPolicy, interval_ms: u64, probe_latency_ms: u64) -> Self {
        Self {
            machine: SchedulerMachine::new(policy),
            now_ms: 0,
            interval_ms,
            next_tick_ms: interval_ms,
            probe_latency_ms,
            timers: HashMap::new(),
            in_flight: None,
            verdicts: VecDeque::new(),
            probes: 0,
            reloads: 0,
            prompts: 0,
            shut_down: false,
        }
    }

    /// Build from a config, started at t=0.
    pub fn started(config: &FreshnessConfig, probe_latency_ms: u64) -> Self {
        let mut sim = Self::new(
            SchedulerPolicy::from(config),
            config.check_interval_ms,
            probe_latency_ms,
        );
        sim.dispatch(Event::Start);
        sim
    }

    /// Queue verdicts for the next probes. Unscripted probes return Fresh.
    pub fn script(&mut self, verdicts: impl IntoIterator<Item = Verdict>) {
        self.verdicts.extend(verdicts);
    }

    pub fn state(&self) -> &FreshnessState {
        self.machine.state()
    }

    pub fn phase(&self) -> Phase {
        self.machine.state().phase
    }

    pub fn probe_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn timer_deadline(&self, timer: Timer) -> Option<u64> {
        self.timers.get(&timer).copied()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::milliseconds(self.now_ms as i64)
    }

    /// Deliver one event immediately and perform its effects.
    pub fn dispatch(&mut self, event: Event) {
        if self.shut_down {
            return;
        }
        let before = self.phase();
        let now = self.wall_clock();
        let effects = self.machine.handle(event, now);
        for effect in effects {
            match effect {
                Effect::StartProbe => {
                    assert!(
                        self.in_flight.is_none(),
                        "second probe started at t={} while one is in flight",
                        self.now_ms
                    );
                    self.probes += 1;
                    self.in_flight = Some(self.now_ms + self.probe_latency_ms);
                }
                Effect::ArmTimer { timer, after } => {
                    self.timers
                        .insert(timer, self.now_ms + after.as_millis() as u64);
                }
                Effect::CancelTimer(timer) => {
                    self.timers.remove(&timer);
                }
                Effect::InvalidateAndReload => self.reloads += 1,
                Effect::Shutdown => {
                    self.shut_down = true;
                    self.timers.clear();
                }
            }
        }
        if before != Phase::UpdatePending && self.phase() == Phase::UpdatePending {
            self.prompts += 1;
        }
        if !self.shut_down {
            assert_eq!(
                self.state().is_checking,
                self.in_flight.is_some(),
                "is_checking out of step with in-flight probe at t={}",
                self.now_ms
            );
        }
    }

    /// Earliest pending occurrence: probe completion, then timers, then the
    /// interval tick.
    fn next_occurrence(&self) -> Option<(u64, Event)> {
        let mut next: Option<(u64, Event)> = None;
        let mut consider = |at: u64, event: Event| {
            if next.is_none_or(|(best, _)| at < best) {
                next = Some((at, event));
            }
        };
        if let Some(done_at) = self.in_flight {
            // Verdict is resolved on delivery.
            consider(done_at, Event::ProbeFinished(Verdict::Fresh));
        }
        for timer in Timer::ALL {
            if let Some(&at) = self.timers.get(&timer) {
                consider(at, Event::TimerFired(timer));
            }
        }
        consider(self.next_tick_ms, Event::IntervalTick);
        next
    }

    /// Advance the clock by `ms`, delivering everything due on the way.
    pub fn advance(&mut self, ms: u64) {
        let target = self.now_ms + ms;
        while !self.shut_down {
            let Some((at, event)) = self.next_occurrence() else {
                break;
            };
            if at > target {
                break;
            }
            self.now_ms = at;
            let event = match event {
                Event::ProbeFinished(_) => {
                    self.in_flight = None;
                    Event::ProbeFinished(self.verdicts.pop_front().unwrap_or(Verdict::Fresh))
                }
                Event::TimerFired(timer) => {
                    self.timers.remove(&timer);
                    event
                }
                Event::IntervalTick => {
                    self.next_tick_ms += self.interval_ms;
                    event
                }
                other => other,
            };
            self.dispatch(event);
        }
        self.now_ms = target;
    }
}

/// Config with short, distinct delays and production mode.
pub fn test_config() -> FreshnessConfig {
    FreshnessConfig {
        entry_url: "https://app.example.com/index.html".to_string(),
        check_interval_ms: 30_000,
        auto_refresh_delay_ms: 2_000,
        settle_delay_ms: 1_000,
        ..FreshnessConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Instrumented fakes
// ---------------------------------------------------------------------------

/// Probe returning scripted outcomes, Fresh once the script runs out.
#[derive(Default)]
pub struct ScriptedProbe {
    outcomes: Mutex<VecDeque<Result<Verdict, ProbeError>>>,
    calls: AtomicUsize,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    /// Blocking time per call, on the blocking pool.
    pub latency: Duration,
}

impl ScriptedProbe {
    pub fn new(outcomes: impl IntoIterator<Item = Result<Verdict, ProbeError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn verdicts(verdicts: impl IntoIterator<Item = Verdict>) -> Self {
        Self::new(verdicts.into_iter().map(Ok))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

impl VersionProbe for ScriptedProbe {
    fn probe(&self) -> Result<Verdict, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(running, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let outcome = self
            .outcomes
            .lock()
            .pop_front()
            .unwrap_or(Ok(Verdict::Fresh));
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Shared ordered log of what the fakes observed.
pub type EventLog = Arc<Mutex<Vec<&'static str>>>;

/// Reloader counting calls and recording them in an optional log.
#[derive(Default)]
pub struct RecordingReloader {
    calls: AtomicUsize,
    log: Option<EventLog>,
}

impl RecordingReloader {
    pub fn with_log(log: EventLog) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            log: Some(log),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Reloader for RecordingReloader {
    fn reload(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().push("reload");
        }
    }
}

/// Opens once; everything waiting on it proceeds.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
    }
}

/// In-memory cache storage; deletions optionally block on a gate.
#[derive(Default)]
pub struct FakeCacheStorage {
    pub names: Mutex<Vec<String>>,
    pub gate: Option<Arc<Gate>>,
    pub log: Option<EventLog>,
    pub fail_on: Option<String>,
}

impl FakeCacheStorage {
    pub fn with_names(names: &[&str]) -> Self {
        Self {
            names: Mutex::new(names.iter().map(|n| n.to_string()).collect()),
            ..Self::default()
        }
    }
}

impl CacheStorage for FakeCacheStorage {
    fn cache_names(&self) -> Result<Vec<String>, PlatformError> {
        Ok(self.names.lock().clone())
    }

    fn delete_cache(&self, name: &str) -> Result<bool, PlatformError> {
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        if self.fail_on.as_deref() == Some(name) {
            return Err(PlatformError::InvalidName(name.to_string()));
        }
        let mut names = self.names.lock();
        let before = names.len();
        names.retain(|n| n != name);
        let deleted = names.len() != before;
        if deleted && let Some(log) = &self.log {
            log.lock().push("cache_deleted");
        }
        Ok(deleted)
    }
}

/// In-memory key store.
#[derive(Default)]
pub struct FakeKeyStore {
    pub keys: Mutex<Vec<String>>,
}

impl FakeKeyStore {
    pub fn with_keys(keys: &[&str]) -> Self {
        Self {
            keys: Mutex::new(keys.iter().map(|k| k.to_string()).collect()),
        }
    }
}

impl KeyStore for FakeKeyStore {
    fn remove(&self, key: &str) -> Result<bool, PlatformError> {
        let mut keys = self.keys.lock();
        let before = keys.len();
        keys.retain(|k| k != key);
        Ok(keys.len() != before)
    }
}

/// Invalidator over fresh in-memory fakes using the default key allow-list.
pub fn fake_invalidator() -> (CacheInvalidator, Arc<FakeCacheStorage>, Arc<FakeKeyStore>) {
    let caches = Arc::new(FakeCacheStorage::with_names(&["precache-v1", "runtime"]));
    let keys = Arc::new(FakeKeyStore::with_keys(&["update_available", "session"]));
    let invalidator = CacheInvalidator::new(
        caches.clone(),
        keys.clone(),
        freshness::config::defaults::persisted_keys(),
    );
    (invalidator, caches, keys)
}
