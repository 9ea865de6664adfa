//! Tokio driver for the scheduling state machine.
//!
//! [`FreshnessService`] owns one event loop task per `start()`. Everything that
//! can change state (the interval, one-shot timers, probe completions, platform
//! listeners and presentation actions) is funnelled through a single unbounded
//! channel into that task, which feeds the [`SchedulerMachine`] and performs
//! the returned effects. The presentation layer reads state from a `watch`
//! channel through [`FreshnessHandle`].

use super::reducer::{Effect, Event, SchedulerMachine, SchedulerPolicy, Timer};
use super::state::FreshnessState;
use crate::invalidator::CacheInvalidator;
use crate::platform::Reloader;
use chrono::{DateTime, Utc};
use freshness_config::FreshnessConfig;
use freshness_probe::{ProbeError, Verdict, VersionProbe};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Messages accepted by the event loop.
#[derive(Debug)]
enum Inbound {
    Event(Event),
    /// A one-shot timer elapsed. Firings whose generation no longer matches
    /// the armed timer were cancelled or replaced and are dropped.
    TimerFired { timer: Timer, generation: u64 },
}

/// Presentation- and platform-facing side of a running subsystem.
///
/// Cheap to clone. Actions sent after the subsystem has stopped are dropped.
#[derive(Debug, Clone)]
pub struct FreshnessHandle {
    tx: mpsc::UnboundedSender<Inbound>,
    state_rx: watch::Receiver<FreshnessState>,
}

impl FreshnessHandle {
    /// User accepted the update: purge caches and reload, from any state.
    pub fn refresh_app(&self) {
        self.send(Event::RefreshRequested);
    }

    /// User deferred the update prompt.
    pub fn dismiss_update(&self) {
        self.send(Event::DismissRequested);
    }

    /// Page/tab visibility listener.
    pub fn notify_visibility(&self, visible: bool) {
        self.send(Event::VisibilityChanged { visible });
    }

    /// Network connectivity listener.
    pub fn notify_connectivity(&self, online: bool) {
        self.send(Event::ConnectivityChanged { online });
    }

    pub fn snapshot(&self) -> FreshnessState {
        self.state_rx.borrow().clone()
    }

    pub fn update_available(&self) -> bool {
        self.state_rx.borrow().update_available
    }

    pub fn is_checking(&self) -> bool {
        self.state_rx.borrow().is_checking
    }

    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        self.state_rx.borrow().last_check
    }

    /// Receiver notified after every state change.
    pub fn subscribe(&self) -> watch::Receiver<FreshnessState> {
        self.state_rx.clone()
    }

    fn send(&self, event: Event) {
        if self.tx.send(Inbound::Event(event)).is_err() {
            log::trace!("freshness subsystem stopped; dropping {}", event.as_str());
        }
    }
}

struct Running {
    handle: FreshnessHandle,
    task: Option<JoinHandle<()>>,
}

/// An explicitly owned freshness subsystem with a `start()`/`stop()` lifecycle.
///
/// Instances are independent: tests may run several side by side.
pub struct FreshnessService {
    config: FreshnessConfig,
    probe: Arc<dyn VersionProbe>,
    invalidator: CacheInvalidator,
    reloader: Arc<dyn Reloader>,
    running: Option<Running>,
}

impl std::fmt::Debug for FreshnessService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreshnessService")
            .field("config", &self.config)
            .field("running", &self.running.is_some())
            .finish_non_exhaustive()
    }
}

impl FreshnessService {
    pub fn new(
        config: FreshnessConfig,
        probe: Arc<dyn VersionProbe>,
        invalidator: CacheInvalidator,
        reloader: Arc<dyn Reloader>,
    ) -> Self {
        Self {
            config,
            probe,
            invalidator,
            reloader,
            running: None,
        }
    }

    pub fn config(&self) -> &FreshnessConfig {
        &self.config
    }

    /// Spawn the event loop on `runtime` and return a handle to it.
    ///
    /// Calling `start()` on a running service returns the existing handle. A
    /// disabled config yields a handle whose state stays idle forever.
    pub fn start(&mut self, runtime: &tokio::runtime::Handle) -> FreshnessHandle {
        if let Some(running) = &self.running {
            return running.handle.clone();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(FreshnessState::default());
        let handle = FreshnessHandle { tx: tx.clone(), state_rx };

        if !self.config.enabled {
            log::info!("Freshness checks disabled by configuration");
            return handle;
        }

        log::info!(
            "Starting freshness checks every {:?} (development mode: {})",
            self.config.check_interval(),
            self.config.development_mode
        );

        let event_loop = EventLoop {
            machine: SchedulerMachine::new(SchedulerPolicy::from(&self.config)),
            rx,
            tx,
            state_tx,
            probe: Arc::clone(&self.probe),
            invalidator: self.invalidator.clone(),
            reloader: Arc::clone(&self.reloader),
            check_interval: self.config.check_interval(),
            probe_timeout: self.config.probe_timeout(),
            errors_as_stale: self.config.treat_probe_errors_as_stale,
            timers: HashMap::new(),
            next_generation: 0,
            interval: None,
        };
        let task = runtime.spawn(event_loop.run());

        self.running = Some(Running {
            handle: handle.clone(),
            task: Some(task),
        });
        handle
    }

    /// Tear down the interval, timers and listeners.
    ///
    /// An in-flight probe is left to finish; its result is discarded.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.handle.send(Event::Stop);
        }
    }

    /// Wait for the event loop to exit, either after `stop()` or after a
    /// refresh tore the subsystem down.
    pub async fn join(&mut self) {
        let Some(task) = self.running.as_mut().and_then(|r| r.task.take()) else {
            return;
        };
        if let Err(e) = task.await {
            log::error!("Freshness event loop panicked: {}", e);
        }
    }

    /// `stop()` and wait for the event loop to exit.
    pub async fn shutdown(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.handle.send(Event::Stop);
        if let Some(task) = running.task.take()
            && let Err(e) = task.await
        {
            log::error!("Freshness event loop panicked: {}", e);
        }
    }
}

impl Drop for FreshnessService {
    fn drop(&mut self) {
        self.stop();
    }
}

struct EventLoop {
    machine: SchedulerMachine,
    rx: mpsc::UnboundedReceiver<Inbound>,
    tx: mpsc::UnboundedSender<Inbound>,
    state_tx: watch::Sender<FreshnessState>,
    probe: Arc<dyn VersionProbe>,
    invalidator: CacheInvalidator,
    reloader: Arc<dyn Reloader>,
    check_interval: Duration,
    probe_timeout: Duration,
    errors_as_stale: bool,
    /// Armed one-shot timers and their generation.
    timers: HashMap<Timer, (u64, JoinHandle<()>)>,
    next_generation: u64,
    interval: Option<JoinHandle<()>>,
}

impl EventLoop {
    async fn run(mut self) {
        self.interval = Some(self.spawn_interval());

        let mut done = self.dispatch(Event::Start);
        while !done {
            let Some(message) = self.rx.recv().await else {
                break;
            };
            let event = match message {
                Inbound::Event(event) => event,
                Inbound::TimerFired { timer, generation } => {
                    match self.timers.get(&timer) {
                        Some((armed, _)) if *armed == generation => {
                            self.timers.remove(&timer);
                            Event::TimerFired(timer)
                        }
                        _ => {
                            log::trace!("freshness: dropping stale {} firing", timer.as_str());
                            continue;
                        }
                    }
                }
            };
            done = self.dispatch(event);
        }

        self.teardown();
        log::debug!("Freshness event loop exited in {}", self.machine.state().phase);
    }

    /// Feed one event through the machine. Returns true once the loop should exit.
    fn dispatch(&mut self, event: Event) -> bool {
        let effects = self.machine.handle(event, Utc::now());
        self.state_tx.send_if_modified(|state| {
            if state == self.machine.state() {
                return false;
            }
            *state = self.machine.state().clone();
            true
        });

        let mut shutdown = false;
        for effect in effects {
            match effect {
                Effect::StartProbe => self.spawn_probe(),
                Effect::ArmTimer { timer, after } => self.arm_timer(timer, after),
                Effect::CancelTimer(timer) => {
                    if let Some((_, task)) = self.timers.remove(&timer) {
                        task.abort();
                    }
                }
                Effect::InvalidateAndReload => {
                    // Purge is detached; the reload does not wait for it.
                    self.invalidator.invalidate();
                    self.reloader.reload();
                }
                Effect::Shutdown => shutdown = true,
            }
        }
        shutdown
    }

    fn teardown(&mut self) {
        if let Some(interval) = self.interval.take() {
            interval.abort();
        }
        for (_, (_, task)) in self.timers.drain() {
            task.abort();
        }
    }

    fn spawn_interval(&self) -> JoinHandle<()> {
        let tx = self.tx.clone();
        let period = self.check_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await; // Skip first immediate tick
            loop {
                interval.tick().await;
                if tx.send(Inbound::Event(Event::IntervalTick)).is_err() {
                    break; // Receiver dropped
                }
            }
        })
    }

    fn arm_timer(&mut self, timer: Timer, after: Duration) {
        if let Some((_, task)) = self.timers.remove(&timer) {
            task.abort();
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Inbound::TimerFired { timer, generation });
        });
        self.timers.insert(timer, (generation, task));
    }

    /// Run one probe on the blocking pool under the configured deadline.
    ///
    /// A deadline reports `ProbeError::Timeout` and clears `is_checking`
    /// while the blocking call itself cannot be cancelled and runs on. Its
    /// late result is dropped. The next probe may therefore overlap it on
    /// the wire for up to the transport's own `timeout_global`, which
    /// `HttpVersionProbe` sets to the same deadline.
    fn spawn_probe(&self) {
        let probe = Arc::clone(&self.probe);
        let tx = self.tx.clone();
        let deadline = self.probe_timeout;
        let errors_as_stale = self.errors_as_stale;

        // Not tracked: stop() lets an in-flight probe finish.
        tokio::spawn(async move {
            let blocking = tokio::task::spawn_blocking(move || probe.probe());
            let outcome = match tokio::time::timeout(deadline, blocking).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => Err(ProbeError::Aborted(e.to_string())),
                Err(_) => Err(ProbeError::Timeout(deadline)),
            };

            let verdict = Verdict::from_outcome(&outcome, errors_as_stale);
            match &outcome {
                Ok(v) => log::info!("Freshness probe verdict: {:?}", v),
                Err(e) => log::warn!("Freshness probe failed ({}); treating as {:?}", e, verdict),
            }

            if tx
                .send(Inbound::Event(Event::ProbeFinished(verdict)))
                .is_err()
            {
                log::trace!("freshness: probe finished after shutdown");
            }
        });
    }
}
