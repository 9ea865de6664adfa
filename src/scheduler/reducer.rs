//! Pure scheduling state machine.
//!
//! [`SchedulerMachine::handle`] is a reducer step: it applies one [`Event`] to
//! the [`FreshnessState`] and returns the [`Effect`]s the driver must perform.
//! It never sleeps, spawns or touches the network, so every transition can be
//! exercised with synthetic events and a synthetic clock.

use super::state::{FreshnessState, Phase};
use chrono::{DateTime, Utc};
use freshness_config::FreshnessConfig;
use freshness_probe::Verdict;
use std::time::Duration;

/// One-shot timers the machine arms through [`Effect::ArmTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Debounce window after a visibility/connectivity trigger.
    Settle,
    /// Delay before an unattended pending update reloads the client.
    AutoRefresh,
    /// Cool-down before a dismissed prompt reappears.
    Cooldown,
}

impl Timer {
    pub const ALL: [Timer; 3] = [Timer::Settle, Timer::AutoRefresh, Timer::Cooldown];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Settle => "settle",
            Self::AutoRefresh => "auto_refresh",
            Self::Cooldown => "cooldown",
        }
    }
}

/// Inbound events. Timers, platform listeners and the presentation layer are
/// all reduced to producers of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    IntervalTick,
    VisibilityChanged { visible: bool },
    ConnectivityChanged { online: bool },
    TimerFired(Timer),
    ProbeFinished(Verdict),
    DismissRequested,
    RefreshRequested,
    Stop,
}

impl Event {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::IntervalTick => "interval_tick",
            Self::VisibilityChanged { .. } => "visibility_changed",
            Self::ConnectivityChanged { .. } => "connectivity_changed",
            Self::TimerFired(_) => "timer_fired",
            Self::ProbeFinished(_) => "probe_finished",
            Self::DismissRequested => "dismiss_requested",
            Self::RefreshRequested => "refresh_requested",
            Self::Stop => "stop",
        }
    }
}

/// Side effects requested by the machine, performed by the driver in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    StartProbe,
    /// Arm (or re-arm, replacing) a one-shot timer.
    ArmTimer { timer: Timer, after: Duration },
    CancelTimer(Timer),
    /// Purge caches without awaiting completion, then force a reload.
    InvalidateAndReload,
    /// Tear down the interval, listeners and the event loop.
    Shutdown,
}

/// How long a dismissed prompt stays hidden before it reappears.
pub const DISMISS_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Timing policy distilled from [`FreshnessConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerPolicy {
    pub auto_refresh_delay: Duration,
    pub settle_delay: Duration,
    pub dismiss_cooldown: Duration,
    pub development_mode: bool,
}

impl From<&FreshnessConfig> for SchedulerPolicy {
    fn from(config: &FreshnessConfig) -> Self {
        Self {
            auto_refresh_delay: config.auto_refresh_delay(),
            settle_delay: config.settle_delay(),
            dismiss_cooldown: DISMISS_COOLDOWN,
            development_mode: config.development_mode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerMachine {
    policy: SchedulerPolicy,
    state: FreshnessState,
    running: bool,
    settle_armed: bool,
}

impl SchedulerMachine {
    pub fn new(policy: SchedulerPolicy) -> Self {
        Self {
            policy,
            state: FreshnessState::default(),
            running: false,
            settle_armed: false,
        }
    }

    pub fn state(&self) -> &FreshnessState {
        &self.state
    }

    pub fn policy(&self) -> &SchedulerPolicy {
        &self.policy
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Apply one event at wall-clock time `now`.
    pub fn handle(&mut self, event: Event, now: DateTime<Utc>) -> Vec<Effect> {
        let before = self.state.phase;
        let mut effects = Vec::new();

        match event {
            Event::Start => self.on_start(&mut effects),
            Event::IntervalTick => self.try_begin_probe(&mut effects, "interval"),
            Event::VisibilityChanged { visible: true } => self.on_wake(&mut effects, "visible"),
            Event::ConnectivityChanged { online: true } => self.on_wake(&mut effects, "online"),
            Event::VisibilityChanged { visible: false }
            | Event::ConnectivityChanged { online: false } => {}
            Event::TimerFired(timer) => self.on_timer(timer, &mut effects),
            Event::ProbeFinished(verdict) => self.on_probe_finished(verdict, now, &mut effects),
            Event::DismissRequested => self.on_dismiss(&mut effects),
            Event::RefreshRequested => self.on_refresh(&mut effects),
            Event::Stop => self.on_stop(&mut effects),
        }

        if self.state.phase != before {
            log::debug!(
                "freshness: {} -> {} on {}",
                before,
                self.state.phase,
                event.as_str()
            );
        }
        effects
    }

    fn on_start(&mut self, effects: &mut Vec<Effect>) {
        if self.running || self.state.phase.is_terminal() {
            return;
        }
        self.running = true;
        // First probe goes through the settle path, like a wake-up.
        self.settle_armed = true;
        effects.push(Effect::ArmTimer {
            timer: Timer::Settle,
            after: self.policy.settle_delay,
        });
    }

    fn on_wake(&mut self, effects: &mut Vec<Effect>, reason: &str) {
        if !self.running || self.state.phase.is_terminal() {
            return;
        }
        if self.settle_armed {
            log::trace!("freshness: {} trigger debounced", reason);
            return;
        }
        self.settle_armed = true;
        effects.push(Effect::ArmTimer {
            timer: Timer::Settle,
            after: self.policy.settle_delay,
        });
    }

    fn can_probe(&self) -> bool {
        if !self.running || self.state.is_checking {
            return false;
        }
        match self.state.phase {
            Phase::Idle => true,
            // Observable only: a development client keeps probing.
            Phase::UpdatePending => self.policy.development_mode,
            Phase::Checking | Phase::Dismissed | Phase::Refreshing => false,
        }
    }

    fn try_begin_probe(&mut self, effects: &mut Vec<Effect>, reason: &str) {
        if !self.can_probe() {
            log::trace!("freshness: {} probe dropped in {}", reason, self.state.phase);
            return;
        }
        self.state.is_checking = true;
        if self.state.phase == Phase::Idle {
            self.state.phase = Phase::Checking;
        }
        effects.push(Effect::StartProbe);
    }

    fn on_timer(&mut self, timer: Timer, effects: &mut Vec<Effect>) {
        match timer {
            Timer::Settle => {
                self.settle_armed = false;
                self.try_begin_probe(effects, "settle");
            }
            Timer::AutoRefresh => {
                if self.running
                    && self.state.phase == Phase::UpdatePending
                    && !self.policy.development_mode
                {
                    log::info!("Auto-refreshing to load the new build");
                    self.enter_refreshing(effects);
                }
            }
            Timer::Cooldown => {
                if self.running && self.state.phase == Phase::Dismissed {
                    self.enter_update_pending(effects);
                }
            }
        }
    }

    fn on_probe_finished(&mut self, verdict: Verdict, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        if !self.state.is_checking {
            log::trace!("freshness: ignoring probe result with no probe in flight");
            return;
        }
        self.state.is_checking = false;
        self.state.last_check = Some(now);

        if !self.running || self.state.phase != Phase::Checking {
            // Once pending, only dismiss, refresh or the timers move the state.
            return;
        }
        match verdict {
            Verdict::Fresh => self.state.phase = Phase::Idle,
            Verdict::Stale => self.enter_update_pending(effects),
        }
    }

    fn on_dismiss(&mut self, effects: &mut Vec<Effect>) {
        if self.state.phase != Phase::UpdatePending {
            return;
        }
        self.state.phase = Phase::Dismissed;
        self.state.update_available = false;
        effects.push(Effect::CancelTimer(Timer::AutoRefresh));
        effects.push(Effect::ArmTimer {
            timer: Timer::Cooldown,
            after: self.policy.dismiss_cooldown,
        });
    }

    fn on_refresh(&mut self, effects: &mut Vec<Effect>) {
        if self.state.phase.is_terminal() {
            return;
        }
        self.enter_refreshing(effects);
    }

    fn on_stop(&mut self, effects: &mut Vec<Effect>) {
        if !self.running {
            return;
        }
        self.running = false;
        self.settle_armed = false;
        effects.extend(Timer::ALL.into_iter().map(Effect::CancelTimer));
        effects.push(Effect::Shutdown);
    }

    fn enter_update_pending(&mut self, effects: &mut Vec<Effect>) {
        self.state.phase = Phase::UpdatePending;
        self.state.update_available = true;
        if !self.policy.development_mode {
            effects.push(Effect::ArmTimer {
                timer: Timer::AutoRefresh,
                after: self.policy.auto_refresh_delay,
            });
        }
    }

    fn enter_refreshing(&mut self, effects: &mut Vec<Effect>) {
        self.state.phase = Phase::Refreshing;
        self.state.update_available = false;
        self.running = false;
        self.settle_armed = false;
        effects.extend(Timer::ALL.into_iter().map(Effect::CancelTimer));
        effects.push(Effect::InvalidateAndReload);
        effects.push(Effect::Shutdown);
    }
}
