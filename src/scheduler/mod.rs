//! Refresh scheduling: when to probe and what to do with a stale verdict.
//!
//! - `state`  : the observable [`FreshnessState`] and its [`Phase`]
//! - `reducer`: the pure `(state, event) -> effects` machine
//! - `driver` : the tokio event loop, timers and presentation handle

mod driver;
mod reducer;
mod state;

pub use driver::{FreshnessHandle, FreshnessService};
pub use reducer::{DISMISS_COOLDOWN, Effect, Event, SchedulerMachine, SchedulerPolicy, Timer};
pub use state::{FreshnessState, Phase};
