//! The process supervisor.
//!
//! One background loop (default period 15 s). Each live app is probed —
//! OS liveness first, then gRPC health with a 5-second deadline — and
//! restarted with exponential backoff under a 5-per-hour budget. When
//! the budget is exhausted the app's capabilities are deregistered so
//! the agent stops routing through dead connections, and the supervisor
//! gives up until the host restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use nebo_core::{AppId, SupervisorEvent};
use nebo_runtime::AppRuntime;

use crate::registry::AppRegistry;

/// Length of the restart-budget window.
pub const RESTART_WINDOW: Duration = Duration::from_secs(60 * 60);

/// First backoff step.
pub const BACKOFF_BASE: Duration = Duration::from_secs(10);

/// Backoff ceiling.
pub const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// How long the filesystem watcher is suppressed around a managed
/// restart (a build tool rewriting the binary must not fire a second
/// restart).
const RESTART_SUPPRESSION: Duration = Duration::from_secs(30);

/// Capacity of the supervisor event channel.
const EVENT_CAPACITY: usize = 64;

/// Backoff for the n-th restart in a window: `10 s · 2^(n-1)`, capped
/// at 5 minutes.
#[must_use]
pub fn backoff_for_attempt(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_CAP)
}

/// Per-app restart bookkeeping.
#[derive(Debug, Clone)]
pub struct RestartState {
    /// Restarts within the current window.
    pub count: u32,
    /// When the current window opened.
    pub window_start: Instant,
    /// The most recent restart.
    pub last_restart: Option<Instant>,
    /// Earliest next restart (backoff).
    pub not_before: Option<Instant>,
    /// Budget exhausted; no further attempts until host restart.
    pub gave_up: bool,
}

impl RestartState {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            last_restart: None,
            not_before: None,
            gave_up: false,
        }
    }
}

/// What the supervisor should do with an app this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assessment {
    /// Inside the backoff window or given up.
    Skip,
    /// Probe liveness and health.
    Probe,
}

/// Window/backoff bookkeeping for one tick. Split out of the loop so the
/// schedule is testable without real processes.
fn assess(state: &mut RestartState, now: Instant, max_per_hour: u32) -> Assessment {
    if state.gave_up {
        return Assessment::Skip;
    }
    if let Some(not_before) = state.not_before
        && now < not_before
    {
        return Assessment::Skip;
    }
    #[allow(clippy::arithmetic_side_effects)]
    if now.duration_since(state.window_start) >= RESTART_WINDOW {
        state.count = 0;
        state.window_start = now;
    }
    if state.count > max_per_hour {
        return Assessment::Skip;
    }
    Assessment::Probe
}

/// Note a restart attempt: bump the counter, set the backoff deadline.
/// Returns `None` when the budget is exhausted (the caller deregisters
/// and gives up) or the attempt number otherwise.
fn note_restart(state: &mut RestartState, now: Instant, max_per_hour: u32) -> Option<u32> {
    state.count = state.count.saturating_add(1);
    state.last_restart = Some(now);
    if state.count > max_per_hour {
        state.gave_up = true;
        state.not_before = None;
        return None;
    }
    let backoff = backoff_for_attempt(state.count);
    #[allow(clippy::arithmetic_side_effects)]
    {
        state.not_before = Some(now + backoff);
    }
    Some(state.count)
}

/// The supervisor.
pub struct Supervisor {
    runtime: Arc<AppRuntime>,
    registry: Arc<AppRegistry>,
    states: Mutex<HashMap<AppId, RestartState>>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl Supervisor {
    /// Create a supervisor over the runtime and registry.
    #[must_use]
    pub fn new(runtime: Arc<AppRuntime>, registry: Arc<AppRegistry>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            runtime,
            registry,
            states: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to supervisor events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Run the supervision loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = self.runtime.config().supervise_interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }
            self.tick().await;
        }
        debug!("Supervisor loop stopped");
    }

    /// One supervision pass over every live app.
    pub async fn tick(&self) {
        let max = self.runtime.config().max_restarts_per_hour;
        for id in self.runtime.live_ids().await {
            let now = Instant::now();
            let assessment = {
                let mut states = self.states.lock().await;
                let state = states.entry(id.clone()).or_insert_with(|| RestartState::new(now));
                assess(state, now, max)
            };
            if assessment == Assessment::Skip {
                continue;
            }

            let Some(record) = self.runtime.get(&id).await else {
                continue;
            };

            let reason = if record.os_alive() {
                match self.runtime.health_check(&id).await {
                    Ok(()) => continue,
                    Err(e) => format!("health check failed: {e}"),
                }
            } else {
                "process exited".to_string()
            };

            warn!(app_id = %id, reason = %reason, "Supervisor restarting app");
            self.restart(&id, max).await;
        }
    }

    async fn restart(&self, id: &AppId, max: u32) {
        let attempt = {
            let now = Instant::now();
            let mut states = self.states.lock().await;
            let state = states.entry(id.clone()).or_insert_with(|| RestartState::new(now));
            note_restart(state, now, max)
        };

        let Some(attempt) = attempt else {
            self.give_up(id).await;
            return;
        };

        // A managed restart rewrites nothing, but build tools watching
        // the same directory might; mute the watcher either way.
        self.runtime.suppress_watcher(id, RESTART_SUPPRESSION);
        let result = self.registry.relaunch(id).await;
        self.runtime.clear_watcher_suppression(id);

        let success = result.is_ok();
        match result {
            Ok(_) => info!(app_id = %id, attempt, "Supervisor restarted app"),
            Err(e) => error!(app_id = %id, attempt, error = %e, "Supervisor restart failed"),
        }
        let _ = self.events.send(SupervisorEvent::Restarted {
            app_id: id.clone(),
            attempt,
            success,
        });
    }

    async fn give_up(&self, id: &AppId) {
        error!(app_id = %id, "Restart budget exhausted, deregistering capabilities");
        self.registry.deregister_capabilities(id).await;
        let _ = self.runtime.stop(id).await;
        let _ = self.events.send(SupervisorEvent::GaveUp { app_id: id.clone() });
    }

    /// The restart state for an app, if any (observability and tests).
    pub async fn restart_state(&self, id: &AppId) -> Option<RestartState> {
        self.states.lock().await.get(id).cloned()
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let expected = [10u64, 20, 40, 80, 160, 300, 300, 300];
        for (index, &secs) in expected.iter().enumerate() {
            let attempt = u32::try_from(index).unwrap().saturating_add(1);
            assert_eq!(
                backoff_for_attempt(attempt),
                Duration::from_secs(secs),
                "attempt {attempt}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_budget_and_giveup() {
        let now = Instant::now();
        let mut state = RestartState::new(now);
        let max = 5;

        // Five restarts consume the budget with the documented backoffs.
        for attempt in 1..=5u32 {
            assert_eq!(assess(&mut state, Instant::now(), max), Assessment::Probe);
            let noted = note_restart(&mut state, Instant::now(), max);
            assert_eq!(noted, Some(attempt));
            let expected = backoff_for_attempt(attempt);
            assert_eq!(
                state.not_before.unwrap().duration_since(Instant::now()),
                expected
            );
            // Inside the backoff window the app is skipped.
            assert_eq!(assess(&mut state, Instant::now(), max), Assessment::Skip);
            tokio::time::advance(expected).await;
        }

        // The sixth attempt exhausts the budget.
        assert_eq!(assess(&mut state, Instant::now(), max), Assessment::Probe);
        assert_eq!(note_restart(&mut state, Instant::now(), max), None);
        assert!(state.gave_up);
        assert_eq!(assess(&mut state, Instant::now(), max), Assessment::Skip);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_resets_count() {
        let mut state = RestartState::new(Instant::now());
        let max = 5;

        for _ in 0..3 {
            assert_eq!(assess(&mut state, Instant::now(), max), Assessment::Probe);
            note_restart(&mut state, Instant::now(), max);
            tokio::time::advance(Duration::from_secs(300)).await;
        }
        assert_eq!(state.count, 3);

        // After the hour window passes, the counter resets.
        tokio::time::advance(RESTART_WINDOW).await;
        assert_eq!(assess(&mut state, Instant::now(), max), Assessment::Probe);
        assert_eq!(state.count, 0);
        assert_eq!(note_restart(&mut state, Instant::now(), max), Some(1));
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn backoff_is_monotonic_and_capped(a in 1u32..50, b in 1u32..50) {
                let (low, high) = if a <= b { (a, b) } else { (b, a) };
                prop_assert!(backoff_for_attempt(low) <= backoff_for_attempt(high));
                prop_assert!(backoff_for_attempt(high) <= BACKOFF_CAP);
                prop_assert!(backoff_for_attempt(low) >= BACKOFF_BASE);
            }
        }
    }
}
