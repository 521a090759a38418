//! Cancellable, reschedulable timers
//!
//! A [`Scheduler`] owns a set of named timer slots (`"election"`,
//! `"heartbeat"`, `"gossip-round"`). Scheduling into an occupied slot aborts
//! the previous task first, so a slot never has two live timers.
//!
//! Every firing hands its callback a [`TimerToken`]. Components check
//! [`Scheduler::is_current`] while holding their own state lock before
//! acting on the token: a timer that fired concurrently with a state
//! transition (which rescheduled the slot) or with [`Scheduler::shutdown`]
//! sees a stale token and does nothing.
//!
//! Lock order is always component state first, scheduler second. The
//! scheduler never calls back into a component while holding its own lock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::sync::lock_or_recover;

/// Identity of one scheduled firing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    slot: &'static str,
    generation: u64,
}

impl TimerToken {
    /// Slot this timer was scheduled into
    pub fn slot(&self) -> &'static str {
        self.slot
    }

    /// Monotonic generation assigned at scheduling time
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct ActiveTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    slots: HashMap<&'static str, ActiveTimer>,
    next_generation: u64,
    shut_down: bool,
}

/// Owner of a component's timers
pub struct Scheduler {
    name: String,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    /// Create a scheduler; `name` only appears in logs
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(SchedulerState::default()),
        }
    }

    /// Run `task` once after `delay`, replacing whatever occupied `slot`
    pub fn schedule_once<F>(
        &self,
        slot: &'static str,
        delay: Duration,
        task: F,
    ) -> CoreResult<TimerToken>
    where
        F: FnOnce(TimerToken) + Send + 'static,
    {
        self.install(slot, |token, runtime| {
            runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                task(token);
            })
        })
    }

    /// Run `task` every `interval`, first firing one interval from now
    pub fn schedule_repeating<F>(
        &self,
        slot: &'static str,
        interval: Duration,
        task: F,
    ) -> CoreResult<TimerToken>
    where
        F: Fn(TimerToken) + Send + 'static,
    {
        self.install(slot, |token, runtime| {
            runtime.spawn(async move {
                let start = tokio::time::Instant::now() + interval;
                let mut ticker = tokio::time::interval_at(start, interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    task(token);
                }
            })
        })
    }

    fn install<S>(&self, slot: &'static str, spawn: S) -> CoreResult<TimerToken>
    where
        S: FnOnce(TimerToken, &Handle) -> JoinHandle<()>,
    {
        let runtime = Handle::try_current().map_err(|_| CoreError::NoRuntime)?;
        let mut state = lock_or_recover(&self.state, "scheduler");

        if state.shut_down {
            return Err(CoreError::SchedulerShutDown(self.name.clone()));
        }

        state.next_generation += 1;
        let token = TimerToken {
            slot,
            generation: state.next_generation,
        };

        let handle = spawn(token, &runtime);
        if let Some(previous) = state.slots.insert(
            slot,
            ActiveTimer {
                generation: token.generation,
                handle,
            },
        ) {
            previous.handle.abort();
        }

        debug!(
            scheduler = %self.name,
            slot,
            generation = token.generation,
            "Timer scheduled"
        );
        Ok(token)
    }

    /// Whether `token` is still the live timer of its slot
    pub fn is_current(&self, token: &TimerToken) -> bool {
        let state = lock_or_recover(&self.state, "scheduler");
        !state.shut_down
            && state
                .slots
                .get(token.slot)
                .is_some_and(|active| active.generation == token.generation)
    }

    /// Cancel the timer in `slot`; returns whether one was active
    pub fn cancel(&self, slot: &'static str) -> bool {
        let mut state = lock_or_recover(&self.state, "scheduler");
        match state.slots.remove(slot) {
            Some(active) => {
                active.handle.abort();
                debug!(scheduler = %self.name, slot, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Whether a timer currently occupies `slot`
    pub fn is_scheduled(&self, slot: &'static str) -> bool {
        lock_or_recover(&self.state, "scheduler")
            .slots
            .contains_key(slot)
    }

    /// Cancel every timer and refuse new ones. Idempotent.
    pub fn shutdown(&self) {
        let mut state = lock_or_recover(&self.state, "scheduler");
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        for (_, active) in state.slots.drain() {
            active.handle.abort();
        }
        debug!(scheduler = %self.name, "Scheduler shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        lock_or_recover(&self.state, "scheduler").shut_down
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, active) in state.slots.drain() {
            active.handle.abort();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock_or_recover(&self.state, "scheduler");
        f.debug_struct("Scheduler")
            .field("name", &self.name)
            .field("slots", &state.slots.keys().collect::<Vec<_>>())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_once_timer_fires() {
        let scheduler = Scheduler::new("test");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        scheduler
            .schedule_once("once", Duration::from_millis(100), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_previous_timer() {
        let scheduler = Scheduler::new("test");
        let fired = Arc::new(AtomicUsize::new(0));

        let first = fired.clone();
        let stale = scheduler
            .schedule_once("slot", Duration::from_millis(100), move |_| {
                first.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let second = fired.clone();
        let current = scheduler
            .schedule_once("slot", Duration::from_millis(300), move |_| {
                second.fetch_add(10, Ordering::SeqCst);
            })
            .unwrap();

        assert!(!scheduler.is_current(&stale));
        assert!(scheduler.is_current(&current));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_timer_and_cancel() {
        let scheduler = Scheduler::new("test");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        scheduler
            .schedule_repeating("tick", Duration::from_millis(50), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(175)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);

        assert!(scheduler.cancel("tick"));
        assert!(!scheduler.cancel("tick"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent_and_final() {
        let scheduler = Scheduler::new("test");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        let token = scheduler
            .schedule_once("once", Duration::from_millis(10), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        scheduler.shutdown();
        scheduler.shutdown();

        assert!(scheduler.is_shut_down());
        assert!(!scheduler.is_current(&token));
        assert!(matches!(
            scheduler.schedule_once("once", Duration::from_millis(10), |_| {}),
            Err(CoreError::SchedulerShutDown(_))
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_scheduling_without_runtime_fails() {
        let scheduler = Scheduler::new("test");
        assert!(matches!(
            scheduler.schedule_once("once", Duration::from_millis(10), |_| {}),
            Err(CoreError::NoRuntime)
        ));
    }
}
