//! Script timers: `rune.timer.after` / `rune.timer.every`.
//!
//! Two layers:
//!
//! * [`TimerScheduler`] turns a delay into a future posting of a [`Job`] onto
//!   the timer channel.  Each timer is a small tokio task; the job is never
//!   executed on that task, only posted.  The session's timer relay forwards
//!   postings into the main event queue.
//! * [`TimerTable`] is the per-runtime map from script-visible handle to the
//!   live timer and its callback.  It lives on the consumer thread and needs
//!   no locking.
//!
//! Cancellation aborts the task.  A posting that raced with `cancel` is
//! harmless: by the time the consumer sees it the handle is no longer tracked
//! and [`TimerTable::fire`] returns `None`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::trace;

use crate::event::Job;

/// Shortest interval accepted for repeating timers.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Clamp a script-supplied number of seconds to a valid [`Duration`].
///
/// Negative and NaN values become zero; infinity becomes one day.
pub fn duration_from_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        Duration::ZERO
    } else if !secs.is_finite() || secs > 86_400.0 {
        Duration::from_secs(86_400)
    } else {
        Duration::from_secs_f64(secs)
    }
}

// ── TimerGuard ────────────────────────────────────────────────────────────

/// Cancel capability for one scheduled timer.  Dropping it cancels too.
#[derive(Debug)]
pub struct TimerGuard {
    task: AbortHandle,
}

impl TimerGuard {
    /// Stop the timer.  Safe after it fired and safe to call repeatedly.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── TimerScheduler ────────────────────────────────────────────────────────

/// Spawns delayed postings onto the timer channel.
///
/// Cheap to clone; must be used from within a tokio runtime.
#[derive(Debug, Clone)]
pub struct TimerScheduler {
    tx: mpsc::Sender<Job>,
}

impl TimerScheduler {
    pub fn new(tx: mpsc::Sender<Job>) -> Self {
        Self { tx }
    }

    /// Post `job` once after `delay`.
    pub fn after(&self, delay: Duration, job: Job) -> TimerGuard {
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            time::sleep(delay).await;
            trace!(target: "timer", ?job, "one-shot fired");
            let _ = tx.send(job).await;
        });
        TimerGuard { task: task.abort_handle() }
    }

    /// Post `job` every `interval` until cancelled.
    pub fn every(&self, interval: Duration, job: Job) -> TimerGuard {
        let interval = interval.max(MIN_INTERVAL);
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                trace!(target: "timer", ?job, "repeating fired");
                if tx.send(job.clone()).await.is_err() {
                    break; // session gone
                }
            }
        });
        TimerGuard { task: task.abort_handle() }
    }
}

// ── TimerTable ────────────────────────────────────────────────────────────

struct LiveTimer<C> {
    guard: TimerGuard,
    callback: C,
    repeating: bool,
}

/// Handle → live timer map owned by one runtime instance.
///
/// Handles start at 1 and increase monotonically for the table's lifetime;
/// a fresh table (one per runtime) starts over.  `C` is the callback type
/// (a Lua registry key in production).
pub struct TimerTable<C> {
    scheduler: TimerScheduler,
    generation: u64,
    last_handle: u64,
    live: HashMap<u64, LiveTimer<C>>,
}

impl<C> TimerTable<C> {
    pub fn new(scheduler: TimerScheduler, generation: u64) -> Self {
        Self { scheduler, generation, last_handle: 0, live: HashMap::new() }
    }

    /// Schedule `callback` after `delay` (or every `delay` if `repeating`).
    pub fn schedule(&mut self, delay: Duration, repeating: bool, callback: C) -> u64 {
        self.last_handle += 1;
        let handle = self.last_handle;
        let job = Job::Timer { generation: self.generation, handle };
        let guard = if repeating {
            self.scheduler.every(delay, job)
        } else {
            self.scheduler.after(delay, job)
        };
        self.live.insert(handle, LiveTimer { guard, callback, repeating });
        handle
    }

    /// Stop and forget `handle`.  Unknown handles are ignored.
    ///
    /// Returns the callback so the caller can release it.
    pub fn cancel(&mut self, handle: u64) -> Option<C> {
        self.live.remove(&handle).map(|t| {
            t.guard.cancel();
            t.callback
        })
    }

    /// Stop every timer.  Idempotent.
    pub fn cancel_all(&mut self) -> Vec<C> {
        self.live
            .drain()
            .map(|(_, t)| {
                t.guard.cancel();
                t.callback
            })
            .collect()
    }

    /// Resolve the callback for a firing of `handle`.
    ///
    /// `resolve` sees the callback while it is still tracked; a one-shot
    /// timer's mapping is removed right after, before the caller runs the
    /// resolved value.  Returns `None` for handles no longer tracked.
    pub fn fire<R>(&mut self, handle: u64, resolve: impl FnOnce(&C) -> R) -> Option<(R, Option<C>)> {
        let timer = self.live.get(&handle)?;
        let resolved = resolve(&timer.callback);
        let released = if timer.repeating {
            None
        } else {
            self.live.remove(&handle).map(|t| t.callback)
        };
        Some((resolved, released))
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.live.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

impl<C> Drop for TimerTable<C> {
    fn drop(&mut self) {
        for (_, t) in self.live.drain() {
            t.guard.cancel();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn table() -> (TimerTable<&'static str>, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(16);
        (TimerTable::new(TimerScheduler::new(tx), 7), rx)
    }

    #[test]
    fn duration_clamping() {
        assert_eq!(duration_from_secs(-3.0), Duration::ZERO);
        assert_eq!(duration_from_secs(f64::NAN), Duration::ZERO);
        assert_eq!(duration_from_secs(f64::INFINITY), secs(86_400));
        assert_eq!(duration_from_secs(1.5), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_posts_after_delay() {
        let (tx, mut rx) = mpsc::channel(4);
        let sched = TimerScheduler::new(tx);
        let _guard = sched.after(secs(2), Job::Reload);

        assert!(time::timeout(secs(1), rx.recv()).await.is_err());
        assert_eq!(rx.recv().await, Some(Job::Reload));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_posting_and_is_idempotent() {
        let (tx, mut rx) = mpsc::channel(4);
        let sched = TimerScheduler::new(tx);
        let guard = sched.after(secs(1), Job::Reload);
        guard.cancel();
        guard.cancel();
        assert!(time::timeout(secs(5), rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_posts_until_cancelled() {
        let (tx, mut rx) = mpsc::channel(4);
        let sched = TimerScheduler::new(tx);
        let guard = sched.every(secs(1), Job::Reload);
        assert_eq!(rx.recv().await, Some(Job::Reload));
        assert_eq!(rx.recv().await, Some(Job::Reload));
        guard.cancel();
        assert!(time::timeout(secs(5), rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn handles_start_at_one_and_increase() {
        let (mut t, _rx) = table();
        assert_eq!(t.schedule(secs(1), false, "a"), 1);
        assert_eq!(t.schedule(secs(1), true, "b"), 2);
        assert_eq!(t.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn firing_one_shot_removes_mapping() {
        let (mut t, mut rx) = table();
        let h = t.schedule(secs(1), false, "cb");
        let job = rx.recv().await.unwrap();
        assert_eq!(job, Job::Timer { generation: 7, handle: h });

        let (seen, released) = t.fire(h, |cb| *cb).unwrap();
        assert_eq!(seen, "cb");
        assert_eq!(released, Some("cb"));
        assert!(!t.contains(h));
        // A late cancel after the firing was posted is a no-op.
        assert!(t.cancel(h).is_none());
        assert!(t.fire(h, |cb| *cb).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn firing_repeating_keeps_mapping() {
        let (mut t, _rx) = table();
        let h = t.schedule(secs(1), true, "tick");
        let (_, released) = t.fire(h, |_| ()).unwrap();
        assert!(released.is_none());
        assert!(t.contains(h));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_then_cancel_is_noop() {
        let (mut t, mut rx) = table();
        let a = t.schedule(secs(1), false, "a");
        let b = t.schedule(secs(1), true, "b");
        assert_eq!(t.cancel_all().len(), 2);
        assert!(t.cancel_all().is_empty());
        assert!(t.cancel(a).is_none());
        assert!(t.cancel(b).is_none());
        assert!(time::timeout(secs(5), rx.recv()).await.is_err());
    }
}
