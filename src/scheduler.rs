// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cancellable timers keyed by server id and purpose.
//!
//! Every component that arms timers (restart delays, reconnect delays,
//! health checks, heartbeats) goes through a [`TaskScheduler`]. At most one
//! task exists per [`TaskKey`]; arming a key again replaces the previous
//! task.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

/// What a scheduled task is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPurpose {
    Startup,
    Restart,
    Reconnect,
    HealthCheck,
    Heartbeat,
    Metrics,
}

/// Identity of a scheduled task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub id: String,
    pub purpose: TaskPurpose,
}

impl TaskKey {
    pub fn new(id: impl Into<String>, purpose: TaskPurpose) -> Self {
        Self {
            id: id.into(),
            purpose,
        }
    }
}

type TaskMap = HashMap<TaskKey, (u64, JoinHandle<()>)>;

/// Owner of all timers armed by one component.
#[derive(Debug, Default)]
pub struct TaskScheduler {
    tasks: Arc<Mutex<TaskMap>>,
    next_token: AtomicU64,
}

fn lock(tasks: &Mutex<TaskMap>) -> std::sync::MutexGuard<'_, TaskMap> {
    tasks.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` once after `delay`, replacing any task under the same key.
    ///
    /// Once the delay elapses the task detaches itself from the map before
    /// running, so cancelling the key from inside `fut` does not abort it.
    pub fn schedule_once<F>(&self, key: TaskKey, delay: Duration, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);
        let task_key = key.clone();

        let mut guard = lock(&self.tasks);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut map = lock(&tasks);
                if map.get(&task_key).is_some_and(|(t, _)| *t == token) {
                    map.remove(&task_key);
                }
            }
            fut.await;
        });
        if let Some((_, previous)) = guard.insert(key.clone(), (token, handle)) {
            trace!(id = %key.id, purpose = ?key.purpose, "Replacing scheduled task");
            previous.abort();
        }
    }

    /// Call `f` every `period`, starting one period from now.
    ///
    /// Ticks missed while a previous tick was still running are skipped.
    pub fn schedule_interval<F, Fut>(&self, key: TaskKey, period: Duration, mut f: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        let mut guard = lock(&self.tasks);
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                f().await;
            }
        });
        if let Some((_, previous)) = guard.insert(key, (token, handle)) {
            previous.abort();
        }
    }

    /// Cancel the task under `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        match lock(&self.tasks).remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether a task is currently armed under `key`.
    pub fn is_scheduled(&self, key: &TaskKey) -> bool {
        lock(&self.tasks)
            .get(key)
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Cancel every task belonging to `id`.
    pub fn cancel_for(&self, id: &str) {
        lock(&self.tasks).retain(|key, (_, handle)| {
            if key.id == id {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Cancel everything.
    pub fn cancel_all(&self) {
        for (_, (_, handle)) in lock(&self.tasks).drain() {
            handle.abort();
        }
    }

    /// Number of armed tasks.
    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Set of ids with a periodic job in progress.
///
/// Periodic work acquires a guard for its id and skips the tick when one is
/// already held, so slow checks never pile up.
#[derive(Debug, Default, Clone)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<String>>>,
}

/// Releases its id when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    ids: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, id: &str) -> Option<InFlightGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            ids: Arc::clone(&self.ids),
            id: id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_once_runs_after_delay() {
        let scheduler = TaskScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let key = TaskKey::new("docs", TaskPurpose::Restart);

        let h = Arc::clone(&hits);
        scheduler.schedule_once(key.clone(), Duration::from_millis(20), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.is_scheduled(&key));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled(&key));
    }

    #[tokio::test]
    async fn test_rearm_replaces_pending() {
        let scheduler = TaskScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let key = TaskKey::new("docs", TaskPurpose::Reconnect);

        for _ in 0..3 {
            let h = Arc::clone(&hits);
            scheduler.schedule_once(key.clone(), Duration::from_millis(30), async move {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel() {
        let scheduler = TaskScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let key = TaskKey::new("docs", TaskPurpose::Restart);

        let h = Arc::clone(&hits);
        scheduler.schedule_once(key.clone(), Duration::from_millis(30), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.cancel(&key));
        assert!(!scheduler.cancel(&key));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let scheduler = TaskScheduler::new();
        scheduler.schedule_once(
            TaskKey::new("a", TaskPurpose::Restart),
            Duration::from_secs(10),
            async {},
        );
        scheduler.schedule_once(
            TaskKey::new("a", TaskPurpose::HealthCheck),
            Duration::from_secs(10),
            async {},
        );
        scheduler.schedule_once(
            TaskKey::new("b", TaskPurpose::Restart),
            Duration::from_secs(10),
            async {},
        );
        assert_eq!(scheduler.len(), 3);

        scheduler.cancel_for("a");
        assert_eq!(scheduler.len(), 1);

        scheduler.cancel_all();
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_interval_ticks() {
        let scheduler = TaskScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let key = TaskKey::new("docs", TaskPurpose::Heartbeat);

        let h = Arc::clone(&hits);
        scheduler.schedule_interval(key.clone(), Duration::from_millis(20), move || {
            let h = Arc::clone(&h);
            async move {
                h.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(110)).await;
        scheduler.cancel(&key);
        let seen = hits.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected at least two ticks, saw {seen}");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_in_flight_guard() {
        let in_flight = InFlight::new();
        let guard = in_flight.try_acquire("docs");
        assert!(guard.is_some());
        assert!(in_flight.try_acquire("docs").is_none());
        assert!(in_flight.try_acquire("search").is_some());

        drop(guard);
        assert!(in_flight.try_acquire("docs").is_some());
    }
}
