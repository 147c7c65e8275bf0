//! Cancellable deadlines owned by the task that arms them.
//!
//! Neither type spawns anything: the owner awaits [`Timer::fired`] or
//! [`Deadlines::expired`] inside its own `select!` loop, so dropping the
//! owner drops every pending deadline with it.

use std::collections::HashMap;
use std::future::pending;
use std::hash::Hash;

use tokio::time::{sleep_until, Duration, Instant};

/// A single optional deadline.
#[derive(Debug, Default)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer `after` from now, replacing any previous deadline.
    pub fn arm(&mut self, after: Duration) {
        self.arm_at(Instant::now() + after);
    }

    pub fn arm_at(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves once the deadline passes and disarms the timer.
    /// Never resolves while disarmed.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => pending::<()>().await,
        }
    }
}

/// A set of deadlines keyed by `K`; rescheduling a key extends it.
#[derive(Debug)]
pub struct Deadlines<K> {
    entries: HashMap<K, Instant>,
}

impl<K> Default for Deadlines<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K> Deadlines<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, key: K, after: Duration) {
        self.entries.insert(key, Instant::now() + after);
    }

    /// Returns whether the key was scheduled.
    pub fn cancel(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Resolves with the earliest key once its deadline passes, removing it.
    /// Never resolves while the set is empty.
    pub async fn expired(&mut self) -> K {
        let next = self
            .entries
            .iter()
            .min_by_key(|(_, deadline)| **deadline)
            .map(|(key, deadline)| (key.clone(), *deadline));

        match next {
            Some((key, deadline)) => {
                sleep_until(deadline).await;
                self.entries.remove(&key);
                key
            }
            None => pending().await,
        }
    }
}
