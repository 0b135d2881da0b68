// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{DelayQueue, Job};

const ERR_POISONED_LOCK: &str = "poisoned lock - a job panicked while the manual queue was borrowed";

/// A [`DelayQueue`] that never runs anything on its own.
///
/// Tests drive it explicitly: every scheduled delay is recorded, and jobs run one at a time in
/// submission order when [`run_next`][Self::run_next] or [`run_all`][Self::run_all] is
/// awaited. Delays are observed, never waited for.
///
/// Clones share the same pending jobs and history.
///
/// # Examples
///
/// ```
/// use persevere::{DelayQueue, Job, ManualQueue};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let queue = ManualQueue::new();
/// queue.schedule(1500, Job::new(async {}));
///
/// assert_eq!(queue.scheduled_delays(), [1500]);
/// assert!(queue.run_next().await);
/// assert!(queue.is_empty());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualQueue {
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<Job>,
    history: Vec<i64>,
}

impl ManualQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of jobs waiting to run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().expect(ERR_POISONED_LOCK).pending.len()
    }

    /// Returns `true` when no job is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every delay ever passed to [`schedule`][DelayQueue::schedule], oldest first.
    #[must_use]
    pub fn scheduled_delays(&self) -> Vec<i64> {
        self.state.lock().expect(ERR_POISONED_LOCK).history.clone()
    }

    /// Runs the oldest pending job to completion.
    ///
    /// Returns `false` when there was nothing to run.
    pub async fn run_next(&self) -> bool {
        let next = self.state.lock().expect(ERR_POISONED_LOCK).pending.pop_front();

        match next {
            Some(job) => {
                job.await;
                true
            }
            None => false,
        }
    }

    /// Runs jobs until the queue is empty, including jobs scheduled by the jobs it runs.
    ///
    /// Returns the number of jobs executed. Never returns when the jobs keep rescheduling
    /// themselves forever.
    #[cfg_attr(test, mutants::skip)] // an inverted condition loops forever
    pub async fn run_all(&self) -> usize {
        let mut executed = 0;
        while self.run_next().await {
            executed += 1;
        }

        executed
    }
}

impl DelayQueue for ManualQueue {
    fn schedule(&self, delay_millis: i64, job: Job) {
        let mut state = self.state.lock().expect(ERR_POISONED_LOCK);
        state.history.push(delay_millis);
        state.pending.push_back(job);
    }

    fn discard_cancelled(&self) {
        self.state.lock().expect(ERR_POISONED_LOCK).pending.retain(|job| !job.is_cancelled());
    }
}
