// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, sleep_until};
use tracing::Level;

use super::{DelayQueue, Job};
use crate::telemetry::QUEUE_CLOSED_EVENT;

// Matches the horizon tokio uses for "never" timers.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A [`DelayQueue`] backed by a single tokio timer task.
///
/// Pending jobs live in a min-heap keyed by deadline and submission order. The timer task
/// sleeps until the earliest deadline and spawns each due job onto the runtime, so a slow
/// attempt never holds up the jobs behind it.
///
/// Jobs of a cancelled call are dropped when the heap is purged after
/// [`discard_cancelled`][DelayQueue::discard_cancelled], or on arrival when they are already
/// cancelled, so nothing they capture outlives the cancellation by more than a timer wakeup.
///
/// Clones share the same timer task. The task exits once every clone is dropped and the
/// heap is drained.
///
/// # Examples
///
/// ```
/// use persevere::{DelayQueue, Job, TimerQueue};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let queue = TimerQueue::new();
/// let (sender, receiver) = tokio::sync::oneshot::channel();
///
/// queue.schedule(10, Job::new(async move {
///     let _ = sender.send("done");
/// }));
///
/// assert_eq!(receiver.await.unwrap(), "done");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TimerQueue {
    sender: UnboundedSender<Command>,
}

impl TimerQueue {
    /// Starts a timer task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_handle(&Handle::current())
    }

    /// Starts a timer task on the runtime behind `handle`.
    #[must_use]
    pub fn with_handle(handle: &Handle) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        handle.spawn(run_timer(receiver));

        Self { sender }
    }
}

impl DelayQueue for TimerQueue {
    fn schedule(&self, delay_millis: i64, job: Job) {
        let entry = Entry {
            deadline: deadline_after(Instant::now(), delay_millis),
            job,
        };

        if self.sender.send(Command::Schedule(entry)).is_err() {
            tracing::event!(
                name: QUEUE_CLOSED_EVENT,
                Level::ERROR,
                retry.delay = delay_millis,
            );
        }
    }

    fn discard_cancelled(&self) {
        // A closed queue holds no jobs.
        let _ = self.sender.send(Command::DiscardCancelled);
    }
}

enum Command {
    Schedule(Entry),
    DiscardCancelled,
}

struct Entry {
    deadline: Instant,
    job: Job,
}

struct Pending {
    deadline: Instant,
    sequence: u64,
    job: Job,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.sequence).cmp(&(other.deadline, other.sequence))
    }
}

fn deadline_after(now: Instant, delay_millis: i64) -> Instant {
    let delay = u64::try_from(delay_millis).map_or(Duration::ZERO, Duration::from_millis);
    now + delay.min(FAR_FUTURE)
}

#[cfg_attr(test, mutants::skip)] // mutating the loop conditions hangs the timer task
async fn run_timer(mut receiver: UnboundedReceiver<Command>) {
    let mut pending: BinaryHeap<Reverse<Pending>> = BinaryHeap::new();
    let mut sequence: u64 = 0;
    let mut open = true;

    loop {
        let now = Instant::now();
        while pending.peek().is_some_and(|Reverse(next)| next.deadline <= now) {
            if let Some(Reverse(due)) = pending.pop() {
                tokio::spawn(due.job);
            }
        }

        if !open && pending.is_empty() {
            break;
        }

        let next_deadline = pending.peek().map(|Reverse(next)| next.deadline);

        tokio::select! {
            received = receiver.recv(), if open => match received {
                Some(Command::Schedule(Entry { deadline, job })) => {
                    if !job.is_cancelled() {
                        pending.push(Reverse(Pending { deadline, sequence, job }));
                        sequence = sequence.wrapping_add(1);
                    }
                }
                Some(Command::DiscardCancelled) => pending.retain(|Reverse(entry)| !entry.job.is_cancelled()),
                None => open = false,
            },
            () = sleep_until_deadline(next_deadline) => {}
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
