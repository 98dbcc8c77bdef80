//! Delayed task execution.
//!
//! One process-wide worker thread runs tasks in deadline order. It is started
//! on first use and lives for the rest of the process.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::panic_message;

/// Name of the worker thread, as shown in panic messages and logs.
const WORKER_NAME: &str = "forkwait-scheduler";

static SCHEDULER: OnceLock<Scheduler> = OnceLock::new();

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A task waiting for its deadline.
struct Entry {
    due: Instant,
    /// Insertion order, so tasks due at the same instant run first-in first-out.
    seq: u64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        (self.due, self.seq) == (other.due, other.seq)
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

#[derive(Default)]
struct Queue {
    tasks: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    changed: Condvar,
}

struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    fn start() -> Self {
        let shared = Arc::new(Shared::default());
        let worker = Arc::clone(&shared);

        match thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || run(worker))
        {
            Ok(_) => tracing::debug!("scheduler thread started"),
            // Tasks stay queued; nothing else can run them.
            Err(e) => tracing::error!(error = %e, "cannot start scheduler thread"),
        }

        Self { shared }
    }

    fn push(&self, due: Instant, task: Task) {
        let mut queue = self.shared.queue.lock();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.tasks.push(Reverse(Entry { due, seq, task }));
        drop(queue);
        self.shared.changed.notify_one();
    }
}

/// Run `task` on the scheduler thread once `delay` has elapsed.
///
/// Fire-and-forget. A task that panics is logged and does not stop later
/// tasks from running. A delay too long for `Instant` to represent means the
/// task never runs.
pub(crate) fn schedule<F>(delay: Duration, task: F)
where
    F: FnOnce() + Send + 'static,
{
    let Some(due) = Instant::now().checked_add(delay) else {
        tracing::debug!(?delay, "delay out of range; task will never run");
        return;
    };
    SCHEDULER
        .get_or_init(Scheduler::start)
        .push(due, Box::new(task));
}

/// Worker loop.
fn run(shared: Arc<Shared>) {
    let mut queue = shared.queue.lock();
    loop {
        let next_due = queue.tasks.peek().map(|Reverse(entry)| entry.due);
        match next_due {
            None => shared.changed.wait(&mut queue),
            Some(due) if due > Instant::now() => {
                shared.changed.wait_until(&mut queue, due);
            }
            Some(_) => {
                if let Some(Reverse(entry)) = queue.tasks.pop() {
                    MutexGuard::unlocked(&mut queue, || run_task(entry));
                }
            }
        }
    }
}

fn run_task(entry: Entry) {
    let seq = entry.seq;
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry.task)) {
        tracing::warn!(
            task = seq,
            panic = %panic_message(payload.as_ref()),
            "scheduled task panicked"
        );
    }
}
