use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex,
    },
    thread::{self, ThreadId},
};

use log::{error, warn};
use smol::channel::{unbounded, Receiver, Sender};

use crate::{
    lifetime::Lifetime,
    sync::{lock, wait},
};

pub type Action = Box<dyn FnOnce() + Send>;

/// Execution context on which inbound messages are applied to entities
pub trait Scheduler: Send + Sync {
    fn queue(&self, action: Action);

    /// True when called from the scheduler's own execution context
    fn is_active(&self) -> bool;
}

/// Runs every action inline on the calling thread
#[derive(Default)]
pub struct SynchronousScheduler;

impl Scheduler for SynchronousScheduler {
    fn queue(&self, action: Action) {
        action();
    }

    fn is_active(&self) -> bool {
        true
    }
}

struct Pending {
    count: Mutex<usize>,
    drained: Condvar,
}

/// Dedicated "protocol thread" executing actions one at a time in queue order.
/// A panicking action is logged and does not stop the thread.
pub struct SingleThreadScheduler {
    name: String,
    sender: Sender<Action>,
    thread_id: ThreadId,
    pending: Arc<Pending>,
    executed: Arc<AtomicUsize>,
}

impl SingleThreadScheduler {
    pub fn new(lifetime: &Lifetime, name: &str) -> std::io::Result<Arc<Self>> {
        let (sender, receiver): (Sender<Action>, Receiver<Action>) = unbounded();
        let pending = Arc::new(Pending {
            count: Mutex::new(0),
            drained: Condvar::new(),
        });
        let executed = Arc::new(AtomicUsize::new(0));

        let thread_pending = pending.clone();
        let thread_executed = executed.clone();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(action) = receiver.recv_blocking() {
                    if panic::catch_unwind(AssertUnwindSafe(action)).is_err() {
                        error!("Scheduler '{}': action panicked", thread_name);
                    }
                    thread_executed.fetch_add(1, Ordering::Relaxed);
                    let mut count = lock(&thread_pending.count);
                    *count -= 1;
                    if *count == 0 {
                        thread_pending.drained.notify_all();
                    }
                }
            })?;

        let close_sender = sender.clone();
        lifetime.on_termination(move || {
            close_sender.close();
        });

        Ok(Arc::new(Self {
            name: name.to_string(),
            sender,
            thread_id: handle.thread().id(),
            pending,
            executed,
        }))
    }

    /// Blocks until every queued action has run
    pub fn flush(&self) {
        if self.is_active() {
            warn!("Scheduler '{}': flush from its own thread is a no-op", self.name);
            return;
        }
        let mut count = lock(&self.pending.count);
        while *count > 0 {
            count = wait(&self.pending.drained, count);
        }
    }

    pub fn executed_count(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }
}

impl Scheduler for SingleThreadScheduler {
    fn queue(&self, action: Action) {
        *lock(&self.pending.count) += 1;
        if self.sender.send_blocking(action).is_err() {
            warn!("Scheduler '{}' is terminated, action dropped", self.name);
            let mut count = lock(&self.pending.count);
            *count -= 1;
            if *count == 0 {
                self.pending.drained.notify_all();
            }
        }
    }

    fn is_active(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}
