//! Asynchronous send buffer with an unacknowledged window.
//!
//! Outbound bytes are cut into chunks. A background worker hands one chunk at a
//! time to the processor (the socket writer). A chunk gets its sequence number the
//! first time it is processed and stays in the unacknowledged window until an
//! acknowledgment for exactly that sequence number arrives. The window survives
//! pauses, and [`SendBuffer::reprocess_unacknowledged`] queues it again, in order,
//! ahead of newer data.

use std::{
    collections::{BTreeSet, VecDeque},
    io,
    sync::{Arc, Condvar, Mutex, OnceLock},
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use log::{debug, trace, warn};

use crate::{
    sync::{lock, wait, wait_timeout},
    wire::WireError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SendBufferState {
    Initialized,
    AsyncProcessing,
    Stopping,
    Terminating,
    Terminated,
}

struct Chunk {
    seqn: i64,
    data: Arc<[u8]>,
    acknowledged: bool,
}

impl Chunk {
    fn new(data: Vec<u8>) -> Self {
        Self {
            seqn: 0,
            data: data.into(),
            acknowledged: false,
        }
    }
}

struct Inner {
    state: SendBufferState,
    filling: Vec<u8>,
    queue: VecDeque<Chunk>,
    unacknowledged: VecDeque<Chunk>,
    pause_reasons: BTreeSet<String>,
    processing: bool,
    sent_seqn: i64,
}

impl Inner {
    fn has_data(&self) -> bool {
        !self.queue.is_empty() || !self.filling.is_empty()
    }
}

pub struct SendBuffer {
    id: String,
    chunk_size: usize,
    inner: Mutex<Inner>,
    changed: Condvar,
    worker_thread: OnceLock<ThreadId>,
}

impl SendBuffer {
    pub fn new(id: &str, chunk_size: usize) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            chunk_size: chunk_size.max(1),
            inner: Mutex::new(Inner {
                state: SendBufferState::Initialized,
                filling: Vec::with_capacity(chunk_size),
                queue: VecDeque::new(),
                unacknowledged: VecDeque::new(),
                pause_reasons: BTreeSet::new(),
                processing: false,
                sent_seqn: 0,
            }),
            changed: Condvar::new(),
            worker_thread: OnceLock::new(),
        })
    }

    /// Spawns the worker. `processor` receives each chunk with its sequence number.
    pub fn start(
        self: &Arc<Self>,
        processor: impl FnMut(i64, &[u8]) -> Result<(), WireError> + Send + 'static,
    ) -> io::Result<()> {
        {
            let mut inner = lock(&self.inner);
            if inner.state != SendBufferState::Initialized {
                warn!("{}: send buffer already started", self.id);
                return Ok(());
            }
            inner.state = SendBufferState::AsyncProcessing;
        }
        let buffer = self.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-sender", self.id))
            .spawn(move || buffer.run(processor))?;
        let _ = self.worker_thread.set(handle.thread().id());
        Ok(())
    }

    fn run(&self, mut processor: impl FnMut(i64, &[u8]) -> Result<(), WireError>) {
        loop {
            let (seqn, data) = {
                let mut inner = lock(&self.inner);
                loop {
                    if inner.state >= SendBufferState::Terminating {
                        return self.finish(inner);
                    }
                    let paused = !inner.pause_reasons.is_empty();
                    if inner.has_data() && !paused {
                        break;
                    }
                    if inner.state == SendBufferState::Stopping {
                        return self.finish(inner);
                    }
                    inner = wait(&self.changed, inner);
                }

                let mut chunk = match inner.queue.pop_front() {
                    Some(chunk) => chunk,
                    None => {
                        let data = std::mem::replace(
                            &mut inner.filling,
                            Vec::with_capacity(self.chunk_size),
                        );
                        Chunk::new(data)
                    }
                };
                if chunk.seqn == 0 {
                    inner.sent_seqn += 1;
                    chunk.seqn = inner.sent_seqn;
                }
                let output = (chunk.seqn, chunk.data.clone());
                inner.unacknowledged.push_back(chunk);
                inner.processing = true;
                output
            };

            let result = processor(seqn, &data);

            let mut inner = lock(&self.inner);
            inner.processing = false;
            self.changed.notify_all();
            drop(inner);
            if let Err(err) = result {
                debug!("{}: chunk {} not sent: {}", self.id, seqn, err);
            }
        }
    }

    fn finish(&self, mut inner: std::sync::MutexGuard<'_, Inner>) {
        inner.state = SendBufferState::Terminated;
        self.changed.notify_all();
        debug!("{}: send buffer terminated", self.id);
    }

    /// Appends bytes, cutting them into chunks
    pub fn put(&self, bytes: &[u8]) {
        let mut inner = lock(&self.inner);
        if inner.state >= SendBufferState::Stopping {
            warn!("{}: {} bytes dropped, send buffer is stopping", self.id, bytes.len());
            return;
        }
        let mut rest = bytes;
        while !rest.is_empty() {
            let room = self.chunk_size - inner.filling.len();
            let count = room.min(rest.len());
            inner.filling.extend_from_slice(&rest[..count]);
            rest = &rest[count..];
            if inner.filling.len() == self.chunk_size {
                let data =
                    std::mem::replace(&mut inner.filling, Vec::with_capacity(self.chunk_size));
                inner.queue.push_back(Chunk::new(data));
            }
        }
        self.changed.notify_all();
    }

    /// Stops handing chunks to the processor. Waits for the chunk in flight unless
    /// called from the worker itself.
    pub fn pause(&self, reason: &str) {
        let mut inner = lock(&self.inner);
        if inner.pause_reasons.insert(reason.to_string()) {
            trace!("{}: paused ({})", self.id, reason);
        }
        if self.worker_thread.get() == Some(&thread::current().id()) {
            return;
        }
        while inner.processing {
            inner = wait(&self.changed, inner);
        }
    }

    pub fn resume(&self, reason: &str) {
        let mut inner = lock(&self.inner);
        if inner.pause_reasons.remove(reason) {
            trace!("{}: resumed ({})", self.id, reason);
        }
        self.changed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        !lock(&self.inner).pause_reasons.is_empty()
    }

    /// Marks one chunk acknowledged. Chunks leave the window from the front, so an
    /// acknowledged chunk behind an unacknowledged one stays until that one is
    /// acknowledged too.
    pub fn acknowledge(&self, seqn: i64) {
        let mut inner = lock(&self.inner);
        if let Some(chunk) = inner
            .unacknowledged
            .iter_mut()
            .find(|chunk| chunk.seqn == seqn)
        {
            chunk.acknowledged = true;
        } else if let Some(position) = inner.queue.iter().position(|chunk| chunk.seqn == seqn) {
            // already delivered by an earlier connection, no need to resend
            inner.queue.remove(position);
        } else {
            trace!("{}: ack for unknown chunk {}", self.id, seqn);
            return;
        }
        while inner
            .unacknowledged
            .front()
            .is_some_and(|chunk| chunk.acknowledged)
        {
            inner.unacknowledged.pop_front();
        }
    }

    /// Queues every unacknowledged chunk again, ahead of newer data
    pub fn reprocess_unacknowledged(&self) {
        let mut inner = lock(&self.inner);
        let window = std::mem::take(&mut inner.unacknowledged);
        let mut resent = 0;
        for chunk in window.into_iter().rev() {
            if !chunk.acknowledged {
                inner.queue.push_front(chunk);
                resent += 1;
            }
        }
        if resent > 0 {
            debug!("{}: {} unacknowledged chunks queued again", self.id, resent);
        }
        self.changed.notify_all();
    }

    /// Lets the worker drain queued data, bounded by `timeout`, then terminates it.
    /// Returns false if data was left behind.
    pub fn stop(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = lock(&self.inner);
        match inner.state {
            SendBufferState::Initialized => {
                inner.state = SendBufferState::Terminated;
                return !inner.has_data();
            }
            SendBufferState::AsyncProcessing => inner.state = SendBufferState::Stopping,
            _ => {}
        }
        self.changed.notify_all();

        while inner.state != SendBufferState::Terminated {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = wait_timeout(&self.changed, inner, deadline - now);
            inner = guard;
        }
        if inner.state == SendBufferState::Terminated {
            return !inner.has_data();
        }
        warn!("{}: send buffer didn't drain in {:?}", self.id, timeout);
        inner.state = SendBufferState::Terminating;
        self.changed.notify_all();
        false
    }

    pub fn state(&self) -> SendBufferState {
        lock(&self.inner).state
    }

    pub fn unacknowledged_count(&self) -> usize {
        lock(&self.inner).unacknowledged.len()
    }

    /// Bytes waiting to be sent, excluding the unacknowledged window
    pub fn pending_bytes(&self) -> usize {
        let inner = lock(&self.inner);
        inner.filling.len() + inner.queue.iter().map(|chunk| chunk.data.len()).sum::<usize>()
    }

    pub fn last_sent_seqn(&self) -> i64 {
        lock(&self.inner).sent_seqn
    }
}
