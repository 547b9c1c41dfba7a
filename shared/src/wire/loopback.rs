use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, Weak},
};

use replica_serde::BufferWriter;

use crate::{
    rd_id::RdId,
    sync::lock,
    wire::{Wire, WireBase, WireConfig},
};

/// In-memory wire pair. Messages sit in an outbox until [`LoopbackWire::flush`]
/// delivers them, which lets tests interleave both sides deterministically.
pub struct LoopbackWire {
    base: WireBase,
    outbox: Mutex<VecDeque<Vec<u8>>>,
    counterpart: Mutex<Weak<LoopbackWire>>,
}

impl LoopbackWire {
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let config = WireConfig::default();
        let make = || {
            Arc::new(Self {
                base: WireBase::new(config.delayed_delivery, config.max_message_length),
                outbox: Mutex::new(VecDeque::new()),
                counterpart: Mutex::new(Weak::new()),
            })
        };
        let a = make();
        let b = make();
        *lock(&a.counterpart) = Arc::downgrade(&b);
        *lock(&b.counterpart) = Arc::downgrade(&a);
        for wire in [&a, &b] {
            wire.base.connected().set(true);
            wire.base.heartbeat_alive().set(true);
        }
        (a, b)
    }

    pub fn pending(&self) -> usize {
        lock(&self.outbox).len()
    }

    /// Delivers the queued messages to the counterpart, returns how many
    pub fn flush(&self) -> usize {
        let Some(counterpart) = lock(&self.counterpart).upgrade() else {
            return 0;
        };
        let mut delivered = 0;
        loop {
            let Some(message) = lock(&self.outbox).pop_front() else {
                return delivered;
            };
            counterpart.base.deliver(&message[4..]);
            delivered += 1;
        }
    }

    /// Flushes both directions until neither side has anything left
    pub fn pump(a: &LoopbackWire, b: &LoopbackWire) -> usize {
        let mut total = 0;
        loop {
            let delivered = a.flush() + b.flush();
            if delivered == 0 {
                return total;
            }
            total += delivered;
        }
    }
}

impl Wire for LoopbackWire {
    fn send(&self, id: RdId, write: &mut dyn FnMut(&mut BufferWriter)) {
        let message = self.base.encode(id, write);
        lock(&self.outbox).push_back(message);
    }

    fn base(&self) -> &WireBase {
        &self.base
    }
}
