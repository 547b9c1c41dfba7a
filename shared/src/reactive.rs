use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use crate::{lifetime::Lifetime, sync::lock};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, Handler<T>)>>,
}

impl<T: 'static> Listeners<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            handlers: Mutex::new(Vec::new()),
        })
    }

    fn add(self: &Arc<Self>, lifetime: &Lifetime, handler: Handler<T>) {
        if !lifetime.is_alive() {
            return;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.handlers).push((id, handler));
        let weak = Arc::downgrade(self);
        lifetime.on_termination(move || {
            if let Some(listeners) = weak.upgrade() {
                lock(&listeners.handlers).retain(|(handler_id, _)| *handler_id != id);
            }
        });
    }

    // Listeners are invoked on a snapshot with no lock held
    fn fire(&self, value: &T) {
        let snapshot: Vec<Handler<T>> = lock(&self.handlers)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in snapshot {
            handler(value);
        }
    }

    fn is_empty(&self) -> bool {
        lock(&self.handlers).is_empty()
    }
}

/// Lifetime scoped event source
pub struct Signal<T> {
    listeners: Arc<Listeners<T>>,
}

impl<T: 'static> Signal<T> {
    pub fn new() -> Self {
        Self {
            listeners: Listeners::new(),
        }
    }

    pub fn advise(&self, lifetime: &Lifetime, handler: impl Fn(&T) + Send + Sync + 'static) {
        self.listeners.add(lifetime, Arc::new(handler));
    }

    pub fn fire(&self, value: &T) {
        self.listeners.fire(value);
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Observable value. Advising delivers the current value first, later
/// notifications fire only when the value actually changes.
pub struct ViewableProperty<T> {
    value: Mutex<T>,
    change: Signal<T>,
}

impl<T: Clone + PartialEq + Send + 'static> ViewableProperty<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
            change: Signal::new(),
        }
    }

    pub fn get(&self) -> T {
        lock(&self.value).clone()
    }

    /// Returns true if the value changed
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = lock(&self.value);
            if *current == value {
                return false;
            }
            *current = value.clone();
        }
        self.change.fire(&value);
        true
    }

    pub fn advise(&self, lifetime: &Lifetime, handler: impl Fn(&T) + Send + Sync + 'static) {
        if !lifetime.is_alive() {
            return;
        }
        let handler: Handler<T> = Arc::new(handler);
        self.change.listeners.add(lifetime, handler.clone());
        let current = self.get();
        handler(&current);
    }

    /// Only future changes, without the initial value
    pub fn change(&self) -> &Signal<T> {
        &self.change
    }
}
