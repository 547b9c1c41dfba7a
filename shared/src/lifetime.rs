//! Lifetimes scope every subscription, binding and background task.
//!
//! A [`LifetimeDefinition`] owns the right to terminate; the [`Lifetime`] it hands
//! out can only observe and register termination actions. Termination runs the
//! registered actions in reverse registration order, nested definitions included,
//! so whatever was attached last is detached first.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
};

use log::error;

use crate::sync::lock;

type Action = Box<dyn FnOnce() + Send>;

static NEXT_LIFETIME_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifetimeStatus {
    Alive,
    Terminating,
    Terminated,
}

struct LifetimeState {
    status: LifetimeStatus,
    actions: Vec<(u64, Action)>,
    next_action_id: u64,
}

struct LifetimeInner {
    id: u64,
    eternal: bool,
    state: Mutex<LifetimeState>,
}

impl LifetimeInner {
    fn new(eternal: bool, status: LifetimeStatus) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_LIFETIME_ID.fetch_add(1, Ordering::Relaxed),
            eternal,
            state: Mutex::new(LifetimeState {
                status,
                actions: Vec::new(),
                next_action_id: 0,
            }),
        })
    }

    // Returns the action id, or hands the action back when the lifetime is not alive
    fn add(&self, action: Action) -> Result<Option<u64>, Action> {
        if self.eternal {
            return Ok(None);
        }
        let mut state = lock(&self.state);
        if state.status != LifetimeStatus::Alive {
            return Err(action);
        }
        let id = state.next_action_id;
        state.next_action_id += 1;
        state.actions.push((id, action));
        Ok(Some(id))
    }

    fn remove(&self, action_id: u64) {
        let mut state = lock(&self.state);
        state.actions.retain(|(id, _)| *id != action_id);
    }

    fn terminate(&self) -> bool {
        if self.eternal {
            error!("Eternal lifetime can't be terminated");
            return false;
        }
        let actions = {
            let mut state = lock(&self.state);
            if state.status != LifetimeStatus::Alive {
                return false;
            }
            state.status = LifetimeStatus::Terminating;
            std::mem::take(&mut state.actions)
        };
        for (_, action) in actions.into_iter().rev() {
            action();
        }
        lock(&self.state).status = LifetimeStatus::Terminated;
        true
    }
}

/// Observing side of a lifetime. Cheap to clone.
#[derive(Clone)]
pub struct Lifetime {
    inner: Arc<LifetimeInner>,
}

impl Lifetime {
    /// A lifetime that is never terminated
    pub fn eternal() -> Self {
        Self {
            inner: LifetimeInner::new(true, LifetimeStatus::Alive),
        }
    }

    /// A lifetime that is already over
    pub fn terminated() -> Self {
        Self {
            inner: LifetimeInner::new(false, LifetimeStatus::Terminated),
        }
    }

    pub fn status(&self) -> LifetimeStatus {
        lock(&self.inner.state).status
    }

    pub fn is_alive(&self) -> bool {
        self.status() == LifetimeStatus::Alive
    }

    pub fn is_eternal(&self) -> bool {
        self.inner.eternal
    }

    /// Registers `action` to run at termination. Runs it right away when the
    /// lifetime is no longer alive.
    pub fn on_termination(&self, action: impl FnOnce() + Send + 'static) {
        if let Err(action) = self.inner.add(Box::new(action)) {
            action();
        }
    }

    /// Runs `opening` and registers `closing` only if the lifetime is alive
    pub fn bracket_if_alive<R>(
        &self,
        opening: impl FnOnce() -> R,
        closing: impl FnOnce() + Send + 'static,
    ) -> Option<R> {
        if !self.is_alive() {
            return None;
        }
        let result = opening();
        self.on_termination(closing);
        Some(result)
    }

    pub fn execute_if_alive<R>(&self, action: impl FnOnce() -> R) -> Option<R> {
        if self.is_alive() {
            Some(action())
        } else {
            None
        }
    }

    /// Child definition terminated together with this lifetime
    pub fn create_nested(&self) -> LifetimeDefinition {
        let child = LifetimeDefinition::new();
        let weak_child: Weak<LifetimeInner> = Arc::downgrade(&child.lifetime.inner);
        let registration = self.inner.add(Box::new(move || {
            if let Some(child) = weak_child.upgrade() {
                child.terminate();
            }
        }));
        match registration {
            Ok(Some(action_id)) => {
                let weak_parent = Arc::downgrade(&self.inner);
                child.lifetime.on_termination(move || {
                    if let Some(parent) = weak_parent.upgrade() {
                        parent.remove(action_id);
                    }
                });
            }
            Ok(None) => {}
            Err(_) => {
                child.terminate();
            }
        }
        child
    }

    /// Child definition terminated when either of the two lifetimes ends
    pub fn intersect(&self, other: &Lifetime) -> LifetimeDefinition {
        let definition = self.create_nested();
        let weak_child = Arc::downgrade(&definition.lifetime.inner);
        other.on_termination(move || {
            if let Some(child) = weak_child.upgrade() {
                child.terminate();
            }
        });
        definition
    }

    pub fn ptr_eq(&self, other: &Lifetime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lifetime#{}({:?})", self.inner.id, self.status())
    }
}

/// Owning side of a lifetime
pub struct LifetimeDefinition {
    lifetime: Lifetime,
}

impl LifetimeDefinition {
    pub fn new() -> Self {
        Self {
            lifetime: Lifetime {
                inner: LifetimeInner::new(false, LifetimeStatus::Alive),
            },
        }
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    pub fn is_alive(&self) -> bool {
        self.lifetime.is_alive()
    }

    /// Runs the termination actions in reverse order. Returns false if the lifetime
    /// was already terminating or terminated.
    pub fn terminate(&self) -> bool {
        self.lifetime.inner.terminate()
    }
}

impl Default for LifetimeDefinition {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LifetimeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LifetimeDefinition({:?})", self.lifetime)
    }
}
