use std::{
    collections::HashSet,
    hash::Hash,
    sync::{Arc, Mutex, Weak},
};

use log::trace;
use replica_serde::{BufferReader, BufferWriter, Serde, SerdeErr};

use crate::{
    broker::DispatchHelper,
    entity::{
        core::{impl_rd_bindable, BindCore, Binding, EntityHooks},
        EntityError, RdBindable, RdReactive,
    },
    lifetime::Lifetime,
    protocol::Protocol,
    rd_id::RdId,
    reactive::Signal,
    sync::lock,
    value::{RdValue, SerializationCtx},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetEvent<T> {
    Add(T),
    Remove(T),
}

impl<T> SetEvent<T> {
    pub fn value(&self) -> &T {
        match self {
            SetEvent::Add(value) | SetEvent::Remove(value) => value,
        }
    }

    fn code(&self) -> i32 {
        match self {
            SetEvent::Add(_) => 0,
            SetEvent::Remove(_) => 1,
        }
    }
}

struct SetState<T> {
    // insertion order
    items: Vec<T>,
    members: HashSet<T>,
    is_async: bool,
}

/// Replicated set of plain values, kept in insertion order
pub struct RdSet<T> {
    core: BindCore,
    weak_self: Weak<Self>,
    state: Mutex<SetState<T>>,
    change: Signal<SetEvent<T>>,
}

impl<T: RdValue + Eq + Hash> RdSet<T> {
    pub fn new() -> Arc<Self> {
        Self::with_id(RdId::NULL)
    }

    pub fn with_id(rd_id: RdId) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            core: BindCore::new(rd_id),
            weak_self: weak_self.clone(),
            state: Mutex::new(SetState {
                items: Vec::new(),
                members: HashSet::new(),
                is_async: false,
            }),
            change: Signal::new(),
        })
    }

    pub fn set_async(&self, is_async: bool) {
        lock(&self.state).is_async = is_async;
    }

    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, value: &T) -> bool {
        lock(&self.state).members.contains(value)
    }

    pub fn to_vec(&self) -> Vec<T> {
        lock(&self.state).items.clone()
    }

    /// Returns false if the value was already present
    pub fn add(&self, value: T) -> bool {
        self.change_locally(SetEvent::Add(value))
    }

    /// Returns false if the value wasn't present
    pub fn remove(&self, value: &T) -> bool {
        self.change_locally(SetEvent::Remove(value.clone()))
    }

    pub fn clear(&self) {
        for item in self.to_vec() {
            self.remove(&item);
        }
    }

    /// `Add` for every current element, then every change
    pub fn advise(
        &self,
        lifetime: &Lifetime,
        handler: impl Fn(&SetEvent<T>) + Send + Sync + 'static,
    ) {
        if !lifetime.is_alive() {
            return;
        }
        let handler = Arc::new(handler);
        let listener = handler.clone();
        self.change.advise(lifetime, move |event| listener(event));
        for item in self.to_vec() {
            handler(&SetEvent::Add(item));
        }
    }

    pub fn change(&self) -> &Signal<SetEvent<T>> {
        &self.change
    }

    fn change_locally(&self, event: SetEvent<T>) -> bool {
        {
            let mut state = lock(&self.state);
            if !Self::apply(&mut state, &event) {
                return false;
            }
            if let Some(binding) = self.core.bound() {
                Self::send_event(&binding, &event);
            }
        }
        self.change.fire(&event);
        true
    }

    fn send_event(binding: &Binding, event: &SetEvent<T>) {
        trace!("{}: send {:?}", binding.location, event.code());
        binding.send(|writer, ctx| {
            writer.write_i32(event.code());
            event.value().write(ctx, writer);
        });
    }

    fn apply(state: &mut SetState<T>, event: &SetEvent<T>) -> bool {
        match event {
            SetEvent::Add(value) => {
                if !state.members.insert(value.clone()) {
                    return false;
                }
                state.items.push(value.clone());
                true
            }
            SetEvent::Remove(value) => {
                if !state.members.remove(value) {
                    return false;
                }
                state.items.retain(|item| item != value);
                true
            }
        }
    }

    fn apply_remote(&self, event: SetEvent<T>) {
        let changed = Self::apply(&mut lock(&self.state), &event);
        if changed {
            self.change.fire(&event);
        }
    }
}

impl<T: RdValue + Eq + Hash> EntityHooks for RdSet<T> {
    fn core(&self) -> &BindCore {
        &self.core
    }

    fn weak_self(&self) -> Weak<Self> {
        self.weak_self.clone()
    }

    fn init(&self, binding: &Binding) -> Result<(), EntityError> {
        let state = lock(&self.state);
        for item in &state.items {
            Self::send_event(binding, &SetEvent::Add(item.clone()));
        }
        Ok(())
    }
}

impl_rd_bindable!(RdSet<T> where T: RdValue + Eq + Hash);

impl<T: RdValue + Eq + Hash> RdReactive for RdSet<T> {
    fn is_async(&self) -> bool {
        lock(&self.state).is_async
    }

    fn on_wire_received(
        &self,
        protocol: &Arc<Protocol>,
        reader: &mut BufferReader,
        dispatch: DispatchHelper,
    ) -> Result<(), EntityError> {
        let code = reader.read_i32()?;
        let value = T::read(protocol.serialization_ctx(), reader)?;
        let event = match code {
            0 => SetEvent::Add(value),
            1 => SetEvent::Remove(value),
            _ => {
                return Err(EntityError::InvalidOpcode {
                    location: self.core.location(),
                    opcode: i64::from(code),
                })
            }
        };
        trace!("{}: received {:?}", self.core.location(), code);

        let weak = self.weak_self.clone();
        dispatch.dispatch(move || {
            if let Some(set) = weak.upgrade() {
                set.apply_remote(event);
            }
        });
        Ok(())
    }
}

/// Nested form: `RdId`
impl<T: RdValue + Eq + Hash> RdValue for Arc<RdSet<T>> {
    fn read(_ctx: &SerializationCtx, reader: &mut BufferReader) -> Result<Self, SerdeErr> {
        Ok(RdSet::with_id(RdId::de(reader)?))
    }

    fn write(&self, _ctx: &SerializationCtx, writer: &mut BufferWriter) {
        self.rd_id().ser(writer);
    }

    fn value_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }

    fn as_bindable(&self) -> Option<Arc<dyn RdBindable>> {
        Some(self.clone())
    }
}
