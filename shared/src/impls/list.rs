use std::sync::{Arc, Mutex, Weak};

use log::{error, trace};
use replica_serde::{BufferReader, BufferWriter, Serde, SerdeErr};

use crate::{
    broker::DispatchHelper,
    entity::{
        core::{impl_rd_bindable, BindCore, Binding, EntityHooks},
        nested, EntityError, RdBindable, RdReactive,
    },
    identities::Identities,
    lifetime::{Lifetime, LifetimeDefinition},
    protocol::Protocol,
    rd_id::RdId,
    reactive::Signal,
    sync::lock,
    value::{RdValue, SerializationCtx},
};

const VERSION_SHIFT: u32 = 2;
const OP_MASK: i64 = (1 << VERSION_SHIFT) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ListOp {
    Add = 0,
    Update = 1,
    Remove = 2,
}

impl ListOp {
    fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ListOp::Add),
            1 => Some(ListOp::Update),
            2 => Some(ListOp::Remove),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ListEvent<V> {
    Add { index: usize, value: V },
    Update { index: usize, old: V, value: V },
    Remove { index: usize, value: V },
}

impl<V> ListEvent<V> {
    pub fn index(&self) -> usize {
        match self {
            ListEvent::Add { index, .. }
            | ListEvent::Update { index, .. }
            | ListEvent::Remove { index, .. } => *index,
        }
    }
}

struct ListState<V> {
    items: Vec<V>,
    slots: Vec<Option<LifetimeDefinition>>,
    next_version: i64,
    optimize_nested: bool,
    is_async: bool,
}

/// Replicated ordered list.
///
/// Both ends count versions in lockstep: every change is stamped with the sender's
/// next version and the receiver must be expecting exactly that version. A mismatch
/// means both ends modified the list concurrently, which is a programming error.
pub struct RdList<V> {
    core: BindCore,
    weak_self: Weak<Self>,
    state: Mutex<ListState<V>>,
    change: Signal<ListEvent<V>>,
}

/// Location segment of an element, taken from its index when it is bound. Later
/// inserts and removals shift elements without renaming them, so the name is only
/// a diagnostic hint. Routing goes by id.
fn slot_name(index: usize) -> String {
    format!("[{}]", index)
}

impl<V: RdValue> RdList<V> {
    pub fn new() -> Arc<Self> {
        Self::create(RdId::NULL, 1)
    }

    pub fn with_id(rd_id: RdId) -> Arc<Self> {
        Self::create(rd_id, 1)
    }

    fn create(rd_id: RdId, next_version: i64) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            core: BindCore::new(rd_id),
            weak_self: weak_self.clone(),
            state: Mutex::new(ListState {
                items: Vec::new(),
                slots: Vec::new(),
                next_version,
                optimize_nested: false,
                is_async: false,
            }),
            change: Signal::new(),
        })
    }

    pub fn set_optimize_nested(&self, optimize_nested: bool) {
        lock(&self.state).optimize_nested = optimize_nested;
    }

    pub fn set_async(&self, is_async: bool) {
        lock(&self.state).is_async = is_async;
    }

    pub fn next_version(&self) -> i64 {
        lock(&self.state).next_version
    }

    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<V> {
        lock(&self.state).items.get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<V> {
        lock(&self.state).items.clone()
    }

    pub fn add(&self, value: V) -> Result<(), EntityError> {
        let index = self.len();
        self.insert(index, value)
    }

    pub fn insert(&self, index: usize, value: V) -> Result<(), EntityError> {
        let event = {
            let mut state = lock(&self.state);
            self.check_index(index, state.items.len() + 1)?;
            let slot = self.prepare_slot(&state, index, &value)?;
            state.items.insert(index, value.clone());
            state.slots.insert(index, slot);
            self.send_local(&mut state, ListOp::Add, index, Some(&value))?;
            ListEvent::Add { index, value }
        };
        self.change.fire(&event);
        Ok(())
    }

    /// Replaces the element at `index`, returns the previous one
    pub fn set(&self, index: usize, value: V) -> Result<V, EntityError> {
        let old = {
            let mut state = lock(&self.state);
            self.check_index(index, state.items.len())?;
            if state.items[index].value_eq(&value) {
                return Ok(value);
            }
            nested::terminate_slot(state.slots[index].take());
            let slot = self.prepare_slot(&state, index, &value)?;
            let old = std::mem::replace(&mut state.items[index], value.clone());
            state.slots[index] = slot;
            self.send_local(&mut state, ListOp::Update, index, Some(&value))?;
            old
        };
        self.change.fire(&ListEvent::Update {
            index,
            old: old.clone(),
            value,
        });
        Ok(old)
    }

    pub fn remove_at(&self, index: usize) -> Result<V, EntityError> {
        let value = {
            let mut state = lock(&self.state);
            self.check_index(index, state.items.len())?;
            nested::terminate_slot(state.slots.remove(index));
            let value = state.items.remove(index);
            self.send_local(&mut state, ListOp::Remove, index, None)?;
            value
        };
        self.change.fire(&ListEvent::Remove {
            index,
            value: value.clone(),
        });
        Ok(value)
    }

    /// Removes the first element equal to `value`
    pub fn remove(&self, value: &V) -> Result<bool, EntityError> {
        let position = lock(&self.state)
            .items
            .iter()
            .position(|item| item.value_eq(value));
        match position {
            Some(index) => self.remove_at(index).map(|_| true),
            None => Ok(false),
        }
    }

    /// Removes from the back, one change per element
    pub fn clear(&self) -> Result<(), EntityError> {
        while !self.is_empty() {
            self.remove_at(self.len() - 1)?;
        }
        Ok(())
    }

    /// `Add` for every current element, then every change
    pub fn advise(
        &self,
        lifetime: &Lifetime,
        handler: impl Fn(&ListEvent<V>) + Send + Sync + 'static,
    ) {
        if !lifetime.is_alive() {
            return;
        }
        let handler = Arc::new(handler);
        let listener = handler.clone();
        self.change.advise(lifetime, move |event| listener(event));
        for (index, value) in self.to_vec().into_iter().enumerate() {
            handler(&ListEvent::Add { index, value });
        }
    }

    pub fn change(&self) -> &Signal<ListEvent<V>> {
        &self.change
    }

    fn check_index(&self, index: usize, bound: usize) -> Result<(), EntityError> {
        if index >= bound {
            return Err(EntityError::IndexOutOfBounds {
                location: self.core.location(),
                index,
                len: bound.saturating_sub(1),
            });
        }
        Ok(())
    }

    fn prepare_slot(
        &self,
        state: &ListState<V>,
        index: usize,
        value: &V,
    ) -> Result<Option<LifetimeDefinition>, EntityError> {
        if state.optimize_nested {
            return Ok(None);
        }
        let Some(binding) = self.core.binding() else {
            return Ok(None);
        };
        nested::identify_value(value, binding.identities(), binding.rd_id)?;
        nested::pre_bind_slot(&binding.lifetime, value, self, &slot_name(index))
    }

    fn send_local(
        &self,
        state: &mut ListState<V>,
        op: ListOp,
        index: usize,
        value: Option<&V>,
    ) -> Result<(), EntityError> {
        let Some(binding) = self.core.bound() else {
            return Ok(());
        };
        let version = state.next_version;
        state.next_version += 1;
        trace!("{}: send {:?} [{}] version {}", binding.location, op, index, version);
        binding.send(|writer, ctx| {
            writer.write_i64(op as i64 | (version << VERSION_SHIFT));
            writer.write_i32(index as i32);
            if let Some(value) = value {
                value.write(ctx, writer);
            }
        });
        match value {
            Some(value) if !state.optimize_nested => nested::bind_slot(value),
            _ => Ok(()),
        }
    }

    fn apply_remote(
        &self,
        op: ListOp,
        version: i64,
        index: usize,
        value: Option<V>,
        slot: Option<LifetimeDefinition>,
    ) {
        let pre_bound = slot.is_some();
        let outcome = {
            let mut state = lock(&self.state);
            if version != state.next_version {
                Err(state.next_version)
            } else {
                state.next_version += 1;
                Ok(Self::apply(&mut state, op, index, value, slot))
            }
        };
        match outcome {
            Err(expected) => panic!(
                "Version conflict for {}. Expected version {}, received {}. Are you modifying a list from two sides?",
                self.core.location(),
                expected,
                version
            ),
            Ok(Some(event)) => {
                match &event {
                    ListEvent::Add { value, .. } | ListEvent::Update { value, .. } if pre_bound => {
                        nested::bind_accepted(value, self)
                    }
                    _ => {}
                }
                self.change.fire(&event)
            }
            Ok(None) => error!(
                "{}: {:?} at index {} doesn't fit the list",
                self.core.location(),
                op,
                index
            ),
        }
    }

    fn apply(
        state: &mut ListState<V>,
        op: ListOp,
        index: usize,
        value: Option<V>,
        slot: Option<LifetimeDefinition>,
    ) -> Option<ListEvent<V>> {
        match (op, value) {
            (ListOp::Add, Some(value)) if index <= state.items.len() => {
                state.items.insert(index, value.clone());
                state.slots.insert(index, slot);
                Some(ListEvent::Add { index, value })
            }
            (ListOp::Update, Some(value)) if index < state.items.len() => {
                nested::terminate_slot(std::mem::replace(&mut state.slots[index], slot));
                let old = std::mem::replace(&mut state.items[index], value.clone());
                Some(ListEvent::Update { index, old, value })
            }
            (ListOp::Remove, _) if index < state.items.len() => {
                nested::terminate_slot(state.slots.remove(index));
                let value = state.items.remove(index);
                Some(ListEvent::Remove { index, value })
            }
            _ => {
                nested::terminate_slot(slot);
                None
            }
        }
    }
}

impl<V: RdValue> EntityHooks for RdList<V> {
    fn core(&self) -> &BindCore {
        &self.core
    }

    fn weak_self(&self) -> Weak<Self> {
        self.weak_self.clone()
    }

    fn identify_children(&self, identities: &dyn Identities, id: RdId) -> Result<(), EntityError> {
        let state = lock(&self.state);
        if state.optimize_nested {
            return Ok(());
        }
        for item in &state.items {
            nested::identify_value(item, identities, id)?;
        }
        Ok(())
    }

    fn pre_init(&self, binding: &Binding) -> Result<(), EntityError> {
        let mut state = lock(&self.state);
        if state.optimize_nested {
            return Ok(());
        }
        let items = state.items.clone();
        for (index, item) in items.iter().enumerate() {
            nested::identify_value(item, binding.identities(), binding.rd_id)?;
            state.slots[index] =
                nested::pre_bind_slot(&binding.lifetime, item, self, &slot_name(index))?;
        }
        Ok(())
    }

    // Elements added before binding reach the counterpart as regular adds
    fn init(&self, binding: &Binding) -> Result<(), EntityError> {
        let mut state = lock(&self.state);
        let items = state.items.clone();
        for (index, item) in items.iter().enumerate() {
            let version = state.next_version;
            state.next_version += 1;
            binding.send(|writer, ctx| {
                writer.write_i64(ListOp::Add as i64 | (version << VERSION_SHIFT));
                writer.write_i32(index as i32);
                item.write(ctx, writer);
            });
            if !state.optimize_nested {
                nested::bind_slot(item)?;
            }
        }
        Ok(())
    }

    fn unbind(&self) {
        for slot in lock(&self.state).slots.iter_mut() {
            *slot = None;
        }
    }
}

impl_rd_bindable!(RdList<V> where V: RdValue);

impl<V: RdValue> RdReactive for RdList<V> {
    fn is_async(&self) -> bool {
        lock(&self.state).is_async
    }

    fn on_wire_received(
        &self,
        protocol: &Arc<Protocol>,
        reader: &mut BufferReader,
        dispatch: DispatchHelper,
    ) -> Result<(), EntityError> {
        let header = reader.read_i64()?;
        let version = header >> VERSION_SHIFT;
        let Some(op) = ListOp::from_code(header & OP_MASK) else {
            return Err(EntityError::InvalidOpcode {
                location: self.core.location(),
                opcode: header & OP_MASK,
            });
        };
        let index = reader.read_len()?;
        let value = match op {
            ListOp::Add | ListOp::Update => Some(V::read(protocol.serialization_ctx(), reader)?),
            ListOp::Remove => None,
        };
        trace!("{}: received {:?} [{}] version {}", self.core.location(), op, index, version);

        let optimize_nested = lock(&self.state).optimize_nested;
        let slot = match &value {
            Some(value) if !optimize_nested => {
                nested::pre_bind_slot(dispatch.lifetime(), value, self, &slot_name(index))?
            }
            _ => None,
        };

        let weak = self.weak_self.clone();
        dispatch.dispatch(move || {
            if let Some(list) = weak.upgrade() {
                list.apply_remote(op, version, index, value, slot);
            }
        });
        Ok(())
    }
}

/// Nested form: `i64 nextVersion, RdId`
impl<V: RdValue> RdValue for Arc<RdList<V>> {
    fn read(_ctx: &SerializationCtx, reader: &mut BufferReader) -> Result<Self, SerdeErr> {
        let next_version = reader.read_i64()?;
        let id = RdId::de(reader)?;
        Ok(RdList::create(id, next_version))
    }

    fn write(&self, _ctx: &SerializationCtx, writer: &mut BufferWriter) {
        writer.write_i64(self.next_version());
        self.rd_id().ser(writer);
    }

    fn value_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }

    fn as_bindable(&self) -> Option<Arc<dyn RdBindable>> {
        Some(self.clone())
    }
}
