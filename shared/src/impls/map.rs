use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    sync::{Arc, Mutex, Weak},
};

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

const VERSIONED_FLAG_SHIFT: u32 = 8;
const OP_MASK: i32 = (1 << VERSIONED_FLAG_SHIFT) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MapOp {
    Add = 0,
    Update = 1,
    Remove = 2,
    Ack = 3,
}

impl MapOp {
    fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(MapOp::Add),
            1 => Some(MapOp::Update),
            2 => Some(MapOp::Remove),
            3 => Some(MapOp::Ack),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub enum MapEvent<K, V> {
    Add { key: K, value: V },
    Update { key: K, old: V, value: V },
    Remove { key: K, value: V },
}

impl<K, V> MapEvent<K, V> {
    pub fn key(&self) -> &K {
        match self {
            MapEvent::Add { key, .. } | MapEvent::Update { key, .. } | MapEvent::Remove { key, .. } => {
                key
            }
        }
    }
}

struct Entry<V> {
    value: V,
    slot: Option<LifetimeDefinition>,
}

struct MapState<K, V> {
    entries: HashMap<K, Entry<V>>,
    next_version: i64,
    pending_for_ack: HashMap<K, i64>,
    is_master: bool,
    optimize_nested: bool,
    is_async: bool,
}

/// Replicated key/value map.
///
/// A master map stamps every change with a version and remembers it as pending until
/// the counterpart acknowledges it. Non-versioned changes arriving for a key with a
/// pending version are dropped, so the master's own value wins.
pub struct RdMap<K, V> {
    core: BindCore,
    weak_self: Weak<Self>,
    state: Mutex<MapState<K, V>>,
    change: Signal<MapEvent<K, V>>,
}

fn slot_name<K: Debug>(key: &K) -> String {
    format!("[{:?}]", key)
}

impl<K, V> RdMap<K, V>
where
    K: RdValue + Eq + Hash + Debug,
    V: RdValue,
{
    pub fn new() -> Arc<Self> {
        Self::with_id(RdId::NULL)
    }

    pub fn with_id(rd_id: RdId) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            core: BindCore::new(rd_id),
            weak_self: weak_self.clone(),
            state: Mutex::new(MapState {
                entries: HashMap::new(),
                next_version: 0,
                pending_for_ack: HashMap::new(),
                is_master: false,
                optimize_nested: false,
                is_async: false,
            }),
            change: Signal::new(),
        })
    }

    pub fn is_master(&self) -> bool {
        lock(&self.state).is_master
    }

    pub fn set_master(&self, is_master: bool) {
        lock(&self.state).is_master = is_master;
    }

    /// Also gives up mastership, nested-free maps never version their changes
    pub fn set_optimize_nested(&self, optimize_nested: bool) {
        let mut state = lock(&self.state);
        state.optimize_nested = optimize_nested;
        if optimize_nested {
            state.is_master = false;
        }
    }

    pub fn set_async(&self, is_async: bool) {
        lock(&self.state).is_async = is_async;
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &K) -> Option<V> {
        lock(&self.state)
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        lock(&self.state).entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        lock(&self.state).entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(K, V)> {
        lock(&self.state)
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// Number of master changes the counterpart hasn't acknowledged yet
    pub fn pending_ack_count(&self) -> usize {
        lock(&self.state).pending_for_ack.len()
    }

    /// Inserts or replaces, returns the previous value
    pub fn set(&self, key: K, value: V) -> Result<Option<V>, EntityError> {
        let event = {
            let mut state = lock(&self.state);
            let old = match state.entries.get(&key) {
                Some(entry) if entry.value.value_eq(&value) => return Ok(Some(value)),
                Some(entry) => Some(entry.value.clone()),
                None => None,
            };
            if let Some(entry) = state.entries.get_mut(&key) {
                nested::terminate_slot(entry.slot.take());
            }
            let slot = self.prepare_slot(&state, &key, &value)?;
            state.entries.insert(
                key.clone(),
                Entry {
                    value: value.clone(),
                    slot,
                },
            );
            let op = if old.is_some() { MapOp::Update } else { MapOp::Add };
            self.send_local(&mut state, op, &key, Some(&value))?;
            match old {
                Some(old) => MapEvent::Update { key, old, value },
                None => MapEvent::Add { key, value },
            }
        };
        let old = match &event {
            MapEvent::Update { old, .. } => Some(old.clone()),
            _ => None,
        };
        self.change.fire(&event);
        Ok(old)
    }

    pub fn remove(&self, key: &K) -> Result<Option<V>, EntityError> {
        let value = {
            let mut state = lock(&self.state);
            let Some(entry) = state.entries.remove(key) else {
                return Ok(None);
            };
            nested::terminate_slot(entry.slot);
            self.send_local(&mut state, MapOp::Remove, key, None)?;
            entry.value
        };
        self.change.fire(&MapEvent::Remove {
            key: key.clone(),
            value: value.clone(),
        });
        Ok(Some(value))
    }

    pub fn clear(&self) -> Result<(), EntityError> {
        for key in self.keys() {
            self.remove(&key)?;
        }
        Ok(())
    }

    /// `Add` for every current entry, then every change
    pub fn advise(
        &self,
        lifetime: &Lifetime,
        handler: impl Fn(&MapEvent<K, V>) + Send + Sync + 'static,
    ) {
        if !lifetime.is_alive() {
            return;
        }
        let handler = Arc::new(handler);
        let listener = handler.clone();
        self.change.advise(lifetime, move |event| listener(event));
        for (key, value) in self.entries() {
            handler(&MapEvent::Add { key, value });
        }
    }

    pub fn change(&self) -> &Signal<MapEvent<K, V>> {
        &self.change
    }

    fn prepare_slot(
        &self,
        state: &MapState<K, V>,
        key: &K,
        value: &V,
    ) -> Result<Option<LifetimeDefinition>, EntityError> {
        if state.optimize_nested {
            return Ok(None);
        }
        let Some(binding) = self.core.binding() else {
            return Ok(None);
        };
        nested::identify_value(value, binding.identities(), binding.rd_id)?;
        nested::pre_bind_slot(&binding.lifetime, value, self, &slot_name(key))
    }

    fn send_local(
        &self,
        state: &mut MapState<K, V>,
        op: MapOp,
        key: &K,
        value: Option<&V>,
    ) -> Result<(), EntityError> {
        let Some(binding) = self.core.bound() else {
            return Ok(());
        };
        Self::send_change(state, &binding, op, key, value);
        match value {
            Some(value) if !state.optimize_nested => nested::bind_slot(value),
            _ => Ok(()),
        }
    }

    fn send_change(
        state: &mut MapState<K, V>,
        binding: &Binding,
        op: MapOp,
        key: &K,
        value: Option<&V>,
    ) {
        let master = state.is_master;
        let version = if master {
            state.next_version += 1;
            state.pending_for_ack.insert(key.clone(), state.next_version);
            state.next_version
        } else {
            0
        };
        trace!(
            "{}: send {:?} key {:?} version {}",
            binding.location,
            op,
            key,
            version
        );
        binding.send(|writer, ctx| {
            writer.write_i32(((master as i32) << VERSIONED_FLAG_SHIFT) | op as i32);
            if master {
                writer.write_i64(version);
            }
            key.write(ctx, writer);
            if let Some(value) = value {
                value.write(ctx, writer);
            }
        });
    }

    fn receive_ack(&self, versioned: bool, version: i64, key: K) {
        let location = self.core.location();
        let problem = {
            let mut state = lock(&self.state);
            if !versioned {
                Some("Received Ack while msg hasn't versioned flag set".to_string())
            } else if !state.is_master {
                Some("Received Ack when not a Master".to_string())
            } else {
                match state.pending_for_ack.get(&key).copied() {
                    None => Some("No pending for Ack".to_string()),
                    Some(pending) if pending < version => Some(format!(
                        "Pending version {} < Ack version {}",
                        pending, version
                    )),
                    Some(pending) => {
                        // an older ack is dropped, a newer change is still in flight
                        if pending == version {
                            state.pending_for_ack.remove(&key);
                        }
                        None
                    }
                }
            }
        };
        match problem {
            None => trace!("{}: Ack key {:?} version {}", location, key, version),
            Some(problem) => error!(
                "{}: Ack key {:?} version {} >> {}",
                location, key, version, problem
            ),
        }
    }

    fn apply_remote(
        &self,
        op: MapOp,
        versioned: bool,
        version: i64,
        key: K,
        value: Option<V>,
        slot: Option<LifetimeDefinition>,
    ) {
        let location = self.core.location();
        let pre_bound = slot.is_some();
        let (event, is_master) = {
            let mut state = lock(&self.state);
            let is_master = state.is_master;
            let accepted =
                versioned || !is_master || !state.pending_for_ack.contains_key(&key);
            let event = if accepted {
                trace!("{}: received {:?} key {:?} version {}", location, op, key, version);
                Self::apply(&mut state, key.clone(), value, slot)
            } else {
                trace!(
                    "{}: received {:?} key {:?} version {} >> REJECTED",
                    location,
                    op,
                    key,
                    version
                );
                nested::terminate_slot(slot);
                None
            };

            if versioned {
                if let Some(binding) = self.core.bound() {
                    trace!("{}: send Ack key {:?} version {}", location, key, version);
                    binding.send(|writer, ctx| {
                        writer.write_i32((1 << VERSIONED_FLAG_SHIFT) | MapOp::Ack as i32);
                        writer.write_i64(version);
                        key.write(ctx, writer);
                    });
                }
            }
            (event, is_master)
        };

        if versioned && is_master {
            error!("Both ends are masters: {}", location);
        }
        if let Some(event) = event {
            match &event {
                MapEvent::Add { value, .. } | MapEvent::Update { value, .. } if pre_bound => {
                    nested::bind_accepted(value, self)
                }
                _ => {}
            }
            self.change.fire(&event);
        }
    }

    fn apply(
        state: &mut MapState<K, V>,
        key: K,
        value: Option<V>,
        slot: Option<LifetimeDefinition>,
    ) -> Option<MapEvent<K, V>> {
        match value {
            Some(value) => {
                let previous = state.entries.insert(
                    key.clone(),
                    Entry {
                        value: value.clone(),
                        slot,
                    },
                );
                match previous {
                    Some(previous) => {
                        nested::terminate_slot(previous.slot);
                        Some(MapEvent::Update {
                            key,
                            old: previous.value,
                            value,
                        })
                    }
                    None => Some(MapEvent::Add { key, value }),
                }
            }
            None => {
                let entry = state.entries.remove(&key)?;
                nested::terminate_slot(entry.slot);
                Some(MapEvent::Remove {
                    key,
                    value: entry.value,
                })
            }
        }
    }
}

impl<K, V> EntityHooks for RdMap<K, V>
where
    K: RdValue + Eq + Hash + Debug,
    V: RdValue,
{
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
        for entry in state.entries.values() {
            nested::identify_value(&entry.value, identities, id)?;
        }
        Ok(())
    }

    fn pre_init(&self, binding: &Binding) -> Result<(), EntityError> {
        let mut state = lock(&self.state);
        if state.optimize_nested {
            return Ok(());
        }
        for (key, entry) in state.entries.iter_mut() {
            nested::identify_value(&entry.value, binding.identities(), binding.rd_id)?;
            entry.slot =
                nested::pre_bind_slot(&binding.lifetime, &entry.value, self, &slot_name(key))?;
        }
        Ok(())
    }

    // Entries set before binding reach the counterpart as regular adds
    fn init(&self, binding: &Binding) -> Result<(), EntityError> {
        let mut state = lock(&self.state);
        let entries: Vec<(K, V)> = state
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();
        for (key, value) in entries {
            Self::send_change(&mut state, binding, MapOp::Add, &key, Some(&value));
            if !state.optimize_nested {
                nested::bind_slot(&value)?;
            }
        }
        Ok(())
    }

    fn unbind(&self) {
        let mut state = lock(&self.state);
        for entry in state.entries.values_mut() {
            entry.slot = None;
        }
        state.pending_for_ack.clear();
    }
}

impl_rd_bindable!(RdMap<K, V> where K: RdValue + Eq + Hash + Debug, V: RdValue);

impl<K, V> RdReactive for RdMap<K, V>
where
    K: RdValue + Eq + Hash + Debug,
    V: RdValue,
{
    fn is_async(&self) -> bool {
        lock(&self.state).is_async
    }

    fn on_wire_received(
        &self,
        protocol: &Arc<Protocol>,
        reader: &mut BufferReader,
        dispatch: DispatchHelper,
    ) -> Result<(), EntityError> {
        let header = reader.read_i32()?;
        let versioned = (header >> VERSIONED_FLAG_SHIFT) != 0;
        let Some(op) = MapOp::from_code(header & OP_MASK) else {
            return Err(EntityError::InvalidOpcode {
                location: self.core.location(),
                opcode: i64::from(header & OP_MASK),
            });
        };
        let version = if versioned { reader.read_i64()? } else { 0 };
        let ctx = protocol.serialization_ctx();
        let key = K::read(ctx, reader)?;

        let weak = self.weak_self.clone();
        if op == MapOp::Ack {
            dispatch.dispatch(move || {
                if let Some(map) = weak.upgrade() {
                    map.receive_ack(versioned, version, key);
                }
            });
            return Ok(());
        }

        let value = match op {
            MapOp::Add | MapOp::Update => Some(V::read(ctx, reader)?),
            _ => None,
        };
        let optimize_nested = lock(&self.state).optimize_nested;
        let slot = match &value {
            Some(value) if !optimize_nested => {
                nested::pre_bind_slot(dispatch.lifetime(), value, self, &slot_name(&key))?
            }
            _ => None,
        };

        dispatch.dispatch(move || {
            if let Some(map) = weak.upgrade() {
                map.apply_remote(op, versioned, version, key, value, slot);
            }
        });
        Ok(())
    }
}

/// Nested form: `RdId`
impl<K, V> RdValue for Arc<RdMap<K, V>>
where
    K: RdValue + Eq + Hash + Debug,
    V: RdValue,
{
    fn read(_ctx: &SerializationCtx, reader: &mut BufferReader) -> Result<Self, SerdeErr> {
        Ok(RdMap::with_id(RdId::de(reader)?))
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
