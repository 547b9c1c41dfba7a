use std::sync::{Arc, Mutex, Weak};

use log::{debug, trace};
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

const SLOT: &str = "$";

struct PropertyState<T> {
    value: Option<T>,
    is_master: bool,
    master_version: i32,
    optimize_nested: bool,
    is_async: bool,
    slot: Option<LifetimeDefinition>,
}

/// Replicated single value.
///
/// Each sent change carries `master_version`; the master increments it before
/// sending and rejects inbound changes older than its own version.
pub struct RdProperty<T> {
    core: BindCore,
    weak_self: Weak<Self>,
    state: Mutex<PropertyState<T>>,
    change: Signal<T>,
}

impl<T: RdValue> RdProperty<T> {
    pub fn new() -> Arc<Self> {
        Self::create(RdId::NULL, None)
    }

    pub fn with_value(value: T) -> Arc<Self> {
        Self::create(RdId::NULL, Some(value))
    }

    pub fn with_id(rd_id: RdId) -> Arc<Self> {
        Self::create(rd_id, None)
    }

    fn create(rd_id: RdId, value: Option<T>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            core: BindCore::new(rd_id),
            weak_self: weak_self.clone(),
            state: Mutex::new(PropertyState {
                value,
                is_master: false,
                master_version: 0,
                optimize_nested: false,
                is_async: false,
                slot: None,
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

    /// Gives up mastership
    pub fn slave(&self) {
        self.set_master(false);
    }

    pub fn master_version(&self) -> i32 {
        lock(&self.state).master_version
    }

    /// Skip nested binding for values known to never be bindable
    pub fn set_optimize_nested(&self, optimize_nested: bool) {
        lock(&self.state).optimize_nested = optimize_nested;
    }

    pub fn set_async(&self, is_async: bool) {
        lock(&self.state).is_async = is_async;
    }

    pub fn value(&self) -> Option<T> {
        lock(&self.state).value.clone()
    }

    pub fn has_value(&self) -> bool {
        lock(&self.state).value.is_some()
    }

    /// Local change: applied here and, once bound, sent to the counterpart
    pub fn set(&self, value: T) -> Result<(), EntityError> {
        {
            let mut state = lock(&self.state);
            if state
                .value
                .as_ref()
                .is_some_and(|current| current.value_eq(&value))
            {
                return Ok(());
            }

            let binding = self.core.binding();
            if let Some(binding) = binding.as_ref().filter(|_| !state.optimize_nested) {
                nested::identify_value(&value, binding.identities(), binding.rd_id)?;
                nested::terminate_slot(state.slot.take());
                state.slot = nested::pre_bind_slot(&binding.lifetime, &value, self, SLOT)?;
            }

            if let Some(binding) = binding.as_ref().filter(|binding| binding.bound) {
                if state.is_master {
                    state.master_version += 1;
                }
                let version = state.master_version;
                trace!("{}: send version {}", binding.location, version);
                binding.send(|writer, ctx| {
                    writer.write_i32(version);
                    value.write(ctx, writer);
                });
                nested::bind_slot(&value)?;
            }

            state.value = Some(value.clone());
        }
        self.change.fire(&value);
        Ok(())
    }

    /// Current value if any, then every change
    pub fn advise(&self, lifetime: &Lifetime, handler: impl Fn(&T) + Send + Sync + 'static) {
        if !lifetime.is_alive() {
            return;
        }
        let handler = Arc::new(handler);
        let listener = handler.clone();
        self.change.advise(lifetime, move |value| listener(value));
        if let Some(value) = self.value() {
            handler(&value);
        }
    }

    /// Changes only, local and remote
    pub fn change(&self) -> &Signal<T> {
        &self.change
    }

    fn apply_remote(&self, version: i32, value: T, slot: Option<LifetimeDefinition>) {
        let pre_bound = slot.is_some();
        let changed = {
            let mut state = lock(&self.state);
            if state.is_master && version < state.master_version {
                debug!(
                    "{}: rejected version {}, master is at {}",
                    self.core.location(),
                    version,
                    state.master_version
                );
                nested::terminate_slot(slot);
                return;
            }
            state.master_version = version;
            nested::terminate_slot(state.slot.take());
            state.slot = slot;
            let changed = !state
                .value
                .as_ref()
                .is_some_and(|current| current.value_eq(&value));
            state.value = Some(value.clone());
            changed
        };
        if pre_bound {
            nested::bind_accepted(&value, self);
        }
        if changed {
            self.change.fire(&value);
        }
    }
}

impl<T: RdValue> EntityHooks for RdProperty<T> {
    fn core(&self) -> &BindCore {
        &self.core
    }

    fn weak_self(&self) -> Weak<Self> {
        self.weak_self.clone()
    }

    fn identify_children(&self, identities: &dyn Identities, id: RdId) -> Result<(), EntityError> {
        let state = lock(&self.state);
        match state.value.as_ref().filter(|_| !state.optimize_nested) {
            Some(value) => nested::identify_value(value, identities, id),
            None => Ok(()),
        }
    }

    fn pre_init(&self, binding: &Binding) -> Result<(), EntityError> {
        let mut state = lock(&self.state);
        if state.optimize_nested {
            return Ok(());
        }
        if let Some(value) = state.value.clone() {
            nested::identify_value(&value, binding.identities(), binding.rd_id)?;
            state.slot = nested::pre_bind_slot(&binding.lifetime, &value, self, SLOT)?;
        }
        Ok(())
    }

    fn init(&self, _binding: &Binding) -> Result<(), EntityError> {
        let value = lock(&self.state).value.clone();
        match value {
            Some(value) => nested::bind_slot(&value),
            None => Ok(()),
        }
    }

    fn unbind(&self) {
        lock(&self.state).slot = None;
    }
}

impl_rd_bindable!(RdProperty<T> where T: RdValue);

impl<T: RdValue> RdReactive for RdProperty<T> {
    fn is_async(&self) -> bool {
        lock(&self.state).is_async
    }

    fn on_wire_received(
        &self,
        protocol: &Arc<Protocol>,
        reader: &mut BufferReader,
        dispatch: DispatchHelper,
    ) -> Result<(), EntityError> {
        let version = reader.read_i32()?;
        let value = T::read(protocol.serialization_ctx(), reader)?;
        trace!("{}: received version {}", self.core.location(), version);

        let optimize_nested = lock(&self.state).optimize_nested;
        let slot = if optimize_nested {
            None
        } else {
            nested::pre_bind_slot(dispatch.lifetime(), &value, self, SLOT)?
        };

        let weak = self.weak_self.clone();
        dispatch.dispatch(move || {
            if let Some(property) = weak.upgrade() {
                property.apply_remote(version, value, slot);
            }
        });
        Ok(())
    }
}

/// Nested form: `RdId, bool hasValue, value?`
impl<T: RdValue> RdValue for Arc<RdProperty<T>> {
    fn read(ctx: &SerializationCtx, reader: &mut BufferReader) -> Result<Self, SerdeErr> {
        let id = RdId::de(reader)?;
        let value = if reader.read_bool()? {
            Some(T::read(ctx, reader)?)
        } else {
            None
        };
        Ok(RdProperty::create(id, value))
    }

    fn write(&self, ctx: &SerializationCtx, writer: &mut BufferWriter) {
        self.rd_id().ser(writer);
        let state = lock(&self.state);
        match &state.value {
            Some(value) => {
                writer.write_bool(true);
                value.write(ctx, writer);
            }
            None => writer.write_bool(false),
        }
    }

    fn value_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }

    fn as_bindable(&self) -> Option<Arc<dyn RdBindable>> {
        Some(self.clone())
    }
}
