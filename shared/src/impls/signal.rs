use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use log::trace;
use replica_serde::{BufferReader, BufferWriter, Serde, SerdeErr};

use crate::{
    broker::DispatchHelper,
    entity::{
        core::{impl_rd_bindable, BindCore, EntityHooks},
        EntityError, RdBindable, RdReactive,
    },
    lifetime::Lifetime,
    protocol::Protocol,
    rd_id::RdId,
    reactive::Signal,
    value::{RdValue, SerializationCtx},
};

/// Replicated event stream: firing notifies local listeners and the counterpart's
pub struct RdSignal<T> {
    core: BindCore,
    weak_self: Weak<Self>,
    is_async: AtomicBool,
    signal: Signal<T>,
}

impl<T: RdValue> RdSignal<T> {
    pub fn new() -> Arc<Self> {
        Self::with_id(RdId::NULL)
    }

    pub fn with_id(rd_id: RdId) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            core: BindCore::new(rd_id),
            weak_self: weak_self.clone(),
            is_async: AtomicBool::new(false),
            signal: Signal::new(),
        })
    }

    pub fn set_async(&self, is_async: bool) {
        self.is_async.store(is_async, Ordering::Relaxed);
    }

    pub fn fire(&self, value: T) {
        if let Some(binding) = self.core.bound() {
            trace!("{}: send", binding.location);
            binding.send(|writer, ctx| value.write(ctx, writer));
        }
        self.signal.fire(&value);
    }

    pub fn advise(&self, lifetime: &Lifetime, handler: impl Fn(&T) + Send + Sync + 'static) {
        self.signal.advise(lifetime, handler);
    }
}

impl<T: RdValue> EntityHooks for RdSignal<T> {
    fn core(&self) -> &BindCore {
        &self.core
    }

    fn weak_self(&self) -> Weak<Self> {
        self.weak_self.clone()
    }
}

impl_rd_bindable!(RdSignal<T> where T: RdValue);

impl<T: RdValue> RdReactive for RdSignal<T> {
    fn is_async(&self) -> bool {
        self.is_async.load(Ordering::Relaxed)
    }

    fn on_wire_received(
        &self,
        protocol: &Arc<Protocol>,
        reader: &mut BufferReader,
        dispatch: DispatchHelper,
    ) -> Result<(), EntityError> {
        let value = T::read(protocol.serialization_ctx(), reader)?;
        trace!("{}: received", self.core.location());
        let weak = self.weak_self.clone();
        dispatch.dispatch(move || {
            if let Some(signal) = weak.upgrade() {
                signal.signal.fire(&value);
            }
        });
        Ok(())
    }
}

/// Nested form: `RdId`
impl<T: RdValue> RdValue for Arc<RdSignal<T>> {
    fn read(_ctx: &SerializationCtx, reader: &mut BufferReader) -> Result<Self, SerdeErr> {
        Ok(RdSignal::with_id(RdId::de(reader)?))
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
