use std::sync::{Arc, Mutex, Weak};

use log::trace;
use replica_serde::BufferWriter;

use crate::{
    entity::{BindState, EntityError, RdDynamic, RdReactive},
    identities::Identities,
    lifetime::Lifetime,
    protocol::Protocol,
    rd_id::{RName, RdId},
    sync::lock,
    value::SerializationCtx,
};

struct BindData {
    rd_id: RdId,
    location: RName,
    protocol: Option<Arc<Protocol>>,
    lifetime: Lifetime,
    state: BindState,
}

/// Identity and attachment shared by every entity kind
pub(crate) struct BindCore {
    data: Mutex<BindData>,
}

/// Snapshot of an attached entity, taken without holding the core lock
pub(crate) struct Binding {
    pub protocol: Arc<Protocol>,
    pub rd_id: RdId,
    pub lifetime: Lifetime,
    pub location: RName,
    pub bound: bool,
}

impl Binding {
    pub fn send(&self, mut write: impl FnMut(&mut BufferWriter, &SerializationCtx)) {
        let ctx = self.protocol.serialization_ctx();
        self.protocol
            .wire()
            .send(self.rd_id, &mut |writer: &mut BufferWriter| write(writer, ctx));
    }

    pub fn identities(&self) -> &dyn Identities {
        self.protocol.identities()
    }
}

impl BindCore {
    pub fn new(rd_id: RdId) -> Self {
        Self {
            data: Mutex::new(BindData {
                rd_id,
                location: RName::empty(),
                protocol: None,
                lifetime: Lifetime::terminated(),
                state: BindState::NotBound,
            }),
        }
    }

    pub fn rd_id(&self) -> RdId {
        lock(&self.data).rd_id
    }

    pub fn location(&self) -> RName {
        lock(&self.data).location.clone()
    }

    pub fn protocol(&self) -> Option<Arc<Protocol>> {
        lock(&self.data).protocol.clone()
    }

    pub fn state(&self) -> BindState {
        lock(&self.data).state
    }

    pub fn binding(&self) -> Option<Binding> {
        let data = lock(&self.data);
        let protocol = data.protocol.clone()?;
        Some(Binding {
            protocol,
            rd_id: data.rd_id,
            lifetime: data.lifetime.clone(),
            location: data.location.clone(),
            bound: data.state == BindState::Bound,
        })
    }

    /// Binding of a fully bound entity, the only state in which it sends
    pub fn bound(&self) -> Option<Binding> {
        self.binding().filter(|binding| binding.bound)
    }

    fn identify(&self, id: RdId) -> Result<(), EntityError> {
        let mut data = lock(&self.data);
        if id.is_null() {
            return Err(EntityError::NullId {
                location: data.location.clone(),
            });
        }
        if !data.rd_id.is_null() {
            return Err(EntityError::AlreadyIdentified {
                location: data.location.clone(),
                id: data.rd_id,
            });
        }
        data.rd_id = id;
        Ok(())
    }

    fn set_state(&self, state: BindState) {
        lock(&self.data).state = state;
    }

    fn reset(&self) {
        let mut data = lock(&self.data);
        trace!("Unbinding {} ({})", data.location, data.rd_id);
        data.rd_id = RdId::NULL;
        data.protocol = None;
        data.lifetime = Lifetime::terminated();
        data.state = BindState::NotBound;
    }
}

/// Per-kind hooks behind the [`RdBindable`](crate::entity::RdBindable) lifecycle
pub(crate) trait EntityHooks: RdReactive + Sized + 'static {
    fn core(&self) -> &BindCore;

    fn weak_self(&self) -> Weak<Self>;

    fn identify_children(
        &self,
        _identities: &dyn Identities,
        _id: RdId,
    ) -> Result<(), EntityError> {
        Ok(())
    }

    fn pre_init(&self, _binding: &Binding) -> Result<(), EntityError> {
        Ok(())
    }

    fn init(&self, _binding: &Binding) -> Result<(), EntityError> {
        Ok(())
    }

    /// Drops per-binding state once the bind lifetime is over
    fn unbind(&self) {}
}

pub(crate) fn identify_entity<E: EntityHooks>(
    entity: &E,
    identities: &dyn Identities,
    id: RdId,
) -> Result<(), EntityError> {
    entity.core().identify(id)?;
    entity.identify_children(identities, id)
}

pub(crate) fn pre_bind_entity<E: EntityHooks>(
    entity: &E,
    lifetime: &Lifetime,
    parent: &dyn RdDynamic,
    name: &str,
) -> Result<(), EntityError> {
    let core = entity.core();
    let location = parent.location().sub(name);
    {
        let data = lock(&core.data);
        if data.protocol.is_some() {
            return Err(EntityError::AlreadyBound { location });
        }
        if data.rd_id.is_null() && lifetime.is_alive() {
            return Err(EntityError::NullId { location });
        }
    }
    let Some(protocol) = parent.protocol() else {
        trace!("{}: parent has no protocol, pre-bind skipped", location);
        return Ok(());
    };
    let Some(this) = entity.weak_self().upgrade() else {
        return Ok(());
    };

    let weak = entity.weak_self();
    let attached = lifetime.bracket_if_alive(
        || {
            let mut data = lock(&core.data);
            data.protocol = Some(protocol.clone());
            data.location = location.clone();
            data.lifetime = lifetime.clone();
        },
        move || {
            if let Some(entity) = weak.upgrade() {
                entity.core().reset();
                entity.unbind();
            }
        },
    );
    if attached.is_none() {
        trace!("{}: lifetime is over, pre-bind skipped", location);
        return Ok(());
    }

    let reactive: Arc<dyn RdReactive> = this;
    protocol.wire().advise(lifetime, reactive)?;

    if let Some(binding) = core.binding() {
        entity.pre_init(&binding)?;
        core.set_state(BindState::PreBound);
    }
    Ok(())
}

pub(crate) fn bind_entity<E: EntityHooks>(entity: &E) -> Result<(), EntityError> {
    let core = entity.core();
    let Some(binding) = core.binding() else {
        trace!("{}: not pre-bound, bind skipped", core.location());
        return Ok(());
    };
    if binding.bound {
        return Err(EntityError::AlreadyBound {
            location: binding.location,
        });
    }
    if core.state() != BindState::PreBound || !binding.lifetime.is_alive() {
        trace!("{}: lifetime is over, bind skipped", binding.location);
        return Ok(());
    }
    entity.init(&binding)?;
    core.set_state(BindState::Bound);
    Ok(())
}

/// Implements [`RdDynamic`](crate::entity::RdDynamic) and
/// [`RdBindable`](crate::entity::RdBindable) on top of [`EntityHooks`].
macro_rules! impl_rd_bindable {
    ($name:ident $(< $($param:ident),+ >)? $(where $($bound:tt)+)?) => {
        impl $(< $($param),+ >)? $crate::entity::RdDynamic for $name $(< $($param),+ >)?
        $(where $($bound)+)?
        {
            fn protocol(&self) -> Option<std::sync::Arc<$crate::protocol::Protocol>> {
                $crate::entity::core::EntityHooks::core(self).protocol()
            }

            fn location(&self) -> $crate::rd_id::RName {
                $crate::entity::core::EntityHooks::core(self).location()
            }
        }

        impl $(< $($param),+ >)? $crate::entity::RdBindable for $name $(< $($param),+ >)?
        $(where $($bound)+)?
        {
            fn rd_id(&self) -> $crate::rd_id::RdId {
                $crate::entity::core::EntityHooks::core(self).rd_id()
            }

            fn bind_state(&self) -> $crate::entity::BindState {
                $crate::entity::core::EntityHooks::core(self).state()
            }

            fn identify(
                &self,
                identities: &dyn $crate::identities::Identities,
                id: $crate::rd_id::RdId,
            ) -> Result<(), $crate::entity::EntityError> {
                $crate::entity::core::identify_entity(self, identities, id)
            }

            fn pre_bind(
                &self,
                lifetime: &$crate::lifetime::Lifetime,
                parent: &dyn $crate::entity::RdDynamic,
                name: &str,
            ) -> Result<(), $crate::entity::EntityError> {
                $crate::entity::core::pre_bind_entity(self, lifetime, parent, name)
            }

            fn bind(&self) -> Result<(), $crate::entity::EntityError> {
                $crate::entity::core::bind_entity(self)
            }
        }
    };
}

pub(crate) use impl_rd_bindable;
