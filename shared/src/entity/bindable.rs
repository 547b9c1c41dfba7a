use std::sync::Arc;

use replica_serde::BufferReader;

use crate::{
    broker::DispatchHelper,
    entity::EntityError,
    identities::Identities,
    lifetime::Lifetime,
    protocol::Protocol,
    rd_id::{RName, RdId},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindState {
    NotBound,
    PreBound,
    Bound,
}

/// Anything entities can be attached under: the protocol itself or another entity
pub trait RdDynamic: Send + Sync {
    fn protocol(&self) -> Option<Arc<Protocol>>;

    fn location(&self) -> RName;
}

/// Two-phase attachment contract used to compose entity graphs.
///
/// `identify` assigns the id, `pre_bind` registers inbound routing and recurses into
/// children, `bind` starts outbound traffic. Terminating the lifetime given to
/// `pre_bind` unbinds the entity again.
pub trait RdBindable: RdDynamic {
    fn rd_id(&self) -> RdId;

    fn bind_state(&self) -> BindState;

    fn identify(&self, identities: &dyn Identities, id: RdId) -> Result<(), EntityError>;

    fn pre_bind(&self, lifetime: &Lifetime, parent: &dyn RdDynamic, name: &str)
        -> Result<(), EntityError>;

    fn bind(&self) -> Result<(), EntityError>;
}

/// Entity receiving wire messages routed by the broker
pub trait RdReactive: RdBindable {
    /// Async entities are dispatched inline on the receiving thread
    fn is_async(&self) -> bool {
        false
    }

    /// Parses the payload on the receiving thread and hands the state change to
    /// `dispatch`, which applies it on the protocol scheduler.
    fn on_wire_received(
        &self,
        protocol: &Arc<Protocol>,
        reader: &mut BufferReader,
        dispatch: DispatchHelper,
    ) -> Result<(), EntityError>;
}

/// Pre-binds and binds `entity` as a direct child of `parent`
pub fn bind_top_level(
    entity: &dyn RdBindable,
    lifetime: &Lifetime,
    parent: &dyn RdDynamic,
    name: &str,
) -> Result<(), EntityError> {
    entity.pre_bind(lifetime, parent, name)?;
    entity.bind()
}
