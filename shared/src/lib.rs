//! # Replica Shared
//! Reactive entities (properties, lists, maps, sets, signals) kept in sync between
//! two processes, together with the reliable framed wire they travel on.
//! Used by both replica-server & replica-client.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub use replica_serde::{BufferReader, BufferWriter, Serde, SerdeErr};

mod broker;
mod entity;
mod identities;
mod impls;
mod lifetime;
mod protocol;
mod rd_id;
mod reactive;
mod scheduler;
mod sync;
mod types;
mod value;
pub mod wire;

pub use broker::{BrokerError, DispatchHelper, MessageBroker};
pub use entity::{bind_top_level, BindState, EntityError, RdBindable, RdDynamic, RdReactive};
pub use identities::{Identities, SequentialIdentities, STABLE_MASK};
pub use impls::{
    ExtCreationInfo, InternRoot, ListEvent, MapEvent, MessageContext, ProtocolContexts,
    RdContext, RdList, RdMap, RdProperty, RdSet, RdSignal, SetEvent,
};
pub use lifetime::{Lifetime, LifetimeDefinition, LifetimeStatus};
pub use protocol::{Protocol, ProtocolError};
pub use rd_id::{IdError, RName, RdId, MAX_STATIC_ID};
pub use reactive::{Signal, ViewableProperty};
pub use scheduler::{Action, Scheduler, SingleThreadScheduler, SynchronousScheduler};
pub use types::IdKind;
pub use value::{InternedString, RdValue, SerializationCtx};
pub use wire::{LoopbackWire, SocketWire, Wire, WireConfig, WireError};
