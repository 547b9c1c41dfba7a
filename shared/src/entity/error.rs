use replica_serde::SerdeErr;
use thiserror::Error;

use crate::{broker::BrokerError, rd_id::RName, rd_id::RdId};

/// Errors raised by entity mutations and the bind lifecycle
#[derive(Debug, Error)]
pub enum EntityError {
    /// Attempt to identify with, or register under, the null id
    #[error("Entity at {location} has no id. Identify it before binding, null ids can't be routed")]
    NullId { location: RName },

    /// Entities are identified exactly once
    #[error("Entity at {location} already has id {id}")]
    AlreadyIdentified { location: RName, id: RdId },

    /// Pre-bind on an entity that is already attached to a protocol
    #[error("Entity at {location} is already bound")]
    AlreadyBound { location: RName },

    /// Index based list mutation outside of the list bounds
    #[error("Index {index} is out of bounds for {location} with length {len}")]
    IndexOutOfBounds {
        location: RName,
        index: usize,
        len: usize,
    },

    /// Inbound message with an operation code this entity doesn't know
    #[error("Unknown operation code {opcode} received by {location}")]
    InvalidOpcode { location: RName, opcode: i64 },

    /// Inbound message refers to more contexts than the counterpart announced
    #[error("Message carries {count} context values but only {known} contexts were announced")]
    UnknownContext { count: i32, known: usize },

    #[error("Registration failed: {0}")]
    Broker(#[from] BrokerError),

    #[error("Malformed payload: {0}")]
    Serde(#[from] SerdeErr),
}
