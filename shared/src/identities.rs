use std::sync::atomic::{AtomicI64, Ordering};

use crate::{
    rd_id::{RdId, MAX_STATIC_ID},
    types::IdKind,
};

/// Bit forced to 1 on every stable (name derived) id
pub const STABLE_MASK: i64 = i64::MIN;

/// Allocates entity identifiers for one side of a protocol
pub trait Identities: Send + Sync {
    fn kind(&self) -> IdKind;

    /// Fresh dynamic id for an entity created by this side
    fn next(&self, parent: RdId) -> RdId;

    /// Stable id derived from a structural path
    fn mix(&self, id: RdId, tail: &str) -> RdId;

    fn mix_i64(&self, id: RdId, tail: i64) -> RdId;
}

/// Counter based allocator: client ids are even, server ids are odd, the parent is
/// ignored. Stable ids carry [`STABLE_MASK`] so they never meet dynamic ones.
pub struct SequentialIdentities {
    kind: IdKind,
    next_id: AtomicI64,
}

impl SequentialIdentities {
    const STEP: i64 = 2;

    pub fn new(kind: IdKind) -> Self {
        let start = match kind {
            IdKind::Client => MAX_STATIC_ID,
            IdKind::Server => MAX_STATIC_ID + 1,
        };
        Self {
            kind,
            next_id: AtomicI64::new(start),
        }
    }
}

impl Identities for SequentialIdentities {
    fn kind(&self) -> IdKind {
        self.kind
    }

    fn next(&self, _parent: RdId) -> RdId {
        RdId::new(self.next_id.fetch_add(Self::STEP, Ordering::Relaxed))
    }

    fn mix(&self, id: RdId, tail: &str) -> RdId {
        RdId::new(id.mix(tail).value() | STABLE_MASK)
    }

    fn mix_i64(&self, id: RdId, tail: i64) -> RdId {
        RdId::new(id.mix_i64(tail).value() | STABLE_MASK)
    }
}
