use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use log::trace;
use replica_serde::{BufferReader, BufferWriter, Serde, SerdeErr};

use crate::{
    broker::DispatchHelper,
    entity::{
        core::{impl_rd_bindable, BindCore, EntityHooks},
        EntityError, RdReactive,
    },
    protocol::Protocol,
    rd_id::RdId,
    sync::lock,
};

const RAW_TAG: i32 = -1;

#[derive(Default)]
struct InternState {
    local: Vec<String>,
    local_ids: HashMap<String, i32>,
    remote: HashMap<i32, String>,
    remote_ids: HashMap<String, i32>,
}

/// Reserved entity shortening repeated strings on the wire.
///
/// An interned value is announced once as `i32 id, string`, afterwards it is
/// written as a tag: `id << 1` for an id this side allocated, `(id << 1) | 1` for
/// one the counterpart allocated, `-1` followed by the raw string before binding.
pub struct InternRoot {
    core: BindCore,
    weak_self: Weak<Self>,
    state: Mutex<InternState>,
}

impl InternRoot {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            core: BindCore::new(RdId::NULL),
            weak_self: weak_self.clone(),
            state: Mutex::new(InternState::default()),
        })
    }

    /// Local id of `value`, announcing it if new. `None` until bound.
    pub fn intern(&self, value: &str) -> Option<i32> {
        let mut state = lock(&self.state);
        if let Some(id) = state.local_ids.get(value) {
            return Some(*id);
        }
        let binding = self.core.bound()?;
        let id = state.local.len() as i32;
        state.local.push(value.to_string());
        state.local_ids.insert(value.to_string(), id);
        trace!("{}: interned {:?} as {}", binding.location, value, id);
        // under the state lock, so the announcement precedes any use of the id
        binding.send(|writer, _ctx| {
            writer.write_i32(id);
            value.to_string().ser(writer);
        });
        Some(id)
    }

    pub fn local_count(&self) -> usize {
        lock(&self.state).local.len()
    }

    pub fn remote_count(&self) -> usize {
        lock(&self.state).remote.len()
    }

    pub fn write_interned(&self, writer: &mut BufferWriter, value: &str) {
        let known = {
            let state = lock(&self.state);
            state
                .remote_ids
                .get(value)
                .map(|id| (id << 1) | 1)
                .or_else(|| state.local_ids.get(value).map(|id| id << 1))
        };
        match known.or_else(|| self.intern(value).map(|id| id << 1)) {
            Some(tag) => writer.write_i32(tag),
            None => {
                writer.write_i32(RAW_TAG);
                value.to_string().ser(writer);
            }
        }
    }

    pub fn read_interned(&self, reader: &mut BufferReader) -> Result<String, SerdeErr> {
        let tag = reader.read_i32()?;
        if tag == RAW_TAG {
            return String::de(reader);
        }
        let id = tag >> 1;
        let state = lock(&self.state);
        let value = if tag & 1 == 0 {
            state.remote.get(&id).cloned()
        } else {
            usize::try_from(id)
                .ok()
                .and_then(|index| state.local.get(index).cloned())
        };
        value.ok_or(SerdeErr::UnresolvedReference { id })
    }

    fn remember_remote(&self, id: i32, value: String) {
        let mut state = lock(&self.state);
        state.remote_ids.entry(value.clone()).or_insert(id);
        state.remote.insert(id, value);
    }
}

impl EntityHooks for InternRoot {
    fn core(&self) -> &BindCore {
        &self.core
    }

    fn weak_self(&self) -> Weak<Self> {
        self.weak_self.clone()
    }

    fn unbind(&self) {
        *lock(&self.state) = InternState::default();
    }
}

impl_rd_bindable!(InternRoot);

impl RdReactive for InternRoot {
    fn is_async(&self) -> bool {
        true
    }

    fn on_wire_received(
        &self,
        _protocol: &Arc<Protocol>,
        reader: &mut BufferReader,
        dispatch: DispatchHelper,
    ) -> Result<(), EntityError> {
        let id = reader.read_i32()?;
        let value = String::de(reader)?;
        trace!("{}: counterpart interned {:?} as {}", self.core.location(), value, id);
        let weak = self.weak_self.clone();
        dispatch.dispatch(move || {
            if let Some(root) = weak.upgrade() {
                root.remember_remote(id, value);
            }
        });
        Ok(())
    }
}
