use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use log::{debug, trace};
use replica_serde::{BufferReader, BufferWriter, Serde};

use crate::{
    broker::DispatchHelper,
    entity::{
        core::{impl_rd_bindable, BindCore, Binding, EntityHooks},
        EntityError, RdReactive,
    },
    protocol::Protocol,
    rd_id::RdId,
    sync::lock,
};

/// Named ambient value carried along with every message once announced.
///
/// Inbound handlers run with the sender's value applied, local code sets it
/// through [`RdContext::with_value`].
pub struct RdContext {
    key: String,
    value: Mutex<Option<String>>,
}

impl RdContext {
    pub fn new(key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            key: key.into(),
            value: Mutex::new(None),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<String> {
        lock(&self.value).clone()
    }

    /// Replaces the value and returns the previous one
    pub fn swap(&self, value: Option<String>) -> Option<String> {
        std::mem::replace(&mut *lock(&self.value), value)
    }

    /// Runs `action` with `value` applied, restoring the previous value afterwards
    pub fn with_value<R>(&self, value: impl Into<String>, action: impl FnOnce() -> R) -> R {
        let previous = self.swap(Some(value.into()));
        let result = action();
        self.swap(previous);
        result
    }
}

/// Context values read from one inbound message
#[derive(Default)]
pub struct MessageContext {
    values: Vec<(Arc<RdContext>, Option<String>)>,
}

impl MessageContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(context, _)| context.key() == key)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Runs `action` with the carried values applied
    pub fn apply(self, action: impl FnOnce()) {
        let previous: Vec<Option<String>> = self
            .values
            .iter()
            .map(|(context, value)| context.swap(value.clone()))
            .collect();
        action();
        for ((context, _), value) in self.values.iter().zip(previous).rev() {
            context.swap(value);
        }
    }
}

struct ContextsState {
    known: HashMap<String, Arc<RdContext>>,
    local: Vec<Arc<RdContext>>,
    // announced to the counterpart, in announcement order
    sent: Vec<Arc<RdContext>>,
    counterpart: Vec<String>,
}

/// Reserved entity exchanging context keys between both ends.
///
/// Every outbound message carries the values of the contexts announced so far,
/// in announcement order. Announcements travel on the same ordered wire, so the
/// receiver always knows as many keys as a message carries values.
pub struct ProtocolContexts {
    core: BindCore,
    weak_self: Weak<Self>,
    state: Mutex<ContextsState>,
}

impl ProtocolContexts {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            core: BindCore::new(RdId::NULL),
            weak_self: weak_self.clone(),
            state: Mutex::new(ContextsState {
                known: HashMap::new(),
                local: Vec::new(),
                sent: Vec::new(),
                counterpart: Vec::new(),
            }),
        })
    }

    pub fn rd_id(&self) -> RdId {
        self.core.rd_id()
    }

    /// Registers `context`, or returns the context already registered under its key
    pub fn register(&self, context: &Arc<RdContext>) -> Arc<RdContext> {
        let mut state = lock(&self.state);
        if let Some(existing) = state.known.get(context.key()) {
            return existing.clone();
        }
        state
            .known
            .insert(context.key().to_string(), context.clone());
        state.local.push(context.clone());
        if let Some(binding) = self.core.bound() {
            Self::announce(&mut state, &binding, context);
        }
        context.clone()
    }

    pub fn get(&self, key: &str) -> Option<Arc<RdContext>> {
        lock(&self.state).known.get(key).cloned()
    }

    pub fn counterpart_keys(&self) -> Vec<String> {
        lock(&self.state).counterpart.clone()
    }

    /// `i16 count` followed by the current value of every announced context
    pub fn write_current_message_context(&self, writer: &mut BufferWriter) {
        let state = lock(&self.state);
        writer.write_i16(state.sent.len() as i16);
        for context in &state.sent {
            context.value().ser(writer);
        }
    }

    pub fn read_message_context(
        &self,
        reader: &mut BufferReader,
    ) -> Result<MessageContext, EntityError> {
        let count = reader.read_i16()?;
        if count == 0 {
            return Ok(MessageContext::empty());
        }
        let state = lock(&self.state);
        if count < 0 || count as usize > state.counterpart.len() {
            return Err(EntityError::UnknownContext {
                count: i32::from(count),
                known: state.counterpart.len(),
            });
        }
        let mut values = Vec::with_capacity(count as usize);
        for key in &state.counterpart[..count as usize] {
            let value = Option::<String>::de(reader)?;
            match state.known.get(key) {
                Some(context) => values.push((context.clone(), value)),
                None => trace!("Context {} isn't registered here, value dropped", key),
            }
        }
        Ok(MessageContext { values })
    }

    // Sent under the state lock so no message carries the new key before its announcement
    fn announce(state: &mut ContextsState, binding: &Binding, context: &Arc<RdContext>) {
        debug!("{}: announce context {}", binding.location, context.key());
        state.sent.push(context.clone());
        binding.send(|writer, _ctx| context.key().to_string().ser(writer));
    }
}

impl EntityHooks for ProtocolContexts {
    fn core(&self) -> &BindCore {
        &self.core
    }

    fn weak_self(&self) -> Weak<Self> {
        self.weak_self.clone()
    }

    fn init(&self, binding: &Binding) -> Result<(), EntityError> {
        let mut state = lock(&self.state);
        for context in state.local.clone() {
            Self::announce(&mut state, binding, &context);
        }
        Ok(())
    }
}

impl_rd_bindable!(ProtocolContexts);

impl RdReactive for ProtocolContexts {
    fn is_async(&self) -> bool {
        true
    }

    fn on_wire_received(
        &self,
        _protocol: &Arc<Protocol>,
        reader: &mut BufferReader,
        dispatch: DispatchHelper,
    ) -> Result<(), EntityError> {
        let key = String::de(reader)?;
        trace!("{}: counterpart announced {}", self.core.location(), key);
        let weak = self.weak_self.clone();
        dispatch.dispatch(move || {
            if let Some(contexts) = weak.upgrade() {
                lock(&contexts.state).counterpart.push(key);
            }
        });
        Ok(())
    }
}
