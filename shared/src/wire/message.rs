use std::sync::{Arc, OnceLock};

use log::warn;
use replica_serde::{BufferWriter, Serde};

use crate::{
    broker::MessageBroker, impls::ProtocolContexts, rd_id::RdId, reactive::ViewableProperty,
};

/// Message layer shared by wire implementations.
///
/// A message is `i32 length, i64 id, i16 context count, context values, payload`;
/// the length covers everything after itself.
pub struct WireBase {
    broker: Arc<MessageBroker>,
    contexts: OnceLock<Arc<ProtocolContexts>>,
    connected: ViewableProperty<bool>,
    heartbeat_alive: ViewableProperty<bool>,
    max_message_length: usize,
}

impl WireBase {
    pub fn new(delayed_delivery: bool, max_message_length: usize) -> Self {
        Self {
            broker: MessageBroker::new(delayed_delivery),
            contexts: OnceLock::new(),
            connected: ViewableProperty::new(false),
            heartbeat_alive: ViewableProperty::new(false),
            max_message_length,
        }
    }

    pub fn broker(&self) -> &Arc<MessageBroker> {
        &self.broker
    }

    pub fn connected(&self) -> &ViewableProperty<bool> {
        &self.connected
    }

    pub fn heartbeat_alive(&self) -> &ViewableProperty<bool> {
        &self.heartbeat_alive
    }

    pub fn setup_contexts(&self, contexts: Arc<ProtocolContexts>) {
        if self.contexts.set(contexts).is_err() {
            warn!("Message contexts are already set up for this wire");
        }
    }

    /// Serializes one message including its length prefix
    pub fn encode(&self, id: RdId, write: &mut dyn FnMut(&mut BufferWriter)) -> Vec<u8> {
        let mut writer = BufferWriter::new();
        writer.write_i32(0);
        id.ser(&mut writer);
        match self.contexts.get() {
            // the context channel itself can't depend on announced contexts
            Some(contexts) if contexts.rd_id() != id => {
                contexts.write_current_message_context(&mut writer)
            }
            _ => writer.write_i16(0),
        }
        write(&mut writer);
        let length = writer.len() - 4;
        writer.patch_i32(0, length as i32);
        writer.to_bytes()
    }

    /// Routes a decoded message (without its length prefix)
    pub fn deliver(&self, message: &[u8]) {
        if message.len() > self.max_message_length {
            warn!("Possible OOM: delivering message of {} bytes", message.len());
        }
        self.broker.dispatch(message);
    }
}
