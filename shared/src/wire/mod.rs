use std::sync::Arc;

use replica_serde::BufferWriter;

use crate::{
    broker::{BrokerError, MessageBroker},
    entity::RdReactive,
    impls::ProtocolContexts,
    lifetime::Lifetime,
    rd_id::RdId,
    reactive::ViewableProperty,
};

mod buffer_window;
mod config;
mod error;
mod frame;
mod heartbeat;
mod loopback;
mod message;
mod receiver;
mod send_buffer;
mod socket_wire;

pub use buffer_window::BufferWindow;
pub use config::WireConfig;
pub use error::WireError;
pub use frame::{FrameHeader, ACK_SENTINEL, HEADER_LENGTH, PING_SENTINEL};
pub use heartbeat::{Heartbeat, HeartbeatTick};
pub use loopback::LoopbackWire;
pub use message::WireBase;
pub use receiver::{FrameHandler, FrameReceiver};
pub use send_buffer::{SendBuffer, SendBufferState};
pub use socket_wire::SocketWire;

/// Message transport under a protocol
pub trait Wire: Send + Sync {
    /// Sends one message to entity `id` of the counterpart. `write` fills the payload.
    fn send(&self, id: RdId, write: &mut dyn FnMut(&mut BufferWriter));

    fn base(&self) -> &WireBase;

    fn advise(&self, lifetime: &Lifetime, entity: Arc<dyn RdReactive>) -> Result<(), BrokerError> {
        self.base().broker().advise_on(lifetime, entity)
    }

    fn broker(&self) -> &Arc<MessageBroker> {
        self.base().broker()
    }

    fn connected(&self) -> &ViewableProperty<bool> {
        self.base().connected()
    }

    fn heartbeat_alive(&self) -> &ViewableProperty<bool> {
        self.base().heartbeat_alive()
    }

    fn setup_contexts(&self, contexts: Arc<ProtocolContexts>) {
        self.base().setup_contexts(contexts);
    }

    fn start_delivering_messages(&self) {
        self.base().broker().start_delivering_messages();
    }
}
