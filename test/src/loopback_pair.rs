use std::sync::Arc;

use replica_shared::{
    EntityError, IdKind, Lifetime, LifetimeDefinition, LoopbackWire, Protocol, RdBindable,
    SequentialIdentities, SynchronousScheduler,
};

/// Client and server protocols joined by a [`LoopbackWire`] pair. Messages move only
/// when the test flushes or pumps, and are applied synchronously on delivery.
pub struct LoopbackPair {
    definition: LifetimeDefinition,
    pub client: Arc<Protocol>,
    pub server: Arc<Protocol>,
    pub client_wire: Arc<LoopbackWire>,
    pub server_wire: Arc<LoopbackWire>,
}

impl LoopbackPair {
    pub fn new() -> Self {
        let definition = LifetimeDefinition::new();
        let (client_wire, server_wire) = LoopbackWire::pair();
        let client = Self::protocol("client", IdKind::Client, &client_wire, definition.lifetime());
        let server = Self::protocol("server", IdKind::Server, &server_wire, definition.lifetime());
        Self {
            definition,
            client,
            server,
            client_wire,
            server_wire,
        }
    }

    fn protocol(
        name: &str,
        kind: IdKind,
        wire: &Arc<LoopbackWire>,
        lifetime: &Lifetime,
    ) -> Arc<Protocol> {
        Protocol::new(
            name,
            Arc::new(SequentialIdentities::new(kind)),
            Arc::new(SynchronousScheduler),
            wire.clone(),
            lifetime.clone(),
        )
        .expect("protocol bootstrap")
    }

    pub fn lifetime(&self) -> &Lifetime {
        self.definition.lifetime()
    }

    /// Delivers in both directions until both wires are idle
    pub fn pump(&self) -> usize {
        LoopbackWire::pump(&self.client_wire, &self.server_wire)
    }

    /// Binds a pair of counterpart entities under the same name on each side
    pub fn bind_both(
        &self,
        client_entity: &dyn RdBindable,
        server_entity: &dyn RdBindable,
        name: &str,
    ) -> Result<(), EntityError> {
        self.server.bind_static(server_entity, name)?;
        self.client.bind_static(client_entity, name)?;
        Ok(())
    }
}

impl Default for LoopbackPair {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LoopbackPair {
    fn drop(&mut self) {
        self.definition.terminate();
    }
}
