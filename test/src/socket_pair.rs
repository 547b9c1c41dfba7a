use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use log::debug;
use replica_client::SocketClient;
use replica_server::SocketServer;
use replica_shared::{
    EntityError, IdKind, Lifetime, LifetimeDefinition, Protocol, RdBindable,
    SequentialIdentities, SingleThreadScheduler, Wire, WireConfig,
};

use crate::wait_until;

/// Short intervals so reconnects and heartbeats happen within a test's patience
pub fn test_wire_config() -> WireConfig {
    WireConfig {
        heartbeat_interval: Duration::from_millis(50),
        receive_timeout: Duration::from_millis(50),
        connect_retry_delay: Duration::from_millis(50),
        ..WireConfig::default()
    }
}

/// Client and server protocols talking over a real TCP connection on localhost,
/// each applying inbound changes on its own protocol thread.
pub struct SocketPair {
    definition: LifetimeDefinition,
    pub server: SocketServer,
    pub client: SocketClient,
    pub server_protocol: Arc<Protocol>,
    pub client_protocol: Arc<Protocol>,
    pub server_scheduler: Arc<SingleThreadScheduler>,
    pub client_scheduler: Arc<SingleThreadScheduler>,
}

impl SocketPair {
    pub fn new() -> Self {
        let definition = LifetimeDefinition::new();
        let lifetime = definition.lifetime().clone();
        let config = test_wire_config();

        let server = SocketServer::bind(&lifetime, (Ipv4Addr::LOCALHOST, 0), config.clone(), "server")
            .expect("server bind");
        let client = SocketClient::connect(&lifetime, server.local_addr(), config, "client")
            .expect("client start");
        debug!("Test server listening on {}", server.local_addr());

        let server_scheduler =
            SingleThreadScheduler::new(&lifetime, "server-protocol").expect("server scheduler");
        let client_scheduler =
            SingleThreadScheduler::new(&lifetime, "client-protocol").expect("client scheduler");

        let server_protocol = Protocol::new(
            "server",
            Arc::new(SequentialIdentities::new(IdKind::Server)),
            server_scheduler.clone(),
            server.wire().clone(),
            lifetime.clone(),
        )
        .expect("server protocol");
        let client_protocol = Protocol::new(
            "client",
            Arc::new(SequentialIdentities::new(IdKind::Client)),
            client_scheduler.clone(),
            client.wire().clone(),
            lifetime,
        )
        .expect("client protocol");

        Self {
            definition,
            server,
            client,
            server_protocol,
            client_protocol,
            server_scheduler,
            client_scheduler,
        }
    }

    pub fn lifetime(&self) -> &Lifetime {
        self.definition.lifetime()
    }

    pub fn wait_connected(&self, timeout: Duration) -> bool {
        wait_until(timeout, || {
            self.server.wire().connected().get() && self.client.wire().connected().get()
        })
    }

    /// Binds counterpart entities under `name`, server side first so nothing the
    /// client sends finds the server unprepared
    pub fn bind_both(
        &self,
        client_entity: &dyn RdBindable,
        server_entity: &dyn RdBindable,
        name: &str,
    ) -> Result<(), EntityError> {
        self.server_protocol.bind_static(server_entity, name)?;
        self.client_protocol.bind_static(client_entity, name)?;
        Ok(())
    }
}

impl Default for SocketPair {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SocketPair {
    fn drop(&mut self) {
        self.definition.terminate();
    }
}
