use std::{
    net::{SocketAddr, TcpStream},
    sync::Arc,
    thread,
    time::Duration,
};

use log::{debug, info, trace};
use replica_shared::{Lifetime, SocketWire, WireConfig};

use crate::ClientError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Owns the connector thread feeding its wire
pub struct SocketClient {
    wire: Arc<SocketWire>,
    server_addr: SocketAddr,
}

impl SocketClient {
    /// Starts dialing `server_addr`. Connection attempts repeat every
    /// `connect_retry_delay` until `lifetime` terminates.
    pub fn connect(
        lifetime: &Lifetime,
        server_addr: SocketAddr,
        config: WireConfig,
        id: &str,
    ) -> Result<Self, ClientError> {
        let retry_delay = config.connect_retry_delay;
        let wire = SocketWire::new(lifetime, id, config)?;

        let connect_wire = wire.clone();
        let connect_lifetime = lifetime.clone();
        thread::Builder::new()
            .name(format!("{}-connect", id))
            .spawn(move || {
                Self::connect_loop(server_addr, connect_wire, connect_lifetime, retry_delay)
            })?;

        Ok(Self { wire, server_addr })
    }

    pub fn wire(&self) -> &Arc<SocketWire> {
        &self.wire
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    fn connect_loop(
        server_addr: SocketAddr,
        wire: Arc<SocketWire>,
        lifetime: Lifetime,
        retry_delay: Duration,
    ) {
        while lifetime.is_alive() {
            match TcpStream::connect_timeout(&server_addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    info!("{}: connected to {}", wire.id(), server_addr);
                    if let Err(err) = wire.connect(stream) {
                        debug!("{}: connection to {} ended: {}", wire.id(), server_addr, err);
                    }
                }
                Err(err) => trace!("{}: {} unreachable: {}", wire.id(), server_addr, err),
            }
            if lifetime.is_alive() {
                thread::sleep(retry_delay);
            }
        }
        trace!("{}: connect loop stopped", wire.id());
    }
}
