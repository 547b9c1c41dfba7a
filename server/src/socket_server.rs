use std::{
    io,
    net::{SocketAddr, TcpListener, ToSocketAddrs},
    sync::Arc,
    thread,
    time::Duration,
};

use log::{info, trace, warn};
use replica_shared::{Lifetime, SocketWire, WireConfig};

use crate::ServerError;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Owns the listening socket and the accept thread feeding its wire
pub struct SocketServer {
    wire: Arc<SocketWire>,
    local_addr: SocketAddr,
}

impl SocketServer {
    /// Binds `addr` (port 0 picks a free one) and starts accepting. Everything
    /// stops once `lifetime` terminates.
    pub fn bind(
        lifetime: &Lifetime,
        addr: impl ToSocketAddrs,
        config: WireConfig,
        id: &str,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let wire = SocketWire::new(lifetime, id, config)?;
        info!("{}: listening on {}", id, local_addr);

        let accept_wire = wire.clone();
        let accept_lifetime = lifetime.clone();
        thread::Builder::new()
            .name(format!("{}-accept", id))
            .spawn(move || Self::accept_loop(listener, accept_wire, accept_lifetime))?;

        Ok(Self { wire, local_addr })
    }

    pub fn wire(&self) -> &Arc<SocketWire> {
        &self.wire
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    // One connection at a time: the wire runs it on this thread until it drops
    fn accept_loop(listener: TcpListener, wire: Arc<SocketWire>, lifetime: Lifetime) {
        while lifetime.is_alive() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    info!("{}: accepted {}", wire.id(), peer);
                    if let Err(err) = stream.set_nonblocking(false) {
                        warn!("{}: can't use connection from {}: {}", wire.id(), peer, err);
                        continue;
                    }
                    if let Err(err) = wire.connect(stream) {
                        warn!("{}: connection from {} ended: {}", wire.id(), peer, err);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) => {
                    warn!("{}: accept failed: {}", wire.id(), err);
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }
        trace!("{}: accept loop stopped", wire.id());
    }
}
