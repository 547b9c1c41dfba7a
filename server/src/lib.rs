//! # Replica Server
//! Listens on a TCP port and runs a replica wire over the accepted connection.
//! After a disconnect the next connection picks up the same wire, so nothing that
//! wasn't acknowledged is lost.

#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces
)]

pub mod shared {
    pub use replica_shared::{Lifetime, LifetimeDefinition, SocketWire, Wire, WireConfig};
}

mod error;
mod socket_server;

pub use error::ServerError;
pub use socket_server::SocketServer;
