//! # Replica Client
//! Dials a replica server and runs a replica wire over the connection, dialing
//! again after every disconnect until the owning lifetime ends.

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
mod socket_client;

pub use error::ClientError;
pub use socket_client::SocketClient;
