//! Fixtures for end-to-end tests: protocol pairs over in-memory wires and over
//! local TCP sockets.

mod loopback_pair;
mod socket_pair;
mod wait;

pub use loopback_pair::LoopbackPair;
pub use socket_pair::{test_wire_config, SocketPair};
pub use wait::wait_until;
