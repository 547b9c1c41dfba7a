use std::io;

use replica_shared::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Can't start the connector: {0}")]
    Io(#[from] io::Error),

    #[error("Can't create the wire: {0}")]
    Wire(#[from] WireError),
}
