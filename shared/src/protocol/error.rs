use thiserror::Error;

use crate::entity::EntityError;

/// Errors raised while bootstrapping a protocol or creating extensions
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A reserved entity failed to bind
    #[error("Protocol bootstrap failed: {0}")]
    Entity(#[from] EntityError),

    /// The extension already exists with another type
    #[error("Extension '{name}' already exists with a different type")]
    ExtensionTypeMismatch { name: String },
}
