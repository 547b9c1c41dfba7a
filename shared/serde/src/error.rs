use thiserror::Error;

/// Errors raised while decoding values from a [`BufferReader`](crate::BufferReader)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerdeErr {
    #[error("Unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },

    #[error("Invalid length prefix: {0}")]
    InvalidLength(i32),

    #[error("Invalid UTF-16 string payload")]
    InvalidString,

    #[error("Reference {id} does not resolve to a known value")]
    UnresolvedReference { id: i32 },

    #[error("Invalid enum ordinal {ordinal} for {type_name}")]
    InvalidOrdinal {
        type_name: &'static str,
        ordinal: i32,
    },
}
