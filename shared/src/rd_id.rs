use std::fmt;

use replica_serde::{BufferReader, BufferWriter, Serde, SerdeErr};
use thiserror::Error;

/// Upper bound (exclusive) of the static id range
pub const MAX_STATIC_ID: i64 = 1_000_000;

/// Errors when constructing identifiers by hand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IdError {
    /// Static ids live in `(0, MAX_STATIC_ID)`
    #[error("Static id {0} is out of range. Static ids must lie in (0, {MAX_STATIC_ID})")]
    StaticOutOfRange(i64),
}

/// 64-bit identifier addressing one replicated entity within a protocol
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RdId(i64);

impl RdId {
    pub const NULL: RdId = RdId(0);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Id in the reserved static range, used for well-known top level entities
    pub fn static_id(value: i64) -> Result<Self, IdError> {
        if value <= 0 || value >= MAX_STATIC_ID {
            return Err(IdError::StaticOutOfRange(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> i64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Hashes `tail` onto this id: `h = h * 31 + c` over the UTF-16 units of `tail`
    pub fn mix(self, tail: &str) -> Self {
        let mut hash = self.0;
        for unit in tail.encode_utf16() {
            hash = hash.wrapping_mul(31).wrapping_add(i64::from(unit));
        }
        Self(hash)
    }

    pub fn mix_i32(self, tail: i32) -> Self {
        self.mix_i64(i64::from(tail))
    }

    pub fn mix_i64(self, tail: i64) -> Self {
        Self(self.0.wrapping_mul(31).wrapping_add(tail.wrapping_add(1)))
    }
}

impl fmt::Display for RdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 as u64)
    }
}

impl fmt::Debug for RdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RdId({})", self)
    }
}

impl Serde for RdId {
    fn ser(&self, writer: &mut BufferWriter) {
        writer.write_i64(self.0);
    }

    fn de(reader: &mut BufferReader) -> Result<Self, SerdeErr> {
        Ok(Self(reader.read_i64()?))
    }
}

/// Dot separated hierarchical name of an entity, used in diagnostics
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct RName {
    path: String,
}

impl RName {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(root: &str) -> Self {
        Self {
            path: root.to_string(),
        }
    }

    /// Appends a child segment. Slot names like `[3]` or `$` are glued without a dot.
    pub fn sub(&self, name: &str) -> Self {
        if self.path.is_empty() {
            return Self::new(name);
        }
        let separator = if name.starts_with('[') || name == "$" { "" } else { "." };
        Self {
            path: format!("{}{}{}", self.path, separator, name),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for RName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str("<empty>")
        } else {
            f.write_str(&self.path)
        }
    }
}

impl fmt::Debug for RName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RName({})", self)
    }
}
