use std::sync::Arc;

use replica_serde::{BufferReader, BufferWriter, Serde, SerdeErr};

use crate::{entity::RdBindable, impls::InternRoot, rd_id::RdId};

/// Ambient state threaded through every read and write
#[derive(Clone, Default)]
pub struct SerializationCtx {
    intern_root: Option<Arc<InternRoot>>,
}

impl SerializationCtx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_intern_root(intern_root: Arc<InternRoot>) -> Self {
        Self {
            intern_root: Some(intern_root),
        }
    }

    pub fn intern_root(&self) -> Option<&Arc<InternRoot>> {
        self.intern_root.as_ref()
    }
}

/// A value that can live inside a replicated entity.
///
/// Plain data gets this through [`rd_value_via_serde!`](crate::rd_value_via_serde);
/// entity handles (`Arc<RdProperty<T>>` and friends) implement it directly and
/// expose themselves through [`RdValue::as_bindable`] so containers can bind them.
pub trait RdValue: Clone + Send + Sync + 'static {
    fn read(ctx: &SerializationCtx, reader: &mut BufferReader) -> Result<Self, SerdeErr>;

    fn write(&self, ctx: &SerializationCtx, writer: &mut BufferWriter);

    /// Equality used to suppress no-op updates. Entity handles compare by identity.
    fn value_eq(&self, other: &Self) -> bool;

    fn as_bindable(&self) -> Option<Arc<dyn RdBindable>> {
        None
    }
}

/// Implements [`RdValue`] for types that are [`Serde`] + `PartialEq`
#[macro_export]
macro_rules! rd_value_via_serde {
    ($($type:ty),+ $(,)?) => {
        $(
            impl $crate::RdValue for $type {
                fn read(
                    _ctx: &$crate::SerializationCtx,
                    reader: &mut $crate::BufferReader,
                ) -> Result<Self, $crate::SerdeErr> {
                    <$type as $crate::Serde>::de(reader)
                }

                fn write(&self, _ctx: &$crate::SerializationCtx, writer: &mut $crate::BufferWriter) {
                    $crate::Serde::ser(self, writer);
                }

                fn value_eq(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )+
    };
}

rd_value_via_serde!(
    (),
    bool,
    u8,
    u16,
    u32,
    u64,
    i8,
    i16,
    i32,
    i64,
    f32,
    f64,
    String,
    RdId,
);

impl<T: RdValue> RdValue for Option<T> {
    fn read(ctx: &SerializationCtx, reader: &mut BufferReader) -> Result<Self, SerdeErr> {
        if reader.read_bool()? {
            Ok(Some(T::read(ctx, reader)?))
        } else {
            Ok(None)
        }
    }

    fn write(&self, ctx: &SerializationCtx, writer: &mut BufferWriter) {
        match self {
            Some(value) => {
                writer.write_bool(true);
                value.write(ctx, writer);
            }
            None => writer.write_bool(false),
        }
    }

    fn value_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.value_eq(b),
            (None, None) => true,
            _ => false,
        }
    }

    fn as_bindable(&self) -> Option<Arc<dyn RdBindable>> {
        self.as_ref().and_then(RdValue::as_bindable)
    }
}

impl<T: RdValue> RdValue for Vec<T> {
    fn read(ctx: &SerializationCtx, reader: &mut BufferReader) -> Result<Self, SerdeErr> {
        let len = reader.read_len()?;
        let mut output = Vec::with_capacity(len.min(reader.remaining()));
        for _ in 0..len {
            output.push(T::read(ctx, reader)?);
        }
        Ok(output)
    }

    fn write(&self, ctx: &SerializationCtx, writer: &mut BufferWriter) {
        writer.write_i32(self.len() as i32);
        for item in self {
            item.write(ctx, writer);
        }
    }

    fn value_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.value_eq(b))
    }
}

/// String written through the protocol's intern root: after the first transfer
/// only a small id goes over the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternedString(pub String);

impl InternedString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RdValue for InternedString {
    fn read(ctx: &SerializationCtx, reader: &mut BufferReader) -> Result<Self, SerdeErr> {
        match ctx.intern_root() {
            Some(root) => Ok(Self(root.read_interned(reader)?)),
            None => Ok(Self(String::de(reader)?)),
        }
    }

    fn write(&self, ctx: &SerializationCtx, writer: &mut BufferWriter) {
        match ctx.intern_root() {
            Some(root) => root.write_interned(writer, &self.0),
            None => self.0.ser(writer),
        }
    }

    fn value_eq(&self, other: &Self) -> bool {
        self == other
    }
}
