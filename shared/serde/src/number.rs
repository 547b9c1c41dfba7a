use crate::{error::SerdeErr, serde::Serde, stream_reader::BufferReader, stream_writer::BufferWriter};

// Fixed width integers, little-endian

macro_rules! impl_serde_for_number {
    ($type:ty, $size:expr) => {
        impl Serde for $type {
            fn ser(&self, writer: &mut BufferWriter) {
                writer.write_bytes(&self.to_le_bytes());
            }

            fn de(reader: &mut BufferReader) -> Result<Self, SerdeErr> {
                let mut bytes = [0u8; $size];
                bytes.copy_from_slice(reader.read_bytes($size)?);
                Ok(<$type>::from_le_bytes(bytes))
            }
        }
    };
}

impl_serde_for_number!(u8, 1);
impl_serde_for_number!(u16, 2);
impl_serde_for_number!(u32, 4);
impl_serde_for_number!(u64, 8);
impl_serde_for_number!(i8, 1);
impl_serde_for_number!(i16, 2);
impl_serde_for_number!(i32, 4);
impl_serde_for_number!(i64, 8);
impl_serde_for_number!(f32, 4);
impl_serde_for_number!(f64, 8);
