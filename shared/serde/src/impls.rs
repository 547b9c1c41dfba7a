use crate::{error::SerdeErr, serde::Serde, stream_reader::BufferReader, stream_writer::BufferWriter};

// Unit

impl Serde for () {
    fn ser(&self, _: &mut BufferWriter) {}

    fn de(_: &mut BufferReader) -> Result<Self, SerdeErr> {
        Ok(())
    }
}

// Boolean

impl Serde for bool {
    fn ser(&self, writer: &mut BufferWriter) {
        writer.write_bool(*self);
    }

    fn de(reader: &mut BufferReader) -> Result<Self, SerdeErr> {
        reader.read_bool()
    }
}

// String
// Encoded as an i32 count of UTF-16 code units followed by the units, so strings
// hash and compare identically on both ends regardless of the host language.

impl Serde for String {
    fn ser(&self, writer: &mut BufferWriter) {
        let units: Vec<u16> = self.encode_utf16().collect();
        writer.write_i32(units.len() as i32);
        for unit in units {
            writer.write_u16(unit);
        }
    }

    fn de(reader: &mut BufferReader) -> Result<Self, SerdeErr> {
        let len = reader.read_len()?;
        let mut units = Vec::with_capacity(len.min(reader.remaining() / 2));
        for _ in 0..len {
            units.push(reader.read_u16()?);
        }
        String::from_utf16(&units).map_err(|_| SerdeErr::InvalidString)
    }
}

// Option

impl<T: Serde> Serde for Option<T> {
    fn ser(&self, writer: &mut BufferWriter) {
        match self {
            Some(value) => {
                writer.write_bool(true);
                value.ser(writer);
            }
            None => writer.write_bool(false),
        }
    }

    fn de(reader: &mut BufferReader) -> Result<Self, SerdeErr> {
        if reader.read_bool()? {
            Ok(Some(T::de(reader)?))
        } else {
            Ok(None)
        }
    }
}

// Vec

impl<T: Serde> Serde for Vec<T> {
    fn ser(&self, writer: &mut BufferWriter) {
        writer.write_i32(self.len() as i32);
        for item in self {
            item.ser(writer);
        }
    }

    fn de(reader: &mut BufferReader) -> Result<Self, SerdeErr> {
        let len = reader.read_len()?;
        let mut output = Vec::with_capacity(len.min(reader.remaining()));
        for _ in 0..len {
            output.push(T::de(reader)?);
        }
        Ok(output)
    }
}

// Tuples

macro_rules! impl_serde_for_tuple {
    ($($name:ident),+) => {
        impl<$($name: Serde),+> Serde for ($($name,)+) {
            #[allow(non_snake_case)]
            fn ser(&self, writer: &mut BufferWriter) {
                let ($($name,)+) = self;
                $($name.ser(writer);)+
            }

            fn de(reader: &mut BufferReader) -> Result<Self, SerdeErr> {
                Ok(($($name::de(reader)?,)+))
            }
        }
    };
}

impl_serde_for_tuple!(A);
impl_serde_for_tuple!(A, B);
impl_serde_for_tuple!(A, B, C);
impl_serde_for_tuple!(A, B, C, D);
