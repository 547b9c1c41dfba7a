use crate::{error::SerdeErr, stream_reader::BufferReader, stream_writer::BufferWriter};

/// A type that can be written to and read back from the little-endian wire encoding
pub trait Serde: Sized + Clone {
    /// Writes the value into the given writer
    fn ser(&self, writer: &mut BufferWriter);

    /// Parses a value from the given reader
    fn de(reader: &mut BufferReader) -> Result<Self, SerdeErr>;
}
