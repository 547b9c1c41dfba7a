use replica_serde::{BufferReader, BufferWriter, Serde, SerdeErr};

use crate::rd_id::RdId;

/// Announces a top-level extension created on one side
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtCreationInfo {
    pub name: String,
    pub rd_id: RdId,
    /// Identifies the extension's type, mismatches are logged by the receiver
    pub hash: i64,
}

impl ExtCreationInfo {
    pub fn new<T: ?Sized>(name: impl Into<String>, rd_id: RdId) -> Self {
        Self {
            name: name.into(),
            rd_id,
            hash: type_hash::<T>(),
        }
    }
}

pub(crate) fn type_hash<T: ?Sized>() -> i64 {
    RdId::NULL.mix(std::any::type_name::<T>()).value()
}

impl Serde for ExtCreationInfo {
    fn ser(&self, writer: &mut BufferWriter) {
        self.name.ser(writer);
        self.rd_id.ser(writer);
        writer.write_i64(self.hash);
    }

    fn de(reader: &mut BufferReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            name: String::de(reader)?,
            rd_id: RdId::de(reader)?,
            hash: reader.read_i64()?,
        })
    }
}

crate::rd_value_via_serde!(ExtCreationInfo);
