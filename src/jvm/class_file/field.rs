use crate::jvm::class_file::Attribute;
use crate::jvm::{Deserialize, FieldAccessFlags, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io;

/// Field declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.5
pub struct Field {
    pub access_flags: FieldAccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

impl Serialize for Field {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Field {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> io::Result<Field> {
        let access_flags = FieldAccessFlags::deserialize(reader)?;
        let name_index = u16::deserialize(reader)?;
        let descriptor_index = u16::deserialize(reader)?;
        let attributes = Vec::deserialize(reader)?;
        Ok(Field {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        })
    }
}
