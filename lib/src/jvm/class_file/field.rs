use crate::jvm::class_file::{Attribute, ConstantsPool, Serialize, Utf8ConstantIndex};
use crate::jvm::{Error, FieldAccessFlags, Parse};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Field declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.5
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub access_flags: FieldAccessFlags,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl Field {
    pub fn parse_checked<R: ReadBytesExt>(
        reader: &mut R,
        constants: &ConstantsPool,
    ) -> Result<Field, Error> {
        let access_flags = FieldAccessFlags::from_bits_truncate(u16::parse(reader)?);
        let name_index = constants.utf8_index(u16::parse(reader)?)?;
        let descriptor_index = constants.utf8_index(u16::parse(reader)?)?;
        let attributes = Attribute::parse_list(reader, constants)?;
        Ok(Field {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        })
    }

    pub fn name<'a>(&self, constants: &'a ConstantsPool) -> Result<&'a str, Error> {
        constants.utf8(self.name_index)
    }

    pub fn descriptor<'a>(&self, constants: &'a ConstantsPool) -> Result<&'a str, Error> {
        constants.utf8(self.descriptor_index)
    }
}

impl Serialize for Field {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}
