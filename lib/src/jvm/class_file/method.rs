use crate::jvm::class_file::{Attribute, Code, ConstantsPool, Serialize, Utf8ConstantIndex};
use crate::jvm::{Error, MethodAccessFlags, Parse};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Method declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.6
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl Method {
    pub fn parse_checked<R: ReadBytesExt>(
        reader: &mut R,
        constants: &ConstantsPool,
    ) -> Result<Method, Error> {
        let access_flags = MethodAccessFlags::from_bits_truncate(u16::parse(reader)?);
        let name_index = constants.utf8_index(u16::parse(reader)?)?;
        let descriptor_index = constants.utf8_index(u16::parse(reader)?)?;
        let attributes = Attribute::parse_list(reader, constants)?;
        Ok(Method {
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

    /// Position of the `Code` attribute in `attributes`, if there is one
    ///
    /// Abstract and native methods have no code, every other method has exactly one `Code`.
    pub fn code_position(&self, constants: &ConstantsPool) -> Result<Option<usize>, Error> {
        let mut found = None;
        for (idx, attribute) in self.attributes.iter().enumerate() {
            if attribute.is::<Code>(constants)? {
                if found.is_some() {
                    return Err(Error::MissingCode);
                }
                found = Some(idx);
            }
        }
        Ok(found)
    }

    /// Decoded `Code` attribute, if there is one
    pub fn code(&self, constants: &ConstantsPool) -> Result<Option<Code>, Error> {
        match self.code_position(constants)? {
            None => Ok(None),
            Some(idx) => self.attributes[idx].decode::<Code>().map(Some),
        }
    }
}

impl Serialize for Method {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}
