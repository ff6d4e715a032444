use crate::jvm::class_file::{
    Attribute, ClassConstantIndex, ConstantsPool, Field, Method, Serialize, Version,
};
use crate::jvm::{BinaryName, ClassAccessFlags, Error, Name, Parse};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantsPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,
    pub super_class: Option<ClassConstantIndex>,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

/// Magic header bytes that go at the front of the serialized class file
const MAGIC: u32 = 0xCAFE_BABE;

impl ClassFile {
    /// Parse a complete class file
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, Error> {
        let mut reader = bytes;
        let (version, constants) = parse_prefix(&mut reader)?;
        let (access_flags, this_class, super_class, interfaces) =
            parse_identity(&mut reader, &constants)?;

        let field_count = u16::parse(&mut reader)?;
        let fields = (0..field_count)
            .map(|_| Field::parse_checked(&mut reader, &constants))
            .collect::<Result<Vec<_>, _>>()?;

        let method_count = u16::parse(&mut reader)?;
        let methods = (0..method_count)
            .map(|_| Method::parse_checked(&mut reader, &constants))
            .collect::<Result<Vec<_>, _>>()?;

        let attributes = Attribute::parse_list(&mut reader, &constants)?;
        if !reader.is_empty() {
            return Err(Error::TrailingBytes(reader.len()));
        }

        Ok(ClassFile {
            version,
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Name of the class being defined
    pub fn this_class_name(&self) -> Result<BinaryName, Error> {
        class_binary_name(&self.constants, self.this_class)
    }

    /// Name of the super class (only `java/lang/Object` has none)
    pub fn super_class_name(&self) -> Result<Option<BinaryName>, Error> {
        self.super_class
            .map(|idx| class_binary_name(&self.constants, idx))
            .transpose()
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    /// Header of the class, as the type resolver sees it
    pub fn header(&self) -> Result<ClassHeader, Error> {
        Ok(ClassHeader {
            access_flags: self.access_flags,
            name: self.this_class_name()?,
            super_class: self.super_class_name()?,
            interfaces: self
                .interfaces
                .iter()
                .map(|idx| class_binary_name(&self.constants, *idx))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Serialize into a fresh buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        Ok(bytes)
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        MAGIC.serialize(writer)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class.serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

/// Structural information about a class, without any of its members
///
/// This is all that is needed to place a class in the type hierarchy, and it can be read without
/// looking past the interface list of the class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHeader {
    pub access_flags: ClassAccessFlags,
    pub name: BinaryName,
    pub super_class: Option<BinaryName>,
    pub interfaces: Vec<BinaryName>,
}

impl ClassHeader {
    /// Parse only the header of a class file
    pub fn parse(bytes: &[u8]) -> Result<ClassHeader, Error> {
        let mut reader = bytes;
        let (_, constants) = parse_prefix(&mut reader)?;
        let (access_flags, this_class, super_class, interfaces) =
            parse_identity(&mut reader, &constants)?;
        Ok(ClassHeader {
            access_flags,
            name: class_binary_name(&constants, this_class)?,
            super_class: super_class
                .map(|idx| class_binary_name(&constants, idx))
                .transpose()?,
            interfaces: interfaces
                .into_iter()
                .map(|idx| class_binary_name(&constants, idx))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }
}

fn class_binary_name(constants: &ConstantsPool, index: ClassConstantIndex) -> Result<BinaryName, Error> {
    let name = constants.class_name(index)?;
    BinaryName::from_string(name.to_owned()).map_err(Error::BadName)
}

/// Magic, version, and constant pool
fn parse_prefix<R: ReadBytesExt>(reader: &mut R) -> Result<(Version, ConstantsPool), Error> {
    let magic = u32::parse(reader)?;
    if magic != MAGIC {
        return Err(Error::BadMagic(magic));
    }
    let version = Version::parse(reader)?;
    let constants = ConstantsPool::parse(reader)?;
    Ok((version, constants))
}

type Identity = (
    ClassAccessFlags,
    ClassConstantIndex,
    Option<ClassConstantIndex>,
    Vec<ClassConstantIndex>,
);

/// Access flags, this class, super class, and interfaces
fn parse_identity<R: ReadBytesExt>(reader: &mut R, constants: &ConstantsPool) -> Result<Identity, Error> {
    let access_flags = ClassAccessFlags::from_bits_truncate(u16::parse(reader)?);
    let this_class = constants.class_index(u16::parse(reader)?)?;
    let super_class = constants.optional_class_index(u16::parse(reader)?)?;
    let interface_count = u16::parse(reader)?;
    let interfaces = (0..interface_count)
        .map(|_| constants.class_index(u16::parse(reader)?))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((access_flags, this_class, super_class, interfaces))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::Code;
    use crate::jvm::MethodAccessFlags;

    fn sample_class() -> ClassFile {
        let mut constants = ConstantsPool::new();
        let this_class = constants.get_class("demo/Sample").unwrap();
        let super_class = constants.get_class("java/lang/Object").unwrap();
        let runnable = constants.get_class("java/lang/Runnable").unwrap();
        let code = Code {
            max_stack: 0,
            max_locals: 1,
            code_array: crate::jvm::class_file::BytecodeArray(vec![0xb1]),
            exception_table: vec![],
            attributes: vec![],
        };
        let code = constants.get_attribute(&code).unwrap();
        let name_index = constants.get_utf8("run").unwrap();
        let descriptor_index = constants.get_utf8("()V").unwrap();
        let source = Attribute {
            name_index: constants.get_utf8("SourceFile").unwrap(),
            info: vec![0, 1],
        };
        ClassFile {
            version: Version::JAVA1_1,
            constants,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class: Some(super_class),
            interfaces: vec![runnable],
            fields: vec![],
            methods: vec![Method {
                access_flags: MethodAccessFlags::PUBLIC,
                name_index,
                descriptor_index,
                attributes: vec![code],
            }],
            attributes: vec![source],
        }
    }

    #[test]
    fn round_trip_is_byte_exact() {
        let bytes = sample_class().to_bytes().unwrap();
        let parsed = ClassFile::parse(&bytes).unwrap();
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
        assert_eq!(parsed.this_class_name().unwrap().as_str(), "demo/Sample");
        assert_eq!(parsed.super_class_name().unwrap(), Some(BinaryName::OBJECT));
        let code = parsed.methods[0].code(&parsed.constants).unwrap().unwrap();
        assert_eq!(code.code_array.0, vec![0xb1]);
    }

    #[test]
    fn header_only() {
        let bytes = sample_class().to_bytes().unwrap();
        let header = ClassHeader::parse(&bytes).unwrap();
        assert_eq!(header.name.as_str(), "demo/Sample");
        assert_eq!(header.super_class, Some(BinaryName::OBJECT));
        assert_eq!(header.interfaces.len(), 1);
        assert!(!header.is_interface());
    }

    #[test]
    fn malformed_inputs() {
        let bytes = sample_class().to_bytes().unwrap();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = 0;
        assert!(matches!(
            ClassFile::parse(&bad_magic),
            Err(Error::BadMagic(0x00FE_BABE))
        ));

        assert!(matches!(
            ClassFile::parse(&bytes[..bytes.len() - 3]),
            Err(Error::UnexpectedEof)
        ));

        let mut trailing = bytes;
        trailing.push(0);
        assert!(matches!(
            ClassFile::parse(&trailing),
            Err(Error::TrailingBytes(1))
        ));
    }
}
