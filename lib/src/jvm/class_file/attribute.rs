use crate::jvm::class_file::{ClassConstantIndex, ConstantIndex, ConstantsPool, Utf8ConstantIndex};
use crate::jvm::verifier::VerificationType;
use crate::jvm::{read_bytes, Error, Parse, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Attributes (used in classes, fields, methods, and even on some attributes)
///
/// Attributes are kept in their raw form. The ones that matter for preverification are decoded
/// on demand through [`AttributeLike`], everything else is written back exactly as it was read.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: Utf8ConstantIndex,
    pub info: Vec<u8>,
}

impl Attribute {
    pub fn name<'a>(&self, constants: &'a ConstantsPool) -> Result<&'a str, Error> {
        constants.utf8(self.name_index)
    }

    /// Check if this attribute has the name of the given attribute type
    pub fn is<A: AttributeLike>(&self, constants: &ConstantsPool) -> Result<bool, Error> {
        Ok(self.name(constants)? == A::NAME)
    }

    /// Decode the attribute contents, requiring that all of the bytes are used
    pub fn decode<A: AttributeLike>(&self) -> Result<A, Error> {
        let mut reader: &[u8] = &self.info;
        let decoded = A::parse(&mut reader).map_err(|err| match err {
            Error::UnexpectedEof => Error::AttributeLength(A::NAME),
            other => other,
        })?;
        if reader.is_empty() {
            Ok(decoded)
        } else {
            Err(Error::AttributeLength(A::NAME))
        }
    }

    /// Parse an attribute, checking that its name points at a UTF-8 constant
    pub fn parse_checked<R: ReadBytesExt>(
        reader: &mut R,
        constants: &ConstantsPool,
    ) -> Result<Attribute, Error> {
        let name_index = constants.utf8_index(u16::parse(reader)?)?;
        let len = u32::parse(reader)?;
        let info = read_bytes(reader, len as usize)?;
        Ok(Attribute { name_index, info })
    }

    /// Parse a `u16`-prefixed list of attributes
    pub fn parse_list<R: ReadBytesExt>(
        reader: &mut R,
        constants: &ConstantsPool,
    ) -> Result<Vec<Attribute>, Error> {
        let count = u16::parse(reader)?;
        (0..count)
            .map(|_| Attribute::parse_checked(reader, constants))
            .collect()
    }

    /// Find the first attribute of a given type in a list of attributes and decode it
    pub fn find<A: AttributeLike>(
        attributes: &[Attribute],
        constants: &ConstantsPool,
    ) -> Result<Option<A>, Error> {
        for attribute in attributes {
            if attribute.is::<A>(constants)? {
                return attribute.decode::<A>().map(Some);
            }
        }
        Ok(None)
    }
}

impl Serialize for Attribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name_index.serialize(writer)?;

        // Attribute info length is 4 bytes
        (self.info.len() as u32).serialize(writer)?;
        writer.write_all(&self.info)?;

        Ok(())
    }
}

/// Attributes are all stored in the same way (see `Attribute`), but internally
/// they represent very different things. This trait is implemented by things
/// which can be turned into attributes.
///
/// Nested attributes (eg. inside `Code`) are left undecoded, so parsing never needs the constant
/// pool.
pub trait AttributeLike: Serialize + Parse {
    /// Name of the attribute
    const NAME: &'static str;
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.2
pub struct ConstantValue;

impl ConstantValue {
    pub const NAME: &'static str = "ConstantValue";
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_array: BytecodeArray,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl Serialize for Code {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.max_stack.serialize(writer)?;
        self.max_locals.serialize(writer)?;
        self.code_array.serialize(writer)?;
        self.exception_table.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Parse for Code {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let max_stack = u16::parse(reader)?;
        let max_locals = u16::parse(reader)?;
        let code_array = BytecodeArray::parse(reader)?;
        let exception_table = Vec::<ExceptionHandler>::parse(reader)?;
        let attributes = Vec::<Attribute>::parse(reader)?;
        Ok(Code {
            max_stack,
            max_locals,
            code_array,
            exception_table,
            attributes,
        })
    }
}

impl AttributeLike for Code {
    const NAME: &'static str = "Code";
}

/// Unchecked parse (the name index is validated when the attribute is looked up by name)
impl Parse for Attribute {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let name_index = Utf8ConstantIndex(ConstantIndex(u16::parse(reader)?));
        let len = u32::parse(reader)?;
        let info = read_bytes(reader, len as usize)?;
        Ok(Attribute { name_index, info })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of exception handler range (inclusive)
    pub start_pc: BytecodeIndex,

    /// End of exception handler range (exclusive)
    pub end_pc: BytecodeIndex,

    /// Start of the exception handler
    pub handler_pc: BytecodeIndex,

    /// Type of exception caught (`None` catches everything)
    pub catch_type: Option<ClassConstantIndex>,
}

impl Serialize for ExceptionHandler {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.end_pc.serialize(writer)?;
        self.handler_pc.serialize(writer)?;
        self.catch_type.serialize(writer)?;
        Ok(())
    }
}

impl Parse for ExceptionHandler {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let start_pc = BytecodeIndex::parse(reader)?;
        let end_pc = BytecodeIndex::parse(reader)?;
        let handler_pc = BytecodeIndex::parse(reader)?;
        let catch_type = match u16::parse(reader)? {
            0 => None,
            idx => Some(ClassConstantIndex(ConstantIndex(idx))),
        };
        Ok(ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        })
    }
}

/// Encoded bytecode instructions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeArray(pub Vec<u8>);

impl Serialize for BytecodeArray {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let len = self.0.len() as u32;
        len.serialize(writer)?;
        writer.write_all(&self.0)?;
        Ok(())
    }
}

impl Parse for BytecodeArray {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let len = u32::parse(reader)?;
        Ok(BytecodeArray(read_bytes(reader, len as usize)?))
    }
}

/// Index into `BytecodeArray`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BytecodeIndex(pub u16);

impl Serialize for BytecodeIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Parse for BytecodeIndex {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(BytecodeIndex(u16::parse(reader)?))
    }
}

/// Verification type as it appears in a serialized frame
pub type SerializedType = VerificationType<ClassConstantIndex, BytecodeIndex>;

impl Serialize for SerializedType {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(cls) => {
                7u8.serialize(writer)?;
                cls.serialize(writer)?;
            }
            VerificationType::Uninitialized(off) => {
                8u8.serialize(writer)?;
                off.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Parse for SerializedType {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let tag = u8::parse(reader)?;
        Ok(match tag {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(ClassConstantIndex(ConstantIndex(u16::parse(reader)?))),
            8 => VerificationType::Uninitialized(BytecodeIndex::parse(reader)?),
            _ => return Err(Error::AttributeLength("verification type")),
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.7.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapTable(pub Vec<StackMapFrame>);

impl AttributeLike for StackMapTable {
    const NAME: &'static str = "StackMapTable";
}

impl Serialize for StackMapTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Parse for StackMapTable {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(StackMapTable(Vec::<StackMapFrame>::parse(reader)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    /// Frame has the same locals as the previous frame and number of stack items is zero
    /// Tags: 0-63 or 251
    SameLocalsNoStack { offset_delta: u16 },

    /// Frame has the same locals as the previous frame and number of stack items is one
    /// Tags: 64-127 or 247
    SameLocalsOneStack {
        offset_delta: u16,
        stack: SerializedType,
    },

    /// Frame is like the previous frame, but without the last `chopped_k` locals
    ///
    /// Note: `chopped_k` must be in the range 1 to 3 inclusive
    /// Tags: 248-250
    ChopLocalsNoStack { offset_delta: u16, chopped_k: u8 },

    /// Frame is like the previous frame, but with extra locals
    /// Tags: 252-254
    AppendLocalsNoStack {
        offset_delta: u16,
        locals: Vec<SerializedType>,
    },

    /// Frame has exactly the locals and stack specified
    /// Tag: 255
    Full {
        offset_delta: u16,
        locals: Vec<SerializedType>,
        stack: Vec<SerializedType>,
    },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::SameLocalsNoStack { offset_delta }
            | StackMapFrame::SameLocalsOneStack { offset_delta, .. }
            | StackMapFrame::ChopLocalsNoStack { offset_delta, .. }
            | StackMapFrame::AppendLocalsNoStack { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }
}

impl Serialize for StackMapFrame {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            // `same_frame` and `same_frame_extended`
            StackMapFrame::SameLocalsNoStack { offset_delta } => {
                if *offset_delta <= 63 {
                    (*offset_delta as u8).serialize(writer)?;
                } else {
                    251u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
            }

            // `same_locals_1_stack_item_frame` and `same_locals_1_stack_item_frame_extended`
            StackMapFrame::SameLocalsOneStack {
                offset_delta,
                stack,
            } => {
                if *offset_delta <= 63 {
                    (*offset_delta as u8 + 64).serialize(writer)?;
                } else {
                    247u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
                stack.serialize(writer)?;
            }

            // `chop_frame`
            StackMapFrame::ChopLocalsNoStack {
                offset_delta,
                chopped_k,
            } => {
                (251 - chopped_k).serialize(writer)?;
                offset_delta.serialize(writer)?;
            }

            // `append_frame`
            StackMapFrame::AppendLocalsNoStack {
                offset_delta,
                locals,
            } => {
                (251 + locals.len() as u8).serialize(writer)?;
                offset_delta.serialize(writer)?;
                for local in locals {
                    local.serialize(writer)?;
                }
            }

            // `full_frame`
            StackMapFrame::Full {
                offset_delta,
                locals,
                stack,
            } => {
                255u8.serialize(writer)?;
                offset_delta.serialize(writer)?;
                locals.serialize(writer)?;
                stack.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Parse for StackMapFrame {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let tag = u8::parse(reader)?;
        Ok(match tag {
            0..=63 => StackMapFrame::SameLocalsNoStack {
                offset_delta: tag as u16,
            },
            64..=127 => StackMapFrame::SameLocalsOneStack {
                offset_delta: tag as u16 - 64,
                stack: SerializedType::parse(reader)?,
            },
            247 => StackMapFrame::SameLocalsOneStack {
                offset_delta: u16::parse(reader)?,
                stack: SerializedType::parse(reader)?,
            },
            248..=250 => StackMapFrame::ChopLocalsNoStack {
                offset_delta: u16::parse(reader)?,
                chopped_k: 251 - tag,
            },
            251 => StackMapFrame::SameLocalsNoStack {
                offset_delta: u16::parse(reader)?,
            },
            252..=254 => {
                let offset_delta = u16::parse(reader)?;
                let locals = (0..tag - 251)
                    .map(|_| SerializedType::parse(reader))
                    .collect::<Result<_, _>>()?;
                StackMapFrame::AppendLocalsNoStack {
                    offset_delta,
                    locals,
                }
            }
            255 => StackMapFrame::Full {
                offset_delta: u16::parse(reader)?,
                locals: Vec::<SerializedType>::parse(reader)?,
                stack: Vec::<SerializedType>::parse(reader)?,
            },
            _ => return Err(Error::AttributeLength(StackMapTable::NAME)),
        })
    }
}

/// CLDC-style stack map: every frame is stored in full, at an absolute offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMap(pub Vec<StackMapEntry>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapEntry {
    pub offset: BytecodeIndex,
    pub locals: Vec<SerializedType>,
    pub stack: Vec<SerializedType>,
}

impl AttributeLike for StackMap {
    const NAME: &'static str = "StackMap";
}

impl Serialize for StackMap {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Parse for StackMap {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(StackMap(Vec::<StackMapEntry>::parse(reader)?))
    }
}

impl Serialize for StackMapEntry {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.offset.serialize(writer)?;
        self.locals.serialize(writer)?;
        self.stack.serialize(writer)?;
        Ok(())
    }
}

impl Parse for StackMapEntry {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(StackMapEntry {
            offset: BytecodeIndex::parse(reader)?,
            locals: Vec::<SerializedType>::parse(reader)?,
            stack: Vec::<SerializedType>::parse(reader)?,
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.12
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumberTable(pub Vec<LineNumber>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: BytecodeIndex,
    pub line_number: u16,
}

impl AttributeLike for LineNumberTable {
    const NAME: &'static str = "LineNumberTable";
}

impl Serialize for LineNumberTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Parse for LineNumberTable {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(LineNumberTable(Vec::<LineNumber>::parse(reader)?))
    }
}

impl Serialize for LineNumber {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.line_number.serialize(writer)?;
        Ok(())
    }
}

impl Parse for LineNumber {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(LineNumber {
            start_pc: BytecodeIndex::parse(reader)?,
            line_number: u16::parse(reader)?,
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.13
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTable(pub Vec<LocalVariable>);

/// Same layout as [`LocalVariableTable`], but with generic signatures instead of descriptors
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.14
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTypeTable(pub Vec<LocalVariable>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: BytecodeIndex,
    pub length: u16,
    pub name_index: Utf8ConstantIndex,
    /// Descriptor or signature, depending on the table
    pub descriptor_index: Utf8ConstantIndex,
    pub index: u16,
}

impl AttributeLike for LocalVariableTable {
    const NAME: &'static str = "LocalVariableTable";
}

impl AttributeLike for LocalVariableTypeTable {
    const NAME: &'static str = "LocalVariableTypeTable";
}

impl Serialize for LocalVariableTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Parse for LocalVariableTable {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(LocalVariableTable(Vec::<LocalVariable>::parse(reader)?))
    }
}

impl Serialize for LocalVariableTypeTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Parse for LocalVariableTypeTable {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(LocalVariableTypeTable(Vec::<LocalVariable>::parse(reader)?))
    }
}

impl Serialize for LocalVariable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.length.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.index.serialize(writer)?;
        Ok(())
    }
}

impl Parse for LocalVariable {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let start_pc = BytecodeIndex::parse(reader)?;
        let length = u16::parse(reader)?;
        let name_index = Utf8ConstantIndex(ConstantIndex(u16::parse(reader)?));
        let descriptor_index = Utf8ConstantIndex(ConstantIndex(u16::parse(reader)?));
        let index = u16::parse(reader)?;
        Ok(LocalVariable {
            start_pc,
            length,
            name_index,
            descriptor_index,
            index,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode<A: Serialize>(value: &A) -> Vec<u8> {
        let mut bytes = vec![];
        value.serialize(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn compact_frame_encodings() {
        let frames = StackMapTable(vec![
            StackMapFrame::SameLocalsNoStack { offset_delta: 5 },
            StackMapFrame::SameLocalsNoStack { offset_delta: 300 },
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 2,
                stack: VerificationType::Integer,
            },
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 1,
                chopped_k: 2,
            },
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 0,
                locals: vec![
                    VerificationType::Object(ClassConstantIndex(ConstantIndex(9))),
                    VerificationType::Uninitialized(BytecodeIndex(4)),
                ],
            },
        ]);
        let bytes = encode(&frames);
        assert_eq!(
            bytes,
            vec![
                0, 5, // count
                5, // same_frame
                251, 1, 44, // same_frame_extended
                66, 1, // same_locals_1_stack_item_frame
                249, 0, 1, // chop_frame
                253, 0, 0, 7, 0, 9, 8, 0, 4, // append_frame
            ]
        );
        let attribute = Attribute {
            name_index: Utf8ConstantIndex(ConstantIndex(1)),
            info: bytes,
        };
        assert_eq!(attribute.decode::<StackMapTable>().unwrap(), frames);
    }

    #[test]
    fn cldc_stack_map_layout() {
        let stack_map = StackMap(vec![StackMapEntry {
            offset: BytecodeIndex(7),
            locals: vec![VerificationType::Long, VerificationType::Top],
            stack: vec![VerificationType::Null],
        }]);
        assert_eq!(
            encode(&stack_map),
            vec![0, 1, 0, 7, 0, 2, 4, 0, 0, 1, 5]
        );
    }

    #[test]
    fn attribute_length_must_match() {
        let too_long = Attribute {
            name_index: Utf8ConstantIndex(ConstantIndex(1)),
            info: vec![0, 1, 0, 0, 0, 3, 0xff],
        };
        assert!(matches!(
            too_long.decode::<LineNumberTable>(),
            Err(Error::AttributeLength("LineNumberTable"))
        ));

        let too_short = Attribute {
            name_index: Utf8ConstantIndex(ConstantIndex(1)),
            info: vec![0, 2, 0, 0, 0, 3],
        };
        assert!(matches!(
            too_short.decode::<LineNumberTable>(),
            Err(Error::AttributeLength("LineNumberTable"))
        ));
    }
}
