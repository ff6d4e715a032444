use crate::jvm::class_file::{Attribute, AttributeLike};
use crate::jvm::{read_bytes, BinaryName, Error, Parse, RefType, Serialize};
use crate::util::{Offset, OffsetResult, OffsetVec, Width};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;

/// Class file constants pool
///
/// Pools are either parsed from an existing class file or started empty. Either way, they are
/// append only: existing indices never move, so every index already stored elsewhere in the class
/// stays valid. Lookups of UTF-8 and class constants reuse existing entries whenever possible.
#[derive(Debug, Clone)]
pub struct ConstantsPool {
    constants: OffsetVec<Constant>,

    utf8s: HashMap<String, Utf8ConstantIndex>,
    classes: HashMap<Utf8ConstantIndex, ClassConstantIndex>,
}

impl Default for ConstantsPool {
    fn default() -> Self {
        ConstantsPool::new()
    }
}

impl ConstantsPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantsPool {
        ConstantsPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            utf8s: HashMap::new(),
            classes: HashMap::new(),
        }
    }

    /// Number of pool slots used, plus one (this is the `constant_pool_count` of the class file)
    pub fn count(&self) -> u16 {
        self.constants.offset_len().0 as u16
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConstantIndex, &Constant)> {
        self.constants
            .iter()
            .map(|(offset, _, constant)| (ConstantIndex(offset.0 as u16), constant))
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, Error> {
        let offset = self.constants.offset_len().0;
        if offset + constant.width() > u16::MAX as usize {
            return Err(Error::ConstantPoolOverflow {
                constant,
                offset: offset as u16,
            });
        }

        self.constants.push(constant);
        Ok(ConstantIndex(offset as u16))
    }

    /// Record an existing constant in the lookup tables (first occurrence wins)
    fn remember(&mut self, index: ConstantIndex, constant: &Constant) {
        match constant {
            Constant::Utf8(string) => {
                self.utf8s
                    .entry(string.clone())
                    .or_insert(Utf8ConstantIndex(index));
            }
            Constant::Class(name) => {
                self.classes
                    .entry(*name)
                    .or_insert(ClassConstantIndex(index));
            }
            _ => (),
        }
    }

    /// Get or insert a utf8 constant from the constant pool
    pub fn get_utf8<'a, S: Into<Cow<'a, str>>>(&mut self, utf8: S) -> Result<Utf8ConstantIndex, Error> {
        let cow = utf8.into();

        if let Some(idx) = self.utf8s.get::<str>(cow.borrow()) {
            Ok(*idx)
        } else {
            let owned = cow.into_owned();
            let constant = Constant::Utf8(owned.clone());
            let idx = Utf8ConstantIndex(self.push_constant(constant)?);
            self.utf8s.insert(owned, idx);
            Ok(idx)
        }
    }

    /// Get or insert a class constant from the constant pool
    ///
    /// The name is in the form expected by `CONSTANT_Class_info` (see
    /// [`RefType::class_constant_name`]).
    pub fn get_class<'a, S: Into<Cow<'a, str>>>(&mut self, name: S) -> Result<ClassConstantIndex, Error> {
        let name = self.get_utf8(name)?;
        if let Some(idx) = self.classes.get(&name) {
            Ok(*idx)
        } else {
            let idx = ClassConstantIndex(self.push_constant(Constant::Class(name))?);
            self.classes.insert(name, idx);
            Ok(idx)
        }
    }

    /// Get or insert the class constant for a reference type
    pub fn get_ref_type(&mut self, ref_type: &RefType<BinaryName>) -> Result<ClassConstantIndex, Error> {
        self.get_class(ref_type.class_constant_name())
    }

    pub fn get_string(&mut self, string: &str) -> Result<StringConstantIndex, Error> {
        let utf8 = self.get_utf8(string)?;
        Ok(StringConstantIndex(self.push_constant(Constant::String(utf8))?))
    }

    pub fn get_integer(&mut self, integer: i32) -> Result<ConstantIndex, Error> {
        self.push_constant(Constant::Integer(integer))
    }

    pub fn get_float(&mut self, float: f32) -> Result<ConstantIndex, Error> {
        self.push_constant(Constant::Float(float))
    }

    pub fn get_long(&mut self, long: i64) -> Result<ConstantIndex, Error> {
        self.push_constant(Constant::Long(long))
    }

    pub fn get_double(&mut self, double: f64) -> Result<ConstantIndex, Error> {
        self.push_constant(Constant::Double(double))
    }

    pub fn get_name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<NameAndTypeConstantIndex, Error> {
        let name = self.get_utf8(name)?;
        let descriptor = self.get_utf8(descriptor)?;
        let constant = Constant::NameAndType { name, descriptor };
        Ok(NameAndTypeConstantIndex(self.push_constant(constant)?))
    }

    pub fn get_field_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<FieldRefConstantIndex, Error> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        let constant = Constant::FieldRef(class, name_and_type);
        Ok(FieldRefConstantIndex(self.push_constant(constant)?))
    }

    pub fn get_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<MethodRefConstantIndex, Error> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        let constant = Constant::MethodRef {
            class,
            name_and_type,
            is_interface,
        };
        Ok(MethodRefConstantIndex(self.push_constant(constant)?))
    }

    /// Add an attribute to the constant pool
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: &A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];

        attribute.serialize(&mut info)?;

        Ok(Attribute { name_index, info })
    }

    /// Look up a constant by its index
    pub fn get(&self, index: ConstantIndex, expected: &'static str) -> Result<&Constant, Error> {
        match self.constants.get_offset(Offset(index.0 as usize)) {
            OffsetResult::Ok(_, constant) => Ok(constant),
            OffsetResult::InvalidOffset(_) | OffsetResult::TooLarge => {
                Err(Error::BadConstantIndex {
                    index: index.0,
                    expected,
                })
            }
        }
    }

    /// Check that an index points to a UTF-8 constant
    pub fn utf8_index(&self, index: u16) -> Result<Utf8ConstantIndex, Error> {
        match self.get(ConstantIndex(index), "Utf8")? {
            Constant::Utf8(_) => Ok(Utf8ConstantIndex(ConstantIndex(index))),
            _ => Err(Error::BadConstantIndex {
                index,
                expected: "Utf8",
            }),
        }
    }

    /// Check that an index points to a class constant
    pub fn class_index(&self, index: u16) -> Result<ClassConstantIndex, Error> {
        match self.get(ConstantIndex(index), "Class")? {
            Constant::Class(_) => Ok(ClassConstantIndex(ConstantIndex(index))),
            _ => Err(Error::BadConstantIndex {
                index,
                expected: "Class",
            }),
        }
    }

    /// Like [`Self::class_index`], but `0` means "no class"
    pub fn optional_class_index(&self, index: u16) -> Result<Option<ClassConstantIndex>, Error> {
        if index == 0 {
            Ok(None)
        } else {
            self.class_index(index).map(Some)
        }
    }

    pub fn field_ref_index(&self, index: u16) -> Result<FieldRefConstantIndex, Error> {
        match self.get(ConstantIndex(index), "Fieldref")? {
            Constant::FieldRef(_, _) => Ok(FieldRefConstantIndex(ConstantIndex(index))),
            _ => Err(Error::BadConstantIndex {
                index,
                expected: "Fieldref",
            }),
        }
    }

    pub fn method_ref_index(&self, index: u16) -> Result<MethodRefConstantIndex, Error> {
        match self.get(ConstantIndex(index), "Methodref")? {
            Constant::MethodRef { .. } => Ok(MethodRefConstantIndex(ConstantIndex(index))),
            _ => Err(Error::BadConstantIndex {
                index,
                expected: "Methodref",
            }),
        }
    }

    pub fn invoke_dynamic_index(&self, index: u16) -> Result<InvokeDynamicConstantIndex, Error> {
        match self.get(ConstantIndex(index), "InvokeDynamic")? {
            Constant::InvokeDynamic { .. } => Ok(InvokeDynamicConstantIndex(ConstantIndex(index))),
            _ => Err(Error::BadConstantIndex {
                index,
                expected: "InvokeDynamic",
            }),
        }
    }

    /// Check that an index points to something `ldc`/`ldc_w` (or `ldc2_w` if `wide`) can load
    pub fn loadable_index(&self, index: u16, wide: bool) -> Result<ConstantIndex, Error> {
        let expected = if wide { "Long or Double" } else { "loadable constant" };
        let is_wide = match self.get(ConstantIndex(index), expected)? {
            Constant::Long(_) | Constant::Double(_) => true,
            Constant::Integer(_)
            | Constant::Float(_)
            | Constant::String(_)
            | Constant::Class(_)
            | Constant::MethodHandle { .. }
            | Constant::MethodType { .. } => false,
            Constant::Dynamic { name_and_type, .. } => {
                let (_, descriptor) = self.name_and_type(*name_and_type)?;
                matches!(descriptor, "J" | "D")
            }
            _ => {
                return Err(Error::BadConstantIndex { index, expected });
            }
        };
        if is_wide == wide {
            Ok(ConstantIndex(index))
        } else {
            Err(Error::BadConstantIndex { index, expected })
        }
    }

    /// Get the string stored in a UTF-8 constant
    pub fn utf8(&self, index: Utf8ConstantIndex) -> Result<&str, Error> {
        match self.get(index.0, "Utf8")? {
            Constant::Utf8(string) => Ok(string),
            _ => Err(Error::BadConstantIndex {
                index: (index.0).0,
                expected: "Utf8",
            }),
        }
    }

    /// Get the raw name stored in a class constant
    pub fn class_name(&self, index: ClassConstantIndex) -> Result<&str, Error> {
        match self.get(index.0, "Class")? {
            Constant::Class(name) => self.utf8(*name),
            _ => Err(Error::BadConstantIndex {
                index: (index.0).0,
                expected: "Class",
            }),
        }
    }

    /// Interpret a class constant as a reference type
    pub fn class_ref_type(&self, index: ClassConstantIndex) -> Result<RefType<BinaryName>, Error> {
        RefType::from_class_constant(self.class_name(index)?)
    }

    /// Name and descriptor of a `CONSTANT_NameAndType_info`
    pub fn name_and_type(&self, index: NameAndTypeConstantIndex) -> Result<(&str, &str), Error> {
        match self.get(index.0, "NameAndType")? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(Error::BadConstantIndex {
                index: (index.0).0,
                expected: "NameAndType",
            }),
        }
    }

    /// Class, name, and descriptor of a field reference
    pub fn field_ref(&self, index: FieldRefConstantIndex) -> Result<MemberRef<'_>, Error> {
        match self.get(index.0, "Fieldref")? {
            Constant::FieldRef(class, name_and_type) => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(MemberRef {
                    class: *class,
                    name,
                    descriptor,
                })
            }
            _ => Err(Error::BadConstantIndex {
                index: (index.0).0,
                expected: "Fieldref",
            }),
        }
    }

    /// Class, name, and descriptor of a method reference
    pub fn method_ref(&self, index: MethodRefConstantIndex) -> Result<MemberRef<'_>, Error> {
        match self.get(index.0, "Methodref")? {
            Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(MemberRef {
                    class: *class,
                    name,
                    descriptor,
                })
            }
            _ => Err(Error::BadConstantIndex {
                index: (index.0).0,
                expected: "Methodref",
            }),
        }
    }

    /// Method descriptor of an invoke dynamic call site
    pub fn invoke_dynamic_descriptor(&self, index: InvokeDynamicConstantIndex) -> Result<&str, Error> {
        match self.get(index.0, "InvokeDynamic")? {
            Constant::InvokeDynamic {
                method_descriptor, ..
            } => Ok(self.name_and_type(*method_descriptor)?.1),
            _ => Err(Error::BadConstantIndex {
                index: (index.0).0,
                expected: "InvokeDynamic",
            }),
        }
    }

    /// Check every reference between constants points at a constant of the right kind
    fn check_references(&self) -> Result<(), Error> {
        for (_, constant) in self.iter() {
            match constant {
                Constant::Class(name)
                | Constant::String(name)
                | Constant::Module(name)
                | Constant::Package(name)
                | Constant::MethodType { descriptor: name } => {
                    self.utf8(*name)?;
                }
                Constant::FieldRef(class, name_and_type)
                | Constant::MethodRef {
                    class,
                    name_and_type,
                    ..
                } => {
                    self.class_name(*class)?;
                    self.name_and_type(*name_and_type)?;
                }
                Constant::NameAndType { name, descriptor } => {
                    self.utf8(*name)?;
                    self.utf8(*descriptor)?;
                }
                Constant::MethodHandle {
                    handle_kind,
                    member,
                } => match handle_kind {
                    HandleKind::GetField
                    | HandleKind::GetStatic
                    | HandleKind::PutField
                    | HandleKind::PutStatic => {
                        self.field_ref_index(member.0)?;
                    }
                    _ => {
                        self.method_ref_index(member.0)?;
                    }
                },
                Constant::Dynamic { name_and_type, .. } => {
                    self.name_and_type(*name_and_type)?;
                }
                Constant::InvokeDynamic {
                    method_descriptor, ..
                } => {
                    self.name_and_type(*method_descriptor)?;
                }
                Constant::Integer(_)
                | Constant::Float(_)
                | Constant::Long(_)
                | Constant::Double(_)
                | Constant::Utf8(_) => (),
            }
        }
        Ok(())
    }
}

impl Parse for ConstantsPool {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let count = u16::parse(reader)?;
        let mut pool = ConstantsPool::new();
        while pool.count() < count {
            let index = pool.count();
            let constant = Constant::parse_at(reader, index)?;
            if index as usize + constant.width() > count as usize {
                return Err(Error::BadConstantIndex {
                    index,
                    expected: "constant inside the pool",
                });
            }
            pool.remember(ConstantIndex(index), &constant);
            pool.constants.push(constant);
        }
        pool.check_references()?;
        Ok(pool)
    }
}

impl Serialize for ConstantsPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.count().serialize(writer)?;
        for (_, _, constant) in &self.constants {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

/// Resolved view of a `CONSTANT_Fieldref_info` or `CONSTANT_Methodref_info`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class: ClassConstantIndex,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// Constants as in the constant pool
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,

        /// Depending on the method kind, this points to different things:
        ///
        ///   - `FieldRef` for `GetField`, `GetStatic`, `PutField`, `PutStatic`
        ///   - `MethodRef` for the rest
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    },

    Module(Utf8ConstantIndex),
    Package(Utf8ConstantIndex),
}

impl Constant {
    fn parse_at<R: ReadBytesExt>(reader: &mut R, index: u16) -> Result<Constant, Error> {
        fn idx<R: ReadBytesExt>(reader: &mut R) -> Result<ConstantIndex, Error> {
            Ok(ConstantIndex(u16::parse(reader)?))
        }

        let tag = u8::parse(reader)?;
        let constant = match tag {
            1 => {
                let len = u16::parse(reader)?;
                let bytes = read_bytes(reader, len as usize)?;
                let string =
                    decode_modified_utf8(&bytes).ok_or(Error::MalformedUtf8 { index })?;
                Constant::Utf8(string)
            }
            3 => Constant::Integer(i32::parse(reader)?),
            4 => Constant::Float(f32::from_bits(u32::parse(reader)?)),
            5 => Constant::Long(i64::parse(reader)?),
            6 => Constant::Double(f64::from_bits(i64::parse(reader)? as u64)),
            7 => Constant::Class(Utf8ConstantIndex(idx(reader)?)),
            8 => Constant::String(Utf8ConstantIndex(idx(reader)?)),
            9 => Constant::FieldRef(
                ClassConstantIndex(idx(reader)?),
                NameAndTypeConstantIndex(idx(reader)?),
            ),
            10 | 11 => Constant::MethodRef {
                class: ClassConstantIndex(idx(reader)?),
                name_and_type: NameAndTypeConstantIndex(idx(reader)?),
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: Utf8ConstantIndex(idx(reader)?),
                descriptor: Utf8ConstantIndex(idx(reader)?),
            },
            15 => {
                let kind = u8::parse(reader)?;
                let handle_kind =
                    HandleKind::from_u8(kind).ok_or(Error::BadConstantTag { index, tag: kind })?;
                Constant::MethodHandle {
                    handle_kind,
                    member: idx(reader)?,
                }
            }
            16 => Constant::MethodType {
                descriptor: Utf8ConstantIndex(idx(reader)?),
            },
            17 => Constant::Dynamic {
                bootstrap_method: u16::parse(reader)?,
                name_and_type: NameAndTypeConstantIndex(idx(reader)?),
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: u16::parse(reader)?,
                method_descriptor: NameAndTypeConstantIndex(idx(reader)?),
            },
            19 => Constant::Module(Utf8ConstantIndex(idx(reader)?)),
            20 => Constant::Package(Utf8ConstantIndex(idx(reader)?)),
            _ => return Err(Error::BadConstantTag { index, tag }),
        };
        Ok(constant)
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                1u8.serialize(writer)?;
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(bytes) => {
                8u8.serialize(writer)?;
                bytes.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                method_descriptor.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    for c in string.chars() {
        // Handle the exception for how `\u{0000}` is represented
        let len: usize = if c == '\u{0000}' { 2 } else { c.len_utf8() };
        let code: u32 = c as u32;

        match len {
            1 => buffer.push(code as u8),
            2 => {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
            3 => {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }

            // Supplementary characters: main divergence from unicode
            _ => {
                buffer.push(0b1110_1101);
                buffer.push(((code >> 16 & 0x0F) as u8).wrapping_sub(1) & 0x0F | 0b1010_0000);
                buffer.push((code >> 10 & 0x3F) as u8 | 0b1000_0000);

                buffer.push(0b1110_1101);
                buffer.push(((code >> 6 & 0x1F) as u8) | 0b1011_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
///
/// Only the canonical encoding is accepted (no overlong forms except for `\u{0000}`, no unpaired
/// surrogates), so decoding and re-encoding always reproduces the input bytes.
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    let continuation = |byte: Option<u8>| match byte {
        Some(b) if b & 0b1100_0000 == 0b1000_0000 => Some((b & 0x3F) as u16),
        _ => None,
    };

    while let Some(first) = iter.next() {
        let unit = match first {
            0 => return None,
            0x01..=0x7F => first as u16,
            0xC0..=0xDF => {
                let unit = ((first & 0x1F) as u16) << 6 | continuation(iter.next())?;
                if unit != 0 && unit < 0x80 {
                    return None;
                }
                unit
            }
            0xE0..=0xEF => {
                let unit = ((first & 0x0F) as u16) << 12
                    | continuation(iter.next())? << 6
                    | continuation(iter.next())?;
                if unit < 0x800 {
                    return None;
                }
                unit
            }
            _ => return None,
        };
        units.push(unit);
    }

    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}

#[cfg(test)]
mod modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
        assert_eq!(
            decode_modified_utf8(&[97, 192, 128, 97]).as_deref(),
            Some("a\x00a")
        );
    }

    #[test]
    fn simple_ascii() {
        assert_eq!(encode_modified_utf8("foo"), vec![102, 111, 111]);
        assert_eq!(decode_modified_utf8(b"hel10_World").as_deref(), Some("hel10_World"));
    }

    #[test]
    fn two_and_three_byte_encodings() {
        let text = "ĄǍǞǠǺȀȂȦȺӐӒऄअॲঅਅઅଅஅఅಅഅะະ༁ཨ";
        let encoded = encode_modified_utf8(text);
        assert_eq!(encoded, text.as_bytes());
        assert_eq!(decode_modified_utf8(&encoded).as_deref(), Some(text));
    }

    #[test]
    fn supplementary_characters() {
        let encoded = vec![
            237, 160, 128, 237, 176, 128, 237, 172, 191, 237, 191, 191, 237, 175, 191, 237, 191,
            191,
        ];
        assert_eq!(encode_modified_utf8("\u{10000}\u{dffff}\u{10FFFF}"), encoded);
        assert_eq!(
            decode_modified_utf8(&encoded).as_deref(),
            Some("\u{10000}\u{dffff}\u{10FFFF}")
        );
    }

    #[test]
    fn rejects_non_canonical_input() {
        // raw null byte
        assert_eq!(decode_modified_utf8(&[97, 0]), None);
        // overlong encoding of 'a'
        assert_eq!(decode_modified_utf8(&[0xC1, 0xA1]), None);
        // four byte UTF-8 form
        assert_eq!(decode_modified_utf8(&[0xF0, 0x90, 0x80, 0x80]), None);
        // unpaired high surrogate
        assert_eq!(decode_modified_utf8(&[237, 160, 128]), None);
        // truncated sequence
        assert_eq!(decode_modified_utf8(&[0xE0, 0xA4]), None);
    }
}

/// `long` and `double` constants take two pool indices (the second one is unusable), everything
/// else takes one
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct ConstantIndex(pub u16);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct Utf8ConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct StringConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct NameAndTypeConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ClassConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct FieldRefConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct MethodRefConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct InvokeDynamicConstantIndex(pub ConstantIndex);

impl From<Utf8ConstantIndex> for ConstantIndex {
    fn from(index: Utf8ConstantIndex) -> ConstantIndex {
        index.0
    }
}
impl From<StringConstantIndex> for ConstantIndex {
    fn from(index: StringConstantIndex) -> ConstantIndex {
        index.0
    }
}
impl From<ClassConstantIndex> for ConstantIndex {
    fn from(index: ClassConstantIndex) -> ConstantIndex {
        index.0
    }
}

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}
impl Serialize for Utf8ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}
impl Serialize for StringConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}
impl Serialize for NameAndTypeConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}
impl Serialize for ClassConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}
impl Serialize for FieldRefConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}
impl Serialize for MethodRefConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}
impl Serialize for InvokeDynamicConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

/// `0` stands for "absent" (eg. the catch-all exception handler, or the super class of
/// `java/lang/Object`)
impl Serialize for Option<ClassConstantIndex> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            None => 0u16.serialize(writer),
            Some(idx) => idx.serialize(writer),
        }
    }
}

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl HandleKind {
    fn from_u8(byte: u8) -> Option<HandleKind> {
        Some(match byte {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            _ => return None,
        })
    }
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let byte: u8 = match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        };
        byte.serialize(writer)
    }
}
