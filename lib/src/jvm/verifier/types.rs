use crate::jvm::class_file::{BytecodeIndex, ConstantsPool, SerializedType};
use crate::jvm::code::{Layout, SynLabel};
use crate::jvm::{BaseType, BinaryName, Error, FieldType, RefType};
use crate::util::Width;

/// These types are from [this hierarchy][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType<Cls, U> {
    /// Unusable slot (never written, written with conflicting types, or the second half of a
    /// `long` or `double` local)
    Top,

    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type
    Object(Cls),

    /// State of an object after `new` has been called by `<init>` has not been called
    ///
    ///   - during inference, we use [`SynLabel`] for `U`: the label placed right before the
    ///     `new` instruction
    ///   - when serializing into a classfile, we use [`BytecodeIndex`] for `U`, corresponding to
    ///     the offset of the `new` instruction from the start of the method body
    Uninitialized(U),
}

/// Verification type used while inferring frames
pub type InferredType = VerificationType<RefType<BinaryName>, SynLabel>;

impl<Cls, U> VerificationType<Cls, U> {
    /// Is this type is a reference type?
    pub fn is_reference(&self) -> bool {
        match self {
            VerificationType::Top
            | VerificationType::Integer
            | VerificationType::Float
            | VerificationType::Double
            | VerificationType::Long => false,

            VerificationType::Null
            | VerificationType::UninitializedThis
            | VerificationType::Object(_)
            | VerificationType::Uninitialized(_) => true,
        }
    }

    /// Is this an object whose constructor has not run yet?
    pub fn is_uninitialized(&self) -> bool {
        matches!(
            self,
            VerificationType::UninitializedThis | VerificationType::Uninitialized(_)
        )
    }
}

impl<C, U> From<FieldType<C>> for VerificationType<RefType<C>, U> {
    fn from(field_type: FieldType<C>) -> Self {
        match field_type {
            FieldType::Base(BaseType::Int)
            | FieldType::Base(BaseType::Char)
            | FieldType::Base(BaseType::Short)
            | FieldType::Base(BaseType::Byte)
            | FieldType::Base(BaseType::Boolean) => VerificationType::Integer,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Ref(ref_type) => VerificationType::Object(ref_type),
        }
    }
}

impl<Cls, A> Width for VerificationType<Cls, A> {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

impl InferredType {
    /// Resolve the type into its serializable form
    ///
    /// Object types are interned into the constant pool and uninitialized types are replaced by
    /// the final offset of their `new` instruction.
    pub fn into_serializable(
        &self,
        constants: &mut ConstantsPool,
        layout: &Layout,
    ) -> Result<SerializedType, Error> {
        match self {
            VerificationType::Object(ref_type) => {
                Ok(VerificationType::Object(constants.get_ref_type(ref_type)?))
            }
            VerificationType::Uninitialized(label) => {
                let offset = layout.label_offset(*label)?;
                Ok(VerificationType::Uninitialized(BytecodeIndex(offset as u16)))
            }
            VerificationType::Top => Ok(VerificationType::Top),
            VerificationType::Integer => Ok(VerificationType::Integer),
            VerificationType::Float => Ok(VerificationType::Float),
            VerificationType::Long => Ok(VerificationType::Long),
            VerificationType::Double => Ok(VerificationType::Double),
            VerificationType::Null => Ok(VerificationType::Null),
            VerificationType::UninitializedThis => Ok(VerificationType::UninitializedThis),
        }
    }
}
