use super::class_file::Constant;
use super::code::SynLabel;
use super::verifier::InferredType;
use crate::util::Offset;
use std::fmt;

/// Structural problems found while reading or writing class files
#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// Input ended in the middle of a structure
    UnexpectedEof,

    /// First four bytes are not `0xCAFEBABE`
    BadMagic(u32),

    /// Unrecognized tag byte in the constant pool
    BadConstantTag { index: u16, tag: u8 },

    /// Constant index is out of range, lands on the unusable half of a wide constant, or points
    /// at a constant of the wrong kind
    BadConstantIndex { index: u16, expected: &'static str },

    /// Bytes of a `CONSTANT_Utf8_info` are not valid modified UTF-8
    MalformedUtf8 { index: u16 },

    /// Field or method descriptor could not be parsed
    BadDescriptor(String),

    /// Class or member name is not legal
    BadName(String),

    ConstantPoolOverflow {
        constant: Constant,
        offset: u16,
    },

    /// Opcode is not part of the instruction set
    UnknownOpcode { opcode: u8, offset: usize },

    /// Operands of an instruction make no sense (eg. a `tableswitch` with `high < low`)
    MalformedInstruction { opcode: u8, offset: usize },

    /// Branch lands outside of the code array or in the middle of an instruction
    InvalidBranchTarget { offset: usize, target: i64 },

    /// Exception table or debug table range does not line up with instruction boundaries
    InvalidCodeRange { start: usize, end: usize },

    /// Attribute had more (or fewer) bytes than its structure accounts for
    AttributeLength(&'static str),

    /// Bytes left over after the end of the class file
    TrailingBytes(usize),

    /// Method `Code` attribute is missing or duplicated where exactly one is required
    MissingCode,

    MethodCodeOverflow(Offset),
    MethodCodeMaxStackOverflow(Offset),
    MethodCodeMaxLocalsOverflow(Offset),

    /// Conditional branch cannot reach its target with a 16-bit offset
    BranchOffsetOverflow(SynLabel),

    /// Label is referenced but never placed in the method body
    UnplacedLabel(SynLabel),

    /// Two places claim the same label (indicates a bug)
    DuplicateLabel(SynLabel),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEof
        } else {
            Error::IoError(err)
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::UnexpectedEof => f.write_str("unexpected end of class file"),
            Error::BadMagic(magic) => write!(f, "bad magic number {:#010x}", magic),
            Error::BadConstantTag { index, tag } => {
                write!(f, "unknown constant tag {} at index {}", tag, index)
            }
            Error::BadConstantIndex { index, expected } => {
                write!(f, "constant #{} is not a valid {}", index, expected)
            }
            Error::MalformedUtf8 { index } => write!(f, "constant #{} is not modified UTF-8", index),
            Error::BadDescriptor(msg) => write!(f, "bad descriptor: {}", msg),
            Error::BadName(msg) => write!(f, "bad name: {}", msg),
            Error::ConstantPoolOverflow { offset, .. } => {
                write!(f, "constant pool overflow at {}", offset)
            }
            Error::UnknownOpcode { opcode, offset } => {
                write!(f, "unknown opcode {:#04x} at offset {}", opcode, offset)
            }
            Error::MalformedInstruction { opcode, offset } => {
                write!(f, "malformed operands for opcode {:#04x} at offset {}", opcode, offset)
            }
            Error::InvalidBranchTarget { offset, target } => {
                write!(f, "branch at {} targets invalid offset {}", offset, target)
            }
            Error::InvalidCodeRange { start, end } => {
                write!(f, "invalid code range {}..{}", start, end)
            }
            Error::AttributeLength(name) => write!(f, "malformed {} attribute", name),
            Error::TrailingBytes(count) => write!(f, "{} bytes after end of class", count),
            Error::MissingCode => f.write_str("method has no usable Code attribute"),
            Error::MethodCodeOverflow(Offset(len)) => {
                write!(f, "method code is {} bytes long", len)
            }
            Error::MethodCodeMaxStackOverflow(Offset(len)) => {
                write!(f, "operand stack needs {} slots", len)
            }
            Error::MethodCodeMaxLocalsOverflow(Offset(len)) => {
                write!(f, "locals need {} slots", len)
            }
            Error::BranchOffsetOverflow(label) => {
                write!(f, "branch to {:?} does not fit in 16 bits", label)
            }
            Error::UnplacedLabel(label) => write!(f, "label {:?} is never placed", label),
            Error::DuplicateLabel(label) => write!(f, "label {:?} is placed twice", label),
        }
    }
}

impl std::error::Error for Error {}

/// Failure of the transfer function or of merging two type states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierErrorKind {
    EmptyStack,
    InvalidWidth(usize),
    InvalidIndex(u16),
    InvalidType {
        expected: &'static str,
        found: InferredType,
    },
    IncompatibleStackHeights(usize, usize),
    IncompatibleTypes(InferredType, InferredType),
    BadConstant(u16),

    /// `jsr` or `ret` in a method that should no longer have any
    Subroutine,

    /// Execution can run past the last instruction
    FallsOffEnd,

    /// `new` instruction without a label right before it
    UnlabelledAllocation,
}

impl fmt::Display for VerifierErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifierErrorKind::EmptyStack => f.write_str("operand stack underflow"),
            VerifierErrorKind::InvalidWidth(width) => {
                write!(f, "unexpected value of width {}", width)
            }
            VerifierErrorKind::InvalidIndex(idx) => write!(f, "invalid local variable {}", idx),
            VerifierErrorKind::InvalidType { expected, found } => {
                write!(f, "expected {} but found {:?}", expected, found)
            }
            VerifierErrorKind::IncompatibleStackHeights(h1, h2) => {
                write!(f, "cannot merge stacks of heights {} and {}", h1, h2)
            }
            VerifierErrorKind::IncompatibleTypes(t1, t2) => {
                write!(f, "cannot merge {:?} with {:?}", t1, t2)
            }
            VerifierErrorKind::BadConstant(idx) => write!(f, "constant #{} cannot be used here", idx),
            VerifierErrorKind::Subroutine => f.write_str("unexpected subroutine instruction"),
            VerifierErrorKind::FallsOffEnd => f.write_str("execution falls off the end of the code"),
            VerifierErrorKind::UnlabelledAllocation => {
                f.write_str("allocation site has no label")
            }
        }
    }
}
