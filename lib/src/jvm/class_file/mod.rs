//! In-memory form of the [`class` file format][0]
//!
//! Parsing checks the structure of the file (lengths, constant pool references, member and
//! attribute layouts) but does not decode method bodies: see [`crate::jvm::code`] for that.
//! Serializing a parsed class without modifications reproduces the original bytes.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html

mod attribute;
mod class;
mod constants;
mod field;
mod method;
mod version;

pub use crate::jvm::{Parse, Serialize};
pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use field::*;
pub use method::*;
pub use version::*;
