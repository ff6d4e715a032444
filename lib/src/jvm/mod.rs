//! Read, analyze, and write JVM classes
//!
//! The pieces here know nothing about preverification policies: they model the class file format
//! ([`class_file`]), method bodies as label-addressed instruction streams ([`code`]), the class
//! hierarchy as seen through a class path ([`class_graph`]), and the type-state inference that
//! produces stack map frames ([`verifier`]).
//!
//! ### Round trip
//!
//! ```
//! use preverifier::jvm::class_file::{ClassFile, Serialize};
//! # fn round_trip(bytes: &[u8]) -> Result<(), preverifier::jvm::Error> {
//! let class = ClassFile::parse(bytes)?;
//! let mut written = vec![];
//! class.serialize(&mut written)?;
//! # Ok(())
//! # }
//! ```

mod access_flags;
mod binary_format;
pub mod class_file;
pub mod class_graph;
pub mod code;
mod descriptors;
mod errors;
mod names;
pub mod verifier;

pub use access_flags::*;
pub use binary_format::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
