//! Method bodies as label-addressed instruction streams
//!
//! ### Structure
//!
//! Despite being pushed off into [just another method attribute](crate::jvm::class_file::Code),
//! the bytecode is arguably the most important part of the class file - it contains the actual
//! executable instructions. We split up the [list of bytecode instructions][0] into two groups:
//!
//!   - [`Instruction`] for straight-line instructions
//!   - [`BranchInstruction`] for instructions that may transfer control elsewhere
//!
//! A [`MethodBody`] is a flat sequence of [`Node`]s: those instructions interleaved with
//! [`SynLabel`]s and source line markers. Branch targets, exception handlers, and local variable
//! debug ranges all refer to labels instead of offsets, so that the body can be freely rewritten.
//!
//! ### Round trip
//!
//! [`MethodBody::decode`] turns a `Code` attribute into a body, and [`MethodBody::layout`] +
//! [`MethodBody::encode`] turn it back. Layout is a separate step so that callers can find out
//! the final offsets of labels (eg. to build stack map frames) before the `Code` attribute is
//! assembled.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod body;
mod decode;
mod encode;
mod instructions;
mod label;

pub use body::*;
pub use decode::switch_padding;
pub use encode::*;
pub use instructions::*;
pub use label::*;
