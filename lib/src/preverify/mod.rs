//! Preverification pipeline
//!
//! Everything in [`crate::jvm`] is about reading, writing and reasoning about class files in
//! general. This module strings those pieces together into the preverifier proper: check a class
//! against a [`Policy`], get rid of `jsr`/`ret` subroutines, infer types, and write the class
//! back out with stack map frames attached.

mod archive;
mod emit;
mod errors;
mod policy;
mod preverifier;
mod results;
mod subroutines;
mod validate;

pub use archive::*;
pub use emit::*;
pub use errors::*;
pub use policy::*;
pub use preverifier::*;
pub use results::*;
pub use subroutines::*;
pub use validate::*;
