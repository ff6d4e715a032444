//! Offline preverification of JVM class files
//!
//! Class files destined for memory-constrained runtimes (CLDC-style virtual machines) cannot
//! rely on a full bytecode verifier. This crate does the expensive part ahead of time: it checks
//! classes against a language-subset [`preverify::Policy`], inlines legacy `jsr`/`ret`
//! subroutines, infers the type state at every control-flow merge point, and attaches those states
//! to each method as stack map frames.
//!
//! The main entry points are [`preverify::ClassPreverifier`] (one class at a time) and
//! [`preverify::ArchivePreverifier`] (a sequence of archive entries).

pub mod jvm;
pub mod preverify;
pub mod util;
