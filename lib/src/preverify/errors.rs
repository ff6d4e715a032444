use super::{ErrorKind, ErrorLocation, ErrorRecord, MemberName, SubroutineError};
use crate::jvm;
use crate::jvm::class_graph::ResolveError;
use crate::jvm::verifier::AnalysisError;
use crate::jvm::{BinaryName, VerifierErrorKind};
use std::fmt;

/// Failure that aborts preverification of a class
///
/// Unlike policy violations (which are collected into [`ErrorRecord`]s without stopping), these
/// stop processing of the class as soon as they happen.
#[derive(Debug)]
pub enum Error {
    /// Class file is malformed or cannot be written back
    Structural(jvm::Error),

    /// Subroutines in a method cannot be inlined
    Subroutine(SubroutineError),

    /// Types do not line up in a method body
    Verifier {
        instruction: usize,
        kind: VerifierErrorKind,
    },

    /// Class needed to merge types is not on the class path
    MissingClass(BinaryName),
}

impl Error {
    /// Turn the error into a record, given the class and method it happened in
    pub fn into_record(self, class: Option<&str>, method: Option<&MemberName>) -> ErrorRecord {
        let location = match (class, method) {
            (Some(class), Some(method)) => match &self {
                Error::Verifier { instruction, .. } => ErrorLocation::MethodInstruction {
                    class: class.to_owned(),
                    method: method.clone(),
                    instruction: *instruction,
                    line: None,
                },
                _ => ErrorLocation::MethodSignature {
                    class: class.to_owned(),
                    method: method.clone(),
                },
            },
            (Some(class), None) => ErrorLocation::ClassDefinition {
                class: class.to_owned(),
            },
            (None, _) => ErrorLocation::Unknown,
        };
        let kind = match &self {
            Error::Structural(_) | Error::Subroutine(_) => ErrorKind::Structural,
            Error::Verifier { .. } => ErrorKind::Internal,
            Error::MissingClass(_) => ErrorKind::MissingType,
        };
        ErrorRecord::new(kind, location).with_detail(self.to_string())
    }
}

impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        Error::Structural(err)
    }
}

impl From<SubroutineError> for Error {
    fn from(err: SubroutineError) -> Error {
        Error::Subroutine(err)
    }
}

impl From<ResolveError> for Error {
    fn from(err: ResolveError) -> Error {
        Error::MissingClass(err.class_name().clone())
    }
}

impl From<AnalysisError> for Error {
    fn from(err: AnalysisError) -> Error {
        match err {
            AnalysisError::Verifier { instruction, kind } => Error::Verifier { instruction, kind },
            AnalysisError::Resolve(err) => err.into(),
            AnalysisError::Structural(err) => Error::Structural(err),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Structural(err) => err.fmt(f),
            Error::Subroutine(err) => err.fmt(f),
            Error::Verifier { instruction, kind } => {
                write!(f, "at instruction {}: {}", instruction, kind)
            }
            Error::MissingClass(name) => name.fmt(f),
        }
    }
}

impl std::error::Error for Error {}
