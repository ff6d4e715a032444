use std::fmt;

/// What went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NativeMethodUsed,
    FloatingPointUsed,
    FinalizerUsed,

    /// Type could not be found on the class path
    MissingType,

    /// Class file (or one of its method bodies) is malformed or cannot be rewritten
    Structural,

    /// Inferred types do not line up (should not happen for compiler output)
    Internal,
}

impl ErrorKind {
    /// Does this come from the policy validator (as opposed to aborting the class)?
    pub fn is_policy_error(self) -> bool {
        matches!(
            self,
            ErrorKind::NativeMethodUsed | ErrorKind::FloatingPointUsed | ErrorKind::FinalizerUsed
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::NativeMethodUsed => "Native code not allowed",
            ErrorKind::FloatingPointUsed => "Floating point not allowed",
            ErrorKind::FinalizerUsed => "Finalizers not allowed",
            ErrorKind::MissingType => "Missing class definition",
            ErrorKind::Structural => "Malformed class",
            ErrorKind::Internal => "Internal verification error",
        })
    }
}

/// Name and descriptor of a field, method, or local variable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberName {
    pub name: String,
    pub descriptor: String,
}

impl MemberName {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> MemberName {
        MemberName {
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Display for MemberName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.descriptor)
    }
}

/// Where an error was found
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorLocation {
    ClassDefinition {
        class: String,
    },
    ClassField {
        class: String,
        field: MemberName,
    },
    MethodSignature {
        class: String,
        method: MemberName,
    },

    /// Local variable of a method
    MethodField {
        class: String,
        method: MemberName,
        field: MemberName,
    },

    MethodInstruction {
        class: String,
        method: MemberName,

        /// Index of the instruction in the method (labels and line markers are not counted)
        instruction: usize,

        /// Last source line seen before the instruction
        line: Option<u16>,
    },

    Unknown,
}

impl ErrorLocation {
    /// Label of the location type
    pub fn label(&self) -> &'static str {
        match self {
            ErrorLocation::ClassDefinition { .. } => "Class declaration",
            ErrorLocation::ClassField { .. } => "Class field",
            ErrorLocation::MethodSignature { .. } => "Method definition",
            ErrorLocation::MethodField { .. } => "Method field",
            ErrorLocation::MethodInstruction { .. } => "Method instruction",
            ErrorLocation::Unknown => "Unknown location",
        }
    }

    pub fn class(&self) -> Option<&str> {
        match self {
            ErrorLocation::ClassDefinition { class }
            | ErrorLocation::ClassField { class, .. }
            | ErrorLocation::MethodSignature { class, .. }
            | ErrorLocation::MethodField { class, .. }
            | ErrorLocation::MethodInstruction { class, .. } => Some(class),
            ErrorLocation::Unknown => None,
        }
    }

    pub fn method(&self) -> Option<&MemberName> {
        match self {
            ErrorLocation::MethodSignature { method, .. }
            | ErrorLocation::MethodField { method, .. }
            | ErrorLocation::MethodInstruction { method, .. } => Some(method),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())?;
        match self {
            ErrorLocation::ClassDefinition { class } => write!(f, " {}", class),
            ErrorLocation::ClassField { class, field } => write!(f, " {}.{}", class, field),
            ErrorLocation::MethodSignature { class, method } => {
                write!(f, " {}.{}", class, method)
            }
            ErrorLocation::MethodField {
                class,
                method,
                field,
            } => write!(f, " {} in {}.{}", field, class, method),
            ErrorLocation::MethodInstruction {
                class,
                method,
                instruction,
                line,
            } => {
                write!(f, " {} in {}.{}", instruction, class, method)?;
                if let Some(line) = line {
                    write!(f, " (line {})", line)?;
                }
                Ok(())
            }
            ErrorLocation::Unknown => Ok(()),
        }
    }
}

/// One problem found while preverifying a class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub location: ErrorLocation,
    pub detail: Option<String>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, location: ErrorLocation) -> ErrorRecord {
        ErrorRecord {
            kind,
            location,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> ErrorRecord {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.kind)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// Outcome of preverifying one class: either rewritten bytes or errors, never both
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreverificationResults {
    class_name: Option<String>,
    outcome: Result<Vec<u8>, Vec<ErrorRecord>>,
}

impl PreverificationResults {
    pub fn success(class_name: String, bytes: Vec<u8>) -> PreverificationResults {
        PreverificationResults {
            class_name: Some(class_name),
            outcome: Ok(bytes),
        }
    }

    /// Failed results (`errors` should not be empty)
    pub fn failure(class_name: Option<String>, errors: Vec<ErrorRecord>) -> PreverificationResults {
        PreverificationResults {
            class_name,
            outcome: Err(errors),
        }
    }

    /// Name of the class, if it could be read at all
    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    pub fn is_error_result(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        match &self.outcome {
            Ok(_) => &[],
            Err(errors) => errors,
        }
    }

    pub fn preverified_bytes(&self) -> Option<&[u8]> {
        self.outcome.as_ref().ok().map(Vec::as_slice)
    }

    pub fn into_outcome(self) -> Result<Vec<u8>, Vec<ErrorRecord>> {
        self.outcome
    }
}

/// Results of a class that did not preverify, as an error
#[derive(Debug, Clone)]
pub struct PreverificationError(pub PreverificationResults);

impl PreverificationError {
    pub fn results(&self) -> &PreverificationResults {
        &self.0
    }
}

impl fmt::Display for PreverificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Some errors are in preverification")
    }
}

impl std::error::Error for PreverificationError {}
