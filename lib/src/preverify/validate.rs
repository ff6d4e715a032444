//! Checks that a class stays inside the language subset allowed by a [`Policy`]
//!
//! Validation never stops at the first problem: every field, method signature, local variable and
//! instruction is visited once and every violation becomes its own [`ErrorRecord`]. Only a class
//! file too malformed to walk at all aborts validation.

use super::{ErrorKind, ErrorLocation, ErrorRecord, MemberName, Policy};
use crate::jvm::class_file::{ClassFile, ClassConstantIndex, ConstantsPool, Method};
use crate::jvm::class_graph::{ResolveError, TypeResolver};
use crate::jvm::code::{BranchInstruction, Instruction, MethodBody, Node};
use crate::jvm::{
    BaseType, BinaryName, Error, FieldType, MethodAccessFlags, MethodDescriptor, Name,
    ParseDescriptor, RefType, UnqualifiedName,
};
use std::collections::HashMap;

/// Why a type is not allowed, with the name of the offending class
#[derive(Debug, Clone, PartialEq, Eq)]
struct TypeViolation {
    kind: ErrorKind,
    class: BinaryName,
}

/// Validates the classes of one run against a policy
///
/// Results of hierarchy checks are remembered, so a validator should not outlive the class path
/// it was created with.
pub struct PolicyValidator<'a> {
    policy: &'a Policy,
    resolver: &'a TypeResolver,
    checked_classes: HashMap<BinaryName, Option<TypeViolation>>,
}

impl<'a> PolicyValidator<'a> {
    pub fn new(policy: &'a Policy, resolver: &'a TypeResolver) -> PolicyValidator<'a> {
        PolicyValidator {
            policy,
            resolver,
            checked_classes: HashMap::new(),
        }
    }

    /// Collect all policy violations in a class
    ///
    /// The class is not modified. An `Err` means the class is malformed and says nothing about
    /// policy violations.
    pub fn validate(&mut self, class: &ClassFile) -> Result<Vec<ErrorRecord>, Error> {
        let class_name = class.this_class_name()?;
        let mut errors = vec![];

        for field in &class.fields {
            let name = field.name(&class.constants)?;
            let descriptor = field.descriptor(&class.constants)?;
            let field_type = FieldType::parse(descriptor)?;
            if let Some(violation) = self.check_field_type(&field_type) {
                let location = ErrorLocation::ClassField {
                    class: class_name.to_string(),
                    field: MemberName::new(name, descriptor),
                };
                errors.push(violation.into_record(location));
            }
        }

        for method in &class.methods {
            self.validate_method(&class_name, &class.constants, method, &mut errors)?;
        }

        if !errors.is_empty() {
            log::debug!("{} has {} policy violations", class_name, errors.len());
        }
        Ok(errors)
    }

    fn validate_method(
        &mut self,
        class_name: &BinaryName,
        constants: &ConstantsPool,
        method: &Method,
        errors: &mut Vec<ErrorRecord>,
    ) -> Result<(), Error> {
        let name = method.name(constants)?;
        let descriptor = method.descriptor(constants)?;
        let parsed = MethodDescriptor::<BinaryName>::parse(descriptor)?;
        let member = MemberName::new(name, descriptor);
        let signature_location = || ErrorLocation::MethodSignature {
            class: class_name.to_string(),
            method: member.clone(),
        };

        if !self.policy.native_methods_allowed
            && method.access_flags.contains(MethodAccessFlags::NATIVE)
        {
            errors.push(ErrorRecord::new(
                ErrorKind::NativeMethodUsed,
                signature_location(),
            ));
        }
        if !self.policy.finalizers_allowed
            && name == UnqualifiedName::FINALIZE.as_str()
            && parsed.parameters.is_empty()
        {
            errors.push(ErrorRecord::new(ErrorKind::FinalizerUsed, signature_location()));
        }

        // At most one error for the whole signature
        let signature_violation = parsed
            .return_type
            .iter()
            .chain(&parsed.parameters)
            .find_map(|field_type| self.check_field_type(field_type));
        if let Some(violation) = signature_violation {
            errors.push(violation.into_record(signature_location()));
        }

        let code = match method.code(constants)? {
            Some(code) => code,
            None => return Ok(()),
        };
        let body = MethodBody::decode(&code, constants)?;

        for range in &body.local_variables {
            let variable_name = constants.utf8(range.name_index)?;
            let variable_descriptor = constants.utf8(range.descriptor_index)?;
            let field_type = FieldType::parse(variable_descriptor)?;
            if let Some(violation) = self.check_field_type(&field_type) {
                let location = ErrorLocation::MethodField {
                    class: class_name.to_string(),
                    method: member.clone(),
                    field: MemberName::new(variable_name, variable_descriptor),
                };
                errors.push(violation.into_record(location));
            }
        }

        let mut instruction = 0;
        let mut line = None;
        for node in &body.nodes {
            let violation = match node {
                Node::Label(_) => continue,
                Node::Line(number) => {
                    line = Some(*number);
                    continue;
                }
                Node::Insn(insn) => self.check_instruction(insn, constants)?,
                Node::Branch(branch) => self.check_branch(branch),
            };
            if let Some(violation) = violation {
                let location = ErrorLocation::MethodInstruction {
                    class: class_name.to_string(),
                    method: member.clone(),
                    instruction,
                    line,
                };
                errors.push(violation.into_record(location));
            }
            instruction += 1;
        }

        Ok(())
    }

    fn check_instruction(
        &mut self,
        insn: &Instruction,
        constants: &ConstantsPool,
    ) -> Result<Option<TypeViolation>, Error> {
        let floating_point = match insn {
            Instruction::NewArray(base) => base.is_floating_point(),
            Instruction::ANewArray(class) | Instruction::MultiANewArray(class, _) => {
                return self.check_class_constant(*class, constants);
            }
            other => is_floating_point_instruction(other),
        };
        Ok(self.floating_point_violation(floating_point))
    }

    fn check_branch<L>(&self, branch: &BranchInstruction<L>) -> Option<TypeViolation> {
        let floating_point = matches!(
            branch,
            BranchInstruction::FReturn | BranchInstruction::DReturn
        );
        self.floating_point_violation(floating_point)
    }

    fn floating_point_violation(&self, floating_point: bool) -> Option<TypeViolation> {
        if floating_point && !self.policy.floating_point_allowed {
            Some(TypeViolation {
                kind: ErrorKind::FloatingPointUsed,
                class: BinaryName::FLOAT,
            })
        } else {
            None
        }
    }

    fn check_class_constant(
        &mut self,
        class: ClassConstantIndex,
        constants: &ConstantsPool,
    ) -> Result<Option<TypeViolation>, Error> {
        let ref_type = constants.class_ref_type(class)?;
        Ok(self.check_field_type(&FieldType::Ref(ref_type)))
    }

    /// Check a type (or the element type of an array type)
    fn check_field_type(&mut self, field_type: &FieldType<BinaryName>) -> Option<TypeViolation> {
        match field_type.innermost() {
            FieldType::Base(BaseType::Float) => self.check_class(&BinaryName::FLOAT),
            FieldType::Base(BaseType::Double) => self.check_class(&BinaryName::DOUBLE),
            FieldType::Base(_) => None,
            FieldType::Ref(RefType::Object(class)) => self.check_class(&class),
            FieldType::Ref(_) => None,
        }
    }

    /// Walk up from a class until reaching the root or a floating point wrapper
    fn check_class(&mut self, class: &BinaryName) -> Option<TypeViolation> {
        if let Some(checked) = self.checked_classes.get(class) {
            return checked.clone();
        }

        let is_wrapper =
            |name: &BinaryName| name == &BinaryName::FLOAT || name == &BinaryName::DOUBLE;
        let violation = if is_wrapper(class) {
            self.floating_point_violation(true)
        } else if class == &BinaryName::OBJECT {
            None
        } else {
            match self.resolver.ancestor_chain(class) {
                Ok(chain) => chain
                    .iter()
                    .find(|ancestor| is_wrapper(ancestor))
                    .and_then(|_| self.floating_point_violation(true))
                    .map(|violation| TypeViolation {
                        class: class.clone(),
                        ..violation
                    }),
                Err(ResolveError::NotFound(missing) | ResolveError::Circular(missing)) => {
                    Some(TypeViolation {
                        kind: ErrorKind::MissingType,
                        class: missing,
                    })
                }
            }
        };

        self.checked_classes.insert(class.clone(), violation.clone());
        violation
    }
}

impl TypeViolation {
    fn into_record(self, location: ErrorLocation) -> ErrorRecord {
        let record = ErrorRecord::new(self.kind, location);
        match self.kind {
            ErrorKind::MissingType => record.with_detail(self.class.to_string()),
            _ => record,
        }
    }
}

/// Does the instruction operate on `float` or `double` values?
///
/// Field accesses and method calls are not included: their types are checked where the field or
/// method is declared.
pub fn is_floating_point_instruction(insn: &Instruction) -> bool {
    use Instruction::*;
    matches!(
        insn,
        FConst0
            | FConst1
            | FConst2
            | DConst0
            | DConst1
            | FLoad(_)
            | DLoad(_)
            | FStore(_)
            | DStore(_)
            | FALoad
            | DALoad
            | FAStore
            | DAStore
            | FAdd
            | DAdd
            | FSub
            | DSub
            | FMul
            | DMul
            | FDiv
            | DDiv
            | FRem
            | DRem
            | FNeg
            | DNeg
            | I2F
            | I2D
            | L2F
            | L2D
            | F2I
            | F2L
            | F2D
            | D2I
            | D2L
            | D2F
            | FCmp(_)
            | DCmp(_)
    )
}
