use super::{
    emit_method, inline_subroutines, Error, ErrorKind, ErrorLocation, ErrorRecord, MemberName,
    Policy, PolicyValidator, PreverificationError, PreverificationResults,
};
use crate::jvm;
use crate::jvm::class_file::{ClassFile, Code, ConstantValue, ConstantsPool, Method};
use crate::jvm::class_graph::TypeResolver;
use crate::jvm::code::MethodBody;
use crate::jvm::verifier::{analyze, MethodContext, TypeState};
use crate::jvm::{
    BinaryName, FieldAccessFlags, MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor,
    UnqualifiedName,
};
use std::io::Read;

/// Preverifies classes one at a time
///
/// Each class goes through these stages, stopping at the first one that fails:
///
///   1. parsing
///   2. policy validation (all violations are collected before stopping)
///   3. inlining of subroutines
///   4. type inference
///   5. emitting frames and re-encoding
///
/// A preverifier holds no state of its own besides its configuration, so it may be shared across
/// threads. The [`TypeResolver`] it uses caches class headers for the whole run; classes that go
/// through the preverifier get registered with it as well.
pub struct ClassPreverifier<'a> {
    policy: &'a Policy,
    resolver: &'a TypeResolver,
}

impl<'a> ClassPreverifier<'a> {
    pub fn new(policy: &'a Policy, resolver: &'a TypeResolver) -> ClassPreverifier<'a> {
        ClassPreverifier { policy, resolver }
    }

    pub fn policy(&self) -> &Policy {
        self.policy
    }

    /// Preverify one class file
    ///
    /// The result holds either the rewritten class file or the errors that prevented it, never
    /// both.
    pub fn preverify(&self, class_bytes: &[u8]) -> PreverificationResults {
        let mut class = match ClassFile::parse(class_bytes) {
            Ok(class) => class,
            Err(err) => return structural_failure(None, err),
        };
        let class_name = match class.this_class_name() {
            Ok(name) => name,
            Err(err) => return structural_failure(None, err),
        };
        match class.header() {
            Ok(header) => self.resolver.register(header),
            Err(err) => return structural_failure(Some(&class_name), err),
        }
        log::debug!("{}: parsed", class_name);

        let violations = match PolicyValidator::new(self.policy, self.resolver).validate(&class) {
            Ok(violations) => violations,
            Err(err) => return structural_failure(Some(&class_name), err),
        };
        if !violations.is_empty() {
            return PreverificationResults::failure(Some(class_name.to_string()), violations);
        }
        log::debug!("{}: validated", class_name);

        if let Err(err) = self.rewrite(&class_name, &mut class) {
            return PreverificationResults::failure(Some(class_name.to_string()), vec![err]);
        }

        match class.to_bytes() {
            Ok(bytes) => {
                log::debug!("{}: done ({} bytes)", class_name, bytes.len());
                PreverificationResults::success(class_name.to_string(), bytes)
            }
            Err(err) => structural_failure(Some(&class_name), err),
        }
    }

    /// Preverify a class read from a stream, failing if there are any errors
    pub fn preverify_stream<R: Read>(&self, mut reader: R) -> Result<Vec<u8>, PreverificationError> {
        let mut class_bytes = vec![];
        if let Err(err) = reader.read_to_end(&mut class_bytes) {
            return Err(PreverificationError(structural_failure(None, err.into())));
        }
        let results = self.preverify(&class_bytes);
        if results.is_error_result() {
            Err(PreverificationError(results))
        } else {
            results
                .into_outcome()
                .map_err(|errors| PreverificationError(PreverificationResults::failure(None, errors)))
        }
    }

    /// Strip what needs stripping and rewrite the code of every method
    fn rewrite(&self, class_name: &BinaryName, class: &mut ClassFile) -> Result<(), ErrorRecord> {
        let class_location = |err: Error| err.into_record(Some(class_name.as_str()), None);

        if self.policy.strip_instance_constant_values {
            for field in &mut class.fields {
                if field.access_flags.contains(FieldAccessFlags::STATIC) {
                    continue;
                }
                let mut kept = Vec::with_capacity(field.attributes.len());
                for attribute in field.attributes.drain(..) {
                    let name = attribute
                        .name(&class.constants)
                        .map_err(|err| class_location(err.into()))?;
                    if name != ConstantValue::NAME {
                        kept.push(attribute);
                    }
                }
                field.attributes = kept;
            }
        }

        for method in &mut class.methods {
            let member = MemberName::new(
                method
                    .name(&class.constants)
                    .map_err(|err| class_location(err.into()))?,
                method
                    .descriptor(&class.constants)
                    .map_err(|err| class_location(err.into()))?,
            );
            self.rewrite_method(class_name, &mut class.constants, method)
                .map_err(|err| err.into_record(Some(class_name.as_str()), Some(&member)))?;
        }
        Ok(())
    }

    fn rewrite_method(
        &self,
        class_name: &BinaryName,
        constants: &mut ConstantsPool,
        method: &mut Method,
    ) -> Result<(), Error> {
        let code_position = match method.code_position(constants)? {
            Some(position) => position,
            None => return Ok(()),
        };
        let code: Code = method.attributes[code_position].decode()?;
        let mut body = MethodBody::decode(&code, constants)?;

        let copies = inline_subroutines(&mut body, &self.policy.inlining_limits())?;
        if copies > 0 {
            log::debug!(
                "{}.{}: inlined {} subroutine calls",
                class_name,
                method.name(constants)?,
                copies
            );
        }
        body.label_allocations();

        let descriptor = MethodDescriptor::parse(method.descriptor(constants)?)?;
        let is_constructor = method.name(constants)? == UnqualifiedName::INIT.as_str();
        let entry = TypeState::method_entry(
            class_name,
            method.access_flags.contains(MethodAccessFlags::STATIC),
            is_constructor,
            &descriptor,
            body.max_locals as usize,
        );
        let context = MethodContext {
            constants,
            this_class: class_name,
            return_type: descriptor.return_type.clone(),
        };
        let analysis = analyze(&body, entry.clone(), &context, self.resolver)?;

        let code = emit_method(
            &mut body,
            &analysis,
            &entry,
            constants,
            self.policy.frame_format,
        )?;
        method.attributes[code_position] = constants.get_attribute(&code)?;
        Ok(())
    }
}

/// Preverify one class file with a throwaway [`ClassPreverifier`]
pub fn preverify(
    class_bytes: &[u8],
    policy: &Policy,
    resolver: &TypeResolver,
) -> PreverificationResults {
    ClassPreverifier::new(policy, resolver).preverify(class_bytes)
}

/// Like [`preverify`], but folds errors into a single [`PreverificationError`]
pub fn preverify_stream<R: Read>(
    reader: R,
    policy: &Policy,
    resolver: &TypeResolver,
) -> Result<Vec<u8>, PreverificationError> {
    ClassPreverifier::new(policy, resolver).preverify_stream(reader)
}

fn structural_failure(class_name: Option<&BinaryName>, err: jvm::Error) -> PreverificationResults {
    let location = match class_name {
        Some(class) => ErrorLocation::ClassDefinition {
            class: class.to_string(),
        },
        None => ErrorLocation::Unknown,
    };
    let record = ErrorRecord::new(ErrorKind::Structural, location).with_detail(err.to_string());
    PreverificationResults::failure(class_name.map(BinaryName::to_string), vec![record])
}
