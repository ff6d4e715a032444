use super::{Frame, InferredType, VerificationType};
use crate::jvm::class_file::{
    ClassConstantIndex, Constant, ConstantIndex, ConstantsPool, FieldRefConstantIndex,
};
use crate::jvm::code::{BranchInstruction, Instruction, InvokeType, SynLabel};
use crate::jvm::{
    BinaryName, FieldType, MethodDescriptor, Name, ParseDescriptor, RefType, UnqualifiedName,
    VerifierErrorKind,
};
use crate::util::{OffsetVec, Width};

/// What the transfer function needs to know about the method being analyzed
pub struct MethodContext<'a> {
    pub constants: &'a ConstantsPool,

    /// Class declaring the method
    pub this_class: &'a BinaryName,

    /// Declared return type (`None` for `void`)
    pub return_type: Option<FieldType<BinaryName>>,
}

/// Types of the locals and operand stack right before an instruction executes
///
/// Unlike serialized frames, locals are tracked per slot: a `long` or `double` in slot `n` is
/// followed by a `Top` in slot `n + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeState {
    pub locals: Vec<InferredType>,
    pub stack: OffsetVec<InferredType>,
}

impl TypeState {
    /// State on entry to a method
    ///
    /// `this` is uninitialized in constructors of every class except `java/lang/Object`. Locals
    /// beyond the parameters start out as `Top`.
    pub fn method_entry(
        this_class: &BinaryName,
        is_static: bool,
        is_constructor: bool,
        descriptor: &MethodDescriptor<BinaryName>,
        max_locals: usize,
    ) -> TypeState {
        let mut locals = vec![];
        if !is_static {
            if is_constructor && this_class != &BinaryName::OBJECT {
                locals.push(VerificationType::UninitializedThis);
            } else {
                locals.push(VerificationType::Object(RefType::Object(this_class.clone())));
            }
        }
        for parameter in &descriptor.parameters {
            let typ = InferredType::from(parameter.clone());
            let is_wide = typ.width() == 2;
            locals.push(typ);
            if is_wide {
                locals.push(VerificationType::Top);
            }
        }
        if locals.len() < max_locals {
            locals.resize(max_locals, VerificationType::Top);
        }

        TypeState {
            locals,
            stack: OffsetVec::new(),
        }
    }

    /// State at the start of an exception handler covering an instruction with this state
    pub fn handler_entry(&self, caught: InferredType) -> TypeState {
        let mut stack = OffsetVec::new();
        stack.push(caught);
        TypeState {
            locals: self.locals.clone(),
            stack,
        }
    }

    /// Canonical frame for this state
    ///
    /// Wide locals become a single entry and trailing `Top` locals are dropped.
    pub fn to_frame(&self) -> Frame<RefType<BinaryName>, SynLabel> {
        let mut locals = OffsetVec::new();
        let mut slot = 0;
        while let Some(typ) = self.locals.get(slot) {
            locals.push(typ.clone());
            slot += typ.width();
        }
        while let Some(VerificationType::Top) = locals.last() {
            locals.pop();
        }

        Frame {
            locals,
            stack: self.stack.clone(),
        }
    }

    /// Update the state to reflect the effects of the given (non-branching) instruction
    ///
    /// `allocation` is the label right before the instruction, which is only needed for `new`.
    pub fn execute(
        &mut self,
        insn: &Instruction,
        allocation: Option<SynLabel>,
        context: &MethodContext,
    ) -> Result<(), VerifierErrorKind> {
        execute_instruction(self, insn, allocation, context)
    }

    /// Update the state to reflect the effects of the given branching instruction
    pub fn execute_branch(
        &mut self,
        insn: &BranchInstruction<SynLabel>,
        context: &MethodContext,
    ) -> Result<(), VerifierErrorKind> {
        execute_branch_instruction(self, insn, context)
    }
}

fn execute_instruction(
    state: &mut TypeState,
    insn: &Instruction,
    allocation: Option<SynLabel>,
    context: &MethodContext,
) -> Result<(), VerifierErrorKind> {
    use Instruction::*;
    use VerificationType::*;

    let TypeState { stack, locals } = state;
    let constants = context.constants;

    match insn {
        Nop => (),
        AConstNull => {
            stack.push(Null);
        }
        IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 => {
            stack.push(Integer);
        }
        LConst0 | LConst1 => {
            stack.push(Long);
        }
        FConst0 | FConst1 | FConst2 => {
            stack.push(Float);
        }
        DConst0 | DConst1 => {
            stack.push(Double);
        }
        BiPush(_) | SiPush(_) => {
            stack.push(Integer);
        }
        Ldc(index) => {
            let typ = constant_type(constants, *index)?;
            if typ.width() != 1 {
                return Err(VerifierErrorKind::InvalidWidth(typ.width()));
            }
            stack.push(typ);
        }
        Ldc2(index) => {
            let typ = constant_type(constants, *index)?;
            if typ.width() != 2 {
                return Err(VerifierErrorKind::InvalidWidth(typ.width()));
            }
            stack.push(typ);
        }

        ILoad(index) => {
            get_local_expecting_type(locals, *index, Integer)?;
            stack.push(Integer);
        }
        LLoad(index) => {
            get_local_expecting_type(locals, *index, Long)?;
            stack.push(Long);
        }
        FLoad(index) => {
            get_local_expecting_type(locals, *index, Float)?;
            stack.push(Float);
        }
        DLoad(index) => {
            get_local_expecting_type(locals, *index, Double)?;
            stack.push(Double);
        }
        ALoad(index) => {
            let typ = get_local(locals, *index)?;
            if !typ.is_reference() {
                return Err(invalid_type("reference", typ));
            }
            stack.push(typ);
        }

        IALoad | BALoad | CALoad | SALoad => {
            pop_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
            stack.push(Integer);
        }
        LALoad => {
            pop_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
            stack.push(Long);
        }
        FALoad => {
            pop_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
            stack.push(Float);
        }
        DALoad => {
            pop_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
            stack.push(Double);
        }
        AALoad => {
            pop_expecting_type(stack, Integer)?;
            let array_type = pop(stack)?;
            let element_type = match &array_type {
                Null => Null,
                Object(ref_type) => match ref_type.array_element() {
                    Some(FieldType::Ref(element)) => Object(element),
                    _ => return Err(invalid_type("array of references", array_type)),
                },
                _ => return Err(invalid_type("array of references", array_type)),
            };
            stack.push(element_type);
        }

        IStore(index) => {
            pop_expecting_type(stack, Integer)?;
            set_local(locals, *index, Integer);
        }
        LStore(index) => {
            pop_expecting_type(stack, Long)?;
            set_local(locals, *index, Long);
        }
        FStore(index) => {
            pop_expecting_type(stack, Float)?;
            set_local(locals, *index, Float);
        }
        DStore(index) => {
            pop_expecting_type(stack, Double)?;
            set_local(locals, *index, Double);
        }
        AStore(index) => {
            let typ = pop_reference(stack)?;
            set_local(locals, *index, typ);
        }

        IAStore | BAStore | CAStore | SAStore => {
            pop_expecting_type(stack, Integer)?;
            pop_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
        }
        LAStore => {
            pop_expecting_type(stack, Long)?;
            pop_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
        }
        FAStore => {
            pop_expecting_type(stack, Float)?;
            pop_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
        }
        DAStore => {
            pop_expecting_type(stack, Double)?;
            pop_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
        }
        AAStore => {
            pop_reference(stack)?;
            pop_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
        }

        Pop => {
            let _ = pop_expecting_width(stack, 1)?;
        }

        Pop2 => {
            let arg1 = pop(stack)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let _ = pop_expecting_width(stack, 1)?;
                }

                // Form 2
                _ => (),
            }
        }

        Dup => {
            let arg1 = pop_expecting_width(stack, 1)?;
            stack.push(arg1.clone());
            stack.push(arg1);
        }

        DupX1 => {
            let arg1 = pop_expecting_width(stack, 1)?;
            let arg2 = pop_expecting_width(stack, 1)?;
            stack.push(arg1.clone());
            stack.push(arg2);
            stack.push(arg1);
        }

        DupX2 => {
            let arg1 = pop_expecting_width(stack, 1)?;
            let arg2 = pop(stack)?;
            match arg2.width() {
                // Form 1
                1 => {
                    let arg3 = pop_expecting_width(stack, 1)?;
                    stack.push(arg1.clone());
                    stack.push(arg3);
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                _ => {
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }
            }
        }

        Dup2 => {
            let arg1 = pop(stack)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg2 = pop_expecting_width(stack, 1)?;
                    stack.push(arg2.clone());
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                _ => {
                    stack.push(arg1.clone());
                    stack.push(arg1);
                }
            }
        }

        Dup2X1 => {
            let arg1 = pop(stack)?;
            let arg2 = pop_expecting_width(stack, 1)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg3 = pop_expecting_width(stack, 1)?;
                    stack.push(arg2.clone());
                    stack.push(arg1.clone());
                    stack.push(arg3);
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                _ => {
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }
            }
        }

        Dup2X2 => {
            let arg1 = pop(stack)?;
            let arg2 = pop(stack)?;
            match (arg1.width(), arg2.width()) {
                (1, 1) => {
                    let arg3 = pop(stack)?;
                    if arg3.width() == 1 {
                        // Form 1
                        let arg4 = pop_expecting_width(stack, 1)?;
                        stack.push(arg2.clone());
                        stack.push(arg1.clone());
                        stack.push(arg4);
                    } else {
                        // Form 3
                        stack.push(arg2.clone());
                        stack.push(arg1.clone());
                    }
                    stack.push(arg3);
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                (2, 1) => {
                    let arg3 = pop_expecting_width(stack, 1)?;
                    stack.push(arg1.clone());
                    stack.push(arg3);
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 4
                (2, 2) => {
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }

                (_, other) => return Err(VerifierErrorKind::InvalidWidth(other)),
            }
        }

        Swap => {
            let arg1 = pop_expecting_width(stack, 1)?;
            let arg2 = pop_expecting_width(stack, 1)?;
            stack.push(arg1);
            stack.push(arg2);
        }

        IAdd | ISub | IDiv | IMul | IRem | IAnd | IOr | IXor | ISh(_) => {
            pop_expecting_type(stack, Integer)?;
            pop_expecting_type(stack, Integer)?;
            stack.push(Integer);
        }

        LAdd | LSub | LDiv | LMul | LRem | LAnd | LOr | LXor => {
            pop_expecting_type(stack, Long)?;
            pop_expecting_type(stack, Long)?;
            stack.push(Long);
        }

        FAdd | FSub | FDiv | FMul | FRem => {
            pop_expecting_type(stack, Float)?;
            pop_expecting_type(stack, Float)?;
            stack.push(Float);
        }

        DAdd | DSub | DDiv | DMul | DRem => {
            pop_expecting_type(stack, Double)?;
            pop_expecting_type(stack, Double)?;
            stack.push(Double);
        }

        INeg | I2B | I2C | I2S => {
            pop_expecting_type(stack, Integer)?;
            stack.push(Integer);
        }

        LNeg => {
            pop_expecting_type(stack, Long)?;
            stack.push(Long);
        }

        FNeg => {
            pop_expecting_type(stack, Float)?;
            stack.push(Float);
        }

        DNeg => {
            pop_expecting_type(stack, Double)?;
            stack.push(Double);
        }

        LSh(_) => {
            pop_expecting_type(stack, Integer)?;
            pop_expecting_type(stack, Long)?;
            stack.push(Long);
        }

        IInc(index, _) => {
            get_local_expecting_type(locals, *index, Integer)?;
        }

        I2L | F2L | D2L => {
            pop_expecting_type(stack, conversion_source(insn))?;
            stack.push(Long);
        }
        I2F | L2F | D2F => {
            pop_expecting_type(stack, conversion_source(insn))?;
            stack.push(Float);
        }
        I2D | L2D | F2D => {
            pop_expecting_type(stack, conversion_source(insn))?;
            stack.push(Double);
        }
        L2I | F2I | D2I => {
            pop_expecting_type(stack, conversion_source(insn))?;
            stack.push(Integer);
        }

        LCmp => {
            pop_expecting_type(stack, Long)?;
            pop_expecting_type(stack, Long)?;
            stack.push(Integer);
        }
        FCmp(_) => {
            pop_expecting_type(stack, Float)?;
            pop_expecting_type(stack, Float)?;
            stack.push(Integer);
        }
        DCmp(_) => {
            pop_expecting_type(stack, Double)?;
            pop_expecting_type(stack, Double)?;
            stack.push(Integer);
        }

        GetStatic(index) => {
            let field_type = field_type(constants, *index)?;
            stack.push(field_type);
        }
        PutStatic(index) => {
            let field_type = field_type(constants, *index)?;
            pop_compatible(stack, &field_type)?;
        }
        GetField(index) => {
            let field_type = field_type(constants, *index)?;
            pop_reference(stack)?;
            stack.push(field_type);
        }
        PutField(index) => {
            let field_type = field_type(constants, *index)?;
            pop_compatible(stack, &field_type)?;

            // Constructors may set fields on `this` before calling the super constructor
            let object_type = pop(stack)?;
            if !object_type.is_reference() {
                return Err(invalid_type("reference", object_type));
            }
        }

        Invoke(invoke_type, index) => {
            let bad_constant = |_| VerifierErrorKind::BadConstant((index.0).0);
            let method = constants.method_ref(*index).map_err(bad_constant)?;
            let descriptor =
                MethodDescriptor::<BinaryName>::parse(method.descriptor).map_err(bad_constant)?;

            // Check that all the arguments match
            for parameter in descriptor.parameters.iter().rev() {
                pop_compatible(stack, &InferredType::from(parameter.clone()))?;
            }

            let is_init = method.name == UnqualifiedName::INIT.as_str();
            if let (InvokeType::Special, true) = (invoke_type, is_init) {
                // Initialize
                let receiver = pop(stack)?;
                let initialized = match receiver {
                    UninitializedThis => Object(RefType::Object(context.this_class.clone())),
                    Uninitialized(_) => {
                        Object(constants.class_ref_type(method.class).map_err(bad_constant)?)
                    }
                    other => return Err(invalid_type("uninitialized object", other)),
                };
                replace_all(stack, locals, &receiver, &initialized);
            } else {
                // Pop off the receiver type
                if !matches!(invoke_type, InvokeType::Static) {
                    let receiver = pop(stack)?;
                    if !matches!(receiver, Null | Object(_)) {
                        return Err(invalid_type("initialized reference", receiver));
                    }
                }

                // Push the return type
                if let Some(return_type) = descriptor.return_type {
                    stack.push(InferredType::from(return_type));
                }
            }
        }

        InvokeDynamic(index) => {
            let bad_constant = |_| VerifierErrorKind::BadConstant((index.0).0);
            let descriptor = constants
                .invoke_dynamic_descriptor(*index)
                .and_then(MethodDescriptor::<BinaryName>::parse)
                .map_err(bad_constant)?;

            for parameter in descriptor.parameters.iter().rev() {
                pop_compatible(stack, &InferredType::from(parameter.clone()))?;
            }
            if let Some(return_type) = descriptor.return_type {
                stack.push(InferredType::from(return_type));
            }
        }

        New(_) => {
            let site = allocation.ok_or(VerifierErrorKind::UnlabelledAllocation)?;
            stack.push(Uninitialized(site));
        }
        NewArray(base_type) => {
            pop_expecting_type(stack, Integer)?;
            stack.push(Object(RefType::array(FieldType::Base(*base_type))));
        }
        ANewArray(index) => {
            pop_expecting_type(stack, Integer)?;
            let element_type = class_type(constants, *index)?;
            stack.push(Object(RefType::array(FieldType::Ref(element_type))));
        }
        MultiANewArray(index, dimensions) => {
            for _ in 0..*dimensions {
                pop_expecting_type(stack, Integer)?;
            }
            stack.push(Object(class_type(constants, *index)?));
        }
        ArrayLength => {
            pop_reference(stack)?;
            stack.push(Integer);
        }

        CheckCast(index) => {
            pop_reference(stack)?;
            stack.push(Object(class_type(constants, *index)?));
        }
        InstanceOf(_) => {
            pop_reference(stack)?;
            stack.push(Integer);
        }

        MonitorEnter | MonitorExit => {
            pop_reference(stack)?;
        }
    }

    Ok(())
}

fn execute_branch_instruction(
    state: &mut TypeState,
    insn: &BranchInstruction<SynLabel>,
    context: &MethodContext,
) -> Result<(), VerifierErrorKind> {
    use BranchInstruction::*;
    use VerificationType::*;

    let stack = &mut state.stack;
    let return_type = context.return_type.clone().map(InferredType::from);

    match insn {
        If(_, _) => pop_expecting_type(stack, Integer)?,
        IfICmp(_, _) => {
            pop_expecting_type(stack, Integer)?;
            pop_expecting_type(stack, Integer)?;
        }
        IfACmp(_, _) => {
            pop_reference(stack)?;
            pop_reference(stack)?;
        }
        IfNull(_, _) => {
            pop_reference(stack)?;
        }
        Goto(_) => (),
        TableSwitch { .. } | LookupSwitch { .. } => pop_expecting_type(stack, Integer)?,
        IReturn | LReturn | FReturn | DReturn => {
            let expected = match insn {
                IReturn => Integer,
                LReturn => Long,
                FReturn => Float,
                _ => Double,
            };
            let found = pop(stack)?;
            if found != expected || return_type.as_ref() != Some(&expected) {
                return Err(invalid_type("method return type", found));
            }
        }
        AReturn => {
            let found = pop_reference(stack)?;
            if !matches!(return_type, Some(Object(_))) {
                return Err(invalid_type("method return type", found));
            }
        }
        Return => {
            if let Some(expected) = return_type {
                return Err(invalid_type("void", expected));
            }
        }
        AThrow => {
            pop_reference(stack)?;
        }
        Jsr(_) | Ret(_) => return Err(VerifierErrorKind::Subroutine),
    }

    Ok(())
}

/// Type pushed by `ldc`, `ldc_w`, or `ldc2_w`
fn constant_type(
    constants: &ConstantsPool,
    index: ConstantIndex,
) -> Result<InferredType, VerifierErrorKind> {
    let bad_constant = |_| VerifierErrorKind::BadConstant(index.0);
    let object = |name: BinaryName| VerificationType::Object(RefType::Object(name));
    Ok(match constants.get(index, "loadable constant").map_err(bad_constant)? {
        Constant::Integer(_) => VerificationType::Integer,
        Constant::Float(_) => VerificationType::Float,
        Constant::Long(_) => VerificationType::Long,
        Constant::Double(_) => VerificationType::Double,
        Constant::String(_) => object(BinaryName::STRING),
        Constant::Class(_) => object(BinaryName::CLASS),
        Constant::MethodHandle { .. } => object(BinaryName::METHODHANDLE),
        Constant::MethodType { .. } => object(BinaryName::METHODTYPE),
        Constant::Dynamic { name_and_type, .. } => {
            let (_, descriptor) = constants
                .name_and_type(*name_and_type)
                .map_err(bad_constant)?;
            InferredType::from(FieldType::parse(descriptor).map_err(bad_constant)?)
        }
        _ => return Err(VerifierErrorKind::BadConstant(index.0)),
    })
}

fn field_type(
    constants: &ConstantsPool,
    index: FieldRefConstantIndex,
) -> Result<InferredType, VerifierErrorKind> {
    let bad_constant = |_| VerifierErrorKind::BadConstant((index.0).0);
    let field = constants.field_ref(index).map_err(bad_constant)?;
    let field_type = FieldType::<BinaryName>::parse(field.descriptor).map_err(bad_constant)?;
    Ok(InferredType::from(field_type))
}

fn class_type(
    constants: &ConstantsPool,
    index: ClassConstantIndex,
) -> Result<RefType<BinaryName>, VerifierErrorKind> {
    constants
        .class_ref_type(index)
        .map_err(|_| VerifierErrorKind::BadConstant((index.0).0))
}

/// Operand type of a primitive conversion
fn conversion_source(insn: &Instruction) -> InferredType {
    match insn {
        Instruction::L2I | Instruction::L2F | Instruction::L2D => VerificationType::Long,
        Instruction::F2I | Instruction::F2L | Instruction::F2D => VerificationType::Float,
        Instruction::D2I | Instruction::D2L | Instruction::D2F => VerificationType::Double,
        _ => VerificationType::Integer,
    }
}

/// Human readable category of a type, for errors
fn type_name(typ: &InferredType) -> &'static str {
    match typ {
        VerificationType::Top => "top",
        VerificationType::Integer => "int",
        VerificationType::Float => "float",
        VerificationType::Long => "long",
        VerificationType::Double => "double",
        VerificationType::Null | VerificationType::Object(_) => "reference",
        VerificationType::UninitializedThis | VerificationType::Uninitialized(_) => {
            "uninitialized object"
        }
    }
}

fn invalid_type(expected: &'static str, found: InferredType) -> VerifierErrorKind {
    VerifierErrorKind::InvalidType { expected, found }
}

/// Replace an uninitialized type everywhere, once its constructor has been called
fn replace_all(
    stack: &mut OffsetVec<InferredType>,
    locals: &mut [InferredType],
    original: &InferredType,
    updated: &InferredType,
) {
    stack.map_in_place(|typ| {
        if typ == original {
            Some(updated.clone())
        } else {
            None
        }
    });
    for local in locals.iter_mut() {
        if local == original {
            *local = updated.clone();
        }
    }
}

fn get_local(locals: &[InferredType], index: u16) -> Result<InferredType, VerifierErrorKind> {
    match locals.get(index as usize) {
        Some(VerificationType::Top) | None => Err(VerifierErrorKind::InvalidIndex(index)),
        Some(typ) => Ok(typ.clone()),
    }
}

fn get_local_expecting_type(
    locals: &[InferredType],
    index: u16,
    expected_type: InferredType,
) -> Result<(), VerifierErrorKind> {
    let found = get_local(locals, index)?;
    if found == expected_type {
        Ok(())
    } else {
        Err(invalid_type(type_name(&expected_type), found))
    }
}

/// Write a local, invalidating any wide local that gets partially overwritten
fn set_local(locals: &mut Vec<InferredType>, index: u16, new_type: InferredType) {
    let index = index as usize;
    let end = index + new_type.width();
    if locals.len() < end {
        locals.resize(end, VerificationType::Top);
    }
    if index > 0 && locals[index - 1].width() == 2 {
        locals[index - 1] = VerificationType::Top;
    }
    if new_type.width() == 2 {
        locals[index + 1] = VerificationType::Top;
    }
    locals[index] = new_type;
}

fn pop(stack: &mut OffsetVec<InferredType>) -> Result<InferredType, VerifierErrorKind> {
    stack
        .pop()
        .map(|(_, _, typ)| typ)
        .ok_or(VerifierErrorKind::EmptyStack)
}

fn pop_expecting_width(
    stack: &mut OffsetVec<InferredType>,
    expected_width: usize,
) -> Result<InferredType, VerifierErrorKind> {
    let typ = pop(stack)?;
    let found_width = typ.width();
    if found_width == expected_width {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::InvalidWidth(found_width))
    }
}

fn pop_expecting_type(
    stack: &mut OffsetVec<InferredType>,
    expected_type: InferredType,
) -> Result<(), VerifierErrorKind> {
    let typ = pop(stack)?;
    if typ == expected_type {
        Ok(())
    } else {
        Err(invalid_type(type_name(&expected_type), typ))
    }
}

fn pop_reference(stack: &mut OffsetVec<InferredType>) -> Result<InferredType, VerifierErrorKind> {
    let typ = pop(stack)?;
    if typ.is_reference() {
        Ok(typ)
    } else {
        Err(invalid_type("reference", typ))
    }
}

/// Pop a value that is going to be used as the given (field, argument) type
///
/// Subtyping between reference types is not checked: the input is compiler output.
fn pop_compatible(
    stack: &mut OffsetVec<InferredType>,
    expected_type: &InferredType,
) -> Result<(), VerifierErrorKind> {
    let typ = pop(stack)?;
    let compatible = match expected_type {
        VerificationType::Object(_) => matches!(typ, VerificationType::Null | VerificationType::Object(_)),
        other => &typ == other,
    };
    if compatible {
        Ok(())
    } else {
        Err(invalid_type(type_name(expected_type), typ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::BaseType;
    use Instruction::*;
    use VerificationType::*;

    fn name(name: &str) -> BinaryName {
        BinaryName::from_string(name.to_owned()).unwrap()
    }

    fn state<const N: usize, const M: usize>(
        locals: [InferredType; N],
        stack: [InferredType; M],
    ) -> TypeState {
        TypeState {
            locals: locals.to_vec(),
            stack: stack.into_iter().collect(),
        }
    }

    #[test]
    fn arithmetic() {
        let constants = ConstantsPool::new();
        let this_class = name("demo/Arith");
        let context = MethodContext {
            constants: &constants,
            this_class: &this_class,
            return_type: None,
        };

        let binops = [
            (Integer, vec![IAdd, ISub, IDiv, IMul, IRem, IAnd, IOr, IXor]),
            (Long, vec![LAdd, LSub, LDiv, LMul, LRem, LAnd, LOr, LXor]),
            (Float, vec![FAdd, FSub, FDiv, FMul, FRem]),
            (Double, vec![DAdd, DSub, DDiv, DMul, DRem]),
        ];

        for (good_typ, instructions) in binops {
            for instruction in instructions {
                // Try a bunch of different types
                for typ in [Integer, Long, Float, Double, Null, UninitializedThis] {
                    let mut state_in = state([], [typ.clone(), typ.clone()]);
                    let result = state_in.execute(&instruction, None, &context);
                    if typ == good_typ {
                        assert!(result.is_ok(), "Transfer of {:?}", instruction);
                        assert_eq!(state_in, state([], [typ]), "Output of {:?}", instruction);
                    } else {
                        assert!(
                            matches!(result, Err(VerifierErrorKind::InvalidType { .. })),
                            "Transfer of {:?}",
                            instruction
                        );
                    }
                }

                // Try with a stack that is too small
                let mut state_in = state([], [good_typ.clone()]);
                assert_eq!(
                    state_in.execute(&instruction, None, &context),
                    Err(VerifierErrorKind::EmptyStack),
                    "Transfer of {:?}",
                    instruction
                );
            }
        }
    }

    #[test]
    fn wide_locals() {
        let constants = ConstantsPool::new();
        let this_class = name("demo/Locals");
        let context = MethodContext {
            constants: &constants,
            this_class: &this_class,
            return_type: None,
        };

        let mut current = state([Integer, Integer, Integer], [Long]);
        current.execute(&LStore(1), None, &context).unwrap();
        assert_eq!(current.locals, vec![Integer, Long, Top]);

        // Overwriting the second half of a `long` kills it
        current.execute(&IConst0, None, &context).unwrap();
        current.execute(&IStore(2), None, &context).unwrap();
        assert_eq!(current.locals, vec![Integer, Top, Integer]);
        assert_eq!(
            current.execute(&LLoad(1), None, &context),
            Err(VerifierErrorKind::InvalidIndex(1))
        );

        // Stores past the end grow the locals
        current.execute(&DConst1, None, &context).unwrap();
        current.execute(&DStore(4), None, &context).unwrap();
        assert_eq!(current.locals, vec![Integer, Top, Integer, Top, Double, Top]);

        let frame = current.to_frame();
        assert_eq!(
            frame.locals.iter().map(|(_, _, t)| t.clone()).collect::<Vec<_>>(),
            vec![Integer, Top, Integer, Top, Double]
        );
    }

    #[test]
    fn stack_shuffles() {
        let constants = ConstantsPool::new();
        let this_class = name("demo/Shuffle");
        let context = MethodContext {
            constants: &constants,
            this_class: &this_class,
            return_type: None,
        };

        let mut current = state([], [Integer, Long]);
        current.execute(&Dup2X1, None, &context).unwrap();
        assert_eq!(current, state([], [Long, Integer, Long]));

        let mut current = state([], [Float, Integer]);
        current.execute(&Swap, None, &context).unwrap();
        assert_eq!(current, state([], [Integer, Float]));

        let mut current = state([], [Long]);
        assert_eq!(
            current.execute(&Dup, None, &context),
            Err(VerifierErrorKind::InvalidWidth(2))
        );

        let mut current = state([], [Integer, Integer, Double]);
        current.execute(&Dup2X2, None, &context).unwrap();
        assert_eq!(current, state([], [Double, Integer, Integer, Double]));
    }

    #[test]
    fn constructors() {
        let mut constants = ConstantsPool::new();
        let point = constants.get_class("demo/Point").unwrap();
        let init = constants
            .get_method_ref("demo/Point", "<init>", "(I)V", false)
            .unwrap();
        let this_class = name("demo/Point");
        let context = MethodContext {
            constants: &constants,
            this_class: &this_class,
            return_type: None,
        };

        let site = crate::jvm::code::SynLabelGenerator::new().fresh_label();
        let mut current = state([Integer], []);
        assert_eq!(
            current.execute(&New(point), None, &context),
            Err(VerifierErrorKind::UnlabelledAllocation)
        );
        current.execute(&New(point), Some(site), &context).unwrap();
        current.execute(&Dup, None, &context).unwrap();
        current.execute(&AStore(1), None, &context).unwrap();
        current.execute(&ILoad(0), None, &context).unwrap();
        assert_eq!(current, state([Integer, Uninitialized(site)], [Uninitialized(site), Integer]));

        current
            .execute(&Invoke(InvokeType::Special, init), None, &context)
            .unwrap();
        let point_type = Object(RefType::Object(this_class.clone()));
        assert_eq!(current, state([Integer, point_type], []));

        let entry = TypeState::method_entry(
            &this_class,
            false,
            true,
            &MethodDescriptor::parse("(JLjava/lang/String;)V").unwrap(),
            6,
        );
        assert_eq!(
            entry.locals,
            vec![
                UninitializedThis,
                Long,
                Top,
                Object(RefType::Object(BinaryName::STRING)),
                Top,
                Top
            ]
        );
    }

    #[test]
    fn returns() {
        let constants = ConstantsPool::new();
        let this_class = name("demo/Returns");
        let context = MethodContext {
            constants: &constants,
            this_class: &this_class,
            return_type: Some(FieldType::Base(BaseType::Long)),
        };

        let mut current = state([], [Long]);
        assert!(current.execute_branch(&BranchInstruction::LReturn, &context).is_ok());

        let mut current = state([], [Integer]);
        assert!(current
            .execute_branch(&BranchInstruction::IReturn, &context)
            .is_err());

        let mut current = state([], []);
        assert_eq!(
            current.execute_branch(&BranchInstruction::Ret(1), &context),
            Err(VerifierErrorKind::Subroutine)
        );
    }
}
