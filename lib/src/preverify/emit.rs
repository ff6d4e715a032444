//! Attaching inferred frames to a method body and encoding it back into a `Code` attribute

use super::FrameFormat;
use crate::jvm::class_file::{Attribute, Code, ConstantsPool, StackMap, StackMapTable};
use crate::jvm::code::{MethodBody, Node};
use crate::jvm::verifier::{frame_targets, stack_map, stack_map_table, Analysis, TypeState};
use crate::jvm::Error;
use crate::util::Offset;

/// Encode an analyzed method body, with frames at every jump target
///
/// Instructions that the analysis never reached are removed first, along with exception handlers
/// whose handler code is unreachable. `entry` is the state the analysis started from. Any stack
/// map that the body carried over from the input is replaced.
pub fn emit_method(
    body: &mut MethodBody,
    analysis: &Analysis,
    entry: &TypeState,
    constants: &mut ConstantsPool,
    format: FrameFormat,
) -> Result<Code, Error> {
    // Targets are computed before removing anything so that their states line up with analysis
    let mut targets = frame_targets(body)?;
    targets.retain(|idx| analysis.is_live(*idx));

    let new_positions = remove_dead_code(body, analysis)?;
    let mut frames = vec![];
    for target in targets {
        if let (Some(state), Some(position)) = (analysis.state(target), new_positions[target]) {
            frames.push((position, state.to_frame()));
        }
    }

    let max_stack = analysis.max_stack.max(body.max_stack as usize);
    let max_locals = analysis.max_locals.max(body.max_locals as usize);
    body.max_stack = u16::try_from(max_stack)
        .map_err(|_| Error::MethodCodeMaxStackOverflow(Offset(max_stack)))?;
    body.max_locals = u16::try_from(max_locals)
        .map_err(|_| Error::MethodCodeMaxLocalsOverflow(Offset(max_locals)))?;

    let mut kept_attributes = Vec::with_capacity(body.attributes.len());
    for attribute in body.attributes.drain(..) {
        if !attribute.is::<StackMapTable>(constants)? && !attribute.is::<StackMap>(constants)? {
            kept_attributes.push(attribute);
        }
    }
    body.attributes = kept_attributes;

    let layout = body.layout()?;
    let mut serialized = Vec::with_capacity(frames.len());
    for (position, frame) in &frames {
        let offset = layout.node_offset(*position) as u16;
        serialized.push((offset, frame.into_serializable(constants, &layout)?));
    }

    let mut extra_attributes: Vec<Attribute> = vec![];
    if !serialized.is_empty() {
        extra_attributes.push(match format {
            FrameFormat::StackMapTable => {
                let initial = entry.to_frame().into_serializable(constants, &layout)?;
                constants.get_attribute(&stack_map_table(&initial, &serialized))?
            }
            FrameFormat::StackMap => constants.get_attribute(&stack_map(&serialized))?,
        });
    }
    log::trace!("Emitting {} frames", serialized.len());

    body.encode(&layout, constants, extra_attributes)
}

/// Drop unreachable instructions (and line markers in front of them)
///
/// Labels are all kept, since debug tables and handlers may still refer to them. Returns the new
/// position of every old node that was kept.
fn remove_dead_code(
    body: &mut MethodBody,
    analysis: &Analysis,
) -> Result<Vec<Option<usize>>, Error> {
    let node_count = body.nodes.len();
    let mut next_instruction_live = vec![false; node_count + 1];
    for idx in (0..node_count).rev() {
        next_instruction_live[idx] = if body.nodes[idx].is_instruction() {
            analysis.is_live(idx)
        } else {
            next_instruction_live[idx + 1]
        };
    }

    // Handlers whose code is never reached are dead too
    let positions = body.label_positions()?;
    body.handlers.retain(|handler| match positions.get(&handler.handler) {
        Some(position) if next_instruction_live[*position] => true,
        _ => {
            log::debug!("Dropping exception handler with unreachable code");
            false
        }
    });

    let mut new_positions = Vec::with_capacity(node_count);
    let mut nodes = Vec::with_capacity(node_count);
    let mut removed = 0;
    for (idx, node) in body.nodes.drain(..).enumerate() {
        let keep = match node {
            Node::Label(_) => true,
            Node::Line(_) | Node::Insn(_) | Node::Branch(_) => next_instruction_live[idx],
        };
        if keep {
            new_positions.push(Some(nodes.len()));
            nodes.push(node);
        } else {
            new_positions.push(None);
            if node.is_instruction() {
                removed += 1;
            }
        }
    }
    body.nodes = nodes;

    if removed > 0 {
        log::debug!("Removed {} unreachable instructions", removed);
    }
    Ok(new_positions)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::StackMapFrame;
    use crate::jvm::class_graph::{MemoryClassPath, TypeResolver};
    use crate::jvm::code::{
        BranchInstruction, Handler, Instruction, OrdComparison, SynLabelGenerator,
    };
    use crate::jvm::verifier::{analyze, MethodContext, VerificationType};
    use crate::jvm::{BinaryName, MethodDescriptor, Name, ParseDescriptor};

    fn analyzed(
        body: &MethodBody,
        constants: &ConstantsPool,
        descriptor: &str,
    ) -> (Analysis, TypeState) {
        let this_class = BinaryName::from_string("demo/Emit".to_owned()).unwrap();
        let descriptor = MethodDescriptor::parse(descriptor).unwrap();
        let entry = TypeState::method_entry(
            &this_class,
            true,
            false,
            &descriptor,
            body.max_locals as usize,
        );
        let context = MethodContext {
            constants,
            this_class: &this_class,
            return_type: descriptor.return_type.clone(),
        };
        let resolver = TypeResolver::new(MemoryClassPath::new());
        let analysis = analyze(body, entry.clone(), &context, &resolver).unwrap();
        (analysis, entry)
    }

    /// `static int pick(int x) { return x == 0 ? 1 : 2; }` with an unreachable `nop` in the middle
    fn pick() -> MethodBody {
        let mut labels = SynLabelGenerator::new();
        let other = labels.fresh_label();
        let join = labels.fresh_label();
        MethodBody {
            max_stack: 0,
            max_locals: 1,
            nodes: vec![
                Node::Line(3),
                Node::Insn(Instruction::ILoad(0)),
                Node::Branch(BranchInstruction::If(OrdComparison::NE, other)),
                Node::Insn(Instruction::IConst1),
                Node::Branch(BranchInstruction::Goto(join)),
                Node::Line(4),
                Node::Insn(Instruction::Nop),
                Node::Label(other),
                Node::Insn(Instruction::IConst2),
                Node::Label(join),
                Node::Branch(BranchInstruction::IReturn),
            ],
            handlers: vec![],
            local_variables: vec![],
            local_variable_types: vec![],
            attributes: vec![],
            labels,
        }
    }

    #[test]
    fn dead_code_is_dropped() {
        let mut constants = ConstantsPool::new();
        let mut body = pick();
        let (analysis, entry) = analyzed(&body, &constants, "(I)I");
        let code = emit_method(
            &mut body,
            &analysis,
            &entry,
            &mut constants,
            FrameFormat::StackMapTable,
        )
        .unwrap();

        assert_eq!(
            code.code_array.0,
            vec![
                0x1a, // iload_0
                0x9a, 0x00, 0x07, // ifne +7
                0x04, // iconst_1
                0xa7, 0x00, 0x04, // goto +4
                0x05, // iconst_2
                0xac, // ireturn
            ]
        );
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.max_locals, 1);
        assert!(!body.nodes.contains(&Node::Line(4)));

        let table: StackMapTable = Attribute::find(&code.attributes, &constants)
            .unwrap()
            .unwrap();
        assert_eq!(
            table.0,
            vec![
                StackMapFrame::SameLocalsNoStack { offset_delta: 8 },
                StackMapFrame::SameLocalsOneStack {
                    offset_delta: 0,
                    stack: VerificationType::Integer,
                },
            ]
        );
    }

    #[test]
    fn frames_are_deterministic() {
        let mut outputs = vec![];
        for _ in 0..2 {
            let mut constants = ConstantsPool::new();
            let mut body = pick();
            let (analysis, entry) = analyzed(&body, &constants, "(I)I");
            let code = emit_method(
                &mut body,
                &analysis,
                &entry,
                &mut constants,
                FrameFormat::StackMap,
            )
            .unwrap();
            let map: StackMap = Attribute::find(&code.attributes, &constants)
                .unwrap()
                .unwrap();
            assert_eq!(map.0.len(), 2);
            outputs.push(code);
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[test]
    fn duplicate_labels_stop_dead_code_removal() {
        let constants = ConstantsPool::new();
        let mut body = pick();
        let (analysis, _) = analyzed(&body, &constants, "(I)I");

        let other = match body.nodes[7] {
            Node::Label(label) => label,
            _ => unreachable!(),
        };
        body.nodes.push(Node::Label(other));
        let node_count = body.nodes.len();

        assert!(matches!(
            remove_dead_code(&mut body, &analysis),
            Err(Error::DuplicateLabel(label)) if label == other
        ));
        assert_eq!(body.nodes.len(), node_count);
    }

    #[test]
    fn unreachable_handlers_are_dropped() {
        let mut constants = ConstantsPool::new();
        let throwable = constants.get_class("java/lang/Throwable").unwrap();
        let mut labels = SynLabelGenerator::new();
        let start = labels.fresh_label();
        let catcher = labels.fresh_label();

        // Empty protected range: nothing ever reaches the handler code
        let mut body = MethodBody {
            max_stack: 1,
            max_locals: 0,
            nodes: vec![
                Node::Label(start),
                Node::Insn(Instruction::Nop),
                Node::Branch(BranchInstruction::Return),
                Node::Label(catcher),
                Node::Insn(Instruction::Pop),
                Node::Branch(BranchInstruction::Return),
            ],
            handlers: vec![Handler {
                start,
                end: start,
                handler: catcher,
                catch_type: Some(throwable),
            }],
            local_variables: vec![],
            local_variable_types: vec![],
            attributes: vec![],
            labels,
        };

        let (analysis, entry) = analyzed(&body, &constants, "()V");
        let code = emit_method(
            &mut body,
            &analysis,
            &entry,
            &mut constants,
            FrameFormat::StackMapTable,
        )
        .unwrap();
        assert!(body.handlers.is_empty());
        assert!(code.exception_table.is_empty());
        assert_eq!(code.code_array.0, vec![0x00, 0xb1]);
        assert!(code.attributes.is_empty());
    }
}
