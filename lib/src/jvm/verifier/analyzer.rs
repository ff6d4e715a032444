//! Worklist inference of the type state before every instruction

use super::{InferredType, MethodContext, TypeState, VerificationType};
use crate::jvm::class_graph::{ResolveError, TypeResolver};
use crate::jvm::code::{MethodBody, Node, SynLabel};
use crate::jvm::{BinaryName, Error, RefType, VerifierErrorKind};
use crate::util::{OffsetVec, Width};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Result of inferring types for a method body
#[derive(Debug)]
pub struct Analysis {
    /// State before each node of the body
    ///
    /// Only instruction nodes ever have a state, and only if some path from the method entry
    /// reaches them.
    pub states: Vec<Option<TypeState>>,

    /// Largest operand stack (in slots) seen anywhere
    pub max_stack: usize,

    /// Largest number of local slots seen anywhere
    pub max_locals: usize,
}

impl Analysis {
    /// Is the node reachable from the method entry?
    pub fn is_live(&self, node_index: usize) -> bool {
        matches!(self.states.get(node_index), Some(Some(_)))
    }

    pub fn state(&self, node_index: usize) -> Option<&TypeState> {
        self.states.get(node_index).and_then(Option::as_ref)
    }
}

#[derive(Debug)]
pub enum AnalysisError {
    /// Transfer or merge failed at an instruction (counting only real instructions)
    Verifier {
        instruction: usize,
        kind: VerifierErrorKind,
    },

    /// Merging two reference types needed a class that could not be resolved
    Resolve(ResolveError),

    /// Body is not well-formed (eg. a label is missing or a catch type is not a class)
    Structural(Error),
}

impl From<ResolveError> for AnalysisError {
    fn from(err: ResolveError) -> AnalysisError {
        AnalysisError::Resolve(err)
    }
}

impl From<Error> for AnalysisError {
    fn from(err: Error) -> AnalysisError {
        AnalysisError::Structural(err)
    }
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::Verifier { instruction, kind } => {
                write!(f, "at instruction {}: {}", instruction, kind)
            }
            AnalysisError::Resolve(err) => err.fmt(f),
            AnalysisError::Structural(err) => err.fmt(f),
        }
    }
}

/// Exception handler with everything resolved to node positions
struct ResolvedHandler {
    start: usize,
    end: usize,
    target: usize,
    caught: InferredType,
}

/// Infer the type state before every reachable instruction
///
/// Every `new` instruction must come right after a label (see [`MethodBody::label_allocations`]).
pub fn analyze(
    body: &MethodBody,
    entry: TypeState,
    context: &MethodContext,
    resolver: &TypeResolver,
) -> Result<Analysis, AnalysisError> {
    let positions = body.label_positions()?;
    let node_count = body.nodes.len();

    // Next instruction at or after each node, and the instruction number of each node
    let mut next_instruction = vec![None; node_count + 1];
    for idx in (0..node_count).rev() {
        next_instruction[idx] = if body.nodes[idx].is_instruction() {
            Some(idx)
        } else {
            next_instruction[idx + 1]
        };
    }
    let mut instruction_numbers = Vec::with_capacity(node_count + 1);
    let mut count = 0;
    for node in &body.nodes {
        instruction_numbers.push(count);
        if node.is_instruction() {
            count += 1;
        }
    }
    instruction_numbers.push(count);

    let fails_at = |node: usize, kind: VerifierErrorKind| AnalysisError::Verifier {
        instruction: instruction_numbers[node],
        kind,
    };
    let position = |label: &SynLabel| -> Result<usize, AnalysisError> {
        positions
            .get(label)
            .copied()
            .ok_or(AnalysisError::Structural(Error::UnplacedLabel(*label)))
    };
    let jump_target = |label: &SynLabel, from: usize| -> Result<usize, AnalysisError> {
        next_instruction[position(label)?].ok_or_else(|| fails_at(from, VerifierErrorKind::FallsOffEnd))
    };

    let mut handlers = vec![];
    for handler in &body.handlers {
        let start = position(&handler.start)?;
        let end = position(&handler.end)?;
        let target = next_instruction[position(&handler.handler)?]
            .ok_or_else(|| fails_at(node_count, VerifierErrorKind::FallsOffEnd))?;
        let caught = match handler.catch_type {
            Some(class) => VerificationType::Object(context.constants.class_ref_type(class)?),
            None => VerificationType::Object(RefType::Object(BinaryName::THROWABLE)),
        };
        handlers.push(ResolvedHandler {
            start,
            end,
            target,
            caught,
        });
    }

    let first = next_instruction[0].ok_or_else(|| fails_at(0, VerifierErrorKind::FallsOffEnd))?;
    let mut analysis = Analysis {
        states: vec![None; node_count],
        max_stack: 0,
        max_locals: 0,
    };
    let mut worklist: BTreeSet<usize> = BTreeSet::new();
    let mut merges = Merger {
        resolver,
        states: &mut analysis.states,
        worklist: &mut worklist,
    };
    merges
        .merge_into(first, &entry)
        .map_err(|kind| kind.located(instruction_numbers[first]))?;

    let mut visits = 0usize;
    while let Some(idx) = worklist.iter().next().copied() {
        worklist.remove(&idx);
        visits += 1;

        let mut state = match &analysis.states[idx] {
            Some(state) => state.clone(),
            None => continue,
        };
        let before = state.clone();
        update_maximums(&mut analysis.max_stack, &mut analysis.max_locals, &state);

        let mut successors: Vec<usize> = vec![];
        match &body.nodes[idx] {
            Node::Insn(insn) => {
                let allocation = match idx.checked_sub(1).map(|prev| &body.nodes[prev]) {
                    Some(Node::Label(label)) => Some(*label),
                    _ => None,
                };
                state
                    .execute(insn, allocation, context)
                    .map_err(|kind| fails_at(idx, kind))?;
                successors.push(
                    next_instruction[idx + 1]
                        .ok_or_else(|| fails_at(idx, VerifierErrorKind::FallsOffEnd))?,
                );
            }
            Node::Branch(branch) => {
                state
                    .execute_branch(branch, context)
                    .map_err(|kind| fails_at(idx, kind))?;
                for target in branch.jump_targets().targets() {
                    successors.push(jump_target(target, idx)?);
                }
                if branch.falls_through() {
                    successors.push(
                        next_instruction[idx + 1]
                            .ok_or_else(|| fails_at(idx, VerifierErrorKind::FallsOffEnd))?,
                    );
                }
            }
            Node::Label(_) | Node::Line(_) => continue,
        }
        update_maximums(&mut analysis.max_stack, &mut analysis.max_locals, &state);

        let mut merges = Merger {
            resolver,
            states: &mut analysis.states,
            worklist: &mut worklist,
        };
        for handler in handlers.iter().filter(|h| h.start <= idx && idx < h.end) {
            for locals_from in [&before, &state] {
                let handler_state = locals_from.handler_entry(handler.caught.clone());
                merges
                    .merge_into(handler.target, &handler_state)
                    .map_err(|kind| kind.located(instruction_numbers[handler.target]))?;
            }
        }
        for successor in successors {
            merges
                .merge_into(successor, &state)
                .map_err(|kind| kind.located(instruction_numbers[successor]))?;
        }
    }

    log::trace!(
        "Inferred types for {} instructions in {} visits",
        analysis.states.iter().filter(|s| s.is_some()).count(),
        visits
    );
    Ok(analysis)
}

fn update_maximums(max_stack: &mut usize, max_locals: &mut usize, state: &TypeState) {
    *max_stack = (*max_stack).max(state.stack.offset_len().0);
    let used_locals = state
        .locals
        .iter()
        .enumerate()
        .filter(|(_, typ)| **typ != VerificationType::Top)
        .map(|(slot, typ)| slot + typ.width())
        .max()
        .unwrap_or(0);
    *max_locals = (*max_locals).max(used_locals);
}

/// Failure while merging, before the instruction is known
enum MergeError {
    Verifier(VerifierErrorKind),
    Resolve(ResolveError),
}

impl MergeError {
    fn located(self, instruction: usize) -> AnalysisError {
        match self {
            MergeError::Verifier(kind) => AnalysisError::Verifier { instruction, kind },
            MergeError::Resolve(err) => AnalysisError::Resolve(err),
        }
    }
}

struct Merger<'a> {
    resolver: &'a TypeResolver,
    states: &'a mut Vec<Option<TypeState>>,
    worklist: &'a mut BTreeSet<usize>,
}

impl<'a> Merger<'a> {
    /// Merge an incoming state into what is known about a node, queueing it if that changed
    fn merge_into(&mut self, node: usize, incoming: &TypeState) -> Result<(), MergeError> {
        let merged = match &self.states[node] {
            None => incoming.clone(),
            Some(current) => {
                let merged = merge_states(current, incoming, self.resolver)?;
                if &merged == current {
                    return Ok(());
                }
                merged
            }
        };
        self.states[node] = Some(merged);
        self.worklist.insert(node);
        Ok(())
    }
}

/// Least upper bound of two states reaching the same instruction
///
/// Locals that disagree become `Top`. The stacks must agree in height and category.
fn merge_states(
    current: &TypeState,
    incoming: &TypeState,
    resolver: &TypeResolver,
) -> Result<TypeState, MergeError> {
    if current.stack.len() != incoming.stack.len() {
        return Err(MergeError::Verifier(
            VerifierErrorKind::IncompatibleStackHeights(current.stack.len(), incoming.stack.len()),
        ));
    }
    let mut stack = OffsetVec::new();
    for ((_, _, t1), (_, _, t2)) in current.stack.iter().zip(incoming.stack.iter()) {
        match merge_types(t1, t2, resolver)? {
            Some(merged) => {
                stack.push(merged);
            }
            None => {
                return Err(MergeError::Verifier(VerifierErrorKind::IncompatibleTypes(
                    t1.clone(),
                    t2.clone(),
                )))
            }
        }
    }

    let local_count = current.locals.len().max(incoming.locals.len());
    let mut locals = Vec::with_capacity(local_count);
    for slot in 0..local_count {
        let merged = match (current.locals.get(slot), incoming.locals.get(slot)) {
            (Some(t1), Some(t2)) => merge_types(t1, t2, resolver)?,
            _ => None,
        };
        locals.push(merged.unwrap_or(VerificationType::Top));
    }

    // A wide local only survives if its second half did too
    for slot in 0..local_count {
        if locals[slot].width() == 2 && locals.get(slot + 1) != Some(&VerificationType::Top) {
            locals[slot] = VerificationType::Top;
        }
    }

    Ok(TypeState { locals, stack })
}

/// Merge two types, or `None` if they have nothing useful in common
fn merge_types(
    t1: &InferredType,
    t2: &InferredType,
    resolver: &TypeResolver,
) -> Result<Option<InferredType>, MergeError> {
    use VerificationType::*;

    Ok(match (t1, t2) {
        _ if t1 == t2 => Some(t1.clone()),
        (Null, Object(other)) | (Object(other), Null) => Some(Object(other.clone())),
        (Object(r1), Object(r2)) => Some(Object(
            resolver
                .common_ref_type(r1, r2)
                .map_err(MergeError::Resolve)?,
        )),
        _ => None,
    })
}

/// Position of every node that starts a basic block targeted by something other than fallthrough
pub fn frame_targets(body: &MethodBody) -> Result<Vec<usize>, Error> {
    let positions: HashMap<SynLabel, usize> = body.label_positions()?;
    let mut targets = BTreeSet::new();
    let mut add = |label: &SynLabel| -> Result<(), Error> {
        let position = *positions.get(label).ok_or(Error::UnplacedLabel(*label))?;
        if let Some(offset) = body.nodes[position..].iter().position(Node::is_instruction) {
            targets.insert(position + offset);
        }
        Ok(())
    };
    for node in &body.nodes {
        if let Node::Branch(branch) = node {
            for target in branch.jump_targets().targets() {
                add(target)?;
            }
        }
    }
    for handler in &body.handlers {
        add(&handler.handler)?;
    }
    Ok(targets.into_iter().collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ConstantsPool;
    use crate::jvm::class_graph::MemoryClassPath;
    use crate::jvm::code::{BranchInstruction, Handler, Instruction, OrdComparison, SynLabelGenerator};
    use crate::jvm::{FieldType, Name};

    fn body(nodes: Vec<Node>, handlers: Vec<Handler>, labels: SynLabelGenerator) -> MethodBody {
        MethodBody {
            max_stack: 0,
            max_locals: 0,
            nodes,
            handlers,
            local_variables: vec![],
            local_variable_types: vec![],
            attributes: vec![],
            labels,
        }
    }

    fn int_state(locals: usize) -> TypeState {
        TypeState {
            locals: vec![VerificationType::Integer; locals],
            stack: OffsetVec::new(),
        }
    }

    #[test]
    fn loop_with_merge() {
        let constants = ConstantsPool::new();
        let this_class = BinaryName::from_string("demo/Loop".to_owned()).unwrap();
        let context = MethodContext {
            constants: &constants,
            this_class: &this_class,
            return_type: Some(FieldType::int()),
        };
        let resolver = TypeResolver::new(MemoryClassPath::new());

        let mut labels = SynLabelGenerator::new();
        let head = labels.fresh_label();
        let done = labels.fresh_label();
        let method = body(
            vec![
                Node::Insn(Instruction::LConst0),
                Node::Insn(Instruction::LStore(1)),
                Node::Label(head),
                Node::Insn(Instruction::ILoad(0)),
                Node::Branch(BranchInstruction::If(OrdComparison::LE, done)),
                Node::Insn(Instruction::IInc(0, -1)),
                Node::Insn(Instruction::IConst0),
                Node::Insn(Instruction::IStore(2)),
                Node::Branch(BranchInstruction::Goto(head)),
                Node::Label(done),
                Node::Insn(Instruction::ILoad(0)),
                Node::Branch(BranchInstruction::IReturn),
                Node::Insn(Instruction::Nop),
            ],
            vec![],
            labels,
        );

        let analysis = analyze(&method, int_state(1), &context, &resolver).unwrap();

        // The `long` in 1-2 is clobbered by the `int` in 2 on the back edge
        let head_state = analysis.state(3).unwrap();
        assert_eq!(
            head_state.locals,
            vec![
                VerificationType::Integer,
                VerificationType::Top,
                VerificationType::Top
            ]
        );
        assert!(analysis.is_live(10));
        assert!(!analysis.is_live(12));
        assert_eq!(analysis.max_stack, 2);
        assert_eq!(analysis.max_locals, 3);
        assert_eq!(frame_targets(&method).unwrap(), vec![3, 10]);
    }

    #[test]
    fn stack_height_mismatch() {
        let constants = ConstantsPool::new();
        let this_class = BinaryName::from_string("demo/Bad".to_owned()).unwrap();
        let context = MethodContext {
            constants: &constants,
            this_class: &this_class,
            return_type: None,
        };
        let resolver = TypeResolver::new(MemoryClassPath::new());

        let mut labels = SynLabelGenerator::new();
        let join = labels.fresh_label();
        let method = body(
            vec![
                Node::Insn(Instruction::ILoad(0)),
                Node::Insn(Instruction::ILoad(0)),
                Node::Branch(BranchInstruction::If(OrdComparison::EQ, join)),
                Node::Insn(Instruction::Pop),
                Node::Label(join),
                Node::Branch(BranchInstruction::Return),
            ],
            vec![],
            labels,
        );

        match analyze(&method, int_state(1), &context, &resolver) {
            Err(AnalysisError::Verifier {
                instruction: 4,
                kind: VerifierErrorKind::IncompatibleStackHeights(_, _),
            }) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn handler_states() {
        let constants = ConstantsPool::new();
        let this_class = BinaryName::from_string("demo/Catch".to_owned()).unwrap();
        let context = MethodContext {
            constants: &constants,
            this_class: &this_class,
            return_type: None,
        };
        let resolver = TypeResolver::new(MemoryClassPath::new());

        let mut labels = SynLabelGenerator::new();
        let start = labels.fresh_label();
        let end = labels.fresh_label();
        let catch = labels.fresh_label();
        let method = body(
            vec![
                Node::Label(start),
                Node::Insn(Instruction::FConst0),
                Node::Insn(Instruction::FStore(1)),
                Node::Label(end),
                Node::Branch(BranchInstruction::Return),
                Node::Label(catch),
                Node::Insn(Instruction::AStore(2)),
                Node::Branch(BranchInstruction::Return),
            ],
            vec![Handler {
                start,
                end,
                handler: catch,
                catch_type: None,
            }],
            labels,
        );

        let analysis = analyze(&method, int_state(1), &context, &resolver).unwrap();
        let handler_state = analysis.state(6).unwrap();
        assert_eq!(
            handler_state.locals,
            vec![VerificationType::Integer, VerificationType::Top]
        );
        assert_eq!(
            handler_state.stack.iter().map(|(_, _, t)| t.clone()).collect::<Vec<_>>(),
            vec![VerificationType::Object(RefType::Object(BinaryName::THROWABLE))]
        );
        assert_eq!(analysis.max_locals, 3);
    }
}
