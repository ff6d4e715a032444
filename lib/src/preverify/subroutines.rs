//! Removal of `jsr`/`ret` subroutines by inlining
//!
//! ### Regions
//!
//! A subroutine is the run of nodes starting at the label targeted by a `jsr` and ending at its
//! `ret`. Another subroutine may sit inside that run (compilers do this for a `finally` nested in
//! a `finally`): it is captured as a child region first, and the search for the parent's `ret`
//! resumes after the child's. Every subroutine is captured up front, before anything gets
//! rewritten, into an arena of [`Region`]s. Region `0` is the rest of the method body. Code
//! outside a subroutine may only enter it through `jsr`, and the graph of which region calls which
//! must not have cycles.
//!
//! Exception handlers and local variable ranges are attached to the region of their start label,
//! provided the range only covers that region's own code and whole nested regions.
//!
//! ### Copies
//!
//! Rewriting walks the outer region in order. Each `jsr` becomes an `aconst_null` (standing in for
//! the return address) followed by a fresh copy of the subroutine's region, and the `ret` at the
//! end of the copy becomes a `goto` to the code after the original `jsr`. Every label inside a copy
//! is replaced by a fresh one. Labels that are not part of the copied region are looked up in the
//! enclosing copy, and so on outwards, ending with the outer region whose labels are kept as-is.
//!
//! Since each call site gets its own copy, nested subroutines can blow up the size of a method
//! exponentially. Both the nesting depth and the final instruction count are checked against
//! limits before any copying starts.

use crate::jvm::code::{
    BranchInstruction, Handler, Instruction, LocalVariableRange, MethodBody, Node, SynLabel,
    SynLabelGenerator,
};
use crate::jvm::Error;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;

/// Limits on how much code inlining may produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InliningLimits {
    /// Deepest chain of subroutines calling subroutines
    pub max_depth: usize,

    /// Largest number of instructions in the rewritten body
    pub max_instructions: usize,
}

#[derive(Debug)]
pub enum SubroutineError {
    /// Labels in the body are inconsistent
    Structural(Error),

    /// Subroutine runs off the end of the method without a `ret`
    NoReturn(SynLabel),

    /// Subroutine ends up calling itself
    Recursive(SynLabel),

    /// `ret` that is not at the end of a subroutine (instruction number)
    RetOutsideSubroutine(usize),

    /// Control reaches the subroutine body other than through `jsr`
    EnteredFromOutside(SynLabel),

    /// Exception handler range and handler code are in different regions
    HandlerCrossesRegion(SynLabel),

    /// Inlining would be nested too deeply or produce too many instructions
    InliningLimitExceeded { depth: usize, instructions: usize },
}

impl From<Error> for SubroutineError {
    fn from(err: Error) -> SubroutineError {
        SubroutineError::Structural(err)
    }
}

impl fmt::Display for SubroutineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubroutineError::Structural(err) => err.fmt(f),
            SubroutineError::NoReturn(label) => {
                write!(f, "subroutine at {:?} has no ret", label)
            }
            SubroutineError::Recursive(label) => {
                write!(f, "subroutine at {:?} is recursive", label)
            }
            SubroutineError::RetOutsideSubroutine(instruction) => {
                write!(f, "ret outside of a subroutine at instruction {}", instruction)
            }
            SubroutineError::EnteredFromOutside(label) => {
                write!(f, "subroutine code at {:?} entered without jsr", label)
            }
            SubroutineError::HandlerCrossesRegion(label) => write!(
                f,
                "exception handler at {:?} is not in the same subroutine as its range",
                label
            ),
            SubroutineError::InliningLimitExceeded {
                depth,
                instructions,
            } => write!(
                f,
                "inlining limit exceeded (depth {}, {} instructions)",
                depth, instructions
            ),
        }
    }
}

/// Index of a region in the arena (`0` is the outer region)
type RegionId = usize;

const OUTER: RegionId = 0;

/// Range of nodes that gets copied as a unit
///
/// Nodes of nested regions inside `start..end` are not part of the copy, but their labels are:
/// they mark where the nested code used to be.
#[derive(Debug)]
struct Region {
    /// Label targeted by `jsr` (`None` for the outer region)
    entry: Option<SynLabel>,

    /// Node range, nested regions included (the outer region spans the whole body)
    start: usize,
    end: usize,

    /// Labels placed anywhere in `start..end`
    labels: Vec<SynLabel>,

    /// Regions called with `jsr`, once per call site
    calls: Vec<RegionId>,

    /// Instructions in the region itself
    instructions: usize,

    /// Indices into the body handlers and debug ranges attached to this region
    handlers: Vec<usize>,
    local_variables: Vec<usize>,
    local_variable_types: Vec<usize>,
}

impl Region {
    fn new(entry: Option<SynLabel>, start: usize, end: usize) -> Region {
        Region {
            entry,
            start,
            end,
            labels: vec![],
            calls: vec![],
            instructions: 0,
            handlers: vec![],
            local_variables: vec![],
            local_variable_types: vec![],
        }
    }
}

/// Does the body contain any `jsr` or `ret`?
pub fn has_subroutines(body: &MethodBody) -> bool {
    body.nodes
        .iter()
        .any(|node| matches!(node, Node::Branch(branch) if branch.is_subroutine_instruction()))
}

/// Replace all subroutines in the body by inlined copies
///
/// Returns the number of copies made. On error, the body is left untouched.
pub fn inline_subroutines(
    body: &mut MethodBody,
    limits: &InliningLimits,
) -> Result<usize, SubroutineError> {
    if !has_subroutines(body) {
        return Ok(0);
    }

    let regions = capture_regions(body)?;
    let (depth, instructions) =
        expanded_size(&regions.regions, OUTER, &mut vec![None; regions.regions.len()])?;
    if depth > limits.max_depth || instructions > limits.max_instructions {
        return Err(SubroutineError::InliningLimitExceeded {
            depth,
            instructions,
        });
    }

    let mut inliner = Inliner {
        body: &*body,
        regions: &regions,
        labels: body.labels.clone(),
        nodes: Vec::with_capacity(body.nodes.len()),
        handlers: vec![],
        local_variables: vec![],
        local_variable_types: vec![],
        copies: 0,
    };
    inliner.copy_region(OUTER, &Instance::outer(), None)?;

    let Inliner {
        labels,
        nodes,
        handlers,
        local_variables,
        local_variable_types,
        copies,
        ..
    } = inliner;
    body.labels = labels;
    body.nodes = nodes;
    body.handlers = handlers;
    body.local_variables = local_variables;
    body.local_variable_types = local_variable_types;

    log::debug!(
        "Inlined {} subroutine copies ({} instructions, nesting depth {})",
        copies,
        instructions,
        depth
    );
    Ok(copies)
}

/// Regions of a method body, along with which region owns each node
struct Regions {
    regions: Vec<Region>,
    owner: Vec<RegionId>,
    positions: HashMap<SynLabel, usize>,
}

impl Regions {
    fn position(&self, label: SynLabel) -> Result<usize, SubroutineError> {
        self.positions
            .get(&label)
            .copied()
            .ok_or(SubroutineError::Structural(Error::UnplacedLabel(label)))
    }

    fn owner_of(&self, label: SynLabel) -> Result<RegionId, SubroutineError> {
        Ok(self.owner[self.position(label)?])
    }

    /// Region that a `start..end` range belongs to, if it does not cross a region boundary
    ///
    /// That is the region owning the start label, as long as every instruction in the range is
    /// either owned by it or part of a nested region lying entirely inside the range.
    fn range_region(
        &self,
        nodes: &[Node],
        start: SynLabel,
        end: SynLabel,
    ) -> Result<Option<RegionId>, SubroutineError> {
        let start_pos = self.position(start)?;
        let end_pos = self.position(end)?;
        let region = self.owner[start_pos];
        if end_pos > self.regions[region].end {
            return Ok(None);
        }

        for idx in start_pos..end_pos.max(start_pos) {
            let owner = self.owner[idx];
            if owner == region || !nodes[idx].is_instruction() {
                continue;
            }
            let nested = &self.regions[owner];
            if nested.start < start_pos || nested.end > end_pos {
                return Ok(None);
            }
        }
        Ok(Some(region))
    }
}

fn capture_regions(body: &MethodBody) -> Result<Regions, SubroutineError> {
    let positions = body.label_positions()?;
    let mut regions = Regions {
        regions: vec![Region::new(None, 0, body.nodes.len())],
        owner: vec![OUTER; body.nodes.len()],
        positions,
    };

    // Subroutines, ordered by position of their entry
    let mut entries: Vec<(usize, SynLabel)> = vec![];
    for node in &body.nodes {
        if let Node::Branch(BranchInstruction::Jsr(target)) = node {
            entries.push((regions.position(*target)?, *target));
        }
    }
    entries.sort();
    entries.dedup();
    let entry_at: HashMap<usize, SynLabel> = entries.iter().copied().collect();

    for (start, entry) in entries {
        // Already captured inside an earlier subroutine
        if regions.owner[start] != OUTER {
            continue;
        }
        capture_region(body, &mut regions, &entry_at, entry, start)?;
    }
    for region in regions.regions.iter_mut().skip(1) {
        region.labels = body.nodes[region.start..region.end]
            .iter()
            .filter_map(|node| match node {
                Node::Label(label) => Some(*label),
                _ => None,
            })
            .collect();
    }

    // Contents of regions, and checks that subroutines are only entered through `jsr`
    let mut instruction_number = 0;
    for (idx, node) in body.nodes.iter().enumerate() {
        let region = regions.owner[idx];
        match node {
            Node::Label(_) | Node::Line(_) => continue,
            Node::Insn(_) | Node::Branch(_) => {
                regions.regions[region].instructions += 1;
                instruction_number += 1;
            }
        }

        let falls_through = match node {
            Node::Insn(_) => true,
            Node::Branch(branch) => branch.falls_through(),
            _ => false,
        };

        if let Node::Branch(branch) = node {
            match branch {
                BranchInstruction::Jsr(target) => {
                    let callee = regions.owner_of(*target)?;
                    regions.regions[region].calls.push(callee);
                }
                BranchInstruction::Ret(_) if region == OUTER => {
                    return Err(SubroutineError::RetOutsideSubroutine(instruction_number - 1));
                }
                _ => {
                    for target in branch.jump_targets().targets() {
                        let target_region = regions.owner_of(**target)?;
                        if target_region != region && target_region != OUTER {
                            return Err(SubroutineError::EnteredFromOutside(**target));
                        }
                    }
                }
            }
        }

        if falls_through {
            let next = body.nodes[idx + 1..]
                .iter()
                .position(Node::is_instruction)
                .map(|offset| regions.owner[idx + 1 + offset]);
            if let Some(next) = next {
                if next != region && next != OUTER {
                    if let Some(entry) = regions.regions[next].entry {
                        return Err(SubroutineError::EnteredFromOutside(entry));
                    }
                }
            }
        }
    }

    // Attach handlers and debug ranges to the region enclosing them
    for (idx, handler) in body.handlers.iter().enumerate() {
        let region = regions.range_region(&body.nodes, handler.start, handler.end)?;
        match region {
            Some(region) if regions.owner_of(handler.handler)? == region => {
                regions.regions[region].handlers.push(idx);
            }
            _ => return Err(SubroutineError::HandlerCrossesRegion(handler.handler)),
        }
    }
    for (idx, range) in body.local_variables.iter().enumerate() {
        match regions.range_region(&body.nodes, range.start, range.end)? {
            Some(region) => regions.regions[region].local_variables.push(idx),
            None => log::warn!("Dropping local variable range crossing a subroutine boundary"),
        }
    }
    for (idx, range) in body.local_variable_types.iter().enumerate() {
        match regions.range_region(&body.nodes, range.start, range.end)? {
            Some(region) => regions.regions[region].local_variable_types.push(idx),
            None => log::warn!("Dropping local variable type range crossing a subroutine boundary"),
        }
    }

    Ok(regions)
}

/// Capture the subroutine starting at node `start`, along with any nested in it
///
/// Returns the position right after the subroutine's `ret`.
fn capture_region(
    body: &MethodBody,
    regions: &mut Regions,
    entry_at: &HashMap<usize, SynLabel>,
    entry: SynLabel,
    start: usize,
) -> Result<usize, SubroutineError> {
    let id = regions.regions.len();
    regions.regions.push(Region::new(Some(entry), start, start));

    let mut idx = start;
    loop {
        let node = body
            .nodes
            .get(idx)
            .ok_or(SubroutineError::NoReturn(entry))?;
        if idx != start {
            if let Some(nested) = entry_at.get(&idx) {
                idx = capture_region(body, regions, entry_at, *nested, idx)?;
                continue;
            }
        }
        regions.owner[idx] = id;
        idx += 1;
        if let Node::Branch(BranchInstruction::Ret(_)) = node {
            break;
        }
    }

    regions.regions[id].end = idx;
    Ok(idx)
}

/// Nesting depth and instruction count of a region once everything it calls is inlined
///
/// Entries of `sizes` are `Some(None)` while the region is being visited.
fn expanded_size(
    regions: &[Region],
    region: RegionId,
    sizes: &mut Vec<Option<Option<(usize, usize)>>>,
) -> Result<(usize, usize), SubroutineError> {
    match sizes[region] {
        Some(Some(size)) => return Ok(size),
        Some(None) => {
            if let Some(entry) = regions[region].entry {
                return Err(SubroutineError::Recursive(entry));
            }
        }
        None => (),
    }
    sizes[region] = Some(None);

    let mut depth = 0;
    let mut instructions = regions[region].instructions;
    for callee in &regions[region].calls {
        let (callee_depth, callee_instructions) = expanded_size(regions, *callee, sizes)?;
        depth = depth.max(callee_depth + 1);

        // `jsr` turns into `aconst_null` and `ret` into `goto`, so the count carries over
        instructions = instructions.saturating_add(callee_instructions);
    }

    sizes[region] = Some(Some((depth, instructions)));
    Ok((depth, instructions))
}

/// One copy of a region being emitted, with the labels it has renamed
struct Instance<'p> {
    mapping: HashMap<SynLabel, SynLabel>,
    parent: Option<&'p Instance<'p>>,
}

impl Instance<'static> {
    fn outer() -> Instance<'static> {
        Instance {
            mapping: HashMap::new(),
            parent: None,
        }
    }
}

impl<'p> Instance<'p> {
    /// Find the label that stands in for `label` in this copy
    fn map(&self, label: SynLabel) -> SynLabel {
        let mut instance = Some(self);
        while let Some(current) = instance {
            if let Some(mapped) = current.mapping.get(&label) {
                return *mapped;
            }
            instance = current.parent;
        }
        label
    }
}

struct Inliner<'a> {
    body: &'a MethodBody,
    regions: &'a Regions,

    labels: SynLabelGenerator,
    nodes: Vec<Node>,
    handlers: Vec<Handler>,
    local_variables: Vec<LocalVariableRange>,
    local_variable_types: Vec<LocalVariableRange>,
    copies: usize,
}

impl<'a> Inliner<'a> {
    /// Emit a copy of a region
    ///
    /// `continuation` is where `ret` should go (only for subroutine regions).
    fn copy_region(
        &mut self,
        id: RegionId,
        instance: &Instance,
        continuation: Option<SynLabel>,
    ) -> Result<(), SubroutineError> {
        let body = self.body;
        let regions = self.regions;
        let region = &regions.regions[id];

        for idx in region.start..region.end {
            let node = &body.nodes[idx];
            if regions.owner[idx] != id && !matches!(node, Node::Label(_)) {
                continue;
            }
            match node {
                Node::Label(label) => self.nodes.push(Node::Label(instance.map(*label))),
                Node::Line(line) => self.nodes.push(Node::Line(*line)),
                Node::Insn(insn) => self.nodes.push(Node::Insn(insn.clone())),
                Node::Branch(BranchInstruction::Jsr(target)) => {
                    let callee = regions.owner_of(*target)?;
                    let mapping = regions.regions[callee]
                        .labels
                        .iter()
                        .map(|label| (*label, self.labels.fresh_label()))
                        .collect();
                    let child = Instance {
                        mapping,
                        parent: Some(instance),
                    };
                    let after_call = self.labels.fresh_label();

                    self.copies += 1;
                    self.nodes.push(Node::Insn(Instruction::AConstNull));
                    self.copy_region(callee, &child, Some(after_call))?;
                    self.nodes.push(Node::Label(after_call));
                }
                Node::Branch(BranchInstruction::Ret(_)) => {
                    let instruction = self.nodes.iter().filter(|n| n.is_instruction()).count();
                    let after_call =
                        continuation.ok_or(SubroutineError::RetOutsideSubroutine(instruction))?;
                    self.nodes
                        .push(Node::Branch(BranchInstruction::Goto(after_call)));
                }
                Node::Branch(branch) => {
                    let branch = branch
                        .map_labels(|label| Ok::<_, Infallible>(instance.map(*label)))
                        .unwrap_or_else(|never| match never {});
                    self.nodes.push(Node::Branch(branch));
                }
            }
        }

        // Ranges ending right after a subroutine end right after its copy
        let mut copy_end = None;
        for idx in &region.handlers {
            let handler = &body.handlers[*idx];
            let end = self.map_end(id, instance, &mut copy_end, handler.end);
            self.handlers.push(Handler {
                start: instance.map(handler.start),
                end,
                handler: instance.map(handler.handler),
                catch_type: handler.catch_type,
            });
        }
        for idx in &region.local_variables {
            let range = &body.local_variables[*idx];
            let copied = LocalVariableRange {
                start: instance.map(range.start),
                end: self.map_end(id, instance, &mut copy_end, range.end),
                ..range.clone()
            };
            self.local_variables.push(copied);
        }
        for idx in &region.local_variable_types {
            let range = &body.local_variable_types[*idx];
            let copied = LocalVariableRange {
                start: instance.map(range.start),
                end: self.map_end(id, instance, &mut copy_end, range.end),
                ..range.clone()
            };
            self.local_variable_types.push(copied);
        }

        Ok(())
    }

    fn map_end(
        &mut self,
        id: RegionId,
        instance: &Instance,
        copy_end: &mut Option<SynLabel>,
        label: SynLabel,
    ) -> SynLabel {
        if id == OUTER || instance.mapping.contains_key(&label) {
            return instance.map(label);
        }
        *copy_end.get_or_insert_with(|| {
            let end = self.labels.fresh_label();
            self.nodes.push(Node::Label(end));
            end
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{ClassConstantIndex, ConstantIndex, Utf8ConstantIndex};

    const LIMITS: InliningLimits = InliningLimits {
        max_depth: 16,
        max_instructions: 65535,
    };

    fn body(nodes: Vec<Node>, labels: SynLabelGenerator) -> MethodBody {
        MethodBody {
            max_stack: 2,
            max_locals: 2,
            nodes,
            handlers: vec![],
            local_variables: vec![],
            local_variable_types: vec![],
            attributes: vec![],
            labels,
        }
    }

    fn count(body: &MethodBody, pred: impl Fn(&Node) -> bool) -> usize {
        body.nodes.iter().filter(|node| pred(node)).count()
    }

    /// `finally`-style body: three call sites of one subroutine
    fn three_calls() -> (MethodBody, SynLabel) {
        let mut labels = SynLabelGenerator::new();
        let sub = labels.fresh_label();
        let skip = labels.fresh_label();
        let nodes = vec![
            Node::Branch(BranchInstruction::Jsr(sub)),
            Node::Branch(BranchInstruction::Jsr(sub)),
            Node::Branch(BranchInstruction::Jsr(sub)),
            Node::Branch(BranchInstruction::Return),
            Node::Label(sub),
            Node::Line(7),
            Node::Insn(Instruction::AStore(1)),
            Node::Insn(Instruction::ILoad(0)),
            Node::Branch(BranchInstruction::If(
                crate::jvm::code::OrdComparison::EQ,
                skip,
            )),
            Node::Insn(Instruction::Nop),
            Node::Label(skip),
            Node::Branch(BranchInstruction::Ret(1)),
        ];
        (body(nodes, labels), sub)
    }

    #[test]
    fn every_call_site_gets_a_copy() {
        let (mut body, _) = three_calls();
        let copies = inline_subroutines(&mut body, &LIMITS).unwrap();
        assert_eq!(copies, 3);

        assert!(!has_subroutines(&body));
        assert_eq!(count(&body, |n| *n == Node::Insn(Instruction::AConstNull)), 3);
        assert_eq!(count(&body, |n| *n == Node::Insn(Instruction::AStore(1))), 3);
        assert_eq!(count(&body, |n| *n == Node::Line(7)), 3);

        // Labels are fresh for each copy, and everything referenced is placed once
        body.check_labels().unwrap();
        let branch_targets: Vec<SynLabel> = body
            .nodes
            .iter()
            .filter_map(|node| match node {
                Node::Branch(BranchInstruction::If(_, target)) => Some(*target),
                _ => None,
            })
            .collect();
        assert_eq!(branch_targets.len(), 3);
        assert_ne!(branch_targets[0], branch_targets[1]);
        assert_ne!(branch_targets[1], branch_targets[2]);

        // Original subroutine body is gone: 3 * (aconst_null + 5 instructions) + return
        assert_eq!(body.instruction_count(), 19);
    }

    #[test]
    fn no_subroutines_is_untouched() {
        let mut labels = SynLabelGenerator::new();
        let target = labels.fresh_label();
        let nodes = vec![
            Node::Label(target),
            Node::Branch(BranchInstruction::Goto(target)),
        ];
        let mut original = body(nodes, labels);
        let expected = original.nodes.clone();
        assert_eq!(inline_subroutines(&mut original, &LIMITS).unwrap(), 0);
        assert_eq!(original.nodes, expected);
    }

    #[test]
    fn handlers_inside_subroutines_are_copied() {
        let (mut body, sub) = three_calls();
        let end = body.labels.fresh_label();
        let handler = body.labels.fresh_label();

        // Protect the subroutine body up to its end, handler lives in the outer region
        body.nodes.push(Node::Label(end));
        body.nodes.push(Node::Label(handler));
        body.nodes.push(Node::Insn(Instruction::Pop));
        body.nodes.push(Node::Branch(BranchInstruction::Return));

        body.handlers.push(Handler {
            start: sub,
            end,
            handler,
            catch_type: None,
        });
        assert!(matches!(
            inline_subroutines(&mut body.clone(), &LIMITS),
            Err(SubroutineError::HandlerCrossesRegion(l)) if l == handler
        ));

        // Debug range over the subroutine gets one copy per call site
        body.handlers.clear();
        body.local_variables.push(LocalVariableRange {
            start: sub,
            end,
            name_index: Utf8ConstantIndex(ConstantIndex(1)),
            descriptor_index: Utf8ConstantIndex(ConstantIndex(2)),
            index: 1,
        });
        inline_subroutines(&mut body, &LIMITS).unwrap();
        assert_eq!(body.local_variables.len(), 3);
        body.check_labels().unwrap();
        let positions = body.label_positions().unwrap();
        for range in &body.local_variables {
            assert!(positions[&range.start] < positions[&range.end]);
        }
    }

    #[test]
    fn catch_type_is_preserved() {
        let mut labels = SynLabelGenerator::new();
        let sub = labels.fresh_label();
        let start = labels.fresh_label();
        let end = labels.fresh_label();
        let catcher = labels.fresh_label();
        let after = labels.fresh_label();
        let throwable = ClassConstantIndex(ConstantIndex(3));
        let nodes = vec![
            Node::Label(start),
            Node::Branch(BranchInstruction::Jsr(sub)),
            Node::Label(end),
            Node::Branch(BranchInstruction::Goto(after)),
            Node::Label(catcher),
            Node::Insn(Instruction::Pop),
            Node::Label(after),
            Node::Branch(BranchInstruction::Return),
            Node::Label(sub),
            Node::Insn(Instruction::AStore(1)),
            Node::Branch(BranchInstruction::Ret(1)),
        ];
        let mut body = body(nodes, labels);
        body.handlers.push(Handler {
            start,
            end,
            handler: catcher,
            catch_type: Some(throwable),
        });

        assert_eq!(inline_subroutines(&mut body, &LIMITS).unwrap(), 1);
        assert_eq!(body.handlers.len(), 1);
        assert_eq!(body.handlers[0].catch_type, Some(throwable));
        body.check_labels().unwrap();
    }

    #[test]
    fn nested_subroutines() {
        let mut labels = SynLabelGenerator::new();
        let outer = labels.fresh_label();
        let inner = labels.fresh_label();
        let nodes = vec![
            Node::Branch(BranchInstruction::Jsr(outer)),
            Node::Branch(BranchInstruction::Jsr(outer)),
            Node::Branch(BranchInstruction::Return),
            Node::Label(outer),
            Node::Insn(Instruction::AStore(1)),
            Node::Branch(BranchInstruction::Jsr(inner)),
            Node::Branch(BranchInstruction::Jsr(inner)),
            Node::Branch(BranchInstruction::Ret(1)),
            Node::Label(inner),
            Node::Insn(Instruction::AStore(2)),
            Node::Branch(BranchInstruction::Ret(2)),
        ];
        let mut nested = body(nodes, labels);

        let shallow = InliningLimits {
            max_depth: 1,
            ..LIMITS
        };
        assert!(matches!(
            inline_subroutines(&mut nested.clone(), &shallow),
            Err(SubroutineError::InliningLimitExceeded { depth: 2, .. })
        ));
        let small = InliningLimits {
            max_instructions: 10,
            ..LIMITS
        };
        assert!(matches!(
            inline_subroutines(&mut nested.clone(), &small),
            Err(SubroutineError::InliningLimitExceeded { instructions: 19, .. })
        ));

        // 2 copies of `outer`, each with 2 copies of `inner`
        assert_eq!(inline_subroutines(&mut nested, &LIMITS).unwrap(), 6);
        assert_eq!(nested.instruction_count(), 19);
        assert!(!has_subroutines(&nested));
        nested.check_labels().unwrap();
    }

    /// `finally` nested in a `finally`: the inner subroutine sits between the outer one's entry
    /// and its `ret`
    #[test]
    fn physically_nested_subroutines() {
        let mut labels = SynLabelGenerator::new();
        let outer = labels.fresh_label();
        let inner = labels.fresh_label();
        let after = labels.fresh_label();
        let nodes = vec![
            Node::Branch(BranchInstruction::Jsr(outer)),
            Node::Branch(BranchInstruction::Return),
            Node::Label(outer),
            Node::Insn(Instruction::AStore(1)),
            Node::Branch(BranchInstruction::Jsr(inner)),
            Node::Branch(BranchInstruction::Goto(after)),
            Node::Label(inner),
            Node::Insn(Instruction::AStore(2)),
            Node::Branch(BranchInstruction::Ret(2)),
            Node::Label(after),
            Node::Branch(BranchInstruction::Ret(1)),
        ];
        let mut nested = body(nodes, labels);

        assert_eq!(inline_subroutines(&mut nested, &LIMITS).unwrap(), 2);
        assert!(!has_subroutines(&nested));
        nested.check_labels().unwrap();
        assert_eq!(count(&nested, |n| *n == Node::Insn(Instruction::AStore(1))), 1);
        assert_eq!(count(&nested, |n| *n == Node::Insn(Instruction::AStore(2))), 1);

        // aconst_null, astore_1, aconst_null, astore_2, 3 gotos, return
        assert_eq!(nested.instruction_count(), 8);
    }

    /// Ranges covering the whole method survive when a subroutine is the last code in it
    #[test]
    fn method_wide_locals_are_kept() {
        let mut labels = SynLabelGenerator::new();
        let start = labels.fresh_label();
        let sub = labels.fresh_label();
        let end = labels.fresh_label();
        let nodes = vec![
            Node::Label(start),
            Node::Branch(BranchInstruction::Jsr(sub)),
            Node::Branch(BranchInstruction::Return),
            Node::Label(sub),
            Node::Insn(Instruction::AStore(1)),
            Node::Branch(BranchInstruction::Ret(1)),
            Node::Label(end),
        ];
        let mut body = body(nodes, labels);
        body.local_variables.push(LocalVariableRange {
            start,
            end,
            name_index: Utf8ConstantIndex(ConstantIndex(1)),
            descriptor_index: Utf8ConstantIndex(ConstantIndex(2)),
            index: 0,
        });

        assert_eq!(inline_subroutines(&mut body, &LIMITS).unwrap(), 1);
        assert_eq!(body.local_variables.len(), 1);
        body.check_labels().unwrap();
        let positions = body.label_positions().unwrap();
        let range = &body.local_variables[0];
        assert_eq!(positions[&range.start], 0);
        assert_eq!(positions[&range.end], body.nodes.len() - 1);
    }

    #[test]
    fn malformed_subroutines() {
        let mut labels = SynLabelGenerator::new();
        let sub = labels.fresh_label();
        let recursive = body(
            vec![
                Node::Branch(BranchInstruction::Jsr(sub)),
                Node::Branch(BranchInstruction::Return),
                Node::Label(sub),
                Node::Insn(Instruction::AStore(1)),
                Node::Branch(BranchInstruction::Jsr(sub)),
                Node::Branch(BranchInstruction::Ret(1)),
            ],
            labels.clone(),
        );
        assert!(matches!(
            inline_subroutines(&mut recursive.clone(), &LIMITS),
            Err(SubroutineError::Recursive(l)) if l == sub
        ));

        let stray_ret = body(
            vec![
                Node::Branch(BranchInstruction::Jsr(sub)),
                Node::Branch(BranchInstruction::Ret(1)),
                Node::Label(sub),
                Node::Insn(Instruction::AStore(1)),
                Node::Branch(BranchInstruction::Ret(1)),
            ],
            labels.clone(),
        );
        assert!(matches!(
            inline_subroutines(&mut stray_ret.clone(), &LIMITS),
            Err(SubroutineError::RetOutsideSubroutine(1))
        ));

        let no_return = body(
            vec![
                Node::Branch(BranchInstruction::Jsr(sub)),
                Node::Branch(BranchInstruction::Return),
                Node::Label(sub),
                Node::Insn(Instruction::AStore(1)),
                Node::Branch(BranchInstruction::Return),
            ],
            labels.clone(),
        );
        assert!(matches!(
            inline_subroutines(&mut no_return.clone(), &LIMITS),
            Err(SubroutineError::NoReturn(l)) if l == sub
        ));

        let falls_in = body(
            vec![
                Node::Branch(BranchInstruction::Jsr(sub)),
                Node::Insn(Instruction::Nop),
                Node::Label(sub),
                Node::Insn(Instruction::AStore(1)),
                Node::Branch(BranchInstruction::Ret(1)),
            ],
            labels,
        );
        assert!(matches!(
            inline_subroutines(&mut falls_in.clone(), &LIMITS),
            Err(SubroutineError::EnteredFromOutside(l)) if l == sub
        ));
    }
}
