use crate::jvm::class_file::{Attribute, ClassConstantIndex, Utf8ConstantIndex};
use crate::jvm::code::{BranchInstruction, Instruction, SynLabel, SynLabelGenerator};
use crate::jvm::Error;
use std::collections::HashMap;

/// One entry in the linear representation of a method body
///
/// Labels and line markers take up no space in the encoded bytecode: they attach to whatever
/// instruction comes after them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// Program point that branches, exception handlers, or debug ranges refer to
    Label(SynLabel),

    /// Start of the code for a source line
    Line(u16),

    /// Straight-line instruction
    Insn(Instruction),

    /// Instruction that may transfer control somewhere other than the next instruction
    Branch(BranchInstruction<SynLabel>),
}

impl Node {
    /// Is this a real instruction (as opposed to a label or line marker)?
    pub fn is_instruction(&self) -> bool {
        matches!(self, Node::Insn(_) | Node::Branch(_))
    }
}

/// Entry of the exception table, addressed by labels
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handler {
    /// Start of the protected range (inclusive)
    pub start: SynLabel,

    /// End of the protected range (exclusive)
    pub end: SynLabel,

    /// Start of the handler code
    pub handler: SynLabel,

    /// Type of exception caught (`None` catches everything)
    pub catch_type: Option<ClassConstantIndex>,
}

/// Entry of a `LocalVariableTable` or `LocalVariableTypeTable`, addressed by labels
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariableRange {
    pub start: SynLabel,
    pub end: SynLabel,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub index: u16,
}

/// Method body where all code references have been replaced with labels
///
/// This is what gets rewritten: instructions can be added, removed, or duplicated without having
/// to worry about offsets. Offsets only get recomputed when the body is encoded back into a
/// [`crate::jvm::class_file::Code`] attribute.
#[derive(Clone, Debug)]
pub struct MethodBody {
    /// Declared maximum size of the operand stack
    pub max_stack: u16,

    /// Declared maximum size of the locals
    pub max_locals: u16,

    /// Labels, line markers, and instructions in code order
    pub nodes: Vec<Node>,

    /// Exception handlers, in order of priority
    pub handlers: Vec<Handler>,

    pub local_variables: Vec<LocalVariableRange>,
    pub local_variable_types: Vec<LocalVariableRange>,

    /// Other attributes of the `Code` attribute, kept as-is
    pub attributes: Vec<Attribute>,

    /// Generator for labels that are not yet used anywhere in the body
    pub labels: SynLabelGenerator,
}

impl MethodBody {
    /// Number of real instructions in the body
    pub fn instruction_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_instruction()).count()
    }

    /// Position of every label in `nodes`
    pub fn label_positions(&self) -> Result<HashMap<SynLabel, usize>, Error> {
        let mut positions = HashMap::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Node::Label(label) = node {
                if positions.insert(*label, idx).is_some() {
                    return Err(Error::DuplicateLabel(*label));
                }
            }
        }
        Ok(positions)
    }

    /// Every label mentioned by something other than its own placement
    pub fn referenced_labels(&self) -> Vec<SynLabel> {
        let mut labels = vec![];
        for node in &self.nodes {
            if let Node::Branch(branch) = node {
                labels.extend(branch.jump_targets().targets().iter().map(|lbl| **lbl));
            }
        }
        for handler in &self.handlers {
            labels.extend([handler.start, handler.end, handler.handler]);
        }
        for range in self.local_variables.iter().chain(&self.local_variable_types) {
            labels.extend([range.start, range.end]);
        }
        labels
    }

    /// Make sure every `new` instruction comes right after a label
    ///
    /// Uninitialized objects are identified by the label of the `new` that created them, so this
    /// must run before inferring types.
    pub fn label_allocations(&mut self) {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for node in self.nodes.drain(..) {
            if let Node::Insn(Instruction::New(_)) = node {
                if !matches!(nodes.last(), Some(Node::Label(_))) {
                    nodes.push(Node::Label(self.labels.fresh_label()));
                }
            }
            nodes.push(node);
        }
        self.nodes = nodes;
    }

    /// Check that every referenced label is placed exactly once
    pub fn check_labels(&self) -> Result<(), Error> {
        let positions = self.label_positions()?;
        for label in self.referenced_labels() {
            if !positions.contains_key(&label) {
                return Err(Error::UnplacedLabel(label));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unplaced_and_duplicate_labels() {
        let mut labels = SynLabelGenerator::new();
        let l0 = labels.fresh_label();
        let l1 = labels.fresh_label();
        let mut body = MethodBody {
            max_stack: 0,
            max_locals: 0,
            nodes: vec![
                Node::Label(l0),
                Node::Branch(BranchInstruction::Goto(l1)),
            ],
            handlers: vec![],
            local_variables: vec![],
            local_variable_types: vec![],
            attributes: vec![],
            labels,
        };
        assert!(matches!(body.check_labels(), Err(Error::UnplacedLabel(l)) if l == l1));

        body.nodes.push(Node::Label(l1));
        body.nodes.push(Node::Label(l0));
        assert!(matches!(body.check_labels(), Err(Error::DuplicateLabel(l)) if l == l0));

        body.nodes.pop();
        assert!(body.check_labels().is_ok());
        assert_eq!(body.instruction_count(), 1);
    }

    #[test]
    fn allocations_get_labels() {
        let mut labels = SynLabelGenerator::new();
        let existing = labels.fresh_label();
        let class = ClassConstantIndex(crate::jvm::class_file::ConstantIndex(1));
        let mut body = MethodBody {
            max_stack: 2,
            max_locals: 0,
            nodes: vec![
                Node::Insn(Instruction::New(class)),
                Node::Insn(Instruction::Pop),
                Node::Label(existing),
                Node::Insn(Instruction::New(class)),
                Node::Insn(Instruction::Pop),
                Node::Branch(BranchInstruction::Return),
            ],
            handlers: vec![],
            local_variables: vec![],
            local_variable_types: vec![],
            attributes: vec![],
            labels,
        };
        body.label_allocations();

        assert_eq!(body.nodes.len(), 7);
        assert!(matches!(body.nodes[0], Node::Label(l) if l != existing));
        assert_eq!(body.nodes[3], Node::Label(existing));
        assert_eq!(body.labels.issued(), 2);
    }
}
