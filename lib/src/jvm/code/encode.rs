//! Layout and encoding of a [`MethodBody`] back into a `Code` attribute
//!
//! ### Jump widening
//!
//! Rewriting a method (eg. inlining subroutines) can push a jump target out of range of the
//! signed 16-bit offset that `goto` and `jsr` use. Those instructions have a wide form (`goto_w`,
//! `jsr_w`) with a 32-bit offset, so layout is iterated: compute offsets, switch every jump that no
//! longer fits to its wide form, repeat until nothing changes. This terminates since a jump that
//! has been widened never goes back to the narrow form.
//!
//! Conditional branches have no wide form. If one of those doesn't fit, encoding fails.

use crate::jvm::class_file::{
    Attribute, BytecodeArray, BytecodeIndex, Code, ConstantsPool, ExceptionHandler, LineNumber,
    LineNumberTable, LocalVariable, LocalVariableTable, LocalVariableTypeTable, Serialize,
};
use crate::jvm::code::{
    switch_padding, BranchInstruction, EqComparison, LocalVariableRange, MethodBody, Node,
    OrdComparison, SynLabel, WIDE,
};
use crate::jvm::Error;
use crate::util::{Offset, Width};
use std::collections::{HashMap, HashSet};
use std::convert::TryFrom;

/// Largest code array a method may have
pub const MAX_CODE_LENGTH: usize = 65535;

/// Offsets assigned to a method body
#[derive(Debug, Clone)]
pub struct Layout {
    /// Offset of every node (labels and line markers get the offset of the next instruction),
    /// followed by the total code length
    node_offsets: Vec<usize>,

    label_offsets: HashMap<SynLabel, usize>,

    /// Indices of `goto`/`jsr` nodes which need the wide encoding
    wide_jumps: HashSet<usize>,
}

impl Layout {
    pub fn code_length(&self) -> usize {
        self.node_offsets.last().copied().unwrap_or(0)
    }

    /// Offset of the node at a given position in the body
    pub fn node_offset(&self, node_index: usize) -> usize {
        self.node_offsets[node_index]
    }

    pub fn label_offset(&self, label: SynLabel) -> Result<usize, Error> {
        self.label_offsets
            .get(&label)
            .copied()
            .ok_or(Error::UnplacedLabel(label))
    }
}

impl MethodBody {
    /// Assign offsets to every node, widening jumps as needed
    pub fn layout(&self) -> Result<Layout, Error> {
        self.check_labels()?;
        let label_positions = self.label_positions()?;

        let mut wide_jumps: HashSet<usize> = HashSet::new();
        loop {
            let node_offsets = self.node_offsets(&wide_jumps);
            let target_offset = |label: &SynLabel| node_offsets[label_positions[label]];

            let mut widened = false;
            for (idx, node) in self.nodes.iter().enumerate() {
                if let Node::Branch(BranchInstruction::Goto(target) | BranchInstruction::Jsr(target)) =
                    node
                {
                    if !wide_jumps.contains(&idx)
                        && !fits_in_i16(node_offsets[idx], target_offset(target))
                    {
                        wide_jumps.insert(idx);
                        widened = true;
                    }
                }
            }
            if widened {
                continue;
            }

            for (idx, node) in self.nodes.iter().enumerate() {
                if let Node::Branch(branch) = node {
                    if branch.is_conditional() {
                        for target in branch.jump_targets().targets() {
                            if !fits_in_i16(node_offsets[idx], target_offset(target)) {
                                return Err(Error::BranchOffsetOverflow(**target));
                            }
                        }
                    }
                }
            }

            let code_length = node_offsets.last().copied().unwrap_or(0);
            if code_length > MAX_CODE_LENGTH {
                return Err(Error::MethodCodeOverflow(Offset(code_length)));
            }
            if !wide_jumps.is_empty() {
                log::debug!("Widened {} jumps to their 32-bit form", wide_jumps.len());
            }

            let label_offsets = label_positions
                .iter()
                .map(|(label, position)| (*label, node_offsets[*position]))
                .collect();
            return Ok(Layout {
                node_offsets,
                label_offsets,
                wide_jumps,
            });
        }
    }

    /// Offsets of all nodes, given which jumps are wide
    fn node_offsets(&self, wide_jumps: &HashSet<usize>) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.nodes.len() + 1);
        let mut offset = 0;
        for (idx, node) in self.nodes.iter().enumerate() {
            offsets.push(offset);
            offset += match node {
                Node::Label(_) | Node::Line(_) => 0,
                Node::Insn(insn) => insn.width(),
                Node::Branch(branch) => branch_width(branch, offset, wide_jumps.contains(&idx)),
            };
        }
        offsets.push(offset);
        offsets
    }

    /// Encode the body using a layout previously computed with [`MethodBody::layout`]
    ///
    /// The debug tables are re-encoded at their new offsets (dropping entries whose range has
    /// become empty) and `extra_attributes` are appended after all the other attributes.
    pub fn encode(
        &self,
        layout: &Layout,
        constants: &mut ConstantsPool,
        extra_attributes: Vec<Attribute>,
    ) -> Result<Code, Error> {
        let code_length = layout.code_length();
        let mut bytes: Vec<u8> = Vec::with_capacity(code_length);
        let mut line_numbers: Vec<LineNumber> = vec![];

        for (idx, node) in self.nodes.iter().enumerate() {
            let offset = layout.node_offset(idx);
            debug_assert_eq!(offset, bytes.len());
            match node {
                Node::Label(_) => (),
                Node::Line(line_number) => {
                    if offset < code_length {
                        line_numbers.push(LineNumber {
                            start_pc: BytecodeIndex(offset as u16),
                            line_number: *line_number,
                        });
                    }
                }
                Node::Insn(insn) => insn.serialize(&mut bytes)?,
                Node::Branch(branch) => {
                    let wide = layout.wide_jumps.contains(&idx);
                    let branch = branch.map_labels(|label| {
                        let target = layout.label_offset(*label)?;
                        Ok::<_, Error>(target as i64 - offset as i64)
                    })?;
                    serialize_branch(&branch, offset, wide, &mut bytes)?;
                }
            }
        }

        let mut exception_table = vec![];
        for handler in &self.handlers {
            let start = layout.label_offset(handler.start)?;
            let end = layout.label_offset(handler.end)?;
            if start >= end {
                log::warn!("Dropping exception handler with empty range at {}", start);
                continue;
            }
            exception_table.push(ExceptionHandler {
                start_pc: BytecodeIndex(start as u16),
                end_pc: BytecodeIndex(end as u16),
                handler_pc: BytecodeIndex(layout.label_offset(handler.handler)? as u16),
                catch_type: handler.catch_type,
            });
        }

        let mut attributes = self.attributes.clone();
        if !line_numbers.is_empty() {
            attributes.push(constants.get_attribute(&LineNumberTable(line_numbers))?);
        }
        let local_variables = encode_ranges(&self.local_variables, layout)?;
        if !local_variables.is_empty() {
            attributes.push(constants.get_attribute(&LocalVariableTable(local_variables))?);
        }
        let local_variable_types = encode_ranges(&self.local_variable_types, layout)?;
        if !local_variable_types.is_empty() {
            attributes.push(constants.get_attribute(&LocalVariableTypeTable(local_variable_types))?);
        }
        attributes.extend(extra_attributes);

        Ok(Code {
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            code_array: BytecodeArray(bytes),
            exception_table,
            attributes,
        })
    }
}

fn encode_ranges(ranges: &[LocalVariableRange], layout: &Layout) -> Result<Vec<LocalVariable>, Error> {
    let mut entries = vec![];
    for range in ranges {
        let start = layout.label_offset(range.start)?;
        let end = layout.label_offset(range.end)?;
        if start < end {
            entries.push(LocalVariable {
                start_pc: BytecodeIndex(start as u16),
                length: (end - start) as u16,
                name_index: range.name_index,
                descriptor_index: range.descriptor_index,
                index: range.index,
            });
        }
    }
    Ok(entries)
}

fn fits_in_i16(from: usize, to: usize) -> bool {
    i16::try_from(to as i64 - from as i64).is_ok()
}

/// Width of a branch instruction located at `offset`
fn branch_width<Lbl>(branch: &BranchInstruction<Lbl>, offset: usize, wide: bool) -> usize {
    match branch {
        BranchInstruction::IReturn
        | BranchInstruction::LReturn
        | BranchInstruction::FReturn
        | BranchInstruction::DReturn
        | BranchInstruction::AReturn
        | BranchInstruction::Return
        | BranchInstruction::AThrow => 1,

        BranchInstruction::If(_, _)
        | BranchInstruction::IfICmp(_, _)
        | BranchInstruction::IfACmp(_, _)
        | BranchInstruction::IfNull(_, _) => 3,

        BranchInstruction::Goto(_) | BranchInstruction::Jsr(_) => {
            if wide {
                5
            } else {
                3
            }
        }

        BranchInstruction::Ret(0..=255) => 2,
        BranchInstruction::Ret(_) => 4,

        BranchInstruction::TableSwitch { targets, .. } => {
            1 + switch_padding(offset) + 4 * (3 + targets.len())
        }

        BranchInstruction::LookupSwitch { targets, .. } => {
            1 + switch_padding(offset) + 8 * (1 + targets.len())
        }
    }
}

/// Serialize a branch whose targets have been resolved into relative offsets
fn serialize_branch(
    branch: &BranchInstruction<i64>,
    offset: usize,
    wide: bool,
    writer: &mut Vec<u8>,
) -> Result<(), Error> {
    // Only reachable if the layout was computed for a different body
    let short = |relative: i64| -> Result<i16, Error> {
        i16::try_from(relative).map_err(|_| Error::MethodCodeOverflow(Offset(offset)))
    };
    let long = |relative: i64| -> Result<i32, Error> {
        i32::try_from(relative).map_err(|_| Error::MethodCodeOverflow(Offset(offset)))
    };

    match branch {
        BranchInstruction::If(comp, target) => {
            let opcode: u8 = match comp {
                OrdComparison::EQ => 0x99,
                OrdComparison::NE => 0x9a,
                OrdComparison::LT => 0x9b,
                OrdComparison::GE => 0x9c,
                OrdComparison::GT => 0x9d,
                OrdComparison::LE => 0x9e,
            };
            opcode.serialize(writer)?;
            short(*target)?.serialize(writer)?;
        }
        BranchInstruction::IfICmp(comp, target) => {
            let opcode: u8 = match comp {
                OrdComparison::EQ => 0x9f,
                OrdComparison::NE => 0xa0,
                OrdComparison::LT => 0xa1,
                OrdComparison::GE => 0xa2,
                OrdComparison::GT => 0xa3,
                OrdComparison::LE => 0xa4,
            };
            opcode.serialize(writer)?;
            short(*target)?.serialize(writer)?;
        }
        BranchInstruction::IfACmp(comp, target) => {
            let opcode: u8 = match comp {
                EqComparison::EQ => 0xa5,
                EqComparison::NE => 0xa6,
            };
            opcode.serialize(writer)?;
            short(*target)?.serialize(writer)?;
        }
        BranchInstruction::IfNull(comp, target) => {
            let opcode: u8 = match comp {
                EqComparison::EQ => 0xc6,
                EqComparison::NE => 0xc7,
            };
            opcode.serialize(writer)?;
            short(*target)?.serialize(writer)?;
        }
        BranchInstruction::Goto(target) if wide => {
            0xc8u8.serialize(writer)?;
            long(*target)?.serialize(writer)?;
        }
        BranchInstruction::Goto(target) => {
            0xa7u8.serialize(writer)?;
            short(*target)?.serialize(writer)?;
        }
        BranchInstruction::Jsr(target) if wide => {
            0xc9u8.serialize(writer)?;
            long(*target)?.serialize(writer)?;
        }
        BranchInstruction::Jsr(target) => {
            0xa8u8.serialize(writer)?;
            short(*target)?.serialize(writer)?;
        }
        BranchInstruction::Ret(idx) => match u8::try_from(*idx) {
            Ok(idx) => {
                0xa9u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Err(_) => {
                WIDE.serialize(writer)?;
                0xa9u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
        },
        BranchInstruction::TableSwitch {
            default,
            low,
            targets,
        } => {
            0xaau8.serialize(writer)?;
            for _ in 0..switch_padding(offset) {
                0x00u8.serialize(writer)?;
            }
            long(*default)?.serialize(writer)?;
            low.serialize(writer)?;
            (low + targets.len() as i32 - 1).serialize(writer)?;
            for target in targets {
                long(*target)?.serialize(writer)?;
            }
        }
        BranchInstruction::LookupSwitch { default, targets } => {
            0xabu8.serialize(writer)?;
            for _ in 0..switch_padding(offset) {
                0x00u8.serialize(writer)?;
            }
            long(*default)?.serialize(writer)?;
            (targets.len() as i32).serialize(writer)?;
            for (key, target) in targets {
                key.serialize(writer)?;
                long(*target)?.serialize(writer)?;
            }
        }
        BranchInstruction::IReturn => 0xacu8.serialize(writer)?,
        BranchInstruction::LReturn => 0xadu8.serialize(writer)?,
        BranchInstruction::FReturn => 0xaeu8.serialize(writer)?,
        BranchInstruction::DReturn => 0xafu8.serialize(writer)?,
        BranchInstruction::AReturn => 0xb0u8.serialize(writer)?,
        BranchInstruction::Return => 0xb1u8.serialize(writer)?,
        BranchInstruction::AThrow => 0xbfu8.serialize(writer)?,
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ExceptionHandler;
    use crate::jvm::code::{Handler, Instruction, SynLabelGenerator};

    fn body(nodes: Vec<Node>, labels: SynLabelGenerator) -> MethodBody {
        MethodBody {
            max_stack: 1,
            max_locals: 1,
            nodes,
            handlers: vec![],
            local_variables: vec![],
            local_variable_types: vec![],
            attributes: vec![],
            labels,
        }
    }

    fn encode(body: &MethodBody) -> Result<Code, Error> {
        let layout = body.layout()?;
        body.encode(&layout, &mut ConstantsPool::new(), vec![])
    }

    #[test]
    fn decode_encode_round_trip() {
        let mut constants = ConstantsPool::new();
        let code = Code {
            max_stack: 2,
            max_locals: 1,
            // iload_0; tableswitch { 0 => L, default => L }; L: iconst_0; ireturn + handler
            code_array: BytecodeArray({
                let mut bytes = vec![0x1a, 0xaa, 0, 0];
                for word in [19i32, 0, 0, 19] {
                    bytes.extend_from_slice(&word.to_be_bytes());
                }
                bytes.extend([0x03, 0xac]);
                bytes
            }),
            exception_table: vec![ExceptionHandler {
                start_pc: BytecodeIndex(0),
                end_pc: BytecodeIndex(20),
                handler_pc: BytecodeIndex(20),
                catch_type: None,
            }],
            attributes: vec![],
        };
        let body = MethodBody::decode(&code, &constants).unwrap();
        let layout = body.layout().unwrap();
        let encoded = body.encode(&layout, &mut constants, vec![]).unwrap();
        assert_eq!(encoded, code);
    }

    #[test]
    fn long_goto_is_widened() {
        let mut labels = SynLabelGenerator::new();
        let end = labels.fresh_label();
        let mut nodes = vec![Node::Branch(BranchInstruction::Goto(end))];
        nodes.extend((0..40_000).map(|_| Node::Insn(Instruction::Nop)));
        nodes.push(Node::Label(end));
        nodes.push(Node::Branch(BranchInstruction::Return));

        let code = encode(&body(nodes, labels)).unwrap();
        let bytes = &code.code_array.0;
        assert_eq!(bytes.len(), 5 + 40_000 + 1);
        assert_eq!(&bytes[0..5], &[0xc8, 0, 0, 0x9c, 0x45]);
    }

    #[test]
    fn long_conditional_branch_fails() {
        let mut labels = SynLabelGenerator::new();
        let end = labels.fresh_label();
        let mut nodes = vec![
            Node::Insn(Instruction::IConst0),
            Node::Branch(BranchInstruction::If(OrdComparison::EQ, end)),
        ];
        nodes.extend((0..40_000).map(|_| Node::Insn(Instruction::Nop)));
        nodes.push(Node::Label(end));
        nodes.push(Node::Branch(BranchInstruction::Return));

        assert!(matches!(
            encode(&body(nodes, labels)),
            Err(Error::BranchOffsetOverflow(lbl)) if lbl == end
        ));
    }

    #[test]
    fn oversized_method_fails() {
        let mut nodes: Vec<Node> = (0..70_000).map(|_| Node::Insn(Instruction::Nop)).collect();
        nodes.push(Node::Branch(BranchInstruction::Return));
        assert!(matches!(
            encode(&body(nodes, SynLabelGenerator::new())),
            Err(Error::MethodCodeOverflow(Offset(70_001)))
        ));
    }

    #[test]
    fn empty_ranges_are_dropped() {
        let mut labels = SynLabelGenerator::new();
        let start = labels.fresh_label();
        let end = labels.fresh_label();
        let mut method = body(
            vec![
                Node::Label(start),
                Node::Label(end),
                Node::Line(7),
                Node::Branch(BranchInstruction::Return),
            ],
            labels,
        );
        method.handlers.push(Handler {
            start,
            end,
            handler: end,
            catch_type: None,
        });
        let code = encode(&method).unwrap();
        assert!(code.exception_table.is_empty());
        assert_eq!(code.attributes.len(), 1);
        assert_eq!(code.code_array.0, vec![0xb1]);
    }
}
