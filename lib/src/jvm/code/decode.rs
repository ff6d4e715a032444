//! Decoding of raw bytecode into a label-addressed [`MethodBody`]

use crate::jvm::class_file::{
    Attribute, Code, ConstantsPool, LineNumberTable, LocalVariable, LocalVariableTable,
    LocalVariableTypeTable, StackMap, StackMapTable,
};
use crate::jvm::code::{
    BranchInstruction, CompareMode, EqComparison, Handler, Instruction, InvokeType,
    LocalVariableRange, MethodBody, Node, OrdComparison, ShiftType, SynLabel, SynLabelGenerator,
    WIDE,
};
use crate::jvm::{BaseType, Error, Parse};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Instruction as read from the code array, with branch targets as absolute offsets
enum Decoded {
    Insn(Instruction),
    Branch(BranchInstruction<usize>),
}

impl MethodBody {
    /// Decode a `Code` attribute
    ///
    /// Branch targets and exception table ranges must land on instruction boundaries. Debug table
    /// entries that don't are dropped (with a warning) since they have no effect on execution.
    /// Stack map attributes are dropped since they are recomputed anyway.
    pub fn decode(code: &Code, constants: &ConstantsPool) -> Result<MethodBody, Error> {
        let bytes = &code.code_array.0;
        let code_length = bytes.len();

        // Instruction stream, plus a marker for which offsets start an instruction
        let mut decoded: Vec<(usize, Decoded)> = vec![];
        let mut boundaries = vec![false; code_length + 1];
        boundaries[code_length] = true;
        let mut offset = 0;
        while offset < code_length {
            boundaries[offset] = true;
            let (insn, width) = decode_instruction(bytes, offset, constants)?;
            decoded.push((offset, insn));
            offset += width;
        }

        let is_instruction_start = |off: usize| off < code_length && boundaries[off];
        let is_range_end = |off: usize| off <= code_length && boundaries[off];

        // Every offset that needs a label, ordered so that labels are numbered by position
        let mut label_offsets: BTreeSet<usize> = BTreeSet::new();
        for (offset, insn) in &decoded {
            if let Decoded::Branch(branch) = insn {
                for target in branch.jump_targets().targets() {
                    if !is_instruction_start(**target) {
                        return Err(Error::InvalidBranchTarget {
                            offset: *offset,
                            target: **target as i64,
                        });
                    }
                    label_offsets.insert(**target);
                }
            }
        }

        for handler in &code.exception_table {
            let start = handler.start_pc.0 as usize;
            let end = handler.end_pc.0 as usize;
            let handler_pc = handler.handler_pc.0 as usize;
            if start >= end || !is_instruction_start(start) || !is_range_end(end) {
                return Err(Error::InvalidCodeRange { start, end });
            }
            if !is_instruction_start(handler_pc) {
                return Err(Error::InvalidCodeRange {
                    start: handler_pc,
                    end: handler_pc,
                });
            }
            label_offsets.extend([start, end, handler_pc]);
        }

        // Debug tables and the sub-attributes that are kept as they are
        let mut line_numbers: BTreeMap<usize, Vec<u16>> = BTreeMap::new();
        let mut local_variables: Vec<LocalVariable> = vec![];
        let mut local_variable_types: Vec<LocalVariable> = vec![];
        let mut attributes: Vec<Attribute> = vec![];
        for attribute in &code.attributes {
            if attribute.is::<LineNumberTable>(constants)? {
                for entry in attribute.decode::<LineNumberTable>()?.0 {
                    let start = entry.start_pc.0 as usize;
                    if is_instruction_start(start) {
                        line_numbers.entry(start).or_default().push(entry.line_number);
                    } else {
                        log::warn!("Dropping line number entry at invalid offset {}", start);
                    }
                }
            } else if attribute.is::<LocalVariableTable>(constants)? {
                local_variables.extend(attribute.decode::<LocalVariableTable>()?.0);
            } else if attribute.is::<LocalVariableTypeTable>(constants)? {
                local_variable_types.extend(attribute.decode::<LocalVariableTypeTable>()?.0);
            } else if attribute.is::<StackMapTable>(constants)? || attribute.is::<StackMap>(constants)? {
                log::trace!("Discarding existing {} attribute", attribute.name(constants)?);
            } else {
                attributes.push(attribute.clone());
            }
        }

        let valid_range = |entry: &LocalVariable| -> bool {
            let start = entry.start_pc.0 as usize;
            let end = start + entry.length as usize;
            let valid = is_instruction_start(start) && is_range_end(end) && start < end;
            if !valid {
                log::warn!("Dropping local variable entry with range {}..{}", start, end);
            }
            valid
        };
        local_variables.retain(&valid_range);
        local_variable_types.retain(&valid_range);
        for entry in local_variables.iter().chain(&local_variable_types) {
            let start = entry.start_pc.0 as usize;
            label_offsets.extend([start, start + entry.length as usize]);
        }

        let mut labels = SynLabelGenerator::new();
        let offset_labels: HashMap<usize, SynLabel> = label_offsets
            .into_iter()
            .map(|offset| (offset, labels.fresh_label()))
            .collect();
        let label_at = |offset: usize| offset_labels[&offset];

        let mut nodes = vec![];
        for (offset, insn) in decoded {
            if let Some(label) = offset_labels.get(&offset) {
                nodes.push(Node::Label(*label));
            }
            if let Some(lines) = line_numbers.get(&offset) {
                nodes.extend(lines.iter().map(|line| Node::Line(*line)));
            }
            nodes.push(match insn {
                Decoded::Insn(insn) => Node::Insn(insn),
                Decoded::Branch(branch) => {
                    Node::Branch(branch.map_labels(|target| Ok::<_, Error>(label_at(*target)))?)
                }
            });
        }
        if let Some(label) = offset_labels.get(&code_length) {
            nodes.push(Node::Label(*label));
        }

        let handlers = code
            .exception_table
            .iter()
            .map(|handler| Handler {
                start: label_at(handler.start_pc.0 as usize),
                end: label_at(handler.end_pc.0 as usize),
                handler: label_at(handler.handler_pc.0 as usize),
                catch_type: handler.catch_type,
            })
            .collect();
        let to_range = |entry: LocalVariable| {
            let start = entry.start_pc.0 as usize;
            LocalVariableRange {
                start: label_at(start),
                end: label_at(start + entry.length as usize),
                name_index: entry.name_index,
                descriptor_index: entry.descriptor_index,
                index: entry.index,
            }
        };

        Ok(MethodBody {
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            nodes,
            handlers,
            local_variables: local_variables.into_iter().map(&to_range).collect(),
            local_variable_types: local_variable_types.into_iter().map(&to_range).collect(),
            attributes,
            labels,
        })
    }
}

/// Decode the instruction at `offset`, returning it along with its width in bytes
fn decode_instruction(
    bytes: &[u8],
    offset: usize,
    constants: &ConstantsPool,
) -> Result<(Decoded, usize), Error> {
    let mut reader = &bytes[offset..];
    let opcode = u8::parse(&mut reader)?;

    let malformed = Error::MalformedInstruction { opcode, offset };
    let relative = |delta: i64| -> Result<usize, Error> {
        let target = offset as i64 + delta;
        if target < 0 || target >= bytes.len() as i64 {
            Err(Error::InvalidBranchTarget { offset, target })
        } else {
            Ok(target as usize)
        }
    };

    use Instruction::*;
    let insn: Decoded = match opcode {
        0x00 => Decoded::Insn(Nop),
        0x01 => Decoded::Insn(AConstNull),
        0x02 => Decoded::Insn(IConstM1),
        0x03 => Decoded::Insn(IConst0),
        0x04 => Decoded::Insn(IConst1),
        0x05 => Decoded::Insn(IConst2),
        0x06 => Decoded::Insn(IConst3),
        0x07 => Decoded::Insn(IConst4),
        0x08 => Decoded::Insn(IConst5),
        0x09 => Decoded::Insn(LConst0),
        0x0a => Decoded::Insn(LConst1),
        0x0b => Decoded::Insn(FConst0),
        0x0c => Decoded::Insn(FConst1),
        0x0d => Decoded::Insn(FConst2),
        0x0e => Decoded::Insn(DConst0),
        0x0f => Decoded::Insn(DConst1),
        0x10 => Decoded::Insn(BiPush(u8::parse(&mut reader)? as i8)),
        0x11 => Decoded::Insn(SiPush(u16::parse(&mut reader)? as i16)),
        0x12 => {
            let idx = u8::parse(&mut reader)? as u16;
            Decoded::Insn(Ldc(constants.loadable_index(idx, false)?))
        }
        0x13 => {
            let idx = u16::parse(&mut reader)?;
            Decoded::Insn(Ldc(constants.loadable_index(idx, false)?))
        }
        0x14 => {
            let idx = u16::parse(&mut reader)?;
            Decoded::Insn(Ldc2(constants.loadable_index(idx, true)?))
        }
        0x15..=0x19 => {
            let idx = u8::parse(&mut reader)? as u16;
            Decoded::Insn(local_instruction(opcode, idx).ok_or(malformed)?)
        }
        0x1a..=0x2d => {
            let kind = (opcode - 0x1a) / 4;
            let idx = ((opcode - 0x1a) % 4) as u16;
            Decoded::Insn(local_instruction(0x15 + kind, idx).ok_or(malformed)?)
        }
        0x2e => Decoded::Insn(IALoad),
        0x2f => Decoded::Insn(LALoad),
        0x30 => Decoded::Insn(FALoad),
        0x31 => Decoded::Insn(DALoad),
        0x32 => Decoded::Insn(AALoad),
        0x33 => Decoded::Insn(BALoad),
        0x34 => Decoded::Insn(CALoad),
        0x35 => Decoded::Insn(SALoad),
        0x36..=0x3a => {
            let idx = u8::parse(&mut reader)? as u16;
            Decoded::Insn(local_instruction(opcode, idx).ok_or(malformed)?)
        }
        0x3b..=0x4e => {
            let kind = (opcode - 0x3b) / 4;
            let idx = ((opcode - 0x3b) % 4) as u16;
            Decoded::Insn(local_instruction(0x36 + kind, idx).ok_or(malformed)?)
        }
        0x4f => Decoded::Insn(IAStore),
        0x50 => Decoded::Insn(LAStore),
        0x51 => Decoded::Insn(FAStore),
        0x52 => Decoded::Insn(DAStore),
        0x53 => Decoded::Insn(AAStore),
        0x54 => Decoded::Insn(BAStore),
        0x55 => Decoded::Insn(CAStore),
        0x56 => Decoded::Insn(SAStore),
        0x57 => Decoded::Insn(Pop),
        0x58 => Decoded::Insn(Pop2),
        0x59 => Decoded::Insn(Dup),
        0x5a => Decoded::Insn(DupX1),
        0x5b => Decoded::Insn(DupX2),
        0x5c => Decoded::Insn(Dup2),
        0x5d => Decoded::Insn(Dup2X1),
        0x5e => Decoded::Insn(Dup2X2),
        0x5f => Decoded::Insn(Swap),
        0x60 => Decoded::Insn(IAdd),
        0x61 => Decoded::Insn(LAdd),
        0x62 => Decoded::Insn(FAdd),
        0x63 => Decoded::Insn(DAdd),
        0x64 => Decoded::Insn(ISub),
        0x65 => Decoded::Insn(LSub),
        0x66 => Decoded::Insn(FSub),
        0x67 => Decoded::Insn(DSub),
        0x68 => Decoded::Insn(IMul),
        0x69 => Decoded::Insn(LMul),
        0x6a => Decoded::Insn(FMul),
        0x6b => Decoded::Insn(DMul),
        0x6c => Decoded::Insn(IDiv),
        0x6d => Decoded::Insn(LDiv),
        0x6e => Decoded::Insn(FDiv),
        0x6f => Decoded::Insn(DDiv),
        0x70 => Decoded::Insn(IRem),
        0x71 => Decoded::Insn(LRem),
        0x72 => Decoded::Insn(FRem),
        0x73 => Decoded::Insn(DRem),
        0x74 => Decoded::Insn(INeg),
        0x75 => Decoded::Insn(LNeg),
        0x76 => Decoded::Insn(FNeg),
        0x77 => Decoded::Insn(DNeg),
        0x78 => Decoded::Insn(ISh(ShiftType::Left)),
        0x79 => Decoded::Insn(LSh(ShiftType::Left)),
        0x7a => Decoded::Insn(ISh(ShiftType::ArithmeticRight)),
        0x7b => Decoded::Insn(LSh(ShiftType::ArithmeticRight)),
        0x7c => Decoded::Insn(ISh(ShiftType::LogicalRight)),
        0x7d => Decoded::Insn(LSh(ShiftType::LogicalRight)),
        0x7e => Decoded::Insn(IAnd),
        0x7f => Decoded::Insn(LAnd),
        0x80 => Decoded::Insn(IOr),
        0x81 => Decoded::Insn(LOr),
        0x82 => Decoded::Insn(IXor),
        0x83 => Decoded::Insn(LXor),
        0x84 => {
            let idx = u8::parse(&mut reader)? as u16;
            let diff = u8::parse(&mut reader)? as i8 as i16;
            Decoded::Insn(IInc(idx, diff))
        }
        0x85 => Decoded::Insn(I2L),
        0x86 => Decoded::Insn(I2F),
        0x87 => Decoded::Insn(I2D),
        0x88 => Decoded::Insn(L2I),
        0x89 => Decoded::Insn(L2F),
        0x8a => Decoded::Insn(L2D),
        0x8b => Decoded::Insn(F2I),
        0x8c => Decoded::Insn(F2L),
        0x8d => Decoded::Insn(F2D),
        0x8e => Decoded::Insn(D2I),
        0x8f => Decoded::Insn(D2L),
        0x90 => Decoded::Insn(D2F),
        0x91 => Decoded::Insn(I2B),
        0x92 => Decoded::Insn(I2C),
        0x93 => Decoded::Insn(I2S),
        0x94 => Decoded::Insn(LCmp),
        0x95 => Decoded::Insn(FCmp(CompareMode::L)),
        0x96 => Decoded::Insn(FCmp(CompareMode::G)),
        0x97 => Decoded::Insn(DCmp(CompareMode::L)),
        0x98 => Decoded::Insn(DCmp(CompareMode::G)),
        0x99..=0xa8 => {
            let target = relative(u16::parse(&mut reader)? as i16 as i64)?;
            Decoded::Branch(short_branch(opcode, target).ok_or(malformed)?)
        }
        0xa9 => Decoded::Branch(BranchInstruction::Ret(u8::parse(&mut reader)? as u16)),
        0xaa => {
            skip_switch_padding(&mut reader, offset)?;
            let default = relative(i32::parse(&mut reader)? as i64)?;
            let low = i32::parse(&mut reader)?;
            let high = i32::parse(&mut reader)?;
            if high < low {
                return Err(malformed);
            }
            let targets = (low..=high)
                .map(|_| relative(i32::parse(&mut reader)? as i64))
                .collect::<Result<Vec<_>, _>>()?;
            Decoded::Branch(BranchInstruction::TableSwitch {
                default,
                low,
                targets,
            })
        }
        0xab => {
            skip_switch_padding(&mut reader, offset)?;
            let default = relative(i32::parse(&mut reader)? as i64)?;
            let npairs = i32::parse(&mut reader)?;
            if npairs < 0 {
                return Err(malformed);
            }
            let targets = (0..npairs)
                .map(|_| {
                    let key = i32::parse(&mut reader)?;
                    Ok((key, relative(i32::parse(&mut reader)? as i64)?))
                })
                .collect::<Result<Vec<_>, Error>>()?;
            Decoded::Branch(BranchInstruction::LookupSwitch { default, targets })
        }
        0xac => Decoded::Branch(BranchInstruction::IReturn),
        0xad => Decoded::Branch(BranchInstruction::LReturn),
        0xae => Decoded::Branch(BranchInstruction::FReturn),
        0xaf => Decoded::Branch(BranchInstruction::DReturn),
        0xb0 => Decoded::Branch(BranchInstruction::AReturn),
        0xb1 => Decoded::Branch(BranchInstruction::Return),
        0xb2..=0xb5 => {
            let field = constants.field_ref_index(u16::parse(&mut reader)?)?;
            Decoded::Insn(match opcode {
                0xb2 => GetStatic(field),
                0xb3 => PutStatic(field),
                0xb4 => GetField(field),
                _ => PutField(field),
            })
        }
        0xb6..=0xb8 => {
            let method = constants.method_ref_index(u16::parse(&mut reader)?)?;
            let invoke_type = match opcode {
                0xb6 => InvokeType::Virtual,
                0xb7 => InvokeType::Special,
                _ => InvokeType::Static,
            };
            Decoded::Insn(Invoke(invoke_type, method))
        }
        0xb9 => {
            let method = constants.method_ref_index(u16::parse(&mut reader)?)?;
            let count = u8::parse(&mut reader)?;
            if u8::parse(&mut reader)? != 0 || count == 0 {
                return Err(malformed);
            }
            Decoded::Insn(Invoke(InvokeType::Interface(count), method))
        }
        0xba => {
            let method = constants.invoke_dynamic_index(u16::parse(&mut reader)?)?;
            if u16::parse(&mut reader)? != 0 {
                return Err(malformed);
            }
            Decoded::Insn(InvokeDynamic(method))
        }
        0xbb => Decoded::Insn(New(constants.class_index(u16::parse(&mut reader)?)?)),
        0xbc => {
            let base_type = BaseType::from_array_type_code(u8::parse(&mut reader)?);
            Decoded::Insn(NewArray(base_type.ok_or(malformed)?))
        }
        0xbd => Decoded::Insn(ANewArray(constants.class_index(u16::parse(&mut reader)?)?)),
        0xbe => Decoded::Insn(ArrayLength),
        0xbf => Decoded::Branch(BranchInstruction::AThrow),
        0xc0 => Decoded::Insn(CheckCast(constants.class_index(u16::parse(&mut reader)?)?)),
        0xc1 => Decoded::Insn(InstanceOf(constants.class_index(u16::parse(&mut reader)?)?)),
        0xc2 => Decoded::Insn(MonitorEnter),
        0xc3 => Decoded::Insn(MonitorExit),
        WIDE => {
            let widened = u8::parse(&mut reader)?;
            let idx = u16::parse(&mut reader)?;
            match widened {
                0x15..=0x19 | 0x36..=0x3a => {
                    Decoded::Insn(local_instruction(widened, idx).ok_or(malformed)?)
                }
                0x84 => Decoded::Insn(IInc(idx, u16::parse(&mut reader)? as i16)),
                0xa9 => Decoded::Branch(BranchInstruction::Ret(idx)),
                _ => return Err(malformed),
            }
        }
        0xc5 => {
            let class = constants.class_index(u16::parse(&mut reader)?)?;
            let dimensions = u8::parse(&mut reader)?;
            if dimensions == 0 {
                return Err(malformed);
            }
            Decoded::Insn(MultiANewArray(class, dimensions))
        }
        0xc6 | 0xc7 => {
            let target = relative(u16::parse(&mut reader)? as i16 as i64)?;
            Decoded::Branch(short_branch(opcode, target).ok_or(malformed)?)
        }
        0xc8 => {
            let target = relative(i32::parse(&mut reader)? as i64)?;
            Decoded::Branch(BranchInstruction::Goto(target))
        }
        0xc9 => {
            let target = relative(i32::parse(&mut reader)? as i64)?;
            Decoded::Branch(BranchInstruction::Jsr(target))
        }
        _ => return Err(Error::UnknownOpcode { opcode, offset }),
    };

    let width = bytes.len() - offset - reader.len();
    Ok((insn, width))
}

/// Load or store for the "normal" opcode (`iload` through `aload`, `istore` through `astore`)
fn local_instruction(opcode: u8, idx: u16) -> Option<Instruction> {
    use Instruction::*;
    Some(match opcode {
        0x15 => ILoad(idx),
        0x16 => LLoad(idx),
        0x17 => FLoad(idx),
        0x18 => DLoad(idx),
        0x19 => ALoad(idx),
        0x36 => IStore(idx),
        0x37 => LStore(idx),
        0x38 => FStore(idx),
        0x39 => DStore(idx),
        0x3a => AStore(idx),
        _ => return None,
    })
}

/// Branches with a signed 16-bit relative offset
fn short_branch(opcode: u8, target: usize) -> Option<BranchInstruction<usize>> {
    use BranchInstruction::*;
    Some(match opcode {
        0x99 => If(OrdComparison::EQ, target),
        0x9a => If(OrdComparison::NE, target),
        0x9b => If(OrdComparison::LT, target),
        0x9c => If(OrdComparison::GE, target),
        0x9d => If(OrdComparison::GT, target),
        0x9e => If(OrdComparison::LE, target),
        0x9f => IfICmp(OrdComparison::EQ, target),
        0xa0 => IfICmp(OrdComparison::NE, target),
        0xa1 => IfICmp(OrdComparison::LT, target),
        0xa2 => IfICmp(OrdComparison::GE, target),
        0xa3 => IfICmp(OrdComparison::GT, target),
        0xa4 => IfICmp(OrdComparison::LE, target),
        0xa5 => IfACmp(EqComparison::EQ, target),
        0xa6 => IfACmp(EqComparison::NE, target),
        0xa7 => Goto(target),
        0xa8 => Jsr(target),
        0xc6 => IfNull(EqComparison::EQ, target),
        0xc7 => IfNull(EqComparison::NE, target),
        _ => return None,
    })
}

/// Switch operands start at the next multiple of four bytes from the start of the method
fn skip_switch_padding(reader: &mut &[u8], offset: usize) -> Result<(), Error> {
    for _ in 0..switch_padding(offset) {
        u8::parse(reader)?;
    }
    Ok(())
}

/// Number of padding bytes after a switch opcode located at `offset`
pub fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{
        BytecodeArray, BytecodeIndex, ConstantsPool, ExceptionHandler, LineNumber,
    };

    fn code(bytes: Vec<u8>) -> Code {
        Code {
            max_stack: 2,
            max_locals: 2,
            code_array: BytecodeArray(bytes),
            exception_table: vec![],
            attributes: vec![],
        }
    }

    #[test]
    fn labels_follow_branch_targets() {
        let constants = ConstantsPool::new();
        // 0: iload_0; 1: ifeq +5 (=> 6); 4: iconst_1; 5: ireturn; 6: iconst_0; 7: ireturn
        let body =
            MethodBody::decode(&code(vec![0x1a, 0x99, 0, 5, 0x04, 0xac, 0x03, 0xac]), &constants)
                .unwrap();
        let target = match &body.nodes[1] {
            Node::Branch(BranchInstruction::If(OrdComparison::EQ, lbl)) => *lbl,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(body.nodes[4], Node::Label(target));
        assert_eq!(body.nodes[5], Node::Insn(Instruction::IConst0));
        assert_eq!(body.instruction_count(), 6);
    }

    #[test]
    fn wide_and_subroutine_forms() {
        let constants = ConstantsPool::new();
        // 0: jsr +6 (=> 6); 3: return; 4: nop; 5: nop; 6: astore_1; 7: wide ret 1
        let bytes = vec![0xa8, 0, 6, 0xb1, 0, 0, 0x4c, 0xc4, 0xa9, 0, 1];
        let body = MethodBody::decode(&code(bytes), &constants).unwrap();
        assert!(matches!(
            body.nodes.last(),
            Some(Node::Branch(BranchInstruction::Ret(1)))
        ));
        assert!(matches!(
            body.nodes.first(),
            Some(Node::Branch(BranchInstruction::Jsr(_)))
        ));
    }

    #[test]
    fn switch_padding_is_skipped() {
        let constants = ConstantsPool::new();
        // 0: iload_0; 1: tableswitch (2 bytes of padding) default +19, low 0, high 0, +19
        let mut bytes = vec![0x1a, 0xaa, 0, 0];
        for word in [19i32, 0, 0, 19] {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        bytes.push(0xb1);
        assert_eq!(bytes.len(), 21);
        let body = MethodBody::decode(&code(bytes), &constants).unwrap();
        assert!(matches!(
            &body.nodes[1],
            Node::Branch(BranchInstruction::TableSwitch { low: 0, targets, .. }) if targets.len() == 1
        ));
    }

    #[test]
    fn invalid_code_is_rejected() {
        let constants = ConstantsPool::new();
        assert!(matches!(
            MethodBody::decode(&code(vec![0xa7, 0, 1, 0xb1]), &constants),
            Err(Error::InvalidBranchTarget { offset: 0, target: 1 })
        ));
        assert!(matches!(
            MethodBody::decode(&code(vec![0xa7, 0, 10]), &constants),
            Err(Error::InvalidBranchTarget { offset: 0, target: 10 })
        ));
        assert!(matches!(
            MethodBody::decode(&code(vec![0xfe]), &constants),
            Err(Error::UnknownOpcode { opcode: 0xfe, offset: 0 })
        ));
        assert!(matches!(
            MethodBody::decode(&code(vec![0x10]), &constants),
            Err(Error::UnexpectedEof)
        ));

        let mut with_handler = code(vec![0x00, 0xb1]);
        with_handler.exception_table.push(ExceptionHandler {
            start_pc: BytecodeIndex(1),
            end_pc: BytecodeIndex(1),
            handler_pc: BytecodeIndex(0),
            catch_type: None,
        });
        assert!(matches!(
            MethodBody::decode(&with_handler, &constants),
            Err(Error::InvalidCodeRange { start: 1, end: 1 })
        ));
    }

    #[test]
    fn debug_tables_become_nodes_and_ranges() {
        let mut constants = ConstantsPool::new();
        let name = constants.get_utf8("x").unwrap();
        let descriptor = constants.get_utf8("I").unwrap();
        let mut method_code = code(vec![0x03, 0x3c, 0xb1]);
        method_code.attributes.push(
            constants
                .get_attribute(&LineNumberTable(vec![
                    LineNumber {
                        start_pc: BytecodeIndex(0),
                        line_number: 10,
                    },
                    LineNumber {
                        start_pc: BytecodeIndex(2),
                        line_number: 11,
                    },
                ]))
                .unwrap(),
        );
        method_code.attributes.push(
            constants
                .get_attribute(&LocalVariableTable(vec![
                    LocalVariable {
                        start_pc: BytecodeIndex(2),
                        length: 1,
                        name_index: name,
                        descriptor_index: descriptor,
                        index: 1,
                    },
                    // Ends in the middle of nowhere, gets dropped
                    LocalVariable {
                        start_pc: BytecodeIndex(0),
                        length: 9,
                        name_index: name,
                        descriptor_index: descriptor,
                        index: 0,
                    },
                ]))
                .unwrap(),
        );

        let body = MethodBody::decode(&method_code, &constants).unwrap();
        assert!(body.attributes.is_empty());
        assert_eq!(body.local_variables.len(), 1);
        let range = &body.local_variables[0];
        assert_eq!(
            body.nodes,
            vec![
                Node::Line(10),
                Node::Insn(Instruction::IConst0),
                Node::Insn(Instruction::IStore(1)),
                Node::Label(range.start),
                Node::Line(11),
                Node::Branch(BranchInstruction::Return),
                Node::Label(range.end),
            ]
        );
    }
}
