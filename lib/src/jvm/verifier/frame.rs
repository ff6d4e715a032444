use super::{InferredType, VerificationType};
use crate::jvm::class_file::{
    BytecodeIndex, ClassConstantIndex, ConstantsPool, StackMap, StackMapEntry, StackMapFrame,
    StackMapTable,
};
use crate::jvm::code::{Layout, SynLabel};
use crate::jvm::{BinaryName, Error, RefType};
use crate::util::OffsetVec;

/// Snapshot of the stack and local variables at a point in the bytecode
///
/// Wide types (`long` and `double`) take up a single entry here, but advance the offset by two.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame<Cls, U> {
    /// Local variables in scope
    pub locals: OffsetVec<VerificationType<Cls, U>>,

    /// Types of values on the stack
    pub stack: OffsetVec<VerificationType<Cls, U>>,
}

/// Frame as it gets written into the class file
pub type SerializedFrame = Frame<ClassConstantIndex, BytecodeIndex>;

impl Frame<RefType<BinaryName>, SynLabel> {
    /// Resolve the frame into its serializable form
    pub fn into_serializable(
        &self,
        constants: &mut ConstantsPool,
        layout: &Layout,
    ) -> Result<SerializedFrame, Error> {
        Ok(Frame {
            stack: serialize_types(&self.stack, constants, layout)?,
            locals: serialize_types(&self.locals, constants, layout)?,
        })
    }
}

fn serialize_types(
    types: &OffsetVec<InferredType>,
    constants: &mut ConstantsPool,
    layout: &Layout,
) -> Result<OffsetVec<VerificationType<ClassConstantIndex, BytecodeIndex>>, Error> {
    types
        .iter()
        .map(|(_, _, t)| t.into_serializable(constants, layout))
        .collect()
}

impl SerializedFrame {
    /// Compute a stack map frame for this frame, given the previous frame
    ///
    /// This will fall back to the `Full` option using [`Self::full_stack_map_frame`] only if none
    /// of the other stack map frame variants are enough to encode the transition.
    pub fn stack_map_frame(&self, offset_delta: u16, previous_frame: &Self) -> StackMapFrame {
        let this_locals = self.locals.iter().map(|(_, _, t)| *t).collect::<Vec<_>>();
        let prev_locals = previous_frame
            .locals
            .iter()
            .map(|(_, _, t)| *t)
            .collect::<Vec<_>>();

        match self.stack.len() {
            0 if this_locals.len() <= prev_locals.len() => {
                let len_difference = prev_locals.len() - this_locals.len();
                if len_difference < 4 && prev_locals.starts_with(&this_locals) {
                    if len_difference == 0 {
                        return StackMapFrame::SameLocalsNoStack { offset_delta };
                    } else {
                        return StackMapFrame::ChopLocalsNoStack {
                            offset_delta,
                            chopped_k: len_difference as u8,
                        };
                    }
                }
            }
            0 => {
                let len_difference = this_locals.len() - prev_locals.len();
                if len_difference < 4 && this_locals.starts_with(&prev_locals) {
                    return StackMapFrame::AppendLocalsNoStack {
                        offset_delta,
                        locals: this_locals[prev_locals.len()..].to_vec(),
                    };
                }
            }
            1 if this_locals == prev_locals => {
                if let Some(stack) = self.stack.last() {
                    return StackMapFrame::SameLocalsOneStack {
                        offset_delta,
                        stack: *stack,
                    };
                }
            }
            _ => (),
        }

        self.full_stack_map_frame(offset_delta)
    }

    /// Compute a `Full` stack map frame
    pub fn full_stack_map_frame(&self, offset_delta: u16) -> StackMapFrame {
        StackMapFrame::Full {
            offset_delta,
            stack: self.stack.iter().map(|(_, _, t)| *t).collect(),
            locals: self.locals.iter().map(|(_, _, t)| *t).collect(),
        }
    }

    /// Entry of a CLDC `StackMap` (always stored in full, with an absolute offset)
    pub fn stack_map_entry(&self, offset: u16) -> StackMapEntry {
        StackMapEntry {
            offset: BytecodeIndex(offset),
            locals: self.locals.iter().map(|(_, _, t)| *t).collect(),
            stack: self.stack.iter().map(|(_, _, t)| *t).collect(),
        }
    }
}

/// Build a compressed `StackMapTable`
///
/// Frames must be sorted by strictly increasing offset. `initial` is the implicit frame on method
/// entry, which is what the first explicit frame gets compared against.
pub fn stack_map_table(
    initial: &SerializedFrame,
    frames: &[(u16, SerializedFrame)],
) -> StackMapTable {
    let mut previous: Option<(u16, &SerializedFrame)> = None;
    let mut table = Vec::with_capacity(frames.len());
    for (offset, frame) in frames {
        let (offset_delta, previous_frame) = match previous {
            None => (*offset, initial),
            Some((previous_offset, previous_frame)) => {
                (offset - previous_offset - 1, previous_frame)
            }
        };
        table.push(frame.stack_map_frame(offset_delta, previous_frame));
        previous = Some((*offset, frame));
    }
    StackMapTable(table)
}

/// Build a CLDC `StackMap`
pub fn stack_map(frames: &[(u16, SerializedFrame)]) -> StackMap {
    StackMap(
        frames
            .iter()
            .map(|(offset, frame)| frame.stack_map_entry(*offset))
            .collect(),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ConstantIndex;
    use VerificationType::*;

    fn frame<const N: usize, const M: usize>(
        locals: [VerificationType<ClassConstantIndex, BytecodeIndex>; N],
        stack: [VerificationType<ClassConstantIndex, BytecodeIndex>; M],
    ) -> SerializedFrame {
        Frame {
            locals: locals.into_iter().collect(),
            stack: stack.into_iter().collect(),
        }
    }

    #[test]
    fn compressed_frames() {
        let string = Object(ClassConstantIndex(ConstantIndex(4)));
        let initial = frame([Integer], []);
        let frames = vec![
            (3, frame([Integer], [])),
            (7, frame([Integer, Long, string], [])),
            (12, frame([Integer], [])),
            (20, frame([Integer], [Float])),
            (25, frame([Double], [])),
            (30, frame([Double], [Integer, Integer])),
        ];

        let table = stack_map_table(&initial, &frames);
        assert_eq!(
            table.0,
            vec![
                StackMapFrame::SameLocalsNoStack { offset_delta: 3 },
                StackMapFrame::AppendLocalsNoStack {
                    offset_delta: 3,
                    locals: vec![Long, string],
                },
                StackMapFrame::ChopLocalsNoStack {
                    offset_delta: 4,
                    chopped_k: 2,
                },
                StackMapFrame::SameLocalsOneStack {
                    offset_delta: 7,
                    stack: Float,
                },
                StackMapFrame::Full {
                    offset_delta: 4,
                    locals: vec![Double],
                    stack: vec![],
                },
                StackMapFrame::Full {
                    offset_delta: 4,
                    locals: vec![Double],
                    stack: vec![Integer, Integer],
                },
            ]
        );
    }

    #[test]
    fn cldc_entries() {
        let frames = vec![
            (5, frame([Long, Uninitialized(BytecodeIndex(1))], [])),
            (9, frame([], [Null])),
        ];
        let map = stack_map(&frames);
        assert_eq!(
            map.0,
            vec![
                StackMapEntry {
                    offset: BytecodeIndex(5),
                    locals: vec![Long, Uninitialized(BytecodeIndex(1))],
                    stack: vec![],
                },
                StackMapEntry {
                    offset: BytecodeIndex(9),
                    locals: vec![],
                    stack: vec![Null],
                },
            ]
        );
    }
}
