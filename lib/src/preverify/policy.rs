use super::InliningLimits;

/// Which language features a class may use, and how its output gets written
///
/// The presets match the two CLDC configurations. Everything is a plain public field so that a
/// preset can be tweaked after construction:
///
/// ```
/// use preverifier::preverify::{FrameFormat, Policy};
///
/// let mut policy = Policy::cldc_1_0();
/// policy.frame_format = FrameFormat::StackMapTable;
/// assert!(!policy.floating_point_allowed);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Allow methods with the `ACC_NATIVE` flag
    pub native_methods_allowed: bool,

    /// Allow declaring `finalize()`
    pub finalizers_allowed: bool,

    /// Allow `float` and `double` (in instructions and in types)
    pub floating_point_allowed: bool,

    /// Attribute used to store the inferred frames
    pub frame_format: FrameFormat,

    /// Drop `ConstantValue` attributes from non-static fields
    ///
    /// The JVM ignores these anyway, but some on-device verifiers reject them.
    pub strip_instance_constant_values: bool,

    /// Deepest nesting of subroutines that will be inlined
    pub max_inlining_depth: usize,

    /// Largest number of instructions a method may have once its subroutines are inlined
    pub max_inlined_instructions: usize,
}

/// Layout of the stack map frames attached to each method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    /// Compressed `StackMapTable` frames (Java 6 and later)
    StackMapTable,

    /// CLDC `StackMap`: every frame in full, at an absolute offset
    StackMap,
}

impl Policy {
    pub const DEFAULT_MAX_INLINING_DEPTH: usize = 16;
    pub const DEFAULT_MAX_INLINED_INSTRUCTIONS: usize = 65535;

    /// CLDC 1.0: no native methods, no finalizers, no floating point
    pub fn cldc_1_0() -> Policy {
        Policy {
            native_methods_allowed: false,
            finalizers_allowed: false,
            floating_point_allowed: false,
            frame_format: FrameFormat::StackMap,
            strip_instance_constant_values: true,
            max_inlining_depth: Self::DEFAULT_MAX_INLINING_DEPTH,
            max_inlined_instructions: Self::DEFAULT_MAX_INLINED_INSTRUCTIONS,
        }
    }

    /// CLDC 1.1: same as CLDC 1.0, but with floating point
    pub fn cldc_1_1() -> Policy {
        Policy {
            floating_point_allowed: true,
            ..Policy::cldc_1_0()
        }
    }

    /// Limits the subroutine inliner works under
    pub fn inlining_limits(&self) -> InliningLimits {
        InliningLimits {
            max_depth: self.max_inlining_depth,
            max_instructions: self.max_inlined_instructions,
        }
    }
}

impl Default for Policy {
    fn default() -> Policy {
        Policy::cldc_1_1()
    }
}
