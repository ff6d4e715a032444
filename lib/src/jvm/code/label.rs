use std::fmt;

/// Opaque program point inside one method body
///
/// Labels are plain integers handed out by a [`SynLabelGenerator`]. A label is never mutated or
/// reused: copying code (eg. when inlining a subroutine) always allocates fresh labels and keeps
/// an explicit mapping from the old ones.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SynLabel(usize);

impl SynLabel {
    pub const fn index(&self) -> usize {
        self.0
    }
}

/// Hands out fresh labels for one method body
///
/// Cloning does not split the generator source - the cloned generator will produce the same
/// sequence of labels as the original.
#[derive(Clone, Debug, Default)]
pub struct SynLabelGenerator(usize);

impl SynLabelGenerator {
    pub fn new() -> SynLabelGenerator {
        SynLabelGenerator(0)
    }

    /// Generate a fresh label
    pub fn fresh_label(&mut self) -> SynLabel {
        let to_return = SynLabel(self.0);
        self.0 += 1;
        to_return
    }

    /// Number of labels generated so far
    pub fn issued(&self) -> usize {
        self.0
    }
}

impl fmt::Debug for SynLabel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}
