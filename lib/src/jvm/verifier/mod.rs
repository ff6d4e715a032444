//! Type inference over method bodies, producing stack map frames
//!
//! For any specific instruction inside a method body, the stack and locals should have the same
//! structure, regardless of which control flow was used to reach that instruction. In other words:
//! although the values on the stack and in the locals may obviously be different, the types and
//! order of the stack and local variables cannot. This information is referred to as the _stack
//! map frame_ (represented using [`Frame`]) and the set of stack map frames for all possible jump
//! targets in a method is the _stack map table_.
//!
//! Knowing the stack map frame at a point in the code makes it possible to verify that the next
//! instruction makes sense (eg. `dadd` only makes sense if the top two elements on the stack are
//! of type `double`). The "types" used in verification (represented using [`VerificationType`])
//! are slightly augumented to take into account initialization and null.
//!
//! Verifying straight-line instructions is pretty simple (see [`TypeState::execute`]). When an
//! instruction can be reached from multiple locations (eg. it is the target of jumps), the states
//! from the different source locations need to be unified: [`analyze`] runs a worklist fix-point
//! which converges towards the right answer (if there is one). Runtimes without a full verifier
//! cannot afford that fix-point, which is why the result is stored in the class file as a
//! [`crate::jvm::class_file::StackMapTable`] (or CLDC [`crate::jvm::class_file::StackMap`]).
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1

mod analyzer;
mod frame;
mod state;
mod types;

pub use analyzer::*;
pub use frame::*;
pub use state::*;
pub use types::*;
