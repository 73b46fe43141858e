//! Lowering: optimized IR back to stack-machine bytecode.
//!
//! The emitter converts a method's SSA form into an output instruction
//! sequence (value-to-slot allocation, phi elimination via edge copies),
//! the frame computation derives the verifier-visible type state at every
//! control-flow join, and the synthesis layer builds small utility methods
//! (shared throw helpers) by direct instruction-list construction without
//! going through the IR pipeline at all.
//!
//! Frame computation is exact, not best-effort: an incorrect frame is a
//! silent bug that only surfaces when the target runtime's verifier
//! rejects the output at load time.

mod emitter;
mod frames;
mod synthesis;

pub use emitter::{CodeEmitter, LoweredMethod};
pub use frames::{StackMapFrame, VerificationType};
pub use synthesis::{SyntheticMethods, ThrowingKind, SYNTHETIC_HOLDER};
