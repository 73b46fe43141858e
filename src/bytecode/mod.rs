//! The bytecode instruction model shared by input, IR, and output.
//!
//! Instructions are typed operation objects usable in both the stack
//! ("class-file") encoding and, after slot allocation, the register
//! ("dex") encoding; the binary writers for either format are out of
//! scope and consume this model. Each instruction knows its stack
//! behavior, flow type, and branch targets, which is everything IR
//! construction needs.
//!
//! Offsets and branch targets are instruction indices into a method's
//! stream, not byte offsets; byte-level relocation belongs to the
//! writers.

mod assembler;
mod instruction;

pub use assembler::{InstructionAssembler, Label};
pub use instruction::{
    BinaryOp, FlowType, IfCond, Instruction, InvokeKind, Op, StackBehavior, UnaryOp,
};
