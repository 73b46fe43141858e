//! SSA instructions: a typed operation with explicit inputs and output.
//!
//! An [`IrInstruction`] wraps a bytecode [`Op`] with the SSA values it
//! consumes and the value it defines. Stack shuffles (load/store/dup/pop)
//! are absorbed during SSA construction, so the remaining instructions are
//! pure dataflow plus control flow.
//!
//! Every instruction carries a stable [`InstrId`] assigned at creation and
//! never reused within a function. Side tables (bytecode metadata, use
//! sites) key off this id rather than position or pointer identity, so
//! they survive block mutation.

use std::fmt;

use crate::{bytecode::Op, ir::ValueId};

/// Stable per-function instruction identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(u32);

impl InstrId {
    /// Creates an id from a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// One SSA instruction.
#[derive(Debug, Clone)]
pub struct IrInstruction {
    id: InstrId,
    op: Op,
    uses: Vec<ValueId>,
    def: Option<ValueId>,
}

impl IrInstruction {
    /// Creates an instruction.
    #[must_use]
    pub fn new(id: InstrId, op: Op, uses: Vec<ValueId>, def: Option<ValueId>) -> Self {
        Self { id, op, uses, def }
    }

    /// Creates an instruction with no inputs or output.
    #[must_use]
    pub fn no_operands(id: InstrId, op: Op) -> Self {
        Self::new(id, op, Vec::new(), None)
    }

    /// The stable id.
    #[must_use]
    pub const fn id(&self) -> InstrId {
        self.id
    }

    /// The wrapped operation.
    #[must_use]
    pub const fn op(&self) -> &Op {
        &self.op
    }

    /// Replaces the wrapped operation (pass rewriting).
    pub fn set_op(&mut self, op: Op) {
        self.op = op;
    }

    /// Input values, in operand order.
    #[must_use]
    pub fn uses(&self) -> &[ValueId] {
        &self.uses
    }

    /// Mutable access to the input values.
    pub fn uses_mut(&mut self) -> &mut Vec<ValueId> {
        &mut self.uses
    }

    /// The defined value, if any.
    #[must_use]
    pub const fn def(&self) -> Option<ValueId> {
        self.def
    }

    /// Sets or clears the defined value.
    pub fn set_def(&mut self, def: Option<ValueId>) {
        self.def = def;
    }

    /// Replaces every occurrence of `old` in the inputs with `new`.
    ///
    /// Returns the number of occurrences replaced.
    pub fn replace_use(&mut self, old: ValueId, new: ValueId) -> usize {
        let mut replaced = 0;
        for value in &mut self.uses {
            if *value == old {
                *value = new;
                replaced += 1;
            }
        }
        replaced
    }
}

impl fmt::Display for IrInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(def) = self.def {
            write!(f, "{def} = ")?;
        }
        write!(f, "{}", <&'static str>::from(&self.op))?;
        for (i, value) in self.uses.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {value}")?;
        }
        Ok(())
    }
}
