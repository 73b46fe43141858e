//! Instruction metadata side-tables.
//!
//! Analyses mark facts about individual instructions ("this field read
//! exists only to reach a receiver invoke", "this invoke always throws")
//! that the lowering layer consumes later. The side-table is keyed by the
//! instruction's stable [`InstrId`] - identity, not value equality - so it
//! survives arbitrary IR mutation between the analysis and lowering.
//!
//! Providers are built per method (no cross-thread sharing) and merged into
//! a program-wide table at the synchronization point before lowering; after
//! lowering, each entry is re-keyed onto the position of the corresponding
//! output instruction and the provider is discarded.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::ir::InstrId;

bitflags! {
    /// Per-instruction analysis facts consumed during lowering.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InstructionMetadata: u8 {
        /// Field read exists only to invoke a receiver method; safe to
        /// elide after the callee is staticized.
        const FIELD_READ_FOR_RECEIVER = 0x01;
        /// Field read exists only to enable a field write; safe to elide
        /// if the write is dead.
        const FIELD_READ_FOR_WRITE = 0x02;
        /// Invoke always throws `NoSuchMethodError` at runtime.
        const ALWAYS_THROWS_NO_SUCH_METHOD = 0x04;
        /// Invoke always throws `IllegalAccessError` at runtime.
        const ALWAYS_THROWS_ILLEGAL_ACCESS = 0x08;
        /// Invoke always throws `IncompatibleClassChangeError` at runtime.
        const ALWAYS_THROWS_INCOMPATIBLE = 0x10;
    }
}

/// Side-table from IR instruction identity to metadata.
#[derive(Debug, Clone, Default)]
pub struct BytecodeMetadataProvider {
    entries: HashMap<InstrId, InstructionMetadata>,
}

impl BytecodeMetadataProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches (unions) metadata flags to an instruction.
    pub fn attach(&mut self, instr: InstrId, metadata: InstructionMetadata) {
        *self.entries.entry(instr).or_default() |= metadata;
    }

    /// The metadata recorded for an instruction.
    #[must_use]
    pub fn get(&self, instr: InstrId) -> Option<InstructionMetadata> {
        self.entries.get(&instr).copied()
    }

    /// Number of annotated instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is annotated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unions another provider into this one (program-wide merge point).
    pub fn merge(&mut self, other: Self) {
        for (instr, metadata) in other.entries {
            self.attach(instr, metadata);
        }
    }

    /// Re-keys entries onto output-instruction positions after lowering.
    ///
    /// `positions` maps each IR instruction id to the index of the output
    /// instruction it lowered to; annotated instructions that produced no
    /// output (eliminated late) are dropped.
    #[must_use]
    pub fn remap(&self, positions: &HashMap<InstrId, usize>) -> HashMap<usize, InstructionMetadata> {
        self.entries
            .iter()
            .filter_map(|(instr, &metadata)| {
                positions.get(instr).map(|&index| (index, metadata))
            })
            .collect()
    }
}
