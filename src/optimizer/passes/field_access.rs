//! Whole-program field access bit tracking.
//!
//! Every field accumulates a small bit set describing how the program
//! touches it. Two of the bits are per-read-site patterns that also land
//! in instruction metadata, because the lowering layer can elide such
//! reads once the enabling transformation (staticizing, dead-write
//! elimination) has happened:
//!
//! - a read whose value is only ever used as an invoke receiver
//! - a read whose value only enables a field write
//!
//! This is an analysis pass: it never changes IR, only side tables.

use bitflags::bitflags;

use crate::{
    bytecode::Op,
    ir::{IrFunction, UseSite, ValueId},
    model::{Application, FieldId},
    optimizer::{EventKind, InstructionMetadata, IrPass, OptimizerContext},
    Result,
};

bitflags! {
    /// How the program accesses one field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FieldAccessBits: u8 {
        /// At least one read exists.
        const READ = 0x01;
        /// At least one write exists.
        const WRITTEN = 0x02;
        /// Some read's value is only used as an invoke receiver.
        const READ_FOR_RECEIVER_INVOKE = 0x04;
        /// Some read's value only enables a field write.
        const READ_FOR_WRITE = 0x08;
    }
}

/// The field access analysis pass.
pub struct FieldAccessAnalysisPass;

impl FieldAccessAnalysisPass {
    /// Is every use of `value` the receiver operand of an invoke?
    fn only_receiver_uses(func: &IrFunction, value: ValueId) -> bool {
        let Some(v) = func.value(value) else {
            return false;
        };
        if v.uses().is_empty() {
            return false;
        }
        v.uses().iter().all(|site| match site {
            UseSite::Phi(_) => false,
            UseSite::Instruction(id) => func.instruction(*id).is_some_and(|user| {
                matches!(user.op(), Op::Invoke { kind, .. } if kind.has_receiver())
                    && user.uses().first() == Some(&value)
                    && user.uses().iter().filter(|&&u| u == value).count() == 1
            }),
        })
    }

    /// Is every use of `value` the stored operand of a field write?
    fn only_write_uses(func: &IrFunction, value: ValueId) -> bool {
        let Some(v) = func.value(value) else {
            return false;
        };
        if v.uses().is_empty() {
            return false;
        }
        v.uses().iter().all(|site| match site {
            UseSite::Phi(_) => false,
            UseSite::Instruction(id) => func.instruction(*id).is_some_and(|user| {
                matches!(user.op(), Op::PutField(_) | Op::PutStatic(_))
                    && user.uses().last() == Some(&value)
            }),
        })
    }
}

impl IrPass for FieldAccessAnalysisPass {
    fn name(&self) -> &'static str {
        "field-access-analysis"
    }

    fn description(&self) -> &'static str {
        "Tracks per-field access bits and marks elidable field reads"
    }

    fn run_on_method(
        &self,
        func: &mut IrFunction,
        ctx: &OptimizerContext,
        _app: &Application,
    ) -> Result<bool> {
        let method = func.method();
        let mut touched = false;

        let accesses: Vec<(crate::ir::InstrId, FieldId, bool, Option<ValueId>)> = func
            .all_instructions()
            .filter_map(|i| match *i.op() {
                Op::GetField(field) | Op::GetStatic(field) => {
                    Some((i.id(), field, true, i.def()))
                }
                Op::PutField(field) | Op::PutStatic(field) => Some((i.id(), field, false, None)),
                _ => None,
            })
            .collect();

        for (instr_id, field, is_read, def) in accesses {
            let mut bits = if is_read {
                FieldAccessBits::READ
            } else {
                FieldAccessBits::WRITTEN
            };
            if let Some(def) = def {
                if Self::only_receiver_uses(func, def) {
                    bits |= FieldAccessBits::READ_FOR_RECEIVER_INVOKE;
                    ctx.attach_metadata(
                        method,
                        instr_id,
                        InstructionMetadata::FIELD_READ_FOR_RECEIVER,
                    );
                }
                if Self::only_write_uses(func, def) {
                    bits |= FieldAccessBits::READ_FOR_WRITE;
                    ctx.attach_metadata(method, instr_id, InstructionMetadata::FIELD_READ_FOR_WRITE);
                }
            }
            let mut entry = ctx.field_access.entry(field).or_default();
            let before = *entry;
            *entry |= bits;
            if *entry != before {
                touched = true;
            }
        }

        if touched {
            ctx.events
                .record(EventKind::FieldBitsRecorded)
                .at(method);
        }
        // Side tables changed, the IR did not.
        Ok(false)
    }
}
