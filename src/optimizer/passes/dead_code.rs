//! Use-list-driven dead-code elimination.
//!
//! The normalization step run after every structural change: instructions
//! whose result is unused and whose operation has no observable effect are
//! removed, as are unused phis. Removal cascades naturally - deleting a
//! user shortens its operands' use-lists - so the pass loops until a fixed
//! point.

use crate::{
    bytecode::Instruction,
    ir::{IrFunction, ValueId},
    model::Application,
    optimizer::{EventKind, IrPass, OptimizerContext},
    Result,
};

/// The dead-code elimination pass.
pub struct DeadCodeEliminationPass;

impl IrPass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn description(&self) -> &'static str {
        "Removes unused, effect-free instructions and phis"
    }

    fn run_on_method(
        &self,
        func: &mut IrFunction,
        ctx: &OptimizerContext,
        _app: &Application,
    ) -> Result<bool> {
        let mut removed_total = 0usize;
        loop {
            let dead_instructions: Vec<crate::ir::InstrId> = func
                .all_instructions()
                .filter(|i| {
                    i.def()
                        .and_then(|d| func.value(d))
                        .is_some_and(crate::ir::Value::is_dead)
                        && !Instruction::new(0, *i.op()).has_side_effects()
                })
                .map(crate::ir::IrInstruction::id)
                .collect();

            let dead_phis: Vec<ValueId> = func
                .all_phis()
                .map(crate::ir::PhiNode::result)
                .filter(|&p| func.value(p).is_some_and(crate::ir::Value::is_dead))
                .collect();

            if dead_instructions.is_empty() && dead_phis.is_empty() {
                break;
            }
            for id in dead_instructions {
                func.remove_instruction(id);
                removed_total += 1;
            }
            for phi in dead_phis {
                func.remove_phi(phi);
                removed_total += 1;
            }
        }

        if removed_total > 0 {
            ctx.events
                .record(EventKind::DeadCodeRemoved)
                .at(func.method())
                .message(format!("{removed_total} removed"));
        }
        Ok(removed_total > 0)
    }
}
