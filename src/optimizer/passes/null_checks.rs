//! Null-check insertion for removed receivers.
//!
//! When the staticizer converts an instance method to static dispatch, the
//! receiver argument disappears from the signature - but `null.m()` must
//! still throw. Every call site of a staticized method therefore gets an
//! explicit null check on the (otherwise dropped) receiver value before
//! the retargeted static invoke.

use crate::{
    ir::IrFunction,
    model::{Application, MethodId},
    optimizer::{merging, IrPass, OptimizerContext},
    Result,
};

/// The call-site rewriting pass paired with the staticizer.
pub struct NullCheckInsertionPass;

impl IrPass for NullCheckInsertionPass {
    fn name(&self) -> &'static str {
        "receiver-null-checks"
    }

    fn description(&self) -> &'static str {
        "Rewrites calls to staticized methods, preserving receiver NPE semantics"
    }

    fn should_run(&self, _method: MethodId, ctx: &OptimizerContext) -> bool {
        !ctx.staticized.is_empty()
    }

    fn run_on_method(
        &self,
        func: &mut IrFunction,
        ctx: &OptimizerContext,
        _app: &Application,
    ) -> Result<bool> {
        Ok(merging::rewrite_staticized_call_sites(func, ctx))
    }
}
