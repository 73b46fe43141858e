//! The pass interface.
//!
//! Passes come in two shapes: per-method passes transform one
//! [`IrFunction`] at a time and may run concurrently across methods;
//! global passes see the whole [`Application`] mutably and run serially at
//! wave boundaries (class merging, staticizing). All passes must be
//! `Send + Sync`.

use crate::{ir::IrFunction, model::Application, optimizer::OptimizerContext, Result};

/// One optimization pass.
pub trait IrPass: Send + Sync {
    /// Unique name for events and debugging.
    fn name(&self) -> &'static str;

    /// What the pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Should this pass run on a specific method?
    ///
    /// Called before [`IrPass::run_on_method`]; override to skip methods
    /// that cannot profit (wrong shape, already processed).
    fn should_run(&self, _method: crate::model::MethodId, _ctx: &OptimizerContext) -> bool {
        true
    }

    /// Runs the pass on one method's IR.
    ///
    /// Returns `true` if the IR changed. The application is read-only
    /// here: per-method passes run in parallel and the class model is
    /// stable for the whole wave.
    ///
    /// # Errors
    ///
    /// Returns an error only for fatal conditions (the whole compilation
    /// aborts); "no transformation applies" is `Ok(false)`.
    fn run_on_method(
        &self,
        func: &mut IrFunction,
        ctx: &OptimizerContext,
        app: &Application,
    ) -> Result<bool>;

    /// Runs a whole-program transformation (serial, wave boundary).
    ///
    /// Returns `true` if the application changed.
    ///
    /// # Errors
    ///
    /// Returns an error for fatal conditions.
    fn run_global(&self, _ctx: &OptimizerContext, _app: &mut Application) -> Result<bool> {
        Ok(false)
    }

    /// Does this pass operate on the whole program?
    ///
    /// Global passes have [`IrPass::run_global`] called instead of
    /// per-method iteration.
    fn is_global(&self) -> bool {
        false
    }
}
