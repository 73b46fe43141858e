//! Always-throwing invoke desugaring.
//!
//! Other transformations (staticizing, merging, access tightening) can
//! leave an invoke whose resolution is guaranteed to fail at runtime with
//! a linkage error: a static method invoked virtually, an inaccessible
//! target, or no target at all. Rather than ship the broken invoke, the
//! call is replaced by a call to a shared synthesized helper that throws
//! the precise error:
//!
//! - the argument (and receiver) uses are dropped from the invoke
//! - the invoke is retargeted to the per-kind throw helper, whose
//!   exception-typed result is simply left unused
//! - if the original call produced a result, a default constant of the
//!   correct type is materialized under the original result's identity,
//!   so downstream uses and the verifier-required stack shape stay valid
//!
//! The diagnosis prefers the specific error (`IllegalAccessError`,
//! `IncompatibleClassChangeError`) over the generic `NoSuchMethodError`
//! whenever resolution information disambiguates it. Each rewritten site
//! gets instruction metadata naming the error kind, and a warning-level
//! diagnostic is reported once per kind.

use crate::{
    bytecode::{InvokeKind, Op},
    diagnostics::{Diagnostic, DiagnosticKind, DiagnosticLevel, Origin},
    ir::{ConstValue, DefSite, IrFunction, IrInstruction, ValueOrigin},
    lowering::ThrowingKind,
    model::{Application, MethodAccessFlags, MethodId, MethodResolution, TypeId, ValueType},
    optimizer::{EventKind, InstructionMetadata, IrPass, OptimizerContext},
    Error, Result,
};

/// The always-throwing invoke rewriting pass.
pub struct AlwaysThrowingPass;

impl AlwaysThrowingPass {
    /// Diagnoses whether an invoke is guaranteed to throw, and which error.
    ///
    /// # Errors
    ///
    /// Ambiguous resolution is a fatal condition the platform cannot
    /// express; it aborts compilation.
    fn diagnose(
        app: &Application,
        caller: MethodId,
        caller_holder: TypeId,
        kind: InvokeKind,
        target: MethodId,
    ) -> Result<Option<ThrowingKind>> {
        let data = app.symbols().method(target);
        if !app.has_class(data.holder) {
            // Library target: nothing is known statically.
            return Ok(None);
        }
        match app.resolve_method(data.holder, data.proto) {
            MethodResolution::Missing => Ok(Some(ThrowingKind::NoSuchMethod)),
            MethodResolution::Ambiguous => Err(Error::AmbiguousResolution { method: caller }),
            MethodResolution::Found { holder, access, .. } => {
                let target_is_static = access.contains(MethodAccessFlags::STATIC);
                if kind == InvokeKind::Static && !target_is_static {
                    return Ok(Some(ThrowingKind::IncompatibleClassChange));
                }
                if kind.has_receiver() && target_is_static {
                    return Ok(Some(ThrowingKind::IncompatibleClassChange));
                }
                if access.contains(MethodAccessFlags::PRIVATE) && holder != caller_holder {
                    return Ok(Some(ThrowingKind::IllegalAccess));
                }
                Ok(None)
            }
        }
    }

    const fn metadata_for(kind: ThrowingKind) -> InstructionMetadata {
        match kind {
            ThrowingKind::NoSuchMethod => InstructionMetadata::ALWAYS_THROWS_NO_SUCH_METHOD,
            ThrowingKind::IllegalAccess => InstructionMetadata::ALWAYS_THROWS_ILLEGAL_ACCESS,
            ThrowingKind::IncompatibleClassChange => {
                InstructionMetadata::ALWAYS_THROWS_INCOMPATIBLE
            }
        }
    }

    const fn diagnostic_for(kind: ThrowingKind) -> DiagnosticKind {
        match kind {
            ThrowingKind::NoSuchMethod => DiagnosticKind::UnresolvedTarget,
            ThrowingKind::IllegalAccess => DiagnosticKind::InaccessibleTarget,
            ThrowingKind::IncompatibleClassChange => DiagnosticKind::StaticMismatch,
        }
    }

    /// Rewrites one diagnosed invoke in place.
    fn rewrite(
        func: &mut IrFunction,
        ctx: &OptimizerContext,
        instr_id: crate::ir::InstrId,
        kind: ThrowingKind,
    ) {
        let helper = ctx.synthetics.throw_helper(kind, &ctx.symbols);
        let Some((_, position)) = func.locate_instruction(instr_id) else {
            return;
        };
        let (old_uses, old_def) = {
            let instr = func.instruction(instr_id).expect("located above");
            (instr.uses().to_vec(), instr.def())
        };

        // The call no longer consumes anything.
        for used in old_uses {
            if let Some(value) = func.value_mut(used) {
                value.remove_use(crate::ir::UseSite::Instruction(instr_id));
            }
        }
        let exception_ty = ValueType::Reference(ctx.symbols.return_type(helper));
        let exception =
            func.new_value(ValueOrigin::Synthetic, exception_ty, DefSite::instruction(instr_id));
        if let Some(instr) = func.instruction_mut(instr_id) {
            instr.uses_mut().clear();
            instr.set_op(Op::Invoke {
                kind: InvokeKind::Static,
                target: helper,
            });
            instr.set_def(Some(exception));
        }

        // Keep the original result's identity alive with a default value.
        if let Some(original) = old_def {
            let ty = func
                .value(original)
                .map_or(ValueType::Int, crate::ir::Value::ty);
            let const_id = func.alloc_instr_id();
            let (block, _) = func.locate_instruction(instr_id).expect("still present");
            func.block_mut(block)
                .expect("block exists")
                .insert_instruction(
                    position + 1,
                    IrInstruction::new(
                        const_id,
                        Op::Const(ConstValue::default_for(ty)),
                        vec![],
                        Some(original),
                    ),
                );
            if let Some(value) = func.value_mut(original) {
                value.set_def(DefSite::instruction(const_id));
            }
        }
    }
}

impl IrPass for AlwaysThrowingPass {
    fn name(&self) -> &'static str {
        "always-throwing-desugar"
    }

    fn description(&self) -> &'static str {
        "Replaces invokes that are guaranteed to throw with shared throw helpers"
    }

    fn run_on_method(
        &self,
        func: &mut IrFunction,
        ctx: &OptimizerContext,
        app: &Application,
    ) -> Result<bool> {
        let caller = func.method();
        let caller_holder = ctx.symbols.method(caller).holder;
        let invokes: Vec<(crate::ir::InstrId, InvokeKind, MethodId)> = func
            .all_instructions()
            .filter_map(|i| match *i.op() {
                Op::Invoke { kind, target } => Some((i.id(), kind, target)),
                _ => None,
            })
            .collect();

        let mut changed = false;
        for (instr_id, kind, target) in invokes {
            // Helper invokes synthesized by earlier rewrites resolve fine.
            let Some(throwing) = Self::diagnose(app, caller, caller_holder, kind, target)? else {
                continue;
            };
            ctx.attach_metadata(caller, instr_id, Self::metadata_for(throwing));
            ctx.diagnostics.report_once_per_kind(Diagnostic {
                level: DiagnosticLevel::Warning,
                kind: Self::diagnostic_for(throwing),
                origin: Origin::Class(caller_holder),
                method: Some(caller),
                min_api: Some(ctx.options.min_api),
                message: format!(
                    "call to {} always throws {}",
                    ctx.symbols.display_method(target),
                    throwing.error_type_name()
                ),
            });
            Self::rewrite(func, ctx, instr_id, throwing);
            ctx.events
                .record(EventKind::InvokeRewritten)
                .at(caller)
                .message(throwing.error_type_name());
            changed = true;
        }
        Ok(changed)
    }
}
