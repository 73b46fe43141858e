//! Enum-unboxing candidate classification.
//!
//! An enum class whose instances are only ever compared, switched over,
//! and asked for their own members can be represented by plain integers.
//! This pass performs the classification half: every value of enum type is
//! inspected, and any use the unboxed representation could not support
//! (escaping to the heap, crossing a method boundary, identity-observing
//! casts) poisons the whole candidate class. Classes are seeded lazily on
//! first sighting; an enum never mentioned in code trivially stays
//! eligible.
//!
//! The rewriting half consumes [`EnumCandidate`] entries after the final
//! wave; a poisoned candidate is simply left boxed.

use crate::{
    bytecode::Op,
    ir::{IrFunction, UseSite, ValueId},
    model::{Application, TypeId, ValueType},
    optimizer::{EventKind, IrPass, OptimizerContext},
    Result,
};

/// Classification state of one enum class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumCandidate {
    /// Still eligible for unboxing.
    pub eligible: bool,
    /// Why eligibility was lost, if it was.
    pub reason: Option<&'static str>,
}

impl EnumCandidate {
    /// A fresh, eligible candidate.
    #[must_use]
    pub const fn eligible() -> Self {
        Self {
            eligible: true,
            reason: None,
        }
    }
}

/// The enum-unboxing classification pass.
pub struct EnumUnboxingPass;

impl EnumUnboxingPass {
    /// Checks one use of an enum-typed value; `Ok` or a poison reason.
    fn check_use(
        func: &IrFunction,
        enum_ty: TypeId,
        value: ValueId,
        site: UseSite,
        ctx: &OptimizerContext,
    ) -> Option<&'static str> {
        let user = match site {
            // Merging enum values with each other is fine.
            UseSite::Phi(_) => return None,
            UseSite::Instruction(id) => func.instruction(id)?,
        };
        match *user.op() {
            // Reference comparisons survive unboxing as int comparisons.
            Op::IfCmp { .. } | Op::If { .. } | Op::InstanceOf(_) => None,
            // Calling the enum's own methods on the value is rewritable.
            Op::Invoke { kind, target }
                if kind.has_receiver()
                    && user.uses().first() == Some(&value)
                    && ctx.symbols.method(target).holder == enum_ty =>
            {
                None
            }
            // Reading the enum's own fields (ordinal-like state) is fine.
            Op::GetField(field)
                if ctx.symbols.field(field).holder == enum_ty
                    && user.uses().first() == Some(&value) =>
            {
                None
            }
            Op::Return(_) => Some("escapes through a return"),
            Op::Invoke { .. } => Some("escapes as a call argument"),
            Op::PutField(_) | Op::PutStatic(_) => Some("escapes into a field"),
            Op::ArrayStore(_) => Some("escapes into an array"),
            Op::CheckCast(_) => Some("identity observed by a cast"),
            Op::Throw => Some("thrown"),
            _ => Some("unsupported use"),
        }
    }

    fn poison(ctx: &OptimizerContext, func: &IrFunction, enum_ty: TypeId, reason: &'static str) {
        let mut entry = ctx
            .enum_candidates
            .entry(enum_ty)
            .or_insert_with(EnumCandidate::eligible);
        if entry.eligible {
            *entry = EnumCandidate {
                eligible: false,
                reason: Some(reason),
            };
            drop(entry);
            ctx.events
                .record(EventKind::EnumCandidatePoisoned)
                .at(func.method())
                .message(reason);
        }
    }
}

impl IrPass for EnumUnboxingPass {
    fn name(&self) -> &'static str {
        "enum-unboxing-classification"
    }

    fn description(&self) -> &'static str {
        "Classifies enum classes whose values never escape their own API"
    }

    fn run_on_method(
        &self,
        func: &mut IrFunction,
        ctx: &OptimizerContext,
        app: &Application,
    ) -> Result<bool> {
        for value in func.values() {
            let ValueType::Reference(ty) = value.ty() else {
                continue;
            };
            let is_enum = app.class(ty).is_some_and(crate::model::ProgramClass::is_enum);
            if !is_enum {
                continue;
            }
            if ctx.keep.is_pinned_class(ty) {
                Self::poison(ctx, func, ty, "pinned by a keep rule");
                continue;
            }
            ctx.enum_candidates
                .entry(ty)
                .or_insert_with(EnumCandidate::eligible);

            for &site in value.uses() {
                if let Some(reason) = Self::check_use(func, ty, value.id(), site, ctx) {
                    Self::poison(ctx, func, ty, reason);
                    break;
                }
            }
        }
        // Classification only; the IR is untouched.
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{IfCond, InstructionAssembler, InvokeKind};
    use crate::ir::IrBuilder;
    use crate::model::{
        ClassAccessFlags, ClassKind, KeepNothing, KeepOracle, KeepSet, MethodId, ProgramClass,
        SymbolTable,
    };
    use crate::Options;
    use std::sync::Arc;

    struct Fixture {
        symbols: Arc<SymbolTable>,
        app: Application,
        enum_ty: TypeId,
    }

    impl Fixture {
        fn new() -> Self {
            let symbols = Arc::new(SymbolTable::new());
            let mut app = Application::new(Arc::clone(&symbols));
            let enum_ty = symbols.object_type("com/example/Color");
            let mut class = ProgramClass::new(enum_ty, ClassKind::Enum, ClassAccessFlags::PUBLIC);
            class.super_class = Some(symbols.object_type("java/lang/Enum"));
            app.add_class(class).unwrap();
            Self {
                symbols,
                app,
                enum_ty,
            }
        }

        fn ctx(&self, keep: Arc<dyn KeepOracle>) -> OptimizerContext {
            OptimizerContext::new(Arc::clone(&self.symbols), Options::default(), keep)
        }

        fn method(&self, name: &str) -> MethodId {
            let holder = self.symbols.object_type("com/example/User");
            let proto = self
                .symbols
                .intern_proto(name, vec![], self.symbols.void());
            self.symbols.intern_method(holder, proto)
        }

        fn enum_field(&self) -> crate::model::FieldId {
            self.symbols
                .intern_field(self.enum_ty, "RED", self.enum_ty)
        }
    }

    #[test]
    fn test_comparison_only_use_stays_eligible() {
        let fx = Fixture::new();
        let ctx = fx.ctx(Arc::new(KeepNothing));
        let method = fx.method("compare");
        let field = fx.enum_field();

        // Two enum constants compared by reference.
        let mut asm = InstructionAssembler::new(0);
        let exit = asm.label();
        asm.get_static(field)
            .get_static(field)
            .if_cmp(IfCond::Eq, exit);
        asm.bind(exit);
        asm.ret(None);

        let mut func = IrBuilder::new(&fx.symbols)
            .build(method, true, &asm.finish().unwrap())
            .unwrap();
        EnumUnboxingPass
            .run_on_method(&mut func, &ctx, &fx.app)
            .unwrap();

        let candidate = *ctx.enum_candidates.get(&fx.enum_ty).unwrap();
        assert!(candidate.eligible);
    }

    #[test]
    fn test_escape_as_argument_poisons() {
        let fx = Fixture::new();
        let ctx = fx.ctx(Arc::new(KeepNothing));
        let method = fx.method("leak");
        let field = fx.enum_field();

        // The enum value is passed to an unrelated method.
        let other = fx.symbols.object_type("com/example/Sink");
        let sink_proto =
            fx.symbols
                .intern_proto("take", vec![fx.enum_ty], fx.symbols.void());
        let sink = fx.symbols.intern_method(other, sink_proto);

        let mut asm = InstructionAssembler::new(0);
        asm.get_static(field)
            .invoke(InvokeKind::Static, sink)
            .ret(None);
        let mut func = IrBuilder::new(&fx.symbols)
            .build(method, true, &asm.finish().unwrap())
            .unwrap();
        EnumUnboxingPass
            .run_on_method(&mut func, &ctx, &fx.app)
            .unwrap();

        let candidate = *ctx.enum_candidates.get(&fx.enum_ty).unwrap();
        assert!(!candidate.eligible);
        assert_eq!(candidate.reason, Some("escapes as a call argument"));
        assert_eq!(ctx.events.count(EventKind::EnumCandidatePoisoned), 1);
    }

    #[test]
    fn test_self_invoke_stays_eligible() {
        let fx = Fixture::new();
        let ctx = fx.ctx(Arc::new(KeepNothing));
        let method = fx.method("selfcall");
        let field = fx.enum_field();
        let ordinal_proto = fx
            .symbols
            .intern_proto("ordinal", vec![], fx.symbols.int());
        let ordinal = fx.symbols.intern_method(fx.enum_ty, ordinal_proto);

        let mut asm = InstructionAssembler::new(0);
        asm.get_static(field)
            .invoke(InvokeKind::Virtual, ordinal)
            .pop()
            .ret(None);
        let mut func = IrBuilder::new(&fx.symbols)
            .build(method, true, &asm.finish().unwrap())
            .unwrap();
        EnumUnboxingPass
            .run_on_method(&mut func, &ctx, &fx.app)
            .unwrap();

        assert!(ctx.enum_candidates.get(&fx.enum_ty).unwrap().eligible);
    }

    #[test]
    fn test_pinned_enum_poisoned() {
        let fx = Fixture::new();
        let mut keep = KeepSet::new();
        keep.pin_class(fx.enum_ty);
        let ctx = fx.ctx(Arc::new(keep));
        let method = fx.method("pinneduse");
        let field = fx.enum_field();

        let mut asm = InstructionAssembler::new(0);
        asm.get_static(field).pop().ret(None);
        let mut func = IrBuilder::new(&fx.symbols)
            .build(method, true, &asm.finish().unwrap())
            .unwrap();
        EnumUnboxingPass
            .run_on_method(&mut func, &ctx, &fx.app)
            .unwrap();

        let candidate = *ctx.enum_candidates.get(&fx.enum_ty).unwrap();
        assert!(!candidate.eligible);
        assert_eq!(candidate.reason, Some("pinned by a keep rule"));
    }
}
