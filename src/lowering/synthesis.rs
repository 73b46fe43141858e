//! On-demand synthesis of shared utility methods.
//!
//! The always-throwing desugaring needs somewhere to send rewritten call
//! sites: one tiny static helper per error kind that constructs and throws
//! the error. Helpers are deduplicated per program - every call site that
//! needs "throw `NoSuchMethodError`" shares a single method - and built by
//! direct instruction-list construction, not through the IR pipeline:
//! they are small, fixed, and generated repeatedly.

use std::sync::Mutex;

use dashmap::DashMap;

use crate::{
    bytecode::{Instruction, InvokeKind, Op},
    lowering::LoweredMethod,
    model::{
        Application, ClassAccessFlags, ClassKind, MethodAccessFlags, MethodCode, MethodId,
        ProgramClass, ProgramMethod, SymbolTable,
    },
    Result,
};

/// Binary name of the class holding synthesized utility methods.
pub const SYNTHETIC_HOLDER: &str = "shrike/Synthesized";

/// The linkage-error kinds the desugaring can diagnose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrowingKind {
    /// Target does not resolve at all.
    NoSuchMethod,
    /// Target resolves but is inaccessible from the call site.
    IllegalAccess,
    /// Target's static-ness contradicts the invoke's dispatch kind.
    IncompatibleClassChange,
}

impl ThrowingKind {
    /// Binary name of the error class to throw.
    #[must_use]
    pub const fn error_type_name(&self) -> &'static str {
        match self {
            Self::NoSuchMethod => "java/lang/NoSuchMethodError",
            Self::IllegalAccess => "java/lang/IllegalAccessError",
            Self::IncompatibleClassChange => "java/lang/IncompatibleClassChangeError",
        }
    }

    /// Name of the shared helper method.
    #[must_use]
    pub const fn helper_name(&self) -> &'static str {
        match self {
            Self::NoSuchMethod => "throwNoSuchMethodError",
            Self::IllegalAccess => "throwIllegalAccessError",
            Self::IncompatibleClassChange => "throwIncompatibleClassChangeError",
        }
    }
}

/// Per-program cache of synthesized methods.
///
/// Helpers are created lazily from any worker thread; the resulting
/// [`ProgramMethod`]s are parked here and installed into the application
/// at the next serial wave boundary via [`SyntheticMethods::install`].
#[derive(Debug, Default)]
pub struct SyntheticMethods {
    helpers: DashMap<ThrowingKind, MethodId>,
    pending: Mutex<Vec<ProgramMethod>>,
}

impl SyntheticMethods {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared throw helper for an error kind, synthesizing it on first
    /// request.
    ///
    /// The helper's declared return type is the error type itself, so call
    /// sites can pop a value of known type; it never actually returns.
    pub fn throw_helper(&self, kind: ThrowingKind, symbols: &SymbolTable) -> MethodId {
        *self.helpers.entry(kind).or_insert_with(|| {
            let holder = symbols.object_type(SYNTHETIC_HOLDER);
            let error_type = symbols.object_type(kind.error_type_name());
            let proto = symbols.intern_proto(kind.helper_name(), vec![], error_type);
            let id = symbols.intern_method(holder, proto);

            let ctor_proto = symbols.intern_proto("<init>", vec![], symbols.void());
            let ctor = symbols.intern_method(error_type, ctor_proto);

            // new E; dup; invokespecial E.<init>; athrow
            let instructions = vec![
                Instruction::new(0, Op::New(error_type)),
                Instruction::new(1, Op::Dup),
                Instruction::new(
                    2,
                    Op::Invoke {
                        kind: InvokeKind::Special,
                        target: ctor,
                    },
                ),
                Instruction::new(3, Op::Throw),
            ];
            let lowered = LoweredMethod {
                instructions,
                max_stack: 2,
                max_locals: 0,
                frames: Vec::new(),
                handlers: Vec::new(),
                metadata: std::collections::HashMap::new(),
            };

            let mut method = ProgramMethod::new(
                id,
                proto,
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC | MethodAccessFlags::SYNTHETIC,
            );
            method.code = MethodCode::Output(lowered);
            if let Ok(mut pending) = self.pending.lock() {
                pending.push(method);
            }
            id
        })
    }

    /// Number of helpers synthesized so far.
    #[must_use]
    pub fn helper_count(&self) -> usize {
        self.helpers.len()
    }

    /// Installs parked methods into the application (serial wave boundary).
    ///
    /// Creates the synthetic holder class on first use; installation is
    /// idempotent per method.
    ///
    /// # Errors
    ///
    /// Propagates class-registration failures.
    pub fn install(&self, app: &mut Application) -> Result<()> {
        let pending = {
            let Ok(mut guard) = self.pending.lock() else {
                return Err(crate::Error::LockError);
            };
            std::mem::take(&mut *guard)
        };
        if pending.is_empty() {
            return Ok(());
        }

        let symbols = std::sync::Arc::clone(app.symbols());
        let holder_ty = symbols.object_type(SYNTHETIC_HOLDER);
        if !app.has_class(holder_ty) {
            let mut holder = ProgramClass::new(
                holder_ty,
                ClassKind::Class,
                ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::SYNTHETIC,
            );
            holder.super_class = Some(symbols.object());
            app.add_class(holder)?;
        }

        let holder = app.class_mut(holder_ty).expect("holder just ensured");
        for method in pending {
            if holder.method_by_id(method.id).is_none() {
                holder.add_method(method);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_helper_deduplication() {
        let symbols = SymbolTable::new();
        let synthetics = SyntheticMethods::new();

        let a = synthetics.throw_helper(ThrowingKind::NoSuchMethod, &symbols);
        let b = synthetics.throw_helper(ThrowingKind::NoSuchMethod, &symbols);
        let c = synthetics.throw_helper(ThrowingKind::IllegalAccess, &symbols);

        assert_eq!(a, b, "one helper per error kind, shared by all sites");
        assert_ne!(a, c);
        assert_eq!(synthetics.helper_count(), 2);
    }

    #[test]
    fn test_helper_shape() {
        let symbols = SymbolTable::new();
        let synthetics = SyntheticMethods::new();
        let id = synthetics.throw_helper(ThrowingKind::IncompatibleClassChange, &symbols);

        // The helper returns the error type (callers pop it).
        let ret = symbols.return_type(id);
        assert_eq!(
            symbols.display_type(ret),
            "java/lang/IncompatibleClassChangeError"
        );
        assert_eq!(symbols.param_count(id), 0);
    }

    #[test]
    fn test_install_creates_holder_once() {
        let symbols = Arc::new(SymbolTable::new());
        let mut app = Application::new(Arc::clone(&symbols));
        let synthetics = SyntheticMethods::new();

        synthetics.throw_helper(ThrowingKind::NoSuchMethod, &symbols);
        synthetics.throw_helper(ThrowingKind::IllegalAccess, &symbols);
        synthetics.install(&mut app).unwrap();

        let holder_ty = symbols.object_type(SYNTHETIC_HOLDER);
        let holder = app.class(holder_ty).expect("holder installed");
        assert_eq!(holder.methods.len(), 2);
        assert!(holder.methods.iter().all(|m| m.code.output().is_some()));

        // Installing again with nothing pending changes nothing.
        synthetics.install(&mut app).unwrap();
        assert_eq!(
            app.class(holder_ty).unwrap().methods.len(),
            2,
            "installation is idempotent"
        );
    }

    #[test]
    fn test_helper_bytecode_throws() {
        let symbols = SymbolTable::new();
        let synthetics = SyntheticMethods::new();
        synthetics.throw_helper(ThrowingKind::NoSuchMethod, &symbols);

        let pending = synthetics.pending.lock().unwrap();
        let lowered = pending[0].code.output().expect("directly lowered");
        assert!(matches!(lowered.instructions[0].op, Op::New(_)));
        assert!(matches!(
            lowered.instructions.last().unwrap().op,
            Op::Throw
        ));
        assert_eq!(lowered.max_stack, 2);
    }
}
