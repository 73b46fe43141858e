//! Label-based instruction assembler.
//!
//! Builds a [`MethodBody`] from a sequence of typed operations with
//! forward-reference labels. Used by tests to craft method bodies and by
//! the synthesis layer to construct utility methods directly, without
//! going through the IR pipeline.
//!
//! # Examples
//!
//! ```rust
//! use shrike::bytecode::{IfCond, InstructionAssembler};
//! use shrike::model::ValueType;
//!
//! let mut asm = InstructionAssembler::new(1);
//! let done = asm.label();
//! asm.load(0, ValueType::Int)
//!     .if_zero(IfCond::Ne, done)
//!     .iconst(1)
//!     .ret(Some(ValueType::Int));
//! asm.bind(done);
//! asm.iconst(0).ret(Some(ValueType::Int));
//! let body = asm.finish().unwrap();
//! assert_eq!(body.instructions.len(), 6);
//! ```

use crate::{
    bytecode::{BinaryOp, IfCond, Instruction, InvokeKind, Op},
    ir::ConstValue,
    model::{FieldId, MethodBody, MethodId, TryRange, TypeId, ValueType},
    Error, Result,
};

/// A forward-referenceable position in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Builds method bodies instruction by instruction.
#[derive(Debug, Default)]
pub struct InstructionAssembler {
    instructions: Vec<Instruction>,
    labels: Vec<Option<u32>>,
    patches: Vec<(usize, Label)>,
    handlers: Vec<(Label, Label, Label, Option<TypeId>)>,
    max_locals: u16,
}

impl InstructionAssembler {
    /// Creates an assembler for a method with the given local-slot count.
    #[must_use]
    pub fn new(max_locals: u16) -> Self {
        Self {
            max_locals,
            ..Self::default()
        }
    }

    /// Allocates an unbound label.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds a label to the next emitted instruction.
    ///
    /// # Panics
    ///
    /// Panics if the label is already bound.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        assert!(self.labels[label.0].is_none(), "label bound twice");
        #[allow(clippy::cast_possible_truncation)]
        let offset = self.instructions.len() as u32;
        self.labels[label.0] = Some(offset);
        self
    }

    /// Emits a raw operation.
    pub fn emit(&mut self, op: Op) -> &mut Self {
        #[allow(clippy::cast_possible_truncation)]
        let offset = self.instructions.len() as u32;
        self.instructions.push(Instruction::new(offset, op));
        self
    }

    fn emit_branch(&mut self, op: Op, label: Label) -> &mut Self {
        self.patches.push((self.instructions.len(), label));
        self.emit(op)
    }

    /// Pushes an int constant.
    pub fn iconst(&mut self, value: i32) -> &mut Self {
        self.emit(Op::Const(ConstValue::Int(value)))
    }

    /// Pushes an arbitrary constant.
    pub fn ldc(&mut self, value: ConstValue) -> &mut Self {
        self.emit(Op::Const(value))
    }

    /// Loads a local slot.
    pub fn load(&mut self, slot: u16, ty: ValueType) -> &mut Self {
        self.emit(Op::Load { slot, ty })
    }

    /// Stores into a local slot.
    pub fn store(&mut self, slot: u16, ty: ValueType) -> &mut Self {
        self.emit(Op::Store { slot, ty })
    }

    /// Pops the top stack value.
    pub fn pop(&mut self) -> &mut Self {
        self.emit(Op::Pop)
    }

    /// Duplicates the top stack value.
    pub fn dup(&mut self) -> &mut Self {
        self.emit(Op::Dup)
    }

    /// Emits a binary operation.
    pub fn binary(&mut self, op: BinaryOp, ty: ValueType) -> &mut Self {
        self.emit(Op::Binary { op, ty })
    }

    /// Integer addition shorthand.
    pub fn iadd(&mut self) -> &mut Self {
        self.binary(BinaryOp::Add, ValueType::Int)
    }

    /// Reads an instance field.
    pub fn get_field(&mut self, field: FieldId) -> &mut Self {
        self.emit(Op::GetField(field))
    }

    /// Writes an instance field.
    pub fn put_field(&mut self, field: FieldId) -> &mut Self {
        self.emit(Op::PutField(field))
    }

    /// Reads a static field.
    pub fn get_static(&mut self, field: FieldId) -> &mut Self {
        self.emit(Op::GetStatic(field))
    }

    /// Writes a static field.
    pub fn put_static(&mut self, field: FieldId) -> &mut Self {
        self.emit(Op::PutStatic(field))
    }

    /// Invokes a method.
    pub fn invoke(&mut self, kind: InvokeKind, target: MethodId) -> &mut Self {
        self.emit(Op::Invoke { kind, target })
    }

    /// Allocates an instance.
    pub fn new_instance(&mut self, ty: TypeId) -> &mut Self {
        self.emit(Op::New(ty))
    }

    /// Unconditional branch.
    pub fn goto(&mut self, label: Label) -> &mut Self {
        self.emit_branch(Op::Goto(u32::MAX), label)
    }

    /// Branch comparing the top value against zero/null.
    pub fn if_zero(&mut self, cond: IfCond, label: Label) -> &mut Self {
        self.emit_branch(
            Op::If {
                cond,
                target: u32::MAX,
            },
            label,
        )
    }

    /// Branch comparing the top two values.
    pub fn if_cmp(&mut self, cond: IfCond, label: Label) -> &mut Self {
        self.emit_branch(
            Op::IfCmp {
                cond,
                target: u32::MAX,
            },
            label,
        )
    }

    /// Return, with an optional value.
    pub fn ret(&mut self, value: Option<ValueType>) -> &mut Self {
        self.emit(Op::Return(value))
    }

    /// Throws the top-of-stack reference.
    pub fn athrow(&mut self) -> &mut Self {
        self.emit(Op::Throw)
    }

    /// Registers an exception handler for the range `[start, end)`.
    pub fn protect(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<TypeId>,
    ) -> &mut Self {
        self.handlers.push((start, end, handler, catch_type));
        self
    }

    /// Resolves labels and produces the method body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Error`] if any referenced label was never bound.
    pub fn finish(mut self) -> Result<MethodBody> {
        let resolve = |labels: &[Option<u32>], label: Label| -> Result<u32> {
            labels[label.0]
                .ok_or_else(|| Error::Error(format!("unbound label {}", label.0)))
        };

        for (index, label) in std::mem::take(&mut self.patches) {
            let target = resolve(&self.labels, label)?;
            match &mut self.instructions[index].op {
                Op::Goto(t) | Op::If { target: t, .. } | Op::IfCmp { target: t, .. } => {
                    *t = target;
                }
                other => {
                    return Err(Error::Error(format!(
                        "patch target is not a branch: {other:?}"
                    )))
                }
            }
        }

        let mut handlers = Vec::with_capacity(self.handlers.len());
        for (start, end, handler, catch_type) in &self.handlers {
            handlers.push(TryRange {
                start: resolve(&self.labels, *start)?,
                end: resolve(&self.labels, *end)?,
                handler: resolve(&self.labels, *handler)?,
                catch_type: *catch_type,
            });
        }

        Ok(MethodBody {
            instructions: self.instructions,
            max_locals: self.max_locals,
            handlers,
        })
    }
}
