//! Typed bytecode instructions with stack behavior and flow metadata.

use std::fmt;

use strum::IntoStaticStr;

use crate::{
    ir::ConstValue,
    model::{FieldId, MethodId, SymbolTable, TypeId, ValueType},
};

/// Numeric/bitwise binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division (throws on integer division by zero).
    Div,
    /// Remainder (throws on integer division by zero).
    Rem,
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Bitwise XOR.
    Xor,
    /// Shift left.
    Shl,
    /// Arithmetic shift right.
    Shr,
    /// Logical shift right.
    Ushr,
    /// Three-way compare (wide/float compare pushing an int).
    Cmp,
}

impl BinaryOp {
    /// Returns `true` if operand order does not matter.
    #[must_use]
    pub const fn is_commutative(&self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor)
    }

    /// Returns `true` if this operator can throw for the given operand type.
    #[must_use]
    pub const fn can_throw(&self, ty: ValueType) -> bool {
        matches!(self, Self::Div | Self::Rem) && matches!(ty, ValueType::Int | ValueType::Long)
    }
}

/// Numeric unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Bitwise NOT.
    Not,
}

/// Conditions for single-operand (zero/null compare) and two-operand branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum IfCond {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Ge,
    /// Greater than.
    Gt,
    /// Less than or equal.
    Le,
}

/// Invoke dispatch kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum InvokeKind {
    /// Virtual dispatch on the receiver's runtime class.
    Virtual,
    /// Direct dispatch: constructors, private methods, super calls.
    Special,
    /// Static dispatch, no receiver.
    Static,
    /// Interface dispatch.
    Interface,
}

impl InvokeKind {
    /// Returns `true` if this invoke consumes a receiver.
    #[must_use]
    pub const fn has_receiver(&self) -> bool {
        !matches!(self, Self::Static)
    }
}

/// One typed operation.
///
/// Variants marked "IR-only" are synthesized during optimization and never
/// appear in input streams; lowering either keeps them (the dex writer has
/// a native null-check idiom) or expands them.
#[derive(Debug, Clone, Copy, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Op {
    /// No operation.
    Nop,
    /// Push a constant.
    Const(ConstValue),
    /// Load a local-variable slot.
    Load {
        /// Local slot index.
        slot: u16,
        /// Computational type of the slot.
        ty: ValueType,
    },
    /// Store into a local-variable slot.
    Store {
        /// Local slot index.
        slot: u16,
        /// Computational type of the slot.
        ty: ValueType,
    },
    /// Discard the top stack value.
    Pop,
    /// Duplicate the top stack value.
    Dup,
    /// Binary arithmetic/bitwise operation.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Operand computational type.
        ty: ValueType,
    },
    /// Unary arithmetic/bitwise operation.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// Operand computational type.
        ty: ValueType,
    },
    /// Numeric conversion.
    Convert {
        /// Source computational type.
        from: ValueType,
        /// Destination computational type.
        to: ValueType,
    },
    /// Read an instance field (pops receiver).
    GetField(FieldId),
    /// Write an instance field (pops receiver + value).
    PutField(FieldId),
    /// Read a static field.
    GetStatic(FieldId),
    /// Write a static field (pops value).
    PutStatic(FieldId),
    /// Invoke a method.
    Invoke {
        /// Dispatch kind.
        kind: InvokeKind,
        /// Invoked method reference.
        target: MethodId,
    },
    /// Allocate an uninitialized instance.
    New(TypeId),
    /// Allocate an array (pops length); the type is the component type.
    NewArray(TypeId),
    /// Array length (pops array ref).
    ArrayLength,
    /// Array element read (pops array ref + index).
    ArrayLoad(ValueType),
    /// Array element write (pops array ref + index + value).
    ArrayStore(ValueType),
    /// Checked reference cast.
    CheckCast(TypeId),
    /// Type test (pushes int 0/1).
    InstanceOf(TypeId),
    /// Unconditional branch.
    Goto(u32),
    /// Single-operand conditional branch (compare against zero/null).
    If {
        /// Branch condition.
        cond: IfCond,
        /// Taken target (instruction index); falls through otherwise.
        target: u32,
    },
    /// Two-operand conditional branch.
    IfCmp {
        /// Branch condition.
        cond: IfCond,
        /// Taken target (instruction index); falls through otherwise.
        target: u32,
    },
    /// Return, with an optional value of the given type.
    Return(Option<ValueType>),
    /// Throw the top-of-stack reference.
    Throw,
    /// Explicit null check: throws if the reference is null, otherwise
    /// passes it through. IR-only.
    NullCheck,
    /// Formal-parameter binding at method entry. IR-only.
    Argument {
        /// Parameter index (receiver is index 0 for instance methods).
        index: u16,
        /// Parameter computational type.
        ty: ValueType,
    },
    /// Marks a reference as proven non-null for downstream analyses.
    /// IR-only; erased during lowering.
    AssumeNonNull,
    /// Binds the in-flight exception at a handler entry. First instruction
    /// of every handler block; the class-file encoding represents it as the
    /// implicit handler-entry stack state.
    MoveException(TypeId),
}

/// Stack pops/pushes of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBehavior {
    /// Number of values popped.
    pub pops: u8,
    /// Number of values pushed.
    pub pushes: u8,
}

impl StackBehavior {
    /// Net stack-depth change.
    #[must_use]
    pub const fn net_effect(&self) -> i16 {
        self.pushes as i16 - self.pops as i16
    }
}

/// Control-flow classification of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Falls through to the next instruction.
    Sequential,
    /// Always branches to its target.
    UnconditionalBranch,
    /// Branches to its target or falls through.
    ConditionalBranch,
    /// Leaves the method normally.
    Return,
    /// Leaves the method exceptionally.
    Throw,
}

/// One instruction of a method's stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Index of this instruction in its stream.
    pub offset: u32,
    /// The operation.
    pub op: Op,
}

impl Instruction {
    /// Creates an instruction.
    #[must_use]
    pub const fn new(offset: u32, op: Op) -> Self {
        Self { offset, op }
    }

    /// Mnemonic of the operation.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        (&self.op).into()
    }

    /// Stack behavior; invoke pop counts come from the symbol table.
    #[must_use]
    pub fn stack_behavior(&self, symbols: &SymbolTable) -> StackBehavior {
        let (pops, pushes) = match &self.op {
            Op::Nop | Op::Goto(_) => (0, 0),
            Op::Const(_) | Op::Load { .. } | Op::New(_) | Op::Argument { .. }
            | Op::MoveException(_) => (0, 1),
            Op::Store { .. } | Op::Pop | Op::If { .. } | Op::PutStatic(_) | Op::Throw => (1, 0),
            Op::Dup => (1, 2),
            Op::Binary { .. } => (2, 1),
            Op::Unary { .. }
            | Op::Convert { .. }
            | Op::GetField(_)
            | Op::NewArray(_)
            | Op::ArrayLength
            | Op::CheckCast(_)
            | Op::InstanceOf(_)
            | Op::NullCheck
            | Op::AssumeNonNull => (1, 1),
            Op::GetStatic(_) => (0, 1),
            Op::PutField(_) | Op::IfCmp { .. } => (2, 0),
            Op::ArrayLoad(_) => (2, 1),
            Op::ArrayStore(_) => (3, 0),
            Op::Return(value) => (u8::from(value.is_some()), 0),
            Op::Invoke { kind, target } => {
                let params = symbols.param_count(*target);
                let receiver = usize::from(kind.has_receiver());
                #[allow(clippy::cast_possible_truncation)]
                let pops = (params + receiver) as u8;
                let pushes = u8::from(!symbols.is_void(symbols.return_type(*target)));
                (pops, pushes)
            }
        };
        StackBehavior { pops, pushes }
    }

    /// Control-flow classification.
    #[must_use]
    pub const fn flow_type(&self) -> FlowType {
        match self.op {
            Op::Goto(_) => FlowType::UnconditionalBranch,
            Op::If { .. } | Op::IfCmp { .. } => FlowType::ConditionalBranch,
            Op::Return(_) => FlowType::Return,
            Op::Throw => FlowType::Throw,
            _ => FlowType::Sequential,
        }
    }

    /// Explicit branch targets (instruction indices).
    #[must_use]
    pub fn branch_targets(&self) -> Vec<u32> {
        match self.op {
            Op::Goto(target) | Op::If { target, .. } | Op::IfCmp { target, .. } => vec![target],
            _ => Vec::new(),
        }
    }

    /// Returns `true` if execution can leave this instruction exceptionally.
    ///
    /// Used to add exception-handler edges during IR construction.
    #[must_use]
    pub fn can_throw(&self) -> bool {
        match &self.op {
            Op::Invoke { .. }
            | Op::GetField(_)
            | Op::PutField(_)
            | Op::ArrayLength
            | Op::ArrayLoad(_)
            | Op::ArrayStore(_)
            | Op::NewArray(_)
            | Op::New(_)
            | Op::CheckCast(_)
            | Op::Throw
            | Op::NullCheck => true,
            Op::Binary { op, ty } => op.can_throw(*ty),
            _ => false,
        }
    }

    /// Returns `true` if this instruction has observable effects beyond
    /// producing its result, and so must not be removed even when unused.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        match &self.op {
            Op::Invoke { .. }
            | Op::PutField(_)
            | Op::PutStatic(_)
            | Op::GetField(_)
            | Op::GetStatic(_)
            | Op::ArrayStore(_)
            | Op::ArrayLoad(_)
            | Op::ArrayLength
            | Op::New(_)
            | Op::NewArray(_)
            | Op::CheckCast(_)
            | Op::Throw
            | Op::NullCheck
            | Op::Store { .. }
            | Op::Return(_)
            | Op::Goto(_)
            | Op::If { .. }
            | Op::IfCmp { .. }
            | Op::Argument { .. }
            | Op::MoveException(_) => true,
            Op::Binary { op, ty } => op.can_throw(*ty),
            Op::Nop
            | Op::Const(_)
            | Op::Load { .. }
            | Op::Pop
            | Op::Dup
            | Op::Unary { .. }
            | Op::Convert { .. }
            | Op::InstanceOf(_)
            | Op::AssumeNonNull => false,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{} {}", self.offset, self.mnemonic())?;
        match &self.op {
            Op::Const(c) => write!(f, " {c}"),
            Op::Load { slot, .. } | Op::Store { slot, .. } => write!(f, " {slot}"),
            Op::Binary { op, .. } => write!(f, ".{}", <&'static str>::from(op)),
            Op::Goto(target) => write!(f, " -> @{target}"),
            Op::If { cond, target } | Op::IfCmp { cond, target } => {
                write!(f, ".{} -> @{target}", <&'static str>::from(cond))
            }
            Op::Invoke { kind, target } => {
                write!(f, ".{} {target}", <&'static str>::from(kind))
            }
            Op::GetField(field) | Op::PutField(field) | Op::GetStatic(field)
            | Op::PutStatic(field) => write!(f, " {field}"),
            Op::Argument { index, .. } => write!(f, " {index}"),
            _ => Ok(()),
        }
    }
}
