//! The whole-program model: interned symbols, classes, and the application.
//!
//! Everything the optimizer knows about the input program lives here:
//!
//! - [`SymbolTable`] - interned type/proto/method/field references with
//!   stable integer identities, shared by every pipeline component
//! - [`ProgramClass`] / [`ProgramMethod`] / [`ProgramField`] - the class
//!   model, including per-method input bytecode and lowered output code
//! - [`Application`] - the program-wide class map plus class-hierarchy and
//!   member-resolution queries
//! - [`KeepOracle`] - the pinned-surface predicate consulted before any
//!   destructive transformation
//!
//! # Identity discipline
//!
//! References are interned: two [`MethodId`]s are equal if and only if they
//! denote the same (holder, name, parameter types, return type) tuple. All
//! side tables in the pipeline key off these integer identities rather than
//! pointer identity, which keeps them stable across IR mutation.
//!
//! # Mutability discipline
//!
//! The [`Application`] is read-only while method-level passes run in
//! parallel; it is mutated only at serial wave boundaries (class merging,
//! synthetic-method installation). This is enforced by phase separation in
//! the scheduler, not by fine-grained locking.

mod app;
mod class;
mod keep;
mod types;

pub use app::{Application, FieldResolution, MethodResolution};
pub use class::{
    ClassAccessFlags, ClassKind, FieldAccessFlags, MethodAccessFlags, MethodBody, MethodCode,
    ProgramClass, ProgramField, ProgramMethod, TryRange,
};
pub use keep::{KeepNothing, KeepOracle, KeepSet};
pub use types::{
    FieldRefData, MethodRefData, ProtoData, SymbolTable, TypeDescriptor, ValueType, FieldId,
    MethodId, ProtoId, StrId, TypeId,
};
