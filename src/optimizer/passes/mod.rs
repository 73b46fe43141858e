//! The built-in optimization passes.
//!
//! Per-method passes (run in parallel waves):
//!
//! - [`PhiSimplificationPass`] - effectively-trivial phi removal
//! - [`AlwaysThrowingPass`] - guaranteed-to-throw invoke desugaring
//! - [`FieldAccessAnalysisPass`] - whole-program field access bits
//! - [`EnumUnboxingPass`] - enum-unboxing candidate classification
//! - [`NullCheckInsertionPass`] - call-site rewrites for staticized methods
//! - [`DeadCodeEliminationPass`] - the normalize step between passes
//!
//! Whole-program passes (class merging, staticizing) live in
//! [`super::merging`].

mod dead_code;
mod enum_unboxing;
mod field_access;
mod null_checks;
mod phi_simplification;
mod throwing;

pub use dead_code::DeadCodeEliminationPass;
pub use enum_unboxing::{EnumCandidate, EnumUnboxingPass};
pub use field_access::{FieldAccessAnalysisPass, FieldAccessBits};
pub use null_checks::NullCheckInsertionPass;
pub use phi_simplification::PhiSimplificationPass;
pub use throwing::AlwaysThrowingPass;
