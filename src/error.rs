use thiserror::Error;

use crate::model::MethodId;

/// The generic Error type, covering all errors this library can return.
///
/// Whole-program optimization is unsound on a partial program, so most
/// variants are fatal: they abort the compilation of the entire input with
/// a diagnostic identifying the offending method or class.
///
/// # Error Categories
///
/// ## Input defects (fatal)
/// - [`Error::Verification`] - Malformed bytecode rejected during IR construction
/// - [`Error::DuplicateDefinition`] - Duplicate class or member definitions
///
/// ## Pipeline invariants (fatal)
/// - [`Error::CyclicForceInlining`] - A call cycle made entirely of forced-inline edges
/// - [`Error::AmbiguousResolution`] - Invoke target resolves to incomparable candidates
/// - [`Error::MergeSourceSurvived`] - A merged-away class still present in the output
///
/// ## Infrastructure
/// - [`Error::LockError`] - Thread synchronization failure
/// - [`Error::GraphError`] - Call-graph or hierarchy-graph inconsistency
#[derive(Error, Debug)]
pub enum Error {
    /// A method body failed stack/register verification during IR construction.
    ///
    /// The input bytecode is malformed (stack underflow, inconsistent join
    /// depths, a jump to a nonexistent offset, falling off the end of the
    /// method). This is not locally recoverable; the whole-program compile
    /// is aborted. The error carries the source location where the defect
    /// was detected for debugging.
    #[error("Verification failed for method {method} - {file}:{line}: {message}")]
    Verification {
        /// The method whose bytecode failed verification.
        method: MethodId,
        /// Description of the verification failure.
        message: String,
        /// The source file in which this error was raised.
        file: &'static str,
        /// The source line in which this error was raised.
        line: u32,
    },

    /// A call cycle exists in which every edge targets a force-inline method.
    ///
    /// Forced inlining is a correctness requirement (the callee's code is
    /// invalid outside an inlined context), so no edge of such a cycle may
    /// be dropped: the requirement is unsatisfiable.
    #[error("Cyclic force inlining: {cycle}")]
    CyclicForceInlining {
        /// Human-readable rendering of the offending cycle.
        cycle: String,
    },

    /// An invoke resolved to multiple incomparable candidates.
    ///
    /// Happens for diamond default-method shapes the target platform cannot
    /// disambiguate. The offending call site's enclosing method is reported.
    #[error("Ambiguous method resolution in {method}")]
    AmbiguousResolution {
        /// The method containing the ambiguous invoke.
        method: MethodId,
    },

    /// Two definitions of the same class or member were provided.
    #[error("Duplicate definition: {0}")]
    DuplicateDefinition(String),

    /// A class recorded as merged away still exists in the program.
    ///
    /// Raised only by the end-of-pipeline consistency check; indicates a
    /// programming error in a merging pass, not an input defect.
    #[error("Merge source class survived the pipeline: {0}")]
    MergeSourceSurvived(String),

    /// Failed to lock a shared structure.
    ///
    /// Raised when a poisoned lock is encountered, typically after a panic
    /// on another worker thread.
    #[error("Failed to lock target")]
    LockError,

    /// Call-graph or hierarchy-graph inconsistency.
    #[error("{0}")]
    GraphError(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
