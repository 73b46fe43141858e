//! Class-hierarchy traversal utilities.
//!
//! Whole-program analyses need to push per-method facts across the subtype
//! graph: which methods override a matched method, which classes belong to
//! a merged group, which supertypes contribute signatures. This module
//! provides the depth-first walkers ([`TypeHierarchy`]) and the two-phase
//! [`MethodOverridesCollector`] used for override classification.

mod overrides;
mod traversal;

pub use overrides::MethodOverridesCollector;
pub use traversal::TypeHierarchy;
