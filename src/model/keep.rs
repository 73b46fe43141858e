//! The keep-rule oracle: the pinned API surface.
//!
//! Keep rules are parsed outside this crate; the pipeline only consults a
//! boolean predicate: is this class/method/field pinned and therefore
//! ineligible for removal, merging, or renaming? Every destructive
//! transformation checks the oracle before acting.

use std::collections::HashSet;

use crate::model::{FieldId, MethodId, TypeId};

/// The pinned-surface predicate consulted before destructive transforms.
pub trait KeepOracle: Send + Sync {
    /// Is this class pinned (must survive with its identity)?
    fn is_pinned_class(&self, ty: TypeId) -> bool;

    /// Is this method pinned (must survive with its signature)?
    fn is_pinned_method(&self, method: MethodId) -> bool;

    /// Is this field pinned?
    fn is_pinned_field(&self, field: FieldId) -> bool;
}

/// An oracle that pins nothing: the whole program is fair game.
///
/// Used by tests and by closed-world compilations with an explicit
/// entry-point root set handled elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepNothing;

impl KeepOracle for KeepNothing {
    fn is_pinned_class(&self, _ty: TypeId) -> bool {
        false
    }

    fn is_pinned_method(&self, _method: MethodId) -> bool {
        false
    }

    fn is_pinned_field(&self, _field: FieldId) -> bool {
        false
    }
}

/// A set-based oracle over explicit pinned items.
#[derive(Debug, Default)]
pub struct KeepSet {
    classes: HashSet<TypeId>,
    methods: HashSet<MethodId>,
    fields: HashSet<FieldId>,
}

impl KeepSet {
    /// Creates an empty keep set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins a class.
    pub fn pin_class(&mut self, ty: TypeId) {
        self.classes.insert(ty);
    }

    /// Pins a method. The holder class is pinned implicitly.
    pub fn pin_method(&mut self, method: MethodId) {
        self.methods.insert(method);
    }

    /// Pins a field. The holder class is pinned implicitly.
    pub fn pin_field(&mut self, field: FieldId) {
        self.fields.insert(field);
    }
}

impl KeepOracle for KeepSet {
    fn is_pinned_class(&self, ty: TypeId) -> bool {
        self.classes.contains(&ty)
    }

    fn is_pinned_method(&self, method: MethodId) -> bool {
        self.methods.contains(&method)
    }

    fn is_pinned_field(&self, field: FieldId) -> bool {
        self.fields.contains(&field)
    }
}
