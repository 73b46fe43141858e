//! Override-closure collection for method predicates.
//!
//! Given a predicate over methods, compute every method that satisfies it
//! *or* overrides (or sibling-implements) one that does. A single top-down
//! pass over the class (non-interface) hierarchy is not enough: a class can
//! pick up an interface method of interest purely through its
//! `implements` relationship, with the concrete override living on the
//! class side. Hence the two-phase design:
//!
//! 1. directly-matching interface declarations are propagated down the
//!    interface hierarchy and resolved against every implementing class,
//!    rooting the signature at the class providing the concrete override
//! 2. one top-down depth-first traversal over the full hierarchy (classes
//!    and interfaces together) unions inherited signatures-of-interest and
//!    collects every declaration matching an inherited-or-local signature
//!
//! A signature whose resolution is ambiguous (incomparable default
//! implementations) is excluded from propagation - conservatively "not
//! classified".

use std::collections::{HashMap, HashSet};

use crate::{
    hierarchy::TypeHierarchy,
    model::{Application, MethodId, MethodResolution, ProgramClass, ProgramMethod, ProtoId, TypeId},
};

/// Collects predicate matches and their overrides across the hierarchy.
pub struct MethodOverridesCollector<'a> {
    app: &'a Application,
    hierarchy: &'a TypeHierarchy,
}

impl<'a> MethodOverridesCollector<'a> {
    /// Creates a collector over the application and its hierarchy index.
    #[must_use]
    pub fn new(app: &'a Application, hierarchy: &'a TypeHierarchy) -> Self {
        Self { app, hierarchy }
    }

    /// Computes the full override closure of the predicate.
    #[must_use]
    pub fn collect(
        &self,
        predicate: impl Fn(&ProgramClass, &ProgramMethod) -> bool,
    ) -> HashSet<MethodId> {
        // Phase 1: direct matches, partitioned by declaration side.
        let mut seeds: HashMap<TypeId, HashSet<ProtoId>> = HashMap::new();
        let mut interface_matches: Vec<(TypeId, ProtoId)> = Vec::new();
        for class in self.app.classes() {
            for method in &class.methods {
                if predicate(class, method) {
                    seeds.entry(class.ty).or_default().insert(method.proto);
                    if class.is_interface() {
                        interface_matches.push((class.ty, method.proto));
                    }
                }
            }
        }

        // Phase 2: push interface matches onto implementing classes. The
        // signature travels down the interface hierarchy; every class
        // implementing any of those interfaces resolves it, and the class
        // providing the concrete override becomes a class-side root.
        for (iface, proto) in interface_matches {
            let mut interfaces = self.hierarchy.transitive_subtypes(iface);
            interfaces.insert(iface);
            interfaces.retain(|t| self.app.class(*t).is_some_and(ProgramClass::is_interface));

            for class in self.app.classes() {
                if class.is_interface() {
                    continue;
                }
                if !self.implements_any(class, &interfaces) {
                    continue;
                }
                match self.app.resolve_method(class.ty, proto) {
                    MethodResolution::Found { holder, .. } => {
                        let provider_is_class = self
                            .app
                            .class(holder)
                            .is_some_and(|c| !c.is_interface());
                        if provider_is_class {
                            seeds.entry(holder).or_default().insert(proto);
                        }
                    }
                    // Ambiguous resolution: conservatively not classified.
                    MethodResolution::Ambiguous | MethodResolution::Missing => {}
                }
            }
        }

        // Phase 3: one top-down pass unioning inherited signatures.
        let mut inherited: HashMap<TypeId, HashSet<ProtoId>> = HashMap::new();
        let mut result: HashSet<MethodId> = HashSet::new();
        for &ty in self.hierarchy.top_down_order() {
            let Some(class) = self.app.class(ty) else {
                continue;
            };
            let mut interest: HashSet<ProtoId> = HashSet::new();
            for sup in class.supertypes() {
                if let Some(from_super) = inherited.get(&sup) {
                    interest.extend(from_super.iter().copied());
                }
            }
            if let Some(local) = seeds.get(&ty) {
                interest.extend(local.iter().copied());
            }
            for method in &class.methods {
                if interest.contains(&method.proto) {
                    result.insert(method.id);
                }
            }
            inherited.insert(ty, interest);
        }
        result
    }

    /// Does the class (through its superclass chain) directly implement any
    /// of the given interfaces?
    fn implements_any(&self, class: &ProgramClass, interfaces: &HashSet<TypeId>) -> bool {
        let mut current = Some(class.ty);
        while let Some(ty) = current {
            let Some(c) = self.app.class(ty) else { break };
            if c.interfaces.iter().any(|i| interfaces.contains(i)) {
                return true;
            }
            current = c.super_class;
        }
        false
    }
}
