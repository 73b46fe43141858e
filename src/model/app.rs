//! The application: the whole-program class map and hierarchy queries.
//!
//! [`Application`] owns every [`ProgramClass`] and provides the
//! class-hierarchy services the analyses depend on: immediate supertypes,
//! direct subclasses, subtype tests, and method/field resolution against a
//! given class. Resolution follows the platform rules closely enough for
//! the pipeline's purposes: superclass chain first, then
//! maximally-specific interface default methods, with ambiguous diamonds
//! reported as [`MethodResolution::Ambiguous`] and treated conservatively
//! by callers.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::{
    model::{
        FieldId, MethodAccessFlags, MethodId, ProgramClass, ProgramField, ProgramMethod, ProtoId,
        SymbolTable, TypeId,
    },
    Error, Result,
};

/// Outcome of resolving a method signature against a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodResolution {
    /// A unique target was found.
    Found {
        /// The class that provides the implementation (or declaration).
        holder: TypeId,
        /// The resolved method's identity.
        method: MethodId,
        /// The resolved method's access flags.
        access: MethodAccessFlags,
    },
    /// Multiple incomparable default implementations apply.
    Ambiguous,
    /// No declaration found anywhere in the hierarchy.
    Missing,
}

impl MethodResolution {
    /// Returns the resolved method id, if resolution succeeded.
    #[must_use]
    pub const fn method(&self) -> Option<MethodId> {
        match self {
            Self::Found { method, .. } => Some(*method),
            _ => None,
        }
    }
}

/// Outcome of resolving a field against a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldResolution {
    /// A declaration was found.
    Found {
        /// The class declaring the field.
        holder: TypeId,
        /// The resolved field's identity.
        field: FieldId,
    },
    /// No declaration found.
    Missing,
}

/// The program being compiled: all classes plus hierarchy services.
///
/// During parallel method processing the application is read-only; class
/// merging and synthetic-method installation mutate it at serial wave
/// boundaries only.
#[derive(Debug)]
pub struct Application {
    symbols: Arc<SymbolTable>,
    classes: HashMap<TypeId, ProgramClass>,
}

impl Application {
    /// Creates an empty application sharing the given symbol table.
    #[must_use]
    pub fn new(symbols: Arc<SymbolTable>) -> Self {
        Self {
            symbols,
            classes: HashMap::new(),
        }
    }

    /// The symbol table of this compilation run.
    #[must_use]
    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    /// Registers a class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateDefinition`] if a class with the same type
    /// identity is already present.
    pub fn add_class(&mut self, class: ProgramClass) -> Result<()> {
        if self.classes.contains_key(&class.ty) {
            return Err(Error::DuplicateDefinition(
                self.symbols.display_type(class.ty),
            ));
        }
        self.classes.insert(class.ty, class);
        Ok(())
    }

    /// Removes a class (pruned as unreachable, or merged away).
    pub fn remove_class(&mut self, ty: TypeId) -> Option<ProgramClass> {
        self.classes.remove(&ty)
    }

    /// Looks up a class by type.
    #[must_use]
    pub fn class(&self, ty: TypeId) -> Option<&ProgramClass> {
        self.classes.get(&ty)
    }

    /// Looks up a class by type, mutably.
    pub fn class_mut(&mut self, ty: TypeId) -> Option<&mut ProgramClass> {
        self.classes.get_mut(&ty)
    }

    /// Returns `true` if the type names a program class.
    #[must_use]
    pub fn has_class(&self, ty: TypeId) -> bool {
        self.classes.contains_key(&ty)
    }

    /// Iterates over all classes (arbitrary order).
    pub fn classes(&self) -> impl Iterator<Item = &ProgramClass> {
        self.classes.values()
    }

    /// Number of classes in the program.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Immediate supertypes of a class: superclass first, then interfaces.
    #[must_use]
    pub fn immediate_supertypes(&self, ty: TypeId) -> Vec<TypeId> {
        self.class(ty)
            .map(|c| c.supertypes().collect())
            .unwrap_or_default()
    }

    /// Direct subclasses (and direct implementors, for interfaces).
    #[must_use]
    pub fn direct_subtypes(&self, ty: TypeId) -> Vec<TypeId> {
        self.classes
            .values()
            .filter(|c| c.supertypes().any(|s| s == ty))
            .map(|c| c.ty)
            .collect()
    }

    /// Returns `true` if `sub` is `ty` or a transitive subtype of it.
    #[must_use]
    pub fn is_subtype_of(&self, sub: TypeId, ty: TypeId) -> bool {
        if sub == ty {
            return true;
        }
        let mut worklist = VecDeque::from(self.immediate_supertypes(sub));
        let mut seen = HashSet::new();
        while let Some(current) = worklist.pop_front() {
            if current == ty {
                return true;
            }
            if seen.insert(current) {
                worklist.extend(self.immediate_supertypes(current));
            }
        }
        false
    }

    /// Finds the declared program method for a method identity.
    #[must_use]
    pub fn program_method(&self, id: MethodId) -> Option<&ProgramMethod> {
        let holder = self.symbols.method(id).holder;
        self.class(holder)?.method_by_id(id)
    }

    /// Finds the declared program method for a method identity, mutably.
    pub fn program_method_mut(&mut self, id: MethodId) -> Option<&mut ProgramMethod> {
        let holder = self.symbols.method(id).holder;
        let proto = self.symbols.method(id).proto;
        self.class_mut(holder)?
            .find_method_mut(proto)
            .filter(|m| m.id == id)
    }

    /// All methods of the program that carry input bytecode.
    #[must_use]
    pub fn methods_with_code(&self) -> Vec<MethodId> {
        let mut out: Vec<MethodId> = self
            .classes
            .values()
            .flat_map(|c| c.methods.iter())
            .filter(|m| m.has_input_code())
            .map(|m| m.id)
            .collect();
        out.sort_unstable();
        out
    }

    /// Resolves a method signature against a class.
    ///
    /// Walks the superclass chain first; if no class declaration is found,
    /// searches the transitive interfaces for maximally-specific concrete
    /// (default) implementations. A diamond with incomparable candidates
    /// resolves to [`MethodResolution::Ambiguous`].
    #[must_use]
    pub fn resolve_method(&self, start: TypeId, proto: ProtoId) -> MethodResolution {
        // Superclass chain.
        let mut current = Some(start);
        while let Some(ty) = current {
            let Some(class) = self.class(ty) else { break };
            if let Some(method) = class.find_method(proto) {
                return MethodResolution::Found {
                    holder: ty,
                    method: method.id,
                    access: method.access,
                };
            }
            current = class.super_class;
        }

        // Interface search: collect concrete candidates, keep the
        // maximally specific ones.
        let mut candidates: Vec<(TypeId, MethodId, MethodAccessFlags)> = Vec::new();
        let mut worklist: VecDeque<TypeId> = VecDeque::new();
        let mut seen = HashSet::new();
        let mut chain = Some(start);
        while let Some(ty) = chain {
            let Some(class) = self.class(ty) else { break };
            worklist.extend(class.interfaces.iter().copied());
            chain = class.super_class;
        }
        while let Some(iface) = worklist.pop_front() {
            if !seen.insert(iface) {
                continue;
            }
            if let Some(class) = self.class(iface) {
                if let Some(method) = class.find_method(proto) {
                    if !method.is_abstract() {
                        candidates.push((iface, method.id, method.access));
                        // Do not descend: a declaration shadows its supers.
                        continue;
                    }
                }
                worklist.extend(class.interfaces.iter().copied());
            }
        }

        let all: Vec<TypeId> = candidates.iter().map(|&(iface, _, _)| iface).collect();
        candidates.retain(|&(iface, _, _)| {
            !all.iter()
                .any(|&other| other != iface && self.is_subtype_of(other, iface))
        });

        match candidates.as_slice() {
            [] => MethodResolution::Missing,
            [(holder, method, access)] => MethodResolution::Found {
                holder: *holder,
                method: *method,
                access: *access,
            },
            _ => MethodResolution::Ambiguous,
        }
    }

    /// Resolves a field against a class: superclass chain, then interfaces.
    #[must_use]
    pub fn resolve_field(&self, start: TypeId, field: FieldId) -> FieldResolution {
        let name = self.symbols.field(field).name;
        let ty = self.symbols.field(field).ty;

        let mut worklist = VecDeque::from([start]);
        let mut seen = HashSet::new();
        while let Some(current) = worklist.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            let Some(class) = self.class(current) else {
                continue;
            };
            let declared = class.fields.iter().find(|f| {
                let data = self.symbols.field(f.id);
                data.name == name && data.ty == ty
            });
            if let Some(f) = declared {
                return FieldResolution::Found {
                    holder: current,
                    field: f.id,
                };
            }
            worklist.extend(class.supertypes());
        }
        FieldResolution::Missing
    }

    /// Looks up a program field definition by identity.
    #[must_use]
    pub fn program_field(&self, id: FieldId) -> Option<&ProgramField> {
        let holder = self.symbols.field(id).holder;
        self.class(holder)?.field_by_id(id)
    }
}
