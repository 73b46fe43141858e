//! Ordered walks over the program's subtype graph.
//!
//! The hierarchy index is built once per wave from the (stable) class
//! model: a top-down order visits every class after all of its in-program
//! supertypes (classes and interfaces together), a bottom-up order is the
//! exact reverse. Library supertypes are outside the program and simply
//! act as roots.

use std::collections::{HashMap, HashSet};

use crate::model::{Application, ProgramClass, TypeId};

/// A precomputed traversal index over the program's class hierarchy.
#[derive(Debug)]
pub struct TypeHierarchy {
    top_down: Vec<TypeId>,
    direct_subtypes: HashMap<TypeId, Vec<TypeId>>,
}

impl TypeHierarchy {
    /// Builds the index for the application's current class set.
    #[must_use]
    pub fn build(app: &Application) -> Self {
        // Kahn-style layering: a class is emitted once all of its
        // in-program supertypes have been emitted.
        let mut remaining_supers: HashMap<TypeId, usize> = HashMap::new();
        let mut direct_subtypes: HashMap<TypeId, Vec<TypeId>> = HashMap::new();
        for class in app.classes() {
            let in_program_supers = class
                .supertypes()
                .filter(|&s| app.has_class(s))
                .count();
            remaining_supers.insert(class.ty, in_program_supers);
            for sup in class.supertypes().filter(|&s| app.has_class(s)) {
                direct_subtypes.entry(sup).or_default().push(class.ty);
            }
        }

        let mut ready: Vec<TypeId> = remaining_supers
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&ty, _)| ty)
            .collect();
        ready.sort_unstable();

        let mut top_down = Vec::with_capacity(remaining_supers.len());
        let mut queue = ready;
        while let Some(ty) = queue.pop() {
            top_down.push(ty);
            for &sub in direct_subtypes.get(&ty).map_or(&[][..], Vec::as_slice) {
                let count = remaining_supers
                    .get_mut(&sub)
                    .expect("subtype is a program class");
                *count -= 1;
                if *count == 0 {
                    queue.push(sub);
                }
            }
        }

        Self {
            top_down,
            direct_subtypes,
        }
    }

    /// Types in top-down order (every supertype before its subtypes).
    ///
    /// Classes on an inheritance cycle (an input defect) are absent; the
    /// validation layer rejects such input before optimization.
    #[must_use]
    pub fn top_down_order(&self) -> &[TypeId] {
        &self.top_down
    }

    /// Types in bottom-up order (every subtype before its supertypes).
    #[must_use]
    pub fn bottom_up_order(&self) -> Vec<TypeId> {
        self.top_down.iter().rev().copied().collect()
    }

    /// Direct in-program subtypes of a type.
    #[must_use]
    pub fn direct_subtypes(&self, ty: TypeId) -> &[TypeId] {
        self.direct_subtypes
            .get(&ty)
            .map_or(&[][..], Vec::as_slice)
    }

    /// All in-program transitive subtypes of a type (excluding itself).
    #[must_use]
    pub fn transitive_subtypes(&self, ty: TypeId) -> HashSet<TypeId> {
        let mut out = HashSet::new();
        let mut stack: Vec<TypeId> = self.direct_subtypes(ty).to_vec();
        while let Some(current) = stack.pop() {
            if out.insert(current) {
                stack.extend(self.direct_subtypes(current));
            }
        }
        out
    }

    /// Visits every class top-down.
    pub fn walk_top_down(&self, app: &Application, mut visitor: impl FnMut(&ProgramClass)) {
        for &ty in &self.top_down {
            if let Some(class) = app.class(ty) {
                visitor(class);
            }
        }
    }

    /// Visits every class bottom-up.
    pub fn walk_bottom_up(&self, app: &Application, mut visitor: impl FnMut(&ProgramClass)) {
        for &ty in self.top_down.iter().rev() {
            if let Some(class) = app.class(ty) {
                visitor(class);
            }
        }
    }
}
