//! Class merging: records and the whole-program merging passes.
//!
//! A merged-classes record is a many-to-one mapping from source class
//! types to the surviving target type. Records are built by the merging
//! passes at serial wave boundaries and consulted by every later pass (and
//! by graph/debug tooling) to resolve types that no longer exist. The
//! invariant - every recorded source has actually been removed from the
//! program by the end of the pipeline - is checked once at the end and
//! violated only by a pass bug.

use std::collections::HashMap;

use crate::{
    bytecode::{InvokeKind, Op},
    model::{Application, ClassKind, MethodId, ProgramClass, TypeId},
    optimizer::{EventKind, IrPass, OptimizerContext},
    Error, Result,
};

/// Which merging transformation produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// Unrelated same-shape classes merged into one.
    Horizontal,
    /// A class merged into its single subclass.
    Vertical,
    /// Instance members rebased onto static dispatch.
    Static,
}

/// One merging pass's source-to-target mapping.
#[derive(Debug, Clone)]
pub struct MergedClassesRecord {
    kind: MergeKind,
    map: HashMap<TypeId, TypeId>,
}

impl MergedClassesRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new(kind: MergeKind) -> Self {
        Self {
            kind,
            map: HashMap::new(),
        }
    }

    /// The merging kind.
    #[must_use]
    pub const fn kind(&self) -> MergeKind {
        self.kind
    }

    /// Records that `source` was merged into `target`.
    pub fn add(&mut self, source: TypeId, target: TypeId) {
        debug_assert_ne!(source, target);
        self.map.insert(source, target);
    }

    /// The surviving target of a source type, if recorded here.
    #[must_use]
    pub fn target_of(&self, source: TypeId) -> Option<TypeId> {
        self.map.get(&source).copied()
    }

    /// Returns `true` if the type was merged away by this record.
    #[must_use]
    pub fn is_source(&self, ty: TypeId) -> bool {
        self.map.contains_key(&ty)
    }

    /// Number of merged-away sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if nothing was merged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// All recorded sources.
    pub fn sources(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.map.keys().copied()
    }
}

/// The aggregated merged-classes view over all records.
#[derive(Debug, Clone, Default)]
pub struct MergedClasses {
    records: Vec<MergedClassesRecord>,
}

impl MergedClasses {
    /// Appends a record.
    pub fn push(&mut self, record: MergedClassesRecord) {
        self.records.push(record);
    }

    /// The records, in creation order.
    #[must_use]
    pub fn records(&self) -> &[MergedClassesRecord] {
        &self.records
    }

    /// Resolves a type through every record, following chains (a merge
    /// target may itself have been merged by a later round).
    #[must_use]
    pub fn resolve(&self, ty: TypeId) -> TypeId {
        let mut current = ty;
        // Chains are acyclic by construction; the bound is defensive
        // against a corrupted record.
        for _ in 0..=self.records.len() {
            let next = self
                .records
                .iter()
                .find_map(|r| r.target_of(current));
            match next {
                Some(target) if target != current => current = target,
                _ => break,
            }
        }
        current
    }

    /// Returns `true` if the type was merged away by any record.
    #[must_use]
    pub fn is_source(&self, ty: TypeId) -> bool {
        self.records.iter().any(|r| r.is_source(ty))
    }

    /// End-of-pipeline check: every recorded source must be gone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MergeSourceSurvived`] naming the first survivor.
    pub fn verify_sources_removed(&self, app: &Application) -> Result<()> {
        for record in &self.records {
            for source in record.sources() {
                if app.has_class(source) {
                    return Err(Error::MergeSourceSurvived(
                        app.symbols().display_type(source),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Horizontal merging of same-shape utility classes.
///
/// Group selection is deliberately conservative: only final-or-plain
/// classes with the same superclass, no interfaces, no fields, and only
/// static non-pinned methods are grouped; signature collisions drop a
/// class from its group. Each group's survivor absorbs the others'
/// methods, and every invoke in the program is retargeted.
pub struct HorizontalClassMergerPass;

impl HorizontalClassMergerPass {
    fn eligible(app: &Application, ctx: &OptimizerContext, class: &ProgramClass) -> bool {
        class.kind == ClassKind::Class
            && !class
                .access
                .contains(crate::model::ClassAccessFlags::SYNTHETIC)
            && class.interfaces.is_empty()
            && class.fields.is_empty()
            && !ctx.keep.is_pinned_class(class.ty)
            && app.direct_subtypes(class.ty).is_empty()
            && class
                .methods
                .iter()
                .all(|m| m.is_static() && !ctx.keep.is_pinned_method(m.id))
    }
}

impl IrPass for HorizontalClassMergerPass {
    fn name(&self) -> &'static str {
        "horizontal-class-merging"
    }

    fn description(&self) -> &'static str {
        "Merges same-shape static utility classes into one survivor"
    }

    fn is_global(&self) -> bool {
        true
    }

    fn run_on_method(
        &self,
        _func: &mut crate::ir::IrFunction,
        _ctx: &OptimizerContext,
        _app: &Application,
    ) -> Result<bool> {
        Ok(false)
    }

    #[allow(clippy::too_many_lines)]
    fn run_global(&self, ctx: &OptimizerContext, app: &mut Application) -> Result<bool> {
        // Group eligible classes by superclass.
        let mut groups: HashMap<Option<TypeId>, Vec<TypeId>> = HashMap::new();
        for class in app.classes() {
            if Self::eligible(app, ctx, class) {
                groups.entry(class.super_class).or_default().push(class.ty);
            }
        }

        let symbols = std::sync::Arc::clone(app.symbols());
        let mut record = MergedClassesRecord::new(MergeKind::Horizontal);
        let mut method_mapping: HashMap<MethodId, MethodId> = HashMap::new();

        for (_, mut group) in groups {
            if group.len() < 2 {
                continue;
            }
            group.sort_unstable();
            let target = group[0];
            for &source in &group[1..] {
                // A signature collision with the survivor drops the class.
                let collides = {
                    let target_class = app.class(target).expect("target exists");
                    app.class(source)
                        .expect("source exists")
                        .methods
                        .iter()
                        .any(|m| target_class.find_method(m.proto).is_some())
                };
                if collides {
                    continue;
                }
                let Some(source_class) = app.remove_class(source) else {
                    continue;
                };
                for method in source_class.methods {
                    let new_id = symbols.intern_method(target, method.proto);
                    method_mapping.insert(method.id, new_id);
                    let mut moved = method;
                    // Re-key the IR under the new identity.
                    if let Some((_, mut func)) = ctx.ir_functions.remove(&moved.id) {
                        func.set_method(new_id);
                        ctx.ir_functions.insert(new_id, func);
                    }
                    if let Some((_, provider)) = ctx.metadata.remove(&moved.id) {
                        ctx.metadata.insert(new_id, provider);
                    }
                    moved.id = new_id;
                    app.class_mut(target)
                        .expect("target exists")
                        .add_method(moved);
                }
                record.add(source, target);
                ctx.events
                    .record(EventKind::ClassesMerged)
                    .message(symbols.display_type(source));
            }
        }

        if record.is_empty() {
            return Ok(false);
        }

        // Retarget every invoke of a moved method.
        for mut entry in ctx.ir_functions.iter_mut() {
            let func = entry.value_mut();
            let ids: Vec<crate::ir::InstrId> = func
                .all_instructions()
                .filter(|i| matches!(i.op(), Op::Invoke { .. }))
                .map(crate::ir::IrInstruction::id)
                .collect();
            for id in ids {
                if let Some(instr) = func.instruction_mut(id) {
                    if let Op::Invoke { kind, target } = *instr.op() {
                        if let Some(&new_target) = method_mapping.get(&target) {
                            instr.set_op(Op::Invoke {
                                kind,
                                target: new_target,
                            });
                        }
                    }
                }
            }
        }

        ctx.merged_classes
            .lock()
            .map_err(|_| Error::LockError)?
            .push(record);
        Ok(true)
    }
}

/// Staticizing of instance methods with provably-unused receivers.
///
/// A final-class instance method whose receiver argument is dead in its
/// own IR keeps its identity but gains `static` dispatch; call sites are
/// rewritten by the null-check insertion pass, which preserves the NPE the
/// removed receiver would have raised.
pub struct StaticizerPass;

impl IrPass for StaticizerPass {
    fn name(&self) -> &'static str {
        "staticizer"
    }

    fn description(&self) -> &'static str {
        "Converts instance methods with unused receivers to static dispatch"
    }

    fn is_global(&self) -> bool {
        true
    }

    fn run_on_method(
        &self,
        _func: &mut crate::ir::IrFunction,
        _ctx: &OptimizerContext,
        _app: &Application,
    ) -> Result<bool> {
        Ok(false)
    }

    fn run_global(&self, ctx: &OptimizerContext, app: &mut Application) -> Result<bool> {
        use crate::model::MethodAccessFlags;

        let mut candidates: Vec<MethodId> = Vec::new();
        for class in app.classes() {
            let class_is_extendable = !class.access.contains(crate::model::ClassAccessFlags::FINAL)
                && !app.direct_subtypes(class.ty).is_empty();
            if class_is_extendable || class.is_interface() {
                continue;
            }
            for method in &class.methods {
                if method.is_static()
                    || method.is_abstract()
                    || ctx.keep.is_pinned_method(method.id)
                {
                    continue;
                }
                // Constructors keep their dispatch.
                let name = ctx.symbols.str(ctx.symbols.proto(method.proto).name);
                if name == "<init>" {
                    continue;
                }
                let receiver_dead = ctx.ir_functions.get(&method.id).is_some_and(|func| {
                    func.values()
                        .iter()
                        .find(|v| {
                            matches!(v.origin(), crate::ir::ValueOrigin::Argument(0))
                                && v.version() == 0
                        })
                        .is_some_and(crate::ir::Value::is_dead)
                });
                if receiver_dead {
                    candidates.push(method.id);
                }
            }
        }

        if candidates.is_empty() {
            return Ok(false);
        }

        for id in candidates {
            if let Some(method) = app.program_method_mut(id) {
                method.access |= MethodAccessFlags::STATIC;
            }
            // Drop the dead receiver binding and renumber the remaining
            // argument slots (the receiver was one slot wide).
            if let Some(mut entry) = ctx.ir_functions.get_mut(&id) {
                let func = entry.value_mut();
                let receiver_instr = func.blocks().first().and_then(|b| {
                    b.instructions()
                        .iter()
                        .find(|i| matches!(i.op(), Op::Argument { index: 0, .. }))
                        .map(crate::ir::IrInstruction::id)
                });
                if let Some(instr) = receiver_instr {
                    func.remove_instruction(instr);
                }
                let remaining: Vec<(crate::ir::InstrId, u16, crate::model::ValueType)> = func
                    .blocks()
                    .first()
                    .map(|b| {
                        b.instructions()
                            .iter()
                            .filter_map(|i| match *i.op() {
                                Op::Argument { index, ty } if index > 0 => {
                                    Some((i.id(), index, ty))
                                }
                                _ => None,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                for (instr_id, index, ty) in remaining {
                    let def = func.instruction(instr_id).and_then(crate::ir::IrInstruction::def);
                    if let Some(instr) = func.instruction_mut(instr_id) {
                        instr.set_op(Op::Argument {
                            index: index - 1,
                            ty,
                        });
                    }
                    if let Some(value) = def.and_then(|d| func.value_mut(d)) {
                        value.set_origin(crate::ir::ValueOrigin::Argument(index - 1));
                    }
                }
            }
            ctx.staticized.insert(id);
            ctx.events
                .record(EventKind::MethodStaticized)
                .at(id)
                .message(ctx.symbols.display_method(id));
        }
        Ok(true)
    }
}

/// Vertical merging of member-less abstract classes into their single
/// subclass.
///
/// A non-pinned abstract class with no fields, no declared methods, no
/// interfaces, and exactly one direct subtype contributes nothing but a
/// name to the hierarchy: the subclass absorbs it. Type references in IR
/// (`checkcast`/`instanceof`) are retargeted to the survivor.
pub struct VerticalClassMergerPass;

impl IrPass for VerticalClassMergerPass {
    fn name(&self) -> &'static str {
        "vertical-class-merging"
    }

    fn description(&self) -> &'static str {
        "Merges member-less abstract classes into their single subclass"
    }

    fn is_global(&self) -> bool {
        true
    }

    fn run_on_method(
        &self,
        _func: &mut crate::ir::IrFunction,
        _ctx: &OptimizerContext,
        _app: &Application,
    ) -> Result<bool> {
        Ok(false)
    }

    fn run_global(&self, ctx: &OptimizerContext, app: &mut Application) -> Result<bool> {
        let mut record = MergedClassesRecord::new(MergeKind::Vertical);

        loop {
            let candidate = app.classes().find_map(|class| {
                let eligible = class.kind == ClassKind::Class
                    && class.access.contains(crate::model::ClassAccessFlags::ABSTRACT)
                    && class.fields.is_empty()
                    && class.methods.is_empty()
                    && class.interfaces.is_empty()
                    && !ctx.keep.is_pinned_class(class.ty);
                if !eligible {
                    return None;
                }
                let subs = app.direct_subtypes(class.ty);
                match subs.as_slice() {
                    [only] => Some((class.ty, *only, class.super_class)),
                    _ => None,
                }
            });
            let Some((source, target, new_super)) = candidate else {
                break;
            };
            app.remove_class(source);
            if let Some(sub) = app.class_mut(target) {
                sub.super_class = new_super;
            }
            record.add(source, target);
            ctx.events
                .record(EventKind::ClassesMerged)
                .message(ctx.symbols.display_type(source));
        }

        if record.is_empty() {
            return Ok(false);
        }

        // Retarget type references in every method's IR.
        for mut entry in ctx.ir_functions.iter_mut() {
            let func = entry.value_mut();
            let ids: Vec<crate::ir::InstrId> = func
                .all_instructions()
                .filter(|i| matches!(i.op(), Op::CheckCast(_) | Op::InstanceOf(_)))
                .map(crate::ir::IrInstruction::id)
                .collect();
            for id in ids {
                if let Some(instr) = func.instruction_mut(id) {
                    match *instr.op() {
                        Op::CheckCast(ty) => {
                            if let Some(target) = record.target_of(ty) {
                                instr.set_op(Op::CheckCast(target));
                            }
                        }
                        Op::InstanceOf(ty) => {
                            if let Some(target) = record.target_of(ty) {
                                instr.set_op(Op::InstanceOf(target));
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        ctx.merged_classes
            .lock()
            .map_err(|_| Error::LockError)?
            .push(record);
        Ok(true)
    }
}

/// Rewrites invokes of staticized methods: the receiver is popped behind an
/// explicit null check and the dispatch becomes static.
pub(crate) fn rewrite_staticized_call_sites(
    func: &mut crate::ir::IrFunction,
    ctx: &OptimizerContext,
) -> bool {
    let targets: Vec<(crate::ir::InstrId, MethodId)> = func
        .all_instructions()
        .filter_map(|i| match *i.op() {
            Op::Invoke { kind, target }
                if kind.has_receiver() && ctx.staticized.contains(&target) =>
            {
                Some((i.id(), target))
            }
            _ => None,
        })
        .collect();

    let mut changed = false;
    for (id, target) in targets {
        let Some((block, position)) = func.locate_instruction(id) else {
            continue;
        };
        let receiver = func
            .instruction(id)
            .and_then(|i| i.uses().first().copied());
        let Some(receiver) = receiver else { continue };

        // Null check on the receiver, inserted before the call.
        let check_id = func.alloc_instr_id();
        let checked = func.new_value(
            crate::ir::ValueOrigin::Synthetic,
            func.value(receiver)
                .map_or(crate::model::ValueType::Int, crate::ir::Value::ty),
            crate::ir::DefSite::instruction(check_id),
        );
        if let Some(v) = func.value_mut(receiver) {
            v.add_use(crate::ir::UseSite::Instruction(check_id));
        }
        func.block_mut(block)
            .expect("block exists")
            .insert_instruction(
                position,
                crate::ir::IrInstruction::new(check_id, Op::NullCheck, vec![receiver], Some(checked)),
            );

        // Drop the receiver operand and go static.
        if let Some(instr) = func.instruction_mut(id) {
            let mut uses = instr.uses().to_vec();
            uses.remove(0);
            *instr.uses_mut() = uses;
            instr.set_op(Op::Invoke {
                kind: InvokeKind::Static,
                target,
            });
        }
        if let Some(v) = func.value_mut(receiver) {
            v.remove_use(crate::ir::UseSite::Instruction(id));
        }
        ctx.events
            .record(EventKind::NullCheckInserted)
            .at(func.method());
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SymbolTable;
    use std::sync::Arc;

    #[test]
    fn test_record_resolution_chains() {
        let symbols = SymbolTable::new();
        let a = symbols.object_type("A");
        let b = symbols.object_type("B");
        let c = symbols.object_type("C");

        let mut first = MergedClassesRecord::new(MergeKind::Horizontal);
        first.add(a, b);
        let mut second = MergedClassesRecord::new(MergeKind::Vertical);
        second.add(b, c);

        let mut merged = MergedClasses::default();
        merged.push(first);
        merged.push(second);

        assert_eq!(merged.resolve(a), c, "chains resolve through rounds");
        assert_eq!(merged.resolve(b), c);
        assert_eq!(merged.resolve(c), c);
        assert!(merged.is_source(a));
        assert!(!merged.is_source(c));
    }

    #[test]
    fn test_verify_sources_removed() {
        let symbols = Arc::new(SymbolTable::new());
        let mut app = Application::new(Arc::clone(&symbols));
        let a = symbols.object_type("A");
        let b = symbols.object_type("B");
        app.add_class(ProgramClass::new(
            a,
            ClassKind::Class,
            crate::model::ClassAccessFlags::PUBLIC,
        ))
        .unwrap();

        let mut record = MergedClassesRecord::new(MergeKind::Horizontal);
        record.add(a, b);
        let mut merged = MergedClasses::default();
        merged.push(record);

        // A is recorded as merged away but still present.
        assert!(matches!(
            merged.verify_sources_removed(&app),
            Err(Error::MergeSourceSurvived(_))
        ));

        app.remove_class(a);
        assert!(merged.verify_sources_removed(&app).is_ok());
    }
}
