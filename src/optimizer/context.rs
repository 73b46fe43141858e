//! Shared interprocedural state for one compilation run.

use std::sync::{Arc, Mutex};

use dashmap::{DashMap, DashSet};

use crate::{
    diagnostics::Diagnostics,
    ir::{ConstValue, IrFunction},
    lowering::SyntheticMethods,
    model::{FieldId, KeepOracle, MethodId, SymbolTable, TypeId},
    optimizer::{
        merging::MergedClasses,
        passes::{EnumCandidate, FieldAccessBits},
        BytecodeMetadataProvider, EventLog,
    },
    Options,
};

/// Thread-safe shared state of the optimizer pipeline.
///
/// Per-method tables are concurrent maps: workers remove their method's
/// entry, mutate it without holding any lock, and reinsert it. Class-level
/// state ([`MergedClasses`], the synthetic cache's install step) is only
/// mutated at serial wave boundaries.
pub struct OptimizerContext {
    /// The compilation's symbol table.
    pub symbols: Arc<SymbolTable>,
    /// Pipeline options.
    pub options: Options,
    /// The pinned-surface oracle.
    pub keep: Arc<dyn KeepOracle>,
    /// Per-method IR, keyed by method identity.
    pub ir_functions: DashMap<MethodId, IrFunction>,
    /// Per-method instruction metadata providers.
    pub metadata: DashMap<MethodId, BytecodeMetadataProvider>,
    /// Member-value propagation facts: fields proven to always hold a
    /// known constant.
    pub known_field_values: DashMap<FieldId, ConstValue>,
    /// Whole-program field access bits.
    pub field_access: DashMap<FieldId, FieldAccessBits>,
    /// Enum-unboxing candidate classification.
    pub enum_candidates: DashMap<TypeId, EnumCandidate>,
    /// Instance methods converted to static dispatch this run.
    pub staticized: DashSet<MethodId>,
    /// Merged-classes records (horizontal/vertical/static).
    pub merged_classes: Mutex<MergedClasses>,
    /// Shared synthesized-method cache.
    pub synthetics: SyntheticMethods,
    /// Structured change log.
    pub events: EventLog,
    /// Program-level diagnostics.
    pub diagnostics: Diagnostics,
    /// Methods whose IR changed and need code regeneration.
    pub processed: DashSet<MethodId>,
}

impl OptimizerContext {
    /// Creates a fresh context.
    #[must_use]
    pub fn new(symbols: Arc<SymbolTable>, options: Options, keep: Arc<dyn KeepOracle>) -> Self {
        Self {
            symbols,
            options,
            keep,
            ir_functions: DashMap::new(),
            metadata: DashMap::new(),
            known_field_values: DashMap::new(),
            field_access: DashMap::new(),
            enum_candidates: DashMap::new(),
            staticized: DashSet::new(),
            merged_classes: Mutex::new(MergedClasses::default()),
            synthetics: SyntheticMethods::new(),
            events: EventLog::new(),
            diagnostics: Diagnostics::new(),
            processed: DashSet::new(),
        }
    }

    /// Attaches instruction metadata for a method, creating the provider
    /// on first use.
    pub fn attach_metadata(
        &self,
        method: MethodId,
        instr: crate::ir::InstrId,
        flags: crate::optimizer::InstructionMetadata,
    ) {
        self.metadata
            .entry(method)
            .or_default()
            .attach(instr, flags);
    }

    /// All method ids currently carrying IR, in stable order.
    #[must_use]
    pub fn compiled_methods(&self) -> Vec<MethodId> {
        let mut out: Vec<MethodId> = self.ir_functions.iter().map(|e| *e.key()).collect();
        out.sort_unstable();
        out
    }
}
