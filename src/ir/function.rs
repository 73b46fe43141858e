//! The per-method IR container.
//!
//! An [`IrFunction`] owns the blocks and the value table of one method and
//! allocates the stable ids (values, instructions) that everything else
//! keys off. It also provides the cross-block mutation utilities passes
//! rely on, most importantly [`IrFunction::replace_uses_of`], which
//! rewires a value's entire use-list onto a replacement.

use std::collections::HashMap;
use std::fmt;

use crate::{
    bytecode::Op,
    ir::{DefSite, InstrId, IrBlock, IrInstruction, PhiNode, UseSite, Value, ValueId, ValueOrigin},
    model::{MethodId, ValueType},
};

/// A method in SSA form.
#[derive(Debug, Clone)]
pub struct IrFunction {
    method: MethodId,
    blocks: Vec<IrBlock>,
    values: Vec<Value>,
    num_args: usize,
    num_locals: usize,
    next_instr: u32,
    version_counters: HashMap<ValueOrigin, u32>,
}

impl IrFunction {
    /// Creates an empty function.
    ///
    /// # Arguments
    ///
    /// * `method` - The method identity this IR belongs to
    /// * `num_args` - Number of argument slots (receiver included)
    /// * `num_locals` - Number of local-variable slots
    #[must_use]
    pub fn new(method: MethodId, num_args: usize, num_locals: usize) -> Self {
        Self {
            method,
            blocks: Vec::new(),
            values: Vec::new(),
            num_args,
            num_locals,
            next_instr: 0,
            version_counters: HashMap::new(),
        }
    }

    /// The method this IR belongs to.
    #[must_use]
    pub const fn method(&self) -> MethodId {
        self.method
    }

    /// Re-keys the IR under a new method identity (class merging moves
    /// methods between holders).
    pub fn set_method(&mut self, method: MethodId) {
        self.method = method;
    }

    /// Number of argument slots.
    #[must_use]
    pub const fn num_args(&self) -> usize {
        self.num_args
    }

    /// Number of local-variable slots.
    #[must_use]
    pub const fn num_locals(&self) -> usize {
        self.num_locals
    }

    /// The blocks, indexed by block id.
    #[must_use]
    pub fn blocks(&self) -> &[IrBlock] {
        &self.blocks
    }

    /// Mutable access to the blocks.
    pub fn blocks_mut(&mut self) -> &mut Vec<IrBlock> {
        &mut self.blocks
    }

    /// A block by id.
    #[must_use]
    pub fn block(&self, id: usize) -> Option<&IrBlock> {
        self.blocks.get(id)
    }

    /// A block by id, mutably.
    pub fn block_mut(&mut self, id: usize) -> Option<&mut IrBlock> {
        self.blocks.get_mut(id)
    }

    /// The entry block id.
    #[must_use]
    pub const fn entry_block(&self) -> usize {
        0
    }

    /// Appends a block, returning its id.
    pub fn add_block(&mut self) -> usize {
        let id = self.blocks.len();
        self.blocks.push(IrBlock::new(id));
        id
    }

    /// The value table.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// A value by id.
    #[must_use]
    pub fn value(&self, id: ValueId) -> Option<&Value> {
        self.values.get(id.index())
    }

    /// A value by id, mutably.
    pub fn value_mut(&mut self, id: ValueId) -> Option<&mut Value> {
        self.values.get_mut(id.index())
    }

    /// Allocates a fresh value.
    ///
    /// The version is the running count of values sharing the origin, so
    /// version 0 of an argument slot is the entry definition.
    pub fn new_value(&mut self, origin: ValueOrigin, ty: ValueType, def: DefSite) -> ValueId {
        let id = ValueId::new(self.values.len());
        let version = self.version_counters.entry(origin).or_insert(0);
        self.values.push(Value::new(id, origin, *version, ty, def));
        *version += 1;
        id
    }

    /// Allocates a fresh instruction id.
    pub fn alloc_instr_id(&mut self) -> InstrId {
        let id = InstrId::new(self.next_instr);
        self.next_instr += 1;
        id
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of values.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Total phi count over all blocks.
    #[must_use]
    pub fn total_phi_count(&self) -> usize {
        self.blocks.iter().map(IrBlock::phi_count).sum()
    }

    /// Total instruction count over all blocks.
    #[must_use]
    pub fn total_instruction_count(&self) -> usize {
        self.blocks.iter().map(IrBlock::instruction_count).sum()
    }

    /// Iterates over all phi nodes.
    pub fn all_phis(&self) -> impl Iterator<Item = &PhiNode> {
        self.blocks.iter().flat_map(IrBlock::phis)
    }

    /// Iterates over all instructions.
    pub fn all_instructions(&self) -> impl Iterator<Item = &IrInstruction> {
        self.blocks.iter().flat_map(IrBlock::instructions)
    }

    /// Locates an instruction by id: (block id, position).
    #[must_use]
    pub fn locate_instruction(&self, id: InstrId) -> Option<(usize, usize)> {
        for block in &self.blocks {
            if let Some(pos) = block.position_of(id) {
                return Some((block.id(), pos));
            }
        }
        None
    }

    /// An instruction by id.
    #[must_use]
    pub fn instruction(&self, id: InstrId) -> Option<&IrInstruction> {
        self.blocks.iter().find_map(|b| b.instruction_by_id(id))
    }

    /// An instruction by id, mutably.
    pub fn instruction_mut(&mut self, id: InstrId) -> Option<&mut IrInstruction> {
        self.blocks
            .iter_mut()
            .find_map(|b| b.instruction_by_id_mut(id))
    }

    /// The block containing the phi that defines a value.
    #[must_use]
    pub fn phi_block(&self, value: ValueId) -> Option<usize> {
        match self.value(value)?.def() {
            DefSite::Phi { block } => Some(block),
            DefSite::Instruction(_) => None,
        }
    }

    /// Appends a new instruction to a block, allocating its id, and
    /// recording uses/def bookkeeping. Returns the instruction id.
    pub fn emit(
        &mut self,
        block: usize,
        op: Op,
        uses: Vec<ValueId>,
        def: Option<(ValueOrigin, ValueType)>,
    ) -> (InstrId, Option<ValueId>) {
        let id = self.alloc_instr_id();
        let def_value =
            def.map(|(origin, ty)| self.new_value(origin, ty, DefSite::instruction(id)));
        for &used in &uses {
            if let Some(value) = self.value_mut(used) {
                value.add_use(UseSite::Instruction(id));
            }
        }
        self.blocks[block].add_instruction(IrInstruction::new(id, op, uses, def_value));
        (id, def_value)
    }

    /// Replaces every use of `old` with `new`, rewiring use-lists.
    ///
    /// All use sites recorded for `old` (instruction inputs and phi
    /// operands) are rewritten to reference `new`, and moved onto `new`'s
    /// use-list. `old` is left dead. Correctness of the replacement itself
    /// (that `new` dominates the rewritten sites) is the caller's
    /// responsibility; SSA values dominating their uses makes this hold
    /// whenever `new` dominates `old`'s definition.
    pub fn replace_uses_of(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let sites = match self.value_mut(old) {
            Some(value) => value.take_uses(),
            None => return,
        };
        for site in sites {
            match site {
                UseSite::Instruction(id) => {
                    if let Some(instr) = self.instruction_mut(id) {
                        instr.replace_use(old, new);
                    }
                }
                UseSite::Phi(result) => {
                    for block in &mut self.blocks {
                        if let Some(phi) = block.phi_defining_mut(result) {
                            phi.replace_operand_value(old, new);
                            break;
                        }
                    }
                }
            }
            if let Some(value) = self.value_mut(new) {
                value.add_use(site);
            }
        }
    }

    /// Removes an instruction by id, clearing it from its inputs' use-lists.
    ///
    /// The defined value (if any) is left in the table with no definition
    /// users; callers replace or abandon it.
    pub fn remove_instruction(&mut self, id: InstrId) -> Option<IrInstruction> {
        let (block, _) = self.locate_instruction(id)?;
        let instr = self.blocks[block].remove_instruction(id)?;
        for &used in instr.uses() {
            if let Some(value) = self.value_mut(used) {
                value.remove_use(UseSite::Instruction(id));
            }
        }
        Some(instr)
    }

    /// Removes a phi by its result value, clearing operand use-lists.
    pub fn remove_phi(&mut self, result: ValueId) -> Option<PhiNode> {
        let block = self.phi_block(result)?;
        let phi = self.blocks[block].remove_phi(result)?;
        for operand in phi.operands() {
            let value = operand.value();
            if value != result {
                if let Some(v) = self.value_mut(value) {
                    v.remove_use(UseSite::Phi(result));
                }
            }
        }
        Some(phi)
    }

    /// Verifies the core SSA invariants; used by tests and debug assertions.
    ///
    /// Checks that every phi has one operand per predecessor of its block
    /// (matched by predecessor id) and that every instruction def's
    /// recorded definition site points back at that instruction.
    #[must_use]
    pub fn check_ssa_invariants(&self) -> bool {
        for block in &self.blocks {
            for phi in block.phis() {
                if phi.operand_count() != block.predecessors().len() {
                    return false;
                }
                for &pred in block.predecessors() {
                    if phi.operand_from(pred).is_none() {
                        return false;
                    }
                }
            }
            for instr in block.instructions() {
                if let Some(def) = instr.def() {
                    match self.value(def).map(Value::def) {
                        Some(DefSite::Instruction(id)) if id == instr.id() => {}
                        _ => return false,
                    }
                }
            }
        }
        true
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "fn {} ({} args, {} locals, {} values):",
            self.method,
            self.num_args,
            self.num_locals,
            self.values.len()
        )?;
        for block in &self.blocks {
            write!(f, "{block}")?;
        }
        Ok(())
    }
}
