//! SSA to stack-machine code emission.
//!
//! The emitter is deliberately simple and exact:
//!
//! - every SSA value that is used gets its own output slot (arguments keep
//!   their entry slots); a peephole keeps straight-line def-use chains on
//!   the operand stack instead, so common shapes (`const, const, add`)
//!   emit without spills
//! - phis are eliminated by copies: at the end of the unique predecessor,
//!   at the entry of single-predecessor blocks, or - for handler phis -
//!   immediately before the (final, locals-preserving) throwing
//!   instruction of each protected predecessor. Critical normal edges into
//!   phi-bearing blocks are split first. Copy groups load every source
//!   before storing any destination, so swap-shaped phi groups stay
//!   parallel
//! - the operand stack is empty at every block boundary, which keeps
//!   stack-map frames computable by a locals-only dataflow
//!   ([`super::frames`])
//!
//! Handler entries emit a plain `store` for the incoming exception (the
//! class-file encoding leaves the push implicit; the dex writer turns the
//! store into `move-exception`).

use std::collections::{HashMap, HashSet};

use crate::{
    bytecode::{Instruction, Op},
    ir::{InstrId, IrFunction, IrInstruction, ValueId, ValueOrigin},
    lowering::frames::{self, EmittedBlock, StackMapFrame, VerificationType},
    model::{SymbolTable, TryRange, ValueType},
    optimizer::{BytecodeMetadataProvider, InstructionMetadata},
    Error, Result,
};

/// Output code of one lowered method.
#[derive(Debug, Clone, Default)]
pub struct LoweredMethod {
    /// The output instruction sequence.
    pub instructions: Vec<Instruction>,
    /// Maximum operand-stack depth.
    pub max_stack: u16,
    /// Number of local slots used.
    pub max_locals: u16,
    /// Stack-map frames at every branch target and handler entry.
    pub frames: Vec<StackMapFrame>,
    /// Exception-handler table over output offsets.
    pub handlers: Vec<TryRange>,
    /// Instruction metadata re-keyed onto output positions.
    pub metadata: HashMap<usize, InstructionMetadata>,
}

impl LoweredMethod {
    /// Metadata attached to the output instruction at `index`.
    #[must_use]
    pub fn metadata_at(&self, index: usize) -> Option<InstructionMetadata> {
        self.metadata.get(&index).copied()
    }
}

/// Lowers [`IrFunction`]s to output instruction sequences.
pub struct CodeEmitter<'a> {
    symbols: &'a SymbolTable,
}

struct BlockOutput {
    start: u32,
    stores: Vec<(u16, VerificationType)>,
    throw_cut: Option<usize>,
}

impl<'a> CodeEmitter<'a> {
    /// Creates an emitter over the given symbol table.
    #[must_use]
    pub fn new(symbols: &'a SymbolTable) -> Self {
        Self { symbols }
    }

    /// Lowers a function to output code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Error`] on malformed IR (a missing slot or a branch
    /// to an unemitted block), which indicates a pass bug rather than bad
    /// input.
    pub fn lower(
        &self,
        func: &IrFunction,
        metadata: Option<&BytecodeMetadataProvider>,
    ) -> Result<LoweredMethod> {
        let mut func = func.clone();
        split_critical_edges(&mut func);

        let (carried, carried_defs) = compute_carried(&func);
        let (slots, next_slot) = assign_slots(&func, &carried);
        #[allow(clippy::cast_possible_truncation)]
        let max_locals = next_slot.max(func.num_locals() as u16);

        let emitted_ids: Vec<usize> = func
            .blocks()
            .iter()
            .filter(|b| {
                b.id() == func.entry_block()
                    || !b.instructions().is_empty()
                    || b.phi_count() > 0
                    || !b.predecessors().is_empty()
            })
            .map(crate::ir::IrBlock::id)
            .collect();
        let emitted_index: HashMap<usize, usize> = emitted_ids
            .iter()
            .enumerate()
            .map(|(i, &b)| (b, i))
            .collect();

        let mut ctx = EmitCtx {
            func: &func,
            symbols: self.symbols,
            slots: &slots,
            carried: &carried,
            carried_defs: &carried_defs,
            out: Vec::new(),
            positions: HashMap::new(),
            patches: Vec::new(),
            stores: Vec::new(),
            throw_cut: None,
            depth: 0,
            max_depth: 0,
        };
        let mut outputs: Vec<BlockOutput> = Vec::with_capacity(emitted_ids.len());
        let mut max_stack: u16 = 0;

        for (layout, &block_id) in emitted_ids.iter().enumerate() {
            let is_handler = func
                .block(block_id)
                .and_then(|b| b.instructions().first())
                .is_some_and(|i| matches!(i.op(), Op::MoveException(_)));
            ctx.depth = u16::from(is_handler);
            ctx.max_depth = ctx.max_depth.max(ctx.depth);
            ctx.stores.clear();
            ctx.throw_cut = None;

            #[allow(clippy::cast_possible_truncation)]
            let start = ctx.out.len() as u32;
            self.emit_block(&mut ctx, block_id)?;
            self.emit_block_exit(&mut ctx, block_id, emitted_ids.get(layout + 1).copied())?;

            max_stack = max_stack.max(ctx.max_depth);
            outputs.push(BlockOutput {
                start,
                stores: std::mem::take(&mut ctx.stores),
                throw_cut: ctx.throw_cut,
            });
        }

        let EmitCtx {
            mut out,
            positions,
            patches,
            ..
        } = ctx;

        // Patch branch targets to output offsets.
        for (index, target_block) in patches {
            let &target_index = emitted_index.get(&target_block).ok_or_else(|| {
                Error::Error(format!("branch to unemitted block {target_block}"))
            })?;
            let target = outputs[target_index].start;
            match &mut out[index].op {
                Op::Goto(t) | Op::If { target: t, .. } | Op::IfCmp { target: t, .. } => {
                    *t = target;
                }
                other => {
                    return Err(Error::Error(format!("patched non-branch {other:?}")));
                }
            }
        }

        let (emitted_blocks, handlers) =
            self.block_shapes(&func, &emitted_ids, &emitted_index, &outputs, &out);
        let entry_locals = entry_argument_slots(&func);
        let frames =
            frames::compute_frames(&emitted_blocks, &entry_locals, self.symbols.object());
        let metadata = metadata.map(|m| m.remap(&positions)).unwrap_or_default();

        Ok(LoweredMethod {
            instructions: out,
            max_stack,
            max_locals,
            frames,
            handlers,
            metadata,
        })
    }

    /// Emits one block's phi copies and instructions.
    fn emit_block(&self, ctx: &mut EmitCtx<'_>, block_id: usize) -> Result<()> {
        let block = ctx.func.block(block_id).expect("block exists");
        let instr_count = block.instruction_count();
        let has_exception_edges = !block.exception_successors().is_empty();
        let starts_with_move_exception = block
            .instructions()
            .first()
            .is_some_and(|i| matches!(i.op(), Op::MoveException(_)));

        let entry_copies = if block.predecessors().len() == 1 {
            phi_copies_into(ctx.func, block_id, block.predecessors()[0])
        } else {
            Vec::new()
        };

        let mut entry_copies_pending = true;
        if !starts_with_move_exception {
            ctx.emit_copies(&entry_copies)?;
            entry_copies_pending = false;
        }

        for position in 0..instr_count {
            let instr = ctx.func.block(block_id).expect("block exists").instructions()
                [position]
                .clone();
            let last = position + 1 == instr_count;
            if last && has_exception_edges {
                // Handler-phi copies precede the (single, final) throwing
                // instruction; everything before them is handler-visible.
                let handler_succs: Vec<usize> = ctx
                    .func
                    .block(block_id)
                    .expect("block exists")
                    .exception_successors()
                    .to_vec();
                for handler in handler_succs {
                    let copies = phi_copies_into(ctx.func, handler, block_id);
                    ctx.emit_copies(&copies)?;
                }
                ctx.throw_cut = Some(ctx.stores.len());
            }
            self.emit_instruction(ctx, &instr)?;
            if entry_copies_pending {
                // The exception binding store must come first in a handler
                // block; entry copies follow it.
                ctx.emit_copies(&entry_copies)?;
                entry_copies_pending = false;
            }
        }
        Ok(())
    }

    /// Emits exit phi copies and the trailing branch of a block.
    fn emit_block_exit(
        &self,
        ctx: &mut EmitCtx<'_>,
        block_id: usize,
        next_in_layout: Option<usize>,
    ) -> Result<()> {
        let block = ctx.func.block(block_id).expect("block exists");
        let terminator = block.terminator().map(|t| t.op().clone());

        let fallthrough = match terminator {
            Some(Op::Return(_) | Op::Throw) => None,
            Some(Op::If { target, .. } | Op::IfCmp { target, .. }) => {
                let taken = target as usize;
                block
                    .successors()
                    .iter()
                    .copied()
                    .find(|&s| s != taken)
                    .or(Some(taken))
            }
            _ => {
                // Plain fall-through block: copies for a phi-bearing
                // multi-predecessor successor live here (this block is its
                // unique-successor predecessor after edge splitting).
                let succ = block.successors().first().copied();
                if let Some(succ) = succ {
                    let succ_block = ctx.func.block(succ).expect("successor exists");
                    if succ_block.phi_count() > 0 && succ_block.predecessors().len() > 1 {
                        let copies = phi_copies_into(ctx.func, succ, block_id);
                        ctx.emit_copies(&copies)?;
                    }
                }
                succ
            }
        };

        if let Some(succ) = fallthrough {
            if next_in_layout != Some(succ) {
                ctx.patches.push((ctx.out.len(), succ));
                ctx.push_op(Op::Goto(u32::MAX));
            }
        }
        Ok(())
    }

    /// Emits one instruction: operand loads, the operation, def handling.
    fn emit_instruction(&self, ctx: &mut EmitCtx<'_>, instr: &IrInstruction) -> Result<()> {
        match instr.op() {
            // Bound by the caller's frame; nothing to emit.
            Op::Argument { .. } => return Ok(()),
            Op::MoveException(_) => {
                // The exception is on the stack at handler entry; bind it.
                return ctx.store_or_pop_def(instr.def());
            }
            Op::AssumeNonNull => {
                // Analysis-only: lower to a plain copy, or to nothing if
                // the refined value is unused.
                let used = instr
                    .def()
                    .and_then(|d| ctx.func.value(d))
                    .is_some_and(|v| v.use_count() > 0);
                if used {
                    ctx.load_operands(instr, 0)?;
                    ctx.store_or_pop_def(instr.def())?;
                }
                return Ok(());
            }
            _ => {}
        }

        let first_load = ctx.carried.get(&instr.id()).copied().unwrap_or(0);
        ctx.load_operands(instr, first_load)?;

        let out_index = ctx.out.len();
        match instr.op() {
            Op::If { cond, target } => {
                ctx.patches.push((out_index, *target as usize));
                ctx.push_op(Op::If {
                    cond: *cond,
                    target: u32::MAX,
                });
            }
            Op::IfCmp { cond, target } => {
                ctx.patches.push((out_index, *target as usize));
                ctx.push_op(Op::IfCmp {
                    cond: *cond,
                    target: u32::MAX,
                });
            }
            Op::Goto(target) => {
                ctx.patches.push((out_index, *target as usize));
                ctx.push_op(Op::Goto(u32::MAX));
            }
            op => ctx.push_op(op.clone()),
        }
        ctx.positions.insert(instr.id(), out_index);

        let emitted = ctx.out[out_index].clone();
        let behavior = emitted.stack_behavior(self.symbols);
        ctx.depth = ctx
            .depth
            .saturating_sub(u16::from(behavior.pops))
            .saturating_add(u16::from(behavior.pushes));
        ctx.max_depth = ctx.max_depth.max(ctx.depth);

        if behavior.pushes > 0 {
            if ctx.carried_defs.contains(&instr.id()) {
                // The single consumer follows immediately; the value stays
                // on the stack.
            } else {
                ctx.store_or_pop_def(instr.def())?;
            }
        }
        Ok(())
    }

    /// Derives the frame-computation block shapes and the handler table.
    fn block_shapes(
        &self,
        func: &IrFunction,
        emitted_ids: &[usize],
        emitted_index: &HashMap<usize, usize>,
        outputs: &[BlockOutput],
        out: &[Instruction],
    ) -> (Vec<EmittedBlock>, Vec<TryRange>) {
        let mut frame_blocks: HashSet<usize> = HashSet::new();
        for instr in out {
            for target in instr.branch_targets() {
                if let Some(index) = outputs.iter().position(|o| o.start == target) {
                    frame_blocks.insert(index);
                }
            }
        }

        let mut emitted_blocks = Vec::with_capacity(outputs.len());
        let mut handlers = Vec::new();
        for (index, &block_id) in emitted_ids.iter().enumerate() {
            let block = func.block(block_id).expect("block exists");
            let catch_type = block.instructions().first().and_then(|i| match i.op() {
                Op::MoveException(ty) => Some(*ty),
                _ => None,
            });
            if catch_type.is_some() {
                frame_blocks.insert(index);
            }

            let preds = block
                .predecessors()
                .iter()
                .filter(|p| {
                    func.block(**p)
                        .is_some_and(|pb| pb.successors().contains(&block_id))
                })
                .filter_map(|p| emitted_index.get(p).copied())
                .collect();
            let exception_preds = block
                .predecessors()
                .iter()
                .filter(|p| {
                    func.block(**p)
                        .is_some_and(|pb| pb.exception_successors().contains(&block_id))
                })
                .filter_map(|p| emitted_index.get(p).copied())
                .collect();
            emitted_blocks.push(EmittedBlock {
                start: outputs[index].start,
                preds,
                exception_preds,
                catch_type,
                stores: outputs[index].stores.clone(),
                throw_cut: outputs[index].throw_cut,
                needs_frame: false,
            });

            let end = outputs
                .get(index + 1)
                .map_or_else(|| u32::try_from(out.len()).unwrap_or(u32::MAX), |o| o.start);
            for &handler_block in block.exception_successors() {
                let handler_index = emitted_index[&handler_block];
                let handler_catch = func
                    .block(handler_block)
                    .and_then(|b| b.instructions().first())
                    .and_then(|i| match i.op() {
                        Op::MoveException(ty) => Some(*ty),
                        _ => None,
                    });
                handlers.push(TryRange {
                    start: outputs[index].start,
                    end,
                    handler: outputs[handler_index].start,
                    catch_type: handler_catch,
                });
            }
        }
        for &index in &frame_blocks {
            emitted_blocks[index].needs_frame = true;
        }
        (emitted_blocks, handlers)
    }
}

/// Argument slot types at method entry.
fn entry_argument_slots(func: &IrFunction) -> Vec<(u16, VerificationType)> {
    func.blocks()
        .first()
        .map(|entry| {
            entry
                .instructions()
                .iter()
                .filter_map(|i| match i.op() {
                    Op::Argument { index, ty } => Some((*index, VerificationType::of(*ty))),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Copies implementing the phis of `block` along the edge from `pred`.
fn phi_copies_into(func: &IrFunction, block: usize, pred: usize) -> Vec<(ValueId, ValueId)> {
    let Some(b) = func.block(block) else {
        return Vec::new();
    };
    b.phis()
        .iter()
        .filter(|phi| {
            func.value(phi.result())
                .is_some_and(|v| v.use_count() > 0)
        })
        .filter_map(|phi| phi.operand_from(pred).map(|op| (op.value(), phi.result())))
        .filter(|(src, dst)| src != dst)
        .collect()
}

/// Splits critical normal edges into phi-bearing blocks.
fn split_critical_edges(func: &mut IrFunction) {
    let block_count = func.block_count();
    for target in 0..block_count {
        let needs_split = func
            .block(target)
            .is_some_and(|b| b.phi_count() > 0 && b.predecessors().len() > 1);
        if !needs_split {
            continue;
        }
        let preds: Vec<usize> = func
            .block(target)
            .expect("block exists")
            .predecessors()
            .to_vec();
        for pred in preds {
            let pred_is_normal = func
                .block(pred)
                .is_some_and(|p| p.successors().contains(&target));
            let pred_successor_count = func.block(pred).map_or(0, |p| p.successors().len());
            if !pred_is_normal || pred_successor_count <= 1 {
                continue;
            }
            let split = func.add_block();
            {
                let pred_block = func.block_mut(pred).expect("pred exists");
                pred_block.replace_successor(target, split);
                if let Some(term) = pred_block.instructions_mut().last_mut() {
                    match term.op().clone() {
                        Op::If { cond, target: t } if t as usize == target => {
                            #[allow(clippy::cast_possible_truncation)]
                            term.set_op(Op::If {
                                cond,
                                target: split as u32,
                            });
                        }
                        Op::IfCmp { cond, target: t } if t as usize == target => {
                            #[allow(clippy::cast_possible_truncation)]
                            term.set_op(Op::IfCmp {
                                cond,
                                target: split as u32,
                            });
                        }
                        _ => {}
                    }
                }
            }
            {
                let split_block = func.block_mut(split).expect("split exists");
                split_block.add_predecessor(pred);
                split_block.add_successor(target);
            }
            {
                let target_block = func.block_mut(target).expect("target exists");
                target_block.replace_predecessor(pred, split);
                for phi in target_block.phis_mut() {
                    phi.rekey_operand(pred, split);
                }
            }
        }
    }
}

/// For each instruction, the number of leading operands that arrive on the
/// stack from the immediately preceding instructions, plus the set of
/// producing instructions whose defs stay on the stack.
fn compute_carried(func: &IrFunction) -> (HashMap<InstrId, usize>, HashSet<InstrId>) {
    let mut carried: HashMap<InstrId, usize> = HashMap::new();
    let mut producers: HashSet<InstrId> = HashSet::new();
    for block in func.blocks() {
        let instructions = block.instructions();
        let has_exception_edges = !block.exception_successors().is_empty();
        for position in 0..instructions.len() {
            let instr = &instructions[position];
            let uses = instr.uses();
            if uses.is_empty() {
                continue;
            }
            // Handler-phi copies are inserted before the final instruction
            // of protected blocks; keep the analysis simple and stop there.
            if has_exception_edges && position + 1 == instructions.len() {
                continue;
            }
            // Longest operand prefix u0..uj produced, in order, by the
            // instructions immediately preceding this one.
            let mut prefix = 0;
            for j in (0..uses.len()).rev() {
                if j + 1 > position {
                    continue;
                }
                let ok = uses[..=j].iter().enumerate().all(|(k, &value)| {
                    let producer = &instructions[position - 1 - j + k];
                    producer.def() == Some(value)
                        && !matches!(
                            producer.op(),
                            Op::Argument { .. } | Op::MoveException(_) | Op::AssumeNonNull
                        )
                        && func.value(value).is_some_and(|v| v.use_count() == 1)
                        && uses.iter().filter(|&&u| u == value).count() == 1
                });
                if ok {
                    prefix = j + 1;
                    break;
                }
            }
            if prefix > 0 {
                carried.insert(instr.id(), prefix);
                for k in 0..prefix {
                    producers.insert(instructions[position - prefix + k].id());
                }
            }
        }
    }
    (carried, producers)
}

/// Assigns output slots: arguments keep their entry slots, every other
/// used-and-not-stack-carried value gets a fresh slot.
fn assign_slots(
    func: &IrFunction,
    carried: &HashMap<InstrId, usize>,
) -> (HashMap<ValueId, u16>, u16) {
    let mut stack_only: HashSet<ValueId> = HashSet::new();
    for block in func.blocks() {
        for instr in block.instructions() {
            if let Some(&prefix) = carried.get(&instr.id()) {
                for &value in &instr.uses()[..prefix] {
                    stack_only.insert(value);
                }
            }
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    let mut next_slot = func.num_locals() as u16;
    let mut slots: HashMap<ValueId, u16> = HashMap::new();
    for value in func.values() {
        if value.use_count() == 0 || stack_only.contains(&value.id()) {
            continue;
        }
        if let ValueOrigin::Argument(slot) = value.origin() {
            if value.version() == 0 {
                slots.insert(value.id(), slot);
                continue;
            }
        }
        slots.insert(value.id(), next_slot);
        next_slot += if value.ty().is_wide() { 2 } else { 1 };
    }
    (slots, next_slot)
}

/// Mutable emission state.
struct EmitCtx<'f> {
    func: &'f IrFunction,
    symbols: &'f SymbolTable,
    slots: &'f HashMap<ValueId, u16>,
    carried: &'f HashMap<InstrId, usize>,
    carried_defs: &'f HashSet<InstrId>,
    out: Vec<Instruction>,
    positions: HashMap<InstrId, usize>,
    patches: Vec<(usize, usize)>,
    stores: Vec<(u16, VerificationType)>,
    throw_cut: Option<usize>,
    depth: u16,
    max_depth: u16,
}

impl EmitCtx<'_> {
    fn push_op(&mut self, op: Op) {
        #[allow(clippy::cast_possible_truncation)]
        let offset = self.out.len() as u32;
        self.out.push(Instruction::new(offset, op));
    }

    fn slot_of(&self, value: ValueId) -> Result<u16> {
        self.slots
            .get(&value)
            .copied()
            .ok_or_else(|| Error::Error(format!("no slot for {value}")))
    }

    fn ty_of(&self, value: ValueId) -> ValueType {
        self.func
            .value(value)
            .map_or(ValueType::Int, crate::ir::Value::ty)
    }

    fn load_operands(&mut self, instr: &IrInstruction, first_load: usize) -> Result<()> {
        let uses: Vec<ValueId> = instr.uses()[first_load..].to_vec();
        for value in uses {
            let slot = self.slot_of(value)?;
            let ty = self.ty_of(value);
            self.push_op(Op::Load { slot, ty });
            self.depth += 1;
            self.max_depth = self.max_depth.max(self.depth);
        }
        Ok(())
    }

    /// Binds a def from the stack: store if used, pop otherwise.
    fn store_or_pop_def(&mut self, def: Option<ValueId>) -> Result<()> {
        let Some(def) = def else {
            return Ok(());
        };
        let used = self
            .func
            .value(def)
            .is_some_and(|v| v.use_count() > 0);
        if used {
            let slot = self.slot_of(def)?;
            let ty = self.ty_of(def);
            self.push_op(Op::Store { slot, ty });
            self.stores.push((slot, VerificationType::of(ty)));
        } else {
            self.push_op(Op::Pop);
        }
        self.depth = self.depth.saturating_sub(1);
        Ok(())
    }

    /// Emits a parallel copy group: all sources loaded before any
    /// destination is stored, so swaps need no explicit temporary.
    fn emit_copies(&mut self, copies: &[(ValueId, ValueId)]) -> Result<()> {
        for &(src, _) in copies {
            let slot = self.slot_of(src)?;
            let ty = self.ty_of(src);
            self.push_op(Op::Load { slot, ty });
            self.depth += 1;
            self.max_depth = self.max_depth.max(self.depth);
        }
        for &(src, dst) in copies.iter().rev() {
            let slot = self.slot_of(dst)?;
            let ty = self.ty_of(src);
            self.push_op(Op::Store { slot, ty });
            self.stores.push((slot, VerificationType::of(ty)));
            self.depth = self.depth.saturating_sub(1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{BinaryOp, IfCond, InstructionAssembler};
    use crate::ir::IrBuilder;
    use crate::model::{MethodBody, MethodId};
    use std::sync::Arc;

    struct Fixture {
        symbols: Arc<SymbolTable>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                symbols: Arc::new(SymbolTable::new()),
            }
        }

        fn int_method(&self, params: usize) -> MethodId {
            let holder = self.symbols.object_type("com/example/Lower");
            let proto = self.symbols.intern_proto(
                "f",
                vec![self.symbols.int(); params],
                self.symbols.int(),
            );
            self.symbols.intern_method(holder, proto)
        }

        fn lower(&self, method: MethodId, body: MethodBody) -> LoweredMethod {
            let func = IrBuilder::new(&self.symbols)
                .build(method, true, &body)
                .unwrap();
            CodeEmitter::new(&self.symbols).lower(&func, None).unwrap()
        }
    }

    #[test]
    fn test_straight_line_lowering_carries_operands() {
        let fx = Fixture::new();
        let method = fx.int_method(0);

        let mut asm = InstructionAssembler::new(0);
        asm.iconst(1).iconst(2).iadd().ret(Some(ValueType::Int));
        let lowered = fx.lower(method, asm.finish().unwrap());

        // The consts feed the add directly: no load/store traffic at all.
        let ops: Vec<&'static str> = lowered
            .instructions
            .iter()
            .map(Instruction::mnemonic)
            .collect();
        assert_eq!(ops, vec!["const", "const", "binary", "return"]);
        assert_eq!(lowered.max_stack, 2);
        assert!(lowered.frames.is_empty(), "no joins, no frames");
    }

    #[test]
    fn test_diamond_join_gets_frame() {
        let fx = Fixture::new();
        let method = fx.int_method(1);

        let mut asm = InstructionAssembler::new(2);
        let else_branch = asm.label();
        let join = asm.label();
        asm.load(0, ValueType::Int).if_zero(IfCond::Eq, else_branch);
        asm.iconst(1).store(1, ValueType::Int).goto(join);
        asm.bind(else_branch);
        asm.iconst(2).store(1, ValueType::Int);
        asm.bind(join);
        asm.load(1, ValueType::Int).ret(Some(ValueType::Int));

        let lowered = fx.lower(method, asm.finish().unwrap());
        assert!(
            !lowered.frames.is_empty(),
            "the join is a branch target and needs a frame"
        );
        for frame in &lowered.frames {
            assert!(frame.stack.is_empty(), "stack is empty at joins");
        }
        // All branch targets must be in range.
        for instr in &lowered.instructions {
            for target in instr.branch_targets() {
                assert!((target as usize) < lowered.instructions.len());
            }
        }
    }

    #[test]
    fn test_loop_lowering_terminates_and_branches_back() {
        let fx = Fixture::new();
        let method = fx.int_method(1);

        let mut asm = InstructionAssembler::new(2);
        let head = asm.label();
        let exit = asm.label();
        asm.load(0, ValueType::Int).store(1, ValueType::Int);
        asm.bind(head);
        asm.load(1, ValueType::Int).if_zero(IfCond::Eq, exit);
        asm.load(1, ValueType::Int)
            .iconst(1)
            .binary(BinaryOp::Sub, ValueType::Int)
            .store(1, ValueType::Int)
            .goto(head);
        asm.bind(exit);
        asm.load(1, ValueType::Int).ret(Some(ValueType::Int));

        let lowered = fx.lower(method, asm.finish().unwrap());
        let has_back_edge = lowered.instructions.iter().any(|i| {
            i.branch_targets()
                .iter()
                .any(|&t| t < i.offset)
        });
        assert!(has_back_edge, "the loop must branch backwards");
        assert!(!lowered.frames.is_empty());
    }

    #[test]
    fn test_handler_lowering_produces_table_and_frame() {
        let fx = Fixture::new();
        let holder = fx.symbols.object_type("com/example/Lower");
        let void_proto = fx
            .symbols
            .intern_proto("g", vec![], fx.symbols.void());
        let method = fx.symbols.intern_method(holder, void_proto);
        let callee = fx.int_method(0);

        let mut asm = InstructionAssembler::new(1);
        let start = asm.label();
        let end = asm.label();
        let handler = asm.label();
        asm.bind(start);
        asm.invoke(crate::bytecode::InvokeKind::Static, callee).pop();
        asm.bind(end);
        asm.ret(None);
        asm.bind(handler);
        asm.pop().ret(None);
        asm.protect(start, end, handler, None);

        let func = IrBuilder::new(&fx.symbols)
            .build(method, true, &asm.finish().unwrap())
            .unwrap();
        let lowered = CodeEmitter::new(&fx.symbols).lower(&func, None).unwrap();

        assert_eq!(lowered.handlers.len(), 1);
        let range = lowered.handlers[0];
        assert!(range.start < range.end);
        assert!((range.handler as usize) < lowered.instructions.len());

        let handler_frame = lowered
            .frames
            .iter()
            .find(|f| f.offset == range.handler)
            .expect("handler entry needs a frame");
        assert_eq!(handler_frame.stack.len(), 1, "caught exception on stack");
    }

    #[test]
    fn test_metadata_round_trip() {
        let fx = Fixture::new();
        let method = fx.int_method(0);
        let callee = fx.int_method(1);

        let mut asm = InstructionAssembler::new(0);
        asm.iconst(7)
            .invoke(crate::bytecode::InvokeKind::Static, callee)
            .ret(Some(ValueType::Int));
        let func = IrBuilder::new(&fx.symbols)
            .build(method, true, &asm.finish().unwrap())
            .unwrap();

        let invoke_id = func
            .all_instructions()
            .find(|i| matches!(i.op(), Op::Invoke { .. }))
            .unwrap()
            .id();
        let mut provider = BytecodeMetadataProvider::new();
        provider.attach(invoke_id, InstructionMetadata::FIELD_READ_FOR_RECEIVER);

        let lowered = CodeEmitter::new(&fx.symbols)
            .lower(&func, Some(&provider))
            .unwrap();
        let invoke_pos = lowered
            .instructions
            .iter()
            .position(|i| matches!(i.op, Op::Invoke { .. }))
            .unwrap();
        assert_eq!(
            lowered.metadata_at(invoke_pos),
            Some(InstructionMetadata::FIELD_READ_FOR_RECEIVER),
            "metadata must survive the IR-to-bytecode remap"
        );
    }
}
