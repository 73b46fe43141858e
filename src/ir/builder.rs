//! Bytecode to SSA conversion.
//!
//! The builder abstractly interprets a method's decoded instruction stream,
//! mapping local slots and operand-stack positions to SSA values. Stack
//! shuffles (load/store/dup/pop/nop) are absorbed; everything else becomes
//! an [`IrInstruction`] with explicit operands.
//!
//! # Block formation
//!
//! Leaders are: offset 0, every branch target, the instruction after any
//! control transfer, every handler entry, and the instruction after any
//! potentially-throwing instruction inside a protected range. The last rule
//! ensures a protected block contains at most one throwing instruction (as
//! its final instruction), so the block's exit local state is exactly the
//! state the handler observes - throwing instructions never write locals.
//!
//! A synthetic entry block holds the [`Op::Argument`] bindings, so a
//! bytecode-level loop back to offset 0 never needs phis over the raw
//! arguments' defining block.
//!
//! # Phi placement
//!
//! Phis are created eagerly at every join (and handler entry) for every
//! local slot and live stack position, then filled once all predecessors
//! are simulated. Phis over slots that are undefined along some path are
//! cascaded away afterward; the (many) merely-trivial phis this leaves are
//! the phi-simplification pass's job, not the builder's.
//!
//! # Errors
//!
//! Malformed bytecode (stack underflow, inconsistent join depths, jumps out
//! of range, reads of undefined locals, fall-through off the end) fails
//! with [`Error::Verification`](crate::Error::Verification) naming the
//! method; IR construction is all-or-nothing.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{
    bytecode::{BinaryOp, FlowType, Instruction, Op},
    ir::{ConstValue, DefSite, IrFunction, PhiNode, UseSite, ValueId, ValueOrigin},
    model::{MethodBody, MethodId, SymbolTable, ValueType},
    Result,
};

/// Per-block simulation state.
#[derive(Debug, Clone, Default)]
struct BlockState {
    entry_locals: Vec<Option<ValueId>>,
    exit_locals: Vec<Option<ValueId>>,
    entry_stack: Vec<ValueId>,
    exit_stack: Vec<ValueId>,
}

/// A phi created before its operands are known.
#[derive(Debug, Clone, Copy)]
enum PendingSlot {
    Local(u16),
    Stack(usize),
}

#[derive(Debug, Clone, Copy)]
struct PendingPhi {
    block: usize,
    slot: PendingSlot,
    result: ValueId,
}

/// Builds SSA-form [`IrFunction`]s from decoded bytecode.
pub struct IrBuilder<'a> {
    symbols: &'a SymbolTable,
}

impl<'a> IrBuilder<'a> {
    /// Creates a builder over the given symbol table.
    #[must_use]
    pub fn new(symbols: &'a SymbolTable) -> Self {
        Self { symbols }
    }

    /// Converts a method body to SSA form.
    ///
    /// # Arguments
    ///
    /// * `method` - The method identity (used for argument binding and errors)
    /// * `is_static` - Whether the method has no receiver
    /// * `body` - The decoded input bytecode
    ///
    /// # Errors
    ///
    /// Returns [`Error::Verification`](crate::Error::Verification) for any
    /// malformed input; see the module docs for the defect classes.
    pub fn build(
        &self,
        method: MethodId,
        is_static: bool,
        body: &MethodBody,
    ) -> Result<IrFunction> {
        let code = &body.instructions;
        if code.is_empty() {
            return Err(verification_error!(method, "empty method body"));
        }

        // Argument slot layout.
        let method_data = self.symbols.method(method);
        let proto = self.symbols.proto(method_data.proto);
        let mut arg_slots: Vec<(u16, ValueType)> = Vec::new();
        let mut slot: u16 = 0;
        if !is_static {
            arg_slots.push((slot, ValueType::Reference(method_data.holder)));
            slot += 1;
        }
        for &param in &proto.params {
            let Some(ty) = self.symbols.value_type(param) else {
                return Err(verification_error!(method, "void parameter type"));
            };
            arg_slots.push((slot, ty));
            slot += if ty.is_wide() { 2 } else { 1 };
        }
        let arg_slot_count = usize::from(slot);
        let num_locals = usize::from(body.max_locals);
        if num_locals < arg_slot_count {
            return Err(verification_error!(
                method,
                "max_locals {} smaller than argument slots {}",
                num_locals,
                arg_slot_count
            ));
        }

        // Leader scan.
        #[allow(clippy::cast_possible_truncation)]
        let len = code.len() as u32;
        let mut leaders: BTreeSet<u32> = BTreeSet::new();
        leaders.insert(0);
        for (i, instr) in code.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let offset = i as u32;
            for target in instr.branch_targets() {
                if target >= len {
                    return Err(verification_error!(
                        method,
                        "branch target {} out of range",
                        target
                    ));
                }
                leaders.insert(target);
            }
            let splits_after = !matches!(instr.flow_type(), FlowType::Sequential)
                || (instr.can_throw() && body.handlers.iter().any(|h| h.covers(offset)));
            if splits_after && offset + 1 < len {
                leaders.insert(offset + 1);
            }
        }
        for handler in &body.handlers {
            if handler.handler >= len {
                return Err(verification_error!(
                    method,
                    "handler offset {} out of range",
                    handler.handler
                ));
            }
            leaders.insert(handler.handler);
        }

        // Block ranges; bytecode block k covers [starts[k], starts[k+1]).
        let starts: Vec<u32> = leaders.iter().copied().collect();
        let block_count = starts.len() + 1; // plus synthetic entry block 0
        let block_of = |offset: u32| -> usize {
            match starts.binary_search(&offset) {
                Ok(i) => i + 1,
                Err(i) => i, // i >= 1 because 0 is always a leader
            }
        };

        let mut func = IrFunction::new(method, arg_slot_count, num_locals);
        for _ in 0..block_count {
            func.add_block();
        }

        // Successor relation (computed on ranges before any simulation).
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); block_count];
        let mut exception_successors: Vec<Vec<usize>> = vec![Vec::new(); block_count];
        successors[0].push(1);
        let mut handler_types: HashMap<usize, Option<crate::model::TypeId>> = HashMap::new();
        for (k, &start) in starts.iter().enumerate() {
            let block = k + 1;
            let end = starts.get(k + 1).copied().unwrap_or(len);
            let last = &code[(end - 1) as usize];
            match last.flow_type() {
                FlowType::Sequential => {
                    if end >= len {
                        return Err(verification_error!(
                            method,
                            "fall-through off the end of the method"
                        ));
                    }
                    successors[block].push(block_of(end));
                }
                FlowType::ConditionalBranch => {
                    if end >= len {
                        return Err(verification_error!(
                            method,
                            "conditional fall-through off the end of the method"
                        ));
                    }
                    successors[block].push(block_of(last.branch_targets()[0]));
                    successors[block].push(block_of(end));
                }
                FlowType::UnconditionalBranch => {
                    successors[block].push(block_of(last.branch_targets()[0]));
                }
                FlowType::Return | FlowType::Throw => {}
            }
            for (i, instr) in code[(start as usize)..(end as usize)].iter().enumerate() {
                #[allow(clippy::cast_possible_truncation)]
                let offset = start + i as u32;
                if !instr.can_throw() {
                    continue;
                }
                for range in body.handlers.iter().filter(|h| h.covers(offset)) {
                    let handler_block = block_of(range.handler);
                    if !exception_successors[block].contains(&handler_block) {
                        exception_successors[block].push(handler_block);
                    }
                    handler_types.entry(handler_block).or_insert(range.catch_type);
                }
            }
        }

        // Reachability over both edge kinds.
        let mut reachable = vec![false; block_count];
        let mut stack = vec![0usize];
        while let Some(b) = stack.pop() {
            if reachable[b] {
                continue;
            }
            reachable[b] = true;
            stack.extend(successors[b].iter().copied());
            stack.extend(exception_successors[b].iter().copied());
        }

        // Wire edges among reachable blocks.
        for b in 0..block_count {
            if !reachable[b] {
                continue;
            }
            for &s in &successors[b] {
                func.block_mut(b).expect("block exists").add_successor(s);
                func.block_mut(s).expect("block exists").add_predecessor(b);
            }
            for &s in &exception_successors[b] {
                func.block_mut(b)
                    .expect("block exists")
                    .add_exception_successor(s);
                func.block_mut(s).expect("block exists").add_predecessor(b);
            }
        }
        let handler_blocks: HashSet<usize> = handler_types.keys().copied().collect();
        for &h in &handler_blocks {
            let has_normal_pred = (0..block_count)
                .filter(|&b| reachable[b])
                .any(|b| successors[b].contains(&h));
            if has_normal_pred {
                return Err(verification_error!(
                    method,
                    "handler entry also reachable by normal control flow"
                ));
            }
        }

        // Entry block: argument bindings.
        let mut entry_locals: Vec<Option<ValueId>> = vec![None; num_locals];
        for &(arg_slot, ty) in &arg_slots {
            let (_, def) = func.emit(
                0,
                Op::Argument {
                    index: arg_slot,
                    ty,
                },
                vec![],
                Some((ValueOrigin::Argument(arg_slot), ty)),
            );
            entry_locals[usize::from(arg_slot)] = def;
        }

        // Reverse postorder over reachable blocks.
        let rpo = Self::reverse_postorder(&successors, &exception_successors, &reachable);

        let mut states: Vec<Option<BlockState>> = vec![None; block_count];
        states[0] = Some(BlockState {
            entry_locals: entry_locals.clone(),
            exit_locals: entry_locals,
            entry_stack: Vec::new(),
            exit_stack: Vec::new(),
        });
        let mut pending: Vec<PendingPhi> = Vec::new();

        for &block in rpo.iter().skip(1) {
            let preds: Vec<usize> = func.block(block).expect("block exists").predecessors().to_vec();
            let is_handler = handler_blocks.contains(&block);

            let mut locals: Vec<Option<ValueId>>;
            let mut stack_values: Vec<ValueId>;

            let single_processed_pred = preds.len() == 1 && states[preds[0]].is_some();
            if is_handler {
                locals = vec![None; num_locals];
                for s in 0..num_locals {
                    #[allow(clippy::cast_possible_truncation)]
                    let origin = ValueOrigin::Local(s as u16);
                    let result = func.new_value(origin, ValueType::Int, DefSite::phi(block));
                    func.block_mut(block)
                        .expect("block exists")
                        .add_phi(PhiNode::new(result, origin, ValueType::Int));
                    #[allow(clippy::cast_possible_truncation)]
                    pending.push(PendingPhi {
                        block,
                        slot: PendingSlot::Local(s as u16),
                        result,
                    });
                    locals[s] = Some(result);
                }
                let catch = handler_types
                    .get(&block)
                    .copied()
                    .flatten()
                    .unwrap_or_else(|| self.symbols.throwable());
                let (_, exc) = func.emit(
                    block,
                    Op::MoveException(catch),
                    vec![],
                    Some((ValueOrigin::Stack(0), ValueType::Reference(catch))),
                );
                stack_values = vec![exc.expect("move-exception defines a value")];
            } else if single_processed_pred {
                let pred_state = states[preds[0]].as_ref().expect("pred processed");
                locals = pred_state.exit_locals.clone();
                stack_values = pred_state.exit_stack.clone();
            } else {
                // Join or loop header: eager phis for all locals and for the
                // incoming stack (depth taken from any processed pred).
                let depth = preds
                    .iter()
                    .filter_map(|&p| states[p].as_ref())
                    .map(|s| s.exit_stack.len())
                    .next()
                    .ok_or_else(|| {
                        verification_error!(method, "no processed predecessor for block {}", block)
                    })?;
                locals = vec![None; num_locals];
                for s in 0..num_locals {
                    #[allow(clippy::cast_possible_truncation)]
                    let origin = ValueOrigin::Local(s as u16);
                    let result = func.new_value(origin, ValueType::Int, DefSite::phi(block));
                    func.block_mut(block)
                        .expect("block exists")
                        .add_phi(PhiNode::new(result, origin, ValueType::Int));
                    #[allow(clippy::cast_possible_truncation)]
                    pending.push(PendingPhi {
                        block,
                        slot: PendingSlot::Local(s as u16),
                        result,
                    });
                    locals[s] = Some(result);
                }
                stack_values = Vec::with_capacity(depth);
                for position in 0..depth {
                    #[allow(clippy::cast_possible_truncation)]
                    let origin = ValueOrigin::Stack(position as u16);
                    let result = func.new_value(origin, ValueType::Int, DefSite::phi(block));
                    func.block_mut(block)
                        .expect("block exists")
                        .add_phi(PhiNode::new(result, origin, ValueType::Int));
                    pending.push(PendingPhi {
                        block,
                        slot: PendingSlot::Stack(position),
                        result,
                    });
                    stack_values.push(result);
                }
            }

            let entry_locals = locals.clone();
            let entry_stack = stack_values.clone();

            // Simulate the block's instructions.
            let k = block - 1;
            let start = starts[k] as usize;
            let end = starts
                .get(k + 1)
                .copied()
                .map_or(code.len(), |e| e as usize);
            for instr in &code[start..end] {
                self.simulate(method, &mut func, block, instr, &mut locals, &mut stack_values, block_of)?;
            }

            states[block] = Some(BlockState {
                entry_locals,
                exit_locals: locals,
                entry_stack,
                exit_stack: stack_values,
            });
        }

        self.fill_phis(method, &mut func, &states, &pending)?;

        debug_assert!(func.check_ssa_invariants());
        Ok(func)
    }

    /// Computes reverse postorder over reachable blocks from block 0.
    fn reverse_postorder(
        successors: &[Vec<usize>],
        exception_successors: &[Vec<usize>],
        reachable: &[bool],
    ) -> Vec<usize> {
        let mut visited = vec![false; successors.len()];
        let mut postorder = Vec::new();
        // Iterative DFS with an explicit (node, child-cursor) stack.
        let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
        visited[0] = true;
        while let Some(&mut (node, ref mut cursor)) = stack.last_mut() {
            let all: Vec<usize> = successors[node]
                .iter()
                .chain(exception_successors[node].iter())
                .copied()
                .collect();
            if *cursor < all.len() {
                let next = all[*cursor];
                *cursor += 1;
                if reachable[next] && !visited[next] {
                    visited[next] = true;
                    stack.push((next, 0));
                }
            } else {
                postorder.push(node);
                stack.pop();
            }
        }
        postorder.reverse();
        postorder
    }

    /// Simulates one instruction, emitting IR and updating abstract state.
    #[allow(clippy::too_many_lines)]
    fn simulate(
        &self,
        method: MethodId,
        func: &mut IrFunction,
        block: usize,
        instr: &Instruction,
        locals: &mut [Option<ValueId>],
        stack: &mut Vec<ValueId>,
        block_of: impl Fn(u32) -> usize,
    ) -> Result<()> {
        let pop = |stack: &mut Vec<ValueId>| -> Result<ValueId> {
            stack
                .pop()
                .ok_or_else(|| verification_error!(method, "stack underflow at @{}", instr.offset))
        };
        #[allow(clippy::cast_possible_truncation)]
        let depth = stack.len() as u16;
        let stack_origin = ValueOrigin::Stack(depth);

        match &instr.op {
            Op::Nop => {}
            Op::Load { slot, .. } => {
                let value = locals
                    .get(usize::from(*slot))
                    .copied()
                    .flatten()
                    .ok_or_else(|| {
                        verification_error!(method, "load of undefined local {}", slot)
                    })?;
                stack.push(value);
            }
            Op::Store { slot, .. } => {
                let value = pop(stack)?;
                let slot = usize::from(*slot);
                if slot >= locals.len() {
                    return Err(verification_error!(
                        method,
                        "store to out-of-range local {}",
                        slot
                    ));
                }
                let wide = func.value(value).is_some_and(|v| v.ty().is_wide());
                locals[slot] = Some(value);
                if wide && slot + 1 < locals.len() {
                    locals[slot + 1] = None;
                }
                if slot > 0 {
                    let prev_wide = locals[slot - 1]
                        .and_then(|v| func.value(v))
                        .is_some_and(|v| v.ty().is_wide());
                    if prev_wide {
                        locals[slot - 1] = None;
                    }
                }
            }
            Op::Pop => {
                pop(stack)?;
            }
            Op::Dup => {
                let top = *stack.last().ok_or_else(|| {
                    verification_error!(method, "stack underflow at @{}", instr.offset)
                })?;
                stack.push(top);
            }
            Op::Const(c) => {
                let ty = self.const_type(*c);
                let (_, def) = func.emit(block, instr.op.clone(), vec![], Some((stack_origin, ty)));
                stack.push(def.expect("const defines a value"));
            }
            Op::Binary { op, ty } => {
                let rhs = pop(stack)?;
                let lhs = pop(stack)?;
                let out = if matches!(op, BinaryOp::Cmp) {
                    ValueType::Int
                } else {
                    *ty
                };
                let (_, def) = func.emit(
                    block,
                    instr.op.clone(),
                    vec![lhs, rhs],
                    Some((stack_origin, out)),
                );
                stack.push(def.expect("binary defines a value"));
            }
            Op::Unary { ty, .. } => {
                let value = pop(stack)?;
                let (_, def) =
                    func.emit(block, instr.op.clone(), vec![value], Some((stack_origin, *ty)));
                stack.push(def.expect("unary defines a value"));
            }
            Op::Convert { to, .. } => {
                let value = pop(stack)?;
                let (_, def) =
                    func.emit(block, instr.op.clone(), vec![value], Some((stack_origin, *to)));
                stack.push(def.expect("convert defines a value"));
            }
            Op::GetField(field) => {
                let receiver = pop(stack)?;
                let ty = self.field_value_type(method, *field)?;
                let (_, def) = func.emit(
                    block,
                    instr.op.clone(),
                    vec![receiver],
                    Some((stack_origin, ty)),
                );
                stack.push(def.expect("getfield defines a value"));
            }
            Op::PutField(_) => {
                let value = pop(stack)?;
                let receiver = pop(stack)?;
                func.emit(block, instr.op.clone(), vec![receiver, value], None);
            }
            Op::GetStatic(field) => {
                let ty = self.field_value_type(method, *field)?;
                let (_, def) = func.emit(block, instr.op.clone(), vec![], Some((stack_origin, ty)));
                stack.push(def.expect("getstatic defines a value"));
            }
            Op::PutStatic(_) => {
                let value = pop(stack)?;
                func.emit(block, instr.op.clone(), vec![value], None);
            }
            Op::Invoke { kind, target } => {
                let params = self.symbols.param_count(*target);
                let total = params + usize::from(kind.has_receiver());
                let mut args = Vec::with_capacity(total);
                for _ in 0..total {
                    args.push(pop(stack)?);
                }
                args.reverse();
                let ret = self.symbols.return_type(*target);
                let def = self.symbols.value_type(ret).map(|ty| (stack_origin, ty));
                let (_, out) = func.emit(block, instr.op.clone(), args, def);
                if let Some(out) = out {
                    stack.push(out);
                }
            }
            Op::New(ty) => {
                let (_, def) = func.emit(
                    block,
                    instr.op.clone(),
                    vec![],
                    Some((stack_origin, ValueType::Reference(*ty))),
                );
                stack.push(def.expect("new defines a value"));
            }
            Op::NewArray(component) => {
                let length = pop(stack)?;
                let array_ty = self.symbols.array_of(*component);
                let (_, def) = func.emit(
                    block,
                    instr.op.clone(),
                    vec![length],
                    Some((stack_origin, ValueType::Reference(array_ty))),
                );
                stack.push(def.expect("newarray defines a value"));
            }
            Op::ArrayLength => {
                let array = pop(stack)?;
                let (_, def) = func.emit(
                    block,
                    instr.op.clone(),
                    vec![array],
                    Some((stack_origin, ValueType::Int)),
                );
                stack.push(def.expect("arraylength defines a value"));
            }
            Op::ArrayLoad(ty) => {
                let index = pop(stack)?;
                let array = pop(stack)?;
                let (_, def) = func.emit(
                    block,
                    instr.op.clone(),
                    vec![array, index],
                    Some((stack_origin, *ty)),
                );
                stack.push(def.expect("arrayload defines a value"));
            }
            Op::ArrayStore(_) => {
                let value = pop(stack)?;
                let index = pop(stack)?;
                let array = pop(stack)?;
                func.emit(block, instr.op.clone(), vec![array, index, value], None);
            }
            Op::CheckCast(ty) => {
                let value = pop(stack)?;
                let (_, def) = func.emit(
                    block,
                    instr.op.clone(),
                    vec![value],
                    Some((stack_origin, ValueType::Reference(*ty))),
                );
                stack.push(def.expect("checkcast defines a value"));
            }
            Op::InstanceOf(_) => {
                let value = pop(stack)?;
                let (_, def) = func.emit(
                    block,
                    instr.op.clone(),
                    vec![value],
                    Some((stack_origin, ValueType::Int)),
                );
                stack.push(def.expect("instanceof defines a value"));
            }
            Op::Goto(_) => {
                // Control flow is carried by block successors.
            }
            Op::If { cond, target } => {
                let value = pop(stack)?;
                #[allow(clippy::cast_possible_truncation)]
                let taken = block_of(*target) as u32;
                func.emit(
                    block,
                    Op::If {
                        cond: *cond,
                        target: taken,
                    },
                    vec![value],
                    None,
                );
            }
            Op::IfCmp { cond, target } => {
                let rhs = pop(stack)?;
                let lhs = pop(stack)?;
                #[allow(clippy::cast_possible_truncation)]
                let taken = block_of(*target) as u32;
                func.emit(
                    block,
                    Op::IfCmp {
                        cond: *cond,
                        target: taken,
                    },
                    vec![lhs, rhs],
                    None,
                );
            }
            Op::Return(value_ty) => {
                let uses = if value_ty.is_some() {
                    vec![pop(stack)?]
                } else {
                    vec![]
                };
                func.emit(block, instr.op.clone(), uses, None);
            }
            Op::Throw => {
                let value = pop(stack)?;
                func.emit(block, instr.op.clone(), vec![value], None);
            }
            Op::NullCheck | Op::AssumeNonNull | Op::Argument { .. } | Op::MoveException(_) => {
                return Err(verification_error!(
                    method,
                    "synthetic operation {} in input stream",
                    instr.mnemonic()
                ));
            }
        }
        Ok(())
    }

    /// Computational type of a constant.
    fn const_type(&self, c: ConstValue) -> ValueType {
        match c {
            ConstValue::Int(_) => ValueType::Int,
            ConstValue::Long(_) => ValueType::Long,
            ConstValue::Float(_) => ValueType::Float,
            ConstValue::Double(_) => ValueType::Double,
            ConstValue::Null => ValueType::Reference(self.symbols.object()),
            ConstValue::Str(_) => ValueType::Reference(self.symbols.string()),
            ConstValue::Class(_) => {
                ValueType::Reference(self.symbols.object_type("java/lang/Class"))
            }
        }
    }

    /// Computational type of a field's content.
    fn field_value_type(&self, method: MethodId, field: crate::model::FieldId) -> Result<ValueType> {
        let ty = self.symbols.field(field).ty;
        self.symbols
            .value_type(ty)
            .ok_or_else(|| verification_error!(method, "void-typed field {}", field))
    }

    /// Fills eager phi operands from predecessor exit states, then cascades
    /// away phis over undefined or type-incompatible slots.
    ///
    /// Type resolution runs to fixpoint because a pending phi's operands may
    /// themselves be pending phis whose types are not known yet; a phi whose
    /// reachable operands never resolve has no definition on some path and
    /// is poisoned.
    fn fill_phis(
        &self,
        method: MethodId,
        func: &mut IrFunction,
        states: &[Option<BlockState>],
        pending: &[PendingPhi],
    ) -> Result<()> {
        // Collect operand lists up front; a missing operand (undefined slot
        // along a path) poisons local phis and rejects stack phis outright.
        let pending_results: HashSet<ValueId> = pending.iter().map(|p| p.result).collect();
        let mut operand_lists: HashMap<ValueId, Vec<(usize, ValueId)>> = HashMap::new();
        let mut poisoned: HashSet<ValueId> = HashSet::new();

        for phi in pending {
            let preds: Vec<usize> = func
                .block(phi.block)
                .expect("block exists")
                .predecessors()
                .to_vec();
            let mut operands: Vec<(usize, ValueId)> = Vec::with_capacity(preds.len());
            let mut missing = preds.is_empty();
            for &pred in &preds {
                let state = states[pred].as_ref().expect("reachable pred simulated");
                let value = match phi.slot {
                    PendingSlot::Local(slot) => state.exit_locals[usize::from(slot)],
                    PendingSlot::Stack(position) => {
                        let value = state.exit_stack.get(position).copied();
                        if value.is_none() {
                            return Err(verification_error!(
                                method,
                                "inconsistent stack depth at join block {}",
                                phi.block
                            ));
                        }
                        value
                    }
                };
                match value {
                    Some(v) => operands.push((pred, v)),
                    None => missing = true,
                }
            }
            if missing {
                poisoned.insert(phi.result);
            } else {
                operand_lists.insert(phi.result, operands);
            }
        }

        // Fixpoint type resolution through phi-to-phi operand chains.
        let mut resolved_ty: HashMap<ValueId, ValueType> = HashMap::new();
        loop {
            let mut progress = false;
            for phi in pending {
                if poisoned.contains(&phi.result) || resolved_ty.contains_key(&phi.result) {
                    continue;
                }
                let Some(operands) = operand_lists.get(&phi.result) else {
                    continue;
                };
                let mut ty: Option<ValueType> = None;
                let mut conflict = false;
                let mut operand_poisoned = false;
                for &(_, value) in operands {
                    if value == phi.result {
                        continue;
                    }
                    if poisoned.contains(&value) {
                        operand_poisoned = true;
                        break;
                    }
                    let operand_ty = if pending_results.contains(&value) {
                        resolved_ty.get(&value).copied()
                    } else {
                        func.value(value).map(crate::ir::Value::ty)
                    };
                    if let Some(operand_ty) = operand_ty {
                        match ty {
                            None => ty = Some(operand_ty),
                            Some(t) if Self::types_mergeable(t, operand_ty) => {}
                            Some(_) => {
                                conflict = true;
                                break;
                            }
                        }
                    }
                }
                if operand_poisoned || conflict {
                    if matches!(phi.slot, PendingSlot::Stack(_)) && conflict {
                        return Err(verification_error!(
                            method,
                            "incompatible stack merge at join block {}",
                            phi.block
                        ));
                    }
                    poisoned.insert(phi.result);
                    progress = true;
                } else if let Some(ty) = ty {
                    resolved_ty.insert(phi.result, ty);
                    progress = true;
                }
            }
            if !progress {
                break;
            }
        }
        // Anything never resolved is a degenerate all-phi cycle with no
        // external definition: undefined on every path.
        for phi in pending {
            if !resolved_ty.contains_key(&phi.result) {
                poisoned.insert(phi.result);
            }
        }
        // Poison is transitive: a phi resolved early may still depend on an
        // operand poisoned later.
        loop {
            let mut changed = false;
            for phi in pending {
                if poisoned.contains(&phi.result) {
                    continue;
                }
                if let Some(operands) = operand_lists.get(&phi.result) {
                    if operands.iter().any(|&(_, v)| poisoned.contains(&v)) {
                        poisoned.insert(phi.result);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        for phi in pending {
            if poisoned.contains(&phi.result) && matches!(phi.slot, PendingSlot::Stack(_)) {
                return Err(verification_error!(
                    method,
                    "undefined stack value at join block {}",
                    phi.block
                ));
            }
        }

        // Install operands for healthy phis.
        for phi in pending {
            if poisoned.contains(&phi.result) {
                continue;
            }
            let ty = resolved_ty[&phi.result];
            let operands = &operand_lists[&phi.result];
            for &(pred, value) in operands {
                func.block_mut(phi.block)
                    .expect("block exists")
                    .phi_defining_mut(phi.result)
                    .expect("pending phi exists")
                    .set_operand(pred, value);
                if value != phi.result {
                    if let Some(v) = func.value_mut(value) {
                        v.add_use(UseSite::Phi(phi.result));
                    }
                }
            }
            if let Some(value) = func.value_mut(phi.result) {
                value.set_ty(ty);
            }
            if let Some(node) = func
                .block_mut(phi.block)
                .expect("block exists")
                .phi_defining_mut(phi.result)
            {
                node.set_ty(ty);
            }
        }

        // Drop poisoned phis; any instruction-level use of one is a read of
        // an undefined local.
        for phi in pending {
            if !poisoned.contains(&phi.result) {
                continue;
            }
            let uses = func
                .value(phi.result)
                .map(|v| v.uses().to_vec())
                .unwrap_or_default();
            for site in uses {
                if let UseSite::Instruction(id) = site {
                    return Err(verification_error!(
                        method,
                        "use of undefined local in instruction {}",
                        id
                    ));
                }
            }
            func.remove_phi(phi.result);
        }

        Ok(())
    }

    /// Whether two computational types may merge in one slot.
    ///
    /// References merge with references (the verifier computes the join in
    /// the type hierarchy; the IR keeps the first and relies on declared
    /// types only for frames); primitives must match exactly.
    fn types_mergeable(a: ValueType, b: ValueType) -> bool {
        match (a, b) {
            (ValueType::Reference(_), ValueType::Reference(_)) => true,
            _ => a == b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{IfCond, InstructionAssembler};
    use crate::model::{MethodBody, ProtoId};
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

        fn method(&self, params: usize) -> MethodId {
            let holder = self.symbols.object_type("com/example/Test");
            let proto = self.symbols.intern_proto(
                "target",
                vec![self.symbols.int(); params],
                self.symbols.int(),
            );
            self.symbols.intern_method(holder, proto)
        }

        fn void_method(&self) -> MethodId {
            let holder = self.symbols.object_type("com/example/Test");
            let proto: ProtoId = self
                .symbols
                .intern_proto("voidtarget", vec![], self.symbols.void());
            self.symbols.intern_method(holder, proto)
        }

        fn build(&self, method: MethodId, body: MethodBody) -> Result<IrFunction> {
            IrBuilder::new(&self.symbols).build(method, true, &body)
        }
    }

    #[test]
    fn test_straight_line_arithmetic() {
        let fx = Fixture::new();
        let method = fx.method(2);

        let mut asm = InstructionAssembler::new(2);
        asm.load(0, ValueType::Int)
            .load(1, ValueType::Int)
            .iadd()
            .ret(Some(ValueType::Int));
        let func = fx.build(method, asm.finish().unwrap()).unwrap();

        // Entry block + one bytecode block.
        assert_eq!(func.block_count(), 2);
        assert_eq!(func.total_phi_count(), 0);
        // Two argument bindings, one add, one return.
        assert_eq!(func.total_instruction_count(), 4);
        assert!(func.check_ssa_invariants());
    }

    #[test]
    fn test_diamond_produces_phi() {
        let fx = Fixture::new();
        let method = fx.method(1);

        // if (arg0 == 0) { x = 1 } else { x = 2 }; return x;
        let mut asm = InstructionAssembler::new(2);
        let else_branch = asm.label();
        let join = asm.label();
        asm.load(0, ValueType::Int).if_zero(IfCond::Eq, else_branch);
        asm.iconst(1).store(1, ValueType::Int).goto(join);
        asm.bind(else_branch);
        asm.iconst(2).store(1, ValueType::Int);
        asm.bind(join);
        asm.load(1, ValueType::Int).ret(Some(ValueType::Int));

        let func = fx.build(method, asm.finish().unwrap()).unwrap();
        assert!(func.check_ssa_invariants());

        // The join block needs a phi for local 1.
        let phis_used: Vec<_> = func
            .all_phis()
            .filter(|phi| !func.value(phi.result()).unwrap().is_dead())
            .collect();
        assert_eq!(phis_used.len(), 1);
        assert_eq!(phis_used[0].operand_count(), 2);
    }

    #[test]
    fn test_loop_header_phi() {
        let fx = Fixture::new();
        let method = fx.method(1);

        // i = arg0; while (i != 0) { i = i - 1 } return i;
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

        let func = fx.build(method, asm.finish().unwrap()).unwrap();
        assert!(func.check_ssa_invariants());
        assert!(
            func.all_phis()
                .any(|phi| phi.operand_count() == 2 && !func.value(phi.result()).unwrap().is_dead()),
            "loop header should merge the initial and the decremented value"
        );
    }

    #[test]
    fn test_handler_block_gets_move_exception() {
        let fx = Fixture::new();
        let method = fx.void_method();
        let callee = fx.method(0);

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

        let func = fx.build(method, asm.finish().unwrap()).unwrap();
        assert!(func.check_ssa_invariants());

        let handler_block = func
            .blocks()
            .iter()
            .find(|b| !b.exception_successors().is_empty())
            .and_then(|b| b.exception_successors().first().copied())
            .expect("an exception edge must exist");
        let first = &func.block(handler_block).unwrap().instructions()[0];
        assert!(matches!(first.op(), Op::MoveException(_)));
    }

    #[test]
    fn test_stack_underflow_rejected() {
        let fx = Fixture::new();
        let method = fx.method(0);

        let mut asm = InstructionAssembler::new(0);
        asm.iadd().ret(Some(ValueType::Int));
        let err = fx.build(method, asm.finish().unwrap()).unwrap_err();
        assert!(matches!(err, crate::Error::Verification { .. }));
    }

    #[test]
    fn test_undefined_local_rejected() {
        let fx = Fixture::new();
        let method = fx.method(0);

        let mut asm = InstructionAssembler::new(1);
        asm.load(0, ValueType::Int).ret(Some(ValueType::Int));
        let err = fx.build(method, asm.finish().unwrap()).unwrap_err();
        assert!(matches!(err, crate::Error::Verification { .. }));
    }

    #[test]
    fn test_fall_off_end_rejected() {
        let fx = Fixture::new();
        let method = fx.method(0);

        let mut asm = InstructionAssembler::new(0);
        asm.iconst(1).pop();
        let err = fx.build(method, asm.finish().unwrap()).unwrap_err();
        assert!(matches!(err, crate::Error::Verification { .. }));
    }

    #[test]
    fn test_branch_out_of_range_rejected() {
        let fx = Fixture::new();
        let method = fx.method(0);

        let body = MethodBody {
            instructions: vec![Instruction::new(0, Op::Goto(99))],
            max_locals: 0,
            handlers: vec![],
        };
        let err = fx.build(method, body).unwrap_err();
        assert!(matches!(err, crate::Error::Verification { .. }));
    }

    #[test]
    fn test_unreachable_code_ignored() {
        let fx = Fixture::new();
        let method = fx.method(0);

        let mut asm = InstructionAssembler::new(0);
        let target = asm.label();
        asm.goto(target);
        // Dead instructions between the goto and its target.
        asm.iconst(7).pop();
        asm.bind(target);
        asm.iconst(0).ret(Some(ValueType::Int));

        let func = fx.build(method, asm.finish().unwrap()).unwrap();
        assert!(func.check_ssa_invariants());
        assert!(
            !func
                .all_instructions()
                .any(|i| matches!(i.op(), Op::Const(ConstValue::Int(7)))),
            "unreachable block must not be simulated"
        );
    }
}
