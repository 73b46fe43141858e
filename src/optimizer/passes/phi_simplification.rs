//! Effectively-trivial phi removal.
//!
//! A phi is *effectively trivial* when, transitively through any chain of
//! phi-to-phi operands, every reachable non-phi operand is either the
//! exact same value or a distinct value that provably denotes the same
//! constant (a materializable constant reached through member-value
//! propagation, for example). The entire reachable phi set then collapses
//! to a single value.
//!
//! Three outcomes per phi network:
//!
//! - every reachable non-phi operand is one value `v`: all phis are
//!   replaced by `v` directly. `v` dominates the phis' use sites because
//!   SSA values dominate their uses
//! - operands are distinct values with one common constant meaning: a
//!   fresh constant is materialized at method entry (after the argument
//!   bindings, which dominates everything), optionally followed by a
//!   non-null assumption when the constant is a non-null reference
//! - no non-phi operand exists at all: the network is dead and is
//!   detached
//!
//! Removing a phi can change what downstream narrowing proved non-null;
//! the normalize phase (dead-code elimination) that follows every
//! structural change re-derives those facts.

use std::collections::HashSet;

use crate::{
    bytecode::Op,
    ir::{AbstractValue, ConstValue, DefSite, IrFunction, IrInstruction, ValueId, ValueOrigin},
    model::{Application, ValueType},
    optimizer::{EventKind, IrPass, OptimizerContext},
    Result,
};

/// The phi-simplification pass.
pub struct PhiSimplificationPass;

enum Outcome {
    NotTrivial,
    Dead(Vec<ValueId>),
    SameValue {
        phis: Vec<ValueId>,
        replacement: ValueId,
    },
    SameConstant {
        phis: Vec<ValueId>,
        constant: ConstValue,
        ty: ValueType,
        assume_non_null: bool,
    },
}

impl PhiSimplificationPass {
    /// Abstract value of a non-phi SSA value, consulting member-value
    /// propagation facts for field reads.
    fn abstract_value(func: &IrFunction, ctx: &OptimizerContext, value: ValueId) -> AbstractValue {
        let Some(v) = func.value(value) else {
            return AbstractValue::Bottom;
        };
        let DefSite::Instruction(id) = v.def() else {
            return AbstractValue::Top;
        };
        let Some(instr) = func.instruction(id) else {
            return AbstractValue::Bottom;
        };
        match instr.op() {
            Op::Const(c) => AbstractValue::Constant(*c),
            Op::GetStatic(field) | Op::GetField(field) => ctx
                .known_field_values
                .get(field)
                .map_or(AbstractValue::Top, |c| AbstractValue::Constant(*c)),
            Op::AssumeNonNull | Op::New(_) | Op::NewArray(_) => AbstractValue::NonNull,
            _ => AbstractValue::Top,
        }
    }

    /// Classifies the phi network reachable from `start`.
    fn analyze(func: &IrFunction, ctx: &OptimizerContext, start: ValueId) -> Outcome {
        let mut visited: Vec<ValueId> = Vec::new();
        let mut seen: HashSet<ValueId> = HashSet::new();
        let mut queue: Vec<ValueId> = vec![start];
        let mut representative: Option<ValueId> = None;
        let mut duplicate_constant = false;

        while let Some(current) = queue.pop() {
            if !seen.insert(current) {
                continue;
            }
            let Some(block) = func.phi_block(current) else {
                return Outcome::NotTrivial;
            };
            let Some(phi) = func.block(block).and_then(|b| b.phi_defining(current)) else {
                return Outcome::NotTrivial;
            };
            visited.push(current);

            for operand in phi.used_values() {
                if operand == current {
                    continue;
                }
                let operand_is_phi = func
                    .value(operand)
                    .is_some_and(|v| v.def().is_phi());
                if operand_is_phi {
                    if !seen.contains(&operand) {
                        queue.push(operand);
                    }
                    continue;
                }
                match representative {
                    None => representative = Some(operand),
                    Some(r) if r == operand => {}
                    Some(r) => {
                        let known = Self::abstract_value(func, ctx, r);
                        let other = Self::abstract_value(func, ctx, operand);
                        match (known.as_constant(), other.as_constant()) {
                            (Some(a), Some(b)) if a == b => duplicate_constant = true,
                            _ => return Outcome::NotTrivial,
                        }
                    }
                }
            }
        }

        match representative {
            None => Outcome::Dead(visited),
            Some(replacement) if !duplicate_constant => Outcome::SameValue {
                phis: visited,
                replacement,
            },
            Some(replacement) => {
                let Some(constant) = Self::abstract_value(func, ctx, replacement)
                    .as_constant()
                    .copied()
                else {
                    return Outcome::NotTrivial;
                };
                let ty = func
                    .value(replacement)
                    .map_or(ValueType::Int, crate::ir::Value::ty);
                // A non-null reference constant may feed phis whose type
                // was proven non-null; re-establish that for downstream
                // narrowing.
                let assume_non_null = matches!(
                    constant,
                    ConstValue::Str(_) | ConstValue::Class(_)
                );
                Outcome::SameConstant {
                    phis: visited,
                    constant,
                    ty,
                    assume_non_null,
                }
            }
        }
    }

    /// Replaces all visited phis with `replacement` and detaches them.
    fn replace_network(func: &mut IrFunction, phis: &[ValueId], replacement: ValueId) {
        for &phi in phis {
            func.replace_uses_of(phi, replacement);
        }
        for &phi in phis {
            func.remove_phi(phi);
        }
    }

    /// Materializes `constant` at method entry, after the argument
    /// bindings, and returns the replacement value.
    fn materialize_at_entry(
        func: &mut IrFunction,
        constant: ConstValue,
        ty: ValueType,
        assume_non_null: bool,
    ) -> ValueId {
        let entry = func.entry_block();
        let insert_at = func
            .block(entry)
            .map_or(0, |b| {
                b.instructions()
                    .iter()
                    .take_while(|i| matches!(i.op(), Op::Argument { .. }))
                    .count()
            });

        let const_id = func.alloc_instr_id();
        let const_value = func.new_value(ValueOrigin::Synthetic, ty, DefSite::instruction(const_id));
        func.block_mut(entry)
            .expect("entry exists")
            .insert_instruction(
                insert_at,
                IrInstruction::new(const_id, Op::Const(constant), vec![], Some(const_value)),
            );

        if !assume_non_null {
            return const_value;
        }
        let assume_id = func.alloc_instr_id();
        let assumed = func.new_value(ValueOrigin::Synthetic, ty, DefSite::instruction(assume_id));
        if let Some(v) = func.value_mut(const_value) {
            v.add_use(crate::ir::UseSite::Instruction(assume_id));
        }
        func.block_mut(entry)
            .expect("entry exists")
            .insert_instruction(
                insert_at + 1,
                IrInstruction::new(assume_id, Op::AssumeNonNull, vec![const_value], Some(assumed)),
            );
        assumed
    }
}

impl IrPass for PhiSimplificationPass {
    fn name(&self) -> &'static str {
        "phi-simplification"
    }

    fn description(&self) -> &'static str {
        "Collapses effectively-trivial phi networks to a single value"
    }

    fn run_on_method(
        &self,
        func: &mut IrFunction,
        ctx: &OptimizerContext,
        _app: &Application,
    ) -> Result<bool> {
        let mut changed = false;
        let candidates: Vec<ValueId> = func.all_phis().map(crate::ir::PhiNode::result).collect();

        for start in candidates {
            // Earlier collapses may have removed this phi already.
            if func
                .phi_block(start)
                .and_then(|b| func.block(b))
                .and_then(|b| b.phi_defining(start))
                .is_none()
            {
                continue;
            }
            match Self::analyze(func, ctx, start) {
                Outcome::NotTrivial => {}
                Outcome::Dead(phis) => {
                    let used_externally = phis.iter().any(|&p| {
                        func.value(p).is_some_and(|v| {
                            v.uses().iter().any(|u| {
                                !matches!(u, crate::ir::UseSite::Phi(user) if phis.contains(user))
                            })
                        })
                    });
                    if used_externally {
                        continue;
                    }
                    for &phi in &phis {
                        func.remove_phi(phi);
                    }
                    ctx.events
                        .record(EventKind::PhiSimplified)
                        .at(func.method())
                        .message(format!("{} dead phis detached", phis.len()));
                    changed = true;
                }
                Outcome::SameValue { phis, replacement } => {
                    Self::replace_network(func, &phis, replacement);
                    ctx.events
                        .record(EventKind::PhiSimplified)
                        .at(func.method())
                        .message(format!("{} phis -> {replacement}", phis.len()));
                    changed = true;
                }
                Outcome::SameConstant {
                    phis,
                    constant,
                    ty,
                    assume_non_null,
                } => {
                    let replacement =
                        Self::materialize_at_entry(func, constant, ty, assume_non_null);
                    Self::replace_network(func, &phis, replacement);
                    ctx.events
                        .record(EventKind::PhiSimplified)
                        .at(func.method())
                        .message(format!("{} phis -> const {constant}", phis.len()));
                    changed = true;
                }
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{IfCond, InstructionAssembler};
    use crate::ir::IrBuilder;
    use crate::model::{KeepNothing, MethodId, SymbolTable};
    use crate::Options;
    use std::sync::Arc;

    struct Fixture {
        symbols: Arc<SymbolTable>,
        ctx: OptimizerContext,
        app: Application,
    }

    impl Fixture {
        fn new() -> Self {
            let symbols = Arc::new(SymbolTable::new());
            let ctx = OptimizerContext::new(
                Arc::clone(&symbols),
                Options::default(),
                Arc::new(KeepNothing),
            );
            let app = Application::new(Arc::clone(&symbols));
            Self { symbols, ctx, app }
        }

        fn int_method(&self, params: usize) -> MethodId {
            let holder = self.symbols.object_type("com/example/Phi");
            let proto = self.symbols.intern_proto(
                "f",
                vec![self.symbols.int(); params],
                self.symbols.int(),
            );
            self.symbols.intern_method(holder, proto)
        }

        fn run(&self, func: &mut IrFunction) -> bool {
            PhiSimplificationPass
                .run_on_method(func, &self.ctx, &self.app)
                .unwrap()
        }
    }

    /// A loop whose body never changes the merged local: the header phi
    /// merges the initial value with itself and collapses to it.
    #[test]
    fn test_same_value_phi_collapses() {
        let fx = Fixture::new();
        let method = fx.int_method(1);

        let mut asm = InstructionAssembler::new(2);
        let head = asm.label();
        let exit = asm.label();
        asm.load(0, ValueType::Int).store(1, ValueType::Int);
        asm.bind(head);
        asm.load(0, ValueType::Int).if_zero(IfCond::Eq, exit);
        asm.goto(head);
        asm.bind(exit);
        asm.load(1, ValueType::Int).ret(Some(ValueType::Int));

        let mut func = IrBuilder::new(&fx.symbols)
            .build(method, true, &asm.finish().unwrap())
            .unwrap();

        let live_phis_before = func
            .all_phis()
            .filter(|p| func.value(p.result()).unwrap().use_count() > 0)
            .count();
        assert!(live_phis_before > 0, "builder creates eager loop phis");

        assert!(fx.run(&mut func));
        assert!(func.check_ssa_invariants());
        let live_phis_after = func
            .all_phis()
            .filter(|p| func.value(p.result()).unwrap().use_count() > 0)
            .count();
        assert_eq!(live_phis_after, 0, "all phis here are effectively trivial");
    }

    /// Spec scenario: a loop-header phi whose operands are the constant 42
    /// and a field read known to always yield 42 collapses to a single
    /// materialized constant dominating all former uses.
    #[test]
    fn test_same_constant_phi_materializes() {
        let fx = Fixture::new();
        let method = fx.int_method(1);

        let holder = fx.symbols.object_type("com/example/Config");
        let field = fx
            .symbols
            .intern_field(holder, "answer", fx.symbols.int());
        fx.ctx.known_field_values.insert(field, ConstValue::Int(42));

        // x = 42; while (arg0 != 0) { x = Config.answer; } return x;
        let mut asm = InstructionAssembler::new(2);
        let head = asm.label();
        let exit = asm.label();
        asm.iconst(42).store(1, ValueType::Int);
        asm.bind(head);
        asm.load(0, ValueType::Int).if_zero(IfCond::Eq, exit);
        asm.get_static(field).store(1, ValueType::Int).goto(head);
        asm.bind(exit);
        asm.load(1, ValueType::Int).ret(Some(ValueType::Int));

        let mut func = IrBuilder::new(&fx.symbols)
            .build(method, true, &asm.finish().unwrap())
            .unwrap();

        assert!(fx.run(&mut func));
        assert!(func.check_ssa_invariants());

        // A constant 42 now sits in the entry block, after the argument
        // binding, and feeds the return.
        let entry = func.block(func.entry_block()).unwrap();
        let const_pos = entry
            .instructions()
            .iter()
            .position(|i| matches!(i.op(), Op::Const(ConstValue::Int(42))))
            .expect("materialized constant at entry");
        assert!(
            entry.instructions()[..const_pos]
                .iter()
                .all(|i| matches!(i.op(), Op::Argument { .. })),
            "the constant comes right after the argument bindings"
        );

        let materialized = entry.instructions()[const_pos].def().unwrap();
        let return_uses_it = func.all_instructions().any(|i| {
            matches!(i.op(), Op::Return(_)) && i.uses() == [materialized]
        });
        assert!(return_uses_it, "former phi uses now see the constant");

        // No live phi merging local 1 remains.
        let live_phi_remains = func
            .all_phis()
            .any(|p| func.value(p.result()).unwrap().use_count() > 0);
        assert!(!live_phi_remains);
        assert!(fx.ctx.events.count(EventKind::PhiSimplified) > 0);
    }

    /// Distinct constants are not trivial: nothing changes.
    #[test]
    fn test_distinct_constants_not_trivial() {
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

        let mut func = IrBuilder::new(&fx.symbols)
            .build(method, true, &asm.finish().unwrap())
            .unwrap();

        let live_phi = |f: &IrFunction| {
            f.all_phis()
                .filter(|p| f.value(p.result()).unwrap().use_count() > 0)
                .count()
        };
        let before = live_phi(&func);
        fx.run(&mut func);
        assert_eq!(
            live_phi(&func),
            before,
            "a genuine merge of 1 and 2 must survive"
        );
        assert!(func.check_ssa_invariants());
    }

    /// After replacement, no use of any removed phi remains anywhere.
    #[test]
    fn test_no_remaining_uses_after_replacement() {
        let fx = Fixture::new();
        let method = fx.int_method(1);

        let mut asm = InstructionAssembler::new(2);
        let head = asm.label();
        let exit = asm.label();
        asm.load(0, ValueType::Int).store(1, ValueType::Int);
        asm.bind(head);
        asm.load(1, ValueType::Int).if_zero(IfCond::Eq, exit);
        asm.goto(head);
        asm.bind(exit);
        asm.iconst(0).ret(Some(ValueType::Int));

        let mut func = IrBuilder::new(&fx.symbols)
            .build(method, true, &asm.finish().unwrap())
            .unwrap();
        fx.run(&mut func);

        let removed: Vec<ValueId> = func
            .values()
            .iter()
            .filter(|v| v.def().is_phi())
            .map(crate::ir::Value::id)
            .filter(|&p| {
                func.phi_block(p)
                    .and_then(|b| func.block(b))
                    .and_then(|b| b.phi_defining(p))
                    .is_none()
            })
            .collect();
        for instr in func.all_instructions() {
            for used in instr.uses() {
                assert!(
                    !removed.contains(used),
                    "an instruction still uses a removed phi"
                );
            }
        }
        for phi in func.all_phis() {
            for used in phi.used_values() {
                assert!(!removed.contains(&used));
            }
        }
    }
}
