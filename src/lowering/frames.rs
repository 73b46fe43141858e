//! Stack-map frame computation.
//!
//! A frame records the verifier-visible type state (local slots + operand
//! stack) at one offset of the output code. The emitter keeps the operand
//! stack empty across block boundaries, so the stack half of every frame
//! is empty except at handler entries, where it is the caught exception.
//! The locals half requires a must-assign dataflow: a slot's type is part
//! of the frame only if every path into the block assigns it a compatible
//! type.

use std::collections::HashMap;

use crate::model::{TypeId, ValueType};

/// Verifier-visible type of one slot or stack entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType {
    /// Unknown/unusable content.
    Top,
    /// 32-bit integer (booleans and sub-int primitives included).
    Integer,
    /// 32-bit float.
    Float,
    /// 64-bit integer; occupies this slot and the next.
    Long,
    /// 64-bit float; occupies this slot and the next.
    Double,
    /// The null reference.
    Null,
    /// `this` before the superclass constructor ran.
    UninitializedThis,
    /// An initialized reference of the given type.
    Object(TypeId),
}

impl VerificationType {
    /// The verification type of a computational value type.
    #[must_use]
    pub const fn of(ty: ValueType) -> Self {
        match ty {
            ValueType::Int => Self::Integer,
            ValueType::Float => Self::Float,
            ValueType::Long => Self::Long,
            ValueType::Double => Self::Double,
            ValueType::Reference(t) => Self::Object(t),
        }
    }

    /// Returns `true` for two-slot types.
    #[must_use]
    pub const fn is_wide(&self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    /// Meet of two types at a join; incompatible content becomes [`Self::Top`].
    ///
    /// Reference joins are widened to the common `Object` supertype by the
    /// writer; the frame computation only needs "both are references".
    #[must_use]
    pub fn meet(self, other: Self, object_root: TypeId) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Null, Self::Object(t)) | (Self::Object(t), Self::Null) => Self::Object(t),
            (Self::Object(_), Self::Object(_)) => Self::Object(object_root),
            _ => Self::Top,
        }
    }
}

/// One stack-map frame of the output code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapFrame {
    /// Output instruction offset the frame applies to.
    pub offset: u32,
    /// Local-slot types, dense from slot 0; wide types are followed by an
    /// explicit [`VerificationType::Top`] for their high slot.
    pub locals: Vec<VerificationType>,
    /// Operand-stack types, bottom first.
    pub stack: Vec<VerificationType>,
}

/// Output-block shape handed over by the emitter.
#[derive(Debug, Clone)]
pub(crate) struct EmittedBlock {
    /// First output offset of the block.
    pub start: u32,
    /// Normal predecessors (emitted-block indices).
    pub preds: Vec<usize>,
    /// Exception predecessors (emitted-block indices).
    pub exception_preds: Vec<usize>,
    /// Caught type, for handler blocks.
    pub catch_type: Option<TypeId>,
    /// Slot stores performed by the block, in order.
    pub stores: Vec<(u16, VerificationType)>,
    /// For protected blocks: how many of `stores` precede the (final)
    /// throwing instruction and are therefore visible to handlers.
    pub throw_cut: Option<usize>,
    /// Whether the verifier requires a frame at `start` (branch target or
    /// handler entry).
    pub needs_frame: bool,
}

/// Slot-typed state: `None` per absent slot.
type Locals = HashMap<u16, VerificationType>;

fn transfer(mut locals: Locals, stores: &[(u16, VerificationType)]) -> Locals {
    for &(slot, ty) in stores {
        if ty.is_wide() {
            locals.insert(slot + 1, VerificationType::Top);
        }
        // A narrow store into the high half of a wide pair kills the pair.
        if slot > 0 {
            if let Some(prev) = locals.get(&(slot - 1)) {
                if prev.is_wide() {
                    locals.insert(slot - 1, VerificationType::Top);
                }
            }
        }
        locals.insert(slot, ty);
    }
    locals
}

fn meet_states(states: Vec<Locals>, object_root: TypeId) -> Locals {
    let mut iter = states.into_iter();
    let Some(mut acc) = iter.next() else {
        return Locals::new();
    };
    for state in iter {
        acc.retain(|slot, ty| {
            if let Some(&other) = state.get(slot) {
                *ty = ty.meet(other, object_root);
                true
            } else {
                false
            }
        });
    }
    acc
}

/// Computes frames for every block that needs one.
///
/// `entry_locals` is the argument binding of slot types at method entry.
pub(crate) fn compute_frames(
    blocks: &[EmittedBlock],
    entry_locals: &[(u16, VerificationType)],
    object_root: TypeId,
) -> Vec<StackMapFrame> {
    let entry = transfer(Locals::new(), entry_locals);

    // Forward must-assign fixpoint.
    let mut ins: Vec<Option<Locals>> = vec![None; blocks.len()];
    ins[0] = Some(entry);
    loop {
        let mut changed = false;
        for (index, block) in blocks.iter().enumerate() {
            let mut incoming: Vec<Locals> = Vec::new();
            if index == 0 {
                incoming.push(ins[0].clone().expect("entry state set"));
            }
            for &pred in &block.preds {
                if let Some(state) = &ins[pred] {
                    incoming.push(transfer(state.clone(), &blocks[pred].stores));
                }
            }
            for &pred in &block.exception_preds {
                if let Some(state) = &ins[pred] {
                    let cut = blocks[pred].throw_cut.unwrap_or(blocks[pred].stores.len());
                    incoming.push(transfer(state.clone(), &blocks[pred].stores[..cut]));
                }
            }
            if incoming.is_empty() {
                continue;
            }
            let state = meet_states(incoming, object_root);
            if ins[index].as_ref() != Some(&state) {
                ins[index] = Some(state);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Emit frames at required offsets.
    let mut frames = Vec::new();
    for (index, block) in blocks.iter().enumerate() {
        if !block.needs_frame {
            continue;
        }
        let Some(state) = &ins[index] else { continue };

        let max_slot = state.keys().copied().max().map_or(0, |s| s + 1);
        let mut locals = vec![VerificationType::Top; usize::from(max_slot)];
        for (&slot, &ty) in state {
            locals[usize::from(slot)] = ty;
        }
        // Trim trailing Top entries; verifiers treat absent and Top alike.
        while locals.last() == Some(&VerificationType::Top) {
            locals.pop();
        }

        let stack = match block.catch_type {
            Some(catch) => vec![VerificationType::Object(catch)],
            None => Vec::new(),
        };
        frames.push(StackMapFrame {
            offset: block.start,
            locals,
            stack,
        });
    }
    frames.sort_by_key(|f| f.offset);
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SymbolTable;

    fn object_root(symbols: &SymbolTable) -> TypeId {
        symbols.object()
    }

    #[test]
    fn test_verification_type_of() {
        let symbols = SymbolTable::new();
        assert_eq!(VerificationType::of(ValueType::Int), VerificationType::Integer);
        assert!(VerificationType::of(ValueType::Long).is_wide());
        let obj = symbols.object();
        assert_eq!(
            VerificationType::of(ValueType::Reference(obj)),
            VerificationType::Object(obj)
        );
    }

    #[test]
    fn test_meet_references() {
        let symbols = SymbolTable::new();
        let root = object_root(&symbols);
        let a = symbols.object_type("A");
        let b = symbols.object_type("B");

        assert_eq!(
            VerificationType::Object(a).meet(VerificationType::Object(a), root),
            VerificationType::Object(a)
        );
        assert_eq!(
            VerificationType::Object(a).meet(VerificationType::Object(b), root),
            VerificationType::Object(root)
        );
        assert_eq!(
            VerificationType::Null.meet(VerificationType::Object(a), root),
            VerificationType::Object(a)
        );
        assert_eq!(
            VerificationType::Integer.meet(VerificationType::Float, root),
            VerificationType::Top
        );
    }

    #[test]
    fn test_join_drops_one_sided_slots() {
        let symbols = SymbolTable::new();
        let root = object_root(&symbols);

        // Block 0 branches to 1 and 2; both store different slots, then
        // join at 3 (a branch target, so it needs a frame).
        let blocks = vec![
            EmittedBlock {
                start: 0,
                preds: vec![],
                exception_preds: vec![],
                catch_type: None,
                stores: vec![(0, VerificationType::Integer)],
                throw_cut: None,
                needs_frame: false,
            },
            EmittedBlock {
                start: 2,
                preds: vec![0],
                exception_preds: vec![],
                catch_type: None,
                stores: vec![(1, VerificationType::Integer)],
                throw_cut: None,
                needs_frame: false,
            },
            EmittedBlock {
                start: 4,
                preds: vec![0],
                exception_preds: vec![],
                catch_type: None,
                stores: vec![(2, VerificationType::Float)],
                throw_cut: None,
                needs_frame: false,
            },
            EmittedBlock {
                start: 6,
                preds: vec![1, 2],
                exception_preds: vec![],
                catch_type: None,
                stores: vec![],
                throw_cut: None,
                needs_frame: true,
            },
        ];

        let frames = compute_frames(&blocks, &[], root);
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.offset, 6);
        // Slot 0 assigned on both paths; slots 1 and 2 on one path only.
        assert_eq!(frame.locals, vec![VerificationType::Integer]);
        assert!(frame.stack.is_empty());
    }

    #[test]
    fn test_handler_frame_has_exception_stack() {
        let symbols = SymbolTable::new();
        let root = object_root(&symbols);
        let throwable = symbols.throwable();

        let blocks = vec![
            EmittedBlock {
                start: 0,
                preds: vec![],
                exception_preds: vec![],
                catch_type: None,
                stores: vec![(0, VerificationType::Integer), (1, VerificationType::Float)],
                // Only the first store precedes the throwing instruction.
                throw_cut: Some(1),
                needs_frame: false,
            },
            EmittedBlock {
                start: 5,
                preds: vec![],
                exception_preds: vec![0],
                catch_type: Some(throwable),
                stores: vec![],
                throw_cut: None,
                needs_frame: true,
            },
        ];

        let frames = compute_frames(&blocks, &[], root);
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.stack, vec![VerificationType::Object(throwable)]);
        // The float store after the throw point is not visible.
        assert_eq!(frame.locals, vec![VerificationType::Integer]);
    }

    #[test]
    fn test_wide_store_pads_high_slot() {
        let symbols = SymbolTable::new();
        let root = object_root(&symbols);

        let blocks = vec![
            EmittedBlock {
                start: 0,
                preds: vec![],
                exception_preds: vec![],
                catch_type: None,
                stores: vec![(0, VerificationType::Long), (2, VerificationType::Integer)],
                throw_cut: None,
                needs_frame: false,
            },
            EmittedBlock {
                start: 4,
                preds: vec![0],
                exception_preds: vec![],
                catch_type: None,
                stores: vec![],
                throw_cut: None,
                needs_frame: true,
            },
        ];

        let frames = compute_frames(&blocks, &[], root);
        assert_eq!(
            frames[0].locals,
            vec![
                VerificationType::Long,
                VerificationType::Top,
                VerificationType::Integer
            ]
        );
    }

    #[test]
    fn test_entry_arguments_flow_to_frames(){
        let symbols = SymbolTable::new();
        let root = object_root(&symbols);

        let blocks = vec![
            EmittedBlock {
                start: 0,
                preds: vec![],
                exception_preds: vec![],
                catch_type: None,
                stores: vec![],
                throw_cut: None,
                needs_frame: false,
            },
            EmittedBlock {
                start: 3,
                preds: vec![0],
                exception_preds: vec![],
                catch_type: None,
                stores: vec![],
                throw_cut: None,
                needs_frame: true,
            },
        ];

        let frames = compute_frames(
            &blocks,
            &[(0, VerificationType::Object(root)), (1, VerificationType::Integer)],
            root,
        );
        assert_eq!(
            frames[0].locals,
            vec![VerificationType::Object(root), VerificationType::Integer]
        );
    }
}
