//! Program classes, methods, and fields.
//!
//! A [`ProgramClass`] is one class of the application: type identity,
//! supertype references, members, and access flags. Methods carry either
//! input bytecode (a [`MethodBody`]) or, after finalization, lowered output
//! code; abstract and native methods carry neither.
//!
//! Classes are owned by the [`Application`](crate::model::Application) and
//! are mutated only at serial wave boundaries: class merging adds/moves
//! members and removes source classes, finalization swaps input bodies for
//! output code.

use bitflags::bitflags;

use crate::{
    bytecode::Instruction,
    lowering::LoweredMethod,
    model::{FieldId, MethodId, ProtoId, StrId, TypeId},
};

bitflags! {
    /// Class-level access and attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassAccessFlags: u16 {
        /// Publicly accessible.
        const PUBLIC = 0x0001;
        /// No subclasses allowed.
        const FINAL = 0x0010;
        /// May not be instantiated directly.
        const ABSTRACT = 0x0400;
        /// Generated by the compiler or by this pipeline.
        const SYNTHETIC = 0x1000;
    }
}

bitflags! {
    /// Method-level access and attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodAccessFlags: u16 {
        /// Publicly accessible.
        const PUBLIC = 0x0001;
        /// Accessible only within the declaring class.
        const PRIVATE = 0x0002;
        /// Accessible within the package and subclasses.
        const PROTECTED = 0x0004;
        /// No receiver; dispatched statically.
        const STATIC = 0x0008;
        /// Not overridable.
        const FINAL = 0x0010;
        /// Declared without a body; implemented by subclasses.
        const ABSTRACT = 0x0400;
        /// Compiler-generated bridge (covariant return / generic erasure).
        const BRIDGE = 0x0040;
        /// Generated by the compiler or by this pipeline.
        const SYNTHETIC = 0x1000;
    }
}

bitflags! {
    /// Field-level access and attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldAccessFlags: u16 {
        /// Publicly accessible.
        const PUBLIC = 0x0001;
        /// Accessible only within the declaring class.
        const PRIVATE = 0x0002;
        /// Accessible within the package and subclasses.
        const PROTECTED = 0x0004;
        /// Per-class storage.
        const STATIC = 0x0008;
        /// Written at most once.
        const FINAL = 0x0010;
        /// Generated by the compiler or by this pipeline.
        const SYNTHETIC = 0x1000;
    }
}

/// The kind of a program class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// An ordinary (possibly abstract) class.
    Class,
    /// An interface; may carry default method bodies.
    Interface,
    /// An enum class (unboxing candidate).
    Enum,
    /// An annotation interface.
    Annotation,
}

/// One entry of a method's exception-handler table.
///
/// Offsets are instruction indices into the method's instruction stream.
/// The protected range is `[start, end)`; `handler` is the first
/// instruction of the catch handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryRange {
    /// First protected instruction (inclusive).
    pub start: u32,
    /// End of the protected range (exclusive).
    pub end: u32,
    /// Handler entry instruction.
    pub handler: u32,
    /// Caught type; `None` is a catch-all.
    pub catch_type: Option<TypeId>,
}

impl TryRange {
    /// Returns `true` if the given instruction offset is protected by this range.
    #[must_use]
    pub const fn covers(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Decoded input bytecode of one method.
///
/// This is what the out-of-scope parser hands the optimizer: an
/// already-decoded instruction stream plus the local-variable count and
/// exception-handler table. Branch targets are instruction indices.
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    /// Decoded instructions in stream order.
    pub instructions: Vec<Instruction>,
    /// Number of local-variable slots (arguments included).
    pub max_locals: u16,
    /// Exception-handler table.
    pub handlers: Vec<TryRange>,
}

/// The code state of a method.
#[derive(Debug, Clone, Default)]
pub enum MethodCode {
    /// No code: abstract or native.
    #[default]
    None,
    /// Decoded input bytecode, not yet compiled.
    Input(MethodBody),
    /// Lowered output code produced by the pipeline.
    Output(LoweredMethod),
}

impl MethodCode {
    /// Returns the input body, if this method still carries one.
    #[must_use]
    pub fn input(&self) -> Option<&MethodBody> {
        match self {
            Self::Input(body) => Some(body),
            _ => None,
        }
    }

    /// Returns the lowered output, if finalization has run.
    #[must_use]
    pub fn output(&self) -> Option<&LoweredMethod> {
        match self {
            Self::Output(code) => Some(code),
            _ => None,
        }
    }
}

/// One method of a program class.
#[derive(Debug, Clone)]
pub struct ProgramMethod {
    /// Interned method reference (identity).
    pub id: MethodId,
    /// Interned signature, cached for override matching.
    pub proto: ProtoId,
    /// Access flags.
    pub access: MethodAccessFlags,
    /// Current code state.
    pub code: MethodCode,
    /// Marked as *required* to be inlined into all call sites.
    ///
    /// Set for methods whose code is invalid outside an inlined context,
    /// e.g. synthesized bridges produced by desugaring.
    pub force_inline: bool,
}

impl ProgramMethod {
    /// Creates a method with no code.
    #[must_use]
    pub fn new(id: MethodId, proto: ProtoId, access: MethodAccessFlags) -> Self {
        Self {
            id,
            proto,
            access,
            code: MethodCode::None,
            force_inline: false,
        }
    }

    /// Creates a method carrying input bytecode.
    #[must_use]
    pub fn with_body(
        id: MethodId,
        proto: ProtoId,
        access: MethodAccessFlags,
        body: MethodBody,
    ) -> Self {
        Self {
            id,
            proto,
            access,
            code: MethodCode::Input(body),
            force_inline: false,
        }
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.access.contains(MethodAccessFlags::STATIC)
    }

    /// Returns `true` for abstract methods.
    #[must_use]
    pub const fn is_abstract(&self) -> bool {
        self.access.contains(MethodAccessFlags::ABSTRACT)
    }

    /// Returns `true` if this method has processable input code.
    #[must_use]
    pub fn has_input_code(&self) -> bool {
        matches!(self.code, MethodCode::Input(_))
    }
}

/// One field of a program class.
#[derive(Debug, Clone, Copy)]
pub struct ProgramField {
    /// Interned field reference (identity).
    pub id: FieldId,
    /// Access flags.
    pub access: FieldAccessFlags,
}

impl ProgramField {
    /// Creates a field.
    #[must_use]
    pub const fn new(id: FieldId, access: FieldAccessFlags) -> Self {
        Self { id, access }
    }

    /// Returns `true` for static fields.
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.access.contains(FieldAccessFlags::STATIC)
    }
}

/// A class of the program being optimized.
///
/// # Examples
///
/// ```rust,ignore
/// let mut class = ProgramClass::new(ty, ClassKind::Class, ClassAccessFlags::PUBLIC);
/// class.super_class = Some(symbols.object());
/// class.add_method(ProgramMethod::with_body(id, proto, flags, body));
/// ```
#[derive(Debug, Clone)]
pub struct ProgramClass {
    /// The type this class defines.
    pub ty: TypeId,
    /// Class, interface, enum, or annotation.
    pub kind: ClassKind,
    /// Access flags.
    pub access: ClassAccessFlags,
    /// Superclass; `None` only for the root object type.
    pub super_class: Option<TypeId>,
    /// Directly implemented (or extended, for interfaces) interfaces.
    pub interfaces: Vec<TypeId>,
    /// Member fields.
    pub fields: Vec<ProgramField>,
    /// Member methods.
    pub methods: Vec<ProgramMethod>,
    /// Optional generic-signature attribute.
    pub signature: Option<StrId>,
    /// Enclosing class, if this is an inner class.
    pub inner_class_of: Option<TypeId>,
}

impl ProgramClass {
    /// Creates an empty class.
    #[must_use]
    pub fn new(ty: TypeId, kind: ClassKind, access: ClassAccessFlags) -> Self {
        Self {
            ty,
            kind,
            access,
            super_class: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            signature: None,
            inner_class_of: None,
        }
    }

    /// Returns `true` for interfaces (annotations included).
    #[must_use]
    pub const fn is_interface(&self) -> bool {
        matches!(self.kind, ClassKind::Interface | ClassKind::Annotation)
    }

    /// Returns `true` for enum classes.
    #[must_use]
    pub const fn is_enum(&self) -> bool {
        matches!(self.kind, ClassKind::Enum)
    }

    /// Adds a method to this class.
    pub fn add_method(&mut self, method: ProgramMethod) {
        self.methods.push(method);
    }

    /// Adds a field to this class.
    pub fn add_field(&mut self, field: ProgramField) {
        self.fields.push(field);
    }

    /// Finds the declared method with the given signature.
    #[must_use]
    pub fn find_method(&self, proto: ProtoId) -> Option<&ProgramMethod> {
        self.methods.iter().find(|m| m.proto == proto)
    }

    /// Finds the declared method with the given signature, mutably.
    pub fn find_method_mut(&mut self, proto: ProtoId) -> Option<&mut ProgramMethod> {
        self.methods.iter_mut().find(|m| m.proto == proto)
    }

    /// Finds the declared method with the given identity.
    #[must_use]
    pub fn method_by_id(&self, id: MethodId) -> Option<&ProgramMethod> {
        self.methods.iter().find(|m| m.id == id)
    }

    /// Finds the declared field with the given identity.
    #[must_use]
    pub fn field_by_id(&self, id: FieldId) -> Option<&ProgramField> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Removes and returns the method with the given identity.
    pub fn take_method(&mut self, id: MethodId) -> Option<ProgramMethod> {
        let index = self.methods.iter().position(|m| m.id == id)?;
        Some(self.methods.remove(index))
    }

    /// All supertype references: superclass (if any) then interfaces.
    pub fn supertypes(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.super_class.into_iter().chain(self.interfaces.iter().copied())
    }
}
