//! Interned symbol references and the symbol table.
//!
//! Every type, method signature, method and field the pipeline touches is
//! represented by a small copyable id ([`TypeId`], [`ProtoId`], [`MethodId`],
//! [`FieldId`]) interned in a [`SymbolTable`]. Interning gives the whole
//! program a single identity per reference, so equality is integer equality
//! and side tables can be keyed by id.
//!
//! The table is an explicit context handle passed into every component that
//! needs to intern or resolve a name. There is deliberately no process-wide
//! singleton: a table's lifecycle is tied to one compilation run.
//!
//! # Thread Safety
//!
//! [`SymbolTable`] is internally synchronized with an `RwLock` and can be
//! shared across worker threads during parallel method processing.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Interned string id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrId(u32);

/// Interned type id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

/// Interned method-signature (name + parameter types + return type) id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtoId(u32);

/// Interned method-reference id: (holder type, signature).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u32);

/// Interned field-reference id: (holder type, name, field type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(u32);

macro_rules! impl_symbol_id {
    ($name:ident, $prefix:literal) => {
        impl $name {
            /// Creates an id from a raw index.
            #[must_use]
            pub const fn new(index: usize) -> Self {
                #[allow(clippy::cast_possible_truncation)]
                Self(index as u32)
            }

            /// Returns the raw index of this id.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

impl_symbol_id!(StrId, "s");
impl_symbol_id!(TypeId, "t");
impl_symbol_id!(ProtoId, "p");
impl_symbol_id!(MethodId, "m");
impl_symbol_id!(FieldId, "f");

/// Structural description of a type.
///
/// Object types carry their interned binary name; array types carry the
/// interned component type, so nested arrays are chains of [`TypeId`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// The `void` pseudo-type (return types only).
    Void,
    /// Boolean (stored as int on the operand stack).
    Boolean,
    /// 8-bit signed integer.
    Byte,
    /// 16-bit signed integer.
    Short,
    /// 16-bit unsigned character.
    Char,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer (two local slots).
    Long,
    /// 32-bit floating point.
    Float,
    /// 64-bit floating point (two local slots).
    Double,
    /// A class or interface type, by interned binary name.
    Object(StrId),
    /// An array type, by interned component type.
    Array(TypeId),
}

impl TypeDescriptor {
    /// Returns `true` for primitive value types (not `void`, not references).
    #[must_use]
    pub const fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Boolean
                | Self::Byte
                | Self::Short
                | Self::Char
                | Self::Int
                | Self::Long
                | Self::Float
                | Self::Double
        )
    }

    /// Returns `true` for object and array types.
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Array(_))
    }

    /// Returns `true` if values of this type occupy two local/stack slots.
    #[must_use]
    pub const fn is_wide(&self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }
}

/// Computational type of a value on the operand stack or in the IR.
///
/// The sub-int primitives (boolean, byte, short, char) all compute as
/// [`ValueType::Int`]; the distinction only matters for field/array storage
/// and is carried by [`TypeDescriptor`] there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 32-bit integer computational type.
    Int,
    /// 64-bit integer computational type (wide).
    Long,
    /// 32-bit float computational type.
    Float,
    /// 64-bit float computational type (wide).
    Double,
    /// A reference, with its static type.
    Reference(TypeId),
}

impl ValueType {
    /// Returns `true` if this value occupies two slots.
    #[must_use]
    pub const fn is_wide(&self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    /// Returns `true` for reference values.
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Reference(_))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Long => write!(f, "long"),
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
            Self::Reference(t) => write!(f, "ref({t})"),
        }
    }
}

/// Interned method signature: name plus parameter and return types.
///
/// Signatures are interned separately from method references so that
/// override matching across the class hierarchy is an id comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtoData {
    /// Method name.
    pub name: StrId,
    /// Parameter types, in declaration order (excluding the receiver).
    pub params: Vec<TypeId>,
    /// Return type (`void` allowed).
    pub ret: TypeId,
}

/// Interned method reference: a signature anchored to a holder type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodRefData {
    /// The type on which the method is referenced.
    pub holder: TypeId,
    /// The method signature.
    pub proto: ProtoId,
}

/// Interned field reference: holder type, name, and field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldRefData {
    /// The type on which the field is referenced.
    pub holder: TypeId,
    /// Field name.
    pub name: StrId,
    /// Declared field type.
    pub ty: TypeId,
}

#[derive(Debug, Default)]
struct Tables {
    strings: Vec<String>,
    string_index: HashMap<String, StrId>,
    types: Vec<TypeDescriptor>,
    type_index: HashMap<TypeDescriptor, TypeId>,
    protos: Vec<ProtoData>,
    proto_index: HashMap<ProtoData, ProtoId>,
    methods: Vec<MethodRefData>,
    method_index: HashMap<MethodRefData, MethodId>,
    fields: Vec<FieldRefData>,
    field_index: HashMap<FieldRefData, FieldId>,
}

/// The compilation-wide symbol interner.
///
/// One table exists per compilation run and is passed explicitly to every
/// component that interns or resolves symbols. All `intern_*` operations
/// are create-or-get: interning the same data twice yields the same id.
///
/// # Examples
///
/// ```rust
/// use shrike::model::{SymbolTable, TypeDescriptor};
///
/// let symbols = SymbolTable::new();
/// let string = symbols.object_type("java/lang/String");
/// let same = symbols.object_type("java/lang/String");
/// assert_eq!(string, same);
///
/// let ints = symbols.array_of(symbols.int());
/// assert_eq!(symbols.type_desc(ints), TypeDescriptor::Array(symbols.int()));
/// ```
#[derive(Debug, Default)]
pub struct SymbolTable {
    inner: RwLock<Tables>,
}

impl SymbolTable {
    /// Creates an empty symbol table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string, returning its id.
    pub fn intern_str(&self, value: &str) -> StrId {
        if let Some(&id) = read_lock!(self.inner).string_index.get(value) {
            return id;
        }
        let mut tables = write_lock!(self.inner);
        if let Some(&id) = tables.string_index.get(value) {
            return id;
        }
        let id = StrId::new(tables.strings.len());
        tables.strings.push(value.to_string());
        tables.string_index.insert(value.to_string(), id);
        id
    }

    /// Returns the string for an id.
    ///
    /// # Panics
    ///
    /// Panics if the id was not produced by this table.
    #[must_use]
    pub fn str(&self, id: StrId) -> String {
        read_lock!(self.inner).strings[id.index()].clone()
    }

    /// Interns a type descriptor, returning its id.
    pub fn intern_type(&self, desc: TypeDescriptor) -> TypeId {
        if let Some(&id) = read_lock!(self.inner).type_index.get(&desc) {
            return id;
        }
        let mut tables = write_lock!(self.inner);
        if let Some(&id) = tables.type_index.get(&desc) {
            return id;
        }
        let id = TypeId::new(tables.types.len());
        tables.types.push(desc);
        tables.type_index.insert(desc, id);
        id
    }

    /// Returns the descriptor for a type id.
    ///
    /// # Panics
    ///
    /// Panics if the id was not produced by this table.
    #[must_use]
    pub fn type_desc(&self, id: TypeId) -> TypeDescriptor {
        read_lock!(self.inner).types[id.index()]
    }

    /// Interns an object (class/interface) type by binary name.
    pub fn object_type(&self, binary_name: &str) -> TypeId {
        let name = self.intern_str(binary_name);
        self.intern_type(TypeDescriptor::Object(name))
    }

    /// Interns the array type with the given component type.
    pub fn array_of(&self, component: TypeId) -> TypeId {
        self.intern_type(TypeDescriptor::Array(component))
    }

    /// The `void` pseudo-type.
    pub fn void(&self) -> TypeId {
        self.intern_type(TypeDescriptor::Void)
    }

    /// The `int` primitive type.
    pub fn int(&self) -> TypeId {
        self.intern_type(TypeDescriptor::Int)
    }

    /// The `long` primitive type.
    pub fn long(&self) -> TypeId {
        self.intern_type(TypeDescriptor::Long)
    }

    /// The `float` primitive type.
    pub fn float(&self) -> TypeId {
        self.intern_type(TypeDescriptor::Float)
    }

    /// The `double` primitive type.
    pub fn double(&self) -> TypeId {
        self.intern_type(TypeDescriptor::Double)
    }

    /// The `boolean` primitive type.
    pub fn boolean(&self) -> TypeId {
        self.intern_type(TypeDescriptor::Boolean)
    }

    /// The root object type.
    pub fn object(&self) -> TypeId {
        self.object_type("java/lang/Object")
    }

    /// The string type.
    pub fn string(&self) -> TypeId {
        self.object_type("java/lang/String")
    }

    /// The root throwable type.
    pub fn throwable(&self) -> TypeId {
        self.object_type("java/lang/Throwable")
    }

    /// Interns a method signature.
    pub fn intern_proto(&self, name: &str, params: Vec<TypeId>, ret: TypeId) -> ProtoId {
        let name = self.intern_str(name);
        let data = ProtoData { name, params, ret };
        if let Some(&id) = read_lock!(self.inner).proto_index.get(&data) {
            return id;
        }
        let mut tables = write_lock!(self.inner);
        if let Some(&id) = tables.proto_index.get(&data) {
            return id;
        }
        let id = ProtoId::new(tables.protos.len());
        tables.protos.push(data.clone());
        tables.proto_index.insert(data, id);
        id
    }

    /// Returns the signature data for a proto id.
    ///
    /// # Panics
    ///
    /// Panics if the id was not produced by this table.
    #[must_use]
    pub fn proto(&self, id: ProtoId) -> ProtoData {
        read_lock!(self.inner).protos[id.index()].clone()
    }

    /// Interns a method reference.
    pub fn intern_method(&self, holder: TypeId, proto: ProtoId) -> MethodId {
        let data = MethodRefData { holder, proto };
        if let Some(&id) = read_lock!(self.inner).method_index.get(&data) {
            return id;
        }
        let mut tables = write_lock!(self.inner);
        if let Some(&id) = tables.method_index.get(&data) {
            return id;
        }
        let id = MethodId::new(tables.methods.len());
        tables.methods.push(data);
        tables.method_index.insert(data, id);
        id
    }

    /// Returns the reference data for a method id.
    ///
    /// # Panics
    ///
    /// Panics if the id was not produced by this table.
    #[must_use]
    pub fn method(&self, id: MethodId) -> MethodRefData {
        read_lock!(self.inner).methods[id.index()]
    }

    /// Interns a field reference.
    pub fn intern_field(&self, holder: TypeId, name: &str, ty: TypeId) -> FieldId {
        let name = self.intern_str(name);
        let data = FieldRefData { holder, name, ty };
        if let Some(&id) = read_lock!(self.inner).field_index.get(&data) {
            return id;
        }
        let mut tables = write_lock!(self.inner);
        if let Some(&id) = tables.field_index.get(&data) {
            return id;
        }
        let id = FieldId::new(tables.fields.len());
        tables.fields.push(data);
        tables.field_index.insert(data, id);
        id
    }

    /// Returns the reference data for a field id.
    ///
    /// # Panics
    ///
    /// Panics if the id was not produced by this table.
    #[must_use]
    pub fn field(&self, id: FieldId) -> FieldRefData {
        read_lock!(self.inner).fields[id.index()]
    }

    /// Number of formal parameters of a method (excluding the receiver).
    #[must_use]
    pub fn param_count(&self, id: MethodId) -> usize {
        let proto = self.method(id).proto;
        read_lock!(self.inner).protos[proto.index()].params.len()
    }

    /// Return type of a method.
    #[must_use]
    pub fn return_type(&self, id: MethodId) -> TypeId {
        let proto = self.method(id).proto;
        read_lock!(self.inner).protos[proto.index()].ret
    }

    /// Returns `true` if the given type is `void`.
    #[must_use]
    pub fn is_void(&self, id: TypeId) -> bool {
        matches!(self.type_desc(id), TypeDescriptor::Void)
    }

    /// Computational value type of a type, or `None` for `void`.
    #[must_use]
    pub fn value_type(&self, id: TypeId) -> Option<ValueType> {
        match self.type_desc(id) {
            TypeDescriptor::Void => None,
            TypeDescriptor::Boolean
            | TypeDescriptor::Byte
            | TypeDescriptor::Short
            | TypeDescriptor::Char
            | TypeDescriptor::Int => Some(ValueType::Int),
            TypeDescriptor::Long => Some(ValueType::Long),
            TypeDescriptor::Float => Some(ValueType::Float),
            TypeDescriptor::Double => Some(ValueType::Double),
            TypeDescriptor::Object(_) | TypeDescriptor::Array(_) => {
                Some(ValueType::Reference(id))
            }
        }
    }

    /// Human-readable rendering of a type.
    #[must_use]
    pub fn display_type(&self, id: TypeId) -> String {
        match self.type_desc(id) {
            TypeDescriptor::Void => "void".to_string(),
            TypeDescriptor::Boolean => "boolean".to_string(),
            TypeDescriptor::Byte => "byte".to_string(),
            TypeDescriptor::Short => "short".to_string(),
            TypeDescriptor::Char => "char".to_string(),
            TypeDescriptor::Int => "int".to_string(),
            TypeDescriptor::Long => "long".to_string(),
            TypeDescriptor::Float => "float".to_string(),
            TypeDescriptor::Double => "double".to_string(),
            TypeDescriptor::Object(name) => self.str(name),
            TypeDescriptor::Array(component) => format!("{}[]", self.display_type(component)),
        }
    }

    /// Human-readable rendering of a method reference.
    ///
    /// Format: `Holder::name(param, ...) -> ret`.
    #[must_use]
    pub fn display_method(&self, id: MethodId) -> String {
        let data = self.method(id);
        let proto = self.proto(data.proto);
        let params = proto
            .params
            .iter()
            .map(|&p| self.display_type(p))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{}::{}({}) -> {}",
            self.display_type(data.holder),
            self.str(proto.name),
            params,
            self.display_type(proto.ret)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_interning_deduplicates() {
        let symbols = SymbolTable::new();
        let a = symbols.intern_str("hello");
        let b = symbols.intern_str("hello");
        let c = symbols.intern_str("world");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(symbols.str(a), "hello");
        assert_eq!(symbols.str(c), "world");
    }

    #[test]
    fn test_type_interning_identity() {
        let symbols = SymbolTable::new();
        let obj1 = symbols.object_type("com/example/Foo");
        let obj2 = symbols.object_type("com/example/Foo");
        let other = symbols.object_type("com/example/Bar");

        assert_eq!(obj1, obj2);
        assert_ne!(obj1, other);
        assert_eq!(symbols.int(), symbols.int());
    }

    #[test]
    fn test_array_types_chain() {
        let symbols = SymbolTable::new();
        let ints = symbols.array_of(symbols.int());
        let ints2d = symbols.array_of(ints);

        assert_eq!(symbols.type_desc(ints), TypeDescriptor::Array(symbols.int()));
        assert_eq!(symbols.type_desc(ints2d), TypeDescriptor::Array(ints));
        assert_eq!(symbols.display_type(ints2d), "int[][]");
    }

    #[test]
    fn test_method_interning_identity() {
        let symbols = SymbolTable::new();
        let holder = symbols.object_type("com/example/Foo");
        let proto = symbols.intern_proto("run", vec![symbols.int()], symbols.void());

        let m1 = symbols.intern_method(holder, proto);
        let m2 = symbols.intern_method(holder, proto);
        assert_eq!(m1, m2);

        let other_holder = symbols.object_type("com/example/Bar");
        let m3 = symbols.intern_method(other_holder, proto);
        assert_ne!(m1, m3);

        assert_eq!(symbols.param_count(m1), 1);
        assert!(symbols.is_void(symbols.return_type(m1)));
    }

    #[test]
    fn test_field_interning() {
        let symbols = SymbolTable::new();
        let holder = symbols.object_type("com/example/Foo");
        let f1 = symbols.intern_field(holder, "count", symbols.int());
        let f2 = symbols.intern_field(holder, "count", symbols.int());
        let f3 = symbols.intern_field(holder, "count", symbols.long());

        assert_eq!(f1, f2);
        assert_ne!(f1, f3);
        assert_eq!(symbols.field(f1).holder, holder);
    }

    #[test]
    fn test_value_types() {
        let symbols = SymbolTable::new();
        assert_eq!(symbols.value_type(symbols.int()), Some(ValueType::Int));
        assert_eq!(symbols.value_type(symbols.boolean()), Some(ValueType::Int));
        assert_eq!(symbols.value_type(symbols.long()), Some(ValueType::Long));
        assert_eq!(symbols.value_type(symbols.void()), None);

        let obj = symbols.object();
        assert_eq!(symbols.value_type(obj), Some(ValueType::Reference(obj)));
        assert!(symbols.value_type(symbols.double()).unwrap().is_wide());
    }

    #[test]
    fn test_display_method() {
        let symbols = SymbolTable::new();
        let holder = symbols.object_type("com/example/Foo");
        let proto = symbols.intern_proto(
            "add",
            vec![symbols.int(), symbols.int()],
            symbols.int(),
        );
        let method = symbols.intern_method(holder, proto);

        assert_eq!(
            symbols.display_method(method),
            "com/example/Foo::add(int, int) -> int"
        );
    }

    #[test]
    fn test_wide_descriptors() {
        assert!(TypeDescriptor::Long.is_wide());
        assert!(TypeDescriptor::Double.is_wide());
        assert!(!TypeDescriptor::Int.is_wide());
        assert!(TypeDescriptor::Int.is_primitive());
        assert!(!TypeDescriptor::Void.is_primitive());
    }
}
