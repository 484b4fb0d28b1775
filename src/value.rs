//! The in-memory object graph the codec walks.
//!
//! There is no live Rust reflection to derive a class's field list from a
//! runtime type (spec.md §1 names that a collaborator this crate does not
//! implement), so callers build `Value` graphs directly — the same role
//! `jvm::mem::schema::ClassSchema`/`FieldSchema` play in the teacher, where
//! a class's field order and offsets are computed once and shared via
//! `Arc`. Identity here is carried by `Rc` pointer identity instead of a
//! GC-rooted `ObjectHandle`, because this crate owns no garbage collector
//! and the reference registry's job is only to survive one encode/decode
//! call (see DESIGN.md for why the teacher's `gc` dependency was dropped).

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use bitflags::bitflags;

use crate::compat::CompatibleLevelHooks;
use crate::plugin::{ExternalizableHooks, ReadResolveHook};

bitflags! {
    /// Declarative markers a field or array site carries (spec.md §3, §4.6).
    #[derive(Default)]
    pub struct FieldFlags: u32 {
        const INTEGRAL    = 0b0000_0001;
        const ARRAY       = 0b0000_0010;
        const FLAT        = 0b0000_0100;
        const PLAIN       = 0b0000_1000;
        const CONDITIONAL = 0b0001_0000;
        const COMPRESSED  = 0b0010_0000;
        const THIN        = 0b0100_0000;
    }
}

/// A field site's declared "oneOf" set (spec.md §3 field descriptor, §4.4
/// `ONE_OF` tag): the enum-like type's full constant list in declaration
/// order, so a single byte index round-trips to the same `Value::Enum`.
#[derive(Clone)]
pub struct OneOfSet {
    pub class_name: Rc<str>,
    pub constants: Rc<[Rc<str>]>,
}

/// One field slot on an [`ObjectValue`]: a name, its current value, and the
/// flags that govern how it is encoded.
#[derive(Clone)]
pub struct Field {
    pub name: Rc<str>,
    pub value: Value,
    pub flags: FieldFlags,
    pub one_of: Option<OneOfSet>,
    /// The site's statically declared concrete class, if the caller (acting
    /// as reflector) knows one. Drives the `TYPED` vs `OBJECT` tag choice
    /// (spec.md §4.4): `TYPED` only applies when the runtime value's class
    /// equals this declared type.
    pub declared_class: Option<Rc<str>>,
}

impl Field {
    pub fn new(name: impl Into<Rc<str>>, value: Value) -> Self {
        Self { name: name.into(), value, flags: FieldFlags::empty(), one_of: None, declared_class: None }
    }

    pub fn with_flags(name: impl Into<Rc<str>>, value: Value, flags: FieldFlags) -> Self {
        Self { name: name.into(), value, flags, one_of: None, declared_class: None }
    }

    pub fn with_one_of(mut self, one_of: OneOfSet) -> Self {
        self.one_of = Some(one_of);
        self
    }

    pub fn with_declared_class(mut self, class_name: impl Into<Rc<str>>) -> Self {
        self.declared_class = Some(class_name.into());
        self
    }
}

/// One superclass level of a class participating in compatible mode
/// (spec.md §4.7): its own field slice plus optional write/read hooks. The
/// caller plays the role of the class reflector and supplies levels
/// root-first, the same order the writer/reader walk them in.
#[derive(Clone)]
pub struct CompatLevel {
    pub fields: Vec<Field>,
    pub hooks: Option<Arc<dyn CompatibleLevelHooks>>,
}

impl CompatLevel {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields, hooks: None }
    }

    pub fn with_hooks(fields: Vec<Field>, hooks: Arc<dyn CompatibleLevelHooks>) -> Self {
        Self { fields, hooks: Some(hooks) }
    }
}

#[derive(Clone)]
pub struct ObjectValue {
    pub class_name: Rc<str>,
    pub fields: Vec<Field>,
    /// Declarative "never a HANDLE, always inlined" marker (spec.md glossary: Flat).
    pub flat: bool,
    /// Present only for classes serialized in compatible mode (spec.md
    /// §4.7); `fields` still holds the flattened view used by
    /// non-compatible consumers (e.g. the class metadata cache's canonical
    /// ordering) while `compat_levels` holds the root-first superclass
    /// breakdown the writer actually walks.
    pub compat_levels: Option<Vec<CompatLevel>>,
    /// Present only for classes flagged externalizable (spec.md §4.5 step 4).
    pub externalizable: Option<Arc<dyn ExternalizableHooks>>,
    /// Read-resolve hook (spec.md §4.5 step 5), carried on the sample
    /// instance the class metadata cache reflects over on first sight.
    pub read_resolve: Option<Arc<dyn ReadResolveHook>>,
}

impl ObjectValue {
    pub fn new(class_name: impl Into<Rc<str>>, fields: Vec<Field>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            class_name: class_name.into(),
            fields,
            flat: false,
            compat_levels: None,
            externalizable: None,
            read_resolve: None,
        }))
    }

    /// Build an object that serializes via the compatible-mode level chain.
    /// `levels` must be given root-first; `fields` is the flattened union
    /// used wherever the codec needs a single canonical field list.
    pub fn new_compatible(class_name: impl Into<Rc<str>>, levels: Vec<CompatLevel>) -> Rc<RefCell<Self>> {
        let fields = levels.iter().flat_map(|l| l.fields.iter().cloned()).collect();
        Rc::new(RefCell::new(Self {
            class_name: class_name.into(),
            fields,
            flat: false,
            compat_levels: Some(levels),
            externalizable: None,
            read_resolve: None,
        }))
    }

    /// Marks this object as externalizable, delegating body read/write to
    /// `hooks` instead of the default field-reader loop.
    pub fn with_externalizable(self_rc: Rc<RefCell<Self>>, hooks: Arc<dyn ExternalizableHooks>) -> Rc<RefCell<Self>> {
        self_rc.borrow_mut().externalizable = Some(hooks);
        self_rc
    }

    /// Installs a read-resolve hook, consulted once this instance's body has
    /// been fully read (spec.md §4.5 step 5).
    pub fn with_read_resolve(self_rc: Rc<RefCell<Self>>, hook: Arc<dyn ReadResolveHook>) -> Rc<RefCell<Self>> {
        self_rc.borrow_mut().read_resolve = Some(hook);
        self_rc
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|f| &*f.name == name).map(|f| &f.value)
    }

    /// Read-side counterpart of [`field`](Self::field): the field-reader
    /// loop fills a freshly instantiated object one field at a time.
    pub fn set_field(&mut self, name: &str, value: Value) {
        if let Some(f) = self.fields.iter_mut().find(|f| &*f.name == name) {
            f.value = value;
        }
    }

    pub fn is_compatible_mode(&self) -> bool {
        self.compat_levels.is_some()
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ArrayEncoding {
    Default,
    Plain,
    Compressed,
    Thin,
}

#[derive(Clone)]
pub struct ArrayValue {
    pub element_class: Rc<str>,
    pub elements: Vec<Value>,
    /// Construction-time default, useful when calling the strategies in
    /// [`crate::array`] directly. The writer itself derives the actual wire
    /// strategy from the field site's flags, not from this value (spec.md
    /// §4.6's strategy is a field-site property; see
    /// `writer::resolve_array_strategy`), since a reader reconstructing an
    /// array has no sample value to read this back from — only `compressed`
    /// is self-describing enough to survive a field-less array.
    pub encoding: ArrayEncoding,
    pub flat: bool,
}

impl ArrayValue {
    pub fn new(element_class: impl Into<Rc<str>>, elements: Vec<Value>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            element_class: element_class.into(),
            elements,
            encoding: ArrayEncoding::Default,
            flat: false,
        }))
    }

    pub fn with_encoding(element_class: impl Into<Rc<str>>, elements: Vec<Value>, encoding: ArrayEncoding) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self { element_class: element_class.into(), elements, encoding, flat: false }))
    }
}

/// An enum constant. `constants` is the site's complete "oneOf" set in
/// declaration order — the caller supplies it once, the way a real
/// reflector would enumerate an enum type's constants.
#[derive(Clone)]
pub struct EnumValue {
    pub class_name: Rc<str>,
    pub ordinal: u32,
    pub name: Rc<str>,
    pub constants: Rc<[Rc<str>]>,
}

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Char(u16),
    Float(f32),
    Double(f64),
    BigInt(Rc<i32>),
    BigLong(Rc<i64>),
    BigBool(Rc<bool>),
    Str(Rc<str>),
    Enum(Rc<EnumValue>),
    Array(Rc<RefCell<ArrayValue>>),
    Object(Rc<RefCell<ObjectValue>>),
}

/// Stable identity key for the reference registry: the heap address behind
/// an `Rc`. Two `Value`s built from a `clone()` of the same `Rc` share this
/// key; two structurally-equal-but-distinct `Rc`s do not.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct Identity(pub usize);

impl Value {
    /// `None` for values spec.md's object-reference registry never tracks
    /// (nulls, unboxed primitives, and anything flagged `flat`).
    pub fn identity(&self) -> Option<Identity> {
        match self {
            Value::BigInt(rc) => Some(Identity(Rc::as_ptr(rc) as usize)),
            Value::BigLong(rc) => Some(Identity(Rc::as_ptr(rc) as usize)),
            Value::BigBool(rc) => Some(Identity(Rc::as_ptr(rc) as usize)),
            Value::Str(rc) => Some(Identity(Rc::as_ptr(rc) as *const () as usize)),
            Value::Enum(rc) => Some(Identity(Rc::as_ptr(rc) as usize)),
            Value::Array(rc) if !rc.borrow().flat => Some(Identity(Rc::as_ptr(rc) as usize)),
            Value::Object(rc) if !rc.borrow().flat => Some(Identity(Rc::as_ptr(rc) as usize)),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The concrete class name the class-name registry should encode for
    /// reference-typed values; `None` for unboxed primitives, which never
    /// reach the `OBJECT`/`TYPED`/`ENUM` tag paths.
    pub fn class_name(&self) -> Option<Rc<str>> {
        match self {
            Value::Str(_) => Some(Rc::from("java.lang.String")),
            Value::Enum(e) => Some(e.class_name.clone()),
            Value::Array(a) => Some(a.borrow().element_class.clone()),
            Value::Object(o) => Some(o.borrow().class_name.clone()),
            _ => None,
        }
    }
}
