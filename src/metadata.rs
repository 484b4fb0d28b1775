//! Class metadata cache (spec.md §4.8): a process-wide map from class name
//! to class descriptor, guarded by a read-biased lock so the hot path (a
//! class already seen) never blocks. Grounded on `jvm::mem::schema`, where
//! `ClassSchema`/`FieldSchema` are likewise built once and shared via `Arc`,
//! and on `jvm::mod.rs`'s `Arc<RwLock<JavaEnv>>` sharing idiom — spec.md §9
//! recommends exactly this "optimistic read + double-checked insert" scheme
//! in place of a raw compare-and-set spin.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::compat::{CompatibleLevelHooks, FieldKind};
use crate::plugin::{ExternalizableHooks, ReadResolveHook, SerializerPlugin};
use crate::tag::MAX_PREDICTION_SLOTS;
use crate::value::{ArrayValue, Field, FieldFlags, ObjectValue, OneOfSet, Value};

bitflags::bitflags! {
    #[derive(Default)]
    pub struct ClassFlags: u32 {
        const EXTERNALIZABLE   = 0b001;
        const FLAT             = 0b010;
        const COMPATIBLE_MODE  = 0b100;
    }
}

/// Minimal stand-in for "declared type" absent real static typing: just
/// enough to sort fields canonically and pick a default encoding tag.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum TypeTag {
    Bool,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl TypeTag {
    fn of(v: &Value) -> Self {
        match v {
            Value::Null => TypeTag::Reference,
            Value::Bool(_) => TypeTag::Bool,
            Value::Byte(_) => TypeTag::Byte,
            Value::Short(_) => TypeTag::Short,
            Value::Char(_) => TypeTag::Char,
            Value::Int(_) => TypeTag::Int,
            Value::Long(_) => TypeTag::Long,
            Value::Float(_) => TypeTag::Float,
            Value::Double(_) => TypeTag::Double,
            _ => TypeTag::Reference,
        }
    }

    /// Canonical sort rank: like-typed fields contiguous, references last.
    fn rank(self) -> u8 {
        match self {
            TypeTag::Bool => 0,
            TypeTag::Byte => 1,
            TypeTag::Short => 2,
            TypeTag::Char => 3,
            TypeTag::Int => 4,
            TypeTag::Long => 5,
            TypeTag::Float => 6,
            TypeTag::Double => 7,
            TypeTag::Reference => 8,
        }
    }

    fn field_kind(self) -> FieldKind {
        match self {
            TypeTag::Bool => FieldKind::Bool,
            TypeTag::Byte => FieldKind::Byte,
            TypeTag::Int => FieldKind::Int,
            TypeTag::Long => FieldKind::Long,
            // Compatible mode's hook-facing get_*/put_* surface only spells
            // out the shapes the teacher's own legacy fields actually use
            // (spec.md §4.7 examples); anything wider reads/writes as an
            // object so a hook can still shuttle it through `put_object`.
            _ => FieldKind::Object,
        }
    }
}

pub struct FieldDescriptor {
    pub name: Rc<str>,
    pub declared_type: TypeTag,
    pub flags: FieldFlags,
    /// The site's statically declared concrete class, if known; drives the
    /// `TYPED` vs `OBJECT` choice (spec.md §4.4).
    pub declared_class: Option<Rc<str>>,
    /// Monotonic within a stream; the codec resets it between streams.
    pub possible_classes: RwLock<Vec<Rc<str>>>,
    pub one_of: RwLock<Option<OneOfSet>>,
    pub last_seen: RwLock<Option<Rc<str>>>,
}

impl FieldDescriptor {
    fn new(name: Rc<str>, declared_type: TypeTag, flags: FieldFlags, one_of: Option<OneOfSet>, declared_class: Option<Rc<str>>) -> Self {
        Self {
            name,
            declared_type,
            flags,
            declared_class,
            possible_classes: RwLock::new(Vec::new()),
            one_of: RwLock::new(one_of),
            last_seen: RwLock::new(None),
        }
    }

    /// Index (1-based) of `class_name` in the prediction table, if present.
    pub fn prediction_index(&self, class_name: &str) -> Option<usize> {
        self.possible_classes.read().iter().position(|c| &**c == class_name).map(|i| i + 1)
    }

    pub fn class_at(&self, index_one_based: usize) -> Option<Rc<str>> {
        self.possible_classes.read().get(index_one_based - 1).cloned()
    }

    /// Record a newly observed concrete class, unless the table is full
    /// (spec.md §4.9: "fall back to OBJECT and do not extend the table").
    pub fn observe(&self, class_name: &Rc<str>) -> bool {
        let mut table = self.possible_classes.write();
        if table.iter().any(|c| c == class_name) {
            return true;
        }
        if table.len() >= MAX_PREDICTION_SLOTS {
            return false;
        }
        table.push(class_name.clone());
        true
    }

    pub fn reset_stream_state(&self) {
        self.possible_classes.write().clear();
        *self.last_seen.write() = None;
    }
}

/// One superclass level of a compatible-mode class descriptor (spec.md
/// §4.7): its own field array plus optional write/read hooks, built once
/// from the sample object's [`crate::value::CompatLevel`]s.
pub struct CompatLevelDescriptor {
    pub field_kinds: Vec<(Rc<str>, FieldKind)>,
    pub hooks: Option<Arc<dyn CompatibleLevelHooks>>,
}

impl Clone for CompatLevelDescriptor {
    fn clone(&self) -> Self {
        Self { field_kinds: self.field_kinds.clone(), hooks: self.hooks.clone() }
    }
}

pub struct ClassDescriptor {
    pub name: Rc<str>,
    pub fields: Vec<FieldDescriptor>,
    pub flags: ClassFlags,
    pub custom_serializer: Option<Arc<dyn SerializerPlugin>>,
    /// Root-first superclass levels, present only when
    /// [`ClassFlags::COMPATIBLE_MODE`] is set.
    pub compat_levels: Vec<CompatLevelDescriptor>,
    /// Present only when [`ClassFlags::EXTERNALIZABLE`] is set.
    pub externalizable: Option<Arc<dyn ExternalizableHooks>>,
    pub read_resolve: Option<Arc<dyn ReadResolveHook>>,
}

impl ClassDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| &*f.name == name)
    }

    pub fn is_flat(&self) -> bool {
        self.flags.contains(ClassFlags::FLAT)
    }
}

/// Whether `value` is an array whose elements are (or, if empty, could be)
/// all `int`s. This is a structural fact about the field's declared element
/// type, not a declarative annotation, so it is folded into `INTEGRAL`
/// unconditionally — `ignoreAnnotations` suppresses the *strategy* flags
/// (`plain`/`compressed`/`thin`) but the `INTEGRAL` flag itself always
/// tracks what the sample value actually is. (The writer and reader decide
/// int-vs-reference element encoding from the array's own `element_class`
/// on the wire, not from this flag, so the two can never disagree even for
/// a root-level array with no field descriptor at all; this flag remains
/// purely descriptive metadata.)
fn is_integral_array(value: &Value) -> bool {
    match value {
        Value::Array(a) => a.borrow().elements.iter().all(|e| matches!(e, Value::Int(_))),
        _ => false,
    }
}

fn canonical_fields_for_object(obj: &ObjectValue, ignore_annotations: bool) -> Vec<FieldDescriptor> {
    let mut fields: Vec<FieldDescriptor> = obj
        .fields
        .iter()
        .map(|f: &Field| {
            let mut flags = if ignore_annotations { FieldFlags::empty() } else { f.flags };
            if is_integral_array(&f.value) {
                flags.insert(FieldFlags::INTEGRAL);
            }
            FieldDescriptor::new(f.name.clone(), TypeTag::of(&f.value), flags, f.one_of.clone(), f.declared_class.clone())
        })
        .collect();
    fields.sort_by(|a, b| match a.declared_type.rank().cmp(&b.declared_type.rank()) {
        Ordering::Equal => a.name.cmp(&b.name),
        other => other,
    });
    fields
}

pub(crate) fn array_descriptor(element_class: &str) -> Rc<str> {
    Rc::from(format!("[{element_class}").as_str())
}

lazy_static! {
    static ref CLASS_CACHE: RwLock<HashMap<Rc<str>, Arc<ClassDescriptor>>> = RwLock::new(HashMap::new());
}

/// Optimistic read, then double-checked insert on miss — the read-biased
/// scheme spec.md §9 prefers over a raw compare-and-set spin.
pub fn get_or_build_object_descriptor(obj: &ObjectValue, ignore_annotations: bool) -> Arc<ClassDescriptor> {
    if let Some(found) = CLASS_CACHE.read().get(&obj.class_name) {
        return found.clone();
    }

    let mut flags = if obj.flat { ClassFlags::FLAT } else { ClassFlags::empty() };
    if obj.externalizable.is_some() {
        flags.insert(ClassFlags::EXTERNALIZABLE);
    }
    let compat_levels = match &obj.compat_levels {
        Some(levels) => {
            flags.insert(ClassFlags::COMPATIBLE_MODE);
            levels
                .iter()
                .map(|level| CompatLevelDescriptor {
                    field_kinds: level.fields.iter().map(|f| (f.name.clone(), TypeTag::of(&f.value).field_kind())).collect(),
                    hooks: level.hooks.clone(),
                })
                .collect()
        }
        None => Vec::new(),
    };

    let built = Arc::new(ClassDescriptor {
        name: obj.class_name.clone(),
        fields: canonical_fields_for_object(obj, ignore_annotations),
        flags,
        custom_serializer: None,
        compat_levels,
        externalizable: obj.externalizable.clone(),
        read_resolve: obj.read_resolve.clone(),
    });

    let mut cache = CLASS_CACHE.write();
    cache.entry(obj.class_name.clone()).or_insert(built).clone()
}

pub fn get_or_build_array_descriptor(arr: &ArrayValue) -> Arc<ClassDescriptor> {
    let name = array_descriptor(&arr.element_class);
    if let Some(found) = CLASS_CACHE.read().get(&name) {
        return found.clone();
    }

    let built = Arc::new(ClassDescriptor {
        name: name.clone(),
        fields: Vec::new(),
        flags: if arr.flat { ClassFlags::FLAT } else { ClassFlags::empty() },
        custom_serializer: None,
        compat_levels: Vec::new(),
        externalizable: None,
        read_resolve: None,
    });

    let mut cache = CLASS_CACHE.write();
    cache.entry(name).or_insert(built).clone()
}

/// Read-side counterpart of [`get_or_build_object_descriptor`]: looks a
/// class descriptor up by name without building one, since the reader has
/// no sample instance to reflect over. Relies on the descriptor having
/// already been built by a writer (or pre-registered) earlier in the
/// process — the only way a class's field layout can become known without
/// live reflection (see `value.rs` module docs).
pub fn descriptor_by_name(class_name: &str) -> Option<Arc<ClassDescriptor>> {
    CLASS_CACHE.read().get(class_name).cloned()
}

lazy_static! {
    /// Process-wide cache of an enum type's full constant list, keyed by
    /// class name. Populated on first write of any constant of that enum
    /// (see `writer::Writer::write_enum`) so a reader in the same process
    /// can turn an ordinal back into a name without live reflection.
    static ref ENUM_CONSTANTS: RwLock<HashMap<Rc<str>, Rc<[Rc<str>]>>> = RwLock::new(HashMap::new());
}

pub fn register_enum_constants(class_name: Rc<str>, constants: Rc<[Rc<str>]>) {
    ENUM_CONSTANTS.write().entry(class_name).or_insert(constants);
}

pub fn enum_constants(class_name: &str) -> Option<Rc<[Rc<str>]>> {
    ENUM_CONSTANTS.read().get(class_name).cloned()
}

/// Clears every cached class's per-field prediction table (spec.md §3: "The
/// prediction table ... resets between streams"). `ClassDescriptor` lives in
/// the process-wide [`CLASS_CACHE`], not per-stream, so without this call a
/// class seen in an earlier stream keeps predicting codes a fresh reader's
/// empty table has no entry for. Called once per stream from
/// `Config::borrow_registries`, alongside the name/ref registry resets.
pub fn reset_all_stream_state() {
    for desc in CLASS_CACHE.read().values() {
        for field in &desc.fields {
            field.reset_stream_state();
        }
    }
}

pub fn register_custom_serializer(class_name: &str, plugin: Arc<dyn SerializerPlugin>) {
    let mut cache = CLASS_CACHE.write();
    if let Some(existing) = cache.get(class_name) {
        let mut rebuilt = (**existing).clone_shell();
        rebuilt.custom_serializer = Some(plugin);
        cache.insert(existing.name.clone(), Arc::new(rebuilt));
    }
}

impl ClassDescriptor {
    /// Shallow clone used only to splice in a custom serializer after the
    /// fact; field descriptors keep their own interior-mutable state, so
    /// this does not reset any stream-scoped prediction tables.
    fn clone_shell(&self) -> ClassDescriptor {
        ClassDescriptor {
            name: self.name.clone(),
            fields: self
                .fields
                .iter()
                .map(|f| FieldDescriptor {
                    name: f.name.clone(),
                    declared_type: f.declared_type,
                    flags: f.flags,
                    declared_class: f.declared_class.clone(),
                    possible_classes: RwLock::new(f.possible_classes.read().clone()),
                    one_of: RwLock::new(f.one_of.read().clone()),
                    last_seen: RwLock::new(f.last_seen.read().clone()),
                })
                .collect(),
            flags: self.flags,
            custom_serializer: self.custom_serializer.clone(),
            compat_levels: self.compat_levels.clone(),
            externalizable: self.externalizable.clone(),
            read_resolve: self.read_resolve.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Field;

    #[test]
    fn canonical_order_groups_like_types_and_puts_references_last() {
        let obj = ObjectValue::new(
            "demo.Point",
            vec![
                Field::new("name", Value::Str(Rc::from("origin"))),
                Field::new("x", Value::Int(0)),
                Field::new("flag", Value::Bool(true)),
                Field::new("y", Value::Int(1)),
            ],
        );
        let desc = get_or_build_object_descriptor(&obj.borrow(), false);
        let order: Vec<&str> = desc.fields.iter().map(|f| &*f.name).collect();
        assert_eq!(order, vec!["flag", "x", "y", "name"]);
    }
}
