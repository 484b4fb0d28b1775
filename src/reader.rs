//! Reader state machine (spec.md §4.5): mirrors [`crate::writer::Writer`],
//! dispatching on a tag byte, materialising an instance, and recursively
//! filling its fields.
//!
//! Grounded on the teacher's `jvm::exec` instruction dispatch loop, same as
//! the writer — here "decoding an instruction" means resolving a tag and
//! building the value it describes.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt};
use log::{trace, warn};

use crate::array;
use crate::buffer::ReadCursor;
use crate::compat::{CompatReadStream, FieldKind};
use crate::config::Config;
use crate::error::{CodecError, Result};
use crate::metadata::{self, ClassDescriptor, ClassFlags, FieldDescriptor, TypeTag};
use crate::ref_registry::ObjectRefRegistry;
use crate::class_registry::ClassNameRegistry;
use crate::tag::{NamedTag, Tag};
use crate::value::{CompatLevel, EnumValue, Field, FieldFlags, ObjectValue, Value};
use crate::varint;

/// A validation callback registered mid-read (spec.md §7: "Object-validation
/// callbacks registered during a read are invoked after the top-level read
/// completes, in descending priority order; exceptions from callbacks are
/// logged but do not fail the read"). Modeled on Java's
/// `ObjectInputValidation`: a class's `readObject`/`readExternal` hook
/// (running with `&mut Reader` in hand) calls
/// [`Reader::register_validation`] to defer a check until the whole graph
/// is wired up, since at hook time referenced objects may not exist yet.
type ValidationCallback = Box<dyn FnOnce(&Value) -> std::result::Result<(), String>>;

pub struct Reader {
    input: ReadCursor,
    config: Arc<Config>,
    names: ClassNameRegistry,
    refs: ObjectRefRegistry,
    validations: Vec<(i32, ValidationCallback)>,
}

impl Reader {
    pub fn new(config: Arc<Config>, bytes: Rc<[u8]>) -> Self {
        let (names, refs) = config.borrow_registries();
        Self { input: ReadCursor::new(bytes), config, names, refs, validations: Vec::new() }
    }

    /// Defers `callback` until after the top-level read completes, per
    /// spec.md §7. Higher `priority` runs first.
    pub fn register_validation(&mut self, priority: i32, callback: impl FnOnce(&Value) -> std::result::Result<(), String> + 'static) {
        self.validations.push((priority, Box::new(callback)));
    }

    /// Decodes a complete stream previously produced by
    /// [`crate::writer::Writer::write_root`].
    pub fn read_root(mut self) -> Result<Value> {
        let value = self.read_field(None)?;
        let Reader { config, names, refs, mut validations, .. } = self;
        config.return_registries(names, refs);

        validations.sort_by_key(|(priority, _)| std::cmp::Reverse(*priority));
        for (priority, callback) in validations {
            if let Err(message) = callback(&value) {
                warn!("validation callback at priority {priority} failed: {message}");
            }
        }

        Ok(value)
    }

    /// Raw cursor access for the compatible-mode wrapper stream's
    /// field-at-a-time gets (spec.md §4.7).
    pub(crate) fn raw_in(&mut self) -> &mut ReadCursor {
        &mut self.input
    }

    /// Central dispatch: reads one tag byte in the context of `field`
    /// (`None` for the stream root) and decodes its body (spec.md §4.5).
    pub(crate) fn read_field(&mut self, field: Option<&FieldDescriptor>) -> Result<Value> {
        let tag_pos = self.input.position();
        let byte = self.input.read_u8()?;
        let tag = Tag::from_byte(byte);

        if let Tag::Named(NamedTag::Null) = tag {
            return Ok(Value::Null);
        }
        if let Tag::Named(NamedTag::Handle) = tag {
            let pos = varint::read_c_int(&mut self.input)? as u64;
            trace!("resolving HANDLE to stream position {pos}");
            return self.refs.value_at(pos).ok_or(CodecError::UnresolvedHandle(pos));
        }
        if let Tag::Named(NamedTag::CopyHandle) = tag {
            let pos = varint::read_c_int(&mut self.input)? as u64;
            trace!("re-decoding COPYHANDLE body at stream position {pos}");
            return self.read_copy(pos);
        }

        let value = match tag {
            Tag::Named(NamedTag::OneOf) => self.read_one_of(field, byte)?,
            Tag::Named(NamedTag::BigInt) => Value::BigInt(Rc::new(varint::read_c_int(&mut self.input)?)),
            Tag::Named(NamedTag::BigLong) => Value::BigLong(Rc::new(varint::read_c_long(&mut self.input)?)),
            Tag::Named(NamedTag::BigBooleanTrue) => Value::BigBool(Rc::new(true)),
            Tag::Named(NamedTag::BigBooleanFalse) => Value::BigBool(Rc::new(false)),
            // Array and reference-object bodies may recurse back into a
            // value that handles to *this* tag's position (spec.md §9:
            // cyclic decoding), so these two register the instance
            // themselves, before filling the body, rather than here.
            Tag::Named(NamedTag::Array) => return self.read_array(field, tag_pos),
            Tag::Named(NamedTag::Enum) => self.read_enum()?,
            Tag::Named(NamedTag::Typed) | Tag::Named(NamedTag::Object) | Tag::Prediction(_) => {
                return self.read_reference(tag, field, byte, tag_pos)
            }
            Tag::Named(NamedTag::Null) | Tag::Named(NamedTag::Handle) | Tag::Named(NamedTag::CopyHandle) => {
                unreachable!("handled above")
            }
        };

        let field_is_flat = field.map(|f| f.flags.contains(FieldFlags::FLAT)).unwrap_or(false);
        if !self.config.struct_mode && !field_is_flat && value.identity().is_some() {
            self.refs.register_read(tag_pos, value.clone());
        }
        Ok(value)
    }

    /// Registers `value` at `tag_pos`, unless struct mode is on, the field
    /// site is flat, or `value` carries no trackable identity (spec.md §3:
    /// "An object is registered before its body is written"; the read side
    /// mirrors this before filling the body instead of after, so
    /// self-referential cycles resolve).
    fn register_before_fill(&mut self, tag_pos: u64, field: Option<&FieldDescriptor>, value: &Value) {
        let field_is_flat = field.map(|f| f.flags.contains(FieldFlags::FLAT)).unwrap_or(false);
        if !self.config.struct_mode && !field_is_flat && value.identity().is_some() {
            self.refs.register_read(tag_pos, value.clone());
        }
    }

    fn read_one_of(&mut self, field: Option<&FieldDescriptor>, byte: u8) -> Result<Value> {
        let fd = field.ok_or(CodecError::MalformedTag(byte))?;
        let one_of = fd.one_of.read().clone().ok_or(CodecError::MalformedTag(byte))?;
        let idx = self.input.read_u8()? as usize;
        let name = one_of.constants.get(idx).cloned().ok_or(CodecError::MalformedTag(idx as u8))?;
        Ok(Value::Enum(Rc::new(EnumValue {
            class_name: one_of.class_name.clone(),
            ordinal: idx as u32,
            name,
            constants: one_of.constants.clone(),
        })))
    }

    fn read_enum(&mut self) -> Result<Value> {
        let class_name = self.names.decode(&mut self.input)?;
        let constants = metadata::enum_constants(&class_name).ok_or_else(|| CodecError::UnknownClass(0))?;
        if self.config.cross_language {
            let name: Rc<str> = Rc::from(varint::read_string_utf(&mut self.input)?.as_str());
            let ordinal = constants.iter().position(|c| *c == name).ok_or(CodecError::UnresolvedHandle(0))? as u32;
            Ok(Value::Enum(Rc::new(EnumValue { class_name, ordinal, name, constants })))
        } else {
            let ordinal = varint::read_c_int(&mut self.input)? as u32;
            let name = constants.get(ordinal as usize).cloned().ok_or(CodecError::MalformedTag(ordinal as u8))?;
            Ok(Value::Enum(Rc::new(EnumValue { class_name, ordinal, name, constants })))
        }
    }

    fn read_array(&mut self, field: Option<&FieldDescriptor>, tag_pos: u64) -> Result<Value> {
        let array_class = self.names.decode(&mut self.input)?;
        let element_class: Rc<str> = Rc::from(array_class.strip_prefix('[').unwrap_or(&array_class));
        let len = varint::read_c_int(&mut self.input)? as usize;

        use crate::value::ArrayEncoding;
        let is_integral = &*element_class == "int";
        let strategy = if is_integral { resolve_array_strategy(field, self.config.ignore_annotations) } else { ArrayEncoding::Default };

        if !is_integral {
            // Elements may themselves HANDLE back to this array (spec.md §9:
            // cyclic decoding), so the empty shell is registered before any
            // element is read, then filled in place.
            let arr = crate::value::ArrayValue::with_encoding(element_class, Vec::with_capacity(len), strategy);
            let value = Value::Array(arr.clone());
            self.register_before_fill(tag_pos, field, &value);
            for _ in 0..len {
                let element = self.read_field(None)?;
                arr.borrow_mut().elements.push(element);
            }
            return Ok(value);
        }

        let elements = match strategy {
            ArrayEncoding::Plain => array::read_plain(&mut self.input, len)?.into_iter().map(Value::Int).collect(),
            ArrayEncoding::Compressed => array::read_compressed(&mut self.input, len)?.into_iter().map(Value::Int).collect(),
            ArrayEncoding::Thin => array::read_thin_run(&mut self.input, len)?.into_iter().map(Value::Int).collect(),
            ArrayEncoding::Default => array::read_varint_run(&mut self.input, len)?.into_iter().map(Value::Int).collect(),
        };

        let arr = crate::value::ArrayValue::with_encoding(element_class, elements, strategy);
        let value = Value::Array(arr);
        self.register_before_fill(tag_pos, field, &value);
        Ok(value)
    }

    fn read_reference(&mut self, tag: Tag, field: Option<&FieldDescriptor>, byte: u8, tag_pos: u64) -> Result<Value> {
        let class_name = match tag {
            Tag::Named(NamedTag::Typed) => {
                let fd = field.ok_or(CodecError::MalformedTag(byte))?;
                fd.declared_class.clone().ok_or(CodecError::MalformedTag(byte))?
            }
            Tag::Prediction(slot) => {
                let fd = field.ok_or(CodecError::MalformedTag(byte))?;
                fd.class_at(slot as usize).ok_or(CodecError::MalformedTag(byte))?
            }
            Tag::Named(NamedTag::Object) => {
                let name = self.names.decode(&mut self.input)?;
                if let Some(fd) = field {
                    fd.observe(&name);
                }
                name
            }
            _ => unreachable!("read_reference only called for Typed/Object/Prediction"),
        };

        if &*class_name == "java.lang.String" {
            let value = Value::Str(Rc::from(varint::read_string_utf(&mut self.input)?.as_str()));
            self.register_before_fill(tag_pos, field, &value);
            return Ok(value);
        }

        self.read_object_body(&class_name, tag_pos, field)
    }

    fn read_object_body(&mut self, class_name: &Rc<str>, tag_pos: u64, field: Option<&FieldDescriptor>) -> Result<Value> {
        let desc = metadata::descriptor_by_name(class_name);
        let plugin = desc.as_ref().and_then(|d| d.custom_serializer.clone()).or_else(|| self.config.plugin_for(class_name));

        let instance = match plugin.as_ref().and_then(|p| p.instantiate(class_name, tag_pos)) {
            Some(v) => v,
            None => {
                let d = desc.as_ref().ok_or_else(|| CodecError::InstantiationFailed(class_name.to_string()))?;
                instantiate_default(d)
            }
        };

        // Registered before the body is filled (spec.md §4.3, §4.5 step 3,
        // §9): a self-referential HANDLE inside this object's own fields
        // must resolve to `instance`, not fail as unresolved.
        self.register_before_fill(tag_pos, field, &instance);

        if let Some(p) = &plugin {
            p.read_object(self, &instance)?;
        } else {
            let d = desc.as_ref().ok_or_else(|| CodecError::InstantiationFailed(class_name.to_string()))?;
            if let Some(hooks) = d.externalizable.clone() {
                hooks.read_external(self, &instance)?;
            } else if d.flags.contains(ClassFlags::COMPATIBLE_MODE) {
                self.read_compatible_levels(&instance, d)?;
            } else {
                self.read_default_fields(&instance, d)?;
            }
        }

        // Read-resolve (spec.md §4.5 step 5): if the class provides a
        // substitute, repoint the object-reference registry so later
        // handles to `tag_pos` resolve to it instead of `instance`.
        if let Some(resolve) = desc.as_ref().and_then(|d| d.read_resolve.clone()) {
            if let Some(substitute) = resolve.resolve(&instance) {
                self.refs.replace(tag_pos, substitute.clone());
                return Ok(substitute);
            }
        }

        Ok(instance)
    }

    /// Re-decodes the bytes at `pos` in a fresh sub-context: a scratch
    /// object-reference registry swapped in for the duration, so the copy's
    /// own internal handles resolve against itself rather than aliasing the
    /// original's registrations (spec.md §9: COPYHANDLE has "no result
    /// caching"). Only object bodies reached via the `OBJECT` tag are
    /// guaranteed to replay correctly this way — `TYPED`/prediction tags
    /// depend on the field context of their *original* site, which this
    /// entry point does not have.
    fn read_copy(&mut self, pos: u64) -> Result<Value> {
        self.input.push_view(None, pos);
        let scratch = std::mem::replace(&mut self.refs, ObjectRefRegistry::new());
        let result = self.read_field(None);
        self.refs = scratch;
        self.input.pop_view();
        result
    }

    fn read_default_fields(&mut self, instance: &Value, desc: &Arc<ClassDescriptor>) -> Result<()> {
        let obj_rc = match instance {
            Value::Object(rc) => Rc::clone(rc),
            _ => unreachable!("read_default_fields only called for Object instances"),
        };
        let fields = &desc.fields;
        let mut i = 0;
        while i < fields.len() {
            let fd = &fields[i];
            if fd.flags.contains(FieldFlags::CONDITIONAL) {
                i = self.read_conditional_group(&obj_rc, fields, i)?;
                continue;
            }

            if fd.declared_type == TypeTag::Bool {
                let mut names = Vec::new();
                while i < fields.len() && fields[i].declared_type == TypeTag::Bool && !fields[i].flags.contains(FieldFlags::CONDITIONAL) {
                    names.push(fields[i].name.clone());
                    i += 1;
                }
                let bits = read_packed_bools(&mut self.input, names.len())?;
                let mut obj = obj_rc.borrow_mut();
                for (name, bit) in names.iter().zip(bits) {
                    obj.set_field(name, Value::Bool(bit));
                }
                continue;
            }

            let value = self.read_inline_or_recurse(fd)?;
            obj_rc.borrow_mut().set_field(&fd.name, value);
            i += 1;
        }
        Ok(())
    }

    /// Reads one contiguous run of `CONDITIONAL` fields starting at
    /// `start`, honoring the installed conditional-skip policy (spec.md
    /// §4.5). Returns the index just past the run.
    fn read_conditional_group(&mut self, obj_rc: &std::rc::Rc<std::cell::RefCell<ObjectValue>>, fields: &[FieldDescriptor], start: usize) -> Result<usize> {
        let jump_target = varint::read_c_int(&mut self.input)? as u64;
        let skip = self.config.conditional_skip.as_ref().map(|policy| policy(&fields[start].name)).unwrap_or(false);

        let mut i = start;
        if skip {
            trace!("skipping conditional group [{start}..) by jumping to {jump_target}");
            self.input.set_position(jump_target);
            while i < fields.len() && fields[i].flags.contains(FieldFlags::CONDITIONAL) {
                i += 1;
            }
            return Ok(i);
        }

        while i < fields.len() && fields[i].flags.contains(FieldFlags::CONDITIONAL) {
            let value = self.read_inline_or_recurse(&fields[i])?;
            obj_rc.borrow_mut().set_field(&fields[i].name, value);
            i += 1;
        }
        Ok(i)
    }

    fn read_inline_or_recurse(&mut self, fd: &FieldDescriptor) -> Result<Value> {
        match fd.declared_type {
            TypeTag::Byte => Ok(Value::Byte(self.input.read_i8()?)),
            TypeTag::Short => {
                if fd.flags.contains(FieldFlags::PLAIN) {
                    let bytes = self.input.read_n(2)?;
                    Ok(Value::Short((&bytes[..]).read_i16::<BigEndian>().map_err(CodecError::Io)?))
                } else {
                    Ok(Value::Short(varint::read_c_short(&mut self.input)? as i16))
                }
            }
            TypeTag::Int => {
                if fd.flags.contains(FieldFlags::PLAIN) {
                    let bytes = self.input.read_n(4)?;
                    Ok(Value::Int((&bytes[..]).read_i32::<BigEndian>().map_err(CodecError::Io)?))
                } else {
                    Ok(Value::Int(varint::read_c_int(&mut self.input)?))
                }
            }
            TypeTag::Long => {
                if fd.flags.contains(FieldFlags::PLAIN) {
                    let bytes = self.input.read_n(8)?;
                    Ok(Value::Long((&bytes[..]).read_i64::<BigEndian>().map_err(CodecError::Io)?))
                } else {
                    Ok(Value::Long(varint::read_c_long(&mut self.input)?))
                }
            }
            TypeTag::Char => Ok(Value::Char(varint::read_c_char(&mut self.input)?)),
            TypeTag::Float => Ok(Value::Float(varint::read_float(&mut self.input)?)),
            TypeTag::Double => Ok(Value::Double(varint::read_double(&mut self.input)?)),
            TypeTag::Bool => Ok(Value::Bool(self.input.read_u8()? != 0)),
            TypeTag::Reference => self.read_field(Some(fd)),
        }
    }

    /// Compatible-mode reader side (spec.md §4.7): mirror of
    /// `Writer::write_compatible_levels`.
    fn read_compatible_levels(&mut self, instance: &Value, desc: &Arc<ClassDescriptor>) -> Result<()> {
        let obj_rc = match instance {
            Value::Object(rc) => Rc::clone(rc),
            _ => unreachable!("read_compatible_levels only called for Object instances"),
        };

        for level_desc in &desc.compat_levels {
            if let Some(hooks) = &level_desc.hooks {
                let mut wrapper = CompatReadStream { reader: self, level_fields: level_desc.field_kinds.clone(), produced: HashMap::new() };
                hooks.read_level(&mut wrapper)?;
                let produced = std::mem::take(&mut wrapper.produced);
                let mut obj = obj_rc.borrow_mut();
                for (name, value) in produced {
                    obj.set_field(&name, value);
                }
            } else {
                for (name, kind) in &level_desc.field_kinds {
                    let value = self.read_level_field(*kind)?;
                    obj_rc.borrow_mut().set_field(name, value);
                }
            }
        }
        Ok(())
    }

    /// Mirror of `Writer::write_level_field`, matching [`FieldKind`]'s
    /// shapes exactly.
    fn read_level_field(&mut self, kind: FieldKind) -> Result<Value> {
        match kind {
            FieldKind::Byte => Ok(Value::Byte(self.input.read_i8()?)),
            FieldKind::Int => Ok(Value::Int(varint::read_c_int(&mut self.input)?)),
            FieldKind::Long => Ok(Value::Long(varint::read_c_long(&mut self.input)?)),
            FieldKind::Bool => Ok(Value::Bool(self.input.read_u8()? != 0)),
            FieldKind::Object => self.read_field(None),
        }
    }
}

/// Mirror of `writer::resolve_array_strategy`: both must agree without
/// communicating, since the strategy byte itself is only present for
/// `compressed` arrays.
fn resolve_array_strategy(field: Option<&FieldDescriptor>, ignore_annotations: bool) -> crate::value::ArrayEncoding {
    use crate::value::ArrayEncoding;
    if ignore_annotations {
        return ArrayEncoding::Default;
    }
    match field {
        Some(fd) if fd.flags.contains(FieldFlags::PLAIN) => ArrayEncoding::Plain,
        Some(fd) if fd.flags.contains(FieldFlags::COMPRESSED) => ArrayEncoding::Compressed,
        Some(fd) if fd.flags.contains(FieldFlags::THIN) => ArrayEncoding::Thin,
        _ => ArrayEncoding::Default,
    }
}

/// Default instantiator (spec.md §4.5 step 2, "the class descriptor's
/// default instantiator"): builds a blank instance whose field set matches
/// the cached descriptor, with type-appropriate zero values, ready for the
/// field-reader loop to fill in place.
fn instantiate_default(desc: &ClassDescriptor) -> Value {
    let obj = if desc.compat_levels.is_empty() {
        let fields = desc.fields.iter().map(|fd| Field::new(fd.name.clone(), default_for_type(fd.declared_type))).collect();
        ObjectValue::new(desc.name.clone(), fields)
    } else {
        let levels = desc
            .compat_levels
            .iter()
            .map(|cl| {
                let fields = cl.field_kinds.iter().map(|(name, kind)| Field::new(name.clone(), default_for_kind(*kind))).collect();
                CompatLevel { fields, hooks: cl.hooks.clone() }
            })
            .collect();
        ObjectValue::new_compatible(desc.name.clone(), levels)
    };
    obj.borrow_mut().flat = desc.is_flat();
    Value::Object(obj)
}

fn default_for_type(t: TypeTag) -> Value {
    match t {
        TypeTag::Bool => Value::Bool(false),
        TypeTag::Byte => Value::Byte(0),
        TypeTag::Short => Value::Short(0),
        TypeTag::Char => Value::Char(0),
        TypeTag::Int => Value::Int(0),
        TypeTag::Long => Value::Long(0),
        TypeTag::Float => Value::Float(0.0),
        TypeTag::Double => Value::Double(0.0),
        TypeTag::Reference => Value::Null,
    }
}

fn default_for_kind(kind: FieldKind) -> Value {
    match kind {
        FieldKind::Byte => Value::Byte(0),
        FieldKind::Int => Value::Int(0),
        FieldKind::Long => Value::Long(0),
        FieldKind::Bool => Value::Bool(false),
        FieldKind::Object => Value::Null,
    }
}

fn read_packed_bools(input: &mut ReadCursor, count: usize) -> Result<Vec<bool>> {
    let mut out = Vec::with_capacity(count);
    let mut remaining = count;
    while remaining > 0 {
        let byte = input.read_u8()?;
        let take = remaining.min(8);
        for i in 0..take {
            out.push(byte & (1 << i) != 0);
        }
        remaining -= take;
    }
    Ok(out)
}
