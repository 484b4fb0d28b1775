//! Per-stream class-name registry (spec.md §4.2): a bidirectional map
//! between class names and small integer codes, seeded from a global
//! dictionary and reset between streams. Grounded on the teacher's
//! constant-pool idiom of assigning small codes to repeated names on first
//! use (`constant_pool.rs`'s `ConstantUtf8Info` interning).

use std::collections::HashMap;
use std::rc::Rc;

use lazy_static::lazy_static;

use crate::buffer::{ReadCursor, WriteCursor};
use crate::error::{CodecError, Result};
use crate::varint::{read_c_int, read_string_utf, write_c_int, write_string_utf};

/// Classes common enough across object graphs to ship pre-assigned codes,
/// the same way the fast-serialize lineage this spec distills seeds a
/// handful of JDK boxed types before a stream ever starts.
const GLOBAL_DICTIONARY: &[&str] = &[
    "java.lang.String",
    "java.lang.Integer",
    "java.lang.Long",
    "java.lang.Boolean",
    "java.lang.Double",
    "java.lang.Float",
    "java.lang.Short",
    "java.lang.Byte",
    "java.lang.Character",
];

lazy_static! {
    static ref SEED_CODES: HashMap<&'static str, u32> = GLOBAL_DICTIONARY
        .iter()
        .enumerate()
        .map(|(i, &name)| (name, i as u32 + 1))
        .collect();
}

/// Sentinel written on the wire in place of a code when a class is named
/// for the first time in this stream.
const NEW_CLASS_SENTINEL: i32 = 0;

pub struct ClassNameRegistry {
    code_to_name: HashMap<u32, Rc<str>>,
    name_to_code: HashMap<Rc<str>, u32>,
    next_code: u32,
}

impl ClassNameRegistry {
    pub fn new() -> Self {
        let mut reg = Self { code_to_name: HashMap::new(), name_to_code: HashMap::new(), next_code: 1 };
        reg.seed();
        reg
    }

    fn seed(&mut self) {
        let mut max_seed = 0;
        for (&name, &code) in SEED_CODES.iter() {
            self.code_to_name.insert(code, Rc::from(name));
            self.name_to_code.insert(Rc::from(name), code);
            max_seed = max_seed.max(code);
        }
        self.next_code = max_seed + 1;
    }

    pub fn reset(&mut self) {
        self.code_to_name.clear();
        self.name_to_code.clear();
        self.seed();
    }

    /// Write-side: emits a code if the class already has one, else a
    /// sentinel followed by the class's UTF name and assigns the next code.
    /// Idempotent within a stream.
    pub fn encode(&mut self, out: &mut WriteCursor, class_name: &Rc<str>) -> Result<()> {
        if let Some(&code) = self.name_to_code.get(class_name) {
            write_c_int(out, code as i32)
        } else {
            write_c_int(out, NEW_CLASS_SENTINEL)?;
            write_string_utf(out, class_name)?;
            let code = self.next_code;
            self.next_code += 1;
            self.code_to_name.insert(code, class_name.clone());
            self.name_to_code.insert(class_name.clone(), code);
            Ok(())
        }
    }

    /// Read-side mirror of [`encode`].
    pub fn decode(&mut self, input: &mut ReadCursor) -> Result<Rc<str>> {
        let code = read_c_int(input)?;
        if code == NEW_CLASS_SENTINEL {
            let name: Rc<str> = Rc::from(read_string_utf(input)?.as_str());
            let code = self.next_code;
            self.next_code += 1;
            self.code_to_name.insert(code, name.clone());
            self.name_to_code.insert(name.clone(), code);
            Ok(name)
        } else {
            self.code_to_name.get(&(code as u32)).cloned().ok_or(CodecError::UnknownClass(code as u32))
        }
    }
}

impl Default for ClassNameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_class_uses_code_only() {
        let mut w = WriteCursor::new();
        let mut reg = ClassNameRegistry::new();
        let name: Rc<str> = Rc::from("demo.Widget");
        reg.encode(&mut w, &name).unwrap();
        let after_first = w.position();
        reg.encode(&mut w, &name).unwrap();
        // Second mention is a single small varint, no repeated name bytes.
        assert!(w.position() - after_first <= 2);
    }

    #[test]
    fn roundtrip_new_class_then_repeat() {
        let mut w = WriteCursor::new();
        let mut write_reg = ClassNameRegistry::new();
        let name: Rc<str> = Rc::from("demo.Widget");
        write_reg.encode(&mut w, &name).unwrap();
        write_reg.encode(&mut w, &name).unwrap();

        let bytes: Rc<[u8]> = w.into_bytes().into();
        let mut r = ReadCursor::new(bytes);
        let mut read_reg = ClassNameRegistry::new();
        assert_eq!(&*read_reg.decode(&mut r).unwrap(), "demo.Widget");
        assert_eq!(&*read_reg.decode(&mut r).unwrap(), "demo.Widget");
    }

    #[test]
    fn reset_drops_stream_local_classes() {
        let mut reg = ClassNameRegistry::new();
        let name: Rc<str> = Rc::from("demo.Widget");
        let mut w = WriteCursor::new();
        reg.encode(&mut w, &name).unwrap();
        assert!(reg.name_to_code.contains_key(&name));
        reg.reset();
        assert!(!reg.name_to_code.contains_key(&name));
    }
}
