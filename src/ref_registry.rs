//! Object-reference registry (spec.md §4.3): preserves identity across the
//! stream by mapping an object to the position it was first written at, and
//! the inverse on read. Entries never outlive one encode/decode call and
//! are borrowed from the caller's `Value` graph, so — unlike the teacher's
//! GC-rooted `ObjectHandle` registry in `jvm::mem` — this map cannot extend
//! an object's lifetime; it is cleared en masse on [`reset`](ObjectRefRegistry::reset).

use std::collections::HashMap;

use crate::value::{Identity, Value};

pub struct ObjectRefRegistry {
    write_positions: HashMap<Identity, u64>,
    read_values: HashMap<u64, Value>,
}

impl ObjectRefRegistry {
    pub fn new() -> Self {
        Self { write_positions: HashMap::new(), read_values: HashMap::new() }
    }

    pub fn reset(&mut self) {
        self.write_positions.clear();
        self.read_values.clear();
    }

    /// Write side: register `identity` at `pos` *before* its body is
    /// written, so a self-referential cycle closes to the same position.
    pub fn register_write(&mut self, identity: Identity, pos: u64) {
        self.write_positions.insert(identity, pos);
    }

    pub fn position_of(&self, identity: Identity) -> Option<u64> {
        self.write_positions.get(&identity).copied()
    }

    /// Read side: record the instance produced at `pos` after instantiation
    /// but before its fields are filled, mirroring the write side.
    pub fn register_read(&mut self, pos: u64, value: Value) {
        self.read_values.insert(pos, value);
    }

    pub fn value_at(&self, pos: u64) -> Option<Value> {
        self.read_values.get(&pos).cloned()
    }

    /// Read-resolve support: atomically swap the value recorded at `pos` so
    /// later handles resolve to `substitute` instead of the original.
    pub fn replace(&mut self, pos: u64, substitute: Value) {
        self.read_values.insert(pos, substitute);
    }
}

impl Default for ObjectRefRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ObjectValue;
    use std::rc::Rc;

    #[test]
    fn read_resolve_replaces_later_handles() {
        let mut reg = ObjectRefRegistry::new();
        let original = Value::Object(ObjectValue::new("demo.Boxed", vec![]));
        reg.register_read(7, original);
        let substitute = Value::Str(Rc::from("resolved"));
        reg.replace(7, substitute);
        match reg.value_at(7) {
            Some(Value::Str(s)) => assert_eq!(&*s, "resolved"),
            _ => panic!("expected substitute value"),
        }
    }
}
