//! Custom-serializer plugin collaborator (spec.md §6). Installed per class
//! name on [`crate::config::Config`]; the writer/reader consult it before
//! falling back to the default field-reader loop.

use crate::error::Result;
use crate::reader::Reader;
use crate::value::Value;
use crate::writer::Writer;

pub trait SerializerPlugin: Send + Sync {
    fn write_object(&self, writer: &mut Writer, value: &Value) -> Result<()>;

    fn read_object(&self, reader: &mut Reader, instance: &Value) -> Result<()>;

    /// Returns `Some(instance)` to short-circuit the default instantiator,
    /// or `None` to defer to it.
    fn instantiate(&self, class_name: &str, stream_pos: u64) -> Option<Value>;

    /// If true, the reader never registers this plugin's instances in the
    /// object-reference registry — every occurrence is a fresh copy.
    fn always_copy(&self) -> bool {
        false
    }

    fn cross_language(&self) -> bool {
        false
    }
}

/// Hooks for a class whose descriptor carries `ClassFlags::EXTERNALIZABLE`
/// (spec.md §4.5 step 4: "the externalizable `readExternal` hook"). Unlike
/// [`SerializerPlugin`], an externalizable class still goes through the
/// default instantiator; only body read/write is delegated.
pub trait ExternalizableHooks: Send + Sync {
    fn write_external(&self, writer: &mut Writer, value: &Value) -> Result<()>;

    fn read_external(&self, reader: &mut Reader, instance: &Value) -> Result<()>;
}

/// Read-resolve hook (spec.md §4.5 step 5, §4.3 `replace`): invoked after a
/// class's body has been fully read, with the freshly-filled instance.
/// Returning `Some(substitute)` asks the reader to atomically repoint the
/// object-reference registry at `substitute` so later handles resolve to it
/// instead of the original instance — the same mechanism Java's
/// `readResolve` uses to collapse e.g. enum-like singletons.
pub trait ReadResolveHook: Send + Sync {
    fn resolve(&self, instance: &Value) -> Option<Value>;
}
