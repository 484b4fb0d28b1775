//! Configuration (spec.md §4/§8, component 8): holds the knobs that steer
//! the writer/reader state machines plus a thread-safe pool of reusable
//! per-stream registries, the way the teacher's `Arc<RwLock<JavaEnv>>`
//! centralizes shared, reusable runtime state (`jvm::mod.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::class_registry::ClassNameRegistry;
use crate::metadata;
use crate::plugin::SerializerPlugin;
use crate::reflect::{ClassReflector, GraphReflector};
use crate::ref_registry::ObjectRefRegistry;

/// Advisory buffer-sizing hint for externalizable bodies (spec.md §6).
pub const DEFAULT_READ_EXTERNAL_READ_AHEAD: usize = 5000;

/// Caller-supplied policy for the conditional skip-group protocol (spec.md
/// §4.5): given a conditional field's name, returns whether the reader
/// should skip the rest of its contiguous group by jumping straight to the
/// recorded resume position.
pub type ConditionalSkipPolicy = dyn Fn(&str) -> bool + Send + Sync;

pub struct Config {
    /// If true, field-level flags (`plain`/`conditional`/`compressed`/`thin`/`flat`)
    /// are ignored and the default encoding is used everywhere.
    pub ignore_annotations: bool,
    /// If true, object identity is not preserved: every reference is
    /// inlined and no `HANDLE` tags are ever emitted.
    pub struct_mode: bool,
    /// If true, enums are emitted by name instead of ordinal, and
    /// interface-typed fields for standard container interfaces bind to
    /// canonical concrete containers on read.
    pub cross_language: bool,
    pub read_external_read_ahead: usize,

    plugins: Mutex<HashMap<String, Arc<dyn SerializerPlugin>>>,
    pool: Mutex<Vec<(ClassNameRegistry, ObjectRefRegistry)>>,
    pub(crate) reflector: Arc<dyn ClassReflector>,
    pub(crate) conditional_skip: Option<Arc<ConditionalSkipPolicy>>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            ignore_annotations: false,
            struct_mode: false,
            cross_language: false,
            read_external_read_ahead: DEFAULT_READ_EXTERNAL_READ_AHEAD,
            plugins: Mutex::new(HashMap::new()),
            pool: Mutex::new(Vec::new()),
            reflector: Arc::new(GraphReflector),
            conditional_skip: None,
        }
    }

    pub fn with_reflector(mut self, reflector: Arc<dyn ClassReflector>) -> Self {
        self.reflector = reflector;
        self
    }

    pub fn with_conditional_skip(mut self, policy: Arc<ConditionalSkipPolicy>) -> Self {
        self.conditional_skip = Some(policy);
        self
    }

    pub fn install_plugin(&self, class_name: impl Into<String>, plugin: Arc<dyn SerializerPlugin>) {
        let class_name = class_name.into();
        trace!("installing custom serializer plugin for {class_name}");
        self.plugins.lock().insert(class_name, plugin);
    }

    pub fn plugin_for(&self, class_name: &str) -> Option<Arc<dyn SerializerPlugin>> {
        self.plugins.lock().get(class_name).cloned()
    }

    /// Whether `class_name`'s installed plugin, if any, declares
    /// `alwaysCopy()` (spec.md §6) — the writer consults this to choose
    /// `COPYHANDLE` over `HANDLE` on a repeat reference.
    pub fn always_copy(&self, class_name: &str) -> bool {
        self.plugin_for(class_name).map(|p| p.always_copy()).unwrap_or(false)
    }

    /// Borrow a pair of per-stream registries from the pool, or build a
    /// fresh pair if none are free. Both come back pre-reset. Also resets
    /// every cached class's field-prediction table, since that state is
    /// stream-scoped too (spec.md §3) despite living in the process-wide
    /// class metadata cache.
    pub fn borrow_registries(&self) -> (ClassNameRegistry, ObjectRefRegistry) {
        metadata::reset_all_stream_state();
        match self.pool.lock().pop() {
            Some((mut names, mut refs)) => {
                names.reset();
                refs.reset();
                (names, refs)
            }
            None => (ClassNameRegistry::new(), ObjectRefRegistry::new()),
        }
    }

    pub fn return_registries(&self, names: ClassNameRegistry, refs: ObjectRefRegistry) {
        self.pool.lock().push((names, refs));
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
