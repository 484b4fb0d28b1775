//! A compact, self-describing binary codec for cyclic, identity-preserving
//! object graphs.
//!
//! The entry points are [`writer::Writer::write_root`] and
//! [`reader::Reader::read_root`], both driven by a shared [`config::Config`].
//! Callers build the graph to encode directly out of [`value::Value`] (and
//! its [`value::ObjectValue`]/[`value::ArrayValue`] nodes) since this crate
//! ships no live reflection layer — see `value`'s module docs for why, and
//! [`reflect::ClassReflector`]/[`plugin::SerializerPlugin`] for the seams a
//! real reflection layer would plug into.

// Ensure each result error is either unwrapped or returned.
#![deny(unused_must_use)]

pub mod array;
pub mod buffer;
pub mod class_registry;
pub mod compat;
pub mod config;
pub mod error;
pub mod metadata;
pub mod plugin;
pub mod reader;
pub mod ref_registry;
pub mod reflect;
pub mod tag;
pub mod value;
pub mod varint;
pub mod writer;

pub use config::Config;
pub use error::{CodecError, Result};
pub use reader::Reader;
pub use value::Value;
pub use writer::Writer;
