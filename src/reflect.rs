//! Class reflector collaborator (spec.md §6): given a class, yields its
//! ordered field list, compatibility info, externalizable flag, and
//! read-resolve hook. This crate ships one concrete implementation,
//! [`GraphReflector`], that reads that information straight off a sample
//! `Value` the caller already built, in place of a real runtime-reflection
//! layer (see `value.rs` module docs).

use std::sync::Arc;

use crate::metadata::{get_or_build_array_descriptor, get_or_build_object_descriptor, ClassDescriptor};
use crate::value::{ArrayValue, ObjectValue};

pub trait ClassReflector {
    fn reflect_object(&self, sample: &ObjectValue, ignore_annotations: bool) -> Arc<ClassDescriptor>;
    fn reflect_array(&self, sample: &ArrayValue) -> Arc<ClassDescriptor>;
}

/// Default reflector: derives field order and flags from the first
/// instance of a class the writer or reader ever sees, then relies on the
/// process-wide cache (spec.md §4.8) for every instance after that.
pub struct GraphReflector;

impl ClassReflector for GraphReflector {
    fn reflect_object(&self, sample: &ObjectValue, ignore_annotations: bool) -> Arc<ClassDescriptor> {
        get_or_build_object_descriptor(sample, ignore_annotations)
    }

    fn reflect_array(&self, sample: &ArrayValue) -> Arc<ClassDescriptor> {
        get_or_build_array_descriptor(sample)
    }
}
