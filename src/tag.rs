//! The closed tag set a writer chooses from for every field-context value
//! (spec.md §4.4), dispatched the same way the teacher dispatches constant
//! pool tags in `constant_pool.rs` — a `FromPrimitive` derive over a `u8`.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

/// Tag values `0..FIRST_PREDICTION_TAG` are the named tags below; tag values
/// `FIRST_PREDICTION_TAG..=255` are prediction codes, one-indexed into a
/// field descriptor's possible-classes table via `tag - (FIRST_PREDICTION_TAG - 1)`.
///
/// This resolves spec.md's "prediction code shares byte space with the tag
/// set" note concretely: 12 values are reserved for named tags, leaving 244
/// prediction slots. The possible-classes table enforces the spec's 255-slot
/// cap by refusing new entries once it holds 244, which satisfies "never
/// exceeds 255" without ever needing to reach it.
pub const FIRST_PREDICTION_TAG: u8 = 12;
pub const MAX_PREDICTION_SLOTS: usize = (255 - FIRST_PREDICTION_TAG as usize) + 1;

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive, ToPrimitive)]
pub enum NamedTag {
    Null = 0,
    Handle = 1,
    CopyHandle = 2,
    Typed = 3,
    Object = 4,
    Enum = 5,
    Array = 6,
    BigInt = 7,
    BigLong = 8,
    BigBooleanTrue = 9,
    BigBooleanFalse = 10,
    OneOf = 11,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Tag {
    Named(NamedTag),
    /// One-indexed prediction slot: `Prediction(1)` is `possible_classes[0]`.
    Prediction(u8),
}

impl Tag {
    pub fn from_byte(byte: u8) -> Self {
        if byte < FIRST_PREDICTION_TAG {
            Tag::Named(NamedTag::from_u8(byte).expect("tag byte below FIRST_PREDICTION_TAG is always a named tag"))
        } else {
            Tag::Prediction(byte - (FIRST_PREDICTION_TAG - 1))
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Tag::Named(t) => t as u8,
            Tag::Prediction(slot) => slot + (FIRST_PREDICTION_TAG - 1),
        }
    }

    pub fn prediction_for_slot(slot_one_indexed: usize) -> Option<Tag> {
        if slot_one_indexed >= 1 && slot_one_indexed <= MAX_PREDICTION_SLOTS {
            Some(Tag::Prediction(slot_one_indexed as u8))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_tags_roundtrip() {
        for t in [
            NamedTag::Null,
            NamedTag::Handle,
            NamedTag::CopyHandle,
            NamedTag::Typed,
            NamedTag::Object,
            NamedTag::Enum,
            NamedTag::Array,
            NamedTag::BigInt,
            NamedTag::BigLong,
            NamedTag::BigBooleanTrue,
            NamedTag::BigBooleanFalse,
            NamedTag::OneOf,
        ] {
            assert_eq!(Tag::from_byte(Tag::Named(t).to_byte()), Tag::Named(t));
        }
    }

    #[test]
    fn prediction_slots_roundtrip() {
        for slot in 1..=MAX_PREDICTION_SLOTS {
            let tag = Tag::prediction_for_slot(slot).unwrap();
            assert_eq!(Tag::from_byte(tag.to_byte()), tag);
        }
        assert!(Tag::prediction_for_slot(0).is_none());
        assert!(Tag::prediction_for_slot(MAX_PREDICTION_SLOTS + 1).is_none());
    }
}
