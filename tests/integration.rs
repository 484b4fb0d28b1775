//! Integration tests for spec.md §8's testable properties: the round-trip
//! law, cycle closure, and the six concrete scenarios.

use std::rc::Rc;
use std::sync::Arc;

use compact_graph_codec::config::Config;
use compact_graph_codec::reader::Reader;
use compact_graph_codec::tag::{NamedTag, Tag};
use compact_graph_codec::value::{ArrayValue, EnumValue, Field, FieldFlags, ObjectValue, Value};
use compact_graph_codec::writer::Writer;

fn encode(config: &Arc<Config>, value: &Value) -> Vec<u8> {
    Writer::new(config.clone()).write_root(value).unwrap()
}

fn decode(config: &Arc<Config>, bytes: &[u8]) -> Value {
    Reader::new(config.clone(), Rc::from(bytes)).read_root().unwrap()
}

fn rc_ptr(v: &Value) -> usize {
    match v {
        Value::Object(rc) => Rc::as_ptr(rc) as usize,
        Value::Array(rc) => Rc::as_ptr(rc) as usize,
        _ => panic!("not a reference-identity value: expected an object or an array"),
    }
}

#[test]
fn scenario_1_null_is_one_byte() {
    let config = Arc::new(Config::new());
    let bytes = encode(&config, &Value::Null);
    assert_eq!(bytes, vec![Tag::Named(NamedTag::Null).to_byte()]);
    assert!(decode(&config, &bytes).is_null());
}

#[test]
fn root_level_bare_int_array_round_trips_without_a_field_context() {
    // No `FieldDescriptor` at all reaches `write_array`/`read_array` here;
    // the int-vs-reference decision must come from the array's own
    // `element_class`, or this panics instead of round-tripping.
    let config = Arc::new(Config::new());
    let values = vec![1, -2, 3, 127, -126, 9000];
    let arr = Value::Array(ArrayValue::new("int", values.iter().copied().map(Value::Int).collect()));

    let bytes = encode(&config, &arr);
    let decoded = decode(&config, &bytes);
    match decoded {
        Value::Array(rc) => {
            let decoded_values: Vec<i32> = rc
                .borrow()
                .elements
                .iter()
                .map(|v| match v {
                    Value::Int(i) => *i,
                    _ => panic!("expected int element"),
                })
                .collect();
            assert_eq!(decoded_values, values);
        }
        _ => panic!("expected array"),
    }
}

#[test]
fn scenario_2_shared_object_in_array_is_a_handle() {
    let config = Arc::new(Config::new());
    let widget = ObjectValue::new("demo.Widget", vec![Field::new("greeting", Value::Str(Rc::from("hi")))]);
    let x = Value::Object(widget);

    let arr = ArrayValue::new("demo.Widget", vec![x.clone(), x.clone()]);
    let list = Value::Array(arr);

    let bytes = encode(&config, &list);
    let decoded = decode(&config, &bytes);

    match decoded {
        Value::Array(rc) => {
            let elements = &rc.borrow().elements;
            assert_eq!(elements.len(), 2);
            assert_eq!(rc_ptr(&elements[0]), rc_ptr(&elements[1]), "both elements must decode to the identical object");
        }
        _ => panic!("expected an array"),
    }
}

#[test]
fn scenario_3_enum_emits_named_tag_class_code_and_ordinal() {
    let config = Arc::new(Config::new());
    let constants: Rc<[Rc<str>]> = Rc::from(vec![Rc::from("RED"), Rc::from("GREEN"), Rc::from("BLUE")].into_boxed_slice());
    let red = Value::Enum(Rc::new(EnumValue {
        class_name: Rc::from("demo.Color"),
        ordinal: 2,
        name: constants[2].clone(),
        // `constants[2]` ("BLUE") names ordinal 2, matching spec.md's example ordinal.
        constants: constants.clone(),
    }));

    let bytes = encode(&config, &red);
    assert_eq!(bytes[0], Tag::Named(NamedTag::Enum).to_byte());
    // bytes[1] is the zero sentinel (first mention of the class name), then
    // the UTF-encoded class name, then the ordinal as the final byte.
    assert_eq!(*bytes.last().unwrap(), 2);

    let decoded = decode(&config, &bytes);
    match decoded {
        Value::Enum(e) => {
            assert_eq!(e.ordinal, 2);
            assert_eq!(&*e.name, "BLUE");
        }
        _ => panic!("expected an enum"),
    }
}

#[test]
fn scenario_4_thin_int_array_pairs_then_terminator() {
    let config = Arc::new(Config::new());
    let mut values = vec![0i32; 9];
    values[3] = 5;
    values[7] = 9;
    let array_field = Field::with_flags("data", Value::Array(ArrayValue::new("int", values.iter().copied().map(Value::Int).collect())), FieldFlags::INTEGRAL | FieldFlags::THIN);
    let obj = ObjectValue::new("demo.Sparse", vec![array_field]);
    let value = Value::Object(obj);

    let bytes = encode(&config, &value);
    let decoded = decode(&config, &bytes);
    match decoded {
        Value::Object(rc) => {
            let obj = rc.borrow();
            match obj.field("data") {
                Some(Value::Array(arr)) => {
                    let decoded_values: Vec<i32> = arr
                        .borrow()
                        .elements
                        .iter()
                        .map(|v| match v {
                            Value::Int(i) => *i,
                            _ => panic!("expected int element"),
                        })
                        .collect();
                    assert_eq!(decoded_values, values);
                }
                _ => panic!("expected array field"),
            }
        }
        _ => panic!("expected object"),
    }
}

#[test]
fn int_array_field_with_no_explicit_flags_round_trips() {
    // The field carries no `INTEGRAL`/`PLAIN`/`COMPRESSED`/`THIN` flags at
    // all; the class metadata cache must still recognize this as an int
    // array from the sample value so the writer's raw-varint body and the
    // reader's no-tag-per-element decode agree.
    let config = Arc::new(Config::new());
    let values = vec![1, -2, 3, 127, -126, 9000];
    let array_field = Field::new("data", Value::Array(ArrayValue::new("int", values.iter().copied().map(Value::Int).collect())));
    let obj = ObjectValue::new("demo.PlainInts", vec![array_field]);
    let value = Value::Object(obj);

    let bytes = encode(&config, &value);
    let decoded = decode(&config, &bytes);
    match decoded {
        Value::Object(rc) => match rc.borrow().field("data") {
            Some(Value::Array(arr)) => {
                let decoded_values: Vec<i32> = arr
                    .borrow()
                    .elements
                    .iter()
                    .map(|v| match v {
                        Value::Int(i) => *i,
                        _ => panic!("expected int element"),
                    })
                    .collect();
                assert_eq!(decoded_values, values);
            }
            _ => panic!("expected array field"),
        },
        _ => panic!("expected object"),
    }
}

#[test]
fn scenario_5_self_cycle_closes_to_identical_object() {
    let config = Arc::new(Config::new());
    let o = ObjectValue::new("demo.Node", vec![Field::new("self", Value::Null)]);
    o.borrow_mut().set_field("self", Value::Object(o.clone()));
    let value = Value::Object(o);

    let bytes = encode(&config, &value);
    let decoded = decode(&config, &bytes);

    match &decoded {
        Value::Object(rc) => {
            let self_field = rc.borrow().field("self").cloned().unwrap();
            assert_eq!(rc_ptr(&decoded), rc_ptr(&self_field), "o.self must be identical to o");
        }
        _ => panic!("expected object"),
    }
}

#[test]
fn scenario_6_struct_mode_duplicates_shared_objects() {
    let mut config = Config::new();
    config.struct_mode = true;
    let config = Arc::new(config);

    let widget = ObjectValue::new("demo.Widget", vec![Field::new("greeting", Value::Str(Rc::from("hi")))]);
    let x = Value::Object(widget);
    let arr = ArrayValue::new("demo.Widget", vec![x.clone(), x.clone()]);
    let list = Value::Array(arr);

    let bytes = encode(&config, &list);
    let decoded = decode(&config, &bytes);

    match decoded {
        Value::Array(rc) => {
            let elements = &rc.borrow().elements;
            assert_ne!(rc_ptr(&elements[0]), rc_ptr(&elements[1]), "struct_mode must not preserve identity");
            for e in elements {
                match e {
                    Value::Object(o) => assert_eq!(&*o.borrow().field("greeting").cloned().map(|v| match v {
                        Value::Str(s) => s,
                        _ => panic!("expected string"),
                    }).unwrap(), "hi"),
                    _ => panic!("expected object"),
                }
            }
        }
        _ => panic!("expected array"),
    }
}

#[test]
fn round_trip_law_preserves_structural_equality_and_identity() {
    let config = Arc::new(Config::new());
    let shared = ObjectValue::new("demo.Shared", vec![Field::new("n", Value::Int(42))]);
    let root = ObjectValue::new(
        "demo.Root",
        vec![
            Field::new("a", Value::Object(shared.clone())),
            Field::new("b", Value::Object(shared.clone())),
            Field::new("name", Value::Str(Rc::from("root"))),
        ],
    );
    let value = Value::Object(root);

    let bytes = encode(&config, &value);
    let decoded = decode(&config, &bytes);

    match decoded {
        Value::Object(rc) => {
            let obj = rc.borrow();
            let a = obj.field("a").cloned().unwrap();
            let b = obj.field("b").cloned().unwrap();
            assert_eq!(rc_ptr(&a), rc_ptr(&b), "two fields pointing at the same object must decode to the same object");
        }
        _ => panic!("expected object"),
    }
}

#[test]
fn compressed_string_field_round_trips() {
    let config = Arc::new(Config::new());
    let obj = ObjectValue::new("demo.Text", vec![Field::new("body", Value::Str(Rc::from("hello, world — unicode: héllo ☃")))]);
    let bytes = encode(&config, &Value::Object(obj));
    let decoded = decode(&config, &bytes);
    match decoded {
        Value::Object(rc) => match rc.borrow().field("body") {
            Some(Value::Str(s)) => assert_eq!(&**s, "hello, world — unicode: héllo ☃"),
            _ => panic!("expected string field"),
        },
        _ => panic!("expected object"),
    }
}

fn make_container() -> Value {
    let payload = ObjectValue::new("demo.Payload", vec![Field::new("n", Value::Int(1))]);
    let container = ObjectValue::new("demo.Container", vec![Field::new("payload", Value::Object(payload))]);
    Value::Object(container)
}

#[test]
fn a_second_stream_does_not_inherit_the_first_streams_prediction_table() {
    // The "payload" field's class-prediction table lives in the process-wide
    // class metadata cache, not per-stream. Without resetting it at the
    // start of every `Writer`/`Reader`, a class already recorded by an
    // earlier stream would be written as a `Prediction` code in a later one
    // before that stream's reader has ever seen it, and the read would fail.
    let config = Arc::new(Config::new());

    let first_bytes = encode(&config, &make_container());
    let first = decode(&config, &first_bytes);
    match first {
        Value::Object(rc) => assert!(rc.borrow().field("payload").is_some()),
        _ => panic!("expected object"),
    }

    let second_bytes = encode(&config, &make_container());
    let second = decode(&config, &second_bytes);
    match second {
        Value::Object(rc) => match rc.borrow().field("payload") {
            Some(Value::Object(payload)) => {
                assert_eq!(&*payload.borrow().class_name, "demo.Payload");
            }
            _ => panic!("expected payload field to decode to an object"),
        },
        _ => panic!("expected object"),
    }
}
