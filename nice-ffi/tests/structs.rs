//! Struct wrapper integration tests
//!
//! Every instance here is backed by memory allocated by the crate, so all
//! reads and writes go through real buffers.

use std::collections::HashMap;
use std::sync::Arc;

use nice_ffi::{
    FfiError, FfiType, FieldType, Handle, HandleKind, MemoryPointer, StructSource, StructType,
    Value,
};

fn simple() -> Arc<StructType> {
    StructType::builder("SimpleStruct")
        .layout([("a", FfiType::U8), ("b", FfiType::F32)])
        .build()
        .unwrap()
}

fn expected_map() -> HashMap<String, Value> {
    HashMap::from([
        ("a".to_string(), Value::U8(1)),
        ("b".to_string(), Value::F32(2.0)),
    ])
}

#[test]
fn test_construct_from_map_values_and_instance() {
    let ty = simple();

    let from_map = ty.construct(StructSource::fields([("a", Value::U8(1)), ("b", Value::F32(2.0))])).unwrap();
    let from_values = ty.construct(vec![Value::I32(1), Value::F64(2.0)]).unwrap();
    let from_instance = ty.construct(&from_map).unwrap();

    for s in [&from_map, &from_values, &from_instance] {
        assert_eq!(s.to_values().unwrap(), vec![Value::U8(1), Value::F32(2.0)]);
        assert_eq!(s.to_map().unwrap(), expected_map());
        assert_eq!(s.handle().kind(), HandleKind::Memory);
    }
    assert_ne!(from_instance.address(), from_map.address());
}

#[test]
fn test_extra_map_keys_are_ignored() {
    let ty = simple();
    let s = ty
        .construct(StructSource::fields([
            ("a", Value::U8(1)),
            ("b", Value::F32(2.0)),
            ("c", Value::U8(9)),
        ]))
        .unwrap();
    assert_eq!(s.to_map().unwrap(), expected_map());
}

#[test]
fn test_byte_round_trip() {
    let ty = simple();
    let original = ty.construct(vec![Value::U8(7), Value::F32(-1.5)]).unwrap();
    let bytes = original.to_bytes().unwrap();
    assert_eq!(bytes.len(), ty.size());

    let copy = ty.construct(bytes).unwrap();
    assert_eq!(copy.to_values().unwrap(), original.to_values().unwrap());
    assert!(!copy.same_instance(&original));
}

#[test]
fn test_handle_source_wraps_without_copy() {
    let ty = simple();
    let buffer = MemoryPointer::zeroed(ty.size(), ty.alignment()).unwrap();
    let handle = Handle::from(buffer);

    let s = ty.construct(handle.clone()).unwrap();
    assert!(s.handle().same_as(&handle));
    s.set("a", 42u8).unwrap();
    assert_eq!(handle.read_bytes(0, 1).unwrap(), vec![42]);
}

#[test]
fn test_construction_shape_errors() {
    let ty = simple();

    let err = ty.construct(StructSource::fields([("a", 1u8)])).unwrap_err();
    assert!(matches!(err, FfiError::MissingMember { ref member, .. } if member == "b"));

    let err = ty.construct(vec![Value::U8(1)]).unwrap_err();
    assert!(matches!(err, FfiError::ArityMismatch { expected: 2, received: 1, .. }));

    let err = ty.construct(vec![0u8; 3]).unwrap_err();
    assert!(matches!(err, FfiError::SizeMismatch { expected: 8, received: 3, .. }));

    let err = ty.construct(Value::I32(5)).unwrap_err();
    assert!(matches!(err, FfiError::TypeMismatch { .. }));
    assert!(err.to_string().contains("SimpleStruct"));
    assert!(err.to_string().contains("5 (i32)"));

    let other = StructType::builder("Other")
        .layout([("a", FfiType::U8), ("b", FfiType::F32)])
        .build()
        .unwrap();
    let o = other.construct(vec![Value::U8(1), Value::F32(2.0)]).unwrap();
    assert!(matches!(ty.construct(&o), Err(FfiError::TypeMismatch { .. })));
}

#[test]
fn test_invalid_primitive_value() {
    let ty = simple();
    let s = ty.construct(vec![Value::U8(0), Value::F32(0.0)]).unwrap();
    assert!(matches!(s.set("a", 300i32), Err(FfiError::InvalidValue { .. })));
    assert!(matches!(s.set("b", true), Err(FfiError::InvalidValue { .. })));
    assert!(matches!(s.get("zzz"), Err(FfiError::NoSuchMember { .. })));
}

#[test]
fn test_read_only_member() {
    let ty = StructType::builder("ReadStruct")
        .layout([("x", FfiType::U8), ("reader", FfiType::U16)])
        .read_only(["reader"])
        .build()
        .unwrap();
    let s = ty.construct(vec![Value::U8(1), Value::U16(500)]).unwrap();

    assert_eq!(s.read("reader").unwrap(), Value::U16(500));
    let err = s.write("reader", 1u16).unwrap_err();
    assert!(matches!(err, FfiError::UnknownAccessor { ref accessor, .. } if accessor == "reader="));

    s.write("x", 9u8).unwrap();
    s.set("reader", 7u16).unwrap();
    assert_eq!(s.to_values().unwrap(), vec![Value::U8(9), Value::U16(7)]);
}

#[test]
fn test_hidden_member() {
    let ty = StructType::builder("HidingStruct")
        .hidden(["hidden"])
        .layout([("x", FfiType::U8), ("hidden", FfiType::U16)])
        .build()
        .unwrap();
    let s = ty.construct(vec![Value::U8(1), Value::U16(2)]).unwrap();

    assert!(matches!(s.read("hidden"), Err(FfiError::UnknownAccessor { .. })));
    assert!(matches!(s.write("hidden", 3u16), Err(FfiError::UnknownAccessor { .. })));
    assert_eq!(s.get("hidden").unwrap(), Value::U16(2));

    let text = s.describe();
    assert!(text.contains("x=1"));
    assert!(!text.contains("hidden"));
}

#[test]
fn test_undeclared_accessor() {
    let ty = simple();
    let s = ty.construct(vec![Value::U8(1), Value::F32(2.0)]).unwrap();
    assert!(matches!(s.read("nope"), Err(FfiError::UnknownAccessor { .. })));
}

#[test]
fn test_typed_pointer_member_is_cached() {
    let child = StructType::builder("ChildStruct")
        .layout([("a", FfiType::U8)])
        .build()
        .unwrap();
    let parent = StructType::builder("ParentStruct")
        .layout([("child", child.typed_pointer())])
        .build()
        .unwrap();

    let first = child.construct(vec![Value::U8(1)]).unwrap();
    let second = child.construct(vec![Value::U8(2)]).unwrap();
    let p = parent.construct(StructSource::fields([("child", first.clone())])).unwrap();

    let read1 = p.get("child").unwrap();
    let read2 = p.get("child").unwrap();
    assert_eq!(read1, read2);
    let c = read1.as_struct().unwrap();
    assert_eq!(c.address(), first.address());
    assert_eq!(c.get("a").unwrap(), Value::U8(1));

    p.set("child", second.clone()).unwrap();
    let read3 = p.get("child").unwrap();
    assert_ne!(read3, read1);
    assert_eq!(read3.as_struct().unwrap().get("a").unwrap(), Value::U8(2));
}

#[test]
fn test_typed_pointer_write_requires_exact_type() {
    let child = StructType::builder("ChildStruct")
        .layout([("a", FfiType::U8)])
        .build()
        .unwrap();
    let impostor = StructType::builder("ChildStruct")
        .layout([("a", FfiType::U8)])
        .build()
        .unwrap();
    let parent = StructType::builder("ParentStruct")
        .layout([("child", child.typed_pointer())])
        .build()
        .unwrap();

    let p = parent.construct(vec![0u8; parent.size()]).unwrap();
    let fake = impostor.construct(vec![Value::U8(1)]).unwrap();
    assert!(matches!(p.set("child", fake), Err(FfiError::TypeMismatch { .. })));
    assert!(matches!(p.set("child", 5u8), Err(FfiError::TypeMismatch { .. })));
}

#[test]
fn test_null_typed_pointer_reads_nil() {
    let child = StructType::builder("ChildStruct")
        .layout([("a", FfiType::U8)])
        .build()
        .unwrap();
    let parent = StructType::builder("ParentStruct")
        .layout([("child", child.typed_pointer())])
        .build()
        .unwrap();

    let p = parent.construct(vec![0u8; parent.size()]).unwrap();
    assert_eq!(p.get("child").unwrap(), Value::Nil);
    assert!(p.describe().contains("child=NULL"));
}

#[test]
fn test_nil_clears_typed_pointer_member() {
    let child = StructType::builder("ChildStruct")
        .layout([("a", FfiType::U8)])
        .build()
        .unwrap();
    let parent = StructType::builder("ParentStruct")
        .layout([
            ("tag", FieldType::from(FfiType::U8)),
            ("child", FieldType::from(child.typed_pointer())),
        ])
        .build()
        .unwrap();

    let empty = parent
        .construct(StructSource::fields([("tag", Value::U8(1)), ("child", Value::Nil)]))
        .unwrap();
    assert_eq!(empty.get("child").unwrap(), Value::Nil);

    let c = child.construct(vec![Value::U8(9)]).unwrap();
    let p = parent.construct(vec![Value::U8(2), Value::Struct(c)]).unwrap();
    assert!(p.get("child").unwrap().as_struct().is_some());

    p.set("child", Value::Nil).unwrap();
    assert_eq!(p.get("child").unwrap(), Value::Nil);
    assert_eq!(p.to_values().unwrap(), vec![Value::U8(2), Value::Nil]);
}

#[test]
fn test_copy_with_null_typed_pointer_member() {
    let node = StructType::builder("Node")
        .layout([
            ("value", FieldType::from(FfiType::I32)),
            ("next", FieldType::SelfPointer),
        ])
        .build()
        .unwrap();

    let tail = node.construct(vec![0u8; node.size()]).unwrap();
    tail.set("value", 7i32).unwrap();

    let copy = node.construct(&tail).unwrap();
    assert!(!copy.same_instance(&tail));
    assert_eq!(copy.to_values().unwrap(), vec![Value::I32(7), Value::Nil]);

    let values = tail.to_values().unwrap();
    let rebuilt = node.construct(values.clone()).unwrap();
    assert_eq!(rebuilt.to_values().unwrap(), values);
    assert_eq!(rebuilt.to_bytes().unwrap(), tail.to_bytes().unwrap());
}

#[test]
fn test_embedded_struct_is_uncached_view() {
    let inner = StructType::builder("Inner")
        .layout([("x", FfiType::U8), ("y", FfiType::U16)])
        .build()
        .unwrap();
    let outer = StructType::builder("Outer")
        .layout([
            ("tag", FieldType::from(FfiType::U8)),
            ("inner", FieldType::from(&inner)),
        ])
        .build()
        .unwrap();

    let o = outer.construct(vec![0u8; outer.size()]).unwrap();
    let view1 = o.get("inner").unwrap();
    let view2 = o.get("inner").unwrap();
    assert_ne!(view1, view2);

    let view = view1.as_struct().unwrap();
    assert_eq!(view.address(), o.address() + 2);
    view.set("y", 0x0102u16).unwrap();
    assert_eq!(view2.as_struct().unwrap().get("y").unwrap(), Value::U16(0x0102));

    let replacement = inner.construct(vec![Value::U8(5), Value::U16(6)]).unwrap();
    o.set("inner", replacement).unwrap();
    assert_eq!(view.to_values().unwrap(), vec![Value::U8(5), Value::U16(6)]);
    assert!(matches!(o.set("inner", 1u8), Err(FfiError::TypeMismatch { .. })));
}

#[test]
fn test_self_referential_layout() {
    let node = StructType::builder("Node")
        .layout([
            ("value", FieldType::from(FfiType::I32)),
            ("next", FieldType::SelfPointer),
        ])
        .build()
        .unwrap();

    let tail = node.construct(vec![Value::I32(2), Value::Nil]).unwrap();
    let head = node.construct(vec![Value::I32(1), Value::Struct(tail.clone())]).unwrap();

    let next = head.get("next").unwrap();
    let next = next.as_struct().unwrap();
    assert_eq!(next.get("value").unwrap(), Value::I32(2));
    assert_eq!(next.get("next").unwrap(), Value::Nil);

    let text = head.describe();
    assert!(text.contains("value=1"));
    assert!(text.contains("next=#<Node:0x"));
}

#[test]
fn test_typed_pointer_descriptors_compare_equal() {
    let ty = simple();
    assert_eq!(ty.typed_pointer(), ty.typed_pointer());
    assert_ne!(ty.typed_pointer(), simple().typed_pointer());
    assert_eq!(ty.typed_pointer().to_string(), "#<TypedPointer[ SimpleStruct ]>");
}

#[test]
fn test_empty_struct_dumps() {
    let ty = StructType::builder("Empty").build().unwrap();
    let s = ty.construct(Vec::<Value>::new()).unwrap();
    assert!(s.to_values().unwrap().is_empty());
    assert!(s.to_map().unwrap().is_empty());
    assert!(s.to_bytes().unwrap().is_empty());
}
