//! Property-based tests for nice-ffi.
//!
//! Uses proptest to generate random inputs and verify invariants hold.

use std::collections::HashMap;

use nice_ffi::{FfiType, RefCountTable, StructType, Value};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Increment(usize),
    Release(usize),
}

/// Operations over a small address space so addresses collide often
fn ops() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        (1usize..=4).prop_map(Op::Increment),
        (1usize..=4).prop_map(Op::Release),
    ];
    prop::collection::vec(op, 0..64)
}

fn ffi_type() -> impl Strategy<Value = FfiType> {
    prop_oneof![
        Just(FfiType::I8),
        Just(FfiType::I16),
        Just(FfiType::I32),
        Just(FfiType::I64),
        Just(FfiType::U8),
        Just(FfiType::U16),
        Just(FfiType::U32),
        Just(FfiType::U64),
        Just(FfiType::F32),
        Just(FfiType::F64),
        Just(FfiType::Pointer),
        Just(FfiType::Bool),
        Just(FfiType::Size),
    ]
}

proptest! {
    /// The table behaves like a plain map of counts, and release fires
    /// exactly when the modeled count for an address reaches zero
    #[test]
    fn refcount_matches_model(ops in ops()) {
        let table = RefCountTable::new();
        let mut model: HashMap<usize, usize> = HashMap::new();

        for op in ops {
            match op {
                Op::Increment(addr) => {
                    table.increment(addr);
                    *model.entry(addr).or_insert(0) += 1;
                }
                Op::Release(addr) => {
                    // Only held references are released
                    let Some(count) = model.get_mut(&addr) else { continue };
                    *count -= 1;
                    let expect_release = *count == 0;
                    if expect_release {
                        model.remove(&addr);
                    }

                    let mut fired = 0;
                    let released = table.release_if_unreferenced(addr, || fired += 1);
                    prop_assert_eq!(released, expect_release);
                    prop_assert_eq!(fired, usize::from(expect_release));
                }
            }

            for addr in 1..=4 {
                prop_assert_eq!(table.count(addr), model.get(&addr).copied().unwrap_or(0));
            }
        }

        let mut expected: Vec<usize> = model.keys().copied().collect();
        expected.sort_unstable();
        prop_assert_eq!(table.addresses(), expected);
    }

    /// Member offsets are aligned and the size is a multiple of the alignment
    #[test]
    fn layout_is_aligned(types in prop::collection::vec(ffi_type(), 0..12)) {
        let names: Vec<String> = (0..types.len()).map(|i| format!("m{}", i)).collect();
        let ty = StructType::builder("Generated")
            .layout(names.iter().cloned().zip(types.iter().copied()))
            .build()
            .unwrap();

        let mut end = 0;
        for (member, ffi) in ty.members().iter().zip(&types) {
            prop_assert_eq!(member.offset() % ffi.alignment(), 0);
            prop_assert!(member.offset() >= end);
            end = member.offset() + ffi.size();
        }
        prop_assert!(ty.size() >= end);
        prop_assert_eq!(ty.size() % ty.alignment(), 0);
    }

    /// Writes to one member never disturb another
    #[test]
    fn members_do_not_overlap(values in prop::collection::vec(any::<u16>(), 1..10)) {
        let names: Vec<String> = (0..values.len()).map(|i| format!("m{}", i)).collect();
        let ty = StructType::builder("Words")
            .layout(names.iter().cloned().map(|n| (n, FfiType::U16)))
            .build()
            .unwrap();
        let s = ty.construct(values.iter().map(|&v| Value::U16(v)).collect::<Vec<_>>()).unwrap();

        s.set("m0", 0xffffu16).unwrap();
        let read = s.to_values().unwrap();
        prop_assert_eq!(&read[0], &Value::U16(0xffff));
        for (i, &v) in values.iter().enumerate().skip(1) {
            prop_assert_eq!(&read[i], &Value::U16(v));
        }
    }
}
