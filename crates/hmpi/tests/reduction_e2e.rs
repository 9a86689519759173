// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hmpi project

//! End-to-end reduction paths: synthesis, registration, and invocation of
//! the native callback the way the transport would run it mid-collective.

use hmpi::{Combiner, DataLayout, DatatypeRegistry, LoopbackTransport, ReductionOp};
use std::ffi::{c_int, c_void};
use std::sync::Arc;

#[derive(DataLayout, Clone, Copy, Debug, PartialEq, PartialOrd)]
#[repr(C)]
struct Amount {
    units: i32,
}

fn amount(units: i32) -> Amount {
    Amount { units }
}

struct AmountSum;

impl Combiner<Amount> for AmountSum {
    fn combine(a: Amount, b: Amount) -> Amount {
        Amount {
            units: a.units.wrapping_add(b.units),
        }
    }
}

fn fresh() -> (Arc<LoopbackTransport>, DatatypeRegistry) {
    let lb = Arc::new(LoopbackTransport::new());
    let registry = DatatypeRegistry::new(lb.clone()).expect("seeding");
    (lb, registry)
}

#[test]
fn synthesized_sum_folds_contributions() {
    let (lb, registry) = fresh();
    let desc = registry.descriptor::<Amount>().unwrap().unwrap();
    let op = ReductionOp::build::<Amount, AmountSum>(&registry).unwrap();
    assert!(!op.is_predefined());

    let (func, commutative) = lb.op_function(op.raw()).expect("registered");
    assert!(commutative);

    let contributions = [amount(1), amount(2), amount(3), amount(4)];
    let mut accumulator = [amount(10), amount(20), amount(30), amount(40)];
    let len: c_int = 4;
    let raw_dt = desc.handle();

    // SAFETY: both arrays hold 4 contiguous Amount values; len and raw_dt
    // are valid locals. This is exactly the call the transport makes.
    unsafe {
        func(
            contributions.as_ptr() as *mut c_void,
            accumulator.as_mut_ptr().cast::<c_void>(),
            &len,
            &raw_dt,
        );
    }

    assert_eq!(accumulator.map(|a| a.units), [11, 22, 33, 44]);
}

#[test]
fn canonical_min_over_derived_type_synthesizes() {
    // Min is canonical, but a derived struct classifies as Other, so the
    // request silently falls through to a custom registration.
    let (lb, registry) = fresh();
    let op = ReductionOp::min::<Amount>(&registry).unwrap();
    assert!(!op.is_predefined());
    assert_eq!(lb.metrics().snapshot().ops_registered, 1);

    let (func, _) = lb.op_function(op.raw()).expect("registered");
    let desc = registry.descriptor::<Amount>().unwrap().unwrap();
    let incoming = [amount(3), amount(9)];
    let mut held = [amount(5), amount(2)];
    let len: c_int = 2;
    let raw_dt = desc.handle();
    // SAFETY: both arrays hold 2 contiguous Amount values.
    unsafe {
        func(
            incoming.as_ptr() as *mut c_void,
            held.as_mut_ptr().cast::<c_void>(),
            &len,
            &raw_dt,
        );
    }
    assert_eq!(held.map(|a| a.units), [3, 2]);
}

#[test]
fn custom_op_freed_exactly_once() {
    let (lb, registry) = fresh();
    let op = ReductionOp::build::<Amount, AmountSum>(&registry).unwrap();
    let raw = op.raw();
    assert!(lb.op_function(raw).is_some());
    drop(op);
    assert!(lb.op_function(raw).is_none());
    assert_eq!(lb.metrics().snapshot().ops_freed, 1);
}

#[test]
fn predefined_ops_never_touch_native_free() {
    let (lb, registry) = fresh();
    let sum = ReductionOp::sum::<f64>(&registry).unwrap();
    let min = ReductionOp::min::<i32>(&registry).unwrap();
    assert!(sum.is_predefined());
    assert!(min.is_predefined());
    drop(sum);
    drop(min);
    let snap = lb.metrics().snapshot();
    assert_eq!(snap.ops_registered, 0);
    assert_eq!(snap.ops_freed, 0);
}
