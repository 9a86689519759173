// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hmpi project

//! Registry behavior under shared and concurrent use.

use hmpi::{DataLayout, DatatypeRegistry, LoopbackTransport, Transport};
use std::sync::Arc;
use std::thread;

#[derive(DataLayout, Clone, Copy)]
#[repr(C)]
struct Reading {
    sensor: i32,
    values: [f64; 8],
    sequence: u64,
}

#[test]
fn concurrent_first_use_commits_once() {
    let lb = Arc::new(LoopbackTransport::new());
    let registry = Arc::new(DatatypeRegistry::new(lb.clone()).expect("seeding"));
    let before = lb.metrics().snapshot().commits;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.descriptor::<Reading>().unwrap().unwrap())
        })
        .collect();
    let descriptors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Everyone observes the same cached descriptor.
    for d in &descriptors[1..] {
        assert!(Arc::ptr_eq(&descriptors[0], d));
    }
    // Exactly one caller built and committed the derived layout.
    assert_eq!(lb.metrics().snapshot().commits - before, 1);
}

#[test]
fn derived_layout_matches_transport_view() {
    let lb = Arc::new(LoopbackTransport::new());
    let registry = DatatypeRegistry::new(lb.clone()).expect("seeding");

    let desc = registry.descriptor::<Reading>().unwrap().unwrap();
    assert_eq!(desc.extent(), std::mem::size_of::<Reading>());

    // The committed handle is resolvable on the transport side, and the
    // field span never exceeds the host extent.
    let span = lb.query_extent(desc.handle()).expect("committed handle");
    assert!(span <= desc.extent());
    assert!(span > 0);
}

#[test]
fn global_registry_resolves_builtins() {
    let registry = DatatypeRegistry::global();
    let a = registry.descriptor::<i64>().unwrap().unwrap();
    let b = registry.descriptor::<i64>().unwrap().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.extent(), 8);
    assert!(registry.descriptor::<bool>().unwrap().is_none());
}
