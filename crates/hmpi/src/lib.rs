// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hmpi project

//! # HMPI - datatype and reduction core for a native message-passing binding
//!
//! This crate is the layout/reduction heart of a binding to a native
//! MPI-style transport: it maps host value types onto the transport's
//! wire-level memory layout, turns combining functions into callbacks the
//! native library can invoke directly during collective reductions, and
//! manages growable unmanaged buffers for staging payloads.
//!
//! ## Quick Start
//!
//! ```rust
//! use hmpi::{DataLayout, DatatypeRegistry, NativeBuffer, ReductionOp};
//!
//! #[derive(DataLayout, Clone, Copy)]
//! #[repr(C)]
//! struct Particle {
//!     position: [f64; 3],
//!     charge: f64,
//!     species: i32,
//! }
//!
//! fn main() -> hmpi::Result<()> {
//!     let registry = DatatypeRegistry::global();
//!
//!     // Committed layout descriptor, built once and memoized.
//!     let particle = registry.descriptor::<Particle>()?.expect("describable");
//!     assert_eq!(particle.extent(), std::mem::size_of::<Particle>());
//!
//!     // Predefined reduction tag; no native registration happens here.
//!     let sum = ReductionOp::sum::<f64>(registry)?;
//!     assert!(sum.is_predefined());
//!
//!     // Stage a payload for native hand-off.
//!     let mut staged = NativeBuffer::with_capacity(64)?;
//!     staged.write_bytes(&42i32.to_le_bytes())?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------------------------------+
//! |                      Collective call sites                        |
//! |     (communicators, transmission - external collaborators)        |
//! +-------------------------------------------------------------------+
//! |  DatatypeRegistry          |  ReductionOp                         |
//! |  DataLayout / derive       |  Combiner markers + classification   |
//! |  TypeDescriptor cache      |  monomorphized native trampoline     |
//! +-------------------------------------------------------------------+
//! |             Transport trait (native call surface)                 |
//! |   layouts | commits | custom ops | allocator | teardown flag      |
//! +-------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`DatatypeRegistry`] | Process-wide cache of committed layout descriptors |
//! | [`DataLayout`] | Contract (and derive) describing a type's memory layout |
//! | [`ReductionOp`] | Predefined tag or synthesized custom reduction |
//! | [`NativeBuffer`] | Growable unmanaged buffer for staging payloads |
//! | [`Transport`] | The native transport's synchronous call surface |
//!
//! Booleans and other non-describable types resolve to `Ok(None)` rather
//! than failing; higher layers route those through a packing fallback. All
//! native failures are fatal to the current operation and carry the raw
//! status code.

#![warn(unsafe_op_in_unsafe_fn)]

// Allow the derive macro's ::hmpi:: paths to work inside this crate's tests
extern crate self as hmpi;

/// Growable unmanaged buffers for staging native payloads.
pub mod buffer;
/// Global configuration (constants, env-driven runtime knobs).
pub mod config;
/// Host-type layout description and the process-wide datatype registry.
pub mod datatype;
/// Error model (native failures vs. non-error representation gaps).
pub mod error;
/// Raw C ABI surface shared with the native transport.
pub mod ffi;
/// Reduction classification, predefined tags, and callback synthesis.
pub mod reduce;
/// Native transport call surface and the in-process loopback engine.
pub mod transport;

pub use buffer::NativeBuffer;
pub use datatype::{
    DataLayout, DatatypeRegistry, FieldLayout, LayoutCx, Packed, Resolution, ScalarKind,
    TypeDescriptor,
};
pub use error::{Error, Result};
pub use reduce::{
    BitwiseAnd, BitwiseOr, BitwiseXor, Combiner, LogicalAnd, LogicalOr, Maximum, Minimum, OpKind,
    Product, ReduceClass, ReductionOp, Sum,
};
pub use transport::{LoopbackTransport, Transport, TransportMetricsSnapshot};

// Derive macro (for #[derive(hmpi::DataLayout)])
pub use hmpi_codegen::DataLayout;

/// HMPI version string.
pub const VERSION: &str = "0.3.1";
