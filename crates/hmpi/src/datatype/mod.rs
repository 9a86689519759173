// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hmpi project

//! Host-type layout description and the process-wide datatype registry.
//!
//! The native transport moves memory it can describe: a layout is a set of
//! `{byte offset, repetition count, element descriptor}` triples committed
//! through the transport's derived-datatype calls. This module rebuilds that
//! description for host types:
//!
//! - [`DataLayout`] is the compile-time contract; primitives implement it
//!   here, structs get it from `#[derive(DataLayout)]`.
//! - [`DatatypeRegistry`] memoizes one committed [`TypeDescriptor`] per
//!   distinct type for the life of the process.
//!
//! Types without a wire representation (booleans, anything a derive bails
//! out on) resolve to `Ok(None)`; higher layers route those through a
//! generic packing fallback instead.

mod descriptor;
mod layout;
mod registry;

pub use descriptor::{FieldLayout, ScalarKind, TypeDescriptor};
pub use layout::{DataLayout, Packed, Resolution};
pub use registry::{DatatypeRegistry, LayoutCx};
