// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hmpi project

//! Layout descriptors for host types.

use crate::ffi::RawDatatype;
use std::any::TypeId;
use std::sync::Arc;

/// Category of a builtin (predefined-tag) descriptor.
///
/// Drives reduction classification: which predefined combining tags are
/// legal for values of the described type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Raw byte (`u8`); bitwise combinators only.
    Byte,
    /// Wide character (`char`); not reducible via predefined tags.
    WideChar,
    /// Marker for pre-packed payloads.
    Packed,
    /// Pointer-sized signed integer matching the transport's long tag.
    Long,
    /// Pointer-sized unsigned integer matching the transport's ulong tag.
    ULong,
}

/// One field of a struct-like layout.
#[derive(Debug, Clone)]
pub struct FieldLayout {
    /// Byte offset of the field inside the host struct.
    pub offset: usize,
    /// Repetition count (> 1 for inline fixed-size arrays).
    pub count: usize,
    /// Descriptor of the field's element type.
    pub element: Arc<TypeDescriptor>,
}

/// Immutable description of a host type's committed native layout.
///
/// Built at most once per distinct type and memoized by the
/// [`crate::DatatypeRegistry`], so two resolutions of the same type hand
/// back the same `Arc` (observable via [`Arc::ptr_eq`]).
#[derive(Debug)]
pub struct TypeDescriptor {
    type_id: TypeId,
    name: &'static str,
    extent: usize,
    handle: RawDatatype,
    scalar: Option<ScalarKind>,
    fields: Vec<FieldLayout>,
}

impl TypeDescriptor {
    /// Descriptor for a builtin tag.
    pub(crate) fn new_scalar<T: 'static>(
        kind: ScalarKind,
        handle: RawDatatype,
        extent: usize,
    ) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            extent,
            handle,
            scalar: Some(kind),
            fields: Vec::new(),
        }
    }

    /// Descriptor for an opaque byte blob: exactly `extent` contiguous
    /// bytes, no internal structure.
    pub(crate) fn blob<T: 'static>(handle: RawDatatype, extent: usize) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            extent,
            handle,
            scalar: None,
            fields: Vec::new(),
        }
    }

    /// Descriptor for a committed struct-like layout of `T`.
    pub(crate) fn structure<T: 'static>(handle: RawDatatype, fields: Vec<FieldLayout>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            extent: std::mem::size_of::<T>(),
            handle,
            scalar: None,
            fields,
        }
    }

    /// Identity of the described host type.
    #[inline]
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Host type name (diagnostic only).
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Total byte extent of one value of the described type.
    #[inline]
    #[must_use]
    pub fn extent(&self) -> usize {
        self.extent
    }

    /// Committed native handle for this layout.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> RawDatatype {
        self.handle
    }

    /// Builtin tag category, `None` for derived layouts and blobs.
    #[inline]
    #[must_use]
    pub fn scalar(&self) -> Option<ScalarKind> {
        self.scalar
    }

    /// Ordered fields of a struct-like layout (empty for scalars/blobs).
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }
}
