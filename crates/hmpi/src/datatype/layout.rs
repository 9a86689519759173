// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hmpi project

//! The describable-layout contract.
//!
//! [`DataLayout`] is implemented by every type whose in-memory layout can be
//! handed to the native transport: builtin primitives below, inline arrays
//! of describable types, and `#[repr(C)]` structs via
//! `#[derive(DataLayout)]`.
//!
//! Resolution has a non-error failure mode: a type with no wire
//! representation resolves to `Ok(None)` and is expected to take a generic
//! packing fallback at a higher layer. Only native transport failures
//! surface as `Err`.

use super::descriptor::{ScalarKind, TypeDescriptor};
use super::registry::LayoutCx;
use crate::error::Result;
use crate::ffi::{
    DT_BYTE, DT_FLOAT32, DT_FLOAT64, DT_INT16, DT_INT32, DT_INT64, DT_INT8, DT_LONG, DT_PACKED,
    DT_UINT16, DT_UINT32, DT_UINT64, DT_ULONG, DT_WCHAR,
};
use std::sync::Arc;

/// Outcome of layout resolution.
///
/// `Ok(None)` is the "no descriptor" sentinel: the type cannot be described
/// structurally and is not an error. `Err` carries a fatal native failure.
pub type Resolution = Result<Option<Arc<TypeDescriptor>>>;

/// Types whose in-memory layout can be described to the native transport.
///
/// `REPEAT` is the repetition count the type contributes when embedded as a
/// struct field: 1 for scalars, `N` (times the inner count) for inline
/// fixed-size arrays. `resolve` produces the descriptor of the *element*
/// type; for `[T; N]` that is the descriptor of `T`.
pub trait DataLayout: 'static {
    /// Repetition count contributed as a struct field.
    const REPEAT: usize = 1;

    /// Resolve the element descriptor, using `cx` for memoized recursion.
    fn resolve(cx: &mut LayoutCx<'_>) -> Resolution;
}

/// Marker type mapped to the transport's packed-data tag.
///
/// Values of this type never exist; it is a phantom standing for payloads
/// already packed into transport wire form.
#[derive(Debug, Clone, Copy)]
pub struct Packed;

macro_rules! scalar_layout {
    ($($t:ty => ($kind:expr, $tag:expr)),* $(,)?) => {$(
        impl DataLayout for $t {
            fn resolve(cx: &mut LayoutCx<'_>) -> Resolution {
                cx.scalar::<$t>($kind, $tag, std::mem::size_of::<$t>())
            }
        }
    )*};
}

scalar_layout! {
    i8 => (ScalarKind::Int8, DT_INT8),
    i16 => (ScalarKind::Int16, DT_INT16),
    i32 => (ScalarKind::Int32, DT_INT32),
    i64 => (ScalarKind::Int64, DT_INT64),
    u16 => (ScalarKind::UInt16, DT_UINT16),
    u32 => (ScalarKind::UInt32, DT_UINT32),
    u64 => (ScalarKind::UInt64, DT_UINT64),
    f32 => (ScalarKind::Float32, DT_FLOAT32),
    f64 => (ScalarKind::Float64, DT_FLOAT64),
    // The unsigned byte is the transport's raw-byte type, not an integer.
    u8 => (ScalarKind::Byte, DT_BYTE),
    char => (ScalarKind::WideChar, DT_WCHAR),
}

impl DataLayout for Packed {
    fn resolve(cx: &mut LayoutCx<'_>) -> Resolution {
        // The packed tag has unit extent regardless of the marker's size.
        cx.scalar::<Packed>(ScalarKind::Packed, DT_PACKED, 1)
    }
}

/// Booleans have no universally agreed wire representation.
impl DataLayout for bool {
    fn resolve(_cx: &mut LayoutCx<'_>) -> Resolution {
        Ok(None)
    }
}

impl DataLayout for isize {
    fn resolve(cx: &mut LayoutCx<'_>) -> Resolution {
        // Use the transport's long tag only when its reported size matches
        // the host pointer size; otherwise fall back to an opaque blob.
        if cx.native_extent(DT_LONG)? == std::mem::size_of::<isize>() {
            cx.scalar::<isize>(ScalarKind::Long, DT_LONG, std::mem::size_of::<isize>())
        } else {
            cx.opaque_blob::<isize>()
        }
    }
}

impl DataLayout for usize {
    fn resolve(cx: &mut LayoutCx<'_>) -> Resolution {
        if cx.native_extent(DT_ULONG)? == std::mem::size_of::<usize>() {
            cx.scalar::<usize>(ScalarKind::ULong, DT_ULONG, std::mem::size_of::<usize>())
        } else {
            cx.opaque_blob::<usize>()
        }
    }
}

/// Extended-precision integers travel as opaque 16-byte blobs.
impl DataLayout for i128 {
    fn resolve(cx: &mut LayoutCx<'_>) -> Resolution {
        cx.opaque_blob::<i128>()
    }
}

impl DataLayout for u128 {
    fn resolve(cx: &mut LayoutCx<'_>) -> Resolution {
        cx.opaque_blob::<u128>()
    }
}

/// Inline fixed-size arrays contribute their flattened element count.
impl<T: DataLayout, const N: usize> DataLayout for [T; N] {
    const REPEAT: usize = N * T::REPEAT;

    fn resolve(cx: &mut LayoutCx<'_>) -> Resolution {
        cx.descriptor::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_repeat_flattens() {
        assert_eq!(<[f32; 11]>::REPEAT, 11);
        assert_eq!(<[[f32; 3]; 4]>::REPEAT, 12);
        assert_eq!(<i64 as DataLayout>::REPEAT, 1);
    }
}
