// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hmpi project

//! Native transport call surface.
//!
//! Everything above this module talks to the native message-passing library
//! through the [`Transport`] trait: layout construction and commit, custom
//! reduction-operation registration, and the native memory allocator. All
//! calls are synchronous and blocking; a non-success code aborts the caller's
//! current operation.
//!
//! A process-wide teardown flag is part of the surface: once the transport
//! has been shut down, every release path (operation free, layout free,
//! memory free) must be skipped instead of attempted, because the native
//! runtime is no longer there to take the call.
//!
//! [`LoopbackTransport`] is the in-process implementation the crate runs
//! against when no external backend has been installed; embedders bind a
//! real native library by implementing [`Transport`] and calling
//! [`install`] before first use.

mod loopback;

pub use loopback::{LoopbackTransport, TransportMetrics, TransportMetricsSnapshot};

use crate::ffi::{RawDatatype, RawOp, ReduceFn, ReturnStatus};
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

/// Result of a raw native call: the value, or the transport's status code.
///
/// Callers classify the code into [`crate::Error::Native`] together with the
/// name of the call that failed.
pub type NativeResult<T> = std::result::Result<T, ReturnStatus>;

/// Synchronous call surface of the native message-passing transport.
///
/// Handle ownership rules: layout handles returned by the build calls are
/// owned by the caller until passed to `free_layout` (the datatype registry
/// keeps them for the life of the process); operation handles from
/// `register_custom_op` are owned by the caller and released exactly once
/// via `free_op`.
pub trait Transport: Send + Sync {
    /// Build a struct-like layout from parallel field arrays.
    ///
    /// `counts[i]` repetitions of `types[i]` at byte offset `offsets[i]`.
    /// The arrays must have equal length.
    fn build_struct_layout(
        &self,
        counts: &[i32],
        offsets: &[usize],
        types: &[RawDatatype],
    ) -> NativeResult<RawDatatype>;

    /// Build a layout of `count` contiguous `element` values.
    fn build_contiguous_layout(
        &self,
        count: usize,
        element: RawDatatype,
    ) -> NativeResult<RawDatatype>;

    /// Commit a derived layout so it becomes usable for transfers.
    fn commit_layout(&self, datatype: RawDatatype) -> NativeResult<()>;

    /// Byte extent the transport reports for a layout.
    fn query_extent(&self, datatype: RawDatatype) -> NativeResult<usize>;

    /// Register a reduction callback, returning a custom operation handle.
    fn register_custom_op(&self, func: ReduceFn, commutative: bool) -> NativeResult<RawOp>;

    /// Release a custom operation handle. No-op after shutdown.
    fn free_op(&self, op: RawOp);

    /// Release a derived layout handle. No-op after shutdown.
    fn free_layout(&self, datatype: RawDatatype);

    /// Allocate `bytes` from the native allocator.
    ///
    /// Returns `None` when the allocator is exhausted; callers fall back to
    /// the general allocator.
    fn alloc(&self, bytes: usize) -> Option<NonNull<u8>>;

    /// Release memory obtained from [`Transport::alloc`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from a previous `alloc` on this transport and must
    /// not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>);

    /// Process-wide teardown flag; `true` once [`Transport::shutdown`] ran.
    fn finalized(&self) -> bool;

    /// Shut the transport down. All later release calls are skipped.
    fn shutdown(&self);
}

static GLOBAL: OnceLock<Arc<dyn Transport>> = OnceLock::new();

/// Install the process-wide transport instance.
///
/// Must run before the first call to [`global`]; returns `false` if a
/// transport was already installed (the existing instance stays in place).
pub fn install(transport: Arc<dyn Transport>) -> bool {
    GLOBAL.set(transport).is_ok()
}

/// The process-wide transport, defaulting to a [`LoopbackTransport`].
#[must_use]
pub fn global() -> Arc<dyn Transport> {
    GLOBAL
        .get_or_init(|| {
            log::debug!("[NATIVE] no transport installed, starting loopback engine");
            Arc::new(LoopbackTransport::new())
        })
        .clone()
}

/// Shut down the process-wide transport, setting the teardown flag.
///
/// Idempotent. After this, release paths everywhere in the crate skip their
/// native free calls.
pub fn shutdown() {
    if let Some(t) = GLOBAL.get() {
        t.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_defaults_to_loopback() {
        let t = global();
        assert!(!t.finalized());
        // Second call hands back the same instance.
        let t2 = global();
        assert!(Arc::ptr_eq(&t, &t2));
    }

    #[test]
    fn test_install_after_init_is_rejected() {
        let _ = global();
        assert!(!install(Arc::new(LoopbackTransport::new())));
    }
}
