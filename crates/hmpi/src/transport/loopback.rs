// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hmpi project

//! In-process implementation of the native transport surface.
//!
//! The loopback engine keeps layout and operation tables in ordinary Rust
//! state and backs the native allocator with `malloc`/`free`. It is what the
//! crate runs against when no external native backend is installed, and what
//! the test suite observes through [`TransportMetrics`].

use super::{NativeResult, Transport};
use crate::ffi::{
    RawDatatype, RawOp, ReduceFn, DT_BYTE, DT_FLOAT32, DT_FLOAT64, DT_INT16, DT_INT32, DT_INT64,
    DT_INT8, DT_LONG, DT_PACKED, DT_UINT16, DT_UINT32, DT_UINT64, DT_UINT8, DT_ULONG, DT_WCHAR,
    FIRST_CUSTOM_OP, FIRST_DERIVED_DATATYPE, STATUS_ERR_FINALIZED, STATUS_ERR_TYPE,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};

/// Transport call counters.
///
/// All counters use `Relaxed` ordering; values are eventually consistent
/// across threads.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    /// Derived layouts built (struct + contiguous).
    pub layouts_built: AtomicU64,
    /// Layout commit calls.
    pub commits: AtomicU64,
    /// Custom operations registered.
    pub ops_registered: AtomicU64,
    /// Custom operations freed.
    pub ops_freed: AtomicU64,
    /// Derived layouts freed.
    pub layouts_freed: AtomicU64,
    /// Native allocations served.
    pub native_allocs: AtomicU64,
    /// Native blocks freed.
    pub native_frees: AtomicU64,
    /// Native allocations denied (budget exhausted or shut down).
    pub allocs_denied: AtomicU64,
}

impl TransportMetrics {
    /// All counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            layouts_built: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            ops_registered: AtomicU64::new(0),
            ops_freed: AtomicU64::new(0),
            layouts_freed: AtomicU64::new(0),
            native_allocs: AtomicU64::new(0),
            native_frees: AtomicU64::new(0),
            allocs_denied: AtomicU64::new(0),
        }
    }

    /// Consistent point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> TransportMetricsSnapshot {
        TransportMetricsSnapshot {
            layouts_built: self.layouts_built.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            ops_registered: self.ops_registered.load(Ordering::Relaxed),
            ops_freed: self.ops_freed.load(Ordering::Relaxed),
            layouts_freed: self.layouts_freed.load(Ordering::Relaxed),
            native_allocs: self.native_allocs.load(Ordering::Relaxed),
            native_frees: self.native_frees.load(Ordering::Relaxed),
            allocs_denied: self.allocs_denied.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value snapshot of [`TransportMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportMetricsSnapshot {
    pub layouts_built: u64,
    pub commits: u64,
    pub ops_registered: u64,
    pub ops_freed: u64,
    pub layouts_freed: u64,
    pub native_allocs: u64,
    pub native_frees: u64,
    pub allocs_denied: u64,
}

/// One derived-layout table entry.
enum LayoutRecord {
    Struct {
        counts: Vec<i32>,
        offsets: Vec<usize>,
        types: Vec<RawDatatype>,
        committed: bool,
    },
    Contiguous {
        count: usize,
        element: RawDatatype,
        committed: bool,
    },
    /// Slot released via `free_layout`.
    Freed,
}

struct OpRecord {
    func: ReduceFn,
    commutative: bool,
}

/// In-process native transport engine.
pub struct LoopbackTransport {
    layouts: Mutex<Vec<LayoutRecord>>,
    ops: DashMap<i32, OpRecord>,
    next_op: AtomicI32,
    finalized: AtomicBool,
    metrics: TransportMetrics,
    /// Remaining native-allocator budget in bytes; `usize::MAX` = unlimited.
    alloc_budget: AtomicUsize,
    /// Outstanding allocation sizes, keyed by pointer address.
    allocs: DashMap<usize, usize>,
}

impl LoopbackTransport {
    /// Engine with an unlimited native allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::with_alloc_budget(usize::MAX)
    }

    /// Engine whose native allocator serves at most `budget` outstanding
    /// bytes, then reports exhaustion. `0` denies every allocation.
    #[must_use]
    pub fn with_alloc_budget(budget: usize) -> Self {
        Self {
            layouts: Mutex::new(Vec::new()),
            ops: DashMap::new(),
            next_op: AtomicI32::new(FIRST_CUSTOM_OP),
            finalized: AtomicBool::new(false),
            metrics: TransportMetrics::new(),
            alloc_budget: AtomicUsize::new(budget),
            allocs: DashMap::new(),
        }
    }

    /// Call counters for this engine.
    #[must_use]
    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    /// Look up a registered custom operation's callback and commutativity.
    ///
    /// This is the hook the native side (and the test suite, standing in for
    /// it) uses to invoke the callback during a collective reduction.
    #[must_use]
    pub fn op_function(&self, op: RawOp) -> Option<(ReduceFn, bool)> {
        self.ops.get(&op.0).map(|r| (r.func, r.commutative))
    }

    /// Extent of a predefined tag, `None` for unknown handles.
    fn builtin_extent(datatype: RawDatatype) -> Option<usize> {
        let extent = match datatype {
            DT_INT8 | DT_UINT8 | DT_BYTE | DT_PACKED => 1,
            DT_INT16 | DT_UINT16 => 2,
            DT_INT32 | DT_UINT32 | DT_FLOAT32 => 4,
            DT_INT64 | DT_UINT64 | DT_FLOAT64 => 8,
            DT_WCHAR => std::mem::size_of::<char>(),
            DT_LONG => std::mem::size_of::<libc::c_long>(),
            DT_ULONG => std::mem::size_of::<libc::c_ulong>(),
            _ => return None,
        };
        Some(extent)
    }

    /// Extent of any known handle; the layout table lock must be held.
    fn extent_locked(layouts: &[LayoutRecord], datatype: RawDatatype) -> NativeResult<usize> {
        if let Some(extent) = Self::builtin_extent(datatype) {
            return Ok(extent);
        }
        let index = datatype.0 - FIRST_DERIVED_DATATYPE;
        let record = usize::try_from(index)
            .ok()
            .and_then(|i| layouts.get(i))
            .ok_or(STATUS_ERR_TYPE)?;
        match record {
            LayoutRecord::Struct {
                counts,
                offsets,
                types,
                ..
            } => {
                // Span covered by the fields; trailing padding is the
                // resolver's business, not the transport's.
                let mut span = 0usize;
                for ((count, offset), ty) in counts.iter().zip(offsets).zip(types) {
                    let elem = Self::extent_locked(layouts, *ty)?;
                    span = span.max(offset + *count as usize * elem);
                }
                Ok(span)
            }
            LayoutRecord::Contiguous { count, element, .. } => {
                Ok(count * Self::extent_locked(layouts, *element)?)
            }
            LayoutRecord::Freed => Err(STATUS_ERR_TYPE),
        }
    }

    fn check_live(&self) -> NativeResult<()> {
        if self.finalized() {
            Err(STATUS_ERR_FINALIZED)
        } else {
            Ok(())
        }
    }

    fn push_layout(&self, record: LayoutRecord) -> RawDatatype {
        let mut layouts = self.layouts.lock();
        layouts.push(record);
        self.metrics.layouts_built.fetch_add(1, Ordering::Relaxed);
        RawDatatype(FIRST_DERIVED_DATATYPE + (layouts.len() - 1) as i32)
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn build_struct_layout(
        &self,
        counts: &[i32],
        offsets: &[usize],
        types: &[RawDatatype],
    ) -> NativeResult<RawDatatype> {
        self.check_live()?;
        if counts.len() != offsets.len() || counts.len() != types.len() {
            return Err(STATUS_ERR_TYPE);
        }
        {
            let layouts = self.layouts.lock();
            for ty in types {
                Self::extent_locked(&layouts, *ty)?;
            }
        }
        Ok(self.push_layout(LayoutRecord::Struct {
            counts: counts.to_vec(),
            offsets: offsets.to_vec(),
            types: types.to_vec(),
            committed: false,
        }))
    }

    fn build_contiguous_layout(
        &self,
        count: usize,
        element: RawDatatype,
    ) -> NativeResult<RawDatatype> {
        self.check_live()?;
        {
            let layouts = self.layouts.lock();
            Self::extent_locked(&layouts, element)?;
        }
        Ok(self.push_layout(LayoutRecord::Contiguous {
            count,
            element,
            committed: false,
        }))
    }

    fn commit_layout(&self, datatype: RawDatatype) -> NativeResult<()> {
        self.check_live()?;
        self.metrics.commits.fetch_add(1, Ordering::Relaxed);
        if datatype.is_predefined() {
            // Predefined tags are born committed.
            return Ok(());
        }
        let mut layouts = self.layouts.lock();
        let index =
            usize::try_from(datatype.0 - FIRST_DERIVED_DATATYPE).map_err(|_| STATUS_ERR_TYPE)?;
        match layouts.get_mut(index) {
            Some(LayoutRecord::Struct { committed, .. })
            | Some(LayoutRecord::Contiguous { committed, .. }) => {
                *committed = true;
                Ok(())
            }
            _ => Err(STATUS_ERR_TYPE),
        }
    }

    fn query_extent(&self, datatype: RawDatatype) -> NativeResult<usize> {
        let layouts = self.layouts.lock();
        Self::extent_locked(&layouts, datatype)
    }

    fn register_custom_op(&self, func: ReduceFn, commutative: bool) -> NativeResult<RawOp> {
        self.check_live()?;
        let handle = self.next_op.fetch_add(1, Ordering::Relaxed);
        self.ops.insert(handle, OpRecord { func, commutative });
        self.metrics.ops_registered.fetch_add(1, Ordering::Relaxed);
        log::debug!("[NATIVE] registered custom op {handle} (commutative: {commutative})");
        Ok(RawOp(handle))
    }

    fn free_op(&self, op: RawOp) {
        if self.finalized() {
            log::trace!("[NATIVE] skipping op free after shutdown: {}", op.0);
            return;
        }
        if self.ops.remove(&op.0).is_some() {
            self.metrics.ops_freed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn free_layout(&self, datatype: RawDatatype) {
        if self.finalized() {
            log::trace!("[NATIVE] skipping layout free after shutdown: {}", datatype.0);
            return;
        }
        let mut layouts = self.layouts.lock();
        if let Ok(index) = usize::try_from(datatype.0 - FIRST_DERIVED_DATATYPE) {
            if let Some(slot) = layouts.get_mut(index) {
                if !matches!(slot, LayoutRecord::Freed) {
                    *slot = LayoutRecord::Freed;
                    self.metrics.layouts_freed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn alloc(&self, bytes: usize) -> Option<NonNull<u8>> {
        if self.finalized() {
            self.metrics.allocs_denied.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let bytes = bytes.max(1);
        // Reserve from the budget before touching malloc.
        let mut budget = self.alloc_budget.load(Ordering::Relaxed);
        loop {
            if budget == usize::MAX {
                break;
            }
            if budget < bytes {
                self.metrics.allocs_denied.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            match self.alloc_budget.compare_exchange_weak(
                budget,
                budget - bytes,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => budget = actual,
            }
        }
        // SAFETY: malloc with a non-zero size; the result is checked for
        // null below and ownership is handed to the caller.
        let ptr = unsafe { libc::malloc(bytes) };
        let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
            self.metrics.allocs_denied.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        self.allocs.insert(ptr.as_ptr() as usize, bytes);
        self.metrics.native_allocs.fetch_add(1, Ordering::Relaxed);
        Some(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        if self.finalized() {
            log::trace!("[NATIVE] skipping memory free after shutdown");
            return;
        }
        if let Some((_, bytes)) = self.allocs.remove(&(ptr.as_ptr() as usize)) {
            let budget = self.alloc_budget.load(Ordering::Relaxed);
            if budget != usize::MAX {
                self.alloc_budget.fetch_add(bytes, Ordering::Relaxed);
            }
            self.metrics.native_frees.fetch_add(1, Ordering::Relaxed);
        }
        // SAFETY: caller guarantees ptr came from `alloc` (malloc) above and
        // is not used again.
        unsafe { libc::free(ptr.as_ptr().cast()) };
    }

    fn finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        if !self.finalized.swap(true, Ordering::AcqRel) {
            log::info!("[NATIVE] transport shut down; release paths disabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::{DT_FLOAT32, DT_INT32};
    use std::ffi::{c_int, c_void};

    unsafe extern "C" fn noop_reduce(
        _invec: *mut c_void,
        _inoutvec: *mut c_void,
        _len: *const c_int,
        _datatype: *const RawDatatype,
    ) {
    }

    #[test]
    fn test_builtin_extents() {
        let t = LoopbackTransport::new();
        assert_eq!(t.query_extent(DT_INT32), Ok(4));
        assert_eq!(t.query_extent(DT_FLOAT64), Ok(8));
        assert_eq!(t.query_extent(DT_BYTE), Ok(1));
        assert_eq!(t.query_extent(DT_WCHAR), Ok(4));
    }

    #[test]
    fn test_struct_layout_build_and_commit() {
        let t = LoopbackTransport::new();
        let dt = t
            .build_struct_layout(&[1, 11], &[0, 4], &[DT_INT32, DT_FLOAT32])
            .unwrap();
        assert!(!dt.is_predefined());
        t.commit_layout(dt).unwrap();
        // 4 bytes of i32 + 11 f32 starting at offset 4.
        assert_eq!(t.query_extent(dt), Ok(4 + 11 * 4));
        assert_eq!(t.metrics().snapshot().commits, 1);
    }

    #[test]
    fn test_contiguous_layout_extent() {
        let t = LoopbackTransport::new();
        let dt = t.build_contiguous_layout(16, DT_BYTE).unwrap();
        t.commit_layout(dt).unwrap();
        assert_eq!(t.query_extent(dt), Ok(16));
    }

    #[test]
    fn test_unknown_handle_rejected() {
        let t = LoopbackTransport::new();
        assert_eq!(t.query_extent(RawDatatype(999)), Err(STATUS_ERR_TYPE));
        assert_eq!(
            t.build_contiguous_layout(4, RawDatatype(999)),
            Err(STATUS_ERR_TYPE)
        );
    }

    #[test]
    fn test_freed_layout_is_unresolvable() {
        let t = LoopbackTransport::new();
        let dt = t.build_contiguous_layout(4, DT_BYTE).unwrap();
        t.commit_layout(dt).unwrap();
        t.free_layout(dt);
        assert_eq!(t.query_extent(dt), Err(STATUS_ERR_TYPE));
        assert_eq!(t.metrics().snapshot().layouts_freed, 1);
    }

    #[test]
    fn test_custom_op_lifecycle() {
        let t = LoopbackTransport::new();
        let op = t.register_custom_op(noop_reduce, true).unwrap();
        assert!(!op.is_predefined());
        assert!(t.op_function(op).is_some());
        t.free_op(op);
        assert!(t.op_function(op).is_none());
        assert_eq!(t.metrics().snapshot().ops_freed, 1);
    }

    #[test]
    fn test_alloc_budget_exhaustion() {
        let t = LoopbackTransport::with_alloc_budget(8);
        let ptr = t.alloc(8).expect("within budget");
        assert!(t.alloc(1).is_none());
        // SAFETY: ptr came from t.alloc above.
        unsafe { t.free(ptr) };
        // Budget returned; allocation succeeds again.
        let ptr = t.alloc(4).expect("budget restored");
        // SAFETY: ptr came from t.alloc above.
        unsafe { t.free(ptr) };
        assert_eq!(t.metrics().snapshot().allocs_denied, 1);
    }

    #[test]
    fn test_shutdown_disables_operations() {
        let t = LoopbackTransport::new();
        let op = t.register_custom_op(noop_reduce, true).unwrap();
        t.shutdown();
        assert!(t.finalized());
        // Release paths are skipped, not attempted.
        t.free_op(op);
        assert_eq!(t.metrics().snapshot().ops_freed, 0);
        // New registrations are refused with the finalized code.
        assert_eq!(
            t.register_custom_op(noop_reduce, true),
            Err(STATUS_ERR_FINALIZED)
        );
        assert!(t.alloc(16).is_none());
    }
}
