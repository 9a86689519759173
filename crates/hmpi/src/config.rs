// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hmpi project

//! Global configuration - single source of truth.
//!
//! Compile-time constants live here; the runtime knobs are read from the
//! environment once and can be overridden programmatically. **Never hardcode
//! these values elsewhere.**

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

/// Default capacity (bytes) of a freshly grown [`crate::NativeBuffer`].
///
/// Matches the smallest payload worth staging through the native allocator;
/// anything below this grows immediately on first write anyway.
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// Geometric growth factor for buffer reallocation.
///
/// Growth reserves `max(required, capacity * GROWTH_FACTOR)` bytes so a
/// sequence of small writes amortizes to O(1) copies per byte.
pub const GROWTH_FACTOR: usize = 2;

/// Runtime configuration, initialized once from the environment.
struct RuntimeConfig {
    /// Prefer the native transport allocator for buffer memory.
    native_alloc: AtomicBool,
}

static CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

fn config() -> &'static RuntimeConfig {
    CONFIG.get_or_init(|| {
        // HMPI_NATIVE_ALLOC=0 forces the general allocator for all buffers.
        let native_alloc = std::env::var("HMPI_NATIVE_ALLOC")
            .map(|v| v != "0")
            .unwrap_or(true);
        if !native_alloc {
            log::info!("[CONFIG] native allocator disabled via HMPI_NATIVE_ALLOC=0");
        }
        RuntimeConfig {
            native_alloc: AtomicBool::new(native_alloc),
        }
    })
}

/// Whether buffers should try the native transport allocator first.
#[must_use]
pub fn native_alloc_enabled() -> bool {
    config().native_alloc.load(Ordering::Relaxed)
}

/// Override the native-allocator preference at runtime.
pub fn set_native_alloc(enabled: bool) {
    config().native_alloc.store(enabled, Ordering::Relaxed);
}
