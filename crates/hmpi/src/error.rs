// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hmpi project

//! Error model for the binding core.
//!
//! Two failure families exist. A type that cannot be structurally described
//! is *not* an error: resolution returns `Ok(None)` and higher layers take a
//! packing fallback. A non-success code from the native transport *is* an
//! error, fatal to the current operation, with no retry path.

use crate::ffi::{self, ReturnStatus};
use std::fmt;

/// Errors returned by datatype, reduction and buffer operations.
#[derive(Debug)]
pub enum Error {
    /// A native transport call returned a non-success code.
    ///
    /// `context` names the call that failed; the code maps to a description
    /// via [`ffi::describe`].
    Native {
        /// Raw status code from the transport.
        code: ReturnStatus,
        /// The native call that produced the code.
        context: &'static str,
    },

    /// Both the native and the general allocator failed to provide memory.
    OutOfMemory,
}

impl Error {
    /// Classify a raw native status code observed during `context`.
    #[must_use]
    pub fn native(code: ReturnStatus, context: &'static str) -> Self {
        Error::Native { code, context }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Native { code, context } => {
                write!(
                    f,
                    "native call failed: {} (code {}: {})",
                    context,
                    code,
                    ffi::describe(*code)
                )
            }
            Error::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for Error {}

/// Result type for binding operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::STATUS_ERR_TYPE;

    #[test]
    fn test_native_error_display() {
        let err = Error::native(STATUS_ERR_TYPE, "commit_layout");
        let msg = err.to_string();
        assert!(msg.contains("commit_layout"));
        assert!(msg.contains("invalid datatype handle"));
    }

    #[test]
    fn test_out_of_memory_display() {
        assert_eq!(Error::OutOfMemory.to_string(), "out of memory");
    }
}
