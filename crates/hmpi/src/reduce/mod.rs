// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hmpi project

//! Reduction operations: classification, predefined tags, and synthesis.
//!
//! The native transport ships a fixed set of predefined reduction tags, each
//! legal only for certain operand classes. [`ReductionOp::build`] maps a
//! combining function onto that matrix: a canonical combiner on a permitted
//! class resolves to the predefined tag (no owned resource); everything else
//! is synthesized by registering a monomorphized native callback.
//!
//! A canonical operator kind that the classification disallows does *not*
//! fail: it silently falls through to synthesis. Callers relying on, say,
//! summing raw bytes get a working custom operation instead of an error;
//! this mirrors the transport's established observable behavior.

mod combine;
mod trampoline;

pub use combine::{
    BitwiseAnd, BitwiseOr, BitwiseXor, Combiner, LogicalAnd, LogicalOr, Maximum, Minimum, Product,
    Sum,
};

use crate::datatype::{DataLayout, DatatypeRegistry, ScalarKind, TypeDescriptor};
use crate::error::{Error, Result};
use crate::ffi::{
    RawOp, ReduceFn, OP_BAND, OP_BOR, OP_BXOR, OP_LAND, OP_LOR, OP_MAX, OP_MIN, OP_PROD, OP_SUM,
};
use crate::transport::Transport;
use std::fmt;
use std::sync::Arc;
use trampoline::reduce_trampoline;

/// Operator kinds with predefined native tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Sum,
    Product,
    Min,
    Max,
    LogicalAnd,
    LogicalOr,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
}

impl OpKind {
    /// The predefined native tag for this kind.
    #[must_use]
    pub fn raw_tag(self) -> RawOp {
        match self {
            OpKind::Sum => OP_SUM,
            OpKind::Product => OP_PROD,
            OpKind::Min => OP_MIN,
            OpKind::Max => OP_MAX,
            OpKind::LogicalAnd => OP_LAND,
            OpKind::LogicalOr => OP_LOR,
            OpKind::BitwiseAnd => OP_BAND,
            OpKind::BitwiseOr => OP_BOR,
            OpKind::BitwiseXor => OP_BXOR,
        }
    }
}

/// Operand classification against the transport's reduction support matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceClass {
    /// Fixed-width and pointer-sized integers.
    Integer,
    /// IEEE floating point.
    Float,
    /// Raw bytes.
    Byte,
    /// Everything else; no predefined tags apply.
    Other,
}

impl ReduceClass {
    /// Classify a resolved descriptor.
    #[must_use]
    pub fn of(descriptor: &TypeDescriptor) -> Self {
        match descriptor.scalar() {
            Some(
                ScalarKind::Int8
                | ScalarKind::Int16
                | ScalarKind::Int32
                | ScalarKind::Int64
                | ScalarKind::UInt16
                | ScalarKind::UInt32
                | ScalarKind::UInt64
                | ScalarKind::Long
                | ScalarKind::ULong,
            ) => ReduceClass::Integer,
            Some(ScalarKind::Float32 | ScalarKind::Float64) => ReduceClass::Float,
            Some(ScalarKind::Byte) => ReduceClass::Byte,
            Some(ScalarKind::WideChar | ScalarKind::Packed) | None => ReduceClass::Other,
        }
    }

    /// Whether the predefined tag for `kind` is legal for this class.
    #[must_use]
    pub fn permits(self, kind: OpKind) -> bool {
        match self {
            ReduceClass::Integer => true,
            ReduceClass::Float => matches!(
                kind,
                OpKind::Sum | OpKind::Product | OpKind::Min | OpKind::Max
            ),
            ReduceClass::Byte => matches!(
                kind,
                OpKind::BitwiseAnd | OpKind::BitwiseOr | OpKind::BitwiseXor
            ),
            ReduceClass::Other => false,
        }
    }
}

enum Backing {
    /// Process-wide constant tag; nothing to release.
    Predefined,
    /// Owned custom operation, released exactly once on drop.
    Custom { transport: Arc<dyn Transport> },
}

/// A reduction operation usable in collective calls.
///
/// Either a reference to a predefined native tag or an owned custom
/// operation backed by a monomorphized callback. Custom handles are freed
/// on drop unless the transport has already been shut down.
pub struct ReductionOp {
    raw: RawOp,
    backing: Backing,
}

impl ReductionOp {
    /// Build the operation for combiner `C` over element type `T`.
    ///
    /// Classification of `T` gates the predefined path; see the module docs
    /// for the silent fallback to synthesis.
    pub fn build<T, C>(registry: &DatatypeRegistry) -> Result<Self>
    where
        T: DataLayout + Copy,
        C: Combiner<T>,
    {
        let class = match registry.descriptor::<T>()? {
            Some(descriptor) => ReduceClass::of(&descriptor),
            None => ReduceClass::Other,
        };

        if let Some(kind) = C::KIND {
            if class.permits(kind) {
                return Ok(Self {
                    raw: kind.raw_tag(),
                    backing: Backing::Predefined,
                });
            }
            log::debug!(
                "[REDUCE] {:?} has no predefined tag for {:?} operands ({}), synthesizing",
                kind,
                class,
                std::any::type_name::<T>()
            );
        }

        let func: ReduceFn = reduce_trampoline::<T, C>;
        let transport = registry.transport().clone();
        let raw = transport
            .register_custom_op(func, C::COMMUTATIVE)
            .map_err(|code| Error::native(code, "register_custom_op"))?;
        Ok(Self {
            raw,
            backing: Backing::Custom { transport },
        })
    }

    /// Addition over `T`.
    pub fn sum<T>(registry: &DatatypeRegistry) -> Result<Self>
    where
        T: DataLayout + Copy,
        Sum: Combiner<T>,
    {
        Self::build::<T, Sum>(registry)
    }

    /// Multiplication over `T`.
    pub fn product<T>(registry: &DatatypeRegistry) -> Result<Self>
    where
        T: DataLayout + Copy,
        Product: Combiner<T>,
    {
        Self::build::<T, Product>(registry)
    }

    /// Minimum over `T`.
    pub fn min<T>(registry: &DatatypeRegistry) -> Result<Self>
    where
        T: DataLayout + Copy,
        Minimum: Combiner<T>,
    {
        Self::build::<T, Minimum>(registry)
    }

    /// Maximum over `T`.
    pub fn max<T>(registry: &DatatypeRegistry) -> Result<Self>
    where
        T: DataLayout + Copy,
        Maximum: Combiner<T>,
    {
        Self::build::<T, Maximum>(registry)
    }

    /// Native handle to pass into collective calls.
    #[inline]
    #[must_use]
    pub fn raw(&self) -> RawOp {
        self.raw
    }

    /// Whether this operation resolved to a predefined tag.
    #[inline]
    #[must_use]
    pub fn is_predefined(&self) -> bool {
        matches!(self.backing, Backing::Predefined)
    }
}

impl fmt::Debug for ReductionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReductionOp")
            .field("raw", &self.raw)
            .field("predefined", &self.is_predefined())
            .finish()
    }
}

impl Drop for ReductionOp {
    fn drop(&mut self) {
        if let Backing::Custom { transport } = &self.backing {
            // Teardown check before touching the native free routine.
            if transport.finalized() {
                log::trace!("[REDUCE] leaking custom op {} after shutdown", self.raw.0);
                return;
            }
            transport.free_op(self.raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::OP_SUM;
    use crate::transport::LoopbackTransport;
    use std::sync::Arc;

    fn fresh() -> (Arc<LoopbackTransport>, DatatypeRegistry) {
        let lb = Arc::new(LoopbackTransport::new());
        let reg = DatatypeRegistry::new(lb.clone()).expect("seeding");
        (lb, reg)
    }

    #[test]
    fn test_classification_matrix() {
        assert!(ReduceClass::Integer.permits(OpKind::BitwiseXor));
        assert!(ReduceClass::Integer.permits(OpKind::Sum));
        assert!(ReduceClass::Float.permits(OpKind::Sum));
        assert!(!ReduceClass::Float.permits(OpKind::BitwiseXor));
        assert!(!ReduceClass::Float.permits(OpKind::LogicalAnd));
        assert!(ReduceClass::Byte.permits(OpKind::BitwiseAnd));
        assert!(!ReduceClass::Byte.permits(OpKind::Sum));
        assert!(!ReduceClass::Other.permits(OpKind::Min));
    }

    #[test]
    fn test_classify_descriptors() {
        let (_lb, reg) = fresh();
        let class = |d: Arc<crate::TypeDescriptor>| ReduceClass::of(&d);
        assert_eq!(
            class(reg.descriptor::<i32>().unwrap().unwrap()),
            ReduceClass::Integer
        );
        assert_eq!(
            class(reg.descriptor::<usize>().unwrap().unwrap()),
            ReduceClass::Integer
        );
        assert_eq!(
            class(reg.descriptor::<f32>().unwrap().unwrap()),
            ReduceClass::Float
        );
        assert_eq!(
            class(reg.descriptor::<u8>().unwrap().unwrap()),
            ReduceClass::Byte
        );
        assert_eq!(
            class(reg.descriptor::<char>().unwrap().unwrap()),
            ReduceClass::Other
        );
        assert_eq!(
            class(reg.descriptor::<i128>().unwrap().unwrap()),
            ReduceClass::Other
        );
    }

    #[test]
    fn test_predefined_sum_over_integers() {
        let (lb, reg) = fresh();
        let op = ReductionOp::sum::<i32>(&reg).unwrap();
        assert!(op.is_predefined());
        assert_eq!(op.raw(), OP_SUM);
        drop(op);
        // Predefined tags are never registered or freed natively.
        let snap = lb.metrics().snapshot();
        assert_eq!(snap.ops_registered, 0);
        assert_eq!(snap.ops_freed, 0);
    }

    #[test]
    fn test_byte_sum_falls_back_to_synthesis() {
        let (lb, reg) = fresh();
        // Sum is canonical, but the byte class only permits bitwise tags;
        // the request silently synthesizes instead of failing.
        let op = ReductionOp::sum::<u8>(&reg).unwrap();
        assert!(!op.is_predefined());
        assert!(!op.raw().is_predefined());
        assert_eq!(lb.metrics().snapshot().ops_registered, 1);
        drop(op);
        assert_eq!(lb.metrics().snapshot().ops_freed, 1);
    }

    #[test]
    fn test_user_combiner_always_synthesizes() {
        struct Gcd;
        impl Combiner<u64> for Gcd {
            fn combine(a: u64, b: u64) -> u64 {
                let (mut a, mut b) = (a, b);
                while b != 0 {
                    let r = a % b;
                    a = b;
                    b = r;
                }
                a
            }
        }

        let (lb, reg) = fresh();
        let op = ReductionOp::build::<u64, Gcd>(&reg).unwrap();
        assert!(!op.is_predefined());
        let (func, commutative) = lb.op_function(op.raw()).expect("registered");
        assert!(commutative);

        let src: [u64; 2] = [12, 9];
        let mut dst: [u64; 2] = [18, 6];
        let len: std::ffi::c_int = 2;
        let dt = crate::ffi::DT_UINT64;
        // SAFETY: both arrays hold 2 contiguous u64 values.
        unsafe {
            func(
                src.as_ptr() as *mut std::ffi::c_void,
                dst.as_mut_ptr().cast(),
                &len,
                &dt,
            );
        }
        assert_eq!(dst, [6, 3]);
    }

    #[test]
    fn test_custom_op_leaks_after_shutdown() {
        let (lb, reg) = fresh();
        let op = ReductionOp::sum::<u8>(&reg).unwrap();
        lb.shutdown();
        drop(op);
        assert_eq!(lb.metrics().snapshot().ops_freed, 0);
    }
}
