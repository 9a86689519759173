// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hmpi project

//! Process-wide descriptor registry.
//!
//! The registry memoizes one [`TypeDescriptor`] per distinct host type and
//! guarantees that a derived layout is committed to the native transport at
//! most once. Miss-handling runs under a single exclusive lock, so
//! concurrent first-use of the same type is serialized: exactly one caller
//! builds and commits, everyone else observes the cached value.

use super::descriptor::{FieldLayout, ScalarKind, TypeDescriptor};
use super::layout::{DataLayout, Packed, Resolution};
use crate::error::{Error, Result};
use crate::ffi::RawDatatype;
use crate::transport::{self, Transport};
use parking_lot::Mutex;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

pub(crate) struct RegistryInner {
    /// Memoized resolutions; `None` entries record types with no wire
    /// representation so the verdict is also computed only once.
    cache: HashMap<TypeId, Option<Arc<TypeDescriptor>>>,
}

/// Resolution context handed to [`DataLayout::resolve`].
///
/// Holds the registry lock for the whole resolution, including recursion
/// into field element types, so nested first-use cannot race and nothing is
/// committed twice.
pub struct LayoutCx<'a> {
    transport: &'a Arc<dyn Transport>,
    inner: &'a mut RegistryInner,
}

impl LayoutCx<'_> {
    /// Memoized descriptor of `T`, building and committing on first use.
    pub fn descriptor<T: DataLayout>(&mut self) -> Resolution {
        let key = TypeId::of::<T>();
        if let Some(hit) = self.inner.cache.get(&key) {
            return Ok(hit.clone());
        }
        let built = T::resolve(self)?;
        if built.is_none() {
            log::debug!(
                "[TYPE] no wire representation for {}",
                std::any::type_name::<T>()
            );
        }
        self.inner.cache.insert(key, built.clone());
        Ok(built)
    }

    /// Build and commit a struct-like layout for `T` from resolved fields.
    ///
    /// Called by derived [`DataLayout`] impls once every field element has
    /// resolved successfully.
    pub fn struct_layout<T: 'static>(&mut self, fields: Vec<FieldLayout>) -> Resolution {
        let counts: Vec<i32> = fields.iter().map(|f| f.count as i32).collect();
        let offsets: Vec<usize> = fields.iter().map(|f| f.offset).collect();
        let types: Vec<RawDatatype> = fields.iter().map(|f| f.element.handle()).collect();

        let handle = self
            .transport
            .build_struct_layout(&counts, &offsets, &types)
            .map_err(|code| Error::native(code, "build_struct_layout"))?;
        self.transport
            .commit_layout(handle)
            .map_err(|code| Error::native(code, "commit_layout"))?;

        log::debug!(
            "[TYPE] committed struct layout {} for {} ({} fields)",
            handle.0,
            std::any::type_name::<T>(),
            fields.len()
        );
        Ok(Some(Arc::new(TypeDescriptor::structure::<T>(
            handle, fields,
        ))))
    }

    /// Descriptor for a builtin tag. No native calls: predefined tags are
    /// born committed.
    pub(crate) fn scalar<T: 'static>(
        &mut self,
        kind: ScalarKind,
        tag: RawDatatype,
        extent: usize,
    ) -> Resolution {
        Ok(Some(Arc::new(TypeDescriptor::new_scalar::<T>(
            kind, tag, extent,
        ))))
    }

    /// Build and commit an opaque blob layout of exactly `size_of::<T>()`
    /// bytes: contiguous raw bytes with no internal structure.
    pub(crate) fn opaque_blob<T: 'static>(&mut self) -> Resolution {
        let extent = std::mem::size_of::<T>();
        let handle = self
            .transport
            .build_contiguous_layout(extent, crate::ffi::DT_BYTE)
            .map_err(|code| Error::native(code, "build_contiguous_layout"))?;
        self.transport
            .commit_layout(handle)
            .map_err(|code| Error::native(code, "commit_layout"))?;

        log::debug!(
            "[TYPE] committed {}-byte opaque blob for {}",
            extent,
            std::any::type_name::<T>()
        );
        Ok(Some(Arc::new(TypeDescriptor::blob::<T>(handle, extent))))
    }

    /// Extent the transport reports for a predefined tag.
    pub(crate) fn native_extent(&self, tag: RawDatatype) -> Result<usize> {
        self.transport
            .query_extent(tag)
            .map_err(|code| Error::native(code, "query_extent"))
    }
}

/// Process-wide cache of committed layout descriptors.
pub struct DatatypeRegistry {
    transport: Arc<dyn Transport>,
    inner: Mutex<RegistryInner>,
}

impl DatatypeRegistry {
    /// Registry bound to `transport`, with builtin descriptors seeded.
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        let registry = Self {
            transport,
            inner: Mutex::new(RegistryInner {
                cache: HashMap::new(),
            }),
        };
        registry.seed()?;
        Ok(registry)
    }

    /// Seed descriptors for every builtin host type, exactly once.
    fn seed(&self) -> Result<()> {
        self.descriptor::<i8>()?;
        self.descriptor::<i16>()?;
        self.descriptor::<i32>()?;
        self.descriptor::<i64>()?;
        self.descriptor::<u8>()?;
        self.descriptor::<u16>()?;
        self.descriptor::<u32>()?;
        self.descriptor::<u64>()?;
        self.descriptor::<f32>()?;
        self.descriptor::<f64>()?;
        self.descriptor::<char>()?;
        self.descriptor::<Packed>()?;
        self.descriptor::<isize>()?;
        self.descriptor::<usize>()?;
        self.descriptor::<i128>()?;
        self.descriptor::<u128>()?;
        log::debug!("[TYPE] builtin descriptors seeded");
        Ok(())
    }

    /// Memoized descriptor of `T`.
    ///
    /// `Ok(None)` means the type has no wire representation (not an error);
    /// `Err` carries a fatal native failure.
    pub fn descriptor<T: DataLayout>(&self) -> Resolution {
        let mut inner = self.inner.lock();
        let mut cx = LayoutCx {
            transport: &self.transport,
            inner: &mut *inner,
        };
        cx.descriptor::<T>()
    }

    /// Byte extent of `T`'s descriptor, if it has one.
    pub fn extent_of<T: DataLayout>(&self) -> Result<Option<usize>> {
        Ok(self.descriptor::<T>()?.map(|d| d.extent()))
    }

    /// The transport this registry commits layouts to.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Process-wide registry bound to the global transport.
    ///
    /// # Panics
    ///
    /// Panics if first-time builtin seeding fails; nothing in the binding
    /// can proceed without the registry.
    #[must_use]
    pub fn global() -> &'static DatatypeRegistry {
        static GLOBAL: OnceLock<DatatypeRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            DatatypeRegistry::new(transport::global())
                .unwrap_or_else(|e| panic!("datatype registry initialization failed: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use std::sync::Arc;

    fn fresh() -> (Arc<LoopbackTransport>, DatatypeRegistry) {
        let lb = Arc::new(LoopbackTransport::new());
        let reg = DatatypeRegistry::new(lb.clone()).expect("seeding");
        (lb, reg)
    }

    #[test]
    fn test_primitive_extents_match_host_sizes() {
        let (_lb, reg) = fresh();
        assert_eq!(reg.extent_of::<i8>().unwrap(), Some(1));
        assert_eq!(reg.extent_of::<i16>().unwrap(), Some(2));
        assert_eq!(reg.extent_of::<i32>().unwrap(), Some(4));
        assert_eq!(reg.extent_of::<i64>().unwrap(), Some(8));
        assert_eq!(reg.extent_of::<u8>().unwrap(), Some(1));
        assert_eq!(reg.extent_of::<u16>().unwrap(), Some(2));
        assert_eq!(reg.extent_of::<u32>().unwrap(), Some(4));
        assert_eq!(reg.extent_of::<u64>().unwrap(), Some(8));
        assert_eq!(reg.extent_of::<f32>().unwrap(), Some(4));
        assert_eq!(reg.extent_of::<f64>().unwrap(), Some(8));
        assert_eq!(
            reg.extent_of::<char>().unwrap(),
            Some(std::mem::size_of::<char>())
        );
        assert_eq!(
            reg.extent_of::<isize>().unwrap(),
            Some(std::mem::size_of::<isize>())
        );
        assert_eq!(
            reg.extent_of::<usize>().unwrap(),
            Some(std::mem::size_of::<usize>())
        );
        assert_eq!(reg.extent_of::<i128>().unwrap(), Some(16));
        assert_eq!(reg.extent_of::<u128>().unwrap(), Some(16));
    }

    #[test]
    fn test_bool_has_no_descriptor() {
        let (_lb, reg) = fresh();
        assert!(reg.descriptor::<bool>().unwrap().is_none());
    }

    #[test]
    fn test_builtin_resolution_is_memoized() {
        let (_lb, reg) = fresh();
        let a = reg.descriptor::<f64>().unwrap().unwrap();
        let b = reg.descriptor::<f64>().unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_packed_marker_maps_to_packed_tag() {
        let (_lb, reg) = fresh();
        let desc = reg.descriptor::<Packed>().unwrap().unwrap();
        assert_eq!(desc.handle(), crate::ffi::DT_PACKED);
        assert_eq!(desc.extent(), 1);
        assert_eq!(desc.scalar(), Some(ScalarKind::Packed));
    }

    #[test]
    fn test_extended_precision_blobs() {
        let (lb, reg) = fresh();
        let desc = reg.descriptor::<i128>().unwrap().unwrap();
        assert_eq!(desc.extent(), 16);
        assert_eq!(desc.scalar(), None);
        assert!(desc.fields().is_empty());
        // Blob layouts really went through the native transport.
        assert_eq!(lb.query_extent(desc.handle()), Ok(16));
    }

    #[test]
    fn test_array_resolution_yields_element_descriptor() {
        let (_lb, reg) = fresh();
        let arr = reg.descriptor::<[f32; 11]>().unwrap().unwrap();
        let elem = reg.descriptor::<f32>().unwrap().unwrap();
        assert!(Arc::ptr_eq(&arr, &elem));
    }
}
