//! Raw device-tagged element buffers.
//!
//! A [`Storage`] owns one contiguous allocation of `len` elements of a
//! single [`Dtype`] on one [`Device`]. Arrays share storages through
//! `Arc<Storage>`; the *view base* (the `start` offset a sub-array reads
//! from) lives in each `Array`, not here, so taking a subscript is O(1) and
//! never allocates. The storage only ever frees its *origin* allocation.
//!
//! Storage moves bytes; it never converts element types. Converting copies
//! are the evaluator's job, which keeps a type-mismatched raw copy
//! unrepresentable instead of a runtime error.

use crate::dtype::{Device, Dtype};
use crate::scalar::Scalar;
use crate::{ArrayError, Result};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// One contiguous, device-tagged allocation.
pub struct Storage {
    device: Device,
    dtype: Dtype,
    len: usize,
    buf: Buffer,
}

enum Buffer {
    Host(HostBuf),
    #[cfg(feature = "gpu")]
    Gpu(crate::gpu::GpuBuf),
}

/// Host-side allocation. Hand-rolled rather than `Vec` so the buffer can be
/// mutated through shared handles: aliased in-place mutation is part of the
/// array value model, and all access goes through raw pointers anyway.
struct HostBuf {
    ptr: NonNull<u8>,
    layout: Layout,
}

// Lifetime management is Arc-based and the allocation itself is plain bytes.
// Concurrent mutation of the *contents* through aliases requires external
// synchronization; that contract is stated on `Array`.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
    /// Allocate `len` zero-initialized elements of `dtype` on `device`.
    pub(crate) fn alloc(len: usize, dtype: Dtype, device: Device) -> Result<Self> {
        if dtype.is_none() {
            return Err(ArrayError::InvalidDtype {
                what: format!("allocation of {dtype}"),
            });
        }
        let buf = match device {
            Device::Cpu => Buffer::Host(HostBuf::alloc(len, dtype)?),
            #[cfg(feature = "gpu")]
            Device::Gpu => Buffer::Gpu(crate::gpu::GpuBuf::alloc(len * dtype.size_of())?),
            #[cfg(not(feature = "gpu"))]
            Device::Gpu => return Err(ArrayError::DeviceUnavailable),
        };
        Ok(Self {
            device,
            dtype,
            len,
            buf,
        })
    }

    #[inline]
    pub(crate) fn device(&self) -> Device {
        self.device
    }

    #[inline]
    pub(crate) fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Capacity in elements, counted from the origin.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Typed pointer to the origin of a host storage.
    ///
    /// # Panics
    /// Debug-asserts that `T` matches the storage dtype and that the storage
    /// is host-resident; both are guaranteed by the dispatching callers.
    #[inline]
    pub(crate) fn host_ptr<T: Scalar>(&self) -> *mut T {
        debug_assert_eq!(T::DTYPE, self.dtype);
        match &self.buf {
            Buffer::Host(h) => h.ptr.as_ptr() as *mut T,
            #[cfg(feature = "gpu")]
            Buffer::Gpu(_) => unreachable!("host_ptr on a device storage"),
        }
    }

    /// Untyped pointer to the origin of a host storage.
    #[inline]
    pub(crate) fn host_base(&self) -> *mut u8 {
        match &self.buf {
            Buffer::Host(h) => h.ptr.as_ptr(),
            #[cfg(feature = "gpu")]
            Buffer::Gpu(_) => unreachable!("host_base on a device storage"),
        }
    }

    #[cfg(feature = "gpu")]
    pub(crate) fn gpu_buf(&self) -> &crate::gpu::GpuBuf {
        match &self.buf {
            Buffer::Gpu(g) => g,
            Buffer::Host(_) => unreachable!("gpu_buf on a host storage"),
        }
    }

    /// Copy `n` same-dtype elements between storages, any device direction.
    ///
    /// GPU-involved directions are synchronous with respect to the library
    /// stream. Offsets are in elements from each origin.
    ///
    /// # Safety
    /// Ranges must lie inside both allocations. The destination must not be
    /// concurrently read through another alias.
    pub(crate) unsafe fn copy_elements(
        dst: &Storage,
        dst_start: usize,
        src: &Storage,
        src_start: usize,
        n: usize,
    ) -> Result<()> {
        debug_assert_eq!(dst.dtype, src.dtype);
        debug_assert!(dst_start + n <= dst.len && src_start + n <= src.len);
        let width = src.dtype.size_of();
        let bytes = n * width;
        match (&src.buf, &dst.buf) {
            (Buffer::Host(s), Buffer::Host(d)) => {
                std::ptr::copy_nonoverlapping(
                    s.ptr.as_ptr().add(src_start * width),
                    d.ptr.as_ptr().add(dst_start * width),
                    bytes,
                );
                Ok(())
            }
            #[cfg(feature = "gpu")]
            (Buffer::Host(s), Buffer::Gpu(d)) => {
                crate::gpu::memcpy_htod(d, dst_start * width, s.ptr.as_ptr().add(src_start * width), bytes)
            }
            #[cfg(feature = "gpu")]
            (Buffer::Gpu(s), Buffer::Host(d)) => {
                crate::gpu::memcpy_dtoh(d.ptr.as_ptr().add(dst_start * width), s, src_start * width, bytes)
            }
            #[cfg(feature = "gpu")]
            (Buffer::Gpu(s), Buffer::Gpu(d)) => {
                crate::gpu::memcpy_dtod(d, dst_start * width, s, src_start * width, bytes)
            }
        }
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("device", &self.device)
            .field("dtype", &self.dtype)
            .field("len", &self.len)
            .finish()
    }
}

impl HostBuf {
    fn alloc(len: usize, dtype: Dtype) -> Result<Self> {
        let size = len
            .checked_mul(dtype.size_of())
            .ok_or(ArrayError::OutOfMemory)?;
        // Complex128 is the widest element; 16-byte alignment covers all six.
        let layout = Layout::from_size_align(size.max(1), 16).map_err(|_| ArrayError::OutOfMemory)?;
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(ArrayError::OutOfMemory)?;
        Ok(Self { ptr, layout })
    }
}

impl Drop for HostBuf {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}
