//! The dense array value.
//!
//! An [`Array`] is a storage handle plus view metadata: extent, stride, a
//! `start` offset into the storage, and two tags (`is_scalar`, `is_child`).
//! Storages are shared: [`Clone`] produces an *alias*, not a copy, and
//! mutation through one handle is visible through every other handle of the
//! same storage. Deep copies are always explicit ([`Array::copy`],
//! [`Array::copy_as`]).
//!
//! Aliasing is the value-semantics compromise the engine is built around:
//! subscripting hands out borrowing children in O(1), and assignment rebinds
//! rather than copies. Callers that need an independent buffer say so.

use crate::dtype::{Device, Dtype};
use crate::extent::{Extent, Stride};
use crate::kernel;
use crate::scalar::{Scalar, ScalarValue};
use crate::storage::Storage;
use crate::{ArrayError, Result};
use num_complex::Complex64;
use std::sync::Arc;

/// A dense N-dimensional array with shared-ownership storage.
pub struct Array {
    storage: Option<Arc<Storage>>,
    /// Element offset of this view's first element from the storage origin.
    start: usize,
    extent: Extent,
    stride: Stride,
    dtype: Dtype,
    device: Device,
    is_scalar: bool,
    is_child: bool,
}

impl Default for Array {
    /// A default-constructed array has no storage; almost every operation on
    /// it fails with [`ArrayError::Uninitialized`] until it is assigned to.
    fn default() -> Self {
        Self {
            storage: None,
            start: 0,
            extent: Extent::scalar(),
            stride: Stride::default(),
            dtype: Dtype::None,
            device: Device::Cpu,
            is_scalar: false,
            is_child: false,
        }
    }
}

impl Clone for Array {
    /// Reference copy: the clone shares this array's storage. Mutations
    /// through either handle are visible through the other. Use
    /// [`Array::copy`] for an independent buffer.
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            start: self.start,
            extent: self.extent.clone(),
            stride: self.stride.clone(),
            dtype: self.dtype,
            device: self.device,
            is_scalar: self.is_scalar,
            is_child: self.is_child,
        }
    }
}

impl Array {
    /// Allocate a fresh array of `extent` with trivial layout.
    pub fn new(extent: Extent, dtype: Dtype, device: Device) -> Result<Self> {
        let storage = Storage::alloc(extent.size(), dtype, device)?;
        let stride = Stride::from_extent(&extent);
        Ok(Self {
            storage: Some(Arc::new(storage)),
            start: 0,
            is_scalar: extent.size() == 1 && extent.ndim() <= 1,
            is_child: false,
            extent,
            stride,
            dtype,
            device,
        })
    }

    /// A 1-element scalar-tagged array holding `value`.
    pub fn from_scalar<V: Into<ScalarValue>>(
        value: V,
        dtype: Option<Dtype>,
        device: Option<Device>,
    ) -> Result<Self> {
        let value = value.into();
        let dtype = dtype.unwrap_or_else(|| value.dtype());
        let device = device.unwrap_or(Device::Cpu);
        let mut arr = Array::new(Extent::new(&[1])?, dtype, device)?;
        arr.is_scalar = true;
        arr.write_canonical(arr.start, value.to_canonical())?;
        Ok(arr)
    }

    /// Reference-or-convert construction from an existing array: an alias
    /// when `dtype`/`device` match (or are omitted), otherwise a one-shot
    /// converting deep copy.
    pub fn from_array(other: &Array, dtype: Option<Dtype>, device: Option<Device>) -> Result<Self> {
        other.storage()?;
        let dtype = dtype.unwrap_or(other.dtype);
        let device = device.unwrap_or(other.device);
        if dtype == other.dtype && device == other.device {
            Ok(other.clone())
        } else {
            other.copy_as(Some(dtype), Some(device))
        }
    }

    /// A 1-D host array holding a copy of `data`.
    pub fn from_slice<T: Scalar>(data: &[T]) -> Result<Self> {
        let arr = Array::new(Extent::new(&[data.len() as i64])?, T::DTYPE, Device::Cpu)?;
        let dst = arr.storage()?.host_ptr::<T>();
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
        Ok(arr)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[inline]
    pub fn ndim(&self) -> usize {
        self.extent.ndim()
    }

    #[inline]
    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    #[inline]
    pub fn stride(&self) -> &Stride {
        &self.stride
    }

    #[inline]
    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    #[inline]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Synonym for [`Array::device`].
    #[inline]
    pub fn location(&self) -> Device {
        self.device
    }

    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.is_scalar
    }

    #[inline]
    pub fn is_child(&self) -> bool {
        self.is_child
    }

    /// True once the array has storage (i.e. it is not default-constructed).
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.storage.is_some()
    }

    /// Length of the leading dimension (1 for scalars).
    #[inline]
    pub fn len(&self) -> usize {
        if self.extent.ndim() == 0 {
            1
        } else {
            self.extent.dim(0) as usize
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Total element count.
    #[inline]
    pub fn size(&self) -> usize {
        self.extent.size()
    }

    pub(crate) fn storage(&self) -> Result<&Arc<Storage>> {
        self.storage.as_ref().ok_or(ArrayError::Uninitialized)
    }

    #[inline]
    pub(crate) fn start(&self) -> usize {
        self.start
    }

    /// Typed pointer to this view's first element (host arrays only).
    #[inline]
    pub(crate) fn ptr<T: Scalar>(&self) -> Result<*mut T> {
        Ok(unsafe { self.storage()?.host_ptr::<T>().add(self.start) })
    }

    pub(crate) fn set_scalar_tag(&mut self, is_scalar: bool) {
        self.is_scalar = is_scalar;
    }

    pub(crate) fn set_stride(&mut self, stride: Stride) {
        debug_assert_eq!(stride.ndim(), self.extent.ndim());
        self.stride = stride;
    }

    /// Number of distinct live handles on this array's storage.
    pub fn reference_count(&self) -> usize {
        self.storage.as_ref().map_or(0, Arc::strong_count)
    }

    /// True when `self` and `other` name the same storage.
    pub fn shares_storage(&self, other: &Array) -> bool {
        match (&self.storage, &other.storage) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Assignment and subscripting
    // ------------------------------------------------------------------

    /// The `=` operator of the array model. Three cases:
    ///
    /// 1. `self` is uninitialized: becomes a reference copy of `other`
    ///    (shares storage).
    /// 2. `self` is a *child* (subscript view): `other` must have the same
    ///    element count; data is copied in place into the existing storage
    ///    window. The child never rebinds to a different storage.
    /// 3. otherwise: `self` releases its reference and rebinds to `other`'s
    ///    storage — afterwards mutation through `self` is visible through
    ///    `other`. This is the aliasing rule; use [`Array::copy`] to opt out.
    pub fn assign(&mut self, other: &Array) -> Result<()> {
        other.storage()?;
        if !self.is_initialized() {
            *self = other.clone();
            return Ok(());
        }
        if self.is_child {
            if self.size() != other.size() {
                return Err(ArrayError::ShapeMismatch {
                    what: format!(
                        "assignment of {} elements into a {}-element subscript view",
                        other.size(),
                        self.size()
                    ),
                });
            }
            return copy_region(other, self);
        }
        *self = other.clone();
        Ok(())
    }

    /// Assign a scalar value. For a child view this is permitted only when
    /// the child itself is scalar; an independent array rebinds to a fresh
    /// scalar (keeping its dtype when it has one).
    pub fn assign_scalar<V: Into<ScalarValue>>(&mut self, value: V) -> Result<()> {
        let value = value.into();
        if self.is_child {
            if !self.is_scalar {
                return Err(ArrayError::ShapeMismatch {
                    what: format!(
                        "scalar assignment into a {}-element subscript view",
                        self.size()
                    ),
                });
            }
            return self.write_canonical(self.start, value.to_canonical());
        }
        let dtype = if self.is_initialized() {
            Some(self.dtype)
        } else {
            None
        };
        *self = Array::from_scalar(value, dtype, Some(self.device))?;
        Ok(())
    }

    /// Sub-array at `index` along the leading axis.
    ///
    /// The result is a *child*: it borrows this array's storage (O(1), no
    /// allocation), drops the leading dimension, and keeps the layout flags
    /// only where the remaining layout is still provably trivial.
    pub fn subscript(&self, index: i64) -> Result<Array> {
        let storage = self.storage()?.clone();
        if self.extent.ndim() == 0 {
            return Err(ArrayError::OutOfBounds {
                index,
                len: 0,
            });
        }
        let lead = self.extent.dim(0);
        if index < 0 || index >= lead {
            return Err(ArrayError::OutOfBounds { index, len: lead });
        }

        let child_extent = Extent::new(&self.extent.as_slice()[1..])?;
        let child_stride = Stride::from_steps(&child_extent, &self.stride.as_slice()[1..]);
        let start = (self.start as i64 + index * self.stride.step(0)) as usize;
        let is_scalar = child_extent.size() == 1 && child_extent.ndim() <= 1;
        Ok(Array {
            storage: Some(storage),
            start,
            extent: child_extent,
            stride: child_stride,
            dtype: self.dtype,
            device: self.device,
            is_scalar,
            is_child: true,
        })
    }

    // ------------------------------------------------------------------
    // Element access
    // ------------------------------------------------------------------

    /// Read the element at a full multi-index.
    ///
    /// Host reads from a GPU array synchronize the library stream first.
    pub fn get(&self, index: &[i64]) -> Result<ScalarValue> {
        let off = self.element_offset(index)?;
        let c = self.read_canonical(off)?;
        scalar_value_of(self.dtype, c)
    }

    /// Write the element at a full multi-index, converting to this dtype.
    pub fn set<V: Into<ScalarValue>>(&mut self, index: &[i64], value: V) -> Result<()> {
        let off = self.element_offset(index)?;
        self.write_canonical(off, value.into().to_canonical())
    }

    /// The value of a scalar-shaped array.
    pub fn item(&self) -> Result<ScalarValue> {
        if self.size() != 1 {
            return Err(ArrayError::ShapeMismatch {
                what: format!("item() on a {}-element array", self.size()),
            });
        }
        let c = self.read_canonical(self.start)?;
        scalar_value_of(self.dtype, c)
    }

    fn element_offset(&self, index: &[i64]) -> Result<usize> {
        if index.len() != self.ndim() {
            return Err(ArrayError::ShapeMismatch {
                what: format!("index {index:?} for extent {}", self.extent),
            });
        }
        let mut off = self.start as i64;
        for (axis, &i) in index.iter().enumerate() {
            let len = self.extent.dim(axis);
            if i < 0 || i >= len {
                return Err(ArrayError::OutOfBounds { index: i, len });
            }
            off += i * self.stride.step(axis);
        }
        Ok(off as usize)
    }

    /// Logical elements in row-major order, converted to `T`.
    pub fn to_vec<T: Scalar>(&self) -> Result<Vec<T>> {
        let flat = self.copy_as(Some(T::DTYPE), Some(Device::Cpu))?;
        let n = flat.size();
        let ptr = flat.ptr::<T>()?;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(unsafe { *ptr.add(i) });
        }
        Ok(out)
    }

    fn read_canonical(&self, origin_offset: usize) -> Result<Complex64> {
        let storage = self.storage()?;
        match self.device {
            Device::Cpu => with_dtype!(self.dtype, T => {
                let v = unsafe { *storage.host_ptr::<T>().add(origin_offset) };
                Ok(v.to_canonical())
            }),
            #[cfg(feature = "gpu")]
            Device::Gpu => with_dtype!(self.dtype, T => {
                let mut v = T::zero();
                let width = self.dtype.size_of();
                crate::gpu::memcpy_dtoh(
                    &mut v as *mut T as *mut u8,
                    storage.gpu_buf(),
                    origin_offset * width,
                    width,
                )?;
                Ok(v.to_canonical())
            }),
            #[cfg(not(feature = "gpu"))]
            Device::Gpu => Err(ArrayError::DeviceUnavailable),
        }
    }

    fn write_canonical(&mut self, origin_offset: usize, value: Complex64) -> Result<()> {
        let storage = self.storage()?;
        match self.device {
            Device::Cpu => with_dtype!(self.dtype, T => {
                unsafe { *storage.host_ptr::<T>().add(origin_offset) = T::from_canonical(value) };
                Ok(())
            }),
            #[cfg(feature = "gpu")]
            Device::Gpu => with_dtype!(self.dtype, T => {
                let v = T::from_canonical(value);
                let width = self.dtype.size_of();
                crate::gpu::memcpy_htod(
                    storage.gpu_buf(),
                    origin_offset * width,
                    &v as *const T as *const u8,
                    width,
                )
            }),
            #[cfg(not(feature = "gpu"))]
            Device::Gpu => Err(ArrayError::DeviceUnavailable),
        }
    }

    // ------------------------------------------------------------------
    // Copies
    // ------------------------------------------------------------------

    /// Deep copy: a fresh, trivial-and-contiguous storage with the same
    /// logical contents. The canonical way to collapse non-trivial strides.
    pub fn copy(&self) -> Result<Array> {
        self.copy_as(None, None)
    }

    /// Deep copy, optionally converting element type and/or device.
    pub fn copy_as(&self, dtype: Option<Dtype>, device: Option<Device>) -> Result<Array> {
        self.storage()?;
        let dst_dtype = dtype.unwrap_or(self.dtype);
        let dst_device = device.unwrap_or(self.device);
        if dst_dtype.is_none() {
            return Err(ArrayError::InvalidDtype {
                what: format!("copy to {dst_dtype}"),
            });
        }

        let mut dst = Array::new(self.extent.clone(), dst_dtype, dst_device)?;
        dst.is_scalar = self.is_scalar;

        // Same dtype and a gap-free trivial layout: one bulk transfer
        // covers every device direction.
        if dst_dtype == self.dtype && self.stride.is_trivial() && self.stride.is_contiguous() {
            unsafe {
                Storage::copy_elements(
                    dst.storage()?,
                    0,
                    self.storage()?,
                    self.start,
                    self.size(),
                )?;
            }
            return Ok(dst);
        }

        // Everything else walks elements on the host, staging device data
        // as needed.
        let src_host = self.to_host_view()?;
        let mut dst_host = if dst_device == Device::Cpu {
            dst.clone()
        } else {
            Array::new(self.extent.clone(), dst_dtype, Device::Cpu)?
        };
        convert_region(&src_host, &mut dst_host)?;
        if dst_device != Device::Cpu {
            unsafe {
                Storage::copy_elements(dst.storage()?, 0, dst_host.storage()?, 0, dst.size())?;
            }
        }
        Ok(dst)
    }

    /// A host-resident alias (or staged copy, for GPU arrays) with this
    /// array's exact view metadata.
    fn to_host_view(&self) -> Result<Array> {
        if self.device == Device::Cpu {
            return Ok(self.clone());
        }
        // Stage the whole origin allocation so the view metadata (start,
        // strides) stays valid on the host side.
        let storage = self.storage()?;
        let staged = Array::new(
            Extent::new(&[storage.len().max(1) as i64])?,
            self.dtype,
            Device::Cpu,
        )?;
        unsafe {
            Storage::copy_elements(staged.storage()?, 0, storage, 0, storage.len())?;
        }
        let mut view = staged;
        view.start = self.start;
        view.extent = self.extent.clone();
        view.stride = self.stride.clone();
        view.is_scalar = self.is_scalar;
        view.device = Device::Cpu;
        Ok(view)
    }

    // ------------------------------------------------------------------
    // In-place shape and fill operations
    // ------------------------------------------------------------------

    /// Fill every element with `value`, converted to this array's dtype.
    /// Respects the current stride.
    pub fn fill<V: Into<ScalarValue>>(&mut self, value: V) -> Result<()> {
        let value = value.into().to_canonical();
        match self.device {
            Device::Cpu => {
                let dims = kernel::dims_of(&self.extent);
                let steps = self.stride.as_slice().to_vec();
                with_dtype!(self.dtype, T => {
                    let v = T::from_canonical(value);
                    let base = self.ptr::<T>()?;
                    kernel::for_each_offset(&dims, &[&steps], |offs| unsafe {
                        *base.offset(offs[0]) = v;
                    })?;
                    Ok(())
                })
            }
            Device::Gpu => {
                if self.stride.is_trivial() && self.stride.is_contiguous() {
                    // Fill a host staging buffer and upload in one transfer.
                    let mut staged = Array::new(self.extent.clone(), self.dtype, Device::Cpu)?;
                    staged.fill_canonical(value)?;
                    unsafe {
                        Storage::copy_elements(
                            self.storage()?,
                            self.start,
                            staged.storage()?,
                            0,
                            self.size(),
                        )
                    }
                } else {
                    // Strided device view: per-element writes, stream-ordered.
                    let dims = kernel::dims_of(&self.extent);
                    let steps = self.stride.as_slice().to_vec();
                    let start = self.start as i64;
                    let mut offsets = Vec::with_capacity(self.size());
                    kernel::for_each_offset(&dims, &[&steps], |offs| {
                        offsets.push((start + offs[0] as i64) as usize);
                    })?;
                    for off in offsets {
                        self.write_canonical(off, value)?;
                    }
                    Ok(())
                }
            }
        }
    }

    fn fill_canonical(&mut self, value: Complex64) -> Result<()> {
        let n = self.size();
        with_dtype!(self.dtype, T => {
            let v = T::from_canonical(value);
            let base = self.ptr::<T>()?;
            for i in 0..n {
                unsafe { *base.add(i) = v };
            }
            Ok(())
        })
    }

    /// Pure variant of [`Array::fill`].
    pub fn filled<V: Into<ScalarValue>>(&self, value: V) -> Result<Array> {
        let mut out = self.copy()?;
        out.fill(value)?;
        Ok(out)
    }

    /// Change the shape without touching data. Valid only while the layout
    /// is trivial and contiguous (copy first otherwise); one [`crate::AUTO`]
    /// entry is resolved against the element count.
    pub fn reshape(&mut self, target: &[i64]) -> Result<()> {
        self.storage()?;
        let new_extent = self.extent.reshaped(target)?;
        if new_extent == self.extent {
            return Ok(());
        }
        if !(self.stride.is_trivial() && self.stride.is_contiguous()) {
            return Err(ArrayError::InvalidReshape {
                what: "layout is not trivial-contiguous; copy() first".to_string(),
            });
        }
        self.stride = Stride::from_extent(&new_extent);
        self.is_scalar = new_extent.size() == 1 && new_extent.ndim() <= 1;
        self.extent = new_extent;
        Ok(())
    }

    /// Pure variant of [`Array::reshape`].
    pub fn reshaped(&self, target: &[i64]) -> Result<Array> {
        let mut out = self.clone();
        out.reshape(target)?;
        Ok(out)
    }

    /// Permute axes in place. An empty `order` reverses them. O(ndim): only
    /// metadata moves.
    pub fn transpose(&mut self, order: &[usize]) -> Result<()> {
        self.storage()?;
        self.extent = self.extent.permuted(order)?;
        self.stride = self.stride.permuted(order)?;
        Ok(())
    }

    /// Pure variant of [`Array::transpose`]; the result still aliases this
    /// array's storage.
    pub fn transposed(&self, order: &[usize]) -> Result<Array> {
        let mut out = self.clone();
        out.transpose(order)?;
        Ok(out)
    }
}

impl std::fmt::Debug for Array {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Array")
            .field("extent", &self.extent.as_slice())
            .field("dtype", &self.dtype)
            .field("device", &self.device)
            .field("is_scalar", &self.is_scalar)
            .field("is_child", &self.is_child)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

fn scalar_value_of(dtype: Dtype, c: Complex64) -> Result<ScalarValue> {
    with_dtype!(dtype, T => Ok(ScalarValue::from(<T as Scalar>::from_canonical(c))))
}

/// Copy `src` into `dst`'s existing window, element by element, converting
/// dtypes where they differ. Both sides keep their metadata.
pub(crate) fn copy_region(src: &Array, dst: &mut Array) -> Result<()> {
    if src.device() == Device::Cpu && dst.device() == Device::Cpu {
        return convert_region(src, dst);
    }
    // Device windows stage through a host copy of the source, then a
    // converted host image of the destination window is uploaded.
    let src_host = src.copy_as(Some(dst.dtype()), Some(Device::Cpu))?;
    match dst.device() {
        Device::Cpu => convert_region(&src_host, dst),
        Device::Gpu => {
            if !(dst.stride().is_trivial() && dst.stride().is_contiguous()) {
                return Err(ArrayError::ShapeMismatch {
                    what: "in-place copy into a strided GPU view".to_string(),
                });
            }
            unsafe {
                Storage::copy_elements(
                    dst.storage()?,
                    dst.start(),
                    src_host.storage()?,
                    0,
                    dst.size(),
                )
            }
        }
    }
}

/// Host-only element-wise converting copy walking both strides.
fn convert_region(src: &Array, dst: &mut Array) -> Result<()> {
    debug_assert_eq!(src.size(), dst.size());
    let dims = kernel::dims_of(dst.extent());
    let dst_steps = dst.stride().as_slice().to_vec();
    // A source with a different shape but equal element count (child
    // assignment) is walked flat through its own extent.
    let same_shape = src.extent() == dst.extent();
    let src_steps: Vec<i64> = if same_shape {
        src.stride().as_slice().to_vec()
    } else {
        Stride::from_extent(dst.extent()).as_slice().to_vec()
    };
    let src_flat = if same_shape {
        None
    } else {
        // Collapse the odd-shaped source to a flat row-major buffer first.
        Some(src.copy()?)
    };
    let src_ref = src_flat.as_ref().unwrap_or(src);

    with_dtype!(src_ref.dtype(), S => {
        with_dtype!(dst.dtype(), D => {
            let sp = src_ref.ptr::<S>()?;
            let dp = dst.ptr::<D>()?;
            kernel::for_each_offset(&dims, &[&dst_steps, &src_steps], |offs| unsafe {
                let v = *sp.offset(offs[1]);
                *dp.offset(offs[0]) = D::from_canonical(v.to_canonical());
            })?;
            Ok(())
        })
    })
}
