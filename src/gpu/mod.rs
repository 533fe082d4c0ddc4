//! CUDA backend: buffers, the library stream, and the JIT kernel path.
//!
//! Element-wise expressions on GPU arrays are compiled to CUDA source on
//! first use: the expression tree renders to one fused kernel whose leaves
//! read `srcPointers[k][kernelIndex]`, nvrtc compiles it to PTX, and the
//! module is cached process-wide keyed by the full source text. The cache
//! never evicts; a process computes a finite set of expression shapes.
//!
//! All allocations, copies and launches go through one lazily created,
//! non-blocking stream. Two GPU operations are ordered by stream semantics;
//! the host only synchronizes when it actually reads device data.
//!
//! Compile failures are fatal for the operation (`KernelCompile`, no CPU
//! fallback); launch failures surface as `Launch` and may leave the
//! destination partially written — lifetime invariants still hold.

use crate::expr::Expr;
use crate::ops::{DeviceFragment, MapKernel};
use crate::scalar::ScalarValue;
use crate::{Array, ArrayError, Device, Dtype, Result};
use cudarc::driver::{CudaContext, CudaFunction, CudaModule, CudaSlice, CudaStream, LaunchConfig};
use cudarc::nvrtc::compile_ptx;
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Arc, Mutex, OnceLock};

/// Threads per block; smaller launches use one block of exactly `n` threads.
const BLOCK_SIZE: usize = 512;

fn context() -> Result<&'static Arc<CudaContext>> {
    static CTX: OnceLock<Option<Arc<CudaContext>>> = OnceLock::new();
    CTX.get_or_init(|| CudaContext::new(0).ok())
        .as_ref()
        .ok_or(ArrayError::DeviceUnavailable)
}

/// The library stream. Created non-blocking on first GPU use, freed at
/// process exit.
pub(crate) fn stream() -> Result<&'static Arc<CudaStream>> {
    static STREAM: OnceLock<Option<Arc<CudaStream>>> = OnceLock::new();
    STREAM
        .get_or_init(|| {
            let ctx = context().ok()?;
            ctx.new_stream().ok()
        })
        .as_ref()
        .ok_or(ArrayError::DeviceUnavailable)
}

/// A device allocation. Mutation goes through the stream; the lock only
/// guards the handle, not device contents (aliased device writes follow the
/// same external-synchronization contract as host buffers).
pub(crate) struct GpuBuf {
    slice: Mutex<CudaSlice<u8>>,
}

impl GpuBuf {
    pub(crate) fn alloc(bytes: usize) -> Result<Self> {
        let stream = stream()?;
        let slice = stream
            .alloc_zeros::<u8>(bytes.max(1))
            .map_err(|_| ArrayError::OutOfMemory)?;
        Ok(Self {
            slice: Mutex::new(slice),
        })
    }

    /// Device address of byte `offset`.
    fn device_addr(&self, offset: usize) -> Result<u64> {
        let stream = stream()?;
        let guard = self.slice.lock().unwrap_or_else(|e| e.into_inner());
        let (addr, _len) = guard.device_ptr(stream);
        Ok(addr + offset as u64)
    }
}

/// Host → device, synchronous with respect to the library stream.
pub(crate) unsafe fn memcpy_htod(
    dst: &GpuBuf,
    dst_off: usize,
    src: *const u8,
    bytes: usize,
) -> Result<()> {
    let stream = stream()?;
    let host = std::slice::from_raw_parts(src, bytes);
    let mut guard = dst.slice.lock().unwrap_or_else(|e| e.into_inner());
    let mut view = guard.slice_mut(dst_off..dst_off + bytes);
    stream
        .memcpy_htod(host, &mut view)
        .map_err(|e| ArrayError::Launch {
            what: format!("host-to-device copy: {e}"),
        })
}

/// Device → host. Synchronizes the stream before returning: the caller is
/// about to read the bytes.
pub(crate) unsafe fn memcpy_dtoh(
    dst: *mut u8,
    src: &GpuBuf,
    src_off: usize,
    bytes: usize,
) -> Result<()> {
    let stream = stream()?;
    let guard = src.slice.lock().unwrap_or_else(|e| e.into_inner());
    let view = guard.slice(src_off..src_off + bytes);
    let host = std::slice::from_raw_parts_mut(dst, bytes);
    stream
        .memcpy_dtoh(&view, host)
        .map_err(|e| ArrayError::Launch {
            what: format!("device-to-host copy: {e}"),
        })?;
    stream.synchronize().map_err(|e| ArrayError::Launch {
        what: format!("stream synchronize: {e}"),
    })
}

/// Device → device on the library stream.
pub(crate) unsafe fn memcpy_dtod(
    dst: &GpuBuf,
    dst_off: usize,
    src: &GpuBuf,
    src_off: usize,
    bytes: usize,
) -> Result<()> {
    let stream = stream()?;
    let src_guard = src.slice.lock().unwrap_or_else(|e| e.into_inner());
    let src_view = src_guard.slice(src_off..src_off + bytes);
    let mut dst_guard = dst.slice.lock().unwrap_or_else(|e| e.into_inner());
    let mut dst_view = dst_guard.slice_mut(dst_off..dst_off + bytes);
    stream
        .memcpy_dtod(&src_view, &mut dst_view)
        .map_err(|e| ArrayError::Launch {
            what: format!("device-to-device copy: {e}"),
        })
}

// ---------------------------------------------------------------------------
// Kernel source assembly
// ---------------------------------------------------------------------------

fn ctype(dtype: Dtype) -> &'static str {
    match dtype {
        Dtype::Int32 => "int",
        Dtype::Int64 => "long long",
        Dtype::Float32 => "float",
        Dtype::Float64 => "double",
        Dtype::CFloat32 => "densor_cplx<float>",
        Dtype::CFloat64 => "densor_cplx<double>",
        _ => "void",
    }
}

/// Minimal complex arithmetic for complex-typed kernels; real kernels skip
/// the header entirely.
const COMPLEX_HEADER: &str = r#"
template<typename R> struct densor_cplx {
    R re, im;
    __device__ densor_cplx(R r = 0, R i = 0) : re(r), im(i) {}
};
template<typename R> __device__ densor_cplx<R> operator+(densor_cplx<R> a, densor_cplx<R> b) {
    return densor_cplx<R>(a.re + b.re, a.im + b.im);
}
template<typename R> __device__ densor_cplx<R> operator-(densor_cplx<R> a, densor_cplx<R> b) {
    return densor_cplx<R>(a.re - b.re, a.im - b.im);
}
template<typename R> __device__ densor_cplx<R> operator-(densor_cplx<R> a) {
    return densor_cplx<R>(-a.re, -a.im);
}
template<typename R> __device__ densor_cplx<R> operator*(densor_cplx<R> a, densor_cplx<R> b) {
    return densor_cplx<R>(a.re * b.re - a.im * b.im, a.re * b.im + a.im * b.re);
}
template<typename R> __device__ densor_cplx<R> operator/(densor_cplx<R> a, densor_cplx<R> b) {
    R d = b.re * b.re + b.im * b.im;
    return densor_cplx<R>((a.re * b.re + a.im * b.im) / d, (a.im * b.re - a.re * b.im) / d);
}
"#;

fn scalar_literal(v: ScalarValue, dtype: Dtype) -> String {
    let c = v.to_canonical();
    match dtype {
        Dtype::Int32 | Dtype::Int64 => format!("(({}){})", ctype(dtype), c.re as i64),
        Dtype::Float32 | Dtype::Float64 => format!("(({}){:e})", ctype(dtype), c.re),
        Dtype::CFloat32 | Dtype::CFloat64 => {
            format!("{}({:e}, {:e})", ctype(dtype), c.re, c.im)
        }
        _ => "0".to_string(),
    }
}

/// Render the expression body; array leaves become
/// `srcPointers[k][kernelIndex]` in visit order.
fn render_expr(expr: &Expr, dtype: Dtype, next_leaf: &mut usize) -> String {
    match expr {
        Expr::Scalar(v) => scalar_literal(*v, dtype),
        Expr::Leaf(_) => {
            let k = *next_leaf;
            *next_leaf += 1;
            format!("srcPointers[{k}][kernelIndex]")
        }
        Expr::Unary(op, x) => {
            let inner = render_expr(x, dtype, next_leaf);
            match op.device_fragment(dtype) {
                DeviceFragment::Prefix(sym) => format!("({sym}{inner})"),
                DeviceFragment::Call(name) => format!("{name}({inner})"),
                DeviceFragment::Infix(_) => unreachable!("unary operators are prefix or call"),
            }
        }
        Expr::Binary(op, x, y) => {
            let a = render_expr(x, dtype, next_leaf);
            let b = render_expr(y, dtype, next_leaf);
            match op.device_fragment(dtype) {
                DeviceFragment::Infix(sym) => format!("({a} {sym} {b})"),
                DeviceFragment::Call(name) => format!("{name}({a}, {b})"),
                DeviceFragment::Prefix(_) => unreachable!("binary operators are infix or call"),
            }
        }
        Expr::Map(_, _) => unreachable!("map expressions assemble their own kernel"),
    }
}

/// Full kernel source for a fused element-wise expression.
fn assemble_expr_source(expr: &Expr, dtype: Dtype) -> String {
    let mut next_leaf = 0usize;
    let body = render_expr(expr, dtype, &mut next_leaf);
    let complex = if dtype.is_complex() { COMPLEX_HEADER } else { "" };
    let t = ctype(dtype);
    format!(
        r#"__constant__ int DENSOR_MAX_DIMS = {max_dims};
{complex}
typedef {t} T;

extern "C" __global__ void densor_kernel(T *__restrict__ dstData,
                                         const T *const *__restrict__ srcPointers,
                                         long long numArrays,
                                         long long size) {{
    const long long kernelIndex = blockDim.x * blockIdx.x + threadIdx.x;
    if (kernelIndex < size) {{
        dstData[kernelIndex] = {body};
    }}
}}
"#,
        max_dims = crate::MAX_DIMS,
    )
}

/// Full kernel source for an N-ary map kernel with a user device body.
fn assemble_map_source(kernel: &MapKernel, nargs: usize, dtype: Dtype) -> Result<String> {
    let body = kernel
        .device_body()
        .ok_or_else(|| ArrayError::InvalidMapOperand {
            what: format!("map kernel `{}` has no device body", kernel.name()),
        })?;
    let complex = if dtype.is_complex() { COMPLEX_HEADER } else { "" };
    let t = ctype(dtype);
    let args: Vec<String> = (0..nargs).map(|i| format!("T val{i}")).collect();
    let reads: Vec<String> = (0..nargs)
        .map(|i| format!("srcPointers[{i}][kernelIndex]"))
        .collect();
    Ok(format!(
        r#"__constant__ int DENSOR_MAX_DIMS = {max_dims};
{complex}
typedef {t} T;

__device__ T densor_map({arg_list}) {{
    {body}
}}

extern "C" __global__ void densor_kernel(T *__restrict__ dstData,
                                         const T *const *__restrict__ srcPointers,
                                         long long numArrays,
                                         long long size) {{
    const long long kernelIndex = blockDim.x * blockIdx.x + threadIdx.x;
    if (kernelIndex < size) {{
        dstData[kernelIndex] = densor_map({read_list});
    }}
}}
"#,
        max_dims = crate::MAX_DIMS,
        arg_list = args.join(", "),
        read_list = reads.join(", "),
    ))
}

// ---------------------------------------------------------------------------
// Compile cache and launch
// ---------------------------------------------------------------------------

struct Compiled {
    #[allow(dead_code)]
    module: Arc<CudaModule>,
    function: CudaFunction,
}

/// Process-global source → program cache; grows, never shrinks.
fn kernel_cache() -> &'static Mutex<HashMap<String, Arc<Compiled>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Arc<Compiled>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn compile_cached(source: &str) -> Result<Arc<Compiled>> {
    let mut cache = kernel_cache().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(hit) = cache.get(source) {
        return Ok(Arc::clone(hit));
    }

    log::debug!("jit: compiling kernel ({} bytes of source)", source.len());
    let ptx = compile_ptx(source).map_err(|e| ArrayError::KernelCompile {
        what: format!("nvrtc: {e}"),
    })?;
    let ctx = context()?;
    let module = ctx.load_module(ptx).map_err(|e| ArrayError::KernelCompile {
        what: format!("module load: {e}"),
    })?;
    let function = module
        .load_function("densor_kernel")
        .map_err(|e| ArrayError::KernelCompile {
            what: format!("entry point: {e}"),
        })?;

    let compiled = Arc::new(Compiled { module, function });
    cache.insert(source.to_string(), Arc::clone(&compiled));
    Ok(compiled)
}

/// Grow-only device scratch holding the operand pointer table.
fn pointer_scratch() -> &'static Mutex<Option<CudaSlice<u64>>> {
    static SCRATCH: OnceLock<Mutex<Option<CudaSlice<u64>>>> = OnceLock::new();
    SCRATCH.get_or_init(|| Mutex::new(None))
}

/// Upload the operand pointer table, growing the scratch by doubling.
fn upload_pointers(pointers: &[u64]) -> Result<u64> {
    let stream = stream()?;
    let mut guard = pointer_scratch().lock().unwrap_or_else(|e| e.into_inner());
    let need = pointers.len().max(1);
    let grow = match guard.as_ref() {
        Some(slice) => slice.len() < need,
        None => true,
    };
    if grow {
        let mut cap = guard.as_ref().map_or(16usize, |s| s.len());
        while cap < need {
            cap <<= 1;
        }
        *guard = Some(
            stream
                .alloc_zeros::<u64>(cap)
                .map_err(|_| ArrayError::OutOfMemory)?,
        );
    }
    let slice = guard.as_mut().unwrap_or_else(|| unreachable!());
    let mut view = slice.slice_mut(0..pointers.len());
    stream
        .memcpy_htod(pointers, &mut view)
        .map_err(|e| ArrayError::Launch {
            what: format!("pointer table upload: {e}"),
        })?;
    let (addr, _len) = slice.device_ptr(stream);
    Ok(addr)
}

fn launch(function: &CudaFunction, dst_addr: u64, table_addr: u64, narrays: usize, n: usize) -> Result<()> {
    // 1..512 threads in a single block for small launches, 512-thread
    // blocks otherwise.
    let (threads, blocks) = if n < BLOCK_SIZE {
        (n.max(1), 1)
    } else {
        (BLOCK_SIZE, n.div_ceil(BLOCK_SIZE))
    };
    let config = LaunchConfig {
        grid_dim: (blocks as u32, 1, 1),
        block_dim: (threads as u32, 1, 1),
        shared_mem_bytes: 0,
    };

    let narrays = narrays as i64;
    let size = n as i64;
    let mut args: Vec<*mut c_void> = vec![
        &dst_addr as *const u64 as *mut c_void,
        &table_addr as *const u64 as *mut c_void,
        &narrays as *const i64 as *mut c_void,
        &size as *const i64 as *mut c_void,
    ];

    log::debug!("jit: launch {blocks}x{threads} over {n} elements");
    unsafe {
        function
            .launch_raw(config, &mut args)
            .map_err(|e| ArrayError::Launch {
                what: format!("kernel launch: {e}"),
            })
    }
}

/// A GPU-resident, trivial-contiguous image of `a` in `dtype`.
fn device_operand(a: &Array, dtype: Dtype) -> Result<Array> {
    if a.device() == Device::Gpu
        && a.dtype() == dtype
        && a.stride().is_trivial()
        && a.stride().is_contiguous()
    {
        Ok(a.clone())
    } else {
        a.copy_as(Some(dtype), Some(Device::Gpu))
    }
}

fn operand_addr(a: &Array) -> Result<u64> {
    let width = a.dtype().size_of();
    a.storage()?.gpu_buf().device_addr(a.start() * width)
}

/// Evaluate a fused element-wise expression on the GPU.
pub(crate) fn eval_expr(expr: &Expr, dst: &mut Array) -> Result<()> {
    let dtype = dst.dtype();
    let n = dst.size();
    if !(dst.stride().is_trivial() && dst.stride().is_contiguous()) {
        return Err(ArrayError::ShapeMismatch {
            what: "GPU destination must be trivial-contiguous".to_string(),
        });
    }

    // Collapse every array leaf to a trivial device image of the result
    // dtype; the kernel then reads each with the flat element index.
    let mut leaves = Vec::new();
    expr.collect_leaves(&mut leaves);
    let operands: Vec<Array> = leaves
        .iter()
        .map(|a| device_operand(a, dtype))
        .collect::<Result<_>>()?;

    let source = assemble_expr_source(expr, dtype);
    let compiled = compile_cached(&source)?;

    let pointers: Vec<u64> = operands
        .iter()
        .map(|a| operand_addr(a))
        .collect::<Result<_>>()?;
    let table_addr = upload_pointers(&pointers)?;
    let dst_addr = operand_addr(dst)?;

    launch(&compiled.function, dst_addr, table_addr, operands.len(), n)
}

/// Evaluate an N-ary map kernel on the GPU.
pub(crate) fn eval_map(kernel: &MapKernel, operands: &[Array], dst: &mut Array) -> Result<()> {
    let dtype = dst.dtype();
    let n = dst.size();

    let staged: Vec<Array> = operands
        .iter()
        .map(|a| device_operand(a, dtype))
        .collect::<Result<_>>()?;

    let source = assemble_map_source(kernel, staged.len(), dtype)?;
    let compiled = compile_cached(&source)?;

    let pointers: Vec<u64> = staged
        .iter()
        .map(|a| operand_addr(a))
        .collect::<Result<_>>()?;
    let table_addr = upload_pointers(&pointers)?;
    let dst_addr = operand_addr(dst)?;

    launch(&compiled.function, dst_addr, table_addr, staged.len(), n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_source_shape() {
        let a = Array::from_slice(&[1.0f64, 2.0]).unwrap();
        let b = Array::from_slice(&[3.0f64, 4.0]).unwrap();
        let e = &a + &b;
        let src = assemble_expr_source(&e, Dtype::Float64);
        assert!(src.contains("srcPointers[0][kernelIndex]"));
        assert!(src.contains("srcPointers[1][kernelIndex]"));
        assert!(src.contains("kernelIndex < size"));
        assert!(src.contains("typedef double T;"));
    }

    #[test]
    fn test_scalar_leaves_render_as_literals() {
        let a = Array::from_slice(&[1.0f32, 2.0]).unwrap();
        let e = &a * 2.0f32;
        let src = assemble_expr_source(&e, Dtype::Float32);
        assert!(src.contains("srcPointers[0][kernelIndex]"));
        assert!(!src.contains("srcPointers[1]"));
        assert!(src.contains("typedef float T;"));
    }

    #[test]
    fn test_unary_fragment_picks_width() {
        let a = Array::from_slice(&[1.0f32, 2.0]).unwrap();
        let src32 = assemble_expr_source(&a.exp(), Dtype::Float32);
        assert!(src32.contains("expf("));
        let b = Array::from_slice(&[1.0f64, 2.0]).unwrap();
        let src64 = assemble_expr_source(&b.exp(), Dtype::Float64);
        assert!(src64.contains("exp("));
        assert!(!src64.contains("expf("));
    }

    #[test]
    fn test_complex_source_carries_header() {
        use num_complex::Complex64 as C;
        let a = Array::from_slice(&[C::new(1.0, 2.0)]).unwrap();
        let b = Array::from_slice(&[C::new(3.0, 4.0)]).unwrap();
        let src = assemble_expr_source(&(&a * &b), Dtype::CFloat64);
        assert!(src.contains("densor_cplx"));
        assert!(src.contains("typedef densor_cplx<double> T;"));
    }

    #[test]
    fn test_identical_expressions_share_source() {
        let a = Array::from_slice(&[1.0f64]).unwrap();
        let b = Array::from_slice(&[2.0f64]).unwrap();
        let s1 = assemble_expr_source(&(&a + &b), Dtype::Float64);
        let s2 = assemble_expr_source(&(&b + &a), Dtype::Float64);
        // Same tree shape, same source: the cache key collapses them.
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_map_source_requires_device_body() {
        let k = MapKernel::new("hostonly", |v| v[0]);
        assert!(matches!(
            assemble_map_source(&k, 1, Dtype::Float64),
            Err(ArrayError::InvalidMapOperand { .. })
        ));
        let k = k.with_device_body("return val0 * val0;");
        let src = assemble_map_source(&k, 1, Dtype::Float64).unwrap();
        assert!(src.contains("densor_map(T val0)"));
        assert!(src.contains("return val0 * val0;"));
    }
}
