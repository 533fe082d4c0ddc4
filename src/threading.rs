//! Worker-pool management and the serial/parallel cutoff.
//!
//! CPU materializations fan out over a process-wide rayon pool once the
//! element count reaches [`parallel_threshold`] (default 2500 — below that
//! the dispatch overhead outweighs the work). The pool size can be
//! recalibrated at runtime with [`optimise_threads`], which times a fixed
//! workload at each candidate worker count and installs the fastest.
//!
//! Parallel fan-out splits the flat index range divide-and-conquer style and
//! joins before the evaluation returns; nothing leaks past a call.

use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "parallel")]
use std::sync::{Arc, OnceLock, RwLock};

/// Default element-count cutoff below which evaluation stays serial.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 2500;

static PARALLEL_THRESHOLD: AtomicUsize = AtomicUsize::new(DEFAULT_PARALLEL_THRESHOLD);

/// Current serial/parallel element-count cutoff.
pub fn parallel_threshold() -> usize {
    PARALLEL_THRESHOLD.load(Ordering::Relaxed)
}

/// Replace the serial/parallel cutoff. The default (2500 elements) is a
/// heuristic; workloads with expensive per-element operators may profit from
/// a lower value.
pub fn set_parallel_threshold(elements: usize) {
    PARALLEL_THRESHOLD.store(elements.max(1), Ordering::Relaxed);
}

#[cfg(feature = "parallel")]
fn pool_slot() -> &'static RwLock<Option<Arc<rayon::ThreadPool>>> {
    static POOL: OnceLock<RwLock<Option<Arc<rayon::ThreadPool>>>> = OnceLock::new();
    POOL.get_or_init(|| RwLock::new(None))
}

#[cfg(feature = "parallel")]
fn build_pool(threads: usize) -> Option<Arc<rayon::ThreadPool>> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .ok()
        .map(Arc::new)
}

/// The evaluation pool: the calibrated one when [`optimise_threads`] has
/// run, otherwise a default-sized pool built on first use.
#[cfg(feature = "parallel")]
pub(crate) fn pool() -> Option<Arc<rayon::ThreadPool>> {
    if let Some(p) = pool_slot().read().ok()?.as_ref() {
        return Some(Arc::clone(p));
    }
    let built = build_pool(0)?; // 0 = rayon's default (one per logical core)
    let mut slot = pool_slot().write().ok()?;
    let entry = slot.get_or_insert(built);
    Some(Arc::clone(entry))
}

/// Run `f` over `0..len` split across the worker pool.
///
/// Ranges are halved recursively until they drop under the threshold (or the
/// per-worker share), then executed; the call joins all workers before
/// returning. `f` must be safe to run on disjoint ranges concurrently —
/// every caller writes disjoint destination elements.
#[cfg(feature = "parallel")]
pub(crate) fn run_split<F>(len: usize, grain: usize, f: F)
where
    F: Fn(std::ops::Range<usize>) + Sync,
{
    let Some(pool) = pool() else {
        f(0..len);
        return;
    };
    let workers = pool.current_num_threads().max(1);
    // Aim for a few chunks per worker without dropping below the cutoff.
    let min_len = grain.max(len / (4 * workers)).max(1);
    pool.install(|| split_recurse(0..len, min_len, &f));
}

#[cfg(feature = "parallel")]
fn split_recurse<F>(range: std::ops::Range<usize>, min_len: usize, f: &F)
where
    F: Fn(std::ops::Range<usize>) + Sync,
{
    let len = range.end - range.start;
    if len <= min_len {
        f(range);
        return;
    }
    let mid = range.start + len / 2;
    let (left, right) = (range.start..mid, mid..range.end);
    rayon::join(
        || split_recurse(left, min_len, f),
        || split_recurse(right, min_len, f),
    );
}

#[cfg(not(feature = "parallel"))]
pub(crate) fn run_split<F>(len: usize, _grain: usize, f: F)
where
    F: Fn(std::ops::Range<usize>) + Sync,
{
    f(0..len);
}

/// Calibrate the worker count.
///
/// Times a fixed element-wise workload for roughly `time_per_thread` seconds
/// at every worker count from 1 to the logical core count, installs the
/// fastest pool, and returns the chosen count. With `verbose` the per-count
/// timings go to the log.
pub fn optimise_threads(time_per_thread: f64, verbose: bool) -> usize {
    #[cfg(not(feature = "parallel"))]
    {
        let _ = (time_per_thread, verbose);
        1
    }
    #[cfg(feature = "parallel")]
    {
        use std::time::{Duration, Instant};

        const WORK: usize = 1 << 20;
        let budget = Duration::from_secs_f64(time_per_thread.max(0.001));
        let max_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let mut best = (1usize, f64::INFINITY);
        for threads in 1..=max_threads {
            let Some(pool) = build_pool(threads) else {
                continue;
            };
            let mut data = vec![0.0f64; WORK];
            let out = crate::eval::SendPtrMut(data.as_mut_ptr());
            let mut iters = 0u32;
            let start = Instant::now();
            while start.elapsed() < budget {
                pool.install(|| {
                    split_recurse(0..WORK, WORK / (4 * threads).max(1), &|r| {
                        let out = out;
                        let p = out.0;
                        for i in r {
                            // Cheap but not optimizable-away arithmetic.
                            unsafe { *p.add(i) = (*p.add(i) + 1.0) * 0.5 };
                        }
                    });
                });
                iters += 1;
            }
            let per_iter = start.elapsed().as_secs_f64() / iters.max(1) as f64;
            if verbose {
                log::info!("optimise_threads: {threads} workers -> {per_iter:.3e} s/iter");
            }
            if per_iter < best.1 {
                best = (threads, per_iter);
            }
        }

        if let Some(pool) = build_pool(best.0) {
            if let Ok(mut slot) = pool_slot().write() {
                *slot = Some(pool);
            }
        }
        best.0
    }
}
