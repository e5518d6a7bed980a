//! Execution context and SIMT launch emulation.
//!
//! # Kernel strategy
//!
//! Every kernel in this crate is written as a per-thread body, the way a
//! device kernel is: it receives a [`ThreadIdx`] and works out from the
//! group/thread coordinates which elements it owns. [`ExecutionContext`]
//! runs such a body over a grid of `grid_dim` groups of `block_dim` threads.
//! Groups are scheduled in parallel on a dedicated `rayon` pool; the threads
//! of one group run in order on a single worker, which is what lets the
//! histogram kernel do an intra-group reduction without barriers.
//!
//! Launches complete before [`ExecutionContext::launch`] returns, so two
//! launches issued one after another on the same context are ordered.
//!
//! # Output views
//!
//! Kernels write through [`DeviceSliceMut`], a disjoint-index view of a
//! caller-owned buffer. Each launch in this crate writes every output index
//! from exactly one thread.

use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use narrowfp_common::{DiagnosticSink, KernelConfig, KernelError, RateLimitedSink, Result};
use rayon::prelude::*;

/// Alignment cap reported by [`alignment_of`].
pub const MAX_REPORTED_ALIGNMENT: usize = 256;

/// Coordinates of one device thread inside a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadIdx {
    pub block: u32,
    pub thread: u32,
    pub block_dim: u32,
    pub grid_dim: u32,
}

impl ThreadIdx {
    /// `block * block_dim + thread`.
    #[inline]
    pub fn global(&self) -> usize {
        self.block as usize * self.block_dim as usize + self.thread as usize
    }

    /// Number of threads in the whole grid (the grid-stride step).
    #[inline]
    pub fn grid_threads(&self) -> usize {
        self.grid_dim as usize * self.block_dim as usize
    }
}

/// Grid geometry for one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Number of groups.
    pub grid_dim: u32,
    /// Threads per group.
    pub block_dim: u32,
}

impl LaunchConfig {
    /// One thread per work item: `ceil(work_items / block_dim)` groups.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidArguments`] if the grid would not fit in
    /// 32 bits.
    pub fn for_elements(work_items: usize, block_dim: u32) -> Result<Self> {
        let blocks = work_items.div_ceil(block_dim.max(1) as usize);
        let grid_dim = u32::try_from(blocks).map_err(|_| KernelError::InvalidArguments {
            reason: format!("{work_items} work items need {blocks} groups, more than fit in u32"),
        })?;
        Ok(Self { grid_dim, block_dim })
    }

    /// Fixed group size with the grid capped at `max_groups`; kernels launched
    /// this way must use a grid-stride loop.
    pub fn grid_stride(work_items: usize, block_dim: u32, max_groups: u32) -> Self {
        let blocks = work_items.div_ceil(block_dim.max(1) as usize).max(1);
        let grid_dim = blocks.min(max_groups as usize) as u32;
        Self { grid_dim, block_dim }
    }

    pub fn total_threads(&self) -> usize {
        self.grid_dim as usize * self.block_dim as usize
    }
}

/// Largest power of two (capped at [`MAX_REPORTED_ALIGNMENT`]) dividing the
/// buffer's start address.
pub fn alignment_of<T>(buf: &[T]) -> usize {
    let addr = buf.as_ptr() as usize;
    if addr == 0 {
        return MAX_REPORTED_ALIGNMENT;
    }
    (1usize << addr.trailing_zeros()).min(MAX_REPORTED_ALIGNMENT)
}

/// Opaque device handle plus its ordered launch queue.
pub struct ExecutionContext {
    pool: rayon::ThreadPool,
    config: KernelConfig,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("workers", &self.pool.current_num_threads())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Build a context with a session-scoped [`RateLimitedSink`].
    pub fn new(config: KernelConfig) -> Result<Self> {
        let sink = Arc::new(RateLimitedSink::new(config.wide_source_warn_limit));
        Self::with_diagnostics(config, sink)
    }

    /// Build a context that reports diagnostics to `diagnostics`.
    ///
    /// # Errors
    ///
    /// Configuration errors for an invalid `config`, or
    /// [`KernelError::LaunchFailed`] if the worker pool cannot be created.
    pub fn with_diagnostics(
        config: KernelConfig,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        config.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("narrowfp-device-{i}"))
            .build()
            .map_err(|e| KernelError::LaunchFailed {
                kernel: "<context>".into(),
                reason: format!("failed to start device workers: {e}"),
            })?;

        log::info!(
            "narrowfp execution context ready: {} workers, native_half2={}",
            pool.current_num_threads(),
            config.native_half2
        );

        Ok(Self { pool, config, diagnostics })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &dyn DiagnosticSink {
        self.diagnostics.as_ref()
    }

    /// Number of device workers executing groups concurrently.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Launch a per-thread kernel body over `cfg`.
    ///
    /// # Errors
    ///
    /// [`KernelError::LaunchFailed`] for empty or oversized geometry,
    /// [`KernelError::ExecutionFailed`] if the body panics.
    pub fn launch<F>(&self, kernel: &str, cfg: LaunchConfig, body: F) -> Result<()>
    where
        F: Fn(ThreadIdx) + Sync,
    {
        self.launch_groups(kernel, cfg, |block| {
            for thread in 0..cfg.block_dim {
                body(ThreadIdx { block, thread, block_dim: cfg.block_dim, grid_dim: cfg.grid_dim });
            }
        })
    }

    /// Launch a kernel whose body handles a whole group at once.
    ///
    /// Used by cooperative kernels that combine per-thread partial results
    /// inside the group before publishing them.
    pub fn launch_groups<F>(&self, kernel: &str, cfg: LaunchConfig, body: F) -> Result<()>
    where
        F: Fn(u32) + Sync,
    {
        self.check_geometry(kernel, cfg)?;

        log::debug!(
            "launch {kernel}: grid={} block={} threads={}",
            cfg.grid_dim,
            cfg.block_dim,
            cfg.total_threads()
        );

        let outcome = self.pool.install(|| {
            catch_unwind(AssertUnwindSafe(|| {
                (0..cfg.grid_dim).into_par_iter().for_each(|block| body(block));
            }))
        });

        outcome.map_err(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "kernel panicked".to_string());
            KernelError::ExecutionFailed { kernel: kernel.to_string(), reason }.into()
        })
    }

    fn check_geometry(&self, kernel: &str, cfg: LaunchConfig) -> Result<()> {
        let fail = |reason: String| -> Result<()> {
            Err(KernelError::LaunchFailed { kernel: kernel.to_string(), reason }.into())
        };
        if cfg.grid_dim == 0 || cfg.block_dim == 0 {
            return fail(format!("empty geometry {}x{}", cfg.grid_dim, cfg.block_dim));
        }
        if cfg.block_dim > narrowfp_common::MAX_WORK_GROUP_SIZE {
            return fail(format!(
                "group of {} threads exceeds {}",
                cfg.block_dim,
                narrowfp_common::MAX_WORK_GROUP_SIZE
            ));
        }
        if cfg.grid_dim > self.config.max_grid_dim {
            return fail(format!(
                "{} groups exceed max_grid_dim {}",
                cfg.grid_dim, self.config.max_grid_dim
            ));
        }
        Ok(())
    }
}

/// Write-only view of a caller-owned buffer shared by all threads of a launch.
pub(crate) struct DeviceSliceMut<'a, T> {
    ptr: *mut T,
    len: usize,
    _buf: PhantomData<&'a mut [T]>,
}

// Safety: the view only hands out writes to distinct indices (see `write`),
// and T itself is sent between workers.
unsafe impl<T: Send> Send for DeviceSliceMut<'_, T> {}
unsafe impl<T: Send> Sync for DeviceSliceMut<'_, T> {}

impl<'a, T> DeviceSliceMut<'a, T> {
    pub(crate) fn new(buf: &'a mut [T]) -> Self {
        Self { ptr: buf.as_mut_ptr(), len: buf.len(), _buf: PhantomData }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Store `value` at `index`.
    ///
    /// # Safety
    ///
    /// No other thread of the same launch may access `index`.
    #[inline]
    pub(crate) unsafe fn write(&self, index: usize, value: T) {
        assert!(index < self.len, "device write {index} out of bounds {}", self.len);
        // Safety: in bounds (checked above); exclusive per the caller contract.
        unsafe { self.ptr.add(index).write(value) }
    }
}

/// Fail with [`KernelError::InvalidArguments`] unless every buffer has `len` elements.
pub(crate) fn check_lengths(kernel: &str, len: usize, others: &[(&str, usize)]) -> Result<()> {
    for &(name, other) in others {
        if other != len {
            return Err(KernelError::InvalidArguments {
                reason: format!("{kernel}: {name} has {other} elements, expected {len}"),
            }
            .into());
        }
    }
    Ok(())
}
