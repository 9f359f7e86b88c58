//! The marshaling gateway.
//!
//! Every operation follows the same bracket:
//!
//! 1. pin each distinct array argument (no allocation, no waiting),
//! 2. compute each effective pointer as `base + offset`,
//! 3. make exactly one kernel call with strides, leading dimensions and
//!    flags passed through unchanged,
//! 4. release every pin, whether the call returned or unwound.
//!
//! Logging happens before the bracket opens or after it closes, never
//! inside it.

use std::sync::atomic::{AtomicU64, Ordering};

use pinblas_rts_heap::ManagedHeap;
use tracing::{trace, warn};

use crate::blas::{DefaultKernel, Kernel};
use crate::pinned::PinSet;
use crate::view::{MatrixView, Operation, VectorView};
use crate::FfiResult;

/// Snapshot of gateway call statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GatewayStats {
    /// Calls per operation, indexed in [`Operation::ALL`] order.
    pub calls: [u64; 7],
    /// Critical pins taken.
    pub pins: u64,
    /// Arguments that reused another argument's pin.
    pub shared_pins: u64,
    /// Calls that failed before reaching the kernel.
    pub failures: u64,
}

impl GatewayStats {
    /// Calls made to `op`.
    #[must_use]
    pub fn calls(&self, op: Operation) -> u64 {
        self.calls[op.index()]
    }

    /// Calls made to every operation.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.calls.iter().sum()
    }
}

#[derive(Debug, Default)]
struct Counters {
    calls: [AtomicU64; 7],
    pins: AtomicU64,
    shared_pins: AtomicU64,
    failures: AtomicU64,
}

/// Dispatches view-level operations to a kernel over pinned heap arrays.
///
/// # Safety contract
///
/// The gateway checks that every array handle is live (pinning fails
/// otherwise) but does not check views against array sizes. Every view
/// passed to an operation must address only elements inside its array:
/// for vectors, indices `offset ..= offset + (length - 1) * |stride|`; for
/// matrices, the extent implied by the dimensions, order, transpose and
/// leading dimension. The operations are `unsafe` for this reason.
#[derive(Debug)]
pub struct Gateway<'h, K: Kernel = DefaultKernel> {
    heap: &'h ManagedHeap,
    kernel: K,
    counters: Counters,
}

impl<'h> Gateway<'h, DefaultKernel> {
    /// A gateway using the kernel selected at build time.
    #[must_use]
    pub fn new(heap: &'h ManagedHeap) -> Self {
        Self::with_kernel(heap, DefaultKernel::default())
    }
}

impl<'h, K: Kernel> Gateway<'h, K> {
    /// A gateway using `kernel`.
    #[must_use]
    pub fn with_kernel(heap: &'h ManagedHeap, kernel: K) -> Self {
        Self {
            heap,
            kernel,
            counters: Counters::default(),
        }
    }

    /// The heap the gateway pins against.
    #[must_use]
    pub fn heap(&self) -> &'h ManagedHeap {
        self.heap
    }

    /// The kernel.
    #[must_use]
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Snapshot the call statistics.
    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        GatewayStats {
            calls: std::array::from_fn(|i| load(&self.counters.calls[i])),
            pins: load(&self.counters.pins),
            shared_pins: load(&self.counters.shared_pins),
            failures: load(&self.counters.failures),
        }
    }

    fn bracket<R>(
        &self,
        op: Operation,
        call: impl FnOnce(&mut PinSet<'h>) -> FfiResult<R>,
    ) -> FfiResult<R> {
        self.counters.calls[op.index()].fetch_add(1, Ordering::Relaxed);
        let mut pins = PinSet::new(self.heap);
        let result = call(&mut pins);
        debug_assert!(pins.len() <= op.arity(), "{op} pinned {} arrays", pins.len());
        self.counters
            .pins
            .fetch_add(pins.len() as u64, Ordering::Relaxed);
        self.counters
            .shared_pins
            .fetch_add(pins.shared() as u64, Ordering::Relaxed);
        drop(pins);

        if let Err(err) = &result {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                operation = %op,
                entry = op.entry_point(),
                error = %err,
                "gateway call failed"
            );
        }
        result
    }

    /// Inner product of `x` and `y` over `x.length` elements.
    ///
    /// # Errors
    ///
    /// Fails if an array cannot be pinned; the kernel is not called.
    ///
    /// # Safety
    ///
    /// Both views must lie within their arrays (see [`Gateway`]).
    pub unsafe fn dot(&self, x: VectorView, y: VectorView) -> FfiResult<f64> {
        trace!(operation = "dot", n = x.length, incx = x.stride, incy = y.stride);
        self.bracket(Operation::Dot, |pins| {
            let px = pins.pin_at("x", x.buffer, x.offset)?;
            let py = pins.pin_at("y", y.buffer, y.offset)?;
            // Safety: the pins keep both arrays in place; bounds are the
            // caller's contract.
            Ok(unsafe { self.kernel.ddot(x.length, px, x.stride, py, y.stride) })
        })
    }

    /// Euclidean norm of `x`.
    ///
    /// # Errors
    ///
    /// Fails if the array cannot be pinned.
    ///
    /// # Safety
    ///
    /// The view must lie within its array.
    pub unsafe fn norm2(&self, x: VectorView) -> FfiResult<f64> {
        trace!(operation = "norm2", n = x.length, incx = x.stride);
        self.bracket(Operation::Norm2, |pins| {
            let px = pins.pin_at("x", x.buffer, x.offset)?;
            // Safety: as for `dot`.
            Ok(unsafe { self.kernel.dnrm2(x.length, px, x.stride) })
        })
    }

    /// `y <- alpha * x + y` over `x.length` elements.
    ///
    /// # Errors
    ///
    /// Fails if an array cannot be pinned; `y` is then untouched.
    ///
    /// # Safety
    ///
    /// Both views must lie within their arrays.
    pub unsafe fn axpy(&self, alpha: f64, x: VectorView, y: VectorView) -> FfiResult<()> {
        trace!(operation = "axpy", n = x.length, alpha, incx = x.stride, incy = y.stride);
        self.bracket(Operation::Axpy, |pins| {
            let px = pins.pin_at("x", x.buffer, x.offset)?;
            let py = pins.pin_at("y", y.buffer, y.offset)?;
            // Safety: as for `dot`.
            unsafe { self.kernel.daxpy(x.length, alpha, px, x.stride, py, y.stride) };
            Ok(())
        })
    }

    /// `y <- x` over `x.length` elements.
    ///
    /// # Errors
    ///
    /// Fails if an array cannot be pinned; `y` is then untouched.
    ///
    /// # Safety
    ///
    /// Both views must lie within their arrays.
    pub unsafe fn copy(&self, x: VectorView, y: VectorView) -> FfiResult<()> {
        trace!(operation = "copy", n = x.length, incx = x.stride, incy = y.stride);
        self.bracket(Operation::Copy, |pins| {
            let px = pins.pin_at("x", x.buffer, x.offset)?;
            let py = pins.pin_at("y", y.buffer, y.offset)?;
            // Safety: as for `dot`.
            unsafe { self.kernel.dcopy(x.length, px, x.stride, py, y.stride) };
            Ok(())
        })
    }

    /// `x <- alpha * x`.
    ///
    /// # Errors
    ///
    /// Fails if the array cannot be pinned.
    ///
    /// # Safety
    ///
    /// The view must lie within its array.
    pub unsafe fn scale(&self, alpha: f64, x: VectorView) -> FfiResult<()> {
        trace!(operation = "scale", n = x.length, alpha, incx = x.stride);
        self.bracket(Operation::Scale, |pins| {
            let px = pins.pin_at("x", x.buffer, x.offset)?;
            // Safety: as for `dot`.
            unsafe { self.kernel.dscal(x.length, alpha, px, x.stride) };
            Ok(())
        })
    }

    /// `y <- alpha * op(A) * x + beta * y`, with `A` of `m` rows and `n`
    /// columns.
    ///
    /// `order` and `trans` are kernel integers and are passed through
    /// unchanged, as is `a.leading_dimension`. The remaining fields of `a`
    /// (dimensions, order, transpose) are not consulted.
    ///
    /// # Errors
    ///
    /// Fails if an array cannot be pinned; `y` is then untouched.
    ///
    /// # Safety
    ///
    /// All three views must lie within their arrays for the given shape.
    pub unsafe fn gemv(
        &self,
        order: i32,
        trans: i32,
        m: i32,
        n: i32,
        alpha: f64,
        a: MatrixView,
        x: VectorView,
        beta: f64,
        y: VectorView,
    ) -> FfiResult<()> {
        trace!(operation = "gemv", order, trans, m, n, lda = a.leading_dimension);
        self.bracket(Operation::Gemv, |pins| {
            let pa = pins.pin_at("a", a.buffer, a.offset)?;
            let px = pins.pin_at("x", x.buffer, x.offset)?;
            let py = pins.pin_at("y", y.buffer, y.offset)?;
            // Safety: as for `dot`.
            unsafe {
                self.kernel.dgemv(
                    order,
                    trans,
                    m,
                    n,
                    alpha,
                    pa,
                    a.leading_dimension,
                    px,
                    x.stride,
                    beta,
                    py,
                    y.stride,
                );
            }
            Ok(())
        })
    }

    /// [`Gateway::gemv`] taking order, transpose and dimensions from `a`.
    ///
    /// # Errors
    ///
    /// As for [`Gateway::gemv`].
    ///
    /// # Safety
    ///
    /// As for [`Gateway::gemv`].
    pub unsafe fn gemv_view(
        &self,
        alpha: f64,
        a: MatrixView,
        x: VectorView,
        beta: f64,
        y: VectorView,
    ) -> FfiResult<()> {
        // Safety: forwarded to the caller.
        unsafe { self.gemv(a.order, a.transpose, a.rows, a.cols, alpha, a, x, beta, y) }
    }

    /// `C <- alpha * op(A) * op(B) + beta * C`, with `C` of `m` rows and `n`
    /// columns and inner dimension `k`.
    ///
    /// Flags and leading dimensions are passed through unchanged. Only the
    /// buffer, offset and leading dimension of each matrix view are used.
    ///
    /// # Errors
    ///
    /// Fails if an array cannot be pinned; `c` is then untouched.
    ///
    /// # Safety
    ///
    /// All three views must lie within their arrays for the given shape.
    pub unsafe fn gemm(
        &self,
        order: i32,
        trans_a: i32,
        trans_b: i32,
        m: i32,
        n: i32,
        k: i32,
        alpha: f64,
        a: MatrixView,
        b: MatrixView,
        beta: f64,
        c: MatrixView,
    ) -> FfiResult<()> {
        trace!(operation = "gemm", order, trans_a, trans_b, m, n, k);
        self.bracket(Operation::Gemm, |pins| {
            let pa = pins.pin_at("a", a.buffer, a.offset)?;
            let pb = pins.pin_at("b", b.buffer, b.offset)?;
            let pc = pins.pin_at("c", c.buffer, c.offset)?;
            // Safety: as for `dot`.
            unsafe {
                self.kernel.dgemm(
                    order,
                    trans_a,
                    trans_b,
                    m,
                    n,
                    k,
                    alpha,
                    pa,
                    a.leading_dimension,
                    pb,
                    b.leading_dimension,
                    beta,
                    pc,
                    c.leading_dimension,
                );
            }
            Ok(())
        })
    }

    /// [`Gateway::gemm`] taking the order and shape of `c`, and the
    /// transpose flags of `a` and `b`, from the views.
    ///
    /// # Errors
    ///
    /// As for [`Gateway::gemm`].
    ///
    /// # Safety
    ///
    /// As for [`Gateway::gemm`].
    pub unsafe fn gemm_views(
        &self,
        k: i32,
        alpha: f64,
        a: MatrixView,
        b: MatrixView,
        beta: f64,
        c: MatrixView,
    ) -> FfiResult<()> {
        // Safety: forwarded to the caller.
        unsafe {
            self.gemm(
                c.order,
                a.transpose,
                b.transpose,
                c.rows,
                c.cols,
                k,
                alpha,
                a,
                b,
                beta,
                c,
            )
        }
    }
}
