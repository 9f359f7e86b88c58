//! Native CBLAS kernel.
//!
//! The `cblas_*` symbols come from whichever library the build script
//! linked: OpenBLAS, Apple Accelerate or a system CBLAS. All three export
//! the same signatures, so one declaration block serves them all.

use crate::blas::Kernel;

#[allow(non_camel_case_types)]
type CBLAS_ORDER = i32;
#[allow(non_camel_case_types)]
type CBLAS_TRANSPOSE = i32;

extern "C" {
    fn cblas_ddot(n: i32, x: *const f64, incx: i32, y: *const f64, incy: i32) -> f64;
    fn cblas_dnrm2(n: i32, x: *const f64, incx: i32) -> f64;
    fn cblas_daxpy(n: i32, alpha: f64, x: *const f64, incx: i32, y: *mut f64, incy: i32);
    fn cblas_dcopy(n: i32, x: *const f64, incx: i32, y: *mut f64, incy: i32);
    fn cblas_dscal(n: i32, alpha: f64, x: *mut f64, incx: i32);

    fn cblas_dgemv(
        order: CBLAS_ORDER,
        trans: CBLAS_TRANSPOSE,
        m: i32,
        n: i32,
        alpha: f64,
        a: *const f64,
        lda: i32,
        x: *const f64,
        incx: i32,
        beta: f64,
        y: *mut f64,
        incy: i32,
    );

    fn cblas_dgemm(
        order: CBLAS_ORDER,
        transa: CBLAS_TRANSPOSE,
        transb: CBLAS_TRANSPOSE,
        m: i32,
        n: i32,
        k: i32,
        alpha: f64,
        a: *const f64,
        lda: i32,
        b: *const f64,
        ldb: i32,
        beta: f64,
        c: *mut f64,
        ldc: i32,
    );
}

/// Kernel backed by the linked CBLAS library.
#[derive(Clone, Copy, Debug, Default)]
pub struct CblasKernel;

impl CblasKernel {
    /// Create the native kernel.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Kernel for CblasKernel {
    fn name(&self) -> &'static str {
        if cfg!(feature = "openblas") {
            "OpenBLAS"
        } else if cfg!(all(target_os = "macos", feature = "accelerate")) {
            "Accelerate"
        } else {
            "CBLAS"
        }
    }

    unsafe fn ddot(&self, n: i32, x: *const f64, incx: i32, y: *const f64, incy: i32) -> f64 {
        unsafe { cblas_ddot(n, x, incx, y, incy) }
    }

    unsafe fn dnrm2(&self, n: i32, x: *const f64, incx: i32) -> f64 {
        unsafe { cblas_dnrm2(n, x, incx) }
    }

    unsafe fn daxpy(&self, n: i32, alpha: f64, x: *const f64, incx: i32, y: *mut f64, incy: i32) {
        unsafe { cblas_daxpy(n, alpha, x, incx, y, incy) }
    }

    unsafe fn dcopy(&self, n: i32, x: *const f64, incx: i32, y: *mut f64, incy: i32) {
        unsafe { cblas_dcopy(n, x, incx, y, incy) }
    }

    unsafe fn dscal(&self, n: i32, alpha: f64, x: *mut f64, incx: i32) {
        unsafe { cblas_dscal(n, alpha, x, incx) }
    }

    unsafe fn dgemv(
        &self,
        order: i32,
        trans: i32,
        m: i32,
        n: i32,
        alpha: f64,
        a: *const f64,
        lda: i32,
        x: *const f64,
        incx: i32,
        beta: f64,
        y: *mut f64,
        incy: i32,
    ) {
        unsafe { cblas_dgemv(order, trans, m, n, alpha, a, lda, x, incx, beta, y, incy) }
    }

    unsafe fn dgemm(
        &self,
        order: i32,
        trans_a: i32,
        trans_b: i32,
        m: i32,
        n: i32,
        k: i32,
        alpha: f64,
        a: *const f64,
        lda: i32,
        b: *const f64,
        ldb: i32,
        beta: f64,
        c: *mut f64,
        ldc: i32,
    ) {
        unsafe {
            cblas_dgemm(
                order, trans_a, trans_b, m, n, k, alpha, a, lda, b, ldb, beta, c, ldc,
            )
        }
    }
}
