//! C ABI entry points for the gateway.
//!
//! These functions let a host that only speaks C drive the gateway. Arrays
//! are named by the raw value of their [`ArrayId`] and views are passed as
//! flat integers, in the same order as the native BLAS signatures.
//!
//! # Calling Convention
//!
//! Every function is `no_mangle`, uses the C calling convention and returns
//! a status code. Scalar results are written through an out pointer, which
//! is left untouched unless the status is [`PINBLAS_OK`]. Panics never cross
//! the boundary: they are caught and reported as [`PINBLAS_ERR_PANIC`], and
//! any pins taken by the call are released while unwinding.

// `ManagedHeap` is opaque to C callers; they only pass the pointer through.
#![allow(improper_ctypes_definitions)]

use std::ffi::c_int;
use std::panic::{catch_unwind, AssertUnwindSafe};

use pinblas_rts_heap::{ArrayId, ManagedHeap};
use tracing::error;

use crate::gateway::Gateway;
use crate::view::{MatrixView, VectorView};
use crate::{FfiError, FfiResult};

/// The call completed.
pub const PINBLAS_OK: c_int = 0;
/// The heap pointer was null.
pub const PINBLAS_ERR_NULL_HEAP: c_int = -1;
/// An array argument could not be pinned. No kernel was called.
pub const PINBLAS_ERR_PIN: c_int = -2;
/// The call panicked.
pub const PINBLAS_ERR_PANIC: c_int = -3;
/// The out pointer for a scalar result was null.
pub const PINBLAS_ERR_NULL_OUT: c_int = -4;

fn status(err: &FfiError) -> c_int {
    match err {
        FfiError::PinFailed { .. } | FfiError::Heap(_) | FfiError::TooManyArguments { .. } => {
            PINBLAS_ERR_PIN
        }
        FfiError::NullPointer => PINBLAS_ERR_NULL_OUT,
    }
}

/// Run `body` against a gateway on `heap`, translating the outcome into a
/// status code.
///
/// # Safety
///
/// `heap` must be null or point to a live heap for the whole call.
unsafe fn run(heap: *const ManagedHeap, body: impl FnOnce(&Gateway<'_>) -> FfiResult<()>) -> c_int {
    // Safety: forwarded to the caller.
    let Some(heap) = (unsafe { heap.as_ref() }) else {
        return PINBLAS_ERR_NULL_HEAP;
    };
    let gateway = Gateway::new(heap);
    match catch_unwind(AssertUnwindSafe(|| body(&gateway))) {
        Ok(Ok(())) => PINBLAS_OK,
        Ok(Err(err)) => status(&err),
        Err(_) => {
            error!("panic caught at the C boundary");
            PINBLAS_ERR_PANIC
        }
    }
}

fn vector(handle: u64, length: c_int, stride: c_int, offset: usize) -> VectorView {
    VectorView::new(ArrayId::from_raw(handle), length, stride, offset)
}

fn matrix(handle: u64, offset: usize, ld: c_int) -> MatrixView {
    // Dimensions, order and transpose travel as separate arguments and the
    // gateway reads only buffer, offset and leading dimension.
    MatrixView::row_major(ArrayId::from_raw(handle), 0, 0)
        .with_leading_dimension(ld)
        .with_offset(offset)
}

/// Inner product of two strided vectors, written to `out`.
///
/// # Safety
///
/// `heap` must be null or point to a live heap. `out` must be null or
/// valid for a write. Each view must lie within its array.
#[no_mangle]
pub unsafe extern "C" fn pinblas_ddot(
    heap: *const ManagedHeap,
    n: c_int,
    x: u64,
    incx: c_int,
    offx: usize,
    y: u64,
    incy: c_int,
    offy: usize,
    out: *mut f64,
) -> c_int {
    // Safety: forwarded to the caller.
    unsafe {
        run(heap, |gw| {
            if out.is_null() {
                return Err(FfiError::NullPointer);
            }
            let dot = gw.dot(vector(x, n, incx, offx), vector(y, n, incy, offy))?;
            *out = dot;
            Ok(())
        })
    }
}

/// Euclidean norm of a strided vector, written to `out`.
///
/// # Safety
///
/// As for [`pinblas_ddot`].
#[no_mangle]
pub unsafe extern "C" fn pinblas_dnrm2(
    heap: *const ManagedHeap,
    n: c_int,
    x: u64,
    incx: c_int,
    offx: usize,
    out: *mut f64,
) -> c_int {
    // Safety: forwarded to the caller.
    unsafe {
        run(heap, |gw| {
            if out.is_null() {
                return Err(FfiError::NullPointer);
            }
            *out = gw.norm2(vector(x, n, incx, offx))?;
            Ok(())
        })
    }
}

/// `y <- alpha * x + y`.
///
/// # Safety
///
/// `heap` must be null or point to a live heap. Each view must lie within
/// its array.
#[no_mangle]
pub unsafe extern "C" fn pinblas_daxpy(
    heap: *const ManagedHeap,
    n: c_int,
    alpha: f64,
    x: u64,
    incx: c_int,
    offx: usize,
    y: u64,
    incy: c_int,
    offy: usize,
) -> c_int {
    // Safety: forwarded to the caller.
    unsafe { run(heap, |gw| gw.axpy(alpha, vector(x, n, incx, offx), vector(y, n, incy, offy))) }
}

/// `y <- x`.
///
/// # Safety
///
/// As for [`pinblas_daxpy`].
#[no_mangle]
pub unsafe extern "C" fn pinblas_dcopy(
    heap: *const ManagedHeap,
    n: c_int,
    x: u64,
    incx: c_int,
    offx: usize,
    y: u64,
    incy: c_int,
    offy: usize,
) -> c_int {
    // Safety: forwarded to the caller.
    unsafe { run(heap, |gw| gw.copy(vector(x, n, incx, offx), vector(y, n, incy, offy))) }
}

/// `x <- alpha * x`.
///
/// # Safety
///
/// As for [`pinblas_daxpy`].
#[no_mangle]
pub unsafe extern "C" fn pinblas_dscal(
    heap: *const ManagedHeap,
    n: c_int,
    alpha: f64,
    x: u64,
    incx: c_int,
    offx: usize,
) -> c_int {
    // Safety: forwarded to the caller.
    unsafe { run(heap, |gw| gw.scale(alpha, vector(x, n, incx, offx))) }
}

/// `y <- alpha * op(A) * x + beta * y`.
///
/// `order` and `trans` take the CBLAS values (101/102 and 111/112/113).
///
/// # Safety
///
/// As for [`pinblas_daxpy`], with `A` addressed through `lda`.
#[no_mangle]
pub unsafe extern "C" fn pinblas_dgemv(
    heap: *const ManagedHeap,
    order: c_int,
    trans: c_int,
    m: c_int,
    n: c_int,
    alpha: f64,
    a: u64,
    offa: usize,
    lda: c_int,
    x: u64,
    incx: c_int,
    offx: usize,
    beta: f64,
    y: u64,
    incy: c_int,
    offy: usize,
) -> c_int {
    // gemv reads `x` over the columns of op(A) and writes `y` over its rows.
    // The gateway passes only the stride and base of each vector, so the
    // view lengths are informational.
    let x = vector(x, n, incx, offx);
    let y = vector(y, m, incy, offy);
    // Safety: forwarded to the caller.
    unsafe {
        run(heap, |gw| {
            gw.gemv(order, trans, m, n, alpha, matrix(a, offa, lda), x, beta, y)
        })
    }
}

/// `C <- alpha * op(A) * op(B) + beta * C`.
///
/// # Safety
///
/// As for [`pinblas_daxpy`], with each matrix addressed through its leading
/// dimension.
#[no_mangle]
pub unsafe extern "C" fn pinblas_dgemm(
    heap: *const ManagedHeap,
    order: c_int,
    trans_a: c_int,
    trans_b: c_int,
    m: c_int,
    n: c_int,
    k: c_int,
    alpha: f64,
    a: u64,
    offa: usize,
    lda: c_int,
    b: u64,
    offb: usize,
    ldb: c_int,
    beta: f64,
    c: u64,
    offc: usize,
    ldc: c_int,
) -> c_int {
    // Safety: forwarded to the caller.
    unsafe {
        run(heap, |gw| {
            gw.gemm(
                order,
                trans_a,
                trans_b,
                m,
                n,
                k,
                alpha,
                matrix(a, offa, lda),
                matrix(b, offb, ldb),
                beta,
                matrix(c, offc, ldc),
            )
        })
    }
}
