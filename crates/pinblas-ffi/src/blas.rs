//! Kernel interface
//!
//! This module defines the strongly typed surface the gateway calls into.
//! There is one method per native entry point, each with the exact CBLAS
//! argument list: `i32` sizes and increments, raw pointers, and raw order
//! and transpose integers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Kernel trait                           │
//! └─────────────────────────────────────────────────────────────┘
//!            ▲                         ▲
//!            │                         │
//! ┌──────────┴──────────┐   ┌──────────┴──────────────────────┐
//! │  ReferenceKernel    │   │  CblasKernel                     │
//! │  (portable Rust)    │   │  OpenBLAS / Accelerate / CBLAS   │
//! └─────────────────────┘   └──────────────────────────────────┘
//! ```
//!
//! ## Backend Selection
//!
//! The backend is fixed at build time. Enabling the `openblas`,
//! `accelerate` (macOS) or `cblas` feature links a native library and makes
//! [`DefaultKernel`] the native kernel; otherwise [`DefaultKernel`] is the
//! [`ReferenceKernel`]. There is no runtime dispatch.

use tracing::error;

use crate::view::{Order, Transpose};

/// A BLAS backend.
///
/// # Safety
///
/// Every method takes raw pointers with BLAS semantics. Callers must
/// guarantee that each pointer, together with its size, increment and
/// leading-dimension arguments, only addresses memory that is valid for the
/// duration of the call (writable for output arguments) and that no other
/// code moves or frees that memory meanwhile.
pub trait Kernel {
    /// Name of the backend.
    fn name(&self) -> &'static str;

    /// `x . y` over `n` elements.
    ///
    /// # Safety
    ///
    /// See the trait documentation.
    unsafe fn ddot(&self, n: i32, x: *const f64, incx: i32, y: *const f64, incy: i32) -> f64;

    /// Euclidean norm of `n` elements.
    ///
    /// # Safety
    ///
    /// See the trait documentation.
    unsafe fn dnrm2(&self, n: i32, x: *const f64, incx: i32) -> f64;

    /// `y <- alpha * x + y`.
    ///
    /// # Safety
    ///
    /// See the trait documentation.
    unsafe fn daxpy(&self, n: i32, alpha: f64, x: *const f64, incx: i32, y: *mut f64, incy: i32);

    /// `y <- x`.
    ///
    /// # Safety
    ///
    /// See the trait documentation.
    unsafe fn dcopy(&self, n: i32, x: *const f64, incx: i32, y: *mut f64, incy: i32);

    /// `x <- alpha * x`.
    ///
    /// # Safety
    ///
    /// See the trait documentation.
    unsafe fn dscal(&self, n: i32, alpha: f64, x: *mut f64, incx: i32);

    /// `y <- alpha * op(A) * x + beta * y` with `A` of `m` rows and `n`
    /// columns.
    ///
    /// # Safety
    ///
    /// See the trait documentation.
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
    );

    /// `C <- alpha * op(A) * op(B) + beta * C` with `C` of `m` rows and `n`
    /// columns and inner dimension `k`.
    ///
    /// # Safety
    ///
    /// See the trait documentation.
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
    );
}

impl<K: Kernel + ?Sized> Kernel for &K {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    unsafe fn ddot(&self, n: i32, x: *const f64, incx: i32, y: *const f64, incy: i32) -> f64 {
        unsafe { (**self).ddot(n, x, incx, y, incy) }
    }

    unsafe fn dnrm2(&self, n: i32, x: *const f64, incx: i32) -> f64 {
        unsafe { (**self).dnrm2(n, x, incx) }
    }

    unsafe fn daxpy(&self, n: i32, alpha: f64, x: *const f64, incx: i32, y: *mut f64, incy: i32) {
        unsafe { (**self).daxpy(n, alpha, x, incx, y, incy) }
    }

    unsafe fn dcopy(&self, n: i32, x: *const f64, incx: i32, y: *mut f64, incy: i32) {
        unsafe { (**self).dcopy(n, x, incx, y, incy) }
    }

    unsafe fn dscal(&self, n: i32, alpha: f64, x: *mut f64, incx: i32) {
        unsafe { (**self).dscal(n, alpha, x, incx) }
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
        unsafe { (**self).dgemv(order, trans, m, n, alpha, a, lda, x, incx, beta, y, incy) }
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
            (**self).dgemm(
                order, trans_a, trans_b, m, n, k, alpha, a, lda, b, ldb, beta, c, ldc,
            )
        }
    }
}

/// The kernel selected at build time.
#[cfg(native_blas)]
pub type DefaultKernel = crate::cblas::CblasKernel;

/// The kernel selected at build time.
#[cfg(not(native_blas))]
pub type DefaultKernel = ReferenceKernel;

/// Name of the backend linked into this build.
#[must_use]
pub fn backend_name() -> &'static str {
    DefaultKernel::default().name()
}

/// Portable Rust kernel.
///
/// Used when no native library is linked. It follows the reference BLAS
/// conventions: non-positive sizes are no-ops, negative increments walk the
/// vector from its far end, `beta == 0` overwrites the output without
/// reading it, and invalid arguments are reported through the log and
/// leave every output untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReferenceKernel;

impl ReferenceKernel {
    /// Create the reference kernel.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Pointer offset of logical element `i` of an `n`-element vector.
#[inline]
fn element(i: usize, n: usize, inc: i32) -> isize {
    let step = inc.unsigned_abs() as usize;
    let position = if inc >= 0 { i } else { n - 1 - i };
    (position * step) as isize
}

/// Report an invalid argument the way `xerbla` does.
fn invalid_argument(routine: &'static str, position: u32, value: i32) {
    error!(routine, position, value, "parameter has an illegal value");
}

/// Resolve gemv arguments to column-major form: `(m, n, transposed)`.
fn gemv_column_major(order: Order, trans: Transpose, m: i32, n: i32) -> (i32, i32, bool) {
    match order {
        Order::ColumnMajor => (m, n, trans.is_transposed()),
        // A row-major matrix is the transpose of the same storage read
        // column-major.
        Order::RowMajor => (n, m, !trans.is_transposed()),
    }
}

impl Kernel for ReferenceKernel {
    fn name(&self) -> &'static str {
        "reference"
    }

    unsafe fn ddot(&self, n: i32, x: *const f64, incx: i32, y: *const f64, incy: i32) -> f64 {
        let Ok(n) = usize::try_from(n) else {
            return 0.0;
        };
        let mut sum = 0.0;
        for i in 0..n {
            // Safety: the caller guarantees every addressed element is valid.
            unsafe {
                sum += *x.offset(element(i, n, incx)) * *y.offset(element(i, n, incy));
            }
        }
        sum
    }

    unsafe fn dnrm2(&self, n: i32, x: *const f64, incx: i32) -> f64 {
        let Ok(n) = usize::try_from(n) else {
            return 0.0;
        };
        // Scaled sum of squares; avoids overflow for large elements and
        // underflow for tiny ones.
        let mut scale = 0.0f64;
        let mut ssq = 1.0f64;
        let mut infinite = false;
        for i in 0..n {
            // Safety: as for `ddot`.
            let value = unsafe { *x.offset(element(i, n, incx)) };
            if value.is_nan() {
                return f64::NAN;
            }
            if value.is_infinite() {
                // Keep scanning: a later NaN still wins.
                infinite = true;
            } else if value != 0.0 {
                let abs = value.abs();
                if scale < abs {
                    ssq = 1.0 + ssq * (scale / abs) * (scale / abs);
                    scale = abs;
                } else {
                    ssq += (abs / scale) * (abs / scale);
                }
            }
        }
        if infinite {
            f64::INFINITY
        } else {
            scale * ssq.sqrt()
        }
    }

    unsafe fn daxpy(&self, n: i32, alpha: f64, x: *const f64, incx: i32, y: *mut f64, incy: i32) {
        let Ok(n) = usize::try_from(n) else {
            return;
        };
        if alpha == 0.0 {
            return;
        }
        for i in 0..n {
            // Safety: as for `ddot`; `y` is writable.
            unsafe {
                *y.offset(element(i, n, incy)) += alpha * *x.offset(element(i, n, incx));
            }
        }
    }

    unsafe fn dcopy(&self, n: i32, x: *const f64, incx: i32, y: *mut f64, incy: i32) {
        let Ok(n) = usize::try_from(n) else {
            return;
        };
        for i in 0..n {
            // Safety: as for `daxpy`.
            unsafe {
                *y.offset(element(i, n, incy)) = *x.offset(element(i, n, incx));
            }
        }
    }

    unsafe fn dscal(&self, n: i32, alpha: f64, x: *mut f64, incx: i32) {
        let Ok(n) = usize::try_from(n) else {
            return;
        };
        if incx <= 0 {
            return;
        }
        for i in 0..n {
            // Safety: as for `daxpy`.
            unsafe {
                *x.offset(element(i, n, incx)) *= alpha;
            }
        }
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
        const ROUTINE: &str = "cblas_dgemv";
        let Some(order) = Order::from_raw(order) else {
            return invalid_argument(ROUTINE, 1, order);
        };
        let trans = match Transpose::from_raw(trans) {
            Some(t) if t != Transpose::Conjugate => t,
            _ => return invalid_argument(ROUTINE, 2, trans),
        };
        if m < 0 {
            return invalid_argument(ROUTINE, 3, m);
        }
        if n < 0 {
            return invalid_argument(ROUTINE, 4, n);
        }
        let (m, n, transposed) = gemv_column_major(order, trans, m, n);
        if lda < m.max(1) {
            return invalid_argument(ROUTINE, 7, lda);
        }
        if incx == 0 {
            return invalid_argument(ROUTINE, 9, incx);
        }
        if incy == 0 {
            return invalid_argument(ROUTINE, 12, incy);
        }

        if m == 0 || n == 0 || (alpha == 0.0 && beta == 1.0) {
            return;
        }

        // Sizes are non-negative from here on.
        let (m, n, lda) = (m as usize, n as usize, lda as usize);
        let (len_x, len_y) = if transposed { (m, n) } else { (n, m) };
        let at = |i: usize, j: usize| i + j * lda;

        // Safety for every block below: the caller guarantees that `a`, `x`
        // and `y` address valid memory for these shapes.
        unsafe {
            if beta != 1.0 {
                for i in 0..len_y {
                    let yi = y.offset(element(i, len_y, incy));
                    *yi = if beta == 0.0 { 0.0 } else { beta * *yi };
                }
            }
            if alpha == 0.0 {
                return;
            }
            if transposed {
                for j in 0..n {
                    let mut temp = 0.0;
                    for i in 0..m {
                        temp += *a.add(at(i, j)) * *x.offset(element(i, len_x, incx));
                    }
                    *y.offset(element(j, len_y, incy)) += alpha * temp;
                }
            } else {
                for j in 0..n {
                    let temp = alpha * *x.offset(element(j, len_x, incx));
                    for i in 0..m {
                        *y.offset(element(i, len_y, incy)) += temp * *a.add(at(i, j));
                    }
                }
            }
        }
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
        const ROUTINE: &str = "cblas_dgemm";
        let Some(order) = Order::from_raw(order) else {
            return invalid_argument(ROUTINE, 1, order);
        };
        let ta = match Transpose::from_raw(trans_a) {
            Some(t) if t != Transpose::Conjugate => t,
            _ => return invalid_argument(ROUTINE, 2, trans_a),
        };
        let tb = match Transpose::from_raw(trans_b) {
            Some(t) if t != Transpose::Conjugate => t,
            _ => return invalid_argument(ROUTINE, 3, trans_b),
        };
        if m < 0 {
            return invalid_argument(ROUTINE, 4, m);
        }
        if n < 0 {
            return invalid_argument(ROUTINE, 5, n);
        }
        if k < 0 {
            return invalid_argument(ROUTINE, 6, k);
        }

        // Row-major C = op(A) op(B) is column-major C^T = op(B)^T op(A)^T
        // over the same storage, so swap the operands.
        let (m, n, a, lda, ta, b, ldb, tb) = match order {
            Order::ColumnMajor => (m, n, a, lda, ta, b, ldb, tb),
            Order::RowMajor => (n, m, b, ldb, tb, a, lda, ta),
        };
        let (nota, notb) = (!ta.is_transposed(), !tb.is_transposed());
        let rows_a = if nota { m } else { k };
        let rows_b = if notb { k } else { n };
        // Positions are reported against the caller's argument order.
        let (pos_a, pos_b) = match order {
            Order::ColumnMajor => (9, 11),
            Order::RowMajor => (11, 9),
        };
        if lda < rows_a.max(1) {
            return invalid_argument(ROUTINE, pos_a, lda);
        }
        if ldb < rows_b.max(1) {
            return invalid_argument(ROUTINE, pos_b, ldb);
        }
        if ldc < m.max(1) {
            return invalid_argument(ROUTINE, 14, ldc);
        }

        if m == 0 || n == 0 || ((alpha == 0.0 || k == 0) && beta == 1.0) {
            return;
        }

        let (m, n, k) = (m as usize, n as usize, k as usize);
        let (lda, ldb, ldc) = (lda as usize, ldb as usize, ldc as usize);

        // Safety: the caller guarantees that `a`, `b` and `c` address valid
        // memory for these shapes and leading dimensions.
        unsafe {
            for j in 0..n {
                for i in 0..m {
                    let mut sum = 0.0;
                    if alpha != 0.0 {
                        for l in 0..k {
                            let a_il = if nota {
                                *a.add(i + l * lda)
                            } else {
                                *a.add(l + i * lda)
                            };
                            let b_lj = if notb {
                                *b.add(l + j * ldb)
                            } else {
                                *b.add(j + l * ldb)
                            };
                            sum += a_il * b_lj;
                        }
                    }
                    let cij = c.add(i + j * ldc);
                    *cij = if beta == 0.0 {
                        alpha * sum
                    } else {
                        alpha * sum + beta * *cij
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROW: i32 = Order::RowMajor as i32;
    const COL: i32 = Order::ColumnMajor as i32;
    const N: i32 = Transpose::NoTranspose as i32;
    const T: i32 = Transpose::Transpose as i32;

    fn kernel() -> ReferenceKernel {
        ReferenceKernel::new()
    }

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    #[test]
    fn test_reference_ddot() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [1.0, 2.0, 3.0, 4.0];
        let result = unsafe { kernel().ddot(4, x.as_ptr(), 1, y.as_ptr(), 1) };
        assert!(approx_eq(result, 30.0));
    }

    #[test]
    fn test_reference_ddot_strided() {
        let x = [1.0, 0.0, 2.0, 0.0, 3.0];
        let y = [4.0, 5.0, 6.0];
        let result = unsafe { kernel().ddot(3, x.as_ptr(), 2, y.as_ptr(), 1) };
        assert_eq!(result, 32.0);
    }

    #[test]
    fn test_reference_ddot_negative_increment() {
        // Reversed x against forward y: 3*4 + 2*5 + 1*6.
        let x = [1.0, 2.0, 3.0];
        let y = [4.0, 5.0, 6.0];
        let result = unsafe { kernel().ddot(3, x.as_ptr(), -1, y.as_ptr(), 1) };
        assert_eq!(result, 28.0);
    }

    #[test]
    fn test_reference_ddot_non_positive_n() {
        let x = [1.0];
        assert_eq!(unsafe { kernel().ddot(0, x.as_ptr(), 1, x.as_ptr(), 1) }, 0.0);
        assert_eq!(unsafe { kernel().ddot(-2, x.as_ptr(), 1, x.as_ptr(), 1) }, 0.0);
    }

    #[test]
    fn test_reference_dnrm2() {
        let x = [3.0, 4.0];
        let result = unsafe { kernel().dnrm2(2, x.as_ptr(), 1) };
        assert!(approx_eq(result, 5.0));
    }

    #[test]
    fn test_reference_dnrm2_no_overflow() {
        let x = [3.0e200, 4.0e200];
        let result = unsafe { kernel().dnrm2(2, x.as_ptr(), 1) };
        assert!((result / 5.0e200 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_reference_dnrm2_propagates_nan() {
        let x = [1.0, f64::NAN];
        assert!(unsafe { kernel().dnrm2(2, x.as_ptr(), 1) }.is_nan());
    }

    #[test]
    fn test_reference_dnrm2_infinity() {
        let twice = [f64::INFINITY, f64::NEG_INFINITY];
        assert_eq!(unsafe { kernel().dnrm2(2, twice.as_ptr(), 1) }, f64::INFINITY);

        let mixed = [3.0, f64::INFINITY, 4.0];
        assert_eq!(unsafe { kernel().dnrm2(3, mixed.as_ptr(), 1) }, f64::INFINITY);

        let then_nan = [f64::INFINITY, 1.0, f64::NAN];
        assert!(unsafe { kernel().dnrm2(3, then_nan.as_ptr(), 1) }.is_nan());
    }

    #[test]
    fn test_reference_daxpy() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let mut y = [10.0, 20.0, 30.0, 40.0];
        unsafe { kernel().daxpy(4, 2.0, x.as_ptr(), 1, y.as_mut_ptr(), 1) };
        assert_eq!(y, [12.0, 24.0, 36.0, 48.0]);
    }

    #[test]
    fn test_reference_dcopy_negative_increment_reverses() {
        let x = [1.0, 2.0, 3.0];
        let mut y = [0.0; 3];
        unsafe { kernel().dcopy(3, x.as_ptr(), 1, y.as_mut_ptr(), -1) };
        assert_eq!(y, [3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_reference_dscal() {
        let mut x = [1.0, 2.0, 3.0, 4.0];
        unsafe { kernel().dscal(2, 2.0, x.as_mut_ptr(), 2) };
        assert_eq!(x, [2.0, 2.0, 6.0, 4.0]);
    }

    #[test]
    fn test_reference_dscal_ignores_non_positive_increment() {
        let mut x = [1.0, 2.0];
        unsafe { kernel().dscal(2, 5.0, x.as_mut_ptr(), -1) };
        assert_eq!(x, [1.0, 2.0]);
    }

    #[test]
    fn test_reference_dgemv_row_major() {
        // A = [[1, 2, 3], [4, 5, 6]]
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let x = [1.0, 1.0, 1.0];
        let mut y = [100.0, 100.0];
        unsafe {
            kernel().dgemv(ROW, N, 2, 3, 1.0, a.as_ptr(), 3, x.as_ptr(), 1, 0.0, y.as_mut_ptr(), 1);
        }
        assert_eq!(y, [6.0, 15.0]);
    }

    #[test]
    fn test_reference_dgemv_row_major_transposed() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let x = [1.0, 2.0];
        let mut y = [1.0, 1.0, 1.0];
        unsafe {
            kernel().dgemv(ROW, T, 2, 3, 1.0, a.as_ptr(), 3, x.as_ptr(), 1, 1.0, y.as_mut_ptr(), 1);
        }
        // A^T x = [9, 12, 15], plus y.
        assert_eq!(y, [10.0, 13.0, 16.0]);
    }

    #[test]
    fn test_reference_dgemv_column_major() {
        // Same A stored column-major.
        let a = [1.0, 4.0, 2.0, 5.0, 3.0, 6.0];
        let x = [1.0, 0.0, -1.0];
        let mut y = [0.0, 0.0];
        unsafe {
            kernel().dgemv(COL, N, 2, 3, 2.0, a.as_ptr(), 2, x.as_ptr(), 1, 0.0, y.as_mut_ptr(), 1);
        }
        assert_eq!(y, [-4.0, -4.0]);
    }

    #[test]
    fn test_reference_dgemv_invalid_order_is_no_op() {
        let a = [1.0];
        let x = [1.0];
        let mut y = [7.0];
        unsafe {
            kernel().dgemv(99, N, 1, 1, 1.0, a.as_ptr(), 1, x.as_ptr(), 1, 0.0, y.as_mut_ptr(), 1);
        }
        assert_eq!(y, [7.0]);
    }

    #[test]
    fn test_reference_dgemv_invalid_lda_is_no_op() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let x = [1.0, 1.0];
        let mut y = [7.0, 7.0];
        unsafe {
            kernel().dgemv(ROW, N, 2, 2, 1.0, a.as_ptr(), 1, x.as_ptr(), 1, 0.0, y.as_mut_ptr(), 1);
        }
        assert_eq!(y, [7.0, 7.0]);
    }

    #[test]
    fn test_reference_dgemm_row_major() {
        // 2x3 * 3x2 = 2x2
        let a = [
            1.0, 2.0, 3.0, // row 0
            4.0, 5.0, 6.0, // row 1
        ];
        let b = [
            7.0, 8.0, // row 0
            9.0, 10.0, // row 1
            11.0, 12.0, // row 2
        ];
        let mut c = [0.0; 4];
        unsafe {
            kernel().dgemm(
                ROW,
                N,
                N,
                2,
                2,
                3,   // m, n, k
                1.0, // alpha
                a.as_ptr(),
                3, // A, lda
                b.as_ptr(),
                2,   // B, ldb
                0.0, // beta
                c.as_mut_ptr(),
                2, // C, ldc
            );
        }
        assert_eq!(c, [58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_reference_dgemm_column_major_transposed() {
        // A^T * B with A stored 3x2 column-major, B 3x2 column-major.
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let mut c = [1.0; 4];
        unsafe {
            kernel().dgemm(
                COL,
                T,
                N,
                2,
                2,
                3,
                1.0,
                a.as_ptr(),
                3,
                b.as_ptr(),
                3,
                1.0,
                c.as_mut_ptr(),
                2,
            );
        }
        // A^T = [[1, 2, 3], [4, 5, 6]]; A^T B = [[1, 2], [4, 5]] (column-major).
        assert_eq!(c, [2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_reference_dgemm_beta_zero_ignores_nan() {
        let a = [1.0];
        let b = [2.0];
        let mut c = [f64::NAN];
        unsafe {
            kernel().dgemm(ROW, N, N, 1, 1, 1, 1.0, a.as_ptr(), 1, b.as_ptr(), 1, 0.0, c.as_mut_ptr(), 1);
        }
        assert_eq!(c, [2.0]);
    }

    #[test]
    fn test_reference_dgemm_conjugate_rejected() {
        let a = [1.0];
        let b = [2.0];
        let mut c = [5.0];
        let conj = Transpose::Conjugate as i32;
        unsafe {
            kernel().dgemm(ROW, conj, N, 1, 1, 1, 1.0, a.as_ptr(), 1, b.as_ptr(), 1, 0.0, c.as_mut_ptr(), 1);
        }
        assert_eq!(c, [5.0]);
    }

    #[test]
    fn test_kernel_through_reference() {
        let k = kernel();
        let by_ref: &dyn Kernel = &k;
        let x = [3.0, 4.0];
        assert!(approx_eq(unsafe { (&by_ref).dnrm2(2, x.as_ptr(), 1) }, 5.0));
    }

    #[test]
    fn test_backend_name() {
        #[cfg(not(native_blas))]
        assert_eq!(backend_name(), "reference");
        #[cfg(native_blas)]
        assert_ne!(backend_name(), "reference");
    }
}
