//! Operations that allocate their result.
//!
//! Each helper allocates a fresh contiguous array on the heap and then runs
//! gateway primitives into it, leaving its inputs untouched. Allocation
//! always happens before any pin is taken. If a gateway call fails, the
//! fresh array is freed again before the error is returned.

use pinblas_rts_heap::ArrayId;
use tracing::warn;

use crate::blas::Kernel;
use crate::gateway::Gateway;
use crate::view::{MatrixView, Order, Transpose, VectorView};
use crate::FfiResult;

/// Allocate `len` zeroed elements and run `fill` on the new array, freeing
/// it again if `fill` fails.
fn with_fresh<K: Kernel>(
    gw: &Gateway<'_, K>,
    len: usize,
    fill: impl FnOnce(ArrayId) -> FfiResult<()>,
) -> FfiResult<ArrayId> {
    let heap = gw.heap();
    let result = heap.alloc_zeroed(len)?;
    match fill(result) {
        Ok(()) => Ok(result),
        Err(err) => {
            if let Err(free_err) = heap.free(result) {
                warn!(array = %result, error = %free_err, "could not free unused result");
            }
            Err(err)
        }
    }
}

/// A new array holding `alpha * x`.
///
/// # Errors
///
/// Fails if the result cannot be allocated or an array cannot be pinned.
///
/// # Safety
///
/// `x` must lie within its array.
pub unsafe fn scaled<K: Kernel>(gw: &Gateway<'_, K>, alpha: f64, x: VectorView) -> FfiResult<ArrayId> {
    with_fresh(gw, x.len(), |result| {
        let out = VectorView::contiguous(result, x.length);
        // Safety: `out` spans exactly the fresh array; `x` is the caller's.
        unsafe {
            gw.copy(x, out)?;
            gw.scale(alpha, out)
        }
    })
}

/// A new array holding `alpha * x + y`, over `x.length` elements.
///
/// # Errors
///
/// As for [`scaled`].
///
/// # Safety
///
/// `x` and `y` must lie within their arrays.
pub unsafe fn added<K: Kernel>(
    gw: &Gateway<'_, K>,
    alpha: f64,
    x: VectorView,
    y: VectorView,
) -> FfiResult<ArrayId> {
    with_fresh(gw, x.len(), |result| {
        let out = VectorView::contiguous(result, x.length);
        // Safety: as for `scaled`; `y` is read over `x.length` elements.
        unsafe {
            gw.copy(VectorView { length: x.length, ..y }, out)?;
            gw.axpy(alpha, x, out)
        }
    })
}

/// A new array holding `alpha * op(A) * x`.
///
/// The result has one element per row of `op(A)`: `m` without transpose,
/// `n` with one.
///
/// # Errors
///
/// As for [`scaled`].
///
/// # Safety
///
/// `a` and `x` must lie within their arrays for the given shape.
pub unsafe fn matvec<K: Kernel>(
    gw: &Gateway<'_, K>,
    order: Order,
    trans: Transpose,
    m: i32,
    n: i32,
    alpha: f64,
    a: MatrixView,
    x: VectorView,
) -> FfiResult<ArrayId> {
    let rows = if trans.is_transposed() { n } else { m };
    let len = usize::try_from(rows).unwrap_or(0);
    with_fresh(gw, len, |result| {
        let y = VectorView::contiguous(result, rows);
        // Safety: `y` spans the fresh array; `a` and `x` are the caller's.
        unsafe { gw.gemv(order.raw(), trans.raw(), m, n, alpha, a, x, 1.0, y) }
    })
}

/// A new `m` by `n` matrix holding `alpha * op(A) * op(B)`, densely stored
/// in `order`.
///
/// # Errors
///
/// As for [`scaled`].
///
/// # Safety
///
/// `a` and `b` must lie within their arrays for the given shape.
pub unsafe fn matmul<K: Kernel>(
    gw: &Gateway<'_, K>,
    order: Order,
    trans_a: Transpose,
    trans_b: Transpose,
    m: i32,
    n: i32,
    k: i32,
    alpha: f64,
    a: MatrixView,
    b: MatrixView,
) -> FfiResult<ArrayId> {
    let rows = usize::try_from(m).unwrap_or(0);
    let cols = usize::try_from(n).unwrap_or(0);
    with_fresh(gw, rows * cols, |result| {
        let c = match order {
            Order::RowMajor => MatrixView::row_major(result, m, n),
            Order::ColumnMajor => MatrixView::column_major(result, m, n),
        };
        // A zero dimension still needs a legal leading dimension.
        let c = c.with_leading_dimension(c.leading_dimension.max(1));
        // Safety: `c` spans the fresh array; `a` and `b` are the caller's.
        unsafe {
            gw.gemm(
                order.raw(),
                trans_a.raw(),
                trans_b.raw(),
                m,
                n,
                k,
                alpha,
                a,
                b,
                1.0,
                c,
            )
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blas::ReferenceKernel;
    use crate::FfiError;
    use pinblas_rts_heap::{HeapError, ManagedHeap};

    fn gateway(heap: &ManagedHeap) -> Gateway<'_, ReferenceKernel> {
        Gateway::with_kernel(heap, ReferenceKernel::new())
    }

    #[test]
    fn test_scaled_leaves_input_alone() {
        let heap = ManagedHeap::with_default_config();
        let x = heap.alloc_from(&[0.0, 1.0, 9.0, 2.0, 9.0, 3.0]).unwrap();
        let gw = gateway(&heap);

        let result = unsafe { scaled(&gw, 2.0, VectorView::new(x, 3, 2, 1)) }.unwrap();

        assert_eq!(heap.to_vec(result).unwrap(), vec![2.0, 4.0, 6.0]);
        assert_eq!(heap.to_vec(x).unwrap(), vec![0.0, 1.0, 9.0, 2.0, 9.0, 3.0]);
    }

    #[test]
    fn test_added() {
        let heap = ManagedHeap::with_default_config();
        let x = heap.alloc_from(&[1.0, 1.0, 1.0]).unwrap();
        let y = heap.alloc_from(&[10.0, 20.0, 30.0]).unwrap();
        let gw = gateway(&heap);

        let result = unsafe {
            added(&gw, 2.0, VectorView::contiguous(x, 3), VectorView::contiguous(y, 3))
        }
        .unwrap();

        assert_eq!(heap.to_vec(result).unwrap(), vec![12.0, 22.0, 32.0]);
        assert_eq!(heap.to_vec(y).unwrap(), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_matvec_transposed_length() {
        let heap = ManagedHeap::with_default_config();
        let a = heap.alloc_from(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let x = heap.alloc_from(&[1.0, 1.0]).unwrap();
        let gw = gateway(&heap);

        let result = unsafe {
            matvec(
                &gw,
                Order::RowMajor,
                Transpose::Transpose,
                2,
                3,
                1.0,
                MatrixView::row_major(a, 2, 3),
                VectorView::contiguous(x, 2),
            )
        }
        .unwrap();

        assert_eq!(heap.to_vec(result).unwrap(), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_matmul_column_major() {
        let heap = ManagedHeap::with_default_config();
        // A is 2x3, B is 3x1, both column-major.
        let a = heap.alloc_from(&[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]).unwrap();
        let b = heap.alloc_from(&[1.0, 1.0, 1.0]).unwrap();
        let gw = gateway(&heap);

        let result = unsafe {
            matmul(
                &gw,
                Order::ColumnMajor,
                Transpose::NoTranspose,
                Transpose::NoTranspose,
                2,
                1,
                3,
                1.0,
                MatrixView::column_major(a, 2, 3),
                MatrixView::column_major(b, 3, 1),
            )
        }
        .unwrap();

        assert_eq!(heap.to_vec(result).unwrap(), vec![6.0, 15.0]);
    }

    #[test]
    fn test_failed_helper_frees_result() {
        let heap = ManagedHeap::with_default_config();
        let dead = heap.alloc_zeroed(3).unwrap();
        heap.free(dead).unwrap();
        let gw = gateway(&heap);
        let live_before = heap.stats().live_arrays;

        let err = unsafe { scaled(&gw, 2.0, VectorView::contiguous(dead, 3)) }.unwrap_err();

        assert_eq!(
            err,
            FfiError::PinFailed {
                argument: "x",
                source: HeapError::UnknownArray(dead)
            }
        );
        assert_eq!(heap.stats().live_arrays, live_before);
    }
}
