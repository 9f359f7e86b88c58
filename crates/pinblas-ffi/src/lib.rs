//! # pinblas FFI gateway
//!
//! This crate forwards strided regions of managed heap arrays to a native
//! BLAS library without copying them.
//!
//! ## Overview
//!
//! Key components:
//!
//! - **Views**: [`VectorView`] and [`MatrixView`] describe a logical vector
//!   or matrix as offset, stride and leading dimension over a flat array.
//! - **Pin bracket**: [`PinSet`] pins every distinct array argument of one
//!   call and releases them all when dropped, on every exit path.
//! - **Kernels**: the [`Kernel`] trait has one strongly typed method per
//!   native entry point. The backend is fixed at build time by cargo
//!   feature (`openblas`, `accelerate`, `cblas`); without one the portable
//!   [`ReferenceKernel`] is used.
//! - **Gateway**: [`Gateway`] exposes dot, norm2, axpy, copy, scale, gemv
//!   and gemm over views.
//!
//! ## Call Sequence
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Managed heap                              │
//! │  ┌──────────────┐                                              │
//! │  │  ArrayId     │  ──(pin)──>  ┌──────────────────┐            │
//! │  │  (may move)  │              │  PinnedArray      │            │
//! │  └──────────────┘              │  (cannot move)    │            │
//! │                                └────────┬─────────┘            │
//! │                                         │ base + offset        │
//! ├─────────────────────────────────────────┼──────────────────────┤
//! │                      FFI Boundary       │                      │
//! ├─────────────────────────────────────────┼──────────────────────┤
//! │  ┌──────────────────────────────────────▼───────────────────┐  │
//! │  │                   cblas_* kernel                          │  │
//! │  │  - receives effective pointer, stride, ld, flags          │  │
//! │  │  - no allocation and no collection until it returns       │  │
//! │  └──────────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use pinblas_ffi::{Gateway, VectorView};
//! use pinblas_rts_heap::ManagedHeap;
//!
//! let heap = ManagedHeap::with_default_config();
//! let x = heap.alloc_from(&[1.0, 2.0, 3.0]).unwrap();
//! let y = heap.alloc_from(&[4.0, 5.0, 6.0]).unwrap();
//!
//! let gateway = Gateway::new(&heap);
//! // Safety: both views cover exactly three elements of their arrays.
//! let dot = unsafe { gateway.dot(VectorView::contiguous(x, 3), VectorView::contiguous(y, 3)) }
//!     .unwrap();
//! assert_eq!(dot, 32.0);
//! ```
//!
//! ## Trust Boundary
//!
//! Offsets, strides, lengths and leading dimensions are not checked against
//! array sizes. A view that reaches outside its array is undefined behaviour
//! in the native kernel, exactly as with a direct BLAS call. Only handle
//! validity is checked, because pinning fails for dead handles.

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_arguments)]

pub mod blas;
#[cfg(native_blas)]
pub mod cblas;
pub mod ffi;
pub mod gateway;
pub mod pinned;
pub mod tensor;
pub mod view;

pub use blas::{backend_name, DefaultKernel, Kernel, ReferenceKernel};
pub use gateway::{Gateway, GatewayStats};
pub use pinned::PinSet;
pub use view::{
    Diagonal, MatrixView, Operation, Order, Side, Transpose, Triangularity, VectorView,
};

pub use pinblas_rts_heap::{ArrayId, HeapError, ManagedHeap};

use thiserror::Error;

/// Errors that can occur at the gateway.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FfiError {
    /// An array argument could not be pinned. No kernel was called.
    #[error("cannot pin argument `{argument}`: {source}")]
    PinFailed {
        /// Name of the argument, as in the operation's signature.
        argument: &'static str,
        /// Why the heap refused the pin.
        #[source]
        source: HeapError,
    },

    /// A heap operation outside the pin bracket failed.
    #[error("heap error: {0}")]
    Heap(#[from] HeapError),

    /// A call pinned more distinct arrays than any operation takes.
    #[error("too many array arguments: at most {max} distinct arrays per call")]
    TooManyArguments {
        /// Capacity of the pin bracket.
        max: usize,
    },

    /// Null pointer passed across the C ABI.
    #[error("null pointer in FFI call")]
    NullPointer,
}

/// Result type for gateway operations.
pub type FfiResult<T> = Result<T, FfiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_failed_message_names_argument() {
        let err = FfiError::PinFailed {
            argument: "y",
            source: HeapError::UnknownArray(ArrayId::from_raw(9)),
        };
        assert_eq!(err.to_string(), "cannot pin argument `y`: unknown array #9");
    }

    #[test]
    fn test_heap_error_converts() {
        let err: FfiError = HeapError::InvalidLength(3).into();
        assert_eq!(err, FfiError::Heap(HeapError::InvalidLength(3)));
    }
}
