//! View descriptors and kernel enumerations.
//!
//! A view describes how to read a flat array as a vector or matrix without
//! copying it. Views are plain values; nothing here touches the heap.
//!
//! The order, transpose, triangularity, diagonal and side enumerations carry
//! the CBLAS integer values verbatim, so they can be passed straight through
//! to a kernel.

use pinblas_rts_heap::ArrayId;

/// A strided vector over a heap array.
///
/// Logical element `i` lives at array index `offset + i * stride` for
/// non-negative strides. Negative strides follow the BLAS convention: the
/// vector is walked from its far end, so element `i` lives at
/// `offset + (length - 1 - i) * |stride|`. In both cases the view touches
/// indices `offset ..= offset + (length - 1) * |stride|`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VectorView {
    /// The array holding the elements.
    pub buffer: ArrayId,
    /// Number of logical elements.
    pub length: i32,
    /// Distance between consecutive elements.
    pub stride: i32,
    /// Index of the first element the view touches.
    pub offset: usize,
}

impl VectorView {
    /// Create a view.
    #[must_use]
    pub const fn new(buffer: ArrayId, length: i32, stride: i32, offset: usize) -> Self {
        Self {
            buffer,
            length,
            stride,
            offset,
        }
    }

    /// A dense view of the first `length` elements.
    #[must_use]
    pub const fn contiguous(buffer: ArrayId, length: i32) -> Self {
        Self::new(buffer, length, 1, 0)
    }

    /// Array index of logical element `i`.
    ///
    /// Returns `None` when `i` is outside the view or the index overflows.
    #[must_use]
    pub fn index(&self, i: usize) -> Option<usize> {
        let length = usize::try_from(self.length).ok()?;
        if i >= length {
            return None;
        }
        let step = self.stride.unsigned_abs() as usize;
        let position = if self.stride >= 0 { i } else { length - 1 - i };
        position.checked_mul(step)?.checked_add(self.offset)
    }

    /// Array indices of every logical element, in logical order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).map_while(move |i| self.index(i))
    }

    /// Number of logical elements (zero for non-positive lengths).
    #[must_use]
    pub fn len(&self) -> usize {
        usize::try_from(self.length).unwrap_or(0)
    }

    /// Whether the view has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of array elements the view must be able to reach, counted
    /// from index zero. An array shorter than this cannot hold the view.
    #[must_use]
    pub fn required_len(&self) -> Option<usize> {
        match self.len() {
            0 => Some(0),
            n => (n - 1)
                .checked_mul(self.stride.unsigned_abs() as usize)?
                .checked_add(self.offset)?
                .checked_add(1),
        }
    }
}

/// A dense matrix over a heap array.
///
/// `order` and `transpose` hold raw kernel integers and are never
/// interpreted by the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatrixView {
    /// The array holding the elements.
    pub buffer: ArrayId,
    /// Rows of the stored matrix.
    pub rows: i32,
    /// Columns of the stored matrix.
    pub cols: i32,
    /// Distance between consecutive rows (row-major) or columns
    /// (column-major).
    pub leading_dimension: i32,
    /// Index of element (0, 0).
    pub offset: usize,
    /// Storage order, as a kernel integer (see [`Order`]).
    pub order: i32,
    /// Transpose flag, as a kernel integer (see [`Transpose`]).
    pub transpose: i32,
}

impl MatrixView {
    /// A dense row-major matrix with no padding and no transpose.
    #[must_use]
    pub const fn row_major(buffer: ArrayId, rows: i32, cols: i32) -> Self {
        Self {
            buffer,
            rows,
            cols,
            leading_dimension: cols,
            offset: 0,
            order: Order::RowMajor.raw(),
            transpose: Transpose::NoTranspose.raw(),
        }
    }

    /// A dense column-major matrix with no padding and no transpose.
    #[must_use]
    pub const fn column_major(buffer: ArrayId, rows: i32, cols: i32) -> Self {
        Self {
            buffer,
            rows,
            cols,
            leading_dimension: rows,
            offset: 0,
            order: Order::ColumnMajor.raw(),
            transpose: Transpose::NoTranspose.raw(),
        }
    }

    /// Replace the leading dimension.
    #[must_use]
    pub const fn with_leading_dimension(mut self, leading_dimension: i32) -> Self {
        self.leading_dimension = leading_dimension;
        self
    }

    /// Replace the offset.
    #[must_use]
    pub const fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Replace the transpose flag.
    #[must_use]
    pub const fn with_transpose(mut self, transpose: Transpose) -> Self {
        self.transpose = transpose.raw();
        self
    }

    /// Number of elements spanned from the offset, or `None` when the order
    /// is not a known kernel value or the shape is empty.
    #[must_use]
    pub fn extent(&self) -> Option<usize> {
        let (major, minor) = match Order::from_raw(self.order)? {
            Order::RowMajor => (self.rows, self.cols),
            Order::ColumnMajor => (self.cols, self.rows),
        };
        let major = usize::try_from(major).ok().filter(|&m| m > 0)?;
        let minor = usize::try_from(minor).ok().filter(|&m| m > 0)?;
        let ld = usize::try_from(self.leading_dimension).ok()?;
        (major - 1).checked_mul(ld)?.checked_add(minor)
    }

    /// Whether the leading dimension covers the minor dimension.
    #[must_use]
    pub fn has_valid_leading_dimension(&self) -> bool {
        let minor = match Order::from_raw(self.order) {
            Some(Order::RowMajor) => self.cols,
            Some(Order::ColumnMajor) => self.rows,
            None => return false,
        };
        self.leading_dimension >= minor.max(1)
    }
}

/// Matrix storage order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Order {
    /// Row-major (C-style).
    RowMajor = 101,
    /// Column-major (Fortran-style).
    ColumnMajor = 102,
}

/// Matrix transpose option.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Transpose {
    /// Use the matrix as stored.
    NoTranspose = 111,
    /// Transpose the matrix.
    Transpose = 112,
    /// Conjugate transpose (plain transpose for real data).
    ConjugateTranspose = 113,
    /// Conjugate without transposing.
    Conjugate = 114,
}

/// Which triangle of a matrix is referenced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Triangularity {
    /// Upper triangle.
    Upper = 121,
    /// Lower triangle.
    Lower = 122,
}

/// Whether a triangular matrix has an implicit unit diagonal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Diagonal {
    /// Diagonal is stored.
    NonUnit = 131,
    /// Diagonal is all ones and not referenced.
    Unit = 132,
}

/// Which side a matrix operand is applied from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Side {
    /// Multiply from the left.
    Left = 141,
    /// Multiply from the right.
    Right = 142,
}

macro_rules! kernel_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $ty {
            /// The kernel integer for this value.
            #[must_use]
            pub const fn raw(self) -> i32 {
                self as i32
            }

            /// Decode a kernel integer.
            #[must_use]
            pub const fn from_raw(raw: i32) -> Option<Self> {
                $(
                    if raw == Self::$variant as i32 {
                        return Some(Self::$variant);
                    }
                )+
                None
            }
        }

        impl From<$ty> for i32 {
            fn from(value: $ty) -> Self {
                value.raw()
            }
        }
    };
}

kernel_enum!(Order { RowMajor, ColumnMajor });
kernel_enum!(Transpose {
    NoTranspose,
    Transpose,
    ConjugateTranspose,
    Conjugate
});
kernel_enum!(Triangularity { Upper, Lower });
kernel_enum!(Diagonal { NonUnit, Unit });
kernel_enum!(Side { Left, Right });

impl Transpose {
    /// Whether the operand is used transposed. Conjugation alone does not
    /// transpose.
    #[must_use]
    pub const fn is_transposed(self) -> bool {
        matches!(self, Self::Transpose | Self::ConjugateTranspose)
    }
}

/// The operations the gateway dispatches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Inner product.
    Dot,
    /// Euclidean norm.
    Norm2,
    /// `y <- alpha * x + y`.
    Axpy,
    /// `y <- x`.
    Copy,
    /// `x <- alpha * x`.
    Scale,
    /// Matrix-vector multiply.
    Gemv,
    /// Matrix-matrix multiply.
    Gemm,
}

impl Operation {
    /// Every operation, in declaration order.
    pub const ALL: [Operation; 7] = [
        Self::Dot,
        Self::Norm2,
        Self::Axpy,
        Self::Copy,
        Self::Scale,
        Self::Gemv,
        Self::Gemm,
    ];

    /// Short name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dot => "dot",
            Self::Norm2 => "norm2",
            Self::Axpy => "axpy",
            Self::Copy => "copy",
            Self::Scale => "scale",
            Self::Gemv => "gemv",
            Self::Gemm => "gemm",
        }
    }

    /// The native symbol the operation calls.
    #[must_use]
    pub const fn entry_point(self) -> &'static str {
        match self {
            Self::Dot => "cblas_ddot",
            Self::Norm2 => "cblas_dnrm2",
            Self::Axpy => "cblas_daxpy",
            Self::Copy => "cblas_dcopy",
            Self::Scale => "cblas_dscal",
            Self::Gemv => "cblas_dgemv",
            Self::Gemm => "cblas_dgemm",
        }
    }

    /// Number of array arguments, each pinned once per call.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::Norm2 | Self::Scale => 1,
            Self::Dot | Self::Axpy | Self::Copy => 2,
            Self::Gemv | Self::Gemm => 3,
        }
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
