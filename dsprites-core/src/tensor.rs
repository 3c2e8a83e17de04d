//! A dense, row-major nd-array over a reference counted storage buffer.
//!
//! Views created with [Tensor::narrow()] share the storage of the tensor they
//! came from, the same way a torch slice shares the storage of its base tensor.
//! Serializers that write the whole storage (see [crate::torch]) therefore want
//! a [Tensor::to_standalone()] copy first.

use crate::dtypes::Unit;
use std::{ops::Range, sync::Arc, vec::Vec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// Number of elements implied by the shape does not match the data.
    NumelMismatch { expected: usize, found: usize },

    /// The view does not fit inside its storage.
    StorageTooSmall {
        offset: usize,
        numel: usize,
        storage_len: usize,
    },

    /// Row range out of bounds of the leading dimension.
    OutOfBounds { range: Range<usize>, len: usize },

    /// Tried to index the leading dimension of a rank 0 tensor.
    NoLeadingDim,
}

impl std::fmt::Display for ShapeError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ShapeError::NumelMismatch { expected, found } => {
                write!(fmt, "shape expects {expected} elements, found {found}")
            }
            ShapeError::StorageTooSmall {
                offset,
                numel,
                storage_len,
            } => write!(
                fmt,
                "view of {numel} elements at offset {offset} exceeds storage of {storage_len}"
            ),
            ShapeError::OutOfBounds { range, len } => {
                write!(fmt, "rows {range:?} out of bounds for leading dim {len}")
            }
            ShapeError::NoLeadingDim => write!(fmt, "rank 0 tensor has no leading dimension"),
        }
    }
}

impl std::error::Error for ShapeError {}

/// Row-major strides for `shape`, in elements. Saturates at `usize::MAX`.
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides: Vec<usize> = std::vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1].saturating_mul(shape[i + 1]);
    }
    strides
}

/// Number of elements of `shape`, `None` if it overflows `usize`.
pub fn checked_numel(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1, |n: usize, &d| n.checked_mul(d))
}

#[derive(Debug, Clone)]
pub struct Tensor<E> {
    storage: Arc<Vec<E>>,
    offset: usize,
    shape: Vec<usize>,
    strides: Vec<usize>,
}

impl<E: Unit> Tensor<E> {
    /// Takes ownership of `data` as the storage of a new tensor.
    ///
    /// ```rust
    /// # use dsprites_core::tensor::Tensor;
    /// let t = Tensor::from_vec(vec![0u8; 6], [2, 3]).unwrap();
    /// assert_eq!(t.shape(), &[2, 3]);
    /// assert_eq!(t.strides(), &[3, 1]);
    /// ```
    pub fn from_vec(data: Vec<E>, shape: impl Into<Vec<usize>>) -> Result<Self, ShapeError> {
        let shape = shape.into();
        let expected = checked_numel(&shape);
        if expected != Some(data.len()) {
            return Err(ShapeError::NumelMismatch {
                expected: expected.unwrap_or(usize::MAX),
                found: data.len(),
            });
        }
        Ok(Self {
            storage: Arc::new(data),
            offset: 0,
            strides: contiguous_strides(&shape),
            shape,
        })
    }

    /// Builds a contiguous view of `shape` starting `offset` elements into `storage`.
    pub fn from_storage(
        storage: Arc<Vec<E>>,
        offset: usize,
        shape: impl Into<Vec<usize>>,
    ) -> Result<Self, ShapeError> {
        let shape = shape.into();
        let numel = checked_numel(&shape);
        let end = numel.and_then(|n| n.checked_add(offset));
        if end.map_or(true, |end| end > storage.len()) {
            return Err(ShapeError::StorageTooSmall {
                offset,
                numel: numel.unwrap_or(usize::MAX),
                storage_len: storage.len(),
            });
        }
        Ok(Self {
            storage,
            offset,
            strides: contiguous_strides(&shape),
            shape,
        })
    }

    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let numel = shape.iter().product::<usize>();
        Self {
            storage: Arc::new(std::vec![E::default(); numel]),
            offset: 0,
            strides: contiguous_strides(&shape),
            shape,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Offset of the first element of this tensor into its storage.
    pub fn storage_offset(&self) -> usize {
        self.offset
    }

    /// The whole backing storage, including elements outside of this view.
    pub fn storage(&self) -> &[E] {
        &self.storage
    }

    /// The elements of this tensor in row-major order.
    pub fn as_slice(&self) -> &[E] {
        &self.storage[self.offset..self.offset + self.numel()]
    }

    pub fn as_vec(&self) -> Vec<E> {
        self.as_slice().to_vec()
    }

    /// Number of elements of one entry along the leading dimension.
    pub fn row_numel(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Size of the leading dimension.
    pub fn leading_dim(&self) -> Result<usize, ShapeError> {
        self.shape.first().copied().ok_or(ShapeError::NoLeadingDim)
    }

    /// Elements of row `i` of the leading dimension.
    pub fn row(&self, i: usize) -> Result<&[E], ShapeError> {
        let rows = self.narrow(i..i + 1)?;
        let start = rows.offset;
        let len = self.row_numel();
        Ok(&self.storage[start..start + len])
    }

    /// Returns a view of rows `range` of the leading dimension. No data is
    /// copied: the view shares storage with `self`.
    pub fn narrow(&self, range: Range<usize>) -> Result<Self, ShapeError> {
        let len = self.leading_dim()?;
        if range.start > range.end || range.end > len {
            return Err(ShapeError::OutOfBounds { range, len });
        }
        let mut shape = self.shape.clone();
        shape[0] = range.end - range.start;
        Ok(Self {
            storage: self.storage.clone(),
            offset: self.offset + range.start * self.row_numel(),
            strides: self.strides.clone(),
            shape,
        })
    }

    /// Whether the storage holds exactly the elements of this tensor.
    pub fn is_standalone(&self) -> bool {
        self.offset == 0 && self.storage.len() == self.numel()
    }

    /// Whether `self` and `other` are backed by the same allocation.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Copies the elements of this view into a fresh storage of its own.
    pub fn to_standalone(&self) -> Self {
        Self {
            storage: Arc::new(self.as_vec()),
            offset: 0,
            strides: contiguous_strides(&self.shape),
            shape: self.shape.clone(),
        }
    }

    /// Unwraps the storage, copying only when it is shared or larger than the view.
    pub fn into_vec(self) -> Vec<E> {
        if self.is_standalone() {
            Arc::try_unwrap(self.storage).unwrap_or_else(|s| s.as_ref().clone())
        } else {
            self.as_vec()
        }
    }
}
