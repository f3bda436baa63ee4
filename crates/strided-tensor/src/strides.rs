//! Stride and index arithmetic.
//!
//! Pure functions translating between logical multi-indices and physical
//! positions in a storage buffer.

use crate::tensor::TensorError;

/// Computes the strides for a row-major (C-contiguous) tensor layout.
///
/// The rightmost dimension has stride 1 and each other dimension's stride is the
/// product of all dimensions to its right.
///
/// # Examples
///
/// ```rust
/// use strided_tensor::strides::get_strides_from_shape;
///
/// assert_eq!(get_strides_from_shape(&[2, 3]), vec![3, 1]);
/// assert_eq!(get_strides_from_shape(&[2, 3, 4]), vec![12, 4, 1]);
/// ```
pub fn get_strides_from_shape(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut stride = 1;
    for i in (0..shape.len()).rev() {
        strides[i] = stride;
        stride *= shape[i];
    }
    strides
}

/// Returns the number of elements described by `shape`.
///
/// `shape` must be one accepted by [`checked_numel`]; every tensor's shape is.
#[inline]
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().rev().product()
}

/// Returns the number of elements described by `shape`, or `None` if the count
/// or any of the row-major strides of `shape` does not fit in `usize`.
///
/// The product is taken from the last dimension, so the partial products are
/// exactly the strides returned by [`get_strides_from_shape`].
///
/// # Examples
///
/// ```rust
/// use strided_tensor::strides::checked_numel;
///
/// assert_eq!(checked_numel(&[2, 3, 4]), Some(24));
/// assert_eq!(checked_numel(&[1 << 32, 1 << 32]), None);
/// assert_eq!(checked_numel(&[1 << 40, 1 << 40, 0]), Some(0));
/// ```
pub fn checked_numel(shape: &[usize]) -> Option<usize> {
    shape
        .iter()
        .rev()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Resolves a possibly negative index against a dimension of `size` elements.
///
/// Negative indices count from the end. Returns `None` if the result falls
/// outside `[0, size)`.
#[inline]
pub fn normalize_index(index: isize, size: usize) -> Option<usize> {
    let resolved = if index < 0 {
        index + size as isize
    } else {
        index
    };
    if resolved < 0 || resolved as usize >= size {
        return None;
    }
    Some(resolved as usize)
}

/// Translates a logical multi-index into a physical position in storage.
///
/// # Arguments
///
/// * `op` - Name of the calling operation, used in error messages.
/// * `offset` - Physical position of the view's first element.
/// * `shape` - The view's shape.
/// * `strides` - The view's strides.
/// * `indices` - One index per dimension; negative values count from the end.
///
/// # Errors
///
/// Returns [`TensorError::RankMismatch`] if the number of indices differs from the
/// number of dimensions, and [`TensorError::IndexOutOfBounds`] if any index is out
/// of range after normalization.
pub fn logical_to_physical(
    op: &'static str,
    offset: usize,
    shape: &[usize],
    strides: &[usize],
    indices: &[isize],
) -> Result<usize, TensorError> {
    if indices.len() != shape.len() {
        return Err(TensorError::RankMismatch {
            op,
            expected: shape.len(),
            actual: indices.len(),
        });
    }

    let mut position = offset;
    for (dim, ((&index, &size), &stride)) in indices.iter().zip(shape).zip(strides).enumerate() {
        let index = normalize_index(index, size).ok_or(TensorError::IndexOutOfBounds {
            op,
            dim,
            index,
            size,
        })?;
        position += index * stride;
    }
    Ok(position)
}

/// Physical position of an already validated index.
#[inline]
pub(crate) fn physical_unchecked(offset: usize, strides: &[usize], index: &[usize]) -> usize {
    index
        .iter()
        .zip(strides)
        .fold(offset, |acc, (i, s)| acc + i * s)
}

/// Checks whether `strides` describe a row-major layout of `shape`.
///
/// Dimensions of size 1 may carry any stride, since they are never stepped over.
pub fn is_standard_layout(shape: &[usize], strides: &[usize]) -> bool {
    let mut expected_stride: usize = 1;
    for (&dim, &stride) in shape.iter().rev().zip(strides.iter().rev()) {
        if dim != 1 && stride != expected_stride {
            return false;
        }
        expected_stride = expected_stride.saturating_mul(dim);
    }
    true
}

/// Row-major iterator over every logical index of a shape.
///
/// The last dimension varies fastest. Yields nothing when any dimension is zero.
#[derive(Debug, Clone)]
pub struct IndexIter {
    shape: Vec<usize>,
    next: Option<Vec<usize>>,
}

impl IndexIter {
    /// Creates an iterator starting at the all-zero index.
    pub fn new(shape: &[usize]) -> Self {
        let next = if shape.contains(&0) {
            None
        } else {
            Some(vec![0; shape.len()])
        };
        Self {
            shape: shape.to_vec(),
            next,
        }
    }
}

impl Iterator for IndexIter {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;

        let mut following = current.clone();
        for dim in (0..self.shape.len()).rev() {
            following[dim] += 1;
            if following[dim] < self.shape[dim] {
                self.next = Some(following);
                break;
            }
            following[dim] = 0;
        }

        Some(current)
    }
}
