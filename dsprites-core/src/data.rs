//! Splitting the leading dimension of a tensor into equal chunks.

use crate::{
    dtypes::Unit,
    tensor::{ShapeError, Tensor},
};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// Asked for zero chunks.
    NoChunks,

    /// The tensor has no leading dimension to split.
    Shape(ShapeError),
}

impl std::fmt::Display for ChunkError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ChunkError::NoChunks => write!(fmt, "chunk count must be at least 1"),
            ChunkError::Shape(err) => write!(fmt, "{err}"),
        }
    }
}

impl std::error::Error for ChunkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChunkError::Shape(err) => Some(err),
            ChunkError::NoChunks => None,
        }
    }
}

impl From<ShapeError> for ChunkError {
    fn from(e: ShapeError) -> Self {
        Self::Shape(e)
    }
}

/// `chunk_count` equal, contiguous chunks of `floor(sample_count / chunk_count)`
/// samples each. The last `sample_count % chunk_count` samples belong to no chunk.
///
/// ```rust
/// # use dsprites_core::data::ChunkPlan;
/// let plan = ChunkPlan::new(105, 10).unwrap();
/// assert_eq!(plan.slice_size(), 10);
/// assert_eq!(plan.range(9), 90..100);
/// assert_eq!(plan.dropped(), 100..105);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    sample_count: usize,
    chunk_count: usize,
    slice_size: usize,
}

impl ChunkPlan {
    pub fn new(sample_count: usize, chunk_count: usize) -> Result<Self, ChunkError> {
        let slice_size = sample_count
            .checked_div(chunk_count)
            .ok_or(ChunkError::NoChunks)?;
        Ok(Self {
            sample_count,
            chunk_count,
            slice_size,
        })
    }

    /// Plans chunks over the leading dimension of `tensor`.
    pub fn for_tensor<E: Unit>(tensor: &Tensor<E>, chunk_count: usize) -> Result<Self, ChunkError> {
        Self::new(tensor.leading_dim()?, chunk_count)
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn slice_size(&self) -> usize {
        self.slice_size
    }

    /// Sample range of chunk `i`. Panics if `i >= chunk_count`.
    pub fn range(&self, i: usize) -> Range<usize> {
        assert!(
            i < self.chunk_count,
            "chunk {i} out of {}",
            self.chunk_count
        );
        i * self.slice_size..(i + 1) * self.slice_size
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.chunk_count).map(|i| self.range(i))
    }

    /// Samples covered by some chunk.
    pub fn covered(&self) -> Range<usize> {
        0..self.chunk_count * self.slice_size
    }

    /// Trailing samples left out of every chunk.
    pub fn dropped(&self) -> Range<usize> {
        self.covered().end..self.sample_count
    }

    /// Iterates zero-copy views of each chunk of `tensor`.
    pub fn chunks<'a, E: Unit>(&'a self, tensor: &'a Tensor<E>) -> Chunks<'a, E> {
        Chunks {
            plan: self,
            tensor,
            next: 0,
        }
    }
}

/// Iterator over the chunks of a tensor, see [ChunkPlan::chunks()].
pub struct Chunks<'a, E> {
    plan: &'a ChunkPlan,
    tensor: &'a Tensor<E>,
    next: usize,
}

impl<'a, E: Unit> Iterator for Chunks<'a, E> {
    type Item = Result<Tensor<E>, ShapeError>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.plan.chunk_count {
            return None;
        }
        let range = self.plan.range(self.next);
        self.next += 1;
        Some(self.tensor.narrow(range))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.plan.chunk_count - self.next;
        (n, Some(n))
    }
}

impl<'a, E: Unit> ExactSizeIterator for Chunks<'a, E> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_split() {
        let plan = ChunkPlan::new(100, 10).unwrap();
        assert_eq!(plan.slice_size(), 10);
        let ranges: Vec<_> = plan.ranges().collect();
        assert_eq!(ranges.len(), 10);
        assert_eq!(ranges[0], 0..10);
        assert_eq!(ranges[9], 90..100);
        assert_eq!(plan.covered(), 0..100);
        assert!(plan.dropped().is_empty());
    }

    #[test]
    fn test_remainder_dropped() {
        let plan = ChunkPlan::new(737280, 10).unwrap();
        assert_eq!(plan.slice_size(), 73728);
        assert!(plan.dropped().is_empty());

        let plan = ChunkPlan::new(105, 10).unwrap();
        assert_eq!(plan.covered(), 0..100);
        assert_eq!(plan.dropped(), 100..105);
        for (a, b) in plan.ranges().zip(plan.ranges().skip(1)) {
            assert_eq!(a.end, b.start);
        }
    }

    #[test]
    fn test_more_chunks_than_samples() {
        let plan = ChunkPlan::new(3, 10).unwrap();
        assert_eq!(plan.slice_size(), 0);
        assert!(plan.ranges().all(|r| r.is_empty()));
        assert_eq!(plan.dropped(), 0..3);
    }

    #[test]
    fn test_zero_chunks() {
        assert_eq!(ChunkPlan::new(10, 0), Err(ChunkError::NoChunks));
    }

    #[test]
    fn test_chunk_views() {
        let t = Tensor::from_vec((0..24u8).collect(), [6, 2, 2]).unwrap();
        let plan = ChunkPlan::for_tensor(&t, 4).unwrap();
        assert_eq!(plan.slice_size(), 1);

        let chunks = plan.chunks(&t);
        assert_eq!(chunks.len(), 4);
        let chunks: Vec<_> = chunks.collect::<Result<_, _>>().unwrap();
        assert_eq!(chunks[3].shape(), &[1, 2, 2]);
        assert_eq!(chunks[3].as_slice(), &[12, 13, 14, 15]);
        assert!(chunks.iter().all(|c| c.shares_storage_with(&t)));

        let scalar = Tensor::<u8>::zeros(Vec::new());
        assert_eq!(
            ChunkPlan::for_tensor(&scalar, 4),
            Err(ChunkError::Shape(ShapeError::NoLeadingDim))
        );
        assert_eq!(ChunkPlan::for_tensor(&t, 0), Err(ChunkError::NoChunks));
    }
}
