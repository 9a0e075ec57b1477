//! Minimal scalar-field index (C3): a sorted `(value, row_offset)` table per
//! chunk, built once a chunk is sealed. There is no growing-segment append
//! path for scalar fields — `append_segment_index` on a scalar field always
//! returns `UnsupportedOperation`; only `build_index_range` exists, called by
//! the host when it wants a point/range lookup accelerated.

use crate::error::{IndexingError, Result};

/// Implemented for every scalar Rust type the engine indexes. Kept separate
/// from `Ord` so future floating-point scalar fields (which are not totally
/// ordered) can still implement it with a defined tie-break.
pub trait ScalarValue: Copy + PartialOrd + Send + Sync + 'static {}

impl ScalarValue for i8 {}
impl ScalarValue for i16 {}
impl ScalarValue for i32 {}
impl ScalarValue for i64 {}
impl ScalarValue for bool {}

/// Sorted `(value, row_offset)` pairs for one chunk of one scalar field.
/// Lookups are a binary search; ties keep row order stable.
pub struct SortedChunkIndex<T: ScalarValue> {
    entries: Vec<(T, i64)>,
}

impl<T: ScalarValue> SortedChunkIndex<T> {
    /// `values` and their row offsets, in row order. Sorts a copy; the
    /// original array owned by the vector store is never reordered.
    pub fn build(values: &[T], base_offset: i64) -> Self {
        let mut entries: Vec<(T, i64)> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| (v, base_offset + i as i64))
            .collect();
        entries.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Row offsets of every entry equal to `target`.
    pub fn find_equal(&self, target: T) -> Vec<i64> {
        let lo = self.entries.partition_point(|(v, _)| {
            v.partial_cmp(&target) == Some(std::cmp::Ordering::Less)
        });
        let mut out = Vec::new();
        for &(v, offset) in &self.entries[lo..] {
            if v.partial_cmp(&target) != Some(std::cmp::Ordering::Equal) {
                break;
            }
            out.push(offset);
        }
        out
    }
}

/// Per-field scalar index spanning every sealed chunk built so far. Unlike
/// `VectorFieldIndexing`, there is no cursor/sync discipline here: each chunk
/// index is immutable once built and the set of built chunks only grows.
pub struct ScalarFieldIndex<T: ScalarValue> {
    chunks: Vec<SortedChunkIndex<T>>,
}

impl<T: ScalarValue> Default for ScalarFieldIndex<T> {
    fn default() -> Self {
        Self { chunks: Vec::new() }
    }
}

impl<T: ScalarValue> ScalarFieldIndex<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and append the index for one newly-sealed chunk.
    pub fn build_index_range(&mut self, values: &[T], base_offset: i64) {
        self.chunks.push(SortedChunkIndex::build(values, base_offset));
    }

    /// Growing segments never support incremental append into an already
    /// built scalar index — a caller reaching this path has mis-dispatched.
    pub fn append_segment_index(&self) -> Result<()> {
        Err(IndexingError::UnsupportedOperation(
            "scalar field indexing does not support append_segment_index",
        ))
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn find_equal(&self, target: T) -> Vec<i64> {
        self.chunks.iter().flat_map(|c| c.find_equal(target)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_equal_returns_all_matches() {
        let mut idx = ScalarFieldIndex::<i32>::new();
        idx.build_index_range(&[5, 1, 5, 3], 0);
        let mut hits = idx.find_equal(5);
        hits.sort();
        assert_eq!(hits, vec![0, 2]);
    }

    #[test]
    fn multiple_chunks_accumulate() {
        let mut idx = ScalarFieldIndex::<i64>::new();
        idx.build_index_range(&[1, 2, 3], 0);
        idx.build_index_range(&[1, 2, 3], 3);
        assert_eq!(idx.num_chunks(), 2);
        let mut hits = idx.find_equal(2);
        hits.sort();
        assert_eq!(hits, vec![1, 4]);
    }

    #[test]
    fn append_segment_index_is_unsupported() {
        let idx = ScalarFieldIndex::<i32>::new();
        assert!(matches!(
            idx.append_segment_index(),
            Err(IndexingError::UnsupportedOperation(_))
        ));
    }
}
