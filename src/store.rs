//! Concurrent chunked vector storage (I1 / C6).
//!
//! In production this is owned by the host segment; the indexing core only
//! ever sees it through the `VectorStore` trait. `ChunkedVectorStore` is a
//! concrete, independently-testable implementation — the flat, lock-guarded
//! layout is adapted from the same pattern the ANN provider below uses for
//! its own vector storage.

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicI64, Ordering};

/// Zero-copy read contract for a growing segment's backing vector buffer.
pub trait VectorStore {
    /// Fixed for the lifetime of the store.
    fn size_per_chunk(&self) -> i64;

    /// Monotone non-decreasing as more chunks are allocated.
    fn num_chunk(&self) -> i64;

    /// Flat `size_per_chunk * dim` contiguous elements for `chunk_id`,
    /// borrowed for as long as the returned guard is held — no vector data
    /// is copied to satisfy a read. Panics if `chunk_id` is out of range —
    /// the caller is expected to only ever ask for chunks covered by rows
    /// it has already reserved.
    fn chunk_data(&self, chunk_id: i64) -> MappedRwLockReadGuard<'_, [f32]>;

    fn dim(&self) -> usize;
}

/// Append-only store of fixed-size chunks of `dim`-wide float vectors.
///
/// Single-writer, many-reader: `reserve` + `insert` are expected to be
/// serialized by the caller (matching `IndexingRecord`'s "at most one
/// in-flight append per segment" precondition); `chunk_data` never blocks on
/// a concurrent insert into a *different*, still-growing chunk because reads
/// only ever touch rows whose insert has already returned.
pub struct ChunkedVectorStore {
    dim: usize,
    size_per_chunk: i64,
    chunks: RwLock<Vec<Vec<f32>>>,
    reserved: AtomicI64,
}

impl ChunkedVectorStore {
    pub fn new(dim: usize, size_per_chunk: i64) -> Self {
        assert!(size_per_chunk > 0, "size_per_chunk must be positive");
        Self {
            dim,
            size_per_chunk,
            chunks: RwLock::new(Vec::new()),
            reserved: AtomicI64::new(0),
        }
    }

    /// Reserve `size` row slots, returning the starting offset. Models the
    /// host segment's row-slot reservation that precedes a call to
    /// `IndexingRecord::appending_index`.
    pub fn reserve(&self, size: i64) -> i64 {
        self.reserved.fetch_add(size, Ordering::SeqCst)
    }

    /// Write `data` (a flat buffer of `data.len() / dim` rows) starting at
    /// `offset`, growing new chunks as needed. `offset` and `offset + rows`
    /// must fall within previously reserved space.
    pub fn insert(&self, offset: i64, data: &[f32]) {
        assert_eq!(data.len() % self.dim, 0, "data is not a whole number of rows");
        let rows = (data.len() / self.dim) as i64;
        let mut chunks = self.chunks.write();
        let mut row = offset;
        let mut src = 0usize;
        while row < offset + rows {
            let chunk_id = (row / self.size_per_chunk) as usize;
            while chunks.len() <= chunk_id {
                chunks.push(vec![0.0; (self.size_per_chunk as usize) * self.dim]);
            }
            let in_chunk_row = row % self.size_per_chunk;
            let room = self.size_per_chunk - in_chunk_row;
            let take = room.min(offset + rows - row);
            let dst_off = (in_chunk_row as usize) * self.dim;
            let len = (take as usize) * self.dim;
            chunks[chunk_id][dst_off..dst_off + len].copy_from_slice(&data[src..src + len]);
            row += take;
            src += len;
        }
    }
}

impl VectorStore for ChunkedVectorStore {
    fn size_per_chunk(&self) -> i64 {
        self.size_per_chunk
    }

    fn num_chunk(&self) -> i64 {
        self.chunks.read().len() as i64
    }

    fn chunk_data(&self, chunk_id: i64) -> MappedRwLockReadGuard<'_, [f32]> {
        RwLockReadGuard::map(self.chunks.read(), |chunks| chunks[chunk_id as usize].as_slice())
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_within_single_chunk() {
        let store = ChunkedVectorStore::new(4, 8);
        let off = store.reserve(3);
        let data: Vec<f32> = (0..12).map(|x| x as f32).collect();
        store.insert(off, &data);
        assert_eq!(store.num_chunk(), 1);
        assert_eq!(&store.chunk_data(0)[..12], &data[..]);
    }

    #[test]
    fn insert_spanning_multiple_chunks() {
        let store = ChunkedVectorStore::new(2, 4);
        let off = store.reserve(6);
        let data: Vec<f32> = (0..12).map(|x| x as f32).collect();
        store.insert(off, &data);
        assert_eq!(store.num_chunk(), 2);
        assert_eq!(&store.chunk_data(0)[..8], &data[..8]);
        assert_eq!(&store.chunk_data(1)[..4], &data[8..]);
    }

    #[test]
    fn reserve_is_monotone() {
        let store = ChunkedVectorStore::new(1, 16);
        let a = store.reserve(5);
        let b = store.reserve(7);
        assert_eq!(a, 0);
        assert_eq!(b, 5);
    }
}
