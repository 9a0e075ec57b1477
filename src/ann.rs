//! The external ANN index contract (I2): build once, append forever, search
//! at any point in between. This crate ships exactly one implementation
//! (`ann_diskann::DiskAnnGrowingIndex`) but callers are expected to program
//! against the trait so a different backend can be swapped in without
//! touching `field_indexing.rs`.

use std::collections::BTreeMap;

use crate::error::Result;

pub type BuildParams = BTreeMap<String, String>;
pub type SearchParams = BTreeMap<String, String>;

/// A non-owning view over a contiguous run of `dim`-wide row vectors. Always
/// borrowed from a `VectorStore` chunk or a caller-supplied search batch;
/// this crate never copies vector data beyond what the backend itself
/// requires.
pub struct VectorDataset<'a> {
    pub data: &'a [f32],
    pub dim: usize,
}

impl<'a> VectorDataset<'a> {
    pub fn new(data: &'a [f32], dim: usize) -> Self {
        assert_eq!(data.len() % dim, 0, "dataset is not a whole number of rows");
        Self { data, dim }
    }

    pub fn num_rows(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn row(&self, i: usize) -> &'a [f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }
}

/// Flattened row-major nearest-neighbour results for a batch of queries —
/// mirrors the shape a query planner expects back from a batched search call.
#[derive(Debug)]
pub struct AnnSearchResults {
    pub topk: usize,
    pub ids: Vec<i64>,
    pub distances: Vec<f32>,
}

/// Handle to one field's external ANN index. A fresh handle starts untrained;
/// `build` may be called exactly once, after which only `append` and
/// `search` are valid.
pub trait AnnIndexHandle: Send + Sync {
    /// Train the index structure on its first batch of vectors. Called
    /// exactly once per handle, when the segment's row count first crosses
    /// the configured build threshold.
    fn build(&self, dataset: VectorDataset<'_>, row_ids: &[i64], params: &BuildParams) -> Result<()>;

    /// Insert additional vectors into an already-built index. May be called
    /// any number of times after `build`.
    fn append(&self, dataset: VectorDataset<'_>, row_ids: &[i64]) -> Result<()>;

    /// Search with whatever data has been built/appended so far. Valid only
    /// after at least one `build` call.
    fn search(
        &self,
        queries: VectorDataset<'_>,
        topk: usize,
        params: &SearchParams,
    ) -> Result<AnnSearchResults>;

    fn is_trained(&self) -> bool;

    fn count(&self) -> i64;
}
