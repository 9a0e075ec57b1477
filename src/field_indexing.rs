//! Per-field indexing state machines (C2/C3) and the factory that builds
//! them from schema metadata (C4.5).
//!
//! `FieldIndexing` stands in for the source system's virtual-dispatch base
//! class: a `HashMap<FieldId, FieldIndexing>` cannot hold a type-parameterized
//! `ScalarFieldIndex<T>` for varying `T`, so the scalar arm carries its own
//! inner enum over the concrete Rust types this crate indexes.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use tracing::{error, info};

use crate::ann::{AnnIndexHandle, AnnSearchResults, SearchParams, VectorDataset};
use crate::ann_diskann::DiskAnnGrowingIndex;
use crate::config::SegcoreConfig;
use crate::error::{IndexingError, Result};
use crate::index_config::{SearchInfo, VecIndexConfig};
use crate::meta::FieldIndexMeta;
use crate::scalar_index::ScalarFieldIndex;
use crate::schema::{DataType, FieldId, FieldMeta};
use crate::store::VectorStore;

/// Either a direct borrow of a single chunk's backing slice, or an owned
/// buffer assembled from several. `Deref`s to `[f32]` either way so callers
/// don't need to care which case they got.
enum Gathered<'a> {
    Borrowed(MappedRwLockReadGuard<'a, [f32]>),
    Copied(Vec<f32>),
}

impl std::ops::Deref for Gathered<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        match self {
            Gathered::Borrowed(guard) => guard,
            Gathered::Copied(buf) => buf,
        }
    }
}

/// Gather the inclusive row range `[beg, end]` out of a chunked store. When
/// the whole range falls inside one chunk this borrows the chunk directly —
/// no vector data is copied. A range spanning multiple chunks is
/// necessarily copied into one contiguous buffer, since the chunks are not
/// adjacent in memory.
fn gather_range(vec_base: &dyn VectorStore, dim: usize, beg: i64, end: i64) -> Gathered<'_> {
    let per_chunk = vec_base.size_per_chunk();
    let chunk_id_beg = beg / per_chunk;
    let chunk_id_end = end / per_chunk;

    if chunk_id_beg == chunk_id_end {
        let lo = ((beg - chunk_id_beg * per_chunk) as usize) * dim;
        let hi = lo + ((end - beg + 1) as usize) * dim;
        let guard = vec_base.chunk_data(chunk_id_beg);
        return Gathered::Borrowed(MappedRwLockReadGuard::map(guard, |chunk| &chunk[lo..hi]));
    }

    let vec_num = (end - beg + 1) as usize;
    let mut buf = Vec::with_capacity(vec_num * dim);
    for chunk_id in chunk_id_beg..=chunk_id_end {
        let chunk = vec_base.chunk_data(chunk_id);
        let chunk_offset = if chunk_id == chunk_id_beg {
            (beg - chunk_id * per_chunk) as usize
        } else {
            0
        };
        let chunk_sz = if chunk_id == chunk_id_end {
            (end - chunk_id * per_chunk + 1) as usize - chunk_offset
        } else if chunk_id == chunk_id_beg {
            per_chunk as usize - chunk_offset
        } else {
            per_chunk as usize
        };
        buf.extend_from_slice(&chunk[chunk_offset * dim..(chunk_offset + chunk_sz) * dim]);
    }
    Gathered::Copied(buf)
}

/// Per-field float-vector indexing state machine. Maintains the (possibly
/// absent) ANN index and the indexed-prefix cursor readers rely on.
///
/// Single-writer assumption: the owning segment guarantees at most one
/// in-flight call to `append_segment_index` per instance. That is what makes
/// the non-atomic false→true transition of `sync_with_index` safe even
/// though it is stored in an `AtomicBool` (chosen for `Send + Sync`
/// convenience, not for concurrent-writer safety).
pub struct VectorFieldIndexing {
    field_id: FieldId,
    dim: usize,
    config: VecIndexConfig,
    collection_name: String,
    index: RwLock<Option<Box<dyn AnnIndexHandle>>>,
    index_cur: AtomicI64,
    sync_with_index: AtomicBool,
}

impl VectorFieldIndexing {
    pub fn new(field_id: FieldId, dim: usize, collection_name: String, config: VecIndexConfig) -> Self {
        Self {
            field_id,
            dim,
            config,
            collection_name,
            index: RwLock::new(None),
            index_cur: AtomicI64::new(0),
            sync_with_index: AtomicBool::new(false),
        }
    }

    pub fn field_id(&self) -> FieldId {
        self.field_id
    }

    pub fn get_index_cursor(&self) -> i64 {
        self.index_cur.load(Ordering::Acquire)
    }

    /// The (possibly absent) trained index, behind a read guard: the guard
    /// derefs to `&Option<Box<dyn AnnIndexHandle>>`.
    pub fn get_segment_indexing(&self) -> RwLockReadGuard<'_, Option<Box<dyn AnnIndexHandle>>> {
        self.index.read()
    }

    pub fn get_build_params(&self) -> &std::collections::BTreeMap<String, String> {
        self.config.build_params()
    }

    pub fn get_search_params(&self, search_info: &SearchInfo) -> SearchInfo {
        self.config.search_conf(search_info)
    }

    pub fn search(&self, queries: VectorDataset<'_>, topk: usize, params: &SearchParams) -> Result<AnnSearchResults> {
        let guard = self.index.read();
        let index = guard
            .as_ref()
            .ok_or_else(|| IndexingError::BackendSearchFailure(anyhow::anyhow!("index has not been trained yet")))?;
        index.search(queries, topk, params)
    }

    /// Advance the index to cover `[reserved_offset, reserved_offset+size)`.
    /// All of that range must already be durably written into `vec_base` and
    /// `data_source` (the caller's own flat buffer for just this call's
    /// rows) before this is invoked.
    ///
    /// Runs Phase A (train, at most once, when the call first crosses the
    /// build threshold) followed by Phase B (append, every call once
    /// trained) in that order.
    pub fn append_segment_index(
        &self,
        reserved_offset: i64,
        size: i64,
        vec_base: &dyn VectorStore,
        data_source: &[f32],
    ) -> Result<()> {
        assert!(size > 0, "append_segment_index called with a non-positive size");

        self.maybe_train(reserved_offset, size, vec_base)?;
        self.maybe_append(reserved_offset, size, vec_base, data_source)?;
        Ok(())
    }

    fn maybe_train(&self, reserved_offset: i64, size: i64, vec_base: &dyn VectorStore) -> Result<()> {
        let threshold = self.config.build_threshold();
        if reserved_offset + size <= threshold {
            return Ok(());
        }

        let mut guard = self.index.write();
        if guard.is_some() {
            return Ok(());
        }

        let vector_id_beg = self.index_cur.load(Ordering::Acquire);
        let vector_id_end = threshold;
        let vec_num = vector_id_end - vector_id_beg + 1;

        info!(
            field_id = self.field_id.0,
            collection = %self.collection_name,
            vec_num,
            index_type = self.config.index_type(),
            "training growing-segment index",
        );

        let gathered = gather_range(vec_base, self.dim, vector_id_beg, vector_id_end);
        let row_ids: Vec<i64> = (vector_id_beg..=vector_id_end).collect();

        let handle = DiskAnnGrowingIndex::new(self.dim, self.config.metric_type(), self.config.build_params());
        let dataset = VectorDataset::new(&gathered, self.dim);
        handle.build(dataset, &row_ids, self.config.build_params()).map_err(|e| {
            error!(field_id = self.field_id.0, error = %e, "growing-segment index build failed");
            e
        })?;

        self.index_cur.fetch_add(vec_num, Ordering::Release);
        *guard = Some(Box::new(handle));
        Ok(())
    }

    fn maybe_append(
        &self,
        reserved_offset: i64,
        size: i64,
        vec_base: &dyn VectorStore,
        data_source: &[f32],
    ) -> Result<()> {
        let guard = self.index.read();
        let handle = match guard.as_ref() {
            Some(h) => h,
            None => return Ok(()),
        };

        let vector_id_beg = self.index_cur.load(Ordering::Acquire);
        let vector_id_end = reserved_offset + size - 1;
        let vec_num = vector_id_end - vector_id_beg + 1;
        if vec_num <= 0 {
            return Ok(());
        }

        if self.sync_with_index.load(Ordering::Acquire) {
            let row_ids: Vec<i64> = (vector_id_beg..=vector_id_end).collect();
            let dataset = VectorDataset::new(data_source, self.dim);
            assert_eq!(
                dataset.num_rows() as i64,
                vec_num,
                "data_source does not cover the full cursor-to-reserved-end gap"
            );
            handle.append(dataset, &row_ids).map_err(|e| {
                error!(field_id = self.field_id.0, error = %e, "growing-segment index append failed");
                e
            })?;
            self.index_cur.fetch_add(vec_num, Ordering::Release);
        } else {
            let per_chunk = vec_base.size_per_chunk();
            let chunk_id_beg = vector_id_beg / per_chunk;
            let chunk_id_end = vector_id_end / per_chunk;

            for chunk_id in chunk_id_beg..=chunk_id_end {
                let cursor = self.index_cur.load(Ordering::Acquire);
                let chunk_offset = if chunk_id == chunk_id_beg {
                    cursor - chunk_id * per_chunk
                } else {
                    0
                };
                let chunk_sz = if chunk_id == chunk_id_end {
                    vector_id_end % per_chunk - chunk_offset + 1
                } else if chunk_id == chunk_id_beg {
                    per_chunk - chunk_offset
                } else {
                    per_chunk
                };

                let chunk = vec_base.chunk_data(chunk_id);
                let lo = (chunk_offset as usize) * self.dim;
                let hi = lo + (chunk_sz as usize) * self.dim;
                let dataset = VectorDataset::new(&chunk[lo..hi], self.dim);
                let row_ids: Vec<i64> = (cursor..cursor + chunk_sz).collect();

                handle.append(dataset, &row_ids).map_err(|e| {
                    error!(field_id = self.field_id.0, error = %e, "growing-segment index chunk-walk append failed");
                    e
                })?;
                self.index_cur.fetch_add(chunk_sz, Ordering::Release);
            }

            self.sync_with_index.store(true, Ordering::Release);
        }

        Ok(())
    }
}

/// Per-field scalar indexing. Unlike `VectorFieldIndexing` there is no
/// segment-wide append path — `append_segment_index` always fails with
/// `UnsupportedOperation`; chunk indexes are built individually through
/// `build_index_range`.
pub enum ScalarFieldIndexing {
    Bool(ScalarFieldIndex<bool>),
    Int8(ScalarFieldIndex<i8>),
    Int16(ScalarFieldIndex<i16>),
    Int32(ScalarFieldIndex<i32>),
    Int64(ScalarFieldIndex<i64>),
}

impl ScalarFieldIndexing {
    pub fn append_segment_index(&self) -> Result<()> {
        Err(IndexingError::UnsupportedOperation(
            "scalar field indexing does not support append_segment_index",
        ))
    }
}

/// Dispatch peer of `VectorFieldIndexing` and `ScalarFieldIndexing`, held by
/// `IndexingRecord` per indexed field.
pub enum FieldIndexing {
    Vector(VectorFieldIndexing),
    Scalar(ScalarFieldIndexing),
}

impl FieldIndexing {
    pub fn as_vector(&self) -> Result<&VectorFieldIndexing> {
        match self {
            FieldIndexing::Vector(v) => Ok(v),
            FieldIndexing::Scalar(_) => Err(IndexingError::InvalidIndexing {
                expected: "VectorFieldIndexing",
                found: "ScalarFieldIndexing",
            }),
        }
    }

    pub fn as_scalar(&self) -> Result<&ScalarFieldIndexing> {
        match self {
            FieldIndexing::Scalar(s) => Ok(s),
            FieldIndexing::Vector(_) => Err(IndexingError::InvalidIndexing {
                expected: "ScalarFieldIndexing",
                found: "VectorFieldIndexing",
            }),
        }
    }
}

/// Builds the `FieldIndexing` for one field. `field_index_meta` is only
/// required for `VectorFloat` fields — `VecIndexConfig` is derived from it —
/// every other field type ignores it entirely, so scalar fields can be built
/// for a field the collection's index metadata never mentions.
///
/// Schema/dispatch misuse (a binary-vector field, or a scalar type this
/// crate has no indexer for) is a programmer-visible abort, matching the
/// source system's `AssertInfo` policy — it is not something a caller can
/// recover from at runtime.
pub fn create_index(
    field_meta: &FieldMeta,
    field_index_meta: Option<&FieldIndexMeta>,
    collection_name: &str,
    segment_max_row_count: i64,
    segcore_config: &SegcoreConfig,
) -> Result<FieldIndexing> {
    match field_meta.data_type {
        DataType::VectorFloat => {
            let field_index_meta = field_index_meta
                .expect("vector float fields always carry a FieldIndexMeta by the time create_index is called");
            let config = VecIndexConfig::new(segment_max_row_count, field_index_meta, segcore_config)?;
            Ok(FieldIndexing::Vector(VectorFieldIndexing::new(
                field_meta.field_id,
                field_meta.dim(),
                collection_name.to_string(),
                config,
            )))
        }
        DataType::VectorBinary => {
            panic!("binary vector fields are not supported by the growing-segment indexing engine")
        }
        DataType::Bool => Ok(FieldIndexing::Scalar(ScalarFieldIndexing::Bool(ScalarFieldIndex::new()))),
        DataType::Int8 => Ok(FieldIndexing::Scalar(ScalarFieldIndexing::Int8(ScalarFieldIndex::new()))),
        DataType::Int16 => Ok(FieldIndexing::Scalar(ScalarFieldIndexing::Int16(ScalarFieldIndex::new()))),
        DataType::Int32 => Ok(FieldIndexing::Scalar(ScalarFieldIndexing::Int32(ScalarFieldIndex::new()))),
        DataType::Int64 => Ok(FieldIndexing::Scalar(ScalarFieldIndexing::Int64(ScalarFieldIndex::new()))),
        DataType::Float | DataType::Double | DataType::VarChar => {
            panic!("field type {:?} has no growing-segment indexer", field_meta.data_type)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_config::GROWING_INDEX_TYPE;
    use crate::meta::{DIM, INDEX_TYPE, METRIC_TYPE};
    use crate::store::ChunkedVectorStore;
    use std::collections::BTreeMap;

    fn make_config(max_rows: i64, chunk_rows: i64, dim: usize) -> (VecIndexConfig, SegcoreConfig) {
        let mut index_params = BTreeMap::new();
        index_params.insert(INDEX_TYPE.to_string(), "IVF_FLAT".to_string());
        index_params.insert(METRIC_TYPE.to_string(), "L2".to_string());
        let mut type_params = BTreeMap::new();
        type_params.insert(DIM.to_string(), dim.to_string());
        let meta = FieldIndexMeta::new(FieldId(1), index_params, type_params).unwrap();

        let mut cfg = SegcoreConfig::new();
        cfg.set_chunk_rows(chunk_rows).set_nlist(8).set_nprobe(4);
        let vic = VecIndexConfig::new(max_rows, &meta, &cfg).unwrap();
        (vic, cfg)
    }

    fn random_rows(n: usize, dim: usize, seed: u32) -> Vec<f32> {
        let mut x = seed.wrapping_mul(2654435761).max(1);
        let mut out = Vec::with_capacity(n * dim);
        for _ in 0..n * dim {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            out.push((x % 1000) as f32 / 1000.0);
        }
        out
    }

    #[test]
    fn below_threshold_stays_untrained() {
        let (config, cfg) = make_config(1_000_000, 1024, 8);
        let indexing = VectorFieldIndexing::new(FieldId(1), 8, "coll".to_string(), config);
        let store = ChunkedVectorStore::new(8, cfg.chunk_rows());

        for _ in 0..10 {
            let off = store.reserve(100);
            let rows = random_rows(100, 8, off as u32);
            store.insert(off, &rows);
            indexing.append_segment_index(off, 100, &store, &rows).unwrap();
        }

        assert!(indexing.get_segment_indexing().is_none());
        assert_eq!(indexing.get_index_cursor(), 0);
    }

    #[test]
    fn single_batch_crossing_threshold_trains_then_appends() {
        // build_threshold = floor(2000 * 0.10) = 200
        let (config, cfg) = make_config(2_000, 64, 8);
        let indexing = VectorFieldIndexing::new(FieldId(1), 8, "coll".to_string(), config);
        let store = ChunkedVectorStore::new(8, cfg.chunk_rows());

        let off = store.reserve(500);
        let rows = random_rows(500, 8, 7);
        store.insert(off, &rows);
        indexing.append_segment_index(off, 500, &store, &rows).unwrap();

        assert!(indexing.get_segment_indexing().is_some());
        assert_eq!(indexing.get_index_cursor(), 500);
    }

    #[test]
    fn multi_batch_reaches_sync_fast_path() {
        let (config, cfg) = make_config(2_000, 64, 8);
        let indexing = VectorFieldIndexing::new(FieldId(1), 8, "coll".to_string(), config);
        let store = ChunkedVectorStore::new(8, cfg.chunk_rows());

        let mut total = 0i64;
        for batch in 0..5 {
            let off = store.reserve(200);
            let rows = random_rows(200, 8, batch + 1);
            store.insert(off, &rows);
            indexing.append_segment_index(off, 200, &store, &rows).unwrap();
            total += 200;
        }

        assert_eq!(indexing.get_index_cursor(), total);
        assert!(indexing.get_segment_indexing().is_some());
    }

    #[test]
    fn scalar_append_segment_index_is_unsupported() {
        let scalar = ScalarFieldIndexing::Int32(ScalarFieldIndex::new());
        assert!(matches!(
            scalar.append_segment_index(),
            Err(IndexingError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn field_indexing_downcast_mismatch_is_reported() {
        let scalar = FieldIndexing::Scalar(ScalarFieldIndexing::Int32(ScalarFieldIndex::new()));
        assert!(matches!(
            scalar.as_vector(),
            Err(IndexingError::InvalidIndexing { .. })
        ));
    }

    #[test]
    fn create_index_dispatches_by_field_type() {
        let mut index_params = BTreeMap::new();
        index_params.insert(INDEX_TYPE.to_string(), "IVF_FLAT".to_string());
        index_params.insert(METRIC_TYPE.to_string(), "L2".to_string());
        let mut type_params = BTreeMap::new();
        type_params.insert(DIM.to_string(), "16".to_string());
        let field_index_meta = FieldIndexMeta::new(FieldId(1), index_params, type_params).unwrap();

        let field_meta = FieldMeta {
            field_id: FieldId(1),
            name: "embedding".to_string(),
            data_type: DataType::VectorFloat,
            dim: Some(16),
            metric_type: Some("L2".to_string()),
        };

        let cfg = SegcoreConfig::new();
        let indexing = create_index(&field_meta, Some(&field_index_meta), "coll", 100_000, &cfg).unwrap();
        let vector = indexing.as_vector().unwrap();
        assert_eq!(vector.config.index_type(), GROWING_INDEX_TYPE);
    }

    #[test]
    fn create_index_builds_scalar_field_without_field_index_meta() {
        let field_meta = FieldMeta {
            field_id: FieldId(2),
            name: "category".to_string(),
            data_type: DataType::Int32,
            dim: None,
            metric_type: None,
        };

        let cfg = SegcoreConfig::new();
        let indexing = create_index(&field_meta, None, "coll", 100_000, &cfg).unwrap();
        assert!(indexing.as_scalar().is_ok());
    }
}
