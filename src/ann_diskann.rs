//! `AnnIndexHandle` implementation backed by an in-memory DiskANN graph
//! (Vamana-style, incrementally insertable).
//!
//! Uses flat contiguous vector storage for cache-friendly memory layout.
//! Adjacency lists are stored in a DashMap for concurrent insert safety.
//! Because the backing graph builds incrementally by nature, `build` and
//! `append` share the same insert path: `build` additionally performs the
//! one-time graph initialization from the first vector.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use dashmap::DashMap;
use diskann::{
    error::Infallible,
    graph::{
        config::{Builder, MaxDegree, PruneKind},
        glue, search_output_buffer::IdDistance,
        AdjacencyList, DiskANNIndex, SearchParams as DiskAnnSearchParams,
    },
    provider, utils::VectorRepr, ANNError, ANNResult,
};
use diskann_vector::distance::Metric as DiskAnnMetric;
use parking_lot::RwLock;

use crate::ann::{AnnIndexHandle, AnnSearchResults, BuildParams, SearchParams, VectorDataset};
use crate::error::{IndexingError, Result};

fn parse_metric(metric_type: &str) -> DiskAnnMetric {
    match metric_type {
        "IP" => DiskAnnMetric::InnerProduct,
        // L2 is the growing-segment engine's default; an unrecognized metric
        // string is a schema/metadata bug caught much earlier in
        // `VecIndexConfig::new`, not something this layer re-validates.
        _ => DiskAnnMetric::L2,
    }
}

fn parse_usize(params: &std::collections::BTreeMap<String, String>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

const DEFAULT_MAX_DEGREE: usize = 64;
const DEFAULT_BUILD_COMPLEXITY: usize = 100;
const DEFAULT_ALPHA: f32 = 1.2;

#[derive(Debug)]
struct Inner {
    vectors: RwLock<Vec<f32>>,
    adjacency: DashMap<u32, AdjacencyList<u32>>,
    count: AtomicU32,
    start_point_ids: RwLock<Vec<u32>>,
    dimension: usize,
    metric: DiskAnnMetric,
}

#[derive(Debug, Clone)]
struct Provider(Arc<Inner>);

impl Provider {
    fn new(dimension: usize, metric: DiskAnnMetric) -> Self {
        Self(Arc::new(Inner {
            vectors: RwLock::new(Vec::new()),
            adjacency: DashMap::new(),
            count: AtomicU32::new(0),
            start_point_ids: RwLock::new(Vec::new()),
            dimension,
            metric,
        }))
    }

    fn len(&self) -> usize {
        self.0.count.load(Ordering::Relaxed) as usize
    }

    fn insert_start_point(&self, id: u32, vector: &[f32]) {
        {
            let mut vecs = self.0.vectors.write();
            let offset = id as usize * self.0.dimension;
            if vecs.len() < offset + self.0.dimension {
                vecs.resize(offset + self.0.dimension, 0.0);
            }
            vecs[offset..offset + self.0.dimension].copy_from_slice(vector);
        }
        self.0.adjacency.insert(id, AdjacencyList::new());
        self.0.count.fetch_max(id + 1, Ordering::Relaxed);
        self.0.start_point_ids.write().push(id);
    }

    fn get_vector(&self, id: u32) -> Option<Vec<f32>> {
        let vecs = self.0.vectors.read();
        let offset = id as usize * self.0.dimension;
        if offset + self.0.dimension <= vecs.len() {
            Some(vecs[offset..offset + self.0.dimension].to_vec())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
struct DefaultContext;

impl provider::ExecutionContext for DefaultContext {
    fn wrap_spawn<F, T>(&self, f: F) -> impl std::future::Future<Output = T> + Send + 'static
    where
        F: std::future::Future<Output = T> + Send + 'static,
    {
        f
    }
}

#[derive(Debug, Clone, Copy)]
struct ProviderError(u32);

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid id {}", self.0)
    }
}

impl std::error::Error for ProviderError {}

impl From<ProviderError> for ANNError {
    #[track_caller]
    fn from(err: ProviderError) -> Self {
        ANNError::opaque(err)
    }
}

diskann::always_escalate!(ProviderError);

impl provider::DataProvider for Provider {
    type Context = DefaultContext;
    type InternalId = u32;
    type ExternalId = u32;
    type Error = ProviderError;

    fn to_internal_id(&self, _context: &DefaultContext, gid: &u32) -> std::result::Result<u32, ProviderError> {
        Ok(*gid)
    }

    fn to_external_id(&self, _context: &DefaultContext, id: u32) -> std::result::Result<u32, ProviderError> {
        Ok(id)
    }
}

impl provider::Delete for Provider {
    async fn delete(&self, _context: &Self::Context, _gid: &Self::ExternalId) -> std::result::Result<(), Self::Error> {
        Ok(())
    }

    async fn release(&self, _context: &Self::Context, _id: Self::InternalId) -> std::result::Result<(), Self::Error> {
        Ok(())
    }

    async fn status_by_internal_id(
        &self,
        _context: &DefaultContext,
        id: u32,
    ) -> std::result::Result<provider::ElementStatus, Self::Error> {
        if (id as usize) < self.len() {
            Ok(provider::ElementStatus::Valid)
        } else {
            Err(ProviderError(id))
        }
    }

    fn status_by_external_id(
        &self,
        context: &DefaultContext,
        gid: &u32,
    ) -> impl std::future::Future<Output = std::result::Result<provider::ElementStatus, Self::Error>> + Send {
        self.status_by_internal_id(context, *gid)
    }
}

impl provider::SetElement<[f32]> for Provider {
    type SetError = ANNError;
    type Guard = provider::NoopGuard<u32>;

    async fn set_element(
        &self,
        _context: &DefaultContext,
        id: &u32,
        element: &[f32],
    ) -> std::result::Result<Self::Guard, Self::SetError> {
        {
            let mut vecs = self.0.vectors.write();
            let offset = *id as usize * self.0.dimension;
            if vecs.len() < offset + self.0.dimension {
                vecs.resize(offset + self.0.dimension, 0.0);
            }
            vecs[offset..offset + self.0.dimension].copy_from_slice(element);
        }
        self.0.adjacency.insert(*id, AdjacencyList::new());
        self.0.count.fetch_max(*id + 1, Ordering::Relaxed);
        Ok(provider::NoopGuard::new(*id))
    }
}

impl provider::DefaultAccessor for Provider {
    type Accessor<'a> = NeighborHandle<'a>;

    fn default_accessor(&self) -> Self::Accessor<'_> {
        NeighborHandle { inner: &self.0 }
    }
}

#[derive(Debug, Clone, Copy)]
struct NeighborHandle<'a> {
    inner: &'a Inner,
}

impl provider::HasId for NeighborHandle<'_> {
    type Id = u32;
}

impl provider::NeighborAccessor for NeighborHandle<'_> {
    async fn get_neighbors(self, id: Self::Id, neighbors: &mut AdjacencyList<Self::Id>) -> ANNResult<Self> {
        match self.inner.adjacency.get(&id) {
            Some(adj) => {
                neighbors.overwrite_trusted(&adj);
                Ok(self)
            }
            None => Err(ANNError::opaque(ProviderError(id))),
        }
    }
}

impl provider::NeighborAccessorMut for NeighborHandle<'_> {
    async fn set_neighbors(self, id: Self::Id, neighbors: &[Self::Id]) -> ANNResult<Self> {
        match self.inner.adjacency.get_mut(&id) {
            Some(mut adj) => {
                adj.clear();
                adj.extend_from_slice(neighbors);
                Ok(self)
            }
            None => Err(ANNError::opaque(ProviderError(id))),
        }
    }

    async fn append_vector(self, id: Self::Id, neighbors: &[Self::Id]) -> ANNResult<Self> {
        match self.inner.adjacency.get_mut(&id) {
            Some(mut adj) => {
                adj.extend_from_slice(neighbors);
                Ok(self)
            }
            None => Err(ANNError::opaque(ProviderError(id))),
        }
    }
}

#[derive(Debug)]
struct ProviderAccessor<'a> {
    inner: &'a Inner,
    buffer: Box<[f32]>,
}

impl<'a> ProviderAccessor<'a> {
    fn new(inner: &'a Inner) -> Self {
        let buffer = vec![0.0f32; inner.dimension].into_boxed_slice();
        Self { inner, buffer }
    }
}

impl provider::HasId for ProviderAccessor<'_> {
    type Id = u32;
}

impl provider::Accessor for ProviderAccessor<'_> {
    type Extended = Box<[f32]>;
    type Element<'e>
        = &'e [f32]
    where
        Self: 'e;
    type ElementRef<'e> = &'e [f32];
    type GetError = ProviderError;

    async fn get_element(&mut self, id: u32) -> std::result::Result<&[f32], ProviderError> {
        let vecs = self.inner.vectors.read();
        let offset = id as usize * self.inner.dimension;
        if offset + self.inner.dimension <= vecs.len() {
            self.buffer.copy_from_slice(&vecs[offset..offset + self.inner.dimension]);
            Ok(&*self.buffer)
        } else {
            Err(ProviderError(id))
        }
    }
}

impl<'a> provider::DelegateNeighbor<'a> for ProviderAccessor<'_> {
    type Delegate = NeighborHandle<'a>;
    fn delegate_neighbor(&'a mut self) -> Self::Delegate {
        NeighborHandle { inner: self.inner }
    }
}

impl provider::BuildQueryComputer<[f32]> for ProviderAccessor<'_> {
    type QueryComputerError = Infallible;
    type QueryComputer = <f32 as VectorRepr>::QueryDistance;

    fn build_query_computer(&self, from: &[f32]) -> std::result::Result<Self::QueryComputer, Self::QueryComputerError> {
        Ok(f32::query_distance(from, self.inner.metric))
    }
}

impl provider::BuildDistanceComputer for ProviderAccessor<'_> {
    type DistanceComputerError = Infallible;
    type DistanceComputer = <f32 as VectorRepr>::Distance;

    fn build_distance_computer(&self) -> std::result::Result<Self::DistanceComputer, Self::DistanceComputerError> {
        Ok(f32::distance(self.inner.metric, Some(self.inner.dimension)))
    }
}

impl glue::SearchExt for ProviderAccessor<'_> {
    fn starting_points(&self) -> impl std::future::Future<Output = ANNResult<Vec<u32>>> + Send {
        let ids = self.inner.start_point_ids.read().clone();
        futures_util::future::ok(ids)
    }
}

impl glue::ExpandBeam<[f32]> for ProviderAccessor<'_> {}
impl glue::FillSet for ProviderAccessor<'_> {}

impl<'a> glue::AsElement<&'a [f32]> for ProviderAccessor<'a> {
    type Error = Infallible;
    fn as_element(
        &mut self,
        vector: &'a [f32],
        _id: Self::Id,
    ) -> impl std::future::Future<Output = std::result::Result<Self::Element<'_>, Self::Error>> + Send {
        std::future::ready(Ok(vector))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FullPrecisionStrategy;

impl glue::SearchStrategy<Provider, [f32]> for FullPrecisionStrategy {
    type QueryComputer = <f32 as VectorRepr>::QueryDistance;
    type PostProcessor = glue::CopyIds;
    type SearchAccessorError = Infallible;
    type SearchAccessor<'a> = ProviderAccessor<'a>;

    fn search_accessor<'a>(
        &'a self,
        provider: &'a Provider,
        _context: &'a DefaultContext,
    ) -> std::result::Result<ProviderAccessor<'a>, Infallible> {
        Ok(ProviderAccessor::new(&provider.0))
    }

    fn post_processor(&self) -> Self::PostProcessor {
        Default::default()
    }
}

impl glue::PruneStrategy<Provider> for FullPrecisionStrategy {
    type DistanceComputer = <f32 as VectorRepr>::Distance;
    type PruneAccessor<'a> = ProviderAccessor<'a>;
    type PruneAccessorError = Infallible;

    fn prune_accessor<'a>(
        &'a self,
        provider: &'a Provider,
        _context: &'a DefaultContext,
    ) -> std::result::Result<Self::PruneAccessor<'a>, Self::PruneAccessorError> {
        Ok(ProviderAccessor::new(&provider.0))
    }
}

impl glue::InsertStrategy<Provider, [f32]> for FullPrecisionStrategy {
    type PruneStrategy = Self;

    fn prune_strategy(&self) -> Self::PruneStrategy {
        *self
    }

    fn insert_search_accessor<'a>(
        &'a self,
        provider: &'a Provider,
        _context: &'a DefaultContext,
    ) -> std::result::Result<Self::SearchAccessor<'a>, Self::SearchAccessorError> {
        Ok(ProviderAccessor::new(&provider.0))
    }
}

struct SearchScratch {
    ids: Vec<u32>,
    distances: Vec<f32>,
}

impl SearchScratch {
    fn new() -> Self {
        Self { ids: Vec::new(), distances: Vec::new() }
    }

    fn ensure_capacity(&mut self, k: usize) {
        if self.ids.len() < k {
            self.ids.resize(k, 0);
            self.distances.resize(k, 0.0);
        }
    }
}

thread_local! {
    static SEARCH_SCRATCH: RefCell<SearchScratch> = RefCell::new(SearchScratch::new());
}

/// Growing-segment ANN handle backed by an in-memory DiskANN graph. `build`
/// and `append` route through the same incremental insert path; the only
/// distinction is that `build` also performs one-time graph initialization
/// off the first inserted vector.
pub struct DiskAnnGrowingIndex {
    dim: usize,
    max_degree: usize,
    build_complexity: usize,
    alpha: f32,
    provider: Provider,
    index: RwLock<Option<DiskANNIndex<Provider>>>,
}

impl DiskAnnGrowingIndex {
    pub fn new(dim: usize, metric_type: &str, build_params: &BuildParams) -> Self {
        let metric = parse_metric(metric_type);
        Self {
            dim,
            max_degree: parse_usize(build_params, "max_degree", DEFAULT_MAX_DEGREE),
            build_complexity: parse_usize(build_params, "build_complexity", DEFAULT_BUILD_COMPLEXITY),
            alpha: DEFAULT_ALPHA,
            provider: Provider::new(dim, metric),
            index: RwLock::new(None),
        }
    }

    fn insert_one(&self, id: u32, vector: &[f32]) -> Result<()> {
        {
            let idx_guard = self.index.read();
            if let Some(index) = idx_guard.as_ref() {
                let strategy = FullPrecisionStrategy;
                let ctx = DefaultContext;
                crate::runtime::block_on(index.insert(strategy, &ctx, &id, vector))
                    .map_err(|e| IndexingError::BackendAppendFailure(anyhow!("{}", e)))?;
                return Ok(());
            }
        }

        let mut idx_guard = self.index.write();
        if let Some(index) = idx_guard.as_ref() {
            let strategy = FullPrecisionStrategy;
            let ctx = DefaultContext;
            crate::runtime::block_on(index.insert(strategy, &ctx, &id, vector))
                .map_err(|e| IndexingError::BackendAppendFailure(anyhow!("{}", e)))?;
        } else {
            self.provider.insert_start_point(id, vector);
            let prune_kind = PruneKind::from_metric(self.provider.0.metric);
            let mut builder = Builder::new(self.max_degree, MaxDegree::default_slack(), self.build_complexity, prune_kind);
            builder.alpha(self.alpha);
            let config = builder
                .build()
                .map_err(|e| IndexingError::BackendBuildFailure(anyhow!("{}", e)))?;
            *idx_guard = Some(DiskANNIndex::new(config, self.provider.clone(), None));
        }
        Ok(())
    }
}

impl AnnIndexHandle for DiskAnnGrowingIndex {
    fn build(&self, dataset: VectorDataset<'_>, row_ids: &[i64], _params: &BuildParams) -> Result<()> {
        assert_eq!(dataset.dim, self.dim, "dataset width does not match index dimension");
        assert_eq!(dataset.num_rows(), row_ids.len(), "row_ids length mismatch");
        for (i, &row_id) in row_ids.iter().enumerate() {
            self.insert_one(row_id as u32, dataset.row(i))?;
        }
        Ok(())
    }

    fn append(&self, dataset: VectorDataset<'_>, row_ids: &[i64]) -> Result<()> {
        assert_eq!(dataset.dim, self.dim, "dataset width does not match index dimension");
        assert_eq!(dataset.num_rows(), row_ids.len(), "row_ids length mismatch");
        for (i, &row_id) in row_ids.iter().enumerate() {
            self.insert_one(row_id as u32, dataset.row(i))?;
        }
        Ok(())
    }

    fn search(&self, queries: VectorDataset<'_>, topk: usize, params: &SearchParams) -> Result<AnnSearchResults> {
        assert_eq!(queries.dim, self.dim, "query width does not match index dimension");
        if !self.is_trained() {
            return Err(IndexingError::BackendSearchFailure(anyhow!("index has not been built yet")));
        }
        let n = self.provider.len();
        let mut ids = Vec::with_capacity(queries.num_rows() * topk);
        let mut distances = Vec::with_capacity(queries.num_rows() * topk);

        for qi in 0..queries.num_rows() {
            let query = queries.row(qi);
            let k = topk.min(n.max(1));

            let idx_guard = self.index.read();
            let index = idx_guard
                .as_ref()
                .ok_or_else(|| IndexingError::BackendSearchFailure(anyhow!("index has not been built yet")))?;

            let strategy = FullPrecisionStrategy;
            let ctx = DefaultContext;
            let l_search = k.max(parse_usize(params, "nprobe", self.build_complexity));
            let search_params = DiskAnnSearchParams::new(k, l_search, None)
                .map_err(|e| IndexingError::BackendSearchFailure(anyhow!("{}", e)))?;

            let mut scratch = SEARCH_SCRATCH.with(|cell| {
                let mut s = cell.borrow_mut();
                s.ensure_capacity(k);
                s.ids[..k].fill(0);
                s.distances[..k].fill(0.0);
                std::mem::replace(&mut *s, SearchScratch::new())
            });

            let search_result: Result<usize> = (|| {
                let id_slice = &mut scratch.ids[..k];
                let dist_slice = &mut scratch.distances[..k];
                let mut buffer = IdDistance::new(id_slice, dist_slice);
                let stats = crate::runtime::block_on(index.search(&strategy, &ctx, query, &search_params, &mut buffer))
                    .map_err(|e| IndexingError::BackendSearchFailure(anyhow!("{}", e)))?;
                Ok(stats.result_count as usize)
            })();

            if search_result.is_ok() {
                for i in 0..topk {
                    if i < *search_result.as_ref().unwrap() {
                        ids.push(scratch.ids[i] as i64);
                        distances.push(scratch.distances[i]);
                    } else {
                        ids.push(-1);
                        distances.push(f32::MAX);
                    }
                }
            }

            SEARCH_SCRATCH.with(|cell| {
                *cell.borrow_mut() = scratch;
            });

            search_result?;
        }

        Ok(AnnSearchResults { topk, ids, distances })
    }

    fn is_trained(&self) -> bool {
        self.index.read().is_some()
    }

    fn count(&self) -> i64 {
        self.provider.len() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(rows: &[Vec<f32>], _dim: usize) -> Vec<f32> {
        rows.iter().flat_map(|r| r.iter().copied()).collect()
    }

    #[test]
    fn build_then_append_then_search() {
        let index = DiskAnnGrowingIndex::new(4, "L2", &BuildParams::new());
        let rows = vec![
            vec![0.0, 0.0, 0.0, 0.0],
            vec![1.0, 1.0, 1.0, 1.0],
            vec![2.0, 2.0, 2.0, 2.0],
        ];
        let flat = dataset(&rows, 4);
        let ds = VectorDataset::new(&flat, 4);
        index.build(ds, &[0, 1, 2], &BuildParams::new()).unwrap();
        assert!(index.is_trained());
        assert_eq!(index.count(), 3);

        let extra = vec![3.0, 3.0, 3.0, 3.0];
        let ds2 = VectorDataset::new(&extra, 4);
        index.append(ds2, &[3]).unwrap();
        assert_eq!(index.count(), 4);

        let query = vec![0.1, 0.1, 0.1, 0.1];
        let qds = VectorDataset::new(&query, 4);
        let results = index.search(qds, 2, &SearchParams::new()).unwrap();
        assert_eq!(results.ids.len(), 2);
        assert_eq!(results.ids[0], 0);
    }

    #[test]
    fn search_before_build_fails() {
        let index = DiskAnnGrowingIndex::new(4, "L2", &BuildParams::new());
        let query = vec![0.0; 4];
        let qds = VectorDataset::new(&query, 4);
        let err = index.search(qds, 1, &SearchParams::new()).unwrap_err();
        assert!(matches!(err, IndexingError::BackendSearchFailure(_)));
    }
}
