//! Derives concrete build/search parameter maps from a field's index
//! metadata plus segment configuration (C1). This is pure translation: no
//! ANN call happens here, only string-keyed maps get built.

use std::collections::BTreeMap;

use tracing::info;

use crate::config::SegcoreConfig;
use crate::error::{IndexingError, Result};
use crate::meta::{FieldIndexMeta, DIM, INDEX_TYPE, METRIC_TYPE};

/// The single internal index type the growing-segment engine knows how to
/// build once and then append to. Any `origin_index_type` the user asked for
/// is remembered (`origin_index_type()`) purely so a later sealing pass can
/// rebuild the index the user actually wanted; the growing segment itself
/// always uses this one.
pub const GROWING_INDEX_TYPE: &str = "IVF_FLAT_CC";

const SUPPORTED_INDEX_TYPES: &[&str] = &[GROWING_INDEX_TYPE];

/// Origin index types the growing-segment engine knows how to grow
/// incrementally into `GROWING_INDEX_TYPE`. A request for anything else is
/// rejected at construction rather than silently coerced.
const SUPPORTED_ORIGIN_INDEX_TYPES: &[&str] = &["IVF_FLAT"];

fn build_ratio(index_type: &str) -> f64 {
    match index_type {
        GROWING_INDEX_TYPE => 0.10,
        _ => unreachable!("index_type already validated against the allow-list"),
    }
}

/// Caller-supplied search request, trimmed to what this crate needs to
/// reshape: everything else (topK, round_decimal, the query vectors
/// themselves) is the query planner's concern and is preserved verbatim.
#[derive(Debug, Clone, Default)]
pub struct SearchInfo {
    pub metric_type: String,
    pub search_params: BTreeMap<String, String>,
    pub topk: i64,
    pub round_decimal: i64,
}

#[derive(Debug, Clone)]
pub struct VecIndexConfig {
    max_index_row_count: i64,
    origin_index_type: String,
    index_type: String,
    metric_type: String,
    build_params: BTreeMap<String, String>,
    search_params: BTreeMap<String, String>,
}

impl VecIndexConfig {
    pub fn new(
        max_index_row_count: i64,
        field_index_meta: &FieldIndexMeta,
        segcore_config: &SegcoreConfig,
    ) -> Result<Self> {
        let metric_type = field_index_meta
            .get_index_param(METRIC_TYPE)
            .ok_or(IndexingError::MissingParam(METRIC_TYPE))?
            .to_string();
        let origin_index_type = field_index_meta
            .get_index_param(INDEX_TYPE)
            .ok_or(IndexingError::MissingParam(INDEX_TYPE))?
            .to_string();
        if !SUPPORTED_ORIGIN_INDEX_TYPES.contains(&origin_index_type.as_str()) {
            return Err(IndexingError::UnsupportedIndexType(origin_index_type));
        }

        let index_type = SUPPORTED_INDEX_TYPES[0].to_string();

        let mut build_params = BTreeMap::new();
        build_params.insert(METRIC_TYPE.to_string(), metric_type.clone());
        build_params.insert("nlist".to_string(), segcore_config.nlist().to_string());
        let ssize = (segcore_config.chunk_rows() / segcore_config.nlist().max(1)).max(48);
        build_params.insert("ssize".to_string(), ssize.to_string());
        build_params.insert(DIM.to_string(), field_index_meta.dim().to_string());
        build_params.insert("num_build_thread".to_string(), "1".to_string());

        let mut search_params = BTreeMap::new();
        search_params.insert("nprobe".to_string(), segcore_config.nprobe().to_string());

        info!(
            origin_index_type = %origin_index_type,
            index_type = %index_type,
            metric_type = %metric_type,
            "derived growing-segment index config",
        );

        Ok(Self {
            max_index_row_count,
            origin_index_type,
            index_type,
            metric_type,
            build_params,
            search_params,
        })
    }

    /// Row count at which training fires: `⌊max_index_row_count * ratio⌋`.
    pub fn build_threshold(&self) -> i64 {
        let ratio = build_ratio(&self.index_type);
        debug_assert!((0.0..1.0).contains(&ratio));
        (self.max_index_row_count as f64 * ratio) as i64
    }

    pub fn index_type(&self) -> &str {
        &self.index_type
    }

    pub fn origin_index_type(&self) -> &str {
        &self.origin_index_type
    }

    pub fn metric_type(&self) -> &str {
        &self.metric_type
    }

    pub fn build_params(&self) -> &BTreeMap<String, String> {
        &self.build_params
    }

    /// Produces a copy of `search_info` with `metric_type` and
    /// `search_params` overwritten to match the growing index; everything
    /// else the caller set (topK, round_decimal) is preserved.
    pub fn search_conf(&self, search_info: &SearchInfo) -> SearchInfo {
        SearchInfo {
            metric_type: self.metric_type.clone(),
            search_params: self.search_params.clone(),
            topk: search_info.topk,
            round_decimal: search_info.round_decimal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldId;
    use std::collections::BTreeMap;

    fn field_index_meta(index_type: &str, metric: &str, dim: &str) -> FieldIndexMeta {
        let mut index_params = BTreeMap::new();
        index_params.insert(INDEX_TYPE.to_string(), index_type.to_string());
        index_params.insert(METRIC_TYPE.to_string(), metric.to_string());
        let mut type_params = BTreeMap::new();
        type_params.insert("dim".to_string(), dim.to_string());
        FieldIndexMeta::new(FieldId(1), index_params, type_params).unwrap()
    }

    #[test]
    fn derivation_matches_scenario_1() {
        let meta = field_index_meta("IVF_FLAT", "L2", "128");
        let mut cfg = SegcoreConfig::new();
        cfg.set_chunk_rows(1024).set_nlist(128).set_nprobe(4);

        let vic = VecIndexConfig::new(226_985, &meta, &cfg).unwrap();
        assert_eq!(vic.build_threshold(), 22_698);
        assert_eq!(vic.index_type(), GROWING_INDEX_TYPE);
        assert_eq!(vic.origin_index_type(), "IVF_FLAT");
        assert_eq!(vic.metric_type(), "L2");
        assert_eq!(vic.build_params().get("nlist").unwrap(), "128");
        assert_eq!(vic.build_params().get("ssize").unwrap(), "48");
        assert_eq!(vic.build_params().get("dim").unwrap(), "128");
        assert_eq!(vic.build_params().get("num_build_thread").unwrap(), "1");
    }

    #[test]
    fn ssize_floor_is_48() {
        let meta = field_index_meta("IVF_FLAT", "L2", "8");
        let mut cfg = SegcoreConfig::new();
        cfg.set_chunk_rows(100).set_nlist(1000);
        let vic = VecIndexConfig::new(1_000_000, &meta, &cfg).unwrap();
        // chunk_rows / nlist == 0, floored up to 48.
        assert_eq!(vic.build_params().get("ssize").unwrap(), "48");
    }

    #[test]
    fn missing_metric_type_is_rejected() {
        let mut index_params = BTreeMap::new();
        index_params.insert(INDEX_TYPE.to_string(), "IVF_FLAT".to_string());
        let mut type_params = BTreeMap::new();
        type_params.insert("dim".to_string(), "8".to_string());
        let err = FieldIndexMeta::new(FieldId(1), index_params, type_params).unwrap_err();
        assert!(matches!(err, IndexingError::MissingParam(METRIC_TYPE)));
    }

    #[test]
    fn unsupported_origin_index_type_is_rejected() {
        let meta = field_index_meta("HNSW", "L2", "8");
        let cfg = SegcoreConfig::new();
        let err = VecIndexConfig::new(1_000_000, &meta, &cfg).unwrap_err();
        assert!(matches!(err, IndexingError::UnsupportedIndexType(t) if t == "HNSW"));
    }
}
