//! Owns one `FieldIndexing` per indexable field of a schema and fans
//! `appending_index` calls out across them (C4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::config::SegcoreConfig;
use crate::error::{IndexingError, Result};
use crate::field_indexing::{create_index, FieldIndexing, ScalarFieldIndexing, VectorFieldIndexing};
use crate::meta::CollectionIndexMeta;
use crate::schema::{FieldId, Schema};
use crate::store::VectorStore;

/// One field's worth of data for a single `appending_index` call: the
/// backing chunked store plus this call's own flat row buffer.
pub struct FieldAppendData<'a> {
    pub vec_base: &'a dyn VectorStore,
    pub data_source: &'a [f32],
}

/// Per-segment entry point: one `FieldIndexing` per field the schema and
/// configuration make indexable, plus a monotone watermark of the prefix
/// acknowledged as fully indexed across every field.
///
/// The field map is built once from `Schema` and never mutated afterwards —
/// only the interior state of each `FieldIndexing` changes as rows arrive.
pub struct IndexingRecord {
    field_indexings: HashMap<FieldId, FieldIndexing>,
    finished_ack: AtomicI64,
}

impl IndexingRecord {
    /// Skips (a) binary vector fields, (b) vector fields with no
    /// `metric_type` set (the flat / no-index case), (c) vector fields the
    /// collection's index metadata says nothing about — none of those get a
    /// `FieldIndexing` at all. Scalar fields have no such dependency on
    /// `collection_index_meta`: every scalar field always gets a
    /// `ScalarFieldIndexing` entry. When `segcore_config.enable_growing_segment_index()`
    /// is false, the whole map comes back empty: every field falls through to
    /// brute-force / scalar-chunk scan for the life of the segment.
    pub fn new(
        schema: &Schema,
        collection_name: &str,
        collection_index_meta: &CollectionIndexMeta,
        segcore_config: &SegcoreConfig,
    ) -> Result<Self> {
        let mut field_indexings = HashMap::new();

        if segcore_config.enable_growing_segment_index() {
            for (&field_id, field_meta) in schema.get_fields() {
                if field_meta.is_vector() {
                    if matches!(field_meta.data_type, crate::schema::DataType::VectorBinary) {
                        continue;
                    }
                    if field_meta.metric_type.is_none() {
                        continue;
                    }
                    if !collection_index_meta.has_field(field_id) {
                        continue;
                    }
                    let field_index_meta = collection_index_meta.get_field_index_meta(field_id)?;

                    let indexing = create_index(
                        field_meta,
                        Some(field_index_meta),
                        collection_name,
                        collection_index_meta.max_segment_row_count(),
                        segcore_config,
                    )?;
                    field_indexings.insert(field_id, indexing);
                } else {
                    let indexing = create_index(
                        field_meta,
                        None,
                        collection_name,
                        collection_index_meta.max_segment_row_count(),
                        segcore_config,
                    )?;
                    field_indexings.insert(field_id, indexing);
                }
            }
        }

        Ok(Self {
            field_indexings,
            finished_ack: AtomicI64::new(0),
        })
    }

    /// Fan `appending_index` out to every vector field; scalar entries are
    /// skipped on this path (they have no segment-wide append operation).
    /// `fields` supplies, per field id, the backing store and this call's
    /// own tightly packed row buffer — both must already cover
    /// `[reserved_offset, reserved_offset+size)`.
    pub fn appending_index(
        &self,
        reserved_offset: i64,
        size: i64,
        fields: &HashMap<FieldId, FieldAppendData<'_>>,
    ) -> Result<()> {
        for (&field_id, indexing) in &self.field_indexings {
            if let FieldIndexing::Vector(vector_indexing) = indexing {
                let data = fields.get(&field_id).ok_or(IndexingError::UnknownField(field_id))?;
                vector_indexing.append_segment_index(reserved_offset, size, data.vec_base, data.data_source)?;
            }
        }
        self.finished_ack.fetch_max(reserved_offset + size, Ordering::AcqRel);
        Ok(())
    }

    pub fn get_finished_ack(&self) -> i64 {
        self.finished_ack.load(Ordering::Acquire)
    }

    pub fn get_field_indexing(&self, field_id: FieldId) -> Result<&FieldIndexing> {
        self.field_indexings
            .get(&field_id)
            .ok_or(IndexingError::UnknownField(field_id))
    }

    pub fn get_vec_field_indexing(&self, field_id: FieldId) -> Result<&VectorFieldIndexing> {
        self.get_field_indexing(field_id)?.as_vector()
    }

    pub fn get_scalar_field_indexing(&self, field_id: FieldId) -> Result<&ScalarFieldIndexing> {
        self.get_field_indexing(field_id)?.as_scalar()
    }

    pub fn len(&self) -> usize {
        self.field_indexings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.field_indexings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{DIM, INDEX_TYPE, METRIC_TYPE};
    use crate::schema::{DataType, FieldMeta};
    use std::collections::BTreeMap;

    fn collection_meta(max_rows: i64, fields: &[(FieldId, usize)]) -> CollectionIndexMeta {
        let mut field_metas = BTreeMap::new();
        for &(field_id, dim) in fields {
            let mut index_params = BTreeMap::new();
            index_params.insert(INDEX_TYPE.to_string(), "IVF_FLAT".to_string());
            index_params.insert(METRIC_TYPE.to_string(), "L2".to_string());
            let mut type_params = BTreeMap::new();
            type_params.insert(DIM.to_string(), dim.to_string());
            let fm = crate::meta::FieldIndexMeta::new(field_id, index_params, type_params).unwrap();
            field_metas.insert(field_id, fm);
        }
        CollectionIndexMeta::new(max_rows, field_metas)
    }

    #[test]
    fn skips_binary_vector_fields() {
        let mut schema = Schema::new();
        schema.add_field(FieldMeta {
            field_id: FieldId(1),
            name: "embedding".to_string(),
            data_type: DataType::VectorFloat,
            dim: Some(8),
            metric_type: Some("L2".to_string()),
        });
        schema.add_field(FieldMeta {
            field_id: FieldId(2),
            name: "binary_embedding".to_string(),
            data_type: DataType::VectorBinary,
            dim: Some(8),
            metric_type: Some("HAMMING".to_string()),
        });

        let coll_meta = collection_meta(100_000, &[(FieldId(1), 8), (FieldId(2), 8)]);
        let cfg = SegcoreConfig::new();
        let record = IndexingRecord::new(&schema, "coll", &coll_meta, &cfg).unwrap();

        assert_eq!(record.len(), 1);
        assert!(record.get_vec_field_indexing(FieldId(1)).is_ok());
        assert!(record.get_field_indexing(FieldId(2)).is_err());
    }

    #[test]
    fn config_gate_produces_empty_map() {
        let mut schema = Schema::new();
        schema.add_field(FieldMeta {
            field_id: FieldId(1),
            name: "embedding".to_string(),
            data_type: DataType::VectorFloat,
            dim: Some(8),
            metric_type: Some("L2".to_string()),
        });

        let coll_meta = collection_meta(100_000, &[(FieldId(1), 8)]);
        let mut cfg = SegcoreConfig::new();
        cfg.set_enable_growing_segment_index(false);
        let record = IndexingRecord::new(&schema, "coll", &coll_meta, &cfg).unwrap();

        assert!(record.is_empty());
    }

    #[test]
    fn appending_index_fans_out_to_vector_fields_only() {
        let mut schema = Schema::new();
        schema.add_field(FieldMeta {
            field_id: FieldId(1),
            name: "embedding".to_string(),
            data_type: DataType::VectorFloat,
            dim: Some(4),
            metric_type: Some("L2".to_string()),
        });
        schema.add_field(FieldMeta {
            field_id: FieldId(2),
            name: "category".to_string(),
            data_type: DataType::Int32,
            dim: None,
            metric_type: None,
        });

        let coll_meta = collection_meta(1_000_000, &[(FieldId(1), 4), (FieldId(2), 1)]);
        let cfg = SegcoreConfig::new();
        let record = IndexingRecord::new(&schema, "coll", &coll_meta, &cfg).unwrap();

        let store = crate::store::ChunkedVectorStore::new(4, cfg.chunk_rows());
        let rows: Vec<f32> = (0..400).map(|i| i as f32 * 0.01).collect();
        let off = store.reserve(100);
        store.insert(off, &rows);

        let mut fields = HashMap::new();
        fields.insert(FieldId(1), FieldAppendData { vec_base: &store, data_source: &rows });
        record.appending_index(off, 100, &fields).unwrap();

        assert_eq!(record.get_finished_ack(), off + 100);
    }

    #[test]
    fn downcast_guard_returns_invalid_indexing() {
        let mut schema = Schema::new();
        schema.add_field(FieldMeta {
            field_id: FieldId(1),
            name: "category".to_string(),
            data_type: DataType::Int32,
            dim: None,
            metric_type: None,
        });

        let coll_meta = collection_meta(100_000, &[(FieldId(1), 1)]);
        let cfg = SegcoreConfig::new();
        let record = IndexingRecord::new(&schema, "coll", &coll_meta, &cfg).unwrap();

        assert!(matches!(
            record.get_vec_field_indexing(FieldId(1)),
            Err(IndexingError::InvalidIndexing { .. })
        ));
    }

    #[test]
    fn scalar_fields_are_indexed_even_when_absent_from_collection_index_meta() {
        let mut schema = Schema::new();
        schema.add_field(FieldMeta {
            field_id: FieldId(1),
            name: "category".to_string(),
            data_type: DataType::Int32,
            dim: None,
            metric_type: None,
        });

        // No entry for FieldId(1) at all — scalar fields must not depend on
        // `CollectionIndexMeta` to get a `FieldIndexing`.
        let coll_meta = collection_meta(100_000, &[]);
        let cfg = SegcoreConfig::new();
        let record = IndexingRecord::new(&schema, "coll", &coll_meta, &cfg).unwrap();

        assert_eq!(record.len(), 1);
        assert!(record.get_scalar_field_indexing(FieldId(1)).is_ok());
    }
}
