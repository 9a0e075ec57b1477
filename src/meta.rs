//! Immutable per-field and per-collection index metadata (C5), and the
//! wire-shaped structs it is built from (I3). The wire structs model the
//! shape of a protobuf message without depending on protobuf codegen —
//! actual RPC transport is out of scope for this crate.

use std::collections::BTreeMap;

use crate::error::{IndexingError, Result};
use crate::schema::FieldId;

pub const METRIC_TYPE: &str = "metric_type";
pub const INDEX_TYPE: &str = "index_type";
pub const DIM: &str = "dim";

/// The wire shape of a single field's index metadata: a flat `field_id` plus
/// three repeated key/value maps. Stands in for a protobuf message's
/// generated struct.
#[derive(Debug, Clone, Default)]
pub struct WireFieldIndexMeta {
    pub field_id: i64,
    pub index_params: Vec<(String, String)>,
    pub type_params: Vec<(String, String)>,
    pub user_index_params: Vec<(String, String)>,
}

fn to_map(pairs: Vec<(String, String)>) -> BTreeMap<String, String> {
    pairs.into_iter().collect()
}

/// Immutable per-field index descriptor. Once constructed, nothing about a
/// `FieldIndexMeta` changes for the lifetime of the collection it describes.
#[derive(Debug, Clone)]
pub struct FieldIndexMeta {
    field_id: FieldId,
    index_params: BTreeMap<String, String>,
    type_params: BTreeMap<String, String>,
    user_index_params: BTreeMap<String, String>,
}

impl FieldIndexMeta {
    /// Direct constructor (used by tests and by callers that already have
    /// parsed maps in hand).
    pub fn new(
        field_id: FieldId,
        index_params: BTreeMap<String, String>,
        type_params: BTreeMap<String, String>,
    ) -> Result<Self> {
        Self::validate(&index_params, &type_params)?;
        Ok(Self {
            field_id,
            index_params,
            type_params,
            user_index_params: BTreeMap::new(),
        })
    }

    pub fn from_wire(wire: WireFieldIndexMeta) -> Result<Self> {
        let index_params = to_map(wire.index_params);
        let type_params = to_map(wire.type_params);
        Self::validate(&index_params, &type_params)?;
        Ok(Self {
            field_id: FieldId(wire.field_id),
            index_params,
            type_params,
            user_index_params: to_map(wire.user_index_params),
        })
    }

    fn validate(
        index_params: &BTreeMap<String, String>,
        type_params: &BTreeMap<String, String>,
    ) -> Result<()> {
        if !index_params.contains_key(METRIC_TYPE) {
            return Err(IndexingError::MissingParam(METRIC_TYPE));
        }
        if !index_params.contains_key(INDEX_TYPE) {
            return Err(IndexingError::MissingParam(INDEX_TYPE));
        }
        if !type_params.contains_key(DIM) {
            return Err(IndexingError::MissingParam(DIM));
        }
        Ok(())
    }

    pub fn field_id(&self) -> FieldId {
        self.field_id
    }

    pub fn metric_type(&self) -> &str {
        // Presence was checked in `validate` at construction time.
        self.index_params.get(METRIC_TYPE).unwrap()
    }

    pub fn index_type(&self) -> &str {
        self.index_params.get(INDEX_TYPE).unwrap()
    }

    pub fn index_params(&self) -> &BTreeMap<String, String> {
        &self.index_params
    }

    pub fn type_params(&self) -> &BTreeMap<String, String> {
        &self.type_params
    }

    pub fn user_index_params(&self) -> &BTreeMap<String, String> {
        &self.user_index_params
    }

    /// Explicit absent-value sentinel on a missing key (the source system's
    /// equivalent fell off the end of the function without returning
    /// anything on this path — see SPEC_FULL.md §9).
    pub fn get_index_param(&self, key: &str) -> Option<&str> {
        self.index_params.get(key).map(String::as_str)
    }

    pub fn dim(&self) -> usize {
        // Presence was checked in `validate`; a non-numeric value is a
        // malformed metadata entry and panics rather than silently
        // defaulting, since it would otherwise corrupt every downstream
        // buffer size calculation.
        self.type_params
            .get(DIM)
            .unwrap()
            .parse()
            .expect("type_params['dim'] is not a valid integer")
    }
}

#[derive(Debug, Clone, Default)]
pub struct WireCollectionIndexMeta {
    pub max_row_count: i64,
    pub index_metas: Vec<WireFieldIndexMeta>,
}

/// Immutable collection-wide index descriptor, read-only after construction
/// and shared by reference among every segment of the collection.
#[derive(Debug, Clone)]
pub struct CollectionIndexMeta {
    pub collection_name: String,
    max_segment_row_count: i64,
    field_metas: BTreeMap<FieldId, FieldIndexMeta>,
}

impl CollectionIndexMeta {
    pub fn new(
        max_segment_row_count: i64,
        field_metas: BTreeMap<FieldId, FieldIndexMeta>,
    ) -> Self {
        assert!(
            max_segment_row_count > 0,
            "max_segment_row_count must be positive"
        );
        Self {
            collection_name: String::new(),
            max_segment_row_count,
            field_metas,
        }
    }

    pub fn from_wire(wire: WireCollectionIndexMeta) -> Result<Self> {
        let mut field_metas = BTreeMap::new();
        for fm in wire.index_metas {
            let parsed = FieldIndexMeta::from_wire(fm)?;
            field_metas.insert(parsed.field_id(), parsed);
        }
        Ok(Self::new(wire.max_row_count, field_metas))
    }

    pub fn max_segment_row_count(&self) -> i64 {
        self.max_segment_row_count
    }

    pub fn has_field(&self, field_id: FieldId) -> bool {
        self.field_metas.contains_key(&field_id)
    }

    pub fn get_field_index_meta(&self, field_id: FieldId) -> Result<&FieldIndexMeta> {
        self.field_metas
            .get(&field_id)
            .ok_or(IndexingError::UnknownField(field_id))
    }
}
