//! Minimal schema model: just enough for the indexing core to tell vector
//! fields from scalar fields and to know a vector field's width. Full schema
//! management (primary keys, nullability, partitioning) belongs to the host
//! segment, not here.

use std::collections::BTreeMap;

/// Opaque field identity. Ordering matters only for deterministic iteration
/// in tests; the indexing core itself treats it as an opaque key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    VarChar,
    VectorFloat,
    VectorBinary,
}

impl DataType {
    pub fn is_vector(self) -> bool {
        matches!(self, DataType::VectorFloat | DataType::VectorBinary)
    }
}

/// Per-field schema descriptor. `dim` is only meaningful for vector fields.
#[derive(Debug, Clone)]
pub struct FieldMeta {
    pub field_id: FieldId,
    pub name: String,
    pub data_type: DataType,
    pub dim: Option<usize>,
    /// `None` means "flat / no index requested" — such fields are skipped by
    /// `IndexingRecord` construction even when their type is vector.
    pub metric_type: Option<String>,
}

impl FieldMeta {
    pub fn is_vector(&self) -> bool {
        self.data_type.is_vector()
    }

    /// Panics if called on a non-vector field; callers are expected to have
    /// checked `is_vector()` first (this mirrors the source system's
    /// `AssertInfo(field_meta_.get_data_type() == DataType::VECTOR_FLOAT, ...)`).
    pub fn dim(&self) -> usize {
        self.dim
            .expect("dim() called on a field with no declared dimension")
    }
}

/// Ordered field map; iteration order is field-id order, matching the
/// source system's deterministic `offset_id` walk during `IndexingRecord`
/// construction.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: BTreeMap<FieldId, FieldMeta>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, meta: FieldMeta) -> FieldId {
        let id = meta.field_id;
        self.fields.insert(id, meta);
        id
    }

    pub fn get_fields(&self) -> impl Iterator<Item = (&FieldId, &FieldMeta)> {
        self.fields.iter()
    }

    pub fn get(&self, field_id: FieldId) -> Option<&FieldMeta> {
        self.fields.get(&field_id)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
