//! Incremental ANN indexing for a vector database's growing (unsealed)
//! segments.
//!
//! As rows stream into a mutable segment, [`field_indexing::VectorFieldIndexing`]
//! trains an ANN index once a configurable row threshold is crossed and
//! incrementally appends to it thereafter, so queries over the still-growing
//! segment stay fast without waiting for segment sealing. [`indexing_record::IndexingRecord`]
//! owns one such indexer per indexable field of a schema and fans append
//! calls out across them.

pub mod ann;
pub mod ann_diskann;
pub mod config;
pub mod error;
pub mod field_indexing;
pub mod index_config;
pub mod indexing_record;
pub mod meta;
pub mod runtime;
pub mod scalar_index;
pub mod schema;
pub mod store;

pub use error::{IndexingError, Result};
pub use field_indexing::{FieldIndexing, ScalarFieldIndexing, VectorFieldIndexing};
pub use indexing_record::{FieldAppendData, IndexingRecord};
