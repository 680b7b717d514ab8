//! Record extraction and enrichment pipeline.
//!
//! Five modules connected by plain functions and small structs:
//! splitter → extractor → procedures (bundle mapper) → registry resolvers
//! → batch assembler. Only the assembler holds policy; the leaves are pure
//! and independently testable.

pub mod batch;
pub mod error;
pub mod extractor;
pub mod procedures;
pub mod registry;
pub mod splitter;

pub use batch::{BatchProcessor, BatchResult, FacilityTally, MergedRecord, RecordFailure};
pub use error::PipelineError;
pub use extractor::{extract_fields, extract_primary_and_cnes};
pub use procedures::{bundle_for, Domain, ProcedureBundle};
pub use registry::{Registries, DIAGNOSIS_NOT_FOUND};
pub use splitter::split_blocks;
