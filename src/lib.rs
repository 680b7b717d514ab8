//! apacgen — batch APAC authorization form generator.
//!
//! Parses SIA/SUS "BDSIA" text exports (one dump, many concatenated
//! authorization records), enriches each record against local registries
//! (physicians, facilities, CID-10) and a per-domain procedure bundle table,
//! and renders one filled APAC form page per valid record.
//!
//! Pipeline flow:
//! ```text
//! dump (latin-1) → splitter → [extractor → procedure mapper → registries]
//!                → merged record → form renderer → PDF (one file per CNES)
//! ```
//!
//! One bad record never aborts the batch: per-record failures are collected
//! in the [`pipeline::BatchResult`] and reported at the end.

pub mod config;
pub mod pipeline;
pub mod render;
pub mod report;

pub use config::{Domain, GenerationRequest};
pub use pipeline::{BatchProcessor, BatchResult, MergedRecord, PipelineError, RecordFailure};
