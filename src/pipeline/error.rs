//! Batch-level error type.
//!
//! Per-record problems are *not* errors at this level — they are collected
//! as [`RecordFailure`](super::batch::RecordFailure) entries and the batch
//! keeps going. Only conditions that make the whole run meaningless
//! surface here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("nenhum registro de APAC válido foi encontrado no arquivo")]
    NoValidRecords,
}
