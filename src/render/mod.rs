//! APAC form rendering.
//!
//! Rendering is a pure sink for the pipeline: it stamps merged-record
//! fields onto fixed positions of the printed APAC form, one page per
//! record, and holds no decision logic. The [`PageRenderer`] trait is the
//! contract the batch output loop consumes; [`form::ApacFormRenderer`] is
//! the printpdf implementation.

pub mod form;

use thiserror::Error;

use crate::pipeline::MergedRecord;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("erro de PDF: {0}")]
    Pdf(String),

    #[error("erro de escrita do documento: {0}")]
    Io(#[from] std::io::Error),
}

/// One filled form page per merged record. Implementations must treat any
/// missing key as the empty string — [`MergedRecord::get`] already
/// guarantees that.
pub trait PageRenderer {
    fn render_page(&mut self, record: &MergedRecord) -> Result<(), RenderError>;
}

pub use form::ApacFormRenderer;
