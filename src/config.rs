//! Generation request and fixed site defaults.
//!
//! The request object replaces the mutable "selected file / selected type"
//! state of the desktop front-end: everything the pipeline needs travels in
//! one immutable value.

use std::path::{Path, PathBuf};

pub use crate::pipeline::procedures::Domain;

/// Everything needed for one generation run. Built once by the caller,
/// passed by reference, never mutated.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The BDSIA text export (latin-1 encoded).
    pub source_path: PathBuf,
    /// Clinical domain selecting the procedure bundle table.
    pub domain: Domain,
    /// Where the generated PDFs and reports land.
    pub output_dir: PathBuf,
    /// Directory holding the registry CSVs (medicos, estabelecimentos, cid10).
    pub registry_dir: PathBuf,
    /// Background form image. Pages render without background when absent.
    pub template_path: Option<PathBuf>,
}

impl GenerationRequest {
    pub fn new(source_path: impl Into<PathBuf>, domain: Domain) -> Self {
        Self {
            source_path: source_path.into(),
            domain,
            output_dir: default_output_dir(),
            registry_dir: PathBuf::from("."),
            template_path: None,
        }
    }
}

/// Site defaults shared by every domain. The facility name is replaced by
/// the registry description when the requesting CNES resolves (the batch
/// assembler layers that on top).
pub const GENERIC_FIELDS: &[(&str, &str)] = &[
    ("NOME_ESTABELECIMENTO", "NGA 16"),
    ("MUNICIPIO_RESIDENCIA", "FRANCA"),
    ("COD_IBGE_MUNICIPIO", "351620"),
    ("UF", "SP"),
    ("NOME_EXECUTANTE", "NGA 16"),
];

/// User Downloads directory, falling back to the working directory when the
/// platform has none configured.
pub fn default_output_dir() -> PathBuf {
    dirs::download_dir()
        .filter(|d| d.is_dir())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Output PDF name for one facility group.
pub fn facility_pdf_name(cnes: &str) -> String {
    format!("apacs_{cnes}.pdf")
}

/// Resolve a report path inside the output directory.
pub fn report_path(output_dir: &Path, name: &str) -> PathBuf {
    output_dir.join(name)
}
