//! Registry resolvers: physicians, facilities and CID-10 descriptions.
//!
//! Each registry is a semicolon-delimited CSV with a header row, loaded on
//! first lookup and cached for the run (the files never change during a
//! batch). A resolver never returns an `Err`: a missing file, an unreadable
//! row or a miss degrades to the contract value of that registry — `None`,
//! the empty string, or the not-found sentinel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;
use tracing::warn;

/// Display text used when a CID code is absent from the table. This is what
/// gets printed on the form, not an error signal.
pub const DIAGNOSIS_NOT_FOUND: &str = "DESCRICAO NAO ENCONTRADA";

pub const PHYSICIANS_FILE: &str = "medicos.csv";
pub const FACILITIES_FILE: &str = "estabelecimentos.csv";
pub const DIAGNOSES_FILE: &str = "cid10.csv";

/// Identifiers in the dump and in the registries disagree on incidental
/// formatting (stray spaces, dots, check-digit hyphens). Comparison runs on
/// this canonical form.
pub fn normalize_identifier(id: &str) -> String {
    id.chars()
        .filter(|c| !c.is_whitespace() && *c != '.' && *c != '-')
        .collect()
}

// ─── Shared loader ────────────────────────────────────────────────────────────

/// Lazily-loaded key→value table backed by one CSV file.
#[derive(Debug)]
struct CsvTable {
    path: PathBuf,
    cache: OnceLock<HashMap<String, String>>,
}

impl CsvTable {
    fn new(path: PathBuf) -> Self {
        Self { path, cache: OnceLock::new() }
    }

    fn get(&self, id: &str) -> Option<&str> {
        let key = normalize_identifier(id);
        if key.is_empty() {
            return None;
        }
        self.table().get(&key).map(String::as_str)
    }

    fn table(&self) -> &HashMap<String, String> {
        self.cache.get_or_init(|| match load_rows(&self.path) {
            Ok(rows) => rows,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "registry unavailable, lookups will miss");
                HashMap::new()
            }
        })
    }
}

/// Registry rows are (identifier, description) pairs regardless of the file;
/// only the header names differ. Aliases cover the three layouts.
#[derive(Debug, Deserialize)]
struct RegistryRow {
    #[serde(alias = "cartao_sus", alias = "cnes", alias = "codigo")]
    id: String,
    #[serde(alias = "nome_completo", alias = "nome", alias = "descricao")]
    description: String,
}

fn load_rows(path: &Path) -> Result<HashMap<String, String>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_path(path)?;

    let mut rows = HashMap::new();
    for record in reader.deserialize::<RegistryRow>() {
        match record {
            Ok(row) => {
                rows.insert(normalize_identifier(&row.id), row.description.trim().to_owned());
            }
            Err(err) => {
                // One bad row never poisons the registry.
                warn!(path = %path.display(), error = %err, "skipping unreadable registry row");
            }
        }
    }
    Ok(rows)
}

// ─── Resolvers ────────────────────────────────────────────────────────────────

/// Physician names keyed by CNS card number.
#[derive(Debug)]
pub struct PhysicianRegistry {
    table: CsvTable,
}

impl PhysicianRegistry {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { table: CsvTable::new(path.into()) }
    }

    /// `None` on missing file, unreadable file or no matching CNS.
    pub fn name(&self, cns: &str) -> Option<String> {
        self.table.get(cns).map(str::to_owned)
    }
}

/// Facility descriptions keyed by CNES code.
#[derive(Debug)]
pub struct FacilityRegistry {
    table: CsvTable,
}

impl FacilityRegistry {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { table: CsvTable::new(path.into()) }
    }

    /// Empty string on any failure or miss, keeping the merge layer safe.
    pub fn description(&self, cnes: &str) -> String {
        self.table.get(cnes).unwrap_or_default().to_owned()
    }
}

/// CID-10 descriptions keyed by diagnosis code.
#[derive(Debug)]
pub struct DiagnosisRegistry {
    table: CsvTable,
}

impl DiagnosisRegistry {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { table: CsvTable::new(path.into()) }
    }

    /// The [`DIAGNOSIS_NOT_FOUND`] sentinel on a miss — callers print it.
    pub fn description(&self, cid: &str) -> String {
        self.table
            .get(cid)
            .map(str::to_owned)
            .unwrap_or_else(|| DIAGNOSIS_NOT_FOUND.to_owned())
    }
}

/// The three resolvers of one run, rooted at a registry directory.
#[derive(Debug)]
pub struct Registries {
    pub physicians: PhysicianRegistry,
    pub facilities: FacilityRegistry,
    pub diagnoses: DiagnosisRegistry,
}

impl Registries {
    pub fn open(registry_dir: &Path) -> Self {
        Self {
            physicians: PhysicianRegistry::open(registry_dir.join(PHYSICIANS_FILE)),
            facilities: FacilityRegistry::open(registry_dir.join(FACILITIES_FILE)),
            diagnoses: DiagnosisRegistry::open(registry_dir.join(DIAGNOSES_FILE)),
        }
    }
}
