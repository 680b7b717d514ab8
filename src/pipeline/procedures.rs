//! Per-domain procedure bundle tables.
//!
//! Each clinical domain (OCI package) maps its primary procedure code to a
//! fixed bundle: canonical description, justification defaults and the
//! ordered secondary procedures the form prints below the primary one.
//! The tables are static and never mutated; lookups normalize punctuation
//! so `04.05.01.002-8`, `040501002-8` and `0405010028` all resolve to the
//! same bundle.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Clinical domain selecting which bundle table is active for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// OCI oftalmológica.
    Oftalmologia,
    /// OCI de avaliação de risco cirúrgico.
    RiscoCirurgico,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Oftalmologia => "oftalmologia",
            Domain::RiscoCirurgico => "risco_cirurgico",
        }
    }

    /// Fixed credential fields of the domain: requesting/authorizing
    /// professional documents and the executing facility. The physician
    /// registry overrides the names when the record's CNS resolves.
    pub fn fixed_fields(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Domain::Oftalmologia => &[
                ("NOME_SOLICITANTE", "ANA LUIZA TEIXEIRA - CRM/SP 85934"),
                ("DOC_SOLICITANTE", "207274333200006"),
                ("NOME_AUTORIZADOR", "MARIO ROBERTO ALVES - CRM/SP 78563"),
                ("COD_ORGAO_EMISSOR", "M351620002"),
                ("DOC_AUTORIZADOR", "702402512360420"),
                ("NOME_EXECUTANTE", "NGA 16"),
                ("CNES_EXECUTANTE", "2087669"),
            ],
            Domain::RiscoCirurgico => &[
                ("NOME_SOLICITANTE", ""),
                ("DOC_SOLICITANTE", "207274333200006"),
                ("NOME_AUTORIZADOR", "ELENICE GAKU SASAKI - CRM/SP 57305"),
                ("COD_ORGAO_EMISSOR", "M351620001"),
                ("DOC_AUTORIZADOR", "702402512360420"),
                ("NOME_EXECUTANTE", "NGA 16"),
                ("CNES_EXECUTANTE", "2087669"),
            ],
        }
    }
}

/// One secondary procedure line of the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SecondaryProcedure {
    pub code: &'static str,
    pub name: &'static str,
    pub quantity: u32,
}

/// The fixed primary+secondary set keyed by a primary procedure code,
/// plus the justification defaults printed with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcedureBundle {
    /// Primary code in display form (with punctuation).
    pub code: &'static str,
    pub description: &'static str,
    pub cid: &'static str,
    pub diagnosis: &'static str,
    pub observations: &'static str,
    pub secondary: &'static [SecondaryProcedure],
}

const OFTALMOLOGIA_BUNDLES: &[ProcedureBundle] = &[ProcedureBundle {
    code: "04.05.01.002-8",
    description: "OCI DE OFTALMOLOGIA",
    cid: "H353",
    diagnosis: "AVALIACAO DE RETINA",
    observations: "ROTINA ANUAL",
    secondary: &[
        SecondaryProcedure { code: "02.04.03.001-0", name: "MAPEAMENTO DE RETINA", quantity: 1 },
        SecondaryProcedure {
            code: "03.01.01.007-2",
            name: "CONSULTA MEDICA EM ATENCAO ESPECIALIZADA",
            quantity: 1,
        },
    ],
}];

const RISCO_CIRURGICO_BUNDLES: &[ProcedureBundle] = &[ProcedureBundle {
    code: "09.02.01.001-8",
    description: "OCI AVALIACAO DE RISCO CIRURGICO",
    cid: "Z136",
    diagnosis: "RASTREAMENTO DOENÇAS CARDIOVASCULARES",
    observations: "PRÉ-OPERATÓRIO",
    secondary: &[
        SecondaryProcedure { code: "02.11.02.003-6", name: "ELETROCARDIOGRAMA", quantity: 1 },
        SecondaryProcedure {
            code: "03.01.01.007-2",
            name: "CONSULTA MEDICA EM ATENCAO ESPECIALIZADA",
            quantity: 2,
        },
    ],
}];

/// Digits-only form of a procedure code. Dots and the check-digit hyphen
/// vary between the dump and the published tables; comparison ignores them.
pub fn normalize_code(code: &str) -> String {
    code.chars().filter(char::is_ascii_digit).collect()
}

/// Bundle for a primary procedure code within a domain. `None` means the
/// code is unmapped — a recoverable per-record condition, never a batch
/// abort.
pub fn bundle_for(domain: Domain, primary_code: &str) -> Option<&'static ProcedureBundle> {
    let wanted = normalize_code(primary_code);
    if wanted.is_empty() {
        return None;
    }
    let table = match domain {
        Domain::Oftalmologia => OFTALMOLOGIA_BUNDLES,
        Domain::RiscoCirurgico => RISCO_CIRURGICO_BUNDLES,
    };
    table.iter().find(|b| normalize_code(b.code) == wanted)
}

impl ProcedureBundle {
    /// Renderer field layer derived from the bundle. Both secondary slots of
    /// the form are always present (empty when the bundle has fewer), so the
    /// merged record never misses a key the renderer expects.
    pub fn field_layer(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("PROC_PRINCIPAL_COD".to_owned(), self.code.to_owned()),
            ("PROC_PRINCIPAL_NOME".to_owned(), self.description.to_owned()),
            ("PROC_PRINCIPAL_QTD".to_owned(), "1".to_owned()),
            ("DESC_DIAGNOSTICO".to_owned(), self.diagnosis.to_owned()),
            ("CID10_PRINCIPAL".to_owned(), self.cid.to_owned()),
            ("OBSERVACOES".to_owned(), self.observations.to_owned()),
        ];
        for slot in 0..2 {
            let (code, name, qty) = match self.secondary.get(slot) {
                Some(sec) => (sec.code.to_owned(), sec.name.to_owned(), sec.quantity.to_string()),
                None => (String::new(), String::new(), String::new()),
            };
            let n = slot + 1;
            fields.push((format!("PROC_SEC{n}_COD"), code));
            fields.push((format!("PROC_SEC{n}_NOME"), name));
            fields.push((format!("PROC_SEC{n}_QTD"), qty));
        }
        fields
    }
}
