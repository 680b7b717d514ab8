//! Batch assembler — drives the per-record pipeline and collects results.
//!
//! One record failing never aborts the batch: failures are recorded with an
//! identifier and a reason, and processing moves to the next block. Policy
//! decisions live here and nowhere else:
//!
//! - an empty or unmapped primary procedure code skips the record;
//! - a CNS that the physician registry cannot resolve is tolerated — the
//!   domain placeholder stays on the form and a warning is logged;
//! - a facility-registry miss keeps the generic facility name;
//! - a diagnosis-registry miss prints the not-found sentinel.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::PipelineError;
use super::extractor::{extract_fields, extract_primary_and_cnes};
use super::procedures::{bundle_for, Domain};
use super::registry::{normalize_identifier, Registries};

/// Grouping key for blocks whose requesting CNES could not be determined
/// from the procedures section nor from the unit-code line.
const UNKNOWN_FACILITY: &str = "sem-cnes";

// ─── Result types ─────────────────────────────────────────────────────────────

/// The flat field set consumed by the renderer. Reading a key that was
/// never merged yields `""` — the renderer never checks for absence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRecord {
    /// Resolved requesting-facility CNES; output grouping key.
    pub facility: String,
    fields: BTreeMap<String, String>,
}

impl MergedRecord {
    pub fn get(&self, key: &str) -> &str {
        self.fields.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One skipped block: which record and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub identifier: String,
    pub reason: String,
}

/// Per-facility counters for the summary report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityTally {
    pub count: usize,
    /// Record count per primary-procedure description.
    pub procedures: BTreeMap<String, usize>,
    /// Smallest and largest APAC number seen, compared lexicographically on
    /// the numeric portion with the check digit stripped. Exact numeric
    /// order only when all numbers share a length; good enough for the
    /// range line of the report.
    pub first_apac: String,
    pub last_apac: String,
}

impl FacilityTally {
    fn observe(&mut self, description: &str, apac_number: &str) {
        self.count += 1;
        *self.procedures.entry(description.to_owned()).or_default() += 1;

        let key = apac_ordering_key(apac_number);
        if key.is_empty() {
            return;
        }
        if self.first_apac.is_empty() || key < apac_ordering_key(&self.first_apac) {
            self.first_apac = apac_number.to_owned();
        }
        if self.last_apac.is_empty() || key > apac_ordering_key(&self.last_apac) {
            self.last_apac = apac_number.to_owned();
        }
    }
}

/// Numeric portion of an APAC number with its trailing check digit removed.
fn apac_ordering_key(number: &str) -> String {
    if let Some((body, _check)) = number.split_once('-') {
        return body.to_owned();
    }
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        0 | 1 => digits,
        n => digits[..n - 1].to_owned(),
    }
}

/// Outcome of one run: the merged records in source order, the failures,
/// and the per-facility tallies.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub records: Vec<MergedRecord>,
    pub failures: Vec<RecordFailure>,
    pub tallies: BTreeMap<String, FacilityTally>,
}

impl BatchResult {
    /// Records grouped by resolved facility, for one output document per
    /// CNES. Group order follows the tally map (sorted by CNES).
    pub fn records_by_facility(&self) -> BTreeMap<&str, Vec<&MergedRecord>> {
        let mut groups: BTreeMap<&str, Vec<&MergedRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.facility.as_str()).or_default().push(record);
        }
        groups
    }
}

// ─── Merging ──────────────────────────────────────────────────────────────────

/// Flatten field layers into one map, later layers winning on collision.
///
/// An empty value never replaces a value a lower layer supplied: extracted
/// fields default to `""` on a missed anchor, and a miss must not erase a
/// bundle or site default (the bundle CID prints unless the record carries
/// its own). Empty values for keys no layer filled are still inserted, so
/// the full-key-set guarantee holds.
fn merge_layers(layers: &[Vec<(String, String)>]) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for layer in layers {
        for (key, value) in layer {
            if value.is_empty() && merged.contains_key(key) {
                continue;
            }
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

fn owned_layer(fields: &[(&str, &str)]) -> Vec<(String, String)> {
    fields.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
}

// ─── Processor ────────────────────────────────────────────────────────────────

/// Drives extraction, mapping, registry resolution and merging for every
/// block of a run.
pub struct BatchProcessor<'a> {
    domain: Domain,
    registries: &'a Registries,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(domain: Domain, registries: &'a Registries) -> Self {
        Self { domain, registries }
    }

    /// Process all blocks of one dump. `generic_fields` is the lowest merge
    /// layer (site defaults).
    ///
    /// The only fatal condition is an empty block list; everything else is
    /// recorded per record and the batch continues.
    pub fn process(
        &self,
        blocks: &[String],
        generic_fields: &[(&str, &str)],
    ) -> Result<BatchResult, PipelineError> {
        if blocks.is_empty() {
            return Err(PipelineError::NoValidRecords);
        }

        let mut result = BatchResult::default();
        for (index, block) in blocks.iter().enumerate() {
            match self.process_block(index, block, generic_fields) {
                Ok(record) => {
                    let tally = result.tallies.entry(record.facility.clone()).or_default();
                    tally.observe(record.get("PROC_PRINCIPAL_NOME"), record.get("NUMERO_APAC"));
                    result.records.push(record);
                }
                Err(failure) => {
                    warn!(
                        identifier = %failure.identifier,
                        reason = %failure.reason,
                        "record skipped"
                    );
                    result.failures.push(failure);
                }
            }
        }

        info!(
            domain = self.domain.as_str(),
            records = result.records.len(),
            failures = result.failures.len(),
            facilities = result.tallies.len(),
            "batch assembled"
        );
        Ok(result)
    }

    fn process_block(
        &self,
        index: usize,
        block: &str,
        generic_fields: &[(&str, &str)],
    ) -> Result<MergedRecord, RecordFailure> {
        let fail = |identifier: String, reason: String| RecordFailure { identifier, reason };

        // 1. Per-record fields. The splitter already filtered unmarked
        // blocks, so a None here means a caller bypassed it.
        let Some(extracted) = extract_fields(block) else {
            return Err(fail(
                format!("bloco {}", index + 1),
                "bloco sem o marcador de numero de APAC".to_owned(),
            ));
        };
        let identifier = match extracted.get("NUMERO_APAC") {
            Some(n) if !n.is_empty() => n.clone(),
            _ => format!("bloco {}", index + 1),
        };

        // 2. Primary procedure and requesting CNES from the procedures
        // section; both soft-fail to "".
        let (primary_code, section_cnes) = extract_primary_and_cnes(block);
        if primary_code.is_empty() {
            return Err(fail(
                identifier,
                "procedimento principal nao encontrado no bloco".to_owned(),
            ));
        }
        let Some(bundle) = bundle_for(self.domain, &primary_code) else {
            return Err(fail(
                identifier,
                format!(
                    "procedimento principal {primary_code} nao mapeado para {}",
                    self.domain.as_str()
                ),
            ));
        };

        // Requesting facility: the section CNES, falling back to the
        // unit-code line, then to the unknown bucket.
        let facility = [section_cnes.as_str(), extracted["CNES_ESTABELECIMENTO"].as_str()]
            .iter()
            .map(|id| normalize_identifier(id))
            .find(|id| !id.is_empty())
            .unwrap_or_else(|| UNKNOWN_FACILITY.to_owned());

        // 3-5. Registry resolution layer.
        let mut resolved: Vec<(String, String)> = Vec::new();
        resolved.push(("COD_ESTABELECIMENTO".to_owned(), facility.clone()));

        let facility_name = self.registries.facilities.description(&facility);
        if !facility_name.is_empty() {
            resolved.push(("NOME_ESTABELECIMENTO".to_owned(), facility_name));
        }

        let cid = extracted["CID10_PRINCIPAL"].as_str();
        if !cid.is_empty() {
            resolved.push((
                "DESC_DIAGNOSTICO".to_owned(),
                self.registries.diagnoses.description(cid),
            ));
        }

        for (field, cns_key) in [
            ("NOME_SOLICITANTE", "CNS_SOLICITANTE"),
            ("NOME_AUTORIZADOR", "CNS_AUTORIZADOR"),
        ] {
            let cns = extracted[cns_key].as_str();
            match self.registries.physicians.name(cns) {
                Some(name) => resolved.push((field.to_owned(), name)),
                None => {
                    // Tolerated: the domain placeholder stays on the form.
                    debug!(record = %identifier, field, cns, "physician not in registry");
                }
            }
        }

        // 6. Merge, later layers winning.
        let fields = merge_layers(&[
            owned_layer(generic_fields),
            owned_layer(self.domain.fixed_fields()),
            bundle.field_layer(),
            resolved,
            extracted.into_iter().collect(),
        ]);

        Ok(MergedRecord { facility, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::registry::DIAGNOSIS_NOT_FOUND;
    use crate::pipeline::split_blocks;
    use std::io::Write;
    use std::path::Path;

    fn write_csv(dir: &Path, name: &str, content: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    fn registries_with_fixtures(dir: &Path) -> Registries {
        write_csv(
            dir,
            "medicos.csv",
            "cartao_sus;nome_completo\n\
             700000000000001;CARLOS PEREIRA - CRM/SP 11111\n\
             700000000000002;LUCIA RAMOS - CRM/SP 22222\n",
        );
        write_csv(dir, "estabelecimentos.csv", "cnes;nome\n2087669;NGA 16 FRANCA\n");
        write_csv(
            dir,
            "cid10.csv",
            "codigo;descricao\nH353;DEGENERACAO DA MACULA E DO POLO POSTERIOR\n",
        );
        Registries::open(dir)
    }

    fn block(apac: &str, cid: &str, primary: &str, cnes: &str) -> String {
        format!(
            "NUMERO DO APAC:   {apac}\n\
             NOME:   JOAO SILVA\n\
             SEXO:   MASCULINO\n\
             DATA DE NASCIMENTO:   01/02/1960\n\
             ENDERECO:   RUA DAS FLORES\n\
             NUMERO:   123\n\
             BAIRRO:   CENTRO\n\
             CID PRINCIPAL:   {cid}\n\
             CODIGO DA UNIDADE:   2087669\n\
             MEDICO SOLICITANTE:   X\n\
             CNS:   700000000000001\n\
             AUTORIZADOR:   Y\n\
             CNS:   700000000000002\n\
             PROCEDIMENTOS REALIZADOS\n\
             {primary} OCI            {cnes}\n\
             MOTIVO DE SAIDA\n"
        )
    }

    const GENERIC: &[(&str, &str)] = &[
        ("NOME_ESTABELECIMENTO", "NGA 16"),
        ("MUNICIPIO_RESIDENCIA", "FRANCA"),
        ("UF", "SP"),
    ];

    #[test]
    fn valid_block_produces_enriched_record() {
        let dir = tempfile::tempdir().unwrap();
        let registries = registries_with_fixtures(dir.path());
        let processor = BatchProcessor::new(Domain::Oftalmologia, &registries);

        let blocks = vec![block("1234567890-1", "H353", "040501002-8", "2087669")];
        let result = processor.process(&blocks, GENERIC).unwrap();

        assert_eq!(result.records.len(), 1);
        assert!(result.failures.is_empty());
        let record = &result.records[0];
        assert_eq!(record.get("NOME_PACIENTE"), "JOAO SILVA");
        assert_eq!(record.get("SEXO"), "MASCULINO");
        assert_eq!(record.get("PROC_PRINCIPAL_NOME"), "OCI DE OFTALMOLOGIA");
        assert_eq!(record.get("PROC_SEC1_NOME"), "MAPEAMENTO DE RETINA");
        assert_eq!(record.get("PROC_SEC2_QTD"), "1");
        assert_eq!(record.get("DESC_DIAGNOSTICO"), "DEGENERACAO DA MACULA E DO POLO POSTERIOR");
        assert_eq!(record.get("NOME_SOLICITANTE"), "CARLOS PEREIRA - CRM/SP 11111");
        assert_eq!(record.get("NOME_AUTORIZADOR"), "LUCIA RAMOS - CRM/SP 22222");
        assert_eq!(record.get("NOME_ESTABELECIMENTO"), "NGA 16 FRANCA");
        assert_eq!(record.get("COD_ESTABELECIMENTO"), "2087669");
        assert_eq!(record.facility, "2087669");
        // Renderer contract: unknown keys read as "".
        assert_eq!(record.get("CAMPO_INEXISTENTE"), "");
    }

    #[test]
    fn unmapped_primary_code_skips_record() {
        let dir = tempfile::tempdir().unwrap();
        let registries = registries_with_fixtures(dir.path());
        let processor = BatchProcessor::new(Domain::Oftalmologia, &registries);

        // Surgical-risk code under the ophthalmology domain.
        let blocks = vec![block("1234567890-1", "H353", "090201001-8", "2087669")];
        let result = processor.process(&blocks, GENERIC).unwrap();

        assert!(result.records.is_empty());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].identifier, "1234567890-1");
        assert!(result.failures[0].reason.contains("090201001-8"));
    }

    #[test]
    fn missing_primary_code_skips_record() {
        let dir = tempfile::tempdir().unwrap();
        let registries = registries_with_fixtures(dir.path());
        let processor = BatchProcessor::new(Domain::Oftalmologia, &registries);

        let blocks = vec!["NUMERO DO APAC:   77\nNOME:   SEM SECAO\n".to_owned()];
        let result = processor.process(&blocks, GENERIC).unwrap();
        assert!(result.records.is_empty());
        assert_eq!(result.failures[0].identifier, "77");
    }

    #[test]
    fn one_bad_record_does_not_abort_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let registries = registries_with_fixtures(dir.path());
        let processor = BatchProcessor::new(Domain::Oftalmologia, &registries);

        let blocks = vec![
            block("1111111111-1", "H353", "040501002-8", "2087669"),
            block("2222222222-2", "H353", "999999999-9", "2087669"),
            block("3333333333-3", "H353", "040501002-8", "2087669"),
        ];
        let result = processor.process(&blocks, GENERIC).unwrap();
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].identifier, "2222222222-2");
    }

    #[test]
    fn diagnosis_miss_uses_sentinel_and_keeps_record() {
        let dir = tempfile::tempdir().unwrap();
        let registries = registries_with_fixtures(dir.path());
        let processor = BatchProcessor::new(Domain::Oftalmologia, &registries);

        let blocks = vec![block("1234567890-1", "Z999", "040501002-8", "2087669")];
        let result = processor.process(&blocks, GENERIC).unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].get("DESC_DIAGNOSTICO"), DIAGNOSIS_NOT_FOUND);
    }

    #[test]
    fn unresolved_physician_keeps_domain_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        // No medicos.csv at all.
        write_csv(dir.path(), "estabelecimentos.csv", "cnes;nome\n");
        write_csv(dir.path(), "cid10.csv", "codigo;descricao\n");
        let registries = Registries::open(dir.path());
        let processor = BatchProcessor::new(Domain::Oftalmologia, &registries);

        let blocks = vec![block("1234567890-1", "H353", "040501002-8", "2087669")];
        let result = processor.process(&blocks, GENERIC).unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(
            result.records[0].get("NOME_SOLICITANTE"),
            "ANA LUIZA TEIXEIRA - CRM/SP 85934"
        );
    }

    #[test]
    fn same_facility_blocks_share_group_and_tally() {
        let dir = tempfile::tempdir().unwrap();
        let registries = registries_with_fixtures(dir.path());
        let processor = BatchProcessor::new(Domain::Oftalmologia, &registries);

        let blocks = vec![
            block("1111111111-1", "H353", "040501002-8", "2087669"),
            block("2222222222-2", "H353", "040501002-8", "2087669"),
        ];
        let result = processor.process(&blocks, GENERIC).unwrap();

        let tally = &result.tallies["2087669"];
        assert_eq!(tally.count, 2);
        assert_eq!(tally.procedures["OCI DE OFTALMOLOGIA"], 2);
        assert_eq!(tally.first_apac, "1111111111-1");
        assert_eq!(tally.last_apac, "2222222222-2");

        let groups = result.records_by_facility();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups["2087669"].len(), 2);
    }

    #[test]
    fn empty_batch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let registries = registries_with_fixtures(dir.path());
        let processor = BatchProcessor::new(Domain::Oftalmologia, &registries);
        let err = processor.process(&[], GENERIC).unwrap_err();
        assert!(matches!(err, PipelineError::NoValidRecords));
    }

    #[test]
    fn merge_precedence_later_layers_win() {
        let layers = [
            vec![("G".to_owned(), "X".to_owned())],
            vec![("G".to_owned(), "Y".to_owned())],
        ];
        assert_eq!(merge_layers(&layers)["G"], "Y");

        let layers = [
            vec![("G".to_owned(), "X".to_owned())],
            vec![("G".to_owned(), "Y".to_owned())],
            vec![("G".to_owned(), "Z".to_owned())],
        ];
        assert_eq!(merge_layers(&layers)["G"], "Z");
    }

    #[test]
    fn merge_empty_value_never_erases_lower_layer() {
        let layers = [
            vec![("G".to_owned(), "X".to_owned())],
            vec![("G".to_owned(), String::new())],
        ];
        assert_eq!(merge_layers(&layers)["G"], "X");

        // Keys only the last layer knows still land, empty or not.
        let layers = [vec![("SO_AQUI".to_owned(), String::new())]];
        assert_eq!(merge_layers(&layers)["SO_AQUI"], "");
    }

    #[test]
    fn record_without_cid_line_keeps_bundle_default() {
        let dir = tempfile::tempdir().unwrap();
        let registries = registries_with_fixtures(dir.path());
        let processor = BatchProcessor::new(Domain::Oftalmologia, &registries);

        // No CID PRINCIPAL line at all: the extracted layer carries
        // CID10_PRINCIPAL = "", which must not erase the bundle default.
        let blocks = vec![
            "NUMERO DO APAC:   1234567890-1\n\
             NOME:   JOAO SILVA\n\
             PROCEDIMENTOS REALIZADOS\n\
             040501002-8 OCI            2087669\n\
             MOTIVO DE SAIDA\n"
                .to_owned(),
        ];
        let result = processor.process(&blocks, GENERIC).unwrap();
        assert_eq!(result.records.len(), 1);
        let record = &result.records[0];
        assert_eq!(record.get("CID10_PRINCIPAL"), "H353");
        assert_eq!(record.get("DESC_DIAGNOSTICO"), "AVALIACAO DE RETINA");
        // A record carrying its own CID still overrides the default.
        let blocks = vec![block("1234567890-1", "H353", "040501002-8", "2087669")];
        let result = processor.process(&blocks, GENERIC).unwrap();
        assert_eq!(
            result.records[0].get("DESC_DIAGNOSTICO"),
            "DEGENERACAO DA MACULA E DO POLO POSTERIOR"
        );
    }

    #[test]
    fn apac_ordering_key_strips_check_digit() {
        assert_eq!(apac_ordering_key("1234567890-1"), "1234567890");
        assert_eq!(apac_ordering_key("12345678901"), "1234567890");
        assert_eq!(apac_ordering_key(""), "");
    }

    #[test]
    fn pipeline_is_idempotent_on_identical_input() {
        let dir = tempfile::tempdir().unwrap();
        let registries = registries_with_fixtures(dir.path());
        let processor = BatchProcessor::new(Domain::Oftalmologia, &registries);

        let dump = format!(
            "*BDSIA\n{}*BDSIA\n{}",
            block("1111111111-1", "H353", "040501002-8", "2087669"),
            block("2222222222-2", "Z999", "040501002-8", "2087669"),
        );
        let blocks = split_blocks(&dump);
        let first = processor.process(&blocks, GENERIC).unwrap();
        let second = processor.process(&blocks, GENERIC).unwrap();
        assert_eq!(first.records, second.records);
        assert_eq!(first.tallies, second.tallies);
    }
}
