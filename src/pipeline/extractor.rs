//! Field extraction from one record block.
//!
//! The field set is an ordered table of (key, anchor pattern, post-rule)
//! entries, so each extraction rule is data and can be tested on its own.
//! Every rule yields the first capture group trimmed, or the empty string
//! when the anchor does not match — downstream merging never has to deal
//! with missing keys, only empty values.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::splitter::APAC_NUMBER_MARKER;

// ─── Rule table ───────────────────────────────────────────────────────────────

/// Post-processing applied to a raw capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostRule {
    /// Trimmed capture as-is.
    Keep,
    /// First whitespace-delimited token of the trimmed capture.
    /// The RACA line carries a trailing legend that is not part of the value.
    FirstToken,
}

/// One extraction rule: a renderer field key and its anchored pattern.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub key: &'static str,
    pub pattern: &'static str,
    pub post: PostRule,
}

/// The full rule table, in application order. The CNS rules are dot-all:
/// the card number sits on the line after the professional header.
pub const FIELD_RULES: &[FieldRule] = &[
    FieldRule { key: "CPF_PACIENTE", pattern: r"CPF:\s+([\d\.\-]+)", post: PostRule::Keep },
    FieldRule { key: "NOME_PACIENTE", pattern: r"NOME:\s+([^\n]+)", post: PostRule::Keep },
    FieldRule { key: "SEXO", pattern: r"SEXO:\s+(MASCULINO|FEMININO)", post: PostRule::Keep },
    FieldRule { key: "DATA_NASCIMENTO", pattern: r"DATA DE NASCIMENTO:\s+([\d/]+)", post: PostRule::Keep },
    FieldRule { key: "RACA_COR", pattern: r"RACA:\s+([^\n]+)", post: PostRule::FirstToken },
    FieldRule { key: "NOME_MAE", pattern: r"NOME DA MAE:\s+([^\n]+)", post: PostRule::Keep },
    FieldRule { key: "NOME_RESPONSAVEL", pattern: r"NOME DO RES:\s+([^\n]+)", post: PostRule::Keep },
    FieldRule { key: "CEP", pattern: r"CEP:\s+([\d\-]+)", post: PostRule::Keep },
    FieldRule { key: "DATA_SOLICITACAO", pattern: r"INICIO DA VALIDADE DA APAC:\s+([\d/]+)", post: PostRule::Keep },
    FieldRule { key: "DATA_AUTORIZACAO", pattern: r"DATA DA OCORRENCIA:\s+([\d/]+)", post: PostRule::Keep },
    FieldRule { key: "VALIDADE_FIM", pattern: r"FIM DA VALIDADE DO APAC:\s+([\d/]+)", post: PostRule::Keep },
    FieldRule { key: "NUMERO_APAC", pattern: r"NUMERO DO APAC:\s+([\d\-]+)", post: PostRule::Keep },
    FieldRule { key: "CNS_SOLICITANTE", pattern: r"(?s)MEDICO SOLICITANTE:.*?CNS:\s+(\d+)", post: PostRule::Keep },
    FieldRule { key: "CNS_AUTORIZADOR", pattern: r"(?s)AUTORIZADOR:.*?CNS:\s+(\d+)", post: PostRule::Keep },
    FieldRule { key: "CNES_ESTABELECIMENTO", pattern: r"CODIGO DA UNIDADE:\s+([\d\-]+)", post: PostRule::Keep },
    FieldRule { key: "CID10_PRINCIPAL", pattern: r"CID PRINCIPAL:\s+([A-Z]\d{2,3})", post: PostRule::Keep },
];

static COMPILED_RULES: LazyLock<Vec<(FieldRule, Regex)>> = LazyLock::new(|| {
    FIELD_RULES
        .iter()
        .map(|rule| (*rule, Regex::new(rule.pattern).expect("valid field pattern")))
        .collect()
});

// Address parts are extracted separately and composed into one line.
static ADDRESS_STREET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ENDERECO:\s+([^\n]+)").expect("valid regex"));
static ADDRESS_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"NUMERO:\s+(\d+)").expect("valid regex"));
static ADDRESS_DISTRICT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"BAIRRO:\s+([^\n]+)").expect("valid regex"));

// ─── Extraction ───────────────────────────────────────────────────────────────

/// First capture group of `re` in `text`, trimmed, or `""` on no match.
fn capture(re: &Regex, text: &str) -> String {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_owned())
        .unwrap_or_default()
}

fn apply_post(value: String, post: PostRule) -> String {
    match post {
        PostRule::Keep => value,
        PostRule::FirstToken => value
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_owned(),
    }
}

/// Extract the per-record fields of one block.
///
/// Returns `None` iff the authorization-number marker is missing (the block
/// is not a record). Otherwise the map contains *every* key of
/// [`FIELD_RULES`] plus `ENDERECO`, with `""` for anchors that did not
/// match.
pub fn extract_fields(block: &str) -> Option<BTreeMap<String, String>> {
    if !block.contains(APAC_NUMBER_MARKER) {
        return None;
    }

    let mut fields = BTreeMap::new();
    for (rule, re) in COMPILED_RULES.iter() {
        let value = apply_post(capture(re, block), rule.post);
        fields.insert(rule.key.to_owned(), value);
    }

    // The form has one address line; the dump splits it in three. The
    // composed shape is fixed even when parts are empty.
    let street = capture(&ADDRESS_STREET, block);
    let number = capture(&ADDRESS_NUMBER, block);
    let district = capture(&ADDRESS_DISTRICT, block);
    fields.insert("ENDERECO".to_owned(), format!("{street}, {number} - {district}"));

    Some(fields)
}

// ─── Procedures-performed section scan ────────────────────────────────────────

/// Header opening the variable-length procedure list.
const PROCEDURES_HEADER: &str = "PROCEDIMENTOS REALIZADOS";
/// Footer closing it (discharge-reason line).
const PROCEDURES_FOOTER: &str = "MOTIVO DE SAIDA";

/// Procedure code shape as printed in the dump: 9 digits, hyphen, check digit.
static PRIMARY_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{9}-\d)").expect("valid regex"));
/// Requesting-facility CNES: 6-7 digit token closing a line of the section.
/// The left edge is anchored so the tail of a longer number (a CNS, an
/// APAC number) can never pass as a CNES.
static CNES_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)(\d{6,7})$").expect("valid regex"));

/// Scan the procedures-performed section for the primary procedure code and
/// the requesting-facility CNES.
///
/// Line-by-line over the text between [`PROCEDURES_HEADER`] and
/// [`PROCEDURES_FOOTER`] (or the end of the block when the footer is
/// missing); stops as soon as both values are found. Soft-fails to
/// `("", "")` when the section is absent or nothing matches — the batch
/// assembler decides what an empty primary code means.
pub fn extract_primary_and_cnes(block: &str) -> (String, String) {
    let Some(start) = block.find(PROCEDURES_HEADER) else {
        return (String::new(), String::new());
    };
    let section = &block[start + PROCEDURES_HEADER.len()..];
    let section = match section.find(PROCEDURES_FOOTER) {
        Some(end) => &section[..end],
        None => section,
    };

    let mut primary = String::new();
    let mut cnes = String::new();
    for line in section.lines() {
        let line = line.trim_end();
        if primary.is_empty() {
            if let Some(c) = PRIMARY_CODE_RE.captures(line) {
                primary = c[1].to_owned();
            }
        }
        if cnes.is_empty() {
            if let Some(c) = CNES_LINE_RE.captures(line) {
                cnes = c[1].to_owned();
            }
        }
        if !primary.is_empty() && !cnes.is_empty() {
            break;
        }
    }
    (primary, cnes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: &str = "\n\
        NUMERO DO APAC:   1234567890-1\n\
        NOME:   JOAO SILVA\n\
        CPF:   123.456.789-00\n\
        SEXO:   MASCULINO\n\
        DATA DE NASCIMENTO:   01/02/1960\n\
        RACA:   01 BRANCA\n\
        NOME DA MAE:   ANA SILVA\n\
        NOME DO RES:   ANA SILVA\n\
        ENDERECO:   RUA DAS FLORES\n\
        NUMERO:   123\n\
        BAIRRO:   CENTRO\n\
        CEP:   14400-000\n\
        INICIO DA VALIDADE DA APAC:   01/07/2025\n\
        DATA DA OCORRENCIA:   03/07/2025\n\
        FIM DA VALIDADE DO APAC:   30/09/2025\n\
        CID PRINCIPAL:   H353\n\
        CODIGO DA UNIDADE:   2087669\n\
        MEDICO SOLICITANTE:   DR EXEMPLO\n\
        CNS:   700000000000001\n\
        AUTORIZADOR:   DRA EXEMPLO\n\
        CNS:   700000000000002\n\
        PROCEDIMENTOS REALIZADOS\n\
        040501002-8 OCI DE OFTALMOLOGIA            2087669\n\
        MOTIVO DE SAIDA/PERMANENCIA\n";

    #[test]
    fn extracts_every_defined_key() {
        let fields = extract_fields(BLOCK).expect("valid block");
        for rule in FIELD_RULES {
            assert!(fields.contains_key(rule.key), "missing key {}", rule.key);
        }
        assert!(fields.contains_key("ENDERECO"));
        assert_eq!(fields["NOME_PACIENTE"], "JOAO SILVA");
        assert_eq!(fields["SEXO"], "MASCULINO");
        assert_eq!(fields["NUMERO_APAC"], "1234567890-1");
        assert_eq!(fields["CID10_PRINCIPAL"], "H353");
        assert_eq!(fields["CNS_SOLICITANTE"], "700000000000001");
        assert_eq!(fields["CNS_AUTORIZADOR"], "700000000000002");
    }

    #[test]
    fn race_keeps_first_token_only() {
        let fields = extract_fields(BLOCK).unwrap();
        assert_eq!(fields["RACA_COR"], "01");
    }

    #[test]
    fn address_composition_is_unconditional() {
        let fields = extract_fields(BLOCK).unwrap();
        assert_eq!(fields["ENDERECO"], "RUA DAS FLORES, 123 - CENTRO");

        // Missing parts still produce the fixed shape.
        let sparse = "NUMERO DO APAC:   1\nENDERECO:   RUA A\n";
        let fields = extract_fields(sparse).unwrap();
        assert_eq!(fields["ENDERECO"], "RUA A,  - ");
    }

    #[test]
    fn missing_anchor_yields_empty_string_not_missing_key() {
        let fields = extract_fields("NUMERO DO APAC:   1\n").unwrap();
        assert_eq!(fields["NOME_PACIENTE"], "");
        assert_eq!(fields["SEXO"], "");
        assert_eq!(fields["CID10_PRINCIPAL"], "");
    }

    #[test]
    fn block_without_marker_is_rejected() {
        assert!(extract_fields("NOME:   JOAO\nSEXO:   MASCULINO\n").is_none());
    }

    #[test]
    fn section_scan_finds_primary_and_cnes() {
        let (primary, cnes) = extract_primary_and_cnes(BLOCK);
        assert_eq!(primary, "040501002-8");
        assert_eq!(cnes, "2087669");
    }

    #[test]
    fn section_scan_stops_at_footer() {
        let block = "PROCEDIMENTOS REALIZADOS\n\
                     sem codigo aqui\n\
                     MOTIVO DE SAIDA\n\
                     040501002-8          2087669\n";
        let (primary, cnes) = extract_primary_and_cnes(block);
        assert_eq!(primary, "");
        assert_eq!(cnes, "");
    }

    #[test]
    fn section_scan_soft_fails_when_header_absent() {
        let (primary, cnes) = extract_primary_and_cnes("bloco sem secao\n");
        assert_eq!(primary, "");
        assert_eq!(cnes, "");
    }

    #[test]
    fn section_scan_rejects_suffix_of_longer_number() {
        // A line ending in a 15-digit professional CNS must not donate its
        // last 7 digits as a facility code.
        let block = "PROCEDIMENTOS REALIZADOS\n\
                     CNS DO PROFISSIONAL 700123456789012\n\
                     MOTIVO DE SAIDA\n";
        let (primary, cnes) = extract_primary_and_cnes(block);
        assert_eq!(primary, "");
        assert_eq!(cnes, "");

        // A standalone 6-7 digit token at the end of a line still matches.
        let block = "PROCEDIMENTOS REALIZADOS\n\
                     CNS DO PROFISSIONAL 700123456789012\n\
                     040501002-8 OCI            2087669\n\
                     MOTIVO DE SAIDA\n";
        let (primary, cnes) = extract_primary_and_cnes(block);
        assert_eq!(primary, "040501002-8");
        assert_eq!(cnes, "2087669");
    }

    #[test]
    fn section_scan_tolerates_missing_footer() {
        let block = "PROCEDIMENTOS REALIZADOS\n090201001-8 OCI RISCO    123456\n";
        let (primary, cnes) = extract_primary_and_cnes(block);
        assert_eq!(primary, "090201001-8");
        assert_eq!(cnes, "123456");
    }
}
