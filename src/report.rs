//! Plain-text batch reports: the error log and the per-facility summary.
//!
//! Both are optional side outputs of a run. Formats are line-oriented so
//! the files can be read in any editor at the health department.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use chrono::Local;

use crate::pipeline::{BatchResult, Domain, RecordFailure};

pub const ERROR_LOG_NAME: &str = "apac_erros.txt";
pub const SUMMARY_NAME: &str = "apac_resumo.txt";

/// One line per skipped record: identifier and reason.
pub fn write_error_log(path: &Path, failures: &[RecordFailure]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "# registros ignorados — {}", Local::now().format("%d/%m/%Y %H:%M:%S"))?;
    for failure in failures {
        writeln!(out, "{};{}", failure.identifier, failure.reason)?;
    }
    out.flush()
}

/// Per-facility record counts, per-procedure counts and the APAC number
/// range, plus batch totals.
pub fn write_summary(path: &Path, domain: Domain, result: &BatchResult) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(
        out,
        "RESUMO DE GERACAO DE APACS — {} — {}",
        domain.as_str(),
        Local::now().format("%d/%m/%Y %H:%M:%S")
    )?;
    writeln!(out)?;

    for (cnes, tally) in &result.tallies {
        writeln!(out, "CNES {cnes}: {} registro(s)", tally.count)?;
        for (procedure, count) in &tally.procedures {
            writeln!(out, "  {procedure}: {count}")?;
        }
        if !tally.first_apac.is_empty() {
            writeln!(out, "  APACs de {} a {}", tally.first_apac, tally.last_apac)?;
        }
        writeln!(out)?;
    }

    writeln!(out, "TOTAL: {} gerado(s), {} ignorado(s)", result.records.len(), result.failures.len())?;
    out.flush()
}
