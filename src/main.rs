//! apacgen CLI — generate filled APAC forms from a BDSIA text export.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use apacgen::config::{self, GenerationRequest, GENERIC_FIELDS};
use apacgen::pipeline::{split_blocks, BatchProcessor, Domain, MergedRecord, Registries};
use apacgen::render::{ApacFormRenderer, PageRenderer, RenderError};
use apacgen::report;

#[derive(Parser)]
#[command(name = "apacgen")]
#[command(about = "Gera APACs em PDF a partir de um arquivo TXT exportado do BDSIA")]
struct Cli {
    /// Arquivo TXT com os registros de APAC (codificação latin-1)
    #[arg(short, long)]
    input: PathBuf,

    /// Tipo de OCI a gerar
    #[arg(short, long, value_enum)]
    domain: Domain,

    /// Pasta de saída dos PDFs e relatórios (padrão: Downloads do usuário)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Pasta com os cadastros (medicos.csv, estabelecimentos.csv, cid10.csv)
    #[arg(long, default_value = ".")]
    registry_dir: PathBuf,

    /// Imagem de fundo do formulário (template.png)
    #[arg(long)]
    template: Option<PathBuf>,

    /// Grava apac_erros.txt com os registros ignorados
    #[arg(long)]
    error_log: bool,

    /// Grava apac_resumo.txt com a contagem por estabelecimento
    #[arg(long)]
    summary: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let request = GenerationRequest {
        source_path: cli.input,
        domain: cli.domain,
        output_dir: cli.output_dir.unwrap_or_else(config::default_output_dir),
        registry_dir: cli.registry_dir,
        template_path: cli.template,
    };

    run(&request, cli.error_log, cli.summary)
}

fn run(request: &GenerationRequest, error_log: bool, summary: bool) -> Result<()> {
    let content = read_latin1(&request.source_path)?;
    let blocks = split_blocks(&content);
    info!(
        path = %request.source_path.display(),
        blocks = blocks.len(),
        domain = request.domain.as_str(),
        "dump loaded"
    );

    let registries = Registries::open(&request.registry_dir);
    let processor = BatchProcessor::new(request.domain, &registries);
    let result = processor.process(&blocks, GENERIC_FIELDS)?;

    std::fs::create_dir_all(&request.output_dir).with_context(|| {
        format!("falha ao criar a pasta de saída {}", request.output_dir.display())
    })?;

    // One document per requesting facility; a write failure for one CNES
    // never blocks the others.
    let mut documents = 0usize;
    let mut document_failures = 0usize;
    for (cnes, records) in result.records_by_facility() {
        let path = request.output_dir.join(config::facility_pdf_name(cnes));
        match write_facility_pdf(&path, cnes, &records, request.template_path.as_deref()) {
            Ok(pages) => {
                info!(cnes, pages, path = %path.display(), "document written");
                documents += 1;
            }
            Err(err) => {
                error!(cnes, error = %err, "document failed");
                document_failures += 1;
            }
        }
    }

    if error_log && !result.failures.is_empty() {
        let path = config::report_path(&request.output_dir, report::ERROR_LOG_NAME);
        report::write_error_log(&path, &result.failures)
            .with_context(|| format!("falha ao gravar {}", path.display()))?;
    }
    if summary {
        let path = config::report_path(&request.output_dir, report::SUMMARY_NAME);
        report::write_summary(&path, request.domain, &result)
            .with_context(|| format!("falha ao gravar {}", path.display()))?;
    }

    println!(
        "Processo concluído: {} APAC(s) em {} PDF(s), {} registro(s) ignorado(s). Arquivos em: {}",
        result.records.len(),
        documents,
        result.failures.len(),
        request.output_dir.display()
    );
    for failure in &result.failures {
        println!("  ignorado {}: {}", failure.identifier, failure.reason);
    }

    if documents == 0 && document_failures > 0 {
        bail!("nenhum documento pôde ser gravado");
    }
    Ok(())
}

fn write_facility_pdf(
    path: &Path,
    cnes: &str,
    records: &[&MergedRecord],
    template: Option<&Path>,
) -> Result<usize, RenderError> {
    let mut renderer = ApacFormRenderer::new(&format!("APACs CNES {cnes}"), template)?;
    for record in records {
        renderer.render_page(record)?;
    }
    let pages = renderer.page_count();
    renderer.save(path)?;
    Ok(pages)
}

/// The BDSIA export is a legacy single-byte file; decode it as
/// windows-1252 (latin-1 superset) instead of assuming UTF-8.
fn read_latin1(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("falha ao ler o arquivo de entrada {}", path.display()))?;
    let (text, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
    Ok(text.into_owned())
}
