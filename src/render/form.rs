//! printpdf implementation of the APAC form page.
//!
//! The printed form is an A4 sheet; the filled values sit at fixed
//! millimetre positions measured from the top-left corner of the paper
//! form. The position table below is the whole layout — adding or moving a
//! field is a data change. printpdf's origin is bottom-left, so the
//! vertical coordinate is flipped when stamping.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use printpdf::image_crate::{self, DynamicImage, GenericImageView};
use printpdf::{
    BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerIndex, PdfLayerReference, PdfPageIndex,
};
use tracing::warn;

use super::{PageRenderer, RenderError};
use crate::pipeline::MergedRecord;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
/// Text sits on the baseline; the original layout positions 5mm-tall cells
/// by their top edge.
const CELL_BASELINE_MM: f32 = 3.5;
const FONT_SIZE: f32 = 10.0;
const CHECKBOX_FONT_SIZE: f32 = 7.0;

/// One stamped field: record key and cell top-left position on the form.
struct TextField {
    key: &'static str,
    x: f32,
    y: f32,
}

/// Field positions of the form, top to bottom: establishment, patient,
/// procedures, justification, request, authorization, executor.
const LAYOUT: &[TextField] = &[
    TextField { key: "NOME_ESTABELECIMENTO", x: 13.0, y: 32.0 },
    TextField { key: "CNES_ESTABELECIMENTO", x: 168.0, y: 32.0 },
    TextField { key: "NOME_PACIENTE", x: 13.0, y: 46.5 },
    TextField { key: "CPF_PACIENTE", x: 13.0, y: 55.2 },
    TextField { key: "DATA_NASCIMENTO", x: 112.0, y: 55.2 },
    TextField { key: "RACA_COR", x: 148.0, y: 55.2 },
    TextField { key: "NOME_MAE", x: 13.0, y: 62.7 },
    TextField { key: "NOME_RESPONSAVEL", x: 13.0, y: 68.5 },
    TextField { key: "ENDERECO", x: 13.0, y: 80.0 },
    TextField { key: "MUNICIPIO_RESIDENCIA", x: 13.0, y: 88.5 },
    TextField { key: "COD_IBGE_MUNICIPIO", x: 130.0, y: 88.5 },
    TextField { key: "UF", x: 155.0, y: 88.5 },
    TextField { key: "CEP", x: 167.0, y: 88.5 },
    TextField { key: "PROC_PRINCIPAL_COD", x: 11.7, y: 103.0 },
    TextField { key: "PROC_PRINCIPAL_NOME", x: 80.0, y: 103.0 },
    TextField { key: "PROC_PRINCIPAL_QTD", x: 180.0, y: 103.0 },
    TextField { key: "PROC_SEC1_COD", x: 11.7, y: 118.5 },
    TextField { key: "PROC_SEC1_NOME", x: 80.0, y: 118.5 },
    TextField { key: "PROC_SEC1_QTD", x: 182.0, y: 118.5 },
    TextField { key: "PROC_SEC2_COD", x: 11.7, y: 127.5 },
    TextField { key: "PROC_SEC2_NOME", x: 80.0, y: 127.5 },
    TextField { key: "PROC_SEC2_QTD", x: 182.0, y: 127.5 },
    TextField { key: "DESC_DIAGNOSTICO", x: 14.0, y: 173.0 },
    TextField { key: "CID10_PRINCIPAL", x: 125.0, y: 173.0 },
    TextField { key: "OBSERVACOES", x: 14.0, y: 185.0 },
    TextField { key: "NOME_SOLICITANTE", x: 13.0, y: 222.0 },
    TextField { key: "DATA_SOLICITACAO", x: 110.0, y: 222.0 },
    TextField { key: "DOC_SOLICITANTE", x: 55.0, y: 230.0 },
    TextField { key: "NOME_AUTORIZADOR", x: 13.0, y: 246.0 },
    TextField { key: "COD_ORGAO_EMISSOR", x: 105.0, y: 246.0 },
    TextField { key: "NUMERO_APAC", x: 140.0, y: 246.0 },
    TextField { key: "DOC_AUTORIZADOR", x: 55.0, y: 257.5 },
    TextField { key: "DATA_SOLICITACAO", x: 13.0, y: 270.0 },
    TextField { key: "NOME_EXECUTANTE", x: 13.0, y: 283.0 },
    TextField { key: "CNES_EXECUTANTE", x: 165.0, y: 283.0 },
];

/// "CPF do profissional" check marks, always ticked on the form.
const FIXED_CHECKS: &[(f32, f32)] = &[(18.8, 230.9), (18.8, 257.9)];

fn baseline(y_top: f32) -> Mm {
    Mm(PAGE_HEIGHT_MM - y_top - CELL_BASELINE_MM)
}

/// Writes filled APAC pages into one PDF document.
pub struct ApacFormRenderer {
    doc: PdfDocumentReference,
    font: IndirectFontRef,
    template: Option<DynamicImage>,
    /// Page created by `PdfDocument::new`, consumed by the first record.
    first_page: Option<(PdfPageIndex, PdfLayerIndex)>,
    pages: usize,
}

impl ApacFormRenderer {
    /// `template_path` is the background form scan; a missing or unreadable
    /// template logs a warning and pages render on white.
    pub fn new(title: &str, template_path: Option<&Path>) -> Result<Self, RenderError> {
        let (doc, page, layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Camada 1");
        let font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| RenderError::Pdf(format!("fonte interna indisponivel: {e}")))?;

        let template = template_path.and_then(|path| match image_crate::open(path) {
            Ok(img) => Some(img),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "form template unreadable, rendering without background");
                None
            }
        });

        Ok(Self { doc, font, template, first_page: Some((page, layer)), pages: 0 })
    }

    pub fn page_count(&self) -> usize {
        self.pages
    }

    /// Finish the document and write it to `path`.
    pub fn save(self, path: &Path) -> Result<(), RenderError> {
        let file = File::create(path)?;
        self.doc
            .save(&mut BufWriter::new(file))
            .map_err(|e| RenderError::Pdf(format!("falha ao gravar {}: {e}", path.display())))
    }

    fn next_layer(&mut self) -> PdfLayerReference {
        let (page, layer) = match self.first_page.take() {
            Some(first) => first,
            None => self.doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Camada 1"),
        };
        self.doc.get_page(page).get_layer(layer)
    }

    fn stamp_template(&self, layer: &PdfLayerReference) {
        let Some(template) = &self.template else {
            return;
        };
        let (w_px, h_px) = template.dimensions();
        if w_px == 0 || h_px == 0 {
            return;
        }
        // Stretch the scan to the full page regardless of its pixel size.
        let dpi = 300.0;
        let natural_w_mm = w_px as f32 * 25.4 / dpi;
        let natural_h_mm = h_px as f32 * 25.4 / dpi;
        let image = Image::from_dynamic_image(template);
        image.add_to_layer(
            layer.clone(),
            ImageTransform {
                translate_x: Some(Mm(0.0)),
                translate_y: Some(Mm(0.0)),
                scale_x: Some(PAGE_WIDTH_MM / natural_w_mm),
                scale_y: Some(PAGE_HEIGHT_MM / natural_h_mm),
                dpi: Some(dpi),
                ..Default::default()
            },
        );
    }
}

impl PageRenderer for ApacFormRenderer {
    fn render_page(&mut self, record: &MergedRecord) -> Result<(), RenderError> {
        let layer = self.next_layer();
        self.stamp_template(&layer);

        for field in LAYOUT {
            let value = record.get(field.key);
            if !value.is_empty() {
                layer.use_text(value, FONT_SIZE, Mm(field.x), baseline(field.y), &self.font);
            }
        }

        // Sex checkbox: one of two fixed positions.
        let sex_x = match record.get("SEXO") {
            "MASCULINO" => Some(148.8),
            "FEMININO" => Some(160.8),
            _ => None,
        };
        if let Some(x) = sex_x {
            layer.use_text("X", CHECKBOX_FONT_SIZE, Mm(x), baseline(47.5), &self.font);
        }
        for (x, y) in FIXED_CHECKS {
            layer.use_text("X", CHECKBOX_FONT_SIZE, Mm(*x), baseline(*y), &self.font);
        }

        // Authorization period prints both validity dates in one cell.
        let period =
            format!("{}    {}", record.get("DATA_SOLICITACAO"), record.get("VALIDADE_FIM"));
        if !period.trim().is_empty() {
            layer.use_text(period, FONT_SIZE, Mm(147.0), baseline(270.0), &self.font);
        }

        self.pages += 1;
        Ok(())
    }
}
