//! Result export
//!
//! Renders an in-memory result list as an XLSX workbook or CSV text with a
//! fixed Portuguese column set. One row per result, header first.

use rust_xlsxwriter::{Format, Workbook, XlsxError};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::models::AuditResult;

/// Worksheet holding the results
pub const SHEET_NAME: &str = "Auditoria GMN";

pub const COLUMNS: [&str; 19] = [
    "Empresa",
    "Cidade",
    "Estado",
    "Categoria",
    "Telefone",
    "Endereço",
    "Website",
    "Possui GMN",
    "Status Verificação",
    "NAP",
    "Imagens",
    "Avaliação",
    "Total Avaliações",
    "Taxa Resposta",
    "SEO",
    "Engajamento",
    "Score Geral",
    "Pontos de Melhoria",
    "Convidar",
];

const IMPROVEMENT_SEPARATOR: &str = "; ";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Workbook export failed: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("Export I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }

    /// Format implied by a file extension
    pub fn from_path(path: &Path) -> Result<Self, ExportError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        ext.parse()
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xlsx" => Ok(ExportFormat::Xlsx),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

enum CellValue {
    Text(String),
    Number(f64),
}

impl CellValue {
    fn text(value: Option<&str>) -> Self {
        CellValue::Text(value.unwrap_or_default().to_string())
    }

    fn flag(value: bool) -> Self {
        CellValue::Text(if value { "Sim" } else { "Não" }.to_string())
    }

    fn into_string(self) -> String {
        match self {
            CellValue::Text(s) => s,
            CellValue::Number(n) => format_number(n),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{:.1}", n)
    }
}

fn row_cells(result: &AuditResult) -> [CellValue; 19] {
    let b = &result.business;
    let s = &result.scores;
    [
        CellValue::Text(b.name.clone()),
        CellValue::Text(b.city.clone()),
        CellValue::text(b.state.as_deref()),
        CellValue::text(b.category.as_deref()),
        CellValue::text(b.phone.as_deref()),
        CellValue::text(b.address.as_deref()),
        CellValue::text(b.website.as_deref()),
        CellValue::flag(s.has_gmn_profile),
        CellValue::Text(s.verification_status.clone()),
        CellValue::Number(s.nap_consistency_score),
        CellValue::Number(f64::from(s.images_count)),
        CellValue::Number(s.rating),
        CellValue::Number(f64::from(s.total_reviews)),
        CellValue::Number(s.review_response_rate),
        CellValue::Number(s.seo_score),
        CellValue::Number(s.engagement_score),
        CellValue::Number(s.overall_score),
        CellValue::Text(s.improvement_points.join(IMPROVEMENT_SEPARATOR)),
        CellValue::flag(s.should_invite_for_optimization),
    ]
}

/// Render results in `format`
pub fn export(results: &[AuditResult], format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Xlsx => to_xlsx(results),
        ExportFormat::Csv => to_csv(results),
    }
}

/// Write results to `path`, format taken from its extension
pub async fn export_to_path(results: &[AuditResult], path: &Path) -> Result<ExportFormat, ExportError> {
    let format = ExportFormat::from_path(path)?;
    let bytes = export(results, format)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, bytes).await?;

    tracing::info!(path = %path.display(), rows = results.len(), "Results exported");
    Ok(format)
}

pub fn to_xlsx(results: &[AuditResult]) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();

    {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(SHEET_NAME)?;

        for (col, title) in COLUMNS.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, *title, &header_format)?;
        }
        worksheet.set_column_width(0, 32)?;
        worksheet.set_column_width(17, 60)?;
        worksheet.set_freeze_panes(1, 0)?;

        for (index, result) in results.iter().enumerate() {
            let row = index as u32 + 1;
            for (col, value) in row_cells(result).into_iter().enumerate() {
                match value {
                    CellValue::Text(text) => worksheet.write_string(row, col as u16, text)?,
                    CellValue::Number(n) => worksheet.write_number(row, col as u16, n)?,
                };
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

pub fn to_csv(results: &[AuditResult]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(COLUMNS)?;

    for result in results {
        writer.write_record(row_cells(result).into_iter().map(CellValue::into_string))?;
    }

    writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditScores, BusinessRecord};
    use crate::services::input_parser::parse_file;

    fn results() -> Vec<AuditResult> {
        let mut scores = AuditScores::error_placeholder();
        scores.has_gmn_profile = true;
        scores.verification_status = "Verificado".into();
        scores.rating = 4.5;
        scores.overall_score = 72.0;
        scores.improvement_points = vec!["Adicionar fotos".into(), "Responder avaliações".into()];
        scores.should_invite_for_optimization = false;

        vec![
            AuditResult::new(BusinessRecord::new("Padaria X", "São Paulo").with_state("SP"), scores),
            AuditResult::error_placeholder(&BusinessRecord::new("Café, Bar & Cia", "Recife")),
        ]
    }

    #[test]
    fn test_csv_has_header_and_one_row_per_result() {
        let bytes = to_csv(&results()).unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());

        let headers: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(headers, COLUMNS.to_vec());

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "Padaria X");
        assert_eq!(&rows[0][7], "Sim");
        assert_eq!(&rows[0][11], "4.5");
        assert_eq!(&rows[0][16], "72");
        assert_eq!(&rows[0][17], "Adicionar fotos; Responder avaliações");
        assert_eq!(&rows[1][0], "Café, Bar & Cia");
        assert_eq!(&rows[1][18], "Sim");
    }

    #[test]
    fn test_empty_result_list_exports_header_only() {
        let bytes = to_csv(&[]).unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        assert_eq!(reader.records().count(), 0);

        assert!(!to_xlsx(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_xlsx_rows_read_back_as_businesses() {
        let bytes = to_xlsx(&results()).unwrap();
        assert!(bytes.starts_with(b"PK"));

        let parsed = parse_file("export.xlsx", &bytes).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].name, "Padaria X");
        assert_eq!(parsed.records[0].state.as_deref(), Some("SP"));
        assert_eq!(parsed.records[1].city, "Recife");
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ExportFormat::from_path(Path::new("out/r.XLSX")).unwrap(), ExportFormat::Xlsx);
        assert_eq!(ExportFormat::from_path(Path::new("r.csv")).unwrap(), ExportFormat::Csv);
        assert!(matches!(
            ExportFormat::from_path(Path::new("r.pdf")),
            Err(ExportError::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_export_to_path_creates_parent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reports").join("audit.csv");

        let format = export_to_path(&results(), &path).await.unwrap();

        assert_eq!(format, ExportFormat::Csv);
        assert!(path.exists());
    }
}
