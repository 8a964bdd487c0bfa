//! Spreadsheet input parser
//!
//! Turns an uploaded CSV/TSV or workbook (xlsx, xls, ods) into business
//! records. Both formats are first flattened into rows of trimmed cells and
//! then go through the same header detection and column mapping.
//!
//! Header vocabulary is multilingual (Portuguese and English). Rows without a
//! name or city are skipped and counted; fully blank rows are ignored.

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::BusinessRecord;

/// Input parsing errors
#[derive(Debug, Error)]
pub enum InputError {
    /// No non-blank rows
    #[error("Input file is empty")]
    Empty,

    /// No row carries both a name and a city column
    #[error("Input needs at least 2 columns (business name and city)")]
    TooFewColumns,

    /// Rows exist but none has both name and city
    #[error("No valid business found: every row lacks a name or a city ({skipped} rows skipped)")]
    NoValidRows { skipped: usize },

    /// Workbook could not be opened or has no readable sheet
    #[error("Failed to read workbook: {0}")]
    Workbook(String),

    /// Delimited text could not be tokenized
    #[error("Failed to read delimited text: {0}")]
    Delimited(#[from] csv::Error),
}

/// Parser output
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedInput {
    pub records: Vec<BusinessRecord>,
    /// Rows dropped for missing name/city or too few cells
    pub skipped_rows: usize,
}

/// Detected physical format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Workbook,
    Delimited,
}

const WORKBOOK_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Pick the format from the file extension, falling back to magic bytes
pub fn detect_format(file_name: &str, bytes: &[u8]) -> InputFormat {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    if WORKBOOK_EXTENSIONS.contains(&extension.as_str())
        || bytes.starts_with(ZIP_MAGIC)
        || bytes.starts_with(OLE_MAGIC)
    {
        InputFormat::Workbook
    } else {
        InputFormat::Delimited
    }
}

/// Parse an uploaded file into business records
pub fn parse_file(file_name: &str, bytes: &[u8]) -> Result<ParsedInput, InputError> {
    let format = detect_format(file_name, bytes);
    info!(file = %file_name, size = bytes.len(), format = ?format, "Parsing input file");

    let rows = match format {
        InputFormat::Workbook => read_workbook_rows(bytes)?,
        InputFormat::Delimited => read_delimited_rows(bytes)?,
    };

    rows_to_records(rows)
}

/// Parse delimited text already decoded as UTF-8
pub fn parse_text(text: &str) -> Result<ParsedInput, InputError> {
    rows_to_records(read_text_rows(text)?)
}

/// Delimiter for the first non-empty line
///
/// Tab wins only with a strict majority over both comma and semicolon;
/// semicolon wins over comma; comma otherwise.
pub fn detect_delimiter(line: &str) -> u8 {
    let count = |c: char| line.chars().filter(|&x| x == c).count();
    let (commas, semicolons, tabs) = (count(','), count(';'), count('\t'));

    if tabs > commas && tabs > semicolons {
        b'\t'
    } else if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn read_delimited_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, InputError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let text = String::from_utf8_lossy(bytes);
    read_text_rows(&text)
}

fn read_text_rows(text: &str) -> Result<Vec<Vec<String>>, InputError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let Some(first_line) = text.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return Err(InputError::Empty);
    };
    let delimiter = detect_delimiter(first_line);
    debug!(delimiter = %(delimiter as char).escape_default(), "Detected delimiter");

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

fn read_workbook_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, InputError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| InputError::Workbook(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| InputError::Workbook("Workbook has no worksheets".to_string()))?
        .map_err(|e| InputError::Workbook(e.to_string()))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect())
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        // Phone numbers and codes are often stored as whole floats
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string().trim().to_string(),
    }
}

/// Columns for each field, resolved from the header or defaults
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnMap {
    name: usize,
    city: usize,
    state: Option<usize>,
    category: Option<usize>,
    phone: Option<usize>,
    address: Option<usize>,
    website: Option<usize>,
}

impl ColumnMap {
    /// Layout used when the first row is data
    fn positional() -> Self {
        Self {
            name: 0,
            city: 1,
            state: Some(2),
            category: None,
            phone: None,
            address: None,
            website: None,
        }
    }

    fn from_header(header: &[String]) -> Self {
        let normalized: Vec<String> = header.iter().map(|h| normalize_header(h)).collect();
        let find = |pred: fn(&str) -> bool| normalized.iter().position(|h| pred(h));

        Self {
            name: find(is_name_header).unwrap_or(0),
            city: find(is_city_header).unwrap_or(1),
            state: find(is_state_header),
            category: find(is_category_header),
            phone: find(is_phone_header),
            address: find(is_address_header),
            website: find(is_website_header),
        }
    }
}

fn normalize_header(cell: &str) -> String {
    cell.trim().trim_matches('"').trim().to_lowercase()
}

fn contains_any(header: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| header.contains(n))
}

fn is_name_header(h: &str) -> bool {
    h == "name"
        || contains_any(
            h,
            &["razao", "razão", "social", "empresa", "nome", "restaurante", "company", "business"],
        )
}

fn is_city_header(h: &str) -> bool {
    contains_any(h, &["cidade", "município", "municipio", "local", "city"])
}

fn is_state_header(h: &str) -> bool {
    h == "uf" || h == "state" || h.contains("estado")
}

fn is_category_header(h: &str) -> bool {
    contains_any(h, &["categoria", "category", "tipo", "segmento"])
}

fn is_phone_header(h: &str) -> bool {
    contains_any(h, &["telefone", "phone", "celular", "fone"])
}

fn is_address_header(h: &str) -> bool {
    contains_any(h, &["endereço", "endereco", "address", "rua"])
}

fn is_website_header(h: &str) -> bool {
    contains_any(h, &["site", "website", "url", "web"])
}

/// True when any cell of `row` looks like a name or city column title
pub fn looks_like_header(row: &[String]) -> bool {
    row.iter().map(|c| normalize_header(c)).any(|h| {
        !h.is_empty() && (is_name_header(&h) || is_city_header(&h))
    })
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

fn cell(row: &[String], index: usize) -> Option<String> {
    row.get(index)
        .map(|c| c.trim().trim_matches('"').trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

fn rows_to_records(rows: Vec<Vec<String>>) -> Result<ParsedInput, InputError> {
    let rows: Vec<Vec<String>> = rows.into_iter().filter(|r| !is_blank(r)).collect();

    if rows.is_empty() {
        return Err(InputError::Empty);
    }
    if !rows.iter().any(|r| r.len() >= 2) {
        return Err(InputError::TooFewColumns);
    }

    let has_header = looks_like_header(&rows[0]);
    let (columns, data_rows) = if has_header {
        (ColumnMap::from_header(&rows[0]), &rows[1..])
    } else {
        (ColumnMap::positional(), &rows[..])
    };
    debug!(has_header, columns = ?columns, "Resolved column layout");

    let mut records = Vec::new();
    let mut skipped_rows = 0;

    for (offset, row) in data_rows.iter().enumerate() {
        let line = offset + 1 + usize::from(has_header);

        if row.len() < 2 {
            debug!(line, cells = row.len(), "Skipping row with fewer than 2 cells");
            skipped_rows += 1;
            continue;
        }

        let (Some(name), Some(city)) = (cell(row, columns.name), cell(row, columns.city)) else {
            debug!(line, "Skipping row without name or city");
            skipped_rows += 1;
            continue;
        };

        let optional = |index: Option<usize>| index.and_then(|i| cell(row, i));

        records.push(BusinessRecord {
            name,
            city,
            state: optional(columns.state),
            category: optional(columns.category),
            phone: optional(columns.phone),
            address: optional(columns.address),
            website: optional(columns.website),
        });
    }

    if skipped_rows > 0 {
        warn!(skipped_rows, valid = records.len(), "Input rows skipped");
    }

    if records.is_empty() {
        return Err(InputError::NoValidRows {
            skipped: skipped_rows,
        });
    }

    info!(records = records.len(), skipped_rows, "Input parsed");

    Ok(ParsedInput {
        records,
        skipped_rows,
    })
}
