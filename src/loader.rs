//! Spreadsheet decoding
//!
//! Turns an uploaded `.csv` or workbook file into an ordered list of [`Row`]s.
//! The first row of the first worksheet is the header: its cells name the
//! columns of every following row, and cells missing from a row default to an
//! empty string.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;

use calamine::{Data, Reader, open_workbook_auto_from_rs};
use chrono::{NaiveDateTime, Timelike};
use encoding_rs::WINDOWS_1252;
use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;

/// Header name given to columns whose header cell is empty
const EMPTY_HEADER: &str = "__EMPTY";

/// Delimiters recognised in delimited text, in order of preference
const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Error decoding an uploaded file
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("não foi possível ler o arquivo CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("não foi possível ler a planilha: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("a planilha não possui abas")]
    NoWorksheet,
}

/// One decoded record: column name to cell text, in header order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    cells: Vec<(String, String)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `column`, `None` if the row has no such column
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// Set `column`, replacing an existing value in place
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some(cell) => cell.1 = value,
            None => self.cells.push((column, value)),
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

// Serialized as a JSON object whose keys keep the header order
impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (column, value) in &self.cells {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// How an uploaded file is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Delimited text (`.csv`, `.txt`)
    Delimited,
    /// Any workbook format calamine understands (`.xlsx`, `.xls`, `.ods`, ...)
    Workbook,
}

impl FileFormat {
    /// Pick the decoder from the file extension
    ///
    /// Unknown extensions are treated as workbooks, whose format is then
    /// detected from the content.
    pub fn from_file_name(file_name: &str) -> Self {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("csv") | Some("txt") => FileFormat::Delimited,
            _ => FileFormat::Workbook,
        }
    }
}

/// Decode an uploaded file into rows keyed by its header
///
/// Rows whose cells are all empty are skipped. An empty file yields no rows.
pub fn load_rows(file_name: &str, bytes: &[u8]) -> Result<Vec<Row>, ImportError> {
    let table = match FileFormat::from_file_name(file_name) {
        FileFormat::Delimited => read_delimited(bytes)?,
        FileFormat::Workbook => read_workbook(bytes)?,
    };
    Ok(rows_from_table(table))
}

/// Read delimited text into a table of cells
///
/// Fields are UTF-8 when they decode as such and Windows-1252 otherwise, the
/// encoding Excel uses for CSV on Portuguese Windows installs.
fn read_delimited(bytes: &[u8]) -> Result<Vec<Vec<String>>, ImportError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(sniff_delimiter(bytes))
        .from_reader(bytes);

    let mut table = Vec::new();
    for record in reader.byte_records() {
        let record = record?;
        table.push(record.iter().map(decode_field).collect());
    }
    Ok(table)
}

fn decode_field(field: &[u8]) -> String {
    match std::str::from_utf8(field) {
        Ok(text) => text.to_string(),
        // No BOM sniffing: a field starting with FF FE is text, not UTF-16
        Err(_) => WINDOWS_1252
            .decode_without_bom_handling(field)
            .0
            .into_owned(),
    }
}

/// Guess the delimiter from the first line, counting only unquoted characters
fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let mut counts = [0usize; DELIMITERS.len()];
    let mut in_quotes = false;

    for &byte in bytes {
        match byte {
            b'"' => in_quotes = !in_quotes,
            b'\n' | b'\r' if !in_quotes => break,
            _ if !in_quotes => {
                if let Some(i) = DELIMITERS.iter().position(|&d| d == byte) {
                    counts[i] += 1;
                }
            }
            _ => {}
        }
    }

    // Ties keep the earlier (preferred) delimiter
    let mut best = 0;
    for i in 1..DELIMITERS.len() {
        if counts[i] > counts[best] {
            best = i;
        }
    }
    DELIMITERS[best]
}

/// Read the first worksheet of a workbook into a table of cells
fn read_workbook(bytes: &[u8]) -> Result<Vec<Vec<String>>, ImportError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ImportError::NoWorksheet)??;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect())
}

/// Text of a workbook cell
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => format_number(*f),
        Data::Bool(true) => "TRUE".to_string(),
        Data::Bool(false) => "FALSE".to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(datetime) if dt.is_datetime() => format_datetime(datetime),
            // Durations keep their serial value
            _ => format_number(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}

/// Whole numbers print without a fractional part
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// ISO 8601 text of a date cell; the time is left out at midnight
fn format_datetime(datetime: NaiveDateTime) -> String {
    if datetime.num_seconds_from_midnight() == 0 {
        datetime.format("%Y-%m-%d").to_string()
    } else {
        datetime.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

/// Map the data lines of a table onto its header
pub fn rows_from_table(table: Vec<Vec<String>>) -> Vec<Row> {
    // Trailing empty cells do not widen the table
    let width = table
        .iter()
        .filter_map(|cells| cells.iter().rposition(|cell| !cell.is_empty()))
        .map(|last| last + 1)
        .max()
        .unwrap_or(0);
    let mut lines = table.into_iter();

    let Some(mut header) = lines.next() else {
        return Vec::new();
    };
    header.resize(width, String::new());
    let columns = unique_headers(&header);

    lines
        .filter(|cells| cells.iter().any(|cell| !cell.is_empty()))
        .map(|mut cells| {
            cells.resize(width, String::new());
            Row {
                cells: columns.iter().cloned().zip(cells).collect(),
            }
        })
        .collect()
}

/// Column names for a header line
///
/// Empty cells become `__EMPTY`; a repeated name gets the first free `_N`
/// suffix (`Sala`, `Sala_1`, `Sala_2`).
fn unique_headers(header: &[String]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut next_suffix: HashMap<String, usize> = HashMap::new();

    header
        .iter()
        .map(|cell| {
            let base = if cell.is_empty() {
                EMPTY_HEADER.to_string()
            } else {
                cell.clone()
            };

            if used.insert(base.clone()) {
                return base;
            }

            let suffix = next_suffix.entry(base.clone()).or_insert(1);
            loop {
                let candidate = format!("{}_{}", base, suffix);
                *suffix += 1;
                if used.insert(candidate.clone()) {
                    return candidate;
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::{Format, Workbook};

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_csv_rows_are_keyed_by_header() {
        let rows = load_rows("horarios.csv", b"Professor,Sala\nAna,B1\n,B2\n").unwrap();
        assert_eq!(
            rows,
            vec![
                row(&[("Professor", "Ana"), ("Sala", "B1")]),
                row(&[("Professor", ""), ("Sala", "B2")]),
            ]
        );
    }

    #[test]
    fn test_short_lines_default_to_empty_cells() {
        let rows = load_rows("a.csv", b"Curso,Professor,Sala\nDireito\nPedagogia,Bruno,C3\n").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Professor"), Some(""));
        assert_eq!(rows[0].get("Sala"), Some(""));
        assert_eq!(rows[1].get("Sala"), Some("C3"));
    }

    #[test]
    fn test_bom_and_semicolon_delimiter() {
        let bytes = "\u{feff}Professor;Sala;Disciplina\r\nCarla;A10;Cálculo, Parte 1\r\n".as_bytes();
        let rows = load_rows("export.CSV", bytes).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns().collect::<Vec<_>>(), ["Professor", "Sala", "Disciplina"]);
        assert_eq!(rows[0].get("Disciplina"), Some("Cálculo, Parte 1"));
    }

    #[test]
    fn test_quoted_fields_keep_delimiters_and_quotes() {
        let rows = load_rows("a.csv", b"Professor,Obs\n\"Silva, D.\",\"disse \"\"oi\"\"\"\n").unwrap();
        assert_eq!(rows[0].get("Professor"), Some("Silva, D."));
        assert_eq!(rows[0].get("Obs"), Some("disse \"oi\""));
    }

    #[test]
    fn test_blank_lines_are_not_rows() {
        let rows = load_rows("a.csv", b"Professor,Sala\n,\nAna,B1\n\n,,\n").unwrap();
        assert_eq!(rows, vec![row(&[("Professor", "Ana"), ("Sala", "B1")])]);
    }

    #[test]
    fn test_empty_and_repeated_headers() {
        let table = vec![
            vec!["Sala".into(), "".into(), "Sala".into(), "Sala_1".into(), "".into(), "Sala".into()],
            vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into(), "f".into()],
        ];
        let rows = rows_from_table(table);
        assert_eq!(
            rows[0].columns().collect::<Vec<_>>(),
            ["Sala", "__EMPTY", "Sala_1", "Sala_1_1", "__EMPTY_1", "Sala_2"]
        );
    }

    #[test]
    fn test_extra_cells_get_generated_columns() {
        let rows = load_rows("a.csv", b"Professor,Sala\nAna,B1,extra\n").unwrap();
        assert_eq!(rows[0].get("__EMPTY"), Some("extra"));
    }

    #[test]
    fn test_empty_file_has_no_rows() {
        assert!(load_rows("vazio.csv", b"").unwrap().is_empty());
        assert!(load_rows("so-cabecalho.csv", b"Professor,Sala\n").unwrap().is_empty());
    }

    #[test]
    fn test_windows_1252_csv_is_decoded() {
        let rows = load_rows("grade.csv", b"Professor;Sala;Disciplina\nJo\xe3o;B1;Introdu\xe7\xe3o\n").unwrap();
        assert_eq!(
            rows,
            vec![row(&[("Professor", "João"), ("Sala", "B1"), ("Disciplina", "Introdução")])]
        );
    }

    #[test]
    fn test_fallback_applies_per_field() {
        // UTF-8 "João" next to a Windows-1252 euro sign
        let rows = load_rows("a.csv", b"Professor,Sala\nJo\xc3\xa3o,\x80 1\n").unwrap();
        assert_eq!(rows[0].get("Professor"), Some("João"));
        assert_eq!(rows[0].get("Sala"), Some("€ 1"));
    }

    #[test]
    fn test_leading_ff_fe_is_not_a_utf16_mark() {
        let rows = load_rows("a.csv", b"Professor\n\xff\xfe\n").unwrap();
        assert_eq!(rows[0].get("Professor"), Some("ÿþ"));
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter(b"a,b,c\n1;2;3;4;5"), b',');
        assert_eq!(sniff_delimiter(b"a;b;c\n"), b';');
        assert_eq!(sniff_delimiter(b"a\tb\n"), b'\t');
        assert_eq!(sniff_delimiter(b"\"x;y;z\",b\n"), b',');
        assert_eq!(sniff_delimiter(b"single"), b',');
    }

    #[test]
    fn test_file_format_from_name() {
        assert_eq!(FileFormat::from_file_name("a.csv"), FileFormat::Delimited);
        assert_eq!(FileFormat::from_file_name("A.CSV"), FileFormat::Delimited);
        assert_eq!(FileFormat::from_file_name("a.xlsx"), FileFormat::Workbook);
        assert_eq!(FileFormat::from_file_name("a.ods"), FileFormat::Workbook);
        assert_eq!(FileFormat::from_file_name("sem-extensao"), FileFormat::Workbook);
    }

    #[test]
    fn test_xlsx_first_sheet_is_decoded() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Professor").unwrap();
        sheet.write_string(0, 1, "Sala").unwrap();
        sheet.write_string(0, 2, "Turma").unwrap();
        sheet.write_string(0, 3, "Ativo").unwrap();
        sheet.write_string(1, 0, "Ana").unwrap();
        sheet.write_number(1, 1, 201).unwrap();
        sheet.write_number(1, 2, 2.5).unwrap();
        sheet.write_boolean(1, 3, true).unwrap();
        sheet.write_string(2, 1, "B2").unwrap();

        let other = workbook.add_worksheet();
        other.write_string(0, 0, "ignored").unwrap();

        let bytes = workbook.save_to_buffer().unwrap();
        let rows = load_rows("grade.xlsx", &bytes).unwrap();

        assert_eq!(
            rows,
            vec![
                row(&[("Professor", "Ana"), ("Sala", "201"), ("Turma", "2.5"), ("Ativo", "TRUE")]),
                row(&[("Professor", ""), ("Sala", "B2"), ("Turma", ""), ("Ativo", "")]),
            ]
        );
    }

    #[test]
    fn test_xlsx_dates_are_iso_text() {
        let mut workbook = Workbook::new();
        let date = Format::new().set_num_format("yyyy-mm-dd");
        let date_time = Format::new().set_num_format("yyyy-mm-dd hh:mm");
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Professor").unwrap();
        sheet.write_string(0, 1, "Data").unwrap();
        sheet.write_string(0, 2, "Inicio").unwrap();
        sheet.write_string(1, 0, "Ana").unwrap();
        // 2024-03-15 and 2024-03-15 12:00 as Excel serial values
        sheet.write_number_with_format(1, 1, 45366.0, &date).unwrap();
        sheet.write_number_with_format(1, 2, 45366.5, &date_time).unwrap();

        let bytes = workbook.save_to_buffer().unwrap();
        let rows = load_rows("grade.xlsx", &bytes).unwrap();

        assert_eq!(rows[0].get("Data"), Some("2024-03-15"));
        assert_eq!(rows[0].get("Inicio"), Some("2024-03-15T12:00:00"));
    }

    #[test]
    fn test_format_datetime() {
        let midnight = chrono::NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(format_datetime(midnight), "2024-03-15");
        let morning = midnight.date().and_hms_opt(8, 30, 5).unwrap();
        assert_eq!(format_datetime(morning), "2024-03-15T08:30:05");
    }

    #[test]
    fn test_corrupt_workbook_is_an_error() {
        assert!(load_rows("grade.xlsx", b"definitely not a zip archive").is_err());
    }

    #[test]
    fn test_row_serializes_in_header_order() {
        let r = row(&[("Sala", "B1"), ("Professor", "Ana")]);
        assert_eq!(serde_json::to_string(&r).unwrap(), r#"{"Sala":"B1","Professor":"Ana"}"#);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(0.1), "0.1");
    }
}
