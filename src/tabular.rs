use crate::error::ImportError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                format!("{}", *n as i64)
            }
            CellValue::Number(n) => n.to_string(),
            CellValue::Text(s) => s.trim().to_string(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.as_text().is_empty()
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value.to_string())
        }
    }
}

pub type RawRow = HashMap<String, CellValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedRow {
    pub row_number: usize,
    pub cells: RawRow,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodedTable {
    pub headers: Vec<String>,
    pub rows: Vec<DecodedRow>,
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub bytes: Arc<[u8]>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

pub trait TabularDecoder: Send + Sync {
    fn read_headers(&self, file: SourceFile) -> BoxFuture<'static, Result<Vec<String>, ImportError>>;

    fn read_table(&self, file: SourceFile) -> BoxFuture<'static, Result<DecodedTable, ImportError>>;
}

pub const DEFAULT_MAX_ROWS: usize = 5000;

#[derive(Debug, Clone)]
pub struct CsvDecoder {
    pub max_rows: usize,
}

impl Default for CsvDecoder {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

impl CsvDecoder {
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }

    fn reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(bytes);
        csv::ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_reader(bytes)
    }

    pub fn decode_headers(bytes: &[u8]) -> Result<Vec<String>, ImportError> {
        let mut reader = Self::reader(bytes);
        let headers = reader
            .headers()
            .map_err(|e| ImportError::Decode(format!("cannot read header row: {e}")))?;
        let headers: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();
        if headers.iter().all(String::is_empty) {
            return Err(ImportError::Decode("header row is empty".into()));
        }
        Ok(headers)
    }

    pub fn decode(bytes: &[u8], max_rows: usize) -> Result<DecodedTable, ImportError> {
        let headers = Self::decode_headers(bytes)?;
        let mut reader = Self::reader(bytes);
        let mut rows = Vec::new();
        for (idx, record) in reader.byte_records().enumerate() {
            let row_number = idx + 2;
            let record =
                record.map_err(|e| ImportError::Decode(format!("row {row_number}: {e}")))?;
            let values: Vec<String> = record
                .iter()
                .map(|c| String::from_utf8_lossy(c).into_owned())
                .collect();
            if values.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            if rows.len() == max_rows {
                return Err(ImportError::Decode(format!(
                    "file has more than {max_rows} data rows"
                )));
            }
            let mut issues = Vec::new();
            let mut cells = RawRow::with_capacity(headers.len());
            for (header, (raw, value)) in headers.iter().zip(record.iter().zip(&values)) {
                if header.is_empty() {
                    continue;
                }
                if std::str::from_utf8(raw).is_err() {
                    issues.push(format!(
                        "column '{header}' is not valid UTF-8; unreadable characters were replaced"
                    ));
                }
                cells
                    .entry(header.clone())
                    .or_insert_with(|| CellValue::from(value.as_str()));
            }
            rows.push(DecodedRow {
                row_number,
                cells,
                issues,
            });
        }
        Ok(DecodedTable { headers, rows })
    }
}

impl TabularDecoder for CsvDecoder {
    fn read_headers(&self, file: SourceFile) -> BoxFuture<'static, Result<Vec<String>, ImportError>> {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || Self::decode_headers(&file.bytes))
                .await
                .map_err(|e| ImportError::Transport(format!("decoder task failed: {e}")))?
        })
    }

    fn read_table(&self, file: SourceFile) -> BoxFuture<'static, Result<DecodedTable, ImportError>> {
        let max_rows = self.max_rows;
        Box::pin(async move {
            tokio::task::spawn_blocking(move || Self::decode(&file.bytes, max_rows))
                .await
                .map_err(|e| ImportError::Transport(format!("decoder task failed: {e}")))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = "\u{feff}QSNo,eng-question,eng-A,eng-B,correctOption\n\
                         1,2+2=?,3,4,B\n\
                         ,,,,\n\
                         2,Capital of France?,Paris,Rome\n";

    #[test]
    fn decodes_rows_with_sheet_numbers() {
        let table = CsvDecoder::decode(SHEET.as_bytes(), 100).unwrap();
        assert_eq!(table.headers[0], "QSNo");
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].row_number, 2);
        assert_eq!(table.rows[1].row_number, 4);
        assert_eq!(table.rows[0].cells["eng-B"].as_text(), "4");
        assert!(!table.rows[1].cells.contains_key("correctOption"));
    }

    #[test]
    fn unreadable_cell_does_not_sink_its_neighbours() {
        let mut sheet = b"QSNo,eng-question,eng-A,eng-B,correctOption\n1,q1,a,b,A\n2,".to_vec();
        sheet.extend_from_slice(&[0xFF, 0xFE]);
        sheet.extend_from_slice(b",a,b,A\n3,q3,a,b,B\n");
        let table = CsvDecoder::decode(&sheet, 100).unwrap();
        assert_eq!(table.rows.len(), 3);
        assert!(table.rows[0].issues.is_empty());
        assert_eq!(table.rows[1].issues.len(), 1);
        assert!(table.rows[1].issues[0].contains("eng-question"));
        assert_eq!(table.rows[1].cells["eng-question"].as_text(), "\u{fffd}\u{fffd}");
        assert_eq!(table.rows[2].cells["eng-question"].as_text(), "q3");
    }

    #[test]
    fn row_limit_is_enforced() {
        let err = CsvDecoder::decode(SHEET.as_bytes(), 1).unwrap_err();
        assert!(matches!(err, ImportError::Decode(_)));
    }

    #[test]
    fn empty_file_is_a_decode_error() {
        assert!(matches!(
            CsvDecoder::decode_headers(b""),
            Err(ImportError::Decode(_))
        ));
    }

    #[test]
    fn numeric_cells_render_as_integers() {
        assert_eq!(CellValue::Number(3.0).as_text(), "3");
        assert_eq!(CellValue::Number(2.5).as_text(), "2.5");
        assert_eq!(CellValue::Text("  x ".into()).as_text(), "x");
        let parsed: RawRow = serde_json::from_str(r#"{"a": 1, "b": null, "c": "t"}"#).unwrap();
        assert_eq!(parsed["a"], CellValue::Number(1.0));
        assert!(parsed["b"].is_blank());
    }

    #[tokio::test]
    async fn decoder_runs_off_the_async_thread() {
        let file = SourceFile::new("sheet.csv", SHEET.as_bytes().to_vec());
        let headers = CsvDecoder::default().read_headers(file.clone()).await.unwrap();
        assert_eq!(headers.len(), 5);
        let table = CsvDecoder::default().read_table(file).await.unwrap();
        assert_eq!(table.rows.len(), 2);
    }
}
