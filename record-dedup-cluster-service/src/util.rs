use crate::export::render;
use calamine::{open_workbook_auto_from_rs, Data, Reader as WorkbookReader};
use csv::ReaderBuilder;
use record_dedup_service::dto::{Record, SourceFile};
use record_dedup_service::error::ServiceError;
use serde_json::{Number, Value};
use std::io::Cursor;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// An ingested source file.
#[derive(Debug)]
pub struct DataFile {
    pub records: Vec<Record>,
    /// Lower-cased extension without the dot
    pub format: String,
}

/// A rendered export, ready to hand back to the caller once.
#[derive(Debug)]
pub struct ExportedFile {
    pub file_name: String,
    /// Base64 encoded bytes
    pub content: String,
}

pub fn pull_data_file(file: &SourceFile) -> Result<DataFile, ServiceError> {
    let format = Path::new(&file.name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    let bytes = base64::decode(file.content.trim()).map_err(|err| {
        ServiceError::malformed_input(format!("Unable to decode file content: {}", err))
    })?;
    let records = match format.as_str() {
        "csv" => read_csv(&bytes)?,
        "xlsx" | "xls" => read_workbook(&bytes)?,
        "json" => serde_json::from_slice(&bytes).map_err(|err| {
            ServiceError::malformed_input(format!("file must contain an array of objects: {}", err))
        })?,
        _ => return Err(ServiceError::unsupported_format("Unsupported file format")),
    };
    Ok(DataFile { records, format })
}

pub fn push_result_file(
    records: &[Record],
    format: &str,
    prefix: &str,
) -> Result<ExportedFile, ServiceError> {
    let start = Instant::now();
    let rendered = render(records, format)?;
    info!(
        records = records.len(),
        format = %rendered.extension,
        "Rendered export in {:.4} secs",
        start.elapsed().as_secs_f64()
    );
    let timestamp = chrono::Utc::now().timestamp_millis();
    Ok(ExportedFile {
        file_name: format!("{}_{}.{}", prefix, timestamp, rendered.extension),
        content: base64::encode(rendered.bytes),
    })
}

fn read_csv(bytes: &[u8]) -> Result<Vec<Record>, ServiceError> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(ServiceError::malformed_input)?
        .clone();
    reader
        .records()
        .map(|row| match row {
            Ok(row) => Ok(headers
                .iter()
                .zip(row.iter())
                .map(|(field, cell)| (field.to_string(), Value::String(cell.to_string())))
                .collect()),
            Err(err) => Err(ServiceError::malformed_input(err)),
        })
        .collect()
}

// First sheet, first row as headers, empty cells left out
fn read_workbook(bytes: &[u8]) -> Result<Vec<Record>, ServiceError> {
    let mut workbook =
        open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(ServiceError::malformed_input)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ServiceError::malformed_input("Workbook contains no sheets"))?
        .map_err(ServiceError::malformed_input)?;
    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(row) => row.iter().map(|cell| cell.to_string()).collect(),
        None => return Ok(vec![]),
    };
    Ok(rows
        .map(|row| {
            headers
                .iter()
                .zip(row)
                .filter(|(field, _)| !field.is_empty())
                .filter_map(|(field, cell)| cell_value(cell).map(|value| (field.clone(), value)))
                .collect::<Record>()
        })
        .filter(|record| !record.is_empty())
        .collect())
}

fn cell_value(cell: &Data) -> Option<Value> {
    match cell {
        Data::Empty => None,
        Data::Int(i) => Some(Value::from(*i)),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            Some(Value::from(*f as i64))
        }
        Data::Float(f) => Number::from_f64(*f).map(Value::Number),
        Data::String(s) => Some(Value::String(s.clone())),
        Data::Bool(b) => Some(Value::Bool(*b)),
        other => Some(Value::String(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use record_dedup_service::error::ErrorKind;
    use serde_json::json;

    fn source(name: &str, body: &[u8]) -> SourceFile {
        SourceFile {
            name: name.to_string(),
            content: base64::encode(body),
        }
    }

    #[test]
    fn reads_csv_cells_as_strings() {
        let file = source("People.CSV", b"id,name,age\n1,Alice,30\n2,Bob,40\n");
        let data = pull_data_file(&file).unwrap();
        assert_eq!(data.format, "csv");
        assert_eq!(data.records.len(), 2);
        assert_eq!(
            Value::Object(data.records[0].clone()),
            json!({ "id": "1", "name": "Alice", "age": "30" })
        );
        let fields: Vec<&String> = data.records[1].keys().collect();
        assert_eq!(fields, vec!["id", "name", "age"]);
    }

    #[test]
    fn short_csv_rows_keep_present_cells() {
        let file = source("short.csv", b"name,city\nAlice\n");
        let data = pull_data_file(&file).unwrap();
        assert_eq!(Value::Object(data.records[0].clone()), json!({ "name": "Alice" }));
    }

    #[test]
    fn reads_json_arrays() {
        let file = source("people.json", br#"[{"name":"Alice","age":30},{"name":"Bob"}]"#);
        let data = pull_data_file(&file).unwrap();
        assert_eq!(data.format, "json");
        assert_eq!(data.records[0]["age"], json!(30));
        assert_eq!(data.records.len(), 2);
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = pull_data_file(&source("people.json", b"{not json")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedInput);
        let err = pull_data_file(&source("people.json", br#"{"name":"Alice"}"#)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedInput);
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = pull_data_file(&source("people.txt", b"a,b")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedFormat);
        let err = pull_data_file(&source("people", b"a,b")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn invalid_base64_is_malformed() {
        let file = SourceFile {
            name: "people.csv".into(),
            content: "%%%".into(),
        };
        assert_eq!(pull_data_file(&file).unwrap_err().kind, ErrorKind::MalformedInput);
    }

    #[test]
    fn unknown_export_format_uses_json() {
        let records = vec![json!({ "name": "Alice" }).as_object().cloned().unwrap()];
        let exported = push_result_file(&records, "pdf", "merged").unwrap();
        assert!(exported.file_name.starts_with("merged_"));
        assert!(exported.file_name.ends_with(".json"));
        let bytes = base64::decode(&exported.content).unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, json!([{ "name": "Alice" }]));
    }
}
