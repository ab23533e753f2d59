use crate::similarity::display_value;
use csv::Writer;
use record_dedup_service::dto::Record;
use record_dedup_service::error::ServiceError;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer as XmlWriter;
use serde_json::Value;
use std::borrow::Cow;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub struct Rendered {
    pub bytes: Vec<u8>,
    pub extension: String,
}

///
/// Renders records in the named format.
///
/// `json`, `csv`, `xlsx` and `xls` are recognized (case-insensitive). Any
/// other name, including an empty one, renders as json.
///
/// `xls` is written as an Office Open XML workbook, the same bytes as `xlsx`,
/// under the `.xls` extension; there is no legacy BIFF writer. Excel opens it
/// after warning that the content does not match the extension.
///
pub fn render(records: &[Record], format: &str) -> Result<Rendered, ServiceError> {
    let format = format.to_lowercase();
    let (bytes, extension) = match format.as_str() {
        "xlsx" | "xls" => (render_workbook(records)?, format.clone()),
        "csv" => (render_csv(records)?, format.clone()),
        _ => (render_json(records)?, String::from("json")),
    };
    Ok(Rendered { bytes, extension })
}

fn render_json(records: &[Record]) -> Result<Vec<u8>, ServiceError> {
    serde_json::to_vec_pretty(records).map_err(ServiceError::internal_server_error)
}

/// Column names across all records, in first-seen order.
fn columns(records: &[Record]) -> Vec<&str> {
    let mut columns: Vec<&str> = Vec::new();
    for field in records.iter().flat_map(|r| r.keys()) {
        if !columns.contains(&field.as_str()) {
            columns.push(field);
        }
    }
    columns
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(value) => display_value(value).into_owned(),
    }
}

fn render_csv(records: &[Record]) -> Result<Vec<u8>, ServiceError> {
    let columns = columns(records);
    if columns.is_empty() {
        return Ok(vec![]);
    }
    let mut writer = Writer::from_writer(vec![]);
    writer
        .write_record(&columns)
        .map_err(ServiceError::internal_server_error)?;
    for record in records {
        writer
            .write_record(columns.iter().map(|c| cell_text(record.get(*c))))
            .map_err(ServiceError::internal_server_error)?;
    }
    writer
        .into_inner()
        .map_err(ServiceError::internal_server_error)
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

// Single worksheet "Sheet1", header row first
fn render_workbook(records: &[Record]) -> Result<Vec<u8>, ServiceError> {
    let sheet = worksheet_xml(records)?;
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in [
        ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
        ("_rels/.rels", ROOT_RELS.as_bytes()),
        ("xl/workbook.xml", WORKBOOK.as_bytes()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.as_bytes()),
        ("xl/worksheets/sheet1.xml", sheet.as_slice()),
    ] {
        zip.start_file(name, options)
            .map_err(ServiceError::internal_server_error)?;
        zip.write_all(body)
            .map_err(ServiceError::internal_server_error)?;
    }
    zip.finish()
        .map(Cursor::into_inner)
        .map_err(ServiceError::internal_server_error)
}

fn worksheet_xml(records: &[Record]) -> Result<Vec<u8>, ServiceError> {
    let columns = columns(records);
    let mut sheet = SheetWriter::new();
    sheet.write(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    sheet.write(Event::Start(
        BytesStart::new("worksheet").with_attributes([("xmlns", SPREADSHEET_NS)]),
    ))?;
    sheet.write(Event::Start(BytesStart::new("sheetData")))?;
    if !columns.is_empty() {
        sheet.start_row(1)?;
        for (col, name) in columns.iter().enumerate() {
            sheet.string_cell(&cell_ref(col, 1), name)?;
        }
        sheet.write(Event::End(BytesEnd::new("row")))?;
    }
    for (idx, record) in records.iter().enumerate() {
        let row = idx + 2;
        sheet.start_row(row)?;
        for (col, name) in columns.iter().enumerate() {
            let reference = cell_ref(col, row);
            match record.get(*name) {
                None | Some(Value::Null) => {}
                Some(Value::Number(n)) => sheet.value_cell(&reference, None, &n.to_string())?,
                Some(Value::Bool(b)) => {
                    sheet.value_cell(&reference, Some("b"), if *b { "1" } else { "0" })?
                }
                Some(value) => sheet.string_cell(&reference, &display_value(value))?,
            }
        }
        sheet.write(Event::End(BytesEnd::new("row")))?;
    }
    sheet.write(Event::End(BytesEnd::new("sheetData")))?;
    sheet.write(Event::End(BytesEnd::new("worksheet")))?;
    Ok(sheet.into_inner())
}

const SPREADSHEET_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

/// Worksheet body writer; text and attribute values are escaped by quick-xml.
struct SheetWriter {
    writer: XmlWriter<Vec<u8>>,
}

impl SheetWriter {
    fn new() -> Self {
        SheetWriter {
            writer: XmlWriter::new(Vec::new()),
        }
    }

    fn write(&mut self, event: Event) -> Result<(), ServiceError> {
        self.writer
            .write_event(event)
            .map_err(ServiceError::internal_server_error)
    }

    fn start_row(&mut self, row: usize) -> Result<(), ServiceError> {
        let row = row.to_string();
        self.write(Event::Start(
            BytesStart::new("row").with_attributes([("r", row.as_str())]),
        ))
    }

    fn value_cell(&mut self, reference: &str, kind: Option<&str>, value: &str) -> Result<(), ServiceError> {
        let mut cell = BytesStart::new("c").with_attributes([("r", reference)]);
        if let Some(kind) = kind {
            cell.push_attribute(("t", kind));
        }
        self.write(Event::Start(cell))?;
        self.write(Event::Start(BytesStart::new("v")))?;
        self.write(Event::Text(BytesText::new(value)))?;
        self.write(Event::End(BytesEnd::new("v")))?;
        self.write(Event::End(BytesEnd::new("c")))
    }

    fn string_cell(&mut self, reference: &str, text: &str) -> Result<(), ServiceError> {
        let text = xml_chars(text);
        self.write(Event::Start(
            BytesStart::new("c").with_attributes([("r", reference), ("t", "inlineStr")]),
        ))?;
        self.write(Event::Start(BytesStart::new("is")))?;
        self.write(Event::Start(
            BytesStart::new("t").with_attributes([("xml:space", "preserve")]),
        ))?;
        self.write(Event::Text(BytesText::new(&text)))?;
        self.write(Event::End(BytesEnd::new("t")))?;
        self.write(Event::End(BytesEnd::new("is")))?;
        self.write(Event::End(BytesEnd::new("c")))
    }

    fn into_inner(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

// XML 1.0 has no representation for C0 controls other than tab, LF and CR
fn xml_chars(text: &str) -> Cow<'_, str> {
    let forbidden = |c: char| matches!(c, '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\u{E}'..='\u{1F}');
    if text.contains(forbidden) {
        Cow::Owned(text.chars().filter(|&c| !forbidden(c)).collect())
    } else {
        Cow::Borrowed(text)
    }
}

/// A1-style reference, `col` zero based, `row` one based.
fn cell_ref(col: usize, row: usize) -> String {
    let mut name = Vec::new();
    let mut col = col;
    loop {
        name.push(b'A' + (col % 26) as u8);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    name.reverse();
    format!("{}{}", String::from_utf8_lossy(&name), row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::pull_data_file;
    use record_dedup_service::dto::SourceFile;
    use serde_json::json;

    fn records() -> Vec<Record> {
        vec![
            json!({ "id": 1, "name": "Alice", "age": 30 }),
            json!({ "id": 2, "name": "Bob, Jr.", "email": "bob@example.com" }),
            json!({ "id": 3, "name": null, "age": 41.5 }),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
    }

    #[test]
    fn json_is_pretty_printed_with_two_spaces() {
        let rendered = render(&records()[..1], "JSON").unwrap();
        assert_eq!(rendered.extension, "json");
        let text = String::from_utf8(rendered.bytes).unwrap();
        assert_eq!(text, "[\n  {\n    \"id\": 1,\n    \"name\": \"Alice\",\n    \"age\": 30\n  }\n]");
    }

    #[test]
    fn unrecognized_formats_fall_back_to_json() {
        for format in ["pdf", "", "txt"] {
            let rendered = render(&records(), format).unwrap();
            assert_eq!(rendered.extension, "json");
            let parsed: Vec<Record> = serde_json::from_slice(&rendered.bytes).unwrap();
            assert_eq!(parsed, records());
        }
    }

    #[test]
    fn csv_projects_union_of_columns() {
        let rendered = render(&records(), "csv").unwrap();
        assert_eq!(rendered.extension, "csv");
        let text = String::from_utf8(rendered.bytes).unwrap();
        assert_eq!(
            text,
            "id,name,age,email\n1,Alice,30,\n2,\"Bob, Jr.\",,bob@example.com\n3,,41.5,\n"
        );
    }

    #[test]
    fn csv_of_nothing_is_empty() {
        assert!(render(&[], "csv").unwrap().bytes.is_empty());
    }

    #[test]
    fn cell_references() {
        assert_eq!(cell_ref(0, 1), "A1");
        assert_eq!(cell_ref(25, 2), "Z2");
        assert_eq!(cell_ref(26, 3), "AA3");
        assert_eq!(cell_ref(27, 3), "AB3");
        assert_eq!(cell_ref(701, 4), "ZZ4");
        assert_eq!(cell_ref(702, 4), "AAA4");
    }

    #[test]
    fn worksheet_escapes_text() {
        let record = json!({ "note": "<a & b>" }).as_object().cloned().unwrap();
        let xml = String::from_utf8(worksheet_xml(&[record]).unwrap()).unwrap();
        assert!(xml.contains("&lt;a &amp; b&gt;"));
        assert!(xml.contains(r#"<c r="A1" t="inlineStr">"#));
        assert!(xml.contains(r#"<row r="2">"#));
    }

    #[test]
    fn worksheet_keeps_c1_controls_and_drops_c0() {
        let record = json!({ "note": "a\u{85}b\u{7f}c\u{1}d\te" }).as_object().cloned().unwrap();
        let xml = String::from_utf8(worksheet_xml(&[record]).unwrap()).unwrap();
        assert!(xml.contains("a\u{85}b\u{7f}cd\te"));
    }

    #[test]
    fn workbook_reads_back_as_first_sheet() {
        let rendered = render(&records(), "xlsx").unwrap();
        assert_eq!(rendered.extension, "xlsx");
        let file = SourceFile {
            name: "merged.xlsx".into(),
            content: base64::encode(&rendered.bytes),
        };
        let data = pull_data_file(&file).unwrap();
        assert_eq!(data.records.len(), 3);
        assert_eq!(data.records[0]["name"], json!("Alice"));
        assert_eq!(data.records[0]["age"], json!(30));
        assert_eq!(data.records[1]["name"], json!("Bob, Jr."));
        assert!(data.records[2].get("name").is_none());
        assert_eq!(data.records[2]["age"], json!(41.5));
    }

    #[test]
    fn xls_keeps_requested_extension() {
        assert_eq!(render(&records(), "XLS").unwrap().extension, "xls");
    }
}
