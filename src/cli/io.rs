//! File and stdout handling for the CLI
//!
//! - Documents: JSON lines or one JSON array, extended JSON accepted
//! - Output: one JSON document per line, UTF-8
//! - Frames: concatenated `encode_frame` records

use std::fs;
use std::io::Write;
use std::path::Path;

use serde_json::Value as Json;

use crate::value::codec::{decode_frame, encode_frame};
use crate::value::{document_from_json, document_to_json, Document, JsonMode};

use super::errors::{CliError, CliResult};

/// Read a whole JSON file
pub fn read_json(path: &Path) -> CliResult<Json> {
    let content = fs::read_to_string(path)
        .map_err(|e| CliError::io_error(format!("failed to read {}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&content)?)
}

/// Read documents from a JSON lines file or a file holding a JSON array
pub fn read_documents(path: &Path) -> CliResult<Vec<Document>> {
    let content = fs::read_to_string(path)
        .map_err(|e| CliError::io_error(format!("failed to read {}: {}", path.display(), e)))?;
    if content.trim_start().starts_with('[') {
        let json: Json = serde_json::from_str(&content)?;
        let items = json.as_array().map(Vec::as_slice).unwrap_or_default();
        return items
            .iter()
            .map(|item| document_from_json(item).map_err(CliError::from))
            .collect();
    }
    let mut docs = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let json: Json = serde_json::from_str(line).map_err(|e| {
            CliError::input_error(format!("{} line {}: {}", path.display(), number + 1, e))
        })?;
        docs.push(document_from_json(&json)?);
    }
    Ok(docs)
}

/// Write one document as a JSON line
pub fn write_document<W: Write>(out: &mut W, doc: &Document, mode: JsonMode) -> CliResult<()> {
    serde_json::to_writer(&mut *out, &document_to_json(doc, mode))?;
    writeln!(out)?;
    Ok(())
}

/// Append one checksummed frame
pub fn write_frame<W: Write>(out: &mut W, doc: &Document) -> CliResult<()> {
    out.write_all(&encode_frame(doc)?)?;
    Ok(())
}

/// Decode every frame of a frame file
pub fn read_frames(path: &Path) -> CliResult<Vec<Document>> {
    let bytes = fs::read(path)
        .map_err(|e| CliError::io_error(format!("failed to read {}: {}", path.display(), e)))?;
    let mut docs = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (doc, used) = decode_frame(&bytes[offset..])?;
        docs.push(doc);
        offset += used;
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_json_lines_and_array() {
        let mut lines = NamedTempFile::new().unwrap();
        writeln!(lines, "{{\"a\": 1}}").unwrap();
        writeln!(lines).unwrap();
        writeln!(lines, "{{\"a\": {{\"$numberLong\": \"2\"}}}}").unwrap();
        let docs = read_documents(lines.path()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].get("a"), Some(&Value::Int64(2)));

        let mut array = NamedTempFile::new().unwrap();
        write!(array, "[{{\"a\": 1}}, {{\"a\": 2}}]").unwrap();
        assert_eq!(read_documents(array.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_bad_line_reports_position() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{\"a\": 1}}").unwrap();
        writeln!(file, "not json").unwrap();
        let err = read_documents(file.path()).unwrap_err();
        assert!(err.message().contains("line 2"));
    }

    #[test]
    fn test_frames_round_trip_through_file() {
        let docs = vec![
            Document::from_pairs(vec![("n", Value::Int32(1))]),
            Document::from_pairs(vec![("n", Value::Int64(2))]),
        ];
        let mut file = NamedTempFile::new().unwrap();
        for doc in &docs {
            write_frame(&mut file, doc).unwrap();
        }
        file.flush().unwrap();
        assert_eq!(read_frames(file.path()).unwrap(), docs);
    }
}
