// 📄 CSV Source - spreadsheet export → raw rows
//
// Headers are kept verbatim (the field transformer maps them); empty cells
// become None. The SHA-256 of the bytes identifies the upload in the audit log.

use crate::error::ImportResult;
use crate::model::RawRow;
use csv::ReaderBuilder;
use sha2::{Digest, Sha256};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct CsvSource {
    /// File name (or a label for uploaded bodies)
    pub name: String,
    pub fingerprint: String,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl CsvSource {
    pub fn read_path(path: &Path) -> ImportResult<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.csv")
            .to_string();

        Self::from_bytes(name, &bytes)
    }

    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> ImportResult<Self> {
        let name = name.into();
        let fingerprint = fingerprint(bytes);

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();

        for result in reader.records() {
            let record = result?;

            // Fully blank lines (trailing separators, spacer rows) carry nothing
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }

            let mut row = RawRow::new();
            for (i, header) in headers.iter().enumerate() {
                let cell = record
                    .get(i)
                    .filter(|c| !c.trim().is_empty())
                    .map(str::to_string);

                // Repeated header: first non-empty cell wins
                let slot = row.entry(header.clone()).or_insert(None);
                if slot.is_none() {
                    *slot = cell;
                }
            }
            rows.push(row);
        }

        log::info!(
            "Read {} row(s) from {} ({} columns, sha256 {})",
            rows.len(),
            name,
            headers.len(),
            &fingerprint[..12]
        );

        Ok(CsvSource {
            name,
            fingerprint,
            headers,
            rows,
        })
    }
}

/// Hex SHA-256 of the raw bytes
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
