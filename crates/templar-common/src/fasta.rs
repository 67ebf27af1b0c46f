//! FASTA reading and writing
//!
//! Rows keep their file order; several consumers (archive metadata, the
//! `|`-joined multi-chain alignment) depend on it, so the record list is a
//! `Vec` of `(label, sequence)` pairs rather than a map.

use crate::error::{CommonError, Result};
use std::path::Path;

/// Ordered FASTA records.
pub type FastaRecords = Vec<(String, String)>;

/// Render records to FASTA text.
pub fn to_fasta_string(records: &[(String, String)]) -> String {
    let mut s = String::new();
    for (label, sequence) in records {
        s.push('>');
        s.push_str(label);
        s.push('\n');
        s.push_str(sequence);
        s.push('\n');
    }
    s
}

/// Write records to a FASTA file.
pub fn write_fasta(path: impl AsRef<Path>, records: &[(String, String)]) -> Result<()> {
    std::fs::write(path, to_fasta_string(records))?;
    Ok(())
}

/// Parse FASTA text into ordered records.
pub fn parse_fasta_str(s: &str) -> Result<FastaRecords> {
    let mut records: FastaRecords = Vec::new();
    for line in s.lines() {
        if let Some(label) = line.strip_prefix('>') {
            records.push((label.trim().to_string(), String::new()));
        } else if !line.trim().is_empty() {
            let (_, sequence) = records
                .last_mut()
                .ok_or_else(|| CommonError::Parse("fasta data before first header".to_string()))?;
            sequence.push_str(line.trim());
        }
    }
    Ok(records)
}

/// Parse a FASTA file into ordered records.
pub fn parse_fasta(path: impl AsRef<Path>) -> Result<FastaRecords> {
    let contents = std::fs::read_to_string(path)?;
    parse_fasta_str(&contents)
}

/// Find a record by label.
pub fn find_record<'a>(records: &'a [(String, String)], label: &str) -> Option<&'a str> {
    records
        .iter()
        .find(|(l, _)| l == label)
        .map(|(_, s)| s.as_str())
}
