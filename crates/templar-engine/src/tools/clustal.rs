//! clustalw adapter
//!
//! Multiple alignment of labelled sequences. clustalw is case-blind in its
//! sequence names, so lowercase letters and underscores are escaped before
//! the run and unescaped in the output labels.

use crate::caps::MultiAlign;
use crate::error::{PipelineError, Result};
use crate::models::align::Alignment;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

pub struct ClustalAligner {
    clustalw_exe: PathBuf,
}

impl ClustalAligner {
    pub fn new(clustalw_exe: impl Into<PathBuf>) -> Self {
        Self {
            clustalw_exe: clustalw_exe.into(),
        }
    }
}

#[async_trait]
impl MultiAlign for ClustalAligner {
    async fn align(&self, sequences: &[(String, String)]) -> Result<Alignment> {
        let work_dir = tempfile::tempdir()?;
        let input_path = work_dir.path().join("input.fa");
        let output_path = work_dir.path().join("output.fa");

        let escaped: Vec<(String, String)> = sequences
            .iter()
            .map(|(label, seq)| (lowercase_escape(label), seq.clone()))
            .collect();
        templar_common::fasta::write_fasta(&input_path, &escaped)?;

        let output = Command::new(&self.clustalw_exe)
            .arg("-TYPE=PROTEIN")
            .arg("-OUTPUT=FASTA")
            .arg("-PWMATRIX=BLOSUM")
            .arg(format!("-OUTFILE={}", output_path.display()))
            .arg(format!("-INFILE={}", input_path.display()))
            .output()
            .await
            .map_err(|e| {
                PipelineError::Init(format!(
                    "cannot run clustalw at {}: {}",
                    self.clustalw_exe.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(PipelineError::Service(format!(
                "clustalw failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let records = templar_common::fasta::parse_fasta(&output_path)?;
        let rows = records
            .into_iter()
            .map(|(label, row)| (lowercase_unescape(&label), row))
            .collect();
        Ok(Alignment::from_records(rows))
    }
}

/// Make lowercase distinctive from uppercase for clustal.
fn lowercase_escape(label: &str) -> String {
    let mut out = String::with_capacity(label.len() * 2);
    for c in label.chars() {
        if c.is_lowercase() || c == '_' {
            out.push('_');
        }
        out.push(c);
    }
    out
}

/// Undo [`lowercase_escape`].
fn lowercase_unescape(escaped: &str) -> String {
    let chars: Vec<char> = escaped.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '_' && i + 1 < chars.len() {
            out.extend(chars[i + 1].to_lowercase());
            i += 2;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_round_trip() {
        for label in ["1crn-A", "abC_d", "TARGET", "a_b_c"] {
            assert_eq!(lowercase_unescape(&lowercase_escape(label)), label);
        }
    }

    #[test]
    fn test_escape_marks_lowercase() {
        assert_eq!(lowercase_escape("aB"), "_aB");
        assert_eq!(lowercase_escape("x_y"), "_x___y");
    }
}
