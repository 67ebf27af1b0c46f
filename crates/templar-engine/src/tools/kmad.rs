//! kmad adapter
//!
//! Pairwise alignment of a target sequence against a template chain whose
//! secondary structure is known. Residues go in as 4-character kmad codes
//! carrying the helix/strand annotation; the aligned output comes back as
//! plain one-letter rows in `<output>_al`.

use crate::caps::ProfileAlign;
use crate::error::{PipelineError, Result};
use crate::models::align::TargetTemplateAlignment;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

const GAP_OPEN: f64 = -13.0;
const GAP_EXTEND: f64 = -0.4;
const MODIFIER: f64 = 3.0;

pub struct KmadAligner {
    kmad_exe: PathBuf,
}

impl KmadAligner {
    pub fn new(kmad_exe: impl Into<PathBuf>) -> Self {
        Self {
            kmad_exe: kmad_exe.into(),
        }
    }
}

#[async_trait]
impl ProfileAlign for KmadAligner {
    async fn align(
        &self,
        template_sequence: &str,
        template_secstr: &str,
        target_sequence: &str,
    ) -> Result<TargetTemplateAlignment> {
        if template_sequence.is_empty() {
            return Err(PipelineError::Value("empty template sequence".to_string()));
        }
        if template_sequence.len() != template_secstr.len() {
            return Err(PipelineError::Value(format!(
                "template sequence ({}) has different length than secondary structure ({})",
                template_sequence.len(),
                template_secstr.len()
            )));
        }

        // kmad inserts gaps into single-residue bulges of long helices and
        // strands; flatten those before encoding.
        let secstr = remove_bulges(template_secstr, 'H', 3);
        let secstr = remove_bulges(&secstr, 'E', 3);

        let kmad_template = to_kmad_sequence(template_sequence, Some(&secstr));
        let kmad_target = to_kmad_sequence(target_sequence, None);

        let work_dir = tempfile::tempdir()?;
        let input_path = work_dir.path().join("input.fa");
        let output_prefix = work_dir.path().join("aligned");

        templar_common::fasta::write_fasta(
            &input_path,
            &[
                ("target".to_string(), kmad_target),
                ("template".to_string(), kmad_template),
            ],
        )?;

        let output = Command::new(&self.kmad_exe)
            .arg("-i")
            .arg(&input_path)
            .arg("-o")
            .arg(&output_prefix)
            .arg("-g")
            .arg(format!("{:.1}", GAP_OPEN))
            .arg("-e")
            .arg(format!("{:.1}", GAP_EXTEND))
            .arg("-s")
            .arg(format!("{:.1}", MODIFIER))
            .arg("-c")
            .output()
            .await
            .map_err(|e| {
                PipelineError::Init(format!(
                    "cannot run kmad at {}: {}",
                    self.kmad_exe.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(PipelineError::Service(format!(
                "kmad failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let mut aligned_path = output_prefix.into_os_string();
        aligned_path.push("_al");
        let records = templar_common::fasta::parse_fasta(PathBuf::from(aligned_path))?;

        let target_row = templar_common::fasta::find_record(&records, "target")
            .ok_or_else(|| PipelineError::Service("kmad output misses target row".to_string()))?;
        let template_row = templar_common::fasta::find_record(&records, "template")
            .ok_or_else(|| PipelineError::Service("kmad output misses template row".to_string()))?;

        debug!(
            target_len = target_row.len(),
            template_len = template_row.len(),
            "kmad alignment done"
        );

        Ok(TargetTemplateAlignment::new(target_row, template_row))
    }
}

/// Encode a sequence as kmad codons: one residue plus three annotation
/// characters, with `H`/`E` carried in the second annotation slot.
fn to_kmad_sequence(sequence: &str, secstr: Option<&str>) -> String {
    let secstr_bytes = secstr.map(|s| s.as_bytes());
    let mut out = String::with_capacity(sequence.len() * 4);
    for (i, c) in sequence.chars().enumerate() {
        let ss = secstr_bytes
            .and_then(|s| s.get(i).copied())
            .map(|b| b as char);
        match ss {
            Some('H') | Some('E') => {
                out.push(c);
                out.push('A');
                out.push(ss.unwrap_or('A'));
                out.push('A');
            },
            _ => {
                out.push(c);
                out.push_str("AAA");
            },
        }
    }
    out
}

/// Replace a one-residue interruption of a secondary-structure run with the
/// run's own type, when flanked by `length` identical annotations.
fn remove_bulges(secstr: &str, kind: char, length: usize) -> String {
    let surrounding: String = std::iter::repeat(kind).take(length).collect();
    let mut chars: Vec<char> = secstr.chars().collect();

    let mut i = length;
    while i + length < chars.len() {
        let before: String = chars[i - length..i].iter().collect();
        let after: String = chars[i + 1..i + 1 + length].iter().collect();
        if before == surrounding && after == surrounding {
            chars[i] = kind;
            i += length;
        }
        i += 1;
    }

    chars.into_iter().collect()
}
