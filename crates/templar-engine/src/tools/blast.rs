//! blastp adapter
//!
//! Runs `blastp -outfmt 5` against a databank and parses the XML report
//! into [`BlastAlignment`]s keyed by hit id. A missing databank index is a
//! recoverable error: the index may simply not have been built yet.

use crate::caps::{BlastHits, SequenceSearch};
use crate::error::{PipelineError, Result};
use crate::models::align::BlastAlignment;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

const MISSING_INDEX_MARKER: &str =
    "BLAST Database error: No alias or index file found for protein database";

pub struct Blaster {
    blastp_exe: PathBuf,
}

impl Blaster {
    pub fn new(blastp_exe: impl Into<PathBuf>) -> Self {
        Self {
            blastp_exe: blastp_exe.into(),
        }
    }
}

#[async_trait]
impl SequenceSearch for Blaster {
    async fn blastp(&self, sequence: &str, databank: &Path) -> Result<BlastHits> {
        let work_dir = tempfile::tempdir()?;
        let input_path = work_dir.path().join("query.fa");
        let output_path = work_dir.path().join("hits.xml");

        templar_common::fasta::write_fasta(
            &input_path,
            &[("target".to_string(), sequence.to_string())],
        )?;

        let output = Command::new(&self.blastp_exe)
            .arg("-query")
            .arg(&input_path)
            .arg("-db")
            .arg(databank)
            .arg("-outfmt")
            .arg("5")
            .arg("-out")
            .arg(&output_path)
            .output()
            .await
            .map_err(|e| {
                PipelineError::Init(format!(
                    "cannot run blastp at {}: {}",
                    self.blastp_exe.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let err_msg = String::from_utf8_lossy(&output.stderr).to_string();
            if err_msg.starts_with(MISSING_INDEX_MARKER) {
                return Err(PipelineError::Recoverable(err_msg));
            }
            return Err(PipelineError::Service(format!(
                "blastp failed for databank {}: {}",
                databank.display(),
                err_msg
            )));
        }

        let xml_str = std::fs::read_to_string(&output_path)?;
        let hits = parse_blast_xml(&xml_str, sequence, &databank.to_string_lossy())?;
        debug!(
            hits = hits.len(),
            databank = %databank.display(),
            "blastp finished"
        );
        Ok(hits)
    }
}

// ============================================================================
// XML report structure (-outfmt 5)
// ============================================================================

#[derive(Debug, Deserialize)]
struct BlastOutput {
    #[serde(rename = "BlastOutput_iterations")]
    iterations: BlastIterations,
}

#[derive(Debug, Deserialize)]
struct BlastIterations {
    #[serde(rename = "Iteration", default)]
    iterations: Vec<BlastIteration>,
}

#[derive(Debug, Deserialize)]
struct BlastIteration {
    #[serde(rename = "Iteration_hits")]
    hits: Option<IterationHits>,
}

#[derive(Debug, Deserialize)]
struct IterationHits {
    #[serde(rename = "Hit", default)]
    hits: Vec<XmlHit>,
}

#[derive(Debug, Deserialize)]
struct XmlHit {
    #[serde(rename = "Hit_def")]
    def: String,
    #[serde(rename = "Hit_hsps")]
    hsps: XmlHitHsps,
}

#[derive(Debug, Deserialize)]
struct XmlHitHsps {
    #[serde(rename = "Hsp", default)]
    hsps: Vec<XmlHsp>,
}

#[derive(Debug, Deserialize)]
struct XmlHsp {
    #[serde(rename = "Hsp_query-from")]
    query_from: usize,
    #[serde(rename = "Hsp_query-to")]
    query_to: usize,
    #[serde(rename = "Hsp_qseq")]
    qseq: String,
    #[serde(rename = "Hsp_hit-from")]
    hit_from: usize,
    #[serde(rename = "Hsp_hit-to")]
    hit_to: usize,
    #[serde(rename = "Hsp_hseq")]
    hseq: String,
}

/// Parse an `-outfmt 5` report into alignments keyed by hit id.
pub fn parse_blast_xml(
    xml_str: &str,
    full_query_sequence: &str,
    databank: &str,
) -> Result<BlastHits> {
    let report: BlastOutput = quick_xml::de::from_str(xml_str)?;

    let mut hits: BlastHits = BlastHits::new();
    for iteration in report.iterations.iterations {
        let Some(iteration_hits) = iteration.hits else {
            continue;
        };
        for hit in iteration_hits.hits {
            let alignments = hits.entry(hit.def.clone()).or_default();
            for hsp in hit.hsps.hsps {
                alignments.push(BlastAlignment {
                    hit_id: hit.def.clone(),
                    databank: databank.to_string(),
                    full_query_sequence: full_query_sequence.to_string(),
                    query_start: hsp.query_from,
                    query_end: hsp.query_to,
                    subject_start: hsp.hit_from,
                    subject_end: hsp.hit_to,
                    query_alignment: hsp.qseq,
                    subject_alignment: hsp.hseq,
                });
            }
        }
    }
    Ok(hits)
}
