//! PDB entry fetch and light parsing
//!
//! Entries come from a divided-layout mirror as gzipped legacy PDB files.
//! Only two views of the content are needed here: the SEQRES chains and
//! the chain order of the ATOM records.

use crate::caps::StructureSource;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;
use templar_common::aminoacid::AminoAcid;
use tracing::debug;

pub struct PdbService {
    client: reqwest::Client,
    mirror_url: String,
}

impl PdbService {
    pub fn new(mirror_url: impl Into<String>, http_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| PipelineError::Init(format!("cannot build http client: {}", e)))?;
        Ok(Self {
            client,
            mirror_url: mirror_url.into(),
        })
    }
}

#[async_trait]
impl StructureSource for PdbService {
    async fn pdb_contents(&self, pdbid: &str) -> Result<String> {
        let pdbid = pdbid.to_lowercase();
        if pdbid.len() != 4 {
            return Err(PipelineError::Value(format!("not a pdb id: {}", pdbid)));
        }
        let part = &pdbid[1..3];
        let url = format!("{}/{}/pdb{}.ent.gz", self.mirror_url, part, pdbid);
        debug!(url = %url, "fetching pdb entry");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(service_error)?
            .error_for_status()
            .map_err(service_error)?;
        let compressed = response.bytes().await.map_err(service_error)?;

        let mut decoder = GzDecoder::new(compressed.as_ref());
        let mut contents = String::new();
        decoder.read_to_string(&mut contents).map_err(|e| {
            PipelineError::Service(format!("cannot decompress pdb entry {}: {}", pdbid, e))
        })?;
        Ok(contents)
    }
}

fn service_error(e: reqwest::Error) -> PipelineError {
    if e.is_timeout() || e.is_connect() {
        PipelineError::Service("timeout connecting with pdb mirror".to_string())
    } else {
        PipelineError::Service(format!("pdb fetch failed: {}", e))
    }
}

// ============================================================================
// Legacy PDB record parsing
// ============================================================================

/// SEQRES chains as amino-acid lists, keyed by chain id.
pub fn parse_seqres(pdb_str: &str) -> BTreeMap<String, Vec<AminoAcid>> {
    let mut sequences: BTreeMap<String, Vec<AminoAcid>> = BTreeMap::new();
    for line in pdb_str.lines() {
        if !line.starts_with("SEQRES") {
            continue;
        }
        let bytes = line.as_bytes();
        if bytes.len() <= 19 {
            continue;
        }
        let chain_id = (bytes[11] as char).to_string();
        let residues = sequences.entry(chain_id).or_default();
        for code in line[19..].split_whitespace() {
            if code.len() == 3 && code != "HOH" {
                residues.push(AminoAcid::from_three_letter_code(code));
            }
        }
    }
    sequences
}

/// SEQRES chains as one-letter sequences, keyed by chain id.
pub fn parse_seqres_sequences(pdb_str: &str) -> BTreeMap<String, String> {
    parse_seqres(pdb_str)
        .into_iter()
        .map(|(chain_id, residues)| {
            (
                chain_id,
                residues.iter().map(|aa| aa.letter).collect::<String>(),
            )
        })
        .collect()
}

/// Chain ids in the order their first protein ATOM record appears.
pub fn parse_chain_order(pdb_str: &str) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for line in pdb_str.lines() {
        if !line.starts_with("ATOM") {
            continue;
        }
        let bytes = line.as_bytes();
        if bytes.len() <= 21 {
            continue;
        }
        let code = line[17..20].trim();
        if AminoAcid::from_three_letter_code(code).is_unknown() {
            continue;
        }
        let chain_id = (bytes[21] as char).to_string();
        if !order.contains(&chain_id) {
            order.push(chain_id);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDB: &str = "\
HEADER    PLANT PROTEIN                           30-APR-81   1CRN
SEQRES   1 A   46  THR THR CYS CYS PRO SER ILE VAL ALA ARG SER ASN
SEQRES   2 A   46  PHE ASN VAL
SEQRES   1 B    3  GLY GLY HOH
ATOM      1  N   THR A   1      17.047  14.099   3.625  1.00 13.79           N
ATOM      2  CA  THR A   1      16.967  12.784   4.338  1.00 10.80           C
ATOM      3  N   GLY B   1       1.000   2.000   3.000  1.00 10.00           N
HETATM    4  O   HOH A 100       0.000   0.000   0.000  1.00  0.00           O
";

    #[test]
    fn test_parse_seqres() {
        let seqs = parse_seqres_sequences(PDB);
        assert_eq!(seqs["A"], "TTCCPSIVARSNFNV");
        // water is not a residue
        assert_eq!(seqs["B"], "GG");
    }

    #[test]
    fn test_parse_chain_order() {
        assert_eq!(parse_chain_order(PDB), vec!["A".to_string(), "B".to_string()]);
    }
}
