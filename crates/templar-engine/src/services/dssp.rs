//! DSSP store
//!
//! File-backed lookup of a template's chain sequence and per-residue
//! secondary-structure string, one `<pdbid>.dssp` file per entry. The
//! fixed-column residue lines carry the chain id at column 12, the residue
//! letter at column 14 and the secondary-structure letter at column 17.
//! Lowercase residue letters mark half-cystines and fold to `C`.

use crate::caps::SecondaryStructureStore;
use crate::error::{PipelineError, Result};
use crate::models::template::TemplateID;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub struct DsspStore {
    dssp_dir: PathBuf,
}

impl DsspStore {
    pub fn new(dssp_dir: impl Into<PathBuf>) -> Self {
        Self {
            dssp_dir: dssp_dir.into(),
        }
    }

    async fn read_entry(&self, pdbid: &str) -> Result<String> {
        let path = self.dssp_dir.join(format!("{}.dssp", pdbid.to_lowercase()));
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            PipelineError::Template(format!("no dssp data for {}: {}", pdbid, e))
        })
    }

    async fn chain_data(&self, template_id: &TemplateID) -> Result<(String, String)> {
        let dssp_str = self.read_entry(template_id.pdbid()).await?;
        let mut data = parse_dssp(&dssp_str);
        data.remove(template_id.chain_id()).ok_or_else(|| {
            PipelineError::Template(format!("no dssp chain {}", template_id))
        })
    }
}

#[async_trait]
impl SecondaryStructureStore for DsspStore {
    async fn has_secondary_structure(&self, template_id: &TemplateID) -> bool {
        self.chain_data(template_id).await.is_ok()
    }

    async fn sequence(&self, template_id: &TemplateID) -> Result<String> {
        Ok(self.chain_data(template_id).await?.0)
    }

    async fn secondary_structure(&self, template_id: &TemplateID) -> Result<String> {
        Ok(self.chain_data(template_id).await?.1)
    }
}

/// Parse the residue lines of a dssp file into per-chain
/// `(sequence, secondary structure)` strings.
pub fn parse_dssp(dssp_str: &str) -> BTreeMap<String, (String, String)> {
    let mut data: BTreeMap<String, (String, String)> = BTreeMap::new();

    for line in dssp_str.lines() {
        let stripped = line.trim();
        if stripped.ends_with('.') || stripped.starts_with('#') || stripped.is_empty() {
            continue; // header
        }

        let bytes = line.as_bytes();
        if bytes.len() <= 16 {
            continue;
        }

        let chain_id = bytes[11] as char;
        let mut amino_acid = bytes[13] as char;
        let secstr = bytes[16] as char;

        if !chain_id.is_alphabetic() {
            continue; // chain breaks
        }

        if amino_acid.is_lowercase() {
            // disulfid bridge partner
            amino_acid = 'C';
        }

        let entry = data.entry(chain_id.to_string()).or_default();
        entry.0.push(amino_acid);
        entry.1.push(secstr);
    }

    data
}
