//! Template context capability
//!
//! The external modeling engine is a black box that consumes a multi-chain
//! alignment file and emits a structure. What the pipeline needs from its
//! working state is expressed by [`TemplateContext`]: per-chain sequences
//! and secondary structure, residue-level geometry queries, chain deletion,
//! and the modeling run itself. [`ModelingEngine`] opens one context per
//! job; concurrent sessions inside one job are not allowed.

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use templar_common::aminoacid::AminoAcid;

/// One residue of a template chain, with its Cα position when present.
#[derive(Debug, Clone)]
pub struct TemplateResidue {
    /// Author residue number as found in the structure file
    pub number: String,
    pub amino_acid: AminoAcid,
    pub ca: Option<[f64; 3]>,
}

/// The modeling engine's per-job working state for one template.
#[async_trait]
pub trait TemplateContext: Send + Sync {
    /// Lowercase pdb id of the loaded template
    fn pdbid(&self) -> &str;

    /// Protein chain ids in template order
    fn chain_ids(&self) -> Vec<String>;

    fn sequence(&self, chain_id: &str) -> Result<String>;

    fn secondary_structure(&self, chain_id: &str) -> Result<String>;

    fn residues(&self, chain_id: &str) -> Result<Vec<TemplateResidue>>;

    fn delete_chain(&mut self, chain_id: &str) -> Result<()>;

    /// Chains with any atom within 4.5 Å of the given chain.
    fn interacting_chains(&self, chain_id: &str) -> Result<Vec<String>>;

    /// True when the residue's Cα lies within 6 Å of any Cα in `others`.
    fn residue_interacts(&self, residue: &TemplateResidue, others: &[TemplateResidue]) -> bool;

    /// Drive the engine: consume the alignment file, emit the structure.
    /// Returns the path of the produced model inside `work_dir`.
    async fn run_modeling(&mut self, work_dir: &Path, alignment_path: &Path) -> Result<PathBuf>;
}

/// Factory opening a per-job [`TemplateContext`] for a template.
#[async_trait]
pub trait ModelingEngine: Send + Sync {
    async fn load_template(&self, pdbid: &str) -> Result<Box<dyn TemplateContext>>;
}
