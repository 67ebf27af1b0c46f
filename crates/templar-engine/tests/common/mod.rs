#![allow(dead_code)]
//! Shared fakes for the engine integration tests. Every external
//! collaborator of the pipeline has an in-memory stand-in here, so the
//! search, composition and orchestration logic runs without any
//! subprocess, file store or network.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use templar_common::aminoacid::AminoAcid;
use templar_engine::caps::{
    Blacklist, BlastHits, DomainAnnotation, MultiAlign, ProfileAlign, SecondaryStructureStore,
    SequenceSearch, SequenceSource, StructureSource,
};
use templar_engine::error::{PipelineError, Result};
use templar_engine::models::align::{Alignment, BlastAlignment, TargetTemplateAlignment};
use templar_engine::models::range::AnnotatedRange;
use templar_engine::models::template::TemplateID;
use templar_engine::modeling::context::{ModelingEngine, TemplateContext, TemplateResidue};

// ============================================================================
// Blast
// ============================================================================

/// Build a blast hit; the rows are placeholders, the domain engine replaces
/// them with the kmad re-alignment before scoring them.
pub fn blast_hit(hit_id: &str, query_sequence: &str) -> BlastAlignment {
    BlastAlignment {
        hit_id: hit_id.to_string(),
        databank: "fake".to_string(),
        full_query_sequence: query_sequence.to_string(),
        query_start: 1,
        query_end: query_sequence.len(),
        subject_start: 1,
        subject_end: query_sequence.len(),
        query_alignment: query_sequence.to_string(),
        subject_alignment: query_sequence.to_string(),
    }
}

/// Build a blast hit with explicit rows, for the composer's proteome
/// search where the blast rows themselves are scored.
pub fn blast_hit_with_rows(
    hit_id: &str,
    query_sequence: &str,
    query_row: &str,
    subject_row: &str,
) -> BlastAlignment {
    BlastAlignment {
        hit_id: hit_id.to_string(),
        databank: "fake".to_string(),
        full_query_sequence: query_sequence.to_string(),
        query_start: 1,
        query_end: query_sequence.len(),
        subject_start: 1,
        subject_end: subject_row.chars().filter(|c| *c != '-').count(),
        query_alignment: query_row.to_string(),
        subject_alignment: subject_row.to_string(),
    }
}

#[derive(Default)]
pub struct FakeBlast {
    /// Hits per query sequence; queries without an entry yield no hits.
    pub responses: Mutex<HashMap<String, Vec<BlastAlignment>>>,
    pub calls: AtomicUsize,
}

impl FakeBlast {
    pub fn with_hits(hits: Vec<(&str, Vec<BlastAlignment>)>) -> Self {
        let responses = hits
            .into_iter()
            .map(|(query, alignments)| (query.to_string(), alignments))
            .collect();
        Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SequenceSearch for FakeBlast {
    async fn blastp(&self, sequence: &str, _databank: &Path) -> Result<BlastHits> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let responses = self.responses.lock().unwrap();
        let mut hits = BlastHits::new();
        if let Some(alignments) = responses.get(sequence) {
            for alignment in alignments {
                hits.entry(alignment.hit_id.clone())
                    .or_default()
                    .push(alignment.clone());
            }
        }
        Ok(hits)
    }
}

// ============================================================================
// kmad / clustal
// ============================================================================

/// Deterministic stand-in for kmad: explicit row overrides first, then a
/// substring-based gapless alignment, then end-padding.
#[derive(Default)]
pub struct FakeKmad {
    pub overrides: Mutex<HashMap<(String, String), (String, String)>>,
}

impl FakeKmad {
    pub fn with_override(
        self,
        template_sequence: &str,
        target_sequence: &str,
        target_row: &str,
        template_row: &str,
    ) -> Self {
        self.overrides.lock().unwrap().insert(
            (template_sequence.to_string(), target_sequence.to_string()),
            (target_row.to_string(), template_row.to_string()),
        );
        self
    }
}

pub fn pad_align(target: &str, template: &str) -> (String, String) {
    if let Some(offset) = template.find(target) {
        let target_row = format!(
            "{}{}{}",
            "-".repeat(offset),
            target,
            "-".repeat(template.len() - offset - target.len())
        );
        return (target_row, template.to_string());
    }
    if let Some(offset) = target.find(template) {
        let template_row = format!(
            "{}{}{}",
            "-".repeat(offset),
            template,
            "-".repeat(target.len() - offset - template.len())
        );
        return (target.to_string(), template_row);
    }
    let width = target.len().max(template.len());
    (
        format!("{}{}", target, "-".repeat(width - target.len())),
        format!("{}{}", template, "-".repeat(width - template.len())),
    )
}

#[async_trait]
impl ProfileAlign for FakeKmad {
    async fn align(
        &self,
        template_sequence: &str,
        _template_secstr: &str,
        target_sequence: &str,
    ) -> Result<TargetTemplateAlignment> {
        let overrides = self.overrides.lock().unwrap();
        if let Some((target_row, template_row)) =
            overrides.get(&(template_sequence.to_string(), target_sequence.to_string()))
        {
            return Ok(TargetTemplateAlignment::new(target_row, template_row));
        }
        let (target_row, template_row) = pad_align(target_sequence, template_sequence);
        Ok(TargetTemplateAlignment::new(target_row, template_row))
    }
}

/// clustal stand-in with the same padding behavior, applied pairwise.
#[derive(Default)]
pub struct FakeClustal;

#[async_trait]
impl MultiAlign for FakeClustal {
    async fn align(&self, sequences: &[(String, String)]) -> Result<Alignment> {
        if sequences.len() != 2 {
            return Err(PipelineError::Value(
                "fake clustal aligns exactly two sequences".to_string(),
            ));
        }
        let (row_a, row_b) = pad_align(&sequences[0].1, &sequences[1].1);
        Ok(Alignment::from_records(vec![
            (sequences[0].0.clone(), row_a),
            (sequences[1].0.clone(), row_b),
        ]))
    }
}

// ============================================================================
// Services
// ============================================================================

#[derive(Default)]
pub struct FakeDssp {
    pub entries: HashMap<TemplateID, (String, String)>,
}

impl FakeDssp {
    /// Register a template chain with all-coil secondary structure.
    pub fn with_chain(mut self, template_id: TemplateID, sequence: &str) -> Self {
        let secstr = "C".repeat(sequence.len());
        self.entries
            .insert(template_id, (sequence.to_string(), secstr));
        self
    }
}

#[async_trait]
impl SecondaryStructureStore for FakeDssp {
    async fn has_secondary_structure(&self, template_id: &TemplateID) -> bool {
        self.entries.contains_key(template_id)
    }

    async fn sequence(&self, template_id: &TemplateID) -> Result<String> {
        self.entries
            .get(template_id)
            .map(|(sequence, _)| sequence.clone())
            .ok_or_else(|| PipelineError::Template(format!("no dssp chain {}", template_id)))
    }

    async fn secondary_structure(&self, template_id: &TemplateID) -> Result<String> {
        self.entries
            .get(template_id)
            .map(|(_, secstr)| secstr.clone())
            .ok_or_else(|| PipelineError::Template(format!("no dssp chain {}", template_id)))
    }
}

#[derive(Default)]
pub struct FakeInterpro {
    pub ranges: Vec<AnnotatedRange>,
}

#[async_trait]
impl DomainAnnotation for FakeInterpro {
    async fn domain_ranges(&self, _sequence: &str) -> Result<Vec<AnnotatedRange>> {
        Ok(self.ranges.clone())
    }
}

#[derive(Default)]
pub struct FakeUniprot {
    pub sequences: HashMap<String, String>,
}

#[async_trait]
impl SequenceSource for FakeUniprot {
    async fn sequence(&self, accession: &str) -> Result<String> {
        self.sequences
            .get(accession)
            .cloned()
            .ok_or_else(|| PipelineError::Service(format!("no sequence for {}", accession)))
    }
}

#[derive(Default)]
pub struct FakeBlacklist {
    pub entries: Mutex<HashSet<String>>,
}

#[async_trait]
impl Blacklist for FakeBlacklist {
    async fn is_blacklisted(&self, pdbid: &str) -> Result<bool> {
        Ok(self.entries.lock().unwrap().contains(&pdbid.to_lowercase()))
    }

    async fn add(&self, pdbid: &str) -> Result<()> {
        self.entries.lock().unwrap().insert(pdbid.to_lowercase());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePdb {
    pub entries: HashMap<String, String>,
}

#[async_trait]
impl StructureSource for FakePdb {
    async fn pdb_contents(&self, pdbid: &str) -> Result<String> {
        self.entries
            .get(&pdbid.to_lowercase())
            .cloned()
            .ok_or_else(|| PipelineError::Service(format!("no pdb entry {}", pdbid)))
    }
}

// ============================================================================
// Template context / engine
// ============================================================================

/// Fake chain description: id, sequence, and a base coordinate. Residue Cα
/// positions are spread 3.8 Å apart along x from the base, so chains whose
/// bases are close interact and distant ones do not.
#[derive(Clone)]
pub struct FakeChainSpec {
    pub id: String,
    pub sequence: String,
    pub base: [f64; 3],
}

pub fn chain(id: &str, sequence: &str, base: [f64; 3]) -> FakeChainSpec {
    FakeChainSpec {
        id: id.to_string(),
        sequence: sequence.to_string(),
        base,
    }
}

pub struct FakeContext {
    pub pdbid: String,
    pub chains: Vec<FakeChainSpec>,
    pub runs: Arc<AtomicUsize>,
}

impl FakeContext {
    fn chain(&self, chain_id: &str) -> Result<&FakeChainSpec> {
        self.chains
            .iter()
            .find(|c| c.id == chain_id)
            .ok_or_else(|| PipelineError::Value(format!("no chain {}", chain_id)))
    }

    fn chain_residues(&self, spec: &FakeChainSpec) -> Vec<TemplateResidue> {
        spec.sequence
            .chars()
            .enumerate()
            .map(|(i, letter)| TemplateResidue {
                number: (i + 1).to_string(),
                amino_acid: AminoAcid::from_one_letter_code(letter),
                ca: Some([spec.base[0] + 3.8 * i as f64, spec.base[1], spec.base[2]]),
            })
            .collect()
    }
}

#[async_trait]
impl TemplateContext for FakeContext {
    fn pdbid(&self) -> &str {
        &self.pdbid
    }

    fn chain_ids(&self) -> Vec<String> {
        self.chains.iter().map(|c| c.id.clone()).collect()
    }

    fn sequence(&self, chain_id: &str) -> Result<String> {
        Ok(self.chain(chain_id)?.sequence.clone())
    }

    fn secondary_structure(&self, chain_id: &str) -> Result<String> {
        Ok("C".repeat(self.chain(chain_id)?.sequence.len()))
    }

    fn residues(&self, chain_id: &str) -> Result<Vec<TemplateResidue>> {
        let spec = self.chain(chain_id)?.clone();
        Ok(self.chain_residues(&spec))
    }

    fn delete_chain(&mut self, chain_id: &str) -> Result<()> {
        let before = self.chains.len();
        self.chains.retain(|c| c.id != chain_id);
        if self.chains.len() == before {
            return Err(PipelineError::Value(format!("no chain {}", chain_id)));
        }
        Ok(())
    }

    fn interacting_chains(&self, chain_id: &str) -> Result<Vec<String>> {
        let residues = self.residues(chain_id)?;
        let mut interacting = Vec::new();
        for other in &self.chains {
            if other.id == chain_id {
                continue;
            }
            let other_residues = self.chain_residues(other);
            let close = residues
                .iter()
                .any(|r| self.residue_interacts(r, &other_residues));
            if close {
                interacting.push(other.id.clone());
            }
        }
        Ok(interacting)
    }

    fn residue_interacts(&self, residue: &TemplateResidue, others: &[TemplateResidue]) -> bool {
        let Some(ca) = residue.ca else {
            return false;
        };
        others.iter().filter_map(|r| r.ca).any(|other| {
            let dx = ca[0] - other[0];
            let dy = ca[1] - other[1];
            let dz = ca[2] - other[2];
            dx * dx + dy * dy + dz * dz < 36.0
        })
    }

    async fn run_modeling(&mut self, work_dir: &Path, _alignment_path: &Path) -> Result<PathBuf> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let chains: Vec<(String, String)> = self
            .chains
            .iter()
            .map(|c| (c.id.clone(), c.sequence.clone()))
            .collect();
        let refs: Vec<(&str, &str)> = chains
            .iter()
            .map(|(id, sequence)| (id.as_str(), sequence.as_str()))
            .collect();
        let model_path = work_dir.join("target.pdb");
        std::fs::write(&model_path, synthetic_pdb(&refs))?;
        Ok(model_path)
    }
}

#[derive(Default)]
pub struct FakeEngine {
    pub chains_by_pdbid: HashMap<String, Vec<FakeChainSpec>>,
    pub template_errors: HashSet<String>,
    pub runs: Arc<AtomicUsize>,
}

impl FakeEngine {
    pub fn with_template(mut self, pdbid: &str, chains: Vec<FakeChainSpec>) -> Self {
        self.chains_by_pdbid.insert(pdbid.to_lowercase(), chains);
        self
    }

    pub fn with_template_error(mut self, pdbid: &str) -> Self {
        self.template_errors.insert(pdbid.to_lowercase());
        self
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelingEngine for FakeEngine {
    async fn load_template(&self, pdbid: &str) -> Result<Box<dyn TemplateContext>> {
        let pdbid = pdbid.to_lowercase();
        if self.template_errors.contains(&pdbid) {
            return Err(PipelineError::Template(format!(
                "oligomerisation of {} reduced the number of chains",
                pdbid
            )));
        }
        let chains = self.chains_by_pdbid.get(&pdbid).ok_or_else(|| {
            PipelineError::Template(format!("no protein chains in {}", pdbid))
        })?;
        Ok(Box::new(FakeContext {
            pdbid,
            chains: chains.clone(),
            runs: self.runs.clone(),
        }))
    }
}

// ============================================================================
// Synthetic structure files
// ============================================================================

/// A minimal legacy PDB text with SEQRES and Cα ATOM records per chain.
pub fn synthetic_pdb(chains: &[(&str, &str)]) -> String {
    let mut lines = Vec::new();

    for (chain_id, sequence) in chains {
        for (serial, block) in sequence.as_bytes().chunks(13).enumerate() {
            let codes: Vec<String> = block
                .iter()
                .map(|b| AminoAcid::from_one_letter_code(*b as char).code.to_string())
                .collect();
            lines.push(format!(
                "SEQRES {:>3} {} {:>4}  {}",
                serial + 1,
                chain_id,
                sequence.len(),
                codes.join(" ")
            ));
        }
    }

    let mut serial = 0;
    for (chain_index, (chain_id, sequence)) in chains.iter().enumerate() {
        for (i, letter) in sequence.chars().enumerate() {
            serial += 1;
            let code = AminoAcid::from_one_letter_code(letter).code;
            lines.push(format!(
                "ATOM  {:>5}  CA  {:<3} {}{:>4}    {:>8.3}{:>8.3}{:>8.3}  1.00  0.00           C",
                serial,
                code,
                chain_id,
                i + 1,
                3.8 * i as f64,
                10.0 * chain_index as f64,
                0.0
            ));
        }
    }
    lines.push("END".to_string());
    let mut text = lines.join("\n");
    text.push('\n');
    text
}
