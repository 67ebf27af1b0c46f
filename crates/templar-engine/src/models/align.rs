//! Alignment model
//!
//! Gapped alignment rows with `-` (or `.`) for gaps. Identity, coverage and
//! aligned-residue counts quantify over the positions where both rows carry
//! a letter. Two concrete row shapes exist: `BlastAlignment` (query vs
//! subject, as produced by blastp) and `TargetTemplateAlignment` (target vs
//! template, as produced by the pairwise aligners); `DomainAlignment` tags
//! the latter with the target range it covers and its template.

use crate::error::{PipelineError, Result};
use crate::models::range::SequenceRange;
use crate::models::template::TemplateID;
use regex::Regex;
use std::sync::OnceLock;
use templar_common::sequence::is_amino_acid_char;

// ============================================================================
// Row-pair algebra
// ============================================================================

/// Number of positions where both rows carry a letter.
pub fn count_aligned_residues(row1: &str, row2: &str) -> usize {
    row1.chars()
        .zip(row2.chars())
        .filter(|(a, b)| is_amino_acid_char(*a) && is_amino_acid_char(*b))
        .count()
}

/// Percentage of aligned positions where both rows carry the same letter.
pub fn percentage_identity(row1: &str, row2: &str) -> f64 {
    let mut nalign = 0usize;
    let mut nid = 0usize;
    for (a, b) in row1.chars().zip(row2.chars()) {
        if is_amino_acid_char(a) && is_amino_acid_char(b) {
            nalign += 1;
            if a == b {
                nid += 1;
            }
        }
    }
    if nalign > 0 {
        (100.0 * nid as f64) / nalign as f64
    } else {
        0.0
    }
}

/// Percentage of `row`'s letters that align to a letter on `against`.
pub fn percentage_coverage(row: &str, against: &str) -> f64 {
    let mut nalign = 0usize;
    let mut nrow = 0usize;
    for (a, b) in row.chars().zip(against.chars()) {
        if is_amino_acid_char(a) {
            nrow += 1;
            if is_amino_acid_char(b) {
                nalign += 1;
            }
        }
    }
    if nrow > 0 {
        (100.0 * nalign as f64) / nrow as f64
    } else {
        0.0
    }
}

/// Row with the gaps stripped.
pub fn ungapped(row: &str) -> String {
    row.chars().filter(|c| is_amino_acid_char(*c)).collect()
}

// ============================================================================
// Generic labelled alignment
// ============================================================================

/// A multi-row alignment with labelled rows in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment {
    rows: Vec<(String, String)>,
}

impl Alignment {
    pub fn from_records(rows: Vec<(String, String)>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[(String, String)] {
        &self.rows
    }

    pub fn labels(&self) -> Vec<&str> {
        self.rows.iter().map(|(l, _)| l.as_str()).collect()
    }

    pub fn get(&self, label: &str) -> Result<&str> {
        self.rows
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, row)| row.as_str())
            .ok_or_else(|| PipelineError::Value(format!("no alignment row labelled {}", label)))
    }

    pub fn percentage_identity(&self, label1: &str, label2: &str) -> Result<f64> {
        Ok(percentage_identity(self.get(label1)?, self.get(label2)?))
    }

    pub fn count_aligned_residues(&self, label1: &str, label2: &str) -> Result<usize> {
        Ok(count_aligned_residues(self.get(label1)?, self.get(label2)?))
    }
}

// ============================================================================
// Blast alignments (query vs subject)
// ============================================================================

fn pdb_hit_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9][0-9a-zA-Z]{3}_[0-9a-zA-Z]{1,2}").unwrap())
}

/// One blast HSP. Start and end positions are inclusive and 1-based.
///
/// Hit id grammar: `<pdb4>_<chain>`, `pdb|<pdb4>|<chain>` or
/// `<db>|<accession>|<species_tag>`.
#[derive(Debug, Clone)]
pub struct BlastAlignment {
    pub hit_id: String,
    pub databank: String,
    pub full_query_sequence: String,
    pub query_start: usize,
    pub query_end: usize,
    pub subject_start: usize,
    pub subject_end: usize,
    pub query_alignment: String,
    pub subject_alignment: String,
}

impl BlastAlignment {
    /// The range of the full query sequence this hit spans.
    pub fn query_range(&self) -> Result<SequenceRange> {
        SequenceRange::new(
            self.query_start - 1,
            self.query_end,
            self.full_query_sequence.clone(),
        )
    }

    /// The databank-type part of the hit id (`pdb` for direct pdb ids).
    pub fn hit_kind(&self) -> Result<&str> {
        if pdb_hit_id_pattern().is_match(&self.hit_id) {
            Ok("pdb")
        } else if self.hit_id.contains('|') {
            Ok(self.hit_id.split('|').next().unwrap_or_default())
        } else {
            Err(PipelineError::Value(format!(
                "cannot parse hit id {}",
                self.hit_id
            )))
        }
    }

    pub fn hit_accession_code(&self) -> Result<&str> {
        if pdb_hit_id_pattern().is_match(&self.hit_id) {
            self.hit_id.split('_').next().ok_or_else(|| {
                PipelineError::Value(format!("cannot parse hit id {}", self.hit_id))
            })
        } else if self.hit_id.contains('|') {
            self.hit_id.split('|').nth(1).ok_or_else(|| {
                PipelineError::Value(format!("cannot parse hit id {}", self.hit_id))
            })
        } else {
            Err(PipelineError::Value(format!(
                "cannot parse hit id {}",
                self.hit_id
            )))
        }
    }

    pub fn hit_chain_id(&self) -> Result<String> {
        let chain = if pdb_hit_id_pattern().is_match(&self.hit_id) {
            self.hit_id.split('_').nth(1).unwrap_or_default()
        } else if self.hit_id.contains('|') {
            let parts: Vec<&str> = self.hit_id.split('|').collect();
            if parts[0] != "pdb" && parts[0] != "pdbfinder" {
                return Err(PipelineError::Value(format!(
                    "not a pdb hit id: {}",
                    self.hit_id
                )));
            }
            parts.get(2).copied().unwrap_or_default()
        } else {
            return Err(PipelineError::Value(format!(
                "cannot parse hit id {}",
                self.hit_id
            )));
        };

        // pdbfinder writes duplicated chains as e.g. "Aa"; collapse the
        // lowercase second letter.
        let mut chain = chain.to_string();
        if chain.len() == 2 && chain.chars().nth(1).is_some_and(|c| c.is_lowercase()) {
            chain.truncate(1);
        }
        if chain.is_empty() {
            return Err(PipelineError::Value(format!(
                "no chain in hit id {}",
                self.hit_id
            )));
        }
        Ok(chain)
    }

    pub fn template_id(&self) -> Result<TemplateID> {
        Ok(TemplateID::new(
            self.hit_accession_code()?,
            self.hit_chain_id()?,
        ))
    }

    pub fn percentage_identity(&self) -> f64 {
        percentage_identity(&self.query_alignment, &self.subject_alignment)
    }

    pub fn count_aligned_residues(&self) -> usize {
        count_aligned_residues(&self.query_alignment, &self.subject_alignment)
    }

    /// Coverage of the query row by the subject row.
    pub fn percentage_coverage(&self) -> f64 {
        percentage_coverage(&self.query_alignment, &self.subject_alignment)
    }

    /// Letter-by-letter walk: is the (1-based, full-sequence) query residue
    /// aligned to a subject letter?
    pub fn is_query_residue_covered(&self, residue_number: usize) -> bool {
        let mut n = self.query_start;
        for (q, s) in self
            .query_alignment
            .chars()
            .zip(self.subject_alignment.chars())
        {
            if is_amino_acid_char(q) {
                if n == residue_number {
                    return is_amino_acid_char(s);
                }
                n += 1;
            }
        }
        false
    }
}

// ============================================================================
// Target vs template alignments
// ============================================================================

/// A pairwise alignment of a (partial) target sequence against a template
/// chain. `target_id` and `template_id` may be unset on intermediates.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetTemplateAlignment {
    pub target_alignment: String,
    pub template_alignment: String,
    pub target_id: Option<String>,
    pub template_id: Option<TemplateID>,
}

impl TargetTemplateAlignment {
    pub fn new(target_alignment: impl Into<String>, template_alignment: impl Into<String>) -> Self {
        Self {
            target_alignment: target_alignment.into(),
            template_alignment: template_alignment.into(),
            target_id: None,
            template_id: None,
        }
    }

    pub fn target_sequence(&self) -> String {
        ungapped(&self.target_alignment)
    }

    pub fn template_sequence(&self) -> String {
        ungapped(&self.template_alignment)
    }

    pub fn percentage_identity(&self) -> f64 {
        percentage_identity(&self.target_alignment, &self.template_alignment)
    }

    pub fn count_aligned_residues(&self) -> usize {
        count_aligned_residues(&self.target_alignment, &self.template_alignment)
    }

    /// Coverage of the target row by the template row.
    pub fn percentage_coverage(&self) -> f64 {
        percentage_coverage(&self.target_alignment, &self.template_alignment)
    }

    /// Indices into the ungapped template sequence that align to a target
    /// letter.
    pub fn covered_template_residue_indices(&self) -> Vec<usize> {
        let mut covered = Vec::new();
        let mut n = 0usize;
        for (t, m) in self
            .target_alignment
            .chars()
            .zip(self.template_alignment.chars())
        {
            if is_amino_acid_char(m) {
                if is_amino_acid_char(t) {
                    covered.push(n);
                }
                n += 1;
            }
        }
        covered
    }

    /// Letter-by-letter walk: is the (1-based, row-relative) target residue
    /// aligned to a template letter?
    pub fn is_target_residue_covered(&self, residue_number: usize) -> bool {
        let mut n = 1usize;
        for (t, m) in self
            .target_alignment
            .chars()
            .zip(self.template_alignment.chars())
        {
            if is_amino_acid_char(t) {
                if n == residue_number {
                    return is_amino_acid_char(m);
                }
                n += 1;
            }
        }
        false
    }

    /// The range on the ungapped template sequence that the target's first
    /// to last letter positions map to.
    pub fn relative_span(&self) -> Result<SequenceRange> {
        let target: Vec<char> = self.target_alignment.chars().collect();
        let template: Vec<char> = self.template_alignment.chars().collect();

        let first = target
            .iter()
            .position(|c| is_amino_acid_char(*c))
            .ok_or_else(|| PipelineError::Value("target row holds no residues".to_string()))?;
        let last = target
            .iter()
            .rposition(|c| is_amino_acid_char(*c))
            .unwrap_or(first);

        let start = template[..first]
            .iter()
            .filter(|c| is_amino_acid_char(**c))
            .count();
        let end = template[..=last]
            .iter()
            .filter(|c| is_amino_acid_char(**c))
            .count();

        SequenceRange::new(start, end, self.template_sequence())
    }
}

// ============================================================================
// Domain alignments
// ============================================================================

/// A target/template alignment covering one domain-sized range of the
/// target, tagged with the template it was made against.
#[derive(Debug, Clone)]
pub struct DomainAlignment {
    pub alignment: TargetTemplateAlignment,
    pub range: SequenceRange,
    pub template_id: TemplateID,
}

impl DomainAlignment {
    pub fn new(
        target_alignment: impl Into<String>,
        template_alignment: impl Into<String>,
        range: SequenceRange,
        template_id: TemplateID,
    ) -> Self {
        let mut alignment = TargetTemplateAlignment::new(target_alignment, template_alignment);
        alignment.template_id = Some(template_id.clone());
        Self {
            alignment,
            range,
            template_id,
        }
    }

    pub fn target_sequence(&self) -> String {
        self.alignment.target_sequence()
    }

    pub fn template_sequence(&self) -> String {
        self.alignment.template_sequence()
    }

    pub fn percentage_identity(&self) -> f64 {
        self.alignment.percentage_identity()
    }

    pub fn percentage_coverage(&self) -> f64 {
        self.alignment.percentage_coverage()
    }
}

impl std::fmt::Display for DomainAlignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.template_id, self.range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_and_aligned_count() {
        // aligned positions: A/A, C/C, D/D
        let id = percentage_identity("AC-DE", "ACQD-");
        assert_eq!(count_aligned_residues("AC-DE", "ACQD-"), 3);
        assert!((id - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_identity_counts_mismatches() {
        let id = percentage_identity("AAAA", "AAAT");
        assert!((id - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_identity_empty_overlap() {
        assert_eq!(percentage_identity("AA--", "--TT"), 0.0);
    }

    #[test]
    fn test_coverage_is_asymmetric() {
        // query has 4 letters, 2 aligned; subject has 2 letters, 2 aligned
        let q = "AAAA";
        let s = "AA--";
        assert!((percentage_coverage(q, s) - 50.0).abs() < 1e-9);
        assert!((percentage_coverage(s, q) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_ungapped() {
        assert_eq!(ungapped("A-C.D"), "ACD");
    }

    fn blast_alignment(hit_id: &str) -> BlastAlignment {
        BlastAlignment {
            hit_id: hit_id.to_string(),
            databank: "templates".to_string(),
            full_query_sequence: "ACDEFGHIKL".to_string(),
            query_start: 3,
            query_end: 6,
            subject_start: 1,
            subject_end: 4,
            query_alignment: "DEFG".to_string(),
            subject_alignment: "DEFG".to_string(),
        }
    }

    #[test]
    fn test_hit_id_pdb_grammar() {
        let ali = blast_alignment("1crn_A");
        assert_eq!(ali.hit_kind().unwrap(), "pdb");
        assert_eq!(ali.hit_accession_code().unwrap(), "1crn");
        assert_eq!(ali.hit_chain_id().unwrap(), "A");
        assert_eq!(ali.template_id().unwrap(), TemplateID::new("1crn", "A"));
    }

    #[test]
    fn test_hit_id_pipe_grammar() {
        let ali = blast_alignment("pdb|1XYZ|B");
        assert_eq!(ali.hit_kind().unwrap(), "pdb");
        assert_eq!(ali.hit_accession_code().unwrap(), "1XYZ");
        assert_eq!(ali.hit_chain_id().unwrap(), "B");
    }

    #[test]
    fn test_hit_id_uniprot_grammar() {
        let ali = blast_alignment("sp|P01308|INS_HUMAN");
        assert_eq!(ali.hit_kind().unwrap(), "sp");
        assert_eq!(ali.hit_accession_code().unwrap(), "P01308");
        assert!(ali.hit_chain_id().is_err());
    }

    #[test]
    fn test_hit_id_two_letter_chain_collapses() {
        let ali = blast_alignment("1xyz_Aa");
        assert_eq!(ali.hit_chain_id().unwrap(), "A");
        let ali = blast_alignment("1xyz_AB");
        assert_eq!(ali.hit_chain_id().unwrap(), "AB");
    }

    #[test]
    fn test_hit_id_garbage_rejected() {
        assert!(blast_alignment("garbage").hit_kind().is_err());
    }

    #[test]
    fn test_query_range() {
        let r = blast_alignment("1crn_A").query_range().unwrap();
        assert_eq!((r.start, r.end), (2, 6));
        assert_eq!(r.sub_sequence(), "DEFG");
    }

    #[test]
    fn test_query_residue_covered() {
        let mut ali = blast_alignment("1crn_A");
        ali.query_alignment = "DE-FG".to_string();
        ali.subject_alignment = "DEQ-G".to_string();
        // query residues 3,4,5,6 -> D,E,F,G; F aligns to a gap
        assert!(ali.is_query_residue_covered(3));
        assert!(ali.is_query_residue_covered(4));
        assert!(!ali.is_query_residue_covered(5));
        assert!(ali.is_query_residue_covered(6));
        assert!(!ali.is_query_residue_covered(7));
    }

    #[test]
    fn test_covered_template_residue_indices() {
        let ali = TargetTemplateAlignment::new("AC--EF", "ACQD-F");
        // template residues: A(0) C(1) Q(2) D(3) F(4); covered: 0, 1, 4
        assert_eq!(ali.covered_template_residue_indices(), vec![0, 1, 4]);
    }

    #[test]
    fn test_target_residue_covered() {
        let ali = TargetTemplateAlignment::new("ACDE", "AC-E");
        assert!(ali.is_target_residue_covered(1));
        assert!(!ali.is_target_residue_covered(3));
        assert!(ali.is_target_residue_covered(4));
    }

    #[test]
    fn test_relative_span() {
        // template: ABCDEFG, target covers C..E
        let ali = TargetTemplateAlignment::new("--CDE--", "ABCDEFG");
        let span = ali.relative_span().unwrap();
        assert_eq!((span.start, span.end), (2, 5));
        assert_eq!(span.sequence, "ABCDEFG");
    }

    #[test]
    fn test_relative_span_with_template_gaps() {
        let ali = TargetTemplateAlignment::new("-QCDE", "A-CDE");
        let span = ali.relative_span().unwrap();
        // target starts at row position 1, template consumed 1 residue before it
        assert_eq!((span.start, span.end), (1, 4));
    }

    #[test]
    fn test_domain_alignment_target_matches_range() {
        let range = SequenceRange::new(2, 6, "ACDEFGHIKL").unwrap();
        let d = DomainAlignment::new("DEFG", "DEFG", range.clone(), TemplateID::new("1crn", "A"));
        assert_eq!(d.target_sequence(), range.sub_sequence());
    }
}
