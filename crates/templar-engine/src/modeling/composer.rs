//! Multi-chain alignment composition
//!
//! Turns one chosen main domain alignment into an alignment set covering
//! every protein chain of the oligomerized template. The main target goes
//! onto every chain of the main chain's identity class; the remaining
//! chains are covered by iterating over chains that interact with what is
//! already aligned, searching the species' proteome for a suitable target
//! per chain, and falling back to poly-alanine when nothing fits.

use crate::caps::{MultiAlign, ProfileAlign, SequenceSearch, SequenceSource};
use crate::domain::aligner::DomainAligner;
use crate::error::{PipelineError, Result};
use crate::joblog::JobLog;
use crate::models::align::{DomainAlignment, TargetTemplateAlignment};
use crate::models::template::TemplateID;
use crate::modeling::context::TemplateContext;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use templar_common::fingerprint::sequence_id;
use templar_common::sequence::is_amino_acid_char;
use tracing::{debug, warn};

/// Identity above which two template chains count as copies of each other.
const IDENTICAL_CHAIN_PERCENTAGE_IDENTITY: f64 = 99.0;

/// Aligned residues below which a pairwise chain alignment is noise.
const IDENTICAL_CHAIN_MIN_ALIGNED: usize = 20;

/// Identity a proteome hit must exceed to be a potential target.
const TARGET_MIN_PERCENTAGE_IDENTITY: f64 = 70.0;

/// Coverage a proteome hit must exceed to be a potential target.
const TARGET_MIN_PERCENTAGE_COVERAGE: f64 = 90.0;

/// Chain coverage below which the domain engine is consulted.
const DIRECT_ALIGNMENT_MIN_COVERAGE: f64 = 90.0;

/// Target id recorded for the poly-alanine fallback.
pub const POLY_A_TARGET_ID: &str = "poly-A";

pub struct AlignmentComposer {
    blast: Arc<dyn SequenceSearch>,
    kmad: Arc<dyn ProfileAlign>,
    clustal: Arc<dyn MultiAlign>,
    uniprot: Arc<dyn SequenceSource>,
    domain_aligner: Arc<DomainAligner>,
    uniprot_blast_databank: PathBuf,
}

impl AlignmentComposer {
    pub fn new(
        blast: Arc<dyn SequenceSearch>,
        kmad: Arc<dyn ProfileAlign>,
        clustal: Arc<dyn MultiAlign>,
        uniprot: Arc<dyn SequenceSource>,
        domain_aligner: Arc<DomainAligner>,
        uniprot_blast_databank: impl Into<PathBuf>,
    ) -> Self {
        Self {
            blast,
            kmad,
            clustal,
            uniprot,
            domain_aligner,
            uniprot_blast_databank: uniprot_blast_databank.into(),
        }
    }

    /// Build the per-chain alignment set for the template in `context`.
    pub async fn compose(
        &self,
        context: &dyn TemplateContext,
        main_target_sequence: &str,
        species_id: &str,
        main_alignment: &DomainAlignment,
        require_resnum: Option<usize>,
        log: &JobLog,
    ) -> Result<BTreeMap<String, TargetTemplateAlignment>> {
        let mut alignments: BTreeMap<String, TargetTemplateAlignment> = BTreeMap::new();

        // Seed: the main target goes onto every chain of the main chain's
        // identity class.
        let main_chain_ids = self
            .pick_template_chains(context, main_alignment.template_id.chain_id())
            .await?;

        for chain_id in &main_chain_ids {
            let template_sequence = context.sequence(chain_id)?;
            let template_secstr = context.secondary_structure(chain_id)?;
            let mut alignment = self
                .kmad
                .align(
                    &template_sequence,
                    &template_secstr,
                    &main_alignment.target_sequence(),
                )
                .await?;
            alignment.target_id = Some(sequence_id(main_target_sequence));
            alignments.insert(chain_id.clone(), alignment);
        }

        if let Some(resnum) = require_resnum {
            let main_chain = main_alignment.template_id.chain_id();
            let seeded = alignments.get(main_chain).ok_or_else(|| {
                PipelineError::ModelRun(format!("no alignment seeded on chain {}", main_chain))
            })?;
            // The seeded alignment covers the domain range only; translate
            // the absolute residue number before the walk.
            let covered = resnum > main_alignment.range.start
                && seeded.is_target_residue_covered(resnum - main_alignment.range.start);
            if !covered {
                return Err(PipelineError::ModelRun(format!(
                    "residue {} is not covered by the alignment on chain {}",
                    resnum, main_chain
                )));
            }
        }

        // Expansion: fill in chains that interact with what is already
        // aligned, until no chain without an alignment remains reachable.
        while alignments.len() < context.chain_ids().len() {
            let mut candidates: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for aligned_chain_id in alignments.keys() {
                for interacting_chain_id in context.interacting_chains(aligned_chain_id)? {
                    if alignments.contains_key(&interacting_chain_id) {
                        continue;
                    }
                    candidates
                        .entry(interacting_chain_id)
                        .or_default()
                        .push(aligned_chain_id.clone());
                }
            }

            if candidates.is_empty() {
                break; // nothing more to add
            }

            for (candidate_chain_id, interacts_with) in candidates {
                let interacting_chain_alignments: BTreeMap<String, TargetTemplateAlignment> =
                    interacts_with
                        .iter()
                        .filter_map(|id| alignments.get(id).map(|a| (id.clone(), a.clone())))
                        .collect();

                let template_chain_sequence = context.sequence(&candidate_chain_id)?;
                let potential_targets = self
                    .find_target_sequences(&template_chain_sequence, species_id)
                    .await?;

                debug!(
                    chain = %candidate_chain_id,
                    candidates = potential_targets.len(),
                    "choosing a target for an interacting chain"
                );

                let chosen = self
                    .choose_best_target_alignment(
                        context,
                        &interacting_chain_alignments,
                        &potential_targets,
                        &candidate_chain_id,
                        log,
                    )
                    .await?;

                let alignment = match chosen {
                    Some(alignment) => alignment,
                    None => {
                        log.add(format!(
                            "no suitable target for chain {}, falling back to poly-A",
                            candidate_chain_id
                        ));
                        let mut alignment = self.make_poly_a(context, &candidate_chain_id)?;
                        alignment.target_id = Some(POLY_A_TARGET_ID.to_string());
                        alignment
                    },
                };
                alignments.insert(candidate_chain_id, alignment);
            }
        }

        Ok(alignments)
    }

    /// Group the template chains into identity classes and return the class
    /// containing the main chain.
    async fn pick_template_chains(
        &self,
        context: &dyn TemplateContext,
        main_chain_id: &str,
    ) -> Result<Vec<String>> {
        let groups = self.group_identical_chains(context).await?;
        groups
            .into_iter()
            .find(|group| group.iter().any(|id| id == main_chain_id))
            .ok_or_else(|| {
                PipelineError::ModelRun(format!(
                    "chain not found in identical groups: {}",
                    main_chain_id
                ))
            })
    }

    /// Partition chains into classes of >= 99 % pairwise identity. Pairs are
    /// aligned two at a time; one big run over all chains is much slower.
    async fn group_identical_chains(
        &self,
        context: &dyn TemplateContext,
    ) -> Result<Vec<Vec<String>>> {
        let mut ids = context.chain_ids();
        if ids.len() <= 1 {
            return Ok(vec![ids]);
        }

        let mut sequences: BTreeMap<String, String> = BTreeMap::new();
        for id in &ids {
            sequences.insert(id.clone(), context.sequence(id)?);
        }

        let mut grouped: Vec<Vec<String>> = Vec::new();
        while !ids.is_empty() {
            let id = ids.remove(0);
            let mut group = vec![id.clone()];
            let mut remaining = Vec::new();

            for other_id in ids {
                let alignment = self
                    .clustal
                    .align(&[
                        (id.clone(), sequences[&id].clone()),
                        (other_id.clone(), sequences[&other_id].clone()),
                    ])
                    .await?;

                if alignment.percentage_identity(&id, &other_id)?
                    >= IDENTICAL_CHAIN_PERCENTAGE_IDENTITY
                    && alignment.count_aligned_residues(&id, &other_id)?
                        >= IDENTICAL_CHAIN_MIN_ALIGNED
                {
                    group.push(other_id);
                } else {
                    remaining.push(other_id);
                }
            }

            ids = remaining;
            grouped.push(group);
        }

        Ok(grouped)
    }

    /// Blast the template chain against the species' proteome and resolve
    /// the plausible hits to sequences.
    async fn find_target_sequences(
        &self,
        template_chain_sequence: &str,
        species_id: &str,
    ) -> Result<BTreeMap<String, String>> {
        let species_suffix = format!("_{}", species_id.to_uppercase());
        let mut target_sequences: BTreeMap<String, String> = BTreeMap::new();

        let hits = self
            .blast
            .blastp(template_chain_sequence, &self.uniprot_blast_databank)
            .await?;

        for (hit_id, hit_alignments) in hits {
            if !hit_id.ends_with(&species_suffix) {
                continue;
            }
            for alignment in hit_alignments {
                let accession = match alignment.hit_accession_code() {
                    Ok(accession) => accession.to_string(),
                    Err(_) => continue,
                };
                if alignment.percentage_identity() > TARGET_MIN_PERCENTAGE_IDENTITY
                    && alignment.percentage_coverage() > TARGET_MIN_PERCENTAGE_COVERAGE
                {
                    match self.uniprot.sequence(&accession).await {
                        Ok(sequence) => {
                            target_sequences.insert(accession, sequence);
                        },
                        Err(e) => {
                            warn!(accession = %accession, error = %e, "cannot resolve hit to a sequence");
                        },
                    }
                }
            }
        }

        Ok(target_sequences)
    }

    /// Try every potential target on the chain and keep the alignment with
    /// the highest identity; earlier candidates win ties. A failure for one
    /// target only skips that target.
    async fn choose_best_target_alignment(
        &self,
        context: &dyn TemplateContext,
        interacting_chain_alignments: &BTreeMap<String, TargetTemplateAlignment>,
        potential_target_sequences: &BTreeMap<String, String>,
        chain_id: &str,
        log: &JobLog,
    ) -> Result<Option<TargetTemplateAlignment>> {
        let mut best: Option<TargetTemplateAlignment> = None;

        for (target_id, target_sequence) in potential_target_sequences {
            let result = self
                .target_alignment_for_chain(
                    context,
                    interacting_chain_alignments,
                    chain_id,
                    target_sequence,
                    log,
                )
                .await;

            let alignment = match result {
                Ok(Some(mut alignment)) => {
                    alignment.target_id = Some(target_id.clone());
                    alignment
                },
                Ok(None) => continue,
                Err(e) => {
                    warn!(target = %target_id, chain = %chain_id, error = %e,
                          "skipping target after alignment failure");
                    continue;
                },
            };

            let is_better = match &best {
                Some(current) => current.percentage_identity() < alignment.percentage_identity(),
                None => true,
            };
            if is_better {
                best = Some(alignment);
            }
        }

        Ok(best)
    }

    async fn target_alignment_for_chain(
        &self,
        context: &dyn TemplateContext,
        interacting_chain_alignments: &BTreeMap<String, TargetTemplateAlignment>,
        chain_id: &str,
        target_sequence: &str,
        log: &JobLog,
    ) -> Result<Option<TargetTemplateAlignment>> {
        let template_chain_sequence = context.sequence(chain_id)?;
        let template_chain_secstr = context.secondary_structure(chain_id)?;

        let alignment = self
            .kmad
            .align(&template_chain_sequence, &template_chain_secstr, target_sequence)
            .await?;

        debug!(
            chain = %chain_id,
            coverage = alignment.percentage_coverage(),
            "direct chain alignment"
        );

        if alignment.percentage_coverage() >= DIRECT_ALIGNMENT_MIN_COVERAGE {
            return Ok(Some(alignment));
        }

        // Low coverage: ask the domain engine which parts of this target
        // belong on this chain, keeping the chain's interactions intact.
        let pinned = TemplateID::new(context.pdbid(), chain_id);
        let overlapping_domain_alignments = self
            .domain_aligner
            .domain_alignments(target_sequence, None, Some(&pinned), log)
            .await?;

        let mut interacting: Vec<DomainAlignment> = Vec::new();
        for domain_alignment in &overlapping_domain_alignments {
            if self.preserves_interactions(
                context,
                domain_alignment,
                chain_id,
                interacting_chain_alignments,
            )? {
                interacting.push(domain_alignment.clone());
            }
        }

        debug!(
            chain = %chain_id,
            kept = interacting.len(),
            total = overlapping_domain_alignments.len(),
            "interaction-preserving domain alignments"
        );

        let joined = if !interacting.is_empty() {
            join_alignments_to_best_template_coverage(&interacting)?
        } else if !overlapping_domain_alignments.is_empty() {
            join_alignments_to_best_template_coverage(&overlapping_domain_alignments)?
        } else {
            return Ok(None);
        };

        let alignment = self
            .kmad
            .align(
                &template_chain_sequence,
                &template_chain_secstr,
                &joined.target_sequence(),
            )
            .await?;
        Ok(Some(alignment))
    }

    /// A candidate alignment preserves the chain's interactions when at
    /// least one of its covered residues has a covered partner residue
    /// within interaction distance.
    fn preserves_interactions(
        &self,
        context: &dyn TemplateContext,
        candidate_alignment: &DomainAlignment,
        candidate_chain_id: &str,
        interacting_chain_alignments: &BTreeMap<String, TargetTemplateAlignment>,
    ) -> Result<bool> {
        let candidate_residues = context.residues(candidate_chain_id)?;
        let covered_candidate_residues: Vec<_> = candidate_alignment
            .alignment
            .covered_template_residue_indices()
            .into_iter()
            .filter_map(|i| candidate_residues.get(i).cloned())
            .collect();

        for (chain_id, alignment) in interacting_chain_alignments {
            let chain_residues = context.residues(chain_id)?;
            let covered_residues: Vec<_> = alignment
                .covered_template_residue_indices()
                .into_iter()
                .filter_map(|i| chain_residues.get(i).cloned())
                .collect();

            if covered_residues.is_empty() {
                continue;
            }

            for candidate_residue in &covered_candidate_residues {
                if context.residue_interacts(candidate_residue, &covered_residues) {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    fn make_poly_a(
        &self,
        context: &dyn TemplateContext,
        chain_id: &str,
    ) -> Result<TargetTemplateAlignment> {
        let template_sequence = context.sequence(chain_id)?;
        Ok(TargetTemplateAlignment::new(
            "A".repeat(template_sequence.len()),
            template_sequence,
        ))
    }
}

// ============================================================================
// Fragment joining
// ============================================================================

/// Seed with the largest-coverage alignment and greedily absorb every
/// compatible (template-disjoint) fragment. All fragments must target the
/// same template chain.
pub fn join_alignments_to_best_template_coverage(
    domain_alignments: &[DomainAlignment],
) -> Result<TargetTemplateAlignment> {
    let first = domain_alignments
        .first()
        .ok_or_else(|| PipelineError::Value("no alignments to join".to_string()))?;

    let mut best: Option<&DomainAlignment> = None;
    for domain_alignment in domain_alignments {
        if domain_alignment.template_id != first.template_id {
            return Err(PipelineError::Value("not all the same template".to_string()));
        }
        let better = match best {
            Some(current) => {
                domain_alignment.percentage_coverage() > current.percentage_coverage()
            },
            None => true,
        };
        if better {
            best = Some(domain_alignment);
        }
    }

    let mut joined = match best {
        Some(b) => b.alignment.clone(),
        None => first.alignment.clone(),
    };
    for domain_alignment in domain_alignments {
        if alignments_compatible(&joined, &domain_alignment.alignment)? {
            joined = merge_alignments(&joined, &domain_alignment.alignment)?;
        }
    }

    Ok(joined)
}

/// Two fragment alignments are compatible iff their relative template spans
/// are disjoint.
fn alignments_compatible(
    alignment1: &TargetTemplateAlignment,
    alignment2: &TargetTemplateAlignment,
) -> Result<bool> {
    let span1 = alignment1.relative_span()?;
    let span2 = alignment2.relative_span()?;
    Ok(!span1.overlaps_with(&span2))
}

/// Join two fragment alignments at template-residue counts: the N-side
/// alignment up to the position where the template has consumed
/// `span1.end` residues, then the C-side alignment from the position where
/// the template has consumed `span2.start` residues.
fn merge_alignments(
    alignment1: &TargetTemplateAlignment,
    alignment2: &TargetTemplateAlignment,
) -> Result<TargetTemplateAlignment> {
    let span1 = alignment1.relative_span()?;
    let span2 = alignment2.relative_span()?;

    let (left, right, left_span, right_span) = if span2.is_left_from(&span1) {
        (alignment2, alignment1, span2, span1)
    } else {
        (alignment1, alignment2, span1, span2)
    };

    let i1 = row_index_after_template_count(&left.template_alignment, left_span.end);
    let i2 = row_index_after_template_count(&right.template_alignment, right_span.start);

    Ok(TargetTemplateAlignment::new(
        format!(
            "{}{}",
            &left.target_alignment[..i1],
            &right.target_alignment[i2..]
        ),
        format!(
            "{}{}",
            &left.template_alignment[..i1],
            &right.template_alignment[i2..]
        ),
    ))
}

/// Index of the row position just after `count` template residues.
fn row_index_after_template_count(template_row: &str, count: usize) -> usize {
    let mut consumed = 0usize;
    for (i, c) in template_row.chars().enumerate() {
        if consumed >= count {
            return i;
        }
        if is_amino_acid_char(c) {
            consumed += 1;
        }
    }
    template_row.len()
}
