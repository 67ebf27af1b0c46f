//! Domain-alignment search engine
//!
//! Given a target sequence, an optional required residue number and an
//! optional pinned template, produce accepted domain alignments covering as
//! much of the target as possible with defensible templates.
//!
//! The search iterates to a fixed point over a set of sample ranges. Each
//! round merges similar ranges, examines them largest first, blasts the
//! range against the template databank, replaces every surviving hit's rows
//! with a secondary-structure-aware kmad re-alignment, applies the Rost
//! acceptance law, and keeps the best hit per range while pruning enclosed
//! ranges. Ranges that reached an acceptable alignment on a shared template
//! seed merged candidate ranges for the next round, provided both original
//! alignments agree with the merged alignment on their intersection.

use crate::caps::{
    Blacklist, DomainAnnotation, ProfileAlign, SecondaryStructureStore, SequenceSearch,
};
use crate::config::SearchSettings;
use crate::error::{PipelineError, Result};
use crate::joblog::JobLog;
use crate::models::align::{BlastAlignment, DomainAlignment, TargetTemplateAlignment};
use crate::models::range::{AnnotatedRange, SequenceRange};
use crate::models::template::TemplateID;
use crate::rost::min_identity;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use templar_common::sequence::is_amino_acid_char;
use tracing::{debug, warn};

pub struct DomainAligner {
    blast: Arc<dyn SequenceSearch>,
    kmad: Arc<dyn ProfileAlign>,
    dssp: Arc<dyn SecondaryStructureStore>,
    interpro: Arc<dyn DomainAnnotation>,
    blacklist: Arc<dyn Blacklist>,
    settings: SearchSettings,
}

impl DomainAligner {
    pub fn new(
        blast: Arc<dyn SequenceSearch>,
        kmad: Arc<dyn ProfileAlign>,
        dssp: Arc<dyn SecondaryStructureStore>,
        interpro: Arc<dyn DomainAnnotation>,
        blacklist: Arc<dyn Blacklist>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            blast,
            kmad,
            dssp,
            interpro,
            blacklist,
            settings,
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Run the search. The returned alignments are keyed by target range;
    /// no two of their ranges enclose each other.
    pub async fn domain_alignments(
        &self,
        target_sequence: &str,
        require_resnum: Option<usize>,
        template_id: Option<&TemplateID>,
        log: &JobLog,
    ) -> Result<Vec<DomainAlignment>> {
        if target_sequence.is_empty() {
            return Err(PipelineError::Value("empty target sequence".to_string()));
        }
        if let Some(resnum) = require_resnum {
            if resnum < 1 || resnum > target_sequence.len() {
                return Err(PipelineError::Value(format!(
                    "residue number {} out of range for a {} residue sequence",
                    resnum,
                    target_sequence.len()
                )));
            }
        }

        log.add(format!(
            "getting domain alignments for sequence of {} residues, resnum {:?}, template {}",
            target_sequence.len(),
            require_resnum,
            template_id.map(|t| t.to_string()).unwrap_or_else(|| "any".to_string())
        ));

        let interpro_ranges = self.interpro.domain_ranges(target_sequence).await?;
        debug!(count = interpro_ranges.len(), "ranges from interpro");

        let mut sample_ranges = filter_forbidden_ranges(
            &interpro_ranges,
            &self.settings.forbidden_interpro_domains,
        );

        if let Some(resnum) = require_resnum {
            sample_ranges.retain(|r| r.includes_residue(resnum));
            debug!(
                count = sample_ranges.len(),
                resnum, "ranges containing the required residue"
            );
        }

        // The whole sequence is always a sample range, interpro or not.
        sample_ranges.push(SequenceRange::whole(target_sequence)?);

        let mut ok_ranges_alignments: HashMap<SequenceRange, DomainAlignment> = HashMap::new();
        let mut best_ranges_alignments: HashMap<SequenceRange, DomainAlignment> = HashMap::new();
        let mut checked_ranges: Vec<SequenceRange> = Vec::new();

        while !sample_ranges.is_empty() {
            let merged_sample_ranges = self.merge_similar_ranges(sample_ranges.clone())?;
            debug!(count = merged_sample_ranges.len(), "sampling ranges");

            // Largest first: when a large range yields, its enclosed smaller
            // ranges no longer matter. Ties break on start position to keep
            // the enumeration stable.
            let mut ordered = merged_sample_ranges.clone();
            ordered.sort_by(|a, b| {
                b.length()
                    .cmp(&a.length())
                    .then(a.start.cmp(&b.start))
            });

            for range in &ordered {
                if checked_ranges.contains(range) {
                    continue; // already passed this one
                }
                checked_ranges.push(range.clone());

                if best_ranges_alignments.keys().any(|r| r.encloses(range)) {
                    continue; // a larger enclosing range already has a hit
                }

                log.add(format!("examining range {}", range));

                let mut best_hit: Option<BlastAlignment> = None;
                let mut last_resort_hit: Option<BlastAlignment> = None;

                let hit_candidates = self.hits_for_range(range, template_id).await?;
                debug!(range = %range, hits = hit_candidates.len(), "trying range");

                for hit_candidate in hit_candidates {
                    if let Some(resnum) = require_resnum {
                        if !hit_candidate.is_query_residue_covered(resnum) {
                            debug!(
                                hit = %hit_candidate.hit_id,
                                resnum, "hit does not cover the required residue"
                            );
                            continue;
                        }
                    }

                    if !self.alignment_ok_for_range(range, &hit_candidate) {
                        continue;
                    }

                    let hit_template_id = hit_candidate.template_id()?;
                    let hit_range = hit_candidate.query_range()?;

                    log.add(format!(
                        "found a hit with {} covering range {}",
                        hit_template_id, hit_range
                    ));

                    // Record every acceptable alignment for the
                    // shared-template merge later on.
                    ok_ranges_alignments.insert(
                        hit_range.clone(),
                        DomainAlignment::new(
                            hit_candidate.query_alignment.clone(),
                            hit_candidate.subject_alignment.clone(),
                            hit_range.clone(),
                            hit_template_id.clone(),
                        ),
                    );

                    if hit_candidate.percentage_coverage() > self.settings.min_percentage_coverage
                    {
                        let better = match &best_hit {
                            Some(current) => is_better_than(&hit_candidate, current),
                            None => true,
                        };
                        if better {
                            log.add(format!(
                                "{} beats the current best hit for range {}",
                                hit_template_id, range
                            ));
                            best_hit = Some(hit_candidate);
                        }
                    } else {
                        last_resort_hit = Some(hit_candidate);
                    }
                }

                let chosen = best_hit.or(last_resort_hit);
                match chosen {
                    Some(hit) => {
                        // This range wins; smaller enclosed ranges lose.
                        best_ranges_alignments.retain(|r, _| !range.encloses(r));

                        let hit_template_id = hit.template_id()?;
                        let hit_range = hit.query_range()?;
                        debug!(
                            template = %hit_template_id,
                            range = %hit_range,
                            "passing best hit"
                        );
                        best_ranges_alignments.insert(
                            hit_range.clone(),
                            DomainAlignment::new(
                                hit.query_alignment,
                                hit.subject_alignment,
                                hit_range,
                                hit_template_id,
                            ),
                        );
                    },
                    None => debug!(range = %range, "no hit for range"),
                }
            }

            // Ranges that reached an acceptable alignment on a shared
            // template may merge into new sample ranges for the next round.
            sample_ranges = self
                .clean_search_space(&checked_ranges, &sample_ranges, &ok_ranges_alignments)
                .await?;
        }

        let mut alignments: Vec<DomainAlignment> = best_ranges_alignments.into_values().collect();
        alignments.sort_by(|a, b| {
            a.range
                .start
                .cmp(&b.range.start)
                .then(a.range.end.cmp(&b.range.end))
        });
        Ok(alignments)
    }

    /// Blast the range against the template databank and keep the usable
    /// hits, each re-aligned with kmad against the full template chain.
    async fn hits_for_range(
        &self,
        range: &SequenceRange,
        pinned_template: Option<&TemplateID>,
    ) -> Result<Vec<BlastAlignment>> {
        let blast_hits = self
            .blast
            .blastp(range.sub_sequence(), &self.settings.template_blast_databank)
            .await?;
        debug!(count = blast_hits.len(), "blast hits to filter");

        let mut good_hits = Vec::new();
        for (_, hit_alignments) in blast_hits {
            for mut alignment in hit_alignments {
                let hit_template_id = match alignment.template_id() {
                    Ok(id) => id,
                    Err(e) => {
                        debug!(hit = %alignment.hit_id, error = %e, "unparseable hit id");
                        continue;
                    },
                };

                if let Some(pinned) = pinned_template {
                    if hit_template_id != *pinned {
                        continue;
                    }
                } else if self
                    .blacklist
                    .is_blacklisted(hit_template_id.pdbid())
                    .await?
                {
                    continue;
                }

                if !self.dssp.has_secondary_structure(&hit_template_id).await {
                    continue;
                }

                let template_secstr = self.dssp.secondary_structure(&hit_template_id).await?;
                let template_sequence = self.dssp.sequence(&hit_template_id).await?;

                // Replace the blast rows with the kmad re-alignment of the
                // sampled sub-sequence against the full template chain, and
                // rewrite the span fields accordingly.
                let kmad_alignment = match self
                    .kmad
                    .align(&template_sequence, &template_secstr, range.sub_sequence())
                    .await
                {
                    Ok(kmad_alignment) => kmad_alignment,
                    Err(e) => {
                        warn!(template = %hit_template_id, error = %e, "kmad failed, skipping hit");
                        continue;
                    },
                };

                alignment.full_query_sequence = range.sequence.clone();
                alignment.query_start = range.start + 1;
                alignment.query_end = range.end;
                alignment.subject_start = 1;
                alignment.subject_end = template_sequence.len();
                alignment.query_alignment = kmad_alignment.target_alignment;
                alignment.subject_alignment = kmad_alignment.template_alignment;

                if alignment.percentage_identity()
                    >= min_identity(alignment.count_aligned_residues())
                {
                    good_hits.push(alignment);
                }
            }
        }

        Ok(good_hits)
    }

    /// The acceptance law: the Rost curve on identity, plus either enough
    /// coverage of the sampled range or the highly-homologous override for
    /// whole-sequence ranges.
    fn alignment_ok_for_range(&self, range: &SequenceRange, alignment: &BlastAlignment) -> bool {
        let pid = alignment.percentage_identity();
        let nalign = alignment.count_aligned_residues();
        let pcover = (100.0 * nalign as f64) / range.length() as f64;

        let highly_homologous = pid >= self.settings.highly_homologous_percentage_identity
            && range.length() == range.sequence.len();

        debug!(range = %range, pid, nalign, pcover, "alignment acceptance check");

        pid >= min_identity(nalign)
            && (pcover >= self.settings.min_percentage_coverage || highly_homologous)
    }

    /// Merge sample ranges that overlap heavily and have nearly the same
    /// length, sweeping left to right until stable.
    fn merge_similar_ranges(&self, ranges: Vec<SequenceRange>) -> Result<Vec<SequenceRange>> {
        let mut ranges = ranges;
        ranges.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));

        let mut i = 0;
        while i < ranges.len() {
            let overlapping: Vec<usize> = ((i + 1)..ranges.len())
                .filter(|&j| ranges[j].overlaps_with(&ranges[i]))
                .collect();

            // Rightmost first: indices stay valid while removing.
            for &j in overlapping.iter().rev() {
                let percentage_overlap = ranges[i].percentage_overlap(&ranges[j]);
                let length_i = ranges[i].length() as f64;
                let length_j = ranges[j].length() as f64;
                let percentage_length_difference =
                    100.0 * (length_i - length_j).abs() / length_i.max(length_j);

                if percentage_overlap > self.settings.similar_ranges_min_overlap_percentage
                    && percentage_length_difference
                        < self.settings.similar_ranges_max_length_difference_percentage
                {
                    debug!(
                        left = %ranges[i],
                        right = %ranges[j],
                        length_difference = percentage_length_difference,
                        "merging similar ranges"
                    );
                    let merged = ranges[i].merge_with(&ranges[j])?;
                    ranges[i] = merged;
                    ranges.remove(j);
                }
            }
            i += 1;

            remove_duplicate_ranges(&mut ranges);
        }

        Ok(ranges)
    }

    /// Build the next round's sample ranges: merges of range pairs that hit
    /// the same template, kept only when both pairwise alignments agree
    /// with the merged kmad alignment over the intersection.
    async fn clean_search_space(
        &self,
        checked_ranges: &[SequenceRange],
        sample_ranges: &[SequenceRange],
        ok_ranges_alignments: &HashMap<SequenceRange, DomainAlignment>,
    ) -> Result<Vec<SequenceRange>> {
        let mut seen: Vec<SequenceRange> = checked_ranges.to_vec();
        seen.extend(sample_ranges.iter().cloned());
        remove_duplicate_ranges(&mut seen);

        let mut new_sample_ranges: Vec<SequenceRange> = Vec::new();

        for (template_id, ranges) in find_shared_hit_ranges(ok_ranges_alignments) {
            for i in 0..ranges.len() {
                for j in (i + 1)..ranges.len() {
                    if !ranges[j].overlaps_with(&ranges[i]) {
                        continue;
                    }

                    let merged = ranges[i].merge_with(&ranges[j])?;
                    if seen.contains(&merged) {
                        continue; // this merge has already been tried
                    }

                    let alignment_i = &ok_ranges_alignments[&ranges[i]];
                    let alignment_j = &ok_ranges_alignments[&ranges[j]];

                    let template_secstr = self.dssp.secondary_structure(&template_id).await?;
                    let template_sequence = self.dssp.sequence(&template_id).await?;

                    let merged_alignment = match self
                        .kmad
                        .align(&template_sequence, &template_secstr, merged.sub_sequence())
                        .await
                    {
                        Ok(alignment) => alignment,
                        Err(e) => {
                            warn!(error = %e, "kmad failed on a merged range, skipping");
                            continue;
                        },
                    };

                    let intersected = ranges[i].intersection(&ranges[j])?;

                    let slice_i = template_sequence_in_target_range(
                        &alignment_i.alignment,
                        intersected.start - ranges[i].start,
                        intersected.length(),
                    );
                    let slice_j = template_sequence_in_target_range(
                        &alignment_j.alignment,
                        intersected.start - ranges[j].start,
                        intersected.length(),
                    );
                    let slice_m = template_sequence_in_target_range(
                        &merged_alignment,
                        intersected.start - merged.start,
                        intersected.length(),
                    );

                    // Accept only when the intersecting parts align to the
                    // template in exactly the same way.
                    if slice_i == slice_m && slice_j == slice_m {
                        new_sample_ranges.push(merged);
                    }
                }
            }
        }

        remove_duplicate_ranges(&mut new_sample_ranges);
        Ok(new_sample_ranges)
    }
}

/// A hit is better when it improves (or equals) both identity and aligned
/// residue count.
fn is_better_than(hit: &BlastAlignment, other_hit: &BlastAlignment) -> bool {
    hit.percentage_identity() >= other_hit.percentage_identity()
        && hit.count_aligned_residues() >= other_hit.count_aligned_residues()
}

/// Drop every range that overlaps a forbidden range. Forbidden ranges
/// remove overlapping ranges entirely, they never shrink them; a forbidden
/// range always overlaps itself.
fn filter_forbidden_ranges(
    ranges: &[AnnotatedRange],
    forbidden_domains: &std::collections::HashSet<String>,
) -> Vec<SequenceRange> {
    let forbidden: Vec<&AnnotatedRange> = ranges
        .iter()
        .filter(|r| forbidden_domains.contains(&r.accession))
        .collect();

    ranges
        .iter()
        .filter(|r| !forbidden.iter().any(|f| f.range.overlaps_with(&r.range)))
        .map(|r| r.range.clone())
        .collect()
}

/// Group the ranges of acceptable alignments by template; only templates
/// hit by at least two ranges matter for merging.
fn find_shared_hit_ranges(
    ranges_alignments: &HashMap<SequenceRange, DomainAlignment>,
) -> BTreeMap<TemplateID, Vec<SequenceRange>> {
    let mut by_template: BTreeMap<TemplateID, Vec<SequenceRange>> = BTreeMap::new();
    for (range, alignment) in ranges_alignments {
        by_template
            .entry(alignment.template_id.clone())
            .or_default()
            .push(range.clone());
    }

    by_template.retain(|_, ranges| ranges.len() > 1);
    for ranges in by_template.values_mut() {
        ranges.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));
    }
    by_template
}

fn remove_duplicate_ranges(ranges: &mut Vec<SequenceRange>) {
    let mut kept: Vec<SequenceRange> = Vec::with_capacity(ranges.len());
    for range in ranges.drain(..) {
        if !kept.contains(&range) {
            kept.push(range);
        }
    }
    *ranges = kept;
}

/// For a range of the alignment's target (given by its offset into the
/// aligned target and its residue count), return the template row slice the
/// range aligns to.
fn template_sequence_in_target_range(
    alignment: &TargetTemplateAlignment,
    target_start_offset: usize,
    target_length: usize,
) -> String {
    let target: Vec<char> = alignment.target_alignment.chars().collect();

    let mut start = 0;
    while start < target.len() && !is_amino_acid_char(target[start]) {
        start += 1;
    }

    let mut n_aa = 0;
    while n_aa < target_start_offset && start < target.len() {
        if is_amino_acid_char(target[start]) {
            n_aa += 1;
        }
        start += 1;
    }

    let mut end = start;
    let mut n_aa = 0;
    while n_aa < target_length && end < target.len() {
        if is_amino_acid_char(target[end]) {
            n_aa += 1;
        }
        end += 1;
    }

    alignment.template_alignment[start..end.min(alignment.template_alignment.len())].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_forbidden_drops_overlapping() {
        let sequence = "A".repeat(100);
        let forbidden = AnnotatedRange {
            range: SequenceRange::new(10, 60, sequence.clone()).unwrap(),
            accession: "IPR003596".to_string(),
        };
        let overlapping = AnnotatedRange {
            range: SequenceRange::new(40, 90, sequence.clone()).unwrap(),
            accession: "IPR000001".to_string(),
        };
        let clear = AnnotatedRange {
            range: SequenceRange::new(70, 95, sequence.clone()).unwrap(),
            accession: "IPR000002".to_string(),
        };

        let forbidden_set: std::collections::HashSet<String> =
            ["IPR003596".to_string()].into_iter().collect();

        let passed = filter_forbidden_ranges(
            &[forbidden, overlapping, clear.clone()],
            &forbidden_set,
        );
        assert_eq!(passed, vec![clear.range]);
    }

    #[test]
    fn test_remove_duplicate_ranges_keeps_first() {
        let sequence = "A".repeat(50);
        let a = SequenceRange::new(0, 10, sequence.clone()).unwrap();
        let b = SequenceRange::new(5, 20, sequence.clone()).unwrap();
        let mut ranges = vec![a.clone(), b.clone(), a.clone()];
        remove_duplicate_ranges(&mut ranges);
        assert_eq!(ranges, vec![a, b]);
    }

    #[test]
    fn test_template_sequence_in_target_range() {
        // target:   --ACDEF-
        // template: QRACD-FG
        let alignment = TargetTemplateAlignment::new("--ACDEF-", "QRACD-FG");
        // offset 1, length 3 -> target C, D, E -> template "CD-"
        assert_eq!(template_sequence_in_target_range(&alignment, 1, 3), "CD-");
        // offset 0, length 5 -> whole target -> "ACD-F"
        assert_eq!(template_sequence_in_target_range(&alignment, 0, 5), "ACD-F");
    }

    #[test]
    fn test_is_better_than_requires_both() {
        let make = |qrow: &str, srow: &str| BlastAlignment {
            hit_id: "1aaa_A".to_string(),
            databank: "templates".to_string(),
            full_query_sequence: qrow.replace('-', ""),
            query_start: 1,
            query_end: qrow.replace('-', "").len(),
            subject_start: 1,
            subject_end: srow.replace('-', "").len(),
            query_alignment: qrow.to_string(),
            subject_alignment: srow.to_string(),
        };

        let long_exact = make("ACDEFG", "ACDEFG");
        let short_exact = make("ACD---", "ACDEFG");
        assert!(is_better_than(&long_exact, &short_exact));
        assert!(!is_better_than(&short_exact, &long_exact));
    }
}
