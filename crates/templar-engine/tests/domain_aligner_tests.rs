//! Scenario tests for the domain-alignment search engine, run against
//! in-memory fakes of blast, kmad, dssp, interpro and the blacklist.

mod common;

use common::*;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use templar_engine::config::SearchSettings;
use templar_engine::domain::aligner::DomainAligner;
use templar_engine::joblog::JobLog;
use templar_engine::models::range::{AnnotatedRange, SequenceRange};
use templar_engine::models::template::TemplateID;
use templar_engine::rost::min_identity;

const TARGET: &str = "MKTAYIAKQRQISFVKSHFSRQLEERLGLIEVQAPILSRVGDGTQ";

fn settings() -> SearchSettings {
    SearchSettings {
        forbidden_interpro_domains: ["IPR003596".to_string()].into_iter().collect(),
        similar_ranges_min_overlap_percentage: 80.0,
        similar_ranges_max_length_difference_percentage: 10.0,
        min_percentage_coverage: 80.0,
        highly_homologous_percentage_identity: 80.0,
        template_blast_databank: PathBuf::from("/fake/templates"),
    }
}

struct Setup {
    blast: Arc<FakeBlast>,
    aligner: DomainAligner,
}

fn setup(
    blast: FakeBlast,
    kmad: FakeKmad,
    dssp: FakeDssp,
    interpro: FakeInterpro,
    blacklist: FakeBlacklist,
) -> Setup {
    let blast = Arc::new(blast);
    let aligner = DomainAligner::new(
        blast.clone(),
        Arc::new(kmad),
        Arc::new(dssp),
        Arc::new(interpro),
        Arc::new(blacklist),
        settings(),
    );
    Setup { blast, aligner }
}

#[tokio::test]
async fn test_whole_sequence_seed_without_interpro_ranges() {
    let template_id = TemplateID::new("1tpl", "A");
    let setup = setup(
        FakeBlast::with_hits(vec![(TARGET, vec![blast_hit("1tpl_A", TARGET)])]),
        FakeKmad::default(),
        FakeDssp::default().with_chain(template_id.clone(), TARGET),
        FakeInterpro::default(),
        FakeBlacklist::default(),
    );

    let alignments = setup
        .aligner
        .domain_alignments(TARGET, None, None, &JobLog::new())
        .await
        .unwrap();

    assert_eq!(alignments.len(), 1);
    let alignment = &alignments[0];
    assert_eq!(alignment.template_id, template_id);
    assert_eq!(alignment.range, SequenceRange::whole(TARGET).unwrap());
    // the target row without gaps reproduces the range's sub-sequence
    assert_eq!(alignment.target_sequence(), alignment.range.sub_sequence());
    // acceptance law held
    let nalign = alignment.alignment.count_aligned_residues();
    assert!(alignment.percentage_identity() >= min_identity(nalign));
}

#[tokio::test]
async fn test_forbidden_ranges_drop_overlapping_seeds() {
    // A forbidden Ig-like range and an overlapping benign range: both fall
    // away, only the whole-sequence fallback gets sampled.
    let template_id = TemplateID::new("1tpl", "A");
    let setup = setup(
        FakeBlast::with_hits(vec![(TARGET, vec![blast_hit("1tpl_A", TARGET)])]),
        FakeKmad::default(),
        FakeDssp::default().with_chain(template_id, TARGET),
        FakeInterpro {
            ranges: vec![
                AnnotatedRange {
                    range: SequenceRange::new(5, 35, TARGET).unwrap(),
                    accession: "IPR003596".to_string(),
                },
                AnnotatedRange {
                    range: SequenceRange::new(20, 44, TARGET).unwrap(),
                    accession: "IPR000001".to_string(),
                },
            ],
        },
        FakeBlacklist::default(),
    );

    let alignments = setup
        .aligner
        .domain_alignments(TARGET, None, None, &JobLog::new())
        .await
        .unwrap();

    // only the whole-sequence range was blasted
    assert_eq!(setup.blast.call_count(), 1);
    assert_eq!(alignments.len(), 1);
    assert_eq!(alignments[0].range, SequenceRange::whole(TARGET).unwrap());
}

#[tokio::test]
async fn test_required_residue_not_covered_yields_nothing() {
    // The template lacks residue 25 of the target; the kmad re-alignment
    // gaps it, so the only candidate is rejected.
    let template_sequence: String = TARGET
        .chars()
        .enumerate()
        .filter(|(i, _)| *i != 24)
        .map(|(_, c)| c)
        .collect();
    let target_row = TARGET.to_string();
    let template_row = format!("{}-{}", &template_sequence[..24], &template_sequence[24..]);

    let template_id = TemplateID::new("1tpl", "A");
    let setup = setup(
        FakeBlast::with_hits(vec![(TARGET, vec![blast_hit("1tpl_A", TARGET)])]),
        FakeKmad::default().with_override(&template_sequence, TARGET, &target_row, &template_row),
        FakeDssp::default().with_chain(template_id, &template_sequence),
        FakeInterpro::default(),
        FakeBlacklist::default(),
    );

    let alignments = setup
        .aligner
        .domain_alignments(TARGET, Some(25), None, &JobLog::new())
        .await
        .unwrap();
    assert!(alignments.is_empty());

    // residues at the sequence edge still work
    let alignments = setup
        .aligner
        .domain_alignments(TARGET, Some(1), None, &JobLog::new())
        .await
        .unwrap();
    assert_eq!(alignments.len(), 1);
}

#[tokio::test]
async fn test_required_residue_bounds_are_value_errors() {
    let setup = setup(
        FakeBlast::default(),
        FakeKmad::default(),
        FakeDssp::default(),
        FakeInterpro::default(),
        FakeBlacklist::default(),
    );

    assert!(setup
        .aligner
        .domain_alignments(TARGET, Some(0), None, &JobLog::new())
        .await
        .is_err());
    assert!(setup
        .aligner
        .domain_alignments(TARGET, Some(TARGET.len() + 1), None, &JobLog::new())
        .await
        .is_err());
}

#[tokio::test]
async fn test_pinned_template_excludes_other_hits() {
    let pinned = TemplateID::new("1tpl", "A");
    let other = TemplateID::new("2oth", "B");
    let setup = setup(
        FakeBlast::with_hits(vec![(
            TARGET,
            vec![blast_hit("1tpl_A", TARGET), blast_hit("2oth_B", TARGET)],
        )]),
        FakeKmad::default(),
        FakeDssp::default()
            .with_chain(pinned.clone(), TARGET)
            .with_chain(other, TARGET),
        FakeInterpro::default(),
        FakeBlacklist::default(),
    );

    let alignments = setup
        .aligner
        .domain_alignments(TARGET, None, Some(&pinned), &JobLog::new())
        .await
        .unwrap();

    assert_eq!(alignments.len(), 1);
    assert_eq!(alignments[0].template_id, pinned);
}

#[tokio::test]
async fn test_blacklisted_template_is_skipped() {
    let template_id = TemplateID::new("1tpl", "A");
    let blacklist = FakeBlacklist::default();
    blacklist.entries.lock().unwrap().insert("1tpl".to_string());

    let setup = setup(
        FakeBlast::with_hits(vec![(TARGET, vec![blast_hit("1tpl_A", TARGET)])]),
        FakeKmad::default(),
        FakeDssp::default().with_chain(template_id, TARGET),
        FakeInterpro::default(),
        blacklist,
    );

    let alignments = setup
        .aligner
        .domain_alignments(TARGET, None, None, &JobLog::new())
        .await
        .unwrap();
    assert!(alignments.is_empty());
}

#[tokio::test]
async fn test_hits_without_dssp_are_dropped() {
    let setup = setup(
        FakeBlast::with_hits(vec![(TARGET, vec![blast_hit("1tpl_A", TARGET)])]),
        FakeKmad::default(),
        FakeDssp::default(), // no entries at all
        FakeInterpro::default(),
        FakeBlacklist::default(),
    );

    let alignments = setup
        .aligner
        .domain_alignments(TARGET, None, None, &JobLog::new())
        .await
        .unwrap();
    assert!(alignments.is_empty());
}

#[tokio::test]
async fn test_no_returned_range_encloses_another() {
    // An interpro sub-range and the whole sequence both yield; the whole
    // sequence wins and the enclosed range is pruned.
    let sub_range = SequenceRange::new(5, 30, TARGET).unwrap();
    let template_id = TemplateID::new("1tpl", "A");

    let setup = setup(
        FakeBlast::with_hits(vec![
            (TARGET, vec![blast_hit("1tpl_A", TARGET)]),
            (
                sub_range.sub_sequence(),
                vec![blast_hit("1tpl_A", sub_range.sub_sequence())],
            ),
        ]),
        FakeKmad::default(),
        FakeDssp::default().with_chain(template_id, TARGET),
        FakeInterpro {
            ranges: vec![AnnotatedRange {
                range: sub_range,
                accession: "IPR000001".to_string(),
            }],
        },
        FakeBlacklist::default(),
    );

    let alignments = setup
        .aligner
        .domain_alignments(TARGET, None, None, &JobLog::new())
        .await
        .unwrap();

    assert_eq!(alignments.len(), 1);
    assert_eq!(alignments[0].range, SequenceRange::whole(TARGET).unwrap());

    for a in &alignments {
        for b in &alignments {
            if a.range != b.range {
                assert!(!a.range.encloses(&b.range));
            }
        }
    }
}

#[tokio::test]
async fn test_highly_homologous_override_accepts_low_coverage() {
    // The template covers barely half the target: coverage fails the
    // normal bar, but identity is perfect over the whole-sequence range,
    // so the last-resort acceptance applies.
    let template_sequence = &TARGET[..24];
    let template_id = TemplateID::new("1tpl", "A");

    let setup = setup(
        FakeBlast::with_hits(vec![(TARGET, vec![blast_hit("1tpl_A", TARGET)])]),
        FakeKmad::default(),
        FakeDssp::default().with_chain(template_id.clone(), template_sequence),
        FakeInterpro::default(),
        FakeBlacklist::default(),
    );

    let alignments = setup
        .aligner
        .domain_alignments(TARGET, None, None, &JobLog::new())
        .await
        .unwrap();

    assert_eq!(alignments.len(), 1);
    let alignment = &alignments[0];
    assert_eq!(alignment.template_id, template_id);
    assert!(alignment.percentage_coverage() < 80.0);
    assert!(alignment.percentage_identity() >= 80.0);
    assert_eq!(alignment.range.length(), TARGET.len());
}

#[tokio::test]
async fn test_shared_template_ranges_merge_on_reseeding() {
    // Two overlapping interpro ranges hit the same template while the
    // whole sequence finds nothing; the merged range is re-seeded, agrees
    // with both originals on the intersection, and replaces them.
    let r1 = SequenceRange::new(0, 20, TARGET).unwrap();
    let r2 = SequenceRange::new(15, 40, TARGET).unwrap();
    let merged = SequenceRange::new(0, 40, TARGET).unwrap();
    let template_id = TemplateID::new("1tpl", "A");

    let setup = setup(
        FakeBlast::with_hits(vec![
            (
                r1.sub_sequence(),
                vec![blast_hit("1tpl_A", r1.sub_sequence())],
            ),
            (
                r2.sub_sequence(),
                vec![blast_hit("1tpl_A", r2.sub_sequence())],
            ),
            (
                merged.sub_sequence(),
                vec![blast_hit("1tpl_A", merged.sub_sequence())],
            ),
            // the whole sequence yields nothing at all
        ]),
        FakeKmad::default(),
        FakeDssp::default().with_chain(template_id.clone(), TARGET),
        FakeInterpro {
            ranges: vec![
                AnnotatedRange {
                    range: r1.clone(),
                    accession: "IPR000001".to_string(),
                },
                AnnotatedRange {
                    range: r2.clone(),
                    accession: "IPR000002".to_string(),
                },
            ],
        },
        FakeBlacklist::default(),
    );

    let alignments = setup
        .aligner
        .domain_alignments(TARGET, None, None, &JobLog::new())
        .await
        .unwrap();

    assert_eq!(alignments.len(), 1);
    assert_eq!(alignments[0].range, merged);
    assert_eq!(alignments[0].template_id, template_id);
    // the merged range replaced both originals
    let ranges: HashSet<(usize, usize)> = alignments
        .iter()
        .map(|a| (a.range.start, a.range.end))
        .collect();
    assert!(!ranges.contains(&(r1.start, r1.end)));
    assert!(!ranges.contains(&(r2.start, r2.end)));
}

#[tokio::test]
async fn test_empty_sequence_is_a_value_error() {
    let setup = setup(
        FakeBlast::default(),
        FakeKmad::default(),
        FakeDssp::default(),
        FakeInterpro::default(),
        FakeBlacklist::default(),
    );
    assert!(setup
        .aligner
        .domain_alignments("", None, None, &JobLog::new())
        .await
        .is_err());
}
