//! Sequence ranges
//!
//! A `SequenceRange` is a half-open interval over a named sequence,
//! `0 <= start < end <= len(sequence)`. Ranges are immutable values: two
//! ranges are equal iff their start, end and sequence *content* match.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Half-open interval over a target sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceRange {
    pub start: usize,
    pub end: usize,
    pub sequence: String,
}

impl SequenceRange {
    pub fn new(start: usize, end: usize, sequence: impl Into<String>) -> Result<Self> {
        let sequence = sequence.into();
        if start >= end {
            return Err(PipelineError::Value(format!(
                "start must be smaller than end: {}-{}",
                start, end
            )));
        }
        if end > sequence.len() {
            return Err(PipelineError::Value(format!(
                "range {}-{} extends beyond the sequence ({} residues)",
                start,
                end,
                sequence.len()
            )));
        }
        Ok(Self {
            start,
            end,
            sequence,
        })
    }

    /// The whole-sequence range.
    pub fn whole(sequence: impl Into<String>) -> Result<Self> {
        let sequence = sequence.into();
        let end = sequence.len();
        Self::new(0, end, sequence)
    }

    pub fn length(&self) -> usize {
        self.end - self.start
    }

    pub fn sub_sequence(&self) -> &str {
        &self.sequence[self.start..self.end]
    }

    /// True when the 1-based residue number falls inside this range.
    pub fn includes_residue(&self, residue_number: usize) -> bool {
        if residue_number == 0 {
            return false;
        }
        let residue_index = residue_number - 1;
        residue_index >= self.start && residue_index < self.end
    }

    /// Strict ordering helper: left by start, then by end.
    pub fn is_left_from(&self, other: &SequenceRange) -> bool {
        if self.start < other.start {
            true
        } else if self.start == other.start {
            self.end < other.end
        } else {
            false
        }
    }

    /// Strict ordering helper: right by end, then by start.
    pub fn is_right_from(&self, other: &SequenceRange) -> bool {
        if self.end > other.end {
            true
        } else if self.end == other.end {
            self.start > other.start
        } else {
            false
        }
    }

    pub fn overlaps_with(&self, other: &SequenceRange) -> bool {
        if self.sequence != other.sequence {
            return false;
        }
        self.end >= other.start && self.start <= other.end
    }

    /// True when all of `other` lies within `self`.
    pub fn encloses(&self, other: &SequenceRange) -> bool {
        if self.sequence != other.sequence {
            return false;
        }
        self.start <= other.start && self.end >= other.end
    }

    pub fn intersection(&self, other: &SequenceRange) -> Result<SequenceRange> {
        if self.sequence != other.sequence {
            return Err(PipelineError::Value(
                "not from the same sequence".to_string(),
            ));
        }
        SequenceRange::new(
            self.start.max(other.start),
            self.end.min(other.end),
            self.sequence.clone(),
        )
    }

    pub fn merge_with(&self, other: &SequenceRange) -> Result<SequenceRange> {
        if !self.overlaps_with(other) {
            return Err(PipelineError::Value("not overlapping".to_string()));
        }
        SequenceRange::new(
            self.start.min(other.start),
            self.end.max(other.end),
            self.sequence.clone(),
        )
    }

    /// Overlap as a percentage of the shorter range; 0 when disjoint.
    pub fn percentage_overlap(&self, other: &SequenceRange) -> f64 {
        if !self.overlaps_with(other) {
            return 0.0;
        }
        let overlap_end = self.end.min(other.end);
        let overlap_start = self.start.max(other.start);
        if overlap_end <= overlap_start {
            return 0.0;
        }
        let count_overlap = overlap_end - overlap_start;
        (100.0 * count_overlap as f64) / self.length().min(other.length()) as f64
    }
}

impl std::fmt::Display for SequenceRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A range annotated by a signature database entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedRange {
    pub range: SequenceRange,
    /// Signature database accession, e.g. `IPR000719`
    pub accession: String,
}
