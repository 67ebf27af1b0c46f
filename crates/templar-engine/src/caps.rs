//! Capability interfaces for external collaborators
//!
//! The engine never talks to a subprocess, a file store or an HTTP service
//! directly; it goes through these traits. Production adapters live in
//! [`crate::tools`] and [`crate::services`], tests inject fakes. A single
//! [`crate::config::PipelineConfig`] record initializes the production set.

use crate::error::Result;
use crate::models::align::{Alignment, BlastAlignment, TargetTemplateAlignment};
use crate::models::range::AnnotatedRange;
use crate::models::template::TemplateID;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

/// Blast hits keyed by hit id, in stable (sorted) order.
pub type BlastHits = BTreeMap<String, Vec<BlastAlignment>>;

/// Sequence-similarity search (blastp).
#[async_trait]
pub trait SequenceSearch: Send + Sync {
    async fn blastp(&self, sequence: &str, databank: &Path) -> Result<BlastHits>;
}

/// Secondary-structure-aware pairwise alignment (kmad).
#[async_trait]
pub trait ProfileAlign: Send + Sync {
    async fn align(
        &self,
        template_sequence: &str,
        template_secstr: &str,
        target_sequence: &str,
    ) -> Result<TargetTemplateAlignment>;
}

/// General multiple alignment (clustalw).
#[async_trait]
pub trait MultiAlign: Send + Sync {
    async fn align(&self, sequences: &[(String, String)]) -> Result<Alignment>;
}

/// Per-template sequence and secondary-structure lookup (DSSP files).
#[async_trait]
pub trait SecondaryStructureStore: Send + Sync {
    async fn has_secondary_structure(&self, template_id: &TemplateID) -> bool;
    async fn sequence(&self, template_id: &TemplateID) -> Result<String>;
    async fn secondary_structure(&self, template_id: &TemplateID) -> Result<String>;
}

/// Annotated domain-range discovery (InterPro).
#[async_trait]
pub trait DomainAnnotation: Send + Sync {
    async fn domain_ranges(&self, sequence: &str) -> Result<Vec<AnnotatedRange>>;
}

/// Sequence lookup by accession (UniProt).
#[async_trait]
pub trait SequenceSource: Send + Sync {
    async fn sequence(&self, accession: &str) -> Result<String>;
}

/// Structure file lookup by pdb id.
#[async_trait]
pub trait StructureSource: Send + Sync {
    async fn pdb_contents(&self, pdbid: &str) -> Result<String>;
}

/// The template blacklist. Readers may run concurrently; writers take an
/// exclusive lock.
#[async_trait]
pub trait Blacklist: Send + Sync {
    async fn is_blacklisted(&self, pdbid: &str) -> Result<bool>;
    async fn add(&self, pdbid: &str) -> Result<()>;
}
