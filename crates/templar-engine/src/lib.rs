//! Templar Engine
//!
//! The homology-modeling pipeline core. Given a target protein sequence, a
//! species id and optional constraints (a required residue position and/or a
//! pinned template), the engine selects domain-sized regions of the target,
//! finds homologous template structures, scores and accepts alignments,
//! composes a multi-chain alignment for the oligomeric template, drives the
//! external modeling engine and archives the results keyed by the sequence
//! fingerprint.
//!
//! External collaborators (blast, kmad, clustalw, DSSP, InterPro, UniProt,
//! the PDB and the modeling engine itself) are reached through the
//! capability traits in [`caps`]; production adapters live in [`tools`],
//! [`services`] and [`modeling`], and tests inject fakes.

pub mod blacklist;
pub mod caps;
pub mod config;
pub mod domain;
pub mod error;
pub mod joblog;
pub mod lock;
pub mod models;
pub mod modeling;
pub mod rost;
pub mod services;
pub mod storage;
pub mod tasks;
pub mod tools;

// Re-export the types most callers need
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use models::align::{Alignment, BlastAlignment, DomainAlignment, TargetTemplateAlignment};
pub use models::range::{AnnotatedRange, SequenceRange};
pub use models::template::TemplateID;
pub use tasks::ModelPipeline;
