//! Templar Common Library
//!
//! Shared leaves used across the templar workspace:
//!
//! - **Error Handling**: the common error enum and result alias
//! - **Logging**: tracing initialization from environment configuration
//! - **Sequences**: amino-acid table, alphabet checks, FASTA I/O
//! - **Fingerprints**: stable sequence digests used as cache and lock keys

pub mod aminoacid;
pub mod error;
pub mod fasta;
pub mod fingerprint;
pub mod logging;
pub mod sequence;

// Re-export commonly used types
pub use error::{CommonError, Result};
