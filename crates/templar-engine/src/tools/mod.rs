//! Subprocess tool adapters: blastp, kmad and clustalw.

pub mod blast;
pub mod clustal;
pub mod kmad;
