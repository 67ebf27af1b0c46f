//! The domain-alignment search engine.

pub mod aligner;
