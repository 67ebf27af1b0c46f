//! Template identifiers
//!
//! A template is an experimentally determined structure addressed by a PDB
//! id and a chain id. PDB ids compare case-insensitively (stored lowercase),
//! chain ids compare case-sensitively.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateID {
    pdbid: String,
    chain_id: String,
}

impl TemplateID {
    pub fn new(pdbid: impl AsRef<str>, chain_id: impl Into<String>) -> Self {
        Self {
            pdbid: pdbid.as_ref().to_lowercase(),
            chain_id: chain_id.into(),
        }
    }

    pub fn pdbid(&self) -> &str {
        &self.pdbid
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }
}

impl std::fmt::Display for TemplateID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.pdbid, self.chain_id)
    }
}

impl std::str::FromStr for TemplateID {
    type Err = PipelineError;

    /// Parse `pdbid_chain` or `pdbid-chain`.
    fn from_str(s: &str) -> Result<Self> {
        let (pdbid, chain_id) = s
            .split_once(['_', '-'])
            .ok_or_else(|| PipelineError::Value(format!("cannot parse template id: {}", s)))?;
        if pdbid.len() != 4 || chain_id.is_empty() {
            return Err(PipelineError::Value(format!(
                "cannot parse template id: {}",
                s
            )));
        }
        Ok(TemplateID::new(pdbid, chain_id))
    }
}
