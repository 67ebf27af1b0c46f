//! Pipeline configuration
//!
//! A single process-wide record initializes every adapter. Values come from
//! environment variables with compiled defaults; `validate()` rejects
//! configurations that cannot possibly run a job.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

// ============================================================================
// Default Values
// ============================================================================

/// Default InterProScan REST endpoint.
pub const DEFAULT_INTERPRO_URL: &str = "https://www.ebi.ac.uk/Tools/services/rest/iprscan5";

/// Default UniProt sequence endpoint.
pub const DEFAULT_UNIPROT_URL: &str = "https://www.uniprot.org/uniprot";

/// Default divided-layout PDB mirror.
pub const DEFAULT_PDB_MIRROR_URL: &str =
    "https://files.wwpdb.org/pub/pdb/data/structures/divided/pdb";

/// Default InterProScan per-job timeout (2 hours).
pub const DEFAULT_INTERPRO_JOB_TIMEOUT_SECS: u64 = 60 * 60 * 2;

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Default InterProScan poll interval.
pub const DEFAULT_INTERPRO_POLL_INTERVAL_SECS: u64 = 10;

/// Default cache entry lifetime (30 days).
pub const DEFAULT_CACHE_EXPIRATION_SECS: u64 = 60 * 60 * 24 * 30;

/// Default cache lock timeout (1 hour).
pub const DEFAULT_CACHE_LOCK_TIMEOUT_SECS: u64 = 60 * 60;

/// Minimum identity a hit must reach to count as highly homologous.
pub const DEFAULT_HIGHLY_HOMOLOGOUS_PERCENTAGE_IDENTITY: f64 = 80.0;

/// Minimum coverage of the sampled range for normal acceptance.
pub const DEFAULT_DOMAIN_MIN_PERCENTAGE_COVERAGE: f64 = 80.0;

/// Overlap above which two similar sample ranges are merged.
pub const DEFAULT_SIMILAR_RANGES_MIN_OVERLAP_PERCENTAGE: f64 = 80.0;

/// Length difference below which two similar sample ranges are merged.
pub const DEFAULT_SIMILAR_RANGES_MAX_LENGTH_DIFFERENCE_PERCENTAGE: f64 = 10.0;

/// Domain accessions whose annotated ranges must never seed the search.
/// IPR003596 is the Ig variable domain like signature.
pub const DEFAULT_FORBIDDEN_INTERPRO_DOMAINS: &[&str] = &["IPR003596"];

// ============================================================================
// Configuration Records
// ============================================================================

/// Acceptance thresholds for the domain-alignment search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Domain accessions whose ranges are dropped together with everything
    /// overlapping them
    pub forbidden_interpro_domains: HashSet<String>,
    pub similar_ranges_min_overlap_percentage: f64,
    pub similar_ranges_max_length_difference_percentage: f64,
    pub min_percentage_coverage: f64,
    pub highly_homologous_percentage_identity: f64,
    /// Blast databank holding the template chain sequences
    pub template_blast_databank: PathBuf,
}

/// InterProScan service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterproSettings {
    pub url: String,
    pub email: String,
    pub job_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub poll_interval_secs: u64,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    // Executables
    pub blastp_exe: PathBuf,
    pub kmad_exe: PathBuf,
    pub clustalw_exe: PathBuf,
    pub modeler_exe: PathBuf,

    // Directories and file paths
    pub model_dir: PathBuf,
    pub dssp_dir: PathBuf,
    pub blacklist_file_path: PathBuf,
    /// Cache directory for memoized service results; `None` disables caching
    pub cache_dir: Option<PathBuf>,
    pub cache_expiration_secs: u64,
    pub cache_lock_timeout_secs: u64,

    // Databanks
    pub uniprot_blast_databank: PathBuf,

    // Services
    pub interpro: InterproSettings,
    pub uniprot_url: String,
    pub pdb_mirror_url: String,

    // Search thresholds
    pub search: SearchSettings,
}

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let forbidden = std::env::var("TEMPLAR_FORBIDDEN_INTERPRO_DOMAINS")
            .map(|s| {
                s.split(',')
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| {
                DEFAULT_FORBIDDEN_INTERPRO_DOMAINS
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            });

        let config = PipelineConfig {
            blastp_exe: env_path("TEMPLAR_BLASTP_EXE", "/usr/bin/blastp"),
            kmad_exe: env_path("TEMPLAR_KMAD_EXE", "/usr/bin/kmad"),
            clustalw_exe: env_path("TEMPLAR_CLUSTALW_EXE", "/usr/bin/clustalw"),
            modeler_exe: env_path("TEMPLAR_MODELER_EXE", "/usr/bin/templar-modeler"),
            model_dir: env_path("TEMPLAR_MODEL_DIR", "/data/models"),
            dssp_dir: env_path("TEMPLAR_DSSP_DIR", "/data/dssp"),
            blacklist_file_path: env_path(
                "TEMPLAR_BLACKLIST_FILE",
                "/data/blacklisted_templates",
            ),
            cache_dir: std::env::var("TEMPLAR_CACHE_DIR").ok().map(PathBuf::from),
            cache_expiration_secs: env_parse(
                "TEMPLAR_CACHE_EXPIRATION",
                DEFAULT_CACHE_EXPIRATION_SECS,
            ),
            cache_lock_timeout_secs: env_parse(
                "TEMPLAR_CACHE_LOCK_TIMEOUT",
                DEFAULT_CACHE_LOCK_TIMEOUT_SECS,
            ),
            uniprot_blast_databank: env_path("TEMPLAR_UNIPROT_DATABANK", "/data/blast/uniprot"),
            interpro: InterproSettings {
                url: std::env::var("TEMPLAR_INTERPRO_URL")
                    .unwrap_or_else(|_| DEFAULT_INTERPRO_URL.to_string()),
                email: std::env::var("TEMPLAR_INTERPRO_EMAIL").unwrap_or_default(),
                job_timeout_secs: env_parse(
                    "TEMPLAR_INTERPRO_JOB_TIMEOUT",
                    DEFAULT_INTERPRO_JOB_TIMEOUT_SECS,
                ),
                http_timeout_secs: env_parse(
                    "TEMPLAR_HTTP_TIMEOUT",
                    DEFAULT_HTTP_TIMEOUT_SECS,
                ),
                poll_interval_secs: env_parse(
                    "TEMPLAR_INTERPRO_POLL_INTERVAL",
                    DEFAULT_INTERPRO_POLL_INTERVAL_SECS,
                ),
            },
            uniprot_url: std::env::var("TEMPLAR_UNIPROT_URL")
                .unwrap_or_else(|_| DEFAULT_UNIPROT_URL.to_string()),
            pdb_mirror_url: std::env::var("TEMPLAR_PDB_MIRROR_URL")
                .unwrap_or_else(|_| DEFAULT_PDB_MIRROR_URL.to_string()),
            search: SearchSettings {
                forbidden_interpro_domains: forbidden,
                similar_ranges_min_overlap_percentage: env_parse(
                    "TEMPLAR_SIMILAR_RANGES_MIN_OVERLAP",
                    DEFAULT_SIMILAR_RANGES_MIN_OVERLAP_PERCENTAGE,
                ),
                similar_ranges_max_length_difference_percentage: env_parse(
                    "TEMPLAR_SIMILAR_RANGES_MAX_LENGTH_DIFFERENCE",
                    DEFAULT_SIMILAR_RANGES_MAX_LENGTH_DIFFERENCE_PERCENTAGE,
                ),
                min_percentage_coverage: env_parse(
                    "TEMPLAR_DOMAIN_MIN_COVERAGE",
                    DEFAULT_DOMAIN_MIN_PERCENTAGE_COVERAGE,
                ),
                highly_homologous_percentage_identity: env_parse(
                    "TEMPLAR_HIGHLY_HOMOLOGOUS_IDENTITY",
                    DEFAULT_HIGHLY_HOMOLOGOUS_PERCENTAGE_IDENTITY,
                ),
                template_blast_databank: env_path(
                    "TEMPLAR_TEMPLATE_DATABANK",
                    "/data/blast/templates",
                ),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.search.min_percentage_coverage <= 0.0
            || self.search.min_percentage_coverage > 100.0
        {
            return Err(PipelineError::Init(format!(
                "min percentage coverage out of range: {}",
                self.search.min_percentage_coverage
            )));
        }

        if self.search.highly_homologous_percentage_identity <= 0.0
            || self.search.highly_homologous_percentage_identity > 100.0
        {
            return Err(PipelineError::Init(format!(
                "highly homologous identity out of range: {}",
                self.search.highly_homologous_percentage_identity
            )));
        }

        if self.model_dir.as_os_str().is_empty() {
            return Err(PipelineError::Init("model directory is not set".to_string()));
        }

        if self.search.template_blast_databank.as_os_str().is_empty() {
            return Err(PipelineError::Init("blast databank is not set".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            blastp_exe: PathBuf::from("/usr/bin/blastp"),
            kmad_exe: PathBuf::from("/usr/bin/kmad"),
            clustalw_exe: PathBuf::from("/usr/bin/clustalw"),
            modeler_exe: PathBuf::from("/usr/bin/templar-modeler"),
            model_dir: PathBuf::from("/data/models"),
            dssp_dir: PathBuf::from("/data/dssp"),
            blacklist_file_path: PathBuf::from("/data/blacklisted_templates"),
            cache_dir: None,
            cache_expiration_secs: DEFAULT_CACHE_EXPIRATION_SECS,
            cache_lock_timeout_secs: DEFAULT_CACHE_LOCK_TIMEOUT_SECS,
            uniprot_blast_databank: PathBuf::from("/data/blast/uniprot"),
            interpro: InterproSettings {
                url: DEFAULT_INTERPRO_URL.to_string(),
                email: String::new(),
                job_timeout_secs: DEFAULT_INTERPRO_JOB_TIMEOUT_SECS,
                http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
                poll_interval_secs: DEFAULT_INTERPRO_POLL_INTERVAL_SECS,
            },
            uniprot_url: DEFAULT_UNIPROT_URL.to_string(),
            pdb_mirror_url: DEFAULT_PDB_MIRROR_URL.to_string(),
            search: SearchSettings {
                forbidden_interpro_domains: DEFAULT_FORBIDDEN_INTERPRO_DOMAINS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                similar_ranges_min_overlap_percentage:
                    DEFAULT_SIMILAR_RANGES_MIN_OVERLAP_PERCENTAGE,
                similar_ranges_max_length_difference_percentage:
                    DEFAULT_SIMILAR_RANGES_MAX_LENGTH_DIFFERENCE_PERCENTAGE,
                min_percentage_coverage: DEFAULT_DOMAIN_MIN_PERCENTAGE_COVERAGE,
                highly_homologous_percentage_identity:
                    DEFAULT_HIGHLY_HOMOLOGOUS_PERCENTAGE_IDENTITY,
                template_blast_databank: PathBuf::from("/data/blast/templates"),
            },
        }
    }

    #[test]
    fn test_default_config_validates() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_bad_coverage_rejected() {
        let mut config = test_config();
        config.search.min_percentage_coverage = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_forbidden_domains_default() {
        let config = test_config();
        assert!(config
            .search
            .forbidden_interpro_domains
            .contains("IPR003596"));
    }
}
