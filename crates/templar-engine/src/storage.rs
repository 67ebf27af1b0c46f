//! Model result store
//!
//! Every finished model is one `.tgz` archive in the model directory,
//! written once and keyed by its model name:
//!
//! ```text
//! <fingerprint>_<SPECIES>_<start1>-<end>[_<pdbid>-<chain>].tgz
//! ```
//!
//! where `start1`/`end` are 1-based inclusive target coordinates. Failed
//! engine runs are kept under the `_error.tgz` suffix. Search and model
//! locks are advisory lock files living next to the archives, so
//! independent worker processes serialize on the same keys.

use crate::error::{PipelineError, Result};
use crate::lock::PathLock;
use crate::models::align::Alignment;
use crate::models::range::SequenceRange;
use crate::models::template::TemplateID;
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use templar_common::fingerprint::sequence_id;

pub struct ModelStorage {
    model_dir: PathBuf,
}

impl ModelStorage {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    // ========================================================================
    // Names and paths
    // ========================================================================

    pub fn model_name(
        &self,
        target_sequence: &str,
        species_id: &str,
        range: &SequenceRange,
        template_id: Option<&TemplateID>,
    ) -> String {
        let base = format!(
            "{}_{}_{}-{}",
            sequence_id(target_sequence),
            species_id.to_uppercase(),
            range.start + 1,
            range.end
        );
        match template_id {
            Some(template_id) => format!("{}_{}", base, template_id),
            None => base,
        }
    }

    pub fn model_name_from_path(&self, tar_path: &Path) -> String {
        let name = tar_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        name.strip_suffix(".tgz").unwrap_or(&name).to_string()
    }

    pub fn sequence_id_from_name(&self, model_name: &str) -> String {
        model_name.split('_').next().unwrap_or_default().to_string()
    }

    pub fn tar_path_from_name(&self, name: &str) -> PathBuf {
        self.model_dir.join(format!("{}.tgz", name))
    }

    pub fn tar_path(
        &self,
        target_sequence: &str,
        species_id: &str,
        range: &SequenceRange,
        template_id: Option<&TemplateID>,
    ) -> PathBuf {
        self.tar_path_from_name(&self.model_name(target_sequence, species_id, range, template_id))
    }

    pub fn error_tar_path_from_name(&self, name: &str) -> PathBuf {
        self.model_dir.join(format!("{}_error.tgz", name))
    }

    // ========================================================================
    // Listing
    // ========================================================================

    /// Archives for the given request. The pdb id part matches
    /// case-insensitively; `_error` archives never match. A required
    /// residue number prefilters on the range encoded in the name.
    pub fn list_models(
        &self,
        target_sequence: &str,
        species_id: &str,
        required_resnum: Option<usize>,
        template_id: Option<&TemplateID>,
    ) -> Result<Vec<PathBuf>> {
        let prefix = format!(
            "{}_{}_",
            sequence_id(target_sequence),
            species_id.to_uppercase()
        );

        let mut paths = self.list_matching(|name| {
            if !name.starts_with(&prefix) {
                return false;
            }
            match template_id {
                Some(template_id) => name_matches_template(name, template_id),
                None => true,
            }
        })?;

        if let Some(resnum) = required_resnum {
            paths.retain(|path| {
                let name = self.model_name_from_path(path);
                match parse_name_range(&name) {
                    Some((start, end)) => resnum >= start && resnum <= end,
                    None => false,
                }
            });
        }

        paths.sort();
        Ok(paths)
    }

    fn list_matching(&self, accept: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
        if !self.model_dir.is_dir() {
            return Err(PipelineError::Init(format!(
                "model directory does not exist: {}",
                self.model_dir.display()
            )));
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.model_dir)? {
            let path = entry?.path();
            let name = self.model_name_from_path(&path);
            if path.extension().map(|e| e == "tgz").unwrap_or(false)
                && !name.ends_with("_error")
                && accept(&name)
            {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    // ========================================================================
    // Locks
    // ========================================================================

    /// One search lock per request key, so two workers never run the same
    /// domain search at once.
    pub async fn search_lock(
        &self,
        target_sequence: &str,
        species_id: &str,
        required_resnum: Option<usize>,
        template_id: Option<&TemplateID>,
    ) -> Result<PathLock> {
        let resnum_part = required_resnum
            .map(|n| n.to_string())
            .unwrap_or_else(|| "None".to_string());
        let template_part = template_id
            .map(|t| t.to_string())
            .unwrap_or_else(|| "None".to_string());
        let lock_name = format!(
            "lock_search_{}_{}_{}_{}",
            sequence_id(target_sequence),
            species_id.to_uppercase(),
            resnum_part,
            template_part
        );
        PathLock::acquire(self.model_dir.join(lock_name)).await
    }

    /// One model lock per model name, taken around build-and-package.
    pub async fn model_lock(&self, model_name: &str) -> Result<PathLock> {
        PathLock::acquire(self.model_dir.join(format!("lock_model_{}", model_name))).await
    }

    // ========================================================================
    // Archive access
    // ========================================================================

    fn read_archive_file(&self, tar_path: &Path, file_name: &str) -> Result<String> {
        let dir_name = self.model_name_from_path(tar_path);
        let wanted = format!("{}/{}", dir_name, file_name);

        let file = std::fs::File::open(tar_path)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().to_string();
            if path == wanted {
                let mut contents = String::new();
                entry.read_to_string(&mut contents)?;
                return Ok(contents);
            }
        }
        Err(PipelineError::Value(format!(
            "no {} in archive {}",
            file_name,
            tar_path.display()
        )))
    }

    /// The archived structure.
    pub fn extract_model(&self, tar_path: &Path) -> Result<String> {
        self.read_archive_file(tar_path, "target.pdb")
    }

    /// The archived alignment, one two-row [`Alignment`] per chain. Rows
    /// are `|`-separated in the fasta file, in template chain order.
    pub fn extract_alignments(&self, tar_path: &Path) -> Result<Vec<Alignment>> {
        let fasta = self.read_archive_file(tar_path, "align.fa")?;
        let records = templar_common::fasta::parse_fasta_str(&fasta)?;

        let rows: Vec<(String, Vec<String>)> = records
            .into_iter()
            .map(|(label, row)| {
                (
                    label,
                    row.split('|').map(|chunk| chunk.to_string()).collect(),
                )
            })
            .collect();

        let chain_count = rows.first().map(|(_, chunks)| chunks.len()).unwrap_or(0);
        let mut alignments = Vec::with_capacity(chain_count);
        for n in 0..chain_count {
            let chain_rows: Vec<(String, String)> = rows
                .iter()
                .filter_map(|(label, chunks)| {
                    chunks.get(n).map(|chunk| (label.clone(), chunk.clone()))
                })
                .collect();
            alignments.push(Alignment::from_records(chain_rows));
        }
        Ok(alignments)
    }

    /// The archived chain-to-target map.
    pub fn extract_selected_targets(&self, tar_path: &Path) -> Result<BTreeMap<String, String>> {
        let contents = self.read_archive_file(tar_path, "selected-targets.txt")?;
        let mut targets = BTreeMap::new();
        for line in contents.lines() {
            if let Some((chain_id, target_id)) = line.split_once(':') {
                targets.insert(chain_id.trim().to_string(), target_id.trim().to_string());
            }
        }
        Ok(targets)
    }

    /// Package a finished work directory as `<name>.tgz` with a single
    /// top-level directory named after the model.
    pub fn package(&self, work_dir: &Path, name: &str, tar_path: &Path) -> Result<()> {
        let file = std::fs::File::create(tar_path)?;
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(name, work_dir)?;
        builder.into_inner()?.finish()?;
        Ok(())
    }
}

/// The pdb id part of the trailing `<pdbid>-<chain>` matches blind to
/// case, the chain id matches exactly.
fn name_matches_template(model_name: &str, template_id: &TemplateID) -> bool {
    let Some((_, last)) = model_name.rsplit_once('_') else {
        return false;
    };
    let Some((pdb_part, chain_part)) = last.split_once('-') else {
        return false;
    };
    pdb_part.to_lowercase() == template_id.pdbid() && chain_part == template_id.chain_id()
}

/// The `<start1>-<end>` part of a model name, both 1-based inclusive.
fn parse_name_range(model_name: &str) -> Option<(usize, usize)> {
    let range_part = model_name.split('_').nth(2)?;
    let (start, end) = range_part.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}
