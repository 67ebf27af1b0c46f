//! Model-job orchestration
//!
//! The public entry point of the pipeline: `create_model` deduplicates
//! concurrent requests through the search lock, answers from the result
//! store when possible, runs the domain search on a miss, builds a model
//! per accepted alignment (failures stay per-alignment), blacklists broken
//! templates with a single search re-entry, and hands back the archive of
//! the best model by recorded identity.

use crate::blacklist::BlacklistFile;
use crate::caps::{Blacklist, MultiAlign};
use crate::config::PipelineConfig;
use crate::domain::aligner::DomainAligner;
use crate::error::{PipelineError, Result};
use crate::joblog::JobLog;
use crate::models::align::DomainAlignment;
use crate::models::template::TemplateID;
use crate::modeling::composer::AlignmentComposer;
use crate::modeling::engine::StructureEngine;
use crate::modeling::modeler::Modeler;
use crate::services::cache::FileCache;
use crate::services::dssp::DsspStore;
use crate::services::interpro::InterproService;
use crate::services::pdb::{parse_seqres_sequences, PdbService};
use crate::services::uniprot::UniprotService;
use crate::storage::ModelStorage;
use crate::tools::blast::Blaster;
use crate::tools::clustal::ClustalAligner;
use crate::tools::kmad::KmadAligner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use templar_common::fingerprint::sequence_id;
use templar_common::sequence::is_amino_acid_char;
use tracing::{debug, info, warn};

pub struct ModelPipeline {
    domain_aligner: Arc<DomainAligner>,
    modeler: Modeler,
    storage: Arc<ModelStorage>,
    clustal: Arc<dyn MultiAlign>,
    blacklist: Arc<dyn Blacklist>,
}

impl ModelPipeline {
    pub fn new(
        domain_aligner: Arc<DomainAligner>,
        modeler: Modeler,
        storage: Arc<ModelStorage>,
        clustal: Arc<dyn MultiAlign>,
        blacklist: Arc<dyn Blacklist>,
    ) -> Self {
        Self {
            domain_aligner,
            modeler,
            storage,
            clustal,
            blacklist,
        }
    }

    /// Wire the production adapters from one configuration record.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;

        let http_timeout = Duration::from_secs(config.interpro.http_timeout_secs);

        let cache = config.cache_dir.as_ref().map(|dir| {
            Arc::new(FileCache::new(
                dir,
                Duration::from_secs(config.cache_expiration_secs),
                Duration::from_secs(config.cache_lock_timeout_secs),
            ))
        });

        let blast = Arc::new(Blaster::new(&config.blastp_exe));
        let kmad = Arc::new(KmadAligner::new(&config.kmad_exe));
        let clustal: Arc<dyn MultiAlign> = Arc::new(ClustalAligner::new(&config.clustalw_exe));
        let dssp = Arc::new(DsspStore::new(&config.dssp_dir));
        let interpro = Arc::new(InterproService::new(config.interpro.clone(), cache)?);
        let uniprot = Arc::new(UniprotService::new(&config.uniprot_url, http_timeout)?);
        let pdb = Arc::new(PdbService::new(&config.pdb_mirror_url, http_timeout)?);
        let blacklist: Arc<dyn Blacklist> =
            Arc::new(BlacklistFile::new(&config.blacklist_file_path));

        let domain_aligner = Arc::new(DomainAligner::new(
            blast.clone(),
            kmad.clone(),
            dssp.clone(),
            interpro,
            blacklist.clone(),
            config.search.clone(),
        ));

        let composer = AlignmentComposer::new(
            blast,
            kmad,
            clustal.clone(),
            uniprot,
            domain_aligner.clone(),
            &config.uniprot_blast_databank,
        );

        let engine = Arc::new(StructureEngine::new(
            &config.modeler_exe,
            pdb.clone(),
            dssp,
        ));

        let storage = Arc::new(ModelStorage::new(&config.model_dir));
        let modeler = Modeler::new(engine, composer, storage.clone(), pdb);

        Ok(Self::new(
            domain_aligner,
            modeler,
            storage,
            clustal,
            blacklist,
        ))
    }

    pub fn storage(&self) -> &Arc<ModelStorage> {
        &self.storage
    }

    /// Create (or find) the best model for the request. `None` means no
    /// acceptable template exists.
    pub async fn create_model(
        &self,
        target_sequence: &str,
        target_species_id: &str,
        require_resnum: Option<usize>,
        template_id: Option<&TemplateID>,
    ) -> Result<Option<PathBuf>> {
        let target_species_id = target_species_id.to_uppercase();
        let fingerprint = sequence_id(target_sequence);

        // Serialize identical requests: whoever comes second finds the
        // archive instead of redoing the search.
        let _search_lock = self
            .storage
            .search_lock(target_sequence, &target_species_id, require_resnum, template_id)
            .await?;

        let archives = self
            .find_covering_archives(
                target_sequence,
                &target_species_id,
                require_resnum,
                template_id,
            )
            .await?;
        if !archives.is_empty() {
            info!(fingerprint = %fingerprint, "request answered from the result store");
            return Ok(self.select_best_model(&archives)?);
        }

        let log = JobLog::new();
        let domain_alignments = self
            .domain_aligner
            .domain_alignments(target_sequence, require_resnum, template_id, &log)
            .await?;
        info!(
            count = domain_alignments.len(),
            fingerprint = %fingerprint,
            "domain alignments found"
        );
        if domain_alignments.is_empty() {
            return Ok(None);
        }

        let mut built = self
            .build_models(
                target_sequence,
                &target_species_id,
                &domain_alignments,
                require_resnum,
                &log,
            )
            .await;

        // A template error blacklists the template; re-enter the search
        // once so another template can take its place.
        if built.paths.is_empty() && built.template_failed {
            info!("re-entering the domain search after a template error");
            let domain_alignments = self
                .domain_aligner
                .domain_alignments(target_sequence, require_resnum, template_id, &log)
                .await?;
            built = self
                .build_models(
                    target_sequence,
                    &target_species_id,
                    &domain_alignments,
                    require_resnum,
                    &log,
                )
                .await;
        }

        if built.paths.is_empty() {
            return Ok(None);
        }

        match self.select_best_model(&built.paths)? {
            Some(best) => Ok(Some(best)),
            None => Ok(built.paths.first().cloned()),
        }
    }

    async fn build_models(
        &self,
        target_sequence: &str,
        target_species_id: &str,
        domain_alignments: &[DomainAlignment],
        require_resnum: Option<usize>,
        log: &JobLog,
    ) -> BuiltModels {
        let mut built = BuiltModels::default();

        for domain_alignment in domain_alignments {
            match self
                .modeler
                .build_model(
                    target_sequence,
                    target_species_id,
                    domain_alignment,
                    require_resnum,
                    log,
                )
                .await
            {
                Ok(path) => built.paths.push(path),
                Err(PipelineError::Template(message)) => {
                    warn!(
                        template = %domain_alignment.template_id,
                        message, "template unusable, blacklisting"
                    );
                    if let Err(e) = self
                        .blacklist
                        .add(domain_alignment.template_id.pdbid())
                        .await
                    {
                        warn!(error = %e, "cannot update the blacklist");
                    }
                    built.template_failed = true;
                },
                Err(e) => {
                    // One alignment failing never takes its siblings down.
                    warn!(
                        template = %domain_alignment.template_id,
                        range = %domain_alignment.range,
                        error = %e,
                        "model build failed"
                    );
                },
            }
        }

        built
    }

    /// Result-store lookup, verifying required-residue coverage against the
    /// archived structure when a residue is pinned.
    async fn find_covering_archives(
        &self,
        target_sequence: &str,
        target_species_id: &str,
        require_resnum: Option<usize>,
        template_id: Option<&TemplateID>,
    ) -> Result<Vec<PathBuf>> {
        let paths = self.storage.list_models(
            target_sequence,
            target_species_id,
            require_resnum,
            template_id,
        )?;

        let Some(resnum) = require_resnum else {
            return Ok(paths);
        };

        let mut covering = Vec::new();
        for path in paths {
            match self
                .archive_covers_residue(&path, target_sequence, resnum)
                .await
            {
                Ok(true) => covering.push(path),
                Ok(false) => {},
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot verify archive coverage");
                },
            }
        }
        Ok(covering)
    }

    /// An archive covers the residue iff some chain of its structure
    /// aligns a model letter onto the request's residue number.
    async fn archive_covers_residue(
        &self,
        tar_path: &Path,
        target_sequence: &str,
        resnum: usize,
    ) -> Result<bool> {
        let pdb_contents = self.storage.extract_model(tar_path)?;
        for (chain_id, model_sequence) in parse_seqres_sequences(&pdb_contents) {
            if model_sequence.is_empty() {
                continue;
            }
            let alignment = self
                .clustal
                .align(&[
                    ("model".to_string(), model_sequence),
                    ("request".to_string(), target_sequence.to_string()),
                ])
                .await?;

            let model_row = alignment.get("model")?;
            let request_row = alignment.get("request")?;

            let mut n = 0usize;
            for (m, r) in model_row.chars().zip(request_row.chars()) {
                if is_amino_acid_char(r) {
                    n += 1;
                    if n == resnum {
                        if is_amino_acid_char(m) {
                            debug!(chain = %chain_id, resnum, "archive covers the residue");
                            return Ok(true);
                        }
                        break;
                    }
                }
            }
        }
        Ok(false)
    }

    /// Pick the archive whose main-target chain records the highest
    /// target-vs-template identity in its alignment.
    pub fn select_best_model(&self, tar_paths: &[PathBuf]) -> Result<Option<PathBuf>> {
        let mut best_path: Option<PathBuf> = None;
        let mut best_identity = 0.0f64;

        for tar_path in tar_paths {
            let model_name = self.storage.model_name_from_path(tar_path);
            let fingerprint = self.storage.sequence_id_from_name(&model_name);

            let identity = match self.main_chain_identity(tar_path, &fingerprint) {
                Ok(Some(identity)) => identity,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %tar_path.display(), error = %e, "unreadable archive");
                    continue;
                },
            };

            if identity > best_identity {
                best_identity = identity;
                best_path = Some(tar_path.clone());
            }
        }

        Ok(best_path)
    }

    fn main_chain_identity(&self, tar_path: &Path, fingerprint: &str) -> Result<Option<f64>> {
        let pdb_contents = self.storage.extract_model(tar_path)?;
        let chain_order = crate::services::pdb::parse_chain_order(&pdb_contents);

        let chain_alignments = self.storage.extract_alignments(tar_path)?;
        let chain_targets = self.storage.extract_selected_targets(tar_path)?;

        let Some(main_chain_id) = chain_targets
            .iter()
            .find(|(_, target_id)| target_id.as_str() == fingerprint)
            .map(|(chain_id, _)| chain_id.clone())
        else {
            warn!(path = %tar_path.display(), "no main target among the selected targets");
            return Ok(None);
        };

        let Some(chain_index) = chain_order.iter().position(|c| *c == main_chain_id) else {
            warn!(chain = %main_chain_id, path = %tar_path.display(), "main chain not in the structure");
            return Ok(None);
        };

        let Some(alignment) = chain_alignments.get(chain_index) else {
            return Ok(None);
        };
        let labels = alignment.labels();
        if labels.len() != 2 {
            warn!(path = %tar_path.display(), "main chain alignment does not have two rows");
            return Ok(None);
        }
        let identity = alignment.percentage_identity(labels[0], labels[1])?;
        Ok(Some(identity))
    }
}

#[derive(Default)]
struct BuiltModels {
    paths: Vec<PathBuf>,
    template_failed: bool,
}
