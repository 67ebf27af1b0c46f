//! Model building for one chosen domain alignment
//!
//! Serializes on the model lock, re-checks the store, loads the template
//! into an engine context, composes the per-chain alignment set, runs the
//! engine in a scoped work directory and packages the outputs. When the
//! chosen alignment already *is* the template (100 % identity over the full
//! chain) the engine run is skipped and the raw template is packaged.

use crate::caps::StructureSource;
use crate::error::{PipelineError, Result};
use crate::joblog::JobLog;
use crate::models::align::{DomainAlignment, TargetTemplateAlignment};
use crate::modeling::composer::AlignmentComposer;
use crate::modeling::context::{ModelingEngine, TemplateContext};
use crate::services::pdb::parse_chain_order;
use crate::storage::ModelStorage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use templar_common::fingerprint::sequence_id;
use tracing::{debug, info, warn};

/// Engine failure signature that warrants keeping the working files around
/// in an error archive.
const REPORTABLE_ERROR_MARKER: &str = "reward for reporting";

pub struct Modeler {
    engine: Arc<dyn ModelingEngine>,
    composer: AlignmentComposer,
    storage: Arc<ModelStorage>,
    pdb: Arc<dyn StructureSource>,
}

impl Modeler {
    pub fn new(
        engine: Arc<dyn ModelingEngine>,
        composer: AlignmentComposer,
        storage: Arc<ModelStorage>,
        pdb: Arc<dyn StructureSource>,
    ) -> Self {
        Self {
            engine,
            composer,
            storage,
            pdb,
        }
    }

    /// Build (or find) the model archive for one domain alignment.
    pub async fn build_model(
        &self,
        main_target_sequence: &str,
        target_species_id: &str,
        main_domain_alignment: &DomainAlignment,
        require_resnum: Option<usize>,
        log: &JobLog,
    ) -> Result<PathBuf> {
        let template_id = main_domain_alignment.template_id.clone();
        let model_name = self.storage.model_name(
            main_target_sequence,
            target_species_id,
            &main_domain_alignment.range,
            Some(&template_id),
        );
        let tar_path = self.storage.tar_path_from_name(&model_name);

        let _lock = self.storage.model_lock(&model_name).await?;

        // Another worker may have built it while we waited on the lock.
        if tar_path.is_file() {
            debug!(model = %model_name, "archive already present");
            return Ok(tar_path);
        }

        let mut context = self.engine.load_template(template_id.pdbid()).await?;

        // If the template already is the target, no modeling is needed.
        if main_domain_alignment.template_sequence()
            == context.sequence(template_id.chain_id())?
            && main_domain_alignment.percentage_identity() >= 100.0
        {
            info!(model = %model_name, "target equals template, wrapping template");
            let mut main_domain_alignment = main_domain_alignment.clone();
            main_domain_alignment.alignment.target_id =
                Some(sequence_id(main_target_sequence));
            return self
                .wrap_template(&model_name, &tar_path, &main_domain_alignment, log)
                .await;
        }

        let mut chain_alignments = self
            .composer
            .compose(
                context.as_ref(),
                main_target_sequence,
                target_species_id,
                main_domain_alignment,
                require_resnum,
                log,
            )
            .await?;

        // Chains the composition never reached, and chains whose target side
        // came out fully gapped, are dropped from the template.
        for chain_id in context.chain_ids() {
            let empty = chain_alignments
                .get(&chain_id)
                .map(|a| a.target_sequence().is_empty())
                .unwrap_or(true);
            if empty {
                debug!(chain = %chain_id, "deleting chain without target coverage");
                chain_alignments.remove(&chain_id);
                context.delete_chain(&chain_id)?;
            }
        }

        debug!(
            chains = context.chain_ids().len(),
            model = %model_name,
            "final alignment set composed"
        );

        self.model_run(
            context.as_mut(),
            &model_name,
            &tar_path,
            &chain_alignments,
            log,
        )
        .await
    }

    /// Degenerate handoff: package the raw template as the model.
    async fn wrap_template(
        &self,
        model_name: &str,
        tar_path: &Path,
        main_domain_alignment: &DomainAlignment,
        log: &JobLog,
    ) -> Result<PathBuf> {
        let template_id = &main_domain_alignment.template_id;
        let work_dir = tempfile::tempdir()?;

        templar_common::fasta::write_fasta(
            work_dir.path().join("align.fa"),
            &[
                (
                    "target".to_string(),
                    main_domain_alignment.alignment.target_alignment.clone(),
                ),
                (
                    template_id.to_string(),
                    main_domain_alignment.alignment.template_alignment.clone(),
                ),
            ],
        )?;

        let pdb_contents = self.pdb.pdb_contents(template_id.pdbid()).await?;
        std::fs::write(work_dir.path().join("target.pdb"), pdb_contents)?;

        let mut selected_targets = BTreeMap::new();
        if let Some(target_id) = &main_domain_alignment.alignment.target_id {
            selected_targets.insert(template_id.chain_id().to_string(), target_id.clone());
        }
        write_selected_targets(&selected_targets, &work_dir.path().join("selected-targets.txt"))?;

        log.add(format!("wrapped template {} as the model", template_id));
        log.write_to(work_dir.path().join("model.log"))?;

        self.storage.package(work_dir.path(), model_name, tar_path)?;
        Ok(tar_path.to_path_buf())
    }

    /// Run the engine and package the result archive.
    async fn model_run(
        &self,
        context: &mut dyn TemplateContext,
        model_name: &str,
        tar_path: &Path,
        chain_alignments: &BTreeMap<String, TargetTemplateAlignment>,
        log: &JobLog,
    ) -> Result<PathBuf> {
        let work_dir = tempfile::tempdir()?;
        let align_path = work_dir.path().join("align.fa");

        write_model_alignment_fasta(context, chain_alignments, &align_path)?;

        let run_result = context.run_modeling(work_dir.path(), &align_path).await;
        let model_path = match run_result {
            Ok(model_path) => model_path,
            Err(PipelineError::ModelRun(message)) => {
                if message.contains(REPORTABLE_ERROR_MARKER) {
                    let error_tar_path = self.storage.error_tar_path_from_name(model_name);
                    warn!(model = %model_name, "archiving failed model run");
                    log.add(format!("model run failed: {}", message));
                    let _ = log.write_to(work_dir.path().join("model.log"));
                    self.storage
                        .package(work_dir.path(), &format!("{}_error", model_name), &error_tar_path)?;
                }
                return Err(PipelineError::ModelRun(message));
            },
            Err(e) => return Err(e),
        };

        let model_contents = std::fs::read_to_string(&model_path)?;
        verify_model_chains(&model_contents, context, chain_alignments)?;

        let selected_targets: BTreeMap<String, String> = chain_alignments
            .iter()
            .filter_map(|(chain_id, alignment)| {
                alignment
                    .target_id
                    .clone()
                    .map(|target_id| (chain_id.clone(), target_id))
            })
            .collect();
        write_selected_targets(&selected_targets, &work_dir.path().join("selected-targets.txt"))?;

        // The archive carries target.pdb at the top level of the model dir.
        if model_path != work_dir.path().join("target.pdb") {
            std::fs::copy(&model_path, work_dir.path().join("target.pdb"))?;
        }

        log.add(format!("model run finished for {}", model_name));
        log.write_to(work_dir.path().join("model.log"))?;

        self.storage.package(work_dir.path(), model_name, tar_path)?;
        info!(model = %model_name, "model archived");
        Ok(tar_path.to_path_buf())
    }
}

/// Write the `|`-joined two-row alignment fasta driving the engine run.
/// Both rows list the chains in the template's final chain order.
pub fn write_model_alignment_fasta(
    context: &dyn TemplateContext,
    chain_alignments: &BTreeMap<String, TargetTemplateAlignment>,
    path: &Path,
) -> Result<()> {
    let chain_order = context.chain_ids();

    let mut target_row = String::new();
    let mut template_row = String::new();
    let mut n = 0;
    for chain_id in &chain_order {
        let Some(alignment) = chain_alignments.get(chain_id) else {
            continue;
        };
        if n > 0 {
            target_row.push('|');
            template_row.push('|');
        }
        target_row.push_str(&alignment.target_alignment);
        template_row.push_str(&alignment.template_alignment);
        n += 1;
    }

    templar_common::fasta::write_fasta(
        path,
        &[
            ("target".to_string(), target_row),
            (context.pdbid().to_string(), template_row),
        ],
    )?;
    Ok(())
}

fn write_selected_targets(targets: &BTreeMap<String, String>, path: &Path) -> Result<()> {
    let mut contents = String::new();
    for (chain_id, target_id) in targets {
        contents.push_str(&format!("{}: {}\n", chain_id, target_id));
    }
    std::fs::write(path, contents)?;
    Ok(())
}

/// A produced structure must carry one chain per aligned template chain.
/// Chain-count mismatches mean the engine silently dropped or invented
/// chains and the model cannot be trusted.
fn verify_model_chains(
    model_contents: &str,
    context: &dyn TemplateContext,
    chain_alignments: &BTreeMap<String, TargetTemplateAlignment>,
) -> Result<()> {
    let model_chains = parse_chain_order(model_contents);
    let expected = context
        .chain_ids()
        .into_iter()
        .filter(|chain_id| chain_alignments.contains_key(chain_id))
        .count();
    if model_chains.len() != expected {
        return Err(PipelineError::ModelRun(format!(
            "produced structure has {} chains, alignment has {}",
            model_chains.len(),
            expected
        )));
    }
    Ok(())
}
