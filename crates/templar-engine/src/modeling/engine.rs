//! Production modeling-engine adapter
//!
//! Loads the template structure from the PDB, parses its protein chains and
//! atom coordinates to answer the geometry queries, takes per-chain
//! secondary structure from DSSP (coil when unavailable), and shells out to
//! the configured modeling executable for the actual run. The executable is
//! expected to oligomerize the template to its biological assembly itself,
//! read the `|`-separated alignment file and write `target.pdb`; it reports
//! failure through an `errorexit.txt` in the working directory.

use crate::caps::{SecondaryStructureStore, StructureSource};
use crate::error::{PipelineError, Result};
use crate::models::template::TemplateID;
use crate::modeling::context::{ModelingEngine, TemplateContext, TemplateResidue};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use templar_common::aminoacid::AminoAcid;
use tokio::process::Command;
use tracing::{debug, warn};

const INTERACTING_CHAIN_DISTANCE: f64 = 4.5;
const INTERACTING_RESIDUE_DISTANCE: f64 = 6.0;

pub struct StructureEngine {
    modeler_exe: PathBuf,
    pdb: Arc<dyn StructureSource>,
    dssp: Arc<dyn SecondaryStructureStore>,
}

impl StructureEngine {
    pub fn new(
        modeler_exe: impl Into<PathBuf>,
        pdb: Arc<dyn StructureSource>,
        dssp: Arc<dyn SecondaryStructureStore>,
    ) -> Self {
        Self {
            modeler_exe: modeler_exe.into(),
            pdb,
            dssp,
        }
    }
}

#[async_trait]
impl ModelingEngine for StructureEngine {
    async fn load_template(&self, pdbid: &str) -> Result<Box<dyn TemplateContext>> {
        let pdbid = pdbid.to_lowercase();
        let contents = self.pdb.pdb_contents(&pdbid).await?;

        let mut chains = parse_protein_chains(&contents);
        if chains.is_empty() {
            return Err(PipelineError::Template(format!(
                "no protein chains in {}",
                pdbid
            )));
        }
        join_duplicate_chains(&mut chains);

        // Secondary structure per chain; coil when dssp disagrees or lacks
        // the entry.
        for chain in &mut chains {
            let template_id = TemplateID::new(&pdbid, chain.id.clone());
            let sequence: String = chain.residues.iter().map(|r| r.amino_acid.letter).collect();
            chain.secstr = match self.dssp.sequence(&template_id).await {
                Ok(dssp_sequence) if dssp_sequence == sequence => {
                    self.dssp.secondary_structure(&template_id).await?
                },
                _ => {
                    debug!(template = %template_id, "no matching dssp chain, using coil");
                    "C".repeat(sequence.len())
                },
            };
        }

        Ok(Box::new(PdbTemplateContext {
            pdbid,
            modeler_exe: self.modeler_exe.clone(),
            template_contents: contents,
            chains,
        }))
    }
}

// ============================================================================
// Parsed template state
// ============================================================================

struct ParsedChain {
    id: String,
    residues: Vec<TemplateResidue>,
    /// All atom positions of the chain, for the chain-contact query
    atoms: Vec<[f64; 3]>,
    secstr: String,
}

pub struct PdbTemplateContext {
    pdbid: String,
    modeler_exe: PathBuf,
    template_contents: String,
    chains: Vec<ParsedChain>,
}

impl PdbTemplateContext {
    fn chain(&self, chain_id: &str) -> Result<&ParsedChain> {
        self.chains
            .iter()
            .find(|c| c.id == chain_id)
            .ok_or_else(|| {
                PipelineError::Value(format!("no chain {} in {}", chain_id, self.pdbid))
            })
    }
}

#[async_trait]
impl TemplateContext for PdbTemplateContext {
    fn pdbid(&self) -> &str {
        &self.pdbid
    }

    fn chain_ids(&self) -> Vec<String> {
        self.chains.iter().map(|c| c.id.clone()).collect()
    }

    fn sequence(&self, chain_id: &str) -> Result<String> {
        Ok(self
            .chain(chain_id)?
            .residues
            .iter()
            .map(|r| r.amino_acid.letter)
            .collect())
    }

    fn secondary_structure(&self, chain_id: &str) -> Result<String> {
        Ok(self.chain(chain_id)?.secstr.clone())
    }

    fn residues(&self, chain_id: &str) -> Result<Vec<TemplateResidue>> {
        Ok(self.chain(chain_id)?.residues.clone())
    }

    fn delete_chain(&mut self, chain_id: &str) -> Result<()> {
        let before = self.chains.len();
        self.chains.retain(|c| c.id != chain_id);
        if self.chains.len() == before {
            return Err(PipelineError::Value(format!(
                "no chain {} in {}",
                chain_id, self.pdbid
            )));
        }
        Ok(())
    }

    fn interacting_chains(&self, chain_id: &str) -> Result<Vec<String>> {
        let chain = self.chain(chain_id)?;
        let mut interacting = Vec::new();
        for other in &self.chains {
            if other.id == chain.id {
                continue;
            }
            if chains_in_contact(&chain.atoms, &other.atoms, INTERACTING_CHAIN_DISTANCE) {
                interacting.push(other.id.clone());
            }
        }
        Ok(interacting)
    }

    fn residue_interacts(&self, residue: &TemplateResidue, others: &[TemplateResidue]) -> bool {
        let Some(ca) = residue.ca else {
            return false;
        };
        let limit = INTERACTING_RESIDUE_DISTANCE * INTERACTING_RESIDUE_DISTANCE;
        others
            .iter()
            .filter_map(|r| r.ca)
            .any(|other_ca| squared_distance(&ca, &other_ca) < limit)
    }

    async fn run_modeling(&mut self, work_dir: &Path, alignment_path: &Path) -> Result<PathBuf> {
        let template_path = work_dir.join("template.pdb");
        std::fs::write(&template_path, &self.template_contents)?;

        let output = Command::new(&self.modeler_exe)
            .arg("--template")
            .arg(&template_path)
            .arg("--alignments")
            .arg(alignment_path)
            .arg("--oligomerize")
            .arg("--result")
            .arg("target.pdb")
            .current_dir(work_dir)
            .output()
            .await
            .map_err(|e| {
                PipelineError::Init(format!(
                    "cannot run modeling engine at {}: {}",
                    self.modeler_exe.display(),
                    e
                ))
            })?;

        let error_path = work_dir.join("errorexit.txt");
        if error_path.is_file() {
            let message = std::fs::read_to_string(&error_path)?;
            return Err(PipelineError::ModelRun(message));
        }
        if !output.status.success() {
            return Err(PipelineError::ModelRun(format!(
                "modeling engine exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let model_path = work_dir.join("target.pdb");
        if !model_path.is_file() {
            return Err(PipelineError::ModelRun(
                "modeling engine produced no structure".to_string(),
            ));
        }
        Ok(model_path)
    }
}

// ============================================================================
// ATOM record parsing
// ============================================================================

fn parse_protein_chains(pdb_str: &str) -> Vec<ParsedChain> {
    let mut chains: Vec<ParsedChain> = Vec::new();

    for line in pdb_str.lines() {
        if line.starts_with("ENDMDL") {
            break; // first model only
        }
        if !line.starts_with("ATOM") {
            continue;
        }
        let bytes = line.as_bytes();
        if bytes.len() < 54 {
            continue;
        }

        let atom_name = line[12..16].trim().to_string();
        let resname = line[17..20].trim();
        let chain_id = (bytes[21] as char).to_string();
        let resnum = line[22..27].trim().to_string(); // includes insertion code

        let amino_acid = resolve_residue(resname, &atom_name);
        let Some(amino_acid) = amino_acid else {
            continue; // solvent or other heteroatoms
        };

        let (Ok(x), Ok(y), Ok(z)) = (
            line[30..38].trim().parse::<f64>(),
            line[38..46].trim().parse::<f64>(),
            line[46..54].trim().parse::<f64>(),
        ) else {
            warn!(line = %line, "unparseable atom coordinates");
            continue;
        };
        let position = [x, y, z];

        // One segment per run of ATOM records with the same chain id;
        // segments sharing an id get joined afterwards.
        if chains.last().map(|c| c.id != chain_id).unwrap_or(true) {
            chains.push(ParsedChain {
                id: chain_id.clone(),
                residues: Vec::new(),
                atoms: Vec::new(),
                secstr: String::new(),
            });
        }
        if let Some(chain) = chains.last_mut() {
            chain.atoms.push(position);
            let is_new_residue = chain
                .residues
                .last()
                .map(|r| r.number != resnum)
                .unwrap_or(true);
            if is_new_residue {
                chain.residues.push(TemplateResidue {
                    number: resnum,
                    amino_acid,
                    ca: None,
                });
            }
            if atom_name == "CA" {
                if let Some(residue) = chain.residues.last_mut() {
                    residue.ca = Some(position);
                }
            }
        }
    }

    chains
}

/// Resolve a residue name to an amino acid; placeholder residues get the
/// substitutions the modeling engine applies (UNK -> ALA/GLY, CAS -> CYS).
fn resolve_residue(resname: &str, atom_name: &str) -> Option<AminoAcid> {
    match resname {
        "UNK" => {
            let code = if atom_name == "CB" { "ALA" } else { "GLY" };
            Some(AminoAcid::from_three_letter_code(code))
        },
        "CAS" => Some(AminoAcid::from_three_letter_code("CYS")),
        _ => {
            let aa = AminoAcid::from_three_letter_code(resname);
            if aa.is_unknown() {
                None
            } else {
                Some(aa)
            }
        },
    }
}

/// Merge chains that share an id (split chains in the deposited entry).
fn join_duplicate_chains(chains: &mut Vec<ParsedChain>) {
    let mut joined: Vec<ParsedChain> = Vec::new();
    for chain in chains.drain(..) {
        match joined.iter_mut().find(|c| c.id == chain.id) {
            Some(existing) => {
                existing.residues.extend(chain.residues);
                existing.atoms.extend(chain.atoms);
            },
            None => joined.push(chain),
        }
    }
    *chains = joined;
}

fn squared_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

fn chains_in_contact(atoms1: &[[f64; 3]], atoms2: &[[f64; 3]], distance: f64) -> bool {
    let limit = distance * distance;
    atoms1
        .iter()
        .any(|a| atoms2.iter().any(|b| squared_distance(a, b) < limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom_line(serial: u32, name: &str, resname: &str, chain: char, resnum: u32, x: f64) -> String {
        format!(
            "ATOM  {:>5} {:<4} {:<3} {}{:>4}    {:>8.3}{:>8.3}{:>8.3}  1.00  0.00           C",
            serial, name, resname, chain, resnum, x, 0.0, 0.0
        )
    }

    fn two_chain_pdb() -> String {
        let mut lines = vec![
            atom_line(1, "N", "THR", 'A', 1, 0.0),
            atom_line(2, "CA", "THR", 'A', 1, 1.0),
            atom_line(3, "CA", "CYS", 'A', 2, 2.0),
            atom_line(4, "CA", "GLY", 'B', 1, 4.0),
            atom_line(5, "CA", "GLY", 'C', 1, 100.0),
            "HETATM    6  O   HOH A 100       0.000   0.000   0.000  1.00  0.00           O"
                .to_string(),
        ];
        lines.push("END".to_string());
        lines.join("\n")
    }

    #[test]
    fn test_parse_protein_chains() {
        let chains = parse_protein_chains(&two_chain_pdb());
        assert_eq!(chains.len(), 3);
        assert_eq!(chains[0].id, "A");
        assert_eq!(chains[0].residues.len(), 2);
        assert_eq!(chains[0].residues[0].amino_acid.letter, 'T');
        assert!(chains[0].residues[0].ca.is_some());
        assert_eq!(chains[0].atoms.len(), 3);
    }

    #[test]
    fn test_contact_queries() {
        let chains = parse_protein_chains(&two_chain_pdb());
        let context = PdbTemplateContext {
            pdbid: "1tst".to_string(),
            modeler_exe: PathBuf::from("/bin/true"),
            template_contents: String::new(),
            chains,
        };
        // B is 2 Å from the nearest A atom; C is ~96 Å away
        assert_eq!(context.interacting_chains("A").unwrap(), vec!["B"]);
        assert_eq!(context.interacting_chains("C").unwrap(), Vec::<String>::new());

        let a_residues = context.residues("A").unwrap();
        let b_residues = context.residues("B").unwrap();
        let c_residues = context.residues("C").unwrap();
        assert!(context.residue_interacts(&b_residues[0], &a_residues));
        assert!(!context.residue_interacts(&c_residues[0], &a_residues));
    }

    #[test]
    fn test_unknown_residues_substituted() {
        assert_eq!(resolve_residue("UNK", "CA").unwrap().letter, 'G');
        assert_eq!(resolve_residue("UNK", "CB").unwrap().letter, 'A');
        assert_eq!(resolve_residue("CAS", "CA").unwrap().letter, 'C');
        assert!(resolve_residue("HOH", "O").is_none());
    }

    #[test]
    fn test_delete_chain() {
        let chains = parse_protein_chains(&two_chain_pdb());
        let mut context = PdbTemplateContext {
            pdbid: "1tst".to_string(),
            modeler_exe: PathBuf::from("/bin/true"),
            template_contents: String::new(),
            chains,
        };
        context.delete_chain("B").unwrap();
        assert_eq!(context.chain_ids(), vec!["A", "C"]);
        assert!(context.delete_chain("B").is_err());
    }
}
