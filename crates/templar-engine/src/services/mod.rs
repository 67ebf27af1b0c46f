//! External service adapters: DSSP files, InterProScan, UniProt, the PDB
//! and the shared result cache.

pub mod cache;
pub mod dssp;
pub mod interpro;
pub mod pdb;
pub mod uniprot;
