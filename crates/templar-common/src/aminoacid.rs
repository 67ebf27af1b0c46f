//! The coded amino-acid alphabet
//!
//! Twenty standard residues plus selenocysteine (SEC/U) and pyrrolysine
//! (PYL/O), with an `Other`/X sentinel for everything else. Lookups accept
//! upper- or lowercase codes; unknown three-letter codes resolve to `Other`.

/// A coded amino acid: three-letter code, one-letter code, full name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AminoAcid {
    pub code: &'static str,
    pub letter: char,
    pub name: &'static str,
}

const AMINO_ACIDS: &[AminoAcid] = &[
    AminoAcid { code: "ALA", letter: 'A', name: "Alanine" },
    AminoAcid { code: "ARG", letter: 'R', name: "Arginine" },
    AminoAcid { code: "ASN", letter: 'N', name: "Asparagine" },
    AminoAcid { code: "ASP", letter: 'D', name: "Aspartic Acid" },
    AminoAcid { code: "CYS", letter: 'C', name: "Cysteine" },
    AminoAcid { code: "GLU", letter: 'E', name: "Glutamic Acid" },
    AminoAcid { code: "GLN", letter: 'Q', name: "Glutamine" },
    AminoAcid { code: "GLY", letter: 'G', name: "Glycine" },
    AminoAcid { code: "HIS", letter: 'H', name: "Histidine" },
    AminoAcid { code: "ILE", letter: 'I', name: "Isoleucine" },
    AminoAcid { code: "LEU", letter: 'L', name: "Leucine" },
    AminoAcid { code: "LYS", letter: 'K', name: "Lysine" },
    AminoAcid { code: "MET", letter: 'M', name: "Methionine" },
    AminoAcid { code: "PHE", letter: 'F', name: "Phenylalanine" },
    AminoAcid { code: "PRO", letter: 'P', name: "Proline" },
    AminoAcid { code: "SER", letter: 'S', name: "Serine" },
    AminoAcid { code: "THR", letter: 'T', name: "Threonine" },
    AminoAcid { code: "TRP", letter: 'W', name: "Tryptophan" },
    AminoAcid { code: "TYR", letter: 'Y', name: "Tyrosine" },
    AminoAcid { code: "VAL", letter: 'V', name: "Valine" },
    // Non standard
    AminoAcid { code: "SEC", letter: 'U', name: "Selenocysteine" },
    AminoAcid { code: "PYL", letter: 'O', name: "Pyrrolysine" },
    // Unknown
    AminoAcid { code: "OTH", letter: 'X', name: "Other" },
];

impl AminoAcid {
    /// Look up by three-letter code; unknown codes map to `Other`.
    pub fn from_three_letter_code(code: &str) -> AminoAcid {
        let upper = code.to_uppercase();
        AMINO_ACIDS
            .iter()
            .find(|aa| aa.code == upper)
            .copied()
            .unwrap_or(AMINO_ACIDS[AMINO_ACIDS.len() - 1])
    }

    /// Look up by one-letter code; unknown letters map to `X`.
    pub fn from_one_letter_code(letter: char) -> AminoAcid {
        let upper = letter.to_ascii_uppercase();
        AMINO_ACIDS
            .iter()
            .find(|aa| aa.letter == upper)
            .copied()
            .unwrap_or(AMINO_ACIDS[AMINO_ACIDS.len() - 1])
    }

    pub fn is_unknown(&self) -> bool {
        self.letter == 'X'
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_lookup() {
        assert_eq!(AminoAcid::from_three_letter_code("ALA").letter, 'A');
        assert_eq!(AminoAcid::from_three_letter_code("trp").letter, 'W');
        assert_eq!(AminoAcid::from_one_letter_code('k').code, "LYS");
    }

    #[test]
    fn test_nonstandard_lookup() {
        assert_eq!(AminoAcid::from_three_letter_code("SEC").letter, 'U');
        assert_eq!(AminoAcid::from_three_letter_code("PYL").letter, 'O');
    }

    #[test]
    fn test_unknown_maps_to_other() {
        let aa = AminoAcid::from_three_letter_code("FOO");
        assert!(aa.is_unknown());
        assert_eq!(aa.name, "Other");
        assert!(AminoAcid::from_one_letter_code('?').is_unknown());
    }
}
