//! Residue and atom name tables for the convenience keywords.

/// Standard amino acid residue names (3-letter codes).
pub const PROTEIN_RESIDUES: &[&str] = &[
    "ALA", "ARG", "ASN", "ASP", "CYS", "CYX", "GLN", "GLU", "GLY", "HIS", "HID", "HIE", "HIP",
    "ILE", "LEU", "LYS", "MET", "PHE", "PRO", "SER", "THR", "TRP", "TYR", "VAL",
    // N-terminal variants
    "NALA", "NARG", "NASN", "NASP", "NCYS", "NCYX", "NGLN", "NGLU", "NGLY", "NHIS", "NHID", "NHIE",
    "NHIP", "NILE", "NLEU", "NLYS", "NMET", "NPHE", "NPRO", "NSER", "NTHR", "NTRP", "NTYR", "NVAL",
    // C-terminal variants
    "CALA", "CARG", "CASN", "CASP", "CCYS", "CCYX", "CGLN", "CGLU", "CGLY", "CHIS", "CHID", "CHIE",
    "CHIP", "CILE", "CLEU", "CLYS", "CMET", "CPHE", "CPRO", "CSER", "CTHR", "CTRP", "CTYR", "CVAL",
    // ACE/NME caps
    "ACE", "NME", "NHE",
];

/// Water residue names.
pub const WATER_RESIDUES: &[&str] = &[
    "WAT", "HOH", "SOL", "TIP3", "T3P", "SPC", "TIP4", "TP4", "TIP5", "T5P",
];

/// Backbone atom names.
pub const BACKBONE_ATOMS: &[&str] = &["N", "CA", "C", "O", "H", "HA"];

/// Atoms lighter than this count as hydrogens.
pub const HYDROGEN_MASS_LIMIT: f64 = 1.1;

fn contains_ignore_case(table: &[&str], name: &str) -> bool {
    let trimmed = name.trim();
    table.iter().any(|&r| r.eq_ignore_ascii_case(trimmed))
}

pub fn is_protein_residue(name: &str) -> bool {
    contains_ignore_case(PROTEIN_RESIDUES, name)
}

pub fn is_water_residue(name: &str) -> bool {
    contains_ignore_case(WATER_RESIDUES, name)
}

pub fn is_backbone_atom(name: &str) -> bool {
    contains_ignore_case(BACKBONE_ATOMS, name)
}
