//! Molecular topology used by selections: atom names and types, residue and
//! molecule blocks, masses and charges.

/// Atom/residue/molecule description of a system.
///
/// Residues and molecules are stored as contiguous atom ranges given by the
/// first atom index of each block (0-based, ascending).
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Number of atoms
    pub n_atoms: usize,
    /// Atom names (trimmed)
    pub atom_names: Vec<String>,
    /// Force-field atom type names (trimmed)
    pub atom_types: Vec<String>,
    /// Partial charges in elementary charge units
    pub charges: Vec<f64>,
    /// Atomic masses
    pub masses: Vec<f64>,
    /// Residue labels
    pub residue_labels: Vec<String>,
    /// First atom index (0-based) of each residue
    pub residue_pointers: Vec<usize>,
    /// First atom index (0-based) of each molecule
    pub molecule_pointers: Vec<usize>,
}

impl Topology {
    /// Build a topology from per-atom names and residue blocks.
    ///
    /// Masses default to 1.0, charges to 0.0, types to the atom name, and the
    /// whole system is treated as a single molecule.
    pub fn from_residues(
        atom_names: Vec<String>,
        residue_labels: Vec<String>,
        residue_pointers: Vec<usize>,
    ) -> Result<Self, String> {
        let n_atoms = atom_names.len();
        let topology = Self {
            n_atoms,
            atom_types: atom_names.clone(),
            atom_names,
            charges: vec![0.0; n_atoms],
            masses: vec![1.0; n_atoms],
            residue_labels,
            residue_pointers,
            molecule_pointers: if n_atoms > 0 { vec![0] } else { Vec::new() },
        };
        topology.validate()?;
        Ok(topology)
    }

    /// Replace per-atom masses.
    pub fn with_masses(mut self, masses: Vec<f64>) -> Result<Self, String> {
        if masses.len() != self.n_atoms {
            return Err(format!(
                "Mass count ({}) doesn't match atom count ({})",
                masses.len(),
                self.n_atoms
            ));
        }
        self.masses = masses;
        Ok(self)
    }

    /// Replace per-atom charges.
    pub fn with_charges(mut self, charges: Vec<f64>) -> Result<Self, String> {
        if charges.len() != self.n_atoms {
            return Err(format!(
                "Charge count ({}) doesn't match atom count ({})",
                charges.len(),
                self.n_atoms
            ));
        }
        self.charges = charges;
        Ok(self)
    }

    /// Replace molecule blocks.
    pub fn with_molecules(mut self, molecule_pointers: Vec<usize>) -> Result<Self, String> {
        self.molecule_pointers = molecule_pointers;
        self.validate()?;
        Ok(self)
    }

    /// Number of residues.
    pub fn n_residues(&self) -> usize {
        self.residue_pointers.len()
    }

    /// Number of molecules.
    pub fn n_molecules(&self) -> usize {
        self.molecule_pointers.len()
    }

    /// Check block pointers and per-atom array lengths.
    pub fn validate(&self) -> Result<(), String> {
        let per_atom = [
            ("ATOM_NAME", self.atom_names.len()),
            ("ATOM_TYPE", self.atom_types.len()),
            ("CHARGE", self.charges.len()),
            ("MASS", self.masses.len()),
        ];
        for (label, len) in per_atom {
            if len != self.n_atoms {
                return Err(format!(
                    "{} has {} entries, expected {}",
                    label, len, self.n_atoms
                ));
            }
        }
        if self.residue_labels.len() != self.residue_pointers.len() {
            return Err(format!(
                "{} residue labels for {} residue pointers",
                self.residue_labels.len(),
                self.residue_pointers.len()
            ));
        }
        check_pointers("residue", &self.residue_pointers, self.n_atoms)?;
        check_pointers("molecule", &self.molecule_pointers, self.n_atoms)
    }

    /// Atom range `[start, end)` of a residue.
    pub fn residue_range(&self, residue: usize) -> std::ops::Range<usize> {
        block_range(&self.residue_pointers, residue, self.n_atoms)
    }

    /// Atom range `[start, end)` of a molecule.
    pub fn molecule_range(&self, molecule: usize) -> std::ops::Range<usize> {
        block_range(&self.molecule_pointers, molecule, self.n_atoms)
    }

    /// Get the residue index for each atom.
    pub fn atom_residue_indices(&self) -> Vec<usize> {
        block_indices(&self.residue_pointers, self.n_atoms)
    }

    /// Get the molecule index for each atom.
    pub fn atom_molecule_indices(&self) -> Vec<usize> {
        block_indices(&self.molecule_pointers, self.n_atoms)
    }

    /// Residue containing `atom`.
    pub fn residue_of(&self, atom: usize) -> usize {
        block_of(&self.residue_pointers, atom)
    }

    /// Molecule containing `atom`.
    pub fn molecule_of(&self, atom: usize) -> usize {
        block_of(&self.molecule_pointers, atom)
    }
}

fn check_pointers(label: &str, pointers: &[usize], n_atoms: usize) -> Result<(), String> {
    if n_atoms > 0 && pointers.first() != Some(&0) {
        return Err(format!("First {} must start at atom 0", label));
    }
    for pair in pointers.windows(2) {
        if pair[1] <= pair[0] {
            return Err(format!(
                "{} pointers must be strictly increasing ({} then {})",
                label, pair[0], pair[1]
            ));
        }
    }
    if let Some(&last) = pointers.last() {
        if last >= n_atoms {
            return Err(format!(
                "{} pointer {} out of range (0-{})",
                label,
                last,
                n_atoms.saturating_sub(1)
            ));
        }
    }
    Ok(())
}

fn block_range(pointers: &[usize], block: usize, n_atoms: usize) -> std::ops::Range<usize> {
    let start = pointers[block];
    let end = pointers.get(block + 1).copied().unwrap_or(n_atoms);
    start..end
}

fn block_indices(pointers: &[usize], n_atoms: usize) -> Vec<usize> {
    let mut result = vec![0usize; n_atoms];
    for block in 0..pointers.len() {
        let range = block_range(pointers, block, n_atoms);
        result[range].fill(block);
    }
    result
}

fn block_of(pointers: &[usize], atom: usize) -> usize {
    pointers.partition_point(|&start| start <= atom).saturating_sub(1)
}
