//! AMBER prmtop (topology) file loader.
//!
//! Reads the AMBER7 `%FLAG` sections a selection engine needs:
//! - Atom names, types, masses and charges (converted to elementary charge)
//! - Residue labels and pointers
//! - Molecule blocks from `ATOMS_PER_MOLECULE`, or from bond connectivity

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::topology::Topology;

/// AMBER charge to elementary charge: q_e = q_amber / 18.2223
pub const AMBER_CHARGE_FACTOR: f64 = 18.2223;

/// Section reader for FLAG/FORMAT blocks.
struct PrmtopSections {
    sections: HashMap<String, Vec<String>>,
}

impl PrmtopSections {
    fn read<R: BufRead>(reader: R) -> Result<Self, String> {
        let mut sections = HashMap::new();
        let mut current_flag: Option<String> = None;
        let mut current_data: Vec<String> = Vec::new();

        for line in reader.lines() {
            let line = line.map_err(|e| format!("Failed to read line: {}", e))?;

            if let Some(flag_content) = line.strip_prefix("%FLAG") {
                if let Some(flag) = current_flag.take() {
                    sections.insert(flag, std::mem::take(&mut current_data));
                }
                current_flag = Some(flag_content.trim().to_string());
            } else if line.starts_with('%') {
                // %FORMAT, %VERSION and %COMMENT carry no data
                continue;
            } else if current_flag.is_some() {
                current_data.push(line);
            }
        }
        if let Some(flag) = current_flag {
            sections.insert(flag, current_data);
        }

        Ok(Self { sections })
    }

    fn lines(&self, flag: &str) -> Result<&[String], String> {
        self.sections
            .get(flag)
            .map(|v| v.as_slice())
            .ok_or_else(|| format!("Missing section: {}", flag))
    }

    fn integers(&self, flag: &str) -> Result<Vec<i64>, String> {
        self.lines(flag)?
            .iter()
            .flat_map(|line| line.split_whitespace())
            .map(|word| {
                word.parse::<i64>()
                    .map_err(|e| format!("Failed to parse integer in {}: {}", flag, e))
            })
            .collect()
    }

    fn floats(&self, flag: &str) -> Result<Vec<f64>, String> {
        self.lines(flag)?
            .iter()
            .flat_map(|line| line.split_whitespace())
            .map(|word| {
                word.parse::<f64>()
                    .map_err(|e| format!("Failed to parse float in {}: {}", flag, e))
            })
            .collect()
    }

    /// Fixed-width string fields (atom names, residue labels).
    fn strings(&self, flag: &str, width: usize) -> Result<Vec<String>, String> {
        let mut values = Vec::new();
        for line in self.lines(flag)? {
            let mut pos = 0;
            while pos < line.len() {
                let end = (pos + width).min(line.len());
                let field = line.get(pos..end).unwrap_or("").trim();
                if !field.is_empty() || end - pos == width {
                    values.push(field.to_string());
                }
                pos = end;
            }
        }
        Ok(values)
    }
}

/// Parse an AMBER prmtop file into a [`Topology`].
pub fn parse_prmtop<P: AsRef<Path>>(path: P) -> Result<Topology, String> {
    let file =
        File::open(path.as_ref()).map_err(|e| format!("Failed to open prmtop file: {}", e))?;
    read_prmtop(BufReader::new(file))
}

/// Read prmtop content from any buffered reader.
pub fn read_prmtop<R: BufRead>(reader: R) -> Result<Topology, String> {
    let sections = PrmtopSections::read(reader)?;

    let pointers = sections.integers("POINTERS")?;
    if pointers.len() < 12 {
        return Err("POINTERS section too short".to_string());
    }
    if pointers[0] < 0 || pointers[11] < 0 {
        return Err(format!(
            "POINTERS contains negative values: n_atoms={}, n_residues={}",
            pointers[0], pointers[11]
        ));
    }
    let n_atoms = pointers[0] as usize;
    let n_residues = pointers[11] as usize;

    let atom_names = take_exact(sections.strings("ATOM_NAME", 4)?, n_atoms, "ATOM_NAME")?;
    let atom_types = match sections.strings("AMBER_ATOM_TYPE", 4) {
        Ok(types) => take_exact(types, n_atoms, "AMBER_ATOM_TYPE")?,
        Err(_) => atom_names.clone(),
    };
    let charges: Vec<f64> = take_exact(sections.floats("CHARGE")?, n_atoms, "CHARGE")?
        .into_iter()
        .map(|q| q / AMBER_CHARGE_FACTOR)
        .collect();
    let masses = match sections.floats("MASS") {
        Ok(masses) => take_exact(masses, n_atoms, "MASS")?,
        Err(_) => vec![0.0; n_atoms],
    };
    let residue_labels = take_exact(
        sections.strings("RESIDUE_LABEL", 4)?,
        n_residues,
        "RESIDUE_LABEL",
    )?;

    // Residue pointers are 1-based in the file
    let raw_pointers = take_exact(
        sections.integers("RESIDUE_POINTER")?,
        n_residues,
        "RESIDUE_POINTER",
    )?;
    let mut residue_pointers = Vec::with_capacity(n_residues);
    for (i, &x) in raw_pointers.iter().enumerate() {
        if x < 1 {
            return Err(format!(
                "Invalid RESIDUE_POINTER at position {}: {} (must be >= 1)",
                i, x
            ));
        }
        residue_pointers.push((x - 1) as usize);
    }

    let molecule_pointers = match sections.integers("ATOMS_PER_MOLECULE") {
        Ok(sizes) => pointers_from_sizes(&sizes, n_atoms)?,
        Err(_) => {
            log::debug!("no ATOMS_PER_MOLECULE section, deriving molecules from bonds");
            molecules_from_bonds(&sections, n_atoms)
        }
    };

    let topology = Topology {
        n_atoms,
        atom_names,
        atom_types,
        charges,
        masses,
        residue_labels,
        residue_pointers,
        molecule_pointers,
    };
    topology.validate()?;
    log::info!(
        "read prmtop: {} atoms, {} residues, {} molecules",
        topology.n_atoms,
        topology.n_residues(),
        topology.n_molecules()
    );
    Ok(topology)
}

fn take_exact<T>(mut values: Vec<T>, n: usize, flag: &str) -> Result<Vec<T>, String> {
    if values.len() < n {
        return Err(format!(
            "{} has {} entries, expected {}",
            flag,
            values.len(),
            n
        ));
    }
    values.truncate(n);
    Ok(values)
}

fn pointers_from_sizes(sizes: &[i64], n_atoms: usize) -> Result<Vec<usize>, String> {
    let mut pointers = Vec::with_capacity(sizes.len());
    let mut start = 0usize;
    for &size in sizes {
        if size < 1 {
            return Err(format!("Invalid ATOMS_PER_MOLECULE entry: {}", size));
        }
        pointers.push(start);
        start += size as usize;
    }
    if start != n_atoms {
        return Err(format!(
            "ATOMS_PER_MOLECULE covers {} atoms, expected {}",
            start, n_atoms
        ));
    }
    Ok(pointers)
}

/// Derive contiguous molecule blocks from the bond graph.
///
/// A molecule boundary is placed before atom `i` when no bond crosses from
/// `[0, i)` into `[i, n)`.
fn molecules_from_bonds(sections: &PrmtopSections, n_atoms: usize) -> Vec<usize> {
    if n_atoms == 0 {
        return Vec::new();
    }
    // reach[i] = furthest atom bonded to any atom <= i
    let mut reach: Vec<usize> = (0..n_atoms).collect();
    for flag in ["BONDS_INC_HYDROGEN", "BONDS_WITHOUT_HYDROGEN"] {
        let Ok(raw) = sections.integers(flag) else {
            continue;
        };
        // Triplets: atom_i*3, atom_j*3, bond_type_index
        for chunk in raw.chunks_exact(3) {
            if chunk[0] < 0 || chunk[1] < 0 {
                continue;
            }
            let a = (chunk[0] / 3) as usize;
            let b = (chunk[1] / 3) as usize;
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            if hi < n_atoms {
                reach[lo] = reach[lo].max(hi);
            }
        }
    }

    let mut pointers = vec![0];
    let mut furthest = 0;
    for i in 0..n_atoms - 1 {
        furthest = furthest.max(reach[i]);
        if furthest <= i {
            pointers.push(i + 1);
        }
    }
    pointers
}
