//! Position types and the kernels that reduce atom sets to positions.
//!
//! A position type decides how a set of atoms becomes coordinates: one
//! position per atom, or one center of mass/geometry per residue or molecule.
//! Residue and molecule reductions come in three flavours:
//! - `whole_` (the default): every atom of each touched block contributes
//! - `part_`: only atoms of the set contribute, fixed when blocks are built
//! - `dyn_`: only atoms of the set contribute, rebuilt whenever the set changes

use std::fmt;
use std::str::FromStr;

use crate::pbc::Pbc;
use crate::topology::Topology;

/// Unit of reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Atom,
    Residue,
    Molecule,
}

/// Weighting used for residue/molecule centers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Center {
    Mass,
    Geometry,
}

/// Which atoms of a block contribute to its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Completion {
    Whole,
    Part,
    Dynamic,
}

/// Policy reducing a set of atoms to representative positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PositionType {
    pub block: BlockKind,
    pub center: Center,
    pub completion: Completion,
}

impl PositionType {
    /// One position per atom.
    pub const ATOM: PositionType = PositionType {
        block: BlockKind::Atom,
        center: Center::Geometry,
        completion: Completion::Whole,
    };

    /// Every accepted position type name.
    pub const NAMES: &'static [&'static str] = &[
        "atom",
        "res_com",
        "res_cog",
        "mol_com",
        "mol_cog",
        "whole_res_com",
        "whole_res_cog",
        "whole_mol_com",
        "whole_mol_cog",
        "part_res_com",
        "part_res_cog",
        "part_mol_com",
        "part_mol_cog",
        "dyn_res_com",
        "dyn_res_cog",
        "dyn_mol_com",
        "dyn_mol_cog",
    ];

    pub fn is_atom(&self) -> bool {
        self.block == BlockKind::Atom
    }

    /// Residue and molecule reductions need block information.
    pub fn requires_topology(&self) -> bool {
        !self.is_atom()
    }

    /// Blocks must be rebuilt whenever the input set changes.
    pub fn is_dynamic(&self) -> bool {
        self.completion == Completion::Dynamic
    }
}

impl Default for PositionType {
    fn default() -> Self {
        Self::ATOM
    }
}

impl FromStr for PositionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        if name == "atom" {
            return Ok(Self::ATOM);
        }
        let (completion, rest) = if let Some(rest) = name.strip_prefix("whole_") {
            (Completion::Whole, rest)
        } else if let Some(rest) = name.strip_prefix("part_") {
            (Completion::Part, rest)
        } else if let Some(rest) = name.strip_prefix("dyn_") {
            (Completion::Dynamic, rest)
        } else {
            (Completion::Whole, name.as_str())
        };
        let (block, center) = match rest {
            "res_com" => (BlockKind::Residue, Center::Mass),
            "res_cog" => (BlockKind::Residue, Center::Geometry),
            "mol_com" => (BlockKind::Molecule, Center::Mass),
            "mol_cog" => (BlockKind::Molecule, Center::Geometry),
            _ => {
                return Err(format!(
                    "Unknown position type '{}' (expected one of: {})",
                    s,
                    Self::NAMES.join(", ")
                ))
            }
        };
        Ok(Self {
            block,
            center,
            completion,
        })
    }
}

impl fmt::Display for PositionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match (self.block, self.center) {
            (BlockKind::Atom, _) => return f.write_str("atom"),
            (BlockKind::Residue, Center::Mass) => "res_com",
            (BlockKind::Residue, Center::Geometry) => "res_cog",
            (BlockKind::Molecule, Center::Mass) => "mol_com",
            (BlockKind::Molecule, Center::Geometry) => "mol_cog",
        };
        match self.completion {
            Completion::Whole => f.write_str(base),
            Completion::Part => write!(f, "part_{}", base),
            Completion::Dynamic => write!(f, "dyn_{}", base),
        }
    }
}

/// Grouping of contributing atoms into position blocks (CSR layout).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionBlocks {
    /// Atom, residue or molecule index of each block
    pub ids: Vec<usize>,
    /// `offsets[i]..offsets[i + 1]` indexes `atoms` for block `i`
    pub offsets: Vec<usize>,
    /// Contributing atoms, ascending
    pub atoms: Vec<usize>,
}

impl PositionBlocks {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn block_atoms(&self, block: usize) -> &[usize] {
        &self.atoms[self.offsets[block]..self.offsets[block + 1]]
    }

    /// Block containing `atom`, if it contributes.
    pub fn block_of_atom(&self, atom: usize) -> Option<usize> {
        let k = self.atoms.binary_search(&atom).ok()?;
        Some(self.offsets.partition_point(|&o| o <= k) - 1)
    }
}

/// Group a sorted atom list into blocks for `ptype`.
pub fn build_blocks(
    ptype: PositionType,
    topology: Option<&Topology>,
    atoms: &[usize],
) -> Result<PositionBlocks, String> {
    let mut blocks = PositionBlocks {
        ids: Vec::new(),
        offsets: vec![0],
        atoms: Vec::with_capacity(atoms.len()),
    };

    if ptype.is_atom() {
        blocks.ids.extend_from_slice(atoms);
        blocks.atoms.extend_from_slice(atoms);
        blocks.offsets.extend(1..=atoms.len());
        return Ok(blocks);
    }

    let topology = topology.ok_or_else(|| {
        format!("Position type '{}' requires topology information", ptype)
    })?;
    let block_of = |atom: usize| match ptype.block {
        BlockKind::Molecule => topology.molecule_of(atom),
        _ => topology.residue_of(atom),
    };

    let mut i = 0;
    while i < atoms.len() {
        let id = block_of(atoms[i]);
        let range = match ptype.block {
            BlockKind::Molecule => topology.molecule_range(id),
            _ => topology.residue_range(id),
        };
        let mut j = i;
        while j < atoms.len() && atoms[j] < range.end {
            j += 1;
        }
        match ptype.completion {
            Completion::Whole => blocks.atoms.extend(range),
            Completion::Part | Completion::Dynamic => blocks.atoms.extend_from_slice(&atoms[i..j]),
        }
        blocks.ids.push(id);
        blocks.offsets.push(blocks.atoms.len());
        i = j;
    }
    Ok(blocks)
}

/// Compute one position per block into `out`.
///
/// Periodic images are made whole relative to the first atom of each block
/// before averaging.
pub fn reduce_positions(
    ptype: PositionType,
    blocks: &PositionBlocks,
    topology: Option<&Topology>,
    coords: &[[f64; 3]],
    pbc: Option<&Pbc>,
    out: &mut Vec<[f64; 3]>,
) -> Result<(), String> {
    out.clear();
    out.reserve(blocks.len());
    if let Some(&last) = blocks.atoms.last() {
        if last >= coords.len() {
            return Err(format!(
                "Atom index {} out of range for {} coordinates",
                last,
                coords.len()
            ));
        }
    }

    if ptype.is_atom() {
        out.extend(blocks.atoms.iter().map(|&a| coords[a]));
        return Ok(());
    }

    let masses = match (ptype.center, topology) {
        (Center::Mass, Some(top)) => Some(top.masses.as_slice()),
        (Center::Mass, None) => {
            return Err(format!("Position type '{}' requires atom masses", ptype))
        }
        (Center::Geometry, _) => None,
    };

    for block in 0..blocks.len() {
        let atoms = blocks.block_atoms(block);
        let origin = coords[atoms[0]];
        let mut sum = [0.0f64; 3];
        let mut total = 0.0f64;
        for &a in atoms {
            let w = masses.map_or(1.0, |m| m[a]);
            let p = match pbc {
                Some(pbc) => {
                    let d = pbc.dx(&origin, &coords[a]);
                    [origin[0] + d[0], origin[1] + d[1], origin[2] + d[2]]
                }
                None => coords[a],
            };
            sum[0] += w * p[0];
            sum[1] += w * p[1];
            sum[2] += w * p[2];
            total += w;
        }
        if total.abs() < 1e-12 {
            // massless block, fall back to the geometric center
            let n = atoms.len() as f64;
            let mut center = [0.0; 3];
            for &a in atoms {
                let d = pbc.map_or_else(
                    || {
                        [
                            coords[a][0] - origin[0],
                            coords[a][1] - origin[1],
                            coords[a][2] - origin[2],
                        ]
                    },
                    |pbc| pbc.dx(&origin, &coords[a]),
                );
                center[0] += d[0] / n;
                center[1] += d[1] / n;
                center[2] += d[2] / n;
            }
            out.push([
                origin[0] + center[0],
                origin[1] + center[1],
                origin[2] + center[2],
            ]);
        } else {
            out.push([sum[0] / total, sum[1] / total, sum[2] / total]);
        }
    }
    Ok(())
}

/// Reduced positions together with the blocks they came from.
#[derive(Debug, Clone, Default)]
pub struct Positions {
    pub ptype: PositionType,
    pub blocks: PositionBlocks,
    pub coords: Vec<[f64; 3]>,
}

impl Positions {
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Position of the block `atom` contributes to.
    pub fn position_of_atom(&self, atom: usize) -> Option<&[f64; 3]> {
        self.blocks
            .block_of_atom(atom)
            .map(|block| &self.coords[block])
    }
}
