//! Shared position computations.
//!
//! The compiler registers one descriptor per distinct (atom set, position
//! type) pair; every consumer of that pair refers to the same descriptor, so
//! the reduction runs at most once per frame however many selections use it.

use std::fmt;
use std::io::{self, Write};

use rustc_hash::FxHashMap;

use rst_core::pbc::Pbc;
use rst_core::positions::{build_blocks, reduce_positions, Completion, PositionType, Positions};
use rst_core::topology::Topology;

use crate::ast::NodeId;
use crate::index::AtomIndexSet;

/// Index of a registered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorId(pub(crate) usize);

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Atom set a descriptor reduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetKey {
    /// Every atom of the system
    All,
    /// Group value of a (canonical) node
    Node(NodeId),
}

impl fmt::Display for SetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetKey::All => f.write_str("all atoms"),
            SetKey::Node(id) => write!(f, "node {}", id),
        }
    }
}

/// One shared position computation.
#[derive(Debug, Clone)]
pub struct PositionDescriptor {
    key: SetKey,
    ptype: PositionType,
    /// Source set never changes between frames
    static_source: bool,
    /// Set the current blocks were built from
    built_from: Option<AtomIndexSet>,
    positions: Positions,
    computed_frame: Option<u64>,
    evaluations: u64,
}

impl PositionDescriptor {
    pub fn key(&self) -> SetKey {
        self.key
    }

    pub fn position_type(&self) -> PositionType {
        self.ptype
    }

    pub fn positions(&self) -> &Positions {
        &self.positions
    }

    /// Number of frames this descriptor was computed for.
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    fn needs_rebuild(&self, set: &AtomIndexSet) -> bool {
        match &self.built_from {
            None => true,
            Some(_) if self.static_source => false,
            Some(_) if self.ptype.completion == Completion::Part => false,
            Some(previous) => previous != set,
        }
    }
}

/// Registry and per-frame cache of position descriptors.
#[derive(Debug, Default)]
pub struct PositionResolver {
    descriptors: Vec<PositionDescriptor>,
    by_key: FxHashMap<(SetKey, PositionType), DescriptorId>,
    frame: u64,
    initialized: bool,
}

impl PositionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every descriptor (before recompiling).
    pub fn clear(&mut self) {
        self.descriptors.clear();
        self.by_key.clear();
        self.initialized = false;
    }

    /// Descriptor for `(key, ptype)`, creating it on first request.
    pub fn register(
        &mut self,
        key: SetKey,
        ptype: PositionType,
        static_source: bool,
    ) -> DescriptorId {
        if let Some(&id) = self.by_key.get(&(key, ptype)) {
            return id;
        }
        let id = DescriptorId(self.descriptors.len());
        self.descriptors.push(PositionDescriptor {
            key,
            ptype,
            static_source,
            built_from: None,
            positions: Positions {
                ptype,
                ..Default::default()
            },
            computed_frame: None,
            evaluations: 0,
        });
        self.by_key.insert((key, ptype), id);
        id
    }

    pub fn find(&self, key: SetKey, ptype: PositionType) -> Option<DescriptorId> {
        self.by_key.get(&(key, ptype)).copied()
    }

    /// One-time setup after compilation.
    pub fn init_evaluation(&mut self, topology: Option<&Topology>) -> Result<(), String> {
        for d in &mut self.descriptors {
            if d.ptype.requires_topology() && topology.is_none() {
                return Err(format!(
                    "position type '{}' requires topology information",
                    d.ptype
                ));
            }
            d.built_from = None;
            d.computed_frame = None;
            d.evaluations = 0;
        }
        self.initialized = true;
        log::debug!("initialized {} position descriptors", self.descriptors.len());
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Start a new frame; every cached position becomes stale.
    pub fn init_frame(&mut self) {
        self.frame += 1;
    }

    /// Positions of `id` for the current frame, computed on first request.
    pub fn compute(
        &mut self,
        id: DescriptorId,
        set: &AtomIndexSet,
        topology: Option<&Topology>,
        coords: &[[f64; 3]],
        pbc: Option<&Pbc>,
    ) -> Result<&Positions, String> {
        let frame = self.frame;
        let d = &mut self.descriptors[id.0];
        if d.computed_frame != Some(frame) {
            if d.needs_rebuild(set) {
                d.positions.blocks = build_blocks(d.ptype, topology, set.as_slice())?;
                d.built_from = Some(set.clone());
            }
            reduce_positions(
                d.ptype,
                &d.positions.blocks,
                topology,
                coords,
                pbc,
                &mut d.positions.coords,
            )?;
            d.computed_frame = Some(frame);
            d.evaluations += 1;
        }
        Ok(&d.positions)
    }

    /// Positions computed for the current frame.
    pub fn get(&self, id: DescriptorId) -> Option<&Positions> {
        let d = self.descriptors.get(id.0)?;
        (d.computed_frame == Some(self.frame)).then_some(&d.positions)
    }

    pub fn descriptor(&self, id: DescriptorId) -> &PositionDescriptor {
        &self.descriptors[id.0]
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DescriptorId, &PositionDescriptor)> {
        self.descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (DescriptorId(i), d))
    }

    /// Render every descriptor.
    pub fn print_tree<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "Position descriptors ({}):", self.descriptors.len())?;
        for (id, d) in self.iter() {
            writeln!(
                w,
                "  {} {} of {} ({}, {} evaluations)",
                id,
                d.ptype,
                d.key,
                if d.static_source { "static" } else { "dynamic" },
                d.evaluations
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> Topology {
        let names = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        Topology::from_residues(names, vec!["R1".into(), "R2".into()], vec![0, 2]).unwrap()
    }

    #[test]
    fn test_register_deduplicates() {
        let mut r = PositionResolver::new();
        let ptype: PositionType = "res_cog".parse().unwrap();
        let a = r.register(SetKey::Node(NodeId(3)), ptype, true);
        let b = r.register(SetKey::Node(NodeId(3)), ptype, true);
        let c = r.register(SetKey::Node(NodeId(3)), PositionType::ATOM, true);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn test_computed_once_per_frame() {
        let top = topology();
        let mut r = PositionResolver::new();
        let ptype: PositionType = "res_cog".parse().unwrap();
        let id = r.register(SetKey::All, ptype, true);
        r.init_evaluation(Some(&top)).unwrap();
        let set = AtomIndexSet::all(4);
        let mut coords = vec![[0.0; 3], [2.0, 0.0, 0.0], [4.0, 0.0, 0.0], [6.0, 0.0, 0.0]];

        r.init_frame();
        assert!(r.get(id).is_none());
        r.compute(id, &set, Some(&top), &coords, None).unwrap();
        let p = r.compute(id, &set, Some(&top), &coords, None).unwrap();
        assert_eq!(p.coords, vec![[1.0, 0.0, 0.0], [5.0, 0.0, 0.0]]);
        assert_eq!(r.descriptor(id).evaluations(), 1);

        coords[0] = [2.0, 0.0, 0.0];
        r.init_frame();
        let p = r.compute(id, &set, Some(&top), &coords, None).unwrap();
        assert_eq!(p.coords[0], [2.0, 0.0, 0.0]);
        assert_eq!(r.descriptor(id).evaluations(), 2);
    }

    #[test]
    fn test_dynamic_source_rebuilds_blocks() {
        let top = topology();
        let mut r = PositionResolver::new();
        let ptype: PositionType = "res_cog".parse().unwrap();
        let id = r.register(SetKey::Node(NodeId(0)), ptype, false);
        r.init_evaluation(Some(&top)).unwrap();
        let coords = vec![[0.0; 3]; 4];

        r.init_frame();
        let p = r
            .compute(id, &AtomIndexSet::from_unsorted(vec![0]), Some(&top), &coords, None)
            .unwrap();
        assert_eq!(p.len(), 1);
        r.init_frame();
        let p = r
            .compute(id, &AtomIndexSet::from_unsorted(vec![0, 3]), Some(&top), &coords, None)
            .unwrap();
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn test_requires_topology() {
        let mut r = PositionResolver::new();
        r.register(SetKey::All, "mol_com".parse().unwrap(), true);
        assert!(r.init_evaluation(None).is_err());
    }
}
