//! Selection roots and the handles callers use to read results.

use rst_core::positions::{PositionType, Positions};

use crate::ast::{NodeId, RootKind};
use crate::index::AtomIndexSet;

/// Opaque handle to a selection of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelectionHandle(pub(crate) usize);

/// Latest evaluation result and trajectory accumulators.
#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    pub(crate) atoms: AtomIndexSet,
    pub(crate) positions: Positions,
    pub(crate) frames: usize,
    pub(crate) total_size: usize,
    pub(crate) average_size: Option<f64>,
    pub(crate) average_fraction: Option<f64>,
}

/// One parsed statement: a selection or a bound variable.
#[derive(Debug, Clone)]
pub struct SelectionRoot {
    pub(crate) node: NodeId,
    pub(crate) kind: RootKind,
    pub(crate) name: String,
    pub(crate) text: String,
    pub(crate) reference_type: Option<PositionType>,
    pub(crate) output_type: Option<PositionType>,
    pub(crate) requires_topology: bool,
    pub(crate) state: SelectionState,
}

impl SelectionRoot {
    pub(crate) fn new(node: NodeId, kind: RootKind, name: String, text: String) -> Self {
        Self {
            node,
            kind,
            name,
            text,
            reference_type: None,
            output_type: None,
            requires_topology: false,
            state: SelectionState::default(),
        }
    }

    pub fn is_variable(&self) -> bool {
        self.kind == RootKind::Variable
    }
}

/// Read-only view of one selection, borrowed from its collection.
#[derive(Debug, Clone, Copy)]
pub struct SelectionView<'a> {
    pub(crate) root: &'a SelectionRoot,
    pub(crate) output_type: PositionType,
}

impl<'a> SelectionView<'a> {
    /// Label, or the selection text when none was given.
    pub fn name(&self) -> &'a str {
        &self.root.name
    }

    /// Source text of the statement.
    pub fn text(&self) -> &'a str {
        &self.root.text
    }

    /// Atoms selected in the last evaluated frame.
    pub fn atoms(&self) -> &'a AtomIndexSet {
        &self.root.state.atoms
    }

    /// Output positions of the last evaluated frame.
    pub fn positions(&self) -> &'a Positions {
        &self.root.state.positions
    }

    pub fn output_type(&self) -> PositionType {
        self.output_type
    }

    pub fn requires_topology(&self) -> bool {
        self.root.requires_topology
    }

    /// Frames evaluated so far.
    pub fn frames(&self) -> usize {
        self.root.state.frames
    }

    /// Mean number of selected atoms, after `evaluate_final`.
    pub fn average_size(&self) -> Option<f64> {
        self.root.state.average_size
    }

    /// Mean fraction of all atoms selected, after `evaluate_final`.
    pub fn average_fraction(&self) -> Option<f64> {
        self.root.state.average_fraction
    }
}
