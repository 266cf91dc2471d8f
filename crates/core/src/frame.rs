//! A single trajectory timestep.

use crate::pbc::Pbc;

/// Coordinates of every atom at one timestep plus optional unit cell.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// Frame index within the trajectory
    pub step: usize,
    /// Simulation time
    pub time: f64,
    /// Atom positions
    pub positions: Vec<[f64; 3]>,
    /// Unit cell `[a, b, c, alpha, beta, gamma]` when periodic
    pub unit_cell: Option<[f64; 6]>,
}

impl Frame {
    pub fn new(positions: Vec<[f64; 3]>) -> Self {
        Self {
            positions,
            ..Default::default()
        }
    }

    pub fn with_step(mut self, step: usize, time: f64) -> Self {
        self.step = step;
        self.time = time;
        self
    }

    pub fn with_unit_cell(mut self, unit_cell: [f64; 6]) -> Self {
        self.unit_cell = Some(unit_cell);
        self
    }

    pub fn n_atoms(&self) -> usize {
        self.positions.len()
    }

    /// Periodic box described by the unit cell, if any.
    pub fn pbc(&self) -> Result<Option<Pbc>, String> {
        self.unit_cell.map(Pbc::from_unit_cell).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_pbc() {
        let frame = Frame::new(vec![[0.0; 3]; 2]);
        assert!(frame.pbc().unwrap().is_none());
        let frame = frame.with_unit_cell([3.0, 3.0, 3.0, 90.0, 90.0, 90.0]);
        assert!(frame.pbc().unwrap().is_some());
        assert_eq!(frame.n_atoms(), 2);
    }
}
