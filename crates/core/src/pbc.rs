//! Periodic boundary conditions for rectangular and triclinic boxes.

use nalgebra::{Matrix3, Vector3};

/// Box shape classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PbcKind {
    Rectangular,
    Triclinic,
}

/// Periodic box with box vectors stored as matrix columns.
#[derive(Debug, Clone)]
pub struct Pbc {
    kind: PbcKind,
    cell: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl Pbc {
    /// Rectangular box from edge lengths.
    pub fn rectangular(lengths: [f64; 3]) -> Result<Self, String> {
        if lengths.iter().any(|&l| !(l > 0.0)) {
            return Err(format!("Box lengths must be positive, got {:?}", lengths));
        }
        let cell = Matrix3::from_diagonal(&Vector3::new(lengths[0], lengths[1], lengths[2]));
        Self::from_cell(cell, PbcKind::Rectangular)
    }

    /// Box from unit cell parameters `[a, b, c, alpha, beta, gamma]`
    /// (lengths plus angles in degrees), as stored in DCD frames.
    pub fn from_unit_cell(cell: [f64; 6]) -> Result<Self, String> {
        let [a, b, c, alpha, beta, gamma] = cell;
        let is_right = |angle: f64| (angle - 90.0).abs() < 1e-6;
        if is_right(alpha) && is_right(beta) && is_right(gamma) {
            return Self::rectangular([a, b, c]);
        }

        let (alpha, beta, gamma) = (alpha.to_radians(), beta.to_radians(), gamma.to_radians());
        let bx = b * gamma.cos();
        let by = b * gamma.sin();
        let cx = c * beta.cos();
        let cy = c * (alpha.cos() - beta.cos() * gamma.cos()) / gamma.sin();
        let cz_sq = c * c - cx * cx - cy * cy;
        if cz_sq <= 0.0 {
            return Err(format!("Degenerate unit cell {:?}", cell));
        }
        let matrix = Matrix3::new(a, bx, cx, 0.0, by, cy, 0.0, 0.0, cz_sq.sqrt());
        Self::from_cell(matrix, PbcKind::Triclinic)
    }

    fn from_cell(cell: Matrix3<f64>, kind: PbcKind) -> Result<Self, String> {
        let inverse = cell
            .try_inverse()
            .ok_or_else(|| "Box matrix is singular".to_string())?;
        Ok(Self {
            kind,
            cell,
            inverse,
        })
    }

    pub fn kind(&self) -> PbcKind {
        self.kind
    }

    /// Box edge lengths.
    pub fn lengths(&self) -> [f64; 3] {
        [
            self.cell.column(0).norm(),
            self.cell.column(1).norm(),
            self.cell.column(2).norm(),
        ]
    }

    /// Minimum-image displacement `to - from`.
    pub fn dx(&self, from: &[f64; 3], to: &[f64; 3]) -> [f64; 3] {
        let d = Vector3::new(to[0] - from[0], to[1] - from[1], to[2] - from[2]);
        let mut frac = self.inverse * d;
        frac.apply(|f| *f -= f.round());
        let mut image = self.cell * frac;

        if self.kind == PbcKind::Triclinic {
            // Rounding in fractional space is not exact for skewed cells;
            // search the neighbouring images.
            let mut best = image;
            for i in -1..=1 {
                for j in -1..=1 {
                    for k in -1..=1 {
                        let shift = self.cell * Vector3::new(i as f64, j as f64, k as f64);
                        let candidate = image + shift;
                        if candidate.norm_squared() < best.norm_squared() {
                            best = candidate;
                        }
                    }
                }
            }
            image = best;
        }
        [image[0], image[1], image[2]]
    }

    /// Squared minimum-image distance.
    pub fn distance_squared(&self, a: &[f64; 3], b: &[f64; 3]) -> f64 {
        let d = self.dx(a, b);
        d[0] * d[0] + d[1] * d[1] + d[2] * d[2]
    }
}

/// Squared distance, periodic when a box is given.
#[inline(always)]
pub fn distance_squared(pbc: Option<&Pbc>, a: &[f64; 3], b: &[f64; 3]) -> f64 {
    match pbc {
        Some(pbc) => pbc.distance_squared(a, b),
        None => {
            let dx = a[0] - b[0];
            let dy = a[1] - b[1];
            let dz = a[2] - b[2];
            dx * dx + dy * dy + dz * dz
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangular_minimum_image() {
        let pbc = Pbc::rectangular([10.0, 10.0, 10.0]).unwrap();
        let d = pbc.dx(&[1.0, 0.0, 0.0], &[9.0, 0.0, 0.0]);
        assert!((d[0] + 2.0).abs() < 1e-10);
        assert!((pbc.distance_squared(&[0.5, 0.5, 0.5], &[9.5, 9.5, 9.5]) - 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_unit_cell_right_angles_is_rectangular() {
        let pbc = Pbc::from_unit_cell([5.0, 6.0, 7.0, 90.0, 90.0, 90.0]).unwrap();
        assert_eq!(pbc.kind(), PbcKind::Rectangular);
        let lengths = pbc.lengths();
        assert!((lengths[1] - 6.0).abs() < 1e-10);
    }

    #[test]
    fn test_triclinic_lengths() {
        let pbc = Pbc::from_unit_cell([5.0, 5.0, 5.0, 90.0, 90.0, 60.0]).unwrap();
        assert_eq!(pbc.kind(), PbcKind::Triclinic);
        let lengths = pbc.lengths();
        for l in lengths {
            assert!((l - 5.0).abs() < 1e-9);
        }
        // b vector end point is a lattice point, so the image distance is zero
        let b_end = [2.5, 5.0 * (60.0f64).to_radians().sin(), 0.0];
        assert!(pbc.distance_squared(&[0.0, 0.0, 0.0], &b_end) < 1e-12);
    }

    #[test]
    fn test_rejects_bad_box() {
        assert!(Pbc::rectangular([0.0, 1.0, 1.0]).is_err());
    }

    #[test]
    fn test_plain_distance() {
        assert!((distance_squared(None, &[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]) - 3.0).abs() < 1e-12);
    }
}
