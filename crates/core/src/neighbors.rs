//! Distance searches between query and reference position sets.

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::pbc::{distance_squared, Pbc};

/// Query sets at least this large are searched in parallel.
const PARALLEL_THRESHOLD: usize = 2048;

/// For each query position, whether any reference lies within `cutoff`.
///
/// Non-periodic searches hash references into cells of at least `cutoff`;
/// periodic searches use minimum-image distances against every reference.
pub fn within_cutoff(
    queries: &[[f64; 3]],
    references: &[[f64; 3]],
    cutoff: f64,
    pbc: Option<&Pbc>,
) -> Vec<bool> {
    if references.is_empty() || queries.is_empty() {
        return vec![false; queries.len()];
    }
    let cutoff_sq = cutoff * cutoff;
    match pbc {
        Some(pbc) => map_queries(queries, |q| {
            references
                .iter()
                .any(|r| pbc.distance_squared(q, r) <= cutoff_sq)
        }),
        None => {
            let grid = CellGrid::new(references, cutoff);
            map_queries(queries, |q| grid.any_within(q, references, cutoff_sq))
        }
    }
}

/// Distance from each query to its nearest reference (`f64::INFINITY` when
/// there are no references).
pub fn nearest_distances(
    queries: &[[f64; 3]],
    references: &[[f64; 3]],
    pbc: Option<&Pbc>,
) -> Vec<f64> {
    map_queries(queries, |q| {
        references
            .iter()
            .map(|r| distance_squared(pbc, q, r))
            .fold(f64::INFINITY, f64::min)
            .sqrt()
    })
}

fn map_queries<T, F>(queries: &[[f64; 3]], f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&[f64; 3]) -> T + Sync,
{
    if queries.len() >= PARALLEL_THRESHOLD {
        queries.par_iter().map(&f).collect()
    } else {
        queries.iter().map(f).collect()
    }
}

/// Cell list keyed by occupied cells, so memory follows the reference count
/// rather than the spatial extent.
struct CellGrid {
    cell_size: f64,
    cells: FxHashMap<(i64, i64, i64), Vec<usize>>,
}

impl CellGrid {
    fn new(references: &[[f64; 3]], cutoff: f64) -> Self {
        // cells must be at least as wide as the cutoff and never empty
        let cell_size = cutoff.max(0.1);
        let mut cells: FxHashMap<(i64, i64, i64), Vec<usize>> = FxHashMap::default();
        for (i, r) in references.iter().enumerate() {
            cells.entry(cell_of(r, cell_size)).or_default().push(i);
        }
        Self { cell_size, cells }
    }

    /// Check the 27 cells around the query.
    fn any_within(&self, q: &[f64; 3], references: &[[f64; 3]], cutoff_sq: f64) -> bool {
        let (cx, cy, cz) = cell_of(q, self.cell_size);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let key = (
                        cx.saturating_add(dx),
                        cy.saturating_add(dy),
                        cz.saturating_add(dz),
                    );
                    let Some(cell) = self.cells.get(&key) else {
                        continue;
                    };
                    if cell
                        .iter()
                        .any(|&j| distance_squared(None, q, &references[j]) <= cutoff_sq)
                    {
                        return true;
                    }
                }
            }
        }
        false
    }
}

fn cell_of(p: &[f64; 3], cell_size: f64) -> (i64, i64, i64) {
    (
        (p[0] / cell_size).floor() as i64,
        (p[1] / cell_size).floor() as i64,
        (p[2] / cell_size).floor() as i64,
    )
}
