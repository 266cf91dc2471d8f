//! Atom index sets and externally supplied index groups.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Result, SelectionError};

/// Ordered, duplicate-free atom indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AtomIndexSet(Vec<usize>);

impl AtomIndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every atom in `[0, n)`.
    pub fn all(n: usize) -> Self {
        Self((0..n).collect())
    }

    /// Sort and deduplicate arbitrary indices.
    pub fn from_unsorted(mut indices: Vec<usize>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        Self(indices)
    }

    /// Indices of the `true` entries.
    pub fn from_mask(mask: &[bool]) -> Self {
        Self(
            mask.iter()
                .enumerate()
                .filter_map(|(i, &b)| if b { Some(i) } else { None })
                .collect(),
        )
    }

    /// Refill from indices produced in ascending order.
    pub(crate) fn assign_sorted<I: IntoIterator<Item = usize>>(&mut self, indices: I) {
        self.0.clear();
        self.0.extend(indices);
        debug_assert!(self.0.windows(2).all(|w| w[0] < w[1]));
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, atom: usize) -> bool {
        self.0.binary_search(&atom).is_ok()
    }

    pub fn iter(&self) -> std::iter::Copied<std::slice::Iter<'_, usize>> {
        self.0.iter().copied()
    }

    /// Largest index, if any.
    pub fn last(&self) -> Option<usize> {
        self.0.last().copied()
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut out = Self(Vec::with_capacity(self.len() + other.len()));
        self.union_into(other, &mut out);
        out
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let mut out = Self(Vec::with_capacity(self.len().min(other.len())));
        self.intersection_into(other, &mut out);
        out
    }

    /// Atoms of `self` not in `other`.
    pub fn difference(&self, other: &Self) -> Self {
        let mut out = Self(Vec::with_capacity(self.len()));
        self.difference_into(other, &mut out);
        out
    }

    /// Atoms in exactly one of the two sets.
    pub fn symmetric_difference(&self, other: &Self) -> Self {
        let mut out = Self(Vec::with_capacity(self.len() + other.len()));
        self.symmetric_difference_into(other, &mut out);
        out
    }

    /// Atoms of `[0, n)` not in `self`.
    pub fn complement(&self, n: usize) -> Self {
        let mut out = Self(Vec::with_capacity(n.saturating_sub(self.len())));
        self.complement_into(n, &mut out);
        out
    }

    /// Merge walk over both sets; `keep(in_a, in_b)` decides membership.
    fn merge_into(&self, other: &Self, out: &mut Self, keep: impl Fn(bool, bool) -> bool) {
        let (a, b) = (&self.0, &other.0);
        out.0.clear();
        let (mut i, mut j) = (0, 0);
        while i < a.len() || j < b.len() {
            let (atom, in_a, in_b) = match (a.get(i), b.get(j)) {
                (Some(&x), Some(&y)) if x == y => (x, true, true),
                (Some(&x), Some(&y)) if x < y => (x, true, false),
                (Some(&x), None) => (x, true, false),
                (_, Some(&y)) => (y, false, true),
                (None, None) => break,
            };
            if in_a {
                i += 1;
            }
            if in_b {
                j += 1;
            }
            if keep(in_a, in_b) {
                out.0.push(atom);
            }
        }
    }

    /// Like [`union`](Self::union), reusing the storage of `out`.
    pub fn union_into(&self, other: &Self, out: &mut Self) {
        self.merge_into(other, out, |a, b| a || b);
    }

    pub fn intersection_into(&self, other: &Self, out: &mut Self) {
        self.merge_into(other, out, |a, b| a && b);
    }

    pub fn difference_into(&self, other: &Self, out: &mut Self) {
        self.merge_into(other, out, |a, b| a && !b);
    }

    pub fn symmetric_difference_into(&self, other: &Self, out: &mut Self) {
        self.merge_into(other, out, |a, b| a != b);
    }

    pub fn complement_into(&self, n: usize, out: &mut Self) {
        out.0.clear();
        let mut j = 0;
        for a in 0..n {
            if j < self.0.len() && self.0[j] == a {
                j += 1;
            } else {
                out.0.push(a);
            }
        }
    }

    pub fn into_vec(self) -> Vec<usize> {
        self.0
    }
}

impl FromIterator<usize> for AtomIndexSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        Self::from_unsorted(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a AtomIndexSet {
    type Item = usize;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, usize>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A named atom group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexGroup {
    pub name: String,
    pub atoms: AtomIndexSet,
}

/// Ordered collection of named groups, addressable by name or position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexGroups {
    groups: Vec<IndexGroup>,
}

impl IndexGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style group addition.
    pub fn with_group<I: IntoIterator<Item = usize>>(mut self, name: &str, atoms: I) -> Self {
        self.push(name, atoms);
        self
    }

    pub fn push<I: IntoIterator<Item = usize>>(&mut self, name: &str, atoms: I) {
        self.groups.push(IndexGroup {
            name: name.to_string(),
            atoms: atoms.into_iter().collect(),
        });
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IndexGroup> {
        self.groups.iter()
    }

    /// Group at a 0-based position.
    pub fn get(&self, id: usize) -> Option<&IndexGroup> {
        self.groups.get(id)
    }

    /// Find a group by exact name, then by unique case-insensitive prefix.
    pub fn find(&self, name: &str) -> std::result::Result<(usize, &IndexGroup), String> {
        if let Some(found) = self.groups.iter().enumerate().find(|(_, g)| g.name == name) {
            return Ok(found);
        }
        let lower = name.to_ascii_lowercase();
        let matches: Vec<(usize, &IndexGroup)> = self
            .groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.name.to_ascii_lowercase().starts_with(&lower))
            .collect();
        match matches.as_slice() {
            [single] => Ok(*single),
            [] => Err(format!("Group '{}' not found", name)),
            many => Err(format!(
                "Group name '{}' is ambiguous (matches {})",
                name,
                many.iter()
                    .map(|(_, g)| format!("'{}'", g.name))
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }

    /// Read a GROMACS-style index file (`[ name ]` headers, 1-based atoms).
    pub fn read_ndx<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SelectionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_ndx(BufReader::new(file))
            .map_err(|msg| SelectionError::InvalidInput(format!("{}: {}", path.display(), msg)))
    }

    /// Parse index-file content from any buffered reader.
    pub fn parse_ndx<R: BufRead>(reader: R) -> std::result::Result<Self, String> {
        let mut groups = Self::new();
        let mut current: Option<(String, Vec<usize>)> = None;

        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| format!("Failed to read line: {}", e))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(header) = trimmed.strip_prefix('[') {
                let name = header
                    .strip_suffix(']')
                    .ok_or_else(|| format!("Line {}: unterminated group header", lineno + 1))?
                    .trim();
                if let Some((name, atoms)) = current.take() {
                    groups.push(&name, atoms);
                }
                current = Some((name.to_string(), Vec::new()));
                continue;
            }
            let (_, atoms) = current
                .as_mut()
                .ok_or_else(|| format!("Line {}: atom indices before first group", lineno + 1))?;
            for word in trimmed.split_whitespace() {
                let index: usize = word
                    .parse()
                    .map_err(|e| format!("Line {}: invalid index '{}': {}", lineno + 1, word, e))?;
                if index == 0 {
                    return Err(format!("Line {}: atom indices are 1-based", lineno + 1));
                }
                atoms.push(index - 1);
            }
        }
        if let Some((name, atoms)) = current {
            groups.push(&name, atoms);
        }
        Ok(groups)
    }
}
