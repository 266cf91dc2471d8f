//! Method registry: named predicates and per-atom value methods.
//!
//! Each collection owns its own [`MethodRegistry`], filled with the built-in
//! methods at construction. Callers may register additional methods before
//! parsing; names must not collide with existing ones.

pub mod builtin;
pub mod keywords;

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use rst_core::frame::Frame;
use rst_core::pbc::Pbc;
use rst_core::positions::Positions;
use rst_core::topology::Topology;

use crate::arena::EvalArena;
use crate::ast::ValueType;
use crate::error::{Result, SelectionError};
use crate::index::AtomIndexSet;

/// Index of a method in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub(crate) usize);

bitflags! {
    /// Method properties the compiler and evaluator rely on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodFlags: u32 {
        /// Result depends on coordinates and changes between frames
        const DYNAMIC = 1;
        /// Needs topology information (names, residues, masses, ...)
        const REQUIRES_TOPOLOGY = 1 << 1;
        /// Evaluates atoms at the reference positions of the selection
        const REFERENCE_POSITIONS = 1 << 2;
    }
}

/// Kind of value a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Group-valued expression
    Group,
    /// Constant number
    Real,
    /// Positions, or a group reduced with the default output position type
    Positions,
    /// One of a fixed set of words
    Choice(&'static [&'static str]),
}

/// One parameter, optionally introduced by a keyword (`of`, `from`, `as`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub keyword: Option<&'static str>,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub const fn new(keyword: Option<&'static str>, kind: ParamKind) -> Self {
        Self { keyword, kind }
    }
}

/// Static description of a method.
#[derive(Debug, Clone)]
pub struct MethodSignature {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    /// Group, Int, Real or Str; Int and Str methods accept a matcher
    pub returns: ValueType,
    pub params: Vec<ParamSpec>,
    pub flags: MethodFlags,
    pub help: &'static str,
}

impl MethodSignature {
    /// Usage line such as `within R of POS`.
    pub fn usage(&self) -> String {
        let mut s = self.name.to_string();
        for p in &self.params {
            if let Some(kw) = p.keyword {
                s.push(' ');
                s.push_str(kw);
            }
            s.push(' ');
            match p.kind {
                ParamKind::Group => s.push_str("GROUP"),
                ParamKind::Real => s.push_str("R"),
                ParamKind::Positions => s.push_str("POS"),
                ParamKind::Choice(words) => s.push_str(&words.join("|")),
            }
        }
        match self.returns {
            ValueType::Str => s.push_str(" STR..."),
            ValueType::Int => s.push_str(" INT..."),
            _ => {}
        }
        s
    }
}

/// Evaluated method argument.
#[derive(Debug, Clone, Copy)]
pub enum MethodArg<'a> {
    Group(&'a AtomIndexSet),
    Real(f64),
    Positions(&'a Positions),
    Choice(&'a str),
}

/// Per-atom method result (dense over all atoms unless a group).
#[derive(Debug, Clone, PartialEq)]
pub enum MethodOutput<'a> {
    Group(AtomIndexSet),
    Int(Vec<i64>),
    Real(Vec<f64>),
    Str(Vec<&'a str>),
}

/// Everything a method may read while evaluating one frame.
pub struct EvalContext<'a> {
    pub n_atoms: usize,
    pub topology: Option<&'a Topology>,
    pub frame: &'a Frame,
    pub pbc: Option<&'a Pbc>,
    /// Reference positions of the evaluated atoms, for methods flagged
    /// `REFERENCE_POSITIONS`
    pub reference: Option<&'a Positions>,
    pub arena: &'a EvalArena,
}

impl<'a> EvalContext<'a> {
    pub fn topology(&self) -> std::result::Result<&'a Topology, String> {
        self.topology
            .ok_or_else(|| "topology information is not available".to_string())
    }

    /// Position used for `atom` when evaluating geometric predicates.
    pub fn reference_position(&self, atom: usize) -> [f64; 3] {
        self.reference
            .and_then(|p| p.position_of_atom(atom))
            .copied()
            .unwrap_or(self.frame.positions[atom])
    }
}

/// A selection method.
pub trait SelectionMethod: Send + Sync {
    fn signature(&self) -> &MethodSignature;

    /// Evaluate for all atoms of the current frame.
    fn evaluate<'a>(
        &self,
        ctx: &EvalContext<'a>,
        args: &[MethodArg<'_>],
    ) -> std::result::Result<MethodOutput<'a>, String>;
}

impl fmt::Debug for dyn SelectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SelectionMethod({})", self.signature().name)
    }
}

/// Per-collection method table.
#[derive(Debug, Default, Clone)]
pub struct MethodRegistry {
    methods: Vec<Arc<dyn SelectionMethod>>,
    by_name: FxHashMap<&'static str, MethodId>,
}

impl MethodRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in method.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for method in builtin::all() {
            // built-in names are distinct
            if let Err(e) = registry.register(method) {
                log::warn!("{}", e);
            }
        }
        registry
    }

    /// Add a method under its name and aliases.
    pub fn register(&mut self, method: Arc<dyn SelectionMethod>) -> Result<MethodId> {
        let sig = method.signature();
        let names: Vec<&'static str> = std::iter::once(sig.name)
            .chain(sig.aliases.iter().copied())
            .collect();
        if let Some(taken) = names.iter().find(|n| self.by_name.contains_key(*n)) {
            return Err(SelectionError::DuplicateBinding(format!(
                "method '{}' is already registered",
                taken
            )));
        }
        let id = MethodId(self.methods.len());
        for name in names {
            self.by_name.insert(name, id);
        }
        self.methods.push(method);
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<MethodId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: MethodId) -> &dyn SelectionMethod {
        self.methods[id.0].as_ref()
    }

    pub fn signature(&self, id: MethodId) -> &MethodSignature {
        self.methods[id.0].signature()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Every registered name with its method id.
    pub fn names(&self) -> impl Iterator<Item = (&'static str, MethodId)> + '_ {
        self.by_name.iter().map(|(&n, &id)| (n, id))
    }
}
