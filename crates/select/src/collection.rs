//! The selection collection: one forest of parsed statements, compiled once
//! and evaluated for every trajectory frame.
//!
//! Typical lifecycle:
//!
//! ```ignore
//! let mut sc = SelectionCollection::new();
//! sc.set_topology(Some(topology), 0)?;
//! let sel = sc.parse_from_string("name CA and within 0.5 of resname LIG")?;
//! sc.compile()?;
//! for frame in frames {
//!     sc.evaluate(&frame, None)?;
//!     println!("{} atoms", sc.selection(sel[0]).unwrap().atoms().len());
//! }
//! sc.evaluate_final(n_frames)?;
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use rst_core::frame::Frame;
use rst_core::pbc::Pbc;
use rst_core::topology::Topology;

use crate::arena::{ArenaStats, EvalArena};
use crate::ast::NodeArena;
use crate::compiler::{self, CompileInput, CompiledPlan, PositionSettings};
use crate::config::{parse_position_type, CollectionConfig, MAX_DEBUG_LEVEL};
use crate::debug::{self, DebugObserver, Phase, WriterObserver};
use crate::error::{Result, SelectionError};
use crate::evaluator::{self, FrameInput};
use crate::index::IndexGroups;
use crate::methods::{MethodId, MethodRegistry, SelectionMethod};
use crate::parser::{parse_lines, parse_text, ParseState};
use crate::poscalc::PositionResolver;
use crate::resolve::{has_unresolved, resolve_roots};
use crate::selection::{SelectionHandle, SelectionRoot, SelectionState, SelectionView};
use crate::source::{Interactive, LineSource, StdinSource};
use crate::symbols::{is_identifier, Symbol, SymbolTable};

/// State restored when a parse or group binding fails with rollback enabled.
struct Snapshot {
    nodes: NodeArena,
    roots: usize,
    symbols: SymbolTable,
}

/// A collection of selections sharing one forest, one method registry and
/// one set of position descriptors.
///
/// The collection is `Send` but not `Sync`: evaluation borrows scratch
/// buffers from an interior-mutable arena.
pub struct SelectionCollection {
    config: CollectionConfig,
    methods: MethodRegistry,
    nodes: NodeArena,
    roots: Vec<SelectionRoot>,
    symbols: SymbolTable,
    groups: Option<Arc<IndexGroups>>,
    groups_bound: bool,
    topology: Option<Arc<Topology>>,
    atom_count: usize,
    plan: Option<CompiledPlan>,
    resolver: PositionResolver,
    arena: EvalArena,
    observer: Option<Box<dyn DebugObserver + Send>>,
}

impl std::fmt::Debug for SelectionCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionCollection")
            .field("config", &self.config)
            .field("roots", &self.roots.len())
            .field("nodes", &self.nodes.len())
            .field("atom_count", &self.atom_count)
            .field("compiled", &self.plan.is_some())
            .finish()
    }
}

impl Default for SelectionCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionCollection {
    /// Empty collection with the built-in methods and default settings.
    pub fn new() -> Self {
        Self::with_config(CollectionConfig::default())
    }

    pub fn with_config(config: CollectionConfig) -> Self {
        Self::with_registry(config, MethodRegistry::with_builtins())
    }

    /// Empty collection using `methods` instead of the built-in registry.
    pub fn with_registry(config: CollectionConfig, methods: MethodRegistry) -> Self {
        let mut symbols = SymbolTable::new();
        for (name, id) in methods.names() {
            if let Err(e) = symbols.add(name, Symbol::Method(id)) {
                log::warn!("method '{}' is not usable: {}", name, e);
            }
        }
        Self {
            config,
            methods,
            nodes: NodeArena::new(),
            roots: Vec::new(),
            symbols,
            groups: None,
            groups_bound: false,
            topology: None,
            atom_count: 0,
            plan: None,
            resolver: PositionResolver::new(),
            arena: EvalArena::new(),
            observer: None,
        }
    }

    /// Add a method to this collection's registry.
    ///
    /// Fails with `DuplicateBinding` if its name or an alias is already a
    /// method, variable, group, position type or reserved word.
    pub fn register_method(&mut self, method: Arc<dyn SelectionMethod>) -> Result<MethodId> {
        let sig = method.signature();
        let names: Vec<&'static str> = std::iter::once(sig.name)
            .chain(sig.aliases.iter().copied())
            .collect();
        if let Some(symbol) = names.iter().find_map(|n| self.symbols.get(n).map(|s| (n, s))) {
            return Err(SelectionError::DuplicateBinding(format!(
                "'{}' is already defined as a {}",
                symbol.0,
                symbol.1.category()
            )));
        }
        let id = self.methods.register(method)?;
        for name in names {
            self.symbols
                .add(name, Symbol::Method(id))
                .map_err(SelectionError::DuplicateBinding)?;
        }
        Ok(id)
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn methods(&self) -> &MethodRegistry {
        &self.methods
    }

    pub fn nodes(&self) -> &NodeArena {
        &self.nodes
    }

    /// Default reference position type for geometric methods.
    pub fn set_reference_position_type(&mut self, name: &str) -> Result<()> {
        self.config.reference_position_type = parse_position_type(name)?;
        self.plan = None;
        Ok(())
    }

    /// Default output position type of every selection.
    pub fn set_output_position_type(&mut self, name: &str) -> Result<()> {
        self.config.output_position_type = parse_position_type(name)?;
        self.plan = None;
        Ok(())
    }

    /// Per-selection overrides of the reference and output position types.
    pub fn set_position_types(
        &mut self,
        handle: SelectionHandle,
        reference: Option<&str>,
        output: Option<&str>,
    ) -> Result<()> {
        let reference = reference.map(parse_position_type).transpose()?;
        let output = output.map(parse_position_type).transpose()?;
        let root = self
            .roots
            .get_mut(handle.0)
            .filter(|r| !r.is_variable())
            .ok_or_else(|| SelectionError::InvalidInput(format!("no selection {}", handle.0)))?;
        if reference.is_some() {
            root.reference_type = reference;
        }
        if output.is_some() {
            root.output_type = output;
        }
        self.plan = None;
        Ok(())
    }

    pub fn set_debug_level(&mut self, level: u8) -> Result<()> {
        if level > MAX_DEBUG_LEVEL {
            return Err(SelectionError::InvalidInput(format!(
                "debug level {} out of range 0-{}",
                level, MAX_DEBUG_LEVEL
            )));
        }
        self.config.debug_level = level;
        Ok(())
    }

    pub fn debug_level(&self) -> u8 {
        self.config.debug_level
    }

    /// Write debug dumps to `out`, gated by the debug level.
    pub fn set_debug_sink<W: Write + Send + 'static>(&mut self, out: W) {
        self.observer = Some(Box::new(WriterObserver::new(out)));
    }

    /// Replace the phase observer; `None` removes it.
    pub fn set_observer(&mut self, observer: Option<Box<dyn DebugObserver + Send>>) {
        self.observer = observer;
    }

    /// Bind topology information and the number of atoms evaluated.
    ///
    /// An `atom_count` of zero takes the count from the topology.
    pub fn set_topology(
        &mut self,
        topology: Option<Arc<Topology>>,
        atom_count: usize,
    ) -> Result<()> {
        let atom_count = match (&topology, atom_count) {
            (Some(top), 0) => top.n_atoms,
            (None, 0) => {
                return Err(SelectionError::InvalidInput(
                    "atom count must be positive when no topology is given".to_string(),
                ))
            }
            (Some(top), n) if n > top.n_atoms => {
                return Err(SelectionError::InvalidInput(format!(
                    "atom count {} exceeds the {} atoms of the topology",
                    n, top.n_atoms
                )))
            }
            (_, n) => n,
        };
        self.topology = topology;
        self.atom_count = atom_count;
        self.plan = None;
        Ok(())
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.topology.as_deref()
    }

    pub fn atom_count(&self) -> usize {
        self.atom_count
    }

    /// Bind the external index groups referenced by name or number.
    ///
    /// Rebinding the same set is a no-op. Binding a different set while one
    /// is bound fails with `DuplicateBinding`; pass `None` first to clear
    /// it. References that cannot be resolved are reported together as
    /// `UnresolvedGroup`; successful rewrites are kept unless rollback is
    /// enabled.
    pub fn set_index_groups(&mut self, groups: Option<Arc<IndexGroups>>) -> Result<()> {
        match (&self.groups, &groups) {
            (Some(current), Some(new)) if Arc::ptr_eq(current, new) => return Ok(()),
            (Some(_), Some(_)) => {
                return Err(SelectionError::DuplicateBinding(
                    "index groups are already bound".to_string(),
                ))
            }
            _ => {}
        }
        let snapshot = self.snapshot(false);

        self.symbols.remove_groups();
        if let Some(groups) = &groups {
            for (i, group) in groups.iter().enumerate() {
                if !is_identifier(&group.name) {
                    continue;
                }
                if let Err(e) = self.symbols.add(&group.name, Symbol::Group(i)) {
                    log::warn!("group '{}' is only reachable with 'group': {}", group.name, e);
                }
            }
        }
        self.groups = groups;
        self.groups_bound = true;
        self.plan = None;

        let errors = resolve_roots(&mut self.nodes, &self.roots, self.groups.as_deref());
        if !errors.is_empty() {
            if let Some(snapshot) = snapshot {
                self.restore(snapshot);
                self.groups = None;
                self.groups_bound = false;
            }
            return Err(SelectionError::UnresolvedGroup(errors));
        }
        self.notify(Phase::GroupsResolved);
        Ok(())
    }

    fn snapshot(&self, force: bool) -> Option<Snapshot> {
        (force || self.config.rollback_on_error).then(|| Snapshot {
            nodes: self.nodes.clone(),
            roots: self.roots.len(),
            symbols: self.symbols.clone(),
        })
    }

    fn restore(&mut self, snapshot: Snapshot) {
        log::debug!(
            "rolling back to {} roots and {} nodes",
            snapshot.roots,
            snapshot.nodes.len()
        );
        self.nodes = snapshot.nodes;
        self.roots.truncate(snapshot.roots);
        self.symbols = snapshot.symbols;
    }

    fn parse_with<F>(&mut self, all_or_nothing: bool, parse: F) -> Result<Vec<SelectionHandle>>
    where
        F: FnOnce(ParseState<'_>) -> Result<()>,
    {
        let first = self.roots.len();
        let snapshot = self.snapshot(all_or_nothing);
        self.plan = None;
        let state = ParseState {
            nodes: &mut self.nodes,
            roots: &mut self.roots,
            symbols: &mut self.symbols,
            methods: &self.methods,
            resolve_groups: self.groups_bound,
            groups: self.groups.as_deref(),
        };
        if let Err(e) = parse(state) {
            if let Some(snapshot) = snapshot {
                self.restore(snapshot);
            }
            return Err(e);
        }
        self.notify(Phase::AfterParse);
        Ok((first..self.roots.len())
            .filter(|&i| !self.roots[i].is_variable())
            .map(SelectionHandle)
            .collect())
    }

    /// Parse one or more `;`/newline separated statements.
    pub fn parse_from_string(&mut self, text: &str) -> Result<Vec<SelectionHandle>> {
        self.parse_with(false, |state| parse_text(state, text, None))
    }

    pub fn parse_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<Vec<SelectionHandle>> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SelectionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("parsing selections from {}", path.display());
        self.parse_with(false, |state| parse_text(state, &text, None))
    }

    /// Parse statements pulled line by line from `source`.
    ///
    /// With `expected`, parsing stops once that many selections were read.
    /// Reading fewer fails with a parse error and discards every statement
    /// of the call.
    pub fn parse_interactive(
        &mut self,
        source: &mut dyn LineSource,
        expected: Option<usize>,
    ) -> Result<Vec<SelectionHandle>> {
        self.parse_with(expected.is_some(), |state| parse_lines(state, source, expected))
    }

    /// Parse statements from standard input.
    ///
    /// With `interactive`, prompts and per-line feedback go to standard error
    /// so standard output stays free for results.
    pub fn parse_from_stdin(
        &mut self,
        expected: Option<usize>,
        interactive: bool,
    ) -> Result<Vec<SelectionHandle>> {
        let stdin = StdinSource::stdin();
        if interactive {
            let mut source = prompted(stdin);
            self.parse_interactive(&mut source, expected)
        } else {
            let mut source = stdin;
            self.parse_interactive(&mut source, expected)
        }
    }

    fn settings(&self) -> PositionSettings {
        PositionSettings {
            reference: self.config.reference_position_type,
            output: self.config.output_position_type,
        }
    }

    /// Whether compiling needs topology information.
    pub fn requires_topology(&self) -> bool {
        compiler::requires_topology(&self.nodes, &self.roots, &self.methods, self.settings())
    }

    /// Check and optimize the forest into an evaluation plan.
    pub fn compile(&mut self) -> Result<()> {
        if self.topology.is_none() && self.requires_topology() {
            return Err(SelectionError::MissingTopology);
        }
        if self.atom_count == 0 {
            return Err(SelectionError::InvalidInput(
                "atom count is not set; call set_topology before compiling".to_string(),
            ));
        }
        if !self.groups_bound || has_unresolved(&self.nodes) {
            resolve_roots(&mut self.nodes, &self.roots, self.groups.as_deref())
                .into_result(SelectionError::UnresolvedGroup)?;
        }
        self.plan = None;
        self.notify(Phase::BeforeCompile);

        let settings = self.settings();
        let plan = compiler::compile(CompileInput {
            nodes: &self.nodes,
            roots: &mut self.roots,
            methods: &self.methods,
            resolver: &mut self.resolver,
            atom_count: self.atom_count,
            settings,
        })?;
        self.nodes.clear_values();
        for root in &mut self.roots {
            root.state = SelectionState::default();
        }
        self.resolver
            .init_evaluation(self.topology.as_deref())
            .map_err(|e| {
                log::debug!("{}", e);
                SelectionError::MissingTopology
            })?;
        log::info!(
            "compiled {} selections into {} evaluation steps",
            self.roots.iter().filter(|r| !r.is_variable()).count(),
            plan.len()
        );
        self.plan = Some(plan);
        self.notify(Phase::AfterCompile);
        Ok(())
    }

    fn not_compiled() -> SelectionError {
        SelectionError::InvalidInput("selections must be compiled before evaluation".to_string())
    }

    /// Evaluate every selection for one frame.
    pub fn evaluate(&mut self, frame: &Frame, pbc: Option<&Pbc>) -> Result<()> {
        let plan = self.plan.as_ref().ok_or_else(Self::not_compiled)?;
        evaluator::evaluate(
            FrameInput {
                nodes: &mut self.nodes,
                roots: &mut self.roots,
                plan,
                methods: &self.methods,
                resolver: &mut self.resolver,
                topology: self.topology.as_deref(),
                arena: &self.arena,
                atom_count: self.atom_count,
            },
            frame,
            pbc,
        )?;
        self.notify(Phase::AfterEvaluate);
        Ok(())
    }

    /// Compute per-selection averages after the last frame.
    pub fn evaluate_final(&mut self, frame_count: usize) -> Result<()> {
        if self.plan.is_none() {
            return Err(Self::not_compiled());
        }
        evaluator::evaluate_final(&mut self.roots, self.atom_count, frame_count)?;
        self.notify(Phase::AfterFinal);
        Ok(())
    }

    fn notify(&mut self, phase: Phase) {
        log::debug!("selection collection {}", phase);
        if let Some(mut observer) = self.observer.take() {
            observer.observe(phase, self.config.debug_level, self);
            self.observer = Some(observer);
        }
    }

    fn view(&self, index: usize) -> Option<SelectionView<'_>> {
        let root = self.roots.get(index).filter(|r| !r.is_variable())?;
        let output_type = self
            .plan
            .as_ref()
            .and_then(|p| p.roots.get(index))
            .and_then(|r| r.as_ref())
            .map(|r| r.output_type)
            .or(root.output_type)
            .unwrap_or(self.config.output_position_type);
        Some(SelectionView { root, output_type })
    }

    pub fn selection(&self, handle: SelectionHandle) -> Option<SelectionView<'_>> {
        self.view(handle.0)
    }

    /// Every selection in parse order.
    pub fn selections(&self) -> impl Iterator<Item = SelectionView<'_>> {
        (0..self.roots.len()).filter_map(|i| self.view(i))
    }

    /// Number of selections (variables excluded).
    pub fn len(&self) -> usize {
        self.roots.iter().filter(|r| !r.is_variable()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn plan(&self) -> Option<&CompiledPlan> {
        self.plan.as_ref()
    }

    pub fn position_resolver(&self) -> &PositionResolver {
        &self.resolver
    }

    pub fn arena_stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    /// Render the forest; `with_values` adds the last evaluated values.
    pub fn print_tree<W: Write + ?Sized>(&self, w: &mut W, with_values: bool) -> io::Result<()> {
        debug::print_tree(
            w,
            &self.nodes,
            &self.roots,
            &self.methods,
            self.plan.as_ref(),
            with_values,
        )
    }

    /// Echo variable and selection text as a `# Selections:` block.
    pub fn print_provenance<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        debug::print_provenance(w, &self.roots)
    }

    pub fn print_positions<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        self.resolver.print_tree(w)
    }
}

fn prompted(stdin: StdinSource) -> Interactive<StdinSource, io::Stderr> {
    Interactive::new(stdin, io::stderr())
}
