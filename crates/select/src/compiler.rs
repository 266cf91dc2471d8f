//! Compilation of a resolved forest into an evaluation plan.
//!
//! Compilation runs in four passes over the arena:
//!
//! 1. type and arity checking, with every problem collected;
//! 2. canonicalization: structurally identical subexpressions (across all
//!    roots) collapse onto one canonical node, and variable references
//!    collapse onto their target expression;
//! 3. ordering: canonical nodes reachable from selections are listed in
//!    post order, so every step runs after the steps it reads;
//! 4. registration of the position descriptors the steps and outputs need.
//!
//! Nodes are appended to the arena in post order while parsing, so a node's
//! children and any variable it references always have smaller ids. The type
//! and canonicalization passes rely on that and run as a single forward scan.

use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::io::{self, Write};

use rustc_hash::{FxHashMap, FxHasher};

use rst_core::positions::PositionType;

use crate::ast::{Matcher, NodeArena, NodeId, NodeKind, RootKind, ValueType};
use crate::error::{Diagnostic, Diagnostics, Result, SelectionError};
use crate::index::AtomIndexSet;
use crate::methods::{MethodFlags, MethodRegistry, ParamKind};
use crate::poscalc::{DescriptorId, PositionResolver, SetKey};
use crate::selection::SelectionRoot;

/// One evaluation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanStep {
    /// Canonical node to evaluate
    pub node: NodeId,
    /// Root the step was first reached from
    pub owner: usize,
}

/// How a selection root produces its results.
#[derive(Debug, Clone)]
pub(crate) struct RootPlan {
    /// Canonical node holding the selected atoms
    pub atoms: NodeId,
    pub output: DescriptorId,
    pub output_type: PositionType,
}

/// Compiled form of a collection.
#[derive(Debug, Clone, Default)]
pub struct CompiledPlan {
    pub(crate) steps: Vec<PlanStep>,
    /// Canonical node of every node in the arena
    pub(crate) canonical: Vec<NodeId>,
    pub(crate) types: Vec<Option<ValueType>>,
    /// Descriptor of each canonical `Positions` node
    pub(crate) node_positions: FxHashMap<NodeId, DescriptorId>,
    /// Descriptors for group arguments passed where positions are expected,
    /// keyed by (method node, child index)
    pub(crate) implicit_positions: FxHashMap<(NodeId, usize), DescriptorId>,
    /// Reference positions of methods flagged `REFERENCE_POSITIONS`
    pub(crate) reference_positions: FxHashMap<NodeId, DescriptorId>,
    /// One entry per root; `None` for variables
    pub(crate) roots: Vec<Option<RootPlan>>,
    pub(crate) all_atoms: AtomIndexSet,
}

impl CompiledPlan {
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Canonical node standing in for `id`.
    pub fn canonical(&self, id: NodeId) -> NodeId {
        self.canonical.get(id.0).copied().unwrap_or(id)
    }

    /// Type of the value `id` produces.
    pub fn value_type(&self, id: NodeId) -> Option<ValueType> {
        self.types.get(id.0).copied().flatten()
    }

    /// Number of distinct nodes the plan evaluates.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Render the step list.
    pub fn print<W: Write + ?Sized>(
        &self,
        w: &mut W,
        nodes: &NodeArena,
        methods: &MethodRegistry,
    ) -> io::Result<()> {
        writeln!(w, "Evaluation plan ({} steps):", self.steps.len())?;
        for (i, step) in self.steps.iter().enumerate() {
            let node = &nodes[step.node];
            writeln!(
                w,
                "  {:>3}: {} {}{} (root {})",
                i,
                step.node,
                describe(&node.kind, methods),
                if node.dynamic { " [dynamic]" } else { "" },
                step.owner
            )?;
        }
        Ok(())
    }
}

/// Short label of a node kind, shared by plan and tree dumps.
pub(crate) fn describe(kind: &NodeKind, methods: &MethodRegistry) -> String {
    match kind {
        NodeKind::GroupReference { name: Some(name), .. } => format!("GROUP_REF \"{}\"", name),
        NodeKind::GroupReference { id, .. } => {
            format!("GROUP_REF {}", id.map_or("?".to_string(), |i| i.to_string()))
        }
        NodeKind::ConstantGroup { name, atoms } => {
            format!("CONST_GROUP \"{}\" ({} atoms)", name, atoms.len())
        }
        NodeKind::Literal(x) => format!("LITERAL {}", x),
        NodeKind::Boolean(op) => format!("BOOLEAN {}", op.name()),
        NodeKind::Compare(op) => format!("COMPARE {}", op.symbol()),
        NodeKind::Arithmetic(op) => format!("ARITHMETIC {}", op.symbol()),
        NodeKind::MethodCall {
            method,
            choices,
            matcher,
        } => {
            let mut s = format!("METHOD {}", methods.signature(*method).name);
            for c in choices {
                let _ = write!(s, " {}", c);
            }
            if let Some(m) = matcher {
                let _ = write!(s, " [{}]", m);
            }
            s
        }
        NodeKind::Positions(ptype) => format!("POSITIONS {}", ptype),
        NodeKind::VariableRef { name, root } => format!("VARIABLE_REF {} (root {})", name, root),
        NodeKind::Root(RootKind::Selection) => "ROOT selection".to_string(),
        NodeKind::Root(RootKind::Variable) => "ROOT variable".to_string(),
    }
}

/// Collection-wide position settings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PositionSettings {
    pub reference: PositionType,
    pub output: PositionType,
}

impl PositionSettings {
    fn reference_for(&self, root: &SelectionRoot) -> PositionType {
        root.reference_type.unwrap_or(self.reference)
    }

    fn output_for(&self, root: &SelectionRoot) -> PositionType {
        root.output_type.unwrap_or(self.output)
    }
}

/// Expression node of a root.
fn root_expr(nodes: &NodeArena, root: &SelectionRoot) -> NodeId {
    nodes[root.node].children[0]
}

/// Visit every node reachable from `start`, following variable references.
fn walk(nodes: &NodeArena, roots: &[SelectionRoot], start: NodeId, f: &mut impl FnMut(NodeId)) {
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
        f(id);
        let node = &nodes[id];
        if let NodeKind::VariableRef { root, .. } = node.kind {
            stack.push(root_expr(nodes, &roots[root]));
        }
        stack.extend(node.children.iter().copied());
    }
}

/// Whether one selection root needs topology information.
pub(crate) fn root_requires_topology(
    nodes: &NodeArena,
    roots: &[SelectionRoot],
    root: usize,
    methods: &MethodRegistry,
    settings: PositionSettings,
) -> bool {
    let r = &roots[root];
    if nodes[r.node].requires_topology || !settings.output_for(r).is_atom() {
        return true;
    }
    let mut needed = false;
    walk(nodes, roots, r.node, &mut |id| {
        let node = &nodes[id];
        if let NodeKind::MethodCall { method, .. } = &node.kind {
            let flags = methods.signature(*method).flags;
            if flags.contains(MethodFlags::REFERENCE_POSITIONS)
                && !settings.reference_for(&roots[node.owner]).is_atom()
            {
                needed = true;
            }
        }
    });
    needed
}

/// Whether evaluating the collection needs topology information.
pub(crate) fn requires_topology(
    nodes: &NodeArena,
    roots: &[SelectionRoot],
    methods: &MethodRegistry,
    settings: PositionSettings,
) -> bool {
    if !settings.reference.is_atom() || !settings.output.is_atom() {
        return true;
    }
    roots.iter().enumerate().any(|(i, r)| {
        let overrides = r.reference_type.is_some_and(|t| !t.is_atom())
            || r.output_type.is_some_and(|t| !t.is_atom());
        overrides
            || (r.kind == RootKind::Selection
                && root_requires_topology(nodes, roots, i, methods, settings))
    })
}

/// Type checker state: one inferred type per node.
struct TypeChecker<'a> {
    nodes: &'a NodeArena,
    roots: &'a [SelectionRoot],
    methods: &'a MethodRegistry,
    atom_count: usize,
    types: Vec<Option<ValueType>>,
    errors: Diagnostics,
}

impl TypeChecker<'_> {
    fn error(&mut self, id: NodeId, message: String) {
        let nodes = self.nodes;
        let node = &nodes[id];
        let mut d = Diagnostic::new(message);
        if let Some(root) = self.roots.get(node.owner) {
            d = d.with_input(root.text.clone());
            if let Some((s, e)) = node.span {
                d = d.with_span(s, e);
            }
        }
        self.errors.push(d);
    }

    fn child_types(&self, id: NodeId) -> Option<Vec<ValueType>> {
        self.nodes[id]
            .children
            .iter()
            .map(|c| self.types[c.0])
            .collect()
    }

    fn run(mut self) -> (Vec<Option<ValueType>>, Diagnostics) {
        for (id, _) in self.nodes.iter() {
            let t = self.infer(id);
            self.types.push(t);
        }
        (self.types, self.errors)
    }

    /// Type of `id`, or `None` after an error at or below it.
    fn infer(&mut self, id: NodeId) -> Option<ValueType> {
        let nodes = self.nodes;
        let node = &nodes[id];
        // an operand already failed; do not report again
        let children = self.child_types(id)?;
        match &node.kind {
            NodeKind::GroupReference { .. } => {
                self.error(id, "group reference was not resolved".to_string());
                None
            }
            NodeKind::ConstantGroup { name, atoms } => match atoms.last() {
                Some(last) if last >= self.atom_count => {
                    self.error(
                        id,
                        format!(
                            "group '{}' contains atom index {}, but there are only {} atoms",
                            name, last, self.atom_count
                        ),
                    );
                    None
                }
                _ => Some(ValueType::Group),
            },
            NodeKind::Literal(_) => Some(ValueType::Scalar),
            NodeKind::Boolean(op) => {
                if let Some(bad) = children.iter().find(|t| **t != ValueType::Group) {
                    self.error(
                        id,
                        format!("operands of {} must be atom groups, found {}", op.name(), bad),
                    );
                    return None;
                }
                Some(ValueType::Group)
            }
            NodeKind::Compare(op) => {
                if let Some(bad) = children.iter().find(|t| !t.is_numeric()) {
                    self.error(
                        id,
                        format!("operands of '{}' must be numeric, found {}", op.symbol(), bad),
                    );
                    return None;
                }
                Some(ValueType::Group)
            }
            NodeKind::Arithmetic(op) => {
                if let Some(bad) = children.iter().find(|t| !t.is_numeric()) {
                    self.error(
                        id,
                        format!("operands of '{}' must be numeric, found {}", op.symbol(), bad),
                    );
                    return None;
                }
                if children.iter().all(|t| *t == ValueType::Scalar) {
                    Some(ValueType::Scalar)
                } else {
                    Some(ValueType::Real)
                }
            }
            NodeKind::MethodCall { method, matcher, .. } => {
                let sig = self.methods.signature(*method);
                let expr_params: Vec<ParamKind> = sig
                    .params
                    .iter()
                    .map(|p| p.kind)
                    .filter(|k| !matches!(k, ParamKind::Choice(_)))
                    .collect();
                if expr_params.len() != children.len() {
                    self.error(
                        id,
                        format!(
                            "'{}' takes {} arguments, found {} (usage: {})",
                            sig.name,
                            expr_params.len(),
                            children.len(),
                            sig.usage()
                        ),
                    );
                    return None;
                }
                let mut ok = true;
                for (kind, found) in expr_params.iter().zip(&children) {
                    let accepted = match kind {
                        ParamKind::Real => *found == ValueType::Scalar,
                        ParamKind::Group => *found == ValueType::Group,
                        ParamKind::Positions => {
                            matches!(found, ValueType::Group | ValueType::Positions)
                        }
                        ParamKind::Choice(_) => true,
                    };
                    if !accepted {
                        let wanted = match kind {
                            ParamKind::Real => "a constant number",
                            ParamKind::Group => "an atom group",
                            _ => "positions or an atom group",
                        };
                        self.error(
                            id,
                            format!(
                                "argument of '{}' must be {}, found {} (usage: {})",
                                sig.name,
                                wanted,
                                found,
                                sig.usage()
                            ),
                        );
                        ok = false;
                    }
                }
                if !ok {
                    return None;
                }
                match (matcher, sig.returns) {
                    (None, ValueType::Str) => {
                        self.error(
                            id,
                            format!("'{}' needs values to match, e.g. {} X", sig.name, sig.name),
                        );
                        None
                    }
                    (None, returns) => Some(returns),
                    (Some(Matcher::Patterns(_)), ValueType::Str)
                    | (Some(Matcher::Ranges(_)), ValueType::Int) => {
                        Some(ValueType::Group)
                    }
                    (Some(_), returns) => {
                        self.error(
                            id,
                            format!(
                                "'{}' returns {} values and cannot be matched",
                                sig.name, returns
                            ),
                        );
                        None
                    }
                }
            }
            NodeKind::Positions(ptype) => {
                if children[0] != ValueType::Group {
                    self.error(
                        id,
                        format!("'{} of' needs an atom group, found {}", ptype, children[0]),
                    );
                    return None;
                }
                Some(ValueType::Positions)
            }
            NodeKind::VariableRef { root, .. } => {
                let target = root_expr(nodes, &self.roots[*root]);
                self.types[target.0]
            }
            NodeKind::Root(kind) => {
                let t = children[0];
                match kind {
                    RootKind::Selection
                        if !matches!(t, ValueType::Group | ValueType::Positions) =>
                    {
                        self.error(
                            id,
                            format!("selection must evaluate to an atom group, found {}", t),
                        );
                        None
                    }
                    _ => Some(t),
                }
            }
        }
    }
}

/// Structural key of a node given its children's canonical ids.
fn fingerprint(
    kind: &NodeKind,
    children: &[NodeId],
    methods: &MethodRegistry,
    reference: PositionType,
) -> String {
    let mut key = match kind {
        NodeKind::ConstantGroup { name, atoms } => {
            let mut h = FxHasher::default();
            atoms.hash(&mut h);
            format!("group:{}:{}:{:x}", name, atoms.len(), h.finish())
        }
        NodeKind::Literal(x) => format!("lit:{:x}", x.to_bits()),
        NodeKind::MethodCall {
            method,
            choices,
            matcher,
        } => {
            let mut s = format!("method:{}:{}", method.0, choices.join(","));
            if let Some(m) = matcher {
                let _ = write!(s, ":{}", m);
            }
            if methods
                .signature(*method)
                .flags
                .contains(MethodFlags::REFERENCE_POSITIONS)
            {
                let _ = write!(s, "@{}", reference);
            }
            s
        }
        other => describe(other, methods),
    };
    key.push('(');
    for c in children {
        let _ = write!(key, "{},", c.0);
    }
    key.push(')');
    key
}

/// Inputs of [`compile`].
pub(crate) struct CompileInput<'a> {
    pub nodes: &'a NodeArena,
    pub roots: &'a mut [SelectionRoot],
    pub methods: &'a MethodRegistry,
    pub resolver: &'a mut PositionResolver,
    pub atom_count: usize,
    pub settings: PositionSettings,
}

/// Check, canonicalize and order the forest; register position descriptors.
pub(crate) fn compile(input: CompileInput<'_>) -> Result<CompiledPlan> {
    let CompileInput {
        nodes,
        roots,
        methods,
        resolver,
        atom_count,
        settings,
    } = input;

    let (types, errors) = TypeChecker {
        nodes,
        roots,
        methods,
        atom_count,
        types: Vec::with_capacity(nodes.len()),
        errors: Diagnostics::new(),
    }
    .run();
    errors.into_result(SelectionError::TypeOrArity)?;

    // canonical nodes
    let mut canonical: Vec<NodeId> = Vec::with_capacity(nodes.len());
    let mut seen: FxHashMap<String, NodeId> = FxHashMap::default();
    for (id, node) in nodes.iter() {
        let target = match &node.kind {
            NodeKind::VariableRef { root, .. } => canonical[root_expr(nodes, &roots[*root]).0],
            NodeKind::Root(_) => id,
            kind => {
                let children: Vec<NodeId> = node.children.iter().map(|c| canonical[c.0]).collect();
                let reference = settings.reference_for(&roots[node.owner]);
                let key = fingerprint(kind, &children, methods, reference);
                *seen.entry(key).or_insert(id)
            }
        };
        canonical.push(target);
    }
    log::debug!(
        "{} nodes collapse to {} distinct expressions",
        nodes.len(),
        seen.len()
    );

    // post-order steps reachable from selections
    let mut steps = Vec::new();
    let mut visited = vec![false; nodes.len()];
    for (owner, root) in roots.iter().enumerate() {
        if root.kind != RootKind::Selection {
            continue;
        }
        let start = canonical[root_expr(nodes, root).0];
        let mut stack = vec![(start, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                steps.push(PlanStep { node: id, owner });
                continue;
            }
            if visited[id.0] {
                continue;
            }
            visited[id.0] = true;
            stack.push((id, true));
            for c in nodes[id].children.iter().rev() {
                let c = canonical[c.0];
                if !visited[c.0] {
                    stack.push((c, false));
                }
            }
        }
    }

    // position descriptors
    resolver.clear();
    let mut node_positions = FxHashMap::default();
    let mut implicit_positions = FxHashMap::default();
    let mut reference_positions = FxHashMap::default();
    for step in &steps {
        let node = &nodes[step.node];
        match &node.kind {
            NodeKind::Positions(ptype) => {
                let child = canonical[node.children[0].0];
                let d = resolver.register(SetKey::Node(child), *ptype, !nodes[child].dynamic);
                node_positions.insert(step.node, d);
            }
            NodeKind::MethodCall { method, .. } => {
                let sig = methods.signature(*method);
                let expr_params = sig
                    .params
                    .iter()
                    .filter(|p| !matches!(p.kind, ParamKind::Choice(_)));
                for (i, (param, child)) in expr_params.zip(&node.children).enumerate() {
                    let child = canonical[child.0];
                    if param.kind == ParamKind::Positions
                        && types[child.0] == Some(ValueType::Group)
                    {
                        let d = resolver.register(
                            SetKey::Node(child),
                            settings.output,
                            !nodes[child].dynamic,
                        );
                        implicit_positions.insert((step.node, i), d);
                    }
                }
                let reference = settings.reference_for(&roots[node.owner]);
                if sig.flags.contains(MethodFlags::REFERENCE_POSITIONS) && !reference.is_atom() {
                    let d = resolver.register(SetKey::All, reference, true);
                    reference_positions.insert(step.node, d);
                }
            }
            _ => {}
        }
    }

    // selection outputs
    let mut root_plans = Vec::with_capacity(roots.len());
    for i in 0..roots.len() {
        let requires = roots[i].kind == RootKind::Selection
            && root_requires_topology(nodes, roots, i, methods, settings);
        let root = &mut roots[i];
        root.requires_topology = requires;
        if root.kind != RootKind::Selection {
            root_plans.push(None);
            continue;
        }
        let expr = canonical[root_expr(nodes, root).0];
        let plan = if let Some(&output) = node_positions.get(&expr) {
            RootPlan {
                atoms: canonical[nodes[expr].children[0].0],
                output,
                output_type: resolver.descriptor(output).position_type(),
            }
        } else {
            let output_type = settings.output_for(root);
            RootPlan {
                atoms: expr,
                output: resolver.register(SetKey::Node(expr), output_type, !nodes[expr].dynamic),
                output_type,
            }
        };
        root_plans.push(Some(plan));
    }

    log::debug!(
        "compiled {} roots into {} steps and {} position descriptors",
        roots.len(),
        steps.len(),
        resolver.len()
    );
    Ok(CompiledPlan {
        steps,
        canonical,
        types,
        node_positions,
        implicit_positions,
        reference_positions,
        roots: root_plans,
        all_atoms: AtomIndexSet::all(atom_count),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_text, ParseState};
    use crate::symbols::{Symbol, SymbolTable};

    struct Forest {
        nodes: NodeArena,
        roots: Vec<SelectionRoot>,
        methods: MethodRegistry,
        resolver: PositionResolver,
    }

    fn settings(reference: &str, output: &str) -> PositionSettings {
        PositionSettings {
            reference: reference.parse().unwrap(),
            output: output.parse().unwrap(),
        }
    }

    fn parse(text: &str) -> Forest {
        let methods = MethodRegistry::with_builtins();
        let mut symbols = SymbolTable::new();
        for (name, id) in methods.names() {
            symbols.add(name, Symbol::Method(id)).unwrap();
        }
        let mut nodes = NodeArena::new();
        let mut roots = Vec::new();
        parse_text(
            ParseState {
                nodes: &mut nodes,
                roots: &mut roots,
                symbols: &mut symbols,
                methods: &methods,
                resolve_groups: false,
                groups: None,
            },
            text,
            None,
        )
        .unwrap();
        Forest {
            nodes,
            roots,
            methods,
            resolver: PositionResolver::new(),
        }
    }

    fn compile_forest(f: &mut Forest, settings: PositionSettings) -> Result<CompiledPlan> {
        compile(CompileInput {
            nodes: &f.nodes,
            roots: &mut f.roots,
            methods: &f.methods,
            resolver: &mut f.resolver,
            atom_count: 10,
            settings,
        })
    }

    #[test]
    fn test_shared_position_descriptor() {
        let mut f = parse(
            "distance from res_com of resname LIG < 2\nwithin 3 of res_com of resname LIG",
        );
        let plan = compile_forest(&mut f, settings("atom", "atom")).unwrap();
        assert_eq!(plan.node_positions.len(), 1);
        let res_com: PositionType = "res_com".parse().unwrap();
        let shared = f
            .resolver
            .iter()
            .filter(|(_, d)| d.position_type() == res_com)
            .count();
        assert_eq!(shared, 1);
        // one output descriptor per distinct selection, one shared res_com
        assert_eq!(f.resolver.len(), 3);
    }

    #[test]
    fn test_variables_collapse_onto_target() {
        let mut f = parse("v = name CA; v and resid 1; name CA and resid 1");
        let plan = compile_forest(&mut f, settings("atom", "atom")).unwrap();
        let e1 = plan.canonical(root_expr(&f.nodes, &f.roots[1]));
        let e2 = plan.canonical(root_expr(&f.nodes, &f.roots[2]));
        assert_eq!(e1, e2);
        assert!(plan.roots[0].is_none());
        // name CA, resid 1, and
        assert_eq!(plan.len(), 3);
        let steps: Vec<NodeId> = plan.steps().iter().map(|s| s.node).collect();
        let pos = |id: NodeId| steps.iter().position(|&s| s == id).unwrap();
        for step in plan.steps() {
            for c in &f.nodes[step.node].children {
                assert!(pos(plan.canonical(*c)) < pos(step.node));
            }
        }
    }

    #[test]
    fn test_reference_type_separates_geometric_nodes() {
        let mut f = parse("x < 1; x < 1");
        f.roots[1].reference_type = Some("res_cog".parse().unwrap());
        let plan = compile_forest(&mut f, settings("atom", "atom")).unwrap();
        let e0 = plan.canonical(root_expr(&f.nodes, &f.roots[0]));
        let e1 = plan.canonical(root_expr(&f.nodes, &f.roots[1]));
        assert_ne!(e0, e1);
        assert_eq!(plan.reference_positions.len(), 1);
        assert!(!f.roots[0].requires_topology);
        assert!(f.roots[1].requires_topology);
    }

    #[test]
    fn test_type_errors_are_aggregated() {
        let mut f = parse("name; mass and all; within all of all; x + 1; same residue as 3");
        let err = compile_forest(&mut f, settings("atom", "atom")).unwrap_err();
        let diags = err.diagnostics().unwrap();
        assert_eq!(diags.len(), 5, "{}", diags);
        assert!(matches!(err, SelectionError::TypeOrArity(_)));
        let text = diags.to_string();
        assert!(text.contains("'name' needs values to match"));
        assert!(text.contains("operands of AND must be atom groups, found real"));
        assert!(text.contains("must be a constant number"));
        assert!(text.contains("selection must evaluate to an atom group, found real"));
        assert!(text.contains("must be an atom group, found number"));
    }

    #[test]
    fn test_group_out_of_range() {
        let mut f = parse("all");
        let big = f.nodes.push(
            NodeKind::ConstantGroup {
                name: "big".into(),
                atoms: AtomIndexSet::from_unsorted(vec![3, 12]),
            },
            vec![],
            0,
            None,
            false,
            false,
        );
        let expr = root_expr(&f.nodes, &f.roots[0]);
        let or = f.nodes.push(
            NodeKind::Boolean(crate::ast::BoolOp::Or),
            vec![expr, big],
            0,
            None,
            false,
            false,
        );
        let root = f.nodes.push(
            NodeKind::Root(RootKind::Selection),
            vec![or],
            1,
            None,
            false,
            false,
        );
        f.roots.push(SelectionRoot::new(root, RootKind::Selection, "x".into(), "x".into()));
        let err = compile_forest(&mut f, settings("atom", "atom")).unwrap_err();
        assert!(err.to_string().contains("atom index 12, but there are only 10 atoms"));
    }

    #[test]
    fn test_positions_root_sets_output() {
        let mut f = parse("res_cog of resname LIG");
        let plan = compile_forest(&mut f, settings("atom", "atom")).unwrap();
        let root = plan.roots[0].as_ref().unwrap();
        assert_eq!(root.output_type, "res_cog".parse::<PositionType>().unwrap());
        assert!(f.roots[0].requires_topology);
    }

    #[test]
    fn test_requires_topology() {
        let f = parse("index 1 to 3");
        let plain = settings("atom", "atom");
        assert!(!requires_topology(&f.nodes, &f.roots, &f.methods, plain));
        assert!(requires_topology(&f.nodes, &f.roots, &f.methods, settings("res_com", "atom")));
        let f = parse("within 2 of index 1");
        assert!(!requires_topology(&f.nodes, &f.roots, &f.methods, plain));
        let f = parse("name CA");
        assert!(requires_topology(&f.nodes, &f.roots, &f.methods, plain));
    }
}
