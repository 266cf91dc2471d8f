//! Introspection dumps and the per-phase debug hook.

use std::fmt;
use std::io::{self, Write};

use crate::ast::{NodeArena, NodeId};
use crate::collection::SelectionCollection;
use crate::compiler::{describe, CompiledPlan};
use crate::methods::MethodRegistry;
use crate::selection::SelectionRoot;

/// Lifecycle points the collection reports to its observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    AfterParse,
    GroupsResolved,
    BeforeCompile,
    AfterCompile,
    AfterEvaluate,
    AfterFinal,
}

impl Phase {
    /// Lowest debug level at which [`WriterObserver`] dumps this phase.
    pub fn min_level(&self) -> u8 {
        match self {
            Phase::BeforeCompile | Phase::AfterCompile => 1,
            Phase::GroupsResolved => 2,
            Phase::AfterEvaluate | Phase::AfterFinal => 3,
            Phase::AfterParse => 4,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::AfterParse => "after parsing",
            Phase::GroupsResolved => "after group resolution",
            Phase::BeforeCompile => "before compilation",
            Phase::AfterCompile => "after compilation",
            Phase::AfterEvaluate => "after evaluation",
            Phase::AfterFinal => "after final evaluation",
        };
        f.write_str(s)
    }
}

/// Hook invoked by the collection after each lifecycle phase.
pub trait DebugObserver {
    fn observe(&mut self, phase: Phase, level: u8, collection: &SelectionCollection);
}

/// Observer writing tree and plan dumps to a writer, gated by debug level.
#[derive(Debug)]
pub struct WriterObserver<W> {
    out: W,
}

impl<W: Write> WriterObserver<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn dump(&mut self, phase: Phase, level: u8, c: &SelectionCollection) -> io::Result<()> {
        writeln!(self.out, "==== {} ====", phase)?;
        match phase {
            Phase::AfterCompile => {
                c.print_tree(&mut self.out, false)?;
                if level >= 2 {
                    if let Some(plan) = c.plan() {
                        plan.print(&mut self.out, c.nodes(), c.methods())?;
                    }
                }
                c.print_positions(&mut self.out)?;
            }
            Phase::AfterEvaluate | Phase::AfterFinal => c.print_tree(&mut self.out, true)?,
            _ => c.print_tree(&mut self.out, false)?,
        }
        self.out.flush()
    }
}

impl<W: Write> DebugObserver for WriterObserver<W> {
    fn observe(&mut self, phase: Phase, level: u8, collection: &SelectionCollection) {
        if level < phase.min_level() {
            return;
        }
        if let Err(e) = self.dump(phase, level, collection) {
            log::warn!("failed to write selection debug output: {}", e);
        }
    }
}

fn print_node<W: Write + ?Sized>(
    w: &mut W,
    nodes: &NodeArena,
    methods: &MethodRegistry,
    plan: Option<&CompiledPlan>,
    id: NodeId,
    depth: usize,
    with_values: bool,
) -> io::Result<()> {
    let node = &nodes[id];
    write!(w, "{:indent$}{} {}", "", id, describe(&node.kind, methods), indent = 2 * depth)?;
    if node.dynamic {
        w.write_all(b" [dynamic]")?;
    }
    if node.requires_topology {
        w.write_all(b" [topology]")?;
    }
    if let Some(plan) = plan {
        let canonical = plan.canonical(id);
        if canonical != id {
            write!(w, " -> {}", canonical)?;
        }
    }
    if with_values {
        let value = plan.map_or(id, |p| p.canonical(id));
        if let Some(v) = &nodes[value].value {
            write!(w, " = {}", v)?;
        }
    }
    writeln!(w)?;
    for &child in &node.children {
        print_node(w, nodes, methods, plan, child, depth + 1, with_values)?;
    }
    Ok(())
}

/// Render the forest, one root after another.
pub(crate) fn print_tree<W: Write + ?Sized>(
    w: &mut W,
    nodes: &NodeArena,
    roots: &[SelectionRoot],
    methods: &MethodRegistry,
    plan: Option<&CompiledPlan>,
    with_values: bool,
) -> io::Result<()> {
    writeln!(w, "Selection tree ({} roots, {} nodes):", roots.len(), nodes.len())?;
    for (i, root) in roots.iter().enumerate() {
        writeln!(
            w,
            "Root {} '{}': {}{}",
            i,
            root.name,
            root.text,
            if root.requires_topology { " [requires topology]" } else { "" }
        )?;
        print_node(w, nodes, methods, plan, root.node, 1, with_values)?;
        if with_values && !root.is_variable() {
            let state = &root.state;
            writeln!(
                w,
                "  result: {} atoms, {} positions, {} frames",
                state.atoms.len(),
                state.positions.len(),
                state.frames
            )?;
            if let (Some(size), Some(fraction)) = (state.average_size, state.average_fraction) {
                writeln!(w, "  average: {:.3} atoms ({:.3} of all)", size, fraction)?;
            }
        }
    }
    Ok(())
}

/// Echo variable and selection text in a comment block.
pub(crate) fn print_provenance<W: Write + ?Sized>(
    w: &mut W,
    roots: &[SelectionRoot],
) -> io::Result<()> {
    writeln!(w, "# Selections:")?;
    let variables = roots.iter().filter(|r| r.is_variable());
    let selections = roots.iter().filter(|r| !r.is_variable());
    for root in variables.chain(selections) {
        writeln!(w, "#   {}", root.text)?;
    }
    writeln!(w, "#")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{NodeKind, RootKind};

    fn forest() -> (NodeArena, Vec<SelectionRoot>) {
        let mut nodes = NodeArena::new();
        let lit = nodes.push(NodeKind::Literal(1.0), vec![], 0, None, false, false);
        let var = nodes.push(NodeKind::Root(RootKind::Variable), vec![lit], 0, None, false, false);
        let all = nodes.push(
            NodeKind::ConstantGroup {
                name: "all".into(),
                atoms: Default::default(),
            },
            vec![],
            1,
            None,
            false,
            false,
        );
        let sel = nodes.push(NodeKind::Root(RootKind::Selection), vec![all], 1, None, false, false);
        let roots = vec![
            SelectionRoot::new(var, RootKind::Variable, "one".into(), "one = 1".into()),
            SelectionRoot::new(sel, RootKind::Selection, "\"all\"".into(), "\"all\"".into()),
        ];
        (nodes, roots)
    }

    #[test]
    fn test_provenance_lists_variables_first() {
        let (_, mut roots) = forest();
        roots.swap(0, 1);
        let mut out = Vec::new();
        print_provenance(&mut out, &roots).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "# Selections:\n#   one = 1\n#   \"all\"\n#\n"
        );
    }

    #[test]
    fn test_tree_dump() {
        let (nodes, roots) = forest();
        let mut out = Vec::new();
        print_tree(&mut out, &nodes, &roots, &MethodRegistry::new(), None, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "Selection tree (2 roots, 4 nodes):\n\
             Root 0 'one': one = 1\n  #1 ROOT variable\n    #0 LITERAL 1\n\
             Root 1 '\"all\"': \"all\"\n  #3 ROOT selection\n    #2 CONST_GROUP \"all\" (0 atoms)\n"
        );
    }

    #[test]
    fn test_phase_levels() {
        assert_eq!(Phase::AfterCompile.min_level(), 1);
        assert_eq!(Phase::AfterParse.min_level(), 4);
        assert!(Phase::AfterEvaluate.min_level() > Phase::GroupsResolved.min_level());
    }
}
