//! Rewriting external group references into constant groups.

use crate::ast::{NodeArena, NodeId, NodeKind};
use crate::error::{Diagnostic, Diagnostics};
use crate::index::IndexGroups;
use crate::selection::SelectionRoot;

/// Look up one reference by name (preferred) or position.
fn lookup(
    groups: Option<&IndexGroups>,
    name: Option<&str>,
    id: Option<usize>,
) -> Result<(String, crate::index::AtomIndexSet), String> {
    let label = name
        .map(|n| format!("'{}'", n))
        .or_else(|| id.map(|i| i.to_string()))
        .unwrap_or_default();
    let Some(groups) = groups else {
        return Err(format!(
            "group {} cannot be resolved: no index groups were provided",
            label
        ));
    };
    match (name, id) {
        (Some(name), _) => groups
            .find(name)
            .map(|(_, g)| (g.name.clone(), g.atoms.clone())),
        (None, Some(id)) => groups
            .get(id)
            .map(|g| (g.name.clone(), g.atoms.clone()))
            .ok_or_else(|| {
                format!(
                    "group index {} out of range ({} groups available)",
                    id,
                    groups.len()
                )
            }),
        (None, None) => Err("empty group reference".to_string()),
    }
}

/// Resolve every reference under `expr`, depth first.
///
/// Successful rewrites stay in place even when other references fail.
pub(crate) fn resolve_subtree(
    nodes: &mut NodeArena,
    expr: NodeId,
    groups: Option<&IndexGroups>,
    text: &str,
    errors: &mut Diagnostics,
) {
    let mut stack = vec![expr];
    while let Some(id) = stack.pop() {
        let node = &nodes[id];
        if let NodeKind::GroupReference { name, id: index } = &node.kind {
            match lookup(groups, name.as_deref(), *index) {
                Ok((name, atoms)) => {
                    log::debug!("resolved group '{}' ({} atoms)", name, atoms.len());
                    nodes[id].kind = NodeKind::ConstantGroup { name, atoms };
                }
                Err(message) => {
                    let mut d = Diagnostic::new(message).with_input(text);
                    if let Some((s, e)) = node.span {
                        d = d.with_span(s, e);
                    }
                    errors.push(d);
                }
            }
            continue;
        }
        // variable targets are roots of their own
        stack.extend(node.children.iter().rev().copied());
    }
}

/// Resolve references in every root.
pub(crate) fn resolve_roots(
    nodes: &mut NodeArena,
    roots: &[SelectionRoot],
    groups: Option<&IndexGroups>,
) -> Diagnostics {
    let mut errors = Diagnostics::new();
    for root in roots {
        resolve_subtree(nodes, root.node, groups, &root.text, &mut errors);
    }
    errors
}

/// Whether any unresolved reference remains.
pub(crate) fn has_unresolved(nodes: &NodeArena) -> bool {
    nodes
        .iter()
        .any(|(_, n)| matches!(n.kind, NodeKind::GroupReference { .. }))
}
