//! Per-frame execution of a compiled plan.

use rst_core::frame::Frame;
use rst_core::pbc::Pbc;
use rst_core::topology::Topology;

use crate::arena::EvalArena;
use crate::ast::{ArithOp, BoolOp, NodeArena, NodeId, NodeKind, Value};
use crate::compiler::CompiledPlan;
use crate::error::{Result, SelectionError};
use crate::index::AtomIndexSet;
use crate::methods::{EvalContext, MethodArg, MethodOutput, MethodRegistry, ParamKind};
use crate::poscalc::PositionResolver;
use crate::selection::SelectionRoot;

/// Everything one frame's evaluation touches.
pub(crate) struct FrameInput<'a> {
    pub nodes: &'a mut NodeArena,
    pub roots: &'a mut [SelectionRoot],
    pub plan: &'a CompiledPlan,
    pub methods: &'a MethodRegistry,
    pub resolver: &'a mut PositionResolver,
    pub topology: Option<&'a Topology>,
    pub arena: &'a EvalArena,
    pub atom_count: usize,
}

/// Group value of a canonical node.
fn group_of<'n>(
    nodes: &'n NodeArena,
    id: NodeId,
) -> std::result::Result<&'n AtomIndexSet, String> {
    nodes[id]
        .value
        .as_ref()
        .and_then(Value::as_group)
        .ok_or_else(|| format!("node {} has no group value", id))
}

/// Evaluate every step for `frame`, then publish the selection results.
pub(crate) fn evaluate(input: FrameInput<'_>, frame: &Frame, pbc: Option<&Pbc>) -> Result<()> {
    let FrameInput {
        nodes,
        roots,
        plan,
        methods,
        resolver,
        topology,
        arena,
        atom_count,
    } = input;
    if frame.n_atoms() != atom_count {
        return Err(SelectionError::InvalidInput(format!(
            "frame has {} atoms, but the selections were compiled for {}",
            frame.n_atoms(),
            atom_count
        )));
    }
    let _scope = arena.frame();
    resolver.init_frame();

    let mut evaluated = 0usize;
    for step in &plan.steps {
        let node = &nodes[step.node];
        if !node.dynamic && node.value.is_some() {
            continue;
        }
        let previous = nodes[step.node].value.take();
        let ctx = EvalContext {
            n_atoms: atom_count,
            topology,
            frame,
            pbc,
            reference: None,
            arena,
        };
        let value = evaluate_node(nodes, plan, methods, resolver, &ctx, step.node, previous)
            .map_err(|message| SelectionError::Evaluation {
                root: roots[step.owner].name.clone(),
                message,
            })?;
        nodes[step.node].value = Some(value);
        evaluated += 1;
    }
    log::trace!(
        "frame {}: {} of {} steps evaluated",
        frame.step,
        evaluated,
        plan.steps.len()
    );

    for (root, root_plan) in roots.iter_mut().zip(&plan.roots) {
        let Some(root_plan) = root_plan else {
            continue;
        };
        let atoms = group_of(nodes, root_plan.atoms).map_err(|message| {
            SelectionError::Evaluation {
                root: root.name.clone(),
                message,
            }
        })?;
        let positions = resolver
            .compute(root_plan.output, atoms, topology, &frame.positions, pbc)
            .map_err(|message| SelectionError::Evaluation {
                root: root.name.clone(),
                message,
            })?;
        let state = &mut root.state;
        state.atoms.clone_from(atoms);
        state.positions.clone_from(positions);
        state.frames += 1;
        state.total_size += atoms.len();
    }
    Ok(())
}

/// Compute the value of one canonical node from its children's values.
fn evaluate_node(
    nodes: &NodeArena,
    plan: &CompiledPlan,
    methods: &MethodRegistry,
    resolver: &mut PositionResolver,
    ctx: &EvalContext<'_>,
    id: NodeId,
    previous: Option<Value>,
) -> std::result::Result<Value, String> {
    let node = &nodes[id];
    let child = |i: usize| plan.canonical[node.children[i].0];
    let child_value = |i: usize| {
        nodes[child(i)]
            .value
            .as_ref()
            .ok_or_else(|| format!("operand {} of node {} was not evaluated", i, id))
    };
    let n = ctx.n_atoms;
    // node values persist across frames, so results refill last frame's storage
    let (mut group, mut reals) = match previous {
        Some(Value::Group(g)) => (g, Vec::new()),
        Some(Value::Real(v)) => (AtomIndexSet::new(), v),
        _ => (AtomIndexSet::new(), Vec::new()),
    };

    let value = match &node.kind {
        NodeKind::ConstantGroup { atoms, .. } => Value::Group(atoms.clone()),
        NodeKind::Literal(x) => Value::Scalar(*x),
        NodeKind::Boolean(op) => {
            let a = group_of(nodes, child(0))?;
            match op {
                BoolOp::Not => a.complement_into(n, &mut group),
                BoolOp::And => a.intersection_into(group_of(nodes, child(1))?, &mut group),
                BoolOp::Or => a.union_into(group_of(nodes, child(1))?, &mut group),
                BoolOp::Xor => {
                    a.symmetric_difference_into(group_of(nodes, child(1))?, &mut group)
                }
            }
            Value::Group(group)
        }
        NodeKind::Compare(op) => {
            let (lhs, rhs) = (child_value(0)?, child_value(1)?);
            group.assign_sorted((0..n).filter(|&atom| {
                match (lhs.numeric_at(atom), rhs.numeric_at(atom)) {
                    (Some(l), Some(r)) => op.compare(l, r),
                    _ => false,
                }
            }));
            Value::Group(group)
        }
        NodeKind::Arithmetic(op) => {
            let a = child_value(0)?;
            let b = if *op == ArithOp::Neg {
                None
            } else {
                Some(child_value(1)?)
            };
            let at = |v: &Value, atom: usize| v.numeric_at(atom).unwrap_or(f64::NAN);
            match (a, b) {
                (Value::Scalar(x), None) => Value::Scalar(op.apply(*x, 0.0)),
                (Value::Scalar(x), Some(Value::Scalar(y))) => Value::Scalar(op.apply(*x, *y)),
                (a, b) => {
                    reals.clear();
                    reals.extend((0..n).map(|i| {
                        let rhs = b.map_or(0.0, |b| at(b, i));
                        op.apply(at(a, i), rhs)
                    }));
                    Value::Real(reals)
                }
            }
        }
        NodeKind::Positions(_) => {
            let d = plan
                .node_positions
                .get(&id)
                .copied()
                .ok_or_else(|| format!("no position descriptor for node {}", id))?;
            let set = group_of(nodes, child(0))?;
            resolver.compute(d, set, ctx.topology, &ctx.frame.positions, ctx.pbc)?;
            Value::Positions(d)
        }
        NodeKind::MethodCall {
            method,
            choices,
            matcher,
        } => {
            let sig = methods.signature(*method);

            // positions the arguments and the reference need, computed first
            for (i, _) in node.children.iter().enumerate() {
                if let Some(&d) = plan.implicit_positions.get(&(id, i)) {
                    let set = group_of(nodes, child(i))?;
                    resolver.compute(d, set, ctx.topology, &ctx.frame.positions, ctx.pbc)?;
                }
            }
            if let Some(&d) = plan.reference_positions.get(&id) {
                let positions = &ctx.frame.positions;
                resolver.compute(d, &plan.all_atoms, ctx.topology, positions, ctx.pbc)?;
            }

            let resolver = &*resolver;
            // borrows this frame's node values, so it cannot live in the arena pools
            let mut args = Vec::with_capacity(sig.params.len());
            let (mut next_child, mut next_choice) = (0, 0);
            for param in &sig.params {
                let arg = match param.kind {
                    ParamKind::Choice(_) => {
                        let word = choices
                            .get(next_choice)
                            .ok_or_else(|| format!("missing keyword argument to '{}'", sig.name))?;
                        next_choice += 1;
                        MethodArg::Choice(*word)
                    }
                    kind => {
                        let i = next_child;
                        next_child += 1;
                        let value = child_value(i)?;
                        match (kind, value) {
                            (ParamKind::Real, Value::Scalar(x)) => MethodArg::Real(*x),
                            (ParamKind::Group, Value::Group(g)) => MethodArg::Group(g),
                            (ParamKind::Positions, Value::Positions(d)) => {
                                MethodArg::Positions(resolver.get(*d).ok_or_else(|| {
                                    format!("positions {} not computed for this frame", d)
                                })?)
                            }
                            (ParamKind::Positions, Value::Group(_)) => {
                                let d = plan.implicit_positions.get(&(id, i)).ok_or_else(|| {
                                    format!(
                                        "no position descriptor for argument {} of '{}'",
                                        i, sig.name
                                    )
                                })?;
                                MethodArg::Positions(resolver.get(*d).ok_or_else(|| {
                                    format!("positions {} not computed for this frame", d)
                                })?)
                            }
                            (_, other) => {
                                return Err(format!(
                                    "unexpected argument {} to '{}'",
                                    other, sig.name
                                ))
                            }
                        }
                    }
                };
                args.push(arg);
            }

            let reference = plan
                .reference_positions
                .get(&id)
                .and_then(|d| resolver.get(*d));
            let ctx = EvalContext { reference, ..*ctx };
            let output = methods.get(*method).evaluate(&ctx, &args)?;
            match (output, matcher) {
                (MethodOutput::Group(g), _) => Value::Group(g),
                (MethodOutput::Str(values), Some(m)) => {
                    group.assign_sorted(
                        values
                            .iter()
                            .enumerate()
                            .filter(|(_, s)| m.matches_str(s))
                            .map(|(i, _)| i),
                    );
                    Value::Group(group)
                }
                (MethodOutput::Int(values), Some(m)) => {
                    group.assign_sorted(
                        values
                            .iter()
                            .enumerate()
                            .filter(|(_, v)| m.matches_int(**v))
                            .map(|(i, _)| i),
                    );
                    Value::Group(group)
                }
                (MethodOutput::Int(values), None) => Value::Int(values),
                (MethodOutput::Real(values), None) => Value::Real(values),
                (_, _) => {
                    return Err(format!(
                        "'{}' produced a value that cannot be used here",
                        sig.name
                    ))
                }
            }
        }
        NodeKind::GroupReference { .. } | NodeKind::VariableRef { .. } | NodeKind::Root(_) => {
            return Err(format!("node {} cannot be evaluated directly", id));
        }
    };
    Ok(value)
}

/// Per-selection trajectory averages after the last frame.
pub(crate) fn evaluate_final(
    roots: &mut [SelectionRoot],
    atom_count: usize,
    frame_count: usize,
) -> Result<()> {
    if frame_count == 0 {
        return Err(SelectionError::InvalidInput(
            "final evaluation needs a positive frame count".to_string(),
        ));
    }
    for root in roots.iter_mut().filter(|r| !r.is_variable()) {
        let state = &mut root.state;
        if state.frames != frame_count {
            log::warn!(
                "selection '{}' was evaluated for {} frames, averaging over {}",
                root.name,
                state.frames,
                frame_count
            );
        }
        let average = state.total_size as f64 / frame_count as f64;
        state.average_size = Some(average);
        state.average_fraction = Some(if atom_count > 0 {
            average / atom_count as f64
        } else {
            0.0
        });
    }
    Ok(())
}
