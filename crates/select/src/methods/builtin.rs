//! Built-in selection methods.

use std::sync::Arc;

use rst_core::neighbors;

use super::keywords;
use super::{
    EvalContext, MethodArg, MethodFlags, MethodOutput, MethodSignature, ParamKind, ParamSpec,
    SelectionMethod,
};
use crate::ast::ValueType;
use crate::index::AtomIndexSet;

type EvalFn =
    for<'a> fn(&EvalContext<'a>, &[MethodArg<'_>]) -> Result<MethodOutput<'a>, String>;

/// Method backed by a plain function.
struct Builtin {
    signature: MethodSignature,
    eval: EvalFn,
}

impl SelectionMethod for Builtin {
    fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    fn evaluate<'a>(
        &self,
        ctx: &EvalContext<'a>,
        args: &[MethodArg<'_>],
    ) -> Result<MethodOutput<'a>, String> {
        (self.eval)(ctx, args)
    }
}

fn method(
    name: &'static str,
    aliases: &'static [&'static str],
    returns: ValueType,
    params: Vec<ParamSpec>,
    flags: MethodFlags,
    help: &'static str,
    eval: EvalFn,
) -> Arc<dyn SelectionMethod> {
    Arc::new(Builtin {
        signature: MethodSignature {
            name,
            aliases,
            returns,
            params,
            flags,
            help,
        },
        eval,
    })
}

/// Every built-in method.
#[rustfmt::skip]
pub fn all() -> Vec<Arc<dyn SelectionMethod>> {
    let topo = MethodFlags::REQUIRES_TOPOLOGY;
    let geometric = MethodFlags::DYNAMIC | MethodFlags::REFERENCE_POSITIONS;
    vec![
        method("all", &[], ValueType::Group, vec![], MethodFlags::empty(), "all atoms", eval_all),
        method("none", &[], ValueType::Group, vec![], MethodFlags::empty(), "no atoms", eval_none),
        method("name", &[], ValueType::Str, vec![], topo, "atom name", eval_name),
        method("type", &[], ValueType::Str, vec![], topo, "atom type", eval_type),
        method("resname", &[], ValueType::Str, vec![], topo, "residue name", eval_resname),
        method("resid", &["resnr"], ValueType::Int, vec![], topo, "residue number (1-based)", eval_resid),
        method("index", &[], ValueType::Int, vec![], MethodFlags::empty(), "atom index (0-based)", eval_index),
        method("molecule", &["mol"], ValueType::Int, vec![], topo, "molecule number (1-based)", eval_molecule),
        method("protein", &[], ValueType::Group, vec![], topo, "protein residues", eval_protein),
        method("water", &[], ValueType::Group, vec![], topo, "water residues", eval_water),
        method("backbone", &[], ValueType::Group, vec![], topo, "protein backbone atoms", eval_backbone),
        method("sidechain", &[], ValueType::Group, vec![], topo, "protein atoms not in the backbone", eval_sidechain),
        method("hydrogen", &[], ValueType::Group, vec![], topo, "atoms lighter than 1.1", eval_hydrogen),
        method("mass", &[], ValueType::Real, vec![], topo, "atom mass", eval_mass),
        method("charge", &[], ValueType::Real, vec![], topo, "atom charge", eval_charge),
        method("x", &[], ValueType::Real, vec![], geometric, "x coordinate", eval_x),
        method("y", &[], ValueType::Real, vec![], geometric, "y coordinate", eval_y),
        method("z", &[], ValueType::Real, vec![], geometric, "z coordinate", eval_z),
        method(
            "within",
            &[],
            ValueType::Group,
            vec![
                ParamSpec::new(None, ParamKind::Real),
                ParamSpec::new(Some("of"), ParamKind::Positions),
            ],
            geometric,
            "atoms within a cutoff of any position",
            eval_within,
        ),
        method(
            "distance",
            &["dist"],
            ValueType::Real,
            vec![ParamSpec::new(Some("from"), ParamKind::Positions)],
            geometric,
            "distance to the nearest position",
            eval_distance,
        ),
        method(
            "same",
            &[],
            ValueType::Group,
            vec![
                ParamSpec::new(None, ParamKind::Choice(&["residue", "molecule"])),
                ParamSpec::new(Some("as"), ParamKind::Group),
            ],
            topo,
            "complete residues or molecules of a group",
            eval_same,
        ),
    ]
}

fn bad_args(name: &str) -> String {
    format!("invalid arguments to '{}'", name)
}

fn eval_all<'a>(ctx: &EvalContext<'a>, _: &[MethodArg<'_>]) -> Result<MethodOutput<'a>, String> {
    Ok(MethodOutput::Group(AtomIndexSet::all(ctx.n_atoms)))
}

fn eval_none<'a>(_: &EvalContext<'a>, _: &[MethodArg<'_>]) -> Result<MethodOutput<'a>, String> {
    Ok(MethodOutput::Group(AtomIndexSet::new()))
}

fn eval_name<'a>(ctx: &EvalContext<'a>, _: &[MethodArg<'_>]) -> Result<MethodOutput<'a>, String> {
    let top = ctx.topology()?;
    Ok(MethodOutput::Str(
        top.atom_names.iter().map(|s| s.trim()).collect(),
    ))
}

fn eval_type<'a>(ctx: &EvalContext<'a>, _: &[MethodArg<'_>]) -> Result<MethodOutput<'a>, String> {
    let top = ctx.topology()?;
    Ok(MethodOutput::Str(
        top.atom_types.iter().map(|s| s.trim()).collect(),
    ))
}

fn eval_resname<'a>(
    ctx: &EvalContext<'a>,
    _: &[MethodArg<'_>],
) -> Result<MethodOutput<'a>, String> {
    let top = ctx.topology()?;
    let residues = top.atom_residue_indices();
    Ok(MethodOutput::Str(
        residues
            .iter()
            .map(|&r| top.residue_labels[r].trim())
            .collect(),
    ))
}

fn eval_resid<'a>(ctx: &EvalContext<'a>, _: &[MethodArg<'_>]) -> Result<MethodOutput<'a>, String> {
    let top = ctx.topology()?;
    Ok(MethodOutput::Int(
        top.atom_residue_indices()
            .into_iter()
            .map(|r| r as i64 + 1)
            .collect(),
    ))
}

fn eval_index<'a>(ctx: &EvalContext<'a>, _: &[MethodArg<'_>]) -> Result<MethodOutput<'a>, String> {
    Ok(MethodOutput::Int((0..ctx.n_atoms as i64).collect()))
}

fn eval_molecule<'a>(
    ctx: &EvalContext<'a>,
    _: &[MethodArg<'_>],
) -> Result<MethodOutput<'a>, String> {
    let top = ctx.topology()?;
    Ok(MethodOutput::Int(
        top.atom_molecule_indices()
            .into_iter()
            .map(|m| m as i64 + 1)
            .collect(),
    ))
}

/// Atoms whose residue name passes `pred`.
fn by_residue<'a>(
    ctx: &EvalContext<'a>,
    pred: impl Fn(&str) -> bool,
) -> Result<MethodOutput<'a>, String> {
    let top = ctx.topology()?;
    let mut atoms = Vec::new();
    for res in 0..top.n_residues() {
        if pred(&top.residue_labels[res]) {
            atoms.extend(top.residue_range(res));
        }
    }
    Ok(MethodOutput::Group(AtomIndexSet::from_unsorted(atoms)))
}

fn eval_protein<'a>(
    ctx: &EvalContext<'a>,
    _: &[MethodArg<'_>],
) -> Result<MethodOutput<'a>, String> {
    by_residue(ctx, keywords::is_protein_residue)
}

fn eval_water<'a>(ctx: &EvalContext<'a>, _: &[MethodArg<'_>]) -> Result<MethodOutput<'a>, String> {
    by_residue(ctx, keywords::is_water_residue)
}

fn protein_atoms(ctx: &EvalContext<'_>, backbone: bool) -> Result<AtomIndexSet, String> {
    let top = ctx.topology()?;
    let mut atoms = Vec::new();
    for res in 0..top.n_residues() {
        if !keywords::is_protein_residue(&top.residue_labels[res]) {
            continue;
        }
        atoms.extend(
            top.residue_range(res)
                .filter(|&a| keywords::is_backbone_atom(&top.atom_names[a]) == backbone),
        );
    }
    Ok(AtomIndexSet::from_unsorted(atoms))
}

fn eval_backbone<'a>(
    ctx: &EvalContext<'a>,
    _: &[MethodArg<'_>],
) -> Result<MethodOutput<'a>, String> {
    protein_atoms(ctx, true).map(MethodOutput::Group)
}

fn eval_sidechain<'a>(
    ctx: &EvalContext<'a>,
    _: &[MethodArg<'_>],
) -> Result<MethodOutput<'a>, String> {
    protein_atoms(ctx, false).map(MethodOutput::Group)
}

fn eval_hydrogen<'a>(
    ctx: &EvalContext<'a>,
    _: &[MethodArg<'_>],
) -> Result<MethodOutput<'a>, String> {
    let top = ctx.topology()?;
    Ok(MethodOutput::Group(
        top.masses
            .iter()
            .enumerate()
            .filter(|(_, &m)| m < keywords::HYDROGEN_MASS_LIMIT)
            .map(|(i, _)| i)
            .collect(),
    ))
}

fn eval_mass<'a>(ctx: &EvalContext<'a>, _: &[MethodArg<'_>]) -> Result<MethodOutput<'a>, String> {
    Ok(MethodOutput::Real(ctx.topology()?.masses.clone()))
}

fn eval_charge<'a>(
    ctx: &EvalContext<'a>,
    _: &[MethodArg<'_>],
) -> Result<MethodOutput<'a>, String> {
    Ok(MethodOutput::Real(ctx.topology()?.charges.clone()))
}

fn coordinate<'a>(ctx: &EvalContext<'a>, dim: usize) -> Result<MethodOutput<'a>, String> {
    Ok(MethodOutput::Real(
        (0..ctx.n_atoms)
            .map(|i| ctx.reference_position(i)[dim])
            .collect(),
    ))
}

fn eval_x<'a>(ctx: &EvalContext<'a>, _: &[MethodArg<'_>]) -> Result<MethodOutput<'a>, String> {
    coordinate(ctx, 0)
}

fn eval_y<'a>(ctx: &EvalContext<'a>, _: &[MethodArg<'_>]) -> Result<MethodOutput<'a>, String> {
    coordinate(ctx, 1)
}

fn eval_z<'a>(ctx: &EvalContext<'a>, _: &[MethodArg<'_>]) -> Result<MethodOutput<'a>, String> {
    coordinate(ctx, 2)
}

fn eval_within<'a>(
    ctx: &EvalContext<'a>,
    args: &[MethodArg<'_>],
) -> Result<MethodOutput<'a>, String> {
    let [MethodArg::Real(cutoff), MethodArg::Positions(positions)] = args else {
        return Err(bad_args("within"));
    };
    if *cutoff < 0.0 {
        return Err(format!("negative cutoff {} in 'within'", cutoff));
    }
    let mut queries = ctx.arena.coords();
    queries.extend((0..ctx.n_atoms).map(|i| ctx.reference_position(i)));
    let mask = neighbors::within_cutoff(&queries, &positions.coords, *cutoff, ctx.pbc);
    Ok(MethodOutput::Group(AtomIndexSet::from_mask(&mask)))
}

fn eval_distance<'a>(
    ctx: &EvalContext<'a>,
    args: &[MethodArg<'_>],
) -> Result<MethodOutput<'a>, String> {
    let [MethodArg::Positions(positions)] = args else {
        return Err(bad_args("distance"));
    };
    if positions.is_empty() {
        return Err("no positions to measure the distance from".to_string());
    }
    let mut queries = ctx.arena.coords();
    queries.extend((0..ctx.n_atoms).map(|i| ctx.reference_position(i)));
    Ok(MethodOutput::Real(neighbors::nearest_distances(
        &queries,
        &positions.coords,
        ctx.pbc,
    )))
}

fn eval_same<'a>(
    ctx: &EvalContext<'a>,
    args: &[MethodArg<'_>],
) -> Result<MethodOutput<'a>, String> {
    let [MethodArg::Choice(block), MethodArg::Group(group)] = args else {
        return Err(bad_args("same"));
    };
    let top = ctx.topology()?;
    let molecule = *block == "molecule";
    let mut atoms = Vec::new();
    let mut last_block = None;
    for atom in group.iter() {
        let block = if molecule {
            top.molecule_of(atom)
        } else {
            top.residue_of(atom)
        };
        if last_block == Some(block) {
            continue;
        }
        last_block = Some(block);
        let range = if molecule {
            top.molecule_range(block)
        } else {
            top.residue_range(block)
        };
        atoms.extend(range);
    }
    Ok(MethodOutput::Group(AtomIndexSet::from_unsorted(atoms)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::EvalArena;
    use rst_core::frame::Frame;
    use rst_core::positions::{build_blocks, PositionType, Positions};
    use rst_core::topology::Topology;

    fn make_test_topology() -> Topology {
        // 6 atoms, 2 residues (ALA with 3 atoms, WAT with 3 atoms)
        let names = ["N", "CA", "C", "O", "H1", "H2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Topology::from_residues(names, vec!["ALA".into(), "WAT".into()], vec![0, 3])
            .unwrap()
            .with_masses(vec![14.0, 12.0, 12.0, 16.0, 1.008, 1.008])
            .unwrap()
            .with_charges(vec![0.1, -0.2, 0.3, -0.4, 0.5, 0.5])
            .unwrap()
            .with_molecules(vec![0, 3])
            .unwrap()
    }

    fn line_frame() -> Frame {
        Frame::new(vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [10.5, 0.0, 0.0],
            [11.0, 0.0, 0.0],
        ])
    }

    fn with_ctx<R>(f: impl FnOnce(&EvalContext<'_>) -> R) -> R {
        let top = make_test_topology();
        let frame = line_frame();
        let arena = EvalArena::new();
        let ctx = EvalContext {
            n_atoms: 6,
            topology: Some(&top),
            frame: &frame,
            pbc: None,
            reference: None,
            arena: &arena,
        };
        f(&ctx)
    }

    fn run<'a>(name: &str, ctx: &EvalContext<'a>, args: &[MethodArg<'_>]) -> MethodOutput<'a> {
        let m = all()
            .into_iter()
            .find(|m| m.signature().name == name)
            .unwrap();
        m.evaluate(ctx, args).unwrap()
    }

    fn group(out: MethodOutput<'_>) -> Vec<usize> {
        match out {
            MethodOutput::Group(g) => g.into_vec(),
            other => panic!("expected group, got {:?}", other),
        }
    }

    #[test]
    fn test_keyword_groups() {
        with_ctx(|ctx| {
            assert_eq!(group(run("protein", ctx, &[])), vec![0, 1, 2]);
            assert_eq!(group(run("water", ctx, &[])), vec![3, 4, 5]);
            assert_eq!(group(run("backbone", ctx, &[])), vec![0, 1, 2]);
            assert_eq!(group(run("sidechain", ctx, &[])), Vec::<usize>::new());
            assert_eq!(group(run("hydrogen", ctx, &[])), vec![4, 5]);
            assert_eq!(group(run("all", ctx, &[])).len(), 6);
            assert!(group(run("none", ctx, &[])).is_empty());
        });
    }

    #[test]
    fn test_value_methods() {
        with_ctx(|ctx| {
            assert_eq!(
                run("resname", ctx, &[]),
                MethodOutput::Str(vec!["ALA", "ALA", "ALA", "WAT", "WAT", "WAT"])
            );
            assert_eq!(run("resid", ctx, &[]), MethodOutput::Int(vec![1, 1, 1, 2, 2, 2]));
            assert_eq!(run("molecule", ctx, &[]), MethodOutput::Int(vec![1, 1, 1, 2, 2, 2]));
            assert_eq!(run("index", ctx, &[]), MethodOutput::Int(vec![0, 1, 2, 3, 4, 5]));
            match run("x", ctx, &[]) {
                MethodOutput::Real(x) => assert_eq!(x[4], 10.5),
                other => panic!("unexpected {:?}", other),
            }
        });
    }

    #[test]
    fn test_within_and_distance() {
        let positions = Positions {
            ptype: PositionType::ATOM,
            blocks: build_blocks(PositionType::ATOM, None, &[3]).unwrap(),
            coords: vec![[10.0, 0.0, 0.0]],
        };
        with_ctx(|ctx| {
            let within = run(
                "within",
                ctx,
                &[MethodArg::Real(1.5), MethodArg::Positions(&positions)],
            );
            assert_eq!(group(within), vec![3, 4, 5]);

            match run("distance", ctx, &[MethodArg::Positions(&positions)]) {
                MethodOutput::Real(d) => {
                    assert!((d[0] - 10.0).abs() < 1e-12);
                    assert!((d[5] - 1.0).abs() < 1e-12);
                }
                other => panic!("unexpected {:?}", other),
            }
        });
    }

    #[test]
    fn test_same_residue() {
        with_ctx(|ctx| {
            let g = AtomIndexSet::from_unsorted(vec![1, 4]);
            let out = run("same", ctx, &[MethodArg::Choice("residue"), MethodArg::Group(&g)]);
            assert_eq!(group(out), vec![0, 1, 2, 3, 4, 5]);
            let g = AtomIndexSet::from_unsorted(vec![5]);
            let out = run("same", ctx, &[MethodArg::Choice("molecule"), MethodArg::Group(&g)]);
            assert_eq!(group(out), vec![3, 4, 5]);
        });
    }
}
