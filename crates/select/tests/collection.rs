use std::io::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rst_select::{
    AtomIndexSet, CollectionConfig, EvalContext, Frame, IndexGroups, Interactive, MethodArg,
    MethodFlags, MethodOutput, MethodSignature, ReaderSource, SelectionCollection, SelectionError,
    SelectionMethod, Topology,
};

// ALA 0-2, ALA 3-5, LIG 6-7
fn topology() -> Arc<Topology> {
    let names = ["N", "CA", "C", "N", "CA", "C", "C1", "C2"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let labels = vec!["ALA".into(), "ALA".into(), "LIG".into()];
    Arc::new(Topology::from_residues(names, labels, vec![0, 3, 6]).unwrap())
}

fn frame(lig: [f64; 2]) -> Frame {
    let mut positions: Vec<[f64; 3]> = (0..8).map(|i| [i as f64, 0.0, 0.0]).collect();
    positions[6][0] = lig[0];
    positions[7][0] = lig[1];
    Frame::new(positions)
}

fn first() -> Frame {
    frame([6.0, 7.0])
}

fn second() -> Frame {
    frame([2.5, 3.5])
}

fn collection() -> SelectionCollection {
    let mut sc = SelectionCollection::new();
    sc.set_topology(Some(topology()), 0).unwrap();
    sc
}

fn atoms(sc: &SelectionCollection, i: usize) -> Vec<usize> {
    sc.selections().nth(i).unwrap().atoms().as_slice().to_vec()
}

#[test]
fn test_intersection_is_subset() {
    let mut sc = collection();
    sc.parse_from_string("name CA; name CA and resid 1; not name CA")
        .unwrap();
    sc.compile().unwrap();
    sc.evaluate(&first(), None).unwrap();

    let ca = atoms(&sc, 0);
    let ca_res1 = atoms(&sc, 1);
    let not_ca = atoms(&sc, 2);
    assert_eq!(ca, vec![1, 4]);
    assert_eq!(ca_res1, vec![1]);
    assert!(ca_res1.iter().all(|a| ca.contains(a)));
    assert_eq!(ca.len() + not_ca.len(), 8);
    assert!(not_ca.iter().all(|a| !ca.contains(a)));
}

#[test]
fn test_within_follows_the_frame() {
    let mut sc = collection();
    let handles = sc
        .parse_from_string("within 1.2 of res_com of resname LIG")
        .unwrap();
    sc.compile().unwrap();

    sc.evaluate(&first(), None).unwrap();
    assert_eq!(sc.selection(handles[0]).unwrap().atoms().as_slice(), &[6, 7]);
    sc.evaluate(&second(), None).unwrap();
    assert_eq!(
        sc.selection(handles[0]).unwrap().atoms().as_slice(),
        &[2, 3, 4, 6, 7]
    );

    sc.evaluate_final(2).unwrap();
    let view = sc.selection(handles[0]).unwrap();
    assert_eq!(view.frames(), 2);
    assert_eq!(view.average_size(), Some(3.5));
    assert_eq!(view.average_fraction(), Some(3.5 / 8.0));
}

#[test]
fn test_shared_positions_computed_once_per_frame() {
    let mut sc = collection();
    sc.parse_from_string(
        "within 1.2 of res_com of resname LIG\ndistance from res_com of resname LIG < 3",
    )
    .unwrap();
    sc.compile().unwrap();
    // one shared res_com descriptor plus one output descriptor per selection
    assert_eq!(sc.position_resolver().len(), 3);

    sc.evaluate(&first(), None).unwrap();
    sc.evaluate(&second(), None).unwrap();
    let shared: Vec<u64> = sc
        .position_resolver()
        .iter()
        .filter(|(_, d)| d.position_type().to_string() == "res_com")
        .map(|(_, d)| d.evaluations())
        .collect();
    assert_eq!(shared, vec![2]);
}

#[test]
fn test_index_groups_by_name_and_number() {
    let mut sc = collection();
    let groups = Arc::new(IndexGroups::new().with_group("A", [0, 2, 4]).with_group("B", [7]));
    sc.set_index_groups(Some(groups)).unwrap();
    sc.parse_from_string("group \"A\"; A; group 1 or A").unwrap();
    sc.compile().unwrap();
    for frame in [first(), second()] {
        sc.evaluate(&frame, None).unwrap();
        assert_eq!(atoms(&sc, 0), vec![0, 2, 4]);
        assert_eq!(atoms(&sc, 1), vec![0, 2, 4]);
        assert_eq!(atoms(&sc, 2), vec![0, 2, 4, 7]);
    }
}

#[test]
fn test_late_group_binding() {
    let mut sc = collection();
    sc.parse_from_string("group \"A\" and name CA").unwrap();
    assert!(matches!(
        sc.compile(),
        Err(SelectionError::UnresolvedGroup(_))
    ));

    sc.set_index_groups(Some(Arc::new(IndexGroups::new().with_group("A", [0, 1, 2]))))
        .unwrap();
    sc.compile().unwrap();
    sc.evaluate(&first(), None).unwrap();
    assert_eq!(atoms(&sc, 0), vec![1]);
}

#[test]
fn test_clearing_groups_fails_remaining_references() {
    let mut sc = collection();
    sc.parse_from_string("group \"A\"").unwrap();
    let err = sc.set_index_groups(None).unwrap_err();
    assert!(matches!(err, SelectionError::UnresolvedGroup(_)));
    assert!(err.to_string().contains("no index groups"));
}

#[test]
fn test_group_binding_is_exclusive() {
    let mut sc = collection();
    let groups = Arc::new(IndexGroups::new().with_group("A", [0]));
    sc.set_index_groups(Some(groups.clone())).unwrap();
    sc.set_index_groups(Some(groups)).unwrap();

    let other = Arc::new(IndexGroups::new().with_group("B", [1]));
    assert!(matches!(
        sc.set_index_groups(Some(other.clone())),
        Err(SelectionError::DuplicateBinding(_))
    ));
    sc.set_index_groups(None).unwrap();
    sc.set_index_groups(Some(other)).unwrap();
}

#[test]
fn test_group_names_do_not_shadow_methods() {
    let mut sc = collection();
    let groups = Arc::new(IndexGroups::new().with_group("water", [0, 1]));
    sc.set_index_groups(Some(groups)).unwrap();
    sc.parse_from_string("water; group \"water\"").unwrap();
    sc.compile().unwrap();
    sc.evaluate(&first(), None).unwrap();
    assert!(atoms(&sc, 0).is_empty());
    assert_eq!(atoms(&sc, 1), vec![0, 1]);
}

#[test]
fn test_missing_topology_for_reference_positions() {
    let mut sc = SelectionCollection::new();
    sc.set_reference_position_type("res_com").unwrap();
    sc.set_topology(None, 8).unwrap();
    sc.parse_from_string("within 1 of index 0").unwrap();
    assert!(sc.requires_topology());
    assert!(matches!(sc.compile(), Err(SelectionError::MissingTopology)));
}

#[test]
fn test_topology_free_selection() {
    let mut sc = SelectionCollection::new();
    sc.set_topology(None, 8).unwrap();
    sc.parse_from_string("index 0 to 2 or x > 6").unwrap();
    assert!(!sc.requires_topology());
    sc.compile().unwrap();
    sc.evaluate(&first(), None).unwrap();
    assert_eq!(atoms(&sc, 0), vec![0, 1, 2, 7]);
}

#[test]
fn test_too_few_selections() {
    let mut sc = collection();
    let mut source = ReaderSource::new("name CA\n".as_bytes());
    let err = sc.parse_interactive(&mut source, Some(2)).unwrap_err();
    assert!(matches!(err, SelectionError::Parse(_)));
    assert!(err.to_string().contains("Too few selections provided"));
    // an exact count is all or nothing
    assert_eq!(sc.len(), 0);

    let mut source = ReaderSource::new("name CA\nbogus\n".as_bytes());
    let err = sc.parse_interactive(&mut source, None).unwrap_err();
    assert!(matches!(err, SelectionError::Parse(_)));
    assert_eq!(sc.len(), 1);
}

#[test]
fn test_interactive_stops_at_expected_count() {
    let mut sc = collection();
    let mut out = Vec::new();
    let handles = {
        let mut source = Interactive::new(
            ReaderSource::new("name CA\nresname LIG\n".as_bytes()),
            &mut out,
        );
        sc.parse_interactive(&mut source, Some(1)).unwrap()
    };
    assert_eq!(handles.len(), 1);
    assert_eq!(sc.len(), 1);
    assert!(String::from_utf8(out).unwrap().starts_with("> "));
}

#[test]
fn test_failures_keep_accepted_statements() {
    let mut sc = collection();
    let err = sc.parse_from_string("resname ALA; bogus 3").unwrap_err();
    assert!(err.to_string().contains("Unknown keyword 'bogus'"));
    assert_eq!(sc.len(), 1);
}

#[test]
fn test_rollback_restores_the_forest() {
    let config = CollectionConfig {
        rollback_on_error: true,
        ..Default::default()
    };
    let mut sc = SelectionCollection::with_config(config);
    sc.set_topology(Some(topology()), 0).unwrap();
    sc.parse_from_string("name CA").unwrap();
    let nodes = sc.nodes().len();

    assert!(sc.parse_from_string("v = resname ALA; bogus 3").is_err());
    assert_eq!(sc.len(), 1);
    assert_eq!(sc.nodes().len(), nodes);
    // the variable name is free again
    sc.parse_from_string("v = index 0\nv").unwrap();
    assert_eq!(sc.len(), 2);
}

#[test]
fn test_rollback_of_group_binding() {
    let config = CollectionConfig {
        rollback_on_error: true,
        ..Default::default()
    };
    let mut sc = SelectionCollection::with_config(config);
    sc.set_topology(Some(topology()), 0).unwrap();
    sc.parse_from_string("group \"A\" or group \"Z\"").unwrap();
    let groups = Arc::new(IndexGroups::new().with_group("A", [0]));
    assert!(sc.set_index_groups(Some(groups)).is_err());

    let mut out = Vec::new();
    sc.print_tree(&mut out, false).unwrap();
    let tree = String::from_utf8(out).unwrap();
    assert!(tree.contains("GROUP_REF \"A\""));
    assert!(!tree.contains("CONST_GROUP"));
}

#[test]
fn test_dumps_are_deterministic() {
    let text = "ca = name CA\n\"near\" within 1.2 of res_com of resname LIG\nca and resid 2";
    let render = || {
        let mut sc = collection();
        sc.parse_from_string(text).unwrap();
        sc.compile().unwrap();
        sc.evaluate(&first(), None).unwrap();
        let mut out = Vec::new();
        sc.print_tree(&mut out, true).unwrap();
        sc.print_positions(&mut out).unwrap();
        sc.print_provenance(&mut out).unwrap();
        out
    };
    let a = render();
    assert_eq!(a, render());
    let a = String::from_utf8(a).unwrap();
    assert!(a.starts_with("Selection tree (3 roots,"));
    assert!(a.contains("METHOD within"));
    assert!(a.ends_with(
        "# Selections:\n#   ca = name CA\n#   \"near\" within 1.2 of res_com of resname LIG\n#   ca and resid 2\n#\n"
    ));
}

#[test]
fn test_provenance_lists_variables_first() {
    let mut sc = collection();
    sc.parse_from_string("name CA; v = resname LIG; v").unwrap();
    let mut out = Vec::new();
    sc.print_provenance(&mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "# Selections:\n#   v = resname LIG\n#   name CA\n#   v\n#\n"
    );
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn take(&self) -> String {
        String::from_utf8(std::mem::take(&mut *self.0.lock().unwrap())).unwrap()
    }
}

#[test]
fn test_debug_levels_gate_dumps() {
    let buf = SharedBuf::default();
    let mut sc = collection();
    sc.set_debug_sink(buf.clone());
    sc.parse_from_string("name CA").unwrap();
    sc.compile().unwrap();
    assert_eq!(buf.take(), "");

    sc.set_debug_level(1).unwrap();
    sc.compile().unwrap();
    sc.evaluate(&first(), None).unwrap();
    let out = buf.take();
    assert!(out.contains("==== after compilation ===="));
    assert!(out.contains("Position descriptors"));
    assert!(!out.contains("Evaluation plan"));
    assert!(!out.contains("after evaluation"));

    sc.set_debug_level(3).unwrap();
    sc.compile().unwrap();
    sc.evaluate(&first(), None).unwrap();
    let out = buf.take();
    assert!(out.contains("Evaluation plan"));
    assert!(out.contains("==== after evaluation ===="));
    assert!(out.contains("= group (2 atoms) 1 4"));
}

struct Counted {
    signature: MethodSignature,
    calls: Arc<AtomicUsize>,
}

impl SelectionMethod for Counted {
    fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    fn evaluate<'a>(
        &self,
        _ctx: &EvalContext<'a>,
        _args: &[MethodArg<'_>],
    ) -> std::result::Result<MethodOutput<'a>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MethodOutput::Group(AtomIndexSet::from_unsorted(vec![5, 6, 7])))
    }
}

#[test]
fn test_static_nodes_are_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut sc = collection();
    sc.register_method(Arc::new(Counted {
        signature: MethodSignature {
            name: "counted",
            aliases: &[],
            returns: rst_select::ast::ValueType::Group,
            params: vec![],
            flags: MethodFlags::empty(),
            help: "test method",
        },
        calls: calls.clone(),
    }))
    .unwrap();
    sc.parse_from_string("counted and within 1.2 of res_com of resname LIG")
        .unwrap();
    sc.compile().unwrap();
    sc.evaluate(&first(), None).unwrap();
    assert_eq!(atoms(&sc, 0), vec![6, 7]);
    sc.evaluate(&second(), None).unwrap();
    assert_eq!(atoms(&sc, 0), vec![6, 7]);
    sc.evaluate(&first(), None).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_evaluation_error_names_the_selection() {
    let mut sc = collection();
    sc.parse_from_string("distance from res_com of resname XYZ < 1")
        .unwrap();
    sc.compile().unwrap();
    match sc.evaluate(&first(), None) {
        Err(SelectionError::Evaluation { root, .. }) => {
            assert_eq!(root, "distance from res_com of resname XYZ < 1")
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

/// Every atom, unless atom 0 sits at negative x.
struct FailsOnNegativeX {
    signature: MethodSignature,
}

impl SelectionMethod for FailsOnNegativeX {
    fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    fn evaluate<'a>(
        &self,
        ctx: &EvalContext<'a>,
        _args: &[MethodArg<'_>],
    ) -> std::result::Result<MethodOutput<'a>, String> {
        if ctx.frame.positions[0][0] < 0.0 {
            return Err("atom 0 left the box".to_string());
        }
        Ok(MethodOutput::Group(AtomIndexSet::from_unsorted(
            (0..ctx.n_atoms).collect(),
        )))
    }
}

#[test]
fn test_failed_frame_does_not_affect_later_frames() {
    let mut sc = collection();
    sc.register_method(Arc::new(FailsOnNegativeX {
        signature: MethodSignature {
            name: "flaky",
            aliases: &[],
            returns: rst_select::ast::ValueType::Group,
            params: vec![],
            flags: MethodFlags::DYNAMIC,
            help: "test method",
        },
    }))
    .unwrap();
    sc.parse_from_string("flaky and within 1.2 of res_com of resname LIG")
        .unwrap();
    sc.compile().unwrap();

    sc.evaluate(&first(), None).unwrap();
    assert_eq!(atoms(&sc, 0), vec![6, 7]);

    let mut bad = first();
    bad.positions[0][0] = -1.0;
    assert!(matches!(
        sc.evaluate(&bad, None),
        Err(SelectionError::Evaluation { .. })
    ));
    assert_eq!(sc.arena_stats().outstanding, 0);

    sc.evaluate(&second(), None).unwrap();
    assert_eq!(atoms(&sc, 0), vec![2, 3, 4, 6, 7]);
    sc.evaluate(&first(), None).unwrap();
    assert_eq!(atoms(&sc, 0), vec![6, 7]);
    assert_eq!(sc.arena_stats().outstanding, 0);
}

#[test]
fn test_within_zero_cutoff_on_spread_out_atoms() {
    let mut sc = SelectionCollection::new();
    sc.set_topology(None, 2).unwrap();
    sc.parse_from_string("within 0.0 of index 0").unwrap();
    sc.compile().unwrap();
    let frame = Frame::new(vec![[0.0, 0.0, 0.0], [300.0, 300.0, 300.0]]);
    sc.evaluate(&frame, None).unwrap();
    assert_eq!(atoms(&sc, 0), vec![0]);
}

#[test]
fn test_frame_size_mismatch() {
    let mut sc = collection();
    sc.parse_from_string("all").unwrap();
    sc.compile().unwrap();
    let short = Frame::new(vec![[0.0; 3]; 4]);
    assert!(matches!(
        sc.evaluate(&short, None),
        Err(SelectionError::InvalidInput(_))
    ));
}

#[test]
fn test_type_errors_are_reported_together() {
    let mut sc = collection();
    sc.parse_from_string("name; mass and all").unwrap();
    let err = sc.compile().unwrap_err();
    assert!(matches!(err, SelectionError::TypeOrArity(_)));
    assert_eq!(err.diagnostics().map(|d| d.len()), Some(2));
}

#[test]
fn test_parse_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# backbone carbons").unwrap();
    writeln!(file, "name CA;").unwrap();
    writeln!(file, "resname LIG and \\").unwrap();
    writeln!(file, "  index 7").unwrap();
    file.flush().unwrap();

    let mut sc = collection();
    let handles = sc.parse_from_file(file.path()).unwrap();
    assert_eq!(handles.len(), 2);
    sc.compile().unwrap();
    sc.evaluate(&first(), None).unwrap();
    assert_eq!(sc.selection(handles[1]).unwrap().atoms().as_slice(), &[7]);

    let missing = file.path().with_extension("missing");
    assert!(matches!(
        sc.parse_from_file(&missing),
        Err(SelectionError::Io { .. })
    ));
}

#[test]
fn test_index_file_groups() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[ Ligand ]").unwrap();
    writeln!(file, "7 8").unwrap();
    writeln!(file, "[ Alpha ]").unwrap();
    writeln!(file, "2 5").unwrap();
    file.flush().unwrap();

    let groups = IndexGroups::read_ndx(file.path()).unwrap();
    let mut sc = collection();
    sc.set_index_groups(Some(Arc::new(groups))).unwrap();
    sc.parse_from_string("Ligand or Alpha").unwrap();
    sc.compile().unwrap();
    sc.evaluate(&first(), None).unwrap();
    assert_eq!(atoms(&sc, 0), vec![1, 4, 6, 7]);
}
