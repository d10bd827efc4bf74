use heaptrace::domain::SpaceId;
use heaptrace::grouping::{ClassificationTree, Grouper, GroupingNode};
use heaptrace::registry::{ClassifierRegistry, FilterRegistry, Key};
use heaptrace::statistics::StatisticsCollector;
use heaptrace::stream::{Outcome, SourceCollection, TaskContext};
use heaptrace::symbols::Symbols;
use heaptrace::trace::HeapBuilder;
use heaptrace_common::{AllocPath, Allocator, GcKind, TraceEvent};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

const SYMBOLS: &str = r#"{
    "types": [
        {"id": 1, "name": "Lcom/acme/Order;", "size": 16},
        {"id": 2, "name": "Ljava/lang/String;", "size": 24}
    ],
    "sites": [
        {"id": 1, "call_sites": [{"signature": "com/acme/Shop.buy()V", "bci": 3}], "allocated_type": 1},
        {"id": 2, "call_sites": [{"signature": "com/acme/Shop.name()Ljava/lang/String;", "bci": 9}], "allocated_type": 2}
    ]
}"#;

fn symbols() -> Arc<Symbols> {
    Arc::new(Symbols::from_reader(SYMBOLS.as_bytes()).expect("valid symbols"))
}

fn alloc(address: u64, site: u32, size: u64) -> TraceEvent {
    TraceEvent::ObjAlloc {
        thread: 1,
        path: AllocPath::Normal,
        allocator: Allocator::C2,
        address: Some(address),
        site,
        deviant_type: None,
        array_length: None,
        size,
    }
}

fn write_trace(events: &[TraceEvent]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "# heaptrace test trace").unwrap();
    for event in events {
        writeln!(file, "{}", serde_json::to_string(event).unwrap()).unwrap();
    }
    file.flush().unwrap();
    file
}

fn registries() -> (ClassifierRegistry, FilterRegistry) {
    let (classifiers, _) = ClassifierRegistry::standard(None, SourceCollection::IndexBacked);
    let (filters, _) = FilterRegistry::standard(None, SourceCollection::IndexBacked);
    (classifiers, filters)
}

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(ToString::to_string).collect()
}

fn assert_balanced(tree: &ClassificationTree) {
    if let Some((node, expected)) = tree.root().check_balance() {
        panic!("{} holds {} objects, children account for {expected}", node.full_key_string(), node.objects);
    }
}

#[test]
fn test_single_move_scenario() {
    let trace = write_trace(&[
        TraceEvent::SpaceCreate { index: 0, start: 0x1000, size: 0x1000 },
        TraceEvent::SpaceCreate { index: 1, start: 0x2000, size: 0x1000 },
        alloc(0x1000, 1, 16),
        TraceEvent::GcStart { id: 1, kind: GcKind::Minor, cause: "scenario".to_string(), concurrent: false },
        TraceEvent::GcMove { from: 0x1000, to: 0x2000, space: Some(1) },
        TraceEvent::GcEnd { id: 1, kind: GcKind::Minor, cause: "scenario".to_string(), failed: false },
    ]);

    let mut builder = HeapBuilder::new(symbols()).with_statistics(StatisticsCollector::new(1));
    let summary = builder.replay_file(trace.path()).unwrap();
    assert_eq!(summary.events, 6);

    let (snapshot, statistics) = builder.finish();
    let end = statistics.last().expect("statistics at GC end");
    assert_eq!(end.space(SpaceId(0)).unwrap().objects, 0);
    assert_eq!(end.space(SpaceId(1)).unwrap().objects, 1);

    let (classifiers, filters) = registries();
    let grouper = Grouper::new(&classifiers, &filters, names(&["Type", "Allocation Site"]), Vec::new());
    let Outcome::Completed(tree) = grouper.list(&snapshot, &TaskContext::new()).unwrap() else {
        panic!("classification cancelled");
    };

    let leaves: Vec<&GroupingNode> = tree.leaves().into_iter().filter(|leaf| !leaf.is_filtered_bucket()).collect();
    assert_eq!(leaves.len(), 1);
    assert_eq!(leaves[0].full_key, vec![Key::text("com.acme.Order"), Key::text("Shop::buy():3")]);
    assert_eq!(leaves[0].objects, 1);
    assert_eq!(leaves[0].bytes, 16);
    assert_eq!(tree.filtered().unwrap().objects, 0);
}

#[test]
fn test_only_domain_objects_fills_filtered_bucket() {
    let mut builder = HeapBuilder::new(symbols());
    builder
        .replay(vec![
            TraceEvent::SpaceCreate { index: 0, start: 0x1000, size: 0x1000 },
            alloc(0x1000, 1, 16),
            alloc(0x1010, 2, 24),
        ])
        .unwrap();
    let (snapshot, _) = builder.finish();

    let (classifiers, filters) = registries();
    let grouper = Grouper::new(&classifiers, &filters, names(&["Type"]), names(&["Only Domain Objects"]));
    let tree = grouper.list(&snapshot, &TaskContext::new()).unwrap().completed().unwrap();

    assert_eq!(tree.object_count(), 2);
    let classified: Vec<&GroupingNode> =
        tree.root().children.values().filter(|child| !child.is_filtered_bucket()).collect();
    assert_eq!(classified.len(), 1);
    assert_eq!(classified[0].key, Key::text("com.acme.Order"));
    assert_eq!(classified[0].objects, 1);

    let filtered = tree.filtered().unwrap();
    assert_eq!(filtered.objects, 1);
    assert_eq!(filtered.bytes, 24);
}

#[test]
fn test_worker_count_does_not_change_counts() {
    let mut events = vec![
        TraceEvent::SpaceCreate { index: 0, start: 0x10_0000, size: 0x10_0000 },
        TraceEvent::ThreadAlive { id: 1, name: "main".to_string() },
    ];
    for i in 0..2000u64 {
        let site = if i % 3 == 0 { 2 } else { 1 };
        events.push(alloc(0x10_0000 + i * 32, site, 16 + (i % 2) * 8));
    }
    let mut builder = HeapBuilder::new(symbols());
    builder.replay(events).unwrap();
    let (snapshot, _) = builder.finish();

    let (classifiers, filters) = registries();
    let chain = names(&["Type", "Allocation Site", "Object Shape"]);
    let task = TaskContext::new();
    let single = Grouper::new(&classifiers, &filters, chain.clone(), Vec::new())
        .workers(1)
        .list(&snapshot, &task)
        .unwrap()
        .completed()
        .unwrap();
    assert_balanced(&single);

    for workers in [2, 3, 8] {
        let parallel = Grouper::new(&classifiers, &filters, chain.clone(), Vec::new())
            .workers(workers)
            .list(&snapshot, &task)
            .unwrap()
            .completed()
            .unwrap();

        let mut expected = Vec::new();
        single.root().walk(&mut |node| expected.push((node.full_key.clone(), node.objects, node.bytes)));
        let mut actual = Vec::new();
        parallel.root().walk(&mut |node| actual.push((node.full_key.clone(), node.objects, node.bytes)));
        assert_eq!(expected, actual, "{workers} workers");
    }
}

#[test]
fn test_malformed_trace_reports_line() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", serde_json::to_string(&TraceEvent::Cleanup).unwrap()).unwrap();
    writeln!(file, "{{\"event\": \"space_create\"}}").unwrap();
    file.flush().unwrap();

    let mut builder = HeapBuilder::new(symbols());
    let err = builder.replay_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("line 2"), "{err}");
}

#[test]
fn test_space_past_the_address_space_fails_the_replay() {
    let file = write_trace(&[
        TraceEvent::SpaceCreate { index: 0, start: 0x1000, size: 0x1000 },
        TraceEvent::SpaceCreate { index: 1, start: u64::MAX - 15, size: 256 },
        alloc(0x1000, 1, 16),
    ]);

    let mut builder = HeapBuilder::new(symbols());
    let err = builder.replay_file(file.path()).unwrap_err();
    assert!(matches!(err, heaptrace::domain::TraceError::AddressOverflow { size: 256, .. }), "{err}");
    assert!(err.to_string().contains("past the end of the address space"), "{err}");
}
