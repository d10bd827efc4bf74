use heaptrace::diff::{HeapEvolution, Lifetime, PermBornDiedTempGrouping};
use heaptrace::domain::{ClassificationError, GcId, SiteId, TypeId};
use heaptrace::grouping::Grouper;
use heaptrace::registry::{ClassifierRegistry, FilterRegistry, Key};
use heaptrace::stream::{SourceCollection, TaskContext};
use heaptrace::symbols::{AllocatedType, AllocationSite, Symbols};
use heaptrace::trace::HeapBuilder;
use heaptrace_common::{AllocPath, Allocator, GcKind, RootKind, TraceEvent};
use std::sync::Arc;

const ORDER: u32 = 1;
const ITEM: u32 = 2;

fn symbols() -> Arc<Symbols> {
    let mut symbols = Symbols::new();
    symbols.add_type(AllocatedType::new(TypeId(1), "Lcom/acme/Order;", 16));
    symbols.add_type(AllocatedType::new(TypeId(2), "Lcom/acme/Item;", 16));
    symbols.add_site(AllocationSite::new(SiteId(ORDER), vec![], TypeId(1)));
    symbols.add_site(AllocationSite::new(SiteId(ITEM), vec![], TypeId(2)));
    Arc::new(symbols)
}

fn alloc(address: u64, site: u32) -> TraceEvent {
    TraceEvent::ObjAlloc {
        thread: 1,
        path: AllocPath::Normal,
        allocator: Allocator::C1,
        address: Some(address),
        site,
        deviant_type: None,
        array_length: None,
        size: 16,
    }
}

fn mv(from: u64, to: u64) -> TraceEvent {
    TraceEvent::GcMove { from, to, space: None }
}

fn root(address: u64) -> TraceEvent {
    TraceEvent::GcRoot { address, root: RootKind::JniGlobal { weak: false } }
}

fn gc(id: u32, body: Vec<TraceEvent>) -> Vec<TraceEvent> {
    let mut events =
        vec![TraceEvent::GcStart { id, kind: GcKind::Minor, cause: "diff".to_string(), concurrent: false }];
    events.extend(body);
    events.push(TraceEvent::GcEnd { id, kind: GcKind::Minor, cause: "diff".to_string(), failed: false });
    events
}

/// Eden at 0x1000, old at 0x2000.
///
/// ```text
/// GC1: A, G promoted; B dies before the window      window opens: {A, G}
/// GC2: C promoted; D and E die young                 temp: D, E
/// GC3: old collected; G and C compacted, A dies      died: A
/// end: G perm; C and F born
/// ```
///
/// G is rooted from GC1 on, C instead of G from GC3 on.
fn trace() -> Vec<TraceEvent> {
    let mut events = vec![
        TraceEvent::SpaceCreate { index: 0, start: 0x1000, size: 0x1000 },
        TraceEvent::SpaceCreate { index: 1, start: 0x2000, size: 0x1000 },
        alloc(0x1000, ORDER),
        alloc(0x1010, ORDER),
        alloc(0x1020, ORDER),
    ];
    events.extend(gc(
        1,
        vec![mv(0x1000, 0x2000), mv(0x1020, 0x2010), root(0x2010), TraceEvent::GcInfo { space: 0, gc_id: 1 }],
    ));
    events.extend([alloc(0x1000, ITEM), alloc(0x1010, ITEM), alloc(0x1020, ORDER)]);
    events.extend(gc(2, vec![mv(0x1000, 0x2020), TraceEvent::GcInfo { space: 0, gc_id: 2 }]));
    events.push(alloc(0x1000, ITEM));
    events.extend(gc(
        3,
        vec![mv(0x2010, 0x2030), mv(0x2020, 0x2040), root(0x2040), TraceEvent::GcInfo { space: 1, gc_id: 3 }],
    ));
    events
}

fn replay(evolution: &mut HeapEvolution) {
    let mut builder = HeapBuilder::new(symbols());
    builder.add_listener(evolution);
    builder.replay(trace()).unwrap();
}

fn registries() -> (ClassifierRegistry, FilterRegistry) {
    let (classifiers, _) = ClassifierRegistry::standard(None, SourceCollection::IndexBacked);
    let (filters, _) = FilterRegistry::standard(None, SourceCollection::IndexBacked);
    (classifiers, filters)
}

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(ToString::to_string).collect()
}

/// Diff of the GC1..GC3 window by `chain`, checked against trees of the
/// window's own start and end heaps.
fn balanced_diff(chain: &[&str], filters: &[&str]) -> PermBornDiedTempGrouping {
    let mut evolution = HeapEvolution::new(GcId(1), GcId(3));
    replay(&mut evolution);

    let (classifier_registry, filter_registry) = registries();
    let grouper = Grouper::new(&classifier_registry, &filter_registry, names(chain), names(filters));
    let task = TaskContext::new();
    let diff = evolution.grouping(&grouper, &task).unwrap().completed().unwrap();

    let before = grouper.list(&**evolution.start_snapshot().unwrap(), &task).unwrap().completed().unwrap();
    let after = grouper.list(&**evolution.end_snapshot().unwrap(), &task).unwrap().completed().unwrap();
    let imbalances: Vec<String> = diff.imbalances(&before, &after).iter().map(ToString::to_string).collect();
    assert!(imbalances.is_empty(), "{chain:?} / {filters:?}: {}", imbalances.join("; "));
    diff
}

#[test]
fn test_perm_born_died_temp_partition() {
    let mut evolution = HeapEvolution::new(GcId(1), GcId(3));
    replay(&mut evolution);
    assert!(evolution.is_closed());
    assert_eq!(evolution.tracked_count(), 1);
    assert_eq!(evolution.died().object_count(), 1);
    assert_eq!(evolution.temp().object_count(), 2);

    let (classifiers, filters) = registries();
    let grouper = Grouper::new(&classifiers, &filters, vec!["Type".to_string()], Vec::new());
    let task = TaskContext::new();
    let diff = evolution.grouping(&grouper, &task).unwrap().completed().unwrap();

    let order = [Key::text("com.acme.Order")];
    let item = [Key::text("com.acme.Item")];
    let row = diff.row(&order);
    assert_eq!((row.perm_start.objects, row.born.objects, row.died.objects), (1, 0, 1));
    assert_eq!(row.perm_end, row.perm_start);
    assert_eq!(row.temp.unwrap().objects, 1);
    let row = diff.row(&item);
    assert_eq!((row.perm_start.objects, row.born.objects, row.died.objects), (0, 2, 0));
    assert_eq!(row.temp.unwrap().objects, 1);

    let total = diff.row(&[]);
    assert_eq!(total.before().objects, 2);
    assert_eq!(total.after().objects, 3);
    assert_eq!(total.after().bytes, 48);

    let children = diff.children(&[]);
    assert!(children.contains(&order[0]));
    assert!(children.contains(&item[0]));
    assert!(diff.tree(Lifetime::Perm).unwrap().find(&item).is_none());

    // Before and after match the window's own start and end heaps
    let before = grouper.list(&**evolution.start_snapshot().unwrap(), &task).unwrap().completed().unwrap();
    let after = grouper.list(&**evolution.end_snapshot().unwrap(), &task).unwrap().completed().unwrap();
    assert!(diff.imbalances(&before, &after).is_empty());
}

#[test]
fn test_single_gc_window_is_all_perm() {
    let mut evolution = HeapEvolution::new(GcId(2), GcId(2));
    replay(&mut evolution);
    assert!(evolution.is_closed());

    let (classifiers, filters) = registries();
    let grouper = Grouper::new(&classifiers, &filters, vec!["Type".to_string()], Vec::new());
    let diff = evolution.grouping(&grouper, &TaskContext::new()).unwrap().completed().unwrap();

    let total = diff.row(&[]);
    assert_eq!(total.perm_start.objects, 3);
    assert_eq!(total.perm_end.objects, 3);
    assert_eq!(total.born.objects + total.died.objects, 0);
    assert_eq!(total.temp.unwrap().objects, 0);
}

#[test]
fn test_window_beyond_trace_is_incomplete() {
    let mut evolution = HeapEvolution::new(GcId(2), GcId(9));
    replay(&mut evolution);
    assert!(!evolution.is_closed());

    let (classifiers, filters) = registries();
    let grouper = Grouper::new(&classifiers, &filters, vec!["Type".to_string()], Vec::new());
    assert!(matches!(
        evolution.grouping(&grouper, &TaskContext::new()),
        Err(ClassificationError::IncompleteWindow { from: GcId(2), to: GcId(9) })
    ));
}

#[test]
fn test_space_chain_balances() {
    let diff = balanced_diff(&["Space"], &[]);
    let old = diff.row(&[Key::text("Space#1")]);
    assert_eq!((old.perm_start.objects, old.died.objects), (1, 1));
    assert_eq!((old.perm_end.objects, old.born.objects), (1, 1));
    let eden = diff.row(&[Key::text("Space#0")]);
    assert_eq!((eden.before().objects, eden.after().objects), (0, 1));
}

#[test]
fn test_age_chain_keys_perm_by_its_age_at_each_end() {
    let diff = balanced_diff(&["Age"], &[]);
    // G survived one collection at the window start and two at its end
    let once = diff.row(&[Key::Int(1)]);
    assert_eq!((once.perm_start.objects, once.died.objects, once.perm_end.objects), (1, 1, 0));
    let twice = diff.row(&[Key::Int(2)]);
    assert_eq!((twice.perm_start.objects, twice.perm_end.objects, twice.born.objects), (0, 1, 1));
    balanced_diff(&["Type", "Age"], &[]);
}

#[test]
fn test_root_kind_chain_balances_without_temp() {
    let diff = balanced_diff(&["Root Kind"], &[]);
    assert!(diff.temp.is_none());
    assert!(diff.tree(Lifetime::Temp).is_none());
    assert_eq!(diff.died.object_count(), 1);

    let jni = diff.row(&[Key::text("JNI Global")]);
    assert_eq!(jni.perm_start.objects, 1);
    assert_eq!(jni.perm_end.objects, 0);
    assert_eq!(jni.born.objects, 1);
    assert_eq!(jni.temp, None);
    balanced_diff(&["Type", "Root Kind"], &[]);
}

#[test]
fn test_only_rooted_filter_balances() {
    let diff = balanced_diff(&["Type"], &["Only Rooted"]);
    assert!(diff.temp.is_none());
    assert_eq!(diff.perm_start.filtered().unwrap().objects, 0);
    assert_eq!(diff.perm_end.filtered().unwrap().objects, 1);
    assert_eq!(diff.died.filtered().unwrap().objects, 1);
    assert_eq!(diff.born.filtered().unwrap().objects, 1);
}
