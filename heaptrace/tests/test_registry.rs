use heaptrace::domain::{SiteId, TypeId};
use heaptrace::grouping::Grouper;
use heaptrace::heap::HeapSnapshot;
use heaptrace::registry::{ClassifierRegistry, FilterRegistry, Key, Unit, UnitOrigin};
use heaptrace::stream::{SourceCollection, TaskContext};
use heaptrace::symbols::{AllocatedType, AllocationSite, Symbols};
use heaptrace::trace::HeapBuilder;
use heaptrace_common::{AllocPath, Allocator, TraceEvent};
use std::fs;
use std::sync::Arc;

fn alloc(address: u64, site: u32, size: u64) -> TraceEvent {
    TraceEvent::ObjAlloc {
        thread: 1,
        path: AllocPath::Slow,
        allocator: Allocator::Vm,
        address: Some(address),
        site,
        deviant_type: None,
        array_length: None,
        size,
    }
}

/// One application object and one runtime object
fn snapshot() -> HeapSnapshot {
    let mut symbols = Symbols::new();
    symbols.add_type(AllocatedType::new(TypeId(1), "Lcom/acme/Order;", 16));
    symbols.add_type(AllocatedType::new(TypeId(2), "Ljava/util/HashMap;", 48));
    symbols.add_site(AllocationSite::new(SiteId(1), vec![], TypeId(1)));
    symbols.add_site(AllocationSite::new(SiteId(2), vec![], TypeId(2)));

    let mut builder = HeapBuilder::new(Arc::new(symbols));
    builder
        .replay(vec![
            TraceEvent::SpaceCreate { index: 0, start: 0x1000, size: 0x1000 },
            alloc(0x1000, 1, 16),
            alloc(0x1010, 2, 48),
        ])
        .unwrap();
    builder.finish().0
}

#[test]
fn test_plugin_shadows_builtin_classifier() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("type.json"),
        r#"{"unit": "classifier", "name": "Type", "rule": {"type_groups": {
            "groups": [{"prefix": "com.acme.", "label": "application"}],
            "fallback": "runtime"
        }}}"#,
    )
    .unwrap();

    let (builtin, _) = ClassifierRegistry::standard(None, SourceCollection::IndexBacked);
    let (classifiers, report) = ClassifierRegistry::standard(Some(dir.path()), SourceCollection::IndexBacked);
    assert_eq!(report.plugins, 1);
    assert!(report.failures.is_empty());
    assert_eq!(classifiers.len(), builtin.len());
    assert!(matches!(classifiers.factory("Type").unwrap().origin(), UnitOrigin::Plugin(_)));

    let (filters, _) = FilterRegistry::standard(None, SourceCollection::IndexBacked);
    let grouper = Grouper::new(&classifiers, &filters, vec!["Type".to_string()], Vec::new());
    let tree = grouper.list(&snapshot(), &TaskContext::new()).unwrap().completed().unwrap();

    assert_eq!(tree.find(&[Key::text("application")]).unwrap().objects, 1);
    assert_eq!(tree.find(&[Key::text("runtime")]).unwrap().objects, 1);
    assert!(tree.find(&[Key::text("com.acme.Order")]).is_none());
}

#[test]
fn test_lookup_builds_fresh_instances() {
    let (classifiers, _) = ClassifierRegistry::standard(None, SourceCollection::IndexBacked);

    let mut first = classifiers.lookup("Type").unwrap();
    first.set_property("full_name", "false").unwrap();
    assert_eq!(first.properties()[0].value, "false");

    let second = classifiers.lookup("Type").unwrap();
    assert_eq!(second.properties()[0].value, "true");
}

#[test]
fn test_broken_plugin_does_not_stop_loading() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a_broken.json"), "{ not json").unwrap();
    fs::write(
        dir.path().join("b_acme.json"),
        r#"[
            {"unit": "filter", "name": "Acme Only", "rule": {"type_prefix": {"prefixes": ["com.acme."]}}},
            {"unit": "classifier", "name": "Package", "rule": {"package": {"depth": 2}}}
        ]"#,
    )
    .unwrap();

    let (classifiers, classifier_report) =
        ClassifierRegistry::standard(Some(dir.path()), SourceCollection::IndexBacked);
    let (filters, filter_report) = FilterRegistry::standard(Some(dir.path()), SourceCollection::IndexBacked);
    assert_eq!(classifier_report.failures.len(), 1);
    assert_eq!(filter_report.failures.len(), 1);
    assert!(classifiers.contains("Package"));
    assert!(filters.contains("Acme Only"));

    let grouper = Grouper::new(&classifiers, &filters, vec!["Package".to_string()], vec!["Acme Only".to_string()]);
    let tree = grouper.list(&snapshot(), &TaskContext::new()).unwrap().completed().unwrap();
    assert_eq!(tree.find(&[Key::text("com.acme")]).unwrap().objects, 1);
    assert_eq!(tree.filtered().unwrap().objects, 1);
}
