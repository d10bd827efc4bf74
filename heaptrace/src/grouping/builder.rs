//! Parallel construction of classification trees.
//!
//! Each worker owns a fresh filter chain, a fresh classifier chain and a
//! private partial tree. Partial trees are merged in worker order once all
//! workers are done.

use crate::domain::ClassificationError;
use crate::registry::{
    Classification, ClassifierChain, ClassifierRegistry, Filter, FilterRegistry, FilterVote, Key, SetupEnv,
};
use crate::stream::{
    ObjectContext, ObjectPopulation, ObjectStream, ObjectVisitor, Outcome, SourceCollection, TaskContext,
    ThreadVisitorGenerator,
};
use log::debug;
use std::collections::BTreeSet;

use super::node::{GroupingNode, FILTERED};
use super::tree::{ClassificationTree, PointerMaps, TreeKind};

/// Builds classification trees from a classifier and a filter chain.
pub struct Grouper<'r> {
    classifiers: &'r ClassifierRegistry,
    filters: &'r FilterRegistry,
    classifier_names: Vec<String>,
    filter_names: Vec<String>,
    workers: usize,
    pointer_maps: bool,
}

impl<'r> Grouper<'r> {
    #[must_use]
    pub fn new(
        classifiers: &'r ClassifierRegistry,
        filters: &'r FilterRegistry,
        classifier_names: Vec<String>,
        filter_names: Vec<String>,
    ) -> Self {
        Self {
            classifiers,
            filters,
            classifier_names,
            filter_names,
            workers: 0,
            pointer_maps: false,
        }
    }

    /// Parallel workers; `0` means available parallelism.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Also compute leaf-to-leaf pointer maps for list trees.
    #[must_use]
    pub fn with_pointer_maps(mut self, enabled: bool) -> Self {
        self.pointer_maps = enabled;
        self
    }

    #[must_use]
    pub fn classifier_names(&self) -> &[String] {
        &self.classifier_names
    }

    #[must_use]
    pub fn filter_names(&self) -> &[String] {
        &self.filter_names
    }

    /// Whether every classifier and filter of the chains admits `source`.
    ///
    /// Unknown names are not judged here; they fail when the chain is set up.
    #[must_use]
    pub fn runs_on(&self, source: SourceCollection) -> bool {
        let classifiers = self
            .classifier_names
            .iter()
            .filter_map(|name| self.classifiers.factory(name))
            .all(|factory| factory.source_collection().admits(source));
        let filters = self
            .filter_names
            .iter()
            .filter_map(|name| self.filters.factory(name))
            .all(|factory| factory.source_collection().admits(source));
        classifiers && filters
    }

    /// Index-backed tree: every node keeps its member indices.
    ///
    /// # Errors
    ///
    /// `NoMemberIndices` if `population` is not backed by a snapshot, and
    /// any registry, filter or classifier error.
    pub fn list<P: ObjectPopulation + ?Sized>(
        &self,
        population: &P,
        task: &TaskContext,
    ) -> Result<Outcome<ClassificationTree>, ClassificationError> {
        let Some(snapshot) = population.snapshot() else {
            return Err(ClassificationError::NoMemberIndices);
        };
        let outcome = self.build(population, task, TreeKind::List)?;
        Ok(outcome.map(|mut tree| {
            if self.pointer_maps {
                let maps = PointerMaps::compute(tree.root(), snapshot);
                tree.set_pointer_maps(maps);
            }
            tree
        }))
    }

    /// Counts-only tree; works on any population.
    ///
    /// # Errors
    ///
    /// Any registry, filter or classifier error.
    pub fn map<P: ObjectPopulation + ?Sized>(
        &self,
        population: &P,
        task: &TaskContext,
    ) -> Result<Outcome<ClassificationTree>, ClassificationError> {
        self.build(population, task, TreeKind::Map)
    }

    fn build<P: ObjectPopulation + ?Sized>(
        &self,
        population: &P,
        task: &TaskContext,
        kind: TreeKind,
    ) -> Result<Outcome<ClassificationTree>, ClassificationError> {
        let generator = WorkerGenerator {
            grouper: self,
            env: SetupEnv {
                symbols: population.symbols(),
                source_collection: population.source_collection(),
                snapshot: population.snapshot(),
            },
            retain_members: kind == TreeKind::List,
        };
        let stream = ObjectStream::new(population).workers(self.workers);
        let workers = match stream.parallel(task, &generator)? {
            Outcome::Completed(workers) => workers,
            Outcome::Cancelled => return Ok(Outcome::Cancelled),
        };

        let mut tree = ClassificationTree::empty(kind, self.classifier_names.clone(), self.filter_names.clone());
        for worker in workers {
            tree.root_mut().merge(worker.root);
        }
        debug!(
            "Grouped {} objects by {} into {} leaves",
            tree.object_count(),
            tree.chain_label(),
            tree.leaves().len()
        );
        Ok(Outcome::Completed(tree))
    }
}

struct WorkerGenerator<'g, 'r> {
    grouper: &'g Grouper<'r>,
    env: SetupEnv<'g>,
    retain_members: bool,
}

impl ThreadVisitorGenerator for WorkerGenerator<'_, '_> {
    type Visitor = GroupingWorker;

    fn generate(&self, _worker: usize) -> Result<GroupingWorker, ClassificationError> {
        let chain = self.grouper.classifiers.chain(&self.grouper.classifier_names, &self.env)?;
        let filters = self.grouper.filters.filters(&self.grouper.filter_names, &self.env)?;
        let mut root = GroupingNode::root(self.retain_members);
        root.child(Key::text(FILTERED), None);
        Ok(GroupingWorker { chain, filters, root })
    }
}

/// Per-worker partial tree.
pub struct GroupingWorker {
    chain: ClassifierChain,
    filters: Vec<Box<dyn Filter>>,
    root: GroupingNode,
}

impl GroupingWorker {
    fn accepts(&mut self, object: &ObjectContext<'_>) -> Result<bool, ClassificationError> {
        for filter in &mut self.filters {
            let vote = filter.filter(object).map_err(|e| ClassificationError::FilterFailed {
                filter: filter.name().to_string(),
                object: object.describe(),
                reason: e.to_string(),
            })?;
            if vote == FilterVote::False {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl ObjectVisitor for GroupingWorker {
    fn visit(&mut self, object: &ObjectContext<'_>) -> Result<(), ClassificationError> {
        let (count, bytes) = (object.count, object.bytes());
        self.root.record(object.index, count, bytes);
        if self.accepts(object)? {
            descend(&mut self.root, &mut self.chain, 0, object)
        } else {
            let filtered = self.root.child(Key::text(FILTERED), None);
            filtered.record(object.index, count, bytes);
            filtered.record_leaf(count, bytes);
            Ok(())
        }
    }
}

/// Classify `object` with the chain from `level` on, below `node`.
///
/// `node` has already counted the object.
fn descend(
    node: &mut GroupingNode,
    chain: &mut ClassifierChain,
    mut level: usize,
    object: &ObjectContext<'_>,
) -> Result<(), ClassificationError> {
    let (count, bytes) = (object.count, object.bytes());
    loop {
        let Some(classifier) = chain.get_mut(level) else {
            node.record_leaf(count, bytes);
            return Ok(());
        };
        let name = classifier.name().to_string();
        let classification = classifier.classify(object).map_err(|e| match e {
            ClassificationError::PointersUnavailable(_) | ClassificationError::InvalidKey { .. } => e,
            other => ClassificationError::ClassifierFailed {
                classifier: name.clone(),
                object: object.describe(),
                reason: other.to_string(),
            },
        })?;

        match classification {
            Classification::One(key) => {
                check_key(&name, &key)?;
                let child = node.child(key, Some(&name));
                child.record(object.index, count, bytes);
                return descend(child, chain, level + 1, object);
            }
            Classification::Many(keys) => {
                let keys: BTreeSet<Key> = keys.into_iter().collect();
                if keys.is_empty() {
                    level += 1;
                    continue;
                }
                let extra = keys.len() as u64 - 1;
                node.duplicates += extra * count;
                node.duplicate_bytes += extra * bytes;
                for key in keys {
                    check_key(&name, &key)?;
                    let child = node.child(key, Some(&name));
                    child.record(object.index, count, bytes);
                    descend(child, chain, level + 1, object)?;
                }
                return Ok(());
            }
            Classification::Hierarchy(path) => {
                if path.is_empty() {
                    level += 1;
                    continue;
                }
                let mut current = node;
                for key in path {
                    check_key(&name, &key)?;
                    current = current.child(key, Some(&name));
                    current.record(object.index, count, bytes);
                }
                return descend(current, chain, level + 1, object);
            }
        }
    }
}

fn check_key(classifier: &str, key: &Key) -> Result<(), ClassificationError> {
    match key {
        Key::Text(text) if text.is_empty() => Err(ClassificationError::InvalidKey {
            classifier: classifier.to_string(),
            reason: "empty key".to_string(),
        }),
        _ => Ok(()),
    }
}
