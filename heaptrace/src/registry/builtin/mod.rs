//! Units shipped with the crate.

pub mod classifiers;
pub mod data_structures;
pub mod filters;

use super::{Classifier, Factory, Filter};
use classifiers::{CallSitesClassifier, FnClassifier, TypeClassifier};
use filters::{ArrayFilter, DataStructureFilter, OnlyDomainObjects, OnlyRooted, StructureRole};

fn stateless(classifier: FnClassifier) -> Factory<dyn Classifier> {
    Factory::builtin(move || Box::new(classifier) as Box<dyn Classifier>)
}

/// Built-in classifier table, in listing order.
#[must_use]
pub fn classifiers() -> Vec<Factory<dyn Classifier>> {
    vec![
        Factory::builtin(|| Box::new(TypeClassifier::default()) as Box<dyn Classifier>),
        stateless(classifiers::ALLOCATION_SITE),
        Factory::builtin(|| Box::new(CallSitesClassifier::default()) as Box<dyn Classifier>),
        stateless(classifiers::SPACE),
        stateless(classifiers::SPACE_KIND),
        stateless(classifiers::ALLOCATING_THREAD),
        stateless(classifiers::ALLOCATOR),
        stateless(classifiers::ARRAY_LENGTH),
        stateless(classifiers::AGE),
        stateless(classifiers::OBJECT_SHAPE),
        stateless(classifiers::ROOT_KIND),
        stateless(classifiers::POINTED_FROM_TYPE),
    ]
}

/// Built-in filter table, in listing order.
#[must_use]
pub fn filters() -> Vec<Factory<dyn Filter>> {
    vec![
        Factory::builtin(|| Box::new(OnlyDomainObjects) as Box<dyn Filter>),
        Factory::builtin(|| Box::new(ArrayFilter::only_arrays()) as Box<dyn Filter>),
        Factory::builtin(|| Box::new(ArrayFilter::no_arrays()) as Box<dyn Filter>),
        Factory::builtin(|| Box::new(OnlyRooted) as Box<dyn Filter>),
        Factory::builtin(|| Box::new(DataStructureFilter::new(StructureRole::Leaf)) as Box<dyn Filter>),
        Factory::builtin(|| Box::new(DataStructureFilter::new(StructureRole::Internal)) as Box<dyn Filter>),
    ]
}
