//! Classifiers: objects -> partition keys.

use crate::domain::ClassificationError;
use crate::stream::ObjectContext;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::unit::Unit;

/// A partition key produced by a classifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Key::Text(text.into())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(value) => write!(f, "{value}"),
            Key::Text(text) => write!(f, "{text}"),
        }
    }
}

impl From<&str> for Key {
    fn from(text: &str) -> Self {
        Key::Text(text.to_string())
    }
}

impl From<String> for Key {
    fn from(text: String) -> Self {
        Key::Text(text)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

/// Shape of the keys a classifier produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    /// Exactly one key per object
    One,
    /// Zero or more sibling keys; the object is counted under each
    Many,
    /// A key path creating nested nodes
    Hierarchy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    One(Key),
    Many(Vec<Key>),
    Hierarchy(Vec<Key>),
}

pub trait Classifier: Unit {
    fn kind(&self) -> ClassifierKind;

    /// # Errors
    ///
    /// Any failure aborts the classification request.
    fn classify(&mut self, object: &ObjectContext<'_>) -> Result<Classification, ClassificationError>;
}

/// Ordered classifiers applied level by level.
pub struct ClassifierChain {
    classifiers: Vec<Box<dyn Classifier>>,
}

impl fmt::Debug for ClassifierChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClassifierChain").field(&self.names()).finish()
    }
}

impl fmt::Display for ClassifierChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", chain_label(&self.names()))
    }
}

/// `(Type) -> (Allocation Site)`
#[must_use]
pub fn chain_label(names: &[String]) -> String {
    names.iter().map(|name| format!("({name})")).collect::<Vec<_>>().join(" -> ")
}

impl ClassifierChain {
    #[must_use]
    pub fn new(classifiers: Vec<Box<dyn Classifier>>) -> Self {
        Self { classifiers }
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.classifiers.iter().map(|c| c.name().to_string()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classifiers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classifiers.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Classifier>> {
        self.classifiers.iter_mut()
    }

    pub fn get_mut(&mut self, level: usize) -> Option<&mut Box<dyn Classifier>> {
        self.classifiers.get_mut(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_label() {
        let names = vec!["Type".to_string(), "Allocation Site".to_string()];
        assert_eq!(chain_label(&names), "(Type) -> (Allocation Site)");
        assert_eq!(chain_label(&[]), "");
    }

    #[test]
    fn test_key_serde_is_untagged() {
        assert_eq!(serde_json::to_string(&Key::Int(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&Key::text("a")).unwrap(), "\"a\"");
        assert_eq!(serde_json::from_str::<Key>("\"a\"").unwrap(), Key::text("a"));
        assert_eq!(serde_json::from_str::<Key>("7").unwrap(), Key::Int(7));
    }
}
