//! Plugin loading from a directory of JSON unit descriptors.
//!
//! ## Descriptor Format
//!
//! ```json
//! {"unit": "filter", "name": "Acme Types", "rule": {"type_prefix": {"prefixes": ["com.acme."]}}}
//! {"unit": "classifier", "name": "Package", "rule": {"package": {"depth": 2}}}
//! ```
//!
//! Each `*.json` file holds one descriptor or an array of them. Files are
//! read in name order so that later files shadow earlier ones predictably.

use crate::domain::{ClassificationError, RegistryError};
use crate::stream::{ObjectContext, SourceCollection};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::classifier::{Classification, Classifier, ClassifierKind, Key};
use super::filter::{Filter, FilterVote};
use super::unit::{Capability, Unit};
use super::{load_failure, Factory, UnitOrigin};

/// Source of plugin factories for one registry kind.
pub trait UnitLoader<T: ?Sized> {
    /// One result per unit found in `dir`; failures do not stop the others.
    fn load(&self, dir: &Path) -> Vec<Result<Factory<T>, RegistryError>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierRule {
    /// First `depth` package segments of the type name
    Package { depth: usize },
    /// Shallow size bucketed by ascending upper bounds
    SizeBucket { bounds: Vec<u64> },
    /// Label of the first matching type-name prefix, else `fallback`
    TypeGroups { groups: Vec<TypeGroup>, fallback: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeGroup {
    pub prefix: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterRule {
    TypePrefix { prefixes: Vec<String> },
    MinSize { bytes: u64 },
    MinAge { collections: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum Descriptor {
    Classifier {
        name: String,
        #[serde(default)]
        description: String,
        rule: ClassifierRule,
    },
    Filter {
        name: String,
        #[serde(default)]
        description: String,
        rule: FilterRule,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DescriptorFile {
    One(Descriptor),
    Many(Vec<Descriptor>),
}

/// Reads every `*.json` descriptor in the plugin directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorLoader;

impl DescriptorLoader {
    fn read_all(dir: &Path) -> Vec<Result<(PathBuf, Descriptor), RegistryError>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(source) => {
                return vec![Err(RegistryError::DirectoryUnreadable {
                    path: dir.display().to_string(),
                    source,
                })]
            }
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut results = Vec::new();
        for path in paths {
            let parsed = fs::read_to_string(&path)
                .map_err(|e| load_failure(&path, e))
                .and_then(|text| {
                    serde_json::from_str::<DescriptorFile>(&text).map_err(|e| load_failure(&path, e))
                });
            match parsed {
                Ok(DescriptorFile::One(descriptor)) => results.push(Ok((path, descriptor))),
                Ok(DescriptorFile::Many(descriptors)) => {
                    results.extend(descriptors.into_iter().map(|d| Ok((path.clone(), d))));
                }
                Err(e) => results.push(Err(e)),
            }
        }
        debug!("Read {} plugin descriptors from {}", results.len(), dir.display());
        results
    }
}

impl UnitLoader<dyn Classifier> for DescriptorLoader {
    fn load(&self, dir: &Path) -> Vec<Result<Factory<dyn Classifier>, RegistryError>> {
        Self::read_all(dir)
            .into_iter()
            .filter_map(|result| match result {
                Ok((path, Descriptor::Classifier { name, description, rule })) => {
                    Some(validate_classifier(&rule).map_err(|e| load_failure(&path, e)).map(|()| {
                        Factory::new(UnitOrigin::Plugin(path), move || {
                            Box::new(RuleClassifier {
                                name: name.clone(),
                                description: description.clone(),
                                rule: rule.clone(),
                            }) as Box<dyn Classifier>
                        })
                    }))
                }
                Ok((_, Descriptor::Filter { .. })) => None,
                Err(e) => Some(Err(e)),
            })
            .collect()
    }
}

impl UnitLoader<dyn Filter> for DescriptorLoader {
    fn load(&self, dir: &Path) -> Vec<Result<Factory<dyn Filter>, RegistryError>> {
        Self::read_all(dir)
            .into_iter()
            .filter_map(|result| match result {
                Ok((path, Descriptor::Filter { name, description, rule })) => {
                    Some(Ok(Factory::new(UnitOrigin::Plugin(path), move || {
                        Box::new(RuleFilter {
                            name: name.clone(),
                            description: description.clone(),
                            rule: rule.clone(),
                        }) as Box<dyn Filter>
                    })))
                }
                Ok((_, Descriptor::Classifier { .. })) => None,
                // Directory errors are reported once, by the classifier side
                Err(RegistryError::DirectoryUnreadable { .. }) => None,
                Err(e) => Some(Err(e)),
            })
            .collect()
    }
}

fn validate_classifier(rule: &ClassifierRule) -> Result<(), String> {
    match rule {
        ClassifierRule::Package { depth: 0 } => Err("package depth must be at least 1".to_string()),
        ClassifierRule::SizeBucket { bounds } if !bounds.windows(2).all(|w| w[0] < w[1]) => {
            Err("size bucket bounds must be strictly ascending".to_string())
        }
        _ => Ok(()),
    }
}

// ============================================================================
// RULE-BASED UNITS
// ============================================================================

struct RuleClassifier {
    name: String,
    description: String,
    rule: ClassifierRule,
}

impl Unit for RuleClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn source_collection(&self) -> SourceCollection {
        SourceCollection::All
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Plugin]
    }
}

impl Classifier for RuleClassifier {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::One
    }

    fn classify(&mut self, object: &ObjectContext<'_>) -> Result<Classification, ClassificationError> {
        let key = match &self.rule {
            ClassifierRule::Package { depth } => {
                let name = object.type_name();
                let segments: Vec<&str> = name.split('.').collect();
                if segments.len() <= 1 {
                    "(default package)".to_string()
                } else {
                    let packages = &segments[..segments.len() - 1];
                    packages[..(*depth).min(packages.len())].join(".")
                }
            }
            ClassifierRule::SizeBucket { bounds } => {
                let size = object.size();
                match bounds.iter().find(|bound| size <= **bound) {
                    Some(bound) => format!("<= {bound}"),
                    None => format!("> {}", bounds.last().copied().unwrap_or(0)),
                }
            }
            ClassifierRule::TypeGroups { groups, fallback } => {
                let name = object.type_name();
                groups
                    .iter()
                    .find(|group| name.starts_with(&group.prefix))
                    .map_or_else(|| fallback.clone(), |group| group.label.clone())
            }
        };
        Ok(Classification::One(Key::Text(key)))
    }
}

struct RuleFilter {
    name: String,
    description: String,
    rule: FilterRule,
}

impl Unit for RuleFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Plugin]
    }
}

impl Filter for RuleFilter {
    fn filter(&mut self, object: &ObjectContext<'_>) -> Result<FilterVote, ClassificationError> {
        let keep = match &self.rule {
            FilterRule::TypePrefix { prefixes } => {
                let name = object.type_name();
                prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
            }
            FilterRule::MinSize { bytes } => object.size() >= *bytes,
            FilterRule::MinAge { collections } => object.age >= *collections,
        };
        Ok(keep.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ClassifierRegistry, FilterRegistry};
    use std::fs;

    #[test]
    fn test_descriptor_parsing() {
        let json = r#"{"unit": "classifier", "name": "Package", "rule": {"package": {"depth": 2}}}"#;
        let descriptor: Descriptor = serde_json::from_str(json).unwrap();
        assert_eq!(
            descriptor,
            Descriptor::Classifier {
                name: "Package".to_string(),
                description: String::new(),
                rule: ClassifierRule::Package { depth: 2 },
            }
        );
    }

    #[test]
    fn test_broken_descriptor_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.json"),
            r#"[{"unit": "classifier", "name": "Package", "rule": {"package": {"depth": 1}}},
                {"unit": "filter", "name": "Big", "rule": {"min_size": {"bytes": 64}}}]"#,
        )
        .unwrap();
        fs::write(dir.path().join("b.json"), "{ not json").unwrap();
        fs::write(
            dir.path().join("c.json"),
            r#"{"unit": "classifier", "name": "Bad", "rule": {"package": {"depth": 0}}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let (classifiers, report) =
            ClassifierRegistry::standard(Some(dir.path()), SourceCollection::IndexBacked);
        assert!(classifiers.contains("Package"));
        assert!(!classifiers.contains("Bad"));
        assert_eq!(report.plugins, 1);
        assert_eq!(report.failures.len(), 2);

        let (filters, report) = FilterRegistry::standard(Some(dir.path()), SourceCollection::IndexBacked);
        assert!(filters.contains("Big"));
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_missing_directory_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let (registry, report) = ClassifierRegistry::standard(Some(&missing), SourceCollection::All);
        assert!(registry.contains("Type"));
        assert_eq!(report.failures.len(), 1);
    }
}
