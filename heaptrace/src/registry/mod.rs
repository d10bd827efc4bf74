//! # Classifier and Filter Registries
//!
//! A registry holds *factories*, never instances: every lookup builds a fresh
//! unit, so per-traversal state (memo tables, counters) is never shared
//! between classification requests or parallel workers.
//!
//! ## Population
//!
//! ```text
//! built-in table ──▶ filter by source collection ──▶ register
//! plugin dir     ──▶ UnitLoader (JSON descriptors) ──▶ register   (later wins)
//! ```
//!
//! Registering a name that already exists removes the earlier entry, so
//! plugins shadow built-ins. A unit that fails to load is logged and
//! skipped; loading continues with the next one.

pub mod builtin;
pub mod classifier;
pub mod filter;
pub mod plugin;
pub mod unit;

pub use classifier::{chain_label, Classification, Classifier, ClassifierChain, ClassifierKind, Key};
pub use filter::{Filter, FilterVote};
pub use plugin::{DescriptorLoader, UnitLoader};
pub use unit::{Capability, Property, PropertyKind, SetupEnv, Unit};

use crate::domain::{ClassificationError, RegistryError};
use crate::stream::SourceCollection;
use log::{debug, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where a factory came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOrigin {
    Builtin,
    Plugin(PathBuf),
}

type Constructor<T> = Arc<dyn Fn() -> Box<T> + Send + Sync>;

/// Builds fresh instances of one unit.
pub struct Factory<T: ?Sized> {
    name: String,
    description: String,
    source_collection: SourceCollection,
    capabilities: Vec<Capability>,
    origin: UnitOrigin,
    make: Constructor<T>,
}

impl<T: ?Sized> Clone for Factory<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            source_collection: self.source_collection,
            capabilities: self.capabilities.clone(),
            origin: self.origin.clone(),
            make: Arc::clone(&self.make),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Factory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("name", &self.name)
            .field("source_collection", &self.source_collection)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized + Unit> Factory<T> {
    /// Wrap a constructor; metadata is read from one probe instance.
    pub fn new(origin: UnitOrigin, make: impl Fn() -> Box<T> + Send + Sync + 'static) -> Self {
        let probe = make();
        Self {
            name: probe.name().to_string(),
            description: probe.description().to_string(),
            source_collection: probe.source_collection(),
            capabilities: probe.capabilities().to_vec(),
            origin,
            make: Arc::new(make),
        }
    }

    #[must_use]
    pub fn builtin(make: impl Fn() -> Box<T> + Send + Sync + 'static) -> Self {
        Self::new(UnitOrigin::Builtin, make)
    }

    #[must_use]
    pub fn create(&self) -> Box<T> {
        (self.make)()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn source_collection(&self) -> SourceCollection {
        self.source_collection
    }

    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    #[must_use]
    pub fn origin(&self) -> &UnitOrigin {
        &self.origin
    }
}

/// Summary of one registry population pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub builtin: usize,
    pub plugins: usize,
    /// Units not admitted for the requested source collection
    pub incompatible: usize,
    pub failures: Vec<String>,
}

pub struct Registry<T: ?Sized> {
    factories: Vec<Factory<T>>,
}

pub type ClassifierRegistry = Registry<dyn Classifier>;
pub type FilterRegistry = Registry<dyn Filter>;

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.iter().map(|factory| &factory.name)).finish()
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self { factories: Vec::new() }
    }
}

impl<T: ?Sized + Unit> Registry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate from `builtins`, then from `plugin_dir` through `loaders`.
    ///
    /// Only units compatible with `source` are admitted. Failures are logged
    /// and reported, never fatal.
    pub fn load(
        builtins: Vec<Factory<T>>,
        loaders: &[&dyn UnitLoader<T>],
        plugin_dir: Option<&Path>,
        source: SourceCollection,
    ) -> (Self, LoadReport) {
        let mut registry = Self::new();
        let mut report = LoadReport::default();

        for factory in builtins {
            if factory.source_collection.admits(source) {
                registry.register(factory);
                report.builtin += 1;
            } else {
                report.incompatible += 1;
            }
        }

        if let Some(dir) = plugin_dir {
            for loader in loaders {
                for result in loader.load(dir) {
                    match result {
                        Ok(factory) if factory.source_collection.admits(source) => {
                            registry.register(factory);
                            report.plugins += 1;
                        }
                        Ok(factory) => {
                            debug!("Skipping plugin '{}': needs {}", factory.name, factory.source_collection);
                            report.incompatible += 1;
                        }
                        Err(e) => {
                            warn!("{e}");
                            report.failures.push(e.to_string());
                        }
                    }
                }
            }
        }

        info!(
            "Registry loaded: {} built-in, {} plugin, {} failed",
            report.builtin,
            report.plugins,
            report.failures.len()
        );
        (registry, report)
    }

    /// Add `factory`, removing any earlier entry of the same name.
    pub fn register(&mut self, factory: Factory<T>) {
        let before = self.factories.len();
        self.factories.retain(|existing| existing.name != factory.name);
        if self.factories.len() != before {
            debug!("'{}' replaces an earlier registration", factory.name);
        }
        self.factories.push(factory);
    }

    /// Fresh instance of the unit called `name`
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Box<T>> {
        self.factory(name).map(Factory::create)
    }

    /// Fresh instance of the first unit declaring `capability`
    #[must_use]
    pub fn lookup_capability(&self, capability: Capability) -> Option<Box<T>> {
        self.factories
            .iter()
            .find(|factory| factory.capabilities.contains(&capability))
            .map(Factory::create)
    }

    /// Fresh instance of `name`, already set up for `env`
    #[must_use]
    pub fn instantiate(&self, name: &str, env: &SetupEnv<'_>) -> Option<Box<T>> {
        let mut unit = self.lookup(name)?;
        unit.setup(env);
        Some(unit)
    }

    #[must_use]
    pub fn factory(&self, name: &str) -> Option<&Factory<T>> {
        self.factories.iter().find(|factory| factory.name == name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factory(name).is_some()
    }

    pub fn factories(&self) -> impl Iterator<Item = &Factory<T>> {
        self.factories.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.iter().map(|factory| factory.name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Registry<dyn Classifier> {
    /// Built-ins plus plugins for `source`.
    pub fn standard(plugin_dir: Option<&Path>, source: SourceCollection) -> (Self, LoadReport) {
        Self::load(builtin::classifiers(), &[&DescriptorLoader], plugin_dir, source)
    }

    /// Fresh, set-up chain for `names`.
    ///
    /// # Errors
    ///
    /// `UnknownClassifier` for the first name not registered, and
    /// `IncompatibleSource` for a classifier that cannot run on `env`.
    pub fn chain(&self, names: &[String], env: &SetupEnv<'_>) -> Result<ClassifierChain, ClassificationError> {
        names
            .iter()
            .map(|name| {
                let classifier = self
                    .instantiate(name, env)
                    .ok_or_else(|| ClassificationError::UnknownClassifier(name.clone()))?;
                check_source(classifier.as_ref(), env)?;
                Ok(classifier)
            })
            .collect::<Result<Vec<_>, _>>()
            .map(ClassifierChain::new)
    }
}

impl Registry<dyn Filter> {
    /// Built-ins plus plugins for `source`.
    pub fn standard(plugin_dir: Option<&Path>, source: SourceCollection) -> (Self, LoadReport) {
        Self::load(builtin::filters(), &[&DescriptorLoader], plugin_dir, source)
    }

    /// Fresh, set-up filters for `names`.
    ///
    /// # Errors
    ///
    /// `UnknownFilter` for the first name not registered, and
    /// `IncompatibleSource` for a filter that cannot run on `env`.
    pub fn filters(&self, names: &[String], env: &SetupEnv<'_>) -> Result<Vec<Box<dyn Filter>>, ClassificationError> {
        names
            .iter()
            .map(|name| {
                let filter = self
                    .instantiate(name, env)
                    .ok_or_else(|| ClassificationError::UnknownFilter(name.clone()))?;
                check_source(filter.as_ref(), env)?;
                Ok(filter)
            })
            .collect()
    }
}

fn check_source<T: ?Sized + Unit>(unit: &T, env: &SetupEnv<'_>) -> Result<(), ClassificationError> {
    if unit.source_collection().admits(env.source_collection) {
        Ok(())
    } else {
        Err(ClassificationError::IncompatibleSource {
            unit: unit.name().to_string(),
            required: unit.source_collection().to_string(),
        })
    }
}

/// Turn a per-unit load failure into the error reported by [`Registry::load`].
#[must_use]
pub fn load_failure(unit: &Path, reason: impl fmt::Display) -> RegistryError {
    RegistryError::PluginLoadFailed { unit: unit.display().to_string(), reason: reason.to_string() }
}
