//! Analysis settings shared by the binary and library users.
//!
//! Every field has a default, so a settings file only names what it changes:
//!
//! ```json
//! { "classifiers": ["Type", "Allocation Site"], "window": { "from": 3, "to": 7 } }
//! ```

use crate::domain::{ConfigError, GcId};
use crate::export::ExportFormat;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Chain used when none is given
pub const DEFAULT_CLASSIFIER: &str = "Type";

/// Perm/born/died/temp window between the ends of two collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffWindow {
    pub from: GcId,
    pub to: GcId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// JSON symbols file; without it every object has the unknown type
    pub symbols: Option<PathBuf>,
    pub classifiers: Vec<String>,
    pub filters: Vec<String>,
    /// `0` means available parallelism
    pub workers: usize,
    pub plugin_dir: Option<PathBuf>,
    pub metadata_dir: Option<PathBuf>,
    pub export: Option<PathBuf>,
    pub format: ExportFormat,
    pub window: Option<DiffWindow>,
    pub closures: bool,
    pub pointer_maps: bool,
    pub reachable_bytes: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            symbols: None,
            classifiers: vec![DEFAULT_CLASSIFIER.to_string()],
            filters: Vec::new(),
            workers: 0,
            plugin_dir: None,
            metadata_dir: None,
            export: None,
            format: ExportFormat::default(),
            window: None,
            closures: false,
            pointer_maps: false,
            reachable_bytes: true,
        }
    }
}

impl AnalysisConfig {
    /// Load and validate a JSON settings file.
    ///
    /// # Errors
    ///
    /// `Io` or `Json` if the file cannot be read, otherwise as
    /// [`AnalysisConfig::validate`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// `EmptyChain` without classifiers, `InvalidWindow` for a window ending
    /// before it starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.classifiers.is_empty() {
            return Err(ConfigError::EmptyChain);
        }
        if let Some(window) = self.window {
            if window.to < window.from {
                return Err(ConfigError::InvalidWindow { from: window.from, to: window.to });
            }
        }
        Ok(())
    }

    /// Metadata name of the tree built for this chain, e.g. `type-allocation-site`
    #[must_use]
    pub fn tree_name(&self) -> String {
        self.classifiers
            .iter()
            .map(|name| name.to_lowercase().split_whitespace().collect::<Vec<_>>().join("-"))
            .collect::<Vec<_>>()
            .join("-")
    }
}
