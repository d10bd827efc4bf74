//! CLI argument definitions

use crate::config::{AnalysisConfig, DiffWindow};
use crate::domain::GcId;
use crate::export::ExportFormat;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "heaptrace",
    about = "Reconstruct a managed heap from an allocation trace and classify its objects",
    after_help = "\
EXAMPLES:
    heaptrace app.trace --symbols app.symbols.json
    heaptrace app.trace -c 'Type,Allocation Site' --filters 'Only Domain Objects'
    heaptrace app.trace --from-gc 3 --to-gc 7            Perm/born/died/temp diff
    heaptrace app.trace --export tree.json --format generic"
)]
pub struct Args {
    /// JSON-lines trace file to replay
    #[arg(value_name = "TRACE")]
    pub trace: PathBuf,

    /// Symbols file with types and allocation sites
    #[arg(short, long, value_name = "FILE")]
    pub symbols: Option<PathBuf>,

    /// Classifier chain, outermost first
    #[arg(short, long, value_delimiter = ',', default_value = "Type")]
    pub classifiers: Vec<String>,

    /// Filters every classified object must pass
    #[arg(short, long, value_delimiter = ',')]
    pub filters: Vec<String>,

    /// Worker threads (0 = available parallelism)
    #[arg(short, long, default_value = "0")]
    pub workers: usize,

    /// Directory with classifier and filter descriptors
    #[arg(long, value_name = "DIR")]
    pub plugin_dir: Option<PathBuf>,

    /// Directory where statistics and trees are cached between runs
    #[arg(long, value_name = "DIR")]
    pub metadata_dir: Option<PathBuf>,

    /// Export the classification tree to file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Export flavour
    #[arg(long, value_enum, default_value = "self-describing")]
    pub format: ExportFormat,

    /// First collection of the diff window
    #[arg(long, value_name = "GC", requires = "to_gc")]
    pub from_gc: Option<u32>,

    /// Last collection of the diff window
    #[arg(long, value_name = "GC", requires = "from_gc")]
    pub to_gc: Option<u32>,

    /// Annotate every group with its closure and retained sizes
    #[arg(long)]
    pub closures: bool,

    /// Record which leaf groups point at which
    #[arg(long)]
    pub pointer_maps: bool,

    /// Never compute bytes reachable from roots
    #[arg(long)]
    pub no_reachable: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    #[must_use]
    pub fn to_config(&self) -> AnalysisConfig {
        let window = match (self.from_gc, self.to_gc) {
            (Some(from), Some(to)) => Some(DiffWindow { from: GcId(from), to: GcId(to) }),
            _ => None,
        };
        AnalysisConfig {
            symbols: self.symbols.clone(),
            classifiers: self.classifiers.iter().map(|name| name.trim().to_string()).collect(),
            filters: self.filters.iter().map(|name| name.trim().to_string()).collect(),
            workers: self.workers,
            plugin_dir: self.plugin_dir.clone(),
            metadata_dir: self.metadata_dir.clone(),
            export: self.export.clone(),
            format: self.format,
            window,
            closures: self.closures,
            pointer_maps: self.pointer_maps,
            reachable_bytes: !self.no_reachable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["heaptrace", "app.trace"]).unwrap();
        let config = args.to_config();
        assert_eq!(config.classifiers, vec!["Type".to_string()]);
        assert!(config.filters.is_empty());
        assert_eq!(config.window, None);
        assert!(config.reachable_bytes);
    }

    #[test]
    fn test_chain_and_window() {
        let args = Args::try_parse_from([
            "heaptrace",
            "app.trace",
            "-c",
            "Type, Allocation Site",
            "--from-gc",
            "3",
            "--to-gc",
            "7",
            "--no-reachable",
        ])
        .unwrap();
        let config = args.to_config();
        assert_eq!(config.classifiers, vec!["Type".to_string(), "Allocation Site".to_string()]);
        assert_eq!(config.window, Some(DiffWindow { from: GcId(3), to: GcId(7) }));
        assert!(!config.reachable_bytes);
    }

    #[test]
    fn test_window_needs_both_ends() {
        assert!(Args::try_parse_from(["heaptrace", "app.trace", "--from-gc", "3"]).is_err());
        assert!(Args::try_parse_from(["heaptrace", "app.trace", "--to-gc", "7"]).is_err());
    }
}
