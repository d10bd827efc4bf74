//! # heaptrace - Main Entry Point
//!
//! Replays one trace file and reports on it:
//! - statistics at every GC boundary (or the cached ones from `--metadata-dir`)
//! - a classification tree of the heap at the end of the trace
//! - with `--from-gc`/`--to-gc`, the perm/born/died/temp diff of that window

// Report printing is long but linear; byte counts lose precision only for display
#![allow(clippy::too_many_lines, clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use clap::Parser;
use heaptrace::cli::Args;
use heaptrace::closure::compute_closures;
use heaptrace::config::AnalysisConfig;
use heaptrace::diff::{HeapEvolution, PermBornDiedTempGrouping};
use heaptrace::domain::{ClassificationError, ConfigError};
use heaptrace::export::export_to_file;
use heaptrace::grouping::{ClassificationTree, Grouper, GroupingNode};
use heaptrace::heap::GcPhase;
use heaptrace::registry::{ClassifierRegistry, FilterRegistry, LoadReport};
use heaptrace::statistics::{MetadataStore, Statistics, StatisticsCollector, TraceFingerprint};
use heaptrace::stream::{Outcome, SourceCollection, TaskContext};
use heaptrace::symbols::Symbols;
use heaptrace::trace::HeapBuilder;
use log::{info, warn};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Tree levels printed below the root
const REPORT_DEPTH: usize = 2;
/// Children printed per node, largest first
const REPORT_WIDTH: usize = 10;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        return EXIT_USAGE;
    }
    match err.downcast_ref::<ClassificationError>() {
        Some(ClassificationError::UnknownClassifier(_) | ClassificationError::UnknownFilter(_)) => EXIT_USAGE,
        _ => EXIT_ERROR,
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;
    let config = args.to_config();
    config.validate()?;

    if !quiet {
        println!("heaptrace v{}", env!("CARGO_PKG_VERSION"));
        println!("trace: {}", args.trace.display());
        println!("classifiers: {}", config.classifiers.join(", "));
    }

    // ── Symbols and registries ──────────────────────────────────────────
    let symbols = Arc::new(load_symbols(config.symbols.as_deref())?);
    let plugin_dir = config.plugin_dir.as_deref();
    let (classifiers, classifier_report) = ClassifierRegistry::standard(plugin_dir, SourceCollection::IndexBacked);
    let (filters, filter_report) = FilterRegistry::standard(plugin_dir, SourceCollection::IndexBacked);
    if !quiet {
        print_load_failures(&classifier_report);
        print_load_failures(&filter_report);
    }
    check_chain(&config, &classifiers, &filters)?;

    // ── Replay ──────────────────────────────────────────────────────────
    let metadata = config.metadata_dir.as_ref().map(MetadataStore::new);
    let fingerprint = TraceFingerprint::of(&args.trace)
        .with_context(|| format!("Failed to read {}", args.trace.display()))?;
    let cached = metadata.as_ref().and_then(|store| store.read_statistics(&fingerprint));

    let mut evolution = config.window.map(|window| HeapEvolution::new(window.from, window.to));
    let mut builder = HeapBuilder::new(Arc::clone(&symbols));
    if cached.is_none() {
        let mut collector = StatisticsCollector::new(config.workers);
        if !config.reachable_bytes {
            collector = collector.without_reachable_bytes();
        }
        builder = builder.with_statistics(collector);
    }
    if let Some(evolution) = evolution.as_mut() {
        builder.add_listener(evolution);
    }

    let started = Instant::now();
    builder
        .replay_file(&args.trace)
        .with_context(|| format!("Failed to replay {}", args.trace.display()))?;
    let events = builder.events().clone();
    let (snapshot, fresh) = builder.finish();
    info!("Replay finished in {:.2}s", started.elapsed().as_secs_f64());

    let statistics = match cached {
        Some(cached) => {
            info!("Using {} cached statistics records", cached.len());
            cached
        }
        None => {
            if let Some(store) = &metadata {
                if let Err(e) = store.write_statistics(&fresh, &fingerprint) {
                    warn!("Could not cache statistics in {}: {e}", store.dir().display());
                }
            }
            fresh
        }
    };

    if quiet {
        eprintln!(
            "{} events, {} GC boundaries, {} objects live at end",
            events.total(),
            statistics.len(),
            snapshot.len()
        );
    } else {
        print!("\n{events}");
        print_statistics(&statistics);
    }

    // ── Classification of the final heap ────────────────────────────────
    let task = TaskContext::new();
    let grouper = Grouper::new(&classifiers, &filters, config.classifiers.clone(), config.filters.clone())
        .workers(config.workers)
        .with_pointer_maps(config.pointer_maps);

    let Outcome::Completed(mut tree) = grouper.list(&snapshot, &task)? else {
        anyhow::bail!("Classification cancelled");
    };
    if config.closures {
        if let Outcome::Cancelled = compute_closures(&mut tree, &snapshot, &task)? {
            anyhow::bail!("Closure computation cancelled");
        }
    }
    if !quiet {
        print_tree(&tree);
    }

    if let Some(path) = &config.export {
        export_to_file(&tree, config.format, path)
            .with_context(|| format!("Failed to export tree to {}", path.display()))?;
        if !quiet {
            println!("export: {}", path.display());
        }
    }
    if let Some(store) = &metadata {
        if let Err(e) = store.write_tree(&config.tree_name(), &tree) {
            warn!("Could not cache tree in {}: {e}", store.dir().display());
        }
    }

    // ── Diff window ─────────────────────────────────────────────────────
    if let Some(evolution) = &evolution {
        let Outcome::Completed(diff) = evolution.grouping(&grouper, &task)? else {
            anyhow::bail!("Diff classification cancelled");
        };
        check_balance(evolution, &grouper, &task, &diff)?;
        if !quiet {
            print_diff(&diff);
        }
    }

    Ok(())
}

fn load_symbols(path: Option<&Path>) -> Result<Symbols> {
    let Some(path) = path else {
        warn!("No symbols file given; every object has the unknown type");
        return Ok(Symbols::new());
    };
    let file = File::open(path).with_context(|| format!("Failed to open symbols file {}", path.display()))?;
    Symbols::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to load symbols from {}", path.display()))
}

/// Fail before replaying when the chain names something that does not exist.
fn check_chain(config: &AnalysisConfig, classifiers: &ClassifierRegistry, filters: &FilterRegistry) -> Result<()> {
    if let Some(name) = config.classifiers.iter().find(|name| !classifiers.contains(name)) {
        let known: Vec<&str> = classifiers.names().collect();
        return Err(anyhow::Error::new(ClassificationError::UnknownClassifier(name.clone()))
            .context(format!("Known classifiers: {}", known.join(", "))));
    }
    if let Some(name) = config.filters.iter().find(|name| !filters.contains(name)) {
        let known: Vec<&str> = filters.names().collect();
        return Err(anyhow::Error::new(ClassificationError::UnknownFilter(name.clone()))
            .context(format!("Known filters: {}", known.join(", "))));
    }
    Ok(())
}

/// Cross-check the diff against the window's own start and end heaps.
fn check_balance(
    evolution: &HeapEvolution,
    grouper: &Grouper<'_>,
    task: &TaskContext,
    diff: &PermBornDiedTempGrouping,
) -> Result<()> {
    let (Some(start), Some(end)) = (evolution.start_snapshot(), evolution.end_snapshot()) else {
        return Ok(());
    };
    let (Outcome::Completed(before), Outcome::Completed(after)) =
        (grouper.list(&**start, task)?, grouper.list(&**end, task)?)
    else {
        return Ok(());
    };
    for imbalance in diff.imbalances(&before, &after) {
        warn!("{imbalance}");
    }
    Ok(())
}

fn print_load_failures(report: &LoadReport) {
    for failure in &report.failures {
        eprintln!("warning: {failure}");
    }
}

// ============================================================================
// REPORTS
// ============================================================================

fn print_statistics(statistics: &[Statistics]) {
    if statistics.is_empty() {
        return;
    }
    println!("\n{:<28} {:>12} {:>14} {:>14} {:>14}", "BOUNDARY", "OBJECTS", "EDEN", "OLD", "REACHABLE");
    for record in statistics {
        let label = match &record.boundary {
            Some(boundary) => {
                let phase = match boundary.phase {
                    GcPhase::Start => "start",
                    GcPhase::End => "end",
                };
                format!("{} {phase}", boundary.info.id)
            }
            None => "end of trace".to_string(),
        };
        let reachable = record.reachable_bytes.map_or_else(|| "-".to_string(), format_bytes);
        println!(
            "{label:<28} {:>12} {:>14} {:>14} {:>14}",
            record.total().objects,
            format_bytes(record.spaces.eden.memory.bytes),
            format_bytes(record.spaces.old.memory.bytes),
            reachable
        );
    }
}

fn print_tree(tree: &ClassificationTree) {
    println!("\n{} [{} objects, {}]", tree.chain_label(), tree.object_count(), format_bytes(tree.byte_count()));
    print_children(tree.root(), 1);
}

fn print_children(node: &GroupingNode, depth: usize) {
    if depth > REPORT_DEPTH {
        return;
    }
    let children = node.sorted_children();
    for child in children.iter().take(REPORT_WIDTH) {
        if child.is_filtered_bucket() && child.objects == 0 {
            continue;
        }
        let closure = child.closure.map_or_else(String::new, |sizes| {
            format!("  retained {}", format_bytes(sizes.retained_bytes))
        });
        println!(
            "{:indent$}{:>10} {:>12}  {}{closure}",
            "",
            child.objects,
            format_bytes(child.bytes),
            child.key,
            indent = (depth - 1) * 2
        );
        print_children(child, depth + 1);
    }
    if children.len() > REPORT_WIDTH {
        println!("{:indent$}... {} more", "", children.len() - REPORT_WIDTH, indent = (depth - 1) * 2);
    }
}

fn print_diff(diff: &PermBornDiedTempGrouping) {
    println!(
        "\n{:<48} {:>12} {:>12} {:>12} {:>12} {:>12}",
        "GROUP", "PERM@START", "PERM@END", "BORN", "DIED", "TEMP"
    );
    for row in diff.rows().iter().filter(|row| row.full_key.len() <= REPORT_DEPTH) {
        let label = if row.full_key.is_empty() {
            "(all)".to_string()
        } else {
            format!("{:indent$}{}", "", row.full_key[row.full_key.len() - 1], indent = (row.full_key.len() - 1) * 2)
        };
        let temp = row.temp.map_or_else(|| "-".to_string(), |temp| temp.objects.to_string());
        println!(
            "{label:<48} {:>12} {:>12} {:>12} {:>12} {temp:>12}",
            row.perm_start.objects, row.perm_end.objects, row.born.objects, row.died.objects
        );
    }
}

fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let value = bytes as f64;
    if value >= KIB * KIB * KIB {
        format!("{:.1} GiB", value / (KIB * KIB * KIB))
    } else if value >= KIB * KIB {
        format!("{:.1} MiB", value / (KIB * KIB))
    } else if value >= KIB {
        format!("{:.1} KiB", value / KIB)
    } else {
        format!("{bytes} B")
    }
}
