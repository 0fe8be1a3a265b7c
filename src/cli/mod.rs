//! Command-line interface for the BrainVoyager conversion pipeline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::processors::{
    BrainVoyagerConverter, Capabilities, ConversionOrchestrator, ConversionReport,
    EdgeCollapseReducer, FileCategory, FileClassifier, ManifestBuilder, NativeMeshReader,
    OutputPathPlanner, SrfWriter,
};
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "bv-pipeline")]
#[command(about = "Convert fMRIPrep derivatives to BrainVoyager formats", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert every subject under a pipeline root
    Convert {
        /// fMRIPrep output directory containing sub-* folders
        root: PathBuf,
        /// Subjects to convert (e.g. 01 or sub-01); all when omitted
        #[arg(short, long, num_args = 1..)]
        subjects: Vec<String>,
        /// Replace targets that already exist
        #[arg(long)]
        overwrite: bool,
        /// Output directory (defaults to a sibling of ROOT)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List classified files and their planned targets without writing
    Inspect {
        /// fMRIPrep output directory containing sub-* folders
        root: PathBuf,
        /// Subjects to inspect; all when omitted
        #[arg(short, long, num_args = 1..)]
        subjects: Vec<String>,
        /// Output directory (defaults to a sibling of ROOT)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            let head: String = value.chars().take(36).collect();
            format!("{head}...")
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Convert {
            root,
            subjects,
            overwrite,
            output,
        } => cmd_convert(&root, &subjects, overwrite, output, &config),
        Commands::Inspect {
            root,
            subjects,
            output,
        } => cmd_inspect(&root, &subjects, output, &config),
    }
}

/// Resolves the pipeline root and the output planner for it.
fn resolve_roots(root: &Path, output: Option<PathBuf>, config: &PipelineConfig) -> Result<(PathBuf, OutputPathPlanner)> {
    if root.as_os_str().is_empty() {
        anyhow::bail!("No pipeline root given");
    }
    let root = root
        .canonicalize()
        .with_context(|| format!("Pipeline root not found: {}", root.display()))?;
    let planner = match output {
        Some(dir) => OutputPathPlanner::new(dir),
        None => OutputPathPlanner::sibling_of(&root, &config.output.dir_name),
    };
    Ok((root, planner))
}

fn convert_subjects(
    root: &Path,
    subjects: &[String],
    overwrite: bool,
    planner: &OutputPathPlanner,
    config: &PipelineConfig,
    spinner: &ProgressBar,
) -> Result<Vec<ConversionReport>> {
    let capabilities = Capabilities::builder()
        .reader(NativeMeshReader)
        .writer(SrfWriter::from_config(&config.surface))
        .reducer(EdgeCollapseReducer)
        .validate()?;
    let orchestrator =
        ConversionOrchestrator::new(BrainVoyagerConverter::new(config, capabilities), overwrite);
    let builder = ManifestBuilder::new(FileClassifier::new()?);

    let mut reports = Vec::new();
    for subject_dir in builder.subjects(root, subjects)? {
        let manifest = builder.build_subject(&subject_dir)?;
        spinner.set_message(format!("Converting {} ({} files)...", manifest.subject, manifest.len()));

        let plan = planner.plan(&manifest)?;
        planner.create_directories(&plan)?;
        reports.push(orchestrator.run(&manifest, &plan)?);
    }
    Ok(reports)
}

fn cmd_convert(
    root: &Path,
    subjects: &[String],
    overwrite: bool,
    output: Option<PathBuf>,
    config: &PipelineConfig,
) {
    let start = Instant::now();

    let (root, planner) = match resolve_roots(root, output, config) {
        Ok(resolved) => resolved,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    println!("Converting subjects under {}", root.display());
    println!("Output directory: {}", planner.output_root().display());

    let spinner = create_spinner("Scanning subjects...");

    match convert_subjects(&root, subjects, overwrite, &planner, config, &spinner) {
        Ok(reports) => {
            spinner.finish_and_clear();

            let converted: usize = reports.iter().map(ConversionReport::converted_count).sum();
            let skipped: usize = reports.iter().map(ConversionReport::skipped_count).sum();
            let reduced = reports
                .iter()
                .filter_map(|r| r.category(FileCategory::Surface))
                .flat_map(|c| c.converted.iter())
                .filter(|p| p.to_string_lossy().contains("res-reduce"))
                .count();

            print_summary(
                "Conversion Complete",
                &[
                    ("Pipeline root", root.display().to_string()),
                    ("Output directory", planner.output_root().display().to_string()),
                    ("Subjects", reports.len().to_string()),
                    ("Files converted", converted.to_string()),
                    ("Files skipped", skipped.to_string()),
                    ("Reduced surfaces", reduced.to_string()),
                    ("Overwrite", overwrite.to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("Conversion failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_inspect(root: &Path, subjects: &[String], output: Option<PathBuf>, config: &PipelineConfig) {
    let result = resolve_roots(root, output, config).and_then(|(root, planner)| {
        let builder = ManifestBuilder::new(FileClassifier::new()?);
        let manifests = builder.build(&root, subjects)?;
        for manifest in &manifests {
            let plan = planner.plan(manifest)?;
            println!("{} ({})", manifest.subject, manifest.root.display());
            for category in FileCategory::CONVERTIBLE {
                let sources = manifest.files(category);
                println!("  {} [{}]", category, sources.len());
                for (source, target) in sources.iter().zip(plan.targets(category)) {
                    println!("    {}", source.path.display());
                    println!("      -> {}", target.display());
                }
            }
            match manifest.transform() {
                Some(t) => println!("  transform: {}", t.path.display()),
                None => println!("  transform: none (identity)"),
            }
        }
        Ok(manifests.len())
    });

    match result {
        Ok(count) => {
            print_summary(
                "Inspection Complete",
                &[
                    ("Pipeline root", root.display().to_string()),
                    ("Subjects", count.to_string()),
                ],
            );
        }
        Err(e) => {
            error!("Inspection failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
