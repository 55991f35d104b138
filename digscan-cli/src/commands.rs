// CLI command handlers
use anyhow::{Context, Result};
use digscan_core::analyzer::config::SimilarityMode;
use digscan_core::analyzer::emit::render_facts;
use digscan_core::{AnalysisConfig, AnalysisOutcome, DigPipeline, Program};
use std::fs;
use std::path::Path;

/// Output encoding of `digscan analyze`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// NODE / EDGE / TRIGGER lines
    Text,
    /// DIG and diagnostics as JSON
    Json,
}

/// Options shared by the analysis commands.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions<'a> {
    pub config: Option<&'a Path>,
    pub strict: bool,
    pub no_hints: bool,
}

pub fn load_config(options: &AnalysisOptions<'_>) -> Result<AnalysisConfig> {
    let mut config = match options.config {
        Some(path) => AnalysisConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    if options.strict {
        config = config.with_similarity(SimilarityMode::Strict);
    }
    if options.no_hints {
        config = config.without_hints();
    }
    Ok(config)
}

fn run(program_file: &Path, options: &AnalysisOptions<'_>) -> Result<(Program, AnalysisOutcome)> {
    let config = load_config(options)?;
    let program = Program::from_file(program_file)
        .with_context(|| format!("Failed to load program: {}", program_file.display()))?;
    log::info!(
        "Loaded {} functions from {}",
        program.functions().len(),
        program_file.display()
    );
    let outcome = DigPipeline::run(&program, &config);
    Ok((program, outcome))
}

pub fn analyze_program(
    program_file: &Path,
    options: &AnalysisOptions<'_>,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    let (program, outcome) = run(program_file, options)?;

    let rendered = match format {
        OutputFormat::Text => render_facts(&outcome.dig, &program),
        OutputFormat::Json => {
            serde_json::to_string_pretty(&outcome).context("Failed to serialize analysis outcome")?
        }
    };

    match output {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("Failed to write output: {}", path.display()))?;
            println!("Wrote DIG to {}", path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

pub fn print_stats(program_file: &Path, options: &AnalysisOptions<'_>) -> Result<()> {
    let (_, outcome) = run(program_file, options)?;
    let d = &outcome.diagnostics;

    println!("Program: {}", program_file.display());
    println!("  Functions scanned: {}", d.functions_scanned);
    println!("  Allocation sites: {}", d.allocation_sites);
    println!("  Filtered as runtime-internal: {}", d.filtered_runtime_internal);
    println!("  Default strides: {}", d.default_strides);
    println!("  Field aliases seeded: {}", d.aliases_seeded);
    println!("  Rejected (unresolved provenance): {}", d.rejected_unresolved);
    println!("  Exhausted provenance walks: {}", d.exhausted_walks);
    println!("DIG:");
    println!("  Nodes: {}", d.nodes);
    println!("  Single-valued edges: {}", d.single_valued_edges);
    println!("  Ranged edges: {}", d.ranged_edges);
    println!("  Trigger edges: {}", d.trigger_edges);
    println!("  Edges from hints: {}", d.hint_edges);
    Ok(())
}
