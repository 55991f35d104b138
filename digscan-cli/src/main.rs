// CLI application
use clap::Parser;
use digscan_cli::commands::{analyze_program, print_stats, AnalysisOptions, OutputFormat};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "digscan")]
#[command(about = "Data indirection graph extraction")]
#[command(version)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Extract the DIG of a serialized program
    Analyze {
        /// Path to the serialized program (JSON)
        #[arg(short, long)]
        program: PathBuf,

        /// Analysis configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Match variable indices only when they are the same value
        #[arg(long)]
        strict: bool,

        /// Disable the name-based hint strategies
        #[arg(long)]
        no_hints: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Write the result to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print analysis diagnostics only
    Stats {
        /// Path to the serialized program (JSON)
        #[arg(short, long)]
        program: PathBuf,

        /// Analysis configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Analyze {
            program,
            config,
            strict,
            no_hints,
            format,
            output,
        } => {
            let options = AnalysisOptions {
                config: config.as_deref(),
                strict,
                no_hints,
            };
            let pb = create_progress_bar("Analyzing program...");
            let result = analyze_program(&program, &options, format, output.as_deref());
            pb.finish_and_clear();
            result?;
        }
        Commands::Stats { program, config } => {
            let options = AnalysisOptions {
                config: config.as_deref(),
                ..Default::default()
            };
            let pb = create_progress_bar("Collecting diagnostics...");
            let result = print_stats(&program, &options);
            pb.finish_and_clear();
            result?;
        }
    }

    Ok(())
}

fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(message.to_string());
    pb
}
