//! quizstats CLI - consolidate quiz-practice exports into student statistics
//!
//! # Main Commands
//!
//! ```bash
//! quizstats run exports/ -r --csv-dir report/   # Full pipeline, CSV tables + JSON
//! quizstats run a.csv b.csv --strategy name     # Name-keyed identity resolution
//! quizstats serve                               # Start HTTP server (port 3000)
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! quizstats parse input.csv      # Decoded raw records as JSON
//! quizstats example-config       # Default options as JSON
//! ```

use clap::{Parser, Subcommand};
use quizstats::api::logs::LOG_BROADCASTER;
use quizstats::models::activity_label;
use quizstats::parser::format_delimiter;
use quizstats::{
    parse_file, run_paths, write_report_dir, write_student_files, PipelineOptions,
    PipelineOutput, ResolutionStrategy,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "quizstats")]
#[command(about = "Consolidate quiz-practice CSV exports into per-student statistics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full pipeline: load, normalize, dedup, resolve, aggregate, summarize
    Run {
        /// Input CSV files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// JSON options file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Identity resolution: "identifier" or "name"
        #[arg(long)]
        strategy: Option<ResolutionStrategy>,

        /// Identifier or name to leave out (repeatable)
        #[arg(short = 'x', long)]
        exclude: Vec<String>,

        /// Minimum attempted questions for weakest/strongest fields
        #[arg(long)]
        min_field_attempts: Option<u64>,

        /// Size of the top/bottom rankings
        #[arg(long)]
        top: Option<usize>,

        /// Pivot field order, comma separated
        #[arg(long, value_delimiter = ',')]
        field_order: Option<Vec<String>>,

        /// JSON report file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for the CSV tables
        #[arg(long)]
        csv_dir: Option<PathBuf>,

        /// Directory for one CSV per student
        #[arg(long)]
        split_dir: Option<PathBuf>,

        /// Prefix CSV files with a UTF-8 BOM
        #[arg(long)]
        bom: bool,

        /// Silence progress output
        #[arg(short, long)]
        quiet: bool,
    },

    /// Parse a CSV export and output its raw records as JSON
    Parse {
        /// Input CSV file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the default options as JSON
    ExampleConfig,

    /// Start HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// JSON options file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Flags that override file and environment options.
struct Overrides {
    strategy: Option<ResolutionStrategy>,
    exclude: Vec<String>,
    min_field_attempts: Option<u64>,
    top: Option<usize>,
    field_order: Option<Vec<String>>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            inputs,
            recursive,
            config,
            strategy,
            exclude,
            min_field_attempts,
            top,
            field_order,
            output,
            csv_dir,
            split_dir,
            bom,
            quiet,
        } => {
            let overrides = Overrides {
                strategy,
                exclude,
                min_field_attempts,
                top,
                field_order,
            };
            cmd_run(
                &inputs,
                recursive,
                config.as_deref(),
                overrides,
                output.as_deref(),
                csv_dir.as_deref(),
                split_dir.as_deref(),
                bom,
                quiet,
            )
        }

        Commands::Parse { input, output } => cmd_parse(&input, output.as_deref()),

        Commands::ExampleConfig => cmd_example_config(),

        Commands::Serve { port, config } => cmd_serve(port, config.as_deref()).await,
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

/// Defaults, then the config file, then `QUIZSTATS_*` variables (and `.env`).
fn load_options(config: Option<&Path>) -> Result<PipelineOptions, Box<dyn std::error::Error>> {
    let base = match config {
        Some(path) => PipelineOptions::from_json_file(path)?,
        None => PipelineOptions::default(),
    };
    Ok(base.apply_env()?)
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    inputs: &[PathBuf],
    recursive: bool,
    config: Option<&Path>,
    overrides: Overrides,
    output: Option<&Path>,
    csv_dir: Option<&Path>,
    split_dir: Option<&Path>,
    bom: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if quiet {
        LOG_BROADCASTER.set_echo(false);
    }

    let mut options = load_options(config)?;
    if let Some(strategy) = overrides.strategy {
        options.strategy = strategy;
    }
    options.exclude.extend(overrides.exclude);
    if let Some(min) = overrides.min_field_attempts {
        options.min_field_attempts = min;
    }
    if let Some(top) = overrides.top {
        options.ranking_size = top;
    }
    if let Some(order) = overrides.field_order {
        options.field_order = Some(order);
    }
    options.validate()?;

    let result = run_paths(inputs, recursive, &options)?;

    if !quiet {
        print_summary(&result);
    }

    if let Some(dir) = csv_dir {
        let written = write_report_dir(&result, dir, bom)?;
        eprintln!("💾 {} report files written to: {}", written.len(), dir.display());
    }
    if let Some(dir) = split_dir {
        let written = write_student_files(&result.records, dir, bom)?;
        eprintln!("💾 {} student files written to: {}", written.len(), dir.display());
    }

    let json = serde_json::to_string_pretty(&result)?;
    write_output(&json, output)?;

    Ok(())
}

fn print_summary(result: &PipelineOutput) {
    let d = &result.diagnostics;
    eprintln!("\n{}", "=".repeat(70));
    eprintln!("📊 SUMMARY");
    eprintln!("{}", "=".repeat(70));
    eprintln!("   Sources:        {} ({} skipped)", result.sources.len(), d.skipped_sources.len());
    eprintln!("   Input rows:     {}", d.input_records);
    eprintln!("   Duplicates:     {}", d.duplicates_removed);
    eprintln!("   Excluded rows:  {}", d.excluded_records);
    eprintln!("   Students:       {}", result.summaries.len());
    eprintln!(
        "   Mean / median:  {:.1}% / {:.1}%",
        result.cohort.mean_accuracy, result.cohort.median_accuracy
    );

    for (title, ranking) in [("🏆 Top", &result.top), ("📉 Bottom", &result.bottom)] {
        eprintln!("\n{} {}", title, ranking.entries.len());
        for entry in &ranking.entries {
            let s = &entry.summary;
            eprintln!(
                "   {:>2}. {} ({})  {:.1}%  weakest: {}  strongest: {}  [{}]",
                entry.rank,
                s.identity.canonical_name,
                s.identity.canonical_id,
                s.overall_accuracy,
                s.weakest.label(),
                s.strongest.label(),
                activity_label(s.activity.as_ref()),
            );
        }
    }
    eprintln!("{}\n", "=".repeat(70));
}

fn cmd_parse(input: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Parsing CSV: {}", input.display());

    let loaded = parse_file(input)?;
    eprintln!("   Encoding: {}", loaded.info.encoding);
    eprintln!("   Delimiter: '{}'", format_delimiter(loaded.info.delimiter));
    eprintln!("   Columns: {}", loaded.info.headers.join(", "));
    eprintln!("✅ Parsed {} records", loaded.records.len());

    let json = serde_json::to_string_pretty(&loaded.records)?;
    write_output(&json, output)?;

    Ok(())
}

fn cmd_example_config() -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(&PipelineOptions::default())?;
    println!("{}", json);
    Ok(())
}

async fn cmd_serve(port: u16, config: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let options = load_options(config)?;
    quizstats::server::start_server(port, options).await
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
