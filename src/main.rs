//! Medir CLI - benchmark harness for model latency and peak-memory sweeps
//!
//! # Commands
//!
//! - `run` - Sweep a benchmark grid and print (or persist) the results
//! - `info` - Show version and environment info

use clap::{Parser, Subcommand};
use medir::backend::ReferenceBackend;
use medir::config::BenchmarkConfig;
use medir::error::Result;
use medir::harness::Benchmark;
use medir::report::EnvironmentInfo;

/// Medir - model benchmark harness
///
/// Measures wall-clock latency and peak memory for every combination of
/// model, batch size, sequence length, and execution mode.
#[derive(Parser)]
#[command(name = "medir")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep a benchmark grid and print the result tables
    ///
    /// Examples:
    ///   medir run tiny-model
    ///   medir run model-a model-b --batch-sizes 1,8 --sequence-lengths 32,128
    ///   medir run tiny-model --training --save-to-csv
    Run {
        /// Model identifiers to benchmark
        #[arg(value_name = "MODEL", required = true)]
        models: Vec<String>,

        /// Comma-separated batch sizes
        #[arg(long, value_delimiter = ',', default_value = "8")]
        batch_sizes: Vec<usize>,

        /// Comma-separated sequence lengths
        #[arg(long, value_delimiter = ',', default_value = "8,32,128,512")]
        sequence_lengths: Vec<usize>,

        /// Measure training (forward + backward) cells
        #[arg(long)]
        training: bool,

        /// Skip inference cells (requires --training)
        #[arg(long)]
        no_inference: bool,

        /// Skip peak-memory measurement
        #[arg(long)]
        no_memory: bool,

        /// Record a per-step memory trace for every cell (slow)
        #[arg(long)]
        trace: bool,

        /// Persist result tables and environment info as CSV files
        #[arg(long)]
        save_to_csv: bool,

        /// Measurement windows per cell
        #[arg(long, default_value = "3")]
        repeat: usize,

        /// Workload invocations per measurement window
        #[arg(long, default_value = "10")]
        trials: usize,

        /// Write the full report as JSON to this path
        #[arg(long, value_name = "PATH")]
        json: Option<String>,
    },
    /// Show version and environment info
    Info,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            models,
            batch_sizes,
            sequence_lengths,
            training,
            no_inference,
            no_memory,
            trace,
            save_to_csv,
            repeat,
            trials,
            json,
        } => {
            let model_refs: Vec<&str> = models.iter().map(String::as_str).collect();
            let config = BenchmarkConfig::new(&model_refs)
                .with_batch_sizes(batch_sizes)
                .with_sequence_lengths(sequence_lengths)
                .with_training(training)
                .with_inference(!no_inference)
                .with_memory(!no_memory)
                .with_line_by_line_tracing(trace)
                .with_save_to_csv(save_to_csv)
                .with_repeat(repeat)
                .with_trials_per_repeat(trials);

            run_benchmark(config, json.as_deref())?;
        },
        Commands::Info => {
            print_info();
        },
    }

    Ok(())
}

fn run_benchmark(config: BenchmarkConfig, json_path: Option<&str>) -> Result<()> {
    let mut bench = Benchmark::new(config.clone(), Box::new(ReferenceBackend::new()));
    let report = bench.run()?;

    println!("{}", report.render());
    if config.trace_line_by_line {
        println!("{}", report.render_traces());
    }

    if config.save_to_csv {
        report.persist(&config)?;
        println!("Results saved to CSV:");
        if config.inference {
            println!("  {}", config.inference_time_csv);
            if config.memory {
                println!("  {}", config.inference_memory_csv);
            }
        }
        if config.training {
            println!("  {}", config.train_time_csv);
            if config.memory {
                println!("  {}", config.train_memory_csv);
            }
        }
        println!("  {}", config.env_info_csv);
    }

    if let Some(path) = json_path {
        let json = report
            .to_json()
            .map_err(|e| medir::MedirError::Io {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        std::fs::write(path, json).map_err(|e| medir::MedirError::io(path, &e))?;
        println!("Report written to {path}");
    }

    Ok(())
}

fn print_info() {
    println!("medir {}", medir::VERSION);
    println!();
    let env = EnvironmentInfo::capture("reference-cpu", false);
    for (key, value) in env.to_rows() {
        println!("  {key}: {value}");
    }
}
