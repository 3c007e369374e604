//! # Medir
//!
//! Benchmark harness for measuring model latency and peak memory across a
//! configuration grid.
//!
//! Medir (Spanish: "to measure") sweeps every combination of model, batch
//! size, sequence length, and execution mode, records wall-clock time and
//! peak memory for each cell, and renders the results as aligned tables,
//! CSV files, or JSON. A cell that does not fit in memory records `N/A`
//! instead of aborting the sweep.
//!
//! ## Example
//!
//! ```rust
//! use medir::backend::ReferenceBackend;
//! use medir::config::BenchmarkConfig;
//! use medir::harness::Benchmark;
//!
//! let config = BenchmarkConfig::new(&["tiny-model"])
//!     .with_batch_sizes(vec![1])
//!     .with_sequence_lengths(vec![8])
//!     .with_repeat(1)
//!     .with_trials_per_repeat(1);
//!
//! let mut bench = Benchmark::new(config, Box::new(ReferenceBackend::new()));
//! let report = bench.run().unwrap();
//! println!("{}", report.render());
//! ```
//!
//! ## Architecture
//!
//! - **config**: grid definition, model configuration resolution, validation
//! - **backend**: the unit-of-work seam ([`backend::ModelBackend`]) and a
//!   deterministic CPU reference implementation
//! - **guard**: out-of-memory containment and the accelerator counter
//!   reset/read-back protocol
//! - **timing**: minimum-of-repeats wall-clock measurement
//! - **tracer**: per-step memory attribution behind the
//!   [`tracer::StepSink`] seam
//! - **report**: result tables, environment capture, CSV/JSON persistence
//! - **harness**: the sweep orchestrator tying the above together

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_wrap)] // u64 -> i64 for memory deltas is safe
#![allow(clippy::cast_precision_loss)] // usize -> f64 for timings is acceptable
#![allow(clippy::cast_possible_truncation)] // u128 -> u64 for durations is safe
#![allow(clippy::cast_sign_loss)] // Metrics conversions are safe
#![allow(clippy::must_use_candidate)] // Not all methods need #[must_use]
#![allow(clippy::doc_markdown)] // Allow technical terms without backticks
#![allow(clippy::uninlined_format_args)] // Prefer explicit format args
#![allow(clippy::missing_panics_doc)] // Allow missing Panics doc sections
#![allow(clippy::float_cmp)] // Allow float comparisons in tests

/// Unit-of-work seam and the deterministic CPU reference backend
pub mod backend;
/// Benchmark grid and model configuration
pub mod config;
pub mod error;
/// Out-of-memory containment and peak-memory read-back
pub mod guard;
/// Sweep orchestrator
pub mod harness;
/// Result tables, environment capture, and persistence
pub mod report;
/// Wall-clock measurement with minimum-of-repeats aggregation
pub mod timing;
/// Step-level memory attribution
pub mod tracer;

// Re-exports for convenience
pub use error::{MedirError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        // VERSION is a compile-time constant from CARGO_PKG_VERSION, so it's never empty
        assert!(VERSION.starts_with("0."));
        assert!(VERSION.len() >= 3); // At least "0.x"
        assert!(VERSION.contains('.'));
    }
}
