//! Benchmark configuration: the grid axes, mode flags, and output paths.
//!
//! `BenchmarkConfig` is created once at run start and never mutated during a
//! run. Validation happens up front: a contradictory configuration aborts
//! before any measurement begins.

use serde::{Deserialize, Serialize};

use crate::error::{MedirError, Result};

/// Measurement mode for one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Single forward pass
    Inference,
    /// Forward pass plus backward (gradient) pass
    Training,
}

impl Mode {
    /// Get string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inference => "inference",
            Self::Training => "training",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved architecture parameters for one model under test.
///
/// The harness never builds weights itself; this record only carries the
/// sizes the backend needs to construct a runnable unit and the harness
/// needs to derive synthetic inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Hidden dimension of the model
    pub hidden_size: usize,
    /// Number of layers
    pub num_layers: usize,
    /// Vocabulary size; synthetic token ids are drawn from `[0, vocab_size)`
    pub vocab_size: usize,
    /// Whether the model is an encoder-decoder (gets a decoder pass fed with
    /// the same input ids, mirroring seq2seq benchmark conventions)
    pub is_encoder_decoder: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_size: 64,
            num_layers: 2,
            vocab_size: 1024,
            is_encoder_decoder: false,
        }
    }
}

impl ModelConfig {
    /// Build a fresh configuration from a bare model identifier.
    ///
    /// Used when no explicit override was supplied for the id. Identifiers
    /// containing a seq2seq marker resolve as encoder-decoder.
    #[must_use]
    pub fn for_model(model_id: &str) -> Self {
        let lowered = model_id.to_lowercase();
        let is_encoder_decoder = ["t5", "bart", "seq2seq"]
            .iter()
            .any(|marker| lowered.contains(marker));
        Self {
            is_encoder_decoder,
            ..Default::default()
        }
    }

    /// Set hidden size
    #[must_use]
    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    /// Set layer count
    #[must_use]
    pub fn with_num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    /// Set vocabulary size
    #[must_use]
    pub fn with_vocab_size(mut self, vocab_size: usize) -> Self {
        self.vocab_size = vocab_size;
        self
    }

    /// Mark as encoder-decoder
    #[must_use]
    pub fn encoder_decoder(mut self) -> Self {
        self.is_encoder_decoder = true;
        self
    }

    /// Validate architecture parameters.
    ///
    /// # Errors
    ///
    /// Returns `MedirError::InvalidConfiguration` when any dimension is zero:
    /// a zero-sized axis cannot produce a runnable unit of work.
    pub fn validate(&self, model_id: &str) -> Result<()> {
        if self.hidden_size == 0 || self.num_layers == 0 || self.vocab_size == 0 {
            return Err(MedirError::InvalidConfiguration {
                reason: format!(
                    "model '{model_id}' has a zero dimension (hidden_size={}, num_layers={}, vocab_size={})",
                    self.hidden_size, self.num_layers, self.vocab_size
                ),
            });
        }
        Ok(())
    }
}

/// Immutable configuration for one benchmark run.
///
/// The measurement grid is the Cartesian product
/// `models x enabled modes x batch_sizes x sequence_lengths`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Model identifiers to sweep
    pub models: Vec<String>,
    /// Batch sizes axis
    pub batch_sizes: Vec<usize>,
    /// Sequence lengths axis
    pub sequence_lengths: Vec<usize>,
    /// Measure inference (forward) cells
    pub inference: bool,
    /// Measure training (forward + backward) cells
    pub training: bool,
    /// Measure peak memory in addition to latency
    pub memory: bool,
    /// Record a per-step memory trace (significant overhead; only honored
    /// when explicitly requested)
    pub trace_line_by_line: bool,
    /// Persist results as CSV files
    pub save_to_csv: bool,
    /// Number of measurement windows per cell
    pub repeat: usize,
    /// Workload invocations per measurement window
    pub trials_per_repeat: usize,
    /// Output path for inference latency results
    pub inference_time_csv: String,
    /// Output path for inference memory results
    pub inference_memory_csv: String,
    /// Output path for training latency results
    pub train_time_csv: String,
    /// Output path for training memory results
    pub train_memory_csv: String,
    /// Output path for environment metadata
    pub env_info_csv: String,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            batch_sizes: vec![8],
            sequence_lengths: vec![8, 32, 128, 512],
            inference: true,
            training: false,
            memory: true,
            trace_line_by_line: false,
            save_to_csv: false,
            repeat: 3,
            trials_per_repeat: 10,
            inference_time_csv: "inference_time.csv".to_string(),
            inference_memory_csv: "inference_memory.csv".to_string(),
            train_time_csv: "train_time.csv".to_string(),
            train_memory_csv: "train_memory.csv".to_string(),
            env_info_csv: "env_info.csv".to_string(),
        }
    }
}

impl BenchmarkConfig {
    /// Create a configuration for the given models with default axes.
    #[must_use]
    pub fn new(models: &[&str]) -> Self {
        Self {
            models: models.iter().map(|m| (*m).to_string()).collect(),
            ..Default::default()
        }
    }

    /// Set batch sizes axis
    #[must_use]
    pub fn with_batch_sizes(mut self, batch_sizes: Vec<usize>) -> Self {
        self.batch_sizes = batch_sizes;
        self
    }

    /// Set sequence lengths axis
    #[must_use]
    pub fn with_sequence_lengths(mut self, sequence_lengths: Vec<usize>) -> Self {
        self.sequence_lengths = sequence_lengths;
        self
    }

    /// Enable or disable training cells
    #[must_use]
    pub fn with_training(mut self, training: bool) -> Self {
        self.training = training;
        self
    }

    /// Enable or disable inference cells
    #[must_use]
    pub fn with_inference(mut self, inference: bool) -> Self {
        self.inference = inference;
        self
    }

    /// Enable or disable peak-memory measurement
    #[must_use]
    pub fn with_memory(mut self, memory: bool) -> Self {
        self.memory = memory;
        self
    }

    /// Enable per-step memory tracing
    #[must_use]
    pub fn with_line_by_line_tracing(mut self, trace: bool) -> Self {
        self.trace_line_by_line = trace;
        self
    }

    /// Enable CSV persistence
    #[must_use]
    pub fn with_save_to_csv(mut self, save: bool) -> Self {
        self.save_to_csv = save;
        self
    }

    /// Set number of measurement windows
    #[must_use]
    pub fn with_repeat(mut self, repeat: usize) -> Self {
        self.repeat = repeat;
        self
    }

    /// Set workload invocations per window
    #[must_use]
    pub fn with_trials_per_repeat(mut self, trials: usize) -> Self {
        self.trials_per_repeat = trials;
        self
    }

    /// Enabled modes, in deterministic order.
    #[must_use]
    pub fn modes(&self) -> Vec<Mode> {
        let mut modes = Vec::with_capacity(2);
        if self.inference {
            modes.push(Mode::Inference);
        }
        if self.training {
            modes.push(Mode::Training);
        }
        modes
    }

    /// Validate the configuration before any measurement.
    ///
    /// # Errors
    ///
    /// Returns `MedirError::InvalidConfiguration` for an empty model list,
    /// empty or zero-valued axes, zero repeat/trial counts, no enabled mode,
    /// or line-by-line tracing requested without memory measurement.
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(MedirError::InvalidConfiguration {
                reason: "no models configured".to_string(),
            });
        }
        if self.batch_sizes.is_empty() || self.batch_sizes.contains(&0) {
            return Err(MedirError::InvalidConfiguration {
                reason: "batch_sizes must be non-empty and non-zero".to_string(),
            });
        }
        if self.sequence_lengths.is_empty() || self.sequence_lengths.contains(&0) {
            return Err(MedirError::InvalidConfiguration {
                reason: "sequence_lengths must be non-empty and non-zero".to_string(),
            });
        }
        if self.repeat == 0 || self.trials_per_repeat == 0 {
            return Err(MedirError::InvalidConfiguration {
                reason: "repeat and trials_per_repeat must be at least 1".to_string(),
            });
        }
        if !self.inference && !self.training {
            return Err(MedirError::InvalidConfiguration {
                reason: "neither inference nor training enabled; nothing to measure".to_string(),
            });
        }
        if self.trace_line_by_line && !self.memory {
            return Err(MedirError::InvalidConfiguration {
                reason: "line-by-line tracing requires memory measurement".to_string(),
            });
        }
        Ok(())
    }
}
