//! Model backend abstraction and the tagged unit-of-work error boundary.
//!
//! The harness never constructs model weights itself: a [`ModelBackend`]
//! turns a resolved [`ModelConfig`] into a runnable [`ModelHandle`], and the
//! handle executes single-batch forward and forward+backward passes. Handles
//! report execution steps through a [`StepSink`] so the memory tracer can
//! sample at step boundaries.
//!
//! Failures cross this boundary as [`WorkError`], a tagged enum: the resource
//! guard pattern-matches on the kind instead of inspecting message strings,
//! which is what lets it recover exactly the allocation-exhaustion class and
//! nothing else.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ModelConfig;
use crate::tracer::StepSink;

/// Failure raised by a unit of work.
#[derive(Debug, Error)]
pub enum WorkError {
    /// Allocation-exhaustion-class failure. The resource guard converts this
    /// into a `NotApplicable` measurement and the sweep continues.
    #[error("out of memory ({requested_bytes} bytes requested): {reason}")]
    OutOfMemory {
        /// Bytes the workload attempted to allocate
        requested_bytes: u64,
        /// Description of the allocation site
        reason: String,
    },

    /// Programming-error-class failure (shape mismatch, missing argument).
    /// Propagates unchanged and aborts the run.
    #[error("{reason}")]
    Fatal {
        /// Description of the failure
        reason: String,
    },
}

/// Synthetic input batch: token ids shaped (batch, sequence length), drawn
/// deterministically from `[0, vocab_size)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticBatch {
    /// Number of sequences
    pub batch_size: usize,
    /// Tokens per sequence
    pub sequence_length: usize,
    /// Row-major token ids, `batch_size * sequence_length` entries
    pub token_ids: Vec<u32>,
}

impl SyntheticBatch {
    /// Build a deterministic batch for the given shape and vocabulary.
    ///
    /// Uses an LCG rather than a seeded RNG dependency so identical cells
    /// always measure identical inputs.
    #[must_use]
    pub fn new(batch_size: usize, sequence_length: usize, vocab_size: usize) -> Self {
        let count = batch_size * sequence_length;
        let mut state: u64 = 0x5DEE_CE66_D1A4_F00D;
        let token_ids = (0..count)
            .map(|_| {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                ((state >> 33) % vocab_size as u64) as u32
            })
            .collect();
        Self {
            batch_size,
            sequence_length,
            token_ids,
        }
    }
}

/// A runnable model built for one configuration.
pub trait ModelHandle: std::fmt::Debug {
    /// Execute one forward pass over `batch`, reporting step boundaries to
    /// `trace`.
    ///
    /// # Errors
    ///
    /// Returns `WorkError::OutOfMemory` when the pass does not fit in
    /// available memory, `WorkError::Fatal` for programming errors.
    fn forward(&mut self, batch: &SyntheticBatch, trace: &mut dyn StepSink)
        -> Result<(), WorkError>;

    /// Execute one forward pass plus backward (gradient) pass.
    ///
    /// # Errors
    ///
    /// Same contract as [`ModelHandle::forward`].
    fn forward_backward(
        &mut self,
        batch: &SyntheticBatch,
        trace: &mut dyn StepSink,
    ) -> Result<(), WorkError>;
}

/// Constructs runnable units from resolved model configurations.
pub trait ModelBackend {
    /// Backend name for environment reporting.
    fn name(&self) -> &'static str;

    /// Build a fresh model for `config`.
    ///
    /// # Errors
    ///
    /// Returns `WorkError::OutOfMemory` when the weights alone do not fit,
    /// `WorkError::Fatal` for invalid configurations the backend cannot
    /// represent.
    fn build(&self, config: &ModelConfig) -> Result<Box<dyn ModelHandle>, WorkError>;
}

// ============================================================================
// Reference backend
// ============================================================================

/// Built-in CPU backend performing real embedding-lookup and projection work
/// with activation allocations proportional to batch x seq x hidden.
///
/// Exists so the shipped CLI measures something real and so tests can inject
/// deterministic out-of-memory failures via an activation budget.
#[derive(Debug, Clone, Default)]
pub struct ReferenceBackend {
    /// When set, passes whose activation footprint exceeds this budget fail
    /// with `WorkError::OutOfMemory`
    activation_limit_bytes: Option<u64>,
}

impl ReferenceBackend {
    /// Create an unlimited reference backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the activation footprint; larger cells report out-of-memory.
    #[must_use]
    pub fn with_activation_limit(mut self, limit_bytes: u64) -> Self {
        self.activation_limit_bytes = Some(limit_bytes);
        self
    }
}

impl ModelBackend for ReferenceBackend {
    fn name(&self) -> &'static str {
        "reference-cpu"
    }

    fn build(&self, config: &ModelConfig) -> Result<Box<dyn ModelHandle>, WorkError> {
        if config.hidden_size == 0 || config.vocab_size == 0 || config.num_layers == 0 {
            return Err(WorkError::Fatal {
                reason: "model configuration has a zero dimension".to_string(),
            });
        }
        Ok(Box::new(ReferenceModel::new(
            config.clone(),
            self.activation_limit_bytes,
        )))
    }
}

/// Reference model state: an embedding table plus one square projection per
/// layer, with gradient buffers allocated lazily for training passes.
#[derive(Debug)]
struct ReferenceModel {
    config: ModelConfig,
    embedding: Vec<f32>,
    layer_weights: Vec<Vec<f32>>,
    grad_buffers: Vec<Vec<f32>>,
    activation_limit_bytes: Option<u64>,
}

impl ReferenceModel {
    fn new(config: ModelConfig, activation_limit_bytes: Option<u64>) -> Self {
        let hidden = config.hidden_size;
        let embedding = vec![0.01_f32; config.vocab_size * hidden];
        let layer_weights = (0..config.num_layers)
            .map(|layer| vec![0.001_f32 * (layer + 1) as f32; hidden * hidden])
            .collect();
        Self {
            config,
            embedding,
            layer_weights,
            grad_buffers: Vec::new(),
            activation_limit_bytes,
        }
    }

    /// Estimated activation footprint of one pass, in bytes.
    fn activation_bytes(&self, batch: &SyntheticBatch) -> u64 {
        let tokens = batch.batch_size as u64 * batch.sequence_length as u64;
        let per_layer = tokens * self.config.hidden_size as u64 * 4;
        // One live activation buffer per stage plus the embedding output.
        per_layer * (self.config.num_layers as u64 + 1)
    }

    fn check_budget(&self, batch: &SyntheticBatch) -> Result<(), WorkError> {
        let needed = self.activation_bytes(batch);
        if let Some(limit) = self.activation_limit_bytes {
            if needed > limit {
                return Err(WorkError::OutOfMemory {
                    requested_bytes: needed,
                    reason: format!("activation footprint exceeds {limit} byte budget"),
                });
            }
        }
        Ok(())
    }

    fn check_batch(&self, batch: &SyntheticBatch) -> Result<(), WorkError> {
        let expected = batch.batch_size * batch.sequence_length;
        if batch.token_ids.len() != expected {
            return Err(WorkError::Fatal {
                reason: format!(
                    "batch shape mismatch: {} token ids for {}x{}",
                    batch.token_ids.len(),
                    batch.batch_size,
                    batch.sequence_length
                ),
            });
        }
        if let Some(&bad) = batch
            .token_ids
            .iter()
            .find(|&&id| id as usize >= self.config.vocab_size)
        {
            return Err(WorkError::Fatal {
                reason: format!(
                    "token id {bad} out of range for vocab_size {}",
                    self.config.vocab_size
                ),
            });
        }
        Ok(())
    }

    /// Embedding lookup followed by per-layer projections. Returns the final
    /// hidden activations so the training pass can reuse them.
    fn run_stack(
        &self,
        batch: &SyntheticBatch,
        scope: &str,
        trace: &mut dyn StepSink,
    ) -> Result<Vec<f32>, WorkError> {
        let hidden = self.config.hidden_size;
        let tokens = batch.batch_size * batch.sequence_length;

        let mut activations = vec![0.0_f32; tokens * hidden];
        for (t, &token) in batch.token_ids.iter().enumerate() {
            let src = token as usize * hidden;
            activations[t * hidden..(t + 1) * hidden]
                .copy_from_slice(&self.embedding[src..src + hidden]);
        }
        trace.step(&format!("{scope}/embed"));

        for (layer, weights) in self.layer_weights.iter().enumerate() {
            let mut next = vec![0.0_f32; tokens * hidden];
            for t in 0..tokens {
                let row = &activations[t * hidden..(t + 1) * hidden];
                for (j, out) in next[t * hidden..(t + 1) * hidden].iter_mut().enumerate() {
                    let mut acc = 0.0_f32;
                    for (i, &x) in row.iter().enumerate() {
                        acc += x * weights[i * hidden + j];
                    }
                    *out = acc.tanh();
                }
            }
            activations = next;
            trace.step(&format!("{scope}/layer{layer}"));
        }
        Ok(activations)
    }
}

impl ModelHandle for ReferenceModel {
    fn forward(
        &mut self,
        batch: &SyntheticBatch,
        trace: &mut dyn StepSink,
    ) -> Result<(), WorkError> {
        self.check_batch(batch)?;
        self.check_budget(batch)?;

        let hidden = self.run_stack(batch, "encoder", trace)?;
        if self.config.is_encoder_decoder {
            // Seq2seq convention: the decoder is fed the same input ids.
            let _decoder_hidden = self.run_stack(batch, "decoder", trace)?;
        }
        std::hint::black_box(&hidden);
        Ok(())
    }

    fn forward_backward(
        &mut self,
        batch: &SyntheticBatch,
        trace: &mut dyn StepSink,
    ) -> Result<(), WorkError> {
        self.check_batch(batch)?;
        // Training roughly doubles the live footprint (gradients per layer).
        let forward_bytes = self.activation_bytes(batch);
        if let Some(limit) = self.activation_limit_bytes {
            if forward_bytes * 2 > limit {
                return Err(WorkError::OutOfMemory {
                    requested_bytes: forward_bytes * 2,
                    reason: format!("forward+backward footprint exceeds {limit} byte budget"),
                });
            }
        }

        let hidden = self.run_stack(batch, "encoder", trace)?;
        if self.config.is_encoder_decoder {
            let _decoder_hidden = self.run_stack(batch, "decoder", trace)?;
        }

        // Pseudo loss gradient: accumulate into per-layer buffers, then zero
        // them, mirroring loss.backward() + zero_grad().
        let loss: f32 = hidden.iter().sum::<f32>() / hidden.len().max(1) as f32;
        self.grad_buffers = self
            .layer_weights
            .iter()
            .map(|w| vec![loss / w.len() as f32; w.len()])
            .collect();
        trace.step("backward/accumulate");
        for grads in &mut self.grad_buffers {
            grads.iter_mut().for_each(|g| *g = 0.0);
        }
        trace.step("backward/zero_grad");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::NoTrace;

    fn tiny_config() -> ModelConfig {
        ModelConfig::default()
            .with_hidden_size(8)
            .with_num_layers(2)
            .with_vocab_size(64)
    }

    #[test]
    fn test_synthetic_batch_deterministic() {
        let a = SyntheticBatch::new(2, 4, 100);
        let b = SyntheticBatch::new(2, 4, 100);
        assert_eq!(a, b);
        assert_eq!(a.token_ids.len(), 8);
        assert!(a.token_ids.iter().all(|&id| id < 100));
    }

    #[test]
    fn test_reference_forward_succeeds() {
        let backend = ReferenceBackend::new();
        let mut handle = backend.build(&tiny_config()).expect("build");
        let batch = SyntheticBatch::new(1, 8, 64);
        assert!(handle.forward(&batch, &mut NoTrace).is_ok());
    }

    #[test]
    fn test_reference_forward_backward_succeeds() {
        let backend = ReferenceBackend::new();
        let mut handle = backend.build(&tiny_config()).expect("build");
        let batch = SyntheticBatch::new(2, 4, 64);
        assert!(handle.forward_backward(&batch, &mut NoTrace).is_ok());
    }

    #[test]
    fn test_activation_limit_triggers_oom() {
        let backend = ReferenceBackend::new().with_activation_limit(64);
        let mut handle = backend.build(&tiny_config()).expect("build");
        let batch = SyntheticBatch::new(8, 128, 64);
        let err = handle.forward(&batch, &mut NoTrace).unwrap_err();
        assert!(matches!(err, WorkError::OutOfMemory { .. }));
    }

    #[test]
    fn test_training_footprint_doubles() {
        // A budget that fits forward but not forward+backward.
        let config = tiny_config();
        let batch = SyntheticBatch::new(1, 8, 64);
        // forward footprint: tokens * hidden * 4 * (layers + 1) = 8*8*4*3
        let forward_bytes = 8 * 8 * 4 * 3;
        let backend = ReferenceBackend::new().with_activation_limit(forward_bytes + 1);
        let mut handle = backend.build(&config).expect("build");
        assert!(handle.forward(&batch, &mut NoTrace).is_ok());
        let err = handle.forward_backward(&batch, &mut NoTrace).unwrap_err();
        assert!(matches!(err, WorkError::OutOfMemory { .. }));
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let backend = ReferenceBackend::new();
        let mut handle = backend.build(&tiny_config()).expect("build");
        let batch = SyntheticBatch {
            batch_size: 2,
            sequence_length: 4,
            token_ids: vec![0; 3],
        };
        let err = handle.forward(&batch, &mut NoTrace).unwrap_err();
        assert!(matches!(err, WorkError::Fatal { .. }));
        assert!(err.to_string().contains("shape mismatch"));
    }

    #[test]
    fn test_token_out_of_range_is_fatal() {
        let backend = ReferenceBackend::new();
        let mut handle = backend.build(&tiny_config()).expect("build");
        let batch = SyntheticBatch {
            batch_size: 1,
            sequence_length: 2,
            token_ids: vec![0, 64],
        };
        let err = handle.forward(&batch, &mut NoTrace).unwrap_err();
        assert!(matches!(err, WorkError::Fatal { .. }));
    }

    #[test]
    fn test_encoder_decoder_reports_decoder_steps() {
        struct Collect(Vec<String>);
        impl StepSink for Collect {
            fn step(&mut self, location: &str) {
                self.0.push(location.to_string());
            }
        }

        let backend = ReferenceBackend::new();
        let config = tiny_config().encoder_decoder();
        let mut handle = backend.build(&config).expect("build");
        let batch = SyntheticBatch::new(1, 4, 64);
        let mut sink = Collect(Vec::new());
        handle.forward(&batch, &mut sink).expect("forward");

        assert!(sink.0.iter().any(|l| l.starts_with("encoder/")));
        assert!(sink.0.iter().any(|l| l.starts_with("decoder/")));
    }

    #[test]
    fn test_build_rejects_zero_dimension() {
        let backend = ReferenceBackend::new();
        let config = ModelConfig {
            hidden_size: 0,
            ..ModelConfig::default()
        };
        let err = backend.build(&config).unwrap_err();
        assert!(matches!(err, WorkError::Fatal { .. }));
    }

    #[test]
    fn test_work_error_display() {
        let oom = WorkError::OutOfMemory {
            requested_bytes: 1024,
            reason: "activation budget".to_string(),
        };
        assert!(oom.to_string().contains("1024 bytes"));

        let fatal = WorkError::Fatal {
            reason: "bad shape".to_string(),
        };
        assert_eq!(fatal.to_string(), "bad shape");
    }
}
