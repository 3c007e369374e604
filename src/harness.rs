//! Benchmark orchestrator: sweeps the configuration grid and assembles the
//! result report.
//!
//! The sweep is a single-threaded sequential loop on purpose: concurrent
//! cells would contaminate each other's peak-memory measurements, and the
//! guard's reset/read-back protocol assumes exclusive ownership of the
//! device counters for the duration of one cell.
//!
//! Every cell the grid requests ends with exactly one measurement per
//! requested metric. A cell that does not fit records `NotApplicable` and
//! the sweep continues — larger cells for the same model are still
//! attempted, since memory use is not strictly monotonic across unrelated
//! axis combinations.

use std::collections::BTreeMap;

use crate::backend::{ModelBackend, ModelHandle, SyntheticBatch, WorkError};
use crate::config::{BenchmarkConfig, Mode, ModelConfig};
use crate::error::{MedirError, Result};
use crate::guard::{AcceleratorCounters, ResourceGuard};
use crate::report::{
    BenchmarkReport, EnvironmentInfo, Measurement, MeasurementCell, MetricKind, ResultTable,
};
use crate::tracer::{MemoryTraceSummary, MemoryTracer, NoTrace};

/// Runs one benchmark sweep over a configuration grid.
pub struct Benchmark {
    config: BenchmarkConfig,
    backend: Box<dyn ModelBackend>,
    overrides: BTreeMap<String, ModelConfig>,
    guard: ResourceGuard,
}

impl Benchmark {
    /// Create a harness for `config` using `backend` to build units of work.
    #[must_use]
    pub fn new(config: BenchmarkConfig, backend: Box<dyn ModelBackend>) -> Self {
        Self {
            config,
            backend,
            overrides: BTreeMap::new(),
            guard: ResourceGuard::new(),
        }
    }

    /// Supply pre-resolved model configurations keyed by model id. Models
    /// without an override resolve fresh from their identifier.
    #[must_use]
    pub fn with_configs(mut self, configs: Vec<(String, ModelConfig)>) -> Self {
        self.overrides.extend(configs);
        self
    }

    /// Attach accelerator memory counters; the guard owns their lifecycle.
    #[must_use]
    pub fn with_accelerator(mut self, counters: Box<dyn AcceleratorCounters>) -> Self {
        self.guard = std::mem::take(&mut self.guard).with_accelerator(counters);
        self
    }

    /// Execute the full sweep.
    ///
    /// # Errors
    ///
    /// `MedirError::InvalidConfiguration` before any measurement for a
    /// malformed grid; `MedirError::Workload` when a unit of work fails with
    /// a programming-error-class failure (the offending cell is named).
    /// Does-not-fit outcomes never error.
    pub fn run(&mut self) -> Result<BenchmarkReport> {
        self.config.validate()?;

        let environment =
            EnvironmentInfo::capture(self.backend.name(), self.guard.has_accelerator());

        let mut tables: BTreeMap<MetricKind, ResultTable> = BTreeMap::new();
        for mode in self.config.modes() {
            let time_metric = match mode {
                Mode::Inference => MetricKind::InferenceTime,
                Mode::Training => MetricKind::TrainTime,
            };
            tables.insert(time_metric, ResultTable::new(time_metric));
            if self.config.memory {
                let memory_metric = match mode {
                    Mode::Inference => MetricKind::InferenceMemory,
                    Mode::Training => MetricKind::TrainMemory,
                };
                tables.insert(memory_metric, ResultTable::new(memory_metric));
            }
        }

        let mut traces: Vec<(MeasurementCell, MemoryTraceSummary)> = Vec::new();

        let models = self.config.models.clone();
        let batch_sizes = self.config.batch_sizes.clone();
        let sequence_lengths = self.config.sequence_lengths.clone();
        let modes = self.config.modes();

        for model_id in &models {
            let model_config = self.resolve_config(model_id);
            model_config.validate(model_id)?;

            for &mode in &modes {
                for &batch_size in &batch_sizes {
                    for &sequence_length in &sequence_lengths {
                        tracing::debug!(
                            model = %model_id,
                            %mode,
                            batch_size,
                            sequence_length,
                            "measuring cell"
                        );

                        if self.config.memory {
                            let (measurement, summary) = self.measure_memory(
                                model_id,
                                &model_config,
                                batch_size,
                                sequence_length,
                                mode,
                            )?;
                            let metric = match mode {
                                Mode::Inference => MetricKind::InferenceMemory,
                                Mode::Training => MetricKind::TrainMemory,
                            };
                            if let Some(table) = tables.get_mut(&metric) {
                                table.insert(model_id, batch_size, sequence_length, measurement);
                            }
                            if let Some(summary) = summary {
                                traces.push((
                                    MeasurementCell {
                                        model: model_id.clone(),
                                        batch_size,
                                        sequence_length,
                                        mode,
                                    },
                                    summary,
                                ));
                            }
                        }

                        let measurement = self.measure_time(
                            model_id,
                            &model_config,
                            batch_size,
                            sequence_length,
                            mode,
                        )?;
                        let metric = match mode {
                            Mode::Inference => MetricKind::InferenceTime,
                            Mode::Training => MetricKind::TrainTime,
                        };
                        if let Some(table) = tables.get_mut(&metric) {
                            table.insert(model_id, batch_size, sequence_length, measurement);
                        }
                    }
                }
            }
        }

        Ok(BenchmarkReport {
            tables,
            traces,
            environment,
        })
    }

    fn resolve_config(&self, model_id: &str) -> ModelConfig {
        self.overrides
            .get(model_id)
            .cloned()
            .unwrap_or_else(|| ModelConfig::for_model(model_id))
    }

    /// Build a fresh handle for one cell, containing out-of-memory at
    /// construction time the same way the guard contains it at run time.
    fn build_handle(
        &self,
        model_id: &str,
        model_config: &ModelConfig,
        batch_size: usize,
        sequence_length: usize,
    ) -> Result<Option<Box<dyn ModelHandle>>> {
        match self.backend.build(model_config) {
            Ok(handle) => Ok(Some(handle)),
            Err(WorkError::OutOfMemory {
                requested_bytes,
                reason,
            }) => {
                tracing::warn!(
                    model = %model_id,
                    requested_bytes,
                    %reason,
                    "model does not fit; recording N/A"
                );
                Ok(None)
            }
            Err(WorkError::Fatal { reason }) => Err(MedirError::Workload {
                model: model_id.to_string(),
                batch_size,
                sequence_length,
                reason,
            }),
        }
    }

    fn measure_time(
        &mut self,
        model_id: &str,
        model_config: &ModelConfig,
        batch_size: usize,
        sequence_length: usize,
        mode: Mode,
    ) -> Result<Measurement> {
        let Some(mut handle) =
            self.build_handle(model_id, model_config, batch_size, sequence_length)?
        else {
            return Ok(Measurement::NotApplicable);
        };
        let batch = SyntheticBatch::new(batch_size, sequence_length, model_config.vocab_size);

        let mut sink = NoTrace;
        let work = || match mode {
            Mode::Inference => handle.forward(&batch, &mut sink),
            Mode::Training => handle.forward_backward(&batch, &mut sink),
        };

        self.guard
            .run_timed(work, self.config.repeat, self.config.trials_per_repeat)
            .map_err(|err| Self::cell_error(model_id, batch_size, sequence_length, &err))
    }

    fn measure_memory(
        &mut self,
        model_id: &str,
        model_config: &ModelConfig,
        batch_size: usize,
        sequence_length: usize,
        mode: Mode,
    ) -> Result<(Measurement, Option<MemoryTraceSummary>)> {
        let Some(mut handle) =
            self.build_handle(model_id, model_config, batch_size, sequence_length)?
        else {
            return Ok((Measurement::NotApplicable, None));
        };
        let batch = SyntheticBatch::new(batch_size, sequence_length, model_config.vocab_size);

        let work = |sink: &mut dyn crate::tracer::StepSink| match mode {
            Mode::Inference => handle.forward(&batch, sink),
            Mode::Training => handle.forward_backward(&batch, sink),
        };

        if self.config.trace_line_by_line {
            let mut tracer = MemoryTracer::start(self.guard.probe(), None);
            let measurement = self
                .guard
                .run_memory(work, &mut tracer)
                .map_err(|err| Self::cell_error(model_id, batch_size, sequence_length, &err))?;
            Ok((measurement, Some(tracer.stop())))
        } else {
            let measurement = self
                .guard
                .run_memory(work, &mut NoTrace)
                .map_err(|err| Self::cell_error(model_id, batch_size, sequence_length, &err))?;
            Ok((measurement, None))
        }
    }

    fn cell_error(
        model_id: &str,
        batch_size: usize,
        sequence_length: usize,
        err: &WorkError,
    ) -> MedirError {
        MedirError::Workload {
            model: model_id.to_string(),
            batch_size,
            sequence_length,
            reason: err.to_string(),
        }
    }
}
