//! Result model and reporting: fixed-width console tables, CSV persistence,
//! JSON export, and environment metadata capture.
//!
//! Reporting is pure formatting. Nothing here mutates a result table, and
//! rendering the same report twice yields byte-identical text (all maps are
//! ordered).

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write as _;

use serde::{Deserialize, Serialize};

use crate::config::{BenchmarkConfig, Mode};
use crate::error::{MedirError, Result};
use crate::tracer::MemoryTraceSummary;

/// Placeholder token for cells that did not fit or could not be measured.
/// Serialized literally, never as an empty field, so column alignment
/// survives for downstream parsers.
pub const NOT_APPLICABLE: &str = "N/A";

/// Outcome of one measurement: a numeric value or the does-not-fit sentinel,
/// never both.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Measurement {
    /// Wall-clock seconds per call (minimum over repeated windows)
    Seconds(f64),
    /// Peak memory in bytes
    Bytes(u64),
    /// Configuration does not fit in available resources, or the memory
    /// facility was unavailable
    NotApplicable,
}

impl Measurement {
    /// Whether this is a numeric result.
    #[must_use]
    pub fn is_applicable(&self) -> bool {
        !matches!(self, Self::NotApplicable)
    }

    /// Fixed formatting used by both the console table and the CSV files.
    #[must_use]
    pub fn format(&self) -> String {
        match self {
            Self::Seconds(secs) => format!("{secs:.4}"),
            Self::Bytes(bytes) => bytes.to_string(),
            Self::NotApplicable => NOT_APPLICABLE.to_string(),
        }
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

/// One unit of work in the grid: (model, batch size, sequence length, mode).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeasurementCell {
    /// Model identifier
    pub model: String,
    /// Batch size
    pub batch_size: usize,
    /// Sequence length
    pub sequence_length: usize,
    /// Inference or training
    pub mode: Mode,
}

/// The four persisted measurement kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricKind {
    /// Inference latency (seconds)
    InferenceTime,
    /// Inference peak memory (bytes)
    InferenceMemory,
    /// Training latency (seconds)
    TrainTime,
    /// Training peak memory (bytes)
    TrainMemory,
}

impl MetricKind {
    /// Human-readable table heading.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::InferenceTime => "INFERENCE - SPEED - RESULT (s)",
            Self::InferenceMemory => "INFERENCE - MEMORY - RESULT (bytes)",
            Self::TrainTime => "TRAIN - SPEED - RESULT (s)",
            Self::TrainMemory => "TRAIN - MEMORY - RESULT (bytes)",
        }
    }

    /// Mode this metric belongs to.
    #[must_use]
    pub fn mode(&self) -> Mode {
        match self {
            Self::InferenceTime | Self::InferenceMemory => Mode::Inference,
            Self::TrainTime | Self::TrainMemory => Mode::Training,
        }
    }

    /// CSV destination for this metric from the run configuration.
    #[must_use]
    pub fn csv_path<'a>(&self, config: &'a BenchmarkConfig) -> &'a str {
        match self {
            Self::InferenceTime => &config.inference_time_csv,
            Self::InferenceMemory => &config.inference_memory_csv,
            Self::TrainTime => &config.train_time_csv,
            Self::TrainMemory => &config.train_memory_csv,
        }
    }
}

/// Results for one metric kind over the whole grid: model id to
/// (batch, seq len) to measurement, in deterministic order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultTable {
    /// Which metric this table holds
    pub metric: MetricKind,
    /// model -> (batch_size, sequence_length) -> measurement
    #[serde(
        serialize_with = "serialize_entries",
        deserialize_with = "deserialize_entries"
    )]
    pub entries: BTreeMap<String, BTreeMap<(usize, usize), Measurement>>,
}

/// JSON object keys must be strings, so (batch, seq) pairs serialize as
/// `<batch>x<seq_len>`, matching the CSV column naming.
fn serialize_entries<S>(
    entries: &BTreeMap<String, BTreeMap<(usize, usize), Measurement>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeMap;

    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (model, row) in entries {
        let string_row: BTreeMap<String, &Measurement> = row
            .iter()
            .map(|((b, s), m)| (format!("{b}x{s}"), m))
            .collect();
        map.serialize_entry(model, &string_row)?;
    }
    map.end()
}

fn deserialize_entries<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, BTreeMap<(usize, usize), Measurement>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let raw: BTreeMap<String, BTreeMap<String, Measurement>> =
        BTreeMap::deserialize(deserializer)?;
    let mut out = BTreeMap::new();
    for (model, row) in raw {
        let mut cells = BTreeMap::new();
        for (key, measurement) in row {
            let (batch, seq) = key
                .split_once('x')
                .ok_or_else(|| D::Error::custom(format!("malformed cell key '{key}'")))?;
            let batch = batch.parse::<usize>().map_err(D::Error::custom)?;
            let seq = seq.parse::<usize>().map_err(D::Error::custom)?;
            cells.insert((batch, seq), measurement);
        }
        out.insert(model, cells);
    }
    Ok(out)
}

impl ResultTable {
    /// Create an empty table for `metric`.
    #[must_use]
    pub fn new(metric: MetricKind) -> Self {
        Self {
            metric,
            entries: BTreeMap::new(),
        }
    }

    /// Record one cell. A second insert for the same cell replaces the
    /// first; the orchestrator guarantees it never does that.
    pub fn insert(
        &mut self,
        model: &str,
        batch_size: usize,
        sequence_length: usize,
        measurement: Measurement,
    ) {
        self.entries
            .entry(model.to_string())
            .or_default()
            .insert((batch_size, sequence_length), measurement);
    }

    /// Look up one cell.
    #[must_use]
    pub fn get(&self, model: &str, batch_size: usize, sequence_length: usize) -> Option<&Measurement> {
        self.entries
            .get(model)?
            .get(&(batch_size, sequence_length))
    }

    /// Total number of recorded cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    /// Whether the table holds no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column keys in declared order: the union of (batch, seq) pairs.
    fn columns(&self) -> Vec<(usize, usize)> {
        let mut cols: Vec<(usize, usize)> = self
            .entries
            .values()
            .flat_map(|row| row.keys().copied())
            .collect();
        cols.sort_unstable();
        cols.dedup();
        cols
    }

    /// Render as a fixed-width text table. Rows are models, columns are
    /// batch x sequence-length pairs.
    #[must_use]
    pub fn render(&self) -> String {
        let columns = self.columns();
        let mut widths: Vec<usize> = columns
            .iter()
            .map(|(b, s)| format!("{b}x{s}").len())
            .collect();
        let mut model_width = "Model".len();

        for (model, row) in &self.entries {
            model_width = model_width.max(model.len());
            for (idx, col) in columns.iter().enumerate() {
                if let Some(m) = row.get(col) {
                    widths[idx] = widths[idx].max(m.format().len());
                }
            }
        }

        let mut out = String::new();
        let _ = writeln!(out, "==== {} ====", self.metric.label());
        let _ = write!(out, "{:<model_width$}", "Model");
        for (idx, (b, s)) in columns.iter().enumerate() {
            let _ = write!(out, "  {:>width$}", format!("{b}x{s}"), width = widths[idx]);
        }
        out.push('\n');

        for (model, row) in &self.entries {
            let _ = write!(out, "{model:<model_width$}");
            for (idx, col) in columns.iter().enumerate() {
                let cell = row
                    .get(col)
                    .map_or_else(|| NOT_APPLICABLE.to_string(), Measurement::format);
                let _ = write!(out, "  {cell:>width$}", width = widths[idx]);
            }
            out.push('\n');
        }
        out
    }

    /// Serialize as CSV: header `model` plus one `<batch>x<seq_len>` column
    /// per pair, one row per model, `N/A` for absent cells.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let columns = self.columns();
        let mut out = String::from("model");
        for (b, s) in &columns {
            let _ = write!(out, ",{b}x{s}");
        }
        out.push('\n');
        for (model, row) in &self.entries {
            out.push_str(model);
            for col in &columns {
                let cell = row
                    .get(col)
                    .map_or_else(|| NOT_APPLICABLE.to_string(), Measurement::format);
                let _ = write!(out, ",{cell}");
            }
            out.push('\n');
        }
        out
    }
}

// ============================================================================
// Environment metadata
// ============================================================================

/// Facts about the machine and process, captured once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// Framework name
    pub framework: String,
    /// Framework version
    pub framework_version: String,
    /// Backend used to construct units of work
    pub backend: String,
    /// Operating system
    pub os: String,
    /// CPU architecture
    pub arch: String,
    /// Logical CPU count
    pub cpu_count: usize,
    /// Total system memory in bytes
    pub total_memory_bytes: u64,
    /// Whether an accelerator counter handle was attached
    pub accelerator: bool,
    /// Process id of the run
    pub process_id: u32,
    /// Unix timestamp (seconds) at capture
    pub timestamp: u64,
}

impl EnvironmentInfo {
    /// Capture environment facts for this run.
    #[must_use]
    pub fn capture(backend: &str, accelerator: bool) -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};

        let mut sys = sysinfo::System::new();
        sys.refresh_memory();

        Self {
            framework: "medir".to_string(),
            framework_version: crate::VERSION.to_string(),
            backend: backend.to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_count: num_cpus::get(),
            total_memory_bytes: sys.total_memory(),
            accelerator,
            process_id: std::process::id(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    /// Key/value rows for the environment CSV, in fixed order.
    #[must_use]
    pub fn to_rows(&self) -> Vec<(String, String)> {
        vec![
            ("framework".to_string(), self.framework.clone()),
            (
                "framework_version".to_string(),
                self.framework_version.clone(),
            ),
            ("backend".to_string(), self.backend.clone()),
            ("os".to_string(), self.os.clone()),
            ("arch".to_string(), self.arch.clone()),
            ("cpu_count".to_string(), self.cpu_count.to_string()),
            (
                "total_memory_bytes".to_string(),
                self.total_memory_bytes.to_string(),
            ),
            ("accelerator".to_string(), self.accelerator.to_string()),
            ("process_id".to_string(), self.process_id.to_string()),
            ("timestamp".to_string(), self.timestamp.to_string()),
        ]
    }
}

// ============================================================================
// Benchmark report
// ============================================================================

/// Complete output of one run: one table per requested metric, optional
/// per-cell memory traces, and environment metadata. Read-only once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    /// One table per requested metric kind
    pub tables: BTreeMap<MetricKind, ResultTable>,
    /// Per-cell step traces, present only when line-by-line tracing was on
    pub traces: Vec<(MeasurementCell, MemoryTraceSummary)>,
    /// Environment facts captured once at run start
    pub environment: EnvironmentInfo,
}

impl BenchmarkReport {
    /// Render all tables as text, in metric order.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for table in self.tables.values() {
            out.push_str(&table.render());
            out.push('\n');
        }
        out
    }

    /// Render recorded memory traces, if any.
    #[must_use]
    pub fn render_traces(&self) -> String {
        let mut out = String::new();
        for (cell, summary) in &self.traces {
            let _ = writeln!(
                out,
                "---- {} {} (batch={}, seq_len={}) ----",
                cell.model, cell.mode, cell.batch_size, cell.sequence_length
            );
            out.push_str(&summary.render());
        }
        out
    }

    /// Persist one CSV per metric plus the environment file.
    ///
    /// # Errors
    ///
    /// Returns `MedirError::Io` naming the path that failed.
    pub fn persist(&self, config: &BenchmarkConfig) -> Result<()> {
        for (metric, table) in &self.tables {
            let path = metric.csv_path(config);
            write_file(path, &table.to_csv())?;
        }
        let mut env_csv = String::from("key,value\n");
        for (key, value) in self.environment.to_rows() {
            let _ = writeln!(env_csv, "{key},{value}");
        }
        write_file(&config.env_info_csv, &env_csv)?;
        Ok(())
    }

    /// Serialize the whole report to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn write_file(path: &str, contents: &str) -> Result<()> {
    let mut file = std::fs::File::create(path).map_err(|e| MedirError::io(path, &e))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| MedirError::io(path, &e))?;
    Ok(())
}
