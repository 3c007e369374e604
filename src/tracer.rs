//! Step-granularity memory tracing.
//!
//! There is no interpreter hook to intercept arbitrary lines in compiled
//! code, so the trace boundary is explicit: a unit of work reports named
//! execution steps through the [`StepSink`] trait, and the tracer samples
//! process RSS at each reported step. When tracing is disabled the workload
//! gets a [`NoTrace`] sink and no summary is ever constructed.
//!
//! The memory-accounting facility itself is a capability resolved once at
//! startup ([`MemoryProbe::detect`]) and injected, not probed ad hoc. When
//! it is unavailable the tracer degrades (empty records, `degraded` flag)
//! and warns once per process instead of failing the run.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};

/// Receiver for step boundaries reported by a unit of work.
pub trait StepSink {
    /// Report that execution reached the named location.
    fn step(&mut self, location: &str);
}

/// No-op sink used when line-by-line tracing is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTrace;

impl StepSink for NoTrace {
    fn step(&mut self, _location: &str) {}
}

/// One-time warning registry. First occurrence per key logs at warn level,
/// later occurrences at debug level.
static WARNED_KEYS: OnceLock<Mutex<HashSet<&'static str>>> = OnceLock::new();

/// Log `message` at warn level the first time `key` is seen, debug after.
pub(crate) fn warn_once(key: &'static str, message: &str) {
    let registry = WARNED_KEYS.get_or_init(|| Mutex::new(HashSet::new()));
    let mut seen = match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if seen.insert(key) {
        tracing::warn!(key, "{message}");
    } else {
        tracing::debug!(key, "{message}");
    }
}

/// Host process memory-accounting capability.
///
/// Resolved once at startup; `None` from [`MemoryProbe::detect`] means the
/// platform offers no usable facility and callers must degrade.
#[derive(Debug, Clone, Copy)]
pub struct MemoryProbe {
    page_size: u64,
}

impl MemoryProbe {
    /// Detect the host memory-accounting facility.
    ///
    /// Returns `None` when process RSS cannot be read on this platform.
    #[must_use]
    pub fn detect() -> Option<Self> {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: sysconf with a valid name constant has no preconditions
            let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if page <= 0 {
                return None;
            }
            let probe = Self {
                page_size: page as u64,
            };
            // Statm must actually be readable, not just assumed present.
            probe.current_rss_bytes().map(|_| probe)
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }

    /// Current resident set size of this process, in bytes.
    #[must_use]
    pub fn current_rss_bytes(&self) -> Option<u64> {
        #[cfg(target_os = "linux")]
        {
            let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
            let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
            Some(resident_pages * self.page_size)
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }
}

/// One sampled step in a memory trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMemoryRecord {
    /// Location identifier reported by the unit of work
    pub location: String,
    /// RSS change since the previous sample, in bytes (may be negative)
    pub delta_bytes: i64,
    /// Absolute RSS at this step, in bytes
    pub cumulative_bytes: u64,
}

/// Ordered trace of per-step memory samples plus the overall peak.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryTraceSummary {
    /// Per-step records in execution order
    pub records: Vec<StepMemoryRecord>,
    /// Largest cumulative RSS observed during the trace
    pub peak_bytes: u64,
    /// True when the memory facility was unavailable and no per-step
    /// granularity could be recorded
    pub degraded: bool,
}

impl MemoryTraceSummary {
    /// Render the trace as aligned text lines, largest deltas first kept in
    /// execution order.
    #[must_use]
    pub fn render(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        if self.degraded {
            out.push_str("memory trace unavailable on this platform\n");
            return out;
        }
        for record in &self.records {
            let _ = writeln!(
                out,
                "{:>12} B  {:>12} B  {}",
                record.delta_bytes, record.cumulative_bytes, record.location
            );
        }
        let _ = writeln!(out, "peak: {} B", self.peak_bytes);
        out
    }
}

/// Active memory trace. Implements [`StepSink`] so a unit of work can report
/// its execution steps; [`MemoryTracer::stop`] consumes the tracer and
/// returns the summary.
#[derive(Debug)]
pub struct MemoryTracer {
    probe: Option<MemoryProbe>,
    scope_filter: Option<String>,
    last_bytes: u64,
    peak_bytes: u64,
    records: Vec<StepMemoryRecord>,
}

impl MemoryTracer {
    /// Begin tracing. Samples a baseline immediately.
    ///
    /// `scope_filter` restricts recording to locations starting with the
    /// given prefix (e.g. a module name); `None` records every step.
    #[must_use]
    pub fn start(probe: Option<MemoryProbe>, scope_filter: Option<&str>) -> Self {
        let baseline = match probe.as_ref().and_then(MemoryProbe::current_rss_bytes) {
            Some(bytes) => bytes,
            None => {
                if probe.is_none() {
                    warn_once(
                        "memory-probe-unavailable",
                        "no memory-accounting facility on this platform; trace will be degraded",
                    );
                }
                0
            }
        };
        Self {
            probe,
            scope_filter: scope_filter.map(str::to_string),
            last_bytes: baseline,
            peak_bytes: baseline,
            records: Vec::new(),
        }
    }

    /// End tracing and return the ordered summary.
    #[must_use]
    pub fn stop(self) -> MemoryTraceSummary {
        let degraded = self.probe.is_none();
        MemoryTraceSummary {
            records: self.records,
            peak_bytes: self.peak_bytes,
            degraded,
        }
    }

    fn in_scope(&self, location: &str) -> bool {
        match &self.scope_filter {
            Some(prefix) => location.starts_with(prefix.as_str()),
            None => true,
        }
    }
}

impl StepSink for MemoryTracer {
    fn step(&mut self, location: &str) {
        if !self.in_scope(location) {
            return;
        }
        let Some(current) = self.probe.as_ref().and_then(MemoryProbe::current_rss_bytes) else {
            return;
        };
        let delta = current as i64 - self.last_bytes as i64;
        self.records.push(StepMemoryRecord {
            location: location.to_string(),
            delta_bytes: delta,
            cumulative_bytes: current,
        });
        if current > self.peak_bytes {
            self.peak_bytes = current;
        }
        self.last_bytes = current;
    }
}
