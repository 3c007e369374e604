//! Resource guard: device-counter reset/read-back and out-of-memory
//! containment around one unit of work.
//!
//! The guard is the sole owner of the accelerator counter handle for the
//! duration of a cell — no other component resets or reads it. Catching is
//! deliberately narrow: only the `OutOfMemory` variant of the tagged work
//! error becomes a `NotApplicable` result; every other failure class
//! propagates, because it signals a bug in the workload, not a resource
//! limit.

use crate::backend::WorkError;
use crate::report::Measurement;
use crate::timing;
use crate::tracer::{warn_once, MemoryProbe, StepSink};

/// Device memory-accounting counters for an attached accelerator.
///
/// Modeled as a single-owner handle passed into the guard explicitly; there
/// is no ambient global access to device state anywhere else in the crate.
pub trait AcceleratorCounters {
    /// Release cached allocations so prior cells do not contaminate the
    /// next measurement.
    fn clear_cache(&mut self);

    /// Reset the peak-usage counter.
    fn reset_peak(&mut self);

    /// Peak bytes allocated since the last reset.
    fn peak_bytes(&self) -> u64;
}

/// Wraps units of work with memory-state reset, peak read-back, and
/// allocation-failure containment.
pub struct ResourceGuard {
    accelerator: Option<Box<dyn AcceleratorCounters>>,
    probe: Option<MemoryProbe>,
}

impl ResourceGuard {
    /// Create a guard for the host, resolving the memory facility once.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accelerator: None,
            probe: MemoryProbe::detect(),
        }
    }

    /// Attach an accelerator counter handle. The guard owns its
    /// reset/read lifecycle from here on.
    #[must_use]
    pub fn with_accelerator(mut self, counters: Box<dyn AcceleratorCounters>) -> Self {
        self.accelerator = Some(counters);
        self
    }

    /// Whether an accelerator handle is attached.
    #[must_use]
    pub fn has_accelerator(&self) -> bool {
        self.accelerator.is_some()
    }

    /// The host memory probe, if one was detected (shared with the tracer).
    #[must_use]
    pub fn probe(&self) -> Option<MemoryProbe> {
        self.probe
    }

    /// Reset device memory state ahead of one cell.
    fn prepare(&mut self) {
        if let Some(counters) = self.accelerator.as_mut() {
            counters.clear_cache();
            counters.reset_peak();
        }
    }

    /// Read back peak memory after a successful pass: accelerator counter
    /// when available, host RSS as fallback, `NotApplicable` when no
    /// facility exists.
    fn read_peak(&self) -> Measurement {
        if let Some(counters) = self.accelerator.as_ref() {
            return Measurement::Bytes(counters.peak_bytes());
        }
        match self.probe.as_ref().and_then(MemoryProbe::current_rss_bytes) {
            Some(bytes) => Measurement::Bytes(bytes),
            None => {
                warn_once(
                    "memory-facility-unavailable",
                    "no memory-accounting facility available; memory results will be N/A",
                );
                Measurement::NotApplicable
            }
        }
    }

    /// Run a latency measurement under the guard.
    ///
    /// # Errors
    ///
    /// `WorkError::Fatal` propagates unchanged; `OutOfMemory` is contained
    /// and reported as `Measurement::NotApplicable`.
    pub fn run_timed<F>(
        &mut self,
        work: F,
        repeat: usize,
        trials_per_repeat: usize,
    ) -> Result<Measurement, WorkError>
    where
        F: FnMut() -> Result<(), WorkError>,
    {
        self.prepare();
        match timing::measure(work, repeat, trials_per_repeat) {
            Ok(seconds) => Ok(Measurement::Seconds(seconds)),
            Err(WorkError::OutOfMemory {
                requested_bytes,
                reason,
            }) => {
                tracing::warn!(requested_bytes, %reason, "does not fit; recording N/A");
                Ok(Measurement::NotApplicable)
            }
            Err(fatal) => Err(fatal),
        }
    }

    /// Run a single memory-measurement pass under the guard, feeding step
    /// boundaries to `sink`.
    ///
    /// # Errors
    ///
    /// Same containment contract as [`ResourceGuard::run_timed`].
    pub fn run_memory<F>(
        &mut self,
        work: F,
        sink: &mut dyn StepSink,
    ) -> Result<Measurement, WorkError>
    where
        F: FnOnce(&mut dyn StepSink) -> Result<(), WorkError>,
    {
        self.prepare();
        match work(sink) {
            Ok(()) => Ok(self.read_peak()),
            Err(WorkError::OutOfMemory {
                requested_bytes,
                reason,
            }) => {
                tracing::warn!(requested_bytes, %reason, "does not fit; recording N/A");
                Ok(Measurement::NotApplicable)
            }
            Err(fatal) => Err(fatal),
        }
    }
}

impl Default for ResourceGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::NoTrace;

    /// Mock counter handle reporting a fixed peak.
    struct MockCounters {
        peak: u64,
    }

    impl MockCounters {
        fn new(peak: u64) -> Self {
            Self { peak }
        }
    }

    impl AcceleratorCounters for MockCounters {
        fn clear_cache(&mut self) {}
        fn reset_peak(&mut self) {}
        fn peak_bytes(&self) -> u64 {
            self.peak
        }
    }

    #[test]
    fn test_timed_success() {
        let mut guard = ResourceGuard::new();
        let result = guard.run_timed(|| Ok(()), 2, 3).expect("guarded");
        assert!(matches!(result, Measurement::Seconds(s) if s >= 0.0));
    }

    #[test]
    fn test_timed_oom_contained() {
        let mut guard = ResourceGuard::new();
        let result = guard
            .run_timed(
                || {
                    Err(WorkError::OutOfMemory {
                        requested_bytes: 1 << 40,
                        reason: "synthetic".to_string(),
                    })
                },
                2,
                3,
            )
            .expect("contained");
        assert_eq!(result, Measurement::NotApplicable);
    }

    #[test]
    fn test_timed_fatal_propagates() {
        let mut guard = ResourceGuard::new();
        let result = guard.run_timed(
            || {
                Err(WorkError::Fatal {
                    reason: "shape mismatch".to_string(),
                })
            },
            2,
            3,
        );
        assert!(matches!(result.unwrap_err(), WorkError::Fatal { .. }));
    }

    #[test]
    fn test_memory_uses_accelerator_counter() {
        let mut guard =
            ResourceGuard::new().with_accelerator(Box::new(MockCounters::new(4096)));
        assert!(guard.has_accelerator());
        let result = guard
            .run_memory(|_| Ok(()), &mut NoTrace)
            .expect("guarded");
        assert_eq!(result, Measurement::Bytes(4096));
    }

    #[test]
    fn test_memory_oom_contained() {
        let mut guard = ResourceGuard::new();
        let result = guard
            .run_memory(
                |_| {
                    Err(WorkError::OutOfMemory {
                        requested_bytes: 123,
                        reason: "synthetic".to_string(),
                    })
                },
                &mut NoTrace,
            )
            .expect("contained");
        assert_eq!(result, Measurement::NotApplicable);
    }

    #[test]
    fn test_memory_fatal_propagates() {
        let mut guard = ResourceGuard::new();
        let result = guard.run_memory(
            |_| {
                Err(WorkError::Fatal {
                    reason: "bug".to_string(),
                })
            },
            &mut NoTrace,
        );
        assert!(result.is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_memory_host_fallback_reports_rss() {
        let mut guard = ResourceGuard::new();
        assert!(!guard.has_accelerator());
        let result = guard.run_memory(|_| Ok(()), &mut NoTrace).expect("guarded");
        assert!(matches!(result, Measurement::Bytes(b) if b > 0));
    }

    #[test]
    fn test_reset_protocol_runs_before_each_cell() {
        use std::cell::RefCell;
        use std::rc::Rc;

        /// Counter handle sharing its call counts with the test.
        struct SharedCounters {
            calls: Rc<RefCell<(usize, usize)>>,
        }
        impl AcceleratorCounters for SharedCounters {
            fn clear_cache(&mut self) {
                self.calls.borrow_mut().0 += 1;
            }
            fn reset_peak(&mut self) {
                self.calls.borrow_mut().1 += 1;
            }
            fn peak_bytes(&self) -> u64 {
                0
            }
        }

        let calls = Rc::new(RefCell::new((0, 0)));
        let mut guard = ResourceGuard::new().with_accelerator(Box::new(SharedCounters {
            calls: Rc::clone(&calls),
        }));
        guard.run_timed(|| Ok(()), 1, 1).expect("first");
        guard.run_memory(|_| Ok(()), &mut NoTrace).expect("second");
        assert_eq!(*calls.borrow(), (2, 2));
    }
}
