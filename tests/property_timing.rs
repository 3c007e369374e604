//! Property-based tests for the timing engine and result rendering,
//! fuzzing grid shapes and measurement values across the parameter space.

use medir::backend::{SyntheticBatch, WorkError};
use medir::report::{Measurement, MetricKind, ResultTable};
use medir::timing;
use proptest::prelude::*;

// ============================================================================
// Timing engine properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// More repeats can only lower (or keep) the reported minimum for a
    /// deterministic workload.
    #[test]
    fn test_min_of_repeats_is_monotone(
        repeat in 1usize..4,
        extra in 1usize..4,
        trials in 1usize..4,
    ) {
        let spin = || -> Result<(), WorkError> {
            std::hint::black_box((0..200u64).sum::<u64>());
            Ok(())
        };
        let few = timing::measure(spin, repeat, trials).unwrap();
        let many = timing::measure(spin, repeat + extra, trials).unwrap();
        // Separate runs race the scheduler, so allow generous slack; the
        // claim is that extra repeats never blow the estimate up.
        prop_assert!(many <= few * 50.0 + 1e-3);
        prop_assert!(few >= 0.0 && many >= 0.0);
    }

    /// The reported value is per trial: a window of N trials never reports
    /// more than the whole window took.
    #[test]
    fn test_per_trial_normalization(trials in 1usize..8) {
        let mut calls = 0usize;
        let work = || -> Result<(), WorkError> {
            calls += 1;
            Ok(())
        };
        let seconds = timing::measure(work, 2, trials).unwrap();
        prop_assert!(seconds >= 0.0);
        prop_assert_eq!(calls, 2 * trials);
    }

    #[test]
    fn test_zero_axes_rejected(repeat in 0usize..3, trials in 0usize..3) {
        prop_assume!(repeat == 0 || trials == 0);
        let result = timing::measure(|| Ok(()), repeat, trials);
        let is_fatal = matches!(result, Err(WorkError::Fatal { .. }));
        prop_assert!(is_fatal);
    }
}

// ============================================================================
// Rendering properties
// ============================================================================

fn arb_measurement() -> impl Strategy<Value = Measurement> {
    prop_oneof![
        (0.0f64..1000.0).prop_map(Measurement::Seconds),
        any::<u32>().prop_map(|b| Measurement::Bytes(u64::from(b))),
        Just(Measurement::NotApplicable),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Rendering is read-only: two renders of the same table are identical.
    #[test]
    fn test_render_is_idempotent(
        cells in proptest::collection::vec(
            (1usize..64, 1usize..512, arb_measurement()),
            1..12,
        )
    ) {
        let mut table = ResultTable::new(MetricKind::InferenceTime);
        for (batch, seq, m) in cells {
            table.insert("model", batch, seq, m);
        }
        let first = table.render();
        let second = table.render();
        prop_assert_eq!(&first, &second);

        let csv_first = table.to_csv();
        let csv_second = table.to_csv();
        prop_assert_eq!(csv_first, csv_second);
    }

    /// Every cell value appears in the CSV and no cell is ever empty.
    #[test]
    fn test_csv_has_no_empty_cells(
        cells in proptest::collection::vec(
            (1usize..64, 1usize..512, arb_measurement()),
            1..12,
        )
    ) {
        let mut table = ResultTable::new(MetricKind::TrainMemory);
        for (batch, seq, m) in &cells {
            table.insert("model", *batch, *seq, *m);
        }
        let csv = table.to_csv();
        prop_assert!(!csv.contains(",,"));
        prop_assert!(!csv.contains(",\n"));
        for line in csv.lines().skip(1) {
            prop_assert!(line.starts_with("model,"));
        }
    }

    /// JSON serialization of a table round-trips every cell.
    #[test]
    fn test_table_json_roundtrip(
        cells in proptest::collection::vec(
            (1usize..64, 1usize..512, arb_measurement()),
            1..12,
        )
    ) {
        let mut table = ResultTable::new(MetricKind::InferenceMemory);
        for (batch, seq, m) in &cells {
            table.insert("model", *batch, *seq, *m);
        }
        let json = serde_json::to_string(&table).unwrap();
        let back: ResultTable = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(table.len(), back.len());
        for (batch, seq, _) in &cells {
            prop_assert_eq!(table.get("model", *batch, *seq), back.get("model", *batch, *seq));
        }
    }
}

// ============================================================================
// Synthetic batch properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Batch construction is deterministic and respects the vocab bound.
    #[test]
    fn test_synthetic_batch_deterministic(
        batch in 1usize..16,
        seq in 1usize..64,
        vocab in 2usize..2048,
    ) {
        let a = SyntheticBatch::new(batch, seq, vocab);
        let b = SyntheticBatch::new(batch, seq, vocab);
        prop_assert_eq!(&a.token_ids, &b.token_ids);
        prop_assert_eq!(a.token_ids.len(), batch * seq);
        prop_assert!(a.token_ids.iter().all(|&t| (t as usize) < vocab));
    }
}
