//! Property-based tests for the windrose runtime.
//!
//! Covers: the tumbling partition property, sliding-window membership,
//! percentile bounds, left-join completeness, and sampling tolerance.

use std::sync::Arc;

use proptest::prelude::*;
use windrose_core::UNGROUPED_KEY;
use windrose_runtime::{
    aggregate, assign_windows, join_streams, AggregateOp, AggregationConfig,
    BackpressureConfig, BackpressureController, BackpressureStrategy, JoinType, SharedEvent,
    StreamEvent, StreamJoinConfig, WindowSpec,
};

/// Strategy for batches of events with bounded timestamps and a numeric field.
fn arb_events(max_len: usize) -> impl Strategy<Value = Vec<SharedEvent>> {
    prop::collection::vec((0i64..1_000_000, -1000.0f64..1000.0), 0..max_len).prop_map(|pairs| {
        pairs
            .into_iter()
            .map(|(ts, v)| Arc::new(StreamEvent::new("k").at_millis(ts).with_field("v", v)))
            .collect()
    })
}

proptest! {
    /// Tumbling windows partition the input: every event lands in exactly
    /// one window, and nothing is lost or duplicated.
    #[test]
    fn tumbling_windows_partition_input(
        events in arb_events(64),
        size_ms in 1i64..100_000,
    ) {
        let windows = assign_windows(&events, &WindowSpec::tumbling_millis(size_ms)).unwrap();

        let total: usize = windows.values().map(|w| w.len()).sum();
        prop_assert_eq!(total, events.len());

        for window in windows.values() {
            for event in &window.events {
                prop_assert!(window.start <= event.timestamp);
                prop_assert!(event.timestamp < window.end);
            }
        }
    }

    /// Every sliding window containing an event's timestamp actually
    /// contains that event, and each event appears in ceil(size/slide)
    /// windows at most.
    #[test]
    fn sliding_window_membership(
        events in arb_events(32),
        slide_ms in 1i64..10_000,
        factor in 1i64..8,
    ) {
        let size_ms = slide_ms * factor;
        let windows =
            assign_windows(&events, &WindowSpec::sliding_millis(size_ms, slide_ms)).unwrap();

        for event in &events {
            let memberships = windows
                .values()
                .filter(|w| w.events.iter().any(|e| Arc::ptr_eq(e, event)))
                .count();
            let expected = windows
                .values()
                .filter(|w| w.start <= event.timestamp && event.timestamp < w.end)
                .count();
            prop_assert_eq!(memberships, expected);
            prop_assert!(memberships as i64 <= (size_ms + slide_ms - 1) / slide_ms);
            prop_assert!(memberships >= 1);
        }
    }

    /// A percentile always returns one of the observed values, bounded by
    /// the min and max.
    #[test]
    fn percentile_within_observed_bounds(
        events in arb_events(64).prop_filter("non-empty", |e| !e.is_empty()),
        p in 0.0f64..=1.0,
    ) {
        let windows = assign_windows(&events, &WindowSpec::tumbling_millis(10_000_000)).unwrap();
        let config = AggregationConfig {
            op: AggregateOp::Percentile(p),
            field: Some("v".into()),
            group_by: vec![],
        };
        let results = aggregate(&windows, &config).unwrap();
        prop_assert_eq!(results.len(), 1);

        let observed: Vec<f64> = events.iter().filter_map(|e| e.get_float("v")).collect();
        let result = results[0].groups[UNGROUPED_KEY];
        prop_assert!(observed.contains(&result));
    }

    /// Left-join output length always equals the left input length, and
    /// inner-join output never exceeds either side.
    #[test]
    fn join_completeness(
        left in arb_events(32),
        right in arb_events(32),
    ) {
        let config = |join_type| StreamJoinConfig {
            join_type,
            left_key: "v".into(),
            right_key: "v".into(),
            window: WindowSpec::tumbling_millis(50_000),
        };

        let left_join = join_streams(&left, &right, &config(JoinType::Left)).unwrap();
        prop_assert_eq!(left_join.len(), left.len());

        let inner = join_streams(&left, &right, &config(JoinType::Inner)).unwrap();
        prop_assert!(inner.len() <= left.len().min(right.len()));

        let right_join = join_streams(&left, &right, &config(JoinType::Right)).unwrap();
        prop_assert_eq!(right_join.len(), right.len());
    }

    /// Sampling retains roughly `rate * n` events. Tolerance-based, never
    /// an exact count.
    #[test]
    fn sampling_rate_tolerance(rate in 0.1f64..0.9) {
        let controller = BackpressureController::new(BackpressureConfig {
            strategy: BackpressureStrategy::Sample,
            buffer_size: 100_000,
            sampling_rate: rate,
            auto_scaling: None,
        })
        .unwrap();

        let n = 5_000usize;
        let events: Vec<SharedEvent> = (0..n)
            .map(|i| Arc::new(StreamEvent::new("k").at_millis(i as i64)))
            .collect();
        let accepted = controller.handle_events(&events);

        let expected = rate * n as f64;
        // ~6 standard deviations of a Bernoulli(n, rate) sum
        let tolerance = 6.0 * (n as f64 * rate * (1.0 - rate)).sqrt();
        prop_assert!(
            (accepted.len() as f64 - expected).abs() < tolerance,
            "retained {} of {} at rate {}",
            accepted.len(),
            n,
            rate
        );
    }
}
