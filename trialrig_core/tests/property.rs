use std::time::{Duration, Instant};

use proptest::prelude::*;
use trialrig_core::CalibrationOffsets;
use trialrig_core::util::{fmt_float, next_tick};

proptest! {
    #[test]
    fn corrected_is_raw_minus_offset(
        offsets in proptest::collection::btree_map(0u32..8, -1.0f64..1.0, 0..8),
        channel in 0u32..8,
        raw in -2.0f64..2.0,
    ) {
        let expected = raw - offsets.get(&channel).copied().unwrap_or(0.0);
        let offsets = CalibrationOffsets::new(offsets);
        prop_assert_eq!(offsets.correct(channel, raw), expected);
    }

    #[test]
    fn next_tick_is_ahead_and_on_the_grid(
        interval_us in 1u64..50_000,
        late_us in 0u64..1_000_000,
    ) {
        let t0 = Instant::now();
        let interval = Duration::from_micros(interval_us);
        let now = t0 + Duration::from_micros(late_us);
        let next = next_tick(t0, interval, now);
        prop_assert!(next > now);
        let offset = next.duration_since(t0).as_nanos();
        prop_assert_eq!(offset % interval.as_nanos(), 0);
        // never more than one slot ahead of now
        prop_assert!(next.duration_since(now) <= interval);
    }

    #[test]
    fn formatted_floats_parse_back(v in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
        let parsed: f64 = fmt_float(v).parse().unwrap();
        prop_assert_eq!(parsed, v);
    }
}
