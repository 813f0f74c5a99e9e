use proptest::prelude::*;
use secure_scan::access::collapse_intervals;
use secure_scan::spatial::SpatialRangeSet;
use secure_scan::storage::coordinate::{Coordinate, CoordinateRange};
use std::collections::BTreeSet;

fn arb_range() -> impl Strategy<Value = CoordinateRange> {
    (0i64..20, 0i64..6, 0i64..20, 0i64..6).prop_map(|(x, w, y, h)| {
        CoordinateRange::new(Coordinate::from([x, y]), Coordinate::from([x + w, y + h]))
            .expect("ordered corners")
    })
}

fn brute_contains(ranges: &[CoordinateRange], coord: &Coordinate) -> bool {
    ranges.iter().any(|r| r.contains(coord))
}

proptest! {
    #[test]
    fn collapsed_runs_cover_exactly_the_input(keys in prop::collection::vec(-50i64..50, 0..64)) {
        let runs = collapse_intervals(&keys);
        let expected: BTreeSet<i64> = keys.iter().copied().collect();
        let covered: BTreeSet<i64> = runs.iter().flat_map(|r| r.low..=r.high).collect();
        prop_assert_eq!(covered, expected);
        for pair in runs.windows(2) {
            // Neither overlapping nor adjacent.
            prop_assert!(pair[0].high + 1 < pair[1].low);
        }
    }

    #[test]
    fn contains_matches_brute_force(
        ranges in prop::collection::vec(arb_range(), 1..24),
        points in prop::collection::vec((-2i64..30, -2i64..30), 1..64),
    ) {
        let mut set = SpatialRangeSet::from_ranges(2, ranges.iter().cloned()).expect("set");
        set.build_index();
        for (x, y) in points {
            let coord = Coordinate::from([x, y]);
            prop_assert_eq!(
                set.contains(&coord).expect("indexed"),
                brute_contains(&ranges, &coord)
            );
        }
    }

    #[test]
    fn insertion_order_does_not_change_membership(
        ranges in prop::collection::vec(arb_range(), 1..16).prop_shuffle(),
    ) {
        let mut forward = SpatialRangeSet::from_ranges(2, ranges.iter().cloned()).expect("set");
        let mut backward = SpatialRangeSet::from_ranges(2, ranges.iter().rev().cloned()).expect("set");
        forward.build_index();
        backward.build_index();
        prop_assert_eq!(
            forward.bounding_box().expect("indexed"),
            backward.bounding_box().expect("indexed")
        );
        for x in -1i64..27 {
            for y in -1i64..27 {
                let coord = Coordinate::from([x, y]);
                prop_assert_eq!(
                    forward.contains(&coord).expect("indexed"),
                    backward.contains(&coord).expect("indexed")
                );
            }
        }

        // A second build leaves the indexed ranges alone.
        let before = forward.ranges().expect("indexed").to_vec();
        forward.build_index();
        prop_assert_eq!(forward.ranges().expect("indexed").to_vec(), before);
    }
}
