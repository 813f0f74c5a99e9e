use crate::catalog::schema::ArraySchema;
use crate::error::ScanError;
use crate::storage::coordinate::CoordinateRange;
use serde::{Deserialize, Serialize};

/// Inclusive run of consecutive protected-key values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyInterval {
    pub low: i64,
    pub high: i64,
}

impl KeyInterval {
    /// Number of keys in the run, saturating at `u64::MAX`.
    pub fn width(&self) -> u64 {
        (self.high as i128 - self.low as i128 + 1).min(u64::MAX as i128) as u64
    }
}

/// Folds keys into maximal runs. Runs never overlap or touch, and their union
/// is exactly the input set.
pub fn collapse_intervals(keys: &[i64]) -> Vec<KeyInterval> {
    let sorted;
    let keys = if keys.windows(2).all(|w| w[0] < w[1]) {
        keys
    } else {
        let mut owned = keys.to_vec();
        owned.sort_unstable();
        owned.dedup();
        sorted = owned;
        &sorted
    };

    let mut out = Vec::new();
    let Some((&first, rest)) = keys.split_first() else {
        return out;
    };
    let mut current = KeyInterval {
        low: first,
        high: first,
    };
    for &key in rest {
        if current.high.checked_add(1) == Some(key) {
            current.high = key;
        } else {
            out.push(current);
            current = KeyInterval {
                low: key,
                high: key,
            };
        }
    }
    out.push(current);
    out
}

/// One full-extent range per run, bounded on `key_axis` by the run.
pub fn collapse_to_ranges(
    keys: &[i64],
    schema: &ArraySchema,
    key_axis: usize,
) -> Result<Vec<CoordinateRange>, ScanError> {
    if key_axis >= schema.dims() {
        return Err(ScanError::Validation(format!(
            "key axis {key_axis} out of bounds for array '{}'",
            schema.qualified_name()
        )));
    }
    let extent = schema.full_extent()?;
    collapse_intervals(keys)
        .into_iter()
        .map(|interval| extent.with_axis(key_axis, interval.low, interval.high))
        .collect()
}
