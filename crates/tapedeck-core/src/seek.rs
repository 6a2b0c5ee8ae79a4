//! Seek parameters

use serde::{Deserialize, Serialize};
use std::fmt;

/// How far a seek may land from the requested position to hit a sync point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekParameters {
    pub tolerance_before_ms: u64,
    pub tolerance_after_ms: u64,
}

impl SeekParameters {
    /// Seek exactly to the requested position
    pub const EXACT: SeekParameters = SeekParameters {
        tolerance_before_ms: 0,
        tolerance_after_ms: 0,
    };
    /// Seek to whichever neighbouring sync point is nearest
    pub const CLOSEST_SYNC: SeekParameters = SeekParameters {
        tolerance_before_ms: u64::MAX,
        tolerance_after_ms: u64::MAX,
    };
    /// Seek to the sync point at or before the requested position
    pub const PREVIOUS_SYNC: SeekParameters = SeekParameters {
        tolerance_before_ms: u64::MAX,
        tolerance_after_ms: 0,
    };
    /// Seek to the sync point at or after the requested position
    pub const NEXT_SYNC: SeekParameters = SeekParameters {
        tolerance_before_ms: 0,
        tolerance_after_ms: u64::MAX,
    };

    /// Resolve a seek to `position_ms` given the sync points around it
    /// (`first_sync_ms <= position_ms <= second_sync_ms`).
    pub fn resolve_seek_position(&self, position_ms: u64, first_sync_ms: u64, second_sync_ms: u64) -> u64 {
        if *self == Self::EXACT {
            return position_ms;
        }

        let min = position_ms.saturating_sub(self.tolerance_before_ms);
        let max = position_ms.saturating_add(self.tolerance_after_ms);
        let first_valid = min <= first_sync_ms && first_sync_ms <= max;
        let second_valid = min <= second_sync_ms && second_sync_ms <= max;

        match (first_valid, second_valid) {
            (true, true) => {
                if position_ms.abs_diff(first_sync_ms) <= position_ms.abs_diff(second_sync_ms) {
                    first_sync_ms
                } else {
                    second_sync_ms
                }
            }
            (true, false) => first_sync_ms,
            (false, true) => second_sync_ms,
            (false, false) => min,
        }
    }
}

impl Default for SeekParameters {
    fn default() -> Self {
        Self::EXACT
    }
}

impl fmt::Display for SeekParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::EXACT => write!(f, "EXACT"),
            Self::CLOSEST_SYNC => write!(f, "CLOSEST_SYNC"),
            Self::PREVIOUS_SYNC => write!(f, "PREVIOUS_SYNC"),
            Self::NEXT_SYNC => write!(f, "NEXT_SYNC"),
            other => write!(
                f,
                "SeekParameters(before={}ms, after={}ms)",
                other.tolerance_before_ms, other.tolerance_after_ms
            ),
        }
    }
}
