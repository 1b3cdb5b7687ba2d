//! Common data types

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Diagnostics of one event-loop run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawSummary {
    /// Rows visited.
    pub entries: u64,
    /// Rows whose common selection weight was non-zero.
    pub selected: u64,
    /// Histogram fills performed (zero-weight fills are not counted).
    pub fills: u64,
    /// Wall time of the scan.
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl DrawSummary {
    /// Combine the diagnostics of two runs over disjoint partitions.
    ///
    /// Counts add up; the elapsed time is the longer of the two, which is
    /// the wall time when the partitions ran concurrently.
    pub fn merge(self, other: DrawSummary) -> DrawSummary {
        DrawSummary {
            entries: self.entries + other.entries,
            selected: self.selected + other.selected,
            fills: self.fills + other.fills,
            elapsed: self.elapsed.max(other.elapsed),
        }
    }

    /// Rows per second, `0.0` for an instantaneous run.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.entries as f64 / secs } else { 0.0 }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
