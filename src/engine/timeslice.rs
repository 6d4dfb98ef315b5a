//! Time-slice selection over aggregated telemetry
//!
//! Aligned telemetry comes back as mean-aggregated buckets, possibly several
//! per series. The engine snapshots exactly one bucket per device: the
//! earliest one present. Inside a short lookback the earliest bucket is the
//! one most likely to have received samples from every series; later
//! buckets may still be filling. Picking the earliest is deliberate.

use crate::observation::{Observation, Timestamp};

/// Observations sharing one bucket timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSlice {
    /// Bucket timestamp
    pub time: Timestamp,
    /// Observations in that bucket, in input order
    pub observations: Vec<Observation>,
}

/// Distinct bucket timestamps, ascending
fn bucket_times(observations: &[Observation]) -> Vec<Timestamp> {
    let mut times: Vec<Timestamp> = observations.iter().map(|o| o.time).collect();
    times.sort_unstable();
    times.dedup();
    times
}

/// Select the earliest bucket present in the result set
///
/// Returns `None` when there are no observations at all.
pub fn earliest_slice(observations: &[Observation]) -> Option<TimeSlice> {
    let time = *bucket_times(observations).first()?;

    Some(TimeSlice {
        time,
        observations: observations
            .iter()
            .filter(|o| o.time == time)
            .cloned()
            .collect(),
    })
}
