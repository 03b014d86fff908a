//! Helpers for asserting on `sarframe` counters.
//!
//! A [`Snapshotter`] drains counters as it reads them, so take one
//! [`snapshot`] per test and query it as often as needed.

use ::metrics::{SharedString, Unit};
use metrics_util::{
    CompositeKey,
    debugging::{DebugValue, DebuggingRecorder, Snapshotter},
};

/// One recorded metric: key, unit, description, and value.
pub type MetricSample = (
    CompositeKey,
    Option<Unit>,
    Option<SharedString>,
    DebugValue,
);

/// Create a debugging recorder and the snapshotter reading it.
#[must_use]
pub fn debugging_recorder() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

/// Capture every metric recorded since the last snapshot.
#[must_use]
pub fn snapshot(snapshotter: &Snapshotter) -> Vec<MetricSample> { snapshotter.snapshot().into_vec() }

/// Sum of every counter named `name` carrying the label `label`, or of every
/// counter named `name` when `label` is `None`.
#[must_use]
pub fn counter_value(metrics: &[MetricSample], name: &str, label: Option<(&str, &str)>) -> u64 {
    metrics
        .iter()
        .filter(|(key, _, _, _)| key.key().name() == name)
        .filter(|(key, _, _, _)| {
            label.is_none_or(|(label_key, label_value)| {
                key.key()
                    .labels()
                    .any(|l| l.key() == label_key && l.value() == label_value)
            })
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(count) => *count,
            _ => 0,
        })
        .sum()
}
