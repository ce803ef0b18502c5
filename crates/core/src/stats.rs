//! Exact incremental averages kept across a run.

use serde::Serialize;

/// Incremental arithmetic mean of a scalar observed once per iteration.
///
/// The update is `average * (1 - 1/count) + x / count`, evaluated in that
/// order, so reported averages match the reference evaluation scripts to the
/// last bit. There is no history and no reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningStat {
    average: f64,
    count: u64,
}

impl RunningStat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation in and return the new average.
    pub fn update(&mut self, value: f64) -> f64 {
        self.count += 1;
        let count = self.count as f64;
        self.average = self.average * (1.0 - 1.0 / count) + value / count;
        self.average
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// `None` until the first update.
    pub fn value(&self) -> Option<f64> {
        (self.count > 0).then_some(self.average)
    }
}
