//! Optional per-sample hooks. The pipeline calls them after a sample's
//! artifacts are written; the default does nothing. A hook error aborts the
//! run like any other failure.

use ndarray::{ArrayView3, Zip};

use crate::error::{EditError, Result};
use crate::stats::RunningStat;
use crate::types::SampleOutcome;

pub trait SampleObserver {
    fn on_sample(&mut self, _outcome: &SampleOutcome<'_>) -> Result<()> {
        Ok(())
    }

    fn on_finish(&mut self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SampleObserver for NoopObserver {}

/// Mean absolute error against reference edits, for samples that have one.
#[derive(Debug, Default, Clone)]
pub struct L1DistanceObserver {
    init_distance: RunningStat,
    distance: RunningStat,
}

impl L1DistanceObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Running mean of |input - target|.
    pub fn init_distance(&self) -> &RunningStat {
        &self.init_distance
    }

    /// Running mean of |prediction - target|.
    pub fn distance(&self) -> &RunningStat {
        &self.distance
    }
}

pub fn mean_abs_diff(a: ArrayView3<'_, f32>, b: ArrayView3<'_, f32>) -> Option<f64> {
    if a.dim() != b.dim() || a.is_empty() {
        return None;
    }
    let mut total = 0.0_f64;
    Zip::from(&a).and(&b).for_each(|&x, &y| {
        total += f64::from((x - y).abs());
    });
    Some(total / a.len() as f64)
}

impl SampleObserver for L1DistanceObserver {
    fn on_sample(&mut self, outcome: &SampleOutcome<'_>) -> Result<()> {
        let Some(target) = outcome.target else {
            return Ok(());
        };
        let (Some(init), Some(dist)) = (
            mean_abs_diff(outcome.input, target),
            mean_abs_diff(outcome.prediction, target),
        ) else {
            return Err(EditError::shape(format!(
                "sample {} target {:?} does not match input {:?} and prediction {:?}",
                outcome.index,
                target.dim(),
                outcome.input.dim(),
                outcome.prediction.dim()
            )));
        };
        self.init_distance.update(init);
        self.distance.update(dist);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, Array3};

    use super::*;

    fn outcome<'a>(
        input: &'a Array3<f32>,
        prediction: &'a Array3<f32>,
        target: Option<&'a Array3<f32>>,
        codes: &'a Array1<i64>,
    ) -> SampleOutcome<'a> {
        SampleOutcome {
            index: 0,
            input: input.view(),
            prediction: prediction.view(),
            target: target.map(|t| t.view()),
            selected_step: 0,
            action_codes: codes.view(),
        }
    }

    #[test]
    fn test_mean_abs_diff() {
        let a = Array3::<f32>::zeros((1, 2, 2));
        let b = Array3::<f32>::from_elem((1, 2, 2), 0.5);
        assert_eq!(mean_abs_diff(a.view(), b.view()), Some(0.5));
        let c = Array3::<f32>::zeros((1, 1, 2));
        assert_eq!(mean_abs_diff(a.view(), c.view()), None);
    }

    #[test]
    fn test_l1_observer_tracks_both_distances() {
        let input = Array3::<f32>::zeros((3, 2, 2));
        let prediction = Array3::<f32>::from_elem((3, 2, 2), 0.75);
        let target = Array3::<f32>::ones((3, 2, 2));
        let codes = Array1::<i64>::zeros(3);

        let mut observer = L1DistanceObserver::new();
        observer
            .on_sample(&outcome(&input, &prediction, Some(&target), &codes))
            .unwrap();
        observer
            .on_sample(&outcome(&input, &prediction, None, &codes))
            .unwrap();

        assert_eq!(observer.init_distance().count(), 1);
        assert_eq!(observer.init_distance().average(), 1.0);
        assert_eq!(observer.distance().average(), 0.25);
    }

    #[test]
    fn test_noop_observer_is_inert() {
        let frame = Array3::<f32>::zeros((3, 1, 1));
        let codes = Array1::<i64>::zeros(1);
        let mut observer = NoopObserver;
        observer.on_sample(&outcome(&frame, &frame, None, &codes)).unwrap();
        observer.on_finish();
    }

    #[test]
    fn test_l1_observer_rejects_mismatched_target() {
        let input = Array3::<f32>::zeros((3, 4, 4));
        let prediction = Array3::<f32>::zeros((3, 2, 2));
        let target = Array3::<f32>::ones((3, 4, 4));
        let codes = Array1::<i64>::zeros(3);

        let mut observer = L1DistanceObserver::new();
        let err = observer
            .on_sample(&outcome(&input, &prediction, Some(&target), &codes))
            .unwrap_err();
        assert!(err.is_inference());
        assert_eq!(observer.init_distance().count(), 0);
        assert_eq!(observer.distance().count(), 0);
    }
}
