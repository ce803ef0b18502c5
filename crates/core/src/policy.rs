//! The policy capability and the runner that invokes it.

use std::time::Instant;

use ndarray::{ArrayView2, ArrayView4};
use tracing::trace;

use crate::error::{EditError, Result};
use crate::types::{SamplingMode, TrajectoryBatch};

/// An autoregressive image-editing policy.
///
/// Implementations run in inference mode only and must not mutate shared
/// training state. Any failure is returned as-is to the caller.
pub trait Policy {
    fn name(&self) -> &str;

    /// Roll out a full editing episode for each `(instruction, image)` pair.
    ///
    /// `instruction_ids` is `[batch, tokens]`, `images` is
    /// `[batch, channels, height, width]`.
    fn episode_forward(
        &mut self,
        instruction_ids: ArrayView2<'_, i64>,
        images: ArrayView4<'_, f32>,
        sampling: SamplingMode,
    ) -> anyhow::Result<TrajectoryBatch>;
}

impl<P: Policy + ?Sized> Policy for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn episode_forward(
        &mut self,
        instruction_ids: ArrayView2<'_, i64>,
        images: ArrayView4<'_, f32>,
        sampling: SamplingMode,
    ) -> anyhow::Result<TrajectoryBatch> {
        (**self).episode_forward(instruction_ids, images, sampling)
    }
}

/// Thin adapter over a [`Policy`]: checks request shapes, calls the policy
/// once, and validates the returned trajectory. No retries.
pub struct TrajectoryRunner<P> {
    policy: P,
    sampling: SamplingMode,
    max_tokens: usize,
}

impl<P: Policy> TrajectoryRunner<P> {
    pub fn new(policy: P, sampling: SamplingMode, max_tokens: usize) -> Self {
        Self {
            policy,
            sampling,
            max_tokens,
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn run(
        &mut self,
        instruction_ids: ArrayView2<'_, i64>,
        images: ArrayView4<'_, f32>,
    ) -> Result<TrajectoryBatch> {
        let (id_batch, tokens) = instruction_ids.dim();
        let image_batch = images.dim().0;
        if id_batch != image_batch {
            return Err(EditError::shape(format!(
                "{id_batch} instructions for {image_batch} images"
            )));
        }
        if tokens > self.max_tokens {
            return Err(EditError::shape(format!(
                "instruction has {tokens} tokens, encoder accepts at most {}",
                self.max_tokens
            )));
        }

        let started = Instant::now();
        let trajectory = self
            .policy
            .episode_forward(instruction_ids, images, self.sampling)?;
        trajectory.validate(image_batch)?;

        trace!(
            policy = self.policy.name(),
            batch = image_batch,
            steps = trajectory.steps(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Policy rollout finished"
        );
        Ok(trajectory)
    }
}


#[cfg(test)]
mod tests {
    use ndarray::{arr2, Array2, Array4};

    use super::testing::ScriptedPolicy;
    use super::*;

    #[test]
    fn test_runner_returns_validated_trajectory() {
        let policy = ScriptedPolicy::new(vec![arr2(&[[3, 9, 3]])], |_, l| l as f32);
        let mut runner = TrajectoryRunner::new(policy, SamplingMode::Greedy, 8);
        let ids = Array2::<i64>::zeros((1, 8));
        let images = Array4::<f32>::zeros((1, 3, 2, 2));

        let trajectory = runner.run(ids.view(), images.view()).unwrap();
        assert_eq!(trajectory.steps(), 3);
        assert_eq!(runner.policy().calls, 1);
    }

    #[test]
    fn test_runner_rejects_batch_mismatch_before_calling_policy() {
        let policy = ScriptedPolicy::new(vec![], |_, _| 0.0);
        let mut runner = TrajectoryRunner::new(policy, SamplingMode::Greedy, 8);
        let ids = Array2::<i64>::zeros((2, 8));
        let images = Array4::<f32>::zeros((1, 3, 2, 2));

        let err = runner.run(ids.view(), images.view()).unwrap_err();
        assert!(err.is_inference());
        assert_eq!(runner.policy().calls, 0);
    }

    #[test]
    fn test_runner_rejects_overlong_instruction() {
        let policy = ScriptedPolicy::new(vec![], |_, _| 0.0);
        let mut runner = TrajectoryRunner::new(policy, SamplingMode::Greedy, 4);
        let ids = Array2::<i64>::zeros((1, 5));
        let images = Array4::<f32>::zeros((1, 3, 2, 2));
        assert!(runner.run(ids.view(), images.view()).is_err());
    }

    #[test]
    fn test_policy_failure_propagates_unmodified() {
        let policy = ScriptedPolicy::new(vec![], |_, _| 0.0);
        let mut runner = TrajectoryRunner::new(policy, SamplingMode::Greedy, 8);
        let ids = Array2::<i64>::zeros((1, 8));
        let images = Array4::<f32>::zeros((1, 3, 2, 2));

        let err = runner.run(ids.view(), images.view()).unwrap_err();
        assert!(err.is_inference());
        assert_eq!(err.to_string(), "scripted policy ran out of episodes");
    }

    #[test]
    fn test_policy_batch_disagreement_is_inference_error() {
        let policy = ScriptedPolicy::new(vec![arr2(&[[3, 9], [3, 3]])], |_, _| 0.0);
        let mut runner = TrajectoryRunner::new(policy, SamplingMode::Greedy, 8);
        let ids = Array2::<i64>::zeros((1, 8));
        let images = Array4::<f32>::zeros((1, 3, 2, 2));

        // Two rows of codes for a one-image batch.
        let err = runner.run(ids.view(), images.view()).unwrap_err();
        assert!(err.is_inference());
    }
}
