//! Variability of the final edit across paraphrased instructions.

use ndarray::{Array4, ArrayView3, ArrayView4, Axis};
use tracing::trace;

use crate::error::{EditError, Result};
use crate::extractor::gather_selected_frames;
use crate::policy::{Policy, TrajectoryRunner};
use crate::selector::select_terminal_steps;
use crate::vocab::Vocabulary;

/// Mean over all positions of the unbiased per-position variance across the
/// leading (prompt) axis of `frames`, `[prompts, channels, height, width]`.
pub fn frame_variance(frames: ArrayView4<'_, f32>) -> Result<f64> {
    let prompts = frames.len_of(Axis(0));
    if prompts < 2 {
        return Err(EditError::config(format!(
            "variance needs at least 2 prompts, got {prompts}"
        )));
    }

    let per_position = frames.mapv(f64::from).var_axis(Axis(0), 1.0);
    per_position
        .mean()
        .ok_or_else(|| EditError::shape("cannot take the variance of empty frames"))
}

pub struct VarianceEstimator<'a> {
    vocab: &'a Vocabulary,
    end_id: i64,
}

impl<'a> VarianceEstimator<'a> {
    pub fn new(vocab: &'a Vocabulary, end_id: i64) -> Self {
        Self { vocab, end_id }
    }

    /// Run the policy once per prompt on `image` (`[C, H, W]`), select and
    /// extract each final frame, and reduce the set with [`frame_variance`].
    pub fn estimate<P: Policy>(
        &self,
        runner: &mut TrajectoryRunner<P>,
        image: ArrayView3<'_, f32>,
        prompts: &[String],
    ) -> Result<f64> {
        if prompts.len() < 2 {
            return Err(EditError::config(format!(
                "prompt set needs at least 2 instructions, got {}",
                prompts.len()
            )));
        }

        let images = image.insert_axis(Axis(0));
        let mut finals: Option<Array4<f32>> = None;

        for (prompt_index, prompt) in prompts.iter().enumerate() {
            let ids = self.vocab.encode_batch(&[prompt], runner.max_tokens());
            let trajectory = runner.run(ids.view(), images.view())?;
            let selected = select_terminal_steps(trajectory.action_codes.view(), self.end_id);
            let frame = gather_selected_frames(trajectory.frames.view(), &selected)?;
            let frame = frame.index_axis(Axis(0), 0);

            // The first prompt's frame fixes the shape the rest must share.
            let slots = finals.get_or_insert_with(|| {
                let (channels, height, width) = frame.dim();
                Array4::zeros((prompts.len(), channels, height, width))
            });
            let (_, channels, height, width) = slots.dim();
            if frame.dim() != (channels, height, width) {
                return Err(EditError::shape(format!(
                    "prompt {prompt_index} produced frame {:?}, earlier prompts produced {:?}",
                    frame.dim(),
                    (channels, height, width)
                )));
            }
            slots.index_axis_mut(Axis(0), prompt_index).assign(&frame);
            trace!(prompt_index, selected_step = selected[0], "Collected final frame");
        }

        let finals = finals.ok_or_else(|| EditError::config("prompt set is empty"))?;
        frame_variance(finals.view())
    }
}
