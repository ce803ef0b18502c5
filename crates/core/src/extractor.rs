//! Per-sample gather of the frame at the selected step.

use ndarray::{s, Array4, ArrayView5, Axis};

use crate::error::{EditError, Result};

/// Gather `frames[i, selected[i]]` for every sample `i`.
///
/// `frames` is `[batch, steps, channels, height, width]`; the result is
/// `[batch, channels, height, width]` with values copied bit-for-bit.
pub fn gather_selected_frames(frames: ArrayView5<'_, f32>, selected: &[usize]) -> Result<Array4<f32>> {
    let (batch, steps, channels, height, width) = frames.dim();
    if selected.len() != batch {
        return Err(EditError::shape(format!(
            "{} selected indices for a batch of {batch}",
            selected.len()
        )));
    }

    let mut gathered = Array4::<f32>::zeros((batch, channels, height, width));
    for (sample, (mut out, &step)) in gathered
        .axis_iter_mut(Axis(0))
        .zip(selected)
        .enumerate()
    {
        if step >= steps {
            return Err(EditError::shape(format!(
                "sample {sample} selected step {step} of {steps}"
            )));
        }
        out.assign(&frames.slice(s![sample, step, .., .., ..]));
    }

    Ok(gathered)
}
