//! Data carried between the policy, the selection stages and observers.

use std::fmt;

use ndarray::{Array2, Array3, Array5, ArrayD, ArrayView1, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::error::{EditError, Result};

/// Output of one policy invocation for a batch of samples.
///
/// All tensors are aligned by sample index along axis 0 and by step along
/// axis 1.
#[derive(Debug, Clone)]
pub struct TrajectoryBatch {
    /// Final recurrent state, opaque to the pipeline.
    pub state: ArrayD<f32>,
    /// Generated frames, `[batch, steps, channels, height, width]`.
    pub frames: Array5<f32>,
    /// Discrete action code per step, `[batch, steps]`.
    pub action_codes: Array2<i64>,
    /// Continuous operation parameters per step, `[batch, steps, params]`.
    pub params: Array3<f32>,
}

impl TrajectoryBatch {
    pub fn batch_size(&self) -> usize {
        self.frames.dim().0
    }

    pub fn steps(&self) -> usize {
        self.frames.dim().1
    }

    /// Check the `(B, L, C, H, W)`, `(B, L)` and `(B, L, K)` contracts.
    pub fn validate(&self, expected_batch: usize) -> Result<()> {
        let (batch, steps, channels, height, width) = self.frames.dim();
        if batch != expected_batch {
            return Err(EditError::shape(format!(
                "frames batch {batch} does not match request batch {expected_batch}"
            )));
        }
        if steps == 0 {
            return Err(EditError::shape("policy returned zero steps"));
        }
        if channels == 0 || height == 0 || width == 0 {
            return Err(EditError::shape(format!(
                "empty frame {channels}x{height}x{width}"
            )));
        }
        if self.action_codes.dim() != (batch, steps) {
            return Err(EditError::shape(format!(
                "action codes {:?} do not match (batch, steps) = ({batch}, {steps})",
                self.action_codes.dim()
            )));
        }
        let (param_batch, param_steps, _) = self.params.dim();
        if (param_batch, param_steps) != (batch, steps) {
            return Err(EditError::shape(format!(
                "params ({param_batch}, {param_steps}, _) do not match (batch, steps) = ({batch}, {steps})"
            )));
        }
        Ok(())
    }
}

/// Decoding mode requested from the policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Arg-max decoding; repeated calls with the same inputs agree.
    #[default]
    Greedy,
    Stochastic,
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Greedy => write!(f, "greedy"),
            Self::Stochastic => write!(f, "stochastic"),
        }
    }
}

/// One dataset entry: a conditioning image in `[channels, height, width]`
/// layout with values in `[0, 1]`, the edit instruction and an optional
/// reference result.
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: Array3<f32>,
    pub instruction: String,
    pub target: Option<Array3<f32>>,
}

/// Everything an observer may inspect once a sample has been finalized.
pub struct SampleOutcome<'a> {
    pub index: usize,
    pub input: ArrayView3<'a, f32>,
    pub prediction: ArrayView3<'a, f32>,
    pub target: Option<ArrayView3<'a, f32>>,
    pub selected_step: usize,
    pub action_codes: ArrayView1<'a, i64>,
}
