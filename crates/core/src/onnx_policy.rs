//! [`Policy`] backed by an exported ONNX graph of the editing actor.
//!
//! The graph takes `instruction_ids` (`[B, T]`, i64) and `image`
//! (`[B, C, H, W]`, f32 in `[0, 1]`) and unrolls the full episode, producing
//! `state`, `frames` (`[B, L, C, H, W]`), `ops` (`[B, L]`, i64) and `params`
//! (`[B, L, K]`).

use std::path::Path;

use anyhow::{bail, Context};
use ndarray::{ArrayView2, ArrayView4, Ix2, Ix3, Ix5};
use ort::{session::Session, value::Tensor};
use tracing::info;

use crate::backend::{build_session, ExecutionDevice, SessionConfig};
use crate::error::{EditError, Result};
use crate::policy::Policy;
use crate::types::{SamplingMode, TrajectoryBatch};

pub const INPUT_INSTRUCTION: &str = "instruction_ids";
pub const INPUT_IMAGE: &str = "image";
pub const OUTPUT_STATE: &str = "state";
pub const OUTPUT_FRAMES: &str = "frames";
pub const OUTPUT_OPS: &str = "ops";
pub const OUTPUT_PARAMS: &str = "params";

pub struct OnnxPolicy {
    session: Session,
    device: ExecutionDevice,
}

impl OnnxPolicy {
    pub fn load(model_path: &Path, device: ExecutionDevice, trt_cache_dir: Option<&Path>) -> Result<Self> {
        if !model_path.is_file() {
            return Err(EditError::config(format!(
                "policy checkpoint not found: {}",
                model_path.display()
            )));
        }

        let session = build_session(&SessionConfig {
            model_path,
            device,
            trt_cache_dir,
        })
        .map_err(|err| EditError::config(format!("{err:#}")))?;

        let input_names: Vec<&str> = session.inputs().iter().map(|input| input.name()).collect();
        for required in [INPUT_INSTRUCTION, INPUT_IMAGE] {
            if !input_names.contains(&required) {
                return Err(EditError::config(format!(
                    "policy graph {} has no `{required}` input (found {input_names:?})",
                    model_path.display()
                )));
            }
        }
        let output_names: Vec<&str> = session.outputs().iter().map(|output| output.name()).collect();
        for required in [OUTPUT_STATE, OUTPUT_FRAMES, OUTPUT_OPS, OUTPUT_PARAMS] {
            if !output_names.contains(&required) {
                return Err(EditError::config(format!(
                    "policy graph {} has no `{required}` output (found {output_names:?})",
                    model_path.display()
                )));
            }
        }

        info!(
            model = %model_path.display(),
            %device,
            "Loaded policy graph"
        );
        Ok(Self { session, device })
    }

    pub fn device(&self) -> ExecutionDevice {
        self.device
    }
}

impl Policy for OnnxPolicy {
    fn name(&self) -> &str {
        "onnx"
    }

    fn episode_forward(
        &mut self,
        instruction_ids: ArrayView2<'_, i64>,
        images: ArrayView4<'_, f32>,
        sampling: SamplingMode,
    ) -> anyhow::Result<TrajectoryBatch> {
        if sampling != SamplingMode::Greedy {
            bail!("exported policy graphs only support greedy decoding, got {sampling}");
        }

        let ids_tensor = Tensor::from_array(instruction_ids.to_owned())?;
        let image_tensor = Tensor::from_array(images.as_standard_layout().into_owned())?;
        let outputs = self.session.run(ort::inputs![
            INPUT_INSTRUCTION => &ids_tensor,
            INPUT_IMAGE => &image_tensor,
        ])?;

        let state = outputs[OUTPUT_STATE].try_extract_array::<f32>()?.to_owned();
        let frames = outputs[OUTPUT_FRAMES]
            .try_extract_array::<f32>()?
            .to_owned()
            .into_dimensionality::<Ix5>()
            .context("`frames` output must be [batch, steps, channels, height, width]")?;
        let action_codes = outputs[OUTPUT_OPS]
            .try_extract_array::<i64>()?
            .to_owned()
            .into_dimensionality::<Ix2>()
            .context("`ops` output must be [batch, steps]")?;
        let params = outputs[OUTPUT_PARAMS]
            .try_extract_array::<f32>()?
            .to_owned()
            .into_dimensionality::<Ix3>()
            .context("`params` output must be [batch, steps, params]")?;

        Ok(TrajectoryBatch {
            state,
            frames,
            action_codes,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_checkpoint_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxPolicy::load(&dir.path().join("actor.onnx"), ExecutionDevice::Cpu, None)
            .err()
            .expect("missing model should fail");
        assert!(err.is_configuration());
        assert!(err.to_string().contains("policy checkpoint not found"));
    }
}
