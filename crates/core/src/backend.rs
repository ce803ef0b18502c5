//! Execution device selection and `ort::Session` construction.
//!
//! The device is an explicit configuration value handed to whoever builds a
//! session; nothing here consults process-wide state.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use anyhow::{Context, Result};
use ort::{
    execution_providers::{
        CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, TensorRTExecutionProvider,
    },
    session::{builder::GraphOptimizationLevel, Session},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::EditError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionDevice {
    Cpu,
    #[default]
    Cuda,
    Tensorrt,
}

/// Case-insensitive `cpu`, `cuda` or `tensorrt`; anything else is rejected.
impl FromStr for ExecutionDevice {
    type Err = EditError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "tensorrt" => Ok(Self::Tensorrt),
            other => Err(EditError::config(format!(
                "unknown execution device `{other}` (expected cpu, cuda or tensorrt)"
            ))),
        }
    }
}

impl fmt::Display for ExecutionDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::Tensorrt => write!(f, "tensorrt"),
        }
    }
}

pub struct SessionConfig<'a> {
    pub model_path: &'a Path,
    pub device: ExecutionDevice,
    pub trt_cache_dir: Option<&'a Path>,
}

/// Build a session on the requested device.
///
/// TensorRT registers CUDA as its fallback; CUDA falls back to CPU inside ORT
/// when the provider cannot be loaded.
pub fn build_session(config: &SessionConfig<'_>) -> Result<Session> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    let started = Instant::now();

    let session = match config.device {
        ExecutionDevice::Tensorrt => {
            let cache_dir = config
                .trt_cache_dir
                .unwrap_or_else(|| Path::new("trt_cache"));
            if let Err(e) = std::fs::create_dir_all(cache_dir) {
                warn!(
                    dir = %cache_dir.display(),
                    error = %e,
                    "Failed to create TRT cache directory"
                );
            }

            info!(
                cache_dir = %cache_dir.display(),
                "Initializing TensorRT session (first run may take several minutes)"
            );
            builder
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_engine_cache(true)
                        .with_engine_cache_path(cache_dir.to_string_lossy().to_string())
                        .with_device_id(0)
                        .build(),
                    CUDAExecutionProvider::default().build(),
                ])?
                .commit_from_file(config.model_path)
        }
        ExecutionDevice::Cuda => {
            let cuda = CUDAExecutionProvider::default();
            if !cuda.is_available().unwrap_or(false) {
                warn!("CUDA EP is not available; inference will fall back to CPU");
            }
            builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])?
                .commit_from_file(config.model_path)
        }
        ExecutionDevice::Cpu => builder
            .with_execution_providers([CPUExecutionProvider::default().build()])?
            .commit_from_file(config.model_path),
    }
    .with_context(|| format!("Failed to load ONNX model: {}", config.model_path.display()))?;

    debug!(
        device = %config.device,
        model = %config.model_path.display(),
        elapsed_secs = started.elapsed().as_secs_f64(),
        "Session ready"
    );
    Ok(session)
}
