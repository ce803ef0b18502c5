//! Evaluation core for instruction-driven image editing policies.

pub mod archive;
pub mod artifacts;
pub mod backend;
pub mod config;
pub mod dataset;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod observer;
pub mod onnx_policy;
pub mod pipeline;
pub mod policy;
pub mod selector;
pub mod stats;
pub mod types;
pub mod variance;
pub mod vocab;

pub use error::{EditError, Result};
