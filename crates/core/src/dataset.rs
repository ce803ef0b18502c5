//! Manifest-driven evaluation dataset.
//!
//! A manifest is a JSON array of `{ "image": ..., "instruction": ..., "target": ... }`
//! entries; image paths are relative to the manifest's directory. Entries are
//! yielded in file order.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{EditError, Result};
use crate::types::Sample;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub image: PathBuf,
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ManifestDataset {
    base_dir: PathBuf,
    entries: Vec<ManifestEntry>,
    image_size: u32,
}

impl ManifestDataset {
    pub fn load(manifest: &Path, image_size: u32) -> Result<Self> {
        let raw = fs::read_to_string(manifest).map_err(|err| {
            EditError::config(format!("failed to read manifest {}: {err}", manifest.display()))
        })?;
        let entries: Vec<ManifestEntry> = serde_json::from_str(&raw).map_err(|err| {
            EditError::config(format!("malformed manifest {}: {err}", manifest.display()))
        })?;
        let base_dir = manifest
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::from_entries(base_dir, entries, image_size)
    }

    pub fn from_entries(base_dir: PathBuf, entries: Vec<ManifestEntry>, image_size: u32) -> Result<Self> {
        if image_size == 0 {
            return Err(EditError::config("image_size must be positive"));
        }
        Ok(Self {
            base_dir,
            entries,
            image_size,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Decode entry `index` into a [`Sample`].
    pub fn get(&self, index: usize) -> Result<Sample> {
        let entry = self.entries.get(index).ok_or_else(|| {
            EditError::config(format!("sample {index} out of range ({} entries)", self.len()))
        })?;
        let image = load_image_tensor(&self.base_dir.join(&entry.image), self.image_size)?;
        let target = entry
            .target
            .as_ref()
            .map(|target| load_image_tensor(&self.base_dir.join(target), self.image_size))
            .transpose()?;
        Ok(Sample {
            image,
            instruction: entry.instruction.clone(),
            target,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<Sample>> + '_ {
        (0..self.len()).map(move |index| self.get(index))
    }
}

/// Decode an image file into a `[3, size, size]` tensor in `[0, 1]`.
pub fn load_image_tensor(path: &Path, size: u32) -> Result<Array3<f32>> {
    let decoded = image::open(path).map_err(|source| EditError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let rgb = decoded
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();

    let side = size as usize;
    let mut tensor = Array3::<f32>::zeros((3, side, side));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for channel in 0..3 {
            tensor[[channel, y as usize, x as usize]] = f32::from(pixel[channel]) / 255.0;
        }
    }
    Ok(tensor)
}
