//! Per-sample comparison artifacts: `results/<index:03>/{input,pred,concatenated_image}.jpg`.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::ArrayView3;
use tracing::debug;

use crate::error::{EditError, Result};

pub const INPUT_FILE_NAME: &str = "input.jpg";
pub const PRED_FILE_NAME: &str = "pred.jpg";
pub const CONCAT_FILE_NAME: &str = "concatenated_image.jpg";

/// Canonical side length of saved images.
pub const ARTIFACT_SIZE: u32 = 512;
/// White gap between the input and the prediction in the comparison image.
pub const CONCAT_GAP: u32 = 10;

const GAP_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub input: PathBuf,
    pub pred: PathBuf,
    pub concatenated: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sample_dir(&self, index: usize) -> PathBuf {
        self.root.join(format!("{index:03}"))
    }

    /// Write the conditioning image, the selected frame, and their side-by-side
    /// comparison for sample `index`. Existing files are overwritten.
    ///
    /// Both images are `[channels, height, width]` with values in `[0, 1]`.
    pub fn write(
        &self,
        index: usize,
        input: ArrayView3<'_, f32>,
        prediction: ArrayView3<'_, f32>,
    ) -> Result<ArtifactPaths> {
        let dir = self.sample_dir(index);
        fs::create_dir_all(&dir).map_err(|err| EditError::io("create directory", &dir, err))?;

        let input = resize_canonical(&tensor_to_rgb(input)?);
        let prediction = resize_canonical(&tensor_to_rgb(prediction)?);
        let concatenated = concat_horizontal(&[&input, &prediction], CONCAT_GAP);

        let paths = ArtifactPaths {
            input: dir.join(INPUT_FILE_NAME),
            pred: dir.join(PRED_FILE_NAME),
            concatenated: dir.join(CONCAT_FILE_NAME),
            dir,
        };
        save(&input, &paths.input)?;
        save(&prediction, &paths.pred)?;
        save(&concatenated, &paths.concatenated)?;

        debug!(index, dir = %paths.dir.display(), "Wrote sample artifacts");
        Ok(paths)
    }
}

fn save(image: &RgbImage, path: &Path) -> Result<()> {
    image.save(path).map_err(|source| EditError::Image {
        path: path.to_path_buf(),
        source,
    })
}

/// Convert a `[C, H, W]` tensor in `[0, 1]` to 8-bit RGB. One-channel tensors
/// are replicated to gray; values are scaled by 255, clamped and truncated.
pub fn tensor_to_rgb(tensor: ArrayView3<'_, f32>) -> Result<RgbImage> {
    let (channels, height, width) = tensor.dim();
    if channels != 1 && channels != 3 {
        return Err(EditError::shape(format!(
            "cannot render a {channels}-channel frame as RGB"
        )));
    }
    let (Ok(w), Ok(h)) = (u32::try_from(width), u32::try_from(height)) else {
        return Err(EditError::shape(format!("frame {width}x{height} is too large")));
    };

    let to_u8 = |value: f32| (value * 255.0).clamp(0.0, 255.0) as u8;
    Ok(RgbImage::from_fn(w, h, |x, y| {
        let (x, y) = (x as usize, y as usize);
        if channels == 1 {
            let v = to_u8(tensor[[0, y, x]]);
            Rgb([v, v, v])
        } else {
            Rgb([
                to_u8(tensor[[0, y, x]]),
                to_u8(tensor[[1, y, x]]),
                to_u8(tensor[[2, y, x]]),
            ])
        }
    }))
}

fn resize_canonical(image: &RgbImage) -> RgbImage {
    if image.dimensions() == (ARTIFACT_SIZE, ARTIFACT_SIZE) {
        return image.clone();
    }
    imageops::resize(image, ARTIFACT_SIZE, ARTIFACT_SIZE, FilterType::CatmullRom)
}

/// Place images left to right at `y = 0` with `gap` white pixels between
/// neighbours. Canvas is `Σ widths + gap * (n - 1)` by `max height`.
pub fn concat_horizontal(images: &[&RgbImage], gap: u32) -> RgbImage {
    let total_width = images.iter().map(|image| image.width()).sum::<u32>()
        + gap * images.len().saturating_sub(1) as u32;
    let max_height = images.iter().map(|image| image.height()).max().unwrap_or(0);

    let mut canvas = RgbImage::from_pixel(total_width, max_height, GAP_COLOR);
    let mut x_offset = 0_i64;
    for image in images {
        imageops::replace(&mut canvas, *image, x_offset, 0);
        x_offset += i64::from(image.width() + gap);
    }
    canvas
}
