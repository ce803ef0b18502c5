//! Bundle comparison images into a single zip for sharing.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use tracing::info;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::artifacts::CONCAT_FILE_NAME;
use crate::error::{EditError, Result};

pub const DEFAULT_ARCHIVE_PATH: &str = "lgie.zip";
pub const DEFAULT_ARCHIVE_LIMIT: usize = 25;

/// Every `<results>/*/concatenated_image.jpg`, sorted by path string.
///
/// Ordering is lexicographic on the path, not numeric on the sample index, so
/// it only matches iteration order while indices fit the zero padding.
pub fn collect_concatenated(results_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(results_dir)
        .map_err(|err| EditError::io("read directory", results_dir, err))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| EditError::io("read directory", results_dir, err))?;
        let candidate = entry.path().join(CONCAT_FILE_NAME);
        if candidate.is_file() {
            paths.push(candidate);
        }
    }
    paths.sort_by(|a, b| a.to_string_lossy().cmp(&b.to_string_lossy()));
    Ok(paths)
}

/// Zip the first `limit` comparison images under `results_dir` into `output`.
///
/// Entry names are `<results dir name>/<sample>/concatenated_image.jpg`.
/// Returns the archived source paths in archive order.
pub fn archive_concatenated(results_dir: &Path, output: &Path, limit: usize) -> Result<Vec<PathBuf>> {
    let mut selected = collect_concatenated(results_dir)?;
    selected.truncate(limit);

    let file = File::create(output).map_err(|err| EditError::io("create", output, err))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let archive_err = |source: zip::result::ZipError| EditError::Archive {
        path: output.to_path_buf(),
        source,
    };

    let prefix = results_dir
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_default();
    for path in &selected {
        let relative = path.strip_prefix(results_dir).unwrap_or(path);
        let entry_name = prefix.join(relative).to_string_lossy().replace('\\', "/");

        zip.start_file(entry_name, SimpleFileOptions::default())
            .map_err(archive_err)?;
        let mut source = File::open(path).map_err(|err| EditError::io("open", path, err))?;
        io::copy(&mut source, &mut zip).map_err(|err| EditError::io("archive", path, err))?;
    }
    zip.finish().map_err(archive_err)?;

    info!(
        output = %output.display(),
        files = selected.len(),
        "Wrote comparison archive"
    );
    Ok(selected)
}
