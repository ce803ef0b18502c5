//! `config.toml` under the data directory and how that directory is found.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::archive::{DEFAULT_ARCHIVE_LIMIT, DEFAULT_ARCHIVE_PATH};
use crate::backend::ExecutionDevice;
use crate::error::EditError;
use crate::types::SamplingMode;

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_DATA_DIR: &str = "T2O_DATA_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub policy: PolicyConfig,
    pub vocab: VocabConfig,
    pub data: DataConfig,
    pub variance: VarianceConfig,
    pub archive: ArchiveConfig,
    pub run: RunConfig,
}

/// Relative paths are resolved against the data directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub model_path: PathBuf,
    pub trt_cache_dir: PathBuf,
    pub vocab_dir: PathBuf,
    pub manifest: PathBuf,
    pub results_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    pub device: ExecutionDevice,
    pub end_id: i64,
    pub encoder_max_len: usize,
    pub sampling: SamplingMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VocabConfig {
    pub dataset: String,
    pub session: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DataConfig {
    pub image_size: u32,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VarianceConfig {
    pub prompts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArchiveConfig {
    pub output: PathBuf,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    pub print_every: usize,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/t2onet.onnx"),
            trt_cache_dir: PathBuf::from("trt_cache"),
            vocab_dir: PathBuf::from("vocab"),
            manifest: PathBuf::from("manifest.json"),
            results_dir: PathBuf::from("results"),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            device: ExecutionDevice::default(),
            end_id: 2,
            encoder_max_len: 15,
            sampling: SamplingMode::default(),
        }
    }
}

impl Default for VocabConfig {
    fn default() -> Self {
        Self {
            dataset: "FiveK".to_string(),
            session: 1,
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            image_size: 256,
            batch_size: 1,
        }
    }
}

impl Default for VarianceConfig {
    fn default() -> Self {
        Self {
            prompts: [
                "increase the brightness",
                "make the image brighter",
                "brighten the photo a bit",
                "add more light to the picture",
                "lighten up this image",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from(DEFAULT_ARCHIVE_PATH),
            limit: DEFAULT_ARCHIVE_LIMIT,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { print_every: 100 }
    }
}

impl AppConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config TOML: {}", path.display()))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .context("config path does not have a parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;

        let encoded = toml::to_string_pretty(self).context("failed to serialize config TOML")?;
        fs::write(path, encoded)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Reject values that would make a run fail midway.
    pub fn validate(&self) -> Result<(), EditError> {
        let checks = [
            (self.data.batch_size == 0, "data.batch_size must be at least 1"),
            (self.data.image_size == 0, "data.image_size must be positive"),
            (
                self.policy.encoder_max_len == 0,
                "policy.encoder_max_len must be positive",
            ),
            (self.run.print_every == 0, "run.print_every must be at least 1"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(EditError::config(*message)),
            None => Ok(()),
        }
    }
}

/// Resolve the data directory with 3-tier priority:
/// 1. CLI override if provided
/// 2. T2O_DATA_DIR environment variable
/// 3. Default: ./data
pub fn data_dir(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }

    if let Some(env_dir) = env::var_os(ENV_DATA_DIR) {
        return PathBuf::from(env_dir);
    }

    PathBuf::from("data")
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Create the data directory and write a default config.toml unless one
/// already exists.
pub fn initialize_data_dir(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    }

    let cfg_path = config_path(data_dir);
    if !cfg_path.exists() {
        AppConfig::default().save_to_path(&cfg_path)?;
    }

    Ok(())
}

/// Returns the path as-is if absolute, otherwise joins it to base.
pub fn resolve_relative_to(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.paths.results_dir, PathBuf::from("results"));
        assert_eq!(cfg.paths.vocab_dir, PathBuf::from("vocab"));
        assert_eq!(cfg.policy.device, ExecutionDevice::Cuda);
        assert_eq!(cfg.policy.sampling, SamplingMode::Greedy);
        assert_eq!(cfg.vocab.dataset, "FiveK");
        assert_eq!(cfg.data.batch_size, 1);
        assert!(cfg.variance.prompts.len() >= 2);
        assert_eq!(cfg.archive.output, PathBuf::from("lgie.zip"));
        assert_eq!(cfg.archive.limit, 25);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn toml_roundtrip_preserves_values() {
        let original = AppConfig::default();
        let encoded = toml::to_string_pretty(&original).expect("serialize config");
        let decoded: AppConfig = toml::from_str(&encoded).expect("deserialize config");
        assert_eq!(decoded, original);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "[policy]\ndevice = \"tensorrt\"\nend_id = 9\n\n[data]\nbatch_size = 4\n",
        )
        .expect("write config");

        let cfg = AppConfig::load_from_path(&path).expect("load config");
        assert_eq!(cfg.policy.device, ExecutionDevice::Tensorrt);
        assert_eq!(cfg.policy.end_id, 9);
        assert_eq!(cfg.policy.encoder_max_len, 15);
        assert_eq!(cfg.data.batch_size, 4);
        assert_eq!(cfg.data.image_size, 256);
        assert_eq!(cfg.run, RunConfig::default());
    }

    #[test]
    fn malformed_toml_is_reported_with_path() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[data\nbatch_size = 4\n").expect("write config");

        let err = AppConfig::load_from_path(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config TOML"));
    }

    #[test]
    fn load_from_nonexistent_file_returns_defaults() {
        let temp = tempdir().expect("tempdir");
        let loaded = AppConfig::load_from_path(&temp.path().join("missing.toml"))
            .expect("load config from nonexistent path");
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn validate_rejects_zero_batch_and_print_every() {
        let mut cfg = AppConfig::default();
        cfg.data.batch_size = 0;
        assert!(cfg.validate().unwrap_err().is_configuration());

        let mut cfg = AppConfig::default();
        cfg.run.print_every = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("print_every"));
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let result = data_dir(Some(Path::new("/custom")));
        assert_eq!(result, PathBuf::from("/custom"));
    }

    #[test]
    fn data_dir_env_then_default() {
        let old = env::var_os(ENV_DATA_DIR);

        env::set_var(ENV_DATA_DIR, "/env/path");
        let from_env = data_dir(None);
        env::remove_var(ENV_DATA_DIR);
        let fallback = data_dir(None);

        if let Some(val) = old {
            env::set_var(ENV_DATA_DIR, val);
        }
        assert_eq!(from_env, PathBuf::from("/env/path"));
        assert_eq!(fallback, PathBuf::from("data"));
    }

    #[test]
    fn config_path_is_data_dir_join_config_toml() {
        let result = config_path(Path::new("/data"));
        assert_eq!(result, PathBuf::from("/data/config.toml"));
    }

    #[test]
    fn initialize_creates_data_dir_and_config() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("data");
        initialize_data_dir(&root).expect("initialize data dir");

        assert!(root.join("config.toml").exists());
        let cfg = AppConfig::load_from_path(&config_path(&root)).expect("reload");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn initialize_preserves_existing_config() {
        let temp = tempdir().expect("tempdir");
        let cfg_path = temp.path().join("config.toml");
        let custom_content = "[run]\nprint_every = 5\n";
        fs::write(&cfg_path, custom_content).expect("write custom config");

        initialize_data_dir(temp.path()).expect("initialize data dir");

        let content = fs::read_to_string(&cfg_path).expect("read config");
        assert_eq!(content, custom_content);
    }

    #[test]
    fn resolve_relative_to_keeps_absolute_and_joins_relative() {
        assert_eq!(
            resolve_relative_to(Path::new("/base"), Path::new("/abs/path")),
            PathBuf::from("/abs/path")
        );
        assert_eq!(
            resolve_relative_to(Path::new("/base"), Path::new("sub")),
            PathBuf::from("/base/sub")
        );
    }
}
