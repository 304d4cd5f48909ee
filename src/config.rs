use anyhow::{bail, Context, Result};
use facematch_vision::{face, model, AnalyzerOptions};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEMATCH_CONFIG_PATH").unwrap_or("/usr/local/etc/facematch/config.toml"))
});

pub static MODEL_DIR: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEMATCH_MODEL_DIR").unwrap_or("/usr/local/share/facematch/models"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model_dir: PathBuf,
    pub detector_model: String,
    pub recognizer_model: String,
    /// Detector input edge; smaller values trade recall for speed (480, 320).
    pub det_size: u32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    /// Decision threshold on the unit score. Unset means report the score only.
    pub threshold: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: MODEL_DIR.to_path_buf(),
            detector_model: model::DETECTOR_MODEL_FILE.to_string(),
            recognizer_model: model::RECOGNIZER_MODEL_FILE.to_string(),
            det_size: 640,
            score_threshold: 0.6,
            nms_threshold: 0.3,
            threshold: None,
        }
    }
}

impl Config {
    pub fn detector_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn recognizer_path(&self) -> PathBuf {
        self.model_dir.join(&self.recognizer_model)
    }

    pub fn analyzer_options(&self) -> AnalyzerOptions {
        AnalyzerOptions {
            det_size: self.det_size,
            score_threshold: self.score_threshold,
            nms_threshold: self.nms_threshold,
        }
    }

    pub fn validate(&self) -> Result<()> {
        face::check_det_size(self.det_size)?;
        if !(0.0..=1.0).contains(&self.score_threshold) {
            bail!("score_threshold must be within [0, 1], got {}", self.score_threshold);
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            bail!("nms_threshold must be within [0, 1], got {}", self.nms_threshold);
        }
        if let Some(t) = self.threshold {
            if !(0.0..=1.0).contains(&t) {
                bail!("threshold must be within [0, 1], got {t}");
            }
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
