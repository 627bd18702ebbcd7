use anyhow::{Context, Result};
use directories::{BaseDirs, ProjectDirs};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::DEFAULT_MODEL;
use crate::output::OutputFormat;

/// User defaults; every command-line flag overrides its field here.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub model: String,
    pub format: OutputFormat,
    pub language: Option<String>,
    pub models_dir: Option<PathBuf>,
    pub reclaim_after_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            format: OutputFormat::Txt,
            language: None,
            models_dir: None,
            reclaim_after_secs: None,
        }
    }
}

impl Config {
    pub fn models_dir(&self) -> Result<PathBuf> {
        match &self.models_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_models_dir(),
        }
    }

    pub fn reclaim_after(&self) -> Option<Duration> {
        self.reclaim_after_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new() -> Result<Self> {
        let base = BaseDirs::new().context("unable to resolve home directory")?;
        let path = base.home_dir().join(".config").join("batchscribe.yaml");
        Ok(Self::at(path))
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Result<Config> {
        if !self.path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read config {}", self.path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("parse config {}", self.path.display()))?;
        Ok(config)
    }
}

pub fn default_models_dir() -> Result<PathBuf> {
    let proj = ProjectDirs::from("com", "batchscribe", "batchscribe")
        .context("resolve data dir")?;
    Ok(proj.data_dir().join("models"))
}
