use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "turbo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageSupport {
    English,
    Multilingual,
}

impl LanguageSupport {
    pub fn label(self) -> &'static str {
        match self {
            LanguageSupport::English => "english",
            LanguageSupport::Multilingual => "multilingual",
        }
    }
}

/// A downloadable whisper.cpp ggml model.
#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    pub name: &'static str,
    pub filename: &'static str,
    pub size_bytes: u64,
    pub description: &'static str,
    pub languages: LanguageSupport,
}

impl ModelInfo {
    pub fn url(&self) -> String {
        format!(
            "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/{}",
            self.filename
        )
    }
}

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * 1024 * 1024;

const MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "turbo",
        filename: "ggml-large-v3-turbo.bin",
        size_bytes: (3 * GIB) / 2,
        description: "Fast large-v3 turbo; strong speed/quality balance.",
        languages: LanguageSupport::Multilingual,
    },
    ModelInfo {
        name: "tiny",
        filename: "ggml-tiny.bin",
        size_bytes: 75 * MIB,
        description: "Smallest and fastest; lowest accuracy.",
        languages: LanguageSupport::Multilingual,
    },
    ModelInfo {
        name: "tiny.en",
        filename: "ggml-tiny.en.bin",
        size_bytes: 75 * MIB,
        description: "English-only tiny; slightly better on English speech.",
        languages: LanguageSupport::English,
    },
    ModelInfo {
        name: "base",
        filename: "ggml-base.bin",
        size_bytes: 142 * MIB,
        description: "Compact model with better accuracy than tiny.",
        languages: LanguageSupport::Multilingual,
    },
    ModelInfo {
        name: "small",
        filename: "ggml-small.bin",
        size_bytes: 466 * MIB,
        description: "Good accuracy; moderate CPU/RAM usage.",
        languages: LanguageSupport::Multilingual,
    },
    ModelInfo {
        name: "medium",
        filename: "ggml-medium.bin",
        size_bytes: (3 * GIB) / 2,
        description: "High accuracy; slower on CPU.",
        languages: LanguageSupport::Multilingual,
    },
    ModelInfo {
        name: "large",
        filename: "ggml-large-v3.bin",
        size_bytes: (29 * GIB) / 10,
        description: "Best accuracy; largest and slowest.",
        languages: LanguageSupport::Multilingual,
    },
];

pub fn available_models() -> &'static [ModelInfo] {
    MODELS
}

pub fn model_info(name: &str) -> Result<&'static ModelInfo> {
    MODELS.iter().find(|info| info.name == name).ok_or_else(|| {
        let available = MODELS
            .iter()
            .map(|info| info.name)
            .collect::<Vec<_>>()
            .join(", ");
        anyhow::anyhow!("unknown model '{name}'. Try: {available} or a path to a ggml file")
    })
}

/// Maps a model identifier to a file on disk. Identifiers are either a path
/// to an existing model file or a registry name, downloaded on first use.
pub fn resolve_model(models_dir: &Path, id: &str) -> Result<PathBuf> {
    let as_path = Path::new(id);
    if as_path.is_file() {
        return Ok(as_path.to_path_buf());
    }
    ensure_model(models_dir, id)
}

pub fn ensure_model(models_dir: &Path, name: &str) -> Result<PathBuf> {
    let info = model_info(name)?;
    fs::create_dir_all(models_dir)
        .with_context(|| format!("create models dir {}", models_dir.display()))?;
    let target = models_dir.join(info.filename);
    if target.exists() {
        tracing::debug!(path = %target.display(), model = %info.name, "model already present");
        return Ok(target);
    }
    let url = info.url();
    tracing::info!(path = %target.display(), url = %url, model = %info.name, "downloading model");
    download_model(info, &url, &target)?;
    tracing::info!(path = %target.display(), model = %info.name, "model download complete");
    Ok(target)
}

fn download_model(info: &ModelInfo, url: &str, target: &Path) -> Result<()> {
    let tmp = target.with_extension("partial");
    if tmp.exists() {
        fs::remove_file(&tmp)
            .with_context(|| format!("remove partial model {}", tmp.display()))?;
    }
    let mut resp = reqwest::blocking::get(url)
        .and_then(|resp| resp.error_for_status())
        .with_context(|| format!("download model {url}"))?;
    let total = resp.content_length().unwrap_or(0);
    let pb = if total > 0 {
        ProgressBar::new(total)
    } else {
        ProgressBar::new_spinner()
    };
    pb.set_style(
        ProgressStyle::with_template("{spinner} {msg} {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(info.name);
    let mut file =
        File::create(&tmp).with_context(|| format!("create model file {}", tmp.display()))?;
    let mut buf = [0u8; 8192];
    loop {
        let read = resp.read(&mut buf).context("read model download")?;
        if read == 0 {
            break;
        }
        file.write_all(&buf[..read])
            .with_context(|| format!("write model file {}", tmp.display()))?;
        pb.inc(read as u64);
    }
    file.flush()?;
    fs::rename(&tmp, target)
        .with_context(|| format!("finalize model {}", target.display()))?;
    pb.finish_with_message(format!("downloaded {}", info.name));
    Ok(())
}

pub fn format_size(bytes: u64) -> String {
    let bytes_f = bytes as f64;
    let gib = GIB as f64;
    let mib = MIB as f64;
    if bytes_f >= gib {
        let value = bytes_f / gib;
        if value >= 10.0 {
            format!("{value:.0} GB")
        } else {
            format!("{value:.1} GB")
        }
    } else {
        let value = bytes_f / mib;
        format!("{value:.0} MB")
    }
}
