use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::storage;
use crate::transcriber::{Segment, Transcript};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Txt,
    Json,
    Both,
}

impl OutputFormat {
    /// Extension of the path recorded for a job.
    pub fn primary_extension(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Txt | OutputFormat::Both => "txt",
        }
    }

    /// Recovers the format from a recorded output path; anything but `.json` is text.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => OutputFormat::Json,
            _ => OutputFormat::Txt,
        }
    }

    fn writes_text(self) -> bool {
        matches!(self, OutputFormat::Txt | OutputFormat::Both)
    }

    fn writes_json(self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Both)
    }
}

#[derive(Debug, Serialize)]
struct JsonTranscript<'a> {
    file: &'a str,
    text: &'a str,
    segments: &'a [Segment],
}

pub fn render_text(transcript: &Transcript) -> String {
    format!("{}\n", transcript.text.trim())
}

pub fn render_json(transcript: &Transcript, file: &str) -> Result<String> {
    let doc = JsonTranscript {
        file,
        text: &transcript.text,
        segments: &transcript.segments,
    };
    let mut out = serde_json::to_string_pretty(&doc).context("serialize transcript")?;
    out.push('\n');
    Ok(out)
}

/// Writes the transcript next to `output_path`, overwriting earlier output.
pub fn write_transcript(transcript: &Transcript, output_path: &Path, format: OutputFormat) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        storage::ensure_dir(parent)?;
    }
    if format.writes_text() {
        let path = output_path.with_extension("txt");
        fs::write(&path, render_text(transcript))
            .with_context(|| format!("write transcript {}", path.display()))?;
    }
    if format.writes_json() {
        let path = output_path.with_extension("json");
        let stem = output_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        fs::write(&path, render_json(transcript, &stem)?)
            .with_context(|| format!("write transcript {}", path.display()))?;
    }
    Ok(())
}
