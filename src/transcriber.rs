use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{env, fs};

use crate::audio;
use crate::model;

/// A time-aligned piece of the transcript, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<Segment>,
    /// Length of the source media, when the backend knows it.
    pub duration: Option<f64>,
}

impl Transcript {
    /// Reported media length, else the end of the last segment.
    pub fn effective_duration(&self) -> Option<f64> {
        self.duration
            .or_else(|| self.segments.last().map(|segment| segment.end))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TranscribeOptions<'a> {
    pub model: &'a str,
    pub language: Option<&'a str>,
    pub prompt: Option<&'a str>,
}

/// Converts one media file into text. Calls are long-running and may fail for
/// any file; callers decide what a failure means for the batch.
pub trait Transcriber {
    fn transcribe(&mut self, path: &Path, opts: &TranscribeOptions<'_>) -> Result<Transcript>;
}

/// whisper.cpp backend. The loaded model is kept between files and swapped
/// only when a call asks for a different one.
pub struct WhisperTranscriber {
    models_dir: PathBuf,
    loaded: Option<(String, whisper_rs::WhisperContext)>,
}

impl WhisperTranscriber {
    pub fn new(models_dir: PathBuf) -> Result<Self> {
        init_whisper_runtime();
        Ok(Self {
            models_dir,
            loaded: None,
        })
    }

    fn context_for(&mut self, model_id: &str) -> Result<&whisper_rs::WhisperContext> {
        let reuse = matches!(&self.loaded, Some((loaded, _)) if loaded == model_id);
        if !reuse {
            self.loaded = None;
            let model_path = model::resolve_model(&self.models_dir, model_id)?;
            let model_path_str = model_path
                .to_str()
                .context("model path not valid utf-8")?;
            let mut ctx_params = whisper_rs::WhisperContextParameters::default();
            ctx_params.use_gpu(true);
            let ctx = whisper_rs::WhisperContext::new_with_params(model_path_str, ctx_params)
                .with_context(|| format!("load whisper model {model_path_str}"))?;
            tracing::info!(model = model_id, path = %model_path.display(), "model loaded");
            self.loaded = Some((model_id.to_string(), ctx));
        }
        self.loaded
            .as_ref()
            .map(|(_, ctx)| ctx)
            .context("model not loaded")
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&mut self, path: &Path, opts: &TranscribeOptions<'_>) -> Result<Transcript> {
        let decoded = audio::decode_to_mono(path)?;
        let duration = decoded.duration_seconds();
        let samples = audio::resample_to_16k(decoded)?;
        if samples.is_empty() {
            anyhow::bail!("no audio samples decoded from {}", path.display());
        }

        let ctx = self.context_for(opts.model)?;
        let mut state = ctx.create_state().context("create whisper state")?;
        let mut params =
            whisper_rs::FullParams::new(whisper_rs::SamplingStrategy::Greedy { best_of: 1 });
        let threads = std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(4);
        params.set_n_threads(threads);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_special(false);
        params.set_print_timestamps(false);
        params.set_language(Some(opts.language.unwrap_or("auto")));
        if let Some(prompt) = opts.prompt {
            params.set_initial_prompt(prompt);
        }
        state
            .full(params, &samples)
            .context("whisper inference")?;

        let num_segments = state.full_n_segments().context("segment count")?;
        let mut segments = Vec::with_capacity(num_segments.max(0) as usize);
        let mut text = String::new();
        for i in 0..num_segments {
            let segment_text = state.full_get_segment_text(i).context("segment text")?;
            // Timestamps come back in centiseconds.
            let t0 = state.full_get_segment_t0(i).context("segment start")?;
            let t1 = state.full_get_segment_t1(i).context("segment end")?;
            text.push_str(&segment_text);
            segments.push(Segment {
                start: t0 as f64 / 100.0,
                end: t1 as f64 / 100.0,
                text: segment_text,
            });
        }

        Ok(Transcript {
            text: text.trim().to_string(),
            segments,
            duration: Some(duration),
        })
    }
}

static WHISPER_RUNTIME_INIT: Once = Once::new();
static GPU_LOGGED: AtomicBool = AtomicBool::new(false);
static GPU_ERROR_LOGGED: AtomicBool = AtomicBool::new(false);

fn init_whisper_runtime() {
    WHISPER_RUNTIME_INIT.call_once(|| {
        ensure_metal_resources();
        unsafe {
            whisper_rs::set_log_callback(Some(whisper_log_filtered), std::ptr::null_mut());
        }
    });
}

unsafe extern "C" fn whisper_log_filtered(
    _level: whisper_rs::whisper_rs_sys::ggml_log_level,
    text: *const c_char,
    _user_data: *mut c_void,
) {
    if text.is_null() {
        return;
    }
    let line = unsafe { CStr::from_ptr(text) }.to_string_lossy();
    let msg = line.trim();

    if let Some(name) = msg.strip_prefix("ggml_metal_init: GPU name:") {
        if GPU_LOGGED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::info!(gpu = name.trim(), "GPU enabled (Metal)");
        }
        return;
    }

    if msg.contains("ggml_metal_init: error:") {
        if GPU_ERROR_LOGGED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::warn!(error = msg, "Metal initialization error");
        }
        return;
    }

    if !msg.is_empty() {
        tracing::trace!(target: "whisper", "{msg}");
    }
}

fn ensure_metal_resources() {
    if !cfg!(target_os = "macos") || env::var("GGML_METAL_PATH_RESOURCES").is_ok() {
        return;
    }

    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let candidates = [
        cwd.join("target/debug/build"),
        cwd.join("target/release/build"),
    ];
    for base in candidates {
        let Ok(entries) = fs::read_dir(&base) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path().join("out/whisper.cpp/ggml-metal.metal");
            if let Some(dir) = path.exists().then(|| path.parent()).flatten() {
                unsafe {
                    env::set_var("GGML_METAL_PATH_RESOURCES", dir);
                }
                tracing::debug!(path = %dir.display(), "using metal resources from build output");
                return;
            }
        }
    }

    tracing::debug!("metal resources not found; set GGML_METAL_PATH_RESOURCES if GPU init fails");
}
