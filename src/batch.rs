//! Resumable batch execution over the job store.
//!
//! A run registers every scanned file, selects the ones that still need work
//! and drives each through `processing` to `completed` or `failed`, one at a
//! time. Transcription and output errors end up on the row; only store errors
//! abort the batch.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::output::{self, OutputFormat};
use crate::scanner;
use crate::store::{JobStatus, JobStore};
use crate::transcriber::{TranscribeOptions, Transcriber};
use crate::vocabulary::Vocabulary;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub model: String,
    pub language: Option<String>,
    pub format: OutputFormat,
    /// Re-run files that are already completed.
    pub overwrite: bool,
    /// Take over `processing` rows only once their lease is this old.
    /// `None` reprocesses any row left at `processing`.
    pub reclaim_after: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct RetryOptions {
    /// Overrides the model recorded on each row.
    pub model: Option<String>,
    pub language: Option<String>,
    pub reclaim_after: Option<Duration>,
}

/// Counts for one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub discovered: usize,
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchReport {
    pub fn nothing_to_do(&self) -> bool {
        self.attempted == 0 && self.skipped == 0
    }
}

/// One file scheduled for (re)processing.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub model: String,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed {
        duration_seconds: Option<f64>,
        processing_seconds: f64,
    },
    Failed(String),
    /// Another holder's lease on the row is still live.
    Skipped,
}

/// Whether a file with the given recorded status gets processed this run.
/// Rows stuck at `processing` count as unfinished.
pub fn is_eligible(status: Option<JobStatus>, overwrite: bool) -> bool {
    overwrite || status != Some(JobStatus::Completed)
}

pub struct BatchRunner<'a> {
    store: &'a JobStore,
    transcriber: &'a mut dyn Transcriber,
    vocabulary: Option<&'a Vocabulary>,
    progress: ProgressBar,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        store: &'a JobStore,
        transcriber: &'a mut dyn Transcriber,
        vocabulary: Option<&'a Vocabulary>,
    ) -> Self {
        Self {
            store,
            transcriber,
            vocabulary,
            progress: ProgressBar::hidden(),
        }
    }

    /// Shows a progress bar on the terminal while the batch runs.
    pub fn with_progress(mut self) -> Self {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:30} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        self.progress = pb;
        self
    }

    /// Registers every scanned file and returns the ones that need work, in
    /// scan order.
    pub fn reconcile(
        &self,
        files: &[PathBuf],
        input_root: &Path,
        output_root: &Path,
        opts: &RunOptions,
    ) -> Result<Vec<WorkItem>> {
        let mut items = Vec::new();
        for input in files {
            let output_path = scanner::output_path_for(input, input_root, output_root, opts.format)?;
            self.store.register(input, &output_path, &opts.model)?;
            let status = self.store.status_of(input)?;
            if is_eligible(status, opts.overwrite) {
                items.push(WorkItem {
                    input_path: input.clone(),
                    output_path,
                    model: opts.model.clone(),
                    format: opts.format,
                });
            }
        }
        Ok(items)
    }

    pub fn run(
        &mut self,
        files: &[PathBuf],
        input_root: &Path,
        output_root: &Path,
        opts: &RunOptions,
    ) -> Result<BatchReport> {
        let items = self.reconcile(files, input_root, output_root, opts)?;
        if items.is_empty() {
            tracing::info!(files = files.len(), "nothing to do; all files already transcribed");
            return Ok(BatchReport {
                discovered: files.len(),
                ..Default::default()
            });
        }
        tracing::info!(
            eligible = items.len(),
            files = files.len(),
            model = %opts.model,
            "starting batch"
        );
        let mut report = self.process_all(&items, opts.language.as_deref(), opts.reclaim_after)?;
        report.discovered = files.len();
        Ok(report)
    }

    /// Resets failed rows to pending and reprocesses exactly those rows.
    pub fn retry(&mut self, opts: &RetryOptions) -> Result<BatchReport> {
        let failed = self.store.failed_rows()?;
        let reset = self.store.reset_failed()?;
        if reset == 0 {
            tracing::info!("no failed files to retry");
            return Ok(BatchReport::default());
        }
        tracing::info!(count = reset, "retrying failed files");

        let items: Vec<WorkItem> = failed
            .into_iter()
            .map(|job| WorkItem {
                format: OutputFormat::from_path(&job.output_path),
                model: opts.model.clone().unwrap_or(job.model),
                input_path: job.input_path,
                output_path: job.output_path,
            })
            .collect();
        let mut report = self.process_all(&items, opts.language.as_deref(), opts.reclaim_after)?;
        report.discovered = reset;
        Ok(report)
    }

    pub fn process_all(
        &mut self,
        items: &[WorkItem],
        language: Option<&str>,
        reclaim_after: Option<Duration>,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        self.progress.set_length(items.len() as u64);
        self.progress.set_position(0);
        for item in items {
            self.progress.set_message(display_name(&item.input_path));
            match self.process(item, language, reclaim_after)? {
                Outcome::Completed { .. } => {
                    report.attempted += 1;
                    report.completed += 1;
                }
                Outcome::Failed(_) => {
                    report.attempted += 1;
                    report.failed += 1;
                }
                Outcome::Skipped => report.skipped += 1,
            }
            self.progress.inc(1);
        }
        self.progress.finish_and_clear();
        tracing::info!(
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped,
            "batch finished"
        );
        Ok(report)
    }

    /// Drives one file through the state machine. Only store errors are
    /// returned as `Err`.
    pub fn process(
        &mut self,
        item: &WorkItem,
        language: Option<&str>,
        reclaim_after: Option<Duration>,
    ) -> Result<Outcome> {
        let input = item.input_path.as_path();
        match reclaim_after {
            Some(lease) => {
                if !self.store.try_claim(input, lease)? {
                    tracing::warn!(input = %input.display(), "row is held by a live lease; skipping");
                    return Ok(Outcome::Skipped);
                }
            }
            None => self.store.mark_processing(input)?,
        }
        tracing::debug!(input = %input.display(), model = %item.model, "processing");

        match self.transcribe_and_write(item, language) {
            Ok((duration_seconds, processing_seconds)) => {
                self.store
                    .mark_completed(input, duration_seconds, Some(processing_seconds))?;
                tracing::info!(
                    input = %input.display(),
                    output = %item.output_path.display(),
                    duration = duration_seconds,
                    processing = processing_seconds,
                    "transcribed"
                );
                Ok(Outcome::Completed {
                    duration_seconds,
                    processing_seconds,
                })
            }
            Err(err) => {
                let message = format!("{err:#}");
                self.store.mark_failed(input, &message)?;
                tracing::warn!(input = %input.display(), error = %message, "transcription failed");
                Ok(Outcome::Failed(message))
            }
        }
    }

    fn transcribe_and_write(&mut self, item: &WorkItem, language: Option<&str>) -> Result<(Option<f64>, f64)> {
        let prompt = self.vocabulary.and_then(Vocabulary::prompt);
        let opts = TranscribeOptions {
            model: &item.model,
            language,
            prompt: prompt.as_deref(),
        };
        let started = Instant::now();
        let mut transcript = self.transcriber.transcribe(&item.input_path, &opts)?;
        let elapsed = started.elapsed().as_secs_f64();

        if let Some(vocab) = self.vocabulary {
            vocab.apply_to(&mut transcript);
        }
        output::write_transcript(&transcript, &item.output_path, item.format)?;
        Ok((transcript.effective_duration(), elapsed))
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
