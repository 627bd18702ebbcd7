use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::batch::{BatchReport, BatchRunner, RetryOptions, RunOptions};
use crate::cli::{Cli, Commands, ListArgs, RetryArgs, RunArgs, SingleArgs, StatusArgs};
use crate::config::{Config, ConfigStore};
use crate::logging;
use crate::model;
use crate::output::{self, OutputFormat};
use crate::scanner;
use crate::storage;
use crate::store::{Job, JobStore, SortKey, Summary};
use crate::transcriber::{TranscribeOptions, Transcriber, WhisperTranscriber};
use crate::vocabulary::Vocabulary;

pub fn run() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let config = ConfigStore::new()?.load()?;
    match cli.command {
        Commands::Run(args) => run_batch(args, &config),
        Commands::Single(args) => run_single(args, &config),
        Commands::Status(args) => show_status(args),
        Commands::Retry(args) => run_retry(args, &config),
        Commands::List(args) => list_files(args),
        Commands::Models => list_models(),
    }
}

fn run_batch(args: RunArgs, config: &Config) -> Result<()> {
    if !args.input_dir.is_dir() {
        anyhow::bail!("input directory not found: {}", args.input_dir.display());
    }
    let input_root = storage::resolve_dir(&args.input_dir)?;
    storage::ensure_dir(&args.output_dir)?;
    let output_root = storage::resolve_dir(&args.output_dir)?;

    let vocabulary = Vocabulary::load(args.engine.vocab.as_deref(), Some(&output_root))?;
    let files = scanner::scan_directory(&input_root)?;
    if files.is_empty() {
        println!("No supported audio/video files found.");
        return Ok(());
    }

    let opts = RunOptions {
        model: args.engine.model.unwrap_or_else(|| config.model.clone()),
        language: args.engine.language.or_else(|| config.language.clone()),
        format: args.format.unwrap_or(config.format),
        overwrite: args.overwrite,
        reclaim_after: args
            .reclaim_after
            .map(std::time::Duration::from_secs)
            .or_else(|| config.reclaim_after()),
    };
    tracing::info!(
        input = %input_root.display(),
        output = %output_root.display(),
        files = files.len(),
        "batch run"
    );

    let store = JobStore::open(&output_root)?;
    let mut transcriber = WhisperTranscriber::new(config.models_dir()?)?;
    let report = BatchRunner::new(&store, &mut transcriber, vocabulary.as_ref())
        .with_progress()
        .run(&files, &input_root, &output_root, &opts)?;
    store.close()?;

    if report.nothing_to_do() {
        println!("All files already transcribed.");
    } else {
        print_report("Done", &report);
    }
    Ok(())
}

fn run_retry(args: RetryArgs, config: &Config) -> Result<()> {
    let Some((output_root, store)) = open_existing_store(&args.output_dir)? else {
        println!("No failed files to retry.");
        return Ok(());
    };
    let vocabulary = Vocabulary::load(args.engine.vocab.as_deref(), Some(&output_root))?;
    let opts = RetryOptions {
        model: args.engine.model,
        language: args.engine.language,
        reclaim_after: args
            .reclaim_after
            .map(std::time::Duration::from_secs)
            .or_else(|| config.reclaim_after()),
    };

    let mut transcriber = WhisperTranscriber::new(config.models_dir()?)?;
    let report = BatchRunner::new(&store, &mut transcriber, vocabulary.as_ref())
        .with_progress()
        .retry(&opts)?;
    store.close()?;

    if report.nothing_to_do() {
        println!("No failed files to retry.");
    } else {
        print_report("Retry complete", &report);
    }
    Ok(())
}

fn run_single(args: SingleArgs, config: &Config) -> Result<()> {
    if !args.file.is_file() {
        anyhow::bail!("file not found: {}", args.file.display());
    }
    let file = fs::canonicalize(&args.file)
        .with_context(|| format!("resolve {}", args.file.display()))?;
    let vocabulary = Vocabulary::load(args.engine.vocab.as_deref(), None)?;
    let prompt = vocabulary.as_ref().and_then(Vocabulary::prompt);
    let model_id = args.engine.model.unwrap_or_else(|| config.model.clone());
    let language = args.engine.language.or_else(|| config.language.clone());
    let format = args.format.unwrap_or(config.format);

    eprintln!("Transcribing {} with model {model_id}...", display_name(&file));
    let mut transcriber = WhisperTranscriber::new(config.models_dir()?)?;
    let started = Instant::now();
    let mut transcript = transcriber.transcribe(
        &file,
        &TranscribeOptions {
            model: &model_id,
            language: language.as_deref(),
            prompt: prompt.as_deref(),
        },
    )?;
    let elapsed = started.elapsed().as_secs_f64();
    if let Some(vocab) = &vocabulary {
        vocab.apply_to(&mut transcript);
    }

    match &args.output {
        Some(path) => {
            output::write_transcript(&transcript, path, format)?;
            eprintln!("Written to {}", path.display());
        }
        None if format == OutputFormat::Json => {
            print!("{}", output::render_json(&transcript, &display_name(&file))?);
        }
        None => print!("{}", output::render_text(&transcript)),
    }

    match transcript.duration.filter(|d| *d > 0.0) {
        Some(duration) => eprintln!(
            "Duration: {duration:.1}s | Processing: {elapsed:.1}s | RTF: {:.2}x",
            elapsed / duration
        ),
        None => eprintln!("Processing: {elapsed:.1}s"),
    }
    Ok(())
}

fn show_status(args: StatusArgs) -> Result<()> {
    let Some((_, store)) = open_existing_store(&args.output_dir)? else {
        println!("No files tracked yet.");
        return Ok(());
    };
    let summary = store.summary()?;
    if summary.total == 0 {
        println!("No files tracked yet.");
        return store.close().map_err(Into::into);
    }
    print!("{}", render_summary(&summary));

    let failed = store.failed_rows()?;
    if !failed.is_empty() {
        println!();
        println!("Failed files:");
        for job in &failed {
            println!(
                "  {}: {}",
                job.input_path.display(),
                job.error.as_deref().unwrap_or("")
            );
        }
    }
    store.close()?;
    Ok(())
}

fn list_files(args: ListArgs) -> Result<()> {
    let Some((_, store)) = open_existing_store(&args.output_dir)? else {
        println!("No files found.");
        return Ok(());
    };
    let rows = store.all_rows(args.status, SortKey::parse_lenient(&args.sort))?;
    store.close()?;
    if rows.is_empty() {
        println!("No files found.");
        return Ok(());
    }
    print!("{}", render_rows(&rows));
    Ok(())
}

fn list_models() -> Result<()> {
    for info in model::available_models() {
        println!(
            "{:<10} {:>8}  {:<12} {}",
            info.name,
            model::format_size(info.size_bytes),
            info.languages.label(),
            info.description
        );
    }
    Ok(())
}

/// Opens the store of an output directory that already has one. Read-only
/// views must not create state in a directory that was never used.
fn open_existing_store(output_dir: &Path) -> Result<Option<(PathBuf, JobStore)>> {
    if !storage::jobs_db_path(output_dir).is_file() {
        return Ok(None);
    }
    let output_root = storage::resolve_dir(output_dir)?;
    let store = JobStore::open(&output_root)
        .with_context(|| format!("open job store in {}", output_root.display()))?;
    Ok(Some((output_root, store)))
}

fn print_report(label: &str, report: &BatchReport) {
    let mut line = format!(
        "{label}: {} completed, {} failed",
        report.completed, report.failed
    );
    if report.skipped > 0 {
        line.push_str(&format!(", {} skipped (held by another run)", report.skipped));
    }
    println!("{line}");
}

fn render_summary(summary: &Summary) -> String {
    let mut rows = vec![
        ("Total files", summary.total.to_string()),
        ("Completed", summary.completed.to_string()),
        ("Pending", summary.pending.to_string()),
        ("Processing", summary.processing.to_string()),
        ("Failed", summary.failed.to_string()),
    ];
    if summary.total_duration > 0.0 {
        rows.push(("Total audio duration", format!("{:.1}s", summary.total_duration)));
    }
    if summary.total_processing > 0.0 {
        rows.push(("Total processing time", format!("{:.1}s", summary.total_processing)));
    }
    if let Some(rtf) = summary.average_rtf() {
        rows.push(("Average RTF", format!("{rtf:.2}x")));
    }
    rows.into_iter()
        .map(|(metric, value)| format!("{metric:<24}{value:>12}\n"))
        .collect()
}

fn render_rows(rows: &[Job]) -> String {
    let names: Vec<String> = rows.iter().map(Job::file_name).collect();
    let width = names.iter().map(|n| n.chars().count()).max().unwrap_or(0).max(4);
    let mut out = format!(
        "{:<width$}  {:<10}  {:>10}  {:>10}\n",
        "File", "Status", "Duration", "Processing"
    );
    for (job, name) in rows.iter().zip(&names) {
        out.push_str(&format!(
            "{:<width$}  {:<10}  {:>10}  {:>10}\n",
            name,
            job.status.as_str(),
            format_seconds(job.duration_seconds),
            format_seconds(job.processing_seconds)
        ));
    }
    out
}

fn format_seconds(value: Option<f64>) -> String {
    match value {
        Some(secs) if secs > 0.0 => format!("{secs:.1}s"),
        _ => "-".to_string(),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
