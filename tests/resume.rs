use anyhow::Result;
use batchscribe::batch::{BatchRunner, RetryOptions, RunOptions};
use batchscribe::output::OutputFormat;
use batchscribe::scanner;
use batchscribe::storage;
use batchscribe::store::{JobStatus, JobStore, SortKey};
use batchscribe::transcriber::{Segment, TranscribeOptions, Transcriber, Transcript};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

/// Succeeds unless the file name contains `fail_marker`.
struct ScriptedTranscriber {
    fail_marker: Option<&'static str>,
    seen: Vec<PathBuf>,
}

impl ScriptedTranscriber {
    fn new(fail_marker: Option<&'static str>) -> Self {
        Self {
            fail_marker,
            seen: Vec::new(),
        }
    }
}

impl Transcriber for ScriptedTranscriber {
    fn transcribe(&mut self, path: &Path, _opts: &TranscribeOptions<'_>) -> Result<Transcript> {
        self.seen.push(path.to_path_buf());
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        if let Some(marker) = self.fail_marker {
            if name.contains(marker) {
                anyhow::bail!("backend rejected {name}");
            }
        }
        Ok(Transcript {
            text: format!("words from {name}"),
            segments: vec![Segment {
                start: 0.0,
                end: 3.0,
                text: format!("words from {name}"),
            }],
            duration: Some(42.0),
        })
    }
}

fn media_tree(root: &Path) -> Result<()> {
    fs::create_dir_all(root.join("disc1"))?;
    fs::create_dir_all(root.join("disc2"))?;
    for name in ["disc1/01.mp3", "disc1/02-broken.mp3", "disc2/01.flac", "disc2/cover.png"] {
        fs::write(root.join(name), b"")?;
    }
    Ok(())
}

fn run_opts() -> RunOptions {
    RunOptions {
        model: "tiny".to_string(),
        language: None,
        format: OutputFormat::Txt,
        overwrite: false,
        reclaim_after: None,
    }
}

#[test]
fn interrupted_batch_resumes_where_it_stopped() -> Result<()> {
    let dir = tempdir()?;
    let input_root = dir.path().join("in");
    let output_root = dir.path().join("out");
    media_tree(&input_root)?;
    let files = scanner::scan_directory(&input_root)?;
    assert_eq!(files.len(), 3);

    // First process: finishes one file, then dies while the second is in flight.
    {
        let store = JobStore::open(&output_root)?;
        let mut transcriber = ScriptedTranscriber::new(None);
        let runner = BatchRunner::new(&store, &mut transcriber, None);
        let items = runner.reconcile(&files, &input_root, &output_root, &run_opts())?;
        assert_eq!(items.len(), 3);
        store.mark_processing(&files[0])?;
        store.mark_completed(&files[0], Some(42.0), Some(1.0))?;
        store.mark_processing(&files[1])?;
    }

    let store = JobStore::open(&output_root)?;
    assert_eq!(store.status_of(&files[1])?, Some(JobStatus::Processing));

    let mut transcriber = ScriptedTranscriber::new(Some("broken"));
    let report = BatchRunner::new(&store, &mut transcriber, None).run(
        &files,
        &input_root,
        &output_root,
        &run_opts(),
    )?;
    assert_eq!(transcriber.seen, vec![files[1].clone(), files[2].clone()]);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 1);

    assert!(output_root.join("disc2/01.txt").is_file());
    assert!(!output_root.join("disc1/02-broken.txt").exists());

    let summary = store.summary()?;
    assert_eq!(summary.total, 3);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.total_duration, 84.0);
    store.close()?;

    // The failure is fixed upstream; retry picks up exactly that file.
    let store = JobStore::open(&output_root)?;
    let mut transcriber = ScriptedTranscriber::new(None);
    let report = BatchRunner::new(&store, &mut transcriber, None).retry(&RetryOptions::default())?;
    assert_eq!(report.completed, 1);
    assert_eq!(transcriber.seen, vec![files[1].clone()]);
    assert!(output_root.join("disc1/02-broken.txt").is_file());

    let rows = store.all_rows(None, SortKey::Name)?;
    assert!(rows.iter().all(|job| job.status == JobStatus::Completed));
    assert!(rows.iter().all(|job| job.error.is_none()));

    // Nothing left for a plain rerun.
    let mut transcriber = ScriptedTranscriber::new(None);
    let report = BatchRunner::new(&store, &mut transcriber, None).run(
        &files,
        &input_root,
        &output_root,
        &run_opts(),
    )?;
    assert!(report.nothing_to_do());
    assert!(transcriber.seen.is_empty());
    store.close()?;
    Ok(())
}

#[test]
fn stores_are_scoped_per_output_directory() -> Result<()> {
    let dir = tempdir()?;
    let input_root = dir.path().join("in");
    media_tree(&input_root)?;
    let files = scanner::scan_directory(&input_root)?;

    for out in ["out-a", "out-b"] {
        let output_root = dir.path().join(out);
        let store = JobStore::open(&output_root)?;
        let mut transcriber = ScriptedTranscriber::new(None);
        let report = BatchRunner::new(&store, &mut transcriber, None).run(
            &files,
            &input_root,
            &output_root,
            &run_opts(),
        )?;
        assert_eq!(report.completed, 3);
        assert!(storage::jobs_db_path(&output_root).is_file());
        store.close()?;
    }
    Ok(())
}

#[test]
fn removed_inputs_stay_as_history() -> Result<()> {
    let dir = tempdir()?;
    let input_root = dir.path().join("in");
    let output_root = dir.path().join("out");
    media_tree(&input_root)?;
    let files = scanner::scan_directory(&input_root)?;

    let store = JobStore::open(&output_root)?;
    let mut transcriber = ScriptedTranscriber::new(None);
    BatchRunner::new(&store, &mut transcriber, None).run(&files, &input_root, &output_root, &run_opts())?;

    fs::remove_file(&files[0])?;
    let remaining = scanner::scan_directory(&input_root)?;
    let mut transcriber = ScriptedTranscriber::new(None);
    BatchRunner::new(&store, &mut transcriber, None).run(&remaining, &input_root, &output_root, &run_opts())?;

    assert_eq!(store.summary()?.total, 3);
    assert_eq!(store.status_of(&files[0])?, Some(JobStatus::Completed));
    Ok(())
}
