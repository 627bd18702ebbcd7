use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::output::OutputFormat;

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "flac", "ogg", "aac", "wma"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "avi", "webm"];

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            AUDIO_EXTENSIONS.contains(&ext.as_str()) || VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Recursively collects supported media files under `root`, sorted by path.
pub fn scan_directory(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("scan {}", root.display()))?;
        if entry.file_type().is_file() && is_supported(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    tracing::debug!(root = %root.display(), count = files.len(), "scanned input directory");
    Ok(files)
}

/// Mirrors `input` under `output_root`, swapping the extension for the format.
pub fn output_path_for(
    input: &Path,
    input_root: &Path,
    output_root: &Path,
    format: OutputFormat,
) -> Result<PathBuf> {
    let relative = input.strip_prefix(input_root).with_context(|| {
        format!(
            "{} is not under {}",
            input.display(),
            input_root.display()
        )
    })?;
    Ok(output_root
        .join(relative)
        .with_extension(format.primary_extension()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn scan_is_recursive_sorted_and_filtered() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path();
        fs::create_dir_all(root.join("b/nested"))?;
        fs::create_dir_all(root.join("a"))?;
        for name in [
            "b/nested/talk.MP4",
            "a/episode.mp3",
            "a/notes.txt",
            "z.wav",
            "b/cover.jpg",
            "b/clip.webm",
        ] {
            fs::write(root.join(name), b"")?;
        }
        // A directory that looks like media must not be picked up.
        fs::create_dir_all(root.join("fake.mp3"))?;

        let found: Vec<PathBuf> = scan_directory(root)?
            .into_iter()
            .map(|p| p.strip_prefix(root).map(Path::to_path_buf))
            .collect::<Result<_, _>>()?;
        assert_eq!(
            found,
            vec![
                PathBuf::from("a/episode.mp3"),
                PathBuf::from("b/clip.webm"),
                PathBuf::from("b/nested/talk.MP4"),
                PathBuf::from("z.wav"),
            ]
        );
        Ok(())
    }

    #[test]
    fn scan_of_missing_root_fails() {
        let dir = tempdir().expect("tempdir");
        assert!(scan_directory(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn output_path_mirrors_structure() -> Result<()> {
        let input = Path::new("/media/in/season1/ep1.m4a");
        let in_root = Path::new("/media/in");
        let out_root = Path::new("/media/out");
        assert_eq!(
            output_path_for(input, in_root, out_root, OutputFormat::Txt)?,
            PathBuf::from("/media/out/season1/ep1.txt")
        );
        assert_eq!(
            output_path_for(input, in_root, out_root, OutputFormat::Json)?,
            PathBuf::from("/media/out/season1/ep1.json")
        );
        assert_eq!(
            output_path_for(input, in_root, out_root, OutputFormat::Both)?,
            PathBuf::from("/media/out/season1/ep1.txt")
        );
        assert!(output_path_for(input, Path::new("/other"), out_root, OutputFormat::Txt).is_err());
        Ok(())
    }
}
