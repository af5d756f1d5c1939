//! Collision-free output path resolution.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::model::OutputFormat;
use crate::error::QueueError;

/// Picks `<output_dir>/<stem>.<ext>`, or the first free `<stem>_<n>.<ext>` with `n >= 1`.
///
/// A name is free when no file exists there and it is not in `reserved`,
/// the outputs of conversions still being written. Creates `output_dir` if
/// needed. Callers re-resolve right before the engine starts.
pub fn resolve_output_path(
    input: &Path,
    output_dir: &Path,
    format: OutputFormat,
    reserved: &HashSet<PathBuf>,
) -> Result<PathBuf, QueueError> {
    std::fs::create_dir_all(output_dir).map_err(|e| QueueError::OutputUnavailable {
        dir: output_dir.to_path_buf(),
        message: e.to_string(),
    })?;

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let ext = format.extension();

    let taken = |path: &Path| path.exists() || reserved.contains(path);

    let candidate = output_dir.join(format!("{stem}.{ext}"));
    if !taken(&candidate) {
        return Ok(candidate);
    }

    let mut n: u32 = 1;
    loop {
        let candidate = output_dir.join(format!("{stem}_{n}.{ext}"));
        if !taken(&candidate) {
            return Ok(candidate);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_free_name_is_chosen() {
        let dir = tempfile::tempdir().unwrap();
        let input = Path::new("/media/Holiday Clip.MOV");

        let first = resolve_output_path(input, dir.path(), OutputFormat::Mp4, &HashSet::new()).unwrap();
        assert_eq!(first, dir.path().join("Holiday Clip.mp4"));

        std::fs::write(&first, b"x").unwrap();
        std::fs::write(dir.path().join("Holiday Clip_1.mp4"), b"x").unwrap();
        let third = resolve_output_path(input, dir.path(), OutputFormat::Mp4, &HashSet::new()).unwrap();
        assert_eq!(third, dir.path().join("Holiday Clip_2.mp4"));
    }

    #[test]
    fn names_held_by_running_conversions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let reserved = HashSet::from([dir.path().join("clip.mp4"), dir.path().join("clip_1.mp4")]);

        let path =
            resolve_output_path(Path::new("/b/clip.mkv"), dir.path(), OutputFormat::Mp4, &reserved)
                .unwrap();
        assert_eq!(path, dir.path().join("clip_2.mp4"));
    }

    #[test]
    fn missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let path = resolve_output_path(Path::new("song.wav"), &nested, OutputFormat::Flac, &HashSet::new())
            .unwrap();
        assert!(nested.is_dir());
        assert_eq!(path, nested.join("song.flac"));
    }

    #[test]
    fn unusable_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let err = resolve_output_path(
            Path::new("a.mov"),
            &file.join("sub"),
            OutputFormat::Mkv,
            &HashSet::new(),
        )
        .unwrap_err();
        assert!(matches!(err, QueueError::OutputUnavailable { .. }));
        assert!(err.to_string().starts_with("Unable to create output directory"));
    }
}
