//! Expands command-line paths into media files.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

/// Extensions accepted when walking folders.
pub const MEDIA_EXTENSIONS: [&str; 20] = [
    "mp4", "mov", "mkv", "avi", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "ts", "3gp", "mp3",
    "aac", "wav", "flac", "ogg", "m4a", "wma", "opus",
];

/// True if the file name carries a known media extension.
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            MEDIA_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Files are kept as given; folders are walked recursively for media files.
///
/// Folder contents come back sorted so queue order is stable between runs.
pub fn collect_media(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }

        let mut found: Vec<PathBuf> = walkdir::WalkDir::new(path)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_media_file(e.path()))
            .map(|e| e.into_path())
            .collect();
        found.sort();

        info!(count = found.len(), path = ?path, "Scanned folder");
        files.extend(found);
    }

    debug!(count = files.len(), "Collected input files");
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folders_are_walked_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("season 1");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(dir.path().join("b.MKV"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        std::fs::write(nested.join("a.mp4"), b"").unwrap();

        let files = collect_media(&[dir.path().to_path_buf()]);
        assert_eq!(files, vec![dir.path().join("b.MKV"), nested.join("a.mp4")]);
    }

    #[test]
    fn explicit_files_pass_through() {
        let given = PathBuf::from("/does/not/exist.txt");
        assert_eq!(collect_media(std::slice::from_ref(&given)), vec![given]);
    }
}
