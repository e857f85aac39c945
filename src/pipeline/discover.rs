// Source video discovery

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{PipelineError, Result};

/// Find every source video under `source_path`, sorted by path.
/// A single file is accepted when its extension matches.
pub fn discover_sources(source_path: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if source_path.is_file() {
        if has_extension(source_path, extensions) {
            files.push(source_path.to_path_buf());
        }
    } else if source_path.is_dir() {
        for entry in WalkDir::new(source_path)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file() && has_extension(path, extensions) {
                files.push(path.to_path_buf());
            }
        }
    } else {
        return Err(PipelineError::Configuration(format!(
            "source directory {} does not exist",
            source_path.display()
        )));
    }

    files.sort();
    Ok(files)
}

/// Case-insensitive extension match
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e.to_lowercase(),
        None => return false,
    };
    extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext))
}

/// Ledger key for a source: its file name
pub fn video_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Directory-safe stem of a ledger key (`cam01.dav` -> `cam01`)
pub fn video_stem(video: &str) -> String {
    Path::new(video)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| video.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn exts() -> Vec<String> {
        vec!["dav".into(), "mp4".into()]
    }

    #[test]
    fn test_discover_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("night")).unwrap();
        fs::write(tmp.path().join("b.mp4"), b"x").unwrap();
        fs::write(tmp.path().join("a.DAV"), b"x").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"x").unwrap();
        fs::write(tmp.path().join("night").join("c.dav"), b"x").unwrap();

        let found = discover_sources(tmp.path(), &exts()).unwrap();
        let names: Vec<String> = found.iter().map(|p| video_name(p)).collect();
        assert_eq!(names, vec!["a.DAV", "b.mp4", "c.dav"]);
    }

    #[test]
    fn test_single_file_and_missing_dir() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("cam01.dav");
        fs::write(&file, b"x").unwrap();
        assert_eq!(discover_sources(&file, &exts()).unwrap(), vec![file]);

        let err = discover_sources(&tmp.path().join("missing"), &exts()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_names() {
        assert_eq!(video_name(Path::new("/videos/cam01.dav")), "cam01.dav");
        assert_eq!(video_stem("cam01.dav"), "cam01");
        assert_eq!(video_stem("noext"), "noext");
    }
}
