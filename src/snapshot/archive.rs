//! Zip archives bundling the JSON graph with the media directory.
//!
//! An archive holds `cards.json` at the root and every media file under
//! `media/`, keeping its path relative to the media directory.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Result, StoreError};

pub const SNAPSHOT_ENTRY: &str = "cards.json";
pub const MEDIA_PREFIX: &str = "media/";

/// Everything read from an archive, held in memory until the graph is
/// accepted.
#[derive(Debug, Default)]
pub struct ArchiveContents {
    pub snapshot_json: Vec<u8>,
    /// Media files as (path relative to the media directory, bytes).
    pub media: Vec<(PathBuf, Vec<u8>)>,
}

/// Write `snapshot_json` plus every file under `media_dir` (if it exists).
/// Returns the number of media files written.
pub fn write_archive(path: &Path, snapshot_json: &[u8], media_dir: &Path) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(SNAPSHOT_ENTRY, options)?;
    zip.write_all(snapshot_json)?;

    let mut media_files = 0;
    if media_dir.is_dir() {
        for entry in WalkDir::new(media_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| StoreError::Io(std::io::Error::other(e.to_string())))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(media_dir)
                .map_err(|_| StoreError::Io(std::io::Error::other("media path outside media dir")))?;
            let name = format!("{MEDIA_PREFIX}{}", entry_name(relative));
            zip.start_file(name.as_str(), options)?;
            let mut content = Vec::new();
            File::open(entry.path())?.read_to_end(&mut content)?;
            zip.write_all(&content)?;
            media_files += 1;
        }
    }
    zip.finish()?;

    tracing::info!(path = %path.display(), media_files, "archive written");
    Ok(media_files)
}

/// Read and validate an archive without touching the filesystem beyond it.
/// Any malformed entry or unsafe path rejects the whole archive.
pub fn read_archive(path: &Path) -> Result<ArchiveContents> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| StoreError::CorruptSnapshot(format!("not a valid archive: {e}")))?;

    let mut contents = ArchiveContents::default();
    let mut found_snapshot = false;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| StoreError::CorruptSnapshot(format!("unreadable archive entry: {e}")))?;
        let name = entry.name().to_string();
        if entry.is_dir() {
            continue;
        }
        if name == SNAPSHOT_ENTRY {
            entry
                .read_to_end(&mut contents.snapshot_json)
                .map_err(|e| StoreError::CorruptSnapshot(format!("{SNAPSHOT_ENTRY}: {e}")))?;
            found_snapshot = true;
            continue;
        }
        let Some(relative) = name.strip_prefix(MEDIA_PREFIX) else {
            tracing::debug!(entry = %name, "ignoring unknown archive entry");
            continue;
        };
        let safe = entry
            .enclosed_name()
            .and_then(|_| safe_relative_path(relative))
            .ok_or_else(|| StoreError::CorruptSnapshot(format!("unsafe media path: {name}")))?;
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| StoreError::CorruptSnapshot(format!("{name}: {e}")))?;
        contents.media.push((safe, bytes));
    }

    if !found_snapshot {
        return Err(StoreError::CorruptSnapshot(format!(
            "archive has no {SNAPSHOT_ENTRY}"
        )));
    }
    Ok(contents)
}

/// Write extracted media below `media_dir`. Returns the number of files.
pub fn write_media(media_dir: &Path, media: &[(PathBuf, Vec<u8>)]) -> Result<usize> {
    fs::create_dir_all(media_dir)?;
    for (relative, bytes) in media {
        let target = media_dir.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes)?;
    }
    Ok(media.len())
}

/// Forward-slash entry name for a relative filesystem path.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// A path made only of normal components, or `None`.
fn safe_relative_path(raw: &str) -> Option<PathBuf> {
    let path = Path::new(raw);
    if raw.is_empty() || raw.contains('\\') {
        return None;
    }
    path.components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_and_graph_survive_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        fs::create_dir_all(media.join("img")).unwrap();
        fs::write(media.join("img/cat.png"), b"png").unwrap();
        fs::write(media.join("clip.mp3"), b"mp3").unwrap();
        let archive = dir.path().join("out.zip");

        let written = write_archive(&archive, b"{\"cards\":[]}", &media).unwrap();
        assert_eq!(written, 2);

        let contents = read_archive(&archive).unwrap();
        assert_eq!(contents.snapshot_json, b"{\"cards\":[]}");
        let mut names: Vec<String> = contents
            .media
            .iter()
            .map(|(p, _)| entry_name(p))
            .collect();
        names.sort();
        assert_eq!(names, ["clip.mp3", "img/cat.png"]);

        let restored = dir.path().join("restored");
        assert_eq!(write_media(&restored, &contents.media).unwrap(), 2);
        assert_eq!(fs::read(restored.join("img/cat.png")).unwrap(), b"png");
    }

    #[test]
    fn missing_media_dir_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("out.zip");
        assert_eq!(write_archive(&archive, b"{}", &dir.path().join("none")).unwrap(), 0);
        assert!(read_archive(&archive).unwrap().media.is_empty());
    }

    #[test]
    fn traversal_entries_reject_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evil.zip");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        let options = SimpleFileOptions::default();
        zip.start_file(SNAPSHOT_ENTRY, options).unwrap();
        zip.write_all(b"{}").unwrap();
        zip.start_file("media/../../escape.txt", options).unwrap();
        zip.write_all(b"x").unwrap();
        zip.finish().unwrap();

        assert!(matches!(
            read_archive(&path),
            Err(StoreError::CorruptSnapshot(_))
        ));
    }

    #[test]
    fn garbage_is_a_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.zip");
        fs::write(&path, b"not a zip at all").unwrap();
        assert!(matches!(
            read_archive(&path),
            Err(StoreError::CorruptSnapshot(_))
        ));
    }

    #[test]
    fn unsafe_relative_paths() {
        assert!(safe_relative_path("a/b.png").is_some());
        assert!(safe_relative_path("../b.png").is_none());
        assert!(safe_relative_path("/etc/passwd").is_none());
        assert!(safe_relative_path("").is_none());
        assert!(safe_relative_path("a\\..\\b").is_none());
    }
}
