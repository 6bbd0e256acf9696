// SPDX-License-Identifier: GPL-3.0-only

//! Path existence probes

use std::io;
use std::path::Path;

/// What currently lives at a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Directory,
    Other,
    Missing,
}

impl PathKind {
    pub fn is_directory(self) -> bool {
        self == PathKind::Directory
    }
}

/// Stat `path`, following symlinks.
///
/// A missing path (or a path running through a non-directory) is reported
/// as [`PathKind::Missing`]; every other I/O failure is returned.
pub async fn probe(path: &Path) -> io::Result<PathKind> {
    classify(tokio::fs::metadata(path).await)
}

/// [`probe`] on the calling thread, for callers that must decide before
/// yielding.
pub fn probe_now(path: &Path) -> io::Result<PathKind> {
    classify(std::fs::metadata(path))
}

/// Whether `path` currently resolves to a directory.
pub async fn is_directory(path: &Path) -> io::Result<bool> {
    probe(path).await.map(PathKind::is_directory)
}

fn classify(metadata: io::Result<std::fs::Metadata>) -> io::Result<PathKind> {
    match metadata {
        Ok(metadata) if metadata.is_dir() => Ok(PathKind::Directory),
        Ok(_) => Ok(PathKind::Other),
        Err(e) if is_not_found(&e) => Ok(PathKind::Missing),
        Err(e) => Err(e),
    }
}

fn is_not_found(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_distinguishes_directories_files_and_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, b"data").unwrap();

        assert_eq!(probe(dir.path()).await.unwrap(), PathKind::Directory);
        assert_eq!(probe(&file).await.unwrap(), PathKind::Other);
        assert_eq!(
            probe(&dir.path().join("absent")).await.unwrap(),
            PathKind::Missing
        );
    }

    #[tokio::test]
    async fn path_through_a_file_is_missing_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, b"data").unwrap();

        assert_eq!(
            probe(&file.join("child")).await.unwrap(),
            PathKind::Missing
        );
        assert!(!is_directory(&file.join("child")).await.unwrap());
    }

    #[test]
    fn blocking_probe_agrees_with_async_probe() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(probe_now(dir.path()).unwrap(), PathKind::Directory);
        assert_eq!(
            probe_now(&dir.path().join("absent")).unwrap(),
            PathKind::Missing
        );
    }
}
