use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::FrameSource;
use crate::error::{CastError, Result, SourceError};

const EXTENSIONS: [&str; 2] = ["jpg", "jpeg"];

/// Replays the JPEG files of a directory in name order, one per tick,
/// wrapping around at the end.
///
/// The file list is fixed when the source is opened. A file that cannot be
/// read later (deleted, permissions) fails that tick only.
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl DirectorySource {
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|e| {
            CastError::SourceInit(format!("cannot read directory {}: {e}", dir.display()))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CastError::SourceInit(format!(
                "no .jpg/.jpeg files in {}",
                dir.display()
            )));
        }

        tracing::debug!(dir = %dir.display(), files = files.len(), "directory source scanned");

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

impl FrameSource for DirectorySource {
    fn produce(&mut self) -> std::result::Result<Bytes, SourceError> {
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();

        fs::read(path)
            .map(Bytes::from)
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", path.display())))
    }

    fn describe(&self) -> String {
        format!("directory {} ({} files)", self.dir.display(), self.files.len())
    }
}
