//! Local scratch space for attachments in transit.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::CoreError;

#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|error| {
            CoreError::persistence(format!(
                "failed to create attachment scratch directory {}: {error}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Reserves a file path for one transfer; the file is removed when the guard drops.
    pub fn reserve(&self, tag: &str, file_name: &str) -> ScratchFile {
        let name = format!("{}-{}", sanitize(tag), sanitize(file_name));
        ScratchFile {
            path: self.root.join(name),
        }
    }
}

#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                warn!(path = %self.path.display(), error = %error, "failed to remove scratch attachment");
            }
        }
    }
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "attachment".to_owned()
    } else {
        trimmed.to_owned()
    }
}
