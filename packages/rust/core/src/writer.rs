//! Artifact writer: persists a report under its category directory.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use geist_shared::{GeistError, OutputLocator, ReportDocument, Result};

/// Writes reports below a root directory, one category directory each.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `locator` lands under this writer's root.
    pub fn path_for(&self, locator: &OutputLocator) -> PathBuf {
        self.root.join(locator.relative_path())
    }

    /// Write `document` to the file named by `locator` and return its absolute path.
    ///
    /// Never replaces an existing file: a name taken within the same minute
    /// yields [`GeistError::ArtifactCollision`]. The content is staged in a
    /// temporary file and renamed into place, so a failed write leaves nothing
    /// behind under the final name.
    #[instrument(skip_all, fields(file = %locator.file_name()))]
    pub fn write(&self, document: &ReportDocument, locator: &OutputLocator) -> Result<PathBuf> {
        let target = self.path_for(locator);
        let dir = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        std::fs::create_dir_all(&dir).map_err(|e| GeistError::io(&dir, e))?;

        // Reserve the name first; this is the only check-and-create step.
        std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => GeistError::ArtifactCollision {
                    path: target.clone(),
                },
                _ => GeistError::io(&target, e),
            })?;

        let staged = dir.join(format!(".{}.tmp", locator.file_name()));
        if let Err(e) = stage_and_commit(&staged, &target, &document.to_markdown()) {
            let _ = std::fs::remove_file(&staged);
            let _ = std::fs::remove_file(&target);
            return Err(e);
        }

        let absolute = std::path::absolute(&target).map_err(|e| GeistError::io(&target, e))?;
        info!(path = %absolute.display(), "report written");
        Ok(absolute)
    }
}

fn stage_and_commit(staged: &Path, target: &Path, content: &str) -> Result<()> {
    let mut file = std::fs::File::create(staged).map_err(|e| GeistError::io(staged, e))?;
    file.write_all(content.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| GeistError::io(staged, e))?;
    drop(file);
    std::fs::rename(staged, target).map_err(|e| GeistError::io(target, e))?;
    debug!(path = %target.display(), bytes = content.len(), "staged report committed");
    Ok(())
}
