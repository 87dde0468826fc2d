//! Per-job working directories.
//!
//! Every job gets `<work_dir>/<uuid>/` with an `input/` directory for the
//! downloaded artifact and an `output/` directory for the transform result.
//! The random directory name keeps concurrent jobs apart even when their
//! artifact keys are identical.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{WorkspaceError, WorkspaceResult};

/// Allocates job workspaces under a common work directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    work_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Create a fresh workspace for an artifact with the given file name.
    pub async fn create(&self, file_name: &str) -> WorkspaceResult<Workspace> {
        let root = self.work_dir.join(Uuid::new_v4().to_string());
        let input_dir = root.join("input");
        let output_dir = root.join("output");

        for dir in [&input_dir, &output_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| WorkspaceError::Create {
                    path: dir.clone(),
                    source,
                })?;
        }

        debug!("Created workspace {}", root.display());

        Ok(Workspace {
            input_path: input_dir.join(file_name),
            output_path: output_dir.join(file_name),
            root,
            removed: false,
        })
    }
}

/// Directory tree owned by exactly one pipeline run.
///
/// Call [`Workspace::destroy`] when the run ends. If the workspace is dropped
/// without it (the run was cancelled or panicked) the tree is removed
/// synchronously in `Drop`.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    input_path: PathBuf,
    output_path: PathBuf,
    removed: bool,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the source artifact is downloaded to.
    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    /// Where the transform writes its result.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Remove the directory tree.
    pub async fn destroy(mut self) -> WorkspaceResult<()> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                debug!("Removed workspace {}", self.root.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WorkspaceError::Remove {
                path: self.root.clone(),
                source,
            }),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove abandoned workspace {}: {}", self.root.display(), e);
            }
        }
    }
}
