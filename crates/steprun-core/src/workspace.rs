//! Request-scoped workspaces
//!
//! Every request gets its own directory named after a fresh UUID, so two
//! requests never share a source path or an artifact path. All paths the
//! workspace creates are tracked and removed when it is released, which
//! happens at the latest when the value is dropped: on success, on an early
//! `?` return, on panic unwinding and when the owning future is cancelled.

use crate::{Language, Result, StepError};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Exclusively owned set of files for one request
#[derive(Debug)]
pub struct Workspace {
    id: String,
    dir: PathBuf,
    source: PathBuf,
    /// Everything to remove on release, in creation order
    owned: Vec<PathBuf>,
    released: bool,
}

impl Workspace {
    /// Create a fresh directory under `root` and write `source` into it
    pub fn acquire(root: &Path, language: Language, source: &str) -> Result<Self> {
        let id = Uuid::new_v4().simple().to_string();
        let dir = root.join(format!("steprun-{id}"));

        fs::create_dir_all(root).map_err(|e| {
            StepError::Workspace(format!(
                "failed to create workspace root {}: {e}",
                root.display()
            ))
        })?;
        // create_dir (not create_dir_all) so an existing directory is an error
        fs::create_dir(&dir).map_err(|e| {
            StepError::Workspace(format!(
                "failed to create workspace directory {}: {e}",
                dir.display()
            ))
        })?;

        let mut workspace = Self {
            source: dir.join(format!("{id}.{}", language.suffix())),
            id,
            owned: vec![dir.clone()],
            dir,
            released: false,
        };

        // From here on a failure drops `workspace`, which removes the directory.
        fs::write(&workspace.source, source).map_err(|e| {
            StepError::Workspace(format!(
                "failed to write source file {}: {e}",
                workspace.source.display()
            ))
        })?;
        workspace.owned.push(workspace.source.clone());

        tracing::info!(
            workspace_id = %workspace.id,
            language = %language,
            dir = %workspace.dir.display(),
            "workspace acquired"
        );

        Ok(workspace)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current path of the materialized source file
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Rename the source file within the workspace directory
    pub fn rename_source(&mut self, file_name: &str) -> Result<&Path> {
        if file_name.contains(std::path::MAIN_SEPARATOR) || file_name == ".." {
            return Err(StepError::Workspace(format!(
                "invalid source file name: {file_name}"
            )));
        }

        let target = self.dir.join(file_name);
        fs::rename(&self.source, &target).map_err(|e| {
            StepError::Workspace(format!(
                "failed to rename {} to {}: {e}",
                self.source.display(),
                target.display()
            ))
        })?;

        tracing::debug!(workspace_id = %self.id, to = %target.display(), "source renamed");
        self.track(target.clone());
        self.source = target;
        Ok(&self.source)
    }

    /// Path for a compiled artifact, unique to this workspace
    ///
    /// The path is tracked immediately so it is removed even if the compiler
    /// only got halfway through writing it.
    pub fn artifact_path(&mut self) -> PathBuf {
        let path = self.dir.join(format!("{}.out", self.id));
        self.track(path.clone());
        path
    }

    /// Register a path produced inside the workspace by a toolchain
    pub fn track(&mut self, path: PathBuf) {
        if !self.owned.contains(&path) {
            self.owned.push(path);
        }
    }

    /// Remove every tracked path
    ///
    /// Individual failures are logged and skipped; all paths are attempted.
    /// Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // Files first (newest first), the directory itself last.
        for path in self.owned.iter().rev() {
            let outcome = if path == &self.dir {
                // Catches untracked toolchain output such as javac's .class files
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };

            match outcome {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        workspace_id = %self.id,
                        path = %path.display(),
                        error = %e,
                        "failed to remove workspace path"
                    );
                }
            }
        }

        tracing::info!(workspace_id = %self.id, "workspace released");
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_source_with_language_suffix() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::acquire(root.path(), Language::Cpp, "int main() {}").unwrap();

        assert!(workspace.dir().starts_with(root.path()));
        assert_eq!(workspace.source().extension().unwrap(), "cpp");
        assert_eq!(fs::read_to_string(workspace.source()).unwrap(), "int main() {}");
    }

    #[test]
    fn two_workspaces_never_share_paths() {
        let root = tempfile::tempdir().unwrap();
        let mut a = Workspace::acquire(root.path(), Language::C, "").unwrap();
        let mut b = Workspace::acquire(root.path(), Language::C, "").unwrap();

        assert_ne!(a.id(), b.id());
        assert_ne!(a.source(), b.source());
        assert_ne!(a.artifact_path(), b.artifact_path());
    }

    #[test]
    fn drop_removes_everything() {
        let root = tempfile::tempdir().unwrap();
        let dir;
        {
            let mut workspace =
                Workspace::acquire(root.path(), Language::Java, "public class A {}").unwrap();
            workspace.rename_source("A.java").unwrap();
            fs::write(workspace.dir().join("A.class"), b"\xca\xfe").unwrap();
            let artifact = workspace.artifact_path();
            fs::write(&artifact, b"bin").unwrap();
            dir = workspace.dir().to_path_buf();
        }

        assert!(!dir.exists());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn release_is_idempotent_and_tolerates_missing_files() {
        let root = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::acquire(root.path(), Language::Python, "x = 1").unwrap();
        fs::remove_file(workspace.source()).unwrap();

        workspace.release();
        workspace.release();
        assert!(!workspace.dir().exists());
    }

    #[test]
    fn rename_rejects_paths() {
        let root = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::acquire(root.path(), Language::Java, "").unwrap();
        let err = workspace.rename_source("../Escape.java").unwrap_err();
        assert!(matches!(err, StepError::Workspace(_)));
    }
}
