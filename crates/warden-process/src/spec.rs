//! Launch specification for a supervised binary

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::error::{ProcessError, Result};

/// Everything needed to launch one supervised binary.
///
/// The binary path is resolved eagerly: bare program names go through the
/// `PATH` lookup, relative paths are anchored at the caller's base
/// directory, and the result must exist on disk. Resolution failures are
/// reported at registration time rather than at the first start.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Absolute path of the executable
    pub binary: PathBuf,
    /// Command line arguments
    pub args: Vec<String>,
    /// Working directory for the child (defaults to the binary's parent)
    pub working_dir: PathBuf,
    /// Extra environment variables, appended to the inherited environment
    pub env: HashMap<String, String>,
}

impl ProcessSpec {
    /// Resolve `program` against `base_dir` and build a spec for it.
    pub fn resolve(program: impl AsRef<Path>, base_dir: impl AsRef<Path>) -> Result<Self> {
        let program = program.as_ref();
        let base_dir = base_dir.as_ref();

        let candidate = if program.is_absolute() {
            program.to_path_buf()
        } else if is_bare_name(program) {
            match which::which(program) {
                Ok(found) => found,
                Err(_) => base_dir.join(program),
            }
        } else {
            base_dir.join(program)
        };

        if !candidate.is_file() {
            return Err(ProcessError::BinaryNotFound(
                candidate.display().to_string(),
            ));
        }

        // Symlink-free form so identical registrations compare equal.
        let binary = std::fs::canonicalize(&candidate).unwrap_or(candidate);
        let working_dir = binary
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| base_dir.to_path_buf());

        Ok(Self {
            binary,
            args: Vec::new(),
            working_dir,
            env: HashMap::new(),
        })
    }

    /// Set command line arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Override the working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Add an environment variable for the child
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// True when `program` is a single path component, e.g. `"java"`.
fn is_bare_name(program: &Path) -> bool {
    let mut components = program.components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_binary_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProcessSpec::resolve("no-such-server", dir.path()).unwrap_err();
        assert!(matches!(err, ProcessError::BinaryNotFound(_)));
    }

    #[test]
    fn relative_path_is_anchored_at_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("bin")).unwrap();
        let file = dir.path().join("bin").join("server");
        fs::write(&file, b"#!/bin/sh\n").unwrap();

        let spec = ProcessSpec::resolve("bin/server", dir.path()).unwrap();
        assert!(spec.binary.is_absolute());
        assert!(spec.binary.ends_with("bin/server"));
        assert_eq!(spec.working_dir, spec.binary.parent().unwrap());
    }

    #[test]
    fn absolute_path_ignores_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("server");
        fs::write(&file, b"").unwrap();

        let spec = ProcessSpec::resolve(&file, "/nonexistent-base").unwrap();
        assert!(spec.binary.ends_with("server"));
    }

    #[cfg(unix)]
    #[test]
    fn bare_name_uses_path_lookup() {
        let spec = ProcessSpec::resolve("sh", "/").unwrap();
        assert!(spec.binary.is_absolute());
    }

    #[test]
    fn builder_collects_args_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("server");
        fs::write(&file, b"").unwrap();

        let spec = ProcessSpec::resolve(&file, dir.path())
            .unwrap()
            .args(["--nogui", "--port=25565"])
            .env("JAVA_OPTS", "-Xmx2G")
            .working_dir("/srv/worlds");
        assert_eq!(spec.args, vec!["--nogui", "--port=25565"]);
        assert_eq!(spec.env.get("JAVA_OPTS").unwrap(), "-Xmx2G");
        assert_eq!(spec.working_dir, PathBuf::from("/srv/worlds"));
    }
}
