//! Capability policy consulted by native libraries before touching host
//! resources.
//!
//! The restricted policy is default-deny: an empty allowed-path list means
//! no filesystem access at all. Paths are canonicalized before the prefix
//! check so `..` segments and symlinks cannot escape an allowed root.

use std::path::{Path, PathBuf};

use crate::exception::Raised;

#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    pub allowed_paths: Vec<PathBuf>,
    pub allow_network: bool,
    pub allow_subprocess: bool,
}

impl SandboxConfig {
    pub fn allow_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.allowed_paths.push(path.into());
        self
    }

    pub fn allow_network(mut self) -> Self {
        self.allow_network = true;
        self
    }

    pub fn allow_subprocess(mut self) -> Self {
        self.allow_subprocess = true;
        self
    }
}

#[derive(Debug, Clone)]
pub enum SandboxPolicy {
    Unrestricted,
    Restricted(SandboxConfig),
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        SandboxPolicy::Unrestricted
    }
}

impl SandboxPolicy {
    /// Validates filesystem access and returns the canonical path to use.
    pub fn check_path(&self, path: &Path) -> Result<PathBuf, Raised> {
        let resolved = canonicalize_lenient(path)?;
        match self {
            SandboxPolicy::Unrestricted => Ok(resolved),
            SandboxPolicy::Restricted(config) => {
                for allowed in &config.allowed_paths {
                    if let Ok(root) = std::fs::canonicalize(allowed)
                        && resolved.starts_with(&root)
                    {
                        return Ok(resolved);
                    }
                }
                Err(Raised::permission_error(format!(
                    "access to '{}' is not permitted",
                    path.display()
                )))
            }
        }
    }

    pub fn check_network(&self) -> Result<(), Raised> {
        match self {
            SandboxPolicy::Unrestricted => Ok(()),
            SandboxPolicy::Restricted(config) if config.allow_network => Ok(()),
            SandboxPolicy::Restricted(_) => {
                Err(Raised::permission_error("network access is not permitted"))
            }
        }
    }

    pub fn check_subprocess(&self) -> Result<(), Raised> {
        match self {
            SandboxPolicy::Unrestricted => Ok(()),
            SandboxPolicy::Restricted(config) if config.allow_subprocess => Ok(()),
            SandboxPolicy::Restricted(_) => Err(Raised::permission_error(
                "subprocess execution is not permitted",
            )),
        }
    }
}

/// Canonicalizes the path itself, or its parent when the file does not
/// exist yet (so writes to new files inside an allowed root still pass).
fn canonicalize_lenient(path: &Path) -> Result<PathBuf, Raised> {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return Ok(resolved);
    }
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let (Some(parent), Some(name)) = (parent, path.file_name()) {
        let resolved_parent = std::fs::canonicalize(parent).map_err(|err| {
            Raised::permission_error(format!("cannot resolve '{}': {err}", path.display()))
        })?;
        return Ok(resolved_parent.join(name));
    }
    Err(Raised::permission_error(format!(
        "cannot resolve '{}'",
        path.display()
    )))
}
