//! Artifact probing: which kind of worker a module type ships.
//!
//! Inside the module-type directory, the first match wins:
//! 1. a native executable named exactly like the module type,
//! 2. `index.js` (script runtime),
//! 3. `module.py` (python interpreter).

use std::path::{Path, PathBuf};

use crate::error::ArtifactError;

/// How a worker artifact is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Native executable, exec'd directly.
    Native,
    /// JavaScript entry point, run by the script runtime.
    Script,
    /// Python entry point, run by the interpreter.
    Interpreted,
}

impl ArtifactKind {
    /// Short name for logs.
    pub fn as_label(self) -> &'static str {
        match self {
            ArtifactKind::Native => "native",
            ArtifactKind::Script => "script",
            ArtifactKind::Interpreted => "interpreted",
        }
    }
}

/// A located worker artifact.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

/// Probes the module-type directory for an artifact, first match wins.
pub fn probe(
    module_dir: &Path,
    instance: &str,
    module_type: &str,
) -> Result<Artifact, ArtifactError> {
    let candidates = [
        (ArtifactKind::Native, module_dir.join(module_type)),
        (ArtifactKind::Script, module_dir.join("index.js")),
        (ArtifactKind::Interpreted, module_dir.join("module.py")),
    ];

    for (kind, path) in &candidates {
        if path.is_file() {
            let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
            return Ok(Artifact { kind: *kind, path });
        }
    }

    Err(ArtifactError::Missing {
        instance: instance.into(),
        module_type: module_type.into(),
        probed: candidates.into_iter().map(|(_, path)| path).collect(),
    })
}
