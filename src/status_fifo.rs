//! Status FIFO: coarse boot progress for an external supervisor.
//!
//! When a path is given, the manager writes newline-terminated tokens from a
//! small fixed set into it. Write failures are logged, never fatal: the
//! FIFO is a convenience channel, not part of the control flow.

use std::io::Write;
use std::path::PathBuf;

/// Progress channel over an optional named pipe.
#[derive(Debug, Clone, Default)]
pub struct StatusFifo {
    path: Option<PathBuf>,
}

impl StatusFifo {
    /// All managed modules are up; waiting for externally started ones.
    pub const WAITING_FOR_STANDALONE_MODULES: &'static str = "WAITING_FOR_STANDALONE_MODULES";
    /// Every module reported ready.
    pub const ALL_MODULES_STARTED: &'static str = "ALL_MODULES_STARTED";

    /// Creates a channel; an empty path disables it.
    pub fn create_from_path(path: &str) -> Self {
        if path.is_empty() {
            Self { path: None }
        } else {
            Self {
                path: Some(PathBuf::from(path)),
            }
        }
    }

    /// Writes one token, newline-terminated.
    pub fn update(&self, token: &str) {
        let Some(path) = &self.path else {
            return;
        };
        let result = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .and_then(|mut fifo| writeln!(fifo, "{token}"));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "status fifo update failed");
        }
    }
}
