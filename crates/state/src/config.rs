//! In-process backend selection (spec.md §6): a small struct plus one
//! constructor function, not a file or CLI parser — configuration loading
//! from disk remains the caller's job.

use crate::contract::StateBackend;
use crate::memory::MemoryState;
use crate::struct_backend::StructState;
use crate::trie_backend::TrieState;
use replay_common::{ReplayError, ReplayResult};
use std::path::PathBuf;

/// Which backend family to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The in-memory reference backend (spec.md §4.2.1). Ignores `variant`
    /// and any path in `BackendConfig`.
    Memory,
    /// The persistent Merkle-ish trie backend (spec.md §4.2.2).
    Trie,
    /// The persistent structured-state backend, the only one with archive
    /// support (spec.md §4.2.3).
    Struct,
}

/// Drives `open_state`. `variant` is reserved for future per-backend tuning
/// (e.g. a cache-size profile); no backend currently recognizes one, so any
/// `Some` value is rejected with `UnsupportedConfiguration` rather than
/// silently ignored.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub implementation: BackendKind,
    pub variant: Option<String>,
    /// Required for `Trie` and `Struct`; ignored for `Memory`.
    pub path: Option<PathBuf>,
}

impl BackendConfig {
    pub fn memory() -> Self {
        Self {
            implementation: BackendKind::Memory,
            variant: None,
            path: None,
        }
    }

    pub fn trie(path: impl Into<PathBuf>) -> Self {
        Self {
            implementation: BackendKind::Trie,
            variant: None,
            path: Some(path.into()),
        }
    }

    pub fn struct_backed(path: impl Into<PathBuf>) -> Self {
        Self {
            implementation: BackendKind::Struct,
            variant: None,
            path: Some(path.into()),
        }
    }
}

/// Opens the backend named by `config`, failing immediately (never on first
/// use) if the combination cannot be honored.
pub fn open_state(config: BackendConfig) -> ReplayResult<Box<dyn StateBackend>> {
    if config.variant.is_some() {
        return Err(ReplayError::UnsupportedConfiguration(
            "no backend currently recognizes a variant tag".into(),
        ));
    }
    match config.implementation {
        BackendKind::Memory => Ok(Box::new(MemoryState::new())),
        BackendKind::Trie => {
            let path = config.path.ok_or_else(|| {
                ReplayError::UnsupportedConfiguration("trie backend requires a path".into())
            })?;
            Ok(Box::new(TrieState::open(path)?))
        }
        BackendKind::Struct => {
            let path = config.path.ok_or_else(|| {
                ReplayError::UnsupportedConfiguration("struct backend requires a path".into())
            })?;
            Ok(Box::new(StructState::open(path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_opens_with_no_path() {
        let backend = open_state(BackendConfig::memory());
        assert!(backend.is_ok());
    }

    #[test]
    fn trie_backend_without_a_path_is_rejected() {
        let config = BackendConfig {
            implementation: BackendKind::Trie,
            variant: None,
            path: None,
        };
        assert!(matches!(open_state(config), Err(ReplayError::UnsupportedConfiguration(_))));
    }

    #[test]
    fn trie_backend_opens_against_a_temp_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let backend = open_state(BackendConfig::trie(dir.path()));
        assert!(backend.is_ok());
    }

    #[test]
    fn a_variant_tag_is_rejected_for_every_backend() {
        let mut config = BackendConfig::memory();
        config.variant = Some("fast".into());
        assert!(matches!(open_state(config), Err(ReplayError::UnsupportedConfiguration(_))));
    }
}
