//! `StateBackend` implementations.

use crate::backend::{BackendError, StateBackend};
use async_trait::async_trait;
use scribe_common::protocol::PersistedState;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// In-process storage. Clones share the same state, so several recording
/// contexts can observe each other the way tabs share extension storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateBackend {
    inner: Arc<Mutex<PersistedState>>,
}

impl MemoryStateBackend {
    pub fn new(initial: PersistedState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn snapshot(&self) -> PersistedState {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn load(&self) -> Result<PersistedState, BackendError> {
        Ok(self.snapshot())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), BackendError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = state.clone();
        Ok(())
    }
}

/// JSON file storage. A missing file loads as the empty state.
#[derive(Debug, Clone)]
pub struct FileStateBackend {
    path: PathBuf,
}

impl FileStateBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateBackend for FileStateBackend {
    async fn load(&self) -> Result<PersistedState, BackendError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<(), BackendError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), steps = state.steps.len(), "State saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_common::protocol::ContextId;

    #[tokio::test]
    async fn memory_clones_share_state() {
        let a = MemoryStateBackend::default();
        let b = a.clone();
        a.save(&PersistedState {
            is_recording: true,
            owner_context_id: Some(ContextId(3)),
            ..Default::default()
        })
        .await
        .unwrap();
        let seen = b.load().await.unwrap();
        assert!(seen.is_recording);
        assert_eq!(seen.owner_context_id, Some(ContextId(3)));
    }

    #[tokio::test]
    async fn file_round_trip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileStateBackend::new(dir.path().join("nested/state.json"));
        assert_eq!(backend.load().await.unwrap(), PersistedState::default());

        let state = PersistedState {
            is_recording: true,
            navigation_flag: true,
            navigation_flag_timestamp: Some(42),
            ..Default::default()
        };
        backend.save(&state).await.unwrap();
        assert_eq!(backend.load().await.unwrap(), state);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let err = FileStateBackend::new(&path).load().await.unwrap_err();
        assert!(matches!(err, BackendError::Serialization(_)));
    }
}
