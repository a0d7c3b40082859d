//! Durable session records on disk.
//!
//! One JSON record per session id, versioned and migrated through
//! version-migrate.

use crate::dto::create_session_migrator;
use anyhow::{Context, Result};
use async_trait::async_trait;
use medroute_core::session::{SessionContext, SessionRepository};
use std::path::{Path, PathBuf};
use tokio::fs;
use version_migrate::{
    AppPaths, AsyncDirStorage, DirStorageStrategy, FilenameEncoding, FormatStrategy, PathStrategy,
};

/// Stores each [`SessionContext`] as its own versioned JSON file.
///
/// Session ids are opaque, so file names are URL-encoded ids:
/// ```text
/// base_dir/
/// └── sessions/
///     ├── analyst-1.json
///     └── user%40example.com.json
/// ```
pub struct AsyncDirSessionRepository {
    storage: AsyncDirStorage,
    base_dir: PathBuf,
}

impl AsyncDirSessionRepository {
    /// Creates a repository at the default location (the medroute data directory).
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined or if
    /// the directory structure cannot be created.
    pub async fn default_location() -> Result<Self> {
        use crate::paths::MedroutePaths;
        let base_dir = MedroutePaths::data_dir()
            .map_err(|e| anyhow::anyhow!("Failed to get data directory: {}", e))?;
        Self::new(base_dir).await
    }

    /// Opens (and creates when needed) a repository rooted at `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Directory creation fails
    /// - AsyncDirStorage initialization fails
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();

        fs::create_dir_all(&base_dir)
            .await
            .context("Failed to create base directory")?;

        // CustomBase keeps every record under base_dir
        let paths =
            AppPaths::new("medroute").data_strategy(PathStrategy::CustomBase(base_dir.clone()));

        let migrator = create_session_migrator();

        let strategy = DirStorageStrategy::default()
            .with_format(FormatStrategy::Json)
            .with_filename_encoding(FilenameEncoding::UrlEncode);

        let storage = AsyncDirStorage::new(paths, "sessions", migrator, strategy)
            .await
            .context("Failed to create AsyncDirStorage")?;

        Ok(Self { storage, base_dir })
    }

    /// Directory holding the session files.
    pub fn sessions_dir(&self) -> &Path {
        self.storage.base_path()
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

pub(crate) fn is_missing(error: &str) -> bool {
    error.contains("No such file or directory")
        || error.contains("not found")
        || error.contains("cannot find")
}

#[async_trait]
impl SessionRepository for AsyncDirSessionRepository {
    async fn find_by_id(&self, session_id: &str) -> Result<Option<SessionContext>> {
        match self
            .storage
            .load::<SessionContext>("session", session_id)
            .await
        {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                if is_missing(&e.to_string()) {
                    return Ok(None);
                }
                Err(anyhow::anyhow!(e))
            }
        }
    }

    async fn save(&self, session: &SessionContext) -> Result<()> {
        self.storage
            .save("session", &session.session_id, session)
            .await
            .context("Failed to save session")?;
        tracing::debug!(session_id = %session.session_id, items = session.len(), "Session saved");
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        match self.storage.delete(session_id).await {
            Ok(()) => Ok(()),
            Err(e) if is_missing(&e.to_string()) => Ok(()),
            Err(e) => Err(anyhow::anyhow!(e)).context("Failed to delete session"),
        }
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .storage
            .load_all::<SessionContext>("session")
            .await
            .context("Failed to load all sessions")?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_all(&self) -> Result<Vec<SessionContext>> {
        let mut sessions: Vec<SessionContext> = self
            .storage
            .load_all::<SessionContext>("session")
            .await
            .context("Failed to load all sessions")?
            .into_iter()
            .map(|(_, session)| session)
            .collect();

        // Most recently updated first
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medroute_core::session::{DataItem, Metadata};
    use serde_json::json;
    use tempfile::TempDir;

    async fn repository() -> (TempDir, AsyncDirSessionRepository) {
        let dir = TempDir::new().unwrap();
        let repository = AsyncDirSessionRepository::new(dir.path()).await.unwrap();
        (dir, repository)
    }

    /// Hypertension lookup with one SNOMED code added and removed again.
    fn hypertension_session(id: &str) -> SessionContext {
        let mut session = SessionContext::new(id);
        let mut metadata = Metadata::new();
        metadata.insert("score".to_string(), json!(0.87));
        metadata.insert(
            "full_document".to_string(),
            json!({"CODE": "I10", "STR": "Essential hypertension", "SAB": "ICD10CM"}),
        );
        session.upsert(
            DataItem::new("icd_code", "I10", "Essential hypertension")
                .with_metadata(metadata)
                .with_source_query("hypertension"),
        );
        session.upsert(DataItem::new("snomed_code", "38341003", "Hypertensive disorder"));
        session.remove("38341003");
        session.record_query("hypertension");
        session
    }

    #[tokio::test]
    async fn test_record_round_trips_items_and_audit_log() {
        let (_dir, sessions) = repository().await;
        let session = hypertension_session("analyst-1");

        sessions.save(&session).await.unwrap();

        let loaded = sessions.find_by_id("analyst-1").await.unwrap().unwrap();
        assert_eq!(loaded, session);
        assert_eq!(loaded.modifications.len(), 3);
        assert_eq!(loaded.get("I10").unwrap().metadata["full_document"]["SAB"], "ICD10CM");
    }

    #[tokio::test]
    async fn test_empty_session_round_trips() {
        let (_dir, sessions) = repository().await;
        let session = SessionContext::new("empty");

        sessions.save(&session).await.unwrap();

        let loaded = sessions.find_by_id("empty").await.unwrap().unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn test_listing_is_sorted() {
        let (_dir, sessions) = repository().await;
        for id in ["ward-b", "ward-a", "ward-c"] {
            sessions.save(&hypertension_session(id)).await.unwrap();
        }

        assert_eq!(sessions.list_ids().await.unwrap(), vec!["ward-a", "ward-b", "ward-c"]);
        let all = sessions.list_all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].updated_at >= w[1].updated_at));
    }

    #[tokio::test]
    async fn test_ids_with_reserved_characters_round_trip() {
        let (_dir, sessions) = repository().await;
        let ids = ["user@example.com", "chat:42", "session.1", "chat 7", "ward/b"];
        for id in ids {
            sessions.save(&hypertension_session(id)).await.unwrap();
        }

        for id in ids {
            let loaded = sessions.find_by_id(id).await.unwrap().unwrap();
            assert_eq!(loaded.session_id, id);
            assert!(loaded.get("I10").is_some());
        }
        let mut expected: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        expected.sort();
        assert_eq!(sessions.list_ids().await.unwrap(), expected);

        sessions.delete("user@example.com").await.unwrap();
        assert_eq!(sessions.find_by_id("user@example.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_then_missing_is_none() {
        let (_dir, sessions) = repository().await;
        sessions.save(&hypertension_session("expired")).await.unwrap();

        sessions.delete("expired").await.unwrap();

        assert_eq!(sessions.find_by_id("expired").await.unwrap(), None);
        assert_eq!(sessions.find_by_id("never-saved").await.unwrap(), None);
        // Deleting twice is not an error.
        sessions.delete("expired").await.unwrap();
    }
}
