//! Durable conversation histories on disk.

use crate::async_dir_session_repository::is_missing;
use crate::dto::create_history_migrator;
use anyhow::{Context, Result};
use async_trait::async_trait;
use medroute_core::session::{ConversationRecord, HistoryRepository};
use std::path::{Path, PathBuf};
use tokio::fs;
use version_migrate::{
    AppPaths, AsyncDirStorage, DirStorageStrategy, FilenameEncoding, FormatStrategy, PathStrategy,
};

/// One versioned JSON file per session under `base_dir/histories/`.
///
/// File names are URL-encoded session ids, matching the session records.
pub struct AsyncDirHistoryRepository {
    storage: AsyncDirStorage,
    base_dir: PathBuf,
}

impl AsyncDirHistoryRepository {
    /// Creates a repository under the medroute data directory.
    pub async fn default_location() -> Result<Self> {
        use crate::paths::MedroutePaths;
        let base_dir = MedroutePaths::data_dir()
            .map_err(|e| anyhow::anyhow!("Failed to get data directory: {}", e))?;
        Self::new(base_dir).await
    }

    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)
            .await
            .context("Failed to create base directory")?;

        let paths =
            AppPaths::new("medroute").data_strategy(PathStrategy::CustomBase(base_dir.clone()));
        let strategy = DirStorageStrategy::default()
            .with_format(FormatStrategy::Json)
            .with_filename_encoding(FilenameEncoding::UrlEncode);

        let storage = AsyncDirStorage::new(paths, "histories", create_history_migrator(), strategy)
            .await
            .context("Failed to create history storage")?;

        Ok(Self { storage, base_dir })
    }

    pub fn histories_dir(&self) -> &Path {
        self.storage.base_path()
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[async_trait]
impl HistoryRepository for AsyncDirHistoryRepository {
    async fn find_history(&self, session_id: &str) -> Result<Option<ConversationRecord>> {
        match self
            .storage
            .load::<ConversationRecord>("conversation", session_id)
            .await
        {
            Ok(record) => Ok(Some(record)),
            Err(e) if is_missing(&e.to_string()) => Ok(None),
            Err(e) => Err(anyhow::anyhow!(e)).context("Failed to load conversation history"),
        }
    }

    async fn save_history(&self, record: &ConversationRecord) -> Result<()> {
        self.storage
            .save("conversation", &record.session_id, record)
            .await
            .context("Failed to save conversation history")?;
        tracing::debug!(
            session_id = %record.session_id,
            messages = record.messages.len(),
            "Conversation history saved"
        );
        Ok(())
    }

    async fn delete_history(&self, session_id: &str) -> Result<()> {
        match self.storage.delete(session_id).await {
            Ok(()) => Ok(()),
            Err(e) if is_missing(&e.to_string()) => Ok(()),
            Err(e) => Err(anyhow::anyhow!(e)).context("Failed to delete conversation history"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medroute_core::session::ConversationHistory;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let mut history = ConversationHistory::new(20);
        history.push_user("find icd codes for asthma");
        history.push_assistant("Asthma is coded as [J45.909].");

        {
            let histories = AsyncDirHistoryRepository::new(dir.path()).await.unwrap();
            histories
                .save_history(&history.to_record("user@example.com"))
                .await
                .unwrap();
        }

        let reopened = AsyncDirHistoryRepository::new(dir.path()).await.unwrap();
        let record = reopened
            .find_history("user@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.messages[1].content, "Asthma is coded as [J45.909].");
        assert!(reopened.histories_dir().ends_with("histories"));
    }

    #[tokio::test]
    async fn test_missing_and_deleted_history_is_none() {
        let dir = TempDir::new().unwrap();
        let histories = AsyncDirHistoryRepository::new(dir.path()).await.unwrap();
        assert_eq!(histories.find_history("nobody").await.unwrap(), None);

        let mut history = ConversationHistory::default();
        history.push_user("hello");
        histories.save_history(&history.to_record("s1")).await.unwrap();
        histories.delete_history("s1").await.unwrap();

        assert_eq!(histories.find_history("s1").await.unwrap(), None);
        histories.delete_history("s1").await.unwrap();
    }
}
