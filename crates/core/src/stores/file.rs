use crate::error::StoreError;
use crate::models::Session;
use crate::traits::{PdfBlobStore, SessionStore};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

const SESSIONS_DIR: &str = "sessions";
const UPLOADS_DIR: &str = "uploads";

pub struct FileSessionStore {
    data_dir: PathBuf,
    writes: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            writes: Mutex::new(()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn new_session_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        validate_session_id(session_id)?;
        Ok(self
            .data_dir
            .join(SESSIONS_DIR)
            .join(format!("{session_id}.json")))
    }

    fn upload_path(&self, session_id: &str, filename: &str) -> Result<PathBuf, StoreError> {
        validate_session_id(session_id)?;
        validate_filename(filename)?;
        Ok(self.data_dir.join(UPLOADS_DIR).join(session_id).join(filename))
    }

    async fn read_session(&self, path: &Path) -> Result<Option<Session>, StoreError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn write_session(&self, path: &Path, session: &Session) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let staged = path.with_extension("json.tmp");
        fs::write(&staged, serde_json::to_vec_pretty(session)?).await?;
        fs::rename(&staged, path).await?;
        Ok(())
    }
}

pub fn validate_session_id(session_id: &str) -> Result<(), StoreError> {
    Uuid::parse_str(session_id)
        .map(|_| ())
        .map_err(|_| StoreError::InvalidKey(format!("not a session id: {session_id}")))
}

fn validate_filename(filename: &str) -> Result<(), StoreError> {
    let invalid = filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StoreError::InvalidKey(format!("not a file name: {filename}")));
    }
    Ok(())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let path = self.session_path(session_id)?;
        self.read_session(&path).await
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let path = self.session_path(&session.session_id)?;
        let _guard = self.writes.lock().await;
        self.write_session(&path, session).await?;
        debug!(session = %session.session_id, documents = session.documents.len(), "session saved");
        Ok(())
    }

    async fn add_session_cost(&self, session_id: &str, cost: f64) -> Result<f64, StoreError> {
        let path = self.session_path(session_id)?;
        let _guard = self.writes.lock().await;
        let mut session = self
            .read_session(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        session.total_session_cost += cost;
        self.write_session(&path, &session).await?;
        Ok(session.total_session_cost)
    }
}

#[async_trait]
impl PdfBlobStore for FileSessionStore {
    async fn put_pdf(
        &self,
        session_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let path = self.upload_path(session_id, filename)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get_pdf(
        &self,
        session_id: &str,
        filename: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.upload_path(session_id, filename)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn remove_pdf(&self, session_id: &str, filename: &str) -> Result<(), StoreError> {
        let path = self.upload_path(session_id, filename)?;
        match fs::remove_file(&path).await {
            Err(error) if error.kind() != ErrorKind::NotFound => Err(error.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, Page};
    use std::error::Error;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn sessions_round_trip_through_disk() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let store = FileSessionStore::new(dir.path());
        let id = FileSessionStore::new_session_id();

        let mut session = Session::new(id.clone(), "annual reports");
        session.documents = vec![Document::new(1, "a.pdf", vec![Page::new(1, "hello")])];
        store.save(&session).await?;

        let loaded = store.get(&id).await?.ok_or("session missing")?;
        assert_eq!(loaded.description, "annual reports");
        assert_eq!(loaded.documents, session.documents);
        assert!(dir.path().join("sessions").join(format!("{id}.json")).exists());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_session_is_none_and_bad_ids_are_rejected() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let store = FileSessionStore::new(dir.path());

        assert!(store.get(&FileSessionStore::new_session_id()).await?.is_none());
        assert!(matches!(
            store.get("../../etc/passwd").await,
            Err(StoreError::InvalidKey(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_cost_updates_are_not_lost() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let store = Arc::new(FileSessionStore::new(dir.path()));
        let id = FileSessionStore::new_session_id();
        store.save(&Session::new(id.clone(), "d")).await?;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let id = id.clone();
            tasks.push(tokio::spawn(async move { store.add_session_cost(&id, 0.5).await }));
        }
        for task in tasks {
            task.await??;
        }

        let session = store.get(&id).await?.ok_or("session missing")?;
        assert_eq!(session.total_session_cost, 4.0);
        Ok(())
    }

    #[tokio::test]
    async fn cost_on_missing_session_is_not_found() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let store = FileSessionStore::new(dir.path());
        let result = store
            .add_session_cost(&FileSessionStore::new_session_id(), 1.0)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn pdf_blobs_are_scoped_to_their_session() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let store = FileSessionStore::new(dir.path());
        let id = FileSessionStore::new_session_id();

        store.put_pdf(&id, "report.pdf", b"%PDF-1.4").await?;
        assert_eq!(store.get_pdf(&id, "report.pdf").await?, Some(b"%PDF-1.4".to_vec()));
        assert_eq!(store.get_pdf(&id, "other.pdf").await?, None);
        assert!(store.put_pdf(&id, "../escape.pdf", b"x").await.is_err());

        store.remove_pdf(&id, "report.pdf").await?;
        assert_eq!(store.get_pdf(&id, "report.pdf").await?, None);
        store.remove_pdf(&id, "report.pdf").await?;
        Ok(())
    }
}
