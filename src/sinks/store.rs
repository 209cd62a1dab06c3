use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::Sink;
use crate::config::SinkConfig;

/// Inserts each record as one JSON document into a named collection.
///
/// Documents live in a SQLite file addressed by `uri` (`sqlite://path` or a
/// bare path). The connection is opened on first insert and reused.
pub struct DocumentStoreSink {
    uri: Option<String>,
    database: Option<String>,
    collection: String,
    conn: Mutex<Option<Connection>>,
}

impl DocumentStoreSink {
    #[cfg(test)]
    pub fn new(uri: &str, database: &str, collection: &str) -> Self {
        Self {
            uri: Some(uri.to_string()),
            database: Some(database.to_string()),
            collection: collection.to_string(),
            conn: Mutex::new(None),
        }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self {
            uri: config.uri.clone().filter(|u| !u.is_empty()),
            database: config.database.clone().filter(|d| !d.is_empty()),
            collection: config.collection.clone(),
            conn: Mutex::new(None),
        }
    }

    /// File path behind `uri`. Only `sqlite://` and bare paths are served.
    fn path(&self) -> Result<PathBuf> {
        let uri = self.uri.as_deref().context("'uri' is required")?;
        if let Some(path) = uri.strip_prefix("sqlite://") {
            return Ok(PathBuf::from(path));
        }
        if let Some((scheme, _)) = uri.split_once("://") {
            anyhow::bail!(
                "unsupported document store scheme '{}://' (expected sqlite:// or a file path)",
                scheme
            );
        }
        Ok(PathBuf::from(uri))
    }

    fn open(&self) -> Result<Connection> {
        let path = self.path()?;
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open document store: {}", path.display()))?;

        // journal_mode PRAGMA returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                database TEXT NOT NULL,
                collection TEXT NOT NULL,
                body TEXT NOT NULL,
                inserted_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection
                ON documents(database, collection, inserted_at);
            ",
        )
        .context("Failed to prepare documents table")?;

        info!("Document store opened at: {}", path.display());
        Ok(conn)
    }

    /// Insert one document and return its generated id.
    pub async fn insert(&self, record: &Value) -> Result<String> {
        let database = self.database.as_deref().context("'database' is required")?;
        let body = serde_json::to_string(record).context("Failed to serialize record")?;
        let id = Uuid::new_v4().to_string();

        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        let Some(conn) = guard.as_ref() else {
            anyhow::bail!("Document store connection unavailable");
        };

        conn.execute(
            "INSERT INTO documents (id, database, collection, body, inserted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                &id,
                database,
                &self.collection,
                &body,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to insert into collection '{}'", self.collection))?;

        debug!("Inserted document {} into {}.{}", id, database, self.collection);
        Ok(id)
    }

    /// Load every document of this sink's collection, oldest first.
    #[cfg(test)]
    pub async fn documents(&self) -> Result<Vec<Value>> {
        let database = self.database.as_deref().context("'database' is required")?;
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        let Some(conn) = guard.as_ref() else {
            anyhow::bail!("Document store connection unavailable");
        };

        let mut stmt = conn.prepare(
            "SELECT body FROM documents
             WHERE database = ?1 AND collection = ?2
             ORDER BY inserted_at ASC, rowid ASC",
        )?;
        let bodies = stmt
            .query_map(rusqlite::params![database, &self.collection], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load documents")?;

        bodies
            .iter()
            .map(|b| serde_json::from_str(b).context("Stored document is not valid JSON"))
            .collect()
    }

    #[cfg(test)]
    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }
}

#[async_trait]
impl Sink for DocumentStoreSink {
    fn name(&self) -> &str {
        "document"
    }

    async fn init(&mut self) -> Result<()> {
        if self.uri.is_none() || self.database.is_none() {
            anyhow::bail!("document store requires 'uri' and 'database'");
        }
        self.path().map(|_| ())
    }

    async fn deliver(&self, record: &Value) -> Result<()> {
        self.insert(record).await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.close()
                .map_err(|(_, e)| e)
                .context("Failed to close document store")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_connects_lazily_and_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("sqlite://{}", dir.path().join("docs.db").display());
        let mut sink = DocumentStoreSink::new(&uri, "telegram", "messages");
        sink.init().await.unwrap();
        assert!(!sink.is_connected().await);

        sink.deliver(&json!({"id": 1, "message": "first"})).await.unwrap();
        sink.deliver(&json!({"id": 2, "message": "second"})).await.unwrap();
        assert!(sink.is_connected().await);

        let docs = sink.documents().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["message"], "first");
        assert_eq!(docs[1]["id"], 2);
    }

    #[tokio::test]
    async fn test_collections_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.db");
        let uri = path.display().to_string();
        let a = DocumentStoreSink::new(&uri, "telegram", "a");
        let b = DocumentStoreSink::new(&uri, "telegram", "b");

        a.deliver(&json!({"id": 1})).await.unwrap();
        b.deliver(&json!({"id": 2})).await.unwrap();
        b.deliver(&json!({"id": 3})).await.unwrap();

        assert_eq!(a.documents().await.unwrap().len(), 1);
        assert_eq!(b.documents().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_init_requires_uri_and_database() {
        let mut sink = DocumentStoreSink::from_config(&SinkConfig {
            kind: "document".to_string(),
            uri: Some("docs.db".to_string()),
            ..SinkConfig::default()
        });
        assert!(sink.init().await.is_err());
    }

    #[tokio::test]
    async fn test_init_rejects_foreign_uri_scheme() {
        let mut sink = DocumentStoreSink::from_config(&SinkConfig {
            kind: "mongodb".to_string(),
            uri: Some("mongodb://localhost:27017".to_string()),
            database: Some("telegram".to_string()),
            ..SinkConfig::default()
        });
        let err = sink.init().await.unwrap_err();
        assert!(err.to_string().contains("mongodb://"));
        assert!(!sink.is_connected().await);
    }

    #[tokio::test]
    async fn test_init_accepts_sqlite_uri_and_bare_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.db").display().to_string();
        for uri in [format!("sqlite://{}", path), path] {
            let mut sink = DocumentStoreSink::new(&uri, "telegram", "messages");
            sink.init().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_close_releases_connection() {
        let dir = tempfile::tempdir().unwrap();
        let uri = dir.path().join("docs.db").display().to_string();
        let sink = DocumentStoreSink::new(&uri, "telegram", "messages");
        sink.deliver(&json!({"id": 1})).await.unwrap();
        sink.close().await.unwrap();
        assert!(!sink.is_connected().await);
        sink.close().await.unwrap();
    }
}
