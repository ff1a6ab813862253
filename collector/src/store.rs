use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use relay_common::Reading;

pub type Document = Map<String, Value>;

/// The latest reading document.
///
/// Readers get a copy; writers replace the whole document while holding the
/// write lock, including the file write when persistence is enabled.
#[derive(Clone)]
pub struct ReadingStore {
    current: Arc<RwLock<Document>>,
    file: Option<Arc<PathBuf>>,
}

impl ReadingStore {
    pub fn in_memory() -> Self {
        Self {
            current: Arc::new(RwLock::new(Reading::waiting().to_document())),
            file: None,
        }
    }

    pub async fn file_backed(path: PathBuf) -> Self {
        let initial = match load_document(&path).await {
            Ok(Some(document)) => {
                info!("restored latest reading from {}", path.display());
                document
            }
            Ok(None) => Reading::waiting().to_document(),
            Err(err) => {
                warn!("ignoring stored reading at {}: {err:#}", path.display());
                Reading::waiting().to_document()
            }
        };

        Self {
            current: Arc::new(RwLock::new(initial)),
            file: Some(Arc::new(path)),
        }
    }

    pub async fn snapshot(&self) -> Document {
        self.current.read().await.clone()
    }

    pub async fn replace(&self, document: Document) -> anyhow::Result<()> {
        let mut current = self.current.write().await;
        if let Some(path) = &self.file {
            save_document(path, &document).await?;
        }
        *current = document;
        Ok(())
    }
}

async fn load_document(path: &Path) -> anyhow::Result<Option<Document>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    match serde_json::from_slice::<Value>(&raw).context("stored reading is not valid JSON")? {
        Value::Object(document) => Ok(Some(document)),
        _ => anyhow::bail!("stored reading is not a JSON object"),
    }
}

async fn save_document(path: &Path, document: &Document) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let staging = path.with_extension("json.tmp");
    let payload = serde_json::to_vec_pretty(document)?;
    tokio::fs::write(&staging, payload)
        .await
        .with_context(|| format!("failed to write {}", staging.display()))?;
    tokio::fs::rename(&staging, path)
        .await
        .with_context(|| format!("failed to move reading into {}", path.display()))?;
    Ok(())
}
