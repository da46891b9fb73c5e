use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CheckpointHandle, CheckpointSource, ThreadStore};
use crate::errors::{ChatError, ChatResult};
use crate::models::message::Message;
use crate::models::thread::{derive_title, ThreadSummary, DEFAULT_TITLE};

const LOG_EXTENSION: &str = "jsonl";
const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ThreadMeta {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    explicit_title: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    updated_at: DateTime<Utc>,
    sequence: u64,
}

impl ThreadMeta {
    fn summary(&self) -> ThreadSummary {
        ThreadSummary {
            id: self.id.clone(),
            title: self.title.clone().unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            updated_at: self.updated_at,
        }
    }
}

struct Shared {
    dir: PathBuf,
}

impl Shared {
    fn log_path(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", thread_id, LOG_EXTENSION))
    }

    fn meta_path(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", thread_id, META_SUFFIX))
    }

    async fn read_meta(&self, thread_id: &str) -> ChatResult<ThreadMeta> {
        if !is_valid_id(thread_id) {
            return Err(ChatError::ThreadNotFound(thread_id.to_string()));
        }
        match fs::read(self.meta_path(thread_id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ChatError::ThreadNotFound(thread_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_meta(&self, meta: &ThreadMeta) -> ChatResult<()> {
        let bytes = serde_json::to_vec_pretty(meta)?;
        write_atomically(&self.meta_path(&meta.id), &bytes).await
    }

    async fn read_log(&self, thread_id: &str) -> ChatResult<Vec<Message>> {
        parse_log(&self.read_log_bytes(thread_id).await?)
    }

    async fn read_log_bytes(&self, thread_id: &str) -> ChatResult<Vec<u8>> {
        match fs::read(self.log_path(thread_id)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace a thread's log and metadata as one unit. Both files are staged before either is
    /// renamed into place; when the metadata cannot be moved the previous log is put back.
    async fn commit(&self, meta: &ThreadMeta, log: &[u8], previous_log: &[u8]) -> ChatResult<()> {
        let meta_bytes = serde_json::to_vec_pretty(meta)?;
        let log_path = self.log_path(&meta.id);
        let meta_path = self.meta_path(&meta.id);

        let log_tmp = stage(&log_path, log).await?;
        let meta_tmp = match stage(&meta_path, &meta_bytes).await {
            Ok(tmp) => tmp,
            Err(e) => {
                discard(&log_tmp).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&log_tmp, &log_path).await {
            discard(&log_tmp).await;
            discard(&meta_tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&meta_tmp, &meta_path).await {
            discard(&meta_tmp).await;
            if let Err(restore) = write_atomically(&log_path, previous_log).await {
                tracing::error!("Failed to restore the log of thread {}: {}", meta.id, restore);
            }
            return Err(e.into());
        }
        Ok(())
    }
}

fn parse_log(bytes: &[u8]) -> ChatResult<Vec<Message>> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str::<Message>(line).map_err(ChatError::from))
        .collect()
}

#[async_trait]
impl CheckpointSource for Shared {
    async fn history(&self, thread_id: &str) -> ChatResult<Vec<Message>> {
        self.read_meta(thread_id).await?;
        self.read_log(thread_id).await
    }
}

/// Thread storage in a single directory: per thread a `<id>.jsonl` message log and a
/// `<id>.meta.json` metadata file. Every write goes to a temporary file that is renamed into
/// place, so an interrupted append leaves the previous log intact.
pub struct FileThreadStore {
    shared: Arc<Shared>,
    // Serializes writers and carries the last issued list-ordering sequence.
    writer: Mutex<u64>,
}

impl FileThreadStore {
    pub async fn open(dir: impl Into<PathBuf>) -> ChatResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut sequence = 0;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(META_SUFFIX)) else {
                continue;
            };
            let bytes = fs::read(entry.path()).await?;
            match serde_json::from_slice::<ThreadMeta>(&bytes) {
                Ok(meta) => sequence = sequence.max(meta.sequence),
                Err(e) => tracing::warn!("Skipping unreadable thread metadata for {}: {}", id, e),
            }
        }

        tracing::debug!("Opened thread store at {}", dir.display());
        Ok(Self {
            shared: Arc::new(Shared { dir }),
            writer: Mutex::new(sequence),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    fn handle(&self, thread_id: &str) -> CheckpointHandle {
        CheckpointHandle::new(thread_id, self.shared.clone())
    }
}

#[async_trait]
impl ThreadStore for FileThreadStore {
    async fn create(&self) -> ChatResult<(ThreadSummary, CheckpointHandle)> {
        let mut sequence = self.writer.lock().await;
        *sequence += 1;

        let now = Utc::now();
        let meta = ThreadMeta {
            id: Uuid::new_v4().to_string(),
            title: None,
            explicit_title: false,
            created_at: now,
            updated_at: now,
            sequence: *sequence,
        };
        write_atomically(&self.shared.log_path(&meta.id), b"").await?;
        self.shared.write_meta(&meta).await?;
        Ok((meta.summary(), self.handle(&meta.id)))
    }

    async fn append(&self, thread_id: &str, messages: &[Message]) -> ChatResult<ThreadSummary> {
        let mut sequence = self.writer.lock().await;
        let mut meta = self.shared.read_meta(thread_id).await?;
        let previous = self.shared.read_log_bytes(thread_id).await?;

        let mut content = previous.clone();
        for message in messages {
            serde_json::to_writer(&mut content, message)?;
            content.push(b'\n');
        }

        if !meta.explicit_title {
            meta.title = derive_title(&parse_log(&content)?);
        }
        meta.updated_at = Utc::now();
        meta.sequence = *sequence + 1;
        self.shared.commit(&meta, &content, &previous).await?;
        *sequence += 1;
        Ok(meta.summary())
    }

    async fn load(&self, thread_id: &str) -> ChatResult<Vec<Message>> {
        self.shared.history(thread_id).await
    }

    async fn summary(&self, thread_id: &str) -> ChatResult<ThreadSummary> {
        Ok(self.shared.read_meta(thread_id).await?.summary())
    }

    async fn list(&self) -> ChatResult<Vec<ThreadSummary>> {
        let mut metas = Vec::new();
        let mut entries = fs::read_dir(&self.shared.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|n| n.strip_suffix(META_SUFFIX)) {
                match self.shared.read_meta(id).await {
                    Ok(meta) => metas.push(meta),
                    // Deleted between read_dir and read.
                    Err(ChatError::ThreadNotFound(_)) => continue,
                    Err(e) => return Err(e),
                }
            }
        }
        metas.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        Ok(metas.iter().map(ThreadMeta::summary).collect())
    }

    async fn delete(&self, thread_id: &str) -> ChatResult<()> {
        let _guard = self.writer.lock().await;
        self.shared.read_meta(thread_id).await?;
        fs::remove_file(self.shared.meta_path(thread_id)).await?;
        match fs::remove_file(self.shared.log_path(thread_id)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn set_title(&self, thread_id: &str, title: &str) -> ChatResult<ThreadSummary> {
        let _guard = self.writer.lock().await;
        let mut meta = self.shared.read_meta(thread_id).await?;
        meta.title = Some(title.to_string());
        meta.explicit_title = true;
        self.shared.write_meta(&meta).await?;
        Ok(meta.summary())
    }

    async fn checkpoint(&self, thread_id: &str) -> ChatResult<CheckpointHandle> {
        self.shared.read_meta(thread_id).await?;
        Ok(self.handle(thread_id))
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> ChatResult<()> {
    let tmp = stage(path, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        discard(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Write `bytes` next to `path`, ready to be renamed over it.
async fn stage(path: &Path, bytes: &[u8]) -> ChatResult<PathBuf> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    Ok(tmp)
}

async fn discard(tmp: &Path) {
    if let Err(e) = fs::remove_file(tmp).await {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!("Could not remove {}: {}", tmp.display(), e);
        }
    }
}
