//! Directory-backed mail store, the local mock for a remote mail server.
//!
//! Layout under `root`: one directory per container, one `<uid>.eml` MIME file
//! per message and a `.next_uid` counter. Deleting a message renames it to
//! `<uid>.eml.deleted`; expunge removes those files.

use super::mime;
use super::{ContainerHandle, MailStore, Message, MessageSummary, RemoteId, StoreError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tokio::{fs, io::AsyncWriteExt};

const NEXT_UID_FILE: &str = ".next_uid";
const MESSAGE_EXT: &str = "eml";
const DELETED_SUFFIX: &str = ".deleted";

pub struct LocalMailStore {
    root: PathBuf,
    // serializes uid allocation
    append_lock: Mutex<()>,
}

impl LocalMailStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
            return Err(StoreError::Backend(format!(
                "container name {name:?} cannot be stored locally"
            )));
        }
        Ok(self.root.join(name))
    }

    async fn existing_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        let dir = self.dir_for(name)?;
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(StoreError::ContainerNotFound(name.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ContainerNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn message_path(dir: &Path, uid: RemoteId) -> PathBuf {
        dir.join(format!("{uid}.{MESSAGE_EXT}"))
    }

    async fn live_uids(dir: &Path) -> Result<Vec<RemoteId>, StoreError> {
        let mut uids = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(&format!(".{MESSAGE_EXT}")) else {
                continue;
            };
            if let Ok(uid) = stem.parse::<u32>() {
                uids.push(RemoteId(uid));
            }
        }
        uids.sort();
        Ok(uids)
    }

    async fn read_message(dir: &Path, uid: RemoteId) -> Result<Message, StoreError> {
        let raw = fs::read_to_string(Self::message_path(dir, uid)).await?;
        mime::parse(&raw)
    }

    /// Listing entry for one message. Only the header block is decoded.
    async fn read_summary(dir: &Path, uid: RemoteId) -> Result<MessageSummary, StoreError> {
        let raw = fs::read_to_string(Self::message_path(dir, uid)).await?;
        let head = mime::parse_head(&raw)?;
        Ok(MessageSummary {
            uid,
            subject: head.subject,
            headers: head.headers,
            date: head.date,
            raw_size: raw.len() as u64,
        })
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("tmp");
        let mut f = fs::File::create(&tmp).await?;
        f.write_all(data).await?;
        f.flush().await?;
        f.sync_all().await?;
        drop(f);
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl MailStore for LocalMailStore {
    async fn list_containers(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn create_container(&self, name: &str) -> Result<ContainerHandle, StoreError> {
        let dir = self.dir_for(name)?;
        fs::create_dir_all(&self.root).await?;
        match fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::ContainerExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        Self::write_atomic(&dir.join(NEXT_UID_FILE), b"1").await?;
        Ok(ContainerHandle::new(name))
    }

    async fn open_container(&self, name: &str) -> Result<ContainerHandle, StoreError> {
        self.existing_dir(name).await?;
        Ok(ContainerHandle::new(name))
    }

    async fn list_messages(
        &self,
        container: &ContainerHandle,
    ) -> Result<Vec<MessageSummary>, StoreError> {
        let dir = self.existing_dir(container.name()).await?;
        let mut out = Vec::new();
        for uid in Self::live_uids(&dir).await? {
            out.push(Self::read_summary(&dir, uid).await?);
        }
        Ok(out)
    }

    async fn first_message(
        &self,
        container: &ContainerHandle,
    ) -> Result<Option<MessageSummary>, StoreError> {
        let dir = self.existing_dir(container.name()).await?;
        match Self::live_uids(&dir).await?.first() {
            Some(uid) => Ok(Some(Self::read_summary(&dir, *uid).await?)),
            None => Ok(None),
        }
    }

    async fn fetch_message(
        &self,
        container: &ContainerHandle,
        uid: RemoteId,
    ) -> Result<Message, StoreError> {
        let dir = self.existing_dir(container.name()).await?;
        match Self::read_message(&dir, uid).await {
            Ok(message) => Ok(message),
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::MessageNotFound {
                    container: container.name().to_string(),
                    uid,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn append_message(
        &self,
        container: &ContainerHandle,
        message: &Message,
    ) -> Result<RemoteId, StoreError> {
        let dir = self.existing_dir(container.name()).await?;
        let _guard = self.append_lock.lock().await;
        let counter = dir.join(NEXT_UID_FILE);
        let next = fs::read_to_string(&counter)
            .await?
            .trim()
            .parse::<u32>()
            .map_err(|e| StoreError::Malformed(format!("bad uid counter: {e}")))?;
        let uid = RemoteId(next);
        Self::write_atomic(&Self::message_path(&dir, uid), mime::render(message).as_bytes())
            .await?;
        Self::write_atomic(&counter, (next + 1).to_string().as_bytes()).await?;
        tracing::debug!("stored message {uid} in {}", container.name());
        Ok(uid)
    }

    async fn delete_message(
        &self,
        container: &ContainerHandle,
        uid: RemoteId,
    ) -> Result<(), StoreError> {
        let dir = self.existing_dir(container.name()).await?;
        let path = Self::message_path(&dir, uid);
        let flagged = PathBuf::from(format!("{}{DELETED_SUFFIX}", path.display()));
        match fs::rename(&path, &flagged).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::MessageNotFound {
                    container: container.name().to_string(),
                    uid,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn expunge(&self, container: &ContainerHandle) -> Result<(), StoreError> {
        let dir = self.existing_dir(container.name()).await?;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let is_flagged = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.ends_with(DELETED_SUFFIX));
            if is_flagged {
                fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }
}
