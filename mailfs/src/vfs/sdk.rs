//! Application-facing client: whole-file helpers on top of [`MailFs`].
//!
//! - `mkdir_p` creates every missing directory along a path
//! - `write_file` / `read_file` move a whole file and commit it in one call
//! - `LocalClient` opens a directory-backed store

use std::path::Path;

use crate::config::MailFsConfig;
use crate::error::{MailFsError, Result};
use crate::store::MailStore;
use crate::store::local::LocalMailStore;
use crate::vfs::fs::{DirEntry, MailFs};
use crate::vfs::tree::{FileAttr, FileType, split_path};

const REGULAR_FILE: u32 = libc::S_IFREG as u32;

pub struct Client<S: MailStore> {
    fs: MailFs<S>,
}

impl<S: MailStore> Client<S> {
    pub async fn connect(store: S, config: MailFsConfig) -> Result<Self> {
        Ok(Self {
            fs: MailFs::connect(store, config).await?,
        })
    }

    pub fn fs(&self) -> &MailFs<S> {
        &self.fs
    }

    pub async fn mkdir_p(&self, path: &str) -> Result<()> {
        let mut cur = String::new();
        for seg in split_path(path) {
            cur.push('/');
            cur.push_str(seg);
            match self.fs.mkdir(&cur, self.fs.config().dir_mode).await {
                Ok(_) | Err(MailFsError::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
            if self.fs.getattr(&cur).await?.kind != FileType::Dir {
                return Err(MailFsError::NotADirectory(cur));
            }
        }
        Ok(())
    }

    pub async fn create(&self, path: &str) -> Result<()> {
        let mode = REGULAR_FILE | self.fs.config().file_mode;
        self.fs.create(path, mode).await?;
        Ok(())
    }

    pub async fn write_at(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize> {
        self.fs.write(path, data, offset).await
    }

    pub async fn read_at(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.fs.read(path, len, offset).await
    }

    /// Replaces the content of `path` (creating it if needed) and commits it.
    /// Existing bytes past the end of `data` are kept, as with a plain write.
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        match self.create(path).await {
            Ok(()) | Err(MailFsError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
        self.fs.write(path, data, 0).await?;
        self.fs.release(path).await
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let size = self.fs.getattr(path).await?.size;
        let len = usize::try_from(size)
            .map_err(|_| MailFsError::invalid(format!("{path} is too large to read at once")))?;
        let data = self.fs.read(path, len, 0).await?;
        self.fs.release(path).await?;
        Ok(data)
    }

    pub async fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.fs.readdir(path, 0).await
    }

    pub async fn stat(&self, path: &str) -> Result<FileAttr> {
        self.fs.getattr(path).await
    }

    pub async fn sync(&self, path: &str) -> Result<()> {
        self.fs.fsync(path).await
    }

    pub async fn unlink(&self, path: &str) -> Result<()> {
        self.fs.unlink(path).await
    }
}

pub type LocalClient = Client<LocalMailStore>;

impl LocalClient {
    pub async fn open_local<P: AsRef<Path>>(root: P, config: MailFsConfig) -> Result<Self> {
        Client::connect(LocalMailStore::new(root), config).await
    }
}
