//! Path-addressed filesystem surface over a [`MailStore`].
//!
//! Every call takes the tree lock for its whole duration, remote round trips
//! included, so calls are applied one at a time in lock order.

use std::time::SystemTime;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::config::MailFsConfig;
use crate::error::{MailFsError, Result};
use crate::remote::RemoteMap;
use crate::store::MailStore;
use crate::vfs::tree::{
    BLOCK_SIZE, DirState, FileAttr, FileState, NodeId, NodeKind, PathTree, normalize,
};
use crate::writeback;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub attr: FileAttr,
}

/// Fixed filesystem statistics; the remote store has no notion of capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatFs {
    pub bsize: u32,
    pub frsize: u32,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub namemax: u32,
}

impl Default for StatFs {
    fn default() -> Self {
        Self {
            bsize: BLOCK_SIZE,
            frsize: BLOCK_SIZE,
            blocks: u64::MAX / u64::from(BLOCK_SIZE),
            bfree: u64::MAX / u64::from(BLOCK_SIZE),
            bavail: u64::MAX / u64::from(BLOCK_SIZE),
            files: u64::MAX,
            ffree: u64::MAX,
            namemax: 255,
        }
    }
}

pub struct MailFs<S: MailStore> {
    remote: RemoteMap<S>,
    tree: Mutex<PathTree>,
}

impl<S: MailStore> MailFs<S> {
    /// Opens (or initialises) the store and builds the root node.
    pub async fn connect(store: S, config: MailFsConfig) -> Result<Self> {
        let eager = config.eager_bootstrap;
        let remote = RemoteMap::new(store, config);
        let root = remote.ensure_root().await?;
        let cfg = remote.config();
        let attr = FileAttr::dir(cfg.dir_mode, cfg.owner, SystemTime::now());
        let mut tree = PathTree::new(attr, DirState::new(Some(root)));
        if eager {
            remote.bootstrap(&mut tree).await?;
        }
        info!("mailfs connected, prefix {}", cfg.container_prefix);
        Ok(Self {
            remote,
            tree: Mutex::new(tree),
        })
    }

    pub fn store(&self) -> &S {
        self.remote.store()
    }

    pub fn config(&self) -> &MailFsConfig {
        self.remote.config()
    }

    fn check_ignored(&self, path: &str) -> Result<()> {
        if self.config().is_ignored(path) {
            return Err(MailFsError::not_found(path));
        }
        Ok(())
    }

    async fn lookup(&self, tree: &mut PathTree, path: &str) -> Result<NodeId> {
        self.remote.resolve(tree, path).await
    }

    async fn lookup_file(&self, tree: &mut PathTree, path: &str) -> Result<NodeId> {
        let id = self.lookup(tree, path).await?;
        if tree.node(id)?.is_dir() {
            return Err(MailFsError::IsADirectory(path.to_string()));
        }
        Ok(id)
    }

    #[instrument(name = "MailFs::getattr", skip(self))]
    pub async fn getattr(&self, path: &str) -> Result<FileAttr> {
        let path = normalize(path);
        self.check_ignored(&path)?;
        let mut tree = self.tree.lock().await;
        let id = self.lookup(&mut tree, &path).await?;
        Ok(tree.node(id)?.attr.clone())
    }

    /// Lists a directory in name order, skipping the first `offset` entries.
    #[instrument(name = "MailFs::readdir", skip(self))]
    pub async fn readdir(&self, path: &str, offset: usize) -> Result<Vec<DirEntry>> {
        let path = normalize(path);
        let mut tree = self.tree.lock().await;
        let id = self.lookup(&mut tree, &path).await?;
        if !tree.node(id)?.is_dir() {
            return Err(MailFsError::NotADirectory(path));
        }
        self.remote.populate_children(&mut tree, id).await?;
        let mut entries = Vec::new();
        for (name, child) in tree.children(id).into_iter().skip(offset) {
            let attr = tree.node(child)?.attr.clone();
            entries.push(DirEntry { name, attr });
        }
        Ok(entries)
    }

    /// Creates an empty file. Nothing reaches the store until the first commit.
    #[instrument(name = "MailFs::create", skip(self))]
    pub async fn create(&self, path: &str, mode: u32) -> Result<FileAttr> {
        let path = normalize(path);
        if mode & libc::S_IFMT as u32 != libc::S_IFREG as u32 {
            return Err(MailFsError::invalid(format!(
                "mode {mode:o} does not request a regular file"
            )));
        }
        let mut tree = self.tree.lock().await;
        if path == "/" {
            return Err(MailFsError::already_exists(path));
        }
        let (parent, name) = self.remote.resolve_parent(&mut tree, &path).await?;
        if name.contains(self.config().separator) {
            return Err(MailFsError::invalid(format!(
                "name {name:?} contains the reserved character {:?}",
                self.config().separator
            )));
        }
        let cfg = self.config();
        let attr = FileAttr::file(mode, cfg.owner, 0, SystemTime::now());
        let state = FileState {
            buffer: Some(Vec::new()),
            ..Default::default()
        };
        let id = tree.insert_child(parent, &name, attr, NodeKind::File(state))?;
        info!("created {path}");
        Ok(tree.node(id)?.attr.clone())
    }

    #[instrument(name = "MailFs::mkdir", skip(self))]
    pub async fn mkdir(&self, path: &str, mode: u32) -> Result<FileAttr> {
        let path = normalize(path);
        let mut tree = self.tree.lock().await;
        if path == "/" {
            return Err(MailFsError::already_exists(path));
        }
        let (parent, name) = self.remote.resolve_parent(&mut tree, &path).await?;
        if tree.child(parent, &name).is_some() {
            return Err(MailFsError::already_exists(path));
        }
        let container = self.remote.create_container(&path).await?;
        let cfg = self.config();
        let attr = FileAttr::dir(mode, cfg.owner, SystemTime::now());
        let id = tree.insert_child(
            parent,
            &name,
            attr,
            NodeKind::Dir(DirState::populated(container)),
        )?;
        info!("created directory {path}");
        Ok(tree.node(id)?.attr.clone())
    }

    #[instrument(name = "MailFs::read", skip(self))]
    pub async fn read(&self, path: &str, size: usize, offset: u64) -> Result<Vec<u8>> {
        let path = normalize(path);
        let mut tree = self.tree.lock().await;
        let id = self.lookup_file(&mut tree, &path).await?;
        writeback::ensure_resident(&self.remote, &mut tree, id).await?;
        writeback::read(&tree, id, size, offset)
    }

    #[instrument(name = "MailFs::write", skip(self, data), fields(len = data.len()))]
    pub async fn write(&self, path: &str, data: &[u8], offset: u64) -> Result<usize> {
        let path = normalize(path);
        let mut tree = self.tree.lock().await;
        let id = self.lookup_file(&mut tree, &path).await?;
        writeback::ensure_resident(&self.remote, &mut tree, id).await?;
        writeback::write(&mut tree, id, data, offset, self.config().max_file_size)
    }

    /// Accepted without resizing anything.
    #[instrument(name = "MailFs::truncate", skip(self))]
    pub async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        let path = normalize(path);
        let mut tree = self.tree.lock().await;
        self.lookup_file(&mut tree, &path).await?;
        debug!("truncate of {path} to {size} ignored");
        Ok(())
    }

    #[instrument(name = "MailFs::fsync", skip(self))]
    pub async fn fsync(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        let mut tree = self.tree.lock().await;
        let id = self.lookup(&mut tree, &path).await?;
        if tree.node(id)?.is_dir() {
            return Ok(());
        }
        writeback::commit(&self.remote, &mut tree, id).await
    }

    #[instrument(name = "MailFs::release", skip(self))]
    pub async fn release(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        let mut tree = self.tree.lock().await;
        let id = self.lookup(&mut tree, &path).await?;
        if tree.node(id)?.is_dir() {
            return Ok(());
        }
        writeback::release(&self.remote, &mut tree, id).await
    }

    /// Drops the node, then the backing message if the file was ever committed.
    #[instrument(name = "MailFs::unlink", skip(self))]
    pub async fn unlink(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        let mut tree = self.tree.lock().await;
        if path == "/" {
            return Err(MailFsError::IsADirectory(path));
        }
        let (parent, name) = self.remote.resolve_parent(&mut tree, &path).await?;
        let id = tree
            .child(parent, &name)
            .ok_or_else(|| MailFsError::not_found(path.clone()))?;
        let remote_id = match tree.node(id)?.as_file() {
            Some(file) => file.remote_id,
            None => return Err(MailFsError::IsADirectory(path)),
        };
        tree.remove_child(parent, &name)?;
        info!("unlinked {path}");
        if let Some(uid) = remote_id {
            let container = self.remote.container_for(&mut tree, parent).await?;
            self.remote.retire(&container, uid).await?;
        }
        Ok(())
    }

    /// Accepted without removing anything.
    #[instrument(name = "MailFs::rmdir", skip(self))]
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        let mut tree = self.tree.lock().await;
        let id = self.lookup(&mut tree, &path).await?;
        if !tree.node(id)?.is_dir() {
            return Err(MailFsError::NotADirectory(path));
        }
        debug!("rmdir of {path} ignored");
        Ok(())
    }

    #[instrument(name = "MailFs::access", skip(self))]
    pub async fn access(&self, path: &str, mask: i32) -> Result<()> {
        let path = normalize(path);
        self.check_ignored(&path)?;
        let mut tree = self.tree.lock().await;
        self.lookup(&mut tree, &path).await?;
        Ok(())
    }

    pub async fn statfs(&self, _path: &str) -> Result<StatFs> {
        Ok(StatFs::default())
    }

    #[instrument(name = "MailFs::open", skip(self))]
    pub async fn open(&self, path: &str) -> Result<FileAttr> {
        let path = normalize(path);
        self.check_ignored(&path)?;
        let mut tree = self.tree.lock().await;
        let id = self.lookup_file(&mut tree, &path).await?;
        Ok(tree.node(id)?.attr.clone())
    }

    async fn exists(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        let mut tree = self.tree.lock().await;
        self.lookup(&mut tree, &path).await?;
        Ok(())
    }

    pub async fn fallocate(&self, path: &str, _offset: u64, _len: u64) -> Result<()> {
        self.exists(path).await
    }

    /// Ownership and permissions come from configuration only.
    pub async fn chmod(&self, path: &str, _mode: u32) -> Result<()> {
        self.exists(path).await
    }

    pub async fn chown(&self, path: &str, _uid: Option<u32>, _gid: Option<u32>) -> Result<()> {
        self.exists(path).await
    }

    pub async fn utimens(
        &self,
        path: &str,
        _atime: Option<SystemTime>,
        _mtime: Option<SystemTime>,
    ) -> Result<()> {
        self.exists(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Owner;
    use crate::store::memory::{MemoryStore, StoreCall};
    use crate::vfs::tree::FileType;

    const REG: u32 = libc::S_IFREG as u32 | 0o644;

    fn config() -> MailFsConfig {
        MailFsConfig {
            owner: Owner { uid: 1000, gid: 1000 },
            ..Default::default()
        }
    }

    async fn mount(store: &MemoryStore) -> MailFs<MemoryStore> {
        MailFs::connect(store.clone(), config()).await.unwrap()
    }

    #[tokio::test]
    async fn test_fs_mkdir_create_write_read_readdir() {
        let store = MemoryStore::new();
        let fs = mount(&store).await;

        fs.mkdir("/a", 0o755).await.unwrap();
        fs.mkdir("/a/b", 0o755).await.unwrap();
        fs.create("/a/b/hello.txt", REG).await.unwrap();
        assert_eq!(fs.write("/a/b/hello.txt", b"hello", 0).await.unwrap(), 5);
        assert_eq!(fs.read("/a/b/hello.txt", 5, 0).await.unwrap(), b"hello");

        let entries = fs.readdir("/a/b", 0).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "hello.txt");
        assert_eq!(entries[0].attr.kind, FileType::File);
        assert_eq!(entries[0].attr.size, 5);

        let st = fs.getattr("/a/b").await.unwrap();
        assert_eq!(st.kind, FileType::Dir);
        assert_eq!(st.nlink, 2);
        assert_eq!(st.uid, 1000);
    }

    #[tokio::test]
    async fn test_getattr_reflects_pending_write() {
        let store = MemoryStore::new();
        let fs = mount(&store).await;
        fs.create("/f", REG).await.unwrap();
        fs.write("/f", b"abc", 10).await.unwrap();
        let attr = fs.getattr("/f").await.unwrap();
        assert_eq!(attr.size, 13);
        assert_eq!(attr.blocks, 1);
        assert_eq!(store.live_count("MAILFS"), 1);
    }

    #[tokio::test]
    async fn test_sparse_write_past_size_limit_is_rejected() {
        let store = MemoryStore::new();
        let config = MailFsConfig {
            max_file_size: 8,
            ..config()
        };
        let fs = MailFs::connect(store.clone(), config).await.unwrap();
        fs.create("/f", REG).await.unwrap();
        let err = fs.write("/f", b"x", 1 << 62).await.unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
        assert!(fs.write("/f", b"123456789", 0).await.is_err());
        assert_eq!(fs.write("/f", b"12345678", 0).await.unwrap(), 8);
        assert_eq!(fs.getattr("/f").await.unwrap().size, 8);
    }

    #[tokio::test]
    async fn test_create_errors() {
        let store = MemoryStore::new();
        let fs = mount(&store).await;
        assert!(fs.create("/a/b", REG).await.unwrap_err().is_not_found());
        fs.mkdir("/a", 0o755).await.unwrap();
        fs.create("/a/b", REG).await.unwrap();
        assert!(matches!(
            fs.create("/a/b", REG).await,
            Err(MailFsError::AlreadyExists(_))
        ));
        assert!(matches!(
            fs.create("/a/c", libc::S_IFDIR as u32 | 0o755).await,
            Err(MailFsError::InvalidRequest(_))
        ));
        assert!(matches!(
            fs.mkdir("/a", 0o755).await,
            Err(MailFsError::AlreadyExists(_))
        ));
        assert!(fs.mkdir("/x/y", 0o755).await.unwrap_err().is_not_found());
        assert!(matches!(
            fs.mkdir("/a|b", 0o755).await,
            Err(MailFsError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_readdir_offset_and_idempotence() {
        let store = MemoryStore::new();
        let fs = mount(&store).await;
        for name in ["/c", "/a", "/b"] {
            fs.create(name, REG).await.unwrap();
        }
        let all: Vec<_> = fs
            .readdir("/", 0)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(all, vec!["a", "b", "c"]);
        let tail: Vec<_> = fs
            .readdir("/", 2)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(tail, vec!["c"]);

        store.clear_calls();
        assert_eq!(fs.readdir("/", 0).await.unwrap().len(), 3);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unlink_uncommitted_makes_no_remote_call() {
        let store = MemoryStore::new();
        let fs = mount(&store).await;
        fs.create("/draft", REG).await.unwrap();
        fs.write("/draft", b"x", 0).await.unwrap();
        store.clear_calls();
        fs.unlink("/draft").await.unwrap();
        assert!(store.calls().is_empty());
        assert!(fs.getattr("/draft").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_unlink_committed_retires_message() {
        let store = MemoryStore::new();
        let fs = mount(&store).await;
        fs.create("/kept", REG).await.unwrap();
        fs.write("/kept", b"data", 0).await.unwrap();
        fs.fsync("/kept").await.unwrap();
        assert_eq!(store.live_count("MAILFS"), 2);

        fs.unlink("/kept").await.unwrap();
        assert_eq!(store.live_count("MAILFS"), 1);
        assert!(store
            .calls()
            .iter()
            .any(|c| matches!(c, StoreCall::Expunge(name) if name == "MAILFS")));
        assert!(matches!(
            fs.unlink("/kept").await,
            Err(MailFsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_directory_type_checks() {
        let store = MemoryStore::new();
        let fs = mount(&store).await;
        fs.mkdir("/d", 0o755).await.unwrap();
        fs.create("/f", REG).await.unwrap();
        assert!(matches!(fs.read("/d", 1, 0).await, Err(MailFsError::IsADirectory(_))));
        assert!(matches!(fs.open("/d").await, Err(MailFsError::IsADirectory(_))));
        assert!(matches!(fs.unlink("/d").await, Err(MailFsError::IsADirectory(_))));
        assert!(matches!(fs.rmdir("/f").await, Err(MailFsError::NotADirectory(_))));
        assert!(matches!(fs.readdir("/f", 0).await, Err(MailFsError::NotADirectory(_))));
        fs.rmdir("/d").await.unwrap();
        assert!(fs.getattr("/d").await.is_ok());
        fs.truncate("/f", 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_ignored_paths_and_no_op_calls() {
        let store = MemoryStore::new();
        let fs = mount(&store).await;
        store.clear_calls();
        assert!(fs.getattr("/.Trash").await.unwrap_err().is_not_found());
        assert!(fs.access("/autorun.inf", 0).await.unwrap_err().is_not_found());
        assert!(store.calls().is_empty());

        fs.create("/f", REG).await.unwrap();
        fs.chmod("/f", 0o600).await.unwrap();
        fs.chown("/f", Some(0), None).await.unwrap();
        fs.utimens("/f", None, None).await.unwrap();
        fs.fallocate("/f", 0, 4096).await.unwrap();
        assert_eq!(fs.getattr("/f").await.unwrap().mode & 0o777, 0o644);
        assert!(fs.chmod("/missing", 0o600).await.unwrap_err().is_not_found());

        let st = fs.statfs("/").await.unwrap();
        assert_eq!(st.bsize, 4096);
        assert_eq!(st.namemax, 255);
    }
}
