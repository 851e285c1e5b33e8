//! Maps directories to remote containers and fills the tree from remote
//! listings on first access.
//!
//! A directory at `/a/b` lives in the container `<prefix><sep>a<sep>b`; the root
//! is the bare prefix. Message #1 of every container is a marker whose subject
//! is the unencoded directory path, so the whole directory skeleton can be
//! rebuilt from the store alone.

use tracing::{debug, info, warn};

use crate::codec;
use crate::config::MailFsConfig;
use crate::error::{MailFsError, Result};
use crate::store::{ContainerHandle, MailStore, MessageSummary, RemoteId, StoreError};
use crate::vfs::tree::{
    DirState, FileAttr, FileState, NodeId, NodeKind, PathTree, Population, ROOT_ID, join,
    normalize, split_path,
};

pub struct RemoteMap<S: MailStore> {
    store: S,
    config: MailFsConfig,
}

impl<S: MailStore> RemoteMap<S> {
    pub fn new(store: S, config: MailFsConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &MailFsConfig {
        &self.config
    }

    /// Encodes a directory path into its container name.
    pub fn container_name(&self, path: &str) -> Result<String> {
        let sep = self.config.separator;
        let mut name = self.config.container_prefix.clone();
        for seg in split_path(path) {
            if seg.contains(sep) {
                return Err(MailFsError::invalid(format!(
                    "name {seg:?} contains the reserved character {sep:?}"
                )));
            }
            name.push(sep);
            name.push_str(seg);
        }
        if name.len() > self.config.max_container_name_len {
            return Err(MailFsError::invalid(format!(
                "container name for {} is {} bytes, limit is {}",
                normalize(path),
                name.len(),
                self.config.max_container_name_len
            )));
        }
        Ok(name)
    }

    pub async fn open_container(&self, path: &str) -> Result<ContainerHandle> {
        let name = self.container_name(path)?;
        Ok(self.store.open_container(&name).await?)
    }

    /// Opens the root container, creating it with its marker on an empty store.
    pub async fn ensure_root(&self) -> Result<ContainerHandle> {
        match self.store.open_container(&self.config.container_prefix).await {
            Ok(handle) => Ok(handle),
            Err(StoreError::ContainerNotFound(_)) => {
                info!("initialising empty store under {}", self.config.container_prefix);
                self.create_container("/").await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Creates the container for a new directory and writes its marker.
    pub async fn create_container(&self, path: &str) -> Result<ContainerHandle> {
        let path = normalize(path);
        let name = self.container_name(&path)?;
        let handle = match self.store.create_container(&name).await {
            Ok(handle) => handle,
            Err(StoreError::ContainerExists(_)) => {
                return Err(MailFsError::already_exists(path));
            }
            Err(e) => return Err(e.into()),
        };
        let marker = codec::marker(&path, &self.config.marker_text);
        self.store.append_message(&handle, &marker).await?;
        debug!("created container {name} for {path}");
        Ok(handle)
    }

    /// Deletes one message and expunges its container.
    pub async fn retire(&self, container: &ContainerHandle, uid: RemoteId) -> Result<()> {
        self.store.delete_message(container, uid).await?;
        self.store.expunge(container).await?;
        Ok(())
    }

    /// Container bound to directory `dir`, opened and cached on first use.
    pub async fn container_for(
        &self,
        tree: &mut PathTree,
        dir: NodeId,
    ) -> Result<ContainerHandle> {
        let path = tree.path_of(dir);
        if let Some(handle) = tree
            .node(dir)?
            .as_dir()
            .ok_or_else(|| MailFsError::NotADirectory(path.clone()))?
            .container
            .clone()
        {
            return Ok(handle);
        }
        let handle = self.open_container(&path).await?;
        if let Some(state) = tree.node_mut(dir)?.as_dir_mut() {
            state.container = Some(handle.clone());
        }
        Ok(handle)
    }

    /// Reads the marker of `container_name`, returning its summary when the
    /// container is one of ours. A container whose marker cannot be read is
    /// skipped like one without a marker.
    async fn read_marker(&self, container_name: &str) -> Option<MessageSummary> {
        let first = match self.store.open_container(container_name).await {
            Ok(handle) => self.store.first_message(&handle).await,
            Err(e) => Err(e),
        };
        match first {
            Ok(Some(summary)) if codec::is_marker(&summary) => Some(summary),
            Ok(_) => {
                warn!("container {container_name} has no marker message, skipping");
                None
            }
            Err(e) => {
                warn!("failed to read marker of {container_name}, skipping: {e}");
                None
            }
        }
    }

    /// Rebuilds the directory skeleton from container markers.
    ///
    /// Every directory found this way has its folder half populated; messages
    /// are still fetched lazily.
    pub async fn bootstrap(&self, tree: &mut PathTree) -> Result<()> {
        let prefix = &self.config.container_prefix;
        let nested = format!("{prefix}{}", self.config.separator);
        let mut found = Vec::new();
        for name in self.store.list_containers(prefix).await? {
            if !name.starts_with(&nested) {
                continue;
            }
            let Some(marker) = self.read_marker(&name).await else {
                continue;
            };
            let path = normalize(&marker.subject);
            if self.container_name(&path).ok().as_deref() != Some(name.as_str()) {
                warn!("marker of {name} names {path}, which maps elsewhere; skipping");
                continue;
            }
            found.push((path, name, marker.date));
        }
        found.sort_by_key(|(path, _, _)| split_path(path).len());

        let owner = self.config.owner;
        for (path, name, date) in found {
            let Some((parent, leaf)) = tree.resolve_parent(&path) else {
                warn!("orphan container {name}: parent of {path} is unknown");
                continue;
            };
            if tree.child(parent, leaf).is_some() {
                continue;
            }
            let attr = FileAttr::dir(self.config.dir_mode, owner, date);
            let state = DirState::new(Some(ContainerHandle::new(name)));
            tree.insert_child(parent, leaf, attr, NodeKind::Dir(state))?;
        }

        let mut pending = vec![ROOT_ID];
        while let Some(dir) = pending.pop() {
            pending.extend(tree.children(dir).into_iter().map(|(_, id)| id));
            if let Some(state) = tree.node_mut(dir)?.as_dir_mut() {
                state.folders = Population::Populated;
            }
        }
        info!("bootstrapped {} directories from the store", tree.len());
        Ok(())
    }

    /// Fetches whichever halves of `dir`'s listing have not been fetched yet.
    pub async fn populate_children(&self, tree: &mut PathTree, dir: NodeId) -> Result<()> {
        let path = tree.path_of(dir);
        let (folders, messages) = match tree.node(dir)?.as_dir() {
            Some(state) => (state.folders, state.messages),
            None => return Err(MailFsError::NotADirectory(path)),
        };
        if !folders.is_populated() {
            self.populate_folders(tree, dir, &path).await?;
        }
        if !messages.is_populated() {
            self.populate_messages(tree, dir, &path).await?;
        }
        Ok(())
    }

    async fn populate_folders(&self, tree: &mut PathTree, dir: NodeId, path: &str) -> Result<()> {
        let prefix = format!("{}{}", self.container_name(path)?, self.config.separator);
        let names = self.store.list_containers(&prefix).await?;
        debug!("{} candidate subfolders under {path}", names.len());
        for name in names {
            let Some(leaf) = name.strip_prefix(&prefix) else {
                continue;
            };
            if leaf.is_empty() || leaf.contains(self.config.separator) {
                continue;
            }
            if tree.child(dir, leaf).is_some() {
                continue;
            }
            let Some(marker) = self.read_marker(&name).await else {
                continue;
            };
            let expected = join(path, leaf);
            if normalize(&marker.subject) != expected {
                warn!("marker of {name} names {:?}, expected {expected}", marker.subject);
                continue;
            }
            let attr = FileAttr::dir(self.config.dir_mode, self.config.owner, marker.date);
            let state = DirState::new(Some(ContainerHandle::new(name.as_str())));
            tree.insert_child(dir, leaf, attr, NodeKind::Dir(state))?;
        }
        if let Some(state) = tree.node_mut(dir)?.as_dir_mut() {
            state.folders = Population::Populated;
        }
        Ok(())
    }

    async fn populate_messages(&self, tree: &mut PathTree, dir: NodeId, path: &str) -> Result<()> {
        let container = self.container_for(tree, dir).await?;
        let listing = self.store.list_messages(&container).await?;
        let mut entries = listing.into_iter();
        if let Some(first) = entries.next() {
            if !codec::is_marker(&first) {
                warn!("message #1 of {} is not a marker", container.name());
            }
        }
        let mut added = 0usize;
        for summary in entries {
            if self.merge_message(tree, dir, path, summary)? {
                added += 1;
            }
        }
        if let Some(state) = tree.node_mut(dir)?.as_dir_mut() {
            state.messages = Population::Populated;
        }
        debug!("populated {added} files under {path}");
        Ok(())
    }

    fn merge_message(
        &self,
        tree: &mut PathTree,
        dir: NodeId,
        path: &str,
        summary: MessageSummary,
    ) -> Result<bool> {
        let name = summary.subject.as_str();
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            warn!("message {} under {path} has unusable subject {name:?}", summary.uid);
            return Ok(false);
        }
        let size = match codec::summary_declared_size(&summary) {
            Ok(size) => size,
            Err(e) => {
                warn!("message {} ({name}) under {path} skipped: {e}", summary.uid);
                return Ok(false);
            }
        };
        let Some(existing) = tree.child(dir, name) else {
            let attr = FileAttr::file(self.config.file_mode, self.config.owner, size, summary.date);
            let state = FileState {
                remote_id: Some(summary.uid),
                ..Default::default()
            };
            tree.insert_child(dir, name, attr, NodeKind::File(state))?;
            return Ok(true);
        };

        let node = tree.node_mut(existing)?;
        let Some(file) = node.as_file() else {
            warn!("file {name} under {path} shadowed by a directory");
            return Ok(false);
        };
        // listings come in uid order, so a later duplicate is the newer copy
        let Some(old) = file.remote_id.filter(|old| *old < summary.uid && !file.dirty) else {
            return Ok(false);
        };
        warn!("duplicate message for {name}: keeping {} over {old}", summary.uid);
        if let Some(file) = node.as_file_mut() {
            file.remote_id = Some(summary.uid);
            file.buffer = None;
        }
        node.attr.set_size(size);
        node.attr.touch(summary.date);
        Ok(false)
    }

    /// Walks `path`, populating each directory before looking up its child.
    pub async fn resolve(&self, tree: &mut PathTree, path: &str) -> Result<NodeId> {
        let mut cur = ROOT_ID;
        for seg in split_path(path) {
            if !tree.node(cur)?.is_dir() {
                return Err(MailFsError::not_found(normalize(path)));
            }
            self.populate_children(tree, cur).await?;
            cur = tree
                .child(cur, seg)
                .ok_or_else(|| MailFsError::not_found(normalize(path)))?;
        }
        Ok(cur)
    }

    /// Resolves the parent directory of `path` and populates it, so a missing
    /// leaf is known to be absent remotely too.
    pub async fn resolve_parent(
        &self,
        tree: &mut PathTree,
        path: &str,
    ) -> Result<(NodeId, String)> {
        let mut parts = split_path(path);
        let leaf = parts
            .pop()
            .ok_or_else(|| MailFsError::invalid("the root has no parent"))?
            .to_string();
        let parent_path = format!("/{}", parts.join("/"));
        let parent = self.resolve(tree, &parent_path).await?;
        if !tree.node(parent)?.is_dir() {
            return Err(MailFsError::NotADirectory(parent_path));
        }
        self.populate_children(tree, parent).await?;
        Ok((parent, leaf))
    }
}
