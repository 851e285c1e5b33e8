//! In-memory path tree mirroring the filesystem namespace.
//!
//! Nodes live in an arena keyed by [`NodeId`]. A directory owns its children
//! through a name-sorted map of ids; the `parent` link is a plain id used only
//! to detach a node from its parent, never for ownership.

use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;

use crate::config::Owner;
use crate::error::{MailFsError, Result};
use crate::store::{ContainerHandle, RemoteId};

pub type NodeId = u64;

pub const ROOT_ID: NodeId = 1;
pub const BLOCK_SIZE: u32 = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    File,
    Dir,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileAttr {
    pub ino: NodeId,
    pub kind: FileType,
    /// Type bits included (`S_IFREG` / `S_IFDIR`).
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u64,
    pub blksize: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl FileAttr {
    pub fn dir(perm: u32, owner: Owner, time: SystemTime) -> Self {
        Self {
            ino: 0,
            kind: FileType::Dir,
            mode: libc::S_IFDIR as u32 | (perm & 0o7777),
            nlink: 2,
            uid: owner.uid,
            gid: owner.gid,
            size: 0,
            blocks: 0,
            blksize: BLOCK_SIZE,
            atime: time,
            mtime: time,
            ctime: time,
        }
    }

    pub fn file(perm: u32, owner: Owner, size: u64, time: SystemTime) -> Self {
        let mut attr = Self {
            ino: 0,
            kind: FileType::File,
            mode: libc::S_IFREG as u32 | (perm & 0o7777),
            nlink: 1,
            uid: owner.uid,
            gid: owner.gid,
            size: 0,
            blocks: 0,
            blksize: BLOCK_SIZE,
            atime: time,
            mtime: time,
            ctime: time,
        };
        attr.set_size(size);
        attr
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
        self.blocks = size.div_ceil(512);
    }

    pub fn touch(&mut self, time: SystemTime) {
        self.mtime = time;
        self.ctime = time;
    }
}

/// Whether a remote listing has been merged into a directory yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Population {
    #[default]
    Unpopulated,
    Populated,
}

impl Population {
    pub fn is_populated(self) -> bool {
        self == Population::Populated
    }
}

#[derive(Debug, Default)]
pub struct DirState {
    pub container: Option<ContainerHandle>,
    /// Subfolders discovered from the container listing.
    pub folders: Population,
    /// Files discovered from the container's messages.
    pub messages: Population,
    pub children: BTreeMap<String, NodeId>,
}

impl DirState {
    pub fn new(container: Option<ContainerHandle>) -> Self {
        Self {
            container,
            ..Default::default()
        }
    }

    /// Both halves fetched, used for directories created locally.
    pub fn populated(container: ContainerHandle) -> Self {
        Self {
            container: Some(container),
            folders: Population::Populated,
            messages: Population::Populated,
            children: BTreeMap::new(),
        }
    }

    pub fn is_populated(&self) -> bool {
        self.folders.is_populated() && self.messages.is_populated()
    }
}

#[derive(Debug, Default)]
pub struct FileState {
    /// Backing message, `None` until the first successful commit.
    pub remote_id: Option<RemoteId>,
    /// Resident content; `None` means not fetched (or dropped on release).
    pub buffer: Option<Vec<u8>>,
    pub dirty: bool,
}

#[derive(Debug)]
pub enum NodeKind {
    Dir(DirState),
    File(FileState),
}

#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    name: String,
    pub parent: Option<NodeId>,
    pub attr: FileAttr,
    pub kind: NodeKind,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir(_))
    }

    pub fn as_dir(&self) -> Option<&DirState> {
        match &self.kind {
            NodeKind::Dir(d) => Some(d),
            NodeKind::File(_) => None,
        }
    }

    pub fn as_dir_mut(&mut self) -> Option<&mut DirState> {
        match &mut self.kind {
            NodeKind::Dir(d) => Some(d),
            NodeKind::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileState> {
        match &self.kind {
            NodeKind::File(f) => Some(f),
            NodeKind::Dir(_) => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileState> {
        match &mut self.kind {
            NodeKind::File(f) => Some(f),
            NodeKind::Dir(_) => None,
        }
    }
}

/// Splits an absolute path into its name segments. Empty segments produced by
/// a leading, trailing or doubled separator are dropped, never looked up.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Canonical form of `path`: leading `/`, no empty segments.
pub fn normalize(path: &str) -> String {
    let parts = split_path(path);
    let mut out = String::from("/");
    out.push_str(&parts.join("/"));
    out
}

pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

pub struct PathTree {
    nodes: HashMap<NodeId, Node>,
    next_id: NodeId,
}

impl PathTree {
    pub fn new(root_attr: FileAttr, root: DirState) -> Self {
        let mut nodes = HashMap::new();
        let mut attr = root_attr;
        attr.ino = ROOT_ID;
        nodes.insert(
            ROOT_ID,
            Node {
                id: ROOT_ID,
                name: String::new(),
                parent: None,
                attr,
                kind: NodeKind::Dir(root),
            },
        );
        Self {
            nodes,
            next_id: ROOT_ID + 1,
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| MailFsError::not_found(format!("inode {id}")))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| MailFsError::not_found(format!("inode {id}")))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.get(parent)?.as_dir()?.children.get(name).copied()
    }

    /// Child `(name, id)` pairs of a directory in name order.
    pub fn children(&self, dir: NodeId) -> Vec<(String, NodeId)> {
        self.get(dir)
            .and_then(Node::as_dir)
            .map(|d| d.children.iter().map(|(n, id)| (n.clone(), *id)).collect())
            .unwrap_or_default()
    }

    /// Walks the tree without consulting the remote store.
    pub fn resolve(&self, path: &str) -> Option<NodeId> {
        let mut cur = ROOT_ID;
        for seg in split_path(path) {
            cur = self.child(cur, seg)?;
        }
        Some(cur)
    }

    /// Parent directory id and leaf name; `None` for the root or a missing parent.
    pub fn resolve_parent<'p>(&self, path: &'p str) -> Option<(NodeId, &'p str)> {
        let mut parts = split_path(path);
        let leaf = parts.pop()?;
        let mut cur = ROOT_ID;
        for seg in parts {
            cur = self.child(cur, seg)?;
        }
        Some((cur, leaf))
    }

    pub fn insert_child(
        &mut self,
        parent: NodeId,
        name: &str,
        mut attr: FileAttr,
        kind: NodeKind,
    ) -> Result<NodeId> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(MailFsError::invalid(format!("bad entry name {name:?}")));
        }
        let id = self.next_id;
        let parent_path = self.path_of(parent);
        let dir = self
            .node_mut(parent)?
            .as_dir_mut()
            .ok_or_else(|| MailFsError::NotADirectory(parent_path.clone()))?;
        if dir.children.contains_key(name) {
            return Err(MailFsError::already_exists(join(&parent_path, name)));
        }
        dir.children.insert(name.to_string(), id);
        attr.ino = id;
        self.nodes.insert(
            id,
            Node {
                id,
                name: name.to_string(),
                parent: Some(parent),
                attr,
                kind,
            },
        );
        self.next_id += 1;
        Ok(id)
    }

    /// Detaches `name` from `parent` and drops it with its whole subtree.
    pub fn remove_child(&mut self, parent: NodeId, name: &str) -> Result<Node> {
        let parent_path = self.path_of(parent);
        let id = self
            .node_mut(parent)?
            .as_dir_mut()
            .ok_or_else(|| MailFsError::NotADirectory(parent_path.clone()))?
            .children
            .remove(name)
            .ok_or_else(|| MailFsError::not_found(join(&parent_path, name)))?;
        let mut pending = vec![id];
        let mut removed = None;
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                if let Some(dir) = node.as_dir() {
                    pending.extend(dir.children.values().copied());
                }
                if next == id {
                    removed = Some(node);
                }
            }
        }
        removed.ok_or_else(|| MailFsError::not_found(join(&parent_path, name)))
    }

    /// Absolute path of a node, rebuilt from parent links.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cur = self.get(id);
        while let Some(node) = cur {
            if node.id == ROOT_ID {
                break;
            }
            parts.push(node.name.as_str());
            cur = node.parent.and_then(|p| self.get(p));
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Owner {
        Owner { uid: 1, gid: 2 }
    }

    fn tree() -> PathTree {
        PathTree::new(
            FileAttr::dir(0o755, owner(), SystemTime::UNIX_EPOCH),
            DirState::new(None),
        )
    }

    fn add_dir(t: &mut PathTree, parent: NodeId, name: &str) -> NodeId {
        let attr = FileAttr::dir(0o755, owner(), SystemTime::UNIX_EPOCH);
        t.insert_child(parent, name, attr, NodeKind::Dir(DirState::new(None)))
            .unwrap()
    }

    fn add_file(t: &mut PathTree, parent: NodeId, name: &str) -> NodeId {
        let attr = FileAttr::file(0o644, owner(), 0, SystemTime::UNIX_EPOCH);
        t.insert_child(parent, name, attr, NodeKind::File(FileState::default()))
            .unwrap()
    }

    #[test]
    fn test_resolve_walks_segments() {
        let mut t = tree();
        let a = add_dir(&mut t, ROOT_ID, "a");
        let b = add_file(&mut t, a, "b.txt");
        assert_eq!(t.resolve("/"), Some(ROOT_ID));
        assert_eq!(t.resolve("/a"), Some(a));
        assert_eq!(t.resolve("/a/b.txt"), Some(b));
        assert_eq!(t.resolve("/a/missing"), None);
        assert_eq!(t.resolve("/missing/b.txt"), None);
        assert_eq!(t.get(b).unwrap().attr.ino, b);
    }

    #[test]
    fn test_empty_segments_are_not_names() {
        let mut t = tree();
        let a = add_dir(&mut t, ROOT_ID, "a");
        let b = add_file(&mut t, a, "b");
        assert_eq!(t.resolve("/a//b"), Some(b));
        assert_eq!(t.resolve("//a/b/"), Some(b));
        assert_eq!(split_path("/a//b"), vec!["a", "b"]);
        assert_eq!(normalize("//a//b/"), "/a/b");
        // an empty name can never be inserted, so "" never matches a child
        let attr = FileAttr::file(0o644, owner(), 0, SystemTime::UNIX_EPOCH);
        let err = t
            .insert_child(a, "", attr, NodeKind::File(FileState::default()))
            .unwrap_err();
        assert!(matches!(err, MailFsError::InvalidRequest(_)));
    }

    #[test]
    fn test_resolve_parent() {
        let mut t = tree();
        let a = add_dir(&mut t, ROOT_ID, "a");
        assert_eq!(t.resolve_parent("/a/new"), Some((a, "new")));
        assert_eq!(t.resolve_parent("/top"), Some((ROOT_ID, "top")));
        assert_eq!(t.resolve_parent("/"), None);
        assert_eq!(t.resolve_parent("/nope/new"), None);
    }

    #[test]
    fn test_insert_conflict_and_file_parent() {
        let mut t = tree();
        let f = add_file(&mut t, ROOT_ID, "f");
        let attr = FileAttr::file(0o644, owner(), 0, SystemTime::UNIX_EPOCH);
        let dup = t.insert_child(
            ROOT_ID,
            "f",
            attr.clone(),
            NodeKind::File(FileState::default()),
        );
        assert!(matches!(dup, Err(MailFsError::AlreadyExists(p)) if p == "/f"));
        let under_file = t.insert_child(f, "x", attr, NodeKind::File(FileState::default()));
        assert!(matches!(under_file, Err(MailFsError::NotADirectory(_))));
    }

    #[test]
    fn test_remove_child_drops_subtree() {
        let mut t = tree();
        let a = add_dir(&mut t, ROOT_ID, "a");
        let b = add_dir(&mut t, a, "b");
        let c = add_file(&mut t, b, "c");
        assert_eq!(t.len(), 4);
        let removed = t.remove_child(ROOT_ID, "a").unwrap();
        assert_eq!(removed.name(), "a");
        assert_eq!(t.len(), 1);
        assert!(t.get(c).is_none());
        assert!(t.resolve("/a").is_none());
        assert!(t.remove_child(ROOT_ID, "a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_children_sorted_and_path_of() {
        let mut t = tree();
        let z = add_dir(&mut t, ROOT_ID, "z");
        add_file(&mut t, ROOT_ID, "b");
        add_file(&mut t, ROOT_ID, "a");
        let names: Vec<_> = t.children(ROOT_ID).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b", "z"]);
        let deep = add_file(&mut t, z, "leaf");
        assert_eq!(t.path_of(deep), "/z/leaf");
        assert_eq!(t.path_of(ROOT_ID), "/");
    }

    #[test]
    fn test_attr_blocks_follow_size() {
        let mut attr = FileAttr::file(0o644, owner(), 513, SystemTime::UNIX_EPOCH);
        assert_eq!(attr.blocks, 2);
        attr.set_size(0);
        assert_eq!(attr.blocks, 0);
        assert_eq!(attr.mode & libc::S_IFMT as u32, libc::S_IFREG as u32);
    }
}
