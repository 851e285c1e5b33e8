//! Per-file buffering and commit.
//!
//! A file is CLEAN until a write lands in its buffer, then DIRTY until a commit
//! succeeds. Commit appends the new message before retiring the old one, so a
//! failure part way through never leaves zero copies of the content.

use std::time::SystemTime;

use tracing::{debug, info};

use crate::codec;
use crate::error::{MailFsError, Result};
use crate::remote::RemoteMap;
use crate::store::MailStore;
use crate::vfs::tree::{NodeId, PathTree};

fn file_parent(tree: &PathTree, id: NodeId) -> Result<NodeId> {
    let node = tree.node(id)?;
    if node.is_dir() {
        return Err(MailFsError::IsADirectory(tree.path_of(id)));
    }
    node.parent
        .ok_or_else(|| MailFsError::invalid(format!("{} has no parent", tree.path_of(id))))
}

/// Makes sure the file's content is in memory, fetching and decoding the
/// committed message when it is not.
pub async fn ensure_resident<S: MailStore>(
    remote: &RemoteMap<S>,
    tree: &mut PathTree,
    id: NodeId,
) -> Result<()> {
    let parent = file_parent(tree, id)?;
    let remote_id = match tree.node(id)?.as_file() {
        Some(file) if file.buffer.is_some() => return Ok(()),
        Some(file) => file.remote_id,
        None => return Err(MailFsError::IsADirectory(tree.path_of(id))),
    };
    let content = match remote_id {
        Some(uid) => {
            let container = remote.container_for(tree, parent).await?;
            let message = remote.store().fetch_message(&container, uid).await?;
            let data = codec::decode(&message)?;
            debug!("fetched {} bytes for {}", data.len(), tree.path_of(id));
            data
        }
        None => Vec::new(),
    };
    let node = tree.node_mut(id)?;
    node.attr.set_size(content.len() as u64);
    if let Some(file) = node.as_file_mut() {
        file.buffer = Some(content);
    }
    Ok(())
}

/// Copies up to `size` bytes starting at `offset` out of the resident buffer.
pub fn read(tree: &PathTree, id: NodeId, size: usize, offset: u64) -> Result<Vec<u8>> {
    let path = tree.path_of(id);
    let buffer = tree
        .node(id)?
        .as_file()
        .ok_or_else(|| MailFsError::IsADirectory(path.clone()))?
        .buffer
        .as_deref()
        .ok_or_else(|| MailFsError::invalid(format!("{path} is not resident")))?;
    let Ok(start) = usize::try_from(offset) else {
        return Ok(Vec::new());
    };
    if start >= buffer.len() {
        return Ok(Vec::new());
    }
    let end = start.saturating_add(size).min(buffer.len());
    Ok(buffer[start..end].to_vec())
}

/// Splices `data` into the resident buffer at `offset`, zero-filling any gap.
/// A write ending beyond `max_size` bytes is rejected before anything grows.
pub fn write(
    tree: &mut PathTree,
    id: NodeId,
    data: &[u8],
    offset: u64,
    max_size: u64,
) -> Result<usize> {
    let path = tree.path_of(id);
    let end = usize::try_from(offset)
        .ok()
        .and_then(|start| start.checked_add(data.len()).map(|end| (start, end)))
        .filter(|(_, end)| *end as u64 <= max_size);
    let Some((start, end)) = end else {
        return Err(MailFsError::invalid(format!(
            "write of {} bytes at {offset} takes {path} past {max_size} bytes",
            data.len()
        )));
    };
    let node = tree.node_mut(id)?;
    let file = node
        .as_file_mut()
        .ok_or_else(|| MailFsError::IsADirectory(path.clone()))?;
    let buffer = file
        .buffer
        .as_mut()
        .ok_or_else(|| MailFsError::invalid(format!("{path} is not resident")))?;
    if buffer.len() < end {
        buffer.resize(end, 0);
    }
    buffer[start..end].copy_from_slice(data);
    // an empty buffer has nothing to commit
    if !buffer.is_empty() {
        file.dirty = true;
    }
    let len = buffer.len() as u64;
    node.attr.set_size(len);
    node.attr.touch(SystemTime::now());
    Ok(data.len())
}

/// Encodes the buffer into a new message, then retires the previous one.
///
/// A clean file is left alone. When the append fails the file stays dirty.
/// When only the retirement of the old message fails, the new identity is kept
/// and the error is still returned.
pub async fn commit<S: MailStore>(
    remote: &RemoteMap<S>,
    tree: &mut PathTree,
    id: NodeId,
) -> Result<()> {
    let parent = file_parent(tree, id)?;
    let path = tree.path_of(id);
    let (message, old, len) = {
        let node = tree.node(id)?;
        let Some(file) = node.as_file() else {
            return Err(MailFsError::IsADirectory(path));
        };
        if !file.dirty {
            return Ok(());
        }
        let buffer = file.buffer.as_deref().unwrap_or_default();
        (codec::encode(node.name(), buffer), file.remote_id, buffer.len())
    };

    let container = remote.container_for(tree, parent).await?;
    let new_id = remote.store().append_message(&container, &message).await?;

    let node = tree.node_mut(id)?;
    if let Some(file) = node.as_file_mut() {
        file.remote_id = Some(new_id);
        file.dirty = false;
        file.buffer = None;
    }
    node.attr.set_size(len as u64);
    node.attr.touch(message.date);
    info!("committed {path} ({len} bytes) as message {new_id}");

    if let Some(old) = old {
        remote.retire(&container, old).await?;
        debug!("retired message {old} for {path}");
    }
    Ok(())
}

/// Commits a dirty file and drops its buffer. A failed commit keeps the
/// buffer so the pending content is not lost.
pub async fn release<S: MailStore>(
    remote: &RemoteMap<S>,
    tree: &mut PathTree,
    id: NodeId,
) -> Result<()> {
    commit(remote, tree, id).await?;
    if let Some(file) = tree.node_mut(id)?.as_file_mut() {
        file.buffer = None;
    }
    Ok(())
}
