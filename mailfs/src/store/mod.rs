//! Mail store adapter
//!
//! The filesystem core never talks a wire protocol itself. Everything it needs
//! from the remote side goes through [`MailStore`]: folder (container) listing
//! and creation, message listing, fetch, append, delete and expunge.
//!
//! Submodules:
//! - `memory`: in-process store with a call log, used by tests and demos
//! - `local`: directory-backed store that persists messages as MIME text
//! - `mime`: RFC 822 / MIME rendering used by the directory-backed store

pub mod local;
pub mod memory;
pub mod mime;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;
use thiserror::Error;

/// Identifier of a message inside its container. Strictly increasing and never
/// reused within one container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteId(pub u32);

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opened remote container (mailbox).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    name: String,
}

impl ContainerHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub body: Bytes,
}

/// A complete remote message as the store hands it out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    /// Custom headers; lookups are case-insensitive.
    pub headers: BTreeMap<String, String>,
    pub text: Option<String>,
    pub attachments: Vec<Attachment>,
    pub date: SystemTime,
}

impl Message {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            headers: BTreeMap::new(),
            text: None,
            attachments: Vec::new(),
            date: SystemTime::now(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// What a listing returns for each message, without attachment bodies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageSummary {
    pub uid: RemoteId,
    pub subject: String,
    pub headers: BTreeMap<String, String>,
    pub date: SystemTime,
    /// Size of the message as stored remotely, framing included.
    pub raw_size: u64,
}

impl MessageSummary {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

pub(crate) fn find_header<'a>(
    headers: &'a BTreeMap<String, String>,
    name: &str,
) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("container {0} not found")]
    ContainerNotFound(String),

    #[error("container {0} already exists")]
    ContainerExists(String),

    #[error("message {uid} not found in {container}")]
    MessageNotFound { container: String, uid: RemoteId },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("{0}")]
    Backend(String),
}

/// Remote folder/message store. Every call is one blocking round trip from the
/// caller's point of view.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Names of all containers starting with `prefix`, sorted.
    async fn list_containers(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn create_container(&self, name: &str) -> Result<ContainerHandle, StoreError>;

    async fn open_container(&self, name: &str) -> Result<ContainerHandle, StoreError>;

    /// Live messages in sequence order; the first entry is message #1.
    async fn list_messages(
        &self,
        container: &ContainerHandle,
    ) -> Result<Vec<MessageSummary>, StoreError>;

    /// Summary of message #1 alone, `None` for an empty container. Costs one
    /// round trip regardless of how many messages the container holds.
    async fn first_message(
        &self,
        container: &ContainerHandle,
    ) -> Result<Option<MessageSummary>, StoreError>;

    async fn fetch_message(
        &self,
        container: &ContainerHandle,
        uid: RemoteId,
    ) -> Result<Message, StoreError>;

    /// Stores `message` and returns the uid assigned to it.
    async fn append_message(
        &self,
        container: &ContainerHandle,
        message: &Message,
    ) -> Result<RemoteId, StoreError>;

    /// Flags a message as deleted; it disappears from listings immediately and
    /// is physically removed on the next [`MailStore::expunge`].
    async fn delete_message(
        &self,
        container: &ContainerHandle,
        uid: RemoteId,
    ) -> Result<(), StoreError>;

    async fn expunge(&self, container: &ContainerHandle) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_ignores_case() {
        let mut msg = Message::new("a.txt");
        msg.headers.insert("X-Mailfs-Size".into(), "5".into());
        assert_eq!(msg.header("x-mailfs-size"), Some("5"));
        assert_eq!(msg.header("X-Other"), None);
    }
}
