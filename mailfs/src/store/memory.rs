//! In-process mail store. Cloning yields another handle to the same state, so a
//! test can keep one handle for inspection while the filesystem owns another.

use super::{ContainerHandle, MailStore, Message, MessageSummary, RemoteId, StoreError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// One collaborator call, recorded in issue order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreCall {
    ListContainers(String),
    CreateContainer(String),
    OpenContainer(String),
    ListMessages(String),
    FirstMessage(String),
    FetchMessage(String, RemoteId),
    AppendMessage(String),
    DeleteMessage(String, RemoteId),
    Expunge(String),
}

#[derive(Default)]
struct MemoryContainer {
    next_uid: u32,
    messages: BTreeMap<RemoteId, StoredMessage>,
}

struct StoredMessage {
    message: Message,
    deleted: bool,
    malformed: bool,
}

impl StoredMessage {
    fn summary(&self, uid: RemoteId) -> Result<MessageSummary, StoreError> {
        if self.malformed {
            return Err(StoreError::Malformed(format!("message {uid} is unreadable")));
        }
        Ok(MessageSummary {
            uid,
            subject: self.message.subject.clone(),
            headers: self.message.headers.clone(),
            date: self.message.date,
            raw_size: self
                .message
                .attachments
                .iter()
                .map(|a| a.body.len() as u64)
                .sum(),
        })
    }
}

#[derive(Default)]
struct MemoryState {
    containers: BTreeMap<String, MemoryContainer>,
    calls: Vec<StoreCall>,
    fail_appends: bool,
    fail_deletes: bool,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Makes every following append fail with a backend error.
    pub fn set_fail_appends(&self, fail: bool) {
        self.lock().fail_appends = fail;
    }

    /// Makes every following delete fail with a backend error.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.lock().fail_deletes = fail;
    }

    /// Number of live (not deleted) messages in a container.
    pub fn live_count(&self, container: &str) -> usize {
        self.lock()
            .containers
            .get(container)
            .map(|c| c.messages.values().filter(|m| !m.deleted).count())
            .unwrap_or(0)
    }

    /// Makes one stored message unreadable, as a corrupted remote copy would be.
    pub fn set_malformed(&self, container: &str, uid: RemoteId) {
        if let Some(m) = self
            .lock()
            .containers
            .get_mut(container)
            .and_then(|c| c.messages.get_mut(&uid))
        {
            m.malformed = true;
        }
    }

    /// Whether a uid is still physically present, flagged or not.
    pub fn contains(&self, container: &str, uid: RemoteId) -> bool {
        self.lock()
            .containers
            .get(container)
            .is_some_and(|c| c.messages.contains_key(&uid))
    }
}

fn container_mut<'a>(
    state: &'a mut MemoryState,
    name: &str,
) -> Result<&'a mut MemoryContainer, StoreError> {
    state
        .containers
        .get_mut(name)
        .ok_or_else(|| StoreError::ContainerNotFound(name.to_string()))
}

#[async_trait]
impl MailStore for MemoryStore {
    async fn list_containers(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut st = self.lock();
        st.calls.push(StoreCall::ListContainers(prefix.to_string()));
        Ok(st
            .containers
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn create_container(&self, name: &str) -> Result<ContainerHandle, StoreError> {
        let mut st = self.lock();
        st.calls.push(StoreCall::CreateContainer(name.to_string()));
        if st.containers.contains_key(name) {
            return Err(StoreError::ContainerExists(name.to_string()));
        }
        st.containers.insert(
            name.to_string(),
            MemoryContainer {
                next_uid: 1,
                messages: BTreeMap::new(),
            },
        );
        Ok(ContainerHandle::new(name))
    }

    async fn open_container(&self, name: &str) -> Result<ContainerHandle, StoreError> {
        let mut st = self.lock();
        st.calls.push(StoreCall::OpenContainer(name.to_string()));
        if !st.containers.contains_key(name) {
            return Err(StoreError::ContainerNotFound(name.to_string()));
        }
        Ok(ContainerHandle::new(name))
    }

    async fn list_messages(
        &self,
        container: &ContainerHandle,
    ) -> Result<Vec<MessageSummary>, StoreError> {
        let mut st = self.lock();
        st.calls
            .push(StoreCall::ListMessages(container.name().to_string()));
        let c = container_mut(&mut st, container.name())?;
        c.messages
            .iter()
            .filter(|(_, m)| !m.deleted)
            .map(|(uid, m)| m.summary(*uid))
            .collect()
    }

    async fn first_message(
        &self,
        container: &ContainerHandle,
    ) -> Result<Option<MessageSummary>, StoreError> {
        let mut st = self.lock();
        st.calls
            .push(StoreCall::FirstMessage(container.name().to_string()));
        let c = container_mut(&mut st, container.name())?;
        c.messages
            .iter()
            .find(|(_, m)| !m.deleted)
            .map(|(uid, m)| m.summary(*uid))
            .transpose()
    }

    async fn fetch_message(
        &self,
        container: &ContainerHandle,
        uid: RemoteId,
    ) -> Result<Message, StoreError> {
        let mut st = self.lock();
        st.calls
            .push(StoreCall::FetchMessage(container.name().to_string(), uid));
        let c = container_mut(&mut st, container.name())?;
        match c.messages.get(&uid) {
            Some(m) if m.malformed && !m.deleted => Err(StoreError::Malformed(format!(
                "message {uid} is unreadable"
            ))),
            Some(m) if !m.deleted => Ok(m.message.clone()),
            _ => Err(StoreError::MessageNotFound {
                container: container.name().to_string(),
                uid,
            }),
        }
    }

    async fn append_message(
        &self,
        container: &ContainerHandle,
        message: &Message,
    ) -> Result<RemoteId, StoreError> {
        let mut st = self.lock();
        st.calls
            .push(StoreCall::AppendMessage(container.name().to_string()));
        if st.fail_appends {
            return Err(StoreError::Backend("append rejected".into()));
        }
        let c = container_mut(&mut st, container.name())?;
        let uid = RemoteId(c.next_uid);
        c.next_uid += 1;
        c.messages.insert(
            uid,
            StoredMessage {
                message: message.clone(),
                deleted: false,
                malformed: false,
            },
        );
        Ok(uid)
    }

    async fn delete_message(
        &self,
        container: &ContainerHandle,
        uid: RemoteId,
    ) -> Result<(), StoreError> {
        let mut st = self.lock();
        st.calls
            .push(StoreCall::DeleteMessage(container.name().to_string(), uid));
        if st.fail_deletes {
            return Err(StoreError::Backend("delete rejected".into()));
        }
        let c = container_mut(&mut st, container.name())?;
        match c.messages.get_mut(&uid) {
            Some(m) => {
                m.deleted = true;
                Ok(())
            }
            None => Err(StoreError::MessageNotFound {
                container: container.name().to_string(),
                uid,
            }),
        }
    }

    async fn expunge(&self, container: &ContainerHandle) -> Result<(), StoreError> {
        let mut st = self.lock();
        st.calls.push(StoreCall::Expunge(container.name().to_string()));
        let c = container_mut(&mut st, container.name())?;
        c.messages.retain(|_, m| !m.deleted);
        Ok(())
    }
}
