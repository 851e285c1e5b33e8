//! Error taxonomy shared by every layer of the filesystem core.

use thiserror::Error;

use crate::codec::CodecError;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, MailFsError>;

#[derive(Debug, Error)]
pub enum MailFsError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0} is not a directory")]
    NotADirectory(String),

    #[error("{0} is a directory")]
    IsADirectory(String),

    #[error("payload codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("remote store error: {0}")]
    Remote(#[from] StoreError),
}

impl MailFsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        MailFsError::NotFound(path.into())
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        MailFsError::AlreadyExists(path.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        MailFsError::InvalidRequest(reason.into())
    }

    /// POSIX status code reported to the kernel-facing dispatch layer.
    pub fn errno(&self) -> i32 {
        match self {
            MailFsError::NotFound(_) => libc::ENOENT,
            MailFsError::AlreadyExists(_) => libc::EEXIST,
            MailFsError::InvalidRequest(_) => libc::EINVAL,
            MailFsError::NotADirectory(_) => libc::ENOTDIR,
            MailFsError::IsADirectory(_) => libc::EISDIR,
            MailFsError::Codec(_) => libc::EIO,
            MailFsError::Remote(StoreError::ContainerNotFound(_))
            | MailFsError::Remote(StoreError::MessageNotFound { .. }) => libc::ENOENT,
            MailFsError::Remote(StoreError::ContainerExists(_)) => libc::EEXIST,
            MailFsError::Remote(_) => libc::EIO,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MailFsError::NotFound(_))
    }
}
