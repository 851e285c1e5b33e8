//! Closed set of filesystem calls, for a kernel-facing layer to hand over.

use std::time::SystemTime;

use crate::error::Result;
use crate::store::MailStore;
use crate::vfs::fs::{DirEntry, MailFs, StatFs};
use crate::vfs::tree::FileAttr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FsRequest {
    Getattr { path: String },
    Readdir { path: String, offset: usize },
    Create { path: String, mode: u32 },
    Mkdir { path: String, mode: u32 },
    Read { path: String, size: usize, offset: u64 },
    Write { path: String, data: Vec<u8>, offset: u64 },
    Truncate { path: String, size: u64 },
    Fsync { path: String },
    Release { path: String },
    Unlink { path: String },
    Rmdir { path: String },
    Access { path: String, mask: i32 },
    Statfs { path: String },
    Open { path: String },
    Fallocate { path: String, offset: u64, len: u64 },
    Chmod { path: String, mode: u32 },
    Chown { path: String, uid: Option<u32>, gid: Option<u32> },
    Utimens {
        path: String,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FsReply {
    Attr(FileAttr),
    Entries(Vec<DirEntry>),
    Data(Vec<u8>),
    Written(usize),
    Statfs(StatFs),
    Ok,
}

impl<S: MailStore> MailFs<S> {
    pub async fn dispatch(&self, req: FsRequest) -> Result<FsReply> {
        let reply = match req {
            FsRequest::Getattr { path } => FsReply::Attr(self.getattr(&path).await?),
            FsRequest::Readdir { path, offset } => {
                FsReply::Entries(self.readdir(&path, offset).await?)
            }
            FsRequest::Create { path, mode } => FsReply::Attr(self.create(&path, mode).await?),
            FsRequest::Mkdir { path, mode } => FsReply::Attr(self.mkdir(&path, mode).await?),
            FsRequest::Read { path, size, offset } => {
                FsReply::Data(self.read(&path, size, offset).await?)
            }
            FsRequest::Write { path, data, offset } => {
                FsReply::Written(self.write(&path, &data, offset).await?)
            }
            FsRequest::Truncate { path, size } => {
                self.truncate(&path, size).await?;
                FsReply::Ok
            }
            FsRequest::Fsync { path } => {
                self.fsync(&path).await?;
                FsReply::Ok
            }
            FsRequest::Release { path } => {
                self.release(&path).await?;
                FsReply::Ok
            }
            FsRequest::Unlink { path } => {
                self.unlink(&path).await?;
                FsReply::Ok
            }
            FsRequest::Rmdir { path } => {
                self.rmdir(&path).await?;
                FsReply::Ok
            }
            FsRequest::Access { path, mask } => {
                self.access(&path, mask).await?;
                FsReply::Ok
            }
            FsRequest::Statfs { path } => FsReply::Statfs(self.statfs(&path).await?),
            FsRequest::Open { path } => FsReply::Attr(self.open(&path).await?),
            FsRequest::Fallocate { path, offset, len } => {
                self.fallocate(&path, offset, len).await?;
                FsReply::Ok
            }
            FsRequest::Chmod { path, mode } => {
                self.chmod(&path, mode).await?;
                FsReply::Ok
            }
            FsRequest::Chown { path, uid, gid } => {
                self.chown(&path, uid, gid).await?;
                FsReply::Ok
            }
            FsRequest::Utimens { path, atime, mtime } => {
                self.utimens(&path, atime, mtime).await?;
                FsReply::Ok
            }
        };
        Ok(reply)
    }
}
