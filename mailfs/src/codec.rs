//! Payload codec: arbitrary bytes <-> one remote message.
//!
//! The filename becomes the subject, the bytes become the single attachment,
//! and `X-Mailfs-Size` carries the exact length. The size header is the source
//! of truth: transports may pad an attachment, so decode truncates to it and
//! refuses to fabricate bytes when the attachment is shorter.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::store::{Attachment, Message, MessageSummary};

pub const SIZE_HEADER: &str = "X-Mailfs-Size";
pub const CHECKSUM_HEADER: &str = "X-Mailfs-Sha256";
pub const MARKER_HEADER: &str = "X-Mailfs-Marker";
pub const MARKER_VALUE: &str = "container";
pub const PAYLOAD_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("expected exactly one attachment, found {0}")]
    AttachmentCount(usize),

    #[error("missing X-Mailfs-Size header")]
    MissingSize,

    #[error("invalid X-Mailfs-Size header: {0:?}")]
    InvalidSize(String),

    #[error("attachment holds {actual} bytes but {declared} were declared")]
    ShortPayload { declared: u64, actual: u64 },

    #[error("payload checksum mismatch")]
    ChecksumMismatch,
}

pub fn encode(filename: &str, data: &[u8]) -> Message {
    let mut message = Message::new(filename);
    message
        .headers
        .insert(SIZE_HEADER.to_string(), data.len().to_string());
    message
        .headers
        .insert(CHECKSUM_HEADER.to_string(), checksum(data));
    message.attachments.push(Attachment {
        filename: filename.to_string(),
        content_type: PAYLOAD_CONTENT_TYPE.to_string(),
        body: Bytes::copy_from_slice(data),
    });
    message
}

pub fn decode(message: &Message) -> Result<Vec<u8>, CodecError> {
    let declared = decode_declared_size(message)?;
    let [attachment] = message.attachments.as_slice() else {
        return Err(CodecError::AttachmentCount(message.attachments.len()));
    };
    let actual = attachment.body.len() as u64;
    if actual < declared {
        tracing::error!(
            "message {:?} declares {declared} bytes but carries {actual}",
            message.subject
        );
        return Err(CodecError::ShortPayload { declared, actual });
    }
    let data = attachment.body[..declared as usize].to_vec();
    if let Some(expected) = message.header(CHECKSUM_HEADER) {
        if !expected.eq_ignore_ascii_case(&checksum(&data)) {
            tracing::error!("checksum mismatch for message {:?}", message.subject);
            return Err(CodecError::ChecksumMismatch);
        }
    }
    Ok(data)
}

pub fn decode_declared_size(message: &Message) -> Result<u64, CodecError> {
    parse_size(message.header(SIZE_HEADER))
}

/// Declared size straight from a listing, without fetching the body.
pub fn summary_declared_size(summary: &MessageSummary) -> Result<u64, CodecError> {
    parse_size(summary.header(SIZE_HEADER))
}

/// Container metadata message: subject is the unencoded directory path.
pub fn marker(path: &str, text: &str) -> Message {
    let mut message = Message::new(path);
    message
        .headers
        .insert(MARKER_HEADER.to_string(), MARKER_VALUE.to_string());
    message.text = Some(text.to_string());
    message
}

pub fn is_marker(summary: &MessageSummary) -> bool {
    summary
        .header(MARKER_HEADER)
        .is_some_and(|v| v.eq_ignore_ascii_case(MARKER_VALUE))
}

fn parse_size(value: Option<&str>) -> Result<u64, CodecError> {
    let raw = value.ok_or(CodecError::MissingSize)?;
    raw.trim()
        .parse::<u64>()
        .map_err(|_| CodecError::InvalidSize(raw.to_string()))
}

fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
