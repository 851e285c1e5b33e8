//! RFC 822 / MIME text form of a [`Message`].
//!
//! Only the subset the filesystem produces is understood: a `multipart/mixed`
//! body holding an optional base64 text part and base64 attachment parts.
//! Non-ASCII subjects and filenames use RFC 2047 `B` encoded words.

use super::{Attachment, Message, StoreError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::SystemTime;

const BOUNDARY: &str = "=_mailfs_part_boundary";
const LINE_WIDTH: usize = 76;

/// Headers handled structurally; everything else round-trips through
/// [`Message::headers`].
const STRUCTURAL: [&str; 5] = [
    "date",
    "subject",
    "mime-version",
    "content-type",
    "content-transfer-encoding",
];

pub fn render(message: &Message) -> String {
    let mut out = String::new();
    let date: DateTime<Utc> = message.date.into();
    push_line(&mut out, &format!("Date: {}", date.to_rfc2822()));
    push_line(&mut out, &format!("Subject: {}", encode_word(&message.subject)));
    for (name, value) in &message.headers {
        push_line(&mut out, &format!("{name}: {}", encode_word(value)));
    }
    push_line(&mut out, "MIME-Version: 1.0");
    push_line(
        &mut out,
        &format!("Content-Type: multipart/mixed; boundary=\"{BOUNDARY}\""),
    );
    push_line(&mut out, "");

    if let Some(text) = &message.text {
        push_line(&mut out, &format!("--{BOUNDARY}"));
        push_line(&mut out, "Content-Type: text/plain; charset=utf-8");
        push_line(&mut out, "Content-Transfer-Encoding: base64");
        push_line(&mut out, "");
        push_base64(&mut out, text.as_bytes());
    }
    for att in &message.attachments {
        push_line(&mut out, &format!("--{BOUNDARY}"));
        push_line(&mut out, &format!("Content-Type: {}", att.content_type));
        push_line(
            &mut out,
            &format!(
                "Content-Disposition: attachment; filename=\"{}\"",
                encode_word(&att.filename)
            ),
        );
        push_line(&mut out, "Content-Transfer-Encoding: base64");
        push_line(&mut out, "");
        push_base64(&mut out, &att.body);
    }
    push_line(&mut out, &format!("--{BOUNDARY}--"));
    out
}

/// Parses the top-level headers only, leaving the body undecoded.
pub fn parse_head(raw: &str) -> Result<Message, StoreError> {
    let lines = split_lines(raw);
    let blank = header_end(&lines)?;
    head_message(&lines[..blank])
}

pub fn parse(raw: &str) -> Result<Message, StoreError> {
    let lines = split_lines(raw);
    let blank = header_end(&lines)?;
    let mut message = head_message(&lines[..blank])?;

    let delimiter = format!("--{BOUNDARY}");
    let closing = format!("--{BOUNDARY}--");
    let mut parts: Vec<Vec<&str>> = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in &lines[blank + 1..] {
        if *line == closing {
            parts.extend(current.take());
            break;
        }
        if *line == delimiter {
            parts.extend(current.take());
            current = Some(Vec::new());
            continue;
        }
        if let Some(part) = current.as_mut() {
            part.push(line);
        }
    }
    if current.is_some() {
        return Err(StoreError::Malformed("unterminated multipart body".into()));
    }

    for part in parts {
        let split = part.iter().position(|l| l.is_empty()).unwrap_or(part.len());
        let headers = parse_headers(&part[..split]);
        let body: String = part[split..].concat();
        let data = B64
            .decode(body.trim())
            .map_err(|e| StoreError::Malformed(format!("bad base64 part: {e}")))?;
        let content_type = header_value(&headers, "content-type")
            .unwrap_or("application/octet-stream")
            .to_string();
        match header_value(&headers, "content-disposition") {
            Some(disposition) if disposition.starts_with("attachment") => {
                let filename = match disposition_filename(disposition) {
                    Some(raw) => decode_word(raw)?,
                    None => String::new(),
                };
                message.attachments.push(Attachment {
                    filename,
                    content_type,
                    body: Bytes::from(data),
                });
            }
            _ => {
                let text = String::from_utf8(data)
                    .map_err(|_| StoreError::Malformed("text part is not UTF-8".into()))?;
                message.text = Some(text);
            }
        }
    }
    Ok(message)
}

fn split_lines(raw: &str) -> Vec<&str> {
    raw.split('\n').map(|l| l.trim_end_matches('\r')).collect()
}

fn header_end(lines: &[&str]) -> Result<usize, StoreError> {
    lines
        .iter()
        .position(|l| l.is_empty())
        .ok_or_else(|| StoreError::Malformed("missing header/body separator".into()))
}

fn head_message(lines: &[&str]) -> Result<Message, StoreError> {
    let mut message = Message::new("");
    message.date = SystemTime::UNIX_EPOCH;
    for (name, value) in parse_headers(lines) {
        match name.to_ascii_lowercase().as_str() {
            "date" => {
                let parsed = DateTime::parse_from_rfc2822(&value)
                    .map_err(|e| StoreError::Malformed(format!("bad Date header: {e}")))?;
                message.date = parsed.into();
            }
            "subject" => message.subject = decode_word(&value)?,
            lower if STRUCTURAL.contains(&lower) => {}
            _ => {
                let decoded = decode_word(&value)?;
                message.headers.insert(name, decoded);
            }
        }
    }
    Ok(message)
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push_str("\r\n");
}

fn push_base64(out: &mut String, data: &[u8]) {
    let encoded = B64.encode(data);
    // base64 output is ASCII, so byte chunks are valid str slices
    for chunk in encoded.as_bytes().chunks(LINE_WIDTH) {
        push_line(out, &String::from_utf8_lossy(chunk));
    }
}

fn parse_headers(lines: &[&str]) -> BTreeMap<String, String> {
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in lines {
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push_str(line.trim_start());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    headers.into_iter().collect()
}

fn header_value<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    super::find_header(headers, name)
}

fn disposition_filename(disposition: &str) -> Option<&str> {
    let start = disposition.find("filename=\"")? + "filename=\"".len();
    let rest = &disposition[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

// header values are trimmed on parse, so edge whitespace must be encoded
fn needs_encoding(value: &str) -> bool {
    !value.is_ascii()
        || value.contains(['\r', '\n', '"'])
        || value.starts_with("=?")
        || value.trim() != value
}

fn encode_word(value: &str) -> String {
    if needs_encoding(value) {
        format!("=?UTF-8?B?{}?=", B64.encode(value.as_bytes()))
    } else {
        value.to_string()
    }
}

fn decode_word(value: &str) -> Result<String, StoreError> {
    let Some(inner) = value
        .strip_prefix("=?UTF-8?B?")
        .and_then(|v| v.strip_suffix("?="))
    else {
        return Ok(value.to_string());
    };
    let bytes = B64
        .decode(inner)
        .map_err(|e| StoreError::Malformed(format!("bad encoded word: {e}")))?;
    String::from_utf8(bytes).map_err(|_| StoreError::Malformed("encoded word is not UTF-8".into()))
}
