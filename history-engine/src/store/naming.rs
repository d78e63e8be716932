//! On-disk names for histories and records.

use chrono::{DateTime, TimeZone, Utc};

use crate::settings::BackupType;

/// Extension given to directory snapshots.
pub const BUNDLE_EXT: &str = ".bundle.zst";

/// Largest per-millisecond counter; the next record moves to the next millisecond.
pub const MAX_COUNTER: u32 = 9999;

/// Encode an identity component as a single safe directory name.
///
/// Everything outside `[A-Za-z0-9._-]` is percent-encoded, as is a leading
/// `.`, so no component can be `.`/`..` or contain a separator. The empty
/// string becomes `%`.
pub fn encode_component(raw: &str) -> String {
    if raw.is_empty() {
        return "%".to_string();
    }
    let mut out = String::with_capacity(raw.len());
    for (i, byte) in raw.bytes().enumerate() {
        let safe = byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-') || (byte == b'.' && i > 0);
        if safe {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

pub fn decode_component(encoded: &str) -> Option<String> {
    if encoded == "%" {
        return Some(String::new());
    }
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Extension for records of a config at `path`.
pub fn record_extension(path: &str, backup_type: BackupType) -> String {
    if backup_type == BackupType::Directory {
        return BUNDLE_EXT.to_string();
    }
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(dot) if dot > 0 => name[dot..].to_string(),
        _ => String::new(),
    }
}

/// Position of a record in its history; the filename is derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stamp {
    pub millis: i64,
    pub counter: u32,
}

impl Stamp {
    /// Next stamp after `last` that is not earlier than `now_millis`.
    pub fn next(last: Option<Stamp>, now_millis: i64) -> Stamp {
        match last {
            Some(last) if last.millis >= now_millis => {
                if last.counter >= MAX_COUNTER {
                    Stamp {
                        millis: last.millis + 1,
                        counter: 0,
                    }
                } else {
                    Stamp {
                        millis: last.millis,
                        counter: last.counter + 1,
                    }
                }
            }
            _ => Stamp {
                millis: now_millis,
                counter: 0,
            },
        }
    }

    pub fn filename(&self, ext: &str) -> String {
        format!("{:013}-{:04}{}", self.millis, self.counter, ext)
    }

    pub fn date(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis)
            .single()
            .unwrap_or_default()
    }

    /// Parse a record filename; anything else (temp files, the index) is `None`.
    pub fn parse(filename: &str) -> Option<Stamp> {
        let millis = filename.get(..13)?;
        let counter = filename.get(14..18)?;
        if filename.as_bytes().get(13) != Some(&b'-')
            || !millis.bytes().all(|b| b.is_ascii_digit())
            || !counter.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        let rest = &filename[18..];
        if !(rest.is_empty() || rest.starts_with('.')) || rest.contains('/') {
            return None;
        }
        Some(Stamp {
            millis: millis.parse().ok()?,
            counter: counter.parse().ok()?,
        })
    }
}
