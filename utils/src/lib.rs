use serde::{Deserialize, Serialize};
use uuid::Uuid;

const REQUEST_V2_MAGIC: &[u8; 4] = b"DLR2";

/// Launch arguments relayed from a second invocation to the running instance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub event_id: String,
    pub sender_pid: u32,
    pub ts: u64,
    /// Raw command-line arguments, in the order they were given.
    pub args: Vec<String>,
}

/// How a payload was framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Magic-prefixed bincode body.
    Versioned,
    /// Newline-joined raw arguments, no header.
    Legacy,
}

impl LaunchRequest {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            sender_pid: std::process::id(),
            ts: now_ms(),
            args,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        let body = bincode::serialize(self)?;
        let mut out = Vec::with_capacity(REQUEST_V2_MAGIC.len() + body.len());
        out.extend_from_slice(REQUEST_V2_MAGIC);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Newline-joined form understood by every reader, including ones that
    /// predate the versioned framing. Arguments containing `\n` do not survive it.
    pub fn to_legacy_bytes(&self) -> Vec<u8> {
        self.args.join("\n").into_bytes()
    }

    /// Decode one whole connection's payload.
    ///
    /// Anything without the magic prefix is treated as the legacy format:
    /// newline-separated arguments, with a trailing `\r` dropped from each line.
    /// A magic-prefixed payload that fails to decode but reads as plain text
    /// (e.g. a `DLR2://` URL) is legacy too.
    /// Legacy payloads carry no provenance, so `event_id` is freshly generated
    /// and `sender_pid` is 0.
    pub fn try_from_bytes(b: &[u8]) -> Result<(Self, Framing), bincode::Error> {
        if b.len() >= REQUEST_V2_MAGIC.len() && &b[..REQUEST_V2_MAGIC.len()] == REQUEST_V2_MAGIC {
            match bincode::deserialize(&b[REQUEST_V2_MAGIC.len()..]) {
                Ok(req) => return Ok((req, Framing::Versioned)),
                Err(e) if !is_plain_text(b) => return Err(e),
                Err(_) => {}
            }
        }

        let text = String::from_utf8_lossy(b);
        let args = if text.is_empty() {
            Vec::new()
        } else {
            text.split('\n')
                .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
                .collect()
        };
        let req = LaunchRequest {
            event_id: Uuid::new_v4().to_string(),
            sender_pid: 0,
            ts: now_ms(),
            args,
        };
        Ok((req, Framing::Legacy))
    }
}

/// Legacy payloads are UTF-8 arguments; bincode length prefixes put NUL bytes
/// into every versioned body.
fn is_plain_text(b: &[u8]) -> bool {
    !b.contains(&0) && std::str::from_utf8(b).is_ok()
}

pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
