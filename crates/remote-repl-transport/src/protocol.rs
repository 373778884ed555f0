//! Wire protocol between boundary-crossing services.
//!
//! Newline-delimited JSON frames. Byte strings travel base64 encoded; proxies
//! travel only as object references.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::CallError;

/// Maximum frame size (16 MB).
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Reference to an object exported by some service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Address of the owning service, as rendered by `ConnectionAddress`.
    pub uri: String,
    /// Registry id within that service.
    pub id: u64,
}

/// Value that may cross the boundary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    List(Vec<Value>),
    Ref(ObjectRef),
}

impl Value {
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Byte view of `Bytes` and `Str` values.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::Str(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Nil, Into::into)
    }
}

impl From<ObjectRef> for Value {
    fn from(r: ObjectRef) -> Self {
        Self::Ref(r)
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::BASE64;

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Result of a call as carried in a reply frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ok { value: Value },
    Err { error: CallError },
}

impl From<Result<Value, CallError>> for Outcome {
    fn from(r: Result<Value, CallError>) -> Self {
        match r {
            Ok(value) => Self::Ok { value },
            Err(error) => Self::Err { error },
        }
    }
}

impl From<Outcome> for Result<Value, CallError> {
    fn from(o: Outcome) -> Self {
        match o {
            Outcome::Ok { value } => Ok(value),
            Outcome::Err { error } => Err(error),
        }
    }
}

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame from the connecting side.
    Hello { secret: Option<String> },
    /// Handshake accepted.
    Welcome,
    /// Handshake refused; the connection is closed afterwards.
    Rejected { reason: String },
    /// Invoke `op` on object `target`.
    Call {
        id: u64,
        target: u64,
        op: String,
        args: Vec<Value>,
    },
    /// Answer to the call with the same `id`.
    Reply { id: u64, result: Outcome },
}

/// Frame read/write error.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frame exceeds {} bytes", MAX_FRAME_BYTES)]
    TooLarge,
}

/// Write one frame followed by a newline.
///
/// # Errors
/// Returns error if serialization or the write fails.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let json = serde_json::to_string(frame)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Reads newline-delimited frames.
///
/// The partial line lives in the reader rather than in the pending future, so
/// [`FrameReader::read_frame`] is cancel safe and may be raced in
/// `tokio::select!` without losing bytes. Lines longer than
/// [`MAX_FRAME_BYTES`] are refused before they are buffered in full.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::new(),
        }
    }

    /// Read the next frame. Returns `Ok(None)` on EOF.
    ///
    /// # Errors
    /// Returns error on I/O failure, oversized or malformed frames.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(None);
            };
            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_slice(trimmed)?));
        }
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        loop {
            // The only await point; nothing is consumed until it resolves.
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.line)));
            }

            let (used, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => (end + 1, true),
                None => (available.len(), false),
            };
            if self.line.len() + used > MAX_FRAME_BYTES {
                self.line.clear();
                return Err(FrameError::TooLarge);
            }
            self.line.extend_from_slice(&available[..used]);
            self.reader.consume(used);

            if complete {
                return Ok(Some(std::mem::take(&mut self.line)));
            }
        }
    }
}
