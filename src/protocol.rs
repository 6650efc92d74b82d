//! Wire codec for the checksum offload protocol.
//!
//! Every message is a 4-byte big-endian type tag followed by a fixed or
//! length-prefixed body:
//!
//! ```text
//! tag 1  Init          C->S  request_count:u32
//! tag 2  Ack           S->C  adjusted_count:u32
//! tag 3  HashRequest   C->S  payload_len:u32 payload:[payload_len]
//! tag 4  HashResponse  S->C  index:u32 digest:[32]
//! ```
//!
//! Reads and writes either transfer the full message or fail. A short
//! read is never retried.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::engine::{Digest, DIGEST_LEN};
use crate::error::{Error, Result};

/// Largest payload a HashRequest may carry (16 MiB).
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Multiplier the server applies to the request count in its Ack.
pub const ACK_MULTIPLIER: u32 = 40;

/// Size of the type tag preceding every message.
const TAG_LEN: usize = 4;

/// Message type tag as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageTag {
    Init = 1,
    Ack = 2,
    HashRequest = 3,
    HashResponse = 4,
}

impl MessageTag {
    pub fn name(self) -> &'static str {
        match self {
            MessageTag::Init => "Init",
            MessageTag::Ack => "Ack",
            MessageTag::HashRequest => "HashRequest",
            MessageTag::HashResponse => "HashResponse",
        }
    }
}

impl TryFrom<u32> for MessageTag {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(MessageTag::Init),
            2 => Ok(MessageTag::Ack),
            3 => Ok(MessageTag::HashRequest),
            4 => Ok(MessageTag::HashResponse),
            other => Err(Error::UnknownTag(other)),
        }
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Client announces how many HashRequests will follow.
    Init { request_count: u32 },

    /// Server acknowledges the Init. Advisory only; clients do not act on it.
    Ack { adjusted_count: u32 },

    /// One chunk of client data to checksum.
    HashRequest { payload: Bytes },

    /// Digest of the `index`-th HashRequest of the session (0-based).
    HashResponse { index: u32, digest: Digest },
}

impl Message {
    /// Build the Ack the server sends for a given Init.
    pub fn ack_for(request_count: u32) -> Self {
        Message::Ack {
            adjusted_count: adjusted_count(request_count),
        }
    }

    pub fn tag(&self) -> MessageTag {
        match self {
            Message::Init { .. } => MessageTag::Init,
            Message::Ack { .. } => MessageTag::Ack,
            Message::HashRequest { .. } => MessageTag::HashRequest,
            Message::HashResponse { .. } => MessageTag::HashResponse,
        }
    }

    /// Number of bytes this message occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        TAG_LEN
            + match self {
                Message::Init { .. } | Message::Ack { .. } => 4,
                Message::HashRequest { payload } => 4 + payload.len(),
                Message::HashResponse { .. } => 4 + DIGEST_LEN,
            }
    }

    /// Append the wire form of this message to `buf`.
    ///
    /// The payload length of a HashRequest is taken from the payload itself,
    /// so the length prefix always matches the bytes that follow.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u32(self.tag() as u32);

        match self {
            Message::Init { request_count } => buf.put_u32(*request_count),
            Message::Ack { adjusted_count } => buf.put_u32(*adjusted_count),
            Message::HashRequest { payload } => {
                debug_assert!(payload.len() <= MAX_PAYLOAD_LEN as usize);
                buf.put_u32(payload.len() as u32);
                buf.put_slice(payload);
            }
            Message::HashResponse { index, digest } => {
                buf.put_u32(*index);
                buf.put_slice(digest);
            }
        }
    }

    /// Encode into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Value carried in the Ack for a given request count.
pub fn adjusted_count(request_count: u32) -> u32 {
    request_count.wrapping_mul(ACK_MULTIPLIER)
}

/// Read one complete message from `reader`.
///
/// Returns [`Error::ConnectionClosed`] if the stream ends before the first
/// byte of a tag, and an `UnexpectedEof` I/O error if it ends anywhere
/// inside a message.
pub async fn read_message<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let tag = read_tag(reader).await?;

    let message = match tag {
        MessageTag::Init => Message::Init {
            request_count: reader.read_u32().await?,
        },
        MessageTag::Ack => Message::Ack {
            adjusted_count: reader.read_u32().await?,
        },
        MessageTag::HashRequest => {
            let len = reader.read_u32().await?;
            if len > MAX_PAYLOAD_LEN {
                return Err(Error::PayloadTooLarge {
                    len: u64::from(len),
                    max: MAX_PAYLOAD_LEN,
                });
            }
            let mut payload = vec![0u8; len as usize];
            reader.read_exact(&mut payload).await?;
            Message::HashRequest {
                payload: Bytes::from(payload),
            }
        }
        MessageTag::HashResponse => {
            let index = reader.read_u32().await?;
            let mut digest = [0u8; DIGEST_LEN];
            reader.read_exact(&mut digest).await?;
            Message::HashResponse { index, digest }
        }
    };

    trace!(tag = %tag, "Read message");
    Ok(message)
}

/// Write one complete message to `writer` and flush it.
///
/// A HashRequest whose payload exceeds [`MAX_PAYLOAD_LEN`] is refused
/// before anything is written.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if let Message::HashRequest { payload } = message {
        if payload.len() > MAX_PAYLOAD_LEN as usize {
            return Err(Error::PayloadTooLarge {
                len: payload.len() as u64,
                max: MAX_PAYLOAD_LEN,
            });
        }
    }

    let bytes = message.to_bytes();
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    trace!(tag = %message.tag(), len = bytes.len(), "Wrote message");
    Ok(())
}

/// Read the type tag, telling a clean close apart from a torn tag.
async fn read_tag<R>(reader: &mut R) -> Result<MessageTag>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; TAG_LEN];
    let mut filled = 0;

    while filled < TAG_LEN {
        let n = reader.read(&mut tag[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                Error::ConnectionClosed
            } else {
                std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into()
            });
        }
        filled += n;
    }

    MessageTag::try_from(u32::from_be_bytes(tag))
}
