//! Text encoding of [messages](Message) and the length-delimited framing used
//! between clusters.
//!
//! Local queues and sockets carry the same text, which lets the
//! [Router](crate::router::Router) treat both deliveries alike.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::Message;
use crate::error::{DecodeError, FrameError};

/// Default upper bound for a single cross-cluster frame
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Encodes a message as a JSON object of string values
pub fn encode(message: &Message) -> String {
    Value::Object(
        message
            .iter()
            .map(|(k, v)| (k.to_owned(), Value::String(v.to_owned())))
            .collect(),
    )
    .to_string()
}

/// Decodes text produced by [encode]. Anything other than a JSON object of strings is rejected.
pub fn decode(text: &str) -> Result<Message, DecodeError> {
    Ok(serde_json::from_str(text)?)
}

/// Writes `text` prefixed with its length as a 4-byte big-endian integer.
pub async fn write_frame<W>(
    sink: &mut W,
    text: &str,
    max_frame_size: usize,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let n = text.len();
    if n == 0 {
        return Err(FrameError::Empty);
    }
    if n > max_frame_size {
        return Err(FrameError::TooLarge(n));
    }
    let len: u32 = n.try_into().map_err(|_| FrameError::TooLarge(n))?;

    let mut frame = Vec::with_capacity(4 + n);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(text.as_bytes());
    sink.write_all(&frame).await?;
    sink.flush().await?;
    Ok(())
}

/// Reads one frame written by [write_frame].
/// Returns [FrameError::Closed] when the peer hangs up between two frames.
pub async fn read_frame<R>(stream: &mut R, max_frame_size: usize) -> Result<String, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    match stream.read_exact(&mut prefix).await {
        Ok(_) => (),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len == 0 {
        return Err(FrameError::Empty);
    }
    if len > max_frame_size {
        return Err(FrameError::TooLarge(len));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| FrameError::NotUtf8)
}
