//! FSTRM-style wire format for exporting a [`crate::broadcast::Listener`]
//! to a remote consumer: big-endian 32-bit length-prefixed data frames,
//! with a zero-length prefix escaping into a typed control frame.
//!
//! Handshake: READY → ACCEPT (content-type negotiation) → START → data
//! frames → STOP/FINISH.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};

use crate::broadcast::Listener;

const CONTROL_ESCAPE: u32 = 0;
const FINISH_GRACE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ControlType {
    Accept = 0x01,
    Start = 0x02,
    Stop = 0x03,
    Ready = 0x04,
    Finish = 0x05,
}

impl ControlType {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x01 => Some(ControlType::Accept),
            0x02 => Some(ControlType::Start),
            0x03 => Some(ControlType::Stop),
            0x04 => Some(ControlType::Ready),
            0x05 => Some(ControlType::Finish),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ControlFrame {
    pub kind: ControlType,
    pub content_type: Option<Vec<u8>>,
}

#[derive(Debug)]
pub enum FrameStreamError {
    Io(std::io::Error),
    UnexpectedEof,
    UnknownControlType(u32),
    HandshakeMismatch(&'static str),
}

impl std::fmt::Display for FrameStreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {}", err),
            Self::UnexpectedEof => write!(f, "peer closed mid-frame"),
            Self::UnknownControlType(value) => write!(f, "unknown control frame type {}", value),
            Self::HandshakeMismatch(stage) => write!(f, "unexpected frame during {} handshake stage", stage),
        }
    }
}

impl std::error::Error for FrameStreamError {}

impl From<std::io::Error> for FrameStreamError {
    fn from(err: std::io::Error) -> Self {
        FrameStreamError::Io(err)
    }
}

/// Writes a data frame: a 4-byte big-endian length followed by `payload`.
/// `payload` must be non-empty — an empty data frame would be
/// indistinguishable from the control-frame escape.
async fn write_data_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), FrameStreamError> {
    debug_assert!(!payload.is_empty());
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Writes a control frame: the zero-length escape, the frame's encoded
/// length, the control type, and an optional content-type field.
async fn write_control_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &ControlFrame,
) -> Result<(), FrameStreamError> {
    let mut body = (frame.kind as u32).to_be_bytes().to_vec();
    if let Some(content_type) = &frame.content_type {
        body.extend_from_slice(&(content_type.len() as u32).to_be_bytes());
        body.extend_from_slice(content_type);
    }

    writer.write_all(&CONTROL_ESCAPE.to_be_bytes()).await?;
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads a raw 4-byte big-endian length prefix, shared by data frames and
/// the control-frame escape (a prefix of zero means control).
async fn read_length_prefix<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32, FrameStreamError> {
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(u32::from_be_bytes(buf)),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(FrameStreamError::UnexpectedEof)
        }
        Err(err) => Err(err.into()),
    }
}

/// Reads a control frame, including its leading zero-length escape.
async fn read_control_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<ControlFrame, FrameStreamError> {
    let escape = read_length_prefix(reader).await?;
    if escape != CONTROL_ESCAPE {
        return Err(FrameStreamError::HandshakeMismatch("control escape"));
    }

    let frame_len = read_length_prefix(reader).await?;
    let mut body = vec![0u8; frame_len as usize];
    reader.read_exact(&mut body).await?;

    if body.len() < 4 {
        return Err(FrameStreamError::UnexpectedEof);
    }
    let kind_value = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    let kind = ControlType::from_u32(kind_value).ok_or(FrameStreamError::UnknownControlType(kind_value))?;

    let content_type = if body.len() > 4 {
        let ct_len = u32::from_be_bytes([body[4], body[5], body[6], body[7]]) as usize;
        Some(body[8..8 + ct_len].to_vec())
    } else {
        None
    };

    Ok(ControlFrame { kind, content_type })
}

/// Expects the next frame to be a control frame of `expected`, at a given
/// handshake stage (used only for error messages).
async fn expect_control<R: AsyncRead + Unpin>(
    reader: &mut R,
    expected: ControlType,
    stage: &'static str,
) -> Result<ControlFrame, FrameStreamError> {
    let frame = read_control_frame(reader).await?;
    if frame.kind != expected {
        return Err(FrameStreamError::HandshakeMismatch(stage));
    }
    Ok(frame)
}

/// Runs the producer side of the handshake over `stream`, then streams
/// every event drained from `listener` as data frames until the listener's
/// `notified()` future is dropped (the caller decides when to stop, e.g. on
/// a shutdown signal) or the peer sends STOP.
pub async fn export_listener<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    listener: &Listener,
    content_type: &[u8],
) -> Result<(), FrameStreamError> {
    expect_control(stream, ControlType::Ready, "READY").await?;
    write_control_frame(
        stream,
        &ControlFrame {
            kind: ControlType::Accept,
            content_type: Some(content_type.to_vec()),
        },
    )
    .await?;
    expect_control(stream, ControlType::Start, "START").await?;

    loop {
        listener.notified().await;
        for event in listener.drain() {
            let mut payload = event.query;
            payload.extend_from_slice(&event.response);
            if payload.is_empty() {
                continue;
            }
            write_data_frame(stream, &payload).await?;
        }
    }
}

/// Reads the STOP frame and, within the 15-second grace window, replies
/// FINISH. Called by the side that is shutting the export down.
pub async fn send_stop_and_await_finish<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
) -> Result<(), FrameStreamError> {
    write_control_frame(
        stream,
        &ControlFrame {
            kind: ControlType::Stop,
            content_type: None,
        },
    )
    .await?;

    match timeout(FINISH_GRACE, expect_control(stream, ControlType::Finish, "FINISH")).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => {
            log::warn!("frame-stream peer did not send FINISH within the grace window");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn control_frame_round_trips_through_a_duplex_stream() {
        let (mut a, mut b) = duplex(4096);

        let frame = ControlFrame {
            kind: ControlType::Ready,
            content_type: None,
        };
        write_control_frame(&mut a, &frame).await.unwrap();

        let received = read_control_frame(&mut b).await.unwrap();
        assert_eq!(received.kind, ControlType::Ready);
        assert!(received.content_type.is_none());
    }

    #[tokio::test]
    async fn control_frame_carries_a_content_type() {
        let (mut a, mut b) = duplex(4096);

        let frame = ControlFrame {
            kind: ControlType::Accept,
            content_type: Some(b"protobuf:dnstap.Dnstap".to_vec()),
        };
        write_control_frame(&mut a, &frame).await.unwrap();

        let received = read_control_frame(&mut b).await.unwrap();
        assert_eq!(received.kind, ControlType::Accept);
        assert_eq!(
            received.content_type.as_deref(),
            Some(&b"protobuf:dnstap.Dnstap"[..])
        );
    }

    #[tokio::test]
    async fn data_frame_is_length_prefixed_and_not_mistaken_for_control() {
        let (mut a, mut b) = duplex(4096);
        write_data_frame(&mut a, b"hello").await.unwrap();

        let len = read_length_prefix(&mut b).await.unwrap();
        assert_eq!(len, 5);
        let mut payload = vec![0u8; len as usize];
        tokio::io::AsyncReadExt::read_exact(&mut b, &mut payload)
            .await
            .unwrap();
        assert_eq!(payload, b"hello");
    }
}
