//! RFC 6455 frame codec.
//!
//! Wire layout handled here:
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |            (16/64)            |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |                    Masking-key, if MASK set                   |
//! +---------------------------------------------------------------+
//! |                          Payload Data                         |
//! +---------------------------------------------------------------+
//! ```
//!
//! A [`Frame`] always holds its payload unmasked. The mask key, if any, is
//! kept so that encoding reproduces the exact wire bytes.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

const FIN_BIT: u8 = 0b1000_0000;
const RSV_BITS: u8 = 0b0111_0000;
const OPCODE_BITS: u8 = 0b0000_1111;
const MASK_BIT: u8 = 0b1000_0000;
const LEN_BITS: u8 = 0b0111_1111;

/// Close status codes used by the proxy (RFC 6455 section 7.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    Normal = 1000,
    GoingAway = 1001,
    ProtocolError = 1002,
    TooBig = 1009,
    Unexpected = 1011,
}

impl CloseCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether an endpoint may put `code` in a close frame. 1005, 1006 and
    /// 1015 are reserved for local reporting only.
    pub fn is_sendable(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

/// Frame opcode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// A fragment following a text or binary frame
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    /// Tells whether it is a control frame or not
    pub fn is_control(self) -> bool {
        (self as u8 & 0b1000) != 0
    }
}

impl TryFrom<u8> for OpCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(FrameError::InvalidOpcode(other)),
        }
    }
}

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid opcode {0:#x}")]
    InvalidOpcode(u8),

    #[error("reserved bits set without a negotiated extension")]
    ReservedBits,

    #[error("control frame is fragmented")]
    FragmentedControl,

    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlTooLarge(u64),

    #[error("payload length is not minimally encoded or out of range")]
    InvalidLength,

    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: u64, max: u64 },

    #[error("frame masking does not match the sender's role")]
    BadMasking,

    #[error("close frame payload of 1 byte")]
    TruncatedClose,

    #[error("close code {0} may not be sent on the wire")]
    InvalidCloseCode(u16),

    #[error("close reason is not valid UTF-8")]
    InvalidCloseReason,

    #[error("connection is closed")]
    Closed,
}

impl FrameError {
    /// Close code to send the peer for this error, if the connection can
    /// still be closed in an orderly way.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            FrameError::Io(_) | FrameError::Closed => None,
            FrameError::TooLarge { .. } => Some(CloseCode::TooBig),
            _ => Some(CloseCode::ProtocolError),
        }
    }
}

/// XOR `data` with the 4-byte mask key. Applying it twice is the identity.
pub fn apply_mask(mask: [u8; 4], data: &mut [u8]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// A single WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    /// Masking key the frame was (or will be) sent with.
    pub mask: Option<[u8; 4]>,
    /// Unmasked payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// A final, unmasked frame.
    pub fn new(opcode: OpCode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Text, payload)
    }

    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Binary, payload)
    }

    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Pong, payload)
    }

    /// A close frame carrying `code` and a reason truncated to fit a control frame.
    pub fn close(code: u16, reason: &str) -> Self {
        let mut reason_len = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
        while !reason.is_char_boundary(reason_len) {
            reason_len -= 1;
        }
        let mut payload = Vec::with_capacity(2 + reason_len);
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(&reason.as_bytes()[..reason_len]);
        Self::new(OpCode::Close, payload)
    }

    /// Set the masking key used when encoding.
    pub fn with_mask(mut self, mask: Option<[u8; 4]>) -> Self {
        self.mask = mask;
        self
    }

    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Check a received close frame and return its status code, if any.
    pub fn validate_close(&self) -> Result<Option<u16>, FrameError> {
        match self.payload.len() {
            0 => Ok(None),
            1 => Err(FrameError::TruncatedClose),
            _ => {
                let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
                if !CloseCode::is_sendable(code) {
                    return Err(FrameError::InvalidCloseCode(code));
                }
                std::str::from_utf8(&self.payload[2..]).map_err(|_| FrameError::InvalidCloseReason)?;
                Ok(Some(code))
            }
        }
    }

    /// Status code of a close frame, if present.
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != OpCode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
    }

    /// Serialize into `buf`, masking the payload if a key is set.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let len = self.payload.len();
        let mut b0 = self.opcode as u8;
        if self.fin {
            b0 |= FIN_BIT;
        }
        let mask_bit = if self.mask.is_some() { MASK_BIT } else { 0 };

        buf.reserve(14 + len);
        buf.push(b0);
        if len <= 125 {
            buf.push(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            buf.push(mask_bit | 126);
            buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            buf.push(mask_bit | 127);
            buf.extend_from_slice(&(len as u64).to_be_bytes());
        }

        match self.mask {
            Some(mask) => {
                buf.extend_from_slice(&mask);
                let start = buf.len();
                buf.extend_from_slice(&self.payload);
                apply_mask(mask, &mut buf[start..]);
            }
            None => buf.extend_from_slice(&self.payload),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }

    /// Parse one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, otherwise the frame and
    /// the number of bytes it occupied.
    pub fn decode(buf: &[u8], max_payload: u64) -> Result<Option<(Frame, usize)>, FrameError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let head = Header::parse(buf[0], buf[1])?;
        let mut pos = 2;

        let ext = head.extended_len_bytes();
        if buf.len() < pos + ext {
            return Ok(None);
        }
        let len = head.payload_len(&buf[pos..pos + ext])?;
        pos += ext;
        head.check_len(len, max_payload)?;

        let mask = if head.masked {
            if buf.len() < pos + 4 {
                return Ok(None);
            }
            let key = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
            pos += 4;
            Some(key)
        } else {
            None
        };

        let len = len as usize;
        if buf.len() < pos + len {
            return Ok(None);
        }
        let mut payload = buf[pos..pos + len].to_vec();
        if let Some(mask) = mask {
            apply_mask(mask, &mut payload);
        }

        Ok(Some((
            Frame {
                fin: head.fin,
                opcode: head.opcode,
                mask,
                payload,
            },
            pos + len,
        )))
    }
}

/// The fixed two-byte frame header.
#[derive(Debug, Clone, Copy)]
struct Header {
    fin: bool,
    opcode: OpCode,
    masked: bool,
    len7: u8,
}

impl Header {
    fn parse(b0: u8, b1: u8) -> Result<Self, FrameError> {
        if b0 & RSV_BITS != 0 {
            return Err(FrameError::ReservedBits);
        }
        let opcode = OpCode::try_from(b0 & OPCODE_BITS)?;
        let fin = b0 & FIN_BIT != 0;
        if opcode.is_control() && !fin {
            return Err(FrameError::FragmentedControl);
        }
        Ok(Self {
            fin,
            opcode,
            masked: b1 & MASK_BIT != 0,
            len7: b1 & LEN_BITS,
        })
    }

    fn extended_len_bytes(&self) -> usize {
        match self.len7 {
            126 => 2,
            127 => 8,
            _ => 0,
        }
    }

    /// Resolve the payload length from the extended length bytes, rejecting
    /// non-minimal encodings and lengths with the top bit set.
    fn payload_len(&self, ext: &[u8]) -> Result<u64, FrameError> {
        match self.len7 {
            126 => {
                let len = u16::from_be_bytes([ext[0], ext[1]]) as u64;
                if len < 126 {
                    return Err(FrameError::InvalidLength);
                }
                Ok(len)
            }
            127 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&ext[..8]);
                let len = u64::from_be_bytes(raw);
                if len >> 63 != 0 || len <= u16::MAX as u64 {
                    return Err(FrameError::InvalidLength);
                }
                Ok(len)
            }
            n => Ok(n as u64),
        }
    }

    fn check_len(&self, len: u64, max_payload: u64) -> Result<(), FrameError> {
        if self.opcode.is_control() && len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(FrameError::ControlTooLarge(len));
        }
        if len > max_payload {
            return Err(FrameError::TooLarge {
                len,
                max: max_payload,
            });
        }
        Ok(())
    }
}

/// Read one frame from `reader`.
///
/// Returns `Ok(None)` if the stream ended cleanly before a new frame began.
pub async fn read_frame<R>(reader: &mut R, max_payload: u64) -> Result<Option<Frame>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    if reader.read(&mut head[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut head[1..]).await?;
    let head = Header::parse(head[0], head[1])?;

    let mut ext = [0u8; 8];
    let ext = &mut ext[..head.extended_len_bytes()];
    reader.read_exact(ext).await?;
    let len = head.payload_len(ext)?;
    head.check_len(len, max_payload)?;

    let mask = if head.masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    if let Some(mask) = mask {
        apply_mask(mask, &mut payload);
    }

    Ok(Some(Frame {
        fin: head.fin,
        opcode: head.opcode,
        mask,
        payload,
    }))
}

/// Write one frame to `writer` and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame.to_bytes();
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
