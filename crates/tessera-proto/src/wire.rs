//! Frame codec for the client/server byte stream.
//!
//! Every frame is laid out as:
//!
//! ```text
//! {u32 tag}{u32 payload_len}{simple data}{payload}
//! ```
//!
//! The simple-data size is fixed per tag and looked up through
//! [`Message::simple_size`], which acts as the tag → decoder factory. All
//! integers are native-endian; the socket never leaves the machine.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

/// Default upper bound on a frame payload
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Errors raised while decoding a client or server stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown message tag {0}")]
    UnknownTag(u32),

    #[error("payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("message {tag} is malformed: {reason}")]
    Malformed { tag: u32, reason: &'static str },

    #[error("invalid UTF-8 in message {0}")]
    InvalidString(u32),
}

/// Frame header preceding every message
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct FrameHeader {
    pub tag: u32,
    pub payload_len: u32,
}

impl FrameHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// A message type that can travel in a frame
pub trait Message: Sized {
    /// Wire tag for this value
    fn tag(&self) -> u32;

    /// Size of the fixed simple-data block for `tag`, or `None` when the tag
    /// is unknown
    fn simple_size(tag: u32) -> Option<usize>;

    /// Serialize into `(simple, payload)`
    fn encode_body(&self) -> (Vec<u8>, Vec<u8>);

    /// Rebuild a value from its tag and body parts
    fn decode_body(tag: u32, simple: &[u8], payload: &[u8]) -> Result<Self, ProtocolError>;
}

/// Encode a message into a complete frame
pub fn encode_frame<M: Message>(msg: &M) -> Vec<u8> {
    let (simple, payload) = msg.encode_body();
    let header = FrameHeader {
        tag: msg.tag(),
        payload_len: payload.len() as u32,
    };
    let mut buf = Vec::with_capacity(FrameHeader::SIZE + simple.len() + payload.len());
    buf.extend_from_slice(bytemuck::bytes_of(&header));
    buf.extend_from_slice(&simple);
    buf.extend_from_slice(&payload);
    buf
}

/// Decoder position inside the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    AwaitingHeader,
    AwaitingBody {
        tag: u32,
        simple_len: usize,
        payload_len: usize,
    },
}

/// Incremental frame decoder.
///
/// Bytes are fed as they arrive from the socket; complete messages are
/// pulled out with [`FrameDecoder::next_message`]. A partial frame stays
/// buffered between reads.
#[derive(Debug)]
pub struct FrameDecoder<M> {
    buf: Vec<u8>,
    state: DecodeState,
    max_payload: usize,
    _marker: std::marker::PhantomData<fn() -> M>,
}

impl<M: Message> FrameDecoder<M> {
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: Vec::new(),
            state: DecodeState::AwaitingHeader,
            max_payload,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Bytes received but not yet consumed by a complete frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pull the next complete message, if one is buffered
    pub fn next_message(&mut self) -> Result<Option<M>, ProtocolError> {
        loop {
            match self.state {
                DecodeState::AwaitingHeader => {
                    if self.buf.len() < FrameHeader::SIZE {
                        return Ok(None);
                    }
                    let header: FrameHeader =
                        bytemuck::pod_read_unaligned(&self.buf[..FrameHeader::SIZE]);
                    let simple_len =
                        M::simple_size(header.tag).ok_or(ProtocolError::UnknownTag(header.tag))?;
                    let payload_len = header.payload_len as usize;
                    if payload_len > self.max_payload {
                        return Err(ProtocolError::PayloadTooLarge {
                            len: payload_len,
                            max: self.max_payload,
                        });
                    }
                    self.buf.drain(..FrameHeader::SIZE);
                    self.state = DecodeState::AwaitingBody {
                        tag: header.tag,
                        simple_len,
                        payload_len,
                    };
                }
                DecodeState::AwaitingBody {
                    tag,
                    simple_len,
                    payload_len,
                } => {
                    let total = simple_len + payload_len;
                    if self.buf.len() < total {
                        return Ok(None);
                    }
                    let body: Vec<u8> = self.buf.drain(..total).collect();
                    self.state = DecodeState::AwaitingHeader;
                    let (simple, payload) = body.split_at(simple_len);
                    return M::decode_body(tag, simple, payload).map(Some);
                }
            }
        }
    }
}

/// Append a length-prefixed list of strings to a payload; the lengths are
/// carried in the simple data by the caller
pub(crate) fn push_str(payload: &mut Vec<u8>, s: &str) -> u32 {
    payload.extend_from_slice(s.as_bytes());
    s.len() as u32
}

/// Cursor over a payload used by message decoders
pub(crate) struct PayloadReader<'a> {
    tag: u32,
    rest: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub(crate) fn new(tag: u32, payload: &'a [u8]) -> Self {
        Self { tag, rest: payload }
    }

    pub(crate) fn bytes(&mut self, len: u32) -> Result<&'a [u8], ProtocolError> {
        let len = len as usize;
        if self.rest.len() < len {
            return Err(ProtocolError::Malformed {
                tag: self.tag,
                reason: "payload shorter than declared lengths",
            });
        }
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        Ok(head)
    }

    pub(crate) fn string(&mut self, len: u32) -> Result<String, ProtocolError> {
        let tag = self.tag;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidString(tag))
    }

    pub(crate) fn remaining(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.rest)
    }
}

/// Read a simple-data struct, checking its size
pub(crate) fn read_simple<T: Pod>(tag: u32, simple: &[u8]) -> Result<T, ProtocolError> {
    if simple.len() != std::mem::size_of::<T>() {
        return Err(ProtocolError::Malformed {
            tag,
            reason: "simple data has the wrong size",
        });
    }
    Ok(bytemuck::pod_read_unaligned(simple))
}

/// Decode a payload of packed rectangles
pub(crate) fn read_rects(tag: u32, bytes: &[u8]) -> Result<Vec<crate::Rect>, ProtocolError> {
    let size = std::mem::size_of::<crate::Rect>();
    if bytes.len() % size != 0 {
        return Err(ProtocolError::Malformed {
            tag,
            reason: "rectangle payload is not a whole number of rects",
        });
    }
    let rects: Vec<crate::Rect> = bytes
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned)
        .collect();
    if !rects.iter().all(crate::Rect::is_within_limits) {
        return Err(ProtocolError::Malformed {
            tag,
            reason: "rectangle exceeds the coordinate range",
        });
    }
    Ok(rects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Command, Event, Rect, Region};

    #[test]
    fn decoder_waits_for_partial_frames() {
        let cmd = Command::RegionMove {
            window: 3,
            dx: -4,
            dy: 9,
        };
        let frame = encode_frame(&cmd);
        let mut decoder = FrameDecoder::<Command>::new(DEFAULT_MAX_PAYLOAD);

        decoder.feed(&frame[..5]);
        assert_eq!(decoder.next_message().unwrap(), None);
        assert_eq!(decoder.state(), DecodeState::AwaitingHeader);

        decoder.feed(&frame[5..FrameHeader::SIZE + 2]);
        assert_eq!(decoder.next_message().unwrap(), None);
        assert!(matches!(decoder.state(), DecodeState::AwaitingBody { .. }));

        decoder.feed(&frame[FrameHeader::SIZE + 2..]);
        assert_eq!(decoder.next_message().unwrap(), Some(cmd));
        assert_eq!(decoder.state(), DecodeState::AwaitingHeader);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn decoder_splits_back_to_back_frames() {
        let first = Command::Create { count: 4 };
        let second = Command::RepaintRegion {
            window: 8,
            region: Region::from_rect(Rect::new(1, 2, 3, 4)),
        };
        let mut bytes = encode_frame(&first);
        bytes.extend(encode_frame(&second));

        let mut decoder = FrameDecoder::<Command>::new(DEFAULT_MAX_PAYLOAD);
        decoder.feed(&bytes);
        assert_eq!(decoder.next_message().unwrap(), Some(first));
        assert_eq!(decoder.next_message().unwrap(), Some(second));
        assert_eq!(decoder.next_message().unwrap(), None);
    }

    #[test]
    fn unknown_tag_is_a_protocol_error() {
        let header = FrameHeader {
            tag: 0xdead,
            payload_len: 0,
        };
        let mut decoder = FrameDecoder::<Command>::new(DEFAULT_MAX_PAYLOAD);
        decoder.feed(bytemuck::bytes_of(&header));
        assert_eq!(
            decoder.next_message().unwrap_err(),
            ProtocolError::UnknownTag(0xdead)
        );
    }

    #[test]
    fn oversized_payload_is_rejected_before_buffering() {
        let event = Event::ChannelMessage {
            channel: "c".into(),
            message: "m".into(),
            data: vec![0; 64],
        };
        let mut decoder = FrameDecoder::<Event>::new(16);
        decoder.feed(&encode_frame(&event));
        assert!(matches!(
            decoder.next_message(),
            Err(ProtocolError::PayloadTooLarge { max: 16, .. })
        ));
    }

    #[test]
    fn ragged_rect_payload_is_malformed() {
        assert!(read_rects(4, &[0u8; 15]).is_err());
        assert_eq!(read_rects(4, &[]).unwrap(), Vec::<Rect>::new());
    }

    #[test]
    fn far_away_rects_are_malformed() {
        let huge = Rect::new(crate::COORD_LIMIT, 0, 10, 10);
        assert!(matches!(
            read_rects(4, bytemuck::bytes_of(&huge)),
            Err(ProtocolError::Malformed { tag: 4, .. })
        ));

        let command = Command::RepaintRegion {
            window: 1,
            region: Region::from_rect(huge),
        };
        let mut decoder = FrameDecoder::<Command>::new(DEFAULT_MAX_PAYLOAD);
        decoder.feed(&encode_frame(&command));
        assert!(matches!(
            decoder.next_message(),
            Err(ProtocolError::Malformed { .. })
        ));
    }
}
