//! Length-prefix frame codec for remote channels.
//!
//! Wire format:
//! ```text
//! ┌────────────┬────────────┬────────────┬─────────────────────┐
//! │ Length (4B)│ Msg id (4B)│ Txn (4B)   │ Packed params (N B) │
//! │ LE u32     │ LE u32     │ LE u32     │                     │
//! └────────────┴────────────┴────────────┴─────────────────────┘
//! ```
//!
//! `Length` counts everything after itself (8 + N). The decoder
//! accumulates incoming bytes and yields complete messages, so a single
//! `Transport::read` may return part of a header, part of a body, or
//! several frames back to back.

use crate::error::DecodeError;

use super::message::{Buffer, MAX_MESSAGE_SIZE, Message};

/// Length prefix size.
const HEADER_SIZE: usize = 4;

/// Message id + transaction id.
const ENVELOPE_SIZE: usize = 8;

/// Largest frame body the decoder accepts.
pub const MAX_FRAME_SIZE: usize = ENVELOPE_SIZE + MAX_MESSAGE_SIZE;

/// Largest encoded frame, header included.
pub const MAX_ENCODED_SIZE: usize = HEADER_SIZE + MAX_FRAME_SIZE;

/// Decoder state machine.
enum DecoderState {
    /// Waiting for header bytes.
    ReadingHeader { collected: usize },
    /// Header received, reading body.
    ReadingBody { expected: usize, collected: usize },
    /// A bad header was seen; the stream cannot be resynchronised.
    Poisoned,
}

/// Streaming frame decoder.
pub struct FrameDecoder {
    state: DecoderState,
    header_buf: [u8; HEADER_SIZE],
    body_buf: [u8; MAX_FRAME_SIZE],
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ReadingHeader { collected: 0 },
            header_buf: [0; HEADER_SIZE],
            body_buf: [0; MAX_FRAME_SIZE],
        }
    }

    /// Feed bytes into the decoder.
    ///
    /// Every complete message is handed to `on_message` in arrival order.
    /// Returns `Err` on a zero, undersized or oversize length field; the
    /// decoder stays poisoned until [`reset`](Self::reset) since there is
    /// no way to find the next frame boundary.
    pub fn feed(
        &mut self,
        data: &[u8],
        mut on_message: impl FnMut(Message),
    ) -> Result<(), DecodeError> {
        let mut offset = 0;

        while offset < data.len() {
            match &mut self.state {
                DecoderState::Poisoned => return Err(DecodeError::BadHeader),

                DecoderState::ReadingHeader { collected } => {
                    let needed = HEADER_SIZE - *collected;
                    let available = data.len() - offset;
                    let to_copy = needed.min(available);

                    self.header_buf[*collected..*collected + to_copy]
                        .copy_from_slice(&data[offset..offset + to_copy]);

                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == HEADER_SIZE {
                        let expected = u32::from_le_bytes(self.header_buf) as usize;

                        if expected < ENVELOPE_SIZE || expected > MAX_FRAME_SIZE {
                            self.state = DecoderState::Poisoned;
                            return Err(DecodeError::BadHeader);
                        }

                        self.state = DecoderState::ReadingBody {
                            expected,
                            collected: 0,
                        };
                    }
                }

                DecoderState::ReadingBody { expected, collected } => {
                    let needed = *expected - *collected;
                    let available = data.len() - offset;
                    let to_copy = needed.min(available);

                    self.body_buf[*collected..*collected + to_copy]
                        .copy_from_slice(&data[offset..offset + to_copy]);

                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == *expected {
                        let len = *expected;
                        self.state = DecoderState::ReadingHeader { collected: 0 };
                        on_message(decode_body(&self.body_buf[..len])?);
                    }
                }
            }
        }

        Ok(())
    }

    /// Reset decoder state (e.g. after a transport reconnect).
    pub fn reset(&mut self) {
        self.state = DecoderState::ReadingHeader { collected: 0 };
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_body(body: &[u8]) -> Result<Message, DecodeError> {
    let (envelope, params) = body.split_at(ENVELOPE_SIZE);
    let id = u32::from_le_bytes([envelope[0], envelope[1], envelope[2], envelope[3]]);
    let txn = u32::from_le_bytes([envelope[4], envelope[5], envelope[6], envelope[7]]);
    let buffer = Buffer::from_slice(params).map_err(|_| DecodeError::BadHeader)?;
    Ok(Message::new(id, txn, buffer))
}

/// Encode a message into a length-prefixed frame.
///
/// Writes `[LE-u32 length][LE-u32 id][LE-u32 txn][params]` into `out_buf`.
/// Returns the total number of bytes written.
pub fn encode_frame(msg: &Message, out_buf: &mut [u8]) -> Option<usize> {
    let body = ENVELOPE_SIZE + msg.buffer.len();
    let total = HEADER_SIZE + body;
    if total > out_buf.len() {
        return None;
    }

    out_buf[..4].copy_from_slice(&(body as u32).to_le_bytes());
    out_buf[4..8].copy_from_slice(&msg.id.to_le_bytes());
    out_buf[8..12].copy_from_slice(&msg.txn.to_le_bytes());
    out_buf[12..total].copy_from_slice(&msg.buffer);

    Some(total)
}
