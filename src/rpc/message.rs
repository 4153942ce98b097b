//! The unit every channel carries.

use crate::schema::{HELLO_ID, MessageId};

/// Upper bound on any packed buffer. Schemas that could exceed it are
/// rejected at validation time.
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Bounded message buffer.
pub type Buffer = heapless::Vec<u8, MAX_MESSAGE_SIZE>;

/// Transaction id carried by events (requests never use it).
pub const EVENT_TXN: u32 = 0;

/// Operation identifier, transaction id, and packed parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub txn: u32,
    pub buffer: Buffer,
}

impl Message {
    pub fn new(id: MessageId, txn: u32, buffer: Buffer) -> Self {
        Self { id, txn, buffer }
    }

    /// Response to `request`: same id and transaction.
    pub fn reply_to(request: &Message, buffer: Buffer) -> Self {
        Self::new(request.id, request.txn, buffer)
    }

    pub fn event(id: MessageId, buffer: Buffer) -> Self {
        Self::new(id, EVENT_TXN, buffer)
    }

    /// First frame on a remote stream: the client's protocol fingerprint.
    pub fn hello(fingerprint: &[u8; 32]) -> Self {
        let mut buffer = Buffer::new();
        // 32 bytes always fit.
        let _ = buffer.extend_from_slice(fingerprint);
        Self::new(HELLO_ID, EVENT_TXN, buffer)
    }

    pub fn is_hello(&self) -> bool {
        self.id == HELLO_ID
    }

    pub fn is_event(&self) -> bool {
        self.txn == EVENT_TXN && !self.is_hello()
    }
}
