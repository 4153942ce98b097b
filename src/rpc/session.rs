//! Session identity and per-session server state.

use core::fmt;
use std::collections::VecDeque;

use super::channel::SessionLink;
use super::message::Message;
use super::pool::SlotRef;

/// One bound connection between a caller and the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionRef(pub(crate) SlotRef);

impl SessionRef {
    pub fn raw(self) -> u32 {
        self.0.raw()
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.generation() {
            0 => write!(f, "s{}", self.0.index()),
            g => write!(f, "s{}.{}", self.0.index(), g),
        }
    }
}

/// Server-side record for an open session.
pub struct SessionEntry {
    /// `None` while the server thread is writing through it.
    pub link: Option<Box<dyn SessionLink>>,
    /// Sends issued while the link was out.
    pub backlog: VecDeque<Message>,
    /// Remote sessions must present the protocol fingerprint before any
    /// call is dispatched; local sessions are checked at connect time.
    pub greeted: bool,
}
