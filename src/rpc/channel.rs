//! Message channel: how messages reach the server thread and how the
//! server thread reaches each session's peer.
//!
//! ```text
//!  LocalClient ──┐                                 ┌──▶ LocalLink ──▶ client mailbox
//!  RemoteReader ─┼──▶ Inbox ──▶ Server (owner) ────┤
//!  Responder /   │   (ServerEvent)                 └──▶ RemoteLink ──▶ Transport
//!  notifiers  ───┘
//! ```
//!
//! The inbox is the only way into the server thread. Every session owns
//! one outbound [`SessionLink`], and only the server thread calls it; a
//! send that originates elsewhere is posted as [`ServerEvent::Deliver`].

use core::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use log::{debug, info, warn};

use crate::error::{ChannelError, Violation};

use super::codec::{FrameDecoder, MAX_ENCODED_SIZE, encode_frame};
use super::message::Message;
use super::session::SessionRef;
use super::shared::Core;
use super::transport::{Transport, write_all};

/// Server inbox depth.
pub const INBOX_DEPTH: usize = 32;

/// Per-client mailbox depth for local sessions.
pub const MAILBOX_DEPTH: usize = 32;

/// Bytes pulled from a transport per read.
const READ_CHUNK: usize = 256;

// ── Server inbox ─────────────────────────────────────────────

/// Everything the server thread reacts to.
pub enum ServerEvent {
    /// A request (or hello) from a session's peer.
    Message { session: SessionRef, msg: Message },
    /// The peer went away.
    Closed { session: SessionRef },
    /// The peer's byte stream is corrupt.
    Violation {
        session: SessionRef,
        violation: Violation,
    },
    /// An outbound message built off the server thread.
    Deliver { session: SessionRef, msg: Message },
    /// Stop the server loop.
    Shutdown,
}

pub type Inbox = Channel<CriticalSectionRawMutex, ServerEvent, INBOX_DEPTH>;

// ── Outbound links ───────────────────────────────────────────

/// Outbound half of a session, used only by the server thread.
pub trait SessionLink: Send {
    fn send(&mut self, msg: Message) -> Result<(), ChannelError>;

    /// Tell the peer the session is over.
    fn close(&mut self);
}

/// What a local client finds in its queue.
pub enum Delivery {
    Message(Message),
    Closed,
}

impl Delivery {
    fn is_event(&self) -> bool {
        matches!(self, Self::Message(m) if m.is_event())
    }
}

pub type Mailbox = Channel<CriticalSectionRawMutex, Delivery, MAILBOX_DEPTH>;

/// Outbound queue of one local session.
///
/// The mailbox wakes a waiting client; once it is full, deliveries spill
/// into an ordered overflow behind it. While the overflow is non-empty
/// nothing enters the mailbox, so the client sees everything in send
/// order. Responses and the close notice always get through. Events are
/// shed, and counted, only when the overflow holds another mailbox's
/// worth.
pub struct LocalQueue {
    mailbox: Mailbox,
    overflow: Mutex<CriticalSectionRawMutex, RefCell<VecDeque<Delivery>>>,
    closed: AtomicBool,
    shed: AtomicUsize,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self {
            mailbox: Mailbox::new(),
            overflow: Mutex::new(RefCell::new(VecDeque::new())),
            closed: AtomicBool::new(false),
            shed: AtomicUsize::new(0),
        }
    }

    fn push(&self, delivery: Delivery) -> Result<(), ChannelError> {
        self.overflow.lock(|cell| {
            let mut overflow = cell.borrow_mut();
            let delivery = if overflow.is_empty() {
                match self.mailbox.try_send(delivery) {
                    Ok(()) => return Ok(()),
                    Err(TrySendError::Full(d)) => d,
                }
            } else {
                delivery
            };
            if delivery.is_event() && overflow.len() >= MAILBOX_DEPTH {
                self.shed.fetch_add(1, Ordering::Relaxed);
                return Err(ChannelError::Full);
            }
            overflow.push_back(delivery);
            Ok(())
        })
    }

    /// Next delivery in send order, if any.
    pub fn try_pop(&self) -> Option<Delivery> {
        if let Ok(d) = self.mailbox.try_receive() {
            return Some(d);
        }
        self.overflow.lock(|cell| cell.borrow_mut().pop_front())
    }

    /// Wait for the next delivery.
    pub async fn pop(&self) -> Delivery {
        if let Some(d) = self.try_pop() {
            return d;
        }
        // The overflow was empty, so the next push lands in the mailbox.
        self.mailbox.receive().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Events dropped because the client stopped reading.
    pub fn shed_events(&self) -> usize {
        self.shed.load(Ordering::Relaxed)
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Same-process link: messages are moved into the client's queue
/// without being re-encoded.
pub struct LocalLink {
    queue: Arc<LocalQueue>,
}

impl LocalLink {
    pub fn new(queue: Arc<LocalQueue>) -> Self {
        Self { queue }
    }
}

impl SessionLink for LocalLink {
    fn send(&mut self, msg: Message) -> Result<(), ChannelError> {
        if self.queue.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.queue.push(Delivery::Message(msg))
    }

    fn close(&mut self) {
        self.queue.closed.store(true, Ordering::Release);
        let _ = self.queue.push(Delivery::Closed);
    }
}

/// Transport shared between a session's writer and its reader.
pub type SharedTransport<T> = Arc<Mutex<CriticalSectionRawMutex, RefCell<T>>>;

/// Cross-process link: every message is framed and copied.
pub struct RemoteLink<T: Transport> {
    transport: SharedTransport<T>,
}

impl<T: Transport> RemoteLink<T> {
    pub fn new(transport: SharedTransport<T>) -> Self {
        Self { transport }
    }
}

impl<T: Transport + Send> SessionLink for RemoteLink<T> {
    fn send(&mut self, msg: Message) -> Result<(), ChannelError> {
        let mut frame = [0u8; MAX_ENCODED_SIZE];
        let n = encode_frame(&msg, &mut frame).ok_or(ChannelError::TooLarge)?;
        self.transport
            .lock(|t| write_all(&mut *t.borrow_mut(), &frame[..n]))
    }

    fn close(&mut self) {
        self.transport.lock(|t| t.borrow_mut().close());
    }
}

// ── Inbound pump for remote sessions ─────────────────────────

/// Reads a session's transport, decodes frames, and posts them to the
/// server inbox. Never blocks: anything the inbox cannot take yet stays
/// queued here until the next [`pump`](Self::pump).
pub struct RemoteReader<T: Transport> {
    session: SessionRef,
    transport: SharedTransport<T>,
    decoder: FrameDecoder,
    core: Arc<Core>,
    pending: VecDeque<ServerEvent>,
    finished: bool,
}

impl<T: Transport> RemoteReader<T> {
    pub(crate) fn new(session: SessionRef, transport: SharedTransport<T>, core: Arc<Core>) -> Self {
        Self {
            session,
            transport,
            decoder: FrameDecoder::new(),
            core,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    pub fn session(&self) -> SessionRef {
        self.session
    }

    /// Move whatever the transport has into the inbox. Returns how many
    /// events were posted; `Err(Closed)` once the stream has ended and
    /// everything has been handed over.
    pub fn pump(&mut self) -> Result<usize, ChannelError> {
        let mut posted = self.flush();
        if self.finished {
            return if self.pending.is_empty() {
                Err(ChannelError::Closed)
            } else {
                Ok(posted)
            };
        }
        if !self.pending.is_empty() {
            return Ok(posted);
        }

        let mut buf = [0u8; READ_CHUNK];
        let read = self.transport.lock(|t| t.borrow_mut().read(&mut buf));
        match read {
            Ok(0) => {}
            Ok(n) => {
                let session = self.session;
                let pending = &mut self.pending;
                let fed = self.decoder.feed(&buf[..n], |msg| {
                    pending.push_back(ServerEvent::Message { session, msg });
                });
                if let Err(e) = fed {
                    warn!("IPC[{}]: corrupt frame stream: {}", session, e);
                    self.pending.push_back(ServerEvent::Violation {
                        session,
                        violation: Violation::Malformed(e),
                    });
                    self.finished = true;
                }
            }
            Err(e) => {
                debug!("IPC[{}]: transport read ended: {:?}", self.session, e);
                self.pending.push_back(ServerEvent::Closed {
                    session: self.session,
                });
                self.finished = true;
            }
        }
        posted += self.flush();
        Ok(posted)
    }

    /// Pump until the stream ends. Meant for a dedicated reader thread.
    pub fn run(mut self) {
        info!("IPC[{}]: reader started", self.session);
        loop {
            match self.pump() {
                Ok(0) => std::thread::sleep(core::time::Duration::from_millis(1)),
                Ok(_) => {}
                Err(_) => break,
            }
        }
        info!("IPC[{}]: reader stopped", self.session);
    }

    fn flush(&mut self) -> usize {
        let mut posted = 0;
        while let Some(ev) = self.pending.pop_front() {
            match self.core.inbox.try_send(ev) {
                Ok(()) => posted += 1,
                Err(TrySendError::Full(ev)) => {
                    self.pending.push_front(ev);
                    break;
                }
            }
        }
        posted
    }
}
