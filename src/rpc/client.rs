//! Client side of a binding: packs calls and unpacks what comes back.
//!
//! [`ClientCodec`] is transport-free. [`LocalClient`] talks to a server in
//! the same process through its inbox; [`RemoteClient`] frames messages
//! over a [`Transport`]. Both hold on to events that arrive while they
//! wait for a response.

use std::collections::VecDeque;
use std::sync::Arc;

use log::warn;

use crate::error::{BindError, ChannelError, SchemaError};
use crate::schema::{InterfaceSchema, MessageId};

use super::channel::{Delivery, LocalQueue, ServerEvent};
use super::codec::{FrameDecoder, MAX_ENCODED_SIZE, encode_frame};
use super::message::Message;
use super::pack::{DecodedEvent, DecodedResponse, pack_call, unpack_event, unpack_response};
use super::session::SessionRef;
use super::shared::Core;
use super::transport::{Transport, write_all};
use super::value::Value;

// ── Codec ────────────────────────────────────────────────────

/// A call awaiting its response.
#[derive(Debug, Clone, Copy)]
struct PendingCall {
    txn: u32,
    id: MessageId,
    outputs_mask: u32,
}

/// Something received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response {
        txn: u32,
        id: MessageId,
        response: DecodedResponse,
    },
    Event {
        id: MessageId,
        event: DecodedEvent,
    },
}

/// Schema-driven client codec with transaction bookkeeping.
pub struct ClientCodec {
    schema: InterfaceSchema,
    next_txn: u32,
    pending: Vec<PendingCall>,
}

impl ClientCodec {
    pub fn new(schema: InterfaceSchema) -> Self {
        Self {
            schema,
            next_txn: 1,
            pending: Vec::new(),
        }
    }

    pub fn schema(&self) -> &InterfaceSchema {
        &self.schema
    }

    fn alloc_txn(&mut self) -> u32 {
        let txn = self.next_txn;
        // 0 is reserved for events.
        self.next_txn = self.next_txn.wrapping_add(1).max(1);
        txn
    }

    /// Build a request for operation `id`. Bit `i` of `outputs_mask`
    /// requests output `i`.
    pub fn encode_call(
        &mut self,
        id: MessageId,
        outputs_mask: u32,
        inputs: &[Value],
    ) -> Result<Message, BindError> {
        let op = self
            .schema
            .operation_by_id(id)
            .ok_or(SchemaError::UndeclaredId(id))?;
        let buffer = pack_call(op, outputs_mask, inputs);
        let txn = self.alloc_txn();
        self.pending.push(PendingCall {
            txn,
            id,
            outputs_mask,
        });
        Ok(Message::new(id, txn, buffer))
    }

    pub fn decode(&mut self, msg: &Message) -> Result<Incoming, BindError> {
        if msg.is_event() {
            let cb = self
                .schema
                .operation_by_id(msg.id)
                .and_then(|op| op.callback_spec())
                .ok_or(BindError::UnexpectedReply(msg.id))?;
            let event = unpack_event(cb, &msg.buffer)?;
            return Ok(Incoming::Event { id: msg.id, event });
        }

        let pos = self
            .pending
            .iter()
            .position(|p| p.txn == msg.txn && p.id == msg.id)
            .ok_or(BindError::UnexpectedReply(msg.id))?;
        let call = self.pending.swap_remove(pos);
        let op = self
            .schema
            .operation_by_id(call.id)
            .ok_or(SchemaError::UndeclaredId(call.id))?;
        let response = unpack_response(op, call.outputs_mask, &msg.buffer)?;
        Ok(Incoming::Response {
            txn: msg.txn,
            id: msg.id,
            response,
        })
    }

    /// Calls still waiting for a response.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

/// Sorted inbound traffic.
#[derive(Default)]
struct Received {
    responses: VecDeque<(u32, DecodedResponse)>,
    events: VecDeque<(MessageId, DecodedEvent)>,
}

impl Received {
    fn accept(&mut self, codec: &mut ClientCodec, msg: &Message) {
        match codec.decode(msg) {
            Ok(Incoming::Response { txn, response, .. }) => {
                self.responses.push_back((txn, response));
            }
            Ok(Incoming::Event { id, event }) => self.events.push_back((id, event)),
            Err(e) => warn!("IPC client: dropping message {}: {}", msg.id, e),
        }
    }

    fn take_response(&mut self, txn: u32) -> Option<DecodedResponse> {
        let pos = self.responses.iter().position(|(t, _)| *t == txn)?;
        self.responses.remove(pos).map(|(_, r)| r)
    }
}

// ── Local ────────────────────────────────────────────────────

/// Same-process client session. Dropping it closes the session.
pub struct LocalClient {
    session: SessionRef,
    core: Arc<Core>,
    codec: ClientCodec,
    queue: Arc<LocalQueue>,
    received: Received,
    disconnected: bool,
}

impl LocalClient {
    pub(crate) fn new(
        session: SessionRef,
        core: Arc<Core>,
        schema: InterfaceSchema,
        queue: Arc<LocalQueue>,
    ) -> Self {
        Self {
            session,
            core,
            codec: ClientCodec::new(schema),
            queue,
            received: Received::default(),
            disconnected: false,
        }
    }

    pub fn session(&self) -> SessionRef {
        self.session
    }

    /// Queue a request without waiting. Returns its transaction id.
    pub fn send_call(
        &mut self,
        id: MessageId,
        outputs_mask: u32,
        inputs: &[Value],
    ) -> Result<u32, BindError> {
        if self.is_disconnected() {
            return Err(ChannelError::Closed.into());
        }
        let msg = self.codec.encode_call(id, outputs_mask, inputs)?;
        let txn = msg.txn;
        self.core.post(ServerEvent::Message {
            session: self.session,
            msg,
        })?;
        Ok(txn)
    }

    /// Blocking call. Must not be made from the server thread, which would
    /// never get to answer.
    pub fn call(
        &mut self,
        id: MessageId,
        outputs_mask: u32,
        inputs: &[Value],
    ) -> Result<DecodedResponse, BindError> {
        if self.core.on_owner_thread() {
            crate::fatal!("IPC: blocking call on the server thread");
        }
        let txn = self.send_call(id, outputs_mask, inputs)?;
        loop {
            if let Some(r) = self.received.take_response(txn) {
                return Ok(r);
            }
            self.wait()?;
        }
    }

    /// Response for `txn`, if it has arrived.
    pub fn take_response(&mut self, txn: u32) -> Option<DecodedResponse> {
        self.drain();
        self.received.take_response(txn)
    }

    /// Next queued event, if any.
    pub fn next_event(&mut self) -> Option<(MessageId, DecodedEvent)> {
        self.drain();
        self.received.events.pop_front()
    }

    /// Block until an event arrives.
    pub fn wait_event(&mut self) -> Result<(MessageId, DecodedEvent), BindError> {
        loop {
            if let Some(ev) = self.received.events.pop_front() {
                return Ok(ev);
            }
            self.wait()?;
        }
    }

    /// Whether the server has closed this session.
    pub fn is_disconnected(&mut self) -> bool {
        self.drain();
        self.disconnected
    }

    fn accept(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Message(msg) => self.received.accept(&mut self.codec, &msg),
            Delivery::Closed => self.disconnected = true,
        }
    }

    /// Events the server dropped because this client fell behind.
    pub fn shed_events(&self) -> usize {
        self.queue.shed_events()
    }

    fn drain(&mut self) {
        while let Some(d) = self.queue.try_pop() {
            self.accept(d);
        }
    }

    /// Block for one delivery.
    fn wait(&mut self) -> Result<(), BindError> {
        if let Some(d) = self.queue.try_pop() {
            self.accept(d);
            return Ok(());
        }
        if self.disconnected || self.queue.is_closed() {
            self.disconnected = true;
            return Err(ChannelError::Closed.into());
        }
        let d = futures_lite::future::block_on(self.queue.pop());
        self.accept(d);
        Ok(())
    }
}

impl Drop for LocalClient {
    fn drop(&mut self) {
        if self.queue.is_closed() {
            return;
        }
        // The server thread cannot wait for room in its own inbox.
        if self.core.on_owner_thread() {
            self.core.close_session(self.session, None);
            return;
        }
        if let Err(e) = self.core.post(ServerEvent::Closed {
            session: self.session,
        }) {
            warn!("IPC[{}]: close notification lost: {}", self.session, e);
        }
    }
}

// ── Remote ───────────────────────────────────────────────────

/// Client over a byte transport. Non-blocking: call
/// [`pump`](Self::pump) to process whatever has arrived.
pub struct RemoteClient<T: Transport> {
    transport: T,
    decoder: FrameDecoder,
    codec: ClientCodec,
    received: Received,
    disconnected: bool,
}

impl<T: Transport> RemoteClient<T> {
    /// Send the hello frame and return the client.
    pub fn connect(transport: T, schema: InterfaceSchema) -> Result<Self, BindError> {
        let mut client = Self {
            transport,
            decoder: FrameDecoder::new(),
            codec: ClientCodec::new(schema),
            received: Received::default(),
            disconnected: false,
        };
        let hello = Message::hello(&client.codec.schema().fingerprint());
        client.write(&hello)?;
        Ok(client)
    }

    fn write(&mut self, msg: &Message) -> Result<(), BindError> {
        let mut frame = [0u8; MAX_ENCODED_SIZE];
        let n = encode_frame(msg, &mut frame).ok_or(ChannelError::TooLarge)?;
        write_all(&mut self.transport, &frame[..n]).map_err(|e| {
            self.disconnected = true;
            BindError::from(e)
        })
    }

    pub fn send_call(
        &mut self,
        id: MessageId,
        outputs_mask: u32,
        inputs: &[Value],
    ) -> Result<u32, BindError> {
        if self.disconnected {
            return Err(ChannelError::Closed.into());
        }
        let msg = self.codec.encode_call(id, outputs_mask, inputs)?;
        self.write(&msg)?;
        Ok(msg.txn)
    }

    /// Read and sort everything available. Returns the number of
    /// messages received.
    pub fn pump(&mut self) -> Result<usize, BindError> {
        let mut buf = [0u8; 256];
        let mut count = 0;
        loop {
            let n = match self.transport.read(&mut buf) {
                Ok(0) => return Ok(count),
                Ok(n) => n,
                Err(_) => {
                    self.disconnected = true;
                    return if count > 0 {
                        Ok(count)
                    } else {
                        Err(ChannelError::Closed.into())
                    };
                }
            };
            let codec = &mut self.codec;
            let received = &mut self.received;
            let fed = self.decoder.feed(&buf[..n], |msg| {
                received.accept(codec, &msg);
                count += 1;
            });
            if let Err(e) = fed {
                self.disconnected = true;
                return Err(e.into());
            }
        }
    }

    pub fn take_response(&mut self, txn: u32) -> Option<DecodedResponse> {
        self.received.take_response(txn)
    }

    pub fn next_event(&mut self) -> Option<(MessageId, DecodedEvent)> {
        self.received.events.pop_front()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn close(&mut self) {
        self.transport.close();
        self.disconnected = true;
    }
}
