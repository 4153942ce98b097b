//! In-flight asynchronous commands.
//!
//! An async handler gets a [`CommandHandle`] instead of returning. The
//! record behind the handle remembers where the answer goes (session,
//! operation, transaction) and which outputs the caller asked for, so the
//! implementation only supplies the values. [`Responder::respond`] may
//! run on any thread; the send itself happens on the server thread.

use std::sync::{Arc, Weak};

use log::debug;

use crate::schema::MessageId;

use super::dispatch::Reply;
use super::message::Message;
use super::pack::pack_response;
use super::pool::{Pool, SlotRef};
use super::session::SessionRef;
use super::shared::Core;

/// Opaque ticket for one deferred response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandHandle(SlotRef);

impl CommandHandle {
    pub fn raw(self) -> u32 {
        self.0.raw()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Pending,
    /// The session closed before the implementation answered.
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub session: SessionRef,
    pub op: MessageId,
    /// Index into the schema's operation list.
    pub op_index: usize,
    pub txn: u32,
    pub outputs_mask: u32,
    pub state: CommandState,
}

pub struct CommandTable {
    pool: Pool<CommandRecord>,
}

impl CommandTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: Pool::with_capacity("command", capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Allocate a record. Running out of commands is fatal.
    pub fn start(&mut self, record: CommandRecord) -> CommandHandle {
        match self.pool.alloc(record) {
            Ok(r) => CommandHandle(r),
            Err(e) => crate::fatal!("IPC: {}", e),
        }
    }

    /// Take the record; `None` means it was already answered.
    pub fn finish(&mut self, handle: CommandHandle) -> Option<CommandRecord> {
        self.pool.release(handle.0)
    }

    /// Mark every pending command of `session` abandoned. Their slots are
    /// freed when the implementation eventually responds.
    pub fn abandon_session(&mut self, session: SessionRef) -> usize {
        let mut n = 0;
        for (_, rec) in self.pool.iter_mut() {
            if rec.session == session && rec.state == CommandState::Pending {
                rec.state = CommandState::Abandoned;
                n += 1;
            }
        }
        n
    }
}

/// Sends deferred responses. Clone it into whatever thread will answer.
#[derive(Clone)]
pub struct Responder {
    core: Weak<Core>,
}

impl Responder {
    pub(crate) fn new(core: &Arc<Core>) -> Self {
        Self {
            core: Arc::downgrade(core),
        }
    }

    /// Answer the command behind `handle`.
    ///
    /// Responding twice to the same handle is a defect and is fatal. A
    /// response to a command whose session has closed is dropped and its
    /// slot freed.
    pub fn respond(&self, handle: CommandHandle, reply: Reply) {
        let Some(core) = self.core.upgrade() else {
            debug!("IPC: response after server shutdown dropped");
            return;
        };
        let Some(record) = core.with_state(|st| st.commands.finish(handle)) else {
            crate::fatal!("IPC: response already sent for command {:#x}", handle.raw());
        };
        if record.state == CommandState::Abandoned {
            debug!(
                "IPC[{}]: response to abandoned command {:#x} dropped",
                record.session,
                handle.raw()
            );
            return;
        }
        let op = &core.schema.operations[record.op_index];
        let buffer = pack_response(
            op,
            record.outputs_mask,
            reply.result.as_ref(),
            &reply.outputs,
        );
        core.trace_tx(record.session, record.op, buffer.len());
        core.deliver(record.session, Message::new(record.op, record.txn, buffer));
    }
}
