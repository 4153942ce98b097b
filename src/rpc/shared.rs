//! State shared between the server thread and everything that talks to
//! it from elsewhere.
//!
//! Sessions, commands and subscriptions live behind one blocking mutex.
//! Every access is a short closure passed to [`Core::with_state`]; no
//! implementation code or transport I/O ever runs inside it.

use core::cell::RefCell;
use std::collections::VecDeque;
use std::thread::{self, ThreadId};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, info, trace, warn};

use crate::config::BindingConfig;
use crate::error::{BindError, ChannelError, Violation};
use crate::schema::{InterfaceSchema, MessageId};

use super::channel::{Inbox, ServerEvent, SessionLink};
use super::command::CommandTable;
use super::dispatch::CallContext;
use super::message::{EVENT_TXN, Message};
use super::pool::Pool;
use super::registry::Registry;
use super::session::{SessionEntry, SessionRef};

pub(crate) struct CoreState {
    pub sessions: Pool<SessionEntry>,
    pub commands: CommandTable,
    pub registry: Registry,
}

pub(crate) struct Core {
    /// The thread that advertised the service; the only one that sends.
    pub owner: ThreadId,
    pub schema: InterfaceSchema,
    pub fingerprint: [u8; 32],
    pub config: BindingConfig,
    pub inbox: Inbox,
    state: Mutex<CriticalSectionRawMutex, RefCell<CoreState>>,
}

impl Core {
    pub fn new(schema: InterfaceSchema, config: BindingConfig) -> Self {
        let state = CoreState {
            sessions: Pool::with_capacity("session", config.max_sessions.into()),
            commands: CommandTable::new(config.command_pool_size.into()),
            registry: Registry::new(config.subscription_pool_size.into()),
        };
        Self {
            owner: thread::current().id(),
            fingerprint: schema.fingerprint(),
            schema,
            config,
            inbox: Inbox::new(),
            state: Mutex::new(RefCell::new(state)),
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut CoreState) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut()))
    }

    pub fn on_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Queue an event for the server thread. The server thread itself
    /// must never wait on its own inbox, so there the post fails when the
    /// inbox is full; any other thread waits for room.
    pub fn post(&self, ev: ServerEvent) -> Result<(), ChannelError> {
        if self.on_owner_thread() {
            self.inbox.try_send(ev).map_err(|_| ChannelError::Full)
        } else {
            futures_lite::future::block_on(self.inbox.send(ev));
            Ok(())
        }
    }

    /// Send `msg` to `session` from any thread. Off the server thread the
    /// send is handed over through the inbox.
    pub fn deliver(&self, session: SessionRef, msg: Message) {
        if self.on_owner_thread() {
            self.send_now(session, msg);
        } else if let Err(e) = self.post(ServerEvent::Deliver { session, msg }) {
            warn!("IPC[{}]: deferred send failed: {}", session, e);
        }
    }

    /// Write to the session's link. Server thread only.
    ///
    /// The link is taken out of the state while it writes, so a transport
    /// never runs under the lock. A send issued while the link is out (a
    /// transport that re-enters the server) is queued on the session and
    /// written by the send already in progress.
    pub fn send_now(&self, session: SessionRef, msg: Message) {
        let claimed = self.with_state(|st| {
            let entry = st.sessions.get_mut(session.0)?;
            match entry.link.take() {
                Some(link) => Some(Some((link, msg))),
                None => {
                    entry.backlog.push_back(msg);
                    Some(None)
                }
            }
        });
        let (mut link, mut msg) = match claimed {
            Some(Some(claim)) => claim,
            Some(None) => return,
            None => {
                debug!("IPC[{}]: session gone, message dropped", session);
                return;
            }
        };

        loop {
            let id = msg.id;
            if let Err(e) = link.send(msg) {
                warn!("IPC[{}]: send of message {} failed: {}", session, id, e);
            }
            let next = self.with_state(|st| match st.sessions.get_mut(session.0) {
                Some(entry) => match entry.backlog.pop_front() {
                    Some(queued) => Ok((link, queued)),
                    None => {
                        entry.link = Some(link);
                        Err(None)
                    }
                },
                None => Err(Some(link)),
            });
            match next {
                Ok((l, queued)) => {
                    link = l;
                    msg = queued;
                }
                Err(orphan) => {
                    // Closed while the link was out.
                    if let Some(mut l) = orphan {
                        l.close();
                    }
                    return;
                }
            }
        }
    }

    pub fn trace_rx(&self, session: SessionRef, msg: &Message) {
        if self.config.trace_messages {
            trace!(
                "IPC[{}]: rx id={} txn={} {} bytes",
                session,
                msg.id,
                msg.txn,
                msg.buffer.len()
            );
        }
    }

    pub fn trace_tx(&self, session: SessionRef, id: MessageId, len: usize) {
        if self.config.trace_messages {
            trace!("IPC[{}]: tx id={} {} bytes", session, id, len);
        }
    }

    pub fn open_session(
        &self,
        link: Box<dyn SessionLink>,
        greeted: bool,
    ) -> Result<SessionRef, BindError> {
        let opened = self.with_state(|st| {
            st.sessions.alloc(SessionEntry {
                link: Some(link),
                backlog: VecDeque::new(),
                greeted,
            })
        });
        match opened {
            Ok(r) => {
                let session = SessionRef(r);
                info!("IPC[{}]: session opened on `{}`", session, self.config.service_name);
                Ok(session)
            }
            Err(e) => {
                warn!("IPC: connect to `{}` refused: {}", self.config.service_name, e);
                Err(BindError::Channel(ChannelError::Full))
            }
        }
    }

    /// Tear a session down and clean up after it.
    ///
    /// Subscriptions owned by the session are released and their removal
    /// routines run (outside the lock); pending commands are marked
    /// abandoned. Returns `false` if the session was already gone.
    pub fn close_session(&self, session: SessionRef, violation: Option<Violation>) -> bool {
        let taken = self.with_state(|st| {
            let entry = st.sessions.release(session.0)?;
            let subscriptions = st.registry.release_session(session);
            let abandoned = st.commands.abandon_session(session);
            Some((entry, subscriptions, abandoned))
        });
        let Some((entry, subscriptions, abandoned)) = taken else {
            debug!("IPC[{}]: already closed", session);
            return false;
        };

        // A link that is out writing gets closed by its sender.
        if let Some(mut link) = entry.link {
            link.close();
        }
        match violation {
            Some(v) => warn!("IPC[{}]: session terminated: {}", session, v),
            None => info!("IPC[{}]: session closed", session),
        }

        let released = subscriptions.len();
        let mut removed = 0;
        for record in subscriptions {
            if let Some(registration) = record.registration {
                let ctx = CallContext {
                    session,
                    op: record.op,
                    txn: EVENT_TXN,
                };
                registration.remove(&ctx);
                removed += 1;
            }
        }
        if released > 0 || abandoned > 0 {
            info!(
                "IPC[{}]: cleanup released {} subscriptions ({} handlers removed), {} commands abandoned",
                session, released, removed, abandoned
            );
        }
        true
    }

    pub fn open_sessions(&self) -> Vec<SessionRef> {
        self.with_state(|st| st.sessions.iter().map(|(r, _)| SessionRef(r)).collect())
    }
}
