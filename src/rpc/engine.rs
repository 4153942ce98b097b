//! Binding engine: owns the dispatch table and runs the server loop.
//!
//! **Thread-affine**: a [`Server`] belongs to the thread that called
//! [`ServiceBuilder::advertise`]. Only that thread receives requests,
//! runs handlers and writes to session links. Other threads reach it
//! through a [`ServerHandle`] (open sessions, shut down), a
//! [`Responder`] (deferred responses) or a notifier (events); all of
//! those end up as events in the server inbox.
//!
//! Every request passes the same pipeline:
//!
//! 1. **Greeting**: a remote session's first frame must carry the
//!    protocol fingerprint.
//! 2. **Lookup**: unknown ids are logged and dropped; the session stays.
//! 3. **Unpack**: a malformed buffer terminates the session before any
//!    implementation code runs.
//! 4. **Invoke**: sync handlers answer by returning, async handlers via
//!    their command handle, Add/Remove-Handler go through the registry.

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::config::BindingConfig;
use crate::error::{BindError, Violation};
use crate::schema::{InterfaceSchema, MessageId, OperationSpec, ParamKind};

use super::channel::{LocalLink, LocalQueue, RemoteLink, RemoteReader, ServerEvent, SharedTransport};
use super::client::LocalClient;
use super::command::{CommandHandle, CommandRecord, CommandState, Responder};
use super::dispatch::{CallContext, DispatchTable, OperationHandler, Reply};
use super::message::Message;
use super::pack::{DecodedCall, pack_response, unpack_call};
use super::registry::{
    CallbackNotifier, EventNotifier, HandlerRegistration, SubscriptionKind, SubscriptionRecord,
};
use super::session::SessionRef;
use super::shared::Core;
use super::transport::Transport;
use super::value::Value;

// ── Builder ──────────────────────────────────────────────────

/// Collects handlers for one interface, then advertises the service.
///
/// Registration errors are kept and reported by [`advertise`](Self::advertise).
pub struct ServiceBuilder {
    schema: InterfaceSchema,
    config: BindingConfig,
    table: Option<DispatchTable>,
    error: Option<BindError>,
}

impl ServiceBuilder {
    pub fn new(schema: InterfaceSchema, config: BindingConfig) -> Self {
        let checked = config
            .validate()
            .map_err(BindError::from)
            .and_then(|()| schema.validate().map_err(BindError::from))
            .and_then(|()| DispatchTable::new(&schema).map_err(BindError::from));
        let (table, error) = match checked {
            Ok(t) => (Some(t), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            schema,
            config,
            table,
            error,
        }
    }

    fn register(mut self, id: MessageId, handler: OperationHandler) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Some(table) = self.table.as_mut() {
            if let Err(e) = table.register(&self.schema, id, handler) {
                self.error = Some(e.into());
            }
        }
        self
    }

    /// Plain request/response handler.
    #[must_use]
    pub fn on_call<F>(self, id: MessageId, f: F) -> Self
    where
        F: FnMut(&CallContext, &[Value]) -> Reply + 'static,
    {
        self.register(id, OperationHandler::Sync(Box::new(f)))
    }

    /// Handler that answers later through a [`Responder`].
    #[must_use]
    pub fn on_async_call<F>(self, id: MessageId, f: F) -> Self
    where
        F: FnMut(&CallContext, &[Value], CommandHandle) + 'static,
    {
        self.register(id, OperationHandler::Async(Box::new(f)))
    }

    /// Add-Handler implementation. Return the removal routine to accept the
    /// registration, or `None` to refuse it (the caller gets handle 0).
    #[must_use]
    pub fn on_add_handler<F, R>(self, id: MessageId, mut f: F) -> Self
    where
        F: FnMut(&CallContext, &[Value], EventNotifier) -> Option<R> + 'static,
        R: HandlerRegistration + 'static,
    {
        self.register(
            id,
            OperationHandler::AddHandler(Box::new(move |ctx, args, notifier| {
                f(ctx, args, notifier).map(|r| Box::new(r) as Box<dyn HandlerRegistration>)
            })),
        )
    }

    /// Handler for a call whose callback fires at most once.
    #[must_use]
    pub fn on_callback_call<F>(self, id: MessageId, f: F) -> Self
    where
        F: FnMut(&CallContext, &[Value], CallbackNotifier) -> Reply + 'static,
    {
        self.register(id, OperationHandler::OneShot(Box::new(f)))
    }

    /// Bind the service to the calling thread.
    pub fn advertise(self) -> Result<Server, BindError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let Some(table) = self.table else {
            return Err(BindError::HandlerMissing(self.schema.name));
        };
        if let Some(op) = table.first_missing(&self.schema) {
            return Err(BindError::HandlerMissing(op.name));
        }

        let core = Arc::new(Core::new(self.schema, self.config));
        info!(
            "IPC: service `{}` advertised ({} v{}, protocol {:02x}{:02x}{:02x}{:02x}, {} commands, {} subscriptions)",
            core.config.service_name,
            core.schema.name,
            core.schema.version,
            core.fingerprint[0],
            core.fingerprint[1],
            core.fingerprint[2],
            core.fingerprint[3],
            core.config.command_pool_size,
            core.config.subscription_pool_size,
        );
        Ok(Server { core, table })
    }
}

// ── Server ───────────────────────────────────────────────────

/// Snapshot of pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerStats {
    pub sessions: usize,
    pub commands: usize,
    pub subscriptions: usize,
}

/// The advertised service, pinned to its owning thread.
pub struct Server {
    core: Arc<Core>,
    table: DispatchTable,
}

impl Server {
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            core: self.core.clone(),
        }
    }

    pub fn responder(&self) -> Responder {
        Responder::new(&self.core)
    }

    fn assert_owner(&self, what: &str) {
        if !self.core.on_owner_thread() {
            crate::fatal!("IPC: {} called off the server thread", what);
        }
    }

    /// Serve until [`ServerHandle::shutdown`].
    pub fn run(&mut self) {
        self.assert_owner("run");
        let core = self.core.clone();
        info!("IPC: server `{}` running", core.config.service_name);

        {
            let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();
            let task = executor.spawn(self.serve());
            futures_lite::future::block_on(executor.run(task));
        }

        info!("IPC: server `{}` stopped", core.config.service_name);
    }

    async fn serve(&mut self) {
        loop {
            let ev = self.core.inbox.receive().await;
            if !self.handle_event(ev) {
                break;
            }
        }
    }

    /// Handle everything already queued, without waiting. Returns the
    /// number of events handled.
    pub fn poll(&mut self) -> usize {
        self.assert_owner("poll");
        let mut handled = 0;
        while let Ok(ev) = self.core.inbox.try_receive() {
            handled += 1;
            if !self.handle_event(ev) {
                break;
            }
        }
        handled
    }

    /// Returns `false` on shutdown.
    fn handle_event(&mut self, ev: ServerEvent) -> bool {
        match ev {
            ServerEvent::Message { session, msg } => self.on_message(session, &msg),
            ServerEvent::Closed { session } => {
                self.core.close_session(session, None);
            }
            ServerEvent::Violation { session, violation } => {
                self.core.close_session(session, Some(violation));
            }
            ServerEvent::Deliver { session, msg } => self.core.send_now(session, msg),
            ServerEvent::Shutdown => {
                let open = self.core.open_sessions();
                info!("IPC: shutting down, closing {} sessions", open.len());
                for session in open {
                    self.core.close_session(session, None);
                }
                return false;
            }
        }
        true
    }

    fn on_message(&mut self, session: SessionRef, msg: &Message) {
        let greeted = self
            .core
            .with_state(|st| st.sessions.get(session.0).map(|e| e.greeted));
        let Some(greeted) = greeted else {
            debug!("IPC[{}]: message {} for closed session dropped", session, msg.id);
            return;
        };
        self.core.trace_rx(session, msg);

        if !greeted {
            greet(&self.core, session, msg);
            return;
        }
        if msg.is_hello() {
            warn!("IPC[{}]: repeated hello ignored", session);
            return;
        }

        let Some((op_index, handler)) = self.table.lookup(msg.id) else {
            error!("IPC[{}]: unknown message id {}", session, msg.id);
            return;
        };
        let op = &self.core.schema.operations[op_index];
        let call = match unpack_call(op, &msg.buffer) {
            Ok(c) => c,
            Err(e) => {
                self.core.close_session(session, Some(Violation::Malformed(e)));
                return;
            }
        };
        debug!("IPC[{}]: {} txn={}", session, op.name, msg.txn);
        dispatch(&self.core, handler, op, op_index, session, msg, call);
    }
}

fn greet(core: &Arc<Core>, session: SessionRef, msg: &Message) {
    if msg.is_hello() && msg.buffer.as_slice() == core.fingerprint.as_slice() {
        core.with_state(|st| {
            if let Some(entry) = st.sessions.get_mut(session.0) {
                entry.greeted = true;
            }
        });
        info!("IPC[{}]: remote session accepted", session);
    } else {
        core.close_session(session, Some(Violation::ProtocolMismatch));
    }
}

/// The caller's context value: the wire value of the callback parameter.
fn callback_context(op: &OperationSpec, inputs: &[Value]) -> u32 {
    op.inputs()
        .zip(inputs)
        .find(|(p, _)| matches!(p.kind, ParamKind::Callback(_)))
        .and_then(|(_, v)| v.as_reference())
        .unwrap_or(0)
}

fn respond_now(
    core: &Core,
    session: SessionRef,
    op: &OperationSpec,
    request: &Message,
    outputs_mask: u32,
    reply: &Reply,
) {
    let buffer = pack_response(op, outputs_mask, reply.result.as_ref(), &reply.outputs);
    core.trace_tx(session, request.id, buffer.len());
    core.send_now(session, Message::reply_to(request, buffer));
}

fn dispatch(
    core: &Arc<Core>,
    handler: &mut OperationHandler,
    op: &OperationSpec,
    op_index: usize,
    session: SessionRef,
    msg: &Message,
    call: DecodedCall,
) {
    let ctx = CallContext {
        session,
        op: msg.id,
        txn: msg.txn,
    };
    let mask = call.outputs_mask;

    match handler {
        OperationHandler::Sync(f) => {
            let reply = f(&ctx, call.inputs.as_slice());
            respond_now(core, session, op, msg, mask, &reply);
        }

        OperationHandler::Async(f) => {
            let handle = core.with_state(|st| {
                st.commands.start(CommandRecord {
                    session,
                    op: msg.id,
                    op_index,
                    txn: msg.txn,
                    outputs_mask: mask,
                    state: CommandState::Pending,
                })
            });
            f(&ctx, call.inputs.as_slice(), handle);
        }

        OperationHandler::AddHandler(f) => {
            let record = SubscriptionRecord {
                session,
                context: callback_context(op, &call.inputs),
                op: msg.id,
                kind: SubscriptionKind::Repeating,
                registration: None,
            };
            let r = core.with_state(|st| st.registry.insert(record));
            let notifier = EventNotifier::new(core, r, msg.id);

            let handle = match f(&ctx, call.inputs.as_slice(), notifier) {
                Some(registration) => {
                    let attached = core.with_state(|st| st.registry.attach(r, registration));
                    match attached {
                        Ok(()) => {
                            debug!("IPC[{}]: {} -> handler {:#x}", session, op.name, r.raw());
                            r.raw()
                        }
                        Err(orphan) => {
                            orphan.remove(&ctx);
                            0
                        }
                    }
                }
                None => {
                    core.with_state(|st| st.registry.cancel(r));
                    debug!("IPC[{}]: {} refused by implementation", session, op.name);
                    0
                }
            };
            respond_now(core, session, op, msg, mask, &Reply::returning(Value::Reference(handle)));
        }

        OperationHandler::RemoveHandler { add } => {
            let raw = call.inputs.first().and_then(Value::as_reference).unwrap_or(0);
            let taken = core.with_state(|st| st.registry.take_for_remove(session, *add, raw));
            match taken {
                Ok(record) => {
                    if let Some(registration) = record.registration {
                        registration.remove(&ctx);
                    }
                    debug!("IPC[{}]: {} released handler {:#x}", session, op.name, raw);
                    respond_now(core, session, op, msg, mask, &Reply::empty());
                }
                Err(v) => {
                    core.close_session(session, Some(v));
                }
            }
        }

        OperationHandler::OneShot(f) => {
            let record = SubscriptionRecord {
                session,
                context: callback_context(op, &call.inputs),
                op: msg.id,
                kind: SubscriptionKind::OneShot,
                registration: None,
            };
            let r = core.with_state(|st| st.registry.insert(record));
            let notifier = CallbackNotifier::new(core, r, msg.id);
            let reply = f(&ctx, call.inputs.as_slice(), notifier);
            respond_now(core, session, op, msg, mask, &reply);
        }
    }
}

// ── Handle ───────────────────────────────────────────────────

/// Thread-safe access to a running server.
#[derive(Clone)]
pub struct ServerHandle {
    core: Arc<Core>,
}

impl ServerHandle {
    pub fn service_name(&self) -> &str {
        &self.core.config.service_name
    }

    pub fn schema(&self) -> &InterfaceSchema {
        &self.core.schema
    }

    /// Open a same-process session. `schema` is the client's view of the
    /// interface and must match the server's exactly.
    pub fn connect(&self, schema: &InterfaceSchema) -> Result<LocalClient, BindError> {
        if schema.fingerprint() != self.core.fingerprint {
            warn!(
                "IPC: local connect to `{}` refused: protocol mismatch",
                self.core.config.service_name
            );
            return Err(BindError::Refused(Violation::ProtocolMismatch));
        }
        let queue = Arc::new(LocalQueue::new());
        let link = LocalLink::new(queue.clone());
        let session = self.core.open_session(Box::new(link), true)?;
        Ok(LocalClient::new(session, self.core.clone(), schema.clone(), queue))
    }

    /// Open a session over a byte transport. The peer's first frame must
    /// be its hello. Pump the returned reader (or run it on its own
    /// thread) to feed the server.
    pub fn attach<T>(&self, transport: T) -> Result<RemoteReader<T>, BindError>
    where
        T: Transport + Send + 'static,
    {
        let shared: SharedTransport<T> = Arc::new(embassy_sync::blocking_mutex::Mutex::new(
            core::cell::RefCell::new(transport),
        ));
        let link = RemoteLink::new(shared.clone());
        let session = self.core.open_session(Box::new(link), false)?;
        Ok(RemoteReader::new(session, shared, self.core.clone()))
    }

    pub fn responder(&self) -> Responder {
        Responder::new(&self.core)
    }

    /// Ask the server loop to close every session and return.
    pub fn shutdown(&self) {
        if let Err(e) = self.core.post(ServerEvent::Shutdown) {
            error!("IPC: shutdown request lost: {}", e);
        }
    }

    pub fn stats(&self) -> ServerStats {
        self.core.with_state(|st| ServerStats {
            sessions: st.sessions.len(),
            commands: st.commands.len(),
            subscriptions: st.registry.len(),
        })
    }

    /// Live subscription records owned by `session`.
    pub fn subscriptions_for(&self, session: SessionRef) -> usize {
        self.core.with_state(|st| st.registry.count_for(session))
    }
}
