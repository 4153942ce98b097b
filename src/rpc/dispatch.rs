//! Dispatch table: message id → operation handler.
//!
//! Ids are small constants chosen by the interface author, so the table is
//! a plain vector indexed by id. Each entry is one of a closed set of
//! handler shapes; which shapes an operation accepts follows from its
//! schema (see [`DispatchTable::register`]).

use crate::error::SchemaError;
use crate::schema::{InterfaceSchema, MessageId, OperationKind, OperationSpec};

use super::command::CommandHandle;
use super::registry::{CallbackNotifier, EventNotifier, HandlerRegistration};
use super::session::SessionRef;
use super::value::Value;

/// Ids at or above this cannot be dispatched.
pub const MAX_DISPATCH_ID: u32 = 4096;

/// What the handler knows about the request it is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub(crate) session: SessionRef,
    pub(crate) op: MessageId,
    pub(crate) txn: u32,
}

impl CallContext {
    /// The client session the call (or cleanup) is on behalf of.
    pub fn session(&self) -> SessionRef {
        self.session
    }

    pub fn operation(&self) -> MessageId {
        self.op
    }

    pub fn txn(&self) -> u32 {
        self.txn
    }
}

/// Return value and outputs produced by a handler.
///
/// Outputs are indexed by their position among the operation's output
/// parameters. A requested output left as `None` is sent as the default
/// for its kind; an output the caller did not request is dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub result: Option<Value>,
    pub outputs: Vec<Option<Value>>,
}

impl Reply {
    /// Completion with no return value and no outputs.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn returning(result: impl Into<Value>) -> Self {
        Self {
            result: Some(result.into()),
            outputs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_output(mut self, index: usize, value: impl Into<Value>) -> Self {
        self.set_output(index, value);
        self
    }

    pub fn set_output(&mut self, index: usize, value: impl Into<Value>) {
        if self.outputs.len() <= index {
            self.outputs.resize(index + 1, None);
        }
        self.outputs[index] = Some(value.into());
    }
}

pub type SyncHandler = Box<dyn FnMut(&CallContext, &[Value]) -> Reply>;
pub type AsyncHandler = Box<dyn FnMut(&CallContext, &[Value], CommandHandle)>;
pub type AddHandlerFn =
    Box<dyn FnMut(&CallContext, &[Value], EventNotifier) -> Option<Box<dyn HandlerRegistration>>>;
pub type CallbackHandler = Box<dyn FnMut(&CallContext, &[Value], CallbackNotifier) -> Reply>;

/// One entry of the dispatch table.
pub enum OperationHandler {
    /// Answered by returning.
    Sync(SyncHandler),
    /// Answered later through a [`Responder`](super::command::Responder).
    Async(AsyncHandler),
    /// Registers a repeating handler; returns its removal routine, or
    /// `None` to refuse the registration.
    AddHandler(AddHandlerFn),
    /// Served by the registry itself.
    RemoveHandler { add: MessageId },
    /// Sync call carrying a callback that fires at most once.
    OneShot(CallbackHandler),
}

impl OperationHandler {
    fn fits(&self, op: &OperationSpec) -> bool {
        let has_callback = op.callback_spec().is_some();
        match (self, op.kind) {
            (Self::Sync(_) | Self::Async(_), OperationKind::Call) => !has_callback,
            (Self::OneShot(_), OperationKind::Call) => has_callback,
            (Self::AddHandler(_), OperationKind::AddHandler { .. }) => true,
            _ => false,
        }
    }
}

struct Entry {
    op: usize,
    handler: Option<OperationHandler>,
}

pub struct DispatchTable {
    entries: Vec<Option<Entry>>,
}

impl DispatchTable {
    /// Empty table for `schema`. Remove-Handler entries are filled in.
    pub fn new(schema: &InterfaceSchema) -> Result<Self, SchemaError> {
        let size = schema
            .operations
            .iter()
            .map(|op| op.id)
            .max()
            .map_or(0, |max| max as usize + 1);
        if let Some(op) = schema.operations.iter().find(|op| op.id >= MAX_DISPATCH_ID) {
            return Err(SchemaError::IdTooLarge(op.id));
        }

        let mut entries: Vec<Option<Entry>> = (0..size).map(|_| None).collect();
        for (index, op) in schema.operations.iter().enumerate() {
            let handler = match op.kind {
                OperationKind::RemoveHandler { add } => Some(OperationHandler::RemoveHandler { add }),
                _ => None,
            };
            entries[op.id as usize] = Some(Entry { op: index, handler });
        }
        Ok(Self { entries })
    }

    /// Install the handler for `id`. The handler shape must suit the
    /// operation: async handlers only for plain calls without callbacks,
    /// add-handler functions only for Add-Handler operations.
    pub fn register(
        &mut self,
        schema: &InterfaceSchema,
        id: MessageId,
        handler: OperationHandler,
    ) -> Result<(), SchemaError> {
        let entry = self
            .entries
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or(SchemaError::UndeclaredId(id))?;
        let op = &schema.operations[entry.op];
        if !handler.fits(op) {
            return Err(SchemaError::HandlerKindMismatch(op.name));
        }
        if entry.handler.is_some() {
            return Err(SchemaError::DuplicateHandler(op.name));
        }
        entry.handler = Some(handler);
        Ok(())
    }

    /// Schema index and handler for `id`, if both exist.
    pub fn lookup(&mut self, id: MessageId) -> Option<(usize, &mut OperationHandler)> {
        let entry = self.entries.get_mut(id as usize)?.as_mut()?;
        let op = entry.op;
        entry.handler.as_mut().map(|h| (op, h))
    }

    /// First operation still lacking a handler.
    pub fn first_missing<'s>(&self, schema: &'s InterfaceSchema) -> Option<&'s OperationSpec> {
        self.entries
            .iter()
            .flatten()
            .find(|e| e.handler.is_none())
            .map(|e| &schema.operations[e.op])
    }
}
