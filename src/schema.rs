//! Interface schema: the static description both ends of a channel share.
//!
//! An [`InterfaceSchema`] lists operations; each operation lists its
//! parameters in order with a direction and a [`ParamKind`]. The codec
//! walks this list to pack and unpack buffers positionally, so the schema
//! *is* the wire format. Two ends whose schemas differ cannot talk: the
//! [`fingerprint`](InterfaceSchema::fingerprint) is checked when a session
//! opens.
//!
//! ```text
//!  call buffer      [required-outputs u32]? [input 0] [input 1] ...
//!  response buffer  [return value]? [requested output i] ...
//!  event buffer     [client context u32] [callback param 0] ...
//! ```

use serde::Serialize;

use crate::error::SchemaError;
use crate::rpc::message::MAX_MESSAGE_SIZE;

/// Operation identifier carried in every message.
pub type MessageId = u32;

/// Reserved for the session hello frame on remote channels.
pub const HELLO_ID: MessageId = u32::MAX;

/// Width of the required-outputs mask on the wire.
pub const OUTPUT_MASK_SIZE: usize = 4;

/// Width of length prefixes (strings) and counts (arrays).
pub const LENGTH_PREFIX_SIZE: usize = 4;

// ── Parameter kinds ──────────────────────────────────────────

/// Fixed-width scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScalarKind {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F64,
}

impl ScalarKind {
    /// Packed size in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }
}

/// What a single parameter carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ParamKind {
    Scalar(ScalarKind),
    /// UTF-8 string of at most `max_len` bytes.
    String { max_len: u32 },
    /// At most `max_count` scalars.
    Array { element: ScalarKind, max_count: u32 },
    /// Opaque 32-bit handle minted by the other side.
    Reference,
    /// Caller-supplied continuation. On the wire this is the caller's
    /// opaque context value; the server answers through an event message.
    Callback(CallbackSpec),
}

impl ParamKind {
    pub const fn string(max_len: u32) -> Self {
        Self::String { max_len }
    }

    pub const fn array(element: ScalarKind, max_count: u32) -> Self {
        Self::Array { element, max_count }
    }

    /// Largest packed size this parameter can take.
    pub fn max_size(&self) -> usize {
        match self {
            Self::Scalar(s) => s.size(),
            Self::String { max_len } => LENGTH_PREFIX_SIZE + *max_len as usize,
            Self::Array { element, max_count } => {
                LENGTH_PREFIX_SIZE + element.size() * *max_count as usize
            }
            Self::Reference | Self::Callback(_) => 4,
        }
    }

    fn is_plain_data(&self) -> bool {
        !matches!(self, Self::Callback(_))
    }
}

impl From<ScalarKind> for ParamKind {
    fn from(s: ScalarKind) -> Self {
        Self::Scalar(s)
    }
}

/// Parameter direction relative to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    In,
    Out,
}

/// One positional parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub direction: Direction,
    pub kind: ParamKind,
}

/// Signature of a callback: the parameters an event delivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackSpec {
    pub name: &'static str,
    pub params: Vec<ParamSpec>,
}

impl CallbackSpec {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn param(mut self, name: &'static str, kind: impl Into<ParamKind>) -> Self {
        self.params.push(ParamSpec {
            name,
            direction: Direction::In,
            kind: kind.into(),
        });
        self
    }
}

// ── Operations ───────────────────────────────────────────────

/// Role an operation plays in the subscription lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationKind {
    /// Ordinary request/response (may still carry a one-shot callback).
    Call,
    /// Registers a repeating handler; paired with a Remove operation.
    AddHandler { remove: MessageId },
    /// Unregisters a handler by the reference its Add returned.
    RemoveHandler { add: MessageId },
}

/// Static description of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationSpec {
    pub id: MessageId,
    pub name: &'static str,
    pub kind: OperationKind,
    pub params: Vec<ParamSpec>,
    pub returns: Option<ParamKind>,
}

impl OperationSpec {
    pub fn call(id: MessageId, name: &'static str) -> Self {
        Self {
            id,
            name,
            kind: OperationKind::Call,
            params: Vec::new(),
            returns: None,
        }
    }

    /// Add-Handler operation. The returned reference and the callback
    /// input are part of the contract; use [`callback`](Self::callback)
    /// to declare the handler signature.
    pub fn add_handler(id: MessageId, name: &'static str, remove: MessageId) -> Self {
        Self {
            id,
            name,
            kind: OperationKind::AddHandler { remove },
            params: Vec::new(),
            returns: Some(ParamKind::Reference),
        }
    }

    pub fn remove_handler(id: MessageId, name: &'static str, add: MessageId) -> Self {
        Self {
            id,
            name,
            kind: OperationKind::RemoveHandler { add },
            params: vec![ParamSpec {
                name: "handlerRef",
                direction: Direction::In,
                kind: ParamKind::Reference,
            }],
            returns: None,
        }
    }

    #[must_use]
    pub fn input(mut self, name: &'static str, kind: impl Into<ParamKind>) -> Self {
        self.params.push(ParamSpec {
            name,
            direction: Direction::In,
            kind: kind.into(),
        });
        self
    }

    #[must_use]
    pub fn output(mut self, name: &'static str, kind: impl Into<ParamKind>) -> Self {
        self.params.push(ParamSpec {
            name,
            direction: Direction::Out,
            kind: kind.into(),
        });
        self
    }

    #[must_use]
    pub fn callback(self, name: &'static str, spec: CallbackSpec) -> Self {
        self.input(name, ParamKind::Callback(spec))
    }

    #[must_use]
    pub fn returns(mut self, kind: impl Into<ParamKind>) -> Self {
        self.returns = Some(kind.into());
        self
    }

    pub fn inputs(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.direction == Direction::In)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.direction == Direction::Out)
    }

    pub fn output_count(&self) -> usize {
        self.outputs().count()
    }

    /// Whether call buffers start with a required-outputs mask.
    pub fn has_outputs(&self) -> bool {
        self.outputs().next().is_some()
    }

    /// Mask with one bit per output parameter.
    pub fn all_outputs_mask(&self) -> u32 {
        match self.output_count() {
            0 => 0,
            32 => u32::MAX,
            n => (1u32 << n) - 1,
        }
    }

    /// The callback signature, if one of the inputs is a callback.
    pub fn callback_spec(&self) -> Option<&CallbackSpec> {
        self.inputs().find_map(|p| match &p.kind {
            ParamKind::Callback(spec) => Some(spec),
            _ => None,
        })
    }

    pub fn max_call_size(&self) -> usize {
        let mask = if self.has_outputs() { OUTPUT_MASK_SIZE } else { 0 };
        mask + self.inputs().map(|p| p.kind.max_size()).sum::<usize>()
    }

    pub fn max_response_size(&self) -> usize {
        self.returns.as_ref().map_or(0, ParamKind::max_size)
            + self.outputs().map(|p| p.kind.max_size()).sum::<usize>()
    }

    pub fn max_event_size(&self) -> usize {
        self.callback_spec().map_or(0, |cb| {
            4 + cb.params.iter().map(|p| p.kind.max_size()).sum::<usize>()
        })
    }

    fn max_message_size(&self) -> usize {
        self.max_call_size()
            .max(self.max_response_size())
            .max(self.max_event_size())
    }

    fn check_shape(&self) -> Result<(), SchemaError> {
        if self.output_count() > 32 {
            return Err(SchemaError::TooManyOutputs(self.name));
        }
        let callbacks = self
            .params
            .iter()
            .filter(|p| matches!(p.kind, ParamKind::Callback(_)))
            .count();
        if callbacks > 1 {
            return Err(SchemaError::MultipleCallbacks(self.name));
        }
        // Callbacks are inputs only, and their own parameters are plain data.
        for p in &self.params {
            if let ParamKind::Callback(cb) = &p.kind {
                if p.direction == Direction::Out
                    || cb.params.iter().any(|cp| !cp.kind.is_plain_data())
                {
                    return Err(SchemaError::BadCallback(self.name));
                }
            }
        }
        if let Some(ret) = &self.returns {
            if !matches!(ret, ParamKind::Scalar(_) | ParamKind::Reference) {
                return Err(SchemaError::BadReturn(self.name));
            }
        }
        match self.kind {
            OperationKind::Call => {}
            OperationKind::AddHandler { .. } => {
                if self.returns != Some(ParamKind::Reference) || callbacks != 1 {
                    return Err(SchemaError::BadAddHandler(self.name));
                }
            }
            OperationKind::RemoveHandler { .. } => {
                let ok = self.params.len() == 1
                    && self.params[0].direction == Direction::In
                    && self.params[0].kind == ParamKind::Reference
                    && self.returns.is_none();
                if !ok {
                    return Err(SchemaError::BadRemoveHandler(self.name));
                }
            }
        }
        let size = self.max_message_size();
        if size > MAX_MESSAGE_SIZE {
            return Err(SchemaError::MessageTooLarge {
                op: self.name,
                size,
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(())
    }
}

// ── Interface ────────────────────────────────────────────────

/// A versioned set of operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceSchema {
    pub name: &'static str,
    pub version: u32,
    pub operations: Vec<OperationSpec>,
}

impl InterfaceSchema {
    pub fn new(name: &'static str, version: u32) -> Self {
        Self {
            name,
            version,
            operations: Vec::new(),
        }
    }

    #[must_use]
    pub fn operation(mut self, op: OperationSpec) -> Self {
        self.operations.push(op);
        self
    }

    /// Check every invariant the codec and the engines rely on.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for (i, op) in self.operations.iter().enumerate() {
            if op.id == HELLO_ID {
                return Err(SchemaError::ReservedId(op.id));
            }
            if self.operations[..i].iter().any(|o| o.id == op.id) {
                return Err(SchemaError::DuplicateId(op.id));
            }
            op.check_shape()?;
        }
        for op in &self.operations {
            match op.kind {
                OperationKind::AddHandler { remove } => {
                    let other = self.operation_by_id(remove).ok_or(SchemaError::UndeclaredId(remove))?;
                    if other.kind != (OperationKind::RemoveHandler { add: op.id }) {
                        return Err(SchemaError::BadPairing {
                            op: op.name,
                            other: other.name,
                        });
                    }
                }
                OperationKind::RemoveHandler { add } => {
                    let other = self.operation_by_id(add).ok_or(SchemaError::UndeclaredId(add))?;
                    if other.kind != (OperationKind::AddHandler { remove: op.id }) {
                        return Err(SchemaError::BadPairing {
                            op: op.name,
                            other: other.name,
                        });
                    }
                }
                OperationKind::Call => {}
            }
        }
        Ok(())
    }

    pub fn operation_by_id(&self, id: MessageId) -> Option<&OperationSpec> {
        self.operations.iter().find(|op| op.id == id)
    }

    pub fn operation_by_name(&self, name: &str) -> Option<&OperationSpec> {
        self.operations.iter().find(|op| op.name == name)
    }

    /// Largest message any operation of this interface can produce.
    pub fn max_message_size(&self) -> usize {
        self.operations
            .iter()
            .map(OperationSpec::max_message_size)
            .max()
            .unwrap_or(0)
    }

    /// SHA-256 over the postcard encoding of the whole schema. Any change
    /// to names, order, kinds or bounds changes the fingerprint.
    pub fn fingerprint(&self) -> [u8; 32] {
        let bytes = match postcard::to_allocvec(self) {
            Ok(b) => b,
            Err(e) => crate::fatal!("schema `{}` cannot be serialized: {e}", self.name),
        };
        hmac_sha256::Hash::hash(&bytes)
    }
}
