//! Error types for the binding runtime.
//!
//! Errors fall into three severities and each one has a different
//! carrier:
//!
//! - **Protocol violations** (malformed buffers, forged or stale handles)
//!   are reported by [`DecodeError`] / [`Violation`] and end the offending
//!   session. They are never retried.
//! - **Local programming defects** (double respond, pool exhaustion,
//!   out-of-bounds values handed to the packer) go through [`fatal!`],
//!   which logs and panics. The release profile aborts on panic.
//! - **Expected absence** (an event for a subscription that is gone, an
//!   output nobody asked for) is a silent no-op and has no error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Fatal defects
// ---------------------------------------------------------------------------

/// Log at `error!` and panic. Used for local programming defects only;
/// never for anything a remote peer can trigger.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        ::log::error!("FATAL: {}", format_args!($($arg)*));
        panic!($($arg)*)
    }};
}

// ---------------------------------------------------------------------------
// Malformed messages
// ---------------------------------------------------------------------------

/// A buffer could not be unpacked against the interface schema.
///
/// Every variant is a `MalformedMessage` condition: the peer is either
/// hostile or out of sync, and the session is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The buffer ended before the schema said it would.
    #[error("malformed message: truncated (needed {needed} bytes, {available} left)")]
    Truncated { needed: usize, available: usize },
    /// Declared string length exceeds the schema's `max_len`.
    #[error("malformed message: string length {declared} exceeds max {max}")]
    StringTooLong { declared: usize, max: usize },
    /// Declared element count exceeds the schema's `max_count`.
    #[error("malformed message: array count {declared} exceeds max {max}")]
    ArrayTooLong { declared: usize, max: usize },
    /// String bytes are not valid UTF-8.
    #[error("malformed message: string is not valid UTF-8")]
    InvalidUtf8,
    /// A boolean byte other than 0 or 1.
    #[error("malformed message: invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
    /// Required-outputs mask names outputs the operation does not have.
    #[error("malformed message: output mask {mask:#x} exceeds {outputs} outputs")]
    UnknownOutputBits { mask: u32, outputs: usize },
    /// Bytes left over after the last parameter.
    #[error("malformed message: {0} trailing bytes")]
    TrailingBytes(usize),
    /// Frame or message header is unusable.
    #[error("malformed message: bad header")]
    BadHeader,
}

// ---------------------------------------------------------------------------
// Channel errors
// ---------------------------------------------------------------------------

/// Failure to move a message through a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The receiving queue is at capacity.
    #[error("channel full")]
    Full,
    /// The peer is gone.
    #[error("channel closed")]
    Closed,
    /// Message does not fit the bounded buffer.
    #[error("message exceeds maximum size")]
    TooLarge,
    /// Underlying byte transport failed.
    #[error("transport error")]
    Transport,
}

// ---------------------------------------------------------------------------
// Schema errors
// ---------------------------------------------------------------------------

/// The interface description or handler registration is inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("duplicate message id {0}")]
    DuplicateId(u32),
    #[error("message id {0} is not declared by the interface")]
    UndeclaredId(u32),
    #[error("message id {0} is reserved")]
    ReservedId(u32),
    #[error("operation `{0}` has more than 32 output parameters")]
    TooManyOutputs(&'static str),
    #[error("operation `{op}` needs {size} bytes, above the {max} byte limit")]
    MessageTooLarge {
        op: &'static str,
        size: usize,
        max: usize,
    },
    #[error("operation `{0}` has more than one callback parameter")]
    MultipleCallbacks(&'static str),
    #[error("callback of `{0}` must be an input with plain-data parameters")]
    BadCallback(&'static str),
    #[error("operation `{0}` must return a scalar or a reference")]
    BadReturn(&'static str),
    #[error("add-handler `{0}` must return a reference and take a callback")]
    BadAddHandler(&'static str),
    #[error("remove-handler `{0}` must take exactly one reference input")]
    BadRemoveHandler(&'static str),
    #[error("operation `{op}` is paired with `{other}`, which is not its counterpart")]
    BadPairing {
        op: &'static str,
        other: &'static str,
    },
    #[error("handler kind does not match operation `{0}`")]
    HandlerKindMismatch(&'static str),
    #[error("operation `{0}` already has a handler")]
    DuplicateHandler(&'static str),
    #[error("message id {0} is too large for the dispatch table")]
    IdTooLarge(u32),
}

// ---------------------------------------------------------------------------
// Pool errors
// ---------------------------------------------------------------------------

/// Every slot of a fixed-capacity pool is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{0} pool exhausted")]
pub struct PoolExhausted(pub &'static str);

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// [`BindingConfig`](crate::config::BindingConfig) failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("service name must not be empty")]
    EmptyServiceName,
    #[error("{0} must be at least 1")]
    PoolSize(&'static str),
}

// ---------------------------------------------------------------------------
// Protocol violations
// ---------------------------------------------------------------------------

/// Why a session was terminated by the binding layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("{0}")]
    Malformed(#[from] DecodeError),
    /// Handle unknown, already removed, or minted for someone else.
    #[error("invalid reference {0:#010x}")]
    InvalidReference(u32),
    /// Client presented the wrong protocol fingerprint.
    #[error("protocol fingerprint mismatch")]
    ProtocolMismatch,
}

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible public operation funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("session refused: {0}")]
    Refused(Violation),
    #[error("unknown session")]
    UnknownSession,
    #[error("no handler registered for `{0}`")]
    HandlerMissing(&'static str),
    #[error("unexpected reply for message id {0}")]
    UnexpectedReply(u32),
}

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, BindError>;
