//! ifbind: schema-driven IPC binding runtime.
//!
//! An interface is described once as an [`InterfaceSchema`]. Both ends
//! build the same schema; the server registers one handler per operation
//! and the runtime takes care of packing, dispatch, deferred responses,
//! event subscriptions and per-session cleanup.
//!
//! ```no_run
//! use ifbind::prelude::*;
//!
//! let schema = InterfaceSchema::new("thermal", 1)
//!     .operation(OperationSpec::call(1, "GetTemp").returns(ScalarKind::I32));
//! let mut server = ServiceBuilder::new(schema.clone(), BindingConfig::default())
//!     .on_call(1, |_ctx, _args| Reply::returning(21i32))
//!     .advertise()?;
//! let client = server.handle().connect(&schema)?;
//! # let _ = (&mut server, client);
//! # Ok::<(), ifbind::BindError>(())
//! ```

#![deny(unused_must_use)]

pub mod adapters;
pub mod config;
pub mod error;
pub mod rpc;
pub mod schema;

pub use error::{BindError, Result};

/// Everything an interface author or host usually needs.
pub mod prelude {
    pub use crate::config::BindingConfig;
    pub use crate::error::{BindError, ChannelError, DecodeError, SchemaError, Violation};
    pub use crate::rpc::client::{ClientCodec, Incoming, LocalClient, RemoteClient};
    pub use crate::rpc::command::{CommandHandle, Responder};
    pub use crate::rpc::dispatch::{CallContext, Reply};
    pub use crate::rpc::engine::{Server, ServerHandle, ServerStats, ServiceBuilder};
    pub use crate::rpc::pack::{DecodedEvent, DecodedResponse};
    pub use crate::rpc::registry::{CallbackNotifier, EventNotifier, HandlerRegistration};
    pub use crate::rpc::session::SessionRef;
    pub use crate::rpc::transport::{MemoryPipe, Transport};
    pub use crate::rpc::value::Value;
    pub use crate::schema::{
        CallbackSpec, InterfaceSchema, MessageId, OperationSpec, ParamKind, ScalarKind,
    };
}
