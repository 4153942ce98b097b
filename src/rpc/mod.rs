//! Binding runtime.
//!
//! Turns an [`InterfaceSchema`](crate::schema::InterfaceSchema) into a
//! working client/server protocol.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Binding Stack                            │
//! │                                                                  │
//! │  ┌───────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐  │
//! │  │ Transport │──▶│  Codec   │──▶│  Inbox   │──▶│   Engine     │  │
//! │  │ (remote)  │   │ (frames) │   │ (events) │   │  dispatch    │  │
//! │  └───────────┘   └──────────┘   └──────────┘   └──────┬───────┘  │
//! │                                      ▲                │          │
//! │  LocalClient ────────────────────────┘                ▼          │
//! │                                              ┌────────────────┐  │
//! │  Responder / notifiers ──▶ Inbox (Deliver)   │ pack / unpack  │  │
//! │  (any thread)                                │ registry, cmds │  │
//! │                                              └────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod client;
pub mod codec;
pub mod command;
pub mod dispatch;
pub mod engine;
pub mod message;
pub mod pack;
pub mod pool;
pub mod registry;
pub mod session;
pub(crate) mod shared;
pub mod transport;
pub mod value;
