//! Adapters: host-side implementations of ambient concerns.
//!
//! | Adapter        | Implements        | Connects to                       |
//! |----------------|-------------------|-----------------------------------|
//! | `console_log`  | `log` sink        | `tracing-subscriber` fmt, stderr  |

pub mod console_log;
