//! Core terminal client components.
//!
//! - **output**: Scrollback processing (ANSI stripping, spinner collapse,
//!   redundant line suppression)
//! - **packet**: Socket.IO / Engine.IO wire codec
//! - **link**: Physical connections (WebSocket I/O thread)
//! - **transport**: Connection lifecycle and named event listeners
//! - **session**: Terminal session combining transport + scrollback
//!
//! # Architecture
//!
//! ```text
//! TerminalSession
//! ├── Transport
//! │   ├── ListenerRegistry (replayed on every connect)
//! │   └── Link (WebSocket, I/O thread)
//! ├── OutputProcessor (scrollback)
//! └── ConnectionState (cwd + command history)
//! ```

pub mod link;
pub mod output;
pub mod packet;
pub mod session;
pub mod transport;
