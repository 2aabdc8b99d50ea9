//! Turn a browser's remote-debugging network events into HAR trace entries.
//!
//! The recorder listens to the Network domain of a debugging session,
//! correlates each transaction's request hops with its eventual response or
//! failure, enriches completed transactions with their body and cookies, and
//! emits one HAR `entries[]` item per hop through a flow-controlled stream.
//!
//! # Layout
//!
//! - [`protocol`]: typed Network domain events and command payloads
//! - [`session`]: the [`session::DevToolsSession`] capability surface and target discovery
//! - [`recorder`]: the correlation engine ([`recorder::NetworkRecorder`])
//! - [`har`]: the HAR entry model, the entry builder and an NDJSON writer
//! - [`config`]: recorder settings
//! - [`error`]: [`HarError`] and [`Result`]

pub mod config;
pub mod error;
pub mod har;
pub mod protocol;
pub mod recorder;
pub mod session;

pub use error::{HarError, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::{
        CorrelationConfig, DevToolsEndpoint, FilterConfig, RecorderConfig, SinkConfig,
    };
    pub use crate::error::{HarError, Result};
    pub use crate::har::{FinishedRecord, NdjsonWriter};
    pub use crate::protocol::{NetworkEvent, TransactionId};
    pub use crate::recorder::NetworkRecorder;
    pub use crate::session::{DevToolsSession, ScriptedSession, TargetDiscovery};
}
