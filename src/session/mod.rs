//! The remote-debugging session the recorder depends on.
//!
//! Connection management, protocol framing and domain bookkeeping belong to the
//! protocol client; the recorder only needs the narrow capability surface of
//! [`DevToolsSession`]. [`TargetDiscovery`] resolves which page to attach to over
//! the browser's HTTP endpoint, and [`ScriptedSession`] is an in-memory session
//! for demos and tests.

pub mod discovery;
pub mod scripted;

pub use discovery::{BrowserVersion, TargetDiscovery, TargetInfo};
pub use scripted::ScriptedSession;

use crate::error::Result;
use crate::protocol::{Cookie, ResponseBody, TransactionId};
use async_trait::async_trait;

/// Commands the recorder issues against a live debugging session.
#[async_trait]
pub trait DevToolsSession: Send + Sync {
    /// Enable network event delivery. Idempotent.
    async fn enable_network(&self) -> Result<()>;

    /// Fetch the body of a finished response.
    ///
    /// Fails when the browser has already evicted the body.
    async fn fetch_response_body(&self, id: &TransactionId) -> Result<ResponseBody>;

    /// Fetch the cookies the browser would send to any of `urls`.
    async fn fetch_cookies(&self, urls: &[String]) -> Result<Vec<Cookie>>;
}
