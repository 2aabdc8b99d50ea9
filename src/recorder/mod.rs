//! The trace correlation engine.
//!
//! [`NetworkRecorder`] subscribes to the Network domain of a
//! [`DevToolsSession`], correlates request, response and failure events per
//! transaction, enriches completed transactions with their body and cookies,
//! and emits one [`FinishedRecord`] per hop through a flow-controlled
//! [`EmissionSink`].
//!
//! Each incoming event is handled in its own task. A handler is an error
//! boundary: whatever goes wrong while handling one event is logged and the
//! transaction is dropped; nothing propagates back to the event source.
//!
//! # Examples
//!
//! ```ignore
//! use devtools_har::prelude::*;
//!
//! let recorder = NetworkRecorder::new(session, RecorderConfig::default())?;
//! recorder.start().await?;
//!
//! let records = recorder.records();
//! tokio::spawn(async move { recorder.run(events).await });
//!
//! let mut writer = NdjsonWriter::create("trace.ndjson").await?;
//! writer.write_stream(records).await?;
//! ```

pub mod filter;
pub mod sink;
pub mod store;

pub use filter::TraceFilter;
pub use sink::{EmissionSink, SinkState};
pub use store::{CorrelationStore, PendingEntry, RequestRegistration};

use crate::config::RecorderConfig;
use crate::error::{HarError, Result};
use crate::har::{build_completed, build_failed, FinishedRecord, RequestRecord};
use crate::protocol::{
    LoadingFailed, NetworkEvent, RequestWillBeSent, ResponseBody, ResponseReceived, TransactionId,
};
use crate::session::DevToolsSession;
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Extra attempts at fetching a body the browser has not finished buffering.
const BODY_FETCH_RETRIES: usize = 2;
const BODY_FETCH_RETRY_DELAY: Duration = Duration::from_millis(100);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Everything a handler task needs, cloned into each task.
#[derive(Clone)]
struct HandlerContext {
    session: Arc<dyn DevToolsSession>,
    filter: Arc<TraceFilter>,
    store: Arc<CorrelationStore>,
    sink: EmissionSink,
}

/// Decrements the active handler count when a handler task finishes.
struct ActiveHandler(Arc<AtomicUsize>);

impl ActiveHandler {
    fn enter(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(count))
    }
}

impl Drop for ActiveHandler {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Turns Network domain events into a stream of trace records.
///
/// Records are produced by handler tasks, so [`dispatch`](Self::dispatch)
/// cannot report flow control. Event sources that want to throttle poll
/// [`is_backpressured`](Self::is_backpressured) instead.
pub struct NetworkRecorder {
    context: HandlerContext,
    config: RecorderConfig,
    active_handlers: Arc<AtomicUsize>,
    stop_flag: Arc<AtomicBool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkRecorder {
    /// Create a recorder over `session`.
    ///
    /// Fails when the configuration is invalid or a filter pattern does not compile.
    pub fn new(session: Arc<dyn DevToolsSession>, config: RecorderConfig) -> Result<Self> {
        config.validate()?;
        let filter = TraceFilter::new(&config.filter)?;

        Ok(Self {
            context: HandlerContext {
                session,
                filter: Arc::new(filter),
                store: Arc::new(CorrelationStore::new(config.correlation.clone())),
                sink: EmissionSink::new(&config.sink),
            },
            config,
            active_handlers: Arc::new(AtomicUsize::new(0)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CorrelationStore> {
        &self.context.store
    }

    pub fn sink(&self) -> &EmissionSink {
        &self.context.sink
    }

    /// Whether new records would be queued rather than handed to the consumer,
    /// either because it has not asked for more or because it is behind by the
    /// configured high-water mark.
    pub fn is_backpressured(&self) -> bool {
        self.context.sink.state() == SinkState::Buffering
    }

    /// The record stream. It ends once the recorder is closed.
    ///
    /// Meant to be taken once; concurrent consumers split the records between them.
    pub fn records(&self) -> impl Stream<Item = FinishedRecord> + Send + 'static {
        self.context.sink.clone().into_stream()
    }

    /// Enable the Network domain and start evicting stale transactions.
    pub async fn start(&self) -> Result<()> {
        if self.is_closed() {
            return Err(HarError::RecorderError("Recorder already closed".to_string()));
        }
        if self.lock_sweeper().is_some() {
            return Err(HarError::RecorderError("Recorder already started".to_string()));
        }

        debug!("Enabling network domain");
        self.context.session.enable_network().await?;
        info!("Network domain enabled");

        let store = Arc::clone(&self.context.store);
        let stop_flag = Arc::clone(&self.stop_flag);
        let interval = self.config.correlation.sweep_interval;

        let handle = tokio::spawn(async move {
            Self::sweep_loop(store, stop_flag, interval).await;
        });

        let mut sweeper = self.lock_sweeper();
        if sweeper.is_some() {
            handle.abort();
            return Err(HarError::RecorderError("Recorder already started".to_string()));
        }
        *sweeper = Some(handle);
        info!("Network recorder started");

        Ok(())
    }

    fn lock_sweeper(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.sweeper.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn sweep_loop(store: Arc<CorrelationStore>, stop_flag: Arc<AtomicBool>, interval: Duration) {
        while !stop_flag.load(Ordering::Relaxed) {
            tokio::time::sleep(interval).await;
            let evicted = store.evict_expired();
            if evicted > 0 {
                debug!("Evicted {} stale transaction(s)", evicted);
            }
        }
        debug!("Sweep loop exiting");
    }

    pub fn is_closed(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }

    /// Handle one event.
    ///
    /// Request hops are registered before this returns, so events must be
    /// dispatched in the order the session delivered them.
    pub fn dispatch(&self, event: NetworkEvent) {
        if self.is_closed() {
            debug!("Recorder closed, ignoring {} for {}", event.method(), event.transaction_id());
            return;
        }

        let context = self.context.clone();
        match event {
            NetworkEvent::RequestWillBeSent(event) => {
                let registration = context.store.begin_request(event.request_id.clone());
                self.spawn_handler(
                    event.request_id.clone(),
                    handle_request(context, registration, event),
                );
            }
            NetworkEvent::ResponseReceived(event) => {
                self.spawn_handler(event.request_id.clone(), handle_response(context, event));
            }
            NetworkEvent::LoadingFailed(event) => {
                self.spawn_handler(event.request_id.clone(), handle_failure(context, event));
            }
        }
    }

    /// Decode and handle a raw `(method, params)` pair. Events the recorder
    /// does not understand are logged and skipped.
    pub fn dispatch_raw(&self, method: &str, params: Value) {
        match NetworkEvent::from_method(method, params) {
            Ok(event) => self.dispatch(event),
            Err(HarError::UnknownEvent(method)) => debug!("Ignoring event {}", method),
            Err(e) => warn!("Skipping event: {}", e),
        }
    }

    fn spawn_handler<F>(&self, id: TransactionId, handler: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let active = ActiveHandler::enter(&self.active_handlers);
        tokio::spawn(async move {
            let _active = active;
            if let Err(e) = handler.await {
                warn!("Dropping transaction {}: {}", id, e);
            }
        });
    }

    /// Wait until no handler task is running.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_for_idle(&self, timeout: Option<Duration>) -> bool {
        let start = tokio::time::Instant::now();

        loop {
            if self.active_handlers.load(Ordering::SeqCst) == 0 {
                return true;
            }

            if let Some(timeout_duration) = timeout {
                if start.elapsed() > timeout_duration {
                    return false;
                }
            }

            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    /// Dispatch every event of `events`, then close once the handlers settle.
    pub async fn run<S>(&self, events: S) -> Result<()>
    where
        S: Stream<Item = NetworkEvent>,
    {
        let mut events = std::pin::pin!(events);
        let mut dispatched = 0usize;

        while let Some(event) = events.next().await {
            self.dispatch(event);
            dispatched += 1;
        }

        info!("Event stream ended after {} event(s)", dispatched);
        let grace = self.config.correlation.race_timeout + BODY_FETCH_RETRY_DELAY * 4;
        if !self.wait_for_idle(Some(grace)).await {
            warn!("Closing with handlers still running");
        }
        self.close().await
    }

    /// Stop recording. The record stream ends, undelivered records are
    /// discarded and pending transactions are forgotten.
    pub async fn close(&self) -> Result<()> {
        if self.stop_flag.swap(true, Ordering::Relaxed) {
            return Ok(());
        }

        debug!("Closing network recorder");
        let sweeper = self.lock_sweeper().take();
        if let Some(handle) = sweeper {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    return Err(HarError::RecorderError(format!("Failed to stop sweeper: {}", e)));
                }
            }
        }

        self.context.sink.close();
        self.context.store.clear();
        info!("Network recorder closed");

        Ok(())
    }
}

impl Drop for NetworkRecorder {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.lock_sweeper().take() {
            handle.abort();
        }
    }
}

async fn handle_request(
    context: HandlerContext,
    registration: RequestRegistration,
    event: RequestWillBeSent,
) -> Result<()> {
    let urls = vec![event.request.url.clone()];
    let cookies = match context.session.fetch_cookies(&urls).await {
        Ok(cookies) => cookies,
        Err(e) => {
            warn!("Cookie lookup failed for {}, recording without cookies: {}", event.request_id, e);
            Vec::new()
        }
    };

    let record = RequestRecord::from_event(&event, &cookies);
    registration.record(&event, record);
    Ok(())
}

async fn handle_response(context: HandlerContext, event: ResponseReceived) -> Result<()> {
    let id = &event.request_id;

    if context.filter.should_ignore(&event.response) {
        debug!("Ignoring {} ({})", event.response.url, event.response.content_type().unwrap_or_default());
        context.store.wait_for_chain(id).await?;
        return Ok(());
    }

    let urls = vec![event.response.url.clone()];
    let (entry, body, cookies) = tokio::join!(
        context.store.wait_for_chain(id),
        fetch_body(context.session.as_ref(), id),
        context.session.fetch_cookies(&urls),
    );

    let entry = entry?;
    let body = body?;
    let cookies = cookies.map_err(|e| HarError::enrichment(id, e))?;

    if body.base64_encoded && context.filter.ignores_base64_bodies() {
        debug!("Ignoring {}, body is base64 encoded", event.response.url);
        return Ok(());
    }

    let records = build_completed(entry, &event.response, &body, &cookies);
    emit(&context, records)?;
    Ok(())
}

async fn handle_failure(context: HandlerContext, event: LoadingFailed) -> Result<()> {
    let entry = context.store.wait_for_chain(&event.request_id).await?;
    debug!(
        "Loading failed for {}: {}{}",
        event.request_id,
        event.error_text,
        if event.canceled { " (canceled)" } else { "" }
    );

    emit(&context, vec![build_failed(entry, &event)])?;
    Ok(())
}

async fn fetch_body(session: &dyn DevToolsSession, id: &TransactionId) -> Result<ResponseBody> {
    let mut attempt = 0;

    loop {
        match session.fetch_response_body(id).await {
            Ok(body) => return Ok(body),
            Err(e) if attempt < BODY_FETCH_RETRIES => {
                attempt += 1;
                debug!("Body of {} not available yet (attempt {}): {}", id, attempt, e);
                tokio::time::sleep(BODY_FETCH_RETRY_DELAY).await;
            }
            Err(e @ HarError::EnrichmentFetch { .. }) => return Err(e),
            Err(e) => return Err(HarError::enrichment(id, e)),
        }
    }
}

/// Submit `records` in order. Returns `false` when the sink signalled
/// backpressure for any of them.
fn emit(context: &HandlerContext, records: Vec<FinishedRecord>) -> Result<bool> {
    if context.sink.is_closed() {
        return Err(HarError::SinkClosed);
    }

    let mut accepted = true;
    for record in records {
        accepted &= context.sink.submit(record);
    }
    if !accepted {
        info!("Consumer is behind, {} record(s) queued", context.sink.buffered_len());
    }
    Ok(accepted)
}
