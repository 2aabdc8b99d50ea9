//! Flow-controlled delivery of finished records.
//!
//! The sink sits between the correlation engine, which produces records
//! whenever enrichment completes, and a consumer that pulls them at its own
//! pace. It is either **Draining** (the consumer asked for more) or
//! **Buffering** (the consumer has not asked yet, or has enough queued).
//!
//! Records submitted while buffering wait in a reservoir. When the consumer
//! asks for more, a drain task moves them across one per scheduling turn, so
//! delivery never runs inside the handler that produced the record. Delivery
//! order always equals submission order.

use crate::config::SinkConfig;
use crate::har::FinishedRecord;
use futures::stream::Stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// The consumer is ready; submissions are delivered straight away.
    Draining,
    /// The consumer is not ready; submissions are queued.
    Buffering,
}

#[derive(Debug)]
struct SinkInner {
    state: SinkState,
    /// Submitted but not yet delivered.
    reservoir: VecDeque<FinishedRecord>,
    /// Delivered but not yet pulled by the consumer.
    delivered: VecDeque<FinishedRecord>,
    drain_scheduled: bool,
    closed: bool,
}

/// Producer and consumer handle of one record stream. Clones share state.
#[derive(Debug, Clone)]
pub struct EmissionSink {
    inner: Arc<Mutex<SinkInner>>,
    available: Arc<Notify>,
    high_water_mark: usize,
}

impl EmissionSink {
    pub fn new(config: &SinkConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkInner {
                state: SinkState::Buffering,
                reservoir: VecDeque::new(),
                delivered: VecDeque::new(),
                drain_scheduled: false,
                closed: false,
            })),
            available: Arc::new(Notify::new()),
            high_water_mark: config.high_water_mark.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SinkState {
        self.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Records waiting for the consumer to become ready.
    pub fn buffered_len(&self) -> usize {
        self.lock().reservoir.len()
    }

    /// Hand a record to the consumer, or queue it.
    ///
    /// Returns `false` when the record was queued or the consumer has reached
    /// its high-water mark, signalling the producer to slow down.
    pub fn submit(&self, record: FinishedRecord) -> bool {
        let mut inner = self.lock();

        if inner.closed {
            debug!("Sink closed, dropping record for {}", record.request.url);
            return false;
        }

        if inner.state == SinkState::Draining && inner.reservoir.is_empty() {
            return self.deliver(&mut inner, record);
        }

        inner.reservoir.push_back(record);
        debug!("Queued record, {} waiting for the consumer", inner.reservoir.len());
        false
    }

    fn deliver(&self, inner: &mut SinkInner, record: FinishedRecord) -> bool {
        inner.delivered.push_back(record);
        self.available.notify_one();

        if inner.delivered.len() >= self.high_water_mark {
            if inner.state == SinkState::Draining {
                warn!("Backpressure: consumer has {} records queued", inner.delivered.len());
            }
            inner.state = SinkState::Buffering;
        }

        inner.state == SinkState::Draining
    }

    /// The consumer wants more: switch to draining and schedule delivery of
    /// anything queued.
    pub fn notify_consumer_ready(&self) {
        let schedule = {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.state = SinkState::Draining;

            let schedule = !inner.reservoir.is_empty() && !inner.drain_scheduled;
            if schedule {
                inner.drain_scheduled = true;
            }
            schedule
        };

        if schedule {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let sink = self.clone();
                    handle.spawn(async move { sink.drain().await });
                }
                Err(_) => {
                    warn!("No async runtime, draining sink inline");
                    while self.drain_one() {}
                }
            }
        }
    }

    pub fn notify_consumer_not_ready(&self) {
        let mut inner = self.lock();
        if !inner.closed {
            inner.state = SinkState::Buffering;
        }
    }

    async fn drain(&self) {
        loop {
            tokio::task::yield_now().await;
            if !self.drain_one() {
                return;
            }
        }
    }

    /// Move one queued record across. Returns whether draining should continue.
    fn drain_one(&self) -> bool {
        let mut inner = self.lock();

        if inner.closed || inner.state == SinkState::Buffering {
            inner.drain_scheduled = false;
            return false;
        }

        match inner.reservoir.pop_front() {
            Some(record) => {
                self.deliver(&mut inner, record);
                true
            }
            None => {
                inner.drain_scheduled = false;
                false
            }
        }
    }

    /// End the stream. Queued records that were never delivered are discarded;
    /// records already delivered can still be pulled.
    pub fn close(&self) {
        let discarded = {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.state = SinkState::Buffering;
            let discarded = inner.reservoir.len();
            inner.reservoir.clear();
            discarded
        };

        self.available.notify_one();
        info!("Sink closed, {} undelivered record(s) discarded", discarded);
    }

    /// Pull the next delivered record, signalling readiness while waiting.
    ///
    /// Returns `None` once the sink is closed and everything delivered has
    /// been pulled. Intended for a single consumer.
    pub async fn next_record(&self) -> Option<FinishedRecord> {
        loop {
            let (record, wants_more) = {
                let mut inner = self.lock();
                match inner.delivered.pop_front() {
                    Some(record) => {
                        let wants_more = !inner.closed
                            && inner.state == SinkState::Buffering
                            && inner.delivered.len() < self.high_water_mark;
                        (Some(record), wants_more)
                    }
                    None if inner.closed => return None,
                    None => (None, true),
                }
            };

            if wants_more {
                self.notify_consumer_ready();
            }
            if record.is_some() {
                return record;
            }

            self.available.notified().await;
        }
    }

    /// Consume the sink as a stream of records that ends when the sink closes.
    pub fn into_stream(self) -> impl Stream<Item = FinishedRecord> + Send + 'static {
        async_stream::stream! {
            while let Some(record) = self.next_record().await {
                yield record;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::har::{HarResponse, HarTimings, RequestRecord};
    use crate::protocol::{Headers, RequestData, RequestWillBeSent};
    use futures::StreamExt;
    use std::time::Duration;

    fn record(url: &str) -> FinishedRecord {
        let event = RequestWillBeSent {
            request_id: url.into(),
            request: RequestData {
                url: url.to_string(),
                method: "GET".to_string(),
                headers: Headers::new(),
                post_data: None,
                url_fragment: None,
            },
            timestamp: 0.0,
            wall_time: 0.0,
            redirect_response: None,
            resource_type: None,
        };

        FinishedRecord {
            transaction_id: url.into(),
            started_date_time: "1970-01-01T00:00:00.000Z".to_string(),
            time: 0.0,
            request: RequestRecord::from_event(&event, &[]),
            response: HarResponse::failed("test"),
            cache: serde_json::Map::new(),
            timings: HarTimings::default(),
            server_ip_address: None,
            connection: None,
        }
    }

    fn sink(high_water_mark: usize) -> EmissionSink {
        EmissionSink::new(&SinkConfig { high_water_mark })
    }

    async fn pull(sink: &EmissionSink) -> String {
        tokio::time::timeout(Duration::from_secs(1), sink.next_record())
            .await
            .expect("record within a second")
            .expect("sink still open")
            .request
            .url
    }

    #[test]
    fn test_starts_buffering() {
        let sink = sink(4);
        assert_eq!(sink.state(), SinkState::Buffering);

        assert!(!sink.submit(record("r1")));
        assert_eq!(sink.buffered_len(), 1);
    }

    #[tokio::test]
    async fn test_submit_while_draining_is_accepted() {
        let sink = sink(4);
        sink.notify_consumer_ready();

        assert!(sink.submit(record("r1")));
        assert_eq!(sink.buffered_len(), 0);
        assert_eq!(pull(&sink).await, "r1");
    }

    #[tokio::test]
    async fn test_ready_drains_in_fifo_order() {
        let sink = sink(8);
        for url in ["r1", "r2", "r3"] {
            assert!(!sink.submit(record(url)));
        }

        assert_eq!(pull(&sink).await, "r1");
        assert_eq!(pull(&sink).await, "r2");
        assert_eq!(pull(&sink).await, "r3");
        assert_eq!(sink.buffered_len(), 0);
    }

    #[tokio::test]
    async fn test_order_survives_toggling() {
        let sink = sink(8);

        sink.submit(record("r1"));
        sink.notify_consumer_ready();
        sink.submit(record("r2"));
        sink.notify_consumer_not_ready();
        sink.submit(record("r3"));
        sink.notify_consumer_ready();
        tokio::task::yield_now().await;
        sink.notify_consumer_not_ready();
        sink.submit(record("r4"));

        let mut urls = Vec::new();
        for _ in 0..4 {
            urls.push(pull(&sink).await);
        }
        assert_eq!(urls, vec!["r1", "r2", "r3", "r4"]);
    }

    #[tokio::test]
    async fn test_high_water_mark_flips_to_buffering() {
        let sink = sink(2);
        sink.notify_consumer_ready();

        assert!(sink.submit(record("r1")));
        assert!(!sink.submit(record("r2")));
        assert_eq!(sink.state(), SinkState::Buffering);

        assert!(!sink.submit(record("r3")));
        assert_eq!(sink.buffered_len(), 1);

        assert_eq!(pull(&sink).await, "r1");
        assert_eq!(pull(&sink).await, "r2");
        assert_eq!(pull(&sink).await, "r3");
    }

    #[tokio::test]
    async fn test_close_discards_undelivered() {
        let sink = sink(1);
        sink.notify_consumer_ready();
        sink.submit(record("delivered"));
        sink.submit(record("queued"));
        assert_eq!(sink.buffered_len(), 1);

        sink.close();

        assert!(sink.is_closed());
        assert_eq!(sink.buffered_len(), 0);
        assert!(!sink.submit(record("late")));
        assert_eq!(pull(&sink).await, "delivered");
        assert!(sink.next_record().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_ends_on_close() {
        let sink = sink(4);
        let producer = sink.clone();

        let consumer = tokio::spawn(async move {
            sink.into_stream().map(|r| r.request.url).collect::<Vec<_>>().await
        });

        for url in ["r1", "r2", "r3"] {
            producer.submit(record(url));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        producer.close();

        let urls = consumer.await.unwrap();
        assert_eq!(urls, vec!["r1", "r2", "r3"]);
    }

    #[test]
    fn test_ready_without_runtime_drains_inline() {
        let sink = sink(8);
        sink.submit(record("r1"));
        sink.submit(record("r2"));

        sink.notify_consumer_ready();

        assert_eq!(sink.buffered_len(), 0);
        assert_eq!(sink.state(), SinkState::Draining);
    }
}
