//! Per-transaction correlation of request hops.
//!
//! The store holds, for every transaction that has started but not yet
//! completed, the chain of request hops observed so far. A response or
//! failure consumes the whole chain at once.
//!
//! Request hops are registered in two steps because recording a hop first
//! needs an asynchronous cookie lookup:
//!
//! 1. [`CorrelationStore::begin_request`] runs as soon as the event arrives and
//!    marks the transaction as having a hop in flight.
//! 2. [`RequestRegistration::record`] stores the finished hop once the cookies
//!    are known.
//!
//! A response or failure that shows up in between, or before the request
//! event at all, parks on a one-shot waiter keyed by the transaction id
//! instead of polling. Recording the last in-flight hop fires every waiter
//! for that id exactly once; waiters that lose the race to take the chain
//! wait again until their deadline.

use crate::config::CorrelationConfig;
use crate::error::{HarError, Result};
use crate::har::RequestRecord;
use crate::protocol::{RequestWillBeSent, ResponseMetadata, TransactionId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// The resolved chain of one transaction, handed out by [`CorrelationStore::take_chain`].
///
/// A chain always holds at least one hop.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub transaction_id: TransactionId,
    /// Wall clock time of the first hop, seconds since the epoch.
    pub wall_time: f64,
    first: RequestRecord,
    rest: Vec<RequestRecord>,
}

impl PendingEntry {
    pub fn new(transaction_id: TransactionId, wall_time: f64, first: RequestRecord) -> Self {
        Self {
            transaction_id,
            wall_time,
            first,
            rest: Vec::new(),
        }
    }

    pub fn push(&mut self, hop: RequestRecord) {
        self.rest.push(hop);
    }

    pub fn len(&self) -> usize {
        1 + self.rest.len()
    }

    pub fn first(&self) -> &RequestRecord {
        &self.first
    }

    pub fn chain(&self) -> impl Iterator<Item = &RequestRecord> {
        std::iter::once(&self.first).chain(self.rest.iter())
    }

    pub fn into_first(self) -> RequestRecord {
        self.first
    }

    pub fn into_chain(self) -> Vec<RequestRecord> {
        let mut chain = Vec::with_capacity(self.len());
        chain.push(self.first);
        chain.extend(self.rest);
        chain
    }
}

/// One recorded hop together with the ordering data needed to thread redirects.
#[derive(Debug)]
struct ChainLink {
    record: RequestRecord,
    timestamp: f64,
    wall_time: f64,
    /// Response that redirected the previous hop to this one.
    redirected_from: Option<ResponseMetadata>,
}

#[derive(Debug)]
struct Slot {
    created_at: Instant,
    /// Ordered by monotonic timestamp; never empty.
    links: Vec<ChainLink>,
}

impl Slot {
    fn insert(&mut self, link: ChainLink) {
        let position = self
            .links
            .iter()
            .position(|existing| existing.timestamp > link.timestamp)
            .unwrap_or(self.links.len());
        self.links.insert(position, link);
    }

    /// Hand each hop the redirect response carried by the hop that followed it.
    fn into_entry(self, transaction_id: TransactionId) -> Option<PendingEntry> {
        let mut snapshots: Vec<Option<ResponseMetadata>> = self
            .links
            .iter()
            .skip(1)
            .map(|next| next.redirected_from.clone())
            .collect();
        snapshots.push(None);

        let mut hops = self.links.into_iter().zip(snapshots).map(|(link, snapshot)| {
            let mut record = link.record;
            record.redirect_response = snapshot;
            (record, link.wall_time)
        });

        let (first, wall_time) = hops.next()?;
        let mut entry = PendingEntry::new(transaction_id, wall_time, first);
        for (hop, _) in hops {
            entry.push(hop);
        }
        Some(entry)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    slots: HashMap<TransactionId, Slot>,
    in_flight: HashMap<TransactionId, usize>,
    waiters: HashMap<TransactionId, Vec<oneshot::Sender<()>>>,
}

impl StoreState {
    fn is_ready(&self, id: &TransactionId) -> bool {
        self.slots.contains_key(id) && !self.in_flight.contains_key(id)
    }

    fn wake(&mut self, id: &TransactionId) {
        if !self.is_ready(id) {
            return;
        }
        if let Some(waiters) = self.waiters.remove(id) {
            debug!("Waking {} waiter(s) for {}", waiters.len(), id);
            for waiter in waiters {
                // the receiver may have timed out already
                let _ = waiter.send(());
            }
        }
    }

    fn settle(&mut self, id: &TransactionId) {
        if let Some(count) = self.in_flight.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                self.in_flight.remove(id);
            }
        }
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .slots
            .iter()
            .min_by_key(|(_, slot)| slot.created_at)
            .map(|(id, _)| id.clone());

        if let Some(id) = oldest {
            warn!("Correlation store full, evicting {}", id);
            self.slots.remove(&id);
        }
    }
}

/// Correlation state shared by all event handlers of one recorder.
#[derive(Debug)]
pub struct CorrelationStore {
    state: Mutex<StoreState>,
    config: CorrelationConfig,
}

impl CorrelationStore {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Mark a hop of `id` as in flight. Must be called in event arrival order.
    ///
    /// Dropping the returned registration without recording releases the mark.
    pub fn begin_request(self: &Arc<Self>, id: TransactionId) -> RequestRegistration {
        *self.lock().in_flight.entry(id.clone()).or_insert(0) += 1;
        RequestRegistration {
            store: Arc::clone(self),
            id,
            active: true,
        }
    }

    /// Append a hop to the chain of `event.request_id`, creating the chain on
    /// first occurrence.
    pub fn record_request(&self, event: &RequestWillBeSent, record: RequestRecord) {
        let mut state = self.lock();
        self.insert(&mut state, event, record);
        state.wake(&event.request_id);
    }

    fn insert(&self, state: &mut StoreState, event: &RequestWillBeSent, record: RequestRecord) {
        let id = &event.request_id;
        let link = ChainLink {
            record,
            timestamp: event.timestamp,
            wall_time: event.wall_time,
            redirected_from: event.redirect_response.clone(),
        };

        if let Some(slot) = state.slots.get_mut(id) {
            slot.insert(link);
            debug!("Recorded hop {} of {}", slot.links.len(), id);
            return;
        }

        if state.slots.len() >= self.config.max_pending {
            state.evict_oldest();
        }
        state.slots.insert(
            id.clone(),
            Slot {
                created_at: Instant::now(),
                links: vec![link],
            },
        );
        debug!("Recorded first hop of {}", id);
    }

    /// Atomically remove and return the chain of `id`.
    ///
    /// Returns `None` when no hop has been recorded yet or a hop is still in flight.
    pub fn take_chain(&self, id: &TransactionId) -> Option<PendingEntry> {
        let mut state = self.lock();
        Self::take_ready(&mut state, id)
    }

    fn take_ready(state: &mut StoreState, id: &TransactionId) -> Option<PendingEntry> {
        if !state.is_ready(id) {
            return None;
        }
        state.slots.remove(id)?.into_entry(id.clone())
    }

    /// Take the chain of `id`, waiting for its request to register if needed.
    ///
    /// Gives up with [`HarError::CorrelationTimeout`] once the configured race
    /// timeout elapses or the store is cleared.
    pub async fn wait_for_chain(&self, id: &TransactionId) -> Result<PendingEntry> {
        let deadline = Instant::now() + self.config.race_timeout;

        loop {
            let waiter = {
                let mut state = self.lock();
                if let Some(entry) = Self::take_ready(&mut state, id) {
                    return Ok(entry);
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.entry(id.clone()).or_default().push(tx);
                rx
            };

            debug!("Waiting for request of {} to register", id);
            let woken = tokio::time::timeout_at(deadline, waiter).await;
            match woken {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => {
                    self.prune_waiters(id);
                    return Err(HarError::CorrelationTimeout(id.clone()));
                }
            }
        }
    }

    fn prune_waiters(&self, id: &TransactionId) {
        let mut state = self.lock();
        if let Some(waiters) = state.waiters.get_mut(id) {
            waiters.retain(|waiter| !waiter.is_closed());
            if waiters.is_empty() {
                state.waiters.remove(id);
            }
        }
    }

    /// Drop chains older than the configured maximum age and forget waiters
    /// that already gave up. Returns the number of chains evicted.
    pub fn evict_expired(&self) -> usize {
        let max_age = self.config.max_age;
        let mut state = self.lock();

        let before = state.slots.len();
        state.slots.retain(|id, slot| {
            let keep = slot.created_at.elapsed() < max_age;
            if !keep {
                warn!("Evicting {} after {:?} without a response", id, max_age);
            }
            keep
        });
        state.waiters.retain(|_, waiters| {
            waiters.retain(|waiter| !waiter.is_closed());
            !waiters.is_empty()
        });

        before - state.slots.len()
    }

    /// Forget everything. Pending waiters fail with a timeout.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.slots.clear();
        state.in_flight.clear();
        state.waiters.clear();
    }

    /// Number of transactions with at least one recorded hop.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().slots.is_empty()
    }

    pub fn waiter_count(&self) -> usize {
        self.lock().waiters.values().map(Vec::len).sum()
    }
}

/// A hop of one transaction that has been announced but not yet recorded.
#[derive(Debug)]
pub struct RequestRegistration {
    store: Arc<CorrelationStore>,
    id: TransactionId,
    active: bool,
}

impl RequestRegistration {
    pub fn transaction_id(&self) -> &TransactionId {
        &self.id
    }

    /// Record the hop and release the in-flight mark in one step.
    pub fn record(mut self, event: &RequestWillBeSent, record: RequestRecord) {
        self.active = false;
        let mut state = self.store.lock();
        state.settle(&self.id);
        self.store.insert(&mut state, event, record);
        state.wake(&self.id);
    }
}

impl Drop for RequestRegistration {
    fn drop(&mut self) {
        if self.active {
            debug!("Abandoned request registration for {}", self.id);
            let mut state = self.store.lock();
            state.settle(&self.id);
            state.wake(&self.id);
        }
    }
}
