use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_channel::{Receiver, Sender, TryRecvError, TrySendError};
use bevy::prelude::*;
use dashmap::DashMap;

use flowdeck_common::{Position, WatchClosed, WatchEvent};

use crate::store::PositionStore;

/// Identifier for one open watch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

/// Tuning for watch delivery.
#[derive(Resource, Clone)]
pub struct WatchSettings {
    /// Capacity of each subscriber's mailbox.
    pub mailbox_capacity: usize,

    /// Consecutive failed flushes tolerated before a subscriber is
    /// disconnected with [`WatchClosed::Overrun`]. A slow consumer only
    /// ever loses intermediate states up to that point (final-state-wins
    /// coalescing); past it, the stream is ended rather than allowed to
    /// accumulate without bound.
    pub overrun_limit: u32,

    /// Maximum delivery rate; `None` (the default) flushes every frame.
    /// When set, intermediate states within one interval are coalesced.
    pub flush_rate_hz: Option<f32>,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 32,
            overrun_limit: 8,
            flush_rate_hz: None,
        }
    }
}

type CloseReasons = Arc<DashMap<SubscriberId, WatchClosed>>;

/// Broker-side state of one subscriber.
struct WatchSubscriber {
    id: SubscriberId,
    /// Last delivered wire value per position name.
    known: HashMap<String, Position>,
    /// Names touched since the last successful flush. Multiple mutations of
    /// one name coalesce here; the flush reads the then-current store.
    dirty: BTreeSet<String>,
    mailbox: Sender<WatchEvent>,
    missed_flushes: u32,
}

/// Registry of active watch subscribers and their delivery cursors.
#[derive(Resource)]
pub(crate) struct WatchRegistry {
    subscribers: Vec<WatchSubscriber>,
    next_id: u64,
    close_reasons: CloseReasons,
    unsubscribe_tx: Sender<SubscriberId>,
    unsubscribe_rx: Receiver<SubscriberId>,
    flush_timer: Option<Timer>,
}

impl WatchRegistry {
    pub(crate) fn new(flush_rate_hz: Option<f32>) -> Self {
        let (unsubscribe_tx, unsubscribe_rx) = async_channel::unbounded();
        Self {
            subscribers: Vec::new(),
            next_id: 0,
            close_reasons: Arc::new(DashMap::new()),
            unsubscribe_tx,
            unsubscribe_rx,
            flush_timer: flush_rate_hz.map(|hz| {
                Timer::new(
                    std::time::Duration::from_secs_f32(1.0 / hz),
                    TimerMode::Repeating,
                )
            }),
        }
    }

    /// Register a new subscriber.
    ///
    /// Its cursor starts empty with every current position marked dirty, so
    /// the first flushed message carries the full snapshot as additions,
    /// the same view the non-streaming snapshot call would have returned.
    pub(crate) fn subscribe(
        &mut self,
        store: &PositionStore,
        mailbox_capacity: usize,
    ) -> WatchStream {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;

        let (mailbox, receiver) = async_channel::bounded(mailbox_capacity.max(1));
        let dirty: BTreeSet<String> = store.names().map(str::to_string).collect();

        info!(
            "[flowdeck] New watch subscriber {id} ({} positions in scope)",
            dirty.len()
        );

        self.subscribers.push(WatchSubscriber {
            id,
            known: HashMap::new(),
            dirty,
            mailbox,
            missed_flushes: 0,
        });

        WatchStream {
            id,
            receiver,
            close_reasons: self.close_reasons.clone(),
            unsubscribe: self.unsubscribe_tx.clone(),
        }
    }

    /// Mark one position dirty on every subscriber.
    fn mark_dirty(&mut self, name: &str) {
        for subscriber in &mut self.subscribers {
            subscriber.dirty.insert(name.to_string());
        }
    }

    /// Disconnect a subscriber, recording why before the channel closes.
    fn close(&mut self, id: SubscriberId, reason: WatchClosed) {
        self.close_reasons.insert(id, reason);
        self.subscribers.retain(|subscriber| subscriber.id != id);
    }

    /// Disconnect everyone (clean shutdown).
    pub(crate) fn close_all(&mut self, reason: WatchClosed) {
        for subscriber in &self.subscribers {
            self.close_reasons.insert(subscriber.id, reason);
        }
        self.subscribers.clear();
    }
}

/// The consumer half of one watch call.
///
/// Dropping the stream deregisters its subscriber promptly; once the
/// stream ends, [`recv`](Self::recv) reports whether it was an overrun
/// disconnect or a clean shutdown.
pub struct WatchStream {
    id: SubscriberId,
    receiver: Receiver<WatchEvent>,
    close_reasons: CloseReasons,
    unsubscribe: Sender<SubscriberId>,
}

impl WatchStream {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next diff message.
    pub async fn recv(&self) -> Result<WatchEvent, WatchClosed> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(_) => Err(self.close_reason()),
        }
    }

    /// Non-blocking receive; `Ok(None)` means no message is queued yet.
    pub fn try_recv(&self) -> Result<Option<WatchEvent>, WatchClosed> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err(self.close_reason()),
        }
    }

    fn close_reason(&self) -> WatchClosed {
        self.close_reasons
            .get(&self.id)
            .map(|entry| *entry.value())
            .unwrap_or(WatchClosed::Shutdown)
    }
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        let _ = self.unsubscribe.try_send(self.id);
    }
}

/// Remove subscribers whose streams were dropped by their consumers.
pub(crate) fn process_unsubscribes(mut registry: ResMut<WatchRegistry>) {
    while let Ok(id) = registry.unsubscribe_rx.try_recv() {
        let before = registry.subscribers.len();
        registry.subscribers.retain(|subscriber| subscriber.id != id);
        if registry.subscribers.len() != before {
            info!("[flowdeck] Watch subscriber {id} cancelled");
        }
    }
}

/// Drain the store's mutation journal and mark the touched names dirty on
/// every subscriber.
///
/// Runs after all mutation systems in the same frame, so a flushed diff is
/// always consistent with what `snapshot()` returned this frame.
pub(crate) fn track_store_updates(
    mut store: ResMut<PositionStore>,
    mut registry: ResMut<WatchRegistry>,
) {
    for update in store.drain_journal() {
        registry.mark_dirty(update.position_name());
    }
}

/// Build and deliver one diff message per subscriber with pending changes.
///
/// Dirty names are partitioned against the subscriber's cursor: unknown and
/// present in the store -> addition; known and present with a different
/// value -> change; known and gone -> removal; never-known and gone ->
/// omitted entirely (the position came and went before this subscriber ever
/// saw it). A name therefore lands in at most one list, and always in
/// `additions` first.
pub(crate) fn flush_watch_queues(
    store: Res<PositionStore>,
    mut registry: ResMut<WatchRegistry>,
    settings: Res<WatchSettings>,
    time: Res<Time>,
) {
    let WatchRegistry {
        subscribers,
        flush_timer,
        ..
    } = &mut *registry;

    if let Some(timer) = flush_timer {
        timer.tick(time.delta());
        if !timer.just_finished() {
            return;
        }
    }

    let mut dropped: Vec<(SubscriberId, Option<WatchClosed>)> = Vec::new();

    for subscriber in subscribers.iter_mut() {
        if subscriber.dirty.is_empty() {
            continue;
        }

        let mut event = WatchEvent::default();
        // Cursor updates to commit only once the message is actually queued.
        let mut applied: Vec<(String, Option<Position>)> = Vec::new();

        for name in &subscriber.dirty {
            match store.position(name) {
                Some(current) => match subscriber.known.get(name) {
                    None => {
                        event.additions.push(current.clone());
                        applied.push((name.clone(), Some(current.clone())));
                    }
                    Some(previous) if previous != current => {
                        event.changes.push(current.clone());
                        applied.push((name.clone(), Some(current.clone())));
                    }
                    Some(_) => {
                        // Touched but identical to what was delivered; nothing
                        // observable happened.
                    }
                },
                None => {
                    if subscriber.known.contains_key(name) {
                        event.removals.push(name.clone());
                        applied.push((name.clone(), None));
                    }
                }
            }
        }

        if event.is_empty() {
            subscriber.dirty.clear();
            subscriber.missed_flushes = 0;
            continue;
        }

        match subscriber.mailbox.try_send(event) {
            Ok(()) => {
                for (name, value) in applied {
                    match value {
                        Some(position) => {
                            subscriber.known.insert(name, position);
                        }
                        None => {
                            subscriber.known.remove(&name);
                        }
                    }
                }
                subscriber.dirty.clear();
                subscriber.missed_flushes = 0;
            }
            Err(TrySendError::Full(_)) => {
                // Names stay dirty; the next attempt recomputes against the
                // then-current store, so intermediate states coalesce.
                subscriber.missed_flushes += 1;
                if subscriber.missed_flushes > settings.overrun_limit {
                    dropped.push((subscriber.id, Some(WatchClosed::Overrun)));
                }
            }
            Err(TrySendError::Closed(_)) => {
                dropped.push((subscriber.id, None));
            }
        }
    }

    for (id, reason) in dropped {
        match reason {
            Some(reason) => {
                warn!("[flowdeck] Disconnecting watch subscriber {id}: {reason}");
                registry.close(id, reason);
            }
            None => {
                registry
                    .subscribers
                    .retain(|subscriber| subscriber.id != id);
            }
        }
    }
}
