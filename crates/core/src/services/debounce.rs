//! Per-actor event coalescing.
//!
//! Bursts of events from one actor collapse into a single emission fired a
//! fixed quiet period after the last event of the burst. Each entry owns a
//! timer task; a new event aborts the old timer and starts a fresh one. A
//! generation number guards against a timer that woke just before it was
//! replaced.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One incoming event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceEvent {
    pub actor_username: String,
    pub avatar_url: Option<String>,
    /// Day the event belongs to, e.g. `2026-01-02`.
    pub date_key: String,
}

/// The emission for a finished burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedEvent {
    pub actor_id: String,
    pub actor_username: String,
    pub avatar_url: Option<String>,
    pub date_key: String,
    /// Number of events in the burst.
    pub count: u32,
}

/// Receives finished bursts.
#[async_trait]
pub trait CoalescedEmitter: Send + Sync {
    async fn emit(&self, event: CoalescedEvent);
}

struct PendingEntry {
    event: DebounceEvent,
    count: u32,
    generation: u64,
    timer: JoinHandle<()>,
}

struct Inner {
    pending: Mutex<HashMap<String, PendingEntry>>,
    window: Duration,
    emitter: Arc<dyn CoalescedEmitter>,
    shutdown: CancellationToken,
    generation: AtomicU64,
}

/// Debounces events per actor.
#[derive(Clone)]
pub struct DebounceCoalescer {
    inner: Arc<Inner>,
}

impl DebounceCoalescer {
    /// Create a coalescer that emits `window` after the last event of a burst.
    ///
    /// Timers stop when `shutdown` is cancelled.
    #[must_use]
    pub fn new(
        window: Duration,
        emitter: Arc<dyn CoalescedEmitter>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
                window,
                emitter,
                shutdown,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Record an event and restart the actor's timer.
    ///
    /// Returns the size of the burst so far, or 0 if the coalescer is shut down.
    pub async fn register(&self, actor_id: &str, event: DebounceEvent) -> u32 {
        let mut pending = self.inner.pending.lock().await;
        if self.inner.shutdown.is_cancelled() {
            debug!(actor_id = %actor_id, "Coalescer is shut down, dropping event");
            return 0;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let timer = Inner::spawn_timer(&self.inner, actor_id.to_string(), generation);

        if let Some(entry) = pending.get_mut(actor_id) {
            entry.timer.abort();
            entry.timer = timer;
            entry.generation = generation;
            entry.count = entry.count.saturating_add(1);
            entry.event = event;
            entry.count
        } else {
            pending.insert(
                actor_id.to_string(),
                PendingEntry {
                    event,
                    count: 1,
                    generation,
                    timer,
                },
            );
            1
        }
    }

    /// Number of actors with an open burst.
    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Stop all timers and discard open bursts.
    ///
    /// Returns the number of bursts discarded.
    pub async fn shutdown(&self) -> usize {
        self.inner.shutdown.cancel();

        let mut pending = self.inner.pending.lock().await;
        let discarded = pending.len();
        for (_, entry) in pending.drain() {
            entry.timer.abort();
        }

        info!(discarded, "Coalescer stopped");
        discarded
    }
}

impl Inner {
    fn spawn_timer(inner: &Arc<Self>, actor_id: String, generation: u64) -> JoinHandle<()> {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            tokio::select! {
                () = inner.shutdown.cancelled() => {}
                () = tokio::time::sleep(inner.window) => inner.fire(&actor_id, generation).await,
            }
        })
    }

    async fn fire(&self, actor_id: &str, generation: u64) {
        let entry = {
            let mut pending = self.pending.lock().await;
            match pending.get(actor_id) {
                Some(entry) if entry.generation == generation => pending.remove(actor_id),
                _ => None,
            }
        };

        // Dropping our own handle detaches rather than aborts.
        let Some(entry) = entry else {
            return;
        };

        debug!(actor_id = %actor_id, count = entry.count, "Emitting coalesced event");
        self.emitter
            .emit(CoalescedEvent {
                actor_id: actor_id.to_string(),
                actor_username: entry.event.actor_username,
                avatar_url: entry.event.avatar_url,
                date_key: entry.event.date_key,
                count: entry.count,
            })
            .await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingEmitter {
        events: Mutex<Vec<(CoalescedEvent, Instant)>>,
    }

    #[async_trait]
    impl CoalescedEmitter for RecordingEmitter {
        async fn emit(&self, event: CoalescedEvent) {
            self.events.lock().await.push((event, Instant::now()));
        }
    }

    fn event(date_key: &str) -> DebounceEvent {
        DebounceEvent {
            actor_username: "alice".to_string(),
            avatar_url: None,
            date_key: date_key.to_string(),
        }
    }

    const WINDOW: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn test_burst_emits_once_after_last_event() {
        let emitter = Arc::new(RecordingEmitter::default());
        let coalescer = DebounceCoalescer::new(WINDOW, emitter.clone(), CancellationToken::new());

        let mut last = Instant::now();
        for i in 1..=4 {
            assert_eq!(coalescer.register("a", event("2026-01-02")).await, i);
            last = Instant::now();
            tokio::time::sleep(Duration::from_secs(10)).await;
        }

        tokio::time::sleep(WINDOW).await;

        let events = emitter.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0.count, 4);
        assert_eq!(events[0].1 - last, WINDOW);
        assert_eq!(coalescer.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_actors_are_independent() {
        let emitter = Arc::new(RecordingEmitter::default());
        let coalescer = DebounceCoalescer::new(WINDOW, emitter.clone(), CancellationToken::new());

        coalescer.register("a", event("d1")).await;
        coalescer.register("b", event("d1")).await;
        coalescer.register("a", event("d2")).await;

        tokio::time::sleep(WINDOW + Duration::from_secs(1)).await;

        let mut events: Vec<_> = emitter
            .events
            .lock()
            .await
            .iter()
            .map(|(e, _)| (e.actor_id.clone(), e.count, e.date_key.clone()))
            .collect();
        events.sort();
        assert_eq!(
            events,
            vec![
                ("a".to_string(), 2, "d2".to_string()),
                ("b".to_string(), 1, "d1".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_open_bursts() {
        let emitter = Arc::new(RecordingEmitter::default());
        let coalescer = DebounceCoalescer::new(WINDOW, emitter.clone(), CancellationToken::new());

        coalescer.register("a", event("d1")).await;
        assert_eq!(coalescer.shutdown().await, 1);
        assert_eq!(coalescer.register("a", event("d1")).await, 0);

        tokio::time::sleep(WINDOW * 2).await;
        assert!(emitter.events.lock().await.is_empty());
    }
}
