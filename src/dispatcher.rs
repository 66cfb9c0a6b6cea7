use crate::content::ContentDescriptor;
use crate::db::{QueueEntry, QueueKind};
use crate::overlay::{guild_topic, Publisher, NEW_MESSAGE_EVENT};
use crate::services::queue::{BusyState, QueueStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_DEFER_BACKOFF: Duration = Duration::from_millis(250);
pub const DEFAULT_SAFETY_PAD: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTiming {
    /// Pause between two ticks, whatever the previous tick did.
    pub tick_interval: Duration,
    /// How far a busy guild's entry is pushed back before it is re-checked.
    pub defer_backoff: Duration,
    /// Added to every busy window so the next entry never cuts the tail of
    /// the current one.
    pub safety_pad: Duration,
}

impl Default for DispatchTiming {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            defer_backoff: DEFAULT_DEFER_BACKOFF,
            safety_pad: DEFAULT_SAFETY_PAD,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing due.
    Idle,
    /// The guild was busy; the entry becomes eligible again at `until`.
    Deferred {
        entry_id: i64,
        guild_id: String,
        until: DateTime<Utc>,
    },
    Dispatched {
        entry_id: i64,
        guild_id: String,
        busy_until: DateTime<Utc>,
        /// Effective duration of what is now on screen. Informational only.
        next_hint: Duration,
    },
    /// Unreadable payload or unusable duration, removed without touching
    /// the guild.
    Dropped { entry_id: i64, guild_id: String },
}

/// What overlay clients receive for a `new-message` event.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayEvent<'a> {
    pub id: i64,
    pub guild_id: &'a str,
    #[serde(rename = "type")]
    pub kind: QueueKind,
    pub duration: i64,
    pub content: &'a ContentDescriptor,
}

/// The single loop that moves entries from the queue to the overlays.
///
/// It keeps no state between ticks: every tick starts from the store, so a
/// restarted process resumes where the previous one stopped. Only one
/// dispatcher may run against a given store.
pub struct QueueDispatcher {
    queue: Arc<dyn QueueStore>,
    guilds: Arc<dyn BusyState>,
    publisher: Arc<dyn Publisher>,
    timing: DispatchTiming,
}

impl QueueDispatcher {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        guilds: Arc<dyn BusyState>,
        publisher: Arc<dyn Publisher>,
        timing: DispatchTiming,
    ) -> Self {
        Self {
            queue,
            guilds,
            publisher,
            timing,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Queue dispatcher started (tick {:?}, backoff {:?}, pad {:?})",
            self.timing.tick_interval, self.timing.defer_backoff, self.timing.safety_pad
        );
        loop {
            match self.tick(Utc::now()).await {
                Ok(TickOutcome::Idle) => {}
                Ok(outcome) => debug!("Queue tick: {:?}", outcome),
                Err(e) => error!("Queue dispatch tick failed: {:#}", e),
            }

            tokio::select! {
                _ = sleep(self.timing.tick_interval) => {}
                _ = cancel.cancelled() => {
                    info!("Queue dispatcher shutting down");
                    break;
                }
            }
        }
    }

    /// Handles at most one entry, the earliest eligible one across all guilds.
    pub async fn tick(&self, now: DateTime<Utc>) -> anyhow::Result<TickOutcome> {
        let Some(entry) = self.queue.earliest_eligible(now).await? else {
            return Ok(TickOutcome::Idle);
        };

        if self.guilds.is_busy(&entry.guild_id, now).await? {
            let until = now + chrono_duration(self.timing.defer_backoff);
            self.queue.reschedule(entry.id, until).await?;
            return Ok(TickOutcome::Deferred {
                entry_id: entry.id,
                guild_id: entry.guild_id,
                until,
            });
        }

        let content = match ContentDescriptor::from_json(&entry.content) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    "Dropping queue entry {} for guild {}: {}",
                    entry.id, entry.guild_id, e
                );
                self.queue.remove(entry.id).await?;
                return Ok(TickOutcome::Dropped {
                    entry_id: entry.id,
                    guild_id: entry.guild_id,
                });
            }
        };

        let Some(busy_until) = self.busy_until(now, &entry) else {
            warn!(
                "Dropping queue entry {} for guild {}: duration {}s is out of range",
                entry.id, entry.guild_id, entry.duration
            );
            self.queue.remove(entry.id).await?;
            return Ok(TickOutcome::Dropped {
                entry_id: entry.id,
                guild_id: entry.guild_id,
            });
        };
        self.guilds.mark_busy(&entry.guild_id, busy_until).await?;

        let topic = guild_topic(&entry.guild_id);
        let payload = serde_json::to_value(DisplayEvent {
            id: entry.id,
            guild_id: &entry.guild_id,
            kind: entry.kind,
            duration: entry.duration,
            content: &content,
        })?;
        self.publisher.publish(&topic, NEW_MESSAGE_EVENT, payload);
        info!(
            "Sent {} entry {} to room \"{}\" ({}s)",
            entry.kind, entry.id, topic, entry.duration
        );

        self.queue.remove(entry.id).await?;

        Ok(TickOutcome::Dispatched {
            entry_id: entry.id,
            guild_id: entry.guild_id,
            busy_until,
            next_hint: Duration::from_secs(entry.duration.max(0) as u64),
        })
    }

    /// Zero or negative durations still hold the guild for the safety pad.
    /// `None` when the window does not fit in a timestamp.
    fn busy_until(&self, now: DateTime<Utc>, entry: &QueueEntry) -> Option<DateTime<Utc>> {
        let display = chrono::Duration::try_seconds(entry.duration.max(0))?;
        now.checked_add_signed(display)?
            .checked_add_signed(chrono_duration(self.timing.safety_pad))
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewQueueEntry};
    use crate::duration::DurationPolicy;
    use crate::overlay::OverlayEvent;
    use crate::services::queue::QueueService;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::Value;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<OverlayEvent>>,
    }

    impl RecordingPublisher {
        fn events(&self) -> Vec<OverlayEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, topic: &str, event: &str, payload: Value) {
            self.events.lock().unwrap().push(OverlayEvent {
                topic: topic.to_string(),
                event: event.to_string(),
                payload,
            });
        }
    }

    struct UnavailableStore;

    #[async_trait]
    impl QueueStore for UnavailableStore {
        async fn enqueue(&self, _entry: NewQueueEntry) -> anyhow::Result<QueueEntry> {
            anyhow::bail!("database is locked")
        }
        async fn earliest_eligible(&self, _now: DateTime<Utc>) -> anyhow::Result<Option<QueueEntry>> {
            anyhow::bail!("database is locked")
        }
        async fn reschedule(&self, _id: i64, _at: DateTime<Utc>) -> anyhow::Result<()> {
            anyhow::bail!("database is locked")
        }
        async fn remove(&self, _id: i64) -> anyhow::Result<bool> {
            anyhow::bail!("database is locked")
        }
    }

    struct Harness {
        service: QueueService,
        publisher: Arc<RecordingPublisher>,
        dispatcher: QueueDispatcher,
    }

    fn harness() -> Harness {
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        let service = QueueService::new(db, DurationPolicy::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = QueueDispatcher::new(
            Arc::new(service.clone()),
            Arc::new(service.clone()),
            publisher.clone(),
            DispatchTiming::default(),
        );
        Harness {
            service,
            publisher,
            dispatcher,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap()
    }

    fn ms(n: i64) -> chrono::Duration {
        chrono::Duration::milliseconds(n)
    }

    async fn enqueue(service: &QueueService, guild: &str, duration: i64, at: DateTime<Utc>) -> i64 {
        let content = ContentDescriptor::default()
            .with_text(Some(format!("for {}", guild)))
            .to_json()
            .unwrap();
        service
            .enqueue(NewQueueEntry::new(QueueKind::Message, guild, content, duration).scheduled_at(at))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_idle_tick() {
        let h = harness();
        assert_eq!(h.dispatcher.tick(t0()).await.unwrap(), TickOutcome::Idle);
        assert!(h.publisher.events().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_to_unknown_guild() {
        let h = harness();
        let e1 = enqueue(&h.service, "g1", 5, t0()).await;

        let outcome = h.dispatcher.tick(t0()).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Dispatched {
                entry_id: e1,
                guild_id: "g1".to_string(),
                busy_until: t0() + ms(5250),
                next_hint: Duration::from_secs(5),
            }
        );

        let events = h.publisher.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic, "messages-g1");
        assert_eq!(events[0].event, NEW_MESSAGE_EVENT);
        assert_eq!(events[0].payload["id"], e1);
        assert_eq!(events[0].payload["type"], "message");
        assert_eq!(events[0].payload["content"]["text"], "for g1");

        let guild = h.service.guild_settings("g1").await.unwrap();
        assert_eq!(guild.busy_until, Some(t0() + ms(5250)));

        // Removed: never offered again, and a second removal is harmless.
        assert_eq!(h.dispatcher.tick(t0() + ms(10_000)).await.unwrap(), TickOutcome::Idle);
        assert!(!h.service.remove(e1).await.unwrap());
    }

    #[tokio::test]
    async fn test_busy_guild_defers_with_short_backoff() {
        let h = harness();
        h.service.mark_busy("g1", t0() + ms(5000)).await.unwrap();
        let e2 = enqueue(&h.service, "g1", 5, t0() + ms(1000)).await;

        let outcome = h.dispatcher.tick(t0() + ms(1000)).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Deferred {
                entry_id: e2,
                guild_id: "g1".to_string(),
                until: t0() + ms(1250),
            }
        );
        assert!(h.publisher.events().is_empty());

        // Not eligible again until the backoff elapses.
        assert_eq!(h.dispatcher.tick(t0() + ms(1100)).await.unwrap(), TickOutcome::Idle);

        // Still busy at 1.25s: pushed back by the same short backoff, not to the end of the window.
        match h.dispatcher.tick(t0() + ms(1250)).await.unwrap() {
            TickOutcome::Deferred { until, .. } => assert_eq!(until, t0() + ms(1500)),
            other => panic!("expected deferral, got {:?}", other),
        }

        // Window over: dispatched.
        match h.dispatcher.tick(t0() + ms(5100)).await.unwrap() {
            TickOutcome::Dispatched { entry_id, .. } => assert_eq!(entry_id, e2),
            other => panic!("expected dispatch, got {:?}", other),
        }
        assert_eq!(h.publisher.events().len(), 1);
    }

    #[tokio::test]
    async fn test_one_dispatch_per_tick_oldest_first() {
        let h = harness();
        let e3 = enqueue(&h.service, "g3", 5, t0()).await;
        let e4 = enqueue(&h.service, "g4", 5, t0()).await;

        match h.dispatcher.tick(t0()).await.unwrap() {
            TickOutcome::Dispatched { entry_id, .. } => assert_eq!(entry_id, e3),
            other => panic!("expected dispatch, got {:?}", other),
        }
        assert_eq!(h.publisher.events().len(), 1);

        match h.dispatcher.tick(t0() + ms(100)).await.unwrap() {
            TickOutcome::Dispatched { entry_id, .. } => assert_eq!(entry_id, e4),
            other => panic!("expected dispatch, got {:?}", other),
        }
        let topics: Vec<_> = h.publisher.events().into_iter().map(|e| e.topic).collect();
        assert_eq!(topics, vec!["messages-g3", "messages-g4"]);
    }

    #[tokio::test]
    async fn test_mutual_exclusion_within_guild() {
        let h = harness();
        let first = enqueue(&h.service, "g1", 2, t0()).await;
        let second = enqueue(&h.service, "g1", 2, t0()).await;

        let mut dispatched = Vec::new();
        let mut now = t0();
        // Simulate 3 seconds of 100ms ticks.
        for _ in 0..30 {
            if let TickOutcome::Dispatched { entry_id, busy_until, .. } =
                h.dispatcher.tick(now).await.unwrap()
            {
                dispatched.push((entry_id, now, busy_until));
            }
            now += ms(100);
        }

        assert_eq!(dispatched.len(), 2);
        assert_eq!(dispatched[0].0, first);
        assert_eq!(dispatched[1].0, second);
        // The second starts only once the first's window (2s + pad) is over.
        assert!(dispatched[1].1 > dispatched[0].2);
    }

    #[tokio::test]
    async fn test_zero_duration_still_holds_pad() {
        let h = harness();
        enqueue(&h.service, "g1", 0, t0()).await;
        let next = enqueue(&h.service, "g1", 0, t0()).await;

        match h.dispatcher.tick(t0()).await.unwrap() {
            TickOutcome::Dispatched { busy_until, next_hint, .. } => {
                assert_eq!(busy_until, t0() + ms(250));
                assert_eq!(next_hint, Duration::ZERO);
            }
            other => panic!("expected dispatch, got {:?}", other),
        }

        // Same instant: the guild is still occupied.
        assert!(matches!(
            h.dispatcher.tick(t0()).await.unwrap(),
            TickOutcome::Deferred { entry_id, .. } if entry_id == next
        ));
    }

    #[tokio::test]
    async fn test_negative_duration_treated_as_zero() {
        let h = harness();
        enqueue(&h.service, "g1", -30, t0()).await;
        match h.dispatcher.tick(t0()).await.unwrap() {
            TickOutcome::Dispatched { busy_until, .. } => assert_eq!(busy_until, t0() + ms(250)),
            other => panic!("expected dispatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_frees_guild_without_flushing() {
        let h = harness();
        h.service.mark_busy("g1", t0() + ms(60_000)).await.unwrap();
        let pending = enqueue(&h.service, "g1", 5, t0()).await;

        assert!(matches!(
            h.dispatcher.tick(t0()).await.unwrap(),
            TickOutcome::Deferred { .. }
        ));

        h.service.clear_busy("g1").await.unwrap();

        match h.dispatcher.tick(t0() + ms(300)).await.unwrap() {
            TickOutcome::Dispatched { entry_id, .. } => assert_eq!(entry_id, pending),
            other => panic!("expected dispatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let h = harness();
        let poison = h
            .service
            .enqueue(NewQueueEntry::new(QueueKind::Message, "g1", "{oops", 5).scheduled_at(t0()))
            .await
            .unwrap()
            .id;
        let good = enqueue(&h.service, "g1", 5, t0()).await;

        assert_eq!(
            h.dispatcher.tick(t0()).await.unwrap(),
            TickOutcome::Dropped {
                entry_id: poison,
                guild_id: "g1".to_string(),
            }
        );
        assert!(h.publisher.events().is_empty());
        assert!(!h.service.is_busy("g1", t0()).await.unwrap());

        match h.dispatcher.tick(t0()).await.unwrap() {
            TickOutcome::Dispatched { entry_id, .. } => assert_eq!(entry_id, good),
            other => panic!("expected dispatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_duration_is_dropped() {
        let h = harness();
        let huge = enqueue(&h.service, "g1", 20_000_000_000_000, t0()).await;
        let max = enqueue(&h.service, "g1", i64::MAX, t0()).await;
        let good = enqueue(&h.service, "g1", 5, t0()).await;

        for expected in [huge, max] {
            assert_eq!(
                h.dispatcher.tick(t0()).await.unwrap(),
                TickOutcome::Dropped {
                    entry_id: expected,
                    guild_id: "g1".to_string(),
                }
            );
        }
        assert!(h.publisher.events().is_empty());
        assert!(!h.service.is_busy("g1", t0()).await.unwrap());

        match h.dispatcher.tick(t0()).await.unwrap() {
            TickOutcome::Dispatched { entry_id, .. } => assert_eq!(entry_id, good),
            other => panic!("expected dispatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_store_error_surfaces_without_publishing() {
        let publisher = Arc::new(RecordingPublisher::default());
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        let dispatcher = QueueDispatcher::new(
            Arc::new(UnavailableStore),
            Arc::new(QueueService::new(db, DurationPolicy::default())),
            publisher.clone(),
            DispatchTiming::default(),
        );

        assert!(dispatcher.tick(t0()).await.is_err());
        assert!(publisher.events().is_empty());
    }

    #[tokio::test]
    async fn test_run_survives_store_errors_and_stops_on_cancel() {
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        let dispatcher = QueueDispatcher::new(
            Arc::new(UnavailableStore),
            Arc::new(QueueService::new(db, DurationPolicy::default())),
            Arc::new(RecordingPublisher::default()),
            DispatchTiming {
                tick_interval: Duration::from_millis(5),
                ..Default::default()
            },
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(dispatcher.run(cancel.clone()));
        sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
    }
}
