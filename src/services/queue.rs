use crate::content::ContentDescriptor;
use crate::db::{Database, GuildRecord, NewQueueEntry, QueueEntry, QueueKind};
use crate::duration::{ceil_secs, DurationLimits, DurationPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

/// Durable, ordered collection of pending display events.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(&self, entry: NewQueueEntry) -> anyhow::Result<QueueEntry>;
    /// Smallest `execution_date <= now`, oldest `created_at` first.
    async fn earliest_eligible(&self, now: DateTime<Utc>) -> anyhow::Result<Option<QueueEntry>>;
    async fn reschedule(&self, id: i64, at: DateTime<Utc>) -> anyhow::Result<()>;
    /// Returns `false` when the entry was already gone.
    async fn remove(&self, id: i64) -> anyhow::Result<bool>;
}

/// Per-guild "overlay occupied until" record.
#[async_trait]
pub trait BusyState: Send + Sync {
    async fn is_busy(&self, guild_id: &str, now: DateTime<Utc>) -> anyhow::Result<bool>;
    async fn mark_busy(&self, guild_id: &str, until: DateTime<Utc>) -> anyhow::Result<()>;
    async fn clear_busy(&self, guild_id: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct QueueService {
    db: Database,
    policy: DurationPolicy,
}

impl QueueService {
    pub fn new(db: Database, policy: DurationPolicy) -> Self {
        Self { db, policy }
    }

    /// Validates a producer's descriptor, applies the guild's duration
    /// policy and display settings, then queues it. Returns the entry id.
    pub async fn submit(
        &self,
        kind: QueueKind,
        guild_id: u64,
        mut content: ContentDescriptor,
        raw_duration_secs: Option<f64>,
    ) -> anyhow::Result<i64> {
        content.validate()?;

        let guild_id = guild_id.to_string();
        let settings = self.guild_settings(&guild_id).await?;
        let limits = DurationLimits {
            default_secs: settings.default_media_time,
            max_secs: settings.max_media_time,
        };
        let duration = self
            .policy
            .resolve(raw_duration_secs.and_then(ceil_secs), limits);

        content.media_duration = Some(duration);
        content.display_full = Some(settings.display_media_full);

        let entry = NewQueueEntry::new(kind, guild_id, content.to_json()?, duration);
        let stored = self.enqueue(entry).await?;
        info!(
            "Queued {} entry {} for guild {} ({}s)",
            stored.kind, stored.id, stored.guild_id, stored.duration
        );
        Ok(stored.id)
    }

    /// Stored settings, or defaults for a guild that has never been seen.
    pub async fn guild_settings(&self, guild_id: &str) -> anyhow::Result<GuildRecord> {
        let id = guild_id.to_string();
        let record = self.db.run_blocking(move |db| db.get_guild(&id)).await?;
        Ok(record.unwrap_or_else(|| GuildRecord {
            id: guild_id.to_string(),
            ..Default::default()
        }))
    }

    pub async fn set_default_media_time(&self, guild_id: u64, secs: Option<i64>) -> anyhow::Result<()> {
        let guild_id = guild_id.to_string();
        self.db
            .run_blocking(move |db| db.set_default_media_time(&guild_id, secs))
            .await
    }

    pub async fn set_max_media_time(&self, guild_id: u64, secs: Option<i64>) -> anyhow::Result<()> {
        let guild_id = guild_id.to_string();
        self.db
            .run_blocking(move |db| db.set_max_media_time(&guild_id, secs))
            .await
    }

    pub async fn set_display_media_full(&self, guild_id: u64, enabled: bool) -> anyhow::Result<()> {
        let guild_id = guild_id.to_string();
        self.db
            .run_blocking(move |db| db.set_display_media_full(&guild_id, enabled))
            .await
    }

    pub async fn pending_count(&self, guild_id: u64) -> anyhow::Result<usize> {
        let guild_id = guild_id.to_string();
        self.db
            .run_blocking(move |db| db.count_pending_entries(&guild_id))
            .await
    }
}

#[async_trait]
impl QueueStore for QueueService {
    async fn enqueue(&self, entry: NewQueueEntry) -> anyhow::Result<QueueEntry> {
        self.db
            .run_blocking(move |db| db.insert_queue_entry(&entry, Utc::now()))
            .await
    }

    async fn earliest_eligible(&self, now: DateTime<Utc>) -> anyhow::Result<Option<QueueEntry>> {
        self.db
            .run_blocking(move |db| db.earliest_eligible_entry(now))
            .await
    }

    async fn reschedule(&self, id: i64, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.db
            .run_blocking(move |db| db.reschedule_queue_entry(id, at))
            .await?;
        Ok(())
    }

    async fn remove(&self, id: i64) -> anyhow::Result<bool> {
        let deleted = self
            .db
            .run_blocking(move |db| db.delete_queue_entry(id))
            .await?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl BusyState for QueueService {
    async fn is_busy(&self, guild_id: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let guild_id = guild_id.to_string();
        self.db
            .run_blocking(move |db| db.is_guild_busy(&guild_id, now))
            .await
    }

    async fn mark_busy(&self, guild_id: &str, until: DateTime<Utc>) -> anyhow::Result<()> {
        let guild_id = guild_id.to_string();
        self.db
            .run_blocking(move |db| db.set_guild_busy_until(&guild_id, until))
            .await
    }

    async fn clear_busy(&self, guild_id: &str) -> anyhow::Result<()> {
        let guild_id = guild_id.to_string();
        self.db
            .run_blocking(move |db| db.clear_guild_busy(&guild_id))
            .await?;
        Ok(())
    }
}
