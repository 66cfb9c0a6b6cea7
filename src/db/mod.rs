pub mod schema;

use crate::config::Config;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// What a queued display event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// Text, attached media or a remote URL.
    Message,
    /// Synthesized speech.
    Vocal,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Message => "message",
            QueueKind::Vocal => "vocal",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for QueueKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for QueueKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "message" => Ok(QueueKind::Message),
            "vocal" => Ok(QueueKind::Vocal),
            other => Err(FromSqlError::Other(
                format!("unknown queue kind '{}'", other).into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: i64,
    pub guild_id: String,
    pub kind: QueueKind,
    /// Serialized `ContentDescriptor`, parsed only at dispatch time.
    pub content: String,
    /// Effective seconds the entry occupies the guild's overlay.
    pub duration: i64,
    pub execution_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            guild_id: row.get(1)?,
            kind: row.get(2)?,
            content: row.get(3)?,
            duration: row.get(4)?,
            execution_date: from_millis(row.get(5)?),
            created_at: from_millis(row.get(6)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewQueueEntry {
    pub kind: QueueKind,
    pub guild_id: String,
    pub content: String,
    pub duration: i64,
    /// Defaults to the insertion time.
    pub execution_date: Option<DateTime<Utc>>,
}

impl NewQueueEntry {
    pub fn new(
        kind: QueueKind,
        guild_id: impl Into<String>,
        content: impl Into<String>,
        duration: i64,
    ) -> Self {
        Self {
            kind,
            guild_id: guild_id.into(),
            content: content.into(),
            duration,
            execution_date: None,
        }
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.execution_date = Some(at);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuildRecord {
    pub id: String,
    pub busy_until: Option<DateTime<Utc>>,
    pub default_media_time: Option<i64>,
    pub max_media_time: Option<i64>,
    pub display_media_full: bool,
}

const QUEUE_COLUMNS: &str =
    "id, guild_id, kind, content, duration, execution_date, created_at";

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Self::open(&config.database_url)
    }

    pub fn open(path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && path != ":memory:" {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn execute_init(&self) -> anyhow::Result<()> {
        info!("Database: Initializing schema...");
        let conn = self.conn()?;
        conn.execute_batch(schema::SCHEMA)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    /// Runs a synchronous database call on the blocking pool.
    pub async fn run_blocking<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    fn conn(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    // --- Queue ---

    pub fn insert_queue_entry(
        &self,
        entry: &NewQueueEntry,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<QueueEntry> {
        let execution_date = entry.execution_date.unwrap_or(created_at);
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO queue (guild_id, kind, content, duration, execution_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                &entry.guild_id,
                entry.kind,
                &entry.content,
                entry.duration,
                execution_date.timestamp_millis(),
                created_at.timestamp_millis(),
            ),
        )?;
        let id = conn.last_insert_rowid();
        debug!(
            "Database: Queued {} entry {} for guild {}",
            entry.kind, id, entry.guild_id
        );

        Ok(QueueEntry {
            id,
            guild_id: entry.guild_id.clone(),
            kind: entry.kind,
            content: entry.content.clone(),
            duration: entry.duration,
            execution_date: from_millis(execution_date.timestamp_millis()),
            created_at: from_millis(created_at.timestamp_millis()),
        })
    }

    /// Oldest entry whose execution date has passed, across all guilds.
    pub fn earliest_eligible_entry(&self, now: DateTime<Utc>) -> anyhow::Result<Option<QueueEntry>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM queue
             WHERE execution_date <= ?1
             ORDER BY execution_date ASC, created_at ASC, id ASC
             LIMIT 1"
        );
        let entry = conn
            .query_row(&sql, [now.timestamp_millis()], QueueEntry::from_row)
            .optional()?;
        Ok(entry)
    }

    pub fn get_queue_entry(&self, id: i64) -> anyhow::Result<Option<QueueEntry>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM queue WHERE id = ?1");
        let entry = conn.query_row(&sql, [id], QueueEntry::from_row).optional()?;
        Ok(entry)
    }

    pub fn reschedule_queue_entry(&self, id: i64, at: DateTime<Utc>) -> anyhow::Result<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE queue SET execution_date = ?1 WHERE id = ?2",
            (at.timestamp_millis(), id),
        )?;
        Ok(count)
    }

    pub fn delete_queue_entry(&self, id: i64) -> anyhow::Result<usize> {
        let conn = self.conn()?;
        let count = conn.execute("DELETE FROM queue WHERE id = ?1", [id])?;
        Ok(count)
    }

    pub fn count_pending_entries(&self, guild_id: &str) -> anyhow::Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue WHERE guild_id = ?1",
            [guild_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // --- Guild state ---

    pub fn get_guild(&self, guild_id: &str) -> anyhow::Result<Option<GuildRecord>> {
        let conn = self.conn()?;
        let guild = conn
            .query_row(
                "SELECT id, busy_until, default_media_time, max_media_time, display_media_full
                 FROM guilds WHERE id = ?1",
                [guild_id],
                |row| {
                    let busy_until: Option<i64> = row.get(1)?;
                    Ok(GuildRecord {
                        id: row.get(0)?,
                        busy_until: busy_until.map(from_millis),
                        default_media_time: row.get(2)?,
                        max_media_time: row.get(3)?,
                        display_media_full: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(guild)
    }

    pub fn is_guild_busy(&self, guild_id: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let conn = self.conn()?;
        let busy = conn
            .prepare("SELECT 1 FROM guilds WHERE id = ?1 AND busy_until IS NOT NULL AND busy_until >= ?2")?
            .exists((guild_id, now.timestamp_millis()))?;
        Ok(busy)
    }

    pub fn set_guild_busy_until(&self, guild_id: &str, until: DateTime<Utc>) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO guilds (id, busy_until) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET busy_until = ?2",
            (guild_id, until.timestamp_millis()),
        )?;
        Ok(())
    }

    /// Frees the guild's overlay. Unknown guilds are left alone.
    pub fn clear_guild_busy(&self, guild_id: &str) -> anyhow::Result<usize> {
        let conn = self.conn()?;
        let count = conn.execute("UPDATE guilds SET busy_until = NULL WHERE id = ?1", [guild_id])?;
        Ok(count)
    }

    pub fn set_default_media_time(&self, guild_id: &str, secs: Option<i64>) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO guilds (id, default_media_time) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET default_media_time = ?2",
            (guild_id, secs),
        )?;
        Ok(())
    }

    pub fn set_max_media_time(&self, guild_id: &str, secs: Option<i64>) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO guilds (id, max_media_time) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET max_media_time = ?2",
            (guild_id, secs),
        )?;
        Ok(())
    }

    pub fn set_display_media_full(&self, guild_id: &str, enabled: bool) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO guilds (id, display_media_full) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET display_media_full = ?2",
            (guild_id, enabled),
        )?;
        Ok(())
    }
}

/// Out-of-range values collapse to the epoch rather than failing the row.
fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn test_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        db
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap()
    }

    #[test]
    fn test_init_is_idempotent() {
        let db = test_db();
        db.execute_init().unwrap();
        assert_eq!(db.count_pending_entries("g1").unwrap(), 0);
    }

    #[test]
    fn test_insert_and_fetch_entry() {
        let db = test_db();
        let entry = NewQueueEntry::new(QueueKind::Vocal, "g1", "{\"text\":\"hi\"}", 4);
        let stored = db.insert_queue_entry(&entry, t0()).unwrap();

        assert_eq!(stored.kind, QueueKind::Vocal);
        assert_eq!(stored.execution_date, t0());
        assert_eq!(stored.created_at, t0());

        let fetched = db.get_queue_entry(stored.id).unwrap().unwrap();
        assert_eq!(fetched, stored);
    }

    #[test]
    fn test_earliest_eligible_ordering() {
        let db = test_db();
        let later = NewQueueEntry::new(QueueKind::Message, "g1", "{}", 5)
            .scheduled_at(t0() + Duration::seconds(2));
        let first = NewQueueEntry::new(QueueKind::Message, "g2", "{}", 5).scheduled_at(t0());
        let second = NewQueueEntry::new(QueueKind::Message, "g3", "{}", 5).scheduled_at(t0());

        db.insert_queue_entry(&later, t0() - Duration::seconds(10)).unwrap();
        let a = db.insert_queue_entry(&first, t0() - Duration::seconds(5)).unwrap();
        let b = db.insert_queue_entry(&second, t0() - Duration::seconds(5)).unwrap();

        // Nothing is due before t0.
        assert!(db
            .earliest_eligible_entry(t0() - Duration::milliseconds(1))
            .unwrap()
            .is_none());

        // Same execution date and creation time: insertion order breaks the tie.
        assert_eq!(db.earliest_eligible_entry(t0()).unwrap().unwrap().id, a.id);
        db.delete_queue_entry(a.id).unwrap();
        assert_eq!(db.earliest_eligible_entry(t0()).unwrap().unwrap().id, b.id);
    }

    #[test]
    fn test_reschedule_and_delete() {
        let db = test_db();
        let stored = db
            .insert_queue_entry(&NewQueueEntry::new(QueueKind::Message, "g1", "{}", 5), t0())
            .unwrap();

        let pushed = t0() + Duration::milliseconds(250);
        assert_eq!(db.reschedule_queue_entry(stored.id, pushed).unwrap(), 1);
        assert!(db.earliest_eligible_entry(t0()).unwrap().is_none());
        assert_eq!(
            db.earliest_eligible_entry(pushed).unwrap().unwrap().execution_date,
            pushed
        );

        assert_eq!(db.delete_queue_entry(stored.id).unwrap(), 1);
        assert_eq!(db.delete_queue_entry(stored.id).unwrap(), 0);
    }

    #[test]
    fn test_guild_busy_window() {
        let db = test_db();
        assert!(!db.is_guild_busy("g1", t0()).unwrap());
        assert!(db.get_guild("g1").unwrap().is_none());

        let until = t0() + Duration::seconds(5);
        db.set_guild_busy_until("g1", until).unwrap();
        assert!(db.is_guild_busy("g1", t0()).unwrap());
        assert!(db.is_guild_busy("g1", until).unwrap());
        assert!(!db.is_guild_busy("g1", until + Duration::milliseconds(1)).unwrap());

        assert_eq!(db.clear_guild_busy("g1").unwrap(), 1);
        assert!(!db.is_guild_busy("g1", t0()).unwrap());
        assert_eq!(db.get_guild("g1").unwrap().unwrap().busy_until, None);

        // Clearing an unknown guild does not create it.
        assert_eq!(db.clear_guild_busy("g2").unwrap(), 0);
        assert!(db.get_guild("g2").unwrap().is_none());
    }

    #[test]
    fn test_guild_settings_upserts_keep_other_columns() {
        let db = test_db();
        db.set_max_media_time("g1", Some(30)).unwrap();
        db.set_default_media_time("g1", Some(8)).unwrap();
        db.set_display_media_full("g1", true).unwrap();
        db.set_guild_busy_until("g1", t0()).unwrap();

        let guild = db.get_guild("g1").unwrap().unwrap();
        assert_eq!(guild.max_media_time, Some(30));
        assert_eq!(guild.default_media_time, Some(8));
        assert!(guild.display_media_full);
        assert_eq!(guild.busy_until, Some(t0()));

        db.set_max_media_time("g1", None).unwrap();
        let guild = db.get_guild("g1").unwrap().unwrap();
        assert_eq!(guild.max_media_time, None);
        assert_eq!(guild.default_media_time, Some(8));
    }

    #[test]
    fn test_pending_count_is_per_guild() {
        let db = test_db();
        for guild in ["g1", "g1", "g2"] {
            db.insert_queue_entry(&NewQueueEntry::new(QueueKind::Message, guild, "{}", 5), t0())
                .unwrap();
        }
        assert_eq!(db.count_pending_entries("g1").unwrap(), 2);
        assert_eq!(db.count_pending_entries("g2").unwrap(), 1);
    }
}
