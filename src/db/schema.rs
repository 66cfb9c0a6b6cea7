/// Display queue and per-guild overlay state. Timestamps are unix milliseconds.
pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        content TEXT NOT NULL,
        duration INTEGER NOT NULL,
        execution_date INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_queue_execution ON queue (execution_date, created_at);
    CREATE INDEX IF NOT EXISTS idx_queue_guild ON queue (guild_id);

    CREATE TABLE IF NOT EXISTS guilds (
        id TEXT PRIMARY KEY,
        busy_until INTEGER,
        default_media_time INTEGER,
        max_media_time INTEGER,
        display_media_full BOOLEAN NOT NULL DEFAULT FALSE
    );
";
