/// Inline SQL migrations for the bulkpull schema, one statement each.
///
/// Timestamps are unix milliseconds.

pub const MIGRATIONS: &[&str] = &[
    // Migration 1: tables created by jobs (the table-storage collaborator)
    r#"
CREATE TABLE IF NOT EXISTS data_tables (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
"#,
    // Migration 2: rows, keyed by source record id so page replays upsert
    r#"
CREATE TABLE IF NOT EXISTS table_rows (
    table_id TEXT NOT NULL REFERENCES data_tables(id),
    source_id TEXT NOT NULL,
    data TEXT NOT NULL,
    written_at INTEGER NOT NULL,
    PRIMARY KEY (table_id, source_id)
);
"#,
    // Migration 3: jobs
    r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    table_id TEXT NOT NULL REFERENCES data_tables(id),
    table_name TEXT NOT NULL,
    query TEXT NOT NULL,
    data_source TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'running', 'completed', 'failed', 'cancelled')),
    current_page INTEGER NOT NULL DEFAULT 0,
    total_pages INTEGER NOT NULL DEFAULT 0,
    processed_records INTEGER NOT NULL DEFAULT 0,
    total_estimated INTEGER NOT NULL DEFAULT 0,
    percentage REAL NOT NULL DEFAULT 0,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    completed_at INTEGER
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_owner_created ON jobs(owner_id, created_at DESC);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);"#,
];
