/// Schema for every table in the store. Statements are idempotent.
pub const SCHEMA: &str = r#"
-- Records waiting for delivery to the sync endpoint
CREATE TABLE IF NOT EXISTS pending_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    next_attempt_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Records that exhausted their retry budget
CREATE TABLE IF NOT EXISTS dead_records (
    id INTEGER PRIMARY KEY,
    payload TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    last_error TEXT,
    created_at TEXT NOT NULL,
    dead_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Named, versioned cache snapshots
CREATE TABLE IF NOT EXISTS cache_snapshots (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by snapshot and request identity hash
CREATE TABLE IF NOT EXISTS cache_entries (
    snapshot TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (snapshot, request_hash),
    FOREIGN KEY (snapshot) REFERENCES cache_snapshots(name) ON DELETE CASCADE
);

-- Outstanding deferred sync registrations, at most one per tag
CREATE TABLE IF NOT EXISTS sync_registrations (
    tag TEXT PRIMARY KEY,
    registered_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Small keyed values (vacation list, active snapshot name)
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
