/// Schema for the offline store.
///
/// One table per cached entity type, each indexed by write timestamp for
/// pruning, plus per-type sync metadata and the pending mutation queue.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS work_orders (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    last_modified TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS work_orders_by_timestamp ON work_orders(timestamp);

CREATE TABLE IF NOT EXISTS customers (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    last_modified TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS customers_by_timestamp ON customers(timestamp);

CREATE TABLE IF NOT EXISTS properties (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    last_modified TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS properties_by_timestamp ON properties(timestamp);

CREATE TABLE IF NOT EXISTS invoices (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    last_modified TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS invoices_by_timestamp ON invoices(timestamp);

-- Last bulk sync per entity type
CREATE TABLE IF NOT EXISTS metadata (
    entity_type TEXT PRIMARY KEY,
    last_sync INTEGER NOT NULL,
    count INTEGER NOT NULL
);

-- Mutations waiting to reach the backend
CREATE TABLE IF NOT EXISTS sync_queue (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    data TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3
);

CREATE INDEX IF NOT EXISTS sync_queue_by_timestamp ON sync_queue(timestamp);
"#;
