//! Database schema definition for the graph store.

/// Database schema definition.
pub(crate) const SCHEMA: &str = r"
-- Files with a committed contribution
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    scan_version INTEGER NOT NULL,
    content_hash INTEGER,
    merged_at INTEGER NOT NULL
);

-- Entities declared by each file, in extractor order
CREATE TABLE IF NOT EXISTS entities (
    file_path TEXT NOT NULL REFERENCES files(path) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    id TEXT NOT NULL,
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    language TEXT NOT NULL,
    location TEXT NOT NULL,
    start_line INTEGER,
    start_column INTEGER,
    end_line INTEGER,
    end_column INTEGER,
    shape TEXT,          -- JSON array of shape fields
    contract TEXT,       -- JSON contract descriptor
    PRIMARY KEY (file_path, position)
);

CREATE INDEX IF NOT EXISTS idx_entities_id ON entities(id);
CREATE INDEX IF NOT EXISTS idx_entities_kind ON entities(kind);

-- Edges declared by each file, in canonical order
CREATE TABLE IF NOT EXISTS edges (
    file_path TEXT NOT NULL REFERENCES files(path) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    dimension TEXT NOT NULL,
    direction TEXT NOT NULL,
    confidence REAL NOT NULL,
    PRIMARY KEY (file_path, position)
);

CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_id);
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id);
CREATE INDEX IF NOT EXISTS idx_edges_dimension ON edges(dimension);

-- Problems from the most recent scan of each file; independent of files,
-- since an excluded file may never have been merged
CREATE TABLE IF NOT EXISTS scan_gaps (
    path TEXT PRIMARY KEY,
    excluded INTEGER NOT NULL,
    diagnostics TEXT NOT NULL,  -- JSON array of diagnostics
    rejection TEXT,             -- JSON merge error
    recorded_at INTEGER NOT NULL
);
";
