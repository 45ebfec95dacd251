//! `SQLite` persistence for per-file graph contributions.
//!
//! `SQLite` holds what each file contributed and at which scan version, so an
//! incremental re-scan after a restart only touches files that changed. The
//! in-memory [`super::GraphStore`] is rebuilt from [`GraphDatabase::load`].
//!
//! Every write replaces one file's rows inside a single transaction: either
//! the whole contribution is stored or nothing is.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, Transaction, params};
use tracing::debug;

use super::schema::SCHEMA;
use super::snapshot::FileContribution;
use crate::error::{Error, MergeError, Result};
use crate::extractor::Diagnostic;
use crate::parallel::FileGaps;
use crate::types::{
    ContractInfo, Dimension, Direction, Edge, Entity, EntityId, EntityKind, Location, ShapeField,
    Span,
};

/// SQL column list for the entities table, matching `row_to_entity`.
const ENTITY_COLUMNS: &str = "file_path, id, kind, name, language, location, \
     start_line, start_column, end_line, end_column, shape, contract";

/// SQL column list for the edges table, matching `row_to_edge`.
const EDGE_COLUMNS: &str = "file_path, from_id, to_id, dimension, direction, confidence";

/// Normalize a file path to use forward slashes for consistent storage.
fn normalize_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if cfg!(windows) {
        s.replace('\\', "/")
    } else {
        s.into_owned()
    }
}

fn corrupted(column: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!(
            "Unknown {what} '{value}' in database. Database may be corrupted or from a newer version."
        )
        .into(),
    )
}

fn parse_kind(column: usize, s: &str) -> rusqlite::Result<EntityKind> {
    EntityKind::parse(s).ok_or_else(|| corrupted(column, "entity kind", s))
}

fn parse_dimension(column: usize, s: &str) -> rusqlite::Result<Dimension> {
    Dimension::parse(s).ok_or_else(|| corrupted(column, "dimension", s))
}

fn parse_direction(column: usize, s: &str) -> rusqlite::Result<Direction> {
    Direction::parse(s).ok_or_else(|| corrupted(column, "direction", s))
}

fn parse_json<T: serde::de::DeserializeOwned>(
    column: usize,
    value: Option<String>,
) -> rusqlite::Result<Option<T>> {
    value
        .map(|json| {
            serde_json::from_str(&json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    column,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()
}

/// Convert an entities row (see [`ENTITY_COLUMNS`]) to its owning file and entity.
fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<(String, Entity)> {
    let span = match (
        row.get::<_, Option<u32>>(6)?,
        row.get::<_, Option<u32>>(7)?,
        row.get::<_, Option<u32>>(8)?,
        row.get::<_, Option<u32>>(9)?,
    ) {
        (Some(sl), Some(sc), Some(el), Some(ec)) => Span::new(sl, sc, el, ec),
        _ => None,
    };

    let entity = Entity {
        id: EntityId::new(row.get::<_, String>(1)?),
        kind: parse_kind(2, &row.get::<_, String>(2)?)?,
        name: row.get(3)?,
        language: row.get(4)?,
        location: Location {
            file: PathBuf::from(row.get::<_, String>(5)?),
            span,
        },
        shape: parse_json::<Vec<ShapeField>>(10, row.get(10)?)?,
        contract: parse_json::<ContractInfo>(11, row.get(11)?)?,
    };
    Ok((row.get(0)?, entity))
}

/// Convert an edges row (see [`EDGE_COLUMNS`]) to its owning file and edge.
fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<(String, Edge)> {
    let edge = Edge {
        from: EntityId::new(row.get::<_, String>(1)?),
        to: EntityId::new(row.get::<_, String>(2)?),
        dimension: parse_dimension(3, &row.get::<_, String>(3)?)?,
        direction: parse_direction(4, &row.get::<_, String>(4)?)?,
        confidence: row.get(5)?,
    };
    Ok((row.get(0)?, edge))
}

fn to_json<T: serde::Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(Error::from)
}

/// `SQLite` database holding committed per-file contributions.
///
/// The connection is wrapped in a `Mutex` so the database can be shared
/// between the scan pipeline and readers.
pub struct GraphDatabase {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for GraphDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphDatabase")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl GraphDatabase {
    /// Open or create the graph database.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or `SQLite` fails.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` fails.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Location of the database file (`None` when in memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            Error::Internal(format!(
                "database connection mutex poisoned (a thread panicked while holding the lock): {e}"
            ))
        })
    }

    /// Atomically replace everything stored for one file.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; the transaction is rolled back.
    pub fn replace_file(&self, path: &Path, contribution: &FileContribution) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        Self::write_file(&tx, path, contribution)?;
        tx.commit()?;
        Ok(())
    }

    /// Atomically replace several files, then delete others, as one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; nothing is written in that case.
    pub fn apply(
        &self,
        replaced: &[(PathBuf, &FileContribution)],
        removed: &[PathBuf],
    ) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        for (path, contribution) in replaced {
            Self::write_file(&tx, path, contribution)?;
        }
        for path in removed {
            tx.execute("DELETE FROM files WHERE path = ?1", [normalize_path(path)])?;
            tx.execute("DELETE FROM scan_gaps WHERE path = ?1", [normalize_path(path)])?;
        }
        tx.commit()?;
        debug!(
            replaced = replaced.len(),
            removed = removed.len(),
            "Persisted graph changes"
        );
        Ok(())
    }

    // Hashes are stored bit-for-bit in SQLite's signed integer column.
    #[allow(clippy::cast_possible_wrap)]
    fn write_file(tx: &Transaction<'_>, path: &Path, contribution: &FileContribution) -> Result<()> {
        let path_str = normalize_path(path);
        let scan_version = i64::try_from(contribution.scan_version).map_err(|_| {
            Error::Internal(format!(
                "scan version {} of {path_str} does not fit in the database",
                contribution.scan_version
            ))
        })?;

        // Cascades remove the file's entity and edge rows.
        tx.execute("DELETE FROM files WHERE path = ?1", [&path_str])?;
        tx.execute(
            "INSERT INTO files (path, scan_version, content_hash, merged_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                path_str,
                scan_version,
                contribution.content_hash.map(|h| h as i64),
                chrono::Utc::now().timestamp_millis()
            ],
        )?;

        let mut insert_entity = tx.prepare_cached(
            "INSERT INTO entities (file_path, position, id, kind, name, language, location,
             start_line, start_column, end_line, end_column, shape, contract)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )?;
        for (position, entity) in contribution.entities.iter().enumerate() {
            let span = entity.location.span;
            insert_entity.execute(params![
                path_str,
                position,
                entity.id.as_str(),
                entity.kind.as_str(),
                entity.name,
                entity.language,
                normalize_path(&entity.location.file),
                span.map(|s| s.start_line),
                span.map(|s| s.start_column),
                span.map(|s| s.end_line),
                span.map(|s| s.end_column),
                to_json(entity.shape.as_ref())?,
                to_json(entity.contract.as_ref())?,
            ])?;
        }

        let mut insert_edge = tx.prepare_cached(
            "INSERT INTO edges (file_path, position, from_id, to_id, dimension, direction, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for (position, edge) in contribution.edges.iter().enumerate() {
            insert_edge.execute(params![
                path_str,
                position,
                edge.from.as_str(),
                edge.to.as_str(),
                edge.dimension.as_str(),
                edge.direction.as_str(),
                edge.confidence,
            ])?;
        }
        Ok(())
    }

    /// Delete everything stored for one file.
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` fails.
    pub fn remove_file(&self, path: &Path) -> Result<()> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM files WHERE path = ?1", [normalize_path(path)])?;
        conn.execute("DELETE FROM scan_gaps WHERE path = ?1", [normalize_path(path)])?;
        Ok(())
    }

    /// Delete every stored contribution.
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` fails.
    pub fn clear(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM files", [])?;
        conn.execute("DELETE FROM scan_gaps", [])?;
        Ok(())
    }

    /// Record what the latest scan of each file ran into, in one transaction.
    ///
    /// `None` (or empty gaps) clears a file's record.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or `SQLite` fails; nothing is written
    /// in that case.
    pub fn record_gaps(&self, updates: &[(PathBuf, Option<&FileGaps>)]) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        {
            let mut delete = tx.prepare_cached("DELETE FROM scan_gaps WHERE path = ?1")?;
            let mut insert = tx.prepare_cached(
                "INSERT INTO scan_gaps (path, excluded, diagnostics, rejection, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (path, gaps) in updates {
                let path_str = normalize_path(path);
                delete.execute([&path_str])?;
                let Some(gaps) = (*gaps).filter(|g| !g.is_empty()) else {
                    continue;
                };
                insert.execute(params![
                    path_str,
                    gaps.excluded,
                    serde_json::to_string(&gaps.diagnostics)?,
                    to_json(gaps.rejection.as_ref())?,
                    chrono::Utc::now().timestamp_millis()
                ])?;
            }
        }
        tx.commit()?;
        debug!(files = updates.len(), "Recorded scan gaps");
        Ok(())
    }

    /// Load every file's recorded scan problems.
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` fails or a row cannot be decoded.
    pub fn load_gaps(&self) -> Result<BTreeMap<PathBuf, FileGaps>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT path, excluded, diagnostics, rejection FROM scan_gaps ORDER BY path",
        )?;
        let rows = stmt.query_map([], |row| {
            let path: String = row.get(0)?;
            let gaps = FileGaps {
                excluded: row.get(1)?,
                diagnostics: parse_json::<Vec<Diagnostic>>(2, row.get(2)?)?.unwrap_or_default(),
                rejection: parse_json::<MergeError>(3, row.get(3)?)?,
            };
            Ok((PathBuf::from(path), gaps))
        })?;

        let mut gaps = BTreeMap::new();
        for row in rows {
            let (path, file) = row?;
            gaps.insert(path, file);
        }
        Ok(gaps)
    }

    /// Number of files with a stored contribution.
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` fails.
    pub fn file_count(&self) -> Result<usize> {
        let conn = self.connection()?;
        let count: usize = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Load every stored contribution, ordered by path.
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` fails or a row cannot be decoded.
    #[allow(clippy::cast_sign_loss)]
    pub fn load(&self) -> Result<Vec<(PathBuf, FileContribution)>> {
        let conn = self.connection()?;
        let mut files: BTreeMap<String, FileContribution> = BTreeMap::new();

        let mut stmt =
            conn.prepare("SELECT path, scan_version, content_hash FROM files ORDER BY path")?;
        let rows = stmt.query_map([], |row| {
            let path: String = row.get(0)?;
            let scan_version: i64 = row.get(1)?;
            let content_hash: Option<i64> = row.get(2)?;
            Ok((path, scan_version, content_hash))
        })?;
        for row in rows {
            let (path, scan_version, content_hash) = row?;
            files.insert(
                path,
                FileContribution {
                    scan_version: scan_version as u64,
                    content_hash: content_hash.map(|h| h as u64),
                    entities: Vec::new(),
                    edges: Vec::new(),
                },
            );
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities ORDER BY file_path, position"
        ))?;
        for row in stmt.query_map([], row_to_entity)? {
            let (path, entity) = row?;
            if let Some(contribution) = files.get_mut(&path) {
                contribution.entities.push(entity);
            }
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {EDGE_COLUMNS} FROM edges ORDER BY file_path, position"
        ))?;
        for row in stmt.query_map([], row_to_edge)? {
            let (path, edge) = row?;
            if let Some(contribution) = files.get_mut(&path) {
                contribution.edges.push(edge);
            }
        }

        Ok(files
            .into_iter()
            .map(|(path, contribution)| (PathBuf::from(path), contribution))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContractDecl, Side};

    fn sample() -> FileContribution {
        let dto = Entity::new("type:dto", EntityKind::Type, "UpdateUserDTO", "java", "api/User.java")
            .with_span(Span::new(3, 1, 9, 2).expect("span"))
            .with_shape(vec![ShapeField::new("name", "String", true)])
            .with_contract(
                Side::Backend,
                ContractDecl::Shape {
                    name: "UpdateUserDTO".to_string(),
                },
            );
        let handler = Entity::new(
            "fn:update",
            EntityKind::Function,
            "update",
            "java",
            "api/User.java",
        );
        FileContribution {
            scan_version: 4,
            content_hash: Some(u64::MAX - 7),
            entities: vec![dto, handler],
            edges: vec![
                Edge::new("type:dto", "fn:update", Dimension::DataFlow).with_confidence(0.75),
            ],
        }
    }

    #[test]
    fn replace_then_load_preserves_contribution() {
        let db = GraphDatabase::open_in_memory().expect("db");
        let contribution = sample();

        db.replace_file(Path::new("api/User.java"), &contribution)
            .expect("replace");
        let loaded = db.load().expect("load");

        assert_eq!(loaded, vec![(PathBuf::from("api/User.java"), contribution)]);
    }

    #[test]
    fn replace_removes_previous_rows() {
        let db = GraphDatabase::open_in_memory().expect("db");
        db.replace_file(Path::new("a.java"), &sample()).expect("replace");

        let smaller = FileContribution {
            scan_version: 5,
            ..FileContribution::default()
        };
        db.replace_file(Path::new("a.java"), &smaller).expect("replace");

        let loaded = db.load().expect("load");
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].1.entities.is_empty());
        assert!(loaded[0].1.edges.is_empty());
        assert_eq!(loaded[0].1.scan_version, 5);
    }

    #[test]
    fn apply_replaces_and_removes_in_one_transaction() {
        let db = GraphDatabase::open_in_memory().expect("db");
        db.replace_file(Path::new("old.java"), &sample()).expect("replace");

        let contribution = sample();
        db.apply(
            &[(PathBuf::from("new.java"), &contribution)],
            &[PathBuf::from("old.java")],
        )
        .expect("apply");

        let paths: Vec<PathBuf> = db.load().expect("load").into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec![PathBuf::from("new.java")]);
    }

    #[test]
    fn scan_gaps_are_recorded_and_cleared() {
        let db = GraphDatabase::open_in_memory().expect("db");
        let broken = FileGaps {
            diagnostics: vec![Diagnostic::error("web/api.json", "unexpected token")],
            excluded: true,
            rejection: None,
        };
        let rejected = FileGaps {
            rejection: Some(MergeError::new(
                PathBuf::from("api/a.json"),
                crate::error::ModelViolation::DanglingEdge {
                    from: EntityId::new("a"),
                    to: EntityId::new("b"),
                    missing: EntityId::new("b"),
                },
            )),
            ..FileGaps::default()
        };

        db.record_gaps(&[
            (PathBuf::from("web/api.json"), Some(&broken)),
            (PathBuf::from("api/a.json"), Some(&rejected)),
            (PathBuf::from("clean.json"), Some(&FileGaps::default())),
        ])
        .expect("record");
        let loaded = db.load_gaps().expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[Path::new("web/api.json")], broken);
        assert_eq!(loaded[Path::new("api/a.json")], rejected);

        db.record_gaps(&[(PathBuf::from("web/api.json"), None)])
            .expect("record");
        db.clear().expect("clear");
        assert!(db.load_gaps().expect("load").is_empty());
    }

    #[test]
    fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(".ripple").join("graph.db");

        {
            let db = GraphDatabase::open(&path).expect("open");
            db.replace_file(Path::new("a.java"), &sample()).expect("replace");
        }

        let db = GraphDatabase::open(&path).expect("reopen");
        assert_eq!(db.file_count().expect("count"), 1);
        db.clear().expect("clear");
        assert_eq!(db.file_count().expect("count"), 0);
    }
}
