//! Persistence collaborator (spec.md §6): the object-safe contract the core
//! depends on, plus a SQLite-backed reference implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::{MarasiError, Result};
use crate::transaction::{Transaction, TransactionId};

#[derive(Debug, Clone, serde::Serialize)]
pub struct TransactionSummary {
    pub id: TransactionId,
    pub method: String,
    pub host: String,
    pub path: String,
    pub status_code: i32,
    pub content_type: String,
    pub content_length: i64,
    pub request_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TransactionDetails {
    pub request: Transaction,
    pub response_status: String,
    pub response_status_code: i32,
    pub response_length: String,
    pub metadata: Value,
    pub note: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExtensionRecord {
    pub id: String,
    pub name: String,
    pub author: String,
    pub source_url: String,
    pub source: String,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
    pub description: String,
    pub settings: Value,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Waypoint {
    pub host: String,
    pub destination: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// Object-safe contract the core pipeline, extension manager and waypoint
/// router depend on (spec.md §6). Readers may proceed concurrently; the
/// SQLite reference implementation serializes writers to a single writer
/// connection, matching spec.md §5's "shared resources" guarantee.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn insert_request(&self, transaction: &Transaction) -> Result<()>;
    async fn update_response(&self, transaction: &Transaction) -> Result<()>;
    async fn get_summary(&self) -> Result<Vec<TransactionSummary>>;
    async fn get_full(&self, id: TransactionId) -> Result<TransactionDetails>;
    async fn get_metadata(&self, id: TransactionId) -> Result<Value>;
    async fn update_metadata(&self, map: Value, ids: &[TransactionId]) -> Result<()>;
    async fn get_note(&self, id: TransactionId) -> Result<String>;
    async fn update_note(&self, id: TransactionId, text: &str) -> Result<()>;
    async fn search_by_metadata(&self, json_path: &str, value: &str) -> Result<Vec<TransactionId>>;

    async fn get_extensions(&self) -> Result<Vec<ExtensionRecord>>;
    async fn get_extension_by_name(&self, name: &str) -> Result<Option<ExtensionRecord>>;
    async fn update_code_by_name(&self, name: &str, source: &str) -> Result<()>;
    async fn get_settings_by_id(&self, extension_id: &str) -> Result<Value>;
    async fn set_settings_by_id(&self, extension_id: &str, settings: Value) -> Result<()>;

    async fn get_waypoints(&self) -> Result<Vec<Waypoint>>;
    async fn create_or_update_waypoint(&self, waypoint: Waypoint) -> Result<()>;
    async fn delete_waypoint(&self, host: &str) -> Result<()>;

    async fn insert_log(&self, entry: LogEntry) -> Result<()>;
    async fn get_logs(&self, limit: i64) -> Result<Vec<LogEntry>>;
}

pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    pub async fn connect(database_path: &std::path::Path) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", database_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await
            .map_err(|e| MarasiError::PersistenceError(e.to_string()))?;
        let persistence = SqlitePersistence { pool };
        persistence.migrate().await?;
        Ok(persistence)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| MarasiError::PersistenceError(e.to_string()))?;
        Ok(())
    }

    fn row_to_summary(row: &SqliteRow) -> Result<TransactionSummary> {
        let id: String = row.try_get("id").map_err(db_err)?;
        Ok(TransactionSummary {
            id: id.parse().map_err(|_| MarasiError::PersistenceError("bad id".into()))?,
            method: row.try_get("method").map_err(db_err)?,
            host: row.try_get("host").map_err(db_err)?,
            path: row.try_get("path").map_err(db_err)?,
            status_code: row.try_get("status_code").map_err(db_err)?,
            content_type: row.try_get("content_type").map_err(db_err)?,
            content_length: row.try_get("content_length").map_err(db_err)?,
            request_timestamp: row.try_get("request_timestamp").map_err(db_err)?,
        })
    }
}

fn db_err(e: sqlx::Error) -> MarasiError {
    MarasiError::PersistenceError(e.to_string())
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY,
    scheme TEXT NOT NULL,
    method TEXT NOT NULL,
    host TEXT NOT NULL,
    path TEXT NOT NULL,
    raw_request BLOB NOT NULL,
    raw_response BLOB,
    status_text TEXT NOT NULL DEFAULT 'N/A',
    status_code INTEGER NOT NULL DEFAULT -1,
    content_type TEXT NOT NULL DEFAULT '',
    content_length INTEGER NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}',
    request_timestamp TEXT NOT NULL,
    response_timestamp TEXT
);
CREATE TABLE IF NOT EXISTS extensions (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    author TEXT NOT NULL DEFAULT '',
    source_url TEXT NOT NULL DEFAULT '',
    source TEXT NOT NULL DEFAULT '',
    enabled INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    settings TEXT NOT NULL DEFAULT '{}'
);
CREATE TABLE IF NOT EXISTS waypoints (
    host TEXT PRIMARY KEY,
    destination TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS logs (
    timestamp TEXT NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL
);
"#;

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn insert_request(&self, transaction: &Transaction) -> Result<()> {
        let id = transaction.id.to_string();
        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM transactions WHERE id = ?")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        if existing.is_some() {
            return Err(MarasiError::PersistenceError(format!(
                "duplicate transaction id {id}"
            )));
        }
        sqlx::query(
            "INSERT INTO transactions (id, scheme, method, host, path, raw_request, \
             status_text, status_code, content_type, content_length, metadata, request_timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&transaction.scheme)
        .bind(&transaction.method)
        .bind(&transaction.host)
        .bind(&transaction.path)
        .bind(transaction.raw_request.as_ref())
        .bind(&transaction.status_text)
        .bind(transaction.status_code)
        .bind(&transaction.content_type)
        .bind(transaction.content_length)
        .bind(serde_json::to_string(transaction.metadata.as_map()).unwrap_or_default())
        .bind(transaction.request_timestamp)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_response(&self, transaction: &Transaction) -> Result<()> {
        let id = transaction.id.to_string();
        let result = sqlx::query(
            "UPDATE transactions SET raw_response = ?, status_text = ?, status_code = ?, \
             content_type = ?, content_length = ?, metadata = ?, response_timestamp = ? \
             WHERE id = ?",
        )
        .bind(transaction.raw_response.as_ref().map(|b| b.as_ref()))
        .bind(&transaction.status_text)
        .bind(transaction.status_code)
        .bind(&transaction.content_type)
        .bind(transaction.content_length)
        .bind(serde_json::to_string(transaction.metadata.as_map()).unwrap_or_default())
        .bind(transaction.response_timestamp)
        .bind(&id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(MarasiError::PersistenceError(format!("no transaction with id {id}")));
        }
        Ok(())
    }

    async fn get_summary(&self) -> Result<Vec<TransactionSummary>> {
        let rows = sqlx::query(
            "SELECT id, method, host, path, status_code, content_type, content_length, request_timestamp \
             FROM transactions ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(Self::row_to_summary).collect()
    }

    async fn get_full(&self, id: TransactionId) -> Result<TransactionDetails> {
        let id_str = id.to_string();
        let row = sqlx::query("SELECT * FROM transactions WHERE id = ?")
            .bind(&id_str)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| MarasiError::PersistenceError(format!("no transaction with id {id_str}")))?;

        let raw_request: Vec<u8> = row.try_get("raw_request").map_err(db_err)?;
        let raw_response: Option<Vec<u8>> = row.try_get("raw_response").map_err(db_err)?;
        let metadata_str: String = row.try_get("metadata").map_err(db_err)?;
        let metadata: Value = serde_json::from_str(&metadata_str).unwrap_or(Value::Object(Default::default()));
        let note = metadata
            .get("note")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let mut transaction = Transaction::new(
            &row.try_get::<String, _>("scheme").map_err(db_err)?,
            &row.try_get::<String, _>("method").map_err(db_err)?,
            &row.try_get::<String, _>("host").map_err(db_err)?,
            &row.try_get::<String, _>("path").map_err(db_err)?,
            bytes::Bytes::from(raw_request),
        );
        transaction.id = id;
        transaction.request_timestamp = row.try_get("request_timestamp").map_err(db_err)?;

        let status_code: i32 = row.try_get("status_code").map_err(db_err)?;
        let status_text: String = row.try_get("status_text").map_err(db_err)?;
        let content_length: i64 = row.try_get("content_length").map_err(db_err)?;

        Ok(TransactionDetails {
            request: transaction,
            response_status: if status_code == -1 { "N/A".to_string() } else { status_text },
            response_status_code: status_code,
            response_length: if raw_response.is_none() {
                "0".to_string()
            } else {
                content_length.to_string()
            },
            metadata,
            note,
        })
    }

    async fn get_metadata(&self, id: TransactionId) -> Result<Value> {
        let id_str = id.to_string();
        let row: (String,) = sqlx::query_as("SELECT metadata FROM transactions WHERE id = ?")
            .bind(&id_str)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| MarasiError::PersistenceError(format!("no transaction with id {id_str}")))?;
        Ok(serde_json::from_str(&row.0).unwrap_or(Value::Object(Default::default())))
    }

    async fn update_metadata(&self, map: Value, ids: &[TransactionId]) -> Result<()> {
        for id in ids {
            let id_str = id.to_string();
            let mut current = self.get_metadata(*id).await?;
            if let (Some(current_obj), Some(new_obj)) = (current.as_object_mut(), map.as_object()) {
                for (k, v) in new_obj {
                    current_obj.insert(k.clone(), v.clone());
                }
            }
            sqlx::query("UPDATE transactions SET metadata = ? WHERE id = ?")
                .bind(serde_json::to_string(&current).unwrap_or_default())
                .bind(&id_str)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    async fn get_note(&self, id: TransactionId) -> Result<String> {
        let metadata = self.get_metadata(id).await?;
        Ok(metadata.get("note").and_then(Value::as_str).unwrap_or("").to_string())
    }

    /// Empty `text` removes `has_note`; non-empty sets it — enforced atomically by
    /// issuing a single UPDATE (spec.md §6).
    async fn update_note(&self, id: TransactionId, text: &str) -> Result<()> {
        let mut metadata = self.get_metadata(id).await?;
        let obj = metadata.as_object_mut().ok_or_else(|| {
            MarasiError::PersistenceError("metadata is not an object".to_string())
        })?;
        if text.is_empty() {
            obj.remove("note");
            obj.remove(crate::transaction::reserved_keys::HAS_NOTE);
        } else {
            obj.insert("note".to_string(), Value::String(text.to_string()));
            obj.insert(crate::transaction::reserved_keys::HAS_NOTE.to_string(), Value::Bool(true));
        }
        sqlx::query("UPDATE transactions SET metadata = ? WHERE id = ?")
            .bind(serde_json::to_string(&metadata).unwrap_or_default())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn search_by_metadata(&self, json_path: &str, value: &str) -> Result<Vec<TransactionId>> {
        let rows = sqlx::query("SELECT id, metadata FROM transactions")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let mut matches = Vec::new();
        for row in rows {
            let id_str: String = row.try_get("id").map_err(db_err)?;
            let metadata_str: String = row.try_get("metadata").map_err(db_err)?;
            let metadata: Value = serde_json::from_str(&metadata_str).unwrap_or(Value::Null);
            if metadata_path_equals(&metadata, json_path, value) {
                if let Ok(id) = id_str.parse() {
                    matches.push(id);
                }
            }
        }
        Ok(matches)
    }

    async fn get_extensions(&self) -> Result<Vec<ExtensionRecord>> {
        let rows = sqlx::query("SELECT * FROM extensions ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_extension).collect()
    }

    async fn get_extension_by_name(&self, name: &str) -> Result<Option<ExtensionRecord>> {
        let row = sqlx::query("SELECT * FROM extensions WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| row_to_extension(&r)).transpose()
    }

    async fn update_code_by_name(&self, name: &str, source: &str) -> Result<()> {
        sqlx::query("UPDATE extensions SET source = ?, updated_at = ? WHERE name = ?")
            .bind(source)
            .bind(Utc::now())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_settings_by_id(&self, extension_id: &str) -> Result<Value> {
        let row: Option<(String,)> = sqlx::query_as("SELECT settings FROM extensions WHERE id = ?")
            .bind(extension_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row
            .and_then(|(s,)| serde_json::from_str(&s).ok())
            .unwrap_or(Value::Object(Default::default())))
    }

    async fn set_settings_by_id(&self, extension_id: &str, settings: Value) -> Result<()> {
        sqlx::query("UPDATE extensions SET settings = ? WHERE id = ?")
            .bind(serde_json::to_string(&settings).unwrap_or_default())
            .bind(extension_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_waypoints(&self) -> Result<Vec<Waypoint>> {
        let rows = sqlx::query("SELECT host, destination FROM waypoints")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter()
            .map(|row| {
                Ok(Waypoint {
                    host: row.try_get("host").map_err(db_err)?,
                    destination: row.try_get("destination").map_err(db_err)?,
                })
            })
            .collect()
    }

    async fn create_or_update_waypoint(&self, waypoint: Waypoint) -> Result<()> {
        sqlx::query(
            "INSERT INTO waypoints (host, destination) VALUES (?, ?) \
             ON CONFLICT(host) DO UPDATE SET destination = excluded.destination",
        )
        .bind(&waypoint.host)
        .bind(&waypoint.destination)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_waypoint(&self, host: &str) -> Result<()> {
        sqlx::query("DELETE FROM waypoints WHERE host = ?")
            .bind(host)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn insert_log(&self, entry: LogEntry) -> Result<()> {
        sqlx::query("INSERT INTO logs (timestamp, level, message) VALUES (?, ?, ?)")
            .bind(entry.timestamp)
            .bind(&entry.level)
            .bind(&entry.message)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_logs(&self, limit: i64) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query("SELECT timestamp, level, message FROM logs ORDER BY timestamp DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter()
            .map(|row| {
                Ok(LogEntry {
                    timestamp: row.try_get("timestamp").map_err(db_err)?,
                    level: row.try_get("level").map_err(db_err)?,
                    message: row.try_get("message").map_err(db_err)?,
                })
            })
            .collect()
    }
}

fn row_to_extension(row: &SqliteRow) -> Result<ExtensionRecord> {
    let settings_str: String = row.try_get("settings").map_err(db_err)?;
    Ok(ExtensionRecord {
        id: row.try_get("id").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        author: row.try_get("author").map_err(db_err)?,
        source_url: row.try_get("source_url").map_err(db_err)?,
        source: row.try_get("source").map_err(db_err)?,
        enabled: row.try_get::<i64, _>("enabled").map_err(db_err)? != 0,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
        description: row.try_get("description").map_err(db_err)?,
        settings: serde_json::from_str(&settings_str).unwrap_or(Value::Object(Default::default())),
    })
}

/// Minimal dotted-path lookup (e.g. `"a.b"`) used by `search_by_metadata` — the
/// collaborator contract only requires path-equality search, not a full JSONPath
/// engine (spec.md §6).
fn metadata_path_equals(value: &Value, path: &str, expected: &str) -> bool {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        match current.get(segment) {
            Some(next) => current = next,
            None => return false,
        }
    }
    match current {
        Value::String(s) => s == expected,
        other => other.to_string() == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    async fn in_memory() -> SqlitePersistence {
        SqlitePersistence::connect(std::path::Path::new(":memory:")).await.unwrap()
    }

    #[tokio::test]
    async fn insert_then_duplicate_insert_fails() {
        let store = in_memory().await;
        let txn = Transaction::new("https", "GET", "example.com", "/", Bytes::new());
        store.insert_request(&txn).await.unwrap();
        assert!(store.insert_request(&txn).await.is_err());
    }

    #[tokio::test]
    async fn update_response_for_unknown_id_fails() {
        let store = in_memory().await;
        let txn = Transaction::new("https", "GET", "example.com", "/", Bytes::new());
        assert!(store.update_response(&txn).await.is_err());
    }

    #[tokio::test]
    async fn note_round_trip_toggles_has_note_flag() {
        let store = in_memory().await;
        let txn = Transaction::new("https", "GET", "example.com", "/", Bytes::new());
        store.insert_request(&txn).await.unwrap();

        store.update_note(txn.id, "suspicious").await.unwrap();
        let metadata = store.get_metadata(txn.id).await.unwrap();
        assert_eq!(metadata[crate::transaction::reserved_keys::HAS_NOTE], Value::Bool(true));

        store.update_note(txn.id, "").await.unwrap();
        let metadata = store.get_metadata(txn.id).await.unwrap();
        assert!(metadata.get(crate::transaction::reserved_keys::HAS_NOTE).is_none());
    }

    #[tokio::test]
    async fn summary_is_ordered_by_id_ascending() {
        let store = in_memory().await;
        let first = Transaction::new("https", "GET", "a.example", "/", Bytes::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = Transaction::new("https", "GET", "b.example", "/", Bytes::new());
        store.insert_request(&second).await.unwrap();
        store.insert_request(&first).await.unwrap();

        let summary = store.get_summary().await.unwrap();
        assert_eq!(summary[0].id, first.id);
        assert_eq!(summary[1].id, second.id);
    }
}
