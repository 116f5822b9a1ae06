//! Embedded, metadata-filterable vector store on SQLite + `sqlite-vec`.
//!
//! Records persist in a per-collection database file: a `records` table for
//! metadata/documents and a `record_embeddings` table holding `vec_f32`
//! blobs. Queries rank by `vec_distance_L2`, so this backend's native
//! distance space is L2, and metadata filters compile to `json_extract`
//! predicates evaluated inside the database.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::PathBuf;
use std::sync::{Mutex, Once};

use async_trait::async_trait;
use serde_json::Value;
use tokio_rusqlite::{Connection, ffi, rusqlite};

use crate::types::RagError;

use super::{
    DistanceSpace, MetadataFilter, QueryHit, StoreConfig, VectorRecord, VectorStore,
};

const CREATE_TABLES_SQL: &str = "
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    metadata TEXT NOT NULL,
    document TEXT
);
CREATE TABLE IF NOT EXISTS record_embeddings (
    id TEXT PRIMARY KEY,
    embedding BLOB NOT NULL
);
";

/// Persistent store queried by native L2 distance.
#[derive(Debug)]
pub struct EmbeddedStore {
    conn: Connection,
    dimension: usize,
    path: PathBuf,
}

impl EmbeddedStore {
    /// Open (or create) the collection database under
    /// `persist_dir/<collection>.db`.
    pub async fn open(config: &StoreConfig) -> Result<Self, RagError> {
        register_sqlite_vec()?;

        tokio::fs::create_dir_all(&config.persist_dir).await?;
        let path = config.persist_dir.join(format!("{}.db", config.collection));
        let conn = Connection::open(&path)
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;

        conn.call(|conn| -> rusqlite::Result<()> {
            // fail fast when the vec extension did not register
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))?;
            conn.execute_batch(CREATE_TABLES_SQL)?;
            Ok(())
        })
        .await
        .map_err(|err| RagError::Storage(err.to_string()))?;

        Ok(Self {
            conn,
            dimension: config.dimension,
            path,
        })
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<usize, RagError> {
        self.conn
            .call(|conn| -> rusqlite::Result<usize> {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(|err| RagError::Storage(err.to_string()))
    }
}

#[async_trait]
impl VectorStore for EmbeddedStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn distance_space(&self) -> DistanceSpace {
        DistanceSpace::L2
    }

    async fn add(&self, records: Vec<VectorRecord>) -> Result<(), RagError> {
        if records.is_empty() {
            return Ok(());
        }
        for record in &records {
            if record.embedding.len() != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension,
                    actual: record.embedding.len(),
                });
            }
        }

        // serialize outside the connection closure
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let embedding = serde_json::to_string(&record.embedding)
                .map_err(|err| RagError::Storage(err.to_string()))?;
            let metadata = serde_json::to_string(&record.metadata)
                .map_err(|err| RagError::Storage(err.to_string()))?;
            rows.push((record.id, embedding, metadata, record.document));
        }

        self.conn
            .call(move |conn| -> rusqlite::Result<()> {
                let tx = conn.transaction()?;
                for (id, embedding, metadata, document) in &rows {
                    let inserted = tx.execute(
                        "INSERT INTO records (id, metadata, document) VALUES (?1, ?2, ?3)",
                        rusqlite::params![id, metadata, document],
                    );
                    match inserted {
                        Ok(_) => {
                            tx.execute(
                                "INSERT INTO record_embeddings (id, embedding) \
                                 VALUES (?1, vec_f32(?2))",
                                rusqlite::params![id, embedding],
                            )?;
                        }
                        Err(err) if is_constraint_violation(&err) => {
                            // re-added id: fail soft and upsert instead
                            tracing::warn!(id = %id, "duplicate record id, upserting");
                            tx.execute(
                                "INSERT OR REPLACE INTO records (id, metadata, document) \
                                 VALUES (?1, ?2, ?3)",
                                rusqlite::params![id, metadata, document],
                            )?;
                            tx.execute(
                                "INSERT OR REPLACE INTO record_embeddings (id, embedding) \
                                 VALUES (?1, vec_f32(?2))",
                                rusqlite::params![id, embedding],
                            )?;
                        }
                        Err(err) => return Err(err),
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|err| RagError::Storage(err.to_string()))
    }

    async fn query(
        &self,
        queries: &[Vec<f32>],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Vec<QueryHit>>, RagError> {
        for query in queries {
            if query.len() != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension,
                    actual: query.len(),
                });
            }
        }

        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            let embedding = serde_json::to_string(query)
                .map_err(|err| RagError::Storage(err.to_string()))?;

            let mut sql = String::from(
                "SELECT r.id, r.metadata, r.document, \
                 vec_distance_L2(e.embedding, vec_f32(?1)) AS distance \
                 FROM records r JOIN record_embeddings e ON r.id = e.id",
            );
            let mut params: Vec<rusqlite::types::Value> =
                vec![rusqlite::types::Value::Text(embedding)];
            if let Some(filter) = filter {
                let mut clauses = Vec::with_capacity(filter.len());
                for (key, value) in filter {
                    clauses.push(format!(
                        "json_extract(r.metadata, ?{}) = ?{}",
                        params.len() + 1,
                        params.len() + 2
                    ));
                    params.push(rusqlite::types::Value::Text(format!("$.{key}")));
                    params.push(filter_value(value));
                }
                if !clauses.is_empty() {
                    sql.push_str(" WHERE ");
                    sql.push_str(&clauses.join(" AND "));
                }
            }
            sql.push_str(&format!(" ORDER BY distance ASC LIMIT ?{}", params.len() + 1));
            params.push(rusqlite::types::Value::Integer(top_k as i64));

            let hits = self
                .conn
                .call(move |conn| -> rusqlite::Result<Vec<QueryHit>> {
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map(rusqlite::params_from_iter(params), |row| {
                            let metadata_text: String = row.get(1)?;
                            let metadata = serde_json::from_str(&metadata_text)
                                .unwrap_or_default();
                            Ok(QueryHit {
                                id: row.get(0)?,
                                metadata,
                                document: row.get(2)?,
                                distance: row.get::<_, f64>(3)? as f32,
                            })
                        })
                        ?;

                    let mut hits = Vec::new();
                    for row in rows {
                        hits.push(row?);
                    }
                    Ok(hits)
                })
                .await
                .map_err(|err| RagError::Storage(err.to_string()))?;
            results.push(hits);
        }
        Ok(results)
    }

    async fn reset(&self) -> Result<(), RagError> {
        self.conn
            .call(|conn| -> rusqlite::Result<()> {
                conn.execute_batch(
                    "DROP TABLE IF EXISTS records; DROP TABLE IF EXISTS record_embeddings;",
                )?;
                conn.execute_batch(CREATE_TABLES_SQL)?;
                Ok(())
            })
            .await
            .map_err(|err| RagError::Storage(err.to_string()))
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Bind a scalar filter value the way SQLite's `json_extract` returns it:
/// booleans surface as 0/1 integers.
fn filter_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Number(n) if n.is_i64() => {
            rusqlite::types::Value::Integer(n.as_i64().unwrap_or_default())
        }
        Value::Number(n) => rusqlite::types::Value::Real(n.as_f64().unwrap_or_default()),
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}

/// Register `sqlite-vec` as an auto extension, once per process.
fn register_sqlite_vec() -> Result<(), RagError> {
    static INIT: Once = Once::new();
    static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

    INIT.call_once(|| {
        let result = unsafe {
            type ExtensionInit = unsafe extern "C" fn(
                *mut ffi::sqlite3,
                *mut *mut c_char,
                *const ffi::sqlite3_api_routines,
            ) -> i32;

            let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
            let init_fn = transmute::<unsafe extern "C" fn(), ExtensionInit>(init);
            let rc = ffi::sqlite3_auto_extension(Some(init_fn));
            if rc == 0 {
                Ok(())
            } else {
                Err(format!("failed to register sqlite-vec extension (code {rc})"))
            }
        };
        *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
    });

    INIT_RESULT
        .lock()
        .expect("init result mutex poisoned")
        .clone()
        .unwrap_or(Ok(()))
        .map_err(RagError::Storage)
}
