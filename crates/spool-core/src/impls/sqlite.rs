//! SQLite-backed store for workers running in separate processes.
//!
//! Every process opens its own [`SqliteStore`] on the same database file.
//! Claims are a single `UPDATE ... WHERE <guard>` inside an immediate
//! transaction, so SQLite's write lock is the only arbiter between workers.
//! WAL mode plus a busy timeout keeps readers and the occasional contended
//! writer from failing outright.
//!
//! Timestamps are stored as epoch milliseconds; column names follow the job
//! record field names.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior, params};
use tracing::debug;

use crate::domain::{
    Job, JobId, JobState, QueueError, QueueStats, Result, WorkerId, WorkerRecord, WorkerStatus,
};
use crate::ports::{ClaimClass, ConfigStore, Guard, JobStore, WorkerRegistry};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const JOB_COLUMNS: &str = "id, command, state, attempts, max_retries, created_at, updated_at, \
     next_retry_at, error_message, completed_at, lease_holder, lease_at";

const WORKER_COLUMNS: &str = "id, status, started_at, last_heartbeat, jobs_processed";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file shared by all workers.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| store_err(&format!("open sqlite db {}", path.display()), e))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| store_err("set busy timeout", e))?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))
            .map_err(|e| store_err("enable wal", e))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened sqlite store");
        Self::with_connection(conn)
    }

    /// Private database; only useful within one process.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| store_err("open in-memory db", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| QueueError::Store("sqlite connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| QueueError::Store(format!("sqlite task failed: {e}")))?
    }
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
          id TEXT PRIMARY KEY,
          command TEXT NOT NULL,
          state TEXT NOT NULL,
          attempts INTEGER NOT NULL DEFAULT 0,
          max_retries INTEGER NOT NULL,
          created_at INTEGER NOT NULL,
          updated_at INTEGER NOT NULL,
          next_retry_at INTEGER NULL,
          error_message TEXT NULL,
          completed_at INTEGER NULL,
          lease_holder TEXT NULL,
          lease_at INTEGER NULL
        );
        CREATE TABLE IF NOT EXISTS workers (
          id TEXT PRIMARY KEY,
          status TEXT NOT NULL,
          started_at INTEGER NOT NULL,
          last_heartbeat INTEGER NOT NULL,
          jobs_processed INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS config (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_state_created ON jobs(state, created_at);
        CREATE INDEX IF NOT EXISTS idx_jobs_state_retry ON jobs(state, next_retry_at);
        CREATE INDEX IF NOT EXISTS idx_jobs_state_lease ON jobs(state, lease_at);
        CREATE INDEX IF NOT EXISTS idx_workers_status ON workers(status, last_heartbeat);
        "#,
    )
    .map_err(|e| store_err("init sqlite schema", e))
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let job = job.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            );
            match conn.execute(&sql, rusqlite::params_from_iter(job_values(&job))) {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    Err(QueueError::Conflict(format!("job {} already exists", job.id)))
                }
                Err(e) => Err(store_err("insert job", e)),
            }
        })
        .await
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        let id = id.clone();
        self.with_conn(move |conn| select_job(conn, &id)).await
    }

    async fn list_by_state(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        self.with_conn(move |conn| {
            let mut out = Vec::new();
            match state {
                Some(state) => {
                    let sql = format!(
                        "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1 ORDER BY created_at DESC, id DESC"
                    );
                    let mut stmt = conn.prepare(&sql).map_err(|e| store_err("prepare list jobs", e))?;
                    let rows = stmt
                        .query_map(params![state.as_str()], map_row_to_job)
                        .map_err(|e| store_err("query list jobs", e))?;
                    for row in rows {
                        out.push(row.map_err(map_rusqlite_err)?);
                    }
                }
                None => {
                    let sql =
                        format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC");
                    let mut stmt = conn.prepare(&sql).map_err(|e| store_err("prepare list jobs", e))?;
                    let rows = stmt
                        .query_map([], map_row_to_job)
                        .map_err(|e| store_err("query list jobs", e))?;
                    for row in rows {
                        out.push(row.map_err(map_rusqlite_err)?);
                    }
                }
            }
            Ok(out)
        })
        .await
    }

    async fn claim_candidates(
        &self,
        class: ClaimClass,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>> {
        self.with_conn(move |conn| {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let (filter, bound) = match class {
                ClaimClass::Pending => (
                    "state = 'pending' AND lease_holder IS NULL ORDER BY created_at ASC, id ASC",
                    None,
                ),
                ClaimClass::RetryDue => (
                    "state = 'failed' AND lease_holder IS NULL AND next_retry_at <= ?2 \
                     ORDER BY next_retry_at ASC, id ASC",
                    Some(dt_to_ms(now)),
                ),
                ClaimClass::StaleLease => (
                    "state = 'processing' AND lease_at < ?2 ORDER BY lease_at ASC, id ASC",
                    Some(dt_to_ms(stale_before)),
                ),
            };
            let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE {filter} LIMIT ?1");
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| store_err("prepare claim candidates", e))?;
            let rows = match bound {
                Some(ms) => stmt.query_map(params![limit, ms], map_row_to_job),
                None => stmt.query_map(params![limit], map_row_to_job),
            }
            .map_err(|e| store_err("query claim candidates", e))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(map_rusqlite_err)?);
            }
            Ok(out)
        })
        .await
    }

    async fn conditional_update(
        &self,
        id: &JobId,
        next: &Job,
        guard: &Guard,
    ) -> Result<Option<Job>> {
        let id = id.clone();
        let next = next.clone();
        let guard = guard.clone();
        self.with_conn(move |conn| {
            let (guard_sql, guard_values) = guard_clause(&guard, 14);
            let sql = format!(
                "UPDATE jobs SET id = ?1, command = ?2, state = ?3, attempts = ?4, max_retries = ?5, \
                 created_at = ?6, updated_at = ?7, next_retry_at = ?8, error_message = ?9, \
                 completed_at = ?10, lease_holder = ?11, lease_at = ?12 \
                 WHERE id = ?13 AND {guard_sql}"
            );
            let mut values = job_values(&next);
            values.push(Value::Text(id.to_string()));
            values.extend(guard_values);

            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| store_err("begin conditional update", e))?;
            let updated = tx
                .execute(&sql, rusqlite::params_from_iter(values))
                .map_err(|e| store_err("conditional update", e))?;
            if updated == 0 {
                return Ok(None);
            }
            let stored = select_job(&tx, &next.id)?;
            tx.commit()
                .map_err(|e| store_err("commit conditional update", e))?;
            Ok(stored)
        })
        .await
    }

    async fn update_unconditional(&self, id: &JobId, next: &Job) -> Result<Job> {
        let id = id.clone();
        let next = next.clone();
        self.with_conn(move |conn| {
            let sql = "UPDATE jobs SET id = ?1, command = ?2, state = ?3, attempts = ?4, \
                       max_retries = ?5, created_at = ?6, updated_at = ?7, next_retry_at = ?8, \
                       error_message = ?9, completed_at = ?10, lease_holder = ?11, lease_at = ?12 \
                       WHERE id = ?13";
            let mut values = job_values(&next);
            values.push(Value::Text(id.to_string()));

            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| store_err("begin update", e))?;
            let updated = tx
                .execute(sql, rusqlite::params_from_iter(values))
                .map_err(|e| store_err("update job", e))?;
            if updated == 0 {
                return Err(QueueError::job_not_found(&id));
            }
            let stored = select_job(&tx, &next.id)?.ok_or_else(|| QueueError::job_not_found(&next.id))?;
            tx.commit().map_err(|e| store_err("commit update", e))?;
            Ok(stored)
        })
        .await
    }

    async fn count_by_state(&self) -> Result<QueueStats> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")
                .map_err(|e| store_err("prepare count jobs", e))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(|e| store_err("query count jobs", e))?;
            let mut stats = QueueStats::default();
            for row in rows {
                let (state, n) = row.map_err(map_rusqlite_err)?;
                stats.add(state.parse::<JobState>()?, n.max(0) as usize);
            }
            Ok(stats)
        })
        .await
    }
}

#[async_trait]
impl WorkerRegistry for SqliteStore {
    async fn register(&self, worker: &WorkerRecord) -> Result<()> {
        let worker = worker.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO workers (id, status, started_at, last_heartbeat, jobs_processed)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET status = ?2, started_at = ?3,
                   last_heartbeat = ?4, jobs_processed = ?5",
                params![
                    worker.id.as_str(),
                    worker.status.as_str(),
                    dt_to_ms(worker.started_at),
                    dt_to_ms(worker.last_heartbeat),
                    count_to_sql(worker.jobs_processed)
                ],
            )
            .map_err(|e| store_err("register worker", e))?;
            Ok(())
        })
        .await
    }

    async fn heartbeat(&self, id: &WorkerId, at: DateTime<Utc>, jobs_processed: u64) -> Result<()> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE workers SET last_heartbeat = ?2, jobs_processed = ?3 WHERE id = ?1",
                    params![id.as_str(), dt_to_ms(at), count_to_sql(jobs_processed)],
                )
                .map_err(|e| store_err("worker heartbeat", e))?;
            if updated == 0 {
                return Err(QueueError::worker_not_found(&id));
            }
            Ok(())
        })
        .await
    }

    async fn set_status(
        &self,
        id: &WorkerId,
        status: WorkerStatus,
        jobs_processed: u64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE workers SET status = ?2, jobs_processed = ?3, last_heartbeat = ?4
                     WHERE id = ?1",
                    params![
                        id.as_str(),
                        status.as_str(),
                        count_to_sql(jobs_processed),
                        dt_to_ms(at)
                    ],
                )
                .map_err(|e| store_err("set worker status", e))?;
            if updated == 0 {
                return Err(QueueError::worker_not_found(&id));
            }
            Ok(())
        })
        .await
    }

    async fn get_worker(&self, id: &WorkerId) -> Result<Option<WorkerRecord>> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let sql = format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = ?1");
            conn.query_row(&sql, params![id.as_str()], map_row_to_worker)
                .optional()
                .map_err(|e| store_err("get worker", e))
        })
        .await
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {WORKER_COLUMNS} FROM workers ORDER BY started_at DESC, id ASC");
            let mut stmt = conn.prepare(&sql).map_err(|e| store_err("prepare list workers", e))?;
            let rows = stmt
                .query_map([], map_row_to_worker)
                .map_err(|e| store_err("query list workers", e))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(map_rusqlite_err)?);
            }
            Ok(out)
        })
        .await
    }

    async fn list_live(&self, since: DateTime<Utc>) -> Result<Vec<WorkerRecord>> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {WORKER_COLUMNS} FROM workers
                 WHERE status IN ('active', 'stopping') AND last_heartbeat >= ?1
                 ORDER BY started_at DESC, id ASC"
            );
            let mut stmt = conn.prepare(&sql).map_err(|e| store_err("prepare live workers", e))?;
            let rows = stmt
                .query_map(params![dt_to_ms(since)], map_row_to_worker)
                .map_err(|e| store_err("query live workers", e))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(map_rusqlite_err)?);
            }
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT value FROM config WHERE key = ?1", params![key], |r| {
                r.get(0)
            })
            .optional()
            .map_err(|e| store_err("get config", e))
        })
        .await
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(|e| store_err("set config", e))?;
            Ok(())
        })
        .await
    }

    async fn list_config(&self) -> Result<BTreeMap<String, String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT key, value FROM config ORDER BY key")
                .map_err(|e| store_err("prepare list config", e))?;
            let rows = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
                .map_err(|e| store_err("query list config", e))?;
            let mut out = BTreeMap::new();
            for row in rows {
                let (k, v) = row.map_err(map_rusqlite_err)?;
                out.insert(k, v);
            }
            Ok(out)
        })
        .await
    }
}

fn select_job(conn: &Connection, id: &JobId) -> Result<Option<Job>> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
    conn.query_row(&sql, params![id.as_str()], map_row_to_job)
        .optional()
        .map_err(|e| store_err("get job", e))
}

/// Column values in `JOB_COLUMNS` order.
fn job_values(job: &Job) -> Vec<Value> {
    vec![
        Value::Text(job.id.to_string()),
        Value::Text(job.command.clone()),
        Value::Text(job.state.as_str().to_string()),
        Value::Integer(i64::from(job.attempts)),
        Value::Integer(i64::from(job.max_retries)),
        Value::Integer(dt_to_ms(job.created_at)),
        Value::Integer(dt_to_ms(job.updated_at)),
        opt_ms(job.next_retry_at),
        job.error_message.clone().map_or(Value::Null, Value::Text),
        opt_ms(job.completed_at),
        job.lease_holder
            .as_ref()
            .map_or(Value::Null, |w| Value::Text(w.to_string())),
        opt_ms(job.lease_at),
    ]
}

/// SQL predicate for a guard, with placeholders numbered from `first`.
fn guard_clause(guard: &Guard, first: usize) -> (String, Vec<Value>) {
    match guard {
        Guard::Unleased { state } => (
            format!("state = ?{first} AND lease_holder IS NULL"),
            vec![Value::Text(state.as_str().to_string())],
        ),
        Guard::Snapshot {
            state,
            lease_holder,
            lease_at,
        } => (
            format!(
                "state = ?{} AND lease_holder IS ?{} AND lease_at IS ?{}",
                first,
                first + 1,
                first + 2
            ),
            vec![
                Value::Text(state.as_str().to_string()),
                lease_holder
                    .as_ref()
                    .map_or(Value::Null, |w| Value::Text(w.to_string())),
                opt_ms(*lease_at),
            ],
        ),
        Guard::LeaseHeldBy { holder, lease_at } => (
            format!(
                "state = 'processing' AND lease_holder = ?{} AND lease_at = ?{}",
                first,
                first + 1
            ),
            vec![
                Value::Text(holder.to_string()),
                Value::Integer(dt_to_ms(*lease_at)),
            ],
        ),
    }
}

fn map_row_to_job(row: &Row) -> rusqlite::Result<Job> {
    let state: String = row.get(2)?;
    Ok(Job {
        id: JobId::new(row.get::<_, String>(0)?),
        command: row.get(1)?,
        state: state
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?,
        attempts: row.get(3)?,
        max_retries: row.get(4)?,
        created_at: ms_to_dt(row.get(5)?),
        updated_at: ms_to_dt(row.get(6)?),
        next_retry_at: row.get::<_, Option<i64>>(7)?.map(ms_to_dt),
        error_message: row.get(8)?,
        completed_at: row.get::<_, Option<i64>>(9)?.map(ms_to_dt),
        lease_holder: row.get::<_, Option<String>>(10)?.map(WorkerId::new),
        lease_at: row.get::<_, Option<i64>>(11)?.map(ms_to_dt),
    })
}

fn map_row_to_worker(row: &Row) -> rusqlite::Result<WorkerRecord> {
    let status: String = row.get(1)?;
    Ok(WorkerRecord {
        id: WorkerId::new(row.get::<_, String>(0)?),
        status: status
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?,
        started_at: ms_to_dt(row.get(2)?),
        last_heartbeat: ms_to_dt(row.get(3)?),
        jobs_processed: row.get::<_, i64>(4)?.max(0) as u64,
    })
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn opt_ms(dt: Option<DateTime<Utc>>) -> Value {
    dt.map_or(Value::Null, |d| Value::Integer(dt_to_ms(d)))
}

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn count_to_sql(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn store_err(context: &str, err: rusqlite::Error) -> QueueError {
    QueueError::Store(format!("{context}: {err}"))
}

fn map_rusqlite_err(err: rusqlite::Error) -> QueueError {
    QueueError::Store(format!("sqlite store: {err}"))
}
