// Copyright 2026 Evidex Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use fs2::FileExt;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::error::BatchSubmissionError;
use crate::model::RecordPayload;
use crate::model::ResultBatch;
use crate::model::ResultRecord;

pub struct Store {
    pub conn: Connection,
    pub path: PathBuf,
    lock: Option<StoreLock>,
}

struct StoreLock {
    _file: File,
    path: PathBuf,
    mode: StoreMode,
}

impl StoreLock {
    fn new(file: File, path: PathBuf, mode: StoreMode) -> Self {
        Self {
            _file: file,
            path,
            mode,
        }
    }
}

/// Held for the whole of a submission so that only one process runs a
/// batch against a given store at a time.
pub struct SubmitLock {
    _file: File,
}

const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy)]
pub enum StoreMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub records: i64,
    pub errors: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub batch_id: Option<String>,
    pub committed_at: Option<String>,
    pub record_count: i64,
    pub error_count: i64,
    pub categories: Vec<CategoryCount>,
    pub db_size_bytes: u64,
}

impl Store {
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("store already exists at {}", path.display());
        }
        let _lock = Self::acquire_lock(path, StoreMode::ReadWrite)?;
        let conn = Self::open_connection(path, StoreMode::ReadWrite)?;
        Self::apply_pragmas(&conn, StoreMode::ReadWrite)?;
        Self::create_schema(&conn)?;
        Self::set_meta(&conn, "schema_version", &SCHEMA_VERSION.to_string())?;
        Ok(())
    }

    pub fn open(path: &Path, mode: StoreMode) -> Result<Self> {
        let lock = Self::acquire_lock(path, mode)?;
        let conn = Self::open_connection(path, mode)?;
        Self::apply_pragmas(&conn, mode)?;
        match mode {
            StoreMode::ReadWrite => Self::migrate(&conn)?,
            StoreMode::ReadOnly => {
                let version = Self::schema_version(&conn)?;
                if version != SCHEMA_VERSION {
                    anyhow::bail!(
                        "store schema version {version} is not supported (expected {SCHEMA_VERSION}); open it once for writing to migrate"
                    );
                }
            }
        }
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            lock: Some(lock),
        })
    }

    fn open_connection(path: &Path, mode: StoreMode) -> Result<Connection> {
        let flags = match mode {
            StoreMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            StoreMode::ReadWrite => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        };
        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("open {}", path.display()))?;
        conn.busy_timeout(Duration::from_millis(5000))
            .context("set busy timeout")?;
        Ok(conn)
    }

    fn apply_pragmas(conn: &Connection, mode: StoreMode) -> Result<()> {
        if matches!(mode, StoreMode::ReadWrite) {
            conn.execute_batch("PRAGMA journal_mode=DELETE;\nPRAGMA synchronous=NORMAL;")
                .context("apply pragmas")?;
        }
        Ok(())
    }

    fn lock_path_for(path: &Path, suffix: &str) -> Result<PathBuf> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string_lossy().as_bytes());
        let hash = hex::encode(hasher.finalize());
        let mut dir = std::env::temp_dir();
        dir.push("evidex");
        fs::create_dir_all(&dir).with_context(|| format!("create lock dir {}", dir.display()))?;
        Ok(dir.join(format!("evidex-{hash}.{suffix}")))
    }

    fn open_lock_file(lock_path: &Path) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("open lock file {}", lock_path.display()))
    }

    fn acquire_lock(path: &Path, mode: StoreMode) -> Result<StoreLock> {
        let lock_path = Self::lock_path_for(path, "lock")?;
        let file = Self::open_lock_file(&lock_path)?;
        let deadline = Instant::now() + Duration::from_millis(5000);
        loop {
            let locked = match mode {
                StoreMode::ReadOnly => file.try_lock_shared().map_err(|err| err.to_string()),
                StoreMode::ReadWrite => file.try_lock_exclusive().map_err(|err| err.to_string()),
            };
            match locked {
                Ok(()) => return Ok(StoreLock::new(file, lock_path, mode)),
                Err(_) if Instant::now() >= deadline => {
                    let mode_label = match mode {
                        StoreMode::ReadOnly => "read",
                        StoreMode::ReadWrite => "write",
                    };
                    anyhow::bail!(
                        "store is locked for {mode_label} access; another process may be using {}",
                        path.display()
                    );
                }
                Err(_) => {
                    sleep(Duration::from_millis(50));
                }
            }
        }
    }

    /// Take the submission lock for the store at `path`. Tried once: a
    /// submission already running elsewhere is reported, not waited for.
    pub fn acquire_submit_lock(path: &Path) -> Result<SubmitLock> {
        let lock_path = Self::lock_path_for(path, "submit.lock")?;
        let file = Self::open_lock_file(&lock_path)?;
        if let Err(err) = file.try_lock_exclusive().map_err(|err| err.to_string()) {
            tracing::debug!(error = %err, "submission lock held");
            return Err(BatchSubmissionError::InFlight.into());
        }
        Ok(SubmitLock { _file: file })
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (\n  key TEXT PRIMARY KEY,\n  value TEXT\n);\n\nCREATE TABLE IF NOT EXISTS batch (\n  id TEXT PRIMARY KEY,\n  committed_at TEXT NOT NULL,\n  item_count INTEGER NOT NULL\n);\n\nCREATE TABLE IF NOT EXISTS record (\n  seq INTEGER PRIMARY KEY,\n  batch_id TEXT NOT NULL,\n  file_id TEXT NOT NULL,\n  category TEXT NOT NULL,\n  filename TEXT NOT NULL,\n  result TEXT NOT NULL,\n  is_error INTEGER NOT NULL DEFAULT 0,\n  image_data TEXT\n);\n\nCREATE INDEX IF NOT EXISTS idx_record_category ON record(category);",
        )
        .context("create schema")?;
        Ok(())
    }

    fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .context("set meta")?;
        Ok(())
    }

    fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                params![name],
                |row| row.get(0),
            )
            .context("check table")?;
        Ok(count > 0)
    }

    fn schema_version(conn: &Connection) -> Result<i64> {
        if !Self::table_exists(conn, "meta")? {
            return Ok(0);
        }
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key='schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("read schema_version")?;
        Ok(value.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0))
    }

    fn migrate(conn: &Connection) -> Result<()> {
        let version = Self::schema_version(conn)?;
        if version > SCHEMA_VERSION {
            anyhow::bail!(
                "store schema version {} is newer than supported {}",
                version,
                SCHEMA_VERSION
            );
        }
        if version == SCHEMA_VERSION {
            return Ok(());
        }
        Self::create_schema(conn)?;
        Self::set_meta(conn, "schema_version", &SCHEMA_VERSION.to_string())?;
        Ok(())
    }

    /// Make `batch` the only committed batch. Either every record lands or
    /// the previous batch is left as it was.
    pub fn replace_batch(&self, batch: &ResultBatch) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        let res = (|| -> Result<()> {
            self.conn.execute("DELETE FROM record", [])?;
            self.conn.execute("DELETE FROM batch", [])?;
            self.conn.execute(
                "INSERT INTO batch (id, committed_at, item_count) VALUES (?1, ?2, ?3)",
                params![batch.id, batch.committed_at, batch.len() as i64],
            )?;
            let mut stmt = self.conn.prepare(
                "INSERT INTO record (seq, batch_id, file_id, category, filename, result, is_error, image_data)\n                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (seq, record) in batch.records.iter().enumerate() {
                let result = serde_json::to_string(&record.result)
                    .with_context(|| format!("encode result for {}", record.file_id))?;
                stmt.execute(params![
                    seq as i64,
                    batch.id,
                    record.file_id,
                    record.category,
                    record.filename,
                    result,
                    record.result.error_message().is_some(),
                    record.image_data,
                ])?;
            }
            Ok(())
        })();

        if let Err(err) = res {
            self.conn.execute_batch("ROLLBACK")?;
            return Err(err).context("replace batch");
        }
        self.conn.execute_batch("COMMIT")?;
        tracing::debug!(batch = %batch.id, records = batch.len(), "stored batch");
        Ok(())
    }

    /// The committed batch, or an empty one if nothing was ever committed.
    pub fn load_batch(&self) -> Result<ResultBatch> {
        let header: Option<(String, String)> = self
            .conn
            .query_row("SELECT id, committed_at FROM batch LIMIT 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()
            .context("read batch")?;
        let Some((id, committed_at)) = header else {
            return Ok(ResultBatch::default());
        };

        let mut stmt = self.conn.prepare(
            "SELECT file_id, category, filename, result, image_data FROM record ORDER BY seq",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (file_id, category, filename, result, image_data) = row?;
            let result: RecordPayload = serde_json::from_str(&result)
                .with_context(|| format!("decode stored result for {file_id}"))?;
            records.push(ResultRecord {
                file_id,
                category,
                result,
                filename,
                image_data,
            });
        }
        Ok(ResultBatch {
            id,
            committed_at,
            records,
        })
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let header: Option<(String, String)> = self
            .conn
            .query_row("SELECT id, committed_at FROM batch LIMIT 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()
            .context("read batch")?;
        let (batch_id, committed_at) = header.unzip();

        let mut stmt = self.conn.prepare(
            "SELECT category, COUNT(*), SUM(is_error) FROM record GROUP BY category ORDER BY MIN(seq)",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CategoryCount {
                category: row.get(0)?,
                records: row.get(1)?,
                errors: row.get(2)?,
            })
        })?;
        let mut categories = Vec::new();
        for row in rows {
            categories.push(row?);
        }
        let record_count = categories.iter().map(|c| c.records).sum();
        let error_count = categories.iter().map(|c| c.errors).sum();
        let db_size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        Ok(StoreStats {
            batch_id,
            committed_at,
            record_count,
            error_count,
            categories,
            db_size_bytes,
        })
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            let path = lock.path.clone();
            let mode = lock.mode;
            drop(lock);
            if matches!(mode, StoreMode::ReadWrite) {
                let _ = fs::remove_file(path);
            }
        }
    }
}
