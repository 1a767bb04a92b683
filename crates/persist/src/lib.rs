//! Gantry persistence: SQLite store for local control-plane state between CLI runs.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use gantry_plane::PlaneState;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How many snapshots are kept per key.
pub const KEEP_PER_KEY: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneSnapshot {
    pub key: String,
    pub ts: i64,
    /// Serialized [`PlaneState`], zstd-compressed when the feature is enabled.
    pub state: Vec<u8>,
}

pub trait Store {
    fn put_state(&self, snap: PlaneSnapshot) -> Result<()>;
    fn get_state(&self, key: &str, limit: Option<usize>) -> Result<Vec<PlaneSnapshot>>;
}

/// Snapshot key for one account and region.
pub fn state_key(account_id: &str, region: &str) -> String {
    format!("{}/{}", account_id, region)
}

/// SQLite-backed store. Synchronous; the CLI touches it twice per run.
pub struct SqliteStore {
    db: std::sync::Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("GANTRY_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS plane_state (
                key   TEXT NOT NULL,
                ts    INTEGER NOT NULL,
                state BLOB NOT NULL
            )",
            [],
        )
        .context("creating plane_state table")?;
        db.execute("CREATE INDEX IF NOT EXISTS idx_plane_state_key_ts ON plane_state(key, ts DESC)", []).ok();
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(Self { db: std::sync::Mutex::new(db) })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.db.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }
}

impl Store for SqliteStore {
    fn put_state(&self, snap: PlaneSnapshot) -> Result<()> {
        let started = std::time::Instant::now();
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute("INSERT INTO plane_state(key, ts, state) VALUES (?1, ?2, ?3)", (&snap.key, snap.ts, &snap.state))?;
        tx.execute(
            "DELETE FROM plane_state
             WHERE key = ?1
               AND rowid NOT IN (
                   SELECT rowid FROM plane_state WHERE key = ?1 ORDER BY ts DESC, rowid DESC LIMIT ?2
               )",
            (&snap.key, KEEP_PER_KEY as i64),
        )?;
        tx.commit()?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn get_state(&self, key: &str, limit: Option<usize>) -> Result<Vec<PlaneSnapshot>> {
        let started = std::time::Instant::now();
        let cap = limit.unwrap_or(KEEP_PER_KEY);
        let db = self.conn()?;
        let mut stmt =
            db.prepare("SELECT ts, state FROM plane_state WHERE key = ?1 ORDER BY ts DESC, rowid DESC LIMIT ?2")?;
        let mut rows = stmt.query((key, cap as i64))?;
        let mut out: Vec<PlaneSnapshot> = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(PlaneSnapshot { key: key.to_string(), ts: row.get(0)?, state: row.get(1)? });
        }
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }
}

/// Serialize and store `state` under `key`.
pub fn save_plane(store: &dyn Store, key: &str, state: &PlaneState) -> Result<()> {
    let json = serde_json::to_vec(state).context("serializing plane state")?;
    debug!(key = %key, bytes = json.len(), "saving plane state");
    store.put_state(PlaneSnapshot { key: key.to_string(), ts: now_ts(), state: maybe_compress(&json) })
}

/// Latest stored state for `key`, if any.
pub fn load_plane(store: &dyn Store, key: &str) -> Result<Option<PlaneState>> {
    let Some(latest) = store.get_state(key, Some(1))?.into_iter().next() else {
        return Ok(None);
    };
    let json = maybe_decompress(&latest.state);
    let state = serde_json::from_slice(&json).with_context(|| format!("decoding plane state for {}", key))?;
    Ok(Some(state))
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".gantry");
        let _ = std::fs::create_dir_all(&p);
        p.push("gantry.db");
        return p.to_string_lossy().to_string();
    }
    "gantry.db".to_string()
}

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn maybe_compress(bytes: &[u8]) -> Vec<u8> {
    #[cfg(feature = "zstd")]
    {
        let lvl: i32 = std::env::var("GANTRY_ZSTD_LEVEL").ok().and_then(|s| s.parse().ok()).unwrap_or(3);
        return zstd::encode_all(bytes, lvl).unwrap_or_else(|_| bytes.to_vec());
    }
    bytes.to_vec()
}

pub fn maybe_decompress(blob: &[u8]) -> Vec<u8> {
    #[cfg(feature = "zstd")]
    {
        if let Ok(de) = zstd::decode_all(std::io::Cursor::new(blob)) {
            return de;
        }
    }
    blob.to_vec()
}
