//! DuckDB storage layer for mnemo.
//!
//! Persists tenant key-hierarchy records (salt + wrapped DEK) and encrypted
//! content fields. Everything user-supplied is stored only as sealed
//! `(ciphertext, nonce, tag)` triples; this crate never touches keys or
//! plaintext.

mod envelope_store;
mod error;

pub use envelope_store::EnvelopeStore;
pub use error::{StorageError, StorageResult};

/// Open a DuckDB connection with stale WAL recovery and resource limits.
///
/// If the initial open fails and a `.wal` file exists alongside the
/// database, it is removed and the open is retried once — an unclean
/// shutdown can leave a WAL file that prevents reopening.
///
/// `memory_limit` and `threads` cap per-database resource usage (DuckDB
/// defaults to ~80% of system RAM and all cores).
pub fn open_duckdb(
    path: &std::path::Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<duckdb::Connection> {
    let conn = match duckdb::Connection::open(path) {
        Ok(c) => c,
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() && std::fs::remove_file(&wal_path).is_ok() {
                let c = duckdb::Connection::open(path)?;
                apply_resource_limits(&c, memory_limit, threads)?;
                return Ok(c);
            }
            return Err(first_err.into());
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

fn apply_resource_limits(
    conn: &duckdb::Connection,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{memory_limit}'; PRAGMA threads={threads};"
    ))?;
    Ok(())
}
