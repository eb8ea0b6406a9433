//! Sqlite-backed existing-tile index. Content-addressed with `blake3`: the
//! hash column lets a future run recognize that a tile changed upstream
//! even if its `(service, z, x, y)` key already exists, though the current
//! dedup check (`engine::dedup`) only consults the key.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use tile_download_shared::TileKey;

pub async fn open(database_url: &str) -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new().max_connections(4).connect(database_url).await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tiles (
            service_name TEXT NOT NULL,
            z INTEGER NOT NULL,
            x INTEGER NOT NULL,
            y INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            byte_length INTEGER NOT NULL,
            PRIMARY KEY (service_name, z, x, y)
        )",
    )
    .execute(&pool)
    .await?;
    Ok(pool)
}

pub async fn load_existing_keys(pool: &SqlitePool) -> anyhow::Result<HashSet<TileKey>> {
    let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as("SELECT service_name, z, x, y FROM tiles").fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|(service_name, z, x, y)| TileKey {
            service_name,
            z: z as u32,
            x: x as u64,
            y: y as u64,
        })
        .collect())
}

pub async fn record_tile(pool: &SqlitePool, key: &TileKey, bytes: &[u8]) -> anyhow::Result<()> {
    let content_hash = blake3::hash(bytes).to_hex().to_string();
    sqlx::query(
        "INSERT OR REPLACE INTO tiles (service_name, z, x, y, content_hash, byte_length) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&key.service_name)
    .bind(key.z as i64)
    .bind(key.x as i64)
    .bind(key.y as i64)
    .bind(content_hash)
    .bind(bytes.len() as i64)
    .execute(pool)
    .await?;
    Ok(())
}
