/// Database schema for the SQLite-backed stores.
use sqlx::SqlitePool;

/// Run the embedded migrations. Safe to call on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Open (creating if needed) a database file and migrate it.
pub async fn open_database(path: &std::path::Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let url = format!("sqlite:{}?mode=rwc", path.display());
    let pool = SqlitePool::connect(&url).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database, migrated. Every connection to
/// `sqlite::memory:` is a separate database, hence the pool size of one.
pub async fn open_in_memory() -> anyhow::Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = open_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in ["conversations", "memories", "passages"] {
            assert!(names.contains(&expected), "missing {expected}: {names:?}");
        }
    }

    #[tokio::test]
    async fn file_database_is_created_with_parents() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("lore.db");
        let pool = open_database(&path).await.unwrap();
        pool.close().await;
        assert!(path.exists());
    }
}
