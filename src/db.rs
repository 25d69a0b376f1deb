use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

const MIGRATIONS: [&str; 3] = [
    include_str!("../migrations/001_create_subscriptions.sql"),
    include_str!("../migrations/002_create_shared_cache.sql"),
    include_str!("../migrations/003_create_delivery_queues.sql"),
];

/// Initialize database connection pool with recommended pragmas.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5))
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .foreign_keys(true);

    // An in-memory database lives and dies with its connection.
    let max_connections = if database_url.contains(":memory:") {
        1
    } else {
        10
    };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

/// Run database migrations. Every migration is idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for migration in MIGRATIONS {
        sqlx::raw_sql(migration).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) async fn setup_test_db() -> SqlitePool {
    let pool = init_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = setup_test_db().await;
        run_migrations(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        assert_eq!(
            tables,
            vec![
                "delivery_queues",
                "queue_messages",
                "shared_cache",
                "subscriptions"
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_topic_rejected() {
        let pool = setup_test_db().await;

        let result = sqlx::query(
            "INSERT INTO subscriptions (topic, subscriber_id, created_at_ms) VALUES ('', 'sub-1', 0)",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }
}
