//! Migration runner.
//!
//! Append-only numbered SQL files, embedded at compile time. Each file is
//! applied at most once, in one transaction, and recorded in
//! `_migrations(name unique)`.

use sqlx::PgPool;
use tracing::info;

use crate::error::StoreError;

/// Ordered migration list. Append only — never edit an applied file.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_init.sql",
        include_str!("../../../migrations/0001_init.sql"),
    ),
    (
        "0002_leaderboard.sql",
        include_str!("../../../migrations/0002_leaderboard.sql"),
    ),
    (
        "0003_event_applied.sql",
        include_str!("../../../migrations/0003_event_applied.sql"),
    ),
];

pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(pool)
    .await?;

    for (name, sql) in MIGRATIONS {
        let applied: Option<(String,)> =
            sqlx::query_as("SELECT name FROM _migrations WHERE name = $1")
                .bind(name)
                .fetch_optional(pool)
                .await?;
        if applied.is_some() {
            continue;
        }

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO _migrations (name) VALUES ($1)")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("Applied migration {}", name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_numbered_and_ordered() {
        let mut names: Vec<&str> = MIGRATIONS.iter().map(|(name, _)| *name).collect();
        let sorted = {
            let mut s = names.clone();
            s.sort();
            s
        };
        assert_eq!(names, sorted);
        names.dedup();
        assert_eq!(names.len(), MIGRATIONS.len());
    }

    #[test]
    fn migration_files_are_non_empty() {
        for (name, sql) in MIGRATIONS {
            assert!(!sql.trim().is_empty(), "{} is empty", name);
        }
    }
}
