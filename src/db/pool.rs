//! Database connection pool

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Create a new SQLite connection pool
pub async fn create_pool(database_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let in_memory = database_path.contains(":memory:");

    // Ensure parent directory exists
    if !in_memory {
        if let Some(parent) = Path::new(database_path.trim_start_matches("sqlite://")).parent() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let mut options = SqliteConnectOptions::from_str(database_path)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    // A shared in-memory database must stay on one connection
    let max_connections = if in_memory { 1 } else { 10 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Run database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // All migration files in order
    let migrations = [include_str!("../../migrations/001_initial_schema.sql")];

    for migration_sql in migrations {
        for stmt in parse_sql_statements(migration_sql) {
            let stmt = stmt.trim();
            if stmt.is_empty() || stmt.starts_with("PRAGMA") {
                continue;
            }

            if let Err(e) = sqlx::query(stmt).execute(pool).await {
                if !e.to_string().contains("already exists") {
                    tracing::error!(
                        statement = &stmt[..stmt.len().min(50)],
                        error = %e,
                        "Migration statement failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}

/// Parse SQL statements, properly handling parentheses in CREATE TABLE
fn parse_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut paren_depth: i32 = 0;
    let mut in_string = false;
    let mut in_line_comment = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '-' && chars.peek() == Some(&'-') && !in_string {
            in_line_comment = true;
            continue;
        }
        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
                current.push(c);
            }
            continue;
        }

        match c {
            '\'' => {
                in_string = !in_string;
                current.push(c);
            }
            '(' if !in_string => {
                paren_depth += 1;
                current.push(c);
            }
            ')' if !in_string => {
                paren_depth = (paren_depth - 1).max(0);
                current.push(c);
            }
            ';' if !in_string && paren_depth == 0 => {
                let stmt = current.trim().to_string();
                if !stmt.is_empty() {
                    statements.push(stmt);
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }

    let stmt = current.trim().to_string();
    if !stmt.is_empty() {
        statements.push(stmt);
    }

    statements
}

/// Initialize database - create pool and run migrations
pub async fn init_database(database_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = create_pool(database_path).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
