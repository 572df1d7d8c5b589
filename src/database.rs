use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::str::FromStr;
use tracing::info;

pub type DbPool = Pool<Sqlite>;

#[cfg(test)]
pub const MEMORY_DATABASE_URL: &str = "sqlite::memory:";

pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    info!("Connecting to database: {}", database_url);

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    // 内存数据库每个连接都是独立的库，只能使用单连接
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub async fn init_database(pool: &DbPool) -> Result<(), sqlx::Error> {
    // 创建用户表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('admin', 'user', 'pending')),
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 创建用户组表，成员与权限以 JSON 文本存储
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS groups (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            user_ids TEXT NOT NULL DEFAULT '[]',
            permissions TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 创建工具表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tools (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            content TEXT NOT NULL,
            specs TEXT NOT NULL DEFAULT '[]',
            meta TEXT NOT NULL DEFAULT '{}',
            valves TEXT,
            access_control TEXT,
            updated_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 创建用户级 valves 表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tool_user_valves (
            tool_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            valves TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (tool_id, user_id),
            FOREIGN KEY (tool_id) REFERENCES tools (id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 创建索引
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tools_user_id ON tools (user_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tools_updated_at ON tools (updated_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tool_user_valves_user_id ON tool_user_valves (user_id)")
        .execute(pool)
        .await?;

    Ok(())
}
