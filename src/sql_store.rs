//! SQL-backed storage: accounts in SQLite, tasks in MySQL. Each store creates its
//! table on connect if it does not exist yet.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use sqlx::{
    mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow},
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use tracing::{debug, info};

use crate::{
    store::{StoreResult, TaskDatabase, UserDatabase},
    types::{HashedPassword, Task, TaskUpdate, UserID, Username, DEFAULT_TASK_STATUS},
};

const CREATE_USERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT UNIQUE NOT NULL,
    password TEXT NOT NULL
)";

const CREATE_TASKS_TABLE: &str = "CREATE TABLE IF NOT EXISTS tasks (
    id BIGINT AUTO_INCREMENT PRIMARY KEY,
    user_id BIGINT NOT NULL,
    title VARCHAR(255) NOT NULL,
    description TEXT,
    status VARCHAR(50) DEFAULT 'pending',
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
    INDEX idx_tasks_user_id (user_id)
)";

const TASK_COLUMNS: &str = "id, user_id, title, description, status, created_at, updated_at";

pub struct SqliteUserDatabase {
    pool: SqlitePool,
}

impl SqliteUserDatabase {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "opened user database");
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::query(CREATE_USERS_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl UserDatabase for SqliteUserDatabase {
    async fn create_user(
        &mut self,
        username: &Username,
        hashed_password: &HashedPassword,
    ) -> StoreResult<Option<UserID>> {
        let result = sqlx::query("INSERT INTO users (username, password) VALUES (?, ?)")
            .bind(&username.0)
            .bind(&hashed_password.0)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) => Ok(Some(UserID(done.last_insert_rowid()))),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                debug!(username = %username.0, "username already taken");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn retrieve_user(
        &self,
        username: &Username,
    ) -> StoreResult<Option<(UserID, HashedPassword)>> {
        let row = sqlx::query("SELECT id, password FROM users WHERE username = ?")
            .bind(&username.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some((
            UserID(row.try_get("id")?),
            HashedPassword(row.try_get("password")?),
        )))
    }
}

pub struct MySqlTaskDatabase {
    pool: MySqlPool,
}

impl MySqlTaskDatabase {
    pub async fn connect(options: MySqlConnectOptions) -> StoreResult<Self> {
        let pool = MySqlPoolOptions::new()
            .min_connections(1)
            .max_connections(10)
            .max_lifetime(Duration::from_secs(30 * 60))
            .test_before_acquire(true)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: MySqlPool) -> StoreResult<Self> {
        sqlx::query(CREATE_TASKS_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }

    async fn fetch_owned(&self, task_id: i64, user_id: UserID) -> StoreResult<Option<Task>> {
        let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ? AND user_id = ?");
        let row = sqlx::query(&query)
            .bind(task_id)
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(task_from_row).transpose()?)
    }
}

fn task_from_row(row: &MySqlRow) -> Result<Task, sqlx::Error> {
    Ok(Task {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        description: row
            .try_get::<Option<String>, _>("description")?
            .unwrap_or_default(),
        status: row
            .try_get::<Option<String>, _>("status")?
            .unwrap_or_else(|| DEFAULT_TASK_STATUS.to_string()),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl TaskDatabase for MySqlTaskDatabase {
    async fn list_tasks(&self, user_id: UserID) -> StoreResult<Vec<Task>> {
        let query = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ? ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id.0)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(task_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn create_task(
        &mut self,
        user_id: UserID,
        title: &str,
        description: &str,
    ) -> StoreResult<Task> {
        let done = sqlx::query(
            "INSERT INTO tasks (user_id, title, description, status) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id.0)
        .bind(title)
        .bind(description)
        .bind(DEFAULT_TASK_STATUS)
        .execute(&self.pool)
        .await?;

        let task_id = i64::try_from(done.last_insert_id())?;
        self.fetch_owned(task_id, user_id)
            .await?
            .ok_or_else(|| format!("task {task_id} vanished after insert").into())
    }

    async fn update_task(
        &mut self,
        task_id: i64,
        user_id: UserID,
        update: &TaskUpdate,
    ) -> StoreResult<Option<Task>> {
        // empty strings keep the stored value, like absent fields
        sqlx::query(
            "UPDATE tasks SET \
                title = COALESCE(NULLIF(?, ''), title), \
                description = COALESCE(NULLIF(?, ''), description), \
                status = COALESCE(NULLIF(?, ''), status), \
                updated_at = CURRENT_TIMESTAMP \
             WHERE id = ? AND user_id = ?",
        )
        .bind(update.title.as_deref())
        .bind(update.description.as_deref())
        .bind(update.status.as_deref())
        .bind(task_id)
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;

        self.fetch_owned(task_id, user_id).await
    }

    async fn delete_task(&mut self, task_id: i64, user_id: UserID) -> StoreResult<bool> {
        let done = sqlx::query("DELETE FROM tasks WHERE id = ? AND user_id = ?")
            .bind(task_id)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;

        Ok(done.rows_affected() > 0)
    }
}
