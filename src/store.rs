//! Storage collaborators. Both services reach persistence only through these
//! traits. The in-memory implementations back the tests; `sql_store` backs the
//! binaries.

use std::{collections::HashMap, error::Error};

use async_trait::async_trait;
use chrono::Utc;

use crate::types::{
    HashedPassword, Task, TaskUpdate, UserID, Username, DEFAULT_TASK_STATUS,
};

pub type StoreResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[async_trait]
pub trait UserDatabase: Send + Sync + 'static {
    /// Create the user and return the id assigned to it, or `None` if a user with
    /// the given username already exists.
    async fn create_user(
        &mut self,
        username: &Username,
        hashed_password: &HashedPassword,
    ) -> StoreResult<Option<UserID>>;

    /// Retrieve the user id and hashed password of the user with the specified
    /// username, if there is one.
    async fn retrieve_user(
        &self,
        username: &Username,
    ) -> StoreResult<Option<(UserID, HashedPassword)>>;
}

#[async_trait]
pub trait TaskDatabase: Send + Sync + 'static {
    /// All tasks owned by `user_id`, newest first.
    async fn list_tasks(&self, user_id: UserID) -> StoreResult<Vec<Task>>;

    async fn create_task(
        &mut self,
        user_id: UserID,
        title: &str,
        description: &str,
    ) -> StoreResult<Task>;

    /// Apply `update` to the task if it exists and belongs to `user_id`.
    async fn update_task(
        &mut self,
        task_id: i64,
        user_id: UserID,
        update: &TaskUpdate,
    ) -> StoreResult<Option<Task>>;

    /// Returns whether a task owned by `user_id` was deleted.
    async fn delete_task(&mut self, task_id: i64, user_id: UserID) -> StoreResult<bool>;
}

#[derive(Default)]
pub struct MemoryUserDatabase {
    storage: HashMap<String, (UserID, HashedPassword)>,
    next_id: i64,
}

impl MemoryUserDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDatabase for MemoryUserDatabase {
    async fn create_user(
        &mut self,
        username: &Username,
        hashed_password: &HashedPassword,
    ) -> StoreResult<Option<UserID>> {
        if self.storage.contains_key(&username.0) {
            return Ok(None);
        }

        self.next_id += 1;
        let user_id = UserID(self.next_id);
        self.storage
            .insert(username.0.clone(), (user_id, hashed_password.clone()));

        Ok(Some(user_id))
    }

    async fn retrieve_user(
        &self,
        username: &Username,
    ) -> StoreResult<Option<(UserID, HashedPassword)>> {
        Ok(self.storage.get(&username.0).cloned())
    }
}

#[derive(Default)]
pub struct MemoryTaskDatabase {
    tasks: HashMap<i64, Task>,
    next_id: i64,
}

impl MemoryTaskDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskDatabase for MemoryTaskDatabase {
    async fn list_tasks(&self, user_id: UserID) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|task| task.user_id == user_id.0)
            .cloned()
            .collect();

        tasks.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        Ok(tasks)
    }

    async fn create_task(
        &mut self,
        user_id: UserID,
        title: &str,
        description: &str,
    ) -> StoreResult<Task> {
        self.next_id += 1;
        let now = Utc::now();
        let task = Task {
            id: self.next_id,
            user_id: user_id.0,
            title: title.to_string(),
            description: description.to_string(),
            status: DEFAULT_TASK_STATUS.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.tasks.insert(task.id, task.clone());

        Ok(task)
    }

    async fn update_task(
        &mut self,
        task_id: i64,
        user_id: UserID,
        update: &TaskUpdate,
    ) -> StoreResult<Option<Task>> {
        let Some(task) = self
            .tasks
            .get_mut(&task_id)
            .filter(|task| task.user_id == user_id.0)
        else {
            return Ok(None);
        };

        update.apply(task);
        task.updated_at = Utc::now();

        Ok(Some(task.clone()))
    }

    async fn delete_task(&mut self, task_id: i64, user_id: UserID) -> StoreResult<bool> {
        match self.tasks.get(&task_id) {
            Some(task) if task.user_id == user_id.0 => {
                self.tasks.remove(&task_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
