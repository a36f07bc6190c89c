use std::{convert::Infallible, sync::Arc};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;
use warp::{hyper::StatusCode, path, Filter, Rejection, Reply};

use crate::{
    authorization::{with_authorization, AuthorizationClient},
    error::TaskError,
    routes::json_body,
    store::TaskDatabase,
    types::{TaskUpdate, UserID},
};

pub type SharedTaskDatabase = Arc<Mutex<dyn TaskDatabase>>;

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

pub fn build_task_route_filter(
    authorization: Arc<AuthorizationClient>,
    database: SharedTaskDatabase,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let list = path!("tasks")
        .and(warp::get())
        .and(with_authorization(authorization.clone()))
        .and(with_database(database.clone()))
        .and_then(list_tasks);

    let create = path!("tasks")
        .and(warp::post())
        .and(with_authorization(authorization.clone()))
        .and(json_body())
        .and(with_database(database.clone()))
        .and_then(create_task);

    let update = path!("tasks" / String)
        .and(warp::put())
        .and(with_authorization(authorization.clone()))
        .and(json_body())
        .and(with_database(database.clone()))
        .and_then(update_task);

    let delete = path!("tasks" / String)
        .and(warp::delete())
        .and(with_authorization(authorization))
        .and(with_database(database))
        .and_then(delete_task);

    let options = warp::options()
        .and(path!("tasks"))
        .map(warp::reply)
        .or(warp::options()
            .and(path!("tasks" / String))
            .map(|_task_id: String| warp::reply()));

    list.or(create).or(update).or(delete).or(options)
}

async fn list_tasks(user_id: UserID, database: SharedTaskDatabase) -> Result<impl Reply, Rejection> {
    let tasks = database
        .lock()
        .await
        .list_tasks(user_id)
        .await
        .map_err(TaskError::from)?;

    Ok(warp::reply::json(&tasks))
}

async fn create_task(
    user_id: UserID,
    input: CreateTaskRequest,
    database: SharedTaskDatabase,
) -> Result<impl Reply, Rejection> {
    if input.title.trim().is_empty() {
        return Err(TaskError::Validation("title must not be empty".into()).into());
    }

    let task = database
        .lock()
        .await
        .create_task(user_id, &input.title, &input.description)
        .await
        .map_err(TaskError::from)?;

    info!(user_id = user_id.0, task_id = task.id, "created task");

    Ok(warp::reply::with_status(
        warp::reply::json(&task),
        StatusCode::CREATED,
    ))
}

async fn update_task(
    task_id: String,
    user_id: UserID,
    update: TaskUpdate,
    database: SharedTaskDatabase,
) -> Result<impl Reply, Rejection> {
    let task_id = parse_task_id(&task_id)?;

    let task = database
        .lock()
        .await
        .update_task(task_id, user_id, &update)
        .await
        .map_err(TaskError::from)?
        .ok_or(TaskError::NotFound)?;

    Ok(warp::reply::json(&task))
}

async fn delete_task(
    task_id: String,
    user_id: UserID,
    database: SharedTaskDatabase,
) -> Result<impl Reply, Rejection> {
    let task_id = parse_task_id(&task_id)?;

    let deleted = database
        .lock()
        .await
        .delete_task(task_id, user_id)
        .await
        .map_err(TaskError::from)?;

    if !deleted {
        return Err(TaskError::NotFound.into());
    }

    info!(user_id = user_id.0, task_id, "deleted task");
    Ok(StatusCode::NO_CONTENT)
}

fn parse_task_id(raw: &str) -> Result<i64, TaskError> {
    raw.parse().map_err(|_| TaskError::InvalidTaskId)
}

fn with_database(
    database: SharedTaskDatabase,
) -> impl Filter<Extract = (SharedTaskDatabase,), Error = Infallible> + Clone {
    warp::any().map(move || database.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_must_be_numeric() {
        assert_eq!(parse_task_id("42").unwrap(), 42);
        assert!(matches!(parse_task_id("abc"), Err(TaskError::InvalidTaskId)));
        assert!(matches!(parse_task_id(""), Err(TaskError::InvalidTaskId)));
    }
}
