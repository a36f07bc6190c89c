use warp::{hyper::StatusCode, reject::Reject};

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("an account with that username already exists")]
    UsernameAlreadyTaken,
    #[error("username or password incorrect")]
    LoginFailed,
    #[error("too many attempts, please try again later")]
    RateLimited,
    #[error("invalid or expired token")]
    InvalidToken {
        source: Option<jsonwebtoken::errors::Error>,
    },
    #[error("error during database operation")]
    DatabaseError {
        #[from]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("error hashing password")]
    HashError {
        #[from]
        source: argon2::Error,
    },
    #[error("error signing token")]
    TokenIssue { source: jsonwebtoken::errors::Error },
    #[error("background task failed")]
    TaskJoin {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl AuthError {
    pub fn invalid_token() -> Self {
        AuthError::InvalidToken { source: None }
    }

    /// Status code and client-facing message. Credential and token failures share
    /// one generic message each so responses cannot be used to probe accounts.
    pub fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AuthError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            AuthError::UsernameAlreadyTaken => {
                (StatusCode::CONFLICT, "Username already exists".into())
            }
            AuthError::LoginFailed => (StatusCode::UNAUTHORIZED, "Invalid credentials".into()),
            AuthError::InvalidToken { .. } => (StatusCode::UNAUTHORIZED, "Invalid token".into()),
            AuthError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            AuthError::DatabaseError { .. }
            | AuthError::HashError { .. }
            | AuthError::TokenIssue { .. }
            | AuthError::TaskJoin { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Server error".into())
            }
        }
    }
}

impl Reject for AuthError {}

#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Validation(String),
    #[error("invalid task id")]
    InvalidTaskId,
    #[error("task not found")]
    NotFound,
    #[error("error during database operation")]
    DatabaseError {
        #[from]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl TaskError {
    pub fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            TaskError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".into()),
            TaskError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            TaskError::InvalidTaskId => (StatusCode::BAD_REQUEST, "Invalid task ID".into()),
            TaskError::NotFound => (StatusCode::NOT_FOUND, "Task not found".into()),
            TaskError::DatabaseError { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Server error".into())
            }
        }
    }
}

impl Reject for TaskError {}

/// Failures reading a JSON request body. Every variant answers 400.
#[derive(thiserror::Error, Debug)]
pub enum BodyError {
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("request body is not valid JSON for this endpoint")]
    Malformed {
        #[from]
        source: serde_json::Error,
    },
    #[error("failed to read request body")]
    Read {
        #[from]
        source: warp::Error,
    },
}

impl Reject for BodyError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_do_not_leak_detail() {
        let (status, message) = AuthError::LoginFailed.status_and_message();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(message, "Invalid credentials");

        let db: Box<dyn std::error::Error + Send + Sync> = "connection refused".into();
        let (status, message) = AuthError::from(db).status_and_message();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "Server error");
    }

    #[test]
    fn validation_messages_are_specific() {
        let err = AuthError::Validation("password must be at least 8 characters long".into());
        assert_eq!(
            err.status_and_message(),
            (
                StatusCode::BAD_REQUEST,
                "password must be at least 8 characters long".to_string()
            )
        );
        assert_eq!(
            AuthError::RateLimited.status_and_message().0,
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn task_ownership_failures_look_like_missing_tasks() {
        assert_eq!(TaskError::NotFound.status_and_message().0, StatusCode::NOT_FOUND);
        assert_eq!(
            TaskError::Unauthorized.status_and_message().0,
            StatusCode::UNAUTHORIZED
        );
    }
}
