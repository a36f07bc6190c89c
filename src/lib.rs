mod auth;
mod authorization;
mod case_insensitive_string_ext;
pub mod cli;
pub mod config;
mod error;
pub mod password;
pub mod rate_limit;
mod routes;
pub mod server;
mod sql_store;
mod store;
mod tasks;
pub mod telemetry;
pub mod token;
mod types;

pub use auth::*;
pub use authorization::*;
pub use error::*;
pub use routes::*;
pub use sql_store::*;
pub use store::*;
pub use tasks::*;
pub use types::*;
