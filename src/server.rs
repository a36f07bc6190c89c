//! Wiring for the two services: state, filters, CORS, request tracing and the
//! listening socket.

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info};
use warp::{Filter, Rejection, Reply};

use crate::{
    auth::{Auth, AuthConfig},
    authorization::AuthorizationClient,
    config::{AuthServiceSettings, CorsPolicy, TasksServiceSettings},
    routes::{build_api_route_filter, handle_rejection},
    sql_store::{MySqlTaskDatabase, SqliteUserDatabase},
    tasks::{build_task_route_filter, SharedTaskDatabase},
};

/// Auth endpoints with error translation, CORS and request spans applied.
pub fn auth_routes(
    auth: &Auth,
    cors: &CorsPolicy,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    build_api_route_filter(auth)
        .recover(handle_rejection)
        .with(cors.to_warp())
        .with(warp::trace::request())
}

/// Task endpoints with error translation, CORS and request spans applied.
pub fn task_routes(
    authorization: Arc<AuthorizationClient>,
    database: SharedTaskDatabase,
    cors: &CorsPolicy,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    build_task_route_filter(authorization, database)
        .recover(handle_rejection)
        .with(cors.to_warp())
        .with(warp::trace::request())
}

/// Periodically evict idle sources from the login throttle.
pub fn spawn_rate_limit_sweeper(auth: Auth, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // the first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let evicted = auth.sweep_rate_limits();
            if evicted > 0 {
                debug!(evicted, "swept idle rate limit entries");
            }
        }
    })
}

/// # Errors
/// Returns an error if the user database cannot be opened or the listening socket
/// cannot be bound.
pub async fn run_auth_service(
    settings: AuthServiceSettings,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let users = SqliteUserDatabase::open(&settings.database_path)
        .await
        .map_err(|err| anyhow::anyhow!(err))
        .with_context(|| {
            format!("failed to open user database {}", settings.database_path.display())
        })?;

    let mut config = AuthConfig::new(settings.jwt_secret, Arc::new(Mutex::new(users)));
    config.rate_limit = settings.rate_limit.clone();
    config.trust_forwarded_headers = settings.trust_forwarded_headers;

    let auth = Auth::new(config).context("failed to initialize auth state")?;
    let sweeper = spawn_rate_limit_sweeper(auth.clone(), settings.rate_limit.window);

    let routes = auth_routes(&auth, &settings.cors);
    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(settings.listen, shutdown)
        .with_context(|| format!("failed to bind {}", settings.listen))?;

    info!(%addr, cors = ?settings.cors, "auth service listening");
    server.await;
    sweeper.abort();
    info!("auth service stopped");

    Ok(())
}

/// # Errors
/// Returns an error if the database is unreachable, the HTTP client cannot be
/// built or the socket cannot be bound.
pub async fn run_tasks_service(
    settings: TasksServiceSettings,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let authorization = AuthorizationClient::new(
        &settings.auth_service_url,
        settings.verify_timeout,
        settings.verify_cache_ttl,
    )
    .context("failed to build auth service client")?;

    let tasks = MySqlTaskDatabase::connect(settings.database.connect_options())
        .await
        .map_err(|err| anyhow::anyhow!(err))
        .with_context(|| format!("failed to connect to task database {}", settings.database))?;
    info!(database = %settings.database, "connected to task database");

    let database: SharedTaskDatabase = Arc::new(Mutex::new(tasks));
    let routes = task_routes(Arc::new(authorization), database, &settings.cors);

    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(settings.listen, shutdown)
        .with_context(|| format!("failed to bind {}", settings.listen))?;

    info!(
        %addr,
        auth_service = %settings.auth_service_url,
        cors = ?settings.cors,
        "tasks service listening"
    );
    server.await;
    info!("tasks service stopped");

    Ok(())
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // no signal handler available: run until killed
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
