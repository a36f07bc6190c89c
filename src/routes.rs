use std::{
    convert::Infallible,
    net::{IpAddr, Ipv6Addr, SocketAddr},
    sync::Arc,
};

use futures_util::{Stream, TryStreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use warp::{
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue},
    hyper::{body::Buf, StatusCode},
    path, Filter, Rejection, Reply,
};

use crate::{
    auth::{Auth, AuthInternal},
    error::{AuthError, BodyError, TaskError},
    token::bearer_token,
    types::UserView,
};

/// Largest request body the JSON endpoints will read.
pub const MAX_BODY_BYTES: u64 = 16 * 1024;

pub fn build_api_route_filter(
    auth: &Auth,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let register = path!("register")
        .and(warp::post())
        .and(throttled(auth.internal.clone()))
        .and(json_body::<CredentialsRequest>())
        .and(with_auth_state(auth.internal.clone()))
        .and_then(user_register);

    let login = path!("login")
        .and(warp::post())
        .and(throttled(auth.internal.clone()))
        .and(json_body::<CredentialsRequest>())
        .and(with_auth_state(auth.internal.clone()))
        .and_then(user_login);

    let verify = path!("verify")
        .and(warp::get())
        .and(authorization_header())
        .and(with_auth_state(auth.internal.clone()))
        .and_then(user_verify);

    // preflights carrying an Origin are answered by the CORS wrapper before reaching this
    let options = warp::options()
        .and(
            path!("register")
                .or(path!("login"))
                .unify()
                .or(path!("verify"))
                .unify(),
        )
        .map(warp::reply);

    register.or(login).or(verify).or(options)
}

/// Translates both services' rejections into status codes and plain-text messages.
/// Anything not recognised falls through to warp's defaults.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    let (status, message) = if let Some(auth_error) = err.find::<AuthError>() {
        let (status, message) = auth_error.status_and_message();
        if status.is_server_error() {
            error!(error = ?auth_error, "auth request failed");
        } else {
            debug!(error = %auth_error, %status, "auth request rejected");
        }
        (status, message)
    } else if let Some(task_error) = err.find::<TaskError>() {
        let (status, message) = task_error.status_and_message();
        if status.is_server_error() {
            error!(error = ?task_error, "task request failed");
        } else {
            debug!(error = %task_error, %status, "task request rejected");
        }
        (status, message)
    } else if let Some(body_error) = err.find::<BodyError>() {
        debug!(error = %body_error, "unreadable request body");
        (StatusCode::BAD_REQUEST, "Invalid request".to_string())
    } else {
        return Err(err);
    };

    Ok(warp::reply::with_status(message, status))
}

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub user: UserView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub user_id: i64,
    pub username: String,
    pub expires_at: u64,
}

async fn user_register(
    source: String,
    input: CredentialsRequest,
    auth: Arc<AuthInternal>,
) -> Result<impl Reply, Rejection> {
    info!(client = %source, username = %input.username, "register attempt");

    let identity = auth.register(input.username, input.password).await?;
    let token = auth.generate_token(&identity)?;

    let response = TokenResponse {
        token,
        user: UserView::from(&identity),
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&response),
        StatusCode::CREATED,
    ))
}

async fn user_login(
    source: String,
    input: CredentialsRequest,
    auth: Arc<AuthInternal>,
) -> Result<impl Reply, Rejection> {
    info!(client = %source, username = %input.username, "login attempt");

    let identity = auth.login(input.username, input.password).await?;
    let token = auth.generate_token(&identity)?;

    info!(user_id = identity.user_id.0, "login succeeded");

    Ok(warp::reply::json(&TokenResponse {
        token,
        user: UserView::from(&identity),
    }))
}

// Unwrap the bearer token and validate it
async fn user_verify(
    header: Option<HeaderValue>,
    auth: Arc<AuthInternal>,
) -> Result<impl Reply, Rejection> {
    let header = header.ok_or_else(AuthError::invalid_token)?;
    let header = header.to_str().map_err(|_| AuthError::invalid_token())?;
    let token = bearer_token(header)?;

    let verified = auth.verify_token(token)?;

    Ok(warp::reply::json(&VerifyResponse {
        valid: true,
        user_id: verified.identity.user_id.0,
        username: verified.identity.username.0,
        expires_at: verified.expires_at,
    }))
}

// charges the caller's source one attempt before anything else is looked at
fn throttled(
    auth: Arc<AuthInternal>,
) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    client_source(auth.trust_forwarded_headers)
        .and(with_auth_state(auth))
        .and_then(|source: String, auth: Arc<AuthInternal>| async move {
            match auth.rate_limiter().check_and_record(&source) {
                Ok(()) => Ok(source),
                Err(err) => {
                    warn!(client = %source, "rate limit exceeded");
                    Err(warp::reject::custom(err))
                }
            }
        })
}

fn client_source(
    trust_forwarded_headers: bool,
) -> impl Filter<Extract = (String,), Error = Infallible> + Clone {
    warp::header::headers_cloned()
        .and(warp::addr::remote())
        .map(move |headers: HeaderMap, remote: Option<SocketAddr>| {
            let forwarded = trust_forwarded_headers
                .then(|| {
                    resolve_forwarded(
                        header_text(&headers, "x-forwarded-for"),
                        header_text(&headers, "x-real-ip"),
                    )
                })
                .flatten();

            forwarded.unwrap_or_else(|| {
                remote
                    .map(|addr| source_key(addr.ip()))
                    .unwrap_or_else(|| "unknown".to_string())
            })
        })
}

// unreadable values count as absent
fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn resolve_forwarded(forwarded_for: Option<&str>, real_ip: Option<&str>) -> Option<String> {
    forwarded_for
        .and_then(|value| value.split(',').next())
        .or(real_ip)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| match value.parse::<IpAddr>() {
            Ok(ip) => source_key(ip),
            Err(_) => value.to_string(),
        })
}

// one IPv6 holder usually controls a whole /64, so that is the unit throttled
fn source_key(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => {
                let prefix = u128::from(v6) & !(u128::from(u64::MAX));
                format!("{}/64", Ipv6Addr::from(prefix))
            }
        },
    }
}

/// The raw `Authorization` header, if present. Values that are not visible ASCII
/// are left for the handler to reject as unauthorized.
pub(crate) fn authorization_header(
) -> impl Filter<Extract = (Option<HeaderValue>,), Error = Infallible> + Clone {
    warp::header::headers_cloned().map(|headers: HeaderMap| headers.get(AUTHORIZATION).cloned())
}

/// Decode a JSON body of at most [`MAX_BODY_BYTES`]. Chunked bodies are accepted;
/// reading stops as soon as the limit is crossed.
pub(crate) fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Send,
{
    warp::body::stream().and_then(|body| async move {
        let bytes = read_limited(body, MAX_BODY_BYTES).await?;
        serde_json::from_slice::<T>(&bytes)
            .map_err(|source| warp::reject::custom(BodyError::from(source)))
    })
}

async fn read_limited<S, B>(body: S, limit: u64) -> Result<Vec<u8>, BodyError>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    let mut body = Box::pin(body);
    let mut bytes = Vec::new();

    while let Some(mut chunk) = body.try_next().await? {
        if (bytes.len() + chunk.remaining()) as u64 > limit {
            return Err(BodyError::TooLarge { limit });
        }
        while chunk.has_remaining() {
            let part = chunk.chunk();
            let read = part.len();
            bytes.extend_from_slice(part);
            chunk.advance(read);
        }
    }

    Ok(bytes)
}

// functor that adds a reference to the internal auth state into the filter chain
fn with_auth_state(
    auth: Arc<AuthInternal>,
) -> impl Filter<Extract = (Arc<AuthInternal>,), Error = Infallible> + Clone {
    warp::any().map(move || auth.clone())
}
