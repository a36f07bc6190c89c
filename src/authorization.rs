//! Resource-side authorization: every request's bearer header is checked by the
//! auth service's `/verify` endpoint. Results may be cached briefly, never past the
//! token's own expiry.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use reqwest::{header::AUTHORIZATION, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};
use warp::{http::HeaderValue, Filter, Rejection};

use crate::{error::TaskError, routes::authorization_header, token::unix_now, types::UserID};

pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

#[derive(Debug, Deserialize)]
struct VerifyBody {
    #[serde(default = "valid_by_default")]
    valid: bool,
    user_id: i64,
    #[serde(default)]
    expires_at: Option<u64>,
}

fn valid_by_default() -> bool {
    true
}

pub struct AuthorizationClient {
    http: reqwest::Client,
    verify_url: Url,
    cache: Option<VerificationCache>,
}

impl AuthorizationClient {
    /// `cache_ttl` of zero turns caching off, so every request goes over the network.
    pub fn new(
        auth_service_url: &Url,
        timeout: Duration,
        cache_ttl: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        let cache = (!cache_ttl.is_zero())
            .then(|| VerificationCache::new(cache_ttl, DEFAULT_CACHE_CAPACITY));

        Ok(Self {
            http,
            verify_url: verify_url(auth_service_url),
            cache,
        })
    }

    pub async fn authorize(&self, auth_header: &str) -> Result<UserID, TaskError> {
        if let Some(user_id) = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get(auth_header, Instant::now()))
        {
            return Ok(user_id);
        }

        let response = self
            .http
            .get(self.verify_url.clone())
            .header(AUTHORIZATION, auth_header)
            .send()
            .await
            .map_err(|err| {
                warn!(error = %err, url = %self.verify_url, "auth service unreachable");
                TaskError::Unauthorized
            })?;

        if response.status() != StatusCode::OK {
            debug!(status = %response.status(), "token rejected by auth service");
            return Err(TaskError::Unauthorized);
        }

        let body = response.json::<VerifyBody>().await.map_err(|err| {
            warn!(error = %err, "undecodable verify response");
            TaskError::Unauthorized
        })?;

        if !body.valid {
            debug!("auth service reported token as invalid");
            return Err(TaskError::Unauthorized);
        }

        let user_id = UserID(body.user_id);
        if let (Some(cache), Some(expires_at)) = (&self.cache, body.expires_at) {
            cache.insert(auth_header, user_id, expires_at, Instant::now());
        }

        Ok(user_id)
    }
}

pub fn with_authorization(
    client: Arc<AuthorizationClient>,
) -> impl Filter<Extract = (UserID,), Error = Rejection> + Clone {
    authorization_header().and_then(move |header: Option<HeaderValue>| {
        let client = client.clone();
        async move {
            let header = header.ok_or(TaskError::Unauthorized)?;
            let header = header.to_str().map_err(|_| TaskError::Unauthorized)?;
            client
                .authorize(header)
                .await
                .map_err(warp::reject::custom)
        }
    })
}

fn verify_url(base: &Url) -> Url {
    let mut url = base.clone();
    let path = format!("{}/verify", base.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url
}

struct CachedUser {
    user_id: UserID,
    valid_until: Instant,
}

struct VerificationCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, CachedUser>>,
}

impl VerificationCache {
    fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &str, now: Instant) -> Option<UserID> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(cached) if cached.valid_until > now => Some(cached.user_id),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// `expires_at` is the token's expiry in unix seconds; the entry never outlives it.
    fn insert(&self, key: &str, user_id: UserID, expires_at: u64, now: Instant) {
        let remaining = Duration::from_secs(expires_at.saturating_sub(unix_now()));
        let lifetime = self.ttl.min(remaining);
        if lifetime.is_zero() {
            return;
        }

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(key) {
            entries.retain(|_, cached| cached.valid_until > now);
            if entries.len() >= self.capacity {
                debug!("verification cache full, not caching");
                return;
            }
        }

        entries.insert(
            key.to_string(),
            CachedUser {
                user_id,
                valid_until: now + lifetime,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::SocketAddr,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use serde_json::json;
    use warp::hyper::StatusCode as WarpStatus;

    use super::*;

    const FAR_FUTURE: u64 = 4_102_444_800; // 2100-01-01

    async fn stub_auth_service(
        status: WarpStatus,
        body: serde_json::Value,
        delay: Duration,
    ) -> (SocketAddr, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let route = warp::path!("verify")
            .and(warp::header::<String>("authorization"))
            .then(move |_header: String| {
                let body = body.clone();
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    warp::reply::with_status(warp::reply::json(&body), status)
                }
            });

        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        (addr, hits)
    }

    fn client(addr: SocketAddr, timeout: Duration, cache_ttl: Duration) -> AuthorizationClient {
        let base = Url::parse(&format!("http://{addr}")).unwrap();
        AuthorizationClient::new(&base, timeout, cache_ttl).unwrap()
    }

    #[tokio::test]
    async fn accepted_token_yields_user_id() {
        let (addr, _) = stub_auth_service(
            WarpStatus::OK,
            json!({"valid": true, "user_id": 5, "username": "alice01", "expires_at": FAR_FUTURE}),
            Duration::ZERO,
        )
        .await;

        let client = client(addr, Duration::from_secs(5), Duration::ZERO);
        assert_eq!(client.authorize("Bearer abc").await.unwrap(), UserID(5));
    }

    #[tokio::test]
    async fn rejected_or_malformed_responses_are_unauthorized() {
        let (denied, _) = stub_auth_service(
            WarpStatus::UNAUTHORIZED,
            json!("Invalid token"),
            Duration::ZERO,
        )
        .await;
        let (malformed, _) =
            stub_auth_service(WarpStatus::OK, json!({"valid": true}), Duration::ZERO).await;

        let (invalid, _) = stub_auth_service(
            WarpStatus::OK,
            json!({"valid": false, "user_id": 5}),
            Duration::ZERO,
        )
        .await;

        for addr in [denied, malformed, invalid] {
            let client = client(addr, Duration::from_secs(5), Duration::ZERO);
            assert!(matches!(
                client.authorize("Bearer abc").await,
                Err(TaskError::Unauthorized)
            ));
        }
    }

    #[tokio::test]
    async fn slow_auth_service_times_out() {
        let (addr, _) = stub_auth_service(
            WarpStatus::OK,
            json!({"user_id": 5, "expires_at": FAR_FUTURE}),
            Duration::from_secs(2),
        )
        .await;

        let client = client(addr, Duration::from_millis(100), Duration::ZERO);
        assert!(matches!(
            client.authorize("Bearer abc").await,
            Err(TaskError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn unreachable_auth_service_is_unauthorized() {
        // bind and drop to find a port nobody is listening on
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();

        let client = client(addr, Duration::from_secs(1), Duration::ZERO);
        assert!(matches!(
            client.authorize("Bearer abc").await,
            Err(TaskError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn cache_spares_repeat_round_trips() {
        let (addr, hits) = stub_auth_service(
            WarpStatus::OK,
            json!({"user_id": 9, "expires_at": FAR_FUTURE}),
            Duration::ZERO,
        )
        .await;

        let cached = client(addr, Duration::from_secs(5), Duration::from_secs(30));
        cached.authorize("Bearer abc").await.unwrap();
        cached.authorize("Bearer abc").await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // a different token is verified on its own
        cached.authorize("Bearer def").await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let uncached = client(addr, Duration::from_secs(5), Duration::ZERO);
        uncached.authorize("Bearer abc").await.unwrap();
        uncached.authorize("Bearer abc").await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn cache_entries_never_outlive_the_token() {
        let cache = VerificationCache::new(Duration::from_secs(30), 8);
        let now = Instant::now();

        cache.insert("expired", UserID(1), unix_now().saturating_sub(1), now);
        assert_eq!(cache.get("expired", now), None);

        cache.insert("soon", UserID(2), unix_now() + 2, now);
        assert_eq!(cache.get("soon", now), Some(UserID(2)));
        assert_eq!(cache.get("soon", now + Duration::from_secs(3)), None);

        cache.insert("later", UserID(3), FAR_FUTURE, now);
        assert_eq!(cache.get("later", now + Duration::from_secs(29)), Some(UserID(3)));
        assert_eq!(cache.get("later", now + Duration::from_secs(30)), None);
    }

    #[test]
    fn full_cache_drops_expired_entries_first() {
        let cache = VerificationCache::new(Duration::from_secs(30), 2);
        let now = Instant::now();

        cache.insert("a", UserID(1), FAR_FUTURE, now);
        cache.insert("b", UserID(2), FAR_FUTURE, now);
        cache.insert("c", UserID(3), FAR_FUTURE, now);
        assert_eq!(cache.get("c", now), None);

        let later = now + Duration::from_secs(31);
        cache.insert("c", UserID(3), FAR_FUTURE, later);
        assert_eq!(cache.get("c", later), Some(UserID(3)));
    }

    #[test]
    fn verify_url_appends_to_base_path() {
        let base = Url::parse("http://localhost:8080").unwrap();
        assert_eq!(verify_url(&base).as_str(), "http://localhost:8080/verify");

        let nested = Url::parse("http://gateway/auth/").unwrap();
        assert_eq!(verify_url(&nested).as_str(), "http://gateway/auth/verify");
    }
}
