//! HTTPS enforcement for frontend servers.
//!
//! Only active on a server (staging / production), where TLS terminates at the load
//! balancer and the original scheme arrives in `X-Forwarded-Proto`.
//!
//! Policy:
//! - Exception paths (health checks, internal routes called over plain HTTP) and
//!   non-server environments pass through untouched.
//! - Plain-HTTP GET/HEAD requests get a 301 to the HTTPS URL.
//! - Any other plain-HTTP method gets a bodiless 403. Those requests should only
//!   ever follow a GET, which was already redirected.
//! - Everything else continues, and the response carries HSTS for 12 hours,
//!   subdomains included, no preload.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{OriginalUri, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};

use crate::config::AppEnv;
use crate::error::AppError;

pub const HSTS_HEADER_VALUE: &str = "max-age=43200; includeSubdomains";

const FORWARDED_PROTO: &str = "x-forwarded-proto";

#[derive(Clone, Debug)]
pub struct SecureTransport {
    env: AppEnv,
    exception_paths: Arc<[String]>,
}

impl SecureTransport {
    pub fn new<S: AsRef<str>>(env: AppEnv, exception_paths: &[S]) -> Self {
        Self {
            env,
            exception_paths: exception_paths
                .iter()
                .map(|p| p.as_ref().to_string())
                .collect(),
        }
    }

    /// Exact match against the full original URL (path plus query).
    pub fn is_exception(&self, original_url: &str) -> bool {
        self.exception_paths.iter().any(|p| p == original_url)
    }

    pub fn is_enforced(&self, original_url: &str) -> bool {
        self.env.is_on_server() && !self.is_exception(original_url)
    }
}

pub fn apply<S>(router: Router<S>, secure: SecureTransport) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(secure, enforce_https))
}

pub async fn enforce_https(
    State(secure): State<SecureTransport>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let original_uri = req
        .extensions()
        .get::<OriginalUri>()
        .map(|u| u.0.clone())
        .unwrap_or_else(|| req.uri().clone());
    let original_url = original_uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    if !secure.is_enforced(original_url) {
        return Ok(next.run(req).await);
    }

    if !is_forwarded_https(req.headers()) {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            tracing::debug!(method = %req.method(), "refusing plain HTTP request");
            return Err(AppError::HttpsRequired);
        }

        return Ok(redirect_to_https(req.headers(), original_url));
    }

    let mut response = next.run(req).await;
    response.headers_mut().insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static(HSTS_HEADER_VALUE),
    );

    Ok(response)
}

fn is_forwarded_https(headers: &HeaderMap) -> bool {
    headers
        .get(HeaderName::from_static(FORWARDED_PROTO))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|proto| proto.trim().eq_ignore_ascii_case("https"))
        .unwrap_or(false)
}

fn redirect_to_https(headers: &HeaderMap, original_url: &str) -> Response {
    let location = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .and_then(|host| HeaderValue::from_str(&format!("https://{}{}", host, original_url)).ok());

    match location {
        Some(location) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response(),
        None => AppError::HttpsRequired.into_response(),
    }
}
