//! Origin allow-list for API servers.
//!
//! Every request must carry an `Origin` header whose value is, verbatim, one of the
//! configured origins. Anything else gets a bodiless 400 and never reaches the
//! handlers. Accepted responses are typed as JSON, since API servers only speak
//! JSON.
//!
//! Note:
//! - The check is textual. Anyone in the right network position can forge the
//!   header; this is a first line of identity checking, not authentication.
//! - With JSON body parsing enabled, JSON bodies (up to 100 KiB) are parsed before
//!   the origin check and made available as [`JsonBody`].

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderMap, HeaderValue, Request, header, request::Parts},
    middleware::{self, Next},
    response::Response,
};
use serde_json::{Map, Value};
use tower::ServiceBuilder;
use tower_http::{body::Limited, limit::RequestBodyLimitLayer};

use crate::error::AppError;
use crate::middleware::request_context::RequestContext;

pub const JSON_BODY_LIMIT: usize = 100 * 1024;

/// Parsed request body, present when the gate runs with body parsing enabled and
/// the request had a JSON content type.
#[derive(Clone, Debug, PartialEq)]
pub struct JsonBody(pub Value);

impl<S> FromRequestParts<S> for JsonBody
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<JsonBody>()
            .cloned()
            .ok_or_else(|| AppError::MalformedJson("no JSON body".into()))
    }
}

#[derive(Clone, Debug)]
pub struct OriginGate {
    // Owned copy; later changes to the caller's list do not leak in.
    allowed_origins: Arc<[String]>,
    parse_json_body: bool,
    body_limit: usize,
}

impl OriginGate {
    /// Origin check only. An empty list rejects every request.
    pub fn new<S: AsRef<str>>(allowed_origins: &[S]) -> Self {
        Self {
            allowed_origins: allowed_origins
                .iter()
                .map(|o| o.as_ref().to_string())
                .collect(),
            parse_json_body: false,
            body_limit: JSON_BODY_LIMIT,
        }
    }

    /// Origin check with JSON body parsing in front of it.
    pub fn api_server<S: AsRef<str>>(allowed_origins: &[S]) -> Self {
        Self::new(allowed_origins).with_json_body(true)
    }

    pub fn with_json_body(mut self, enabled: bool) -> Self {
        self.parse_json_body = enabled;
        self
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    /// Exact, case-sensitive membership. No header means no membership.
    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            Some(origin) => self.allowed_origins.iter().any(|o| o == origin),
            None => false,
        }
    }
}

pub fn apply<S>(router: Router<S>, gate: OriginGate) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    if !gate.parse_json_body {
        return router.layer(middleware::from_fn_with_state(gate, check_origin));
    }

    // Oversized bodies are refused with 413 before the gate reads anything.
    let layers = ServiceBuilder::new()
        .layer(RequestBodyLimitLayer::new(gate.body_limit))
        .map_request(|req: Request<Limited<Body>>| req.map(Body::new))
        .layer(middleware::from_fn_with_state(gate, check_origin));

    router.layer(layers)
}

pub async fn check_origin(
    State(gate): State<OriginGate>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let req = if gate.parse_json_body {
        parse_json_body(req, gate.body_limit).await?
    } else {
        req
    };

    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok());

    if !gate.is_allowed(origin) {
        let origin = origin.unwrap_or("");
        match req.extensions().get::<RequestContext>() {
            Some(ctx) => ctx
                .log
                .in_scope(|| tracing::warn!(origin = %origin, "Origin is not allowed")),
            None => tracing::warn!(origin = %origin, "Origin is not allowed"),
        }
        return Err(AppError::OriginRejected);
    }

    let mut response = next.run(req).await;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );

    Ok(response)
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}

/// Buffer and parse a JSON body, then put the raw bytes back for downstream
/// extractors. Non-JSON requests pass through untouched. The size limit itself is
/// `RequestBodyLimitLayer`; reading past it fails here as 413.
///
/// Only objects and arrays are accepted at the top level; an empty body parses as
/// `{}`.
async fn parse_json_body(req: Request<Body>, limit: usize) -> Result<Request<Body>, AppError> {
    if !is_json_content_type(req.headers()) {
        return Ok(req);
    }

    let (mut parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| AppError::PayloadTooLarge { limit })?;

    let value = if bytes.is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice::<Value>(&bytes).map_err(|e| AppError::MalformedJson(e.to_string()))?
    };

    if !(value.is_object() || value.is_array()) {
        return Err(AppError::MalformedJson(
            "top-level value must be an object or array".into(),
        ));
    }

    parts.extensions.insert(JsonBody(value));
    Ok(Request::from_parts(parts, Body::from(bytes)))
}
