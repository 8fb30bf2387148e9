/*
 * Responsibility
 * - GET /check for load balancer health checks
 * - Deliberately trivial: it should fail loudly only when the whole service is down
 */
use axum::{
    Router,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};

pub const HEALTH_CHECK_PATH: &str = "/check";
pub const HEALTH_CHECK_BODY: &str = "Everything looks A-OK";

pub fn routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(HEALTH_CHECK_PATH, get(check))
}

pub async fn check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        HEALTH_CHECK_BODY,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn check_is_always_ok() {
        let app: Router = routes();
        let res = app
            .oneshot(
                Request::builder()
                    .uri("/check")
                    .header("x-anything", "ignored")
                    .body(Body::from("ignored"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert!(
            res.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], HEALTH_CHECK_BODY.as_bytes());
    }
}
