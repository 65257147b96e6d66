//! Router surface checks that need no database.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

#[tokio::test]
async fn health_route_serves_without_state() {
    let (router, _openapi) = tessera::api::router().split_for_parts();
    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("router serves");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (router, _openapi) = tessera::api::router().split_for_parts();
    let response = router
        .oneshot(
            Request::builder()
                .uri("/no-such-route")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("router serves");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn openapi_document_has_operations() {
    let spec = tessera::api::openapi();
    assert!(!spec.paths.paths.is_empty());
    let rendered = serde_json::to_string(&spec).expect("spec serializes");
    assert!(rendered.contains("/passes/{token}/accept-guest"));
    assert!(rendered.contains("/auth/refresh"));
}
