//! End-to-end tests against a live Postgres instance.
//!
//! These run only when `TESSERA_TEST_DSN` points at a database (for example
//! `postgres://tessera@localhost:5432/tessera_test`); without it every test
//! returns early. The schema from `sql/schema.sql` is applied on first
//! connect and is idempotent.

use axum::{
    body::{to_bytes, Body},
    http::{
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
        Request, StatusCode,
    },
    Extension, Router,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tessera::api::handlers::auth::state::{AuthConfig, AuthState};
use tower::ServiceExt;

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

async fn test_app() -> Option<(Router, PgPool)> {
    let Ok(dsn) = std::env::var("TESSERA_TEST_DSN") else {
        eprintln!("Skipping live API test: TESSERA_TEST_DSN is not set");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&dsn)
        .await
        .expect("failed to connect test pool");
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(&pool)
        .await
        .expect("failed to apply schema");

    let auth_state = Arc::new(AuthState::new(
        AuthConfig::new(
            "http://localhost:5173".to_string(),
            SecretString::from("live-test-signing-key"),
        )
        .with_access_ttl_seconds(300)
        .with_refresh_ttl_seconds(3600),
    ));

    let (router, _openapi) = tessera::api::router().split_for_parts();
    let app = router
        .layer(Extension(auth_state))
        .layer(Extension(pool.clone()));
    Some((app, pool))
}

fn unique_email(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock is sane")
        .as_nanos();
    format!("{prefix}-{nanos}@example.com")
}

async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    cookies: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Vec<String>, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookies) = cookies {
        builder = builder.header(COOKIE, cookies);
    }
    let request = match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request builds");

    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router serves request");
    let status = response.status();
    let set_cookies = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok().map(str::to_string))
        .collect();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, set_cookies, body)
}

/// Join `Set-Cookie` values into a request `Cookie` header.
fn cookie_header(set_cookies: &[String]) -> String {
    set_cookies
        .iter()
        .filter_map(|cookie| cookie.split(';').next())
        .collect::<Vec<_>>()
        .join("; ")
}

async fn register(app: &Router, login: &str) -> (String, i64) {
    let email = unique_email(login);
    let (status, cookies, body) = send_json(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"login": login, "email": email, "password": "secret1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cookies.len(), 2);
    let user_id = body["id"].as_i64().expect("register returns the user id");
    (cookie_header(&cookies), user_id)
}

async fn create_event(app: &Router, cookies: &str) -> i64 {
    let (status, _, body) = send_json(
        app,
        "POST",
        "/events/",
        Some(cookies),
        Some(json!({
            "name": "Rooftop Party",
            "location": "Warehouse 12",
            "time": "2026-09-01T18:00:00Z",
            "description": "Bring snacks",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["id"].as_i64().expect("event id")
}

fn token_from_link(body: &Value) -> String {
    let link = body["link"].as_str().expect("link in response");
    link.rsplit('/').next().expect("token in link").to_string()
}

#[tokio::test]
async fn register_then_me_round_trips_user_id() {
    let Some((app, _pool)) = test_app().await else {
        return;
    };

    let (cookies, user_id) = register(&app, "ann").await;
    let (status, _, body) = send_json(&app, "GET", "/auth/me", Some(&cookies), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"].as_i64(), Some(user_id));
}

#[tokio::test]
async fn login_with_wrong_password_is_unauthorized() {
    let Some((app, _pool)) = test_app().await else {
        return;
    };

    let email = unique_email("bob");
    let (status, _, _) = send_json(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"login": "bob", "email": email, "password": "secret1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let form = format!("mail={email}&password=wrong");
    let request = Request::builder()
        .method("POST")
        .uri("/auth/token")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .expect("request builds");
    let response = app.clone().oneshot(request).await.expect("router serves");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn pass_lifecycle_unbound_guest_rebind_conflict() {
    let Some((app, _pool)) = test_app().await else {
        return;
    };

    let (owner_cookies, _) = register(&app, "owner").await;
    let event_id = create_event(&app, &owner_cookies).await;

    let (status, _, body) = send_json(
        &app,
        "POST",
        &format!("/passes/personal/{event_id}"),
        Some(&owner_cookies),
        Some(json!({"display_name": "Ann"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = token_from_link(&body);

    // Freshly created pass resolves unbound with its creation inputs.
    let (status, _, body) = send_json(&app, "GET", &format!("/passes/{token}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"].as_str(), Some("unbound"));
    assert_eq!(body["event_id"].as_i64(), Some(event_id));
    assert_eq!(body["display_name"].as_str(), Some("Ann"));

    // Claiming as guest binds and logs in.
    let (status, cookies, body) = send_json(
        &app,
        "POST",
        &format!("/passes/{token}/accept-guest"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"].as_str(), Some("guest_created"));
    assert!(!cookies.is_empty(), "guest claim sets session cookies");

    // Opening again logs the guest straight back in.
    let (status, cookies, body) = send_json(&app, "GET", &format!("/passes/{token}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"].as_str(), Some("logged_in"));
    assert!(!cookies.is_empty());

    // A different account cannot take the pass over.
    let (other_cookies, _) = register(&app, "rival").await;
    let (status, _, _) = send_json(
        &app,
        "POST",
        &format!("/passes/{token}/accept-login"),
        Some(&other_cookies),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn pass_bound_to_account_requires_login_and_rebinds_idempotently() {
    let Some((app, _pool)) = test_app().await else {
        return;
    };

    let (owner_cookies, _) = register(&app, "owner2").await;
    let event_id = create_event(&app, &owner_cookies).await;
    let (holder_cookies, _) = register(&app, "holder").await;

    let (_, _, body) = send_json(
        &app,
        "POST",
        &format!("/passes/personal/{event_id}"),
        Some(&owner_cookies),
        Some(json!({"display_name": "Holder"})),
    )
    .await;
    let token = token_from_link(&body);

    // Bind to a registered account.
    let (status, _, body) = send_json(
        &app,
        "POST",
        &format!("/passes/{token}/accept-login"),
        Some(&holder_cookies),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"].as_str(), Some("linked"));

    // Re-binding to the same account is a no-op success.
    let (status, _, body) = send_json(
        &app,
        "POST",
        &format!("/passes/{token}/accept-login"),
        Some(&holder_cookies),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"].as_str(), Some("linked"));

    // The link alone never logs into a registered account.
    let (status, cookies, body) = send_json(&app, "GET", &format!("/passes/{token}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"].as_str(), Some("login_required"));
    assert!(cookies.is_empty());

    let (status, cookies, body) = send_json(
        &app,
        "POST",
        &format!("/passes/{token}/accept-guest"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"].as_str(), Some("login_required"));
    assert!(cookies.is_empty());
}

#[tokio::test]
async fn concurrent_pass_claims_produce_one_winner() {
    let Some((app, _pool)) = test_app().await else {
        return;
    };

    let (owner_cookies, _) = register(&app, "owner3").await;
    let event_id = create_event(&app, &owner_cookies).await;
    let (first_cookies, _) = register(&app, "racer-one").await;
    let (second_cookies, _) = register(&app, "racer-two").await;

    let (_, _, body) = send_json(
        &app,
        "POST",
        &format!("/passes/personal/{event_id}"),
        Some(&owner_cookies),
        Some(json!({"display_name": "Contested"})),
    )
    .await;
    let token = token_from_link(&body);

    let uri = format!("/passes/{token}/accept-login");
    let (first, second) = tokio::join!(
        send_json(&app, "POST", &uri, Some(&first_cookies), None),
        send_json(&app, "POST", &uri, Some(&second_cookies), None),
    );

    let statuses = [first.0, second.0];
    let winners = statuses
        .iter()
        .filter(|status| **status == StatusCode::OK)
        .count();
    let conflicts = statuses
        .iter()
        .filter(|status| **status == StatusCode::CONFLICT)
        .count();
    assert_eq!(winners, 1, "exactly one claim must win, got {statuses:?}");
    assert_eq!(conflicts, 1, "the losing claim must conflict");
}

#[tokio::test]
async fn invitation_is_reusable_and_acceptance_idempotent() {
    let Some((app, pool)) = test_app().await else {
        return;
    };

    let (owner_cookies, _) = register(&app, "owner4").await;
    let event_id = create_event(&app, &owner_cookies).await;

    let (status, _, body) = send_json(
        &app,
        "POST",
        "/invites/",
        Some(&owner_cookies),
        Some(json!({"event_id": event_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = token_from_link(&body);

    let (status, _, body) = send_json(&app, "GET", &format!("/invites/{token}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["event_id"].as_i64(), Some(event_id));

    // Three distinct users accept the same link; one accepts twice.
    let mut acceptors = Vec::new();
    for login in ["guest-a", "guest-b", "guest-c"] {
        let (cookies, user_id) = register(&app, login).await;
        acceptors.push((cookies, user_id));
    }
    for (cookies, _) in &acceptors {
        let (status, _, body) = send_json(
            &app,
            "POST",
            &format!("/invites/{token}/accept"),
            Some(cookies),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"].as_str(), Some("accepted"));
    }
    let (status, _, _) = send_json(
        &app,
        "POST",
        &format!("/invites/{token}/accept"),
        Some(&acceptors[0].0),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let row = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM event_participations WHERE event_id = $1",
    )
    .bind(event_id)
    .fetch_one(&pool)
    .await
    .expect("count participations");
    assert_eq!(row, 3, "one participation row per distinct acceptor");
}

#[tokio::test]
async fn event_update_by_non_owner_is_forbidden() {
    let Some((app, _pool)) = test_app().await else {
        return;
    };

    let (owner_cookies, _) = register(&app, "owner5").await;
    let event_id = create_event(&app, &owner_cookies).await;
    let (other_cookies, _) = register(&app, "meddler").await;

    let (status, _, _) = send_json(
        &app,
        "PUT",
        &format!("/events/{event_id}"),
        Some(&other_cookies),
        Some(json!({"name": "Hijacked"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = send_json(
        &app,
        "PUT",
        &format!("/events/{event_id}"),
        Some(&owner_cookies),
        Some(json!({"name": "Renamed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
