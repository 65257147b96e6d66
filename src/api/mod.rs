use crate::api::handlers::{auth::state::AuthState, health};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method, Request},
    routing::get,
    Extension, Json,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub(crate) mod email;
pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use email::{EmailSender, EmailWorkerConfig, LogEmailSender, SmtpEmailSender};
pub use openapi::openapi;

const DB_CONNECT_ATTEMPTS: u32 = 30;
const DB_CONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Start the server.
///
/// # Errors
/// Returns an error if the database stays unreachable past the retry budget
/// or the listener fails to bind.
pub async fn new(
    port: u16,
    dsn: String,
    auth_config: handlers::auth::state::AuthConfig,
    email_config: EmailWorkerConfig,
    sender: Arc<dyn EmailSender>,
) -> Result<()> {
    let pool = connect_with_retry(&dsn).await?;

    let auth_state = Arc::new(AuthState::new(auth_config));

    // Background worker drains email_outbox (DB-backed queue): one delivery
    // attempt per row, failures logged and marked, never retried.
    email::spawn_outbox_worker(pool.clone(), sender, email_config);

    let frontend_origin = frontend_origin(auth_state.config().frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    // Build the router from OpenAPI-wired routes, then extend it with non-doc
    // routes like `/` and `/openapi.json`.
    let (router, openapi) = router().split_for_parts();
    let app = router
        .route("/", get(health::root))
        .route(
            "/openapi.json",
            get(move || async move { Json(openapi) }),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state))
                .layer(Extension(pool)),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

/// Connect to the database, retrying with fixed backoff for a bounded number
/// of attempts. Exhausting the budget is a fatal startup failure.
async fn connect_with_retry(dsn: &str) -> Result<PgPool> {
    let options = || {
        PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
    };

    let mut last_error = None;
    for attempt in 1..=DB_CONNECT_ATTEMPTS {
        match options().connect(dsn).await {
            Ok(pool) => return Ok(pool),
            Err(err) => {
                warn!("Database not ready, retry {attempt}/{DB_CONNECT_ATTEMPTS}: {err}");
                last_error = Some(err);
                tokio::time::sleep(DB_CONNECT_BACKOFF).await;
            }
        }
    }

    Err(last_error.map_or_else(
        || anyhow!("database connection failed"),
        anyhow::Error::from,
    ))
    .with_context(|| format!("Failed to connect to database after {DB_CONNECT_ATTEMPTS} attempts"))
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
