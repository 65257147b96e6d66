use super::handlers::{
    auth, comments, events, health, invites, notifications, participations, passes, users,
};
use utoipa::openapi::{InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` spec. Handlers sharing a path must
/// share one `routes!` call. Routes added outside (like `/` and
/// `/openapi.json`) are intentionally not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut api_tag = Tag::new("tessera");
    api_tag.description = Some("Event planning and guest admission API".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Registration, login, and session cookies".to_string());

    let mut passes_tag = Tag::new("passes");
    passes_tag.description = Some("Single-binding admission links".to_string());

    let mut invites_tag = Tag::new("invites");
    invites_tag.description = Some("Reusable invitation links".to_string());

    let mut base = cargo_openapi();
    base.tags = Some(vec![api_tag, auth_tag, passes_tag, invites_tag]);

    let router = OpenApiRouter::with_openapi(base)
        .routes(routes!(health::health))
        .routes(routes!(auth::register))
        .routes(routes!(auth::login))
        .routes(routes!(auth::refresh))
        .routes(routes!(auth::me))
        .routes(routes!(auth::logout))
        .routes(routes!(events::add_event, events::read_events))
        .routes(routes!(
            events::read_event,
            events::edit_event,
            events::remove_event
        ))
        .routes(routes!(comments::add_comment, comments::read_comments))
        .routes(routes!(passes::create_pass))
        .routes(routes!(passes::open_pass))
        .routes(routes!(passes::accept_as_guest))
        .routes(routes!(passes::accept_with_login))
        .routes(routes!(invites::create_invite))
        .routes(routes!(invites::open_invite))
        .routes(routes!(invites::accept_invite))
        .routes(routes!(participations::set_participation_status))
        .routes(routes!(participations::read_participation_stats))
        .routes(routes!(participations::read_my_events))
        .routes(routes!(
            notifications::get_preferences,
            notifications::set_preference,
            notifications::bulk_update_preferences
        ))
        .routes(routes!(users::read_users))
        .routes(routes!(users::read_user, users::remove_user))
        .routes(routes!(users::update_password));

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(Some(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    let license_id = env!("CARGO_PKG_LICENSE");
    if !license_id.is_empty() {
        let mut license = License::new(license_id);
        license.identifier = Some(license_id.to_string());
        info.license = Some(license);
    }

    OpenApiBuilder::new().info(info).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            spec.info.description.as_deref(),
            Some(env!("CARGO_PKG_DESCRIPTION"))
        );
    }

    #[test]
    fn every_surface_route_is_documented() {
        let spec = openapi();
        let paths = &spec.paths.paths;
        for path in [
            "/health",
            "/auth/register",
            "/auth/token",
            "/auth/refresh",
            "/auth/me",
            "/auth/logout",
            "/events/",
            "/events/{event_id}",
            "/events/{event_id}/comments",
            "/passes/personal/{event_id}",
            "/passes/{token}",
            "/passes/{token}/accept-guest",
            "/passes/{token}/accept-login",
            "/invites/",
            "/invites/{token}",
            "/invites/{token}/accept",
            "/participations/events/{event_id}",
            "/participations/events/{event_id}/stats",
            "/participations/me/events",
            "/notifications/events/{event_id}/preferences",
            "/users/",
            "/users/{user_id}",
            "/users/{user_id}/password",
        ] {
            assert!(paths.contains_key(path), "missing OpenAPI path: {path}");
        }
    }
}
