use super::handlers::{
    auth::{bearer, web},
    health, tenants,
};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
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
/// and included in the generated `OpenAPI` document.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        // Cookie sessions
        .routes(routes!(web::signin))
        .routes(routes!(web::signup))
        .routes(routes!(web::signout_get, web::signout_post))
        .routes(routes!(web::gsi))
        .routes(routes!(web::gsi_session))
        .routes(routes!(web::forgot))
        .routes(routes!(web::show_reset, web::reset_password))
        .routes(routes!(web::me))
        // Bearer tokens
        .routes(routes!(bearer::signin))
        .routes(routes!(bearer::signup))
        .routes(routes!(bearer::signout))
        .routes(routes!(bearer::forgot_password))
        .routes(routes!(bearer::reset_password))
        .routes(routes!(bearer::validate_token))
        .routes(routes!(bearer::google_callback))
        .routes(routes!(bearer::apple))
        .routes(routes!(bearer::facebook))
        .routes(routes!(bearer::me))
        // Tenants
        .routes(routes!(tenants::create_tenant))
        .routes(routes!(tenants::delete_tenant))
        .routes(routes!(tenants::restore_tenant));

    let mut warden_tag = Tag::new("warden");
    warden_tag.description = Some("Multi-tenant authentication and session API".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description =
        Some("Sign-in, signup, sessions, bearer tokens and password reset".to_string());

    let mut tenants_tag = Tag::new("tenants");
    tenants_tag.description = Some("Tenant onboarding".to_string());

    let mut admin_tag = Tag::new("admin");
    admin_tag.description = Some("Super-admin tenant lifecycle".to_string());

    router.get_openapi_mut().tags = Some(vec![warden_tag, auth_tag, tenants_tag, admin_tag]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    Some(value.trim()).filter(|trimmed| !trimmed.is_empty())
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, email)) => (
            Some(name.trim()).filter(|name| !name.is_empty()),
            Some(email.trim_end_matches('>').trim()).filter(|email| !email.is_empty()),
        ),
        None => (Some(author.trim()).filter(|name| !name.is_empty()), None),
    }
}
