//! OpenAPI document for the JSON surface.

use crate::api::handlers::{auth, email_test, health, oauth};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "portero",
        description = "OAuth2 authorization server with interactive login"
    ),
    paths(
        health::health,
        oauth::token::token,
        auth::session::logout,
        auth::signup::signup,
        auth::verify::verify_email,
        auth::profile::update_init,
        auth::profile::load,
        auth::profile::save,
        email_test::email_test,
    ),
    tags(
        (name = "health", description = "Service health"),
        (name = "oauth", description = "OAuth2 authorization-code grant"),
        (name = "session", description = "Interactive sessions"),
        (name = "account", description = "Registration and verification"),
        (name = "profile", description = "Token-gated profile edits"),
        (name = "email", description = "Email delivery checks"),
    )
)]
pub struct ApiDoc;
