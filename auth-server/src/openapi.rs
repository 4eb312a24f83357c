use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const TOKENS_TAG: &str = "Token API";
pub(crate) const LOGIN_TAG: &str = "Login API";
pub(crate) const ADMIN_TAG: &str = "Admin API";

#[derive(OpenApi)]
#[openapi(
    modifiers(&BearerAuth),
    tags(
        (name = HEALTH_TAG, description = "Liveness and readiness"),
        (name = TOKENS_TAG, description = "Token issuance, refresh, logout and verification"),
        (name = LOGIN_TAG, description = "Browser login through the identity provider"),
        (name = ADMIN_TAG, description = "Family revocation and service tokens"),
    ),
    info(
        title = "Auth Server API",
        description = "Authentication microservice",
        version = "0.1.0"
    )
)]
pub(crate) struct ApiDoc;

/// `bearer` scheme used by the protected routes
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}
