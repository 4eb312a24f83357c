pub(crate) mod admin;
pub(crate) mod authn_middleware;
pub(crate) mod extract;
pub(crate) mod health;
pub(crate) mod login;
pub(crate) mod tokens;

use crate::api::authn_middleware::service_authentication_middleware;
use crate::state::AppState;
use axum::middleware;
use utoipa_axum::router::OpenApiRouter;

/// Combines all API routes into a single router
pub(super) fn router(state: &AppState) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .merge(health::router())
        .merge(tokens::router())
        .merge(login::router())
        .merge(protected_routes(state))
}

/// Routes that require the service API key or a service token
fn protected_routes(state: &AppState) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .merge(tokens::protected_router())
        .merge(admin::router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            service_authentication_middleware,
        ))
}
