use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::auth;
use crate::middleware::auth::auth_middleware;
use crate::state::AppState;

// Paths keep the trailing slashes the frontend was built against.
pub fn routes(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/register/", post(auth::register))
        .route("/login/", post(auth::login))
        .route("/token/refresh/", post(auth::refresh_token))
        .route("/2fa/login/", post(auth::two_factor_login));

    let protected = Router::new()
        .route("/me/", get(auth::me).put(auth::update_profile))
        .route("/toggle-online/", post(auth::toggle_online))
        .route("/change-password/", post(auth::change_password))
        .route("/2fa/setup/", post(auth::two_factor_setup))
        .route("/2fa/verify/", post(auth::two_factor_verify))
        .route("/2fa/disable/", post(auth::two_factor_disable))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    public.merge(protected)
}
