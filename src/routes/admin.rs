use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::admin;
use crate::middleware::auth::auth_middleware;
use crate::state::AppState;

pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/dashboard/", get(admin::dashboard))
        .route("/users/", get(admin::list_users).post(admin::create_user))
        .route("/users/:id/", get(admin::get_user).patch(admin::update_user))
        .route("/users/:id/activate/", post(admin::activate_user))
        .route("/users/:id/deactivate/", post(admin::deactivate_user))
        .route("/users/:id/change_role/", post(admin::change_role))
        .route("/bookings/", get(admin::list_bookings))
        .route(
            "/disputes/",
            get(admin::list_disputes).post(admin::create_dispute),
        )
        .route("/disputes/:id/resolve/", post(admin::resolve_dispute))
        .route("/disputes/:id/dismiss/", post(admin::dismiss_dispute))
        .route("/logs/", get(admin::list_logs))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
}
