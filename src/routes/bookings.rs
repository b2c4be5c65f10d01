use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::bookings;
use crate::middleware::auth::auth_middleware;
use crate::state::AppState;

pub fn routes(state: &AppState) -> Router<AppState> {
    // The booking form re-quotes on every change, before login; estimation
    // stays anonymous.
    let public = Router::new().route("/estimate-price/", post(bookings::estimate_price));

    let protected = Router::new()
        .route(
            "/bookings/",
            post(bookings::create_booking).get(bookings::list_bookings),
        )
        .route("/bookings/available/", get(bookings::available_bookings))
        .route("/bookings/stats/", get(bookings::booking_stats))
        .route(
            "/bookings/:id/",
            get(bookings::get_booking).patch(bookings::update_booking),
        )
        .route("/bookings/:id/cancel/", post(bookings::cancel_booking))
        .route("/bookings/:id/accept/", post(bookings::accept_booking))
        .route("/bookings/:id/start/", post(bookings::start_job))
        .route("/bookings/:id/arrive/", post(bookings::arrive_at_location))
        .route("/bookings/:id/complete/", post(bookings::complete_booking))
        .route("/bookings/:id/assign_driver/", post(bookings::assign_driver))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    public.merge(protected)
}
