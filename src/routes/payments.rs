use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::payments;
use crate::middleware::auth::auth_middleware;
use crate::state::AppState;

pub fn routes(state: &AppState) -> Router<AppState> {
    // Daraja posts the callback unauthenticated
    let public = Router::new().route("/mpesa/callback/", post(payments::mpesa_callback));

    let protected = Router::new()
        .route(
            "/payments/initiate_mpesa_payment/",
            post(payments::initiate_mpesa_payment),
        )
        .route(
            "/payments/initiate_bank_transfer/",
            post(payments::initiate_bank_transfer),
        )
        .route("/payments/my_payments/", get(payments::my_payments))
        .route("/payments/manual_verify/", post(payments::manual_verify))
        .route("/payments/:id/status/", get(payments::payment_status))
        .route("/payments/:id/retry_payment/", post(payments::retry_payment))
        .route("/payments/:id/cancel_payment/", post(payments::cancel_payment))
        .route("/payments/:id/receipt/", get(payments::payment_receipt))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    public.merge(protected)
}
