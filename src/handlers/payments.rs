use axum::{
    extract::{Path, Query, State},
    response::{Html, Json},
    Extension,
};
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::{doc, to_bson};
use mongodb::Collection;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::database::counters;
use crate::errors::{AppError, Result};
use crate::middleware::auth::require_admin;
use crate::models::audit::LogAction;
use crate::models::booking::{Booking, BookingStatus};
use crate::models::payment::{
    InitiateBankTransferRequest, InitiateMpesaRequest, ManualVerifyRequest, Payment,
    PaymentMethod, PaymentQuery, PaymentStatus, RetryPaymentRequest,
};
use crate::models::user::{validate_phone_number, Claims, Role, User};
use crate::services::audit;
use crate::services::status_watcher::{self, WatchResult, MAX_POLL_ATTEMPTS, POLL_INTERVAL};
use crate::state::AppState;

fn payments_of(state: &AppState) -> Collection<Payment> {
    state.db.collection("payments")
}

fn bookings_of(state: &AppState) -> Collection<Booking> {
    state.db.collection("bookings")
}

async fn load_payment(state: &AppState, id: i64) -> Result<Payment> {
    payments_of(state)
        .find_one(doc! { "_id": id })
        .await?
        .ok_or(AppError::PaymentNotFound)
}

async fn load_booking(state: &AppState, id: i64) -> Result<Booking> {
    bookings_of(state)
        .find_one(doc! { "_id": id })
        .await?
        .ok_or(AppError::BookingNotFound)
}

fn can_view(claims: &Claims, booking: &Booking) -> bool {
    match claims.role {
        Role::Admin => true,
        Role::Customer => booking.customer_id == claims.sub,
        Role::Driver => booking.driver_id == Some(claims.sub),
    }
}

// Validate that the booking can take another payment attempt and return the
// amount to charge: the authoritative final price once set, the estimate
// before that.
async fn chargeable_amount(
    state: &AppState,
    claims: &Claims,
    booking_id: i64,
) -> Result<(Booking, crate::models::money::Money)> {
    let booking = load_booking(state, booking_id).await?;

    if booking.customer_id != claims.sub && !claims.role.is_admin() {
        return Err(AppError::BookingNotFound);
    }
    if booking.status == BookingStatus::Cancelled {
        return Err(AppError::validation("Cannot pay for a cancelled booking."));
    }

    let existing_paid = payments_of(state)
        .find_one(doc! {
            "booking_id": booking.id,
            "status": PaymentStatus::Paid.as_str(),
        })
        .await?;
    if existing_paid.is_some() {
        return Err(AppError::validation("Booking already has a paid payment."));
    }

    let amount = booking.final_price.unwrap_or(booking.estimated_price);
    if !amount.is_positive() {
        return Err(AppError::validation("Invalid booking amount."));
    }

    Ok((booking, amount))
}

// Flip a pending payment to paid and propagate settlement to its booking.
// The status guard in the filter makes this race-safe between the callback,
// the status watcher and manual verification: only one of them wins.
async fn mark_paid(state: &AppState, payment_id: i64, receipt: Option<String>) -> Result<bool> {
    let now = Utc::now();
    let mut set = doc! {
        "status": PaymentStatus::Paid.as_str(),
        "paid_at": to_bson(&now)?,
        "updated_at": to_bson(&now)?,
    };
    if let Some(receipt) = &receipt {
        set.insert("mpesa_receipt", receipt);
    }

    let updated = payments_of(state)
        .update_one(
            doc! { "_id": payment_id, "status": PaymentStatus::Pending.as_str() },
            doc! { "$set": set },
        )
        .await?;

    if updated.modified_count == 0 {
        // Lost the race; if we learned the receipt first, backfill it.
        if let Some(receipt) = receipt {
            payments_of(state)
                .update_one(
                    doc! { "_id": payment_id, "mpesa_receipt": null },
                    doc! { "$set": { "mpesa_receipt": receipt } },
                )
                .await?;
        }
        return Ok(false);
    }

    let payment = load_payment(state, payment_id).await?;
    settle_booking(state, payment.booking_id).await?;

    audit::record(
        &state.db,
        LogAction::PaymentReceived,
        None,
        json!({ "payment_id": payment_id, "booking_id": payment.booking_id, "amount": payment.amount }),
    )
    .await;

    if let Some(sms) = state.sms.clone() {
        if let Ok(booking) = load_booking(state, payment.booking_id).await {
            let users: Collection<User> = state.db.collection("users");
            if let Ok(Some(customer)) = users.find_one(doc! { "_id": booking.customer_id }).await {
                let amount = payment.amount.to_string();
                tokio::spawn(async move {
                    if let Err(e) = sms
                        .send_payment_confirmation(&customer.phone_number, &amount)
                        .await
                    {
                        warn!("failed to send payment confirmation: {}", e);
                    }
                });
            }
        }
    }

    Ok(true)
}

async fn mark_failed(state: &AppState, payment_id: i64, reason: &str) -> Result<()> {
    let now = Utc::now();
    let updated = payments_of(state)
        .update_one(
            doc! { "_id": payment_id, "status": PaymentStatus::Pending.as_str() },
            doc! { "$set": {
                "status": PaymentStatus::Failed.as_str(),
                "notes": reason,
                "updated_at": to_bson(&now)?,
            }},
        )
        .await?;

    if updated.modified_count > 0 {
        audit::record(
            &state.db,
            LogAction::PaymentFailed,
            None,
            json!({ "payment_id": payment_id, "reason": reason }),
        )
        .await;
    }

    Ok(())
}

// payment_status on the booking is derived: it flips to paid only here,
// i.e. only when a Payment row actually reached paid.
async fn settle_booking(state: &AppState, booking_id: i64) -> Result<()> {
    bookings_of(state)
        .update_one(
            doc! { "_id": booking_id },
            doc! { "$set": {
                "payment_status": "paid",
                "updated_at": to_bson(&Utc::now())?,
            }},
        )
        .await?;
    Ok(())
}

// Background reconciliation for one STK push: bounded 3s x 20 poll against
// Daraja, cancelled wholesale on shutdown. Timeout is not failure; the
// callback may still land after the window ("check later").
async fn run_status_watch(state: AppState, payment_id: i64, checkout_request_id: String) {
    let Some(mpesa) = state.mpesa.clone() else {
        return;
    };
    let cancel = state.shutdown.child_token();

    let result = status_watcher::watch(
        &*mpesa,
        &checkout_request_id,
        &cancel,
        POLL_INTERVAL,
        MAX_POLL_ATTEMPTS,
    )
    .await;

    match result {
        WatchResult::Paid => {
            if let Err(e) = mark_paid(&state, payment_id, None).await {
                error!("failed to record paid payment {}: {}", payment_id, e);
            }
        }
        WatchResult::Failed(reason) => {
            if let Err(e) = mark_failed(&state, payment_id, &reason).await {
                error!("failed to record failed payment {}: {}", payment_id, e);
            }
        }
        WatchResult::TimedOut => info!(
            "payment {} still pending after poll window; awaiting callback",
            payment_id
        ),
        WatchResult::Cancelled => {}
    }
}

async fn start_mpesa_attempt(
    state: &AppState,
    booking: &Booking,
    amount: crate::models::money::Money,
    phone_number: &str,
    description: &str,
) -> Result<(Payment, String)> {
    let mpesa = state
        .mpesa
        .clone()
        .ok_or_else(|| AppError::ServiceUnavailable("M-Pesa service is not available".into()))?;

    let formatted = mpesa.format_phone_number(phone_number);
    if !validate_phone_number(&formatted) {
        return Err(AppError::validation(
            "Phone number must be in the format 254XXXXXXXXX.",
        ));
    }

    let response = mpesa
        .stk_push(
            &formatted,
            amount,
            &format!("BK{:06}", booking.id),
            description,
        )
        .await?;

    let now = Utc::now();
    let payment = Payment {
        id: counters::next_id(&state.db, "payments").await?,
        booking_id: booking.id,
        amount,
        payment_method: PaymentMethod::Mpesa,
        status: PaymentStatus::Pending,
        phone_number: Some(formatted),
        mpesa_receipt: None,
        bank_reference: None,
        checkout_request_id: Some(response.checkout_request_id.clone()),
        merchant_request_id: Some(response.merchant_request_id.clone()),
        notes: None,
        verified_by: None,
        verified_at: None,
        cancelled_by: None,
        cancelled_at: None,
        paid_at: None,
        created_at: now,
        updated_at: now,
    };

    payments_of(state).insert_one(&payment).await?;

    tokio::spawn(run_status_watch(
        state.clone(),
        payment.id,
        response.checkout_request_id.clone(),
    ));

    Ok((payment, response.customer_message))
}

pub async fn initiate_mpesa_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<InitiateMpesaRequest>,
) -> Result<Json<Value>> {
    let (booking, amount) = chargeable_amount(&state, &claims, payload.booking_id).await?;

    let (payment, customer_message) = start_mpesa_attempt(
        &state,
        &booking,
        amount,
        &payload.phone_number,
        &format!("Exhauster Service Booking #{}", booking.id),
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Payment initiated successfully. Please check your phone to complete the payment.",
        "payment_id": payment.id,
        "checkout_request_id": payment.checkout_request_id,
        "merchant_request_id": payment.merchant_request_id,
        "customer_message": customer_message,
    })))
}

pub async fn initiate_bank_transfer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<InitiateBankTransferRequest>,
) -> Result<Json<Value>> {
    let reference = payload.bank_reference.trim().to_string();
    if reference.is_empty() {
        return Err(AppError::validation("Bank reference is required."));
    }

    let (booking, amount) = chargeable_amount(&state, &claims, payload.booking_id).await?;

    let now = Utc::now();
    let payment = Payment {
        id: counters::next_id(&state.db, "payments").await?,
        booking_id: booking.id,
        amount,
        payment_method: PaymentMethod::Bank,
        status: PaymentStatus::Pending,
        phone_number: None,
        mpesa_receipt: None,
        bank_reference: Some(reference),
        checkout_request_id: None,
        merchant_request_id: None,
        notes: None,
        verified_by: None,
        verified_at: None,
        cancelled_by: None,
        cancelled_at: None,
        paid_at: None,
        created_at: now,
        updated_at: now,
    };

    payments_of(&state).insert_one(&payment).await?;

    // No automatic confirmation on this rail: the attempt sits pending until
    // an admin verifies it against the bank statement.
    Ok(Json(json!({
        "success": true,
        "message": "Bank transfer recorded. Verification may take up to 24 hours.",
        "payment_id": payment.id,
    })))
}

// The poll target for clients waiting on an STK push.
pub async fn payment_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let payment = load_payment(&state, id).await?;
    let booking = load_booking(&state, payment.booking_id).await?;
    if !can_view(&claims, &booking) {
        return Err(AppError::PaymentNotFound);
    }

    Ok(Json(json!({ "payment": payment })))
}

fn parse_date_bound(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

pub async fn my_payments(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PaymentQuery>,
) -> Result<Json<Vec<Payment>>> {
    // Customers see payments on their bookings, drivers on theirs, admins all.
    let filter = match claims.role {
        Role::Admin => doc! {},
        _ => {
            let booking_filter = if claims.role.is_customer() {
                doc! { "customer_id": claims.sub }
            } else {
                doc! { "driver_id": claims.sub }
            };
            let cursor = bookings_of(&state).find(booking_filter).await?;
            let bookings: Vec<Booking> = cursor.try_collect().await?;
            let ids: Vec<i64> = bookings.iter().map(|b| b.id).collect();
            doc! { "booking_id": { "$in": ids } }
        }
    };

    let cursor = payments_of(&state).find(filter).await?;
    let mut payments: Vec<Payment> = cursor.try_collect().await?;

    if let Some(status) = query.status {
        payments.retain(|p| p.status == status);
    }
    if let Some(from) = query.date_from.as_deref().and_then(parse_date_bound) {
        payments.retain(|p| p.created_at >= from);
    }
    if let Some(to) = query.date_to.as_deref().and_then(parse_date_bound) {
        payments.retain(|p| p.created_at <= to);
    }

    payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(payments))
}

// Retry clones the dead attempt into a fresh one; history stays untouched.
pub async fn retry_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<RetryPaymentRequest>,
) -> Result<Json<Value>> {
    let previous = load_payment(&state, id).await?;

    if !previous.status.is_retryable() {
        return Err(AppError::validation(format!(
            "Cannot retry a {} payment.",
            previous.status.as_str()
        )));
    }
    if previous.payment_method != PaymentMethod::Mpesa {
        return Err(AppError::validation("Only M-PESA payments can be retried."));
    }

    let booking = load_booking(&state, previous.booking_id).await?;
    if booking.customer_id != claims.sub && !claims.role.is_admin() {
        return Err(AppError::forbidden("You can only retry your own payments."));
    }

    let (_, amount) = chargeable_amount(&state, &claims, booking.id).await?;

    let (payment, customer_message) = start_mpesa_attempt(
        &state,
        &booking,
        amount,
        &payload.phone_number,
        &format!("Retry Payment for Booking #{}", booking.id),
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Payment retry initiated successfully.",
        "payment_id": payment.id,
        "checkout_request_id": payment.checkout_request_id,
        "customer_message": customer_message,
    })))
}

// Explicit cancel of a still-pending attempt. This is a new request against
// the record, not an abort of anything in flight.
pub async fn cancel_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let payment = load_payment(&state, id).await?;

    if payment.status != PaymentStatus::Pending {
        return Err(AppError::validation(format!(
            "Cannot cancel a {} payment.",
            payment.status.as_str()
        )));
    }

    let booking = load_booking(&state, payment.booking_id).await?;
    if booking.customer_id != claims.sub && !claims.role.is_admin() {
        return Err(AppError::forbidden("You can only cancel your own payments."));
    }

    let now = Utc::now();
    payments_of(&state)
        .update_one(
            doc! { "_id": id, "status": PaymentStatus::Pending.as_str() },
            doc! { "$set": {
                "status": PaymentStatus::Cancelled.as_str(),
                "cancelled_by": claims.sub,
                "cancelled_at": to_bson(&now)?,
                "updated_at": to_bson(&now)?,
            }},
        )
        .await?;

    audit::record(
        &state.db,
        LogAction::PaymentCancelled,
        Some(claims.sub),
        json!({ "payment_id": id }),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Payment cancelled successfully.",
    })))
}

// Admin authority for rails with no automatic confirmation (bank transfers,
// stuck M-PESA attempts).
pub async fn manual_verify(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ManualVerifyRequest>,
) -> Result<Json<Value>> {
    require_admin(&claims)?;

    let payment = load_payment(&state, payload.payment_id).await?;
    if payment.status == PaymentStatus::Paid {
        return Err(AppError::validation("Payment is already marked as paid."));
    }

    let now = Utc::now();
    let mut set = doc! {
        "status": PaymentStatus::Paid.as_str(),
        "verified_by": claims.sub,
        "verified_at": to_bson(&now)?,
        "paid_at": to_bson(&now)?,
        "updated_at": to_bson(&now)?,
    };
    if let Some(receipt) = &payload.mpesa_receipt {
        set.insert("mpesa_receipt", receipt);
    }

    payments_of(&state)
        .update_one(
            doc! { "_id": payment.id, "status": { "$ne": PaymentStatus::Paid.as_str() } },
            doc! { "$set": set },
        )
        .await?;

    settle_booking(&state, payment.booking_id).await?;

    audit::record(
        &state.db,
        LogAction::PaymentVerified,
        Some(claims.sub),
        json!({ "payment_id": payment.id, "booking_id": payment.booking_id }),
    )
    .await;

    let payment = load_payment(&state, payload.payment_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Payment manually verified.",
        "payment": payment,
    })))
}

pub async fn payment_receipt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Html<String>> {
    let payment = load_payment(&state, id).await?;
    let booking = load_booking(&state, payment.booking_id).await?;

    if !can_view(&claims, &booking) {
        return Err(AppError::PaymentNotFound);
    }
    if payment.status != PaymentStatus::Paid {
        return Err(AppError::validation(
            "Receipt is only available for paid payments.",
        ));
    }

    audit::record(
        &state.db,
        LogAction::ReceiptIssued,
        Some(claims.sub),
        json!({ "payment_id": payment.id }),
    )
    .await;

    let reference = payment
        .mpesa_receipt
        .or(payment.bank_reference)
        .unwrap_or_else(|| format!("PMT-{:06}", payment.id));

    Ok(Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>UsafiLink Receipt #{id}</title></head>\n<body>\n\
         <h1>UsafiLink Payment Receipt</h1>\n\
         <p>Receipt for payment #{id}</p>\n\
         <table>\n\
         <tr><td>Booking</td><td>#{booking_id}</td></tr>\n\
         <tr><td>Service</td><td>{service}</td></tr>\n\
         <tr><td>Amount</td><td>KES {amount}</td></tr>\n\
         <tr><td>Method</td><td>{method}</td></tr>\n\
         <tr><td>Reference</td><td>{reference}</td></tr>\n\
         <tr><td>Paid at</td><td>{paid_at}</td></tr>\n\
         </table>\n\
         <p>Thank you for using UsafiLink.</p>\n\
         </body>\n</html>\n",
        id = payment.id,
        booking_id = booking.id,
        service = booking.service_type.label(),
        amount = payment.amount,
        method = payment.payment_method.as_str(),
        reference = reference,
        paid_at = payment
            .paid_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
    )))
}

// ===== Daraja callback =====

#[derive(Debug, Deserialize)]
pub struct MpesaCallback {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,

    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,

    #[serde(rename = "ResultCode")]
    pub result_code: i32,

    #[serde(rename = "ResultDesc")]
    pub result_desc: String,

    #[serde(rename = "CallbackMetadata")]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Value")]
    pub value: Option<serde_json::Value>,
}

// Safaricom retries callbacks it considers unacknowledged, so this endpoint
// always answers ResultCode 0 regardless of what we did with the payload.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(payload): Json<MpesaCallback>,
) -> Json<Value> {
    let callback = payload.body.stk_callback;
    info!(
        "M-Pesa callback: {} result {}",
        callback.checkout_request_id, callback.result_code
    );

    let found = payments_of(&state)
        .find_one(doc! { "checkout_request_id": &callback.checkout_request_id })
        .await
        .ok()
        .flatten();

    // Fall back to MerchantRequestID when the checkout id does not match
    let found = match found {
        Some(p) => Some(p),
        None => payments_of(&state)
            .find_one(doc! { "merchant_request_id": &callback.merchant_request_id })
            .await
            .ok()
            .flatten(),
    };

    let Some(payment) = found else {
        warn!(
            "no payment found for M-Pesa callback {}",
            callback.checkout_request_id
        );
        return Json(json!({ "ResultCode": 0, "ResultDesc": "Success" }));
    };

    if callback.result_code == 0 {
        let receipt = callback.callback_metadata.as_ref().and_then(|meta| {
            meta.items
                .iter()
                .find(|item| item.name == "MpesaReceiptNumber")
                .and_then(|item| item.value.as_ref())
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        });

        if let Err(e) = mark_paid(&state, payment.id, receipt).await {
            error!("failed to apply M-Pesa callback: {}", e);
        }
    } else if let Err(e) = mark_failed(&state, payment.id, &callback.result_desc).await {
        error!("failed to apply M-Pesa failure callback: {}", e);
    }

    Json(json!({ "ResultCode": 0, "ResultDesc": "Success" }))
}
