use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, to_bson, Document};
use mongodb::Collection;
use serde_json::{json, Value};
use tracing::warn;

use crate::database::counters;
use crate::errors::{AppError, Result};
use crate::middleware::auth::{require_admin, require_driver};
use crate::models::audit::LogAction;
use crate::models::booking::{
    AssignDriverRequest, Booking, BookingPaymentStatus, BookingQuery, BookingStatus,
    CreateBookingRequest, EstimateRequest, UpdateBookingRequest,
};
use crate::models::money::Money;
use crate::models::payment::{Payment, PaymentStatus};
use crate::models::user::{Claims, Role, User};
use crate::services::{audit, pricing};
use crate::state::AppState;

const ACTIVE_STATUSES: [&str; 3] = ["accepted", "started", "arrived"];

fn bookings_of(state: &AppState) -> Collection<Booking> {
    state.db.collection("bookings")
}

async fn load_booking(state: &AppState, id: i64) -> Result<Booking> {
    bookings_of(state)
        .find_one(doc! { "_id": id })
        .await?
        .ok_or(AppError::BookingNotFound)
}

async fn load_user(state: &AppState, id: i64) -> Result<User> {
    let users: Collection<User> = state.db.collection("users");
    users
        .find_one(doc! { "_id": id })
        .await?
        .ok_or(AppError::UserNotFound)
}

// The status enum's transition table is the single authority; any action
// whose target is not reachable from the current status gets rejected here
// with the row untouched.
fn guard_transition(booking: &Booking, next: BookingStatus) -> Result<()> {
    if booking.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(AppError::IllegalTransition(format!(
            "Booking #{} cannot move from {} to {}.",
            booking.id,
            booking.status.as_str(),
            next.as_str()
        )))
    }
}

fn can_view(claims: &Claims, booking: &Booking) -> bool {
    match claims.role {
        Role::Admin => true,
        Role::Customer => booking.customer_id == claims.sub,
        Role::Driver => booking.driver_id == Some(claims.sub),
    }
}

fn require_assigned_driver(claims: &Claims, booking: &Booking) -> Result<()> {
    require_driver(claims)?;
    if booking.driver_id != Some(claims.sub) {
        return Err(AppError::forbidden("Not your job."));
    }
    Ok(())
}

fn notify_customer<F>(state: &AppState, send: F)
where
    F: FnOnce(std::sync::Arc<crate::services::sms_service::SmsService>) -> tokio::task::JoinHandle<()>,
{
    if let Some(sms) = state.sms.clone() {
        send(sms);
    }
}

pub async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>)> {
    if !claims.role.is_customer() {
        return Err(AppError::forbidden("Only customers can create bookings."));
    }
    if payload.location_name.trim().is_empty() {
        return Err(AppError::validation("Location name is required."));
    }

    // Advisory estimate; the server's stored figure is what gets billed.
    let quote = pricing::estimate(payload.service_type, payload.tank_size, None);

    let now = Utc::now();
    let booking = Booking {
        id: counters::next_id(&state.db, "bookings").await?,
        customer_id: claims.sub,
        driver_id: None,
        location_name: payload.location_name,
        address: payload.address,
        latitude: payload.latitude,
        longitude: payload.longitude,
        service_type: payload.service_type,
        tank_size: payload.tank_size,
        special_instructions: payload.special_instructions,
        scheduled_date: payload.scheduled_date,
        estimated_price: quote.total,
        final_price: None,
        status: BookingStatus::Pending,
        payment_status: BookingPaymentStatus::Pending,
        created_at: now,
        updated_at: now,
        completed_at: None,
    };

    bookings_of(&state).insert_one(&booking).await?;

    audit::record(
        &state.db,
        LogAction::BookingCreated,
        Some(claims.sub),
        json!({ "booking_id": booking.id, "service_type": booking.service_type }),
    )
    .await;

    // Confirmation SMS goes out in the background; a dead gateway must not
    // fail the booking.
    if let Ok(customer) = load_user(&state, claims.sub).await {
        let booking_id = booking.id;
        notify_customer(&state, move |sms| {
            tokio::spawn(async move {
                if let Err(e) = sms
                    .send_booking_confirmation(&customer.phone_number, booking_id)
                    .await
                {
                    warn!("failed to send booking confirmation: {}", e);
                }
            })
        });
    }

    Ok((StatusCode::CREATED, Json(booking)))
}

// Customers see their own bookings, drivers the ones assigned to them,
// admins everything.
pub async fn list_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<BookingQuery>,
) -> Result<Json<Vec<Booking>>> {
    let mut filter = match claims.role {
        Role::Customer => doc! { "customer_id": claims.sub },
        Role::Driver => doc! { "driver_id": claims.sub },
        Role::Admin => doc! {},
    };
    if let Some(status) = query.status {
        filter.insert("status", status.as_str());
    }

    let cursor = bookings_of(&state).find(filter).await?;
    let mut bookings: Vec<Booking> = cursor.try_collect().await?;
    bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(bookings))
}

pub async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Json<Booking>> {
    let booking = load_booking(&state, id).await?;
    if !can_view(&claims, &booking) {
        return Err(AppError::BookingNotFound);
    }
    Ok(Json(booking))
}

pub async fn update_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateBookingRequest>,
) -> Result<Json<Booking>> {
    let booking = load_booking(&state, id).await?;

    let is_owner = claims.role.is_customer() && booking.customer_id == claims.sub;
    if !is_owner && !claims.role.is_admin() {
        return Err(AppError::forbidden("You cannot edit this booking."));
    }
    if booking.status != BookingStatus::Pending {
        return Err(AppError::validation("Only pending bookings can be edited."));
    }

    let mut update = doc! { "updated_at": to_bson(&Utc::now())? };
    if let Some(date) = payload.scheduled_date {
        update.insert("scheduled_date", to_bson(&date)?);
    }
    if let Some(instructions) = payload.special_instructions {
        update.insert("special_instructions", instructions);
    }
    if let Some(name) = payload.location_name {
        update.insert("location_name", name);
    }
    if let Some(address) = payload.address {
        update.insert("address", address);
    }

    bookings_of(&state)
        .update_one(doc! { "_id": id }, doc! { "$set": update })
        .await?;

    audit::record(
        &state.db,
        LogAction::BookingUpdated,
        Some(claims.sub),
        json!({ "booking_id": id }),
    )
    .await;

    let booking = load_booking(&state, id).await?;
    Ok(Json(booking))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let booking = load_booking(&state, id).await?;

    let is_owner = claims.role.is_customer() && booking.customer_id == claims.sub;
    if !is_owner && !claims.role.is_admin() {
        return Err(AppError::forbidden("You cannot cancel this booking."));
    }

    guard_transition(&booking, BookingStatus::Cancelled)?;

    bookings_of(&state)
        .update_one(
            doc! { "_id": id, "status": BookingStatus::Pending.as_str() },
            doc! { "$set": {
                "status": BookingStatus::Cancelled.as_str(),
                "updated_at": to_bson(&Utc::now())?,
            }},
        )
        .await?;

    audit::record(
        &state.db,
        LogAction::BookingCancelled,
        Some(claims.sub),
        json!({ "booking_id": id }),
    )
    .await;

    Ok(Json(json!({ "detail": "Booking cancelled." })))
}

pub async fn accept_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    require_driver(&claims)?;
    let booking = load_booking(&state, id).await?;

    // Second accept by the same driver is a no-op, never a double-assign.
    if booking.status == BookingStatus::Accepted && booking.driver_id == Some(claims.sub) {
        return Ok(Json(json!({ "detail": "Booking already accepted." })));
    }

    guard_transition(&booking, BookingStatus::Accepted)?;

    if let Some(driver_id) = booking.driver_id {
        if driver_id != claims.sub {
            return Err(AppError::validation(
                "Booking already assigned to another driver.",
            ));
        }
    }

    // One current job per driver: accepting while another job is open is
    // rejected rather than left to whichever fetch happens to come back first.
    let active = bookings_of(&state)
        .count_documents(doc! {
            "driver_id": claims.sub,
            "status": { "$in": ACTIVE_STATUSES.to_vec() },
        })
        .await?;
    if active > 0 {
        return Err(AppError::validation(
            "You already have an active job. Complete it before accepting another.",
        ));
    }

    // Guard on the stored status so a concurrent accept loses cleanly.
    let updated = bookings_of(&state)
        .update_one(
            doc! { "_id": id, "status": BookingStatus::Pending.as_str() },
            doc! { "$set": {
                "driver_id": claims.sub,
                "status": BookingStatus::Accepted.as_str(),
                "updated_at": to_bson(&Utc::now())?,
            }},
        )
        .await?;

    if updated.modified_count == 0 {
        return Err(AppError::validation("Booking cannot be accepted."));
    }

    if let (Ok(customer), Ok(driver)) = (
        load_user(&state, booking.customer_id).await,
        load_user(&state, claims.sub).await,
    ) {
        notify_customer(&state, move |sms| {
            tokio::spawn(async move {
                if let Err(e) = sms
                    .send_driver_on_the_way(&customer.phone_number, &driver.username)
                    .await
                {
                    warn!("failed to send driver assignment SMS: {}", e);
                }
            })
        });
    }

    Ok(Json(json!({ "detail": "Booking accepted." })))
}

pub async fn start_job(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let booking = load_booking(&state, id).await?;
    require_assigned_driver(&claims, &booking)?;
    guard_transition(&booking, BookingStatus::Started)?;

    bookings_of(&state)
        .update_one(
            doc! { "_id": id, "status": booking.status.as_str() },
            doc! { "$set": {
                "status": BookingStatus::Started.as_str(),
                "updated_at": to_bson(&Utc::now())?,
            }},
        )
        .await?;

    Ok(Json(json!({ "detail": "Job started. You are now on the way." })))
}

pub async fn arrive_at_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let booking = load_booking(&state, id).await?;
    require_assigned_driver(&claims, &booking)?;
    guard_transition(&booking, BookingStatus::Arrived)?;

    bookings_of(&state)
        .update_one(
            doc! { "_id": id, "status": booking.status.as_str() },
            doc! { "$set": {
                "status": BookingStatus::Arrived.as_str(),
                "updated_at": to_bson(&Utc::now())?,
            }},
        )
        .await?;

    Ok(Json(json!({ "detail": "Arrived at destination." })))
}

pub async fn complete_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let booking = load_booking(&state, id).await?;

    // Idempotency: a repeated complete succeeds without re-running anything.
    if booking.status == BookingStatus::Completed {
        return Ok(Json(json!({ "detail": "Booking is already completed." })));
    }

    if !claims.role.is_admin() {
        require_assigned_driver(&claims, &booking)?;
    }
    guard_transition(&booking, BookingStatus::Completed)?;

    // The server decides the billed figure; without an adjustment that is
    // the stored estimate. Settlement stays pending until a payment lands.
    let final_price = booking.estimated_price;
    let now = Utc::now();

    bookings_of(&state)
        .update_one(
            doc! { "_id": id, "status": booking.status.as_str() },
            doc! { "$set": {
                "status": BookingStatus::Completed.as_str(),
                "final_price": to_bson(&final_price)?,
                "completed_at": to_bson(&now)?,
                "updated_at": to_bson(&now)?,
            }},
        )
        .await?;

    audit::record(
        &state.db,
        LogAction::ServiceCompleted,
        Some(claims.sub),
        json!({ "booking_id": id, "final_price": final_price }),
    )
    .await;

    if let Ok(customer) = load_user(&state, booking.customer_id).await {
        let amount = final_price.to_string();
        notify_customer(&state, move |sms| {
            tokio::spawn(async move {
                if let Err(e) = sms
                    .send_completion_notice(&customer.phone_number, id, &amount)
                    .await
                {
                    warn!("failed to send completion SMS: {}", e);
                }
            })
        });
    }

    Ok(Json(json!({
        "detail": "Booking completed successfully. Invoice generated."
    })))
}

// Unassigned pending jobs, visible only to online drivers.
pub async fn available_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Booking>>> {
    require_driver(&claims)?;

    let driver = load_user(&state, claims.sub).await?;
    if !driver.is_online {
        return Err(AppError::forbidden("You must be online to receive jobs."));
    }

    let cursor = bookings_of(&state)
        .find(doc! {
            "status": BookingStatus::Pending.as_str(),
            "driver_id": null,
        })
        .await?;
    let mut bookings: Vec<Booking> = cursor.try_collect().await?;
    bookings.sort_by(|a, b| a.scheduled_date.cmp(&b.scheduled_date));

    Ok(Json(bookings))
}

pub async fn assign_driver(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<AssignDriverRequest>,
) -> Result<Json<Value>> {
    require_admin(&claims)?;

    let booking = load_booking(&state, id).await?;
    if booking.status != BookingStatus::Pending {
        return Err(AppError::validation(
            "Only pending bookings can be assigned a driver.",
        ));
    }

    let driver = load_user(&state, payload.driver_id).await?;
    if !driver.role.is_driver() || !driver.is_active {
        return Err(AppError::validation("Driver not found or invalid role."));
    }

    // Assignment only points the booking at the driver; it stays pending
    // until that driver accepts.
    bookings_of(&state)
        .update_one(
            doc! { "_id": id, "status": BookingStatus::Pending.as_str() },
            doc! { "$set": {
                "driver_id": driver.id,
                "updated_at": to_bson(&Utc::now())?,
            }},
        )
        .await?;

    audit::record(
        &state.db,
        LogAction::DriverAssigned,
        Some(claims.sub),
        json!({ "booking_id": id, "driver_id": driver.id }),
    )
    .await;

    Ok(Json(json!({
        "detail": format!(
            "Driver {} successfully assigned to booking #{}.",
            driver.username, id
        )
    })))
}

// Role-shaped dashboard aggregates. All money is summed on the minor-unit
// representation.
pub async fn booking_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>> {
    let filter = match claims.role {
        Role::Customer => doc! { "customer_id": claims.sub },
        Role::Driver => doc! { "driver_id": claims.sub },
        Role::Admin => doc! {},
    };

    let cursor = bookings_of(&state).find(filter).await?;
    let bookings: Vec<Booking> = cursor.try_collect().await?;

    let count_status =
        |s: BookingStatus| bookings.iter().filter(|b| b.status == s).count();

    match claims.role {
        Role::Customer => {
            let spent = paid_total(&state, &bookings).await?;
            Ok(Json(json!({
                "total": bookings.len(),
                "completed": count_status(BookingStatus::Completed),
                "pending": count_status(BookingStatus::Pending),
                "cancelled": count_status(BookingStatus::Cancelled),
                "spent": spent,
            })))
        }
        Role::Driver => {
            let completed: Vec<&Booking> = bookings
                .iter()
                .filter(|b| b.status == BookingStatus::Completed)
                .collect();
            let earnings: Money = completed
                .iter()
                .filter_map(|b| b.final_price)
                .sum();

            let today = Utc::now().date_naive();
            let today_jobs: Vec<&&Booking> = completed
                .iter()
                .filter(|b| {
                    b.completed_at
                        .map(|t| t.date_naive() == today)
                        .unwrap_or(false)
                })
                .collect();
            let today_earnings: Money = today_jobs
                .iter()
                .filter_map(|b| b.final_price)
                .sum();

            Ok(Json(json!({
                "summary": {
                    "jobs_done": completed.len(),
                    "total_jobs": bookings.len(),
                    "earnings": earnings,
                },
                "today": {
                    "earnings": today_earnings,
                    "jobs": today_jobs.len(),
                },
            })))
        }
        Role::Admin => {
            let payments: Collection<Payment> = state.db.collection("payments");
            let cursor = payments
                .find(doc! { "status": PaymentStatus::Paid.as_str() })
                .await?;
            let paid: Vec<Payment> = cursor.try_collect().await?;
            let revenue: Money = paid.iter().map(|p| p.amount).sum();

            let active = bookings.iter().filter(|b| b.status.is_active()).count()
                + count_status(BookingStatus::Pending);

            let users: Collection<User> = state.db.collection("users");
            let available_drivers = users
                .count_documents(doc! { "role": Role::Driver.as_str(), "is_active": true })
                .await?;

            Ok(Json(json!({
                "revenue": { "total": revenue },
                "quick_stats": {
                    "active_bookings": active,
                    "available_drivers": available_drivers,
                    "completed_bookings": count_status(BookingStatus::Completed),
                },
            })))
        }
    }
}

async fn paid_total(state: &AppState, bookings: &[Booking]) -> Result<Money> {
    let ids: Vec<i64> = bookings.iter().map(|b| b.id).collect();
    if ids.is_empty() {
        return Ok(Money::ZERO);
    }

    let payments: Collection<Payment> = state.db.collection("payments");
    let filter: Document = doc! {
        "booking_id": { "$in": ids },
        "status": PaymentStatus::Paid.as_str(),
    };
    let cursor = payments.find(filter).await?;
    let paid: Vec<Payment> = cursor.try_collect().await?;

    Ok(paid.iter().map(|p| p.amount).sum())
}

// Public: the booking form re-quotes on every service/tank change, so this
// endpoint takes no auth and never blocks booking submission.
pub async fn estimate_price(
    Json(payload): Json<EstimateRequest>,
) -> Json<pricing::PriceEstimate> {
    Json(pricing::estimate(
        payload.service_type,
        payload.tank_size,
        payload.distance_km,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::booking::{ServiceType, TankSize};
    use crate::models::user::TokenKind;

    fn booking(status: BookingStatus, customer: i64, driver: Option<i64>) -> Booking {
        let now = Utc::now();
        Booking {
            id: 1,
            customer_id: customer,
            driver_id: driver,
            location_name: "Kilimani".to_string(),
            address: None,
            latitude: -1.2921,
            longitude: 36.8219,
            service_type: ServiceType::GreaseTrap,
            tank_size: TankSize::L1000,
            special_instructions: None,
            scheduled_date: now,
            estimated_price: Money::from_major(3500),
            final_price: None,
            status,
            payment_status: BookingPaymentStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn claims(sub: i64, role: Role) -> Claims {
        Claims {
            sub,
            username: format!("user{}", sub),
            role,
            token_type: TokenKind::Access,
            exp: 0,
        }
    }

    #[test]
    fn guard_rejects_illegal_transitions_with_both_states_named() {
        let b = booking(BookingStatus::Completed, 1, Some(2));
        let err = guard_transition(&b, BookingStatus::Started).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("completed"));
        assert!(msg.contains("started"));

        assert!(guard_transition(
            &booking(BookingStatus::Arrived, 1, Some(2)),
            BookingStatus::Completed
        )
        .is_ok());
    }

    #[test]
    fn visibility_follows_role_and_ownership() {
        let b = booking(BookingStatus::Accepted, 10, Some(20));

        assert!(can_view(&claims(10, Role::Customer), &b));
        assert!(!can_view(&claims(11, Role::Customer), &b));
        assert!(can_view(&claims(20, Role::Driver), &b));
        assert!(!can_view(&claims(21, Role::Driver), &b));
        assert!(can_view(&claims(99, Role::Admin), &b));
    }

    #[test]
    fn assigned_driver_check_rejects_other_drivers() {
        let b = booking(BookingStatus::Accepted, 10, Some(20));
        assert!(require_assigned_driver(&claims(20, Role::Driver), &b).is_ok());
        assert!(require_assigned_driver(&claims(21, Role::Driver), &b).is_err());
        assert!(require_assigned_driver(&claims(10, Role::Customer), &b).is_err());
    }
}
