use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use bcrypt::{hash, DEFAULT_COST};
use chrono::{Duration, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::{doc, to_bson};
use mongodb::Collection;
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::database::counters;
use crate::errors::{AppError, Result};
use crate::middleware::auth::require_admin;
use crate::models::audit::{LogAction, LogQuery, SystemLog};
use crate::models::booking::{Booking, BookingQuery, BookingStatus};
use crate::models::dispute::{
    CreateDisputeRequest, Dispute, DisputeQuery, DisputeStatus, ResolveDisputeRequest,
};
use crate::models::money::Money;
use crate::models::payment::{Payment, PaymentStatus};
use crate::models::user::{validate_phone_number, Claims, Role, User, UserResponse};
use crate::services::audit;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub role: Option<Role>,
    pub status: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdminCreateUserRequest {
    #[validate(length(min = 3, max = 30))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    pub phone_number: String,
    #[validate(length(min = 8))]
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdminUpdateUserRequest {
    #[validate(email)]
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

fn users_of(state: &AppState) -> Collection<User> {
    state.db.collection("users")
}

async fn load_target_user(state: &AppState, id: i64) -> Result<User> {
    users_of(state)
        .find_one(doc! { "_id": id })
        .await?
        .ok_or(AppError::UserNotFound)
}

// System-wide overview: user/booking/revenue counts with today and weekly
// slices. Revenue is summed from paid payments on the minor-unit
// representation.
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>> {
    require_admin(&claims)?;

    let now = Utc::now();
    let today = now.date_naive();
    let week_ago = now - Duration::days(7);

    let users = users_of(&state);
    let total_users = users.count_documents(doc! {}).await?;
    let mut users_by_role = Vec::new();
    for role in [Role::Customer, Role::Driver, Role::Admin] {
        let count = users.count_documents(doc! { "role": role.as_str() }).await?;
        users_by_role.push(json!({ "role": role.as_str(), "count": count }));
    }
    let active_drivers = users
        .count_documents(doc! { "role": Role::Driver.as_str(), "is_active": true })
        .await?;
    let online_drivers = users
        .count_documents(doc! { "role": Role::Driver.as_str(), "is_online": true })
        .await?;

    let bookings: Collection<Booking> = state.db.collection("bookings");
    let all_bookings: Vec<Booking> = bookings.find(doc! {}).await?.try_collect().await?;
    let bookings_today = all_bookings
        .iter()
        .filter(|b| b.created_at.date_naive() == today)
        .count();
    let bookings_week = all_bookings
        .iter()
        .filter(|b| b.created_at >= week_ago)
        .count();
    let mut bookings_by_status = Vec::new();
    for status in [
        BookingStatus::Pending,
        BookingStatus::Accepted,
        BookingStatus::Started,
        BookingStatus::Arrived,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ] {
        let count = all_bookings.iter().filter(|b| b.status == status).count();
        bookings_by_status.push(json!({ "status": status.as_str(), "count": count }));
    }

    let payments: Collection<Payment> = state.db.collection("payments");
    let paid: Vec<Payment> = payments
        .find(doc! { "status": PaymentStatus::Paid.as_str() })
        .await?
        .try_collect()
        .await?;
    let total_revenue: Money = paid.iter().map(|p| p.amount).sum();
    let revenue_today: Money = paid
        .iter()
        .filter(|p| p.paid_at.map(|t| t.date_naive() == today).unwrap_or(false))
        .map(|p| p.amount)
        .sum();
    let revenue_week: Money = paid
        .iter()
        .filter(|p| p.paid_at.map(|t| t >= week_ago).unwrap_or(false))
        .map(|p| p.amount)
        .sum();

    let disputes: Collection<Dispute> = state.db.collection("disputes");
    let pending_disputes = disputes
        .count_documents(doc! { "status": DisputeStatus::Pending.as_str() })
        .await?;

    let logs: Collection<SystemLog> = state.db.collection("system_logs");
    let mut recent_logs: Vec<SystemLog> = logs.find(doc! {}).await?.try_collect().await?;
    recent_logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent_logs.truncate(10);

    Ok(Json(json!({
        "overview": {
            "total_users": total_users,
            "total_bookings": all_bookings.len(),
            "total_revenue": total_revenue,
            "active_drivers": active_drivers,
            "online_drivers": online_drivers,
            "pending_disputes": pending_disputes,
        },
        "today": {
            "new_bookings": bookings_today,
            "revenue": revenue_today,
        },
        "weekly": {
            "new_bookings": bookings_week,
            "revenue": revenue_week,
        },
        "breakdown": {
            "users_by_role": users_by_role,
            "bookings_by_status": bookings_by_status,
        },
        "recent_activities": recent_logs,
    })))
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Vec<UserResponse>>> {
    require_admin(&claims)?;

    let mut filter = doc! {};
    if let Some(role) = query.role {
        filter.insert("role", role.as_str());
    }
    match query.status.as_deref() {
        Some("active") => {
            filter.insert("is_active", true);
        }
        Some("inactive") => {
            filter.insert("is_active", false);
        }
        _ => {}
    }
    if let Some(search) = &query.search {
        filter.insert(
            "$or",
            vec![
                doc! { "username": { "$regex": search, "$options": "i" } },
                doc! { "email": { "$regex": search, "$options": "i" } },
                doc! { "phone_number": { "$regex": search, "$options": "i" } },
            ],
        );
    }

    let cursor = users_of(&state).find(filter).await?;
    let mut users: Vec<User> = cursor.try_collect().await?;
    users.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(users.iter().map(UserResponse::from).collect()))
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<AdminCreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>)> {
    require_admin(&claims)?;

    payload
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;
    if !validate_phone_number(&payload.phone_number) {
        return Err(AppError::validation(
            "Phone number must be in the format 254XXXXXXXXX.",
        ));
    }

    let users = users_of(&state);
    let existing = users
        .find_one(doc! {
            "$or": [
                { "username": &payload.username },
                { "email": &payload.email },
                { "phone_number": &payload.phone_number }
            ]
        })
        .await?;
    if existing.is_some() {
        return Err(AppError::DuplicateKey);
    }

    let now = Utc::now();
    let user = User {
        id: counters::next_id(&state.db, "users").await?,
        username: payload.username,
        email: payload.email,
        phone_number: payload.phone_number,
        password_hash: hash(&payload.password, DEFAULT_COST)?,
        role: payload.role,
        is_active: true,
        is_online: false,
        is_two_factor_enabled: false,
        two_factor_code: None,
        created_at: now,
        updated_at: now,
    };
    users.insert_one(&user).await?;

    audit::record(
        &state.db,
        LogAction::UserCreated,
        Some(claims.sub),
        json!({ "user_id": user.id, "role": user.role.as_str() }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>> {
    require_admin(&claims)?;
    let user = load_target_user(&state, id).await?;
    Ok(Json(UserResponse::from(&user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<AdminUpdateUserRequest>,
) -> Result<Json<UserResponse>> {
    require_admin(&claims)?;
    payload
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;

    load_target_user(&state, id).await?;

    let mut update = doc! { "updated_at": to_bson(&Utc::now())? };
    if let Some(email) = payload.email {
        update.insert("email", email);
    }
    if let Some(phone) = payload.phone_number {
        if !validate_phone_number(&phone) {
            return Err(AppError::validation(
                "Phone number must be in the format 254XXXXXXXXX.",
            ));
        }
        update.insert("phone_number", phone);
    }
    if let Some(is_active) = payload.is_active {
        update.insert("is_active", is_active);
    }

    users_of(&state)
        .update_one(doc! { "_id": id }, doc! { "$set": update })
        .await?;

    audit::record(
        &state.db,
        LogAction::UserUpdated,
        Some(claims.sub),
        json!({ "user_id": id }),
    )
    .await;

    let user = load_target_user(&state, id).await?;
    Ok(Json(UserResponse::from(&user)))
}

async fn set_active(state: &AppState, claims: &Claims, id: i64, active: bool) -> Result<()> {
    load_target_user(state, id).await?;

    users_of(state)
        .update_one(
            doc! { "_id": id },
            doc! { "$set": {
                "is_active": active,
                "updated_at": to_bson(&Utc::now())?,
            }},
        )
        .await?;

    audit::record(
        &state.db,
        LogAction::UserUpdated,
        Some(claims.sub),
        json!({ "user_id": id, "is_active": active }),
    )
    .await;

    Ok(())
}

pub async fn activate_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    require_admin(&claims)?;
    set_active(&state, &claims, id, true).await?;
    Ok(Json(json!({ "status": "User activated" })))
}

pub async fn deactivate_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    require_admin(&claims)?;
    set_active(&state, &claims, id, false).await?;
    Ok(Json(json!({ "status": "User deactivated" })))
}

// Role changes go through the closed enum; an unknown role is rejected at
// deserialization, and the change lands on the target's next fetch.
pub async fn change_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<ChangeRoleRequest>,
) -> Result<Json<Value>> {
    require_admin(&claims)?;
    load_target_user(&state, id).await?;

    users_of(&state)
        .update_one(
            doc! { "_id": id },
            doc! { "$set": {
                "role": payload.role.as_str(),
                "updated_at": to_bson(&Utc::now())?,
            }},
        )
        .await?;

    audit::record(
        &state.db,
        LogAction::UserUpdated,
        Some(claims.sub),
        json!({ "user_id": id, "role": payload.role.as_str() }),
    )
    .await;

    Ok(Json(json!({
        "status": format!("Role changed to {}", payload.role.as_str())
    })))
}

pub async fn list_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<BookingQuery>,
) -> Result<Json<Vec<Booking>>> {
    require_admin(&claims)?;

    let mut filter = doc! {};
    if let Some(status) = query.status {
        filter.insert("status", status.as_str());
    }

    let bookings: Collection<Booking> = state.db.collection("bookings");
    let mut all: Vec<Booking> = bookings.find(filter).await?.try_collect().await?;
    all.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(all))
}

fn disputes_of(state: &AppState) -> Collection<Dispute> {
    state.db.collection("disputes")
}

pub async fn create_dispute(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateDisputeRequest>,
) -> Result<(StatusCode, Json<Dispute>)> {
    require_admin(&claims)?;

    if payload.reason.trim().is_empty() {
        return Err(AppError::validation("Dispute reason is required."));
    }

    let bookings: Collection<Booking> = state.db.collection("bookings");
    bookings
        .find_one(doc! { "_id": payload.booking_id })
        .await?
        .ok_or(AppError::BookingNotFound)?;

    let now = Utc::now();
    let dispute = Dispute {
        id: counters::next_id(&state.db, "disputes").await?,
        booking_id: payload.booking_id,
        raised_by: claims.sub,
        reason: payload.reason,
        status: DisputeStatus::Pending,
        resolution: None,
        resolved_by: None,
        resolved_at: None,
        created_at: now,
        updated_at: now,
    };
    disputes_of(&state).insert_one(&dispute).await?;

    Ok((StatusCode::CREATED, Json(dispute)))
}

pub async fn list_disputes(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<DisputeQuery>,
) -> Result<Json<Vec<Dispute>>> {
    require_admin(&claims)?;

    let mut filter = doc! {};
    if let Some(status) = query.status {
        filter.insert("status", status.as_str());
    }

    let mut disputes: Vec<Dispute> = disputes_of(&state).find(filter).await?.try_collect().await?;
    disputes.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(disputes))
}

async fn close_dispute(
    state: &AppState,
    claims: &Claims,
    id: i64,
    status: DisputeStatus,
    resolution: Option<String>,
) -> Result<()> {
    let dispute = disputes_of(state)
        .find_one(doc! { "_id": id })
        .await?
        .ok_or(AppError::DisputeNotFound)?;

    if dispute.status != DisputeStatus::Pending {
        return Err(AppError::validation("Dispute is already closed."));
    }

    let now = Utc::now();
    let mut set = doc! {
        "status": status.as_str(),
        "resolved_by": claims.sub,
        "resolved_at": to_bson(&now)?,
        "updated_at": to_bson(&now)?,
    };
    if let Some(resolution) = resolution {
        set.insert("resolution", resolution);
    }

    disputes_of(state)
        .update_one(
            doc! { "_id": id, "status": DisputeStatus::Pending.as_str() },
            doc! { "$set": set },
        )
        .await?;

    Ok(())
}

pub async fn resolve_dispute(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<ResolveDisputeRequest>,
) -> Result<Json<Value>> {
    require_admin(&claims)?;

    if payload.resolution.trim().is_empty() {
        return Err(AppError::validation("Resolution text is required."));
    }

    close_dispute(
        &state,
        &claims,
        id,
        DisputeStatus::Resolved,
        Some(payload.resolution),
    )
    .await?;

    audit::record(
        &state.db,
        LogAction::DisputeResolved,
        Some(claims.sub),
        json!({ "dispute_id": id }),
    )
    .await;

    Ok(Json(json!({ "status": "Dispute resolved" })))
}

pub async fn dismiss_dispute(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    require_admin(&claims)?;

    close_dispute(&state, &claims, id, DisputeStatus::Dismissed, None).await?;

    audit::record(
        &state.db,
        LogAction::DisputeDismissed,
        Some(claims.sub),
        json!({ "dispute_id": id }),
    )
    .await;

    Ok(Json(json!({ "status": "Dispute dismissed" })))
}

pub async fn list_logs(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<SystemLog>>> {
    require_admin(&claims)?;

    let mut filter = doc! {};
    if let Some(action) = query.action {
        filter.insert("action", action.as_str());
    }
    if let Some(user_id) = query.user_id {
        filter.insert("user_id", user_id);
    }

    let logs: Collection<SystemLog> = state.db.collection("system_logs");
    let mut entries: Vec<SystemLog> = logs.find(filter).await?.try_collect().await?;
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(entries))
}
