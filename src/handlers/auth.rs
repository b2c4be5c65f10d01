use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    Extension,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use mongodb::bson::{doc, to_bson};
use mongodb::Collection;
use rand::Rng;
use serde_json::{json, Value};
use tracing::warn;
use validator::Validate;

use crate::config::AppConfig;
use crate::database::counters;
use crate::errors::{AppError, Result};
use crate::models::audit::LogAction;
use crate::models::user::{
    validate_phone_number, ChangePasswordRequest, Claims, LoginRequest, RefreshRequest,
    RegisterRequest, Role, TokenKind, TwoFactorCode, TwoFactorDisableRequest,
    TwoFactorLoginRequest, TwoFactorVerifyRequest, UpdateProfileRequest, User, UserResponse,
};
use crate::services::audit;
use crate::state::AppState;

const MAX_CODE_ATTEMPTS: i32 = 5;

fn issue_token(config: &AppConfig, user: &User, kind: TokenKind) -> Result<String> {
    let ttl = match kind {
        TokenKind::Refresh => Duration::days(config.refresh_token_ttl_days),
        // Admin sessions expire after the idle window; everyone else gets a day.
        TokenKind::Access => match user.role {
            Role::Admin => Duration::minutes(config.admin_token_ttl_minutes),
            _ => Duration::hours(config.access_token_ttl_hours),
        },
    };

    let claims = Claims {
        sub: user.id,
        username: user.username.clone(),
        role: user.role,
        token_type: kind,
        exp: (Utc::now() + ttl).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_ref()),
    )
    .map_err(|_| AppError::AuthError)
}

fn token_pair(config: &AppConfig, user: &User) -> Result<Value> {
    Ok(json!({
        "access": issue_token(config, user, TokenKind::Access)?,
        "refresh": issue_token(config, user, TokenKind::Refresh)?,
        "user": UserResponse::from(user),
    }))
}

async fn load_user(state: &AppState, user_id: i64) -> Result<User> {
    let users: Collection<User> = state.db.collection("users");
    users
        .find_one(doc! { "_id": user_id })
        .await?
        .ok_or(AppError::UserNotFound)
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06}", rng.gen_range(0..1_000_000))
}

// Hash and store a fresh one-time code on the user, then push it out via SMS.
async fn issue_two_factor_code(state: &AppState, user: &User) -> Result<()> {
    let code = generate_code();
    let two_factor = TwoFactorCode {
        code_hash: hash(&code, DEFAULT_COST)?,
        expires_at: Utc::now() + Duration::minutes(5),
        attempts: 0,
    };

    let users: Collection<User> = state.db.collection("users");
    users
        .update_one(
            doc! { "_id": user.id },
            doc! { "$set": {
                "two_factor_code": to_bson(&two_factor)?,
                "updated_at": to_bson(&Utc::now())?,
            }},
        )
        .await?;

    if let Some(sms) = state.sms.clone() {
        let phone = user.phone_number.clone();
        tokio::spawn(async move {
            if let Err(e) = sms.send_two_factor_code(&phone, &code).await {
                warn!("failed to send login code: {}", e);
            }
        });
    } else {
        warn!("SMS service not configured; login code for user {} not delivered", user.id);
    }

    Ok(())
}

async fn verify_two_factor_code(state: &AppState, user: &User, code: &str) -> Result<()> {
    let stored = user.two_factor_code.as_ref().ok_or(AppError::AuthError)?;

    if stored.expires_at < Utc::now() || stored.attempts >= MAX_CODE_ATTEMPTS {
        return Err(AppError::AuthError);
    }

    let users: Collection<User> = state.db.collection("users");

    if !verify(code, &stored.code_hash)? {
        users
            .update_one(
                doc! { "_id": user.id },
                doc! { "$inc": { "two_factor_code.attempts": 1 } },
            )
            .await?;
        return Err(AppError::AuthError);
    }

    users
        .update_one(
            doc! { "_id": user.id },
            doc! { "$unset": { "two_factor_code": "" } },
        )
        .await?;

    Ok(())
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>)> {
    payload
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;

    if !validate_phone_number(&payload.phone_number) {
        return Err(AppError::validation(
            "Phone number must be in the format 254XXXXXXXXX.",
        ));
    }

    let role = payload.role.unwrap_or(Role::Customer);
    if role.is_admin() {
        return Err(AppError::forbidden("Admin accounts cannot self-register."));
    }

    let users: Collection<User> = state.db.collection("users");

    // Check if user exists by username, email or phone
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
        role,
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
        Some(user.id),
        json!({ "username": user.username, "role": user.role.as_str() }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<Value>> {
    let users: Collection<User> = state.db.collection("users");

    let user = users
        .find_one(doc! { "username": &payload.username })
        .await?
        .ok_or(AppError::AuthError)?;

    if !verify(&payload.password, &user.password_hash)? {
        return Err(AppError::AuthError);
    }

    if !user.is_active {
        return Err(AppError::forbidden("Account is deactivated."));
    }

    // 2FA short-circuit: no tokens until the one-time code checks out
    if user.is_two_factor_enabled {
        issue_two_factor_code(&state, &user).await?;
        return Ok(Json(json!({
            "two_factor_required": true,
            "user_id": user.id,
            "detail": "A login code has been sent to your phone.",
        })));
    }

    Ok(Json(token_pair(&state.config, &user)?))
}

pub async fn two_factor_login(
    State(state): State<AppState>,
    Json(payload): Json<TwoFactorLoginRequest>,
) -> Result<Json<Value>> {
    let user = load_user(&state, payload.user_id).await?;

    if !user.is_active || !user.is_two_factor_enabled {
        return Err(AppError::AuthError);
    }

    verify_two_factor_code(&state, &user, &payload.code).await?;

    Ok(Json(token_pair(&state.config, &user)?))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<Value>> {
    let decoding_key = DecodingKey::from_secret(state.config.jwt_secret.as_ref());
    let token_data = decode::<Claims>(
        &payload.refresh,
        &decoding_key,
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AppError::AuthError)?;

    if token_data.claims.token_type != TokenKind::Refresh {
        return Err(AppError::AuthError);
    }

    let user = load_user(&state, token_data.claims.sub).await?;
    if !user.is_active {
        return Err(AppError::AuthError);
    }

    Ok(Json(json!({
        "access": issue_token(&state.config, &user, TokenKind::Access)?,
    })))
}

pub async fn two_factor_setup(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>> {
    let user = load_user(&state, claims.sub).await?;
    issue_two_factor_code(&state, &user).await?;

    Ok(Json(json!({
        "detail": "A verification code has been sent to your phone.",
    })))
}

pub async fn two_factor_verify(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<TwoFactorVerifyRequest>,
) -> Result<Json<Value>> {
    let user = load_user(&state, claims.sub).await?;
    verify_two_factor_code(&state, &user, &payload.code).await?;

    let users: Collection<User> = state.db.collection("users");
    users
        .update_one(
            doc! { "_id": user.id },
            doc! { "$set": {
                "is_two_factor_enabled": true,
                "updated_at": to_bson(&Utc::now())?,
            }},
        )
        .await?;

    Ok(Json(json!({
        "detail": "Two-factor authentication enabled.",
    })))
}

pub async fn two_factor_disable(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<TwoFactorDisableRequest>,
) -> Result<Json<Value>> {
    let user = load_user(&state, claims.sub).await?;

    if !verify(&payload.password, &user.password_hash)? {
        return Err(AppError::AuthError);
    }

    let users: Collection<User> = state.db.collection("users");
    users
        .update_one(
            doc! { "_id": user.id },
            doc! {
                "$set": {
                    "is_two_factor_enabled": false,
                    "updated_at": to_bson(&Utc::now())?,
                },
                "$unset": { "two_factor_code": "" },
            },
        )
        .await?;

    Ok(Json(json!({
        "detail": "Two-factor authentication disabled.",
    })))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>> {
    let user = load_user(&state, claims.sub).await?;
    Ok(Json(UserResponse::from(&user)))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>> {
    payload
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;

    let mut update = doc! { "updated_at": to_bson(&Utc::now())? };

    if let Some(email) = &payload.email {
        update.insert("email", email);
    }
    if let Some(phone) = &payload.phone_number {
        if !validate_phone_number(phone) {
            return Err(AppError::validation(
                "Phone number must be in the format 254XXXXXXXXX.",
            ));
        }
        update.insert("phone_number", phone);
    }

    let users: Collection<User> = state.db.collection("users");
    users
        .update_one(doc! { "_id": claims.sub }, doc! { "$set": update })
        .await?;

    let user = load_user(&state, claims.sub).await?;
    Ok(Json(UserResponse::from(&user)))
}

// Availability gate: the flag a driver flips to start or stop receiving jobs.
pub async fn toggle_online(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>> {
    if !claims.role.is_driver() {
        return Err(AppError::forbidden("Only drivers can toggle online status."));
    }

    let user = load_user(&state, claims.sub).await?;
    let next = !user.is_online;

    let users: Collection<User> = state.db.collection("users");
    users
        .update_one(
            doc! { "_id": user.id },
            doc! { "$set": {
                "is_online": next,
                "updated_at": to_bson(&Utc::now())?,
            }},
        )
        .await?;

    Ok(Json(json!({
        "is_online": next,
        "detail": format!("You are now {}.", if next { "online" } else { "offline" }),
    })))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<Value>> {
    if payload.new_password.len() < 8 {
        return Err(AppError::validation(
            "Password must be at least 8 characters.",
        ));
    }

    let user = load_user(&state, claims.sub).await?;

    if !verify(&payload.old_password, &user.password_hash)? {
        return Err(AppError::validation("Current password is incorrect."));
    }

    let users: Collection<User> = state.db.collection("users");
    users
        .update_one(
            doc! { "_id": user.id },
            doc! { "$set": {
                "password_hash": hash(&payload.new_password, DEFAULT_COST)?,
                "updated_at": to_bson(&Utc::now())?,
            }},
        )
        .await?;

    Ok(Json(json!({ "detail": "Password changed successfully." })))
}
