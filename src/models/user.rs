use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

// Closed role set. Authorization decisions go through these methods, never
// through raw string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Driver,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Driver => "driver",
            Role::Admin => "admin",
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn is_driver(self) -> bool {
        matches!(self, Role::Driver)
    }

    pub fn is_customer(self) -> bool {
        matches!(self, Role::Customer)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: i64,
    pub username: String,
    pub email: String,
    pub phone_number: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub is_online: bool,
    pub is_two_factor_enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub two_factor_code: Option<TwoFactorCode>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// One-time login code: hashed, short-lived, attempt-limited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorCode {
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub attempts: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 30))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    pub phone_number: String,
    #[validate(length(min = 8))]
    pub password: String,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct TwoFactorLoginRequest {
    pub user_id: i64,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct TwoFactorVerifyRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct TwoFactorDisableRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    #[serde(alias = "new_password1")]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(email)]
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub phone_number: String,
    pub role: Role,
    pub is_active: bool,
    pub is_online: bool,
    pub is_two_factor_enabled: bool,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        UserResponse {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            phone_number: user.phone_number.clone(),
            role: user.role,
            is_active: user.is_active,
            is_online: user.is_online,
            is_two_factor_enabled: user.is_two_factor_enabled,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub role: Role,
    pub token_type: TokenKind,
    pub exp: usize,
}

// Kenyan MSISDN in international form: 254 followed by 9 digits.
pub fn validate_phone_number(phone: &str) -> bool {
    phone.len() == 12 && phone.starts_with("254") && phone.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Customer).unwrap(), "\"customer\"");
        assert_eq!(serde_json::to_string(&Role::Driver).unwrap(), "\"driver\"");
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!(serde_json::from_str::<Role>("\"driver\"").unwrap(), Role::Driver);
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(serde_json::from_str::<Role>("\"superuser\"").is_err());
    }

    #[test]
    fn phone_number_validation() {
        assert!(validate_phone_number("254712345678"));
        assert!(!validate_phone_number("0712345678"));
        assert!(!validate_phone_number("25471234567"));
        assert!(!validate_phone_number("2547123456789"));
        assert!(!validate_phone_number("25471234567a"));
        assert!(!validate_phone_number("+254712345678"));
    }
}
