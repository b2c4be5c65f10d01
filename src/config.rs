// config.rs
use std::env;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_name: String,
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    // Session policy: admins get a short-lived token (the server-side analog
    // of the 30-minute admin idle logout), everyone else a day.
    pub admin_token_ttl_minutes: i64,
    pub access_token_ttl_hours: i64,
    pub refresh_token_ttl_days: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(AppConfig {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| AppError::configuration("DATABASE_URL must be set"))?,
            database_name: env::var("DATABASE_NAME").unwrap_or_else(|_| "usafilink".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| AppError::configuration("JWT_SECRET must be set"))?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| AppError::configuration("PORT must be a number"))?,
            admin_token_ttl_minutes: parse_or("ADMIN_TOKEN_TTL_MINUTES", 30)?,
            access_token_ttl_hours: parse_or("ACCESS_TOKEN_TTL_HOURS", 24)?,
            refresh_token_ttl_days: parse_or("REFRESH_TOKEN_TTL_DAYS", 7)?,
        })
    }
}

fn parse_or(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::configuration(format!("{} must be a number", key))),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub short_code: String,
    pub passkey: String,
    pub callback_url: String,
    pub environment: String,
}

impl MpesaConfig {
    pub fn from_env() -> Result<Self> {
        let require = |key: &str| {
            env::var(key).map_err(|_| AppError::configuration(format!("{} must be set", key)))
        };

        Ok(MpesaConfig {
            consumer_key: require("MPESA_CONSUMER_KEY")?,
            consumer_secret: require("MPESA_CONSUMER_SECRET")?,
            short_code: require("MPESA_SHORT_CODE")?,
            passkey: require("MPESA_PASSKEY")?,
            callback_url: require("MPESA_CALLBACK_URL")?,
            environment: env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    fn base_url(&self) -> &'static str {
        if self.is_production() {
            "https://api.safaricom.co.ke"
        } else {
            "https://sandbox.safaricom.co.ke"
        }
    }

    pub fn auth_url(&self) -> String {
        format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.base_url()
        )
    }

    pub fn stk_push_url(&self) -> String {
        format!("{}/mpesa/stkpush/v1/processrequest", self.base_url())
    }

    pub fn stk_query_url(&self) -> String {
        format!("{}/mpesa/stkpushquery/v1/query", self.base_url())
    }
}

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub api_key: String,
    pub username: String,
    pub from: String,
}

impl SmsConfig {
    pub fn from_env() -> Self {
        SmsConfig {
            api_key: env::var("SMS_API_KEY").unwrap_or_default(),
            username: env::var("SMS_USERNAME").unwrap_or_else(|_| "sandbox".to_string()),
            from: env::var("SMS_FROM").unwrap_or_else(|_| "UsafiLink".to_string()),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}
