// services/mpesa_service.rs
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::Utc;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::MpesaConfig;
use crate::errors::{AppError, Result};
use crate::models::money::Money;
use crate::services::status_watcher::{StkQueryOutcome, StkStatusSource};

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[allow(dead_code)]
    pub expires_in: String,
}

#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: String,
}

#[derive(Debug, Serialize)]
struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
}

#[derive(Debug, Deserialize)]
struct StkQueryResponse {
    #[serde(rename = "ResultCode")]
    result_code: Option<String>,
    #[serde(rename = "ResultDesc")]
    result_desc: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MpesaService {
    config: MpesaConfig,
    client: Client,
    cached_token: Arc<RwLock<Option<(String, chrono::DateTime<Utc>)>>>,
}

impl MpesaService {
    pub fn new(config: MpesaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::service(format!("Failed to create HTTP client: {}", e)))?;

        Ok(MpesaService {
            config,
            client,
            cached_token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn format_phone_number(&self, phone: &str) -> String {
        let phone = phone.trim();
        if phone.starts_with("254") && phone.len() == 12 {
            return phone.to_string();
        }
        if phone.starts_with("07") && phone.len() == 10 {
            return format!("254{}", &phone[1..]);
        }
        if phone.starts_with('7') && phone.len() == 9 {
            return format!("254{}", phone);
        }
        phone.to_string()
    }

    fn generate_password(&self, timestamp: &str) -> String {
        let password_string = format!(
            "{}{}{}",
            self.config.short_code, self.config.passkey, timestamp
        );
        base64.encode(password_string)
    }

    pub async fn get_access_token(&self) -> Result<String> {
        {
            let cached = self
                .cached_token
                .read()
                .map_err(|_| AppError::service("token cache lock poisoned"))?;
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() + chrono::Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        info!("Requesting new M-Pesa access token");
        let auth_string = format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        );
        let encoded_auth = base64.encode(auth_string);

        let response = self
            .client
            .get(self.config.auth_url())
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Failed to get access token: {} - {}", status, body);
            return Err(AppError::mpesa(format!("M-Pesa auth failed: {}", status)));
        }

        let auth_response: AuthResponse = response.json().await?;

        {
            let expiry_time = Utc::now() + chrono::Duration::hours(1);
            let mut cached = self
                .cached_token
                .write()
                .map_err(|_| AppError::service("token cache lock poisoned"))?;
            *cached = Some((auth_response.access_token.clone(), expiry_time));
        }

        Ok(auth_response.access_token)
    }

    pub async fn stk_push(
        &self,
        phone_number: &str,
        amount: Money,
        account_reference: &str,
        transaction_desc: &str,
    ) -> Result<StkPushResponse> {
        info!("STK push for {} - KSh {}", phone_number, amount);

        if !amount.is_positive() {
            return Err(AppError::validation("Amount must be greater than 0"));
        }

        let access_token = self.get_access_token().await?;
        let formatted_phone = self.format_phone_number(phone_number);
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = self.generate_password(&timestamp);

        let stk_request = StkPushRequest {
            business_short_code: self.config.short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            // Daraja only takes whole shillings
            amount: amount.major_rounded().to_string(),
            party_a: formatted_phone.clone(),
            party_b: self.config.short_code.clone(),
            phone_number: formatted_phone,
            callback_url: self.config.callback_url.clone(),
            account_reference: account_reference.to_string(),
            transaction_desc: transaction_desc.to_string(),
        };

        let response = self
            .client
            .post(self.config.stk_push_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&stk_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("STK push failed: {} - {}", status, body);
            return Err(AppError::mpesa(format!("STK push failed: {}", status)));
        }

        let stk_response: StkPushResponse = response.json().await?;
        info!("STK push initiated: {}", stk_response.merchant_request_id);
        Ok(stk_response)
    }

    // Query the state of an in-flight STK push. While Daraja is still waiting
    // on the customer it answers with an error body, so anything that is not
    // a definite result is reported as still pending.
    pub async fn query_stk_status(&self, checkout_request_id: &str) -> Result<StkQueryOutcome> {
        let access_token = self.get_access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = self.generate_password(&timestamp);

        let query = StkQueryRequest {
            business_short_code: self.config.short_code.clone(),
            password,
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let response = self
            .client
            .post(self.config.stk_query_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            warn!("STK query returned {} for {}", status, checkout_request_id);
            return Ok(StkQueryOutcome::Pending);
        }

        let parsed: StkQueryResponse = response.json().await?;
        match parsed.result_code.as_deref() {
            Some("0") => Ok(StkQueryOutcome::Paid),
            Some(_) => Ok(StkQueryOutcome::Failed(
                parsed
                    .result_desc
                    .unwrap_or_else(|| "Payment was not completed".to_string()),
            )),
            None => Ok(StkQueryOutcome::Pending),
        }
    }
}

#[async_trait]
impl StkStatusSource for MpesaService {
    async fn query_status(&self, checkout_request_id: &str) -> Result<StkQueryOutcome> {
        self.query_stk_status(checkout_request_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> MpesaService {
        MpesaService::new(MpesaConfig {
            consumer_key: "key".into(),
            consumer_secret: "secret".into(),
            short_code: "174379".into(),
            passkey: "passkey".into(),
            callback_url: "https://example.com/payments/mpesa/callback/".into(),
            environment: "sandbox".into(),
        })
        .unwrap()
    }

    #[test]
    fn normalizes_local_phone_formats() {
        let svc = service();
        assert_eq!(svc.format_phone_number("254712345678"), "254712345678");
        assert_eq!(svc.format_phone_number("0712345678"), "254712345678");
        assert_eq!(svc.format_phone_number("712345678"), "254712345678");
        assert_eq!(svc.format_phone_number(" 0712345678 "), "254712345678");
    }

    #[test]
    fn password_is_base64_of_shortcode_passkey_timestamp() {
        let svc = service();
        let password = svc.generate_password("20240101120000");
        let decoded = base64.decode(password).unwrap();
        assert_eq!(decoded, b"174379passkey20240101120000");
    }
}
