use reqwest::Client;

use crate::config::SmsConfig;
use crate::errors::{AppError, Result};

// Plain-text notifications over an Africa's Talking style gateway. Delivery
// is fire-and-forget: callers spawn sends and log failures, a dead gateway
// never fails a booking or a payment.
#[derive(Clone)]
pub struct SmsService {
    config: SmsConfig,
    client: Client,
}

impl SmsService {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub async fn send(&self, phone: &str, message: &str) -> Result<()> {
        let url = "https://api.africastalking.com/version1/messaging";

        let response = self
            .client
            .post(url)
            .header("apiKey", &self.config.api_key)
            .header("Accept", "application/json")
            .form(&[
                ("username", self.config.username.as_str()),
                ("to", phone),
                ("message", message),
                ("from", self.config.from.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::ExternalApi(format!("SMS API error: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::ExternalApi(format!(
                "SMS sending failed with status: {}",
                response.status()
            )))
        }
    }

    pub async fn send_booking_confirmation(&self, phone: &str, booking_id: i64) -> Result<()> {
        let message = format!(
            "Your UsafiLink booking #{} has been received. We will notify you once a driver is assigned.",
            booking_id
        );
        self.send(phone, &message).await
    }

    pub async fn send_driver_on_the_way(&self, phone: &str, driver_name: &str) -> Result<()> {
        let message = format!(
            "Good news! {} has accepted your booking and will be on the way at the scheduled time.",
            driver_name
        );
        self.send(phone, &message).await
    }

    pub async fn send_two_factor_code(&self, phone: &str, code: &str) -> Result<()> {
        let message = format!(
            "Your UsafiLink login code is: {}. Valid for 5 minutes.",
            code
        );
        self.send(phone, &message).await
    }

    pub async fn send_payment_confirmation(&self, phone: &str, amount: &str) -> Result<()> {
        let message = format!(
            "Payment of KES {} received. Thank you for using UsafiLink.",
            amount
        );
        self.send(phone, &message).await
    }

    pub async fn send_completion_notice(&self, phone: &str, booking_id: i64, amount: &str) -> Result<()> {
        let message = format!(
            "Service for booking #{} completed! The invoice amount is KES {}. Thank you for using UsafiLink.",
            booking_id, amount
        );
        self.send(phone, &message).await
    }
}
