use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Mpesa,
    Bank,
    Cash,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Mpesa => "mpesa",
            PaymentMethod::Bank => "bank",
            PaymentMethod::Cash => "cash",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    // Retry never mutates a dead attempt; it clones it into a fresh one.
    pub fn is_retryable(self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Cancelled)
    }
}

// One payment attempt against a booking. A booking may accumulate several
// attempts; history is never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    #[serde(rename = "_id")]
    pub id: i64,
    pub booking_id: i64,
    pub amount: Money,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,

    pub phone_number: Option<String>,

    // Exactly one of these is meaningful, dictated by payment_method.
    pub mpesa_receipt: Option<String>,
    pub bank_reference: Option<String>,

    // Daraja correlation ids (mpesa only)
    pub checkout_request_id: Option<String>,
    pub merchant_request_id: Option<String>,

    pub notes: Option<String>,

    // Manual verification trail
    pub verified_by: Option<i64>,
    pub verified_at: Option<DateTime<Utc>>,

    pub cancelled_by: Option<i64>,
    pub cancelled_at: Option<DateTime<Utc>>,

    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct InitiateMpesaRequest {
    pub booking_id: i64,
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
pub struct InitiateBankTransferRequest {
    pub booking_id: i64,
    pub bank_reference: String,
}

#[derive(Debug, Deserialize)]
pub struct RetryPaymentRequest {
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
pub struct ManualVerifyRequest {
    pub payment_id: i64,
    pub mpesa_receipt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentQuery {
    pub status: Option<PaymentStatus>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}
