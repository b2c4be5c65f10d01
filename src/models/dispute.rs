use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeStatus {
    Pending,
    Resolved,
    Dismissed,
}

impl DisputeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DisputeStatus::Pending => "pending",
            DisputeStatus::Resolved => "resolved",
            DisputeStatus::Dismissed => "dismissed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    #[serde(rename = "_id")]
    pub id: i64,
    pub booking_id: i64,
    pub raised_by: i64,
    pub reason: String,
    pub status: DisputeStatus,
    pub resolution: Option<String>,
    pub resolved_by: Option<i64>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDisputeRequest {
    pub booking_id: i64,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveDisputeRequest {
    pub resolution: String,
}

#[derive(Debug, Deserialize)]
pub struct DisputeQuery {
    pub status: Option<DisputeStatus>,
}
