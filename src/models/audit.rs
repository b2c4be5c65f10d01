use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Append-only action trail. Rows are written once and never updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    UserCreated,
    UserUpdated,
    BookingCreated,
    BookingUpdated,
    BookingCancelled,
    DriverAssigned,
    ServiceCompleted,
    PaymentReceived,
    PaymentFailed,
    PaymentCancelled,
    PaymentVerified,
    ReceiptIssued,
    DisputeResolved,
    DisputeDismissed,
}

impl LogAction {
    pub fn as_str(self) -> &'static str {
        match self {
            LogAction::UserCreated => "user_created",
            LogAction::UserUpdated => "user_updated",
            LogAction::BookingCreated => "booking_created",
            LogAction::BookingUpdated => "booking_updated",
            LogAction::BookingCancelled => "booking_cancelled",
            LogAction::DriverAssigned => "driver_assigned",
            LogAction::ServiceCompleted => "service_completed",
            LogAction::PaymentReceived => "payment_received",
            LogAction::PaymentFailed => "payment_failed",
            LogAction::PaymentCancelled => "payment_cancelled",
            LogAction::PaymentVerified => "payment_verified",
            LogAction::ReceiptIssued => "receipt_issued",
            LogAction::DisputeResolved => "dispute_resolved",
            LogAction::DisputeDismissed => "dispute_dismissed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemLog {
    #[serde(rename = "_id")]
    pub id: i64,
    pub action: LogAction,
    pub user_id: Option<i64>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub action: Option<LogAction>,
    pub user_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&LogAction::DriverAssigned).unwrap(),
            "\"driver_assigned\""
        );
        assert_eq!(
            serde_json::from_str::<LogAction>("\"payment_received\"").unwrap(),
            LogAction::PaymentReceived
        );
    }
}
