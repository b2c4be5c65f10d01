use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Septic,
    PitLatrine,
    GreaseTrap,
    Other,
}

impl ServiceType {
    pub fn label(self) -> &'static str {
        match self {
            ServiceType::Septic => "Septic Tank",
            ServiceType::PitLatrine => "Pit Latrine",
            ServiceType::GreaseTrap => "Grease Trap",
            ServiceType::Other => "Other",
        }
    }
}

// Tank tiers are fixed liter sizes; the wire format is the liter count as a
// string ("2000"), matching what customers submit from the booking form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TankSize {
    #[serde(rename = "1000")]
    L1000,
    #[serde(rename = "2000")]
    L2000,
    #[serde(rename = "3000")]
    L3000,
    #[serde(rename = "5000")]
    L5000,
    #[serde(rename = "10000")]
    L10000,
}

impl TankSize {
    pub fn liters(self) -> u32 {
        match self {
            TankSize::L1000 => 1000,
            TankSize::L2000 => 2000,
            TankSize::L3000 => 3000,
            TankSize::L5000 => 5000,
            TankSize::L10000 => 10000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Accepted,
    Started,
    Arrived,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Started => "started",
            BookingStatus::Arrived => "arrived",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    // The lifecycle is a partial function: anything not listed here is an
    // illegal transition and must leave the booking untouched.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Accepted, Started)
                | (Accepted, Arrived)
                | (Started, Arrived)
                | (Started, Completed)
                | (Arrived, Completed)
                | (Pending, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    // A driver working any of these has a current job.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            BookingStatus::Accepted | BookingStatus::Started | BookingStatus::Arrived
        )
    }
}

// Derived settlement flag on the booking; flips to Paid only when a Payment
// row reaches paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingPaymentStatus {
    Pending,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    #[serde(rename = "_id")]
    pub id: i64,
    pub customer_id: i64,
    pub driver_id: Option<i64>,

    // Location details
    pub location_name: String,
    pub address: Option<String>,
    pub latitude: f64,
    pub longitude: f64,

    // Service details
    pub service_type: ServiceType,
    pub tank_size: TankSize,
    pub special_instructions: Option<String>,

    // Scheduling
    pub scheduled_date: DateTime<Utc>,

    // Pricing: estimated is advisory, final is authoritative and absent
    // until completion.
    pub estimated_price: Money,
    pub final_price: Option<Money>,

    pub status: BookingStatus,
    pub payment_status: BookingPaymentStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub service_type: ServiceType,
    pub tank_size: TankSize,
    pub location_name: String,
    pub address: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub scheduled_date: DateTime<Utc>,
    pub special_instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBookingRequest {
    pub scheduled_date: Option<DateTime<Utc>>,
    pub special_instructions: Option<String>,
    pub location_name: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignDriverRequest {
    pub driver_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct EstimateRequest {
    pub service_type: ServiceType,
    pub tank_size: TankSize,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct BookingQuery {
    pub status: Option<BookingStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BookingStatus; 6] = [
        BookingStatus::Pending,
        BookingStatus::Accepted,
        BookingStatus::Started,
        BookingStatus::Arrived,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    #[test]
    fn legal_lifecycle_walk() {
        assert!(BookingStatus::Pending.can_transition_to(BookingStatus::Accepted));
        assert!(BookingStatus::Accepted.can_transition_to(BookingStatus::Started));
        assert!(BookingStatus::Started.can_transition_to(BookingStatus::Arrived));
        assert!(BookingStatus::Arrived.can_transition_to(BookingStatus::Completed));
        // arrive straight from accepted, complete straight from started
        assert!(BookingStatus::Accepted.can_transition_to(BookingStatus::Arrived));
        assert!(BookingStatus::Started.can_transition_to(BookingStatus::Completed));
    }

    #[test]
    fn cancel_only_from_pending() {
        assert!(BookingStatus::Pending.can_transition_to(BookingStatus::Cancelled));
        for from in ALL {
            if from != BookingStatus::Pending {
                assert!(
                    !from.can_transition_to(BookingStatus::Cancelled),
                    "cancel must be illegal from {:?}",
                    from
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [BookingStatus::Completed, BookingStatus::Cancelled] {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{:?} -> {:?} must be illegal", from, to);
            }
        }
    }

    #[test]
    fn no_skipping_accept() {
        assert!(!BookingStatus::Pending.can_transition_to(BookingStatus::Started));
        assert!(!BookingStatus::Pending.can_transition_to(BookingStatus::Arrived));
        assert!(!BookingStatus::Pending.can_transition_to(BookingStatus::Completed));
        assert!(!BookingStatus::Accepted.can_transition_to(BookingStatus::Completed));
    }

    #[test]
    fn no_backward_transitions() {
        assert!(!BookingStatus::Accepted.can_transition_to(BookingStatus::Pending));
        assert!(!BookingStatus::Started.can_transition_to(BookingStatus::Accepted));
        assert!(!BookingStatus::Arrived.can_transition_to(BookingStatus::Started));
        assert!(!BookingStatus::Completed.can_transition_to(BookingStatus::Arrived));
    }

    // service_type and tank_size must round-trip verbatim through the wire
    // format a booking was created with.
    #[test]
    fn service_and_tank_round_trip_verbatim() {
        let st = serde_json::to_string(&ServiceType::Septic).unwrap();
        assert_eq!(st, "\"septic\"");
        assert_eq!(serde_json::from_str::<ServiceType>(&st).unwrap(), ServiceType::Septic);

        let ts = serde_json::to_string(&TankSize::L2000).unwrap();
        assert_eq!(ts, "\"2000\"");
        assert_eq!(serde_json::from_str::<TankSize>(&ts).unwrap(), TankSize::L2000);

        assert_eq!(
            serde_json::to_string(&ServiceType::GreaseTrap).unwrap(),
            "\"grease_trap\""
        );
        assert_eq!(serde_json::to_string(&TankSize::L10000).unwrap(), "\"10000\"");
    }
}
