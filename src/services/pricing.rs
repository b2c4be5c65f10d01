// services/pricing.rs
//
// Advisory price estimation. The same function backs the public
// estimate-price endpoint and the estimated_price stored at booking
// creation; the billed figure is always whatever the server stored, never a
// client-side recomputation.
use serde::Serialize;

use crate::models::booking::{ServiceType, TankSize};
use crate::models::money::Money;

// KES per travelled kilometre, applied only when the caller supplies a
// distance.
const PER_KM_RATE_MINOR: i64 = 5_000; // 50.00

#[derive(Debug, Clone, Serialize)]
pub struct PriceEstimate {
    pub base_price: Money,
    pub tank_charge: Money,
    pub distance_charge: Money,
    pub total: Money,
}

pub fn estimate(
    service_type: ServiceType,
    tank_size: TankSize,
    distance_km: Option<f64>,
) -> PriceEstimate {
    let base_price = match service_type {
        ServiceType::Septic => Money::from_major(1500),
        ServiceType::PitLatrine => Money::from_major(2000),
        ServiceType::GreaseTrap => Money::from_major(2500),
        ServiceType::Other => Money::from_major(1800),
    };

    // Tank charge scales with the tier: one shilling per liter of capacity.
    let tank_charge = Money::from_major(tank_size.liters() as i64);

    let distance_charge = distance_km
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| Money::from_minor((d * PER_KM_RATE_MINOR as f64).round() as i64))
        .unwrap_or(Money::ZERO);

    let total = base_price + tank_charge + distance_charge;

    PriceEstimate {
        base_price,
        tank_charge,
        distance_charge,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn septic_2000_without_distance() {
        let quote = estimate(ServiceType::Septic, TankSize::L2000, None);
        assert_eq!(quote.base_price, Money::from_major(1500));
        assert_eq!(quote.tank_charge, Money::from_major(2000));
        assert_eq!(quote.distance_charge, Money::ZERO);
        assert_eq!(quote.total, Money::from_major(3500));
    }

    #[test]
    fn distance_charge_is_per_km() {
        let quote = estimate(ServiceType::GreaseTrap, TankSize::L1000, Some(3.5));
        assert_eq!(quote.distance_charge, Money::from_minor(17_500)); // 175.00
        assert_eq!(quote.total, Money::from_minor(2500 * 100 + 1000 * 100 + 17_500));
    }

    #[test]
    fn negative_or_bogus_distance_is_ignored() {
        assert_eq!(
            estimate(ServiceType::Other, TankSize::L1000, Some(-4.0)).distance_charge,
            Money::ZERO
        );
        assert_eq!(
            estimate(ServiceType::Other, TankSize::L1000, Some(f64::NAN)).distance_charge,
            Money::ZERO
        );
    }

    #[test]
    fn every_tier_prices_its_capacity() {
        for (tier, liters) in [
            (TankSize::L1000, 1000),
            (TankSize::L2000, 2000),
            (TankSize::L3000, 3000),
            (TankSize::L5000, 5000),
            (TankSize::L10000, 10000),
        ] {
            let quote = estimate(ServiceType::Septic, tier, None);
            assert_eq!(quote.tank_charge, Money::from_major(liters));
        }
    }
}
