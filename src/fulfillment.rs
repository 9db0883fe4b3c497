// Fulfillment options: what a source offers for a trip.
// Every option shares id, cost, pickup estimate and supported needs; the source-specific
// part lives in `OptionDetail`, so every consumer has to match all three sources.

use crate::trip::MobilityType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

// Where an option came from. Declaration order is the ranking tie-break priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Fleet,
    Marketplace,
    Tnc,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Fleet, SourceKind::Marketplace, SourceKind::Tnc];

    pub fn index(self) -> usize {
        match self {
            SourceKind::Fleet => 0,
            SourceKind::Marketplace => 1,
            SourceKind::Tnc => 2,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceKind::Fleet => "fleet",
            SourceKind::Marketplace => "marketplace",
            SourceKind::Tnc => "tnc",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OptionId(String);

impl OptionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Identity of an option inside one search. Sources mint ids independently, so the
// same id from two sources names two different offers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OptionKey {
    pub source: SourceKind,
    pub id: OptionId,
}

impl OptionKey {
    pub fn new(source: SourceKind, id: impl Into<String>) -> Self {
        Self {
            source,
            id: OptionId::new(id),
        }
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.id)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CostError {
    #[error("Cost must be a finite, non-negative amount, got {0}")]
    Invalid(f64),
}

// Currency amount in cents; unsigned so a negative cost cannot be represented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cost {
    cents: u64,
}

impl Cost {
    pub const fn from_cents(cents: u64) -> Self {
        Self { cents }
    }

    pub const fn dollars(whole: u64) -> Self {
        Self { cents: whole * 100 }
    }

    pub fn from_amount(amount: f64) -> Result<Self, CostError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(CostError::Invalid(amount));
        }
        Ok(Self {
            cents: (amount * 100.0).round() as u64,
        })
    }

    pub fn cents(&self) -> u64 {
        self.cents
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.cents / 100, self.cents % 100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Sedan,
    Minivan,
    WheelchairVan,
    StretcherVan,
}

impl VehicleType {
    // Levels the vehicle is explicitly rated for, beyond ambulatory
    pub fn rated_mobility(self) -> &'static [MobilityType] {
        match self {
            VehicleType::Sedan | VehicleType::Minivan => &[],
            VehicleType::WheelchairVan => &[MobilityType::Wheelchair],
            VehicleType::StretcherVan => &[MobilityType::Stretcher],
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VehicleType::Sedan => "sedan",
            VehicleType::Minivan => "minivan",
            VehicleType::WheelchairVan => "wheelchair van",
            VehicleType::StretcherVan => "stretcher van",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceLevel {
    Standard,
    Xl,
    // Wheelchair-accessible vehicle
    Wav,
}

impl ServiceLevel {
    pub fn seats(self) -> u32 {
        match self {
            ServiceLevel::Standard => 4,
            ServiceLevel::Xl => 6,
            ServiceLevel::Wav => 3,
        }
    }

    pub fn rated_mobility(self) -> &'static [MobilityType] {
        match self {
            ServiceLevel::Standard | ServiceLevel::Xl => &[],
            ServiceLevel::Wav => &[MobilityType::Wheelchair],
        }
    }
}

impl fmt::Display for ServiceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServiceLevel::Standard => "standard",
            ServiceLevel::Xl => "XL",
            ServiceLevel::Wav => "WAV",
        };
        f.write_str(label)
    }
}

// An existing assignment that has to move if this fleet option is taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripImpact {
    pub trip_id: String,
    pub patient_name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetDetail {
    pub vehicle_id: String,
    pub vehicle_type: VehicleType,
    pub capacity: u32,
    pub trips_impacted: Vec<TripImpact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TncDetail {
    pub provider_name: String,
    pub service_level: ServiceLevel,
    pub surge_multiplier: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceDetail {
    pub provider_id: String,
    pub provider_name: String,
    pub rating: f32,
    pub response_latency_mins: u32,
    pub capacity: u32,
    pub rated_mobility: BTreeSet<MobilityType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum OptionDetail {
    Fleet(FleetDetail),
    Tnc(TncDetail),
    Marketplace(MarketplaceDetail),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentOption {
    pub id: OptionId,
    pub cost: Cost,
    pub estimated_pickup_time: DateTime<Utc>,
    pub supported_needs: BTreeSet<String>,
    pub detail: OptionDetail,
}

impl FulfillmentOption {
    pub fn source(&self) -> SourceKind {
        match &self.detail {
            OptionDetail::Fleet(_) => SourceKind::Fleet,
            OptionDetail::Tnc(_) => SourceKind::Tnc,
            OptionDetail::Marketplace(_) => SourceKind::Marketplace,
        }
    }

    pub fn key(&self) -> OptionKey {
        OptionKey {
            source: self.source(),
            id: self.id.clone(),
        }
    }

    // Same identity as `key`, without cloning the id
    pub fn has_key(&self, key: &OptionKey) -> bool {
        self.source() == key.source && self.id == key.id
    }

    pub fn capacity(&self) -> u32 {
        match &self.detail {
            OptionDetail::Fleet(fleet) => fleet.capacity,
            OptionDetail::Tnc(tnc) => tnc.service_level.seats(),
            OptionDetail::Marketplace(market) => market.capacity,
        }
    }

    pub fn is_rated_for(&self, mobility: MobilityType) -> bool {
        if mobility == MobilityType::Ambulatory {
            return true;
        }
        match &self.detail {
            OptionDetail::Fleet(fleet) => fleet.vehicle_type.rated_mobility().contains(&mobility),
            OptionDetail::Tnc(tnc) => tnc.service_level.rated_mobility().contains(&mobility),
            OptionDetail::Marketplace(market) => market.rated_mobility.contains(&mobility),
        }
    }

    // Existing assignments that would be rescheduled; only fleet options displace anything
    pub fn trips_impacted(&self) -> &[TripImpact] {
        match &self.detail {
            OptionDetail::Fleet(fleet) => &fleet.trips_impacted,
            OptionDetail::Tnc(_) | OptionDetail::Marketplace(_) => &[],
        }
    }

    pub fn disruption(&self) -> usize {
        self.trips_impacted().len()
    }

    // Derived ETA: the estimated pickup time itself.
    pub fn eta(&self) -> DateTime<Utc> {
        self.estimated_pickup_time
    }

    // Minutes between the requested time and the estimated pickup, negative when early
    pub fn eta_minutes_after(&self, requested_at: DateTime<Utc>) -> i64 {
        (self.estimated_pickup_time - requested_at).num_minutes()
    }

    pub fn provider_label(&self) -> String {
        match &self.detail {
            OptionDetail::Fleet(fleet) => format!("fleet {} {}", fleet.vehicle_type, fleet.vehicle_id),
            OptionDetail::Tnc(tnc) => tnc.provider_name.clone(),
            OptionDetail::Marketplace(market) => market.provider_name.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::trip::fixtures::requested_at;
    use chrono::Duration;

    pub fn at_minutes(offset: i64) -> DateTime<Utc> {
        requested_at() + Duration::minutes(offset)
    }

    pub fn fleet(id: &str, cost: Cost, eta: i64, vehicle_type: VehicleType, capacity: u32) -> FulfillmentOption {
        FulfillmentOption {
            id: OptionId::new(id),
            cost,
            estimated_pickup_time: at_minutes(eta),
            supported_needs: BTreeSet::new(),
            detail: OptionDetail::Fleet(FleetDetail {
                vehicle_id: format!("V-{id}"),
                vehicle_type,
                capacity,
                trips_impacted: Vec::new(),
            }),
        }
    }

    pub fn impact(trip_id: &str) -> TripImpact {
        TripImpact {
            trip_id: trip_id.to_string(),
            patient_name: format!("Patient {trip_id}"),
            description: "pickup moves 20 minutes later".to_string(),
        }
    }

    pub fn with_impacts(mut option: FulfillmentOption, trip_ids: &[&str]) -> FulfillmentOption {
        if let OptionDetail::Fleet(fleet) = &mut option.detail {
            fleet.trips_impacted = trip_ids.iter().map(|id| impact(id)).collect();
        }
        option
    }

    pub fn tnc(id: &str, cost: Cost, eta: i64, service_level: ServiceLevel) -> FulfillmentOption {
        FulfillmentOption {
            id: OptionId::new(id),
            cost,
            estimated_pickup_time: at_minutes(eta),
            supported_needs: BTreeSet::new(),
            detail: OptionDetail::Tnc(TncDetail {
                provider_name: "RideCo".to_string(),
                service_level,
                surge_multiplier: None,
            }),
        }
    }

    pub fn marketplace(id: &str, cost: Cost, eta: i64, rated: &[MobilityType], capacity: u32) -> FulfillmentOption {
        FulfillmentOption {
            id: OptionId::new(id),
            cost,
            estimated_pickup_time: at_minutes(eta),
            supported_needs: BTreeSet::new(),
            detail: OptionDetail::Marketplace(MarketplaceDetail {
                provider_id: format!("P-{id}"),
                provider_name: "Buckeye Medical Transit".to_string(),
                rating: 4.6,
                response_latency_mins: 8,
                capacity,
                rated_mobility: rated.iter().copied().collect(),
            }),
        }
    }
}
