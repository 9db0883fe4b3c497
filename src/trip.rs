// Trip requests: the patient, the two addresses and the constraints a vehicle must satisfy.
// Requests arrive already resolved (record lookup happens upstream); this module only
// shapes and validates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

// Identity of a trip as handed over by the request-resolution side
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TripKey(String);

impl TripKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TripKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Vehicle capability class the patient needs. Declaration order is the severity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MobilityType {
    Ambulatory,
    Wheelchair,
    Stretcher,
}

impl fmt::Display for MobilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MobilityType::Ambulatory => "ambulatory",
            MobilityType::Wheelchair => "wheelchair",
            MobilityType::Stretcher => "stretcher",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripType {
    OneWay,
    RoundTrip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingSource {
    Medicaid,
    MedicareAdvantage,
    Facility,
    PrivatePay,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub location: GeoPoint,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {} {}",
            self.street, self.city, self.state, self.postal_code
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub name: String,
    pub member_id: String,
    pub phone: Option<String>,
}

// What a vehicle has to support for this patient.
//
// `special_needs` is an ordered set so reasons and comparisons come out in a stable order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripConstraints {
    pub mobility: MobilityType,
    pub escort: bool,
    pub escort_count: u8,
    pub special_needs: BTreeSet<String>,
}

impl TripConstraints {
    pub fn new(mobility: MobilityType) -> Self {
        Self {
            mobility,
            escort: false,
            escort_count: 0,
            special_needs: BTreeSet::new(),
        }
    }

    pub fn with_escorts(mut self, count: u8) -> Self {
        self.escort = count > 0;
        self.escort_count = count;
        self
    }

    pub fn with_need(mut self, tag: impl Into<String>) -> Self {
        self.special_needs.insert(tag.into());
        self
    }

    // Seats needed: the patient plus any escorts
    pub fn riders(&self) -> u32 {
        if self.escort {
            1 + u32::from(self.escort_count)
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRequest {
    pub trip_key: TripKey,
    pub patient: PatientInfo,
    pub pickup: Address,
    pub dropoff: Address,
    pub requested_at: DateTime<Utc>,
    pub constraints: TripConstraints,
    pub trip_type: TripType,
    pub will_call: bool,
    pub funding_source: FundingSource,
}

// Edits accepted while the request is still awaiting confirmation
#[derive(Debug, Clone, PartialEq)]
pub enum RequestAmendment {
    Pickup(Address),
    Dropoff(Address),
    RequestedAt(DateTime<Utc>),
    Constraints(TripConstraints),
    WillCall(bool),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field} address: {reason}")]
    InvalidAddress { field: &'static str, reason: String },

    #[error("Pickup and dropoff are the same location")]
    SameLocation,

    #[error("Escort flag and escort count disagree (escort={escort}, count={count})")]
    EscortMismatch { escort: bool, count: u8 },

    #[error("Empty special-needs tag")]
    EmptyNeedTag,
}

// Every problem found in one pass, so callers can fix them together
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Trip request failed validation: {}", summarize(.0))]
pub struct ValidationErrors(pub Vec<ValidationError>);

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TripRequest {
    pub fn apply(&mut self, amendment: RequestAmendment) {
        match amendment {
            RequestAmendment::Pickup(address) => self.pickup = address,
            RequestAmendment::Dropoff(address) => self.dropoff = address,
            RequestAmendment::RequestedAt(at) => self.requested_at = at,
            RequestAmendment::Constraints(constraints) => self.constraints = constraints,
            RequestAmendment::WillCall(will_call) => self.will_call = will_call,
        }
    }

    // Structural validation run before a search is allowed to start.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = Vec::new();

        if self.trip_key.as_str().trim().is_empty() {
            errors.push(ValidationError::MissingField("trip_key"));
        }
        if self.patient.name.trim().is_empty() {
            errors.push(ValidationError::MissingField("patient.name"));
        }
        if self.patient.member_id.trim().is_empty() {
            errors.push(ValidationError::MissingField("patient.member_id"));
        }

        check_address("pickup", &self.pickup, &mut errors);
        check_address("dropoff", &self.dropoff, &mut errors);

        if self.pickup.location.is_valid()
            && self.pickup.location == self.dropoff.location
        {
            errors.push(ValidationError::SameLocation);
        }

        let constraints = &self.constraints;
        if constraints.escort != (constraints.escort_count > 0) {
            errors.push(ValidationError::EscortMismatch {
                escort: constraints.escort,
                count: constraints.escort_count,
            });
        }
        if constraints
            .special_needs
            .iter()
            .any(|tag| tag.trim().is_empty())
        {
            errors.push(ValidationError::EmptyNeedTag);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(errors))
        }
    }
}

fn check_address(field: &'static str, address: &Address, errors: &mut Vec<ValidationError>) {
    if address.street.trim().is_empty() {
        errors.push(ValidationError::InvalidAddress {
            field,
            reason: "street is empty".to_string(),
        });
    }
    if address.city.trim().is_empty() {
        errors.push(ValidationError::InvalidAddress {
            field,
            reason: "city is empty".to_string(),
        });
    }
    if !address.location.is_valid() {
        errors.push(ValidationError::InvalidAddress {
            field,
            reason: format!(
                "coordinates out of range ({}, {})",
                address.location.lat, address.location.lon
            ),
        });
    }
}
