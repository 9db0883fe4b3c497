// Booking coordinator: validates a selection against the search it came from and commits it.

use crate::fulfillment::{FulfillmentOption, OptionDetail, OptionKey};
use crate::search::SearchSnapshot;
use crate::trip::TripKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BookingError {
    #[error("Option {0} is not part of the latest search results")]
    StaleOption(OptionKey),

    #[error("Option {option} does not fit the trip: {}", .reasons.join("; "))]
    IncompatibleOption { option: OptionKey, reasons: Vec<String> },

    #[error("Trip {0} is already booked")]
    DuplicateBooking(TripKey),

    #[error("Provider refused option {option}: {message}")]
    Dispatch { option: OptionKey, message: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct DispatchError(pub String);

// Hands a committed option to whoever actually has to run the trip.
#[async_trait]
pub trait ProviderDispatch: Send + Sync {
    async fn dispatch(&self, trip_key: &TripKey, option: &FulfillmentOption) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingConfirmation {
    pub trip_id: String,
    pub trip_key: TripKey,
    pub confirmation_number: String,
    pub option: Arc<FulfillmentOption>,
    pub estimated_pickup_time: DateTime<Utc>,
    pub next_steps: Vec<String>,
    pub booked_at: DateTime<Utc>,
}

// Pending holds the trip key while the provider is being told
enum LedgerEntry {
    Pending,
    Confirmed(Arc<BookingConfirmation>),
}

// Drops a Pending claim unless the commit got as far as confirming it.
// Covers dispatch errors and a caller dropping the commit future mid-dispatch.
struct PendingClaim<'a> {
    ledger: &'a DashMap<TripKey, LedgerEntry>,
    trip_key: &'a TripKey,
    armed: bool,
}

impl PendingClaim<'_> {
    fn confirm(mut self, confirmation: Arc<BookingConfirmation>) {
        self.ledger
            .insert(self.trip_key.clone(), LedgerEntry::Confirmed(confirmation));
        self.armed = false;
    }
}

impl Drop for PendingClaim<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.ledger
                .remove_if(self.trip_key, |_, entry| matches!(entry, LedgerEntry::Pending));
        }
    }
}

pub struct BookingCoordinator {
    ledger: DashMap<TripKey, LedgerEntry>,
    sequence: AtomicU64,
    instance: u16,
    dispatch: Arc<dyn ProviderDispatch>,
}

impl BookingCoordinator {
    pub fn new(dispatch: Arc<dyn ProviderDispatch>) -> Self {
        Self {
            ledger: DashMap::new(),
            sequence: AtomicU64::new(0),
            instance: rand::random::<u16>(),
            dispatch,
        }
    }

    // Books `option` for `trip_key`, provided the option is in `snapshot` and fits the trip.
    //
    // Checks run in order: stale, incompatible, duplicate. Nothing is recorded unless
    // every check and the provider dispatch succeed.
    #[instrument(skip_all, fields(trip = %trip_key, option = %option.key(), epoch = snapshot.epoch))]
    pub async fn commit(
        &self,
        trip_key: &TripKey,
        option: &FulfillmentOption,
        snapshot: &SearchSnapshot,
    ) -> Result<Arc<BookingConfirmation>, BookingError> {
        let key = option.key();
        let assessed = snapshot
            .find(&key)
            .ok_or_else(|| BookingError::StaleOption(key.clone()))?;
        if !assessed.is_compatible() {
            return Err(BookingError::IncompatibleOption {
                option: key,
                reasons: assessed.compatibility.reasons.clone(),
            });
        }
        // The surfaced copy is what gets booked, not whatever the caller holds
        let chosen = Arc::clone(&assessed.option);

        match self.ledger.entry(trip_key.clone()) {
            Entry::Occupied(_) => {
                warn!("trip already booked or being booked");
                return Err(BookingError::DuplicateBooking(trip_key.clone()));
            }
            Entry::Vacant(slot) => {
                slot.insert(LedgerEntry::Pending);
            }
        }
        let claim = PendingClaim {
            ledger: &self.ledger,
            trip_key,
            armed: true,
        };

        if let Err(DispatchError(message)) = self.dispatch.dispatch(trip_key, &chosen).await {
            warn!(error = %message, "provider dispatch failed, claim released");
            return Err(BookingError::Dispatch {
                option: key,
                message,
            });
        }

        let confirmation = Arc::new(self.confirm(trip_key, chosen));
        claim.confirm(Arc::clone(&confirmation));

        info!(
            trip_id = %confirmation.trip_id,
            confirmation = %confirmation.confirmation_number,
            next_steps = confirmation.next_steps.len(),
            "booking committed"
        );
        Ok(confirmation)
    }

    pub fn confirmation(&self, trip_key: &TripKey) -> Option<Arc<BookingConfirmation>> {
        self.ledger.get(trip_key).and_then(|entry| match entry.value() {
            LedgerEntry::Confirmed(confirmation) => Some(Arc::clone(confirmation)),
            LedgerEntry::Pending => None,
        })
    }

    pub fn booked_count(&self) -> usize {
        self.ledger
            .iter()
            .filter(|entry| matches!(entry.value(), LedgerEntry::Confirmed(_)))
            .count()
    }

    fn confirm(&self, trip_key: &TripKey, option: Arc<FulfillmentOption>) -> BookingConfirmation {
        let booked_at = Utc::now();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let trip_id = format!(
            "TRP-{}-{:04X}{:06}",
            booked_at.format("%Y%m%d"),
            self.instance,
            seq
        );
        let confirmation_number = format!(
            "CNF{:04X}{:06}{:02}",
            self.instance,
            seq,
            rand::random::<u8>() % 100
        );
        let next_steps = next_steps(&option, &confirmation_number);

        BookingConfirmation {
            trip_id,
            trip_key: trip_key.clone(),
            confirmation_number,
            estimated_pickup_time: option.eta(),
            option,
            next_steps,
            booked_at,
        }
    }
}

// Schedule adjustments first, then the steps every booking gets
fn next_steps(option: &FulfillmentOption, confirmation_number: &str) -> Vec<String> {
    let mut steps: Vec<String> = option
        .trips_impacted()
        .iter()
        .map(|impact| {
            format!(
                "Reschedule trip {} for {}: {}",
                impact.trip_id, impact.patient_name, impact.description
            )
        })
        .collect();

    steps.push(match &option.detail {
        OptionDetail::Fleet(fleet) => format!(
            "Assign {} {} and notify the driver",
            fleet.vehicle_type, fleet.vehicle_id
        ),
        OptionDetail::Tnc(tnc) => match tnc.surge_multiplier {
            Some(surge) => format!(
                "Request {} ride from {} (surge x{surge:.1} applies)",
                tnc.service_level, tnc.provider_name
            ),
            None => format!(
                "Request {} ride from {}",
                tnc.service_level, tnc.provider_name
            ),
        },
        OptionDetail::Marketplace(market) => format!(
            "Notify {} ({}) that the trip was awarded",
            market.provider_name, market.provider_id
        ),
    });
    steps.push(format!(
        "Communicate pickup ETA {} to the member",
        option.eta().to_rfc3339()
    ));
    steps.push(format!(
        "Share confirmation {confirmation_number} with the requesting facility"
    ));
    steps
}
