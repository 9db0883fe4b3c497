// In-process stand-ins for the fleet, TNC and marketplace backends.
// Used by the demo runner and by tests that need to control when and how a source answers.

use crate::booking::{DispatchError, ProviderDispatch};
use crate::fulfillment::{
    Cost, FleetDetail, FulfillmentOption, MarketplaceDetail, OptionDetail, OptionId,
    ServiceLevel, SourceKind, TncDetail, TripImpact, VehicleType,
};
use crate::source::{SourceAdapter, SourceFetchError, SourceQuery};
use crate::trip::{MobilityType, TripKey};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

// Holds a mock source's answers back until opened
pub struct MockGate {
    open: watch::Sender<bool>,
}

impl MockGate {
    pub fn open(&self) {
        self.open.send_replace(true);
    }
}

pub struct MockSource {
    kind: SourceKind,
    options: Mutex<Vec<FulfillmentOption>>,
    outage: Mutex<Option<String>>,
    fail_next_requests: AtomicUsize,
    delay_ms: AtomicU64,
    gate: Option<watch::Receiver<bool>>,
    request_count: AtomicUsize,
    recent_queries: Mutex<Vec<SourceQuery>>,
}

impl MockSource {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            options: Mutex::new(Vec::new()),
            outage: Mutex::new(None),
            fail_next_requests: AtomicUsize::new(0),
            delay_ms: AtomicU64::new(0),
            gate: None,
            request_count: AtomicUsize::new(0),
            recent_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_options(self, options: Vec<FulfillmentOption>) -> Self {
        *self.options.lock() = options;
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    // Every call fails until the outage is cleared
    pub fn with_outage(self, message: impl Into<String>) -> Self {
        *self.outage.lock() = Some(message.into());
        self
    }

    // Calls block until the returned gate is opened
    pub fn gated(mut self) -> (Self, MockGate) {
        let (open, gate) = watch::channel(false);
        self.gate = Some(gate);
        (self, MockGate { open })
    }

    pub fn clear_outage(&self) {
        *self.outage.lock() = None;
    }

    pub fn fail_next_requests(&self, count: usize) {
        self.fail_next_requests.store(count, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn recent_queries(&self) -> Vec<SourceQuery> {
        self.recent_queries.lock().clone()
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<FulfillmentOption>, SourceFetchError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.recent_queries.lock().push(query.clone());

        if let Some(gate) = &self.gate {
            let mut gate = gate.clone();
            // A dropped gate counts as open
            let _ = gate.wait_for(|open| *open).await;
        }

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if let Some(message) = self.outage.lock().clone() {
            return Err(SourceFetchError::Unavailable {
                kind: self.kind,
                message,
            });
        }

        let failing = self
            .fail_next_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SourceFetchError::Unavailable {
                kind: self.kind,
                message: "Internal Server Error".to_string(),
            });
        }

        Ok(self.options.lock().clone())
    }
}

// Accepts every dispatch, counting them
#[derive(Default)]
pub struct AcceptAllDispatch {
    dispatched: AtomicUsize,
    delay_ms: AtomicU64,
}

impl AcceptAllDispatch {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            dispatched: AtomicUsize::new(0),
            delay_ms: AtomicU64::new(delay.as_millis() as u64),
        }
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderDispatch for AcceptAllDispatch {
    async fn dispatch(&self, _trip_key: &TripKey, _option: &FulfillmentOption) -> Result<(), DispatchError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// Rejects the next `count` dispatches, then accepts
pub struct FailingDispatch {
    remaining_failures: AtomicUsize,
    message: String,
}

impl FailingDispatch {
    pub fn new(count: usize, message: impl Into<String>) -> Self {
        Self {
            remaining_failures: AtomicUsize::new(count),
            message: message.into(),
        }
    }
}

#[async_trait]
impl ProviderDispatch for FailingDispatch {
    async fn dispatch(&self, _trip_key: &TripKey, _option: &FulfillmentOption) -> Result<(), DispatchError> {
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err(DispatchError(self.message.clone()))
        } else {
            Ok(())
        }
    }
}

fn needs(tags: &[&str]) -> BTreeSet<String> {
    tags.iter().map(|tag| tag.to_string()).collect()
}

// A plausible set of offers for one source, relative to `requested_at`.
pub fn sample_options(kind: SourceKind, requested_at: DateTime<Utc>) -> Vec<FulfillmentOption> {
    let at = |minutes: i64| requested_at + ChronoDuration::minutes(minutes);
    match kind {
        SourceKind::Fleet => vec![
            FulfillmentOption {
                id: OptionId::new("fleet-wv-12"),
                cost: Cost::from_cents(4200),
                estimated_pickup_time: at(10),
                supported_needs: needs(&["oxygen", "service_animal"]),
                detail: OptionDetail::Fleet(FleetDetail {
                    vehicle_id: "WV-12".to_string(),
                    vehicle_type: VehicleType::WheelchairVan,
                    capacity: 4,
                    trips_impacted: vec![
                        TripImpact {
                            trip_id: "TR-1041".to_string(),
                            patient_name: "R. Alvarez".to_string(),
                            description: "dialysis return moves from 15:10 to 15:35".to_string(),
                        },
                        TripImpact {
                            trip_id: "TR-1057".to_string(),
                            patient_name: "M. Okafor".to_string(),
                            description: "reassigned to vehicle WV-07".to_string(),
                        },
                    ],
                }),
            },
            FulfillmentOption {
                id: OptionId::new("fleet-sd-03"),
                cost: Cost::from_cents(2800),
                estimated_pickup_time: at(5),
                supported_needs: needs(&["service_animal"]),
                detail: OptionDetail::Fleet(FleetDetail {
                    vehicle_id: "SD-03".to_string(),
                    vehicle_type: VehicleType::Sedan,
                    capacity: 3,
                    trips_impacted: Vec::new(),
                }),
            },
        ],
        SourceKind::Marketplace => vec![FulfillmentOption {
            id: OptionId::new("market-buckeye-1"),
            cost: Cost::from_cents(5150),
            estimated_pickup_time: at(25),
            supported_needs: needs(&["oxygen", "bariatric"]),
            detail: OptionDetail::Marketplace(MarketplaceDetail {
                provider_id: "PRV-8812".to_string(),
                provider_name: "Buckeye Medical Transit".to_string(),
                rating: 4.7,
                response_latency_mins: 6,
                capacity: 3,
                rated_mobility: [MobilityType::Wheelchair, MobilityType::Stretcher]
                    .into_iter()
                    .collect(),
            }),
        }],
        SourceKind::Tnc => vec![
            FulfillmentOption {
                id: OptionId::new("tnc-rideco-std"),
                cost: Cost::from_cents(1975),
                estimated_pickup_time: at(8),
                supported_needs: needs(&["service_animal"]),
                detail: OptionDetail::Tnc(TncDetail {
                    provider_name: "RideCo".to_string(),
                    service_level: ServiceLevel::Standard,
                    surge_multiplier: Some(1.2),
                }),
            },
            FulfillmentOption {
                id: OptionId::new("tnc-rideco-wav"),
                cost: Cost::from_cents(3600),
                estimated_pickup_time: at(18),
                supported_needs: BTreeSet::new(),
                detail: OptionDetail::Tnc(TncDetail {
                    provider_name: "RideCo".to_string(),
                    service_level: ServiceLevel::Wav,
                    surge_multiplier: None,
                }),
            },
        ],
    }
}
