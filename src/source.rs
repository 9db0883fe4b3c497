// Source adapters: the boundary to the fleet scheduler, TNC providers and the marketplace.
// The orchestrator only sees this trait, so a network client can replace the mocks
// without touching the search code.

use crate::fulfillment::{FulfillmentOption, SourceKind};
use crate::trip::{Address, TripConstraints, TripRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceFetchError {
    #[error("{kind} source unavailable: {message}")]
    Unavailable { kind: SourceKind, message: String },

    #[error("{kind} source rejected the query: {message}")]
    Rejected { kind: SourceKind, message: String },

    #[error("{kind} source timed out after {after_ms}ms")]
    Timeout { kind: SourceKind, after_ms: u64 },

    #[error("{kind} source task ended without a result: {message}")]
    Aborted { kind: SourceKind, message: String },
}

impl SourceFetchError {
    pub fn source_kind(&self) -> SourceKind {
        match self {
            SourceFetchError::Unavailable { kind, .. }
            | SourceFetchError::Rejected { kind, .. }
            | SourceFetchError::Timeout { kind, .. }
            | SourceFetchError::Aborted { kind, .. } => *kind,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SourceFetchError::Timeout { .. })
    }
}

// What each adapter is asked: the constraints and the pickup/dropoff pair
#[derive(Debug, Clone, PartialEq)]
pub struct SourceQuery {
    pub constraints: TripConstraints,
    pub pickup: Address,
    pub dropoff: Address,
    pub requested_at: DateTime<Utc>,
}

impl From<&TripRequest> for SourceQuery {
    fn from(request: &TripRequest) -> Self {
        Self {
            constraints: request.constraints.clone(),
            pickup: request.pickup.clone(),
            dropoff: request.dropoff.clone(),
            requested_at: request.requested_at,
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync + 'static {
    // Which of the three sources this adapter speaks for
    fn kind(&self) -> SourceKind;

    // One attempt; retries are the caller's decision
    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<FulfillmentOption>, SourceFetchError>;
}

// One adapter per source, fixed at construction.
#[derive(Clone)]
pub struct SourceSet {
    fleet: Arc<dyn SourceAdapter>,
    marketplace: Arc<dyn SourceAdapter>,
    tnc: Arc<dyn SourceAdapter>,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Adapter registered as {expected} reports itself as {actual}")]
pub struct SourceMismatch {
    pub expected: SourceKind,
    pub actual: SourceKind,
}

impl SourceSet {
    pub fn new(
        fleet: Arc<dyn SourceAdapter>,
        marketplace: Arc<dyn SourceAdapter>,
        tnc: Arc<dyn SourceAdapter>,
    ) -> Result<Self, SourceMismatch> {
        for (expected, adapter) in [
            (SourceKind::Fleet, &fleet),
            (SourceKind::Marketplace, &marketplace),
            (SourceKind::Tnc, &tnc),
        ] {
            if adapter.kind() != expected {
                return Err(SourceMismatch {
                    expected,
                    actual: adapter.kind(),
                });
            }
        }
        Ok(Self {
            fleet,
            marketplace,
            tnc,
        })
    }

    pub fn get(&self, kind: SourceKind) -> &Arc<dyn SourceAdapter> {
        match kind {
            SourceKind::Fleet => &self.fleet,
            SourceKind::Marketplace => &self.marketplace,
            SourceKind::Tnc => &self.tnc,
        }
    }
}
