// Trip matching core for non-emergency medical transport

pub mod booking;
pub mod compatibility;
pub mod config;
pub mod flow;
pub mod fulfillment;
pub mod mock_source; // In-process stand-ins for the three backends
pub mod ranking;
pub mod search;
pub mod source;
pub mod telemetry;
pub mod trip;

// Re-export key types for convenience
pub use booking::{BookingConfirmation, BookingCoordinator, BookingError, DispatchError, ProviderDispatch};
pub use compatibility::{filter_compatible, is_compatible, AssessedOption, Compatibility};
pub use config::{ConfigError, MatchingConfig};
pub use flow::{FlowContext, FlowError, FlowEvent, FlowState, TripFlow};
pub use fulfillment::{Cost, FulfillmentOption, OptionDetail, OptionId, OptionKey, SourceKind};
pub use ranking::{RankingEngine, RankingError, RankingWeights, SortCriterion};
pub use search::{SearchHandle, SearchOrchestrator, SearchProgress, SearchSnapshot, SearchStats, SourceStatus};
pub use source::{SourceAdapter, SourceFetchError, SourceQuery, SourceSet};
pub use trip::{MobilityType, TripConstraints, TripKey, TripRequest, ValidationError, ValidationErrors};
