// Trip flow: request -> confirm -> search -> select -> book, with reset from anywhere.
//
// The flow owns the search orchestrator, so every mutation of progress, the aggregate and
// the flow state goes through `handle`, `pump` or `settle` on one `&mut TripFlow`.

use crate::booking::{BookingConfirmation, BookingCoordinator, BookingError};
use crate::compatibility::AssessedOption;
use crate::config::MatchingConfig;
use crate::fulfillment::OptionKey;
use crate::ranking::{RankingEngine, SortCriterion};
use crate::search::{PumpOutcome, SearchHandle, SearchOrchestrator, SearchSnapshot};
use crate::source::SourceSet;
use crate::trip::{RequestAmendment, TripRequest, ValidationErrors};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    New,
    AwaitingConfirmation,
    Searching,
    OptionsReady,
    Booking,
    Booked,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FlowState::New => "new",
            FlowState::AwaitingConfirmation => "awaiting_confirmation",
            FlowState::Searching => "searching",
            FlowState::OptionsReady => "options_ready",
            FlowState::Booking => "booking",
            FlowState::Booked => "booked",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    // Outcome of the upstream record lookup
    RequestResolved(TripRequest),
    ResolutionFailed(String),
    Amend(RequestAmendment),
    Confirm,
    RetrySearch,
    Select(OptionKey),
    SortBy(SortCriterion),
    Book,
    Reset,
}

impl FlowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FlowEvent::RequestResolved(_) => "request_resolved",
            FlowEvent::ResolutionFailed(_) => "resolution_failed",
            FlowEvent::Amend(_) => "amend",
            FlowEvent::Confirm => "confirm",
            FlowEvent::RetrySearch => "retry_search",
            FlowEvent::Select(_) => "select",
            FlowEvent::SortBy(_) => "sort_by",
            FlowEvent::Book => "book",
            FlowEvent::Reset => "reset",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    #[error("Event {event} is not accepted in state {state}")]
    InvalidTransition {
        state: FlowState,
        event: &'static str,
    },

    #[error("Trip request could not be resolved: {0}")]
    Resolution(String),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("No option selected")]
    NoSelection,

    #[error(transparent)]
    Booking(#[from] BookingError),
}

// Collaborators a flow needs, passed in explicitly.
#[derive(Clone)]
pub struct FlowContext {
    pub sources: SourceSet,
    pub booking: Arc<BookingCoordinator>,
    pub config: MatchingConfig,
}

pub struct TripFlow {
    state: FlowState,
    request: Option<TripRequest>,
    search: SearchOrchestrator,
    booking: Arc<BookingCoordinator>,
    ranking: RankingEngine,
    sort: SortCriterion,
    selected: Option<OptionKey>,
    confirmation: Option<Arc<BookingConfirmation>>,
    last_error: Option<FlowError>,
}

impl TripFlow {
    pub fn new(context: FlowContext) -> Self {
        Self {
            state: FlowState::New,
            request: None,
            search: SearchOrchestrator::new(context.sources, &context.config),
            booking: context.booking,
            ranking: RankingEngine::new(context.config.ranking),
            sort: context.config.default_sort,
            selected: None,
            confirmation: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn request(&self) -> Option<&TripRequest> {
        self.request.as_ref()
    }

    pub fn selected(&self) -> Option<&OptionKey> {
        self.selected.as_ref()
    }

    pub fn sort(&self) -> SortCriterion {
        self.sort
    }

    pub fn confirmation(&self) -> Option<&Arc<BookingConfirmation>> {
        self.confirmation.as_ref()
    }

    pub fn last_error(&self) -> Option<&FlowError> {
        self.last_error.as_ref()
    }

    pub fn snapshot(&self) -> &SearchSnapshot {
        self.search.snapshot()
    }

    pub fn search_handle(&self) -> SearchHandle {
        self.search.handle()
    }

    // The live aggregate under the current sort criterion
    pub fn ranked_options(&self) -> Vec<AssessedOption> {
        self.ranking.rank(&self.search.snapshot().options, self.sort)
    }

    // Applies one event. On rejection the state is left as it was and the error is
    // also kept in `last_error`.
    #[instrument(skip_all, fields(state = %self.state, event = event.name()))]
    pub async fn handle(&mut self, event: FlowEvent) -> Result<FlowState, FlowError> {
        let from = self.state;
        let name = event.name();

        match self.transition(event).await {
            Ok(to) => {
                if to != from {
                    info!(from = %from, to = %to, event = name, "flow transition");
                }
                self.last_error = None;
                Ok(to)
            }
            Err(error) => {
                warn!(state = %self.state, event = name, error = %error, "flow event rejected");
                self.last_error = Some(error.clone());
                Err(error)
            }
        }
    }

    async fn transition(&mut self, event: FlowEvent) -> Result<FlowState, FlowError> {
        match (self.state, event) {
            (_, FlowEvent::Reset) => {
                self.reset();
                Ok(self.state)
            }
            (_, FlowEvent::SortBy(criterion)) => {
                self.sort = criterion;
                Ok(self.state)
            }
            (FlowState::New, FlowEvent::RequestResolved(request)) => {
                self.request = Some(request);
                self.state = FlowState::AwaitingConfirmation;
                Ok(self.state)
            }
            (FlowState::New, FlowEvent::ResolutionFailed(reason)) => {
                Err(FlowError::Resolution(reason))
            }
            (FlowState::AwaitingConfirmation, FlowEvent::Amend(amendment)) => {
                if let Some(request) = self.request.as_mut() {
                    request.apply(amendment);
                }
                Ok(self.state)
            }
            (FlowState::AwaitingConfirmation, FlowEvent::Confirm) => {
                if let Some(request) = self.request.as_ref() {
                    request.validate()?;
                }
                self.start_search();
                Ok(self.state)
            }
            (FlowState::OptionsReady, FlowEvent::RetrySearch) => {
                self.start_search();
                Ok(self.state)
            }
            (FlowState::Searching | FlowState::OptionsReady, FlowEvent::Select(key)) => {
                self.select(key)
            }
            (FlowState::OptionsReady, FlowEvent::Book) => self.book().await,
            (state, other) => Err(FlowError::InvalidTransition {
                state,
                event: other.name(),
            }),
        }
    }

    // Applies one source report and moves to OptionsReady once the search completes.
    pub async fn pump(&mut self) -> Option<PumpOutcome> {
        let outcome = self.search.pump().await;
        self.mark_ready_if_complete();
        outcome
    }

    // Pumps until the live search (if any) is complete
    pub async fn settle(&mut self) -> FlowState {
        self.search.settle().await;
        self.mark_ready_if_complete();
        self.state
    }

    fn mark_ready_if_complete(&mut self) {
        if self.state == FlowState::Searching && self.search.snapshot().is_complete() {
            let snapshot = self.search.snapshot();
            info!(
                epoch = snapshot.epoch,
                options = snapshot.options.len(),
                compatible = snapshot.stats.compatible_options,
                "options ready"
            );
            self.state = FlowState::OptionsReady;
        }
    }

    fn start_search(&mut self) {
        let Some(request) = self.request.as_ref() else {
            return;
        };
        self.selected = None;
        self.search.search(request);
        self.state = FlowState::Searching;
    }

    fn select(&mut self, key: OptionKey) -> Result<FlowState, FlowError> {
        let assessed = self
            .search
            .snapshot()
            .find(&key)
            .ok_or_else(|| BookingError::StaleOption(key.clone()))?;
        if !assessed.is_compatible() {
            let reasons = assessed.compatibility.reasons.clone();
            return Err(BookingError::IncompatibleOption { option: key, reasons }.into());
        }
        info!(option = %key, "option selected");
        self.selected = Some(key);
        Ok(self.state)
    }

    async fn book(&mut self) -> Result<FlowState, FlowError> {
        let selected = self.selected.clone().ok_or(FlowError::NoSelection)?;
        let Some(trip_key) = self.request.as_ref().map(|r| r.trip_key.clone()) else {
            return Err(FlowError::InvalidTransition {
                state: self.state,
                event: FlowEvent::Book.name(),
            });
        };
        let option = self
            .search
            .snapshot()
            .find(&selected)
            .map(|assessed| Arc::clone(&assessed.option))
            .ok_or_else(|| BookingError::StaleOption(selected.clone()))?;

        self.state = FlowState::Booking;
        let step = BookingStep {
            state: &mut self.state,
        };
        let booking = Arc::clone(&self.booking);
        let confirmation = booking
            .commit(&trip_key, &option, self.search.snapshot())
            .await?;
        step.finish(FlowState::Booked);
        self.confirmation = Some(confirmation);
        Ok(self.state)
    }

    fn reset(&mut self) {
        self.search.reset();
        self.request = None;
        self.selected = None;
        self.confirmation = None;
        self.last_error = None;
        self.state = FlowState::New;
    }
}

// Anything short of Booked lands back in OptionsReady, including a dropped `handle` future
struct BookingStep<'a> {
    state: &'a mut FlowState,
}

impl BookingStep<'_> {
    fn finish(mut self, next: FlowState) {
        *self.state = next;
    }
}

impl Drop for BookingStep<'_> {
    fn drop(&mut self) {
        if *self.state == FlowState::Booking {
            *self.state = FlowState::OptionsReady;
        }
    }
}
