// Search orchestrator: fans a trip out to the three sources and aggregates what comes back.
//
// Adapter calls run as independent tasks and report over a channel. The orchestrator is the
// only owner of progress and the aggregate; it applies reports one at a time, in the order they
// arrive, and drops any report stamped with an epoch other than the live one.

use crate::compatibility::{best_mobility, AssessedOption};
use crate::config::MatchingConfig;
use crate::fulfillment::{FulfillmentOption, OptionKey, SourceKind};
use crate::source::{SourceFetchError, SourceQuery, SourceSet};
use crate::trip::{TripConstraints, TripRequest};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    #[default]
    Pending,
    Loading,
    Done,
    Error,
}

impl SourceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SourceStatus::Done | SourceStatus::Error)
    }
}

// Per-source status. Moves pending -> loading -> done|error and never backwards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SearchProgress {
    statuses: [SourceStatus; 3],
}

impl SearchProgress {
    pub fn status(&self, kind: SourceKind) -> SourceStatus {
        self.statuses[kind.index()]
    }

    // Applies the move only if it goes forward from a non-terminal status
    fn advance(&mut self, kind: SourceKind, next: SourceStatus) -> bool {
        let current = &mut self.statuses[kind.index()];
        if current.is_terminal() || next <= *current {
            return false;
        }
        *current = next;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.statuses.iter().all(|status| status.is_terminal())
    }

    pub fn iter(&self) -> impl Iterator<Item = (SourceKind, SourceStatus)> + '_ {
        SourceKind::ALL
            .into_iter()
            .map(move |kind| (kind, self.status(kind)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SearchStats {
    pub options_received: usize,
    pub compatible_options: usize,
    pub duplicates_dropped: usize,
    pub mismatched_dropped: usize,
    pub sources_failed: usize,
    pub sources_timed_out: usize,
}

// The aggregate as of one moment of one epoch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchSnapshot {
    pub epoch: u64,
    pub progress: SearchProgress,
    pub options: Vec<AssessedOption>,
    pub failures: Vec<SourceFetchError>,
    pub stats: SearchStats,
}

impl SearchSnapshot {
    fn empty(epoch: u64) -> Self {
        Self {
            epoch,
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.progress.is_complete()
    }

    pub fn find(&self, key: &OptionKey) -> Option<&AssessedOption> {
        self.options.iter().find(|assessed| assessed.option.has_key(key))
    }

    pub fn compatible(&self) -> impl Iterator<Item = &AssessedOption> {
        self.options.iter().filter(|assessed| assessed.is_compatible())
    }
}

// What applying one report did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpOutcome {
    Applied {
        kind: SourceKind,
        status: SourceStatus,
        added: usize,
    },
    DiscardedStale {
        kind: SourceKind,
        epoch: u64,
    },
}

struct SourceReport {
    epoch: u64,
    kind: SourceKind,
    outcome: Result<Vec<FulfillmentOption>, SourceFetchError>,
}

// Caller-side view of a search: its epoch plus the live snapshot.
#[derive(Debug, Clone)]
pub struct SearchHandle {
    epoch: u64,
    updates: watch::Receiver<SearchSnapshot>,
}

impl SearchHandle {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        self.updates.borrow().clone()
    }

    // False once a reset or a newer search has replaced this one
    pub fn is_current(&self) -> bool {
        self.updates.borrow().epoch == self.epoch
    }

    // Resolves with the completed snapshot, or `None` if the search was superseded first.
    pub async fn wait_until_complete(&mut self) -> Option<SearchSnapshot> {
        let epoch = self.epoch;
        let seen = self
            .updates
            .wait_for(|snapshot| snapshot.epoch != epoch || snapshot.is_complete())
            .await
            .ok()?;
        let snapshot = SearchSnapshot::clone(&seen);
        drop(seen);
        (snapshot.epoch == epoch).then_some(snapshot)
    }
}

pub struct SearchOrchestrator {
    sources: SourceSet,
    source_timeout: Duration,
    epoch: u64,
    constraints: Option<TripConstraints>,
    snapshot: SearchSnapshot,
    outstanding: usize,
    stale_discarded: u64,
    reports_tx: mpsc::UnboundedSender<SourceReport>,
    reports_rx: mpsc::UnboundedReceiver<SourceReport>,
    published: watch::Sender<SearchSnapshot>,
}

impl SearchOrchestrator {
    pub fn new(sources: SourceSet, config: &MatchingConfig) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (published, _) = watch::channel(SearchSnapshot::default());
        Self {
            sources,
            source_timeout: config.source_timeout,
            epoch: 0,
            constraints: None,
            snapshot: SearchSnapshot::default(),
            outstanding: 0,
            stale_discarded: 0,
            reports_tx,
            reports_rx,
            published,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn snapshot(&self) -> &SearchSnapshot {
        &self.snapshot
    }

    pub fn handle(&self) -> SearchHandle {
        SearchHandle {
            epoch: self.epoch,
            updates: self.published.subscribe(),
        }
    }

    // Reports dropped because their epoch was no longer live
    pub fn stale_discarded(&self) -> u64 {
        self.stale_discarded
    }

    // Adapter calls issued but not yet applied or discarded, across all epochs
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn is_searching(&self) -> bool {
        self.constraints.is_some() && !self.snapshot.is_complete()
    }

    // Starts a new epoch and issues one call per source.
    //
    // Must run inside a Tokio runtime. Anything still in flight from earlier epochs
    // will be discarded when it reports.
    pub fn search(&mut self, request: &TripRequest) -> SearchHandle {
        self.epoch += 1;
        let epoch = self.epoch;
        let query = Arc::new(SourceQuery::from(request));
        self.constraints = Some(request.constraints.clone());
        self.snapshot = SearchSnapshot::empty(epoch);

        info!(
            epoch,
            trip = %request.trip_key,
            mobility = %request.constraints.mobility,
            "starting option search"
        );

        for kind in SourceKind::ALL {
            self.snapshot.progress.advance(kind, SourceStatus::Loading);
            self.outstanding += 1;
            self.spawn_fetch(epoch, kind, Arc::clone(&query));
        }

        self.publish();
        self.handle()
    }

    fn spawn_fetch(&self, epoch: u64, kind: SourceKind, query: Arc<SourceQuery>) {
        let adapter = Arc::clone(self.sources.get(kind));
        let reports = self.reports_tx.clone();
        let limit = self.source_timeout;
        let span = tracing::debug_span!("source_fetch", epoch, source = %kind);

        tokio::spawn(
            async move {
                // Inner task so a panicking adapter still produces a report
                let call = tokio::spawn(async move {
                    tokio::time::timeout(limit, adapter.fetch(&query)).await
                });
                let outcome = match call.await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_elapsed)) => Err(SourceFetchError::Timeout {
                        kind,
                        after_ms: limit.as_millis() as u64,
                    }),
                    Err(join_error) => Err(SourceFetchError::Aborted {
                        kind,
                        message: join_error.to_string(),
                    }),
                };
                // Receiver gone means the orchestrator was dropped; nothing to tell
                let _ = reports.send(SourceReport {
                    epoch,
                    kind,
                    outcome,
                });
            }
            .instrument(span),
        );
    }

    // Applies the next report, waiting for one if needed. `None` when nothing is in flight.
    pub async fn pump(&mut self) -> Option<PumpOutcome> {
        if self.outstanding == 0 {
            return None;
        }
        // The orchestrator holds a sender, so the channel cannot close under us
        let report = self.reports_rx.recv().await?;
        self.outstanding -= 1;
        Some(self.apply(report))
    }

    // Pumps until the live search is complete (or there is no live search)
    pub async fn settle(&mut self) -> &SearchSnapshot {
        while self.is_searching() {
            if self.pump().await.is_none() {
                break;
            }
        }
        &self.snapshot
    }

    // Waits out every call still in flight, applying or discarding each
    pub async fn drain(&mut self) {
        while self.pump().await.is_some() {}
    }

    // Abandons the live search: new epoch, all sources pending, no options.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.constraints = None;
        self.snapshot = SearchSnapshot::empty(self.epoch);
        debug!(epoch = self.epoch, in_flight = self.outstanding, "search reset");
        self.publish();
    }

    fn apply(&mut self, report: SourceReport) -> PumpOutcome {
        let SourceReport {
            epoch,
            kind,
            outcome,
        } = report;

        if epoch != self.epoch {
            self.stale_discarded += 1;
            debug!(
                report_epoch = epoch,
                live_epoch = self.epoch,
                source = %kind,
                "discarding stale source report"
            );
            return PumpOutcome::DiscardedStale { kind, epoch };
        }

        let (status, added) = match outcome {
            Ok(options) => (SourceStatus::Done, self.absorb(kind, options)),
            Err(error) => {
                warn!(epoch, source = %kind, error = %error, "source fetch failed");
                self.snapshot.stats.sources_failed += 1;
                if error.is_timeout() {
                    self.snapshot.stats.sources_timed_out += 1;
                }
                self.snapshot.failures.push(error);
                (SourceStatus::Error, 0)
            }
        };
        self.snapshot.progress.advance(kind, status);

        if self.snapshot.is_complete() {
            info!(
                epoch,
                options = self.snapshot.options.len(),
                compatible = self.snapshot.stats.compatible_options,
                failed_sources = self.snapshot.stats.sources_failed,
                "option search complete"
            );
        }

        self.publish();
        PumpOutcome::Applied {
            kind,
            status,
            added,
        }
    }

    // Tags and appends one source's options, returning how many were kept
    fn absorb(&mut self, kind: SourceKind, options: Vec<FulfillmentOption>) -> usize {
        let Some(constraints) = self.constraints.as_ref() else {
            return 0;
        };

        let mut added = 0;
        for option in options {
            if option.source() != kind {
                warn!(
                    source = %kind,
                    option = %option.id,
                    reported_as = %option.source(),
                    "dropping option reported by the wrong source"
                );
                self.snapshot.stats.mismatched_dropped += 1;
                continue;
            }
            // Ids are only unique within one source
            if self.snapshot.find(&option.key()).is_some() {
                warn!(source = %kind, option = %option.id, "dropping duplicate option id");
                self.snapshot.stats.duplicates_dropped += 1;
                continue;
            }

            let assessed = AssessedOption::assess(option, constraints);
            debug!(
                source = %kind,
                option = %assessed.option.id,
                cost = %assessed.option.cost,
                rated = %best_mobility(&assessed.option),
                compatible = assessed.is_compatible(),
                "option received"
            );
            self.snapshot.stats.options_received += 1;
            if assessed.is_compatible() {
                self.snapshot.stats.compatible_options += 1;
            }
            self.snapshot.options.push(assessed);
            added += 1;
        }

        debug!(source = %kind, added, "source options aggregated");
        added
    }

    fn publish(&self) {
        self.published.send_replace(self.snapshot.clone());
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::mock_source::{MockGate, MockSource};

    pub struct GatedSources {
        pub fleet: Arc<MockSource>,
        pub marketplace: Arc<MockSource>,
        pub tnc: Arc<MockSource>,
        pub gates: Vec<(SourceKind, MockGate)>,
    }

    impl GatedSources {
        pub fn new(
            fleet: Vec<FulfillmentOption>,
            marketplace: Vec<FulfillmentOption>,
            tnc: Vec<FulfillmentOption>,
        ) -> Self {
            let (fleet, fleet_gate) = MockSource::new(SourceKind::Fleet).with_options(fleet).gated();
            let (marketplace, marketplace_gate) = MockSource::new(SourceKind::Marketplace)
                .with_options(marketplace)
                .gated();
            let (tnc, tnc_gate) = MockSource::new(SourceKind::Tnc).with_options(tnc).gated();
            Self {
                fleet: Arc::new(fleet),
                marketplace: Arc::new(marketplace),
                tnc: Arc::new(tnc),
                gates: vec![
                    (SourceKind::Fleet, fleet_gate),
                    (SourceKind::Marketplace, marketplace_gate),
                    (SourceKind::Tnc, tnc_gate),
                ],
            }
        }

        pub fn set(&self) -> SourceSet {
            SourceSet::new(
                self.fleet.clone(),
                self.marketplace.clone(),
                self.tnc.clone(),
            )
            .unwrap()
        }

        pub fn open(&self, kind: SourceKind) {
            for (gate_kind, gate) in &self.gates {
                if *gate_kind == kind {
                    gate.open();
                }
            }
        }

        pub fn open_all(&self) {
            for (_, gate) in &self.gates {
                gate.open();
            }
        }
    }
}
