// Runs one trip through the whole flow against the mock backends and prints the confirmation.

use anyhow::{anyhow, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use nemt_trip_matching::booking::BookingCoordinator;
use nemt_trip_matching::mock_source::{sample_options, AcceptAllDispatch, MockSource};
use nemt_trip_matching::trip::{
    Address, FundingSource, GeoPoint, PatientInfo, TripType,
};
use nemt_trip_matching::{
    telemetry, FlowContext, FlowEvent, FlowState, MatchingConfig, MobilityType, SourceKind,
    SourceSet, TripConstraints, TripFlow, TripKey, TripRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn address(street: &str, postal_code: &str, lat: f64, lon: f64) -> Address {
    Address {
        street: street.to_string(),
        city: "Columbus".to_string(),
        state: "OH".to_string(),
        postal_code: postal_code.to_string(),
        location: GeoPoint { lat, lon },
    }
}

fn demo_request() -> TripRequest {
    TripRequest {
        trip_key: TripKey::new(format!("TRIP-{}", Utc::now().format("%H%M%S"))),
        patient: PatientInfo {
            name: "Dana Whitfield".to_string(),
            member_id: "MCD-448812".to_string(),
            phone: Some("614-555-0142".to_string()),
        },
        pickup: address("12 Oak St", "43215", 39.9612, -82.9988),
        dropoff: address("410 W 10th Ave", "43210", 39.9950, -83.0170),
        requested_at: Utc::now() + ChronoDuration::hours(2),
        constraints: TripConstraints::new(MobilityType::Wheelchair)
            .with_escorts(1)
            .with_need("oxygen"),
        trip_type: TripType::OneWay,
        will_call: false,
        funding_source: FundingSource::Medicaid,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = MatchingConfig::from_env().context("reading matching configuration")?;
    telemetry::init(&config.log_filter)?;

    let request = demo_request();
    let mock = |kind: SourceKind, delay_ms: u64| {
        Arc::new(
            MockSource::new(kind)
                .with_options(sample_options(kind, request.requested_at))
                .with_delay(Duration::from_millis(delay_ms)),
        )
    };
    let sources = SourceSet::new(
        mock(SourceKind::Fleet, 120),
        mock(SourceKind::Marketplace, 300),
        mock(SourceKind::Tnc, 60),
    )?;

    let mut flow = TripFlow::new(FlowContext {
        sources,
        booking: Arc::new(BookingCoordinator::new(Arc::new(AcceptAllDispatch::default()))),
        config: config.clone(),
    });

    flow.handle(FlowEvent::RequestResolved(request)).await?;
    flow.handle(FlowEvent::Confirm).await?;
    let state = flow.settle().await;
    if state != FlowState::OptionsReady {
        return Err(anyhow!("search ended in state {state}"));
    }

    let ranked = flow.ranked_options();
    for (position, assessed) in ranked.iter().enumerate() {
        let option = &assessed.option;
        info!(
            position = position + 1,
            option = %option.id,
            source = %option.source(),
            cost = %option.cost,
            compatible = assessed.is_compatible(),
            reasons = ?assessed.compatibility.reasons,
            "ranked option"
        );
    }

    let best = ranked
        .iter()
        .find(|assessed| assessed.is_compatible())
        .ok_or_else(|| anyhow!("no compatible option for this trip"))?;
    flow.handle(FlowEvent::Select(best.option.key())).await?;
    flow.handle(FlowEvent::Book).await?;

    let confirmation = flow
        .confirmation()
        .ok_or_else(|| anyhow!("flow booked without a confirmation"))?;
    println!("{}", serde_json::to_string_pretty(confirmation.as_ref())?);
    Ok(())
}
