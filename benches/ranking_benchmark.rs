use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nemt_trip_matching::fulfillment::{
    FleetDetail, MarketplaceDetail, ServiceLevel, TncDetail, TripImpact, VehicleType,
};
use nemt_trip_matching::{
    AssessedOption, Cost, FulfillmentOption, MobilityType, OptionDetail, OptionId,
    RankingEngine, SortCriterion, TripConstraints,
};
use rand::{thread_rng, Rng};
use std::collections::BTreeSet;

// Random mix of the three sources, assessed against one wheelchair trip
fn option_set(count: usize) -> Vec<AssessedOption> {
    let mut rng = thread_rng();
    let base = Utc.with_ymd_and_hms(2025, 6, 11, 14, 0, 0).unwrap();
    let constraints = TripConstraints::new(MobilityType::Wheelchair).with_escorts(1);

    (0..count)
        .map(|i| {
            let detail = match i % 3 {
                0 => OptionDetail::Fleet(FleetDetail {
                    vehicle_id: format!("WV-{i}"),
                    vehicle_type: if rng.gen_bool(0.7) {
                        VehicleType::WheelchairVan
                    } else {
                        VehicleType::Minivan
                    },
                    capacity: rng.gen_range(1..6),
                    trips_impacted: (0..rng.gen_range(0..4))
                        .map(|n| TripImpact {
                            trip_id: format!("TR-{i}-{n}"),
                            patient_name: "Member".to_string(),
                            description: "pickup moves 15 minutes later".to_string(),
                        })
                        .collect(),
                }),
                1 => OptionDetail::Marketplace(MarketplaceDetail {
                    provider_id: format!("PRV-{i}"),
                    provider_name: "Buckeye Medical Transit".to_string(),
                    rating: rng.gen_range(3.0..5.0),
                    response_latency_mins: rng.gen_range(2..20),
                    capacity: rng.gen_range(2..5),
                    rated_mobility: [MobilityType::Wheelchair].into_iter().collect(),
                }),
                _ => OptionDetail::Tnc(TncDetail {
                    provider_name: "RideCo".to_string(),
                    service_level: if rng.gen_bool(0.5) {
                        ServiceLevel::Wav
                    } else {
                        ServiceLevel::Standard
                    },
                    surge_multiplier: None,
                }),
            };
            let option = FulfillmentOption {
                id: OptionId::new(format!("opt-{i:05}")),
                cost: Cost::from_cents(rng.gen_range(1_500..9_000)),
                estimated_pickup_time: base + Duration::minutes(rng.gen_range(0..90)),
                supported_needs: BTreeSet::new(),
                detail,
            };
            AssessedOption::assess(option, &constraints)
        })
        .collect()
}

pub fn ranking_benchmark(c: &mut Criterion) {
    let engine = RankingEngine::default();
    let mut group = c.benchmark_group("option_ranking");

    for size in [10usize, 100, 1_000].iter() {
        let options = option_set(*size);
        for criterion in SortCriterion::ALL {
            group.bench_with_input(
                BenchmarkId::new(criterion.as_str(), size),
                &options,
                |b, options| b.iter(|| engine.rank(black_box(options), criterion)),
            );
        }
    }

    group.finish();
}

criterion_group!(benches, ranking_benchmark);
criterion_main!(benches);
