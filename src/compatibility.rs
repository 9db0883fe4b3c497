// Compatibility filter: can this option carry this patient?
// Three independent rules, all of which must hold. Each violated rule adds one reason.

use crate::fulfillment::FulfillmentOption;
use crate::trip::{MobilityType, TripConstraints};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compatibility {
    pub compatible: bool,
    pub reasons: Vec<String>,
}

impl Compatibility {
    fn from_reasons(reasons: Vec<String>) -> Self {
        Self {
            compatible: reasons.is_empty(),
            reasons,
        }
    }
}

// Evaluates `option` against `constraints`.
//
// Pure: neither input is touched and equal inputs give equal results.
pub fn is_compatible(option: &FulfillmentOption, constraints: &TripConstraints) -> Compatibility {
    let mut reasons = Vec::new();

    // Mobility: anything carries an ambulatory rider, the rest need an explicit rating
    if !option.is_rated_for(constraints.mobility) {
        reasons.push(format!(
            "{} is not rated for {} transport",
            option.provider_label(),
            constraints.mobility
        ));
    }

    // Escorts: patient plus escorts must fit
    if constraints.escort {
        let needed = constraints.riders();
        let capacity = option.capacity();
        if capacity < needed {
            reasons.push(format!(
                "capacity {} cannot seat the patient and {} escort(s) ({} seats needed)",
                capacity, constraints.escort_count, needed
            ));
        }
    }

    // Special needs: subset test, reported in set order
    let missing: Vec<&str> = constraints
        .special_needs
        .iter()
        .filter(|tag| !option.supported_needs.contains(*tag))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        reasons.push(format!("missing support for: {}", missing.join(", ")));
    }

    Compatibility::from_reasons(reasons)
}

// An option as surfaced by a search: frozen behind an Arc and tagged with its verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssessedOption {
    pub option: Arc<FulfillmentOption>,
    pub compatibility: Compatibility,
}

impl AssessedOption {
    pub fn assess(option: FulfillmentOption, constraints: &TripConstraints) -> Self {
        let compatibility = is_compatible(&option, constraints);
        Self {
            option: Arc::new(option),
            compatibility,
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.compatibility.compatible
    }
}

// Keep only the options that pass every rule
pub fn filter_compatible<'a>(
    options: &'a [FulfillmentOption],
    constraints: &TripConstraints,
) -> Vec<&'a FulfillmentOption> {
    options
        .iter()
        .filter(|option| is_compatible(option, constraints).compatible)
        .collect()
}

// Highest mobility level an option can serve, used in log lines
pub fn best_mobility(option: &FulfillmentOption) -> MobilityType {
    [MobilityType::Stretcher, MobilityType::Wheelchair]
        .into_iter()
        .find(|level| option.is_rated_for(*level))
        .unwrap_or(MobilityType::Ambulatory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulfillment::fixtures::*;
    use crate::fulfillment::{Cost, ServiceLevel, VehicleType};
    use test_case::test_case;

    fn wheelchair_with_two_escorts() -> TripConstraints {
        TripConstraints::new(MobilityType::Wheelchair).with_escorts(2)
    }

    #[test]
    fn test_sedan_too_small_for_wheelchair_and_escorts() {
        let sedan = fleet("sedan", Cost::dollars(35), 15, VehicleType::Sedan, 1);
        let result = is_compatible(&sedan, &wheelchair_with_two_escorts());

        assert!(!result.compatible);
        assert!(result.reasons.iter().any(|r| r.contains("capacity 1")));
        assert!(result.reasons.iter().any(|r| r.contains("not rated for wheelchair")));
    }

    #[test]
    fn test_wheelchair_van_with_room_is_compatible() {
        let van = fleet("van", Cost::dollars(60), 20, VehicleType::WheelchairVan, 4);
        let result = is_compatible(&van, &wheelchair_with_two_escorts());

        assert!(result.compatible, "unexpected reasons: {:?}", result.reasons);
        assert!(result.reasons.is_empty());
    }

    #[test_case(MobilityType::Ambulatory, ServiceLevel::Standard, true; "#1 ambulatory rides anything")]
    #[test_case(MobilityType::Wheelchair, ServiceLevel::Standard, false; "#2 standard car has no wheelchair rating")]
    #[test_case(MobilityType::Wheelchair, ServiceLevel::Wav, true; "#3 wav carries wheelchairs")]
    #[test_case(MobilityType::Stretcher, ServiceLevel::Wav, false; "#4 wav is not a stretcher vehicle")]
    fn test_mobility_rule(mobility: MobilityType, level: ServiceLevel, expected: bool) {
        let ride = tnc("ride", Cost::dollars(20), 5, level);
        let result = is_compatible(&ride, &TripConstraints::new(mobility));
        assert_eq!(result.compatible, expected);
    }

    #[test]
    fn test_capacity_ignored_without_escort() {
        let tiny = marketplace("m1", Cost::dollars(45), 30, &[], 1);
        let result = is_compatible(&tiny, &TripConstraints::new(MobilityType::Ambulatory));
        assert!(result.compatible);
    }

    #[test]
    fn test_missing_needs_listed_in_order() {
        let mut van = fleet("van", Cost::dollars(60), 20, VehicleType::WheelchairVan, 4);
        van.supported_needs.insert("oxygen".to_string());
        let constraints = TripConstraints::new(MobilityType::Wheelchair)
            .with_need("service_animal")
            .with_need("oxygen")
            .with_need("bariatric");

        let result = is_compatible(&van, &constraints);
        assert_eq!(
            result.reasons,
            vec!["missing support for: bariatric, service_animal".to_string()]
        );
    }

    #[test]
    fn test_evaluation_is_deterministic_and_pure() {
        let option = marketplace("m1", Cost::dollars(45), 30, &[MobilityType::Stretcher], 2);
        let constraints = TripConstraints::new(MobilityType::Stretcher)
            .with_escorts(3)
            .with_need("oxygen");
        let option_before = option.clone();
        let constraints_before = constraints.clone();

        let first = is_compatible(&option, &constraints);
        let second = is_compatible(&option, &constraints);

        assert_eq!(first, second);
        assert_eq!(first.reasons.len(), 2);
        assert_eq!(option, option_before);
        assert_eq!(constraints, constraints_before);
    }

    #[test]
    fn test_filter_compatible_keeps_passing_options() {
        let options = vec![
            fleet("sedan", Cost::dollars(35), 15, VehicleType::Sedan, 1),
            fleet("van", Cost::dollars(60), 20, VehicleType::WheelchairVan, 4),
            tnc("wav", Cost::dollars(40), 10, ServiceLevel::Wav),
        ];
        let kept = filter_compatible(&options, &wheelchair_with_two_escorts());
        let ids: Vec<&str> = kept.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["van", "wav"]);
    }

    #[test]
    fn test_assess_tags_option() {
        let sedan = fleet("sedan", Cost::dollars(35), 15, VehicleType::Sedan, 1);
        let assessed = AssessedOption::assess(sedan.clone(), &wheelchair_with_two_escorts());
        assert!(!assessed.is_compatible());
        assert_eq!(*assessed.option, sedan);
    }

    #[test]
    fn test_best_mobility() {
        let stretcher = fleet("s", Cost::dollars(90), 10, VehicleType::StretcherVan, 2);
        let sedan = fleet("c", Cost::dollars(30), 10, VehicleType::Sedan, 4);
        assert_eq!(best_mobility(&stretcher), MobilityType::Stretcher);
        assert_eq!(best_mobility(&sedan), MobilityType::Ambulatory);
    }
}
