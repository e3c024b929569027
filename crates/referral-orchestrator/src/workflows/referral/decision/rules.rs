//! Ordered rule tables for the decision engine.
//!
//! Each table is evaluated top-down and the first matching rule wins. Rules carry a
//! stable name so the matched rule can be recorded in the decision snapshot.

use chrono::NaiveDate;

use super::config::DecisionConfig;
use super::signals::{ClinicalSignals, FoodSensitivity, MedicalCondition, MedicationClass};
use super::{DietCode, RiskScore};

pub(crate) struct RuleInput<'a> {
    pub signals: &'a ClinicalSignals,
    pub config: &'a DecisionConfig,
    pub as_of: NaiveDate,
}

/// A named predicate paired with the value it yields when it matches.
pub(crate) struct Rule<T> {
    pub name: &'static str,
    pub applies: fn(&RuleInput<'_>) -> bool,
    pub outcome: T,
}

pub(crate) fn first_match<'r, T>(rules: &'r [Rule<T>], input: &RuleInput<'_>) -> Option<&'r Rule<T>> {
    rules.iter().find(|rule| (rule.applies)(input))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RiskOutcome {
    Tier(RiskScore),
    ReusePrior,
}

pub(crate) const RISK_RULES: &[Rule<RiskOutcome>] = &[
    Rule {
        name: "heart_failure_flag",
        applies: heart_failure_flag,
        outcome: RiskOutcome::Tier(RiskScore::High),
    },
    Rule {
        name: "discharge_plan_flag",
        applies: discharge_plan_flag,
        outcome: RiskOutcome::Tier(RiskScore::High),
    },
    Rule {
        name: "abnormal_biometrics_with_category_risk",
        applies: abnormal_biometrics_with_category_risk,
        outcome: RiskOutcome::Tier(RiskScore::High),
    },
    Rule {
        name: "abnormal_biometric_with_category_risk",
        applies: abnormal_biometric_with_category_risk,
        outcome: RiskOutcome::Tier(RiskScore::Medium),
    },
    Rule {
        name: "multiple_abnormal_biometrics",
        applies: multiple_abnormal_biometrics,
        outcome: RiskOutcome::Tier(RiskScore::Medium),
    },
    Rule {
        name: "prior_determination",
        applies: fresh_prior_determination,
        outcome: RiskOutcome::ReusePrior,
    },
];

pub(crate) const DIET_RULES: &[Rule<DietCode>] = &[
    Rule {
        name: "gluten_sensitivity",
        applies: gluten_sensitivity,
        outcome: DietCode::GlutenFree,
    },
    Rule {
        name: "chronic_kidney_disease",
        applies: chronic_kidney_disease,
        outcome: DietCode::RenalFriendly,
    },
    Rule {
        name: "diabetes_signal",
        applies: diabetes_signal,
        outcome: DietCode::DiabetesFriendly,
    },
    Rule {
        name: "hypertension_signal",
        applies: hypertension_signal,
        outcome: DietCode::LowSodium,
    },
];

pub(crate) const DEFAULT_DIET: DietCode = DietCode::HeartFriendly;

pub(crate) const DIAGNOSIS_RULES: &[Rule<&str>] = &[
    Rule {
        name: "heart_failure",
        applies: heart_failure,
        outcome: "I50.9",
    },
    Rule {
        name: "chronic_kidney_disease",
        applies: chronic_kidney_disease,
        outcome: "N18.9",
    },
    Rule {
        name: "diabetes_signal",
        applies: diabetes_signal,
        outcome: "E11.9",
    },
    Rule {
        name: "hypertension_signal",
        applies: hypertension_signal,
        outcome: "I10",
    },
    Rule {
        name: "hyperlipidemia_signal",
        applies: hyperlipidemia_signal,
        outcome: "E78.5",
    },
    Rule {
        name: "obesity_signal",
        applies: obesity_signal,
        outcome: "E66.9",
    },
];

/// Dietary counseling and surveillance.
pub(crate) const DEFAULT_DIAGNOSIS: &str = "Z71.3";

/// Resolve the risk tier and the name of the rule that produced it.
pub(crate) fn risk_tier(input: &RuleInput<'_>) -> Option<(RiskScore, &'static str)> {
    let rule = first_match(RISK_RULES, input)?;
    match rule.outcome {
        RiskOutcome::Tier(score) => Some((score, rule.name)),
        RiskOutcome::ReusePrior => input
            .signals
            .prior_determination
            .map(|prior| (prior.risk_score, rule.name)),
    }
}

pub(crate) fn diet_code(input: &RuleInput<'_>) -> DietCode {
    first_match(DIET_RULES, input)
        .map(|rule| rule.outcome)
        .unwrap_or(DEFAULT_DIET)
}

pub(crate) fn diagnosis_code(input: &RuleInput<'_>) -> &'static str {
    first_match(DIAGNOSIS_RULES, input)
        .map(|rule| rule.outcome)
        .unwrap_or(DEFAULT_DIAGNOSIS)
}

fn heart_failure_flag(input: &RuleInput<'_>) -> bool {
    input.signals.utilization.heart_failure_flag
}

fn discharge_plan_flag(input: &RuleInput<'_>) -> bool {
    input.signals.utilization.discharge_plan_flag
}

fn abnormal_panels(input: &RuleInput<'_>) -> usize {
    input
        .signals
        .biometrics
        .abnormal_panels(&input.config.thresholds)
}

fn abnormal_biometrics_with_category_risk(input: &RuleInput<'_>) -> bool {
    abnormal_panels(input) >= 2 && input.signals.category_risks.any()
}

fn abnormal_biometric_with_category_risk(input: &RuleInput<'_>) -> bool {
    abnormal_panels(input) >= 1 && input.signals.category_risks.any()
}

fn multiple_abnormal_biometrics(input: &RuleInput<'_>) -> bool {
    abnormal_panels(input) >= 2
}

fn fresh_prior_determination(input: &RuleInput<'_>) -> bool {
    input
        .signals
        .prior_determination
        .map(|prior| {
            let age = input
                .as_of
                .signed_duration_since(prior.determined_on)
                .num_days();
            (0..=input.config.prior_determination_max_age_days).contains(&age)
        })
        .unwrap_or(false)
}

fn gluten_sensitivity(input: &RuleInput<'_>) -> bool {
    input
        .signals
        .food_sensitivities
        .contains(&FoodSensitivity::Gluten)
}

fn chronic_kidney_disease(input: &RuleInput<'_>) -> bool {
    input
        .signals
        .has_condition(MedicalCondition::ChronicKidneyDisease)
}

fn diabetes_signal(input: &RuleInput<'_>) -> bool {
    let signals = input.signals;
    signals.has_condition(MedicalCondition::Diabetes)
        || signals.biometrics.a1c_elevated(&input.config.thresholds)
        || signals.takes_any(&[MedicationClass::Insulin, MedicationClass::OralHypoglycemic])
}

fn hypertension_signal(input: &RuleInput<'_>) -> bool {
    let signals = input.signals;
    signals.has_condition(MedicalCondition::Hypertension)
        || signals
            .biometrics
            .blood_pressure_elevated(&input.config.thresholds)
        || signals.takes_any(&[MedicationClass::Antihypertensive, MedicationClass::Diuretic])
}

fn heart_failure(input: &RuleInput<'_>) -> bool {
    input.signals.has_condition(MedicalCondition::HeartFailure)
        || input.signals.utilization.heart_failure_flag
}

fn hyperlipidemia_signal(input: &RuleInput<'_>) -> bool {
    let signals = input.signals;
    signals.has_condition(MedicalCondition::Hyperlipidemia)
        || signals.biometrics.lipids_elevated(&input.config.thresholds)
        || signals.takes_any(&[MedicationClass::Statin])
}

fn obesity_signal(input: &RuleInput<'_>) -> bool {
    input.signals.has_condition(MedicalCondition::Obesity)
        || input
            .signals
            .biometrics
            .bmi_elevated(&input.config.thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::referral::decision::signals::{Biometrics, PriorDetermination};

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).expect("valid date")
    }

    fn evaluate<T>(signals: &ClinicalSignals, run: impl Fn(&RuleInput<'_>) -> T) -> T {
        let config = DecisionConfig::default();
        let input = RuleInput {
            signals,
            config: &config,
            as_of: as_of(),
        };
        run(&input)
    }

    fn hypertensive_and_diabetic() -> Biometrics {
        Biometrics {
            systolic_bp: Some(152),
            diastolic_bp: Some(88),
            a1c_percent: Some(7.4),
            ..Biometrics::default()
        }
    }

    #[test]
    fn heart_failure_flag_wins_over_everything_else() {
        let mut signals = ClinicalSignals::default();
        signals.utilization.heart_failure_flag = true;
        signals.prior_determination = Some(PriorDetermination {
            risk_score: RiskScore::Low,
            determined_on: as_of(),
        });

        assert_eq!(
            evaluate(&signals, risk_tier),
            Some((RiskScore::High, "heart_failure_flag"))
        );
    }

    #[test]
    fn discharge_plan_flag_forces_high() {
        let mut signals = ClinicalSignals::default();
        signals.utilization.discharge_plan_flag = true;
        assert_eq!(
            evaluate(&signals, risk_tier),
            Some((RiskScore::High, "discharge_plan_flag"))
        );
    }

    #[test]
    fn biometrics_combine_with_category_risk() {
        let mut signals = ClinicalSignals {
            biometrics: hypertensive_and_diabetic(),
            ..ClinicalSignals::default()
        };
        assert_eq!(
            evaluate(&signals, risk_tier),
            Some((RiskScore::Medium, "multiple_abnormal_biometrics"))
        );

        signals.category_risks.food_insecurity = true;
        assert_eq!(
            evaluate(&signals, risk_tier),
            Some((RiskScore::High, "abnormal_biometrics_with_category_risk"))
        );

        signals.biometrics.a1c_percent = Some(5.4);
        assert_eq!(
            evaluate(&signals, risk_tier),
            Some((RiskScore::Medium, "abnormal_biometric_with_category_risk"))
        );
    }

    #[test]
    fn prior_determination_is_reused_only_while_fresh() {
        let mut signals = ClinicalSignals::default();
        signals.prior_determination = Some(PriorDetermination {
            risk_score: RiskScore::Medium,
            determined_on: NaiveDate::from_ymd_opt(2025, 1, 15).expect("valid"),
        });
        assert_eq!(
            evaluate(&signals, risk_tier),
            Some((RiskScore::Medium, "prior_determination"))
        );

        signals.prior_determination = Some(PriorDetermination {
            risk_score: RiskScore::Medium,
            determined_on: NaiveDate::from_ymd_opt(2023, 1, 15).expect("valid"),
        });
        assert_eq!(evaluate(&signals, risk_tier), None);
    }

    #[test]
    fn cascade_ends_in_none_when_nothing_determines_a_tier() {
        let normal_screening = ClinicalSignals {
            biometrics: Biometrics {
                systolic_bp: Some(118),
                diastolic_bp: Some(76),
                bmi: Some(24.0),
                ..Biometrics::default()
            },
            ..ClinicalSignals::default()
        };
        assert_eq!(evaluate(&normal_screening, risk_tier), None);

        let mut category_only = ClinicalSignals::default();
        category_only.category_risks.food_insecurity = true;
        assert_eq!(evaluate(&category_only, risk_tier), None);

        assert_eq!(evaluate(&ClinicalSignals::default(), risk_tier), None);
    }

    #[test]
    fn low_tier_comes_only_from_a_fresh_prior_determination() {
        let mut signals = ClinicalSignals::default();
        signals.prior_determination = Some(PriorDetermination {
            risk_score: RiskScore::Low,
            determined_on: as_of(),
        });
        assert_eq!(
            evaluate(&signals, risk_tier),
            Some((RiskScore::Low, "prior_determination"))
        );
    }

    #[test]
    fn diet_cascade_prefers_gluten_then_renal() {
        let mut signals = ClinicalSignals::default();
        signals
            .conditions
            .insert(MedicalCondition::ChronicKidneyDisease);
        signals.food_sensitivities.insert(FoodSensitivity::Gluten);
        assert_eq!(evaluate(&signals, diet_code), DietCode::GlutenFree);

        signals.food_sensitivities.clear();
        assert_eq!(evaluate(&signals, diet_code), DietCode::RenalFriendly);
    }

    #[test]
    fn hypertension_is_detected_from_any_signal_source() {
        let from_condition = ClinicalSignals {
            conditions: [MedicalCondition::Hypertension].into_iter().collect(),
            ..ClinicalSignals::default()
        };
        let from_biometrics = ClinicalSignals {
            biometrics: Biometrics {
                diastolic_bp: Some(95),
                ..Biometrics::default()
            },
            ..ClinicalSignals::default()
        };
        let from_medication = ClinicalSignals {
            medications: [MedicationClass::Antihypertensive].into_iter().collect(),
            ..ClinicalSignals::default()
        };

        for signals in [from_condition, from_medication, from_biometrics] {
            assert_eq!(evaluate(&signals, diet_code), DietCode::LowSodium);
            assert_eq!(evaluate(&signals, diagnosis_code), "I10");
        }
    }

    #[test]
    fn defaults_apply_when_nothing_matches() {
        let signals = ClinicalSignals::default();
        assert_eq!(evaluate(&signals, diet_code), DietCode::HeartFriendly);
        assert_eq!(evaluate(&signals, diagnosis_code), "Z71.3");
    }

    #[test]
    fn diagnosis_cascade_orders_heart_failure_first() {
        let signals = ClinicalSignals {
            conditions: [
                MedicalCondition::Diabetes,
                MedicalCondition::HeartFailure,
                MedicalCondition::Obesity,
            ]
            .into_iter()
            .collect(),
            ..ClinicalSignals::default()
        };
        assert_eq!(evaluate(&signals, diagnosis_code), "I50.9");
        assert_eq!(evaluate(&signals, diet_code), DietCode::DiabetesFriendly);
    }

    #[test]
    fn lipid_panel_and_statins_map_to_hyperlipidemia() {
        let signals = ClinicalSignals {
            medications: [MedicationClass::Statin].into_iter().collect(),
            ..ClinicalSignals::default()
        };
        assert_eq!(evaluate(&signals, diagnosis_code), "E78.5");
    }
}
