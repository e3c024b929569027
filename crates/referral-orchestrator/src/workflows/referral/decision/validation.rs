use serde::{Deserialize, Serialize};

use super::config::DecisionConfig;
use super::{BenefitDuration, DecisionResult, FoodBenefit, Frequency, RiskScore};

/// Named reasons a decision is not actionable. The code is recorded verbatim as the
/// action reason so operators can triage from the action log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum DecisionValidationError {
    #[error("member already received the maximum authorized benefits")]
    BenefitLimitReached,
    #[error("no questionnaire data sufficient to determine a risk tier")]
    MissingQuestionnaire,
    #[error("risk tier is low")]
    LowRisk,
    #[error("questionnaire data did not determine a risk tier")]
    InvalidRiskScore,
    #[error("no food benefit qualifies for this decision")]
    InvalidFoodBenefit,
    #[error("vendor is missing or not configured")]
    InvalidVendor,
    #[error("dietary modification code is missing")]
    InvalidMechanicalAlteredDiet,
    #[error("frequency is missing or inconsistent with the food benefit")]
    InvalidFrequency,
    #[error("duration is missing or inconsistent with the risk tier")]
    InvalidDuration,
    #[error("diagnosis code is missing")]
    InvalidDiagnosisCode,
}

impl DecisionValidationError {
    pub const fn code(self) -> &'static str {
        match self {
            DecisionValidationError::BenefitLimitReached => "benefit_limit_reached",
            DecisionValidationError::MissingQuestionnaire => "missing_questionnaire",
            DecisionValidationError::LowRisk => "low_risk",
            DecisionValidationError::InvalidRiskScore => "invalid_decision_risk_score",
            DecisionValidationError::InvalidFoodBenefit => "invalid_decision_food_benefit",
            DecisionValidationError::InvalidVendor => "invalid_decision_vendor",
            DecisionValidationError::InvalidMechanicalAlteredDiet => {
                "invalid_decision_mechanical_altered_diet"
            }
            DecisionValidationError::InvalidFrequency => "invalid_decision_frequency",
            DecisionValidationError::InvalidDuration => "invalid_decision_duration",
            DecisionValidationError::InvalidDiagnosisCode => "invalid_decision_diagnosis_code",
        }
    }

    /// Benefit limits and low risk are expected outcomes and record `no_action`;
    /// everything else records `error`.
    pub const fn records_no_action(self) -> bool {
        matches!(
            self,
            DecisionValidationError::BenefitLimitReached | DecisionValidationError::LowRisk
        )
    }
}

/// Checks run in a fixed order; the first failure is reported. `MissingQuestionnaire`
/// is never produced here: callers record it for a null tier before validating.
pub fn validate(
    decision: &DecisionResult,
    config: &DecisionConfig,
) -> Result<(), DecisionValidationError> {
    if decision.benefit_limit_reached {
        return Err(DecisionValidationError::BenefitLimitReached);
    }

    let risk = match decision.risk_score {
        None => return Err(DecisionValidationError::InvalidRiskScore),
        Some(RiskScore::Low) => return Err(DecisionValidationError::LowRisk),
        Some(risk) => risk,
    };

    if decision.food_benefit == FoodBenefit::NoBenefit {
        return Err(DecisionValidationError::InvalidFoodBenefit);
    }

    match decision.vendor.as_deref() {
        Some(vendor) if config.is_configured_vendor(vendor) => {}
        _ => return Err(DecisionValidationError::InvalidVendor),
    }

    if decision.mechanical_altered_diet.is_none() {
        return Err(DecisionValidationError::InvalidMechanicalAlteredDiet);
    }

    if decision.frequency.is_none()
        || decision.frequency != Frequency::for_benefit(decision.food_benefit)
    {
        return Err(DecisionValidationError::InvalidFrequency);
    }

    if decision.duration.is_none() || decision.duration != BenefitDuration::for_risk(risk) {
        return Err(DecisionValidationError::InvalidDuration);
    }

    match decision.diagnosis_code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => Ok(()),
        _ => Err(DecisionValidationError::InvalidDiagnosisCode),
    }
}
