mod config;
mod rules;
mod signals;
mod validation;
mod vendor;

pub use config::{BiometricThresholds, DecisionConfig, VendorOption};
pub use signals::{
    Biometrics, CategoryRisks, ClinicalSignals, DeliveryPreference, FoodSensitivity,
    MedicalCondition, MedicationClass, PriorDetermination, UtilizationFlags,
};
pub use validation::{validate, DecisionValidationError};
pub use vendor::{ConfiguredVendorAssigner, VendorAssigner};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::domain::UnknownValue;
use rules::RuleInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskScore {
    Low,
    Medium,
    High,
}

impl RiskScore {
    pub const fn label(self) -> &'static str {
        match self {
            RiskScore::Low => "low",
            RiskScore::Medium => "medium",
            RiskScore::High => "high",
        }
    }

    pub const fn qualifies(self) -> bool {
        matches!(self, RiskScore::Medium | RiskScore::High)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FoodBenefit {
    /// Medically tailored (prepared) meals.
    #[serde(rename = "mtm")]
    Mtm,
    #[serde(rename = "grocery_box")]
    GroceryBox,
    #[serde(rename = "none")]
    NoBenefit,
}

impl FoodBenefit {
    pub const fn label(self) -> &'static str {
        match self {
            FoodBenefit::Mtm => "mtm",
            FoodBenefit::GroceryBox => "grocery_box",
            FoodBenefit::NoBenefit => "none",
        }
    }
}

impl fmt::Display for FoodBenefit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FoodBenefit {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mtm" => Ok(FoodBenefit::Mtm),
            "grocery_box" => Ok(FoodBenefit::GroceryBox),
            "none" => Ok(FoodBenefit::NoBenefit),
            _ => Err(UnknownValue {
                kind: "food benefit",
                value: value.to_string(),
            }),
        }
    }
}

/// Dietary modification requested from the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DietCode {
    GlutenFree,
    RenalFriendly,
    DiabetesFriendly,
    LowSodium,
    HeartFriendly,
}

impl DietCode {
    pub const fn label(self) -> &'static str {
        match self {
            DietCode::GlutenFree => "gluten_free",
            DietCode::RenalFriendly => "renal_friendly",
            DietCode::DiabetesFriendly => "diabetes_friendly",
            DietCode::LowSodium => "low_sodium",
            DietCode::HeartFriendly => "heart_friendly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BenefitDuration {
    #[serde(rename = "12_weeks")]
    TwelveWeeks,
    #[serde(rename = "4_weeks")]
    FourWeeks,
}

impl BenefitDuration {
    pub const fn for_risk(risk: RiskScore) -> Option<Self> {
        match risk {
            RiskScore::High => Some(BenefitDuration::TwelveWeeks),
            RiskScore::Medium => Some(BenefitDuration::FourWeeks),
            RiskScore::Low => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            BenefitDuration::TwelveWeeks => "12_weeks",
            BenefitDuration::FourWeeks => "4_weeks",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    PerDay,
    PerWeek,
}

impl Frequency {
    pub const fn for_benefit(benefit: FoodBenefit) -> Option<Self> {
        match benefit {
            FoodBenefit::Mtm => Some(Frequency::PerDay),
            FoodBenefit::GroceryBox => Some(Frequency::PerWeek),
            FoodBenefit::NoBenefit => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Frequency::PerDay => "per_day",
            Frequency::PerWeek => "per_week",
        }
    }
}

/// Structured decision snapshot. Persisted only as `Action::data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub vendor: Option<String>,
    pub risk_score: Option<RiskScore>,
    #[serde(default)]
    pub risk_rule: Option<String>,
    pub food_benefit: FoodBenefit,
    pub mechanical_altered_diet: Option<DietCode>,
    pub diagnosis_code: Option<String>,
    pub duration: Option<BenefitDuration>,
    pub frequency: Option<Frequency>,
    #[serde(default)]
    pub allergies: Vec<String>,
    pub description: String,
    pub message: String,
    #[serde(default)]
    pub dietitian_recommendation: Option<String>,
    pub benefit_limit_reached: bool,
}

/// Decision plus its validation verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionOutcome {
    pub decision: DecisionResult,
    pub verdict: Result<(), DecisionValidationError>,
}

impl DecisionOutcome {
    pub fn is_actionable(&self) -> bool {
        self.verdict.is_ok()
    }
}

/// Stateless rule engine turning clinical signals into a referral decision.
pub struct DecisionEngine {
    config: DecisionConfig,
    vendors: Arc<dyn VendorAssigner>,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        let vendors = Arc::new(ConfiguredVendorAssigner::new(config.vendors.clone()));
        Self::with_vendor_assigner(config, vendors)
    }

    pub fn with_vendor_assigner(config: DecisionConfig, vendors: Arc<dyn VendorAssigner>) -> Self {
        Self { config, vendors }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Compute and validate a decision. Output depends only on `signals`, `as_of`,
    /// the configuration, and the vendor assigner.
    pub fn evaluate(&self, signals: &ClinicalSignals, as_of: NaiveDate) -> DecisionOutcome {
        let mut decision = self.decide(signals, as_of);
        let verdict = validate(&decision, &self.config);
        decision.message = match verdict {
            Ok(()) => format!(
                "eligible for {} via {}",
                decision.food_benefit,
                decision.vendor.as_deref().unwrap_or("unassigned vendor")
            ),
            Err(error) => format!("{}: {}", error.code(), error),
        };

        DecisionOutcome { decision, verdict }
    }

    /// Compute a decision without validating it. `message` is left empty.
    pub fn decide(&self, signals: &ClinicalSignals, as_of: NaiveDate) -> DecisionResult {
        let input = RuleInput {
            signals,
            config: &self.config,
            as_of,
        };

        let risk = rules::risk_tier(&input);
        let risk_score = risk.map(|(score, _)| score);
        let food_benefit = match risk_score {
            Some(score) if score.qualifies() => match signals.delivery_preference {
                Some(DeliveryPreference::Groceries) => FoodBenefit::GroceryBox,
                _ => FoodBenefit::Mtm,
            },
            _ => FoodBenefit::NoBenefit,
        };

        let diet = rules::diet_code(&input);
        let diagnosis = rules::diagnosis_code(&input);
        let duration = risk_score.and_then(BenefitDuration::for_risk);
        let frequency = Frequency::for_benefit(food_benefit);
        let vendor = match food_benefit {
            FoodBenefit::NoBenefit => None,
            benefit => self
                .vendors
                .assign(benefit, signals.vendor_preference.as_deref()),
        };

        let description = describe(risk, food_benefit, diet, duration, frequency);

        DecisionResult {
            vendor,
            risk_score,
            risk_rule: risk.map(|(_, rule)| rule.to_string()),
            food_benefit,
            mechanical_altered_diet: Some(diet),
            diagnosis_code: Some(diagnosis.to_string()),
            duration,
            frequency,
            allergies: signals.allergies.clone(),
            description,
            message: String::new(),
            dietitian_recommendation: signals.dietitian_recommendation.clone(),
            benefit_limit_reached: signals.benefits_received >= self.config.max_authorized_benefits,
        }
    }
}

fn describe(
    risk: Option<(RiskScore, &'static str)>,
    benefit: FoodBenefit,
    diet: DietCode,
    duration: Option<BenefitDuration>,
    frequency: Option<Frequency>,
) -> String {
    let Some((score, rule)) = risk else {
        return "risk undetermined: insufficient questionnaire data".to_string();
    };

    match (duration, frequency) {
        (Some(duration), Some(frequency)) => format!(
            "{} risk ({}): {} {} for {}, {}",
            score.label(),
            rule,
            benefit,
            frequency.label(),
            duration.label(),
            diet.label()
        ),
        _ => format!("{} risk ({}): no food benefit", score.label(), rule),
    }
}
