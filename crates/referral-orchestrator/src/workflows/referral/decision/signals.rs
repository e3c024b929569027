use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::config::BiometricThresholds;
use super::RiskScore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicalCondition {
    HeartFailure,
    ChronicKidneyDisease,
    Diabetes,
    Hypertension,
    Hyperlipidemia,
    Obesity,
    CoronaryArteryDisease,
    Copd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicationClass {
    Antihypertensive,
    Diuretic,
    Insulin,
    OralHypoglycemic,
    Statin,
    Anticoagulant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoodSensitivity {
    Gluten,
    Lactose,
    Shellfish,
    TreeNut,
    Peanut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPreference {
    PreparedMeals,
    Groceries,
}

/// Most recent measurements reported on the intake questionnaire or pulled from labs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Biometrics {
    pub systolic_bp: Option<u16>,
    pub diastolic_bp: Option<u16>,
    pub a1c_percent: Option<f32>,
    pub ldl_mg_dl: Option<u16>,
    pub total_cholesterol_mg_dl: Option<u16>,
    pub bmi: Option<f32>,
}

impl Biometrics {
    pub fn blood_pressure_elevated(&self, thresholds: &BiometricThresholds) -> bool {
        self.systolic_bp
            .map(|value| value >= thresholds.systolic_bp)
            .unwrap_or(false)
            || self
                .diastolic_bp
                .map(|value| value >= thresholds.diastolic_bp)
                .unwrap_or(false)
    }

    pub fn a1c_elevated(&self, thresholds: &BiometricThresholds) -> bool {
        self.a1c_percent
            .map(|value| value >= thresholds.a1c_percent)
            .unwrap_or(false)
    }

    pub fn lipids_elevated(&self, thresholds: &BiometricThresholds) -> bool {
        self.ldl_mg_dl
            .map(|value| value >= thresholds.ldl_mg_dl)
            .unwrap_or(false)
            || self
                .total_cholesterol_mg_dl
                .map(|value| value >= thresholds.total_cholesterol_mg_dl)
                .unwrap_or(false)
    }

    pub fn bmi_elevated(&self, thresholds: &BiometricThresholds) -> bool {
        self.bmi
            .map(|value| value >= thresholds.bmi)
            .unwrap_or(false)
    }

    /// Number of panels (blood pressure, A1C, lipids, BMI) outside the normal range.
    pub fn abnormal_panels(&self, thresholds: &BiometricThresholds) -> usize {
        [
            self.blood_pressure_elevated(thresholds),
            self.a1c_elevated(thresholds),
            self.lipids_elevated(thresholds),
            self.bmi_elevated(thresholds),
        ]
        .into_iter()
        .filter(|abnormal| *abnormal)
        .count()
    }
}

/// Red-flag fields supplied by the referring program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UtilizationFlags {
    pub heart_failure_flag: bool,
    pub discharge_plan_flag: bool,
    pub recent_admissions: u8,
    pub emergency_visits: u8,
}

/// Social risk categories captured on the questionnaire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryRisks {
    pub food_insecurity: bool,
    pub housing_instability: bool,
    pub transportation_barrier: bool,
    pub social_isolation: bool,
}

impl CategoryRisks {
    pub fn any(&self) -> bool {
        self.food_insecurity
            || self.housing_instability
            || self.transportation_barrier
            || self.social_isolation
    }
}

/// Risk tier computed by an earlier assessment, reusable while still fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorDetermination {
    pub risk_score: RiskScore,
    pub determined_on: NaiveDate,
}

/// Aggregated per-patient clinical and questionnaire data consumed by the decision engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClinicalSignals {
    pub conditions: BTreeSet<MedicalCondition>,
    pub medications: BTreeSet<MedicationClass>,
    pub biometrics: Biometrics,
    pub utilization: UtilizationFlags,
    pub category_risks: CategoryRisks,
    pub food_sensitivities: BTreeSet<FoodSensitivity>,
    pub allergies: Vec<String>,
    pub delivery_preference: Option<DeliveryPreference>,
    pub vendor_preference: Option<String>,
    pub prior_determination: Option<PriorDetermination>,
    pub benefits_received: u32,
    pub dietitian_recommendation: Option<String>,
    pub questionnaire_date: Option<NaiveDate>,
}

impl ClinicalSignals {
    pub fn has_condition(&self, condition: MedicalCondition) -> bool {
        self.conditions.contains(&condition)
    }

    pub fn takes_any(&self, classes: &[MedicationClass]) -> bool {
        classes
            .iter()
            .any(|class| self.medications.contains(class))
    }
}
