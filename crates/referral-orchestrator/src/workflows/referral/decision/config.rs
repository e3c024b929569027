use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::FoodBenefit;
use crate::workflows::referral::domain::UnknownValue;

/// Cut-offs at or above which a biometric panel counts as out of range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricThresholds {
    pub systolic_bp: u16,
    pub diastolic_bp: u16,
    pub a1c_percent: f32,
    pub ldl_mg_dl: u16,
    pub total_cholesterol_mg_dl: u16,
    pub bmi: f32,
}

impl Default for BiometricThresholds {
    fn default() -> Self {
        Self {
            systolic_bp: 140,
            diastolic_bp: 90,
            a1c_percent: 6.5,
            ldl_mg_dl: 160,
            total_cholesterol_mg_dl: 240,
            bmi: 30.0,
        }
    }
}

/// A vendor the program is contracted with and the benefits it can fulfil.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorOption {
    pub name: String,
    pub benefits: Vec<FoodBenefit>,
}

impl VendorOption {
    pub fn new(name: impl Into<String>, benefits: Vec<FoodBenefit>) -> Self {
        Self {
            name: name.into(),
            benefits,
        }
    }

    pub fn supports(&self, benefit: FoodBenefit) -> bool {
        self.benefits.contains(&benefit)
    }
}

impl fmt::Display for VendorOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let benefits: Vec<&str> = self.benefits.iter().map(|benefit| benefit.label()).collect();
        write!(f, "{}:{}", self.name, benefits.join("|"))
    }
}

/// Parses `name:benefit|benefit`, e.g. `fresh_fork:mtm|grocery_box`.
impl FromStr for VendorOption {
    type Err = UnknownValue;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || UnknownValue {
            kind: "vendor option",
            value: raw.to_string(),
        };

        let (name, benefits) = raw.trim().split_once(':').ok_or_else(invalid)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid());
        }

        let benefits = benefits
            .split('|')
            .map(|label| label.parse::<FoodBenefit>())
            .collect::<Result<Vec<_>, _>>()?;
        if benefits.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(name, benefits))
    }
}

/// Tunables for the decision engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionConfig {
    pub thresholds: BiometricThresholds,
    pub vendors: Vec<VendorOption>,
    pub max_authorized_benefits: u32,
    pub prior_determination_max_age_days: i64,
}

impl DecisionConfig {
    pub fn is_configured_vendor(&self, name: &str) -> bool {
        self.vendors.iter().any(|vendor| vendor.name == name)
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            thresholds: BiometricThresholds::default(),
            vendors: vec![
                VendorOption::new("fresh_fork", vec![FoodBenefit::Mtm]),
                VendorOption::new(
                    "harvest_box",
                    vec![FoodBenefit::GroceryBox, FoodBenefit::Mtm],
                ),
            ],
            max_authorized_benefits: 2,
            prior_determination_max_age_days: 365,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vendor_options() {
        let vendor: VendorOption = "harvest_box:grocery_box|mtm".parse().expect("parses");
        assert_eq!(vendor.name, "harvest_box");
        assert!(vendor.supports(FoodBenefit::GroceryBox));
        assert!(vendor.supports(FoodBenefit::Mtm));
        assert_eq!(vendor.to_string(), "harvest_box:grocery_box|mtm");
    }

    #[test]
    fn rejects_vendor_options_without_benefits() {
        assert!("harvest_box".parse::<VendorOption>().is_err());
        assert!(":mtm".parse::<VendorOption>().is_err());
        assert!("harvest_box:soup".parse::<VendorOption>().is_err());
    }
}
