use super::config::VendorOption;
use super::FoodBenefit;

/// Resolves the vendor that will fulfil a benefit. Implementations may consult external
/// assignment services; the engine only needs a name back.
pub trait VendorAssigner: Send + Sync {
    fn assign(&self, benefit: FoodBenefit, preference: Option<&str>) -> Option<String>;
}

/// Picks the stated preference when it can fulfil the benefit, otherwise the first
/// configured vendor that can.
#[derive(Debug, Clone)]
pub struct ConfiguredVendorAssigner {
    vendors: Vec<VendorOption>,
}

impl ConfiguredVendorAssigner {
    pub fn new(vendors: Vec<VendorOption>) -> Self {
        Self { vendors }
    }
}

impl VendorAssigner for ConfiguredVendorAssigner {
    fn assign(&self, benefit: FoodBenefit, preference: Option<&str>) -> Option<String> {
        let preferred = preference.map(str::trim).and_then(|name| {
            self.vendors
                .iter()
                .find(|vendor| vendor.name.eq_ignore_ascii_case(name) && vendor.supports(benefit))
        });

        preferred
            .or_else(|| self.vendors.iter().find(|vendor| vendor.supports(benefit)))
            .map(|vendor| vendor.name.clone())
    }
}
