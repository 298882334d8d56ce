use std::collections::BTreeMap;

/// Convert a percentage in [0, 100] to a fraction in [0, 1]
pub fn percent_to_fraction(percent: f64) -> f64 {
    percent * 0.01
}

/// One residential unit type that may be built on the parcel
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct UnitTypeSpec {
    /// Unique name, e.g. "1BR"
    pub name: String,
    /// Floor area of one unit in square feet
    pub square_feet: f64,
    /// Monthly market rent
    pub monthly_rent: f64,
    /// Minimum household size; selects the AMI income used for the affordable rent
    pub min_occupancy: u32,
    /// Minimum share of all units (market + affordable of this type), 0–100
    pub min_share_percent: f64,
    /// Maximum share of all units (market + affordable of this type), 0–100
    pub max_share_percent: f64,
}

impl UnitTypeSpec {
    pub fn new(name: impl Into<String>, square_feet: f64, monthly_rent: f64, min_occupancy: u32) -> Self {
        Self {
            name: name.into(),
            square_feet,
            monthly_rent,
            min_occupancy,
            min_share_percent: 0.0,
            max_share_percent: 100.0,
        }
    }

    pub fn with_share_percent(mut self, min: f64, max: f64) -> Self {
        self.min_share_percent = min;
        self.max_share_percent = max;
        self
    }
}

/// Area Median Income table
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AmiSchedule {
    /// 100%-AMI annual income keyed by household size
    pub incomes: BTreeMap<u32, f64>,
    /// AMI percentage limit for affordable households, 0–100
    pub limit_percent: f64,
}

impl AmiSchedule {
    pub fn new(limit_percent: f64) -> Self {
        Self {
            incomes: BTreeMap::new(),
            limit_percent,
        }
    }

    pub fn with_income(mut self, household_size: u32, annual_income: f64) -> Self {
        self.incomes.insert(household_size, annual_income);
        self
    }

    /// Annual income at the AMI limit for a household size
    pub fn limited_income(&self, household_size: u32) -> Option<f64> {
        self.incomes
            .get(&household_size)
            .map(|income| income * percent_to_fraction(self.limit_percent))
    }
}

/// Site and policy parameters shared by every run
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyParameters {
    /// Net residential area in square feet
    pub net_residential_area: f64,
    /// Minimum affordable share of each unit type, 0–100
    pub set_aside_percent: f64,
}

impl PolicyParameters {
    pub fn set_aside_fraction(&self) -> f64 {
        percent_to_fraction(self.set_aside_percent)
    }
}

/// The fully assembled payload handed over by the input-collection layer
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectInput {
    pub net_residential_area: f64,
    pub unit_types: Vec<UnitTypeSpec>,
    pub ami: AmiSchedule,
    pub set_aside_percent: f64,
}

impl ProjectInput {
    pub fn policy(&self) -> PolicyParameters {
        PolicyParameters {
            net_residential_area: self.net_residential_area,
            set_aside_percent: self.set_aside_percent,
        }
    }

    /// Household sizes referenced by unit types but absent from the AMI table
    pub fn missing_household_sizes(&self) -> Vec<u32> {
        let mut missing: Vec<u32> = self
            .unit_types
            .iter()
            .map(|u| u.min_occupancy)
            .filter(|size| !self.ami.incomes.contains_key(size))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limited_income() {
        let ami = AmiSchedule::new(60.0).with_income(1, 60000.0).with_income(2, 68500.0);
        assert!((ami.limited_income(1).unwrap() - 36000.0).abs() < 1e-9);
        assert!((ami.limited_income(2).unwrap() - 41100.0).abs() < 1e-9);
        assert_eq!(ami.limited_income(3), None);
    }

    #[test]
    fn test_policy_normalizes_percentages() {
        let input = ProjectInput {
            net_residential_area: 80000.0,
            unit_types: vec![
                UnitTypeSpec::new("Studio", 500.0, 1500.0, 1),
                UnitTypeSpec::new("2BR", 1000.0, 2600.0, 3),
            ],
            ami: AmiSchedule::new(60.0).with_income(1, 60000.0),
            set_aside_percent: 20.0,
        };

        let policy = input.policy();
        assert_eq!(policy.net_residential_area, 80000.0);
        assert!((policy.set_aside_fraction() - 0.2).abs() < 1e-12);
        assert_eq!(input.missing_household_sizes(), vec![3]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_payload_from_json() {
        let json = r#"{
            "net_residential_area": 80000,
            "unit_types": [
                { "name": "1BR", "square_feet": 800, "monthly_rent": 2000, "min_occupancy": 1,
                  "min_share_percent": 0, "max_share_percent": 100 }
            ],
            "ami": { "incomes": { "1": 60000 }, "limit_percent": 60 },
            "set_aside_percent": 20
        }"#;

        let input: ProjectInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.unit_types[0].name, "1BR");
        assert_eq!(input.ami.incomes.get(&1), Some(&60000.0));
        assert_eq!(input.set_aside_percent, 20.0);
    }
}
