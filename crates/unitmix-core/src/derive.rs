//! Per-unit-type economics: affordable rents, cost floors and qualifying salaries.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::MissingAmiPolicy;
use crate::error::InputError;
use crate::input::{AmiSchedule, UnitTypeSpec, percent_to_fraction};

/// Share of monthly income an affordable household is expected to spend on rent
pub const RENT_BURDEN: f64 = 0.30;
/// Flat monthly reduction applied to the AMI-capped rent
pub const AFFORDABLE_RENT_REDUCTION: f64 = 100.0;
/// Square feet per dollar of monthly operating cost under the square-footage estimate
pub const SQUARE_FOOT_COST_DIVISOR: f64 = 12.0;
/// Monthly operating cost as a share of market rent under the rent estimate
pub const RENT_COST_RATIO: f64 = 0.5;
/// A qualifying household earns this many times the annual rent
pub const SALARY_RENT_MULTIPLE: f64 = 3.0;
pub const MONTHS_PER_YEAR: f64 = 12.0;
/// Presentation prefix for affordable records
pub const AFFORDABLE_PREFIX: &str = "Aff_";

/// Stable key shared by the market and affordable records of one unit type
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitTypeId(pub usize);

impl std::fmt::Display for UnitTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tenure {
    Market,
    Affordable,
}

impl std::fmt::Display for Tenure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tenure::Market => write!(f, "market"),
            Tenure::Affordable => write!(f, "affordable"),
        }
    }
}

/// Economic parameters of one market or affordable unit record
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedUnitRecord {
    pub tenure: Tenure,
    /// Display label: the unit-type name, prefixed with `Aff_` for affordable records
    pub label: String,
    pub square_feet: f64,
    /// Effective monthly rent (market rent or AMI-capped rent)
    pub monthly_rent: f64,
    pub square_foot_cost: f64,
    pub rent_based_cost: f64,
    /// The larger of the two monthly cost floors
    pub worst_case_cost: f64,
    pub min_annual_salary: f64,
}

impl DerivedUnitRecord {
    pub fn annual_revenue(&self) -> f64 {
        self.monthly_rent * MONTHS_PER_YEAR
    }

    /// Objective coefficient: annual profit per unit under worst-case cost
    pub fn annual_worst_case_margin(&self) -> f64 {
        (self.monthly_rent - self.worst_case_cost) * MONTHS_PER_YEAR
    }
}

/// The two records derived from one unit type, plus its normalized share bounds
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedUnitPair {
    pub id: UnitTypeId,
    pub name: String,
    /// Minimum share of all units, as a fraction
    pub min_share: f64,
    /// Maximum share of all units, as a fraction
    pub max_share: f64,
    pub market: DerivedUnitRecord,
    pub affordable: DerivedUnitRecord,
}

impl DerivedUnitPair {
    /// Market record first, then affordable
    pub fn records(&self) -> [&DerivedUnitRecord; 2] {
        [&self.market, &self.affordable]
    }
}

pub struct DerivedMetricsCalculator<'a> {
    ami: &'a AmiSchedule,
    missing_ami: MissingAmiPolicy,
}

impl<'a> DerivedMetricsCalculator<'a> {
    pub fn new(ami: &'a AmiSchedule, missing_ami: MissingAmiPolicy) -> Self {
        Self { ami, missing_ami }
    }

    /// Derive one market/affordable pair per unit type, in input order
    pub fn derive(&self, unit_types: &[UnitTypeSpec]) -> Result<Vec<DerivedUnitPair>, InputError> {
        if unit_types.is_empty() {
            return Err(InputError::NoUnitTypes);
        }

        let mut seen = HashSet::new();
        for spec in unit_types {
            if !seen.insert(spec.name.as_str()) {
                return Err(InputError::DuplicateUnitType(spec.name.clone()));
            }
        }

        unit_types
            .iter()
            .enumerate()
            .map(|(i, spec)| self.derive_pair(UnitTypeId(i), spec))
            .collect()
    }

    fn derive_pair(&self, id: UnitTypeId, spec: &UnitTypeSpec) -> Result<DerivedUnitPair, InputError> {
        let square_foot_cost = spec.square_feet / SQUARE_FOOT_COST_DIVISOR;
        let rent_based_cost = spec.monthly_rent * RENT_COST_RATIO;
        let worst_case_cost = square_foot_cost.max(rent_based_cost);
        let min_annual_salary = spec.monthly_rent * MONTHS_PER_YEAR * SALARY_RENT_MULTIPLE;

        let market = DerivedUnitRecord {
            tenure: Tenure::Market,
            label: spec.name.clone(),
            square_feet: spec.square_feet,
            monthly_rent: spec.monthly_rent,
            square_foot_cost,
            rent_based_cost,
            worst_case_cost,
            min_annual_salary,
        };
        let affordable = DerivedUnitRecord {
            tenure: Tenure::Affordable,
            label: format!("{}{}", AFFORDABLE_PREFIX, spec.name),
            monthly_rent: self.affordable_rent(spec)?,
            ..market.clone()
        };

        debug!(
            unit_type = %spec.name,
            market_rent = market.monthly_rent,
            affordable_rent = affordable.monthly_rent,
            worst_case_cost,
            "derived unit pair"
        );

        Ok(DerivedUnitPair {
            id,
            name: spec.name.clone(),
            min_share: percent_to_fraction(spec.min_share_percent),
            max_share: percent_to_fraction(spec.max_share_percent),
            market,
            affordable,
        })
    }

    fn affordable_rent(&self, spec: &UnitTypeSpec) -> Result<f64, InputError> {
        let income = match self.ami.limited_income(spec.min_occupancy) {
            Some(income) => income,
            None => match self.missing_ami {
                MissingAmiPolicy::Reject => {
                    return Err(InputError::MissingAmiEntry {
                        unit_type: spec.name.clone(),
                        household_size: spec.min_occupancy,
                    });
                }
                MissingAmiPolicy::Zero => {
                    warn!(
                        unit_type = %spec.name,
                        household_size = spec.min_occupancy,
                        "no AMI entry, using zero income"
                    );
                    0.0
                }
            },
        };
        Ok((income * RENT_BURDEN / MONTHS_PER_YEAR - AFFORDABLE_RENT_REDUCTION).max(0.0))
    }
}
