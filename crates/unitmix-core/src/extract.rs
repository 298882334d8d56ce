use tracing::debug;

use crate::derive::{DerivedUnitPair, MONTHS_PER_YEAR, Tenure, UnitTypeId};
use crate::error::RunKind;
use crate::gateway::{DualReport, SolvedModel};
use crate::model::ModelLayout;

/// Share of gross profit kept after assumed vacancy and operating loss
pub const NET_MARGIN_FACTOR: f64 = 0.95524;

/// Solved unit count for one record
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct UnitAllocation {
    pub unit_type: UnitTypeId,
    pub label: String,
    pub tenure: Tenure,
    pub units: f64,
    pub min_annual_salary: f64,
}

/// Metrics of one solved run
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct SolutionSummary {
    pub run: RunKind,
    /// Market and affordable allocation of every unit type, in id order
    pub allocations: Vec<UnitAllocation>,
    pub total_land_used: f64,
    /// Percent of the net residential area
    pub land_utilization_rate: f64,
    pub total_units: f64,
    pub annual_revenue: f64,
    pub worst_case_annual_profit: f64,
    pub best_case_annual_profit: f64,
    /// Raw objective value reported by the solver
    pub objective_value: f64,
    /// Continuous runs only
    pub duals: Option<DualReport>,
}

impl SolutionSummary {
    pub fn allocation(&self, id: UnitTypeId, tenure: Tenure) -> Option<&UnitAllocation> {
        self.allocations
            .iter()
            .find(|a| a.unit_type == id && a.tenure == tenure)
    }

    /// Market plus affordable units of one type
    pub fn units_of(&self, id: UnitTypeId) -> f64 {
        self.allocations
            .iter()
            .filter(|a| a.unit_type == id)
            .map(|a| a.units)
            .sum()
    }
}

pub struct ResultExtractor<'a> {
    pairs: &'a [DerivedUnitPair],
    net_residential_area: f64,
}

impl<'a> ResultExtractor<'a> {
    pub fn new(pairs: &'a [DerivedUnitPair], net_residential_area: f64) -> Self {
        Self {
            pairs,
            net_residential_area,
        }
    }

    pub fn extract(&self, run: RunKind, layout: &ModelLayout, solved: &SolvedModel) -> SolutionSummary {
        let mut allocations = Vec::with_capacity(2 * self.pairs.len());
        let mut total_land_used = 0.0;
        let mut total_units = 0.0;
        let mut annual_revenue = 0.0;
        let mut square_foot_costs = 0.0;
        let mut worst_case_costs = 0.0;

        for pair in self.pairs {
            for record in pair.records() {
                let units = solved.values[layout.column(pair.id, record.tenure)];
                total_land_used += record.square_feet * units;
                total_units += units;
                annual_revenue += record.annual_revenue() * units;
                square_foot_costs += record.square_foot_cost * units * MONTHS_PER_YEAR;
                worst_case_costs += record.worst_case_cost * units * MONTHS_PER_YEAR;
                allocations.push(UnitAllocation {
                    unit_type: pair.id,
                    label: record.label.clone(),
                    tenure: record.tenure,
                    units,
                    min_annual_salary: record.min_annual_salary,
                });
            }
        }

        let land_utilization_rate = if self.net_residential_area > 0.0 {
            total_land_used / self.net_residential_area * 100.0
        } else {
            0.0
        };
        let best_case_annual_profit = (annual_revenue - square_foot_costs) * NET_MARGIN_FACTOR;
        let worst_case_annual_profit = (annual_revenue - worst_case_costs) * NET_MARGIN_FACTOR;

        debug!(
            %run,
            total_units,
            total_land_used,
            best_case_annual_profit,
            worst_case_annual_profit,
            "extracted solution metrics"
        );

        SolutionSummary {
            run,
            allocations,
            total_land_used,
            land_utilization_rate,
            total_units,
            annual_revenue,
            worst_case_annual_profit,
            best_case_annual_profit,
            objective_value: solved.objective_value,
            duals: solved.duals.clone(),
        }
    }
}
