use tracing::info;
use unitmix_solver::{ReducedCost, ShadowPrice};

use crate::derive::DerivedUnitPair;
use crate::error::{OptimizeError, RunKind};
use crate::extract::SolutionSummary;
use crate::gateway::SolverGateway;
use crate::input::PolicyParameters;
use crate::optimizer::execute_run;

/// Integer best-case profit as a percentage of the relaxation's, or 0 when the latter is 0
pub fn precision_ratio(integer_best_case: f64, relaxed_best_case: f64) -> f64 {
    if relaxed_best_case == 0.0 {
        0.0
    } else {
        integer_best_case / relaxed_best_case * 100.0
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct SensitivityReport {
    /// Metrics of the continuous relaxation
    pub relaxed: SolutionSummary,
    pub precision: f64,
    pub shadow_prices: Vec<ShadowPrice>,
    pub reduced_costs: Vec<ReducedCost>,
}

/// Re-solves the continuous relaxation of an integer run
pub struct SensitivityAnalyzer<'a> {
    pairs: &'a [DerivedUnitPair],
    policy: &'a PolicyParameters,
    gateway: &'a SolverGateway,
}

impl<'a> SensitivityAnalyzer<'a> {
    pub fn new(pairs: &'a [DerivedUnitPair], policy: &'a PolicyParameters, gateway: &'a SolverGateway) -> Self {
        Self {
            pairs,
            policy,
            gateway,
        }
    }

    pub fn analyze(&self, integer: &SolutionSummary) -> Result<SensitivityReport, OptimizeError> {
        let relaxed = execute_run(RunKind::Relaxed, self.pairs, self.policy, self.gateway)?;
        let precision = precision_ratio(integer.best_case_annual_profit, relaxed.best_case_annual_profit);
        let duals = relaxed.duals.clone().unwrap_or_default();

        info!(
            precision,
            relaxed_best_case = relaxed.best_case_annual_profit,
            integer_best_case = integer.best_case_annual_profit,
            "sensitivity analysis complete"
        );

        Ok(SensitivityReport {
            relaxed,
            precision,
            shadow_prices: duals.shadow_prices,
            reduced_costs: duals.reduced_costs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_ratio() {
        assert_eq!(precision_ratio(500.0, 500.0), 100.0);
        assert_eq!(precision_ratio(450.0, 500.0), 90.0);
        assert_eq!(precision_ratio(450.0, 0.0), 0.0);
        assert_eq!(precision_ratio(0.0, 0.0), 0.0);
    }
}
