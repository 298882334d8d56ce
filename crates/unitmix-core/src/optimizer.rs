use tracing::{info, warn};
use unitmix_solver::Backend;

use crate::config::OptimizerConfig;
use crate::derive::{DerivedMetricsCalculator, DerivedUnitPair};
use crate::error::{OptimizeError, RunKind};
use crate::extract::{ResultExtractor, SolutionSummary};
use crate::gateway::SolverGateway;
use crate::input::{PolicyParameters, ProjectInput};
use crate::model::{LAND_UTILIZATION_FLOOR, ModelBuilder};
use crate::sensitivity::{SensitivityAnalyzer, SensitivityReport};

/// Runs the full derive, build, solve and extract sequence for a project.
///
/// Derived records are computed once in [`UnitMixOptimizer::new`] and shared read-only by the
/// integer run and the on-demand sensitivity run; each run builds and owns its own model.
pub struct UnitMixOptimizer {
    pairs: Vec<DerivedUnitPair>,
    policy: PolicyParameters,
    gateway: SolverGateway,
}

impl UnitMixOptimizer {
    pub fn new(input: &ProjectInput, config: &OptimizerConfig) -> Result<Self, OptimizeError> {
        Self::with_backend(input, config, config.solver.build_backend())
    }

    pub fn with_backend(
        input: &ProjectInput,
        config: &OptimizerConfig,
        backend: Box<dyn Backend>,
    ) -> Result<Self, OptimizeError> {
        let pairs = DerivedMetricsCalculator::new(&input.ami, config.missing_ami).derive(&input.unit_types)?;
        Ok(Self {
            pairs,
            policy: input.policy(),
            gateway: SolverGateway::new(backend),
        })
    }

    pub fn derived(&self) -> &[DerivedUnitPair] {
        &self.pairs
    }

    pub fn policy(&self) -> &PolicyParameters {
        &self.policy
    }

    /// Solve the integer program
    pub fn optimize(&self) -> Result<SolutionSummary, OptimizeError> {
        execute_run(RunKind::Integer, &self.pairs, &self.policy, &self.gateway)
    }

    /// Solve the continuous relaxation and compare it with an integer result
    pub fn sensitivity(&self, integer: &SolutionSummary) -> Result<SensitivityReport, OptimizeError> {
        SensitivityAnalyzer::new(&self.pairs, &self.policy, &self.gateway).analyze(integer)
    }
}

/// One uninterrupted run: build a fresh model for `run`, solve it and extract its metrics
pub(crate) fn execute_run(
    run: RunKind,
    pairs: &[DerivedUnitPair],
    policy: &PolicyParameters,
    gateway: &SolverGateway,
) -> Result<SolutionSummary, OptimizeError> {
    check_land(run, policy)?;

    let model = ModelBuilder::new(pairs, policy).build(run.domain());
    let solved = gateway.solve(run, &model, policy)?;
    let summary = ResultExtractor::new(pairs, policy.net_residential_area).extract(run, &model.layout, &solved);

    info!(
        %run,
        nodes = solved.nodes,
        total_units = summary.total_units,
        worst_case_annual_profit = summary.worst_case_annual_profit,
        "run complete"
    );
    Ok(summary)
}

// A development with any units needs positive area to reach the utilization floor
fn check_land(run: RunKind, policy: &PolicyParameters) -> Result<(), OptimizeError> {
    let area = policy.net_residential_area;
    if area.is_finite() && area > 0.0 {
        return Ok(());
    }
    let reason = format!(
        "net residential area {} sq ft cannot satisfy the {}% land-utilization floor",
        area,
        LAND_UTILIZATION_FLOOR * 100.0
    );
    warn!(%run, %reason, "rejecting model before solve");
    Err(OptimizeError::Infeasible {
        run,
        reason,
        violations: Vec::new(),
        net_residential_area: area,
        set_aside_percent: policy.set_aside_percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MissingAmiPolicy;
    use crate::derive::{Tenure, UnitTypeId};
    use crate::error::InputError;
    use crate::input::{AmiSchedule, UnitTypeSpec};

    fn scenario_a() -> ProjectInput {
        ProjectInput {
            net_residential_area: 80000.0,
            unit_types: vec![UnitTypeSpec::new("1BR", 800.0, 2000.0, 1)],
            ami: AmiSchedule::new(60.0).with_income(1, 60000.0),
            set_aside_percent: 20.0,
        }
    }

    fn two_types() -> ProjectInput {
        ProjectInput {
            net_residential_area: 80000.0,
            unit_types: vec![
                UnitTypeSpec::new("1BR", 800.0, 2000.0, 1).with_share_percent(10.0, 70.0),
                UnitTypeSpec::new("2BR", 1100.0, 2600.0, 2).with_share_percent(30.0, 90.0),
            ],
            ami: AmiSchedule::new(60.0).with_income(1, 60000.0).with_income(2, 68500.0),
            set_aside_percent: 20.0,
        }
    }

    #[test]
    fn test_scenario_a_single_unit_type() {
        let optimizer = UnitMixOptimizer::new(&scenario_a(), &OptimizerConfig::default()).unwrap();
        let summary = optimizer.optimize().unwrap();
        println!("{:#?}", summary);

        let market = summary.allocation(UnitTypeId(0), Tenure::Market).unwrap().units;
        let affordable = summary.allocation(UnitTypeId(0), Tenure::Affordable).unwrap().units;
        assert_eq!(market, 80.0);
        assert_eq!(affordable, 20.0);
        assert_eq!(summary.total_units, 100.0);
        assert!(affordable >= 0.2 * (market + affordable) - 1e-9);
        assert!(summary.total_land_used >= 72000.0 - 1e-6 && summary.total_land_used <= 80000.0 + 1e-6);
        assert!((summary.objective_value - 912000.0).abs() < 1e-6);
        assert!(summary.duals.is_none(), "integer run must not carry duals");
        assert!(summary.worst_case_annual_profit <= summary.best_case_annual_profit);
    }

    #[test]
    fn test_scenario_a_sensitivity() {
        let optimizer = UnitMixOptimizer::new(&scenario_a(), &OptimizerConfig::default()).unwrap();
        let integer = optimizer.optimize().unwrap();
        let report = optimizer.sensitivity(&integer).unwrap();

        assert_eq!(report.relaxed.run, RunKind::Relaxed);
        // The relaxation is already integral here
        assert!((report.precision - 100.0).abs() < 1e-6, "precision {}", report.precision);
        assert_eq!(report.shadow_prices.len(), 6);
        assert_eq!(report.reduced_costs.len(), 3);

        // Each extra square foot of land is worth (1000 * 0.8 - 200 * 0.2) * 12 / 800 per year
        let land = report
            .shadow_prices
            .iter()
            .find(|sp| sp.constraint == "land_max")
            .unwrap();
        assert!((land.value - 11.4).abs() < 1e-6, "land_max dual {}", land.value);
    }

    fn six_types(area: f64) -> ProjectInput {
        let types = [
            ("Studio", 450.0, 1500.0, 1),
            ("1BR", 600.0, 1750.0, 1),
            ("1BR+", 800.0, 2000.0, 1),
            ("2BR", 950.0, 2250.0, 2),
            ("3BR", 1100.0, 2600.0, 3),
            ("4BR", 1300.0, 2900.0, 4),
        ];
        ProjectInput {
            net_residential_area: area,
            unit_types: types
                .iter()
                .map(|&(name, sqft, rent, occupancy)| {
                    UnitTypeSpec::new(name, sqft, rent, occupancy).with_share_percent(5.0, 35.0)
                })
                .collect(),
            ami: AmiSchedule::new(60.0)
                .with_income(1, 60000.0)
                .with_income(2, 68500.0)
                .with_income(3, 77100.0)
                .with_income(4, 85600.0)
                .with_income(5, 92500.0),
            set_aside_percent: 15.0,
        }
    }

    fn eight_types(area: f64) -> ProjectInput {
        let mut input = six_types(area);
        input
            .unit_types
            .push(UnitTypeSpec::new("5BR", 1500.0, 3200.0, 5).with_share_percent(5.0, 35.0));
        input
            .unit_types
            .push(UnitTypeSpec::new("Jr1BR", 700.0, 1850.0, 1).with_share_percent(5.0, 35.0));
        input
    }

    /// Integrality, set-aside, share bounds, land window and profit ordering of a solved mix
    fn assert_policy_holds(input: &ProjectInput, optimizer: &UnitMixOptimizer, summary: &SolutionSummary) {
        let set_aside = input.set_aside_percent / 100.0;
        let area = input.net_residential_area;
        let total = summary.total_units;
        let sum: f64 = summary.allocations.iter().map(|a| a.units).sum();

        assert!((total - sum).abs() < 1e-6, "total {} vs sum {}", total, sum);
        assert!(summary.total_land_used <= area + 1e-6, "land {} over {}", summary.total_land_used, area);
        assert!(summary.total_land_used >= LAND_UTILIZATION_FLOOR * area - 1e-6, "land {} under floor", summary.total_land_used);
        assert!(summary.worst_case_annual_profit <= summary.best_case_annual_profit);

        for (pair, spec) in optimizer.derived().iter().zip(&input.unit_types) {
            let units = summary.units_of(pair.id);
            let affordable = summary.allocation(pair.id, Tenure::Affordable).unwrap().units;
            if summary.run == RunKind::Integer {
                assert_eq!(units.fract(), 0.0, "{} not integral", pair.name);
            }
            assert!(affordable >= set_aside * units - 1e-6, "{} set-aside", pair.name);
            assert!(units >= spec.min_share_percent / 100.0 * total - 1e-6, "{} min share", pair.name);
            assert!(units <= spec.max_share_percent / 100.0 * total + 1e-6, "{} max share", pair.name);
        }
    }

    #[test]
    fn test_six_unit_types_solve_to_optimality() {
        let input = six_types(100000.0);
        let optimizer = UnitMixOptimizer::new(&input, &OptimizerConfig::default()).unwrap();
        let summary = optimizer.optimize().unwrap();

        assert_eq!(summary.allocations.len(), 12);
        assert!((summary.objective_value - 1361232.0).abs() < 1.0, "objective {}", summary.objective_value);
        assert_policy_holds(&input, &optimizer, &summary);
    }

    #[test]
    fn test_eight_unit_types_with_sensitivity() {
        let input = eight_types(1230000.0);
        let optimizer = UnitMixOptimizer::new(&input, &OptimizerConfig::default()).unwrap();
        let summary = optimizer.optimize().unwrap();

        assert!((summary.objective_value - 16890024.0).abs() < 1.0, "objective {}", summary.objective_value);
        assert_policy_holds(&input, &optimizer, &summary);

        let report = optimizer.sensitivity(&summary).unwrap();
        assert_policy_holds(&input, &optimizer, &report.relaxed);
        // The relaxation can only do better
        assert!(report.relaxed.objective_value >= summary.objective_value - 1e-6);
        assert!(report.precision > 0.0, "precision {}", report.precision);
        assert_eq!(report.reduced_costs.len(), 17);
    }

    #[test]
    fn test_multiple_unit_types_respect_policy() {
        let input = two_types();
        let optimizer = UnitMixOptimizer::new(&input, &OptimizerConfig::default()).unwrap();
        let summary = optimizer.optimize().unwrap();

        let total = summary.total_units;
        let sum: f64 = summary.allocations.iter().map(|a| a.units).sum();
        assert!((total - sum).abs() < 1e-6);
        assert!(summary.total_land_used >= 72000.0 - 1e-6 && summary.total_land_used <= 80000.0 + 1e-6);

        for (pair, spec) in optimizer.derived().iter().zip(&input.unit_types) {
            let units = summary.units_of(pair.id);
            let affordable = summary.allocation(pair.id, Tenure::Affordable).unwrap().units;
            assert_eq!(units.fract(), 0.0, "{} not integral", pair.name);
            assert!(affordable >= 0.2 * units - 1e-6, "{} set-aside", pair.name);
            assert!(units >= spec.min_share_percent / 100.0 * total - 1e-6, "{} min share", pair.name);
            assert!(units <= spec.max_share_percent / 100.0 * total + 1e-6, "{} max share", pair.name);
        }

        let report = optimizer.sensitivity(&summary).unwrap();
        assert!(report.precision > 0.0);
        assert!(report.relaxed.worst_case_annual_profit <= report.relaxed.best_case_annual_profit);
    }

    #[test]
    fn test_relaxation_duals_are_deterministic() {
        let optimizer = UnitMixOptimizer::new(&two_types(), &OptimizerConfig::default()).unwrap();
        let integer = optimizer.optimize().unwrap();
        let first = optimizer.sensitivity(&integer).unwrap();
        let second = optimizer.sensitivity(&integer).unwrap();

        let prices = |r: &SensitivityReport| r.shadow_prices.iter().map(|sp| sp.value).collect::<Vec<_>>();
        let costs = |r: &SensitivityReport| r.reduced_costs.iter().map(|rc| rc.reduced_cost).collect::<Vec<_>>();
        assert_eq!(prices(&first), prices(&second));
        assert_eq!(costs(&first), costs(&second));
    }

    #[test]
    fn test_scenario_b_missing_ami_entry() {
        let mut input = scenario_a();
        input.unit_types.push(UnitTypeSpec::new("3BR", 1300.0, 3000.0, 4));

        match UnitMixOptimizer::new(&input, &OptimizerConfig::default()) {
            Err(OptimizeError::Input(InputError::MissingAmiEntry {
                unit_type,
                household_size,
            })) => {
                assert_eq!(unit_type, "3BR");
                assert_eq!(household_size, 4);
            }
            Err(other) => panic!("expected MissingAmiEntry, got {:?}", other),
            Ok(_) => panic!("expected MissingAmiEntry"),
        }

        let zero = OptimizerConfig::default().with_missing_ami(MissingAmiPolicy::Zero);
        let optimizer = UnitMixOptimizer::new(&input, &zero).unwrap();
        assert_eq!(optimizer.derived()[1].affordable.monthly_rent, 0.0);
        assert!(optimizer.optimize().is_ok());
    }

    #[test]
    fn test_scenario_c_zero_area_is_infeasible() {
        let mut input = scenario_a();
        input.net_residential_area = 0.0;
        let optimizer = UnitMixOptimizer::new(&input, &OptimizerConfig::default()).unwrap();

        let err = optimizer.optimize().unwrap_err();
        match &err {
            OptimizeError::Infeasible {
                run,
                net_residential_area,
                ..
            } => {
                assert_eq!(*run, RunKind::Integer);
                assert_eq!(*net_residential_area, 0.0);
            }
            other => panic!("expected Infeasible, got {:?}", other),
        }
        println!("{}", err);
    }

    #[test]
    fn test_conflicting_shares_are_infeasible() {
        let mut input = two_types();
        input.unit_types[0].min_share_percent = 60.0;
        input.unit_types[1].min_share_percent = 60.0;
        let optimizer = UnitMixOptimizer::new(&input, &OptimizerConfig::default()).unwrap();

        let err = optimizer.optimize().unwrap_err();
        assert!(
            matches!(err, OptimizeError::Infeasible { run: RunKind::Integer, .. }),
            "got {:?}",
            err
        );
        assert_eq!(err.run(), Some(RunKind::Integer));
    }
}
