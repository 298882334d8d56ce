use tracing::{info, warn};
use unitmix_solver::{
    Backend, ReducedCost, ShadowPrice, Solution, SolutionStatus, SolverError, VariableDomain,
};

use crate::config::SolverSettings;
use crate::error::{OptimizeError, RunKind};
use crate::input::PolicyParameters;
use crate::model::OptimizationModel;

/// Dual values of a continuous solve
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct DualReport {
    pub shadow_prices: Vec<ShadowPrice>,
    pub reduced_costs: Vec<ReducedCost>,
}

/// Values read back from an optimal solve
#[derive(Debug, Clone)]
pub struct SolvedModel {
    pub values: Vec<f64>,
    pub objective_value: f64,
    /// Present only for continuous models
    pub duals: Option<DualReport>,
    pub nodes: usize,
}

/// Hands models to a solver backend and turns its terminal status into a result
pub struct SolverGateway {
    backend: Box<dyn Backend>,
}

impl SolverGateway {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn from_settings(settings: &SolverSettings) -> Self {
        Self::new(settings.build_backend())
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Solve `model` for `run`; `policy` is only used to describe failures
    pub fn solve(
        &self,
        run: RunKind,
        model: &OptimizationModel,
        policy: &PolicyParameters,
    ) -> Result<SolvedModel, OptimizeError> {
        info!(%run, backend = self.backend.name(), "solving unit-mix model");
        let solution = self
            .backend
            .solve(&model.problem)
            .map_err(|e| backend_error(run, e))?;

        match solution.status {
            SolutionStatus::Optimal => {}
            SolutionStatus::Infeasible => {
                let reason = solution
                    .violations
                    .first()
                    .map(|v| v.description.clone())
                    .unwrap_or_else(|| "no unit mix satisfies every constraint".to_string());
                warn!(%run, %reason, "model infeasible");
                return Err(OptimizeError::Infeasible {
                    run,
                    reason,
                    violations: solution.violations,
                    net_residential_area: policy.net_residential_area,
                    set_aside_percent: policy.set_aside_percent,
                });
            }
            SolutionStatus::Unbounded => return Err(OptimizeError::Unbounded { run }),
            status if status.is_limit() => {
                warn!(%run, %status, "solve stopped early");
                return Err(OptimizeError::SolverTimeout { run, status });
            }
            status => {
                return Err(OptimizeError::SolverFailed {
                    run,
                    reason: format!("solver returned status '{}'", status),
                });
            }
        }

        let expected = model.layout.num_variables();
        if solution.values.len() != expected {
            return Err(OptimizeError::SolverFailed {
                run,
                reason: format!(
                    "solver returned {} values for {} variables",
                    solution.values.len(),
                    expected
                ),
            });
        }

        Ok(into_solved(model.domain, solution))
    }
}

fn into_solved(domain: VariableDomain, solution: Solution) -> SolvedModel {
    let duals = match domain {
        VariableDomain::Continuous => Some(DualReport {
            shadow_prices: solution.analysis.shadow_prices,
            reduced_costs: solution.analysis.reduced_costs,
        }),
        VariableDomain::Integer => None,
    };
    SolvedModel {
        values: solution.values,
        objective_value: solution.objective_value,
        duals,
        nodes: solution.nodes,
    }
}

fn backend_error(run: RunKind, err: SolverError) -> OptimizeError {
    match err {
        SolverError::Unavailable { .. } => OptimizeError::SolverUnavailable {
            run,
            reason: err.to_string(),
        },
        other => OptimizeError::SolverFailed {
            run,
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitmix_solver::{Analysis, LpProblem};

    use crate::config::MissingAmiPolicy;
    use crate::derive::DerivedMetricsCalculator;
    use crate::input::{AmiSchedule, UnitTypeSpec};
    use crate::model::ModelBuilder;

    /// Backend that returns a canned solution
    struct Canned(Solution);

    impl Backend for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        fn solve(&self, _problem: &LpProblem) -> Result<Solution, SolverError> {
            Ok(self.0.clone())
        }
    }

    struct Missing;

    impl Backend for Missing {
        fn name(&self) -> &'static str {
            "missing"
        }

        fn solve(&self, _problem: &LpProblem) -> Result<Solution, SolverError> {
            Err(SolverError::Unavailable {
                solver: "cbc".to_string(),
                reason: "not found".to_string(),
            })
        }
    }

    fn policy() -> PolicyParameters {
        PolicyParameters {
            net_residential_area: 80000.0,
            set_aside_percent: 20.0,
        }
    }

    fn model(domain: VariableDomain) -> OptimizationModel {
        let ami = AmiSchedule::new(60.0).with_income(1, 60000.0);
        let specs = vec![UnitTypeSpec::new("1BR", 800.0, 2000.0, 1)];
        let pairs = DerivedMetricsCalculator::new(&ami, MissingAmiPolicy::Reject)
            .derive(&specs)
            .unwrap();
        ModelBuilder::new(&pairs, &policy()).build(domain)
    }

    #[test]
    fn test_builtin_integer_solve_has_no_duals() {
        let gateway = SolverGateway::from_settings(&SolverSettings::default());
        let solved = gateway
            .solve(RunKind::Integer, &model(VariableDomain::Integer), &policy())
            .unwrap();

        assert_eq!(gateway.backend_name(), "builtin");
        assert!(solved.duals.is_none());
        assert_eq!(solved.values.len(), 3);
    }

    #[test]
    fn test_builtin_relaxed_solve_has_duals() {
        let gateway = SolverGateway::from_settings(&SolverSettings::default());
        let relaxed = model(VariableDomain::Continuous);
        let solved = gateway.solve(RunKind::Relaxed, &relaxed, &policy()).unwrap();

        let duals = solved.duals.expect("relaxed solve should carry duals");
        assert_eq!(duals.shadow_prices.len(), relaxed.problem.num_constraints());
        assert_eq!(duals.reduced_costs.len(), relaxed.problem.num_variables());
    }

    #[test]
    fn test_infeasible_status_is_an_error() {
        let gateway = SolverGateway::new(Box::new(Canned(Solution::infeasible())));
        let err = gateway
            .solve(RunKind::Integer, &model(VariableDomain::Integer), &policy())
            .unwrap_err();

        match err {
            OptimizeError::Infeasible {
                run,
                net_residential_area,
                set_aside_percent,
                ..
            } => {
                assert_eq!(run, RunKind::Integer);
                assert_eq!(net_residential_area, 80000.0);
                assert_eq!(set_aside_percent, 20.0);
            }
            other => panic!("expected Infeasible, got {:?}", other),
        }
    }

    #[test]
    fn test_non_optimal_statuses() {
        let relaxed = model(VariableDomain::Continuous);

        let unbounded = SolverGateway::new(Box::new(Canned(Solution::unbounded())));
        assert!(matches!(
            unbounded.solve(RunKind::Relaxed, &relaxed, &policy()),
            Err(OptimizeError::Unbounded { run: RunKind::Relaxed })
        ));

        let stopped = SolverGateway::new(Box::new(Canned(Solution::without_point(
            SolutionStatus::TimeLimit,
        ))));
        assert!(matches!(
            stopped.solve(RunKind::Relaxed, &relaxed, &policy()),
            Err(OptimizeError::SolverTimeout {
                status: SolutionStatus::TimeLimit,
                ..
            })
        ));

        let failed = SolverGateway::new(Box::new(Canned(Solution::without_point(SolutionStatus::Error))));
        assert!(matches!(
            failed.solve(RunKind::Relaxed, &relaxed, &policy()),
            Err(OptimizeError::SolverFailed { .. })
        ));
    }

    #[test]
    fn test_short_value_vector_rejected() {
        let short = Solution::optimal(vec![1.0], 0.0, Analysis::empty());
        let gateway = SolverGateway::new(Box::new(Canned(short)));
        let err = gateway
            .solve(RunKind::Integer, &model(VariableDomain::Integer), &policy())
            .unwrap_err();
        assert!(matches!(err, OptimizeError::SolverFailed { .. }), "got {:?}", err);
    }

    #[test]
    fn test_unavailable_backend() {
        let gateway = SolverGateway::new(Box::new(Missing));
        let err = gateway
            .solve(RunKind::Integer, &model(VariableDomain::Integer), &policy())
            .unwrap_err();
        assert!(matches!(err, OptimizeError::SolverUnavailable { .. }), "got {:?}", err);
        println!("{}", err);
    }
}
