//! Builds the unit-mix program from derived records and site policy.
//!
//! Column layout: the market and affordable records of pair `k` sit at `2k` and `2k + 1`,
//! followed by a single total-units column. The share and set-aside rows reference that
//! column instead of a precomputed total, so they stay linear while the total is itself a
//! decision variable.

use tracing::debug;
use unitmix_solver::{ConstraintOp, LpProblem, VariableDomain};

use crate::derive::{DerivedUnitPair, Tenure, UnitTypeId};
use crate::input::PolicyParameters;

/// Share of the net residential area that must be built on
pub const LAND_UTILIZATION_FLOOR: f64 = 0.9;

pub const TOTAL_UNITS: &str = "total_units";
pub const TOTAL_UNITS_ROW: &str = "total_units_def";
pub const LAND_MAX_ROW: &str = "land_max";
pub const LAND_MIN_ROW: &str = "land_min";

pub fn share_min_row(name: &str) -> String {
    format!("{}_share_min", name)
}

pub fn share_max_row(name: &str) -> String {
    format!("{}_share_max", name)
}

pub fn set_aside_row(name: &str) -> String {
    format!("{}_set_aside", name)
}

/// Maps unit records to problem columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelLayout {
    pub pair_count: usize,
}

impl ModelLayout {
    pub fn column(&self, id: UnitTypeId, tenure: Tenure) -> usize {
        match tenure {
            Tenure::Market => 2 * id.0,
            Tenure::Affordable => 2 * id.0 + 1,
        }
    }

    pub fn total_units_column(&self) -> usize {
        2 * self.pair_count
    }

    pub fn num_variables(&self) -> usize {
        2 * self.pair_count + 1
    }
}

/// A program ready for the solver; never mutated after it is built
#[derive(Debug, Clone)]
pub struct OptimizationModel {
    pub domain: VariableDomain,
    pub problem: LpProblem,
    pub layout: ModelLayout,
}

pub struct ModelBuilder<'a> {
    pairs: &'a [DerivedUnitPair],
    policy: &'a PolicyParameters,
}

impl<'a> ModelBuilder<'a> {
    /// `pairs` must be in id order, as produced by the derivation step
    pub fn new(pairs: &'a [DerivedUnitPair], policy: &'a PolicyParameters) -> Self {
        Self { pairs, policy }
    }

    /// Build a fresh model; only `domain` differs between the integer program and its relaxation
    pub fn build(&self, domain: VariableDomain) -> OptimizationModel {
        let layout = ModelLayout {
            pair_count: self.pairs.len(),
        };
        let n = layout.num_variables();
        let total = layout.total_units_column();

        let mut variables = Vec::with_capacity(n);
        for pair in self.pairs {
            for record in pair.records() {
                variables.push(record.label.clone());
            }
        }
        variables.push(TOTAL_UNITS.to_string());

        let mut problem = LpProblem::with_domain(variables, domain);

        // Maximize annual profit at worst-case cost
        let mut objective = vec![0.0; n];
        for pair in self.pairs {
            for record in pair.records() {
                objective[layout.column(pair.id, record.tenure)] = record.annual_worst_case_margin();
            }
        }
        problem.set_objective(objective, false);

        let mut total_row = vec![0.0; n];
        let mut land_row = vec![0.0; n];
        for pair in self.pairs {
            for record in pair.records() {
                let j = layout.column(pair.id, record.tenure);
                total_row[j] = 1.0;
                land_row[j] = record.square_feet;
            }
        }
        total_row[total] = -1.0;
        problem.add_constraint(TOTAL_UNITS_ROW, total_row, ConstraintOp::Eq, 0.0);

        let area = self.policy.net_residential_area;
        problem.add_constraint(LAND_MAX_ROW, land_row.clone(), ConstraintOp::Le, area);
        problem.add_constraint(LAND_MIN_ROW, land_row, ConstraintOp::Ge, LAND_UTILIZATION_FLOOR * area);

        let set_aside = self.policy.set_aside_fraction();
        for pair in self.pairs {
            let market = layout.column(pair.id, Tenure::Market);
            let affordable = layout.column(pair.id, Tenure::Affordable);

            let mut min_row = vec![0.0; n];
            min_row[market] = 1.0;
            min_row[affordable] = 1.0;
            min_row[total] = -pair.min_share;
            problem.add_constraint(share_min_row(&pair.name), min_row, ConstraintOp::Ge, 0.0);

            let mut max_row = vec![0.0; n];
            max_row[market] = 1.0;
            max_row[affordable] = 1.0;
            max_row[total] = -pair.max_share;
            problem.add_constraint(share_max_row(&pair.name), max_row, ConstraintOp::Le, 0.0);

            // affordable >= s * (market + affordable)
            let mut aside_row = vec![0.0; n];
            aside_row[market] = -set_aside;
            aside_row[affordable] = 1.0 - set_aside;
            problem.add_constraint(set_aside_row(&pair.name), aside_row, ConstraintOp::Ge, 0.0);
        }

        debug!(
            %domain,
            variables = problem.num_variables(),
            constraints = problem.num_constraints(),
            "built unit-mix model"
        );

        OptimizationModel {
            domain,
            problem,
            layout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MissingAmiPolicy;
    use crate::derive::DerivedMetricsCalculator;
    use crate::input::{AmiSchedule, UnitTypeSpec};

    fn pairs() -> Vec<DerivedUnitPair> {
        let ami = AmiSchedule::new(60.0).with_income(1, 60000.0).with_income(2, 68500.0);
        let specs = vec![
            UnitTypeSpec::new("1BR", 800.0, 2000.0, 1).with_share_percent(10.0, 70.0),
            UnitTypeSpec::new("2BR", 1100.0, 2600.0, 2).with_share_percent(30.0, 90.0),
        ];
        DerivedMetricsCalculator::new(&ami, MissingAmiPolicy::Reject)
            .derive(&specs)
            .unwrap()
    }

    fn policy() -> PolicyParameters {
        PolicyParameters {
            net_residential_area: 80000.0,
            set_aside_percent: 20.0,
        }
    }

    #[test]
    fn test_variables_and_rows() {
        let pairs = pairs();
        let policy = policy();
        let model = ModelBuilder::new(&pairs, &policy).build(VariableDomain::Integer);
        let problem = &model.problem;

        assert_eq!(problem.variables, vec!["1BR", "Aff_1BR", "2BR", "Aff_2BR", "total_units"]);
        assert!(problem.has_integer_variables());
        let names: Vec<&str> = problem.constraints.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "total_units_def",
                "land_max",
                "land_min",
                "1BR_share_min",
                "1BR_share_max",
                "1BR_set_aside",
                "2BR_share_min",
                "2BR_share_max",
                "2BR_set_aside",
            ]
        );
    }

    #[test]
    fn test_objective_uses_worst_case_cost() {
        let pairs = pairs();
        let policy = policy();
        let model = ModelBuilder::new(&pairs, &policy).build(VariableDomain::Integer);
        let objective = &model.problem.objective;

        assert!(!objective.minimize);
        // (2000 - 1000) * 12 and (800 - 1000) * 12
        assert!((objective.coefficients[0] - 12000.0).abs() < 1e-9);
        assert!((objective.coefficients[1] + 2400.0).abs() < 1e-9);
        assert_eq!(objective.coefficients[4], 0.0);
    }

    #[test]
    fn test_row_coefficients() {
        let pairs = pairs();
        let policy = policy();
        let model = ModelBuilder::new(&pairs, &policy).build(VariableDomain::Integer);
        let row = |name: &str| {
            model
                .problem
                .constraints
                .iter()
                .find(|c| c.name == name)
                .unwrap()
                .clone()
        };

        let total = row("total_units_def");
        assert_eq!(total.coefficients, vec![1.0, 1.0, 1.0, 1.0, -1.0]);
        assert_eq!(total.op, ConstraintOp::Eq);

        let land_min = row("land_min");
        assert_eq!(land_min.coefficients, vec![800.0, 800.0, 1100.0, 1100.0, 0.0]);
        assert!((land_min.rhs - 72000.0).abs() < 1e-9);
        assert_eq!(row("land_max").rhs, 80000.0);

        let share_min = row("2BR_share_min");
        assert_eq!(share_min.coefficients[2..4], [1.0, 1.0]);
        assert!((share_min.coefficients[4] + 0.3).abs() < 1e-12);

        let share_max = row("1BR_share_max");
        assert!((share_max.coefficients[4] + 0.7).abs() < 1e-12);
        assert_eq!(share_max.op, ConstraintOp::Le);

        let aside = row("1BR_set_aside");
        assert!((aside.coefficients[0] + 0.2).abs() < 1e-12);
        assert!((aside.coefficients[1] - 0.8).abs() < 1e-12);
        assert_eq!(aside.coefficients[2..], [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_relaxation_is_structurally_identical() {
        let pairs = pairs();
        let policy = policy();
        let builder = ModelBuilder::new(&pairs, &policy);
        let integer = builder.build(VariableDomain::Integer);
        let relaxed = builder.build(VariableDomain::Continuous);

        assert_eq!(integer.layout, relaxed.layout);
        assert_eq!(integer.problem.variables, relaxed.problem.variables);
        assert_eq!(integer.problem.objective.coefficients, relaxed.problem.objective.coefficients);
        for (a, b) in integer.problem.constraints.iter().zip(&relaxed.problem.constraints) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.coefficients, b.coefficients);
            assert_eq!(a.op, b.op);
            assert_eq!(a.rhs, b.rhs);
        }
        assert!(!relaxed.problem.has_integer_variables());
        assert!(relaxed.problem.domains.iter().all(|d| *d == VariableDomain::Continuous));
    }

    #[test]
    fn test_layout_columns() {
        let layout = ModelLayout { pair_count: 3 };
        assert_eq!(layout.column(UnitTypeId(0), Tenure::Market), 0);
        assert_eq!(layout.column(UnitTypeId(2), Tenure::Affordable), 5);
        assert_eq!(layout.total_units_column(), 6);
        assert_eq!(layout.num_variables(), 7);
    }
}
