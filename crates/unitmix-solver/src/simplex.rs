use std::collections::HashMap;

use tracing::{debug, trace};

use crate::problem::{Constraint, ConstraintOp, LpProblem};
use crate::solution::{Analysis, ConstraintViolation, ReducedCost, ShadowPrice, Solution, SolutionStatus};

/// Consecutive degenerate pivots tolerated before switching to Bland's rule
const DEGENERATE_PIVOT_LIMIT: usize = 50;

/// Simplex solver for linear programming problems
#[derive(Debug, Clone)]
pub struct Solver {
    /// Maximum pivots per phase before giving up
    max_iterations: usize,
    /// Tolerance for pivot and reduced-cost comparisons
    tolerance: f64,
    /// Relative tolerance for declaring a point feasible
    feasibility_tolerance: f64,
}

impl Default for Solver {
    fn default() -> Self {
        Self {
            max_iterations: 10000,
            tolerance: 1e-9,
            feasibility_tolerance: 1e-7,
        }
    }
}

impl Solver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    pub fn with_feasibility_tolerance(mut self, tol: f64) -> Self {
        self.feasibility_tolerance = tol;
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn feasibility_tolerance(&self) -> f64 {
        self.feasibility_tolerance
    }

    /// Solve the continuous relaxation of `problem` using the two-phase simplex method.
    ///
    /// Variable domains are ignored here; integrality is handled by
    /// [`BranchAndBound`](crate::BranchAndBound).
    pub fn solve(&self, problem: &LpProblem) -> Solution {
        let mut tableau = self.build_tableau(problem);

        // Phase 1: Find initial basic feasible solution
        if tableau.n_artificial > 0 {
            match self.phase1(&mut tableau) {
                SimplexResult::Optimal => {}
                SimplexResult::IterationLimit => {
                    return Solution::without_point(SolutionStatus::IterationLimit);
                }
                SimplexResult::Infeasible | SimplexResult::Unbounded => {
                    return Solution::infeasible();
                }
            }
        }

        // Phase 2: Optimize
        match self.phase2(&mut tableau) {
            SimplexResult::Optimal => {}
            SimplexResult::Unbounded => return Solution::unbounded(),
            SimplexResult::Infeasible => return Solution::infeasible(),
            SimplexResult::IterationLimit => {
                return Solution::without_point(SolutionStatus::IterationLimit);
            }
        }

        self.extract_solution(&tableau, problem)
    }

    /// Explain why `problem` is infeasible.
    ///
    /// Solves the problem with its lower-bound (`>=`) rows dropped and reports which of them the
    /// resulting point violates. If even that fails, falls back to pairwise bound conflicts.
    pub fn diagnose(&self, problem: &LpProblem) -> Vec<ConstraintViolation> {
        let mut relaxed = LpProblem::new(problem.variables.clone());
        relaxed.set_objective(
            problem.objective.coefficients.clone(),
            problem.objective.minimize,
        );

        for c in &problem.constraints {
            if c.op != ConstraintOp::Ge {
                relaxed.add_constraint(c.name.clone(), c.coefficients.clone(), c.op, c.rhs);
            }
        }

        let relaxed_solution = self.solve(&relaxed);
        if !relaxed_solution.status.is_optimal() {
            return self.analyze_conflicts(problem);
        }

        let violations = self.find_violations(problem, &relaxed_solution.values);
        if violations.is_empty() {
            return self.analyze_conflicts(problem);
        }
        violations
    }

    /// Find which constraints are violated by a given point
    pub fn find_violations(&self, problem: &LpProblem, values: &[f64]) -> Vec<ConstraintViolation> {
        let mut violations = Vec::new();

        for c in &problem.constraints {
            let lhs = problem.evaluate_row(c, values);
            let tol = self.feasibility_tolerance * (1.0 + c.rhs.abs());

            let violation = match c.op {
                ConstraintOp::Le if lhs > c.rhs + tol => {
                    let amt = lhs - c.rhs;
                    Some((amt, format!("{} exceeds maximum of {:.2} by {:.2}", c.name, c.rhs, amt)))
                }
                ConstraintOp::Ge if lhs < c.rhs - tol => {
                    let amt = c.rhs - lhs;
                    Some((amt, format!("{} is below minimum of {:.2} by {:.2}", c.name, c.rhs, amt)))
                }
                ConstraintOp::Eq if (lhs - c.rhs).abs() > tol => {
                    let amt = (lhs - c.rhs).abs();
                    Some((amt, format!("{} requires exactly {:.2} but got {:.2}", c.name, c.rhs, lhs)))
                }
                _ => None,
            };

            if let Some((violation_amount, description)) = violation {
                violations.push(ConstraintViolation {
                    constraint: c.name.clone(),
                    required: c.rhs,
                    actual: lhs,
                    violation_amount,
                    description,
                });
            }
        }

        // Worst first
        violations.sort_by(|a, b| b.violation_amount.total_cmp(&a.violation_amount));
        violations
    }

    /// Look for rows with the same coefficient sign pattern whose bounds contradict each other
    fn analyze_conflicts(&self, problem: &LpProblem) -> Vec<ConstraintViolation> {
        let mut groups: HashMap<Vec<i8>, Vec<&Constraint>> = HashMap::new();
        for c in &problem.constraints {
            let key: Vec<i8> = c
                .coefficients
                .iter()
                .map(|&x| {
                    if x.abs() < self.tolerance {
                        0
                    } else if x > 0.0 {
                        1
                    } else {
                        -1
                    }
                })
                .collect();
            groups.entry(key).or_default().push(c);
        }

        let mut violations = Vec::new();
        for constraints in groups.values() {
            let mut min_bound: Option<(f64, &str)> = None;
            let mut max_bound: Option<(f64, &str)> = None;

            for c in constraints {
                let raises_min = matches!(c.op, ConstraintOp::Ge | ConstraintOp::Eq)
                    && min_bound.is_none_or(|(v, _)| c.rhs > v);
                let lowers_max = matches!(c.op, ConstraintOp::Le | ConstraintOp::Eq)
                    && max_bound.is_none_or(|(v, _)| c.rhs < v);
                if raises_min {
                    min_bound = Some((c.rhs, c.name.as_str()));
                }
                if lowers_max {
                    max_bound = Some((c.rhs, c.name.as_str()));
                }
            }

            if let (Some((min_val, min_name)), Some((max_val, max_name))) = (min_bound, max_bound) {
                if min_val > max_val + self.feasibility_tolerance * (1.0 + max_val.abs()) {
                    violations.push(ConstraintViolation {
                        constraint: format!("{} vs {}", min_name, max_name),
                        required: min_val,
                        actual: max_val,
                        violation_amount: min_val - max_val,
                        description: format!(
                            "Conflict: {} requires >= {:.2} but {} requires <= {:.2}",
                            min_name, min_val, max_name, max_val
                        ),
                    });
                }
            }
        }

        violations.sort_by(|a, b| b.violation_amount.total_cmp(&a.violation_amount));
        violations
    }

    fn build_tableau(&self, problem: &LpProblem) -> Tableau {
        let n_vars = problem.num_variables();
        let n_constraints = problem.num_constraints();

        // Rows with a negative RHS are negated so the initial basis is non-negative
        let rows: Vec<(ConstraintOp, f64)> = problem
            .constraints
            .iter()
            .map(|c| {
                if c.rhs < 0.0 {
                    let op = match c.op {
                        ConstraintOp::Le => ConstraintOp::Ge,
                        ConstraintOp::Ge => ConstraintOp::Le,
                        ConstraintOp::Eq => ConstraintOp::Eq,
                    };
                    (op, -1.0)
                } else {
                    (c.op, 1.0)
                }
            })
            .collect();

        let n_slack = rows.iter().filter(|(op, _)| *op != ConstraintOp::Eq).count();
        let n_artificial = rows.iter().filter(|(op, _)| *op != ConstraintOp::Le).count();

        let total_cols = n_vars + n_slack + n_artificial + 1; // +1 for RHS
        let rhs_col = total_cols - 1;

        let mut tableau = Tableau {
            data: vec![vec![0.0; total_cols]; n_constraints + 1],
            basic_vars: vec![0; n_constraints],
            n_vars,
            n_slack,
            n_artificial,
            duals: Vec::with_capacity(n_constraints),
        };

        let mut slack_idx = n_vars;
        let mut artificial_idx = n_vars + n_slack;

        for (i, (c, &(op, sign))) in problem.constraints.iter().zip(&rows).enumerate() {
            for (j, &coef) in c.coefficients.iter().enumerate().take(n_vars) {
                tableau.data[i][j] = sign * coef;
            }
            tableau.data[i][rhs_col] = sign * c.rhs;

            // The dual of row i is read off the objective-row entry of one of its
            // auxiliary columns; `sign` undoes the normalization above.
            let dual = match op {
                ConstraintOp::Le => {
                    tableau.data[i][slack_idx] = 1.0;
                    tableau.basic_vars[i] = slack_idx;
                    slack_idx += 1;
                    DualSource { column: slack_idx - 1, sign: -sign }
                }
                ConstraintOp::Ge => {
                    tableau.data[i][slack_idx] = -1.0; // surplus
                    tableau.data[i][artificial_idx] = 1.0;
                    tableau.basic_vars[i] = artificial_idx;
                    slack_idx += 1;
                    artificial_idx += 1;
                    DualSource { column: slack_idx - 1, sign }
                }
                ConstraintOp::Eq => {
                    tableau.data[i][artificial_idx] = 1.0;
                    tableau.basic_vars[i] = artificial_idx;
                    artificial_idx += 1;
                    DualSource { column: artificial_idx - 1, sign: -sign }
                }
            };
            tableau.duals.push(dual);
        }

        // Objective row (last row). The tableau always maximizes, so minimization
        // problems are stored negated.
        let obj_row = n_constraints;
        for (j, &coef) in problem.objective.coefficients.iter().enumerate().take(n_vars) {
            tableau.data[obj_row][j] = if problem.objective.minimize { -coef } else { coef };
        }

        tableau
    }

    fn phase1(&self, tableau: &mut Tableau) -> SimplexResult {
        let n_constraints = tableau.data.len() - 1;
        let n_cols = tableau.data[0].len();
        let rhs_col = n_cols - 1;
        let art_start = tableau.artificial_start();

        let orig_obj = tableau.data[n_constraints].clone();

        // maximize -sum(artificials)
        tableau.data[n_constraints].fill(0.0);
        for j in art_start..(art_start + tableau.n_artificial) {
            tableau.data[n_constraints][j] = -1.0;
        }
        for i in 0..n_constraints {
            if tableau.basic_vars[i] >= art_start {
                for j in 0..n_cols {
                    tableau.data[n_constraints][j] += tableau.data[i][j];
                }
            }
        }

        match self.iterate(tableau, art_start) {
            SimplexResult::Optimal => {}
            SimplexResult::IterationLimit => return SimplexResult::IterationLimit,
            // The phase 1 objective is bounded by zero
            SimplexResult::Unbounded | SimplexResult::Infeasible => return SimplexResult::Infeasible,
        }

        let scale = 1.0
            + tableau.data[..n_constraints]
                .iter()
                .map(|row| row[rhs_col].abs())
                .fold(0.0, f64::max);
        let residual: f64 = (0..n_constraints)
            .filter(|&i| tableau.basic_vars[i] >= art_start)
            .map(|i| tableau.data[i][rhs_col].abs())
            .sum();
        if residual > self.feasibility_tolerance * scale {
            debug!(residual, "phase 1 ended with positive artificials");
            return SimplexResult::Infeasible;
        }

        // Drive zero-level artificials out of the basis so phase 2 cannot move them
        for i in 0..n_constraints {
            if tableau.basic_vars[i] < art_start {
                continue;
            }
            let replacement = (0..art_start)
                .filter(|&j| tableau.data[i][j].abs() > self.tolerance)
                .max_by(|&a, &b| tableau.data[i][a].abs().total_cmp(&tableau.data[i][b].abs()));
            if let Some(col) = replacement {
                self.pivot(tableau, i, col);
            }
            // Otherwise the row is redundant and the artificial stays at zero
        }

        // Restore original objective and price out the basic columns
        tableau.data[n_constraints] = orig_obj;
        for i in 0..n_constraints {
            let basic = tableau.basic_vars[i];
            let ratio = tableau.data[n_constraints][basic];
            if ratio.abs() > 0.0 {
                for j in 0..n_cols {
                    tableau.data[n_constraints][j] -= ratio * tableau.data[i][j];
                }
            }
        }

        SimplexResult::Optimal
    }

    fn phase2(&self, tableau: &mut Tableau) -> SimplexResult {
        // Artificial columns never re-enter
        let exclude_from = tableau.artificial_start();
        self.iterate(tableau, exclude_from)
    }

    fn iterate(&self, tableau: &mut Tableau, exclude_from: usize) -> SimplexResult {
        let rhs_col = tableau.data[0].len() - 1;
        let mut degenerate_streak = 0;

        for iteration in 0..self.max_iterations {
            let bland = degenerate_streak > DEGENERATE_PIVOT_LIMIT;
            let Some(pivot_col) = self.find_pivot_column(tableau, exclude_from, bland) else {
                trace!(iteration, "simplex phase reached optimality");
                return SimplexResult::Optimal;
            };
            let Some(pivot_row) = self.find_pivot_row(tableau, pivot_col) else {
                return SimplexResult::Unbounded;
            };

            if tableau.data[pivot_row][rhs_col] <= self.tolerance {
                degenerate_streak += 1;
            } else {
                degenerate_streak = 0;
            }
            self.pivot(tableau, pivot_row, pivot_col);
        }

        debug!(max_iterations = self.max_iterations, "simplex iteration limit reached");
        SimplexResult::IterationLimit
    }

    fn find_pivot_column(&self, tableau: &Tableau, exclude_from: usize, bland: bool) -> Option<usize> {
        let obj_row = &tableau.data[tableau.data.len() - 1];

        if bland {
            // Smallest improving index
            return (0..exclude_from).find(|&j| obj_row[j] > self.tolerance);
        }

        // Most positive reduced cost
        let mut max_val = self.tolerance;
        let mut max_col = None;
        for (j, &value) in obj_row.iter().enumerate().take(exclude_from) {
            if value > max_val {
                max_val = value;
                max_col = Some(j);
            }
        }
        max_col
    }

    fn find_pivot_row(&self, tableau: &Tableau, col: usize) -> Option<usize> {
        let n_constraints = tableau.data.len() - 1;
        let rhs_col = tableau.data[0].len() - 1;

        let mut min_ratio = f64::INFINITY;
        let mut min_row: Option<usize> = None;

        for i in 0..n_constraints {
            let val = tableau.data[i][col];
            if val <= self.tolerance {
                continue;
            }
            let ratio = tableau.data[i][rhs_col].max(0.0) / val;
            let tie = (ratio - min_ratio).abs() <= self.tolerance * (1.0 + min_ratio.abs());
            let better = match min_row {
                None => true,
                Some(r) if tie => tableau.basic_vars[i] < tableau.basic_vars[r],
                Some(_) => ratio < min_ratio,
            };
            if better {
                min_ratio = ratio;
                min_row = Some(i);
            }
        }

        min_row
    }

    fn pivot(&self, tableau: &mut Tableau, row: usize, col: usize) {
        let n_rows = tableau.data.len();
        let n_cols = tableau.data[0].len();

        tableau.basic_vars[row] = col;

        let pivot_val = tableau.data[row][col];
        for j in 0..n_cols {
            tableau.data[row][j] /= pivot_val;
        }

        let pivot_row = tableau.data[row].clone();
        for (i, data_row) in tableau.data.iter_mut().enumerate().take(n_rows) {
            if i == row {
                continue;
            }
            let factor = data_row[col];
            if factor != 0.0 {
                for j in 0..n_cols {
                    data_row[j] -= factor * pivot_row[j];
                }
            }
        }
    }

    fn extract_solution(&self, tableau: &Tableau, problem: &LpProblem) -> Solution {
        let n_vars = problem.num_variables();
        let n_constraints = problem.num_constraints();
        let rhs_col = tableau.data[0].len() - 1;

        let mut values = vec![0.0; n_vars];
        for i in 0..n_constraints {
            let basic = tableau.basic_vars[i];
            if basic < n_vars {
                let value = tableau.data[i][rhs_col];
                values[basic] = if value.abs() < self.tolerance { 0.0 } else { value.max(0.0) };
            }
        }

        let objective_value = problem.objective_value(&values);
        let analysis = self.analyze(tableau, problem, &values);

        Solution::optimal(values, objective_value, analysis)
    }

    fn analyze(&self, tableau: &Tableau, problem: &LpProblem, values: &[f64]) -> Analysis {
        let obj_row = &tableau.data[problem.num_constraints()];
        // Converts values of the internal maximization back to the problem's sense
        let sense = if problem.objective.minimize { -1.0 } else { 1.0 };
        let clean = |v: f64| if v.abs() < self.tolerance { 0.0 } else { v };

        let shadow_prices: Vec<ShadowPrice> = problem
            .constraints
            .iter()
            .zip(&tableau.duals)
            .map(|(constraint, source)| ShadowPrice {
                constraint: constraint.name.clone(),
                value: clean(sense * source.sign * obj_row[source.column]),
            })
            .collect();

        let reduced_costs = problem
            .variables
            .iter()
            .enumerate()
            .map(|(j, var_name)| {
                let is_basic = tableau.basic_vars.contains(&j);
                let rc = if is_basic { 0.0 } else { clean(sense * obj_row[j]) };
                ReducedCost {
                    variable: var_name.clone(),
                    value: values[j],
                    reduced_cost: rc,
                    is_basic,
                }
            })
            .collect();

        let binding_constraints = shadow_prices
            .iter()
            .filter(|sp| sp.value != 0.0)
            .map(|sp| sp.constraint.clone())
            .collect();

        Analysis {
            shadow_prices,
            reduced_costs,
            binding_constraints,
        }
    }
}

struct Tableau {
    data: Vec<Vec<f64>>,
    basic_vars: Vec<usize>,
    n_vars: usize,
    n_slack: usize,
    n_artificial: usize,
    /// Where each constraint's dual value is read from
    duals: Vec<DualSource>,
}

impl Tableau {
    fn artificial_start(&self) -> usize {
        self.n_vars + self.n_slack
    }
}

#[derive(Debug, Clone, Copy)]
struct DualSource {
    column: usize,
    sign: f64,
}

enum SimplexResult {
    Optimal,
    Unbounded,
    Infeasible,
    IterationLimit,
}
