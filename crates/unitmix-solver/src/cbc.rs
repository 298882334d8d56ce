//! Backend that shells out to an external COIN-OR CBC executable.
//!
//! The problem is written in CPLEX-LP format with positional names (`x{j}` for variables,
//! `c{i}` for constraints) so user-supplied names never have to be escaped, and the solution
//! file produced by `-printingOptions all` is mapped back by position.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info};

use crate::backend::{Backend, SolverError};
use crate::problem::{ConstraintOp, LpProblem, VariableDomain};
use crate::solution::{Analysis, ReducedCost, ShadowPrice, Solution, SolutionStatus};

/// Values this close to zero are treated as zero when reading duals back
const DUAL_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct CbcCommand {
    /// Path (or bare name resolved through `PATH`) of the `cbc` executable
    path: PathBuf,
    time_limit: Option<Duration>,
    max_nodes: Option<usize>,
}

impl CbcCommand {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            time_limit: None,
            max_nodes: None,
        }
    }

    pub fn with_time_limit(mut self, limit: Option<Duration>) -> Self {
        self.time_limit = limit;
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: Option<usize>) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, reason: impl Into<String>) -> SolverError {
        SolverError::Unavailable {
            solver: self.path.display().to_string(),
            reason: reason.into(),
        }
    }
}

impl Backend for CbcCommand {
    fn name(&self) -> &'static str {
        "cbc"
    }

    fn solve(&self, problem: &LpProblem) -> Result<Solution, SolverError> {
        let workdir = tempfile::tempdir()?;
        let model_path = workdir.path().join("model.lp");
        let solution_path = workdir.path().join("model.sol");
        std::fs::write(&model_path, write_lp(problem))?;

        let mut command = Command::new(&self.path);
        command.arg("-import").arg(&model_path);
        if let Some(limit) = self.time_limit {
            command.arg("-sec").arg(limit.as_secs_f64().to_string());
        }
        if let Some(max_nodes) = self.max_nodes {
            command.arg("-maxNodes").arg(max_nodes.to_string());
        }
        if problem.has_integer_variables() {
            command.arg("-branch");
        } else {
            command.arg("-initialSolve");
        }
        command
            .arg("-printingOptions")
            .arg("all")
            .arg("-solution")
            .arg(&solution_path);

        info!(path = %self.path.display(), integer = problem.has_integer_variables(), "invoking cbc");
        let output = command
            .output()
            .map_err(|e| self.unavailable(e.to_string()))?;
        debug!(status = ?output.status, "cbc exited");

        let text = match std::fs::read_to_string(&solution_path) {
            Ok(text) => text,
            Err(_) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(self.unavailable(format!("exited with {}: {}", output.status, stderr.trim())));
            }
            Err(_) => {
                return Err(SolverError::MalformedOutput("cbc produced no solution file".to_string()));
            }
        };

        parse_solution(&text, problem)
    }
}

/// Render a problem in CPLEX-LP format with positional names
pub fn write_lp(problem: &LpProblem) -> String {
    let mut out = String::new();
    let sense = if problem.objective.minimize { "Minimize" } else { "Maximize" };
    let _ = writeln!(out, "\\* unitmix model *\\");
    let _ = writeln!(out, "{}", sense);
    let _ = writeln!(out, " obj: {}", linear_terms(&problem.objective.coefficients));

    let _ = writeln!(out, "Subject To");
    for (i, c) in problem.constraints.iter().enumerate() {
        let op = match c.op {
            ConstraintOp::Le => "<=",
            ConstraintOp::Ge => ">=",
            ConstraintOp::Eq => "=",
        };
        let _ = writeln!(out, " c{}: {} {} {}", i, linear_terms(&c.coefficients), op, c.rhs);
    }

    let integers: Vec<String> = problem
        .domains
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == VariableDomain::Integer)
        .map(|(j, _)| format!("x{}", j))
        .collect();
    if !integers.is_empty() {
        let _ = writeln!(out, "General");
        let _ = writeln!(out, " {}", integers.join(" "));
    }
    let _ = writeln!(out, "End");
    out
}

fn linear_terms(coefficients: &[f64]) -> String {
    let terms: Vec<String> = coefficients
        .iter()
        .enumerate()
        .filter(|(_, c)| **c != 0.0)
        .map(|(j, c)| format!("{:+} x{}", c, j))
        .collect();
    if terms.is_empty() {
        // LP format needs at least one term
        "0 x0".to_string()
    } else {
        terms.join(" ")
    }
}

/// Parse a CBC solution file written with `-printingOptions all`
pub fn parse_solution(text: &str, problem: &LpProblem) -> Result<Solution, SolverError> {
    let mut lines = text.lines();
    let header = lines
        .next()
        .ok_or_else(|| SolverError::MalformedOutput("empty solution file".to_string()))?;
    let status = parse_status(header);
    if status != SolutionStatus::Optimal {
        debug!(header, %status, "cbc reported non-optimal status");
        return Ok(Solution::without_point(status));
    }

    let n_vars = problem.num_variables();
    let n_rows = problem.num_constraints();
    let mut values = vec![0.0; n_vars];
    let mut duals = vec![0.0; n_rows];

    for line in lines {
        let mut tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() == Some(&"**") {
            tokens.remove(0);
        }
        if tokens.len() < 4 {
            continue;
        }
        let value = parse_number(tokens[2], line)?;
        let dual = parse_number(tokens[3], line)?;
        let name = tokens[1];

        if let Some(j) = positional(name, 'x').filter(|&j| j < n_vars) {
            values[j] = value;
        } else if let Some(i) = positional(name, 'c').filter(|&i| i < n_rows) {
            duals[i] = dual;
        }
    }

    let objective_value = problem.objective_value(&values);
    let analysis = if problem.has_integer_variables() {
        Analysis::empty()
    } else {
        let duals = oriented_duals(problem, &values, duals);
        let reduced: Vec<f64> = (0..n_vars)
            .map(|j| problem.objective.coefficients[j] - column_price(problem, &duals, j))
            .map(|rc| if rc.abs() < DUAL_TOLERANCE { 0.0 } else { rc })
            .collect();
        let shadow_prices: Vec<ShadowPrice> = problem
            .constraints
            .iter()
            .zip(&duals)
            .map(|(c, &value)| ShadowPrice {
                constraint: c.name.clone(),
                value,
            })
            .collect();
        let binding_constraints = shadow_prices
            .iter()
            .filter(|sp| sp.value != 0.0)
            .map(|sp| sp.constraint.clone())
            .collect();
        let reduced_costs = problem
            .variables
            .iter()
            .enumerate()
            .map(|(j, name)| ReducedCost {
                variable: name.clone(),
                value: values[j],
                reduced_cost: reduced[j],
                is_basic: values[j].abs() > DUAL_TOLERANCE && reduced[j] == 0.0,
            })
            .collect();
        Analysis {
            shadow_prices,
            reduced_costs,
            binding_constraints,
        }
    };

    Ok(Solution::optimal(values, objective_value, analysis))
}

/// `y . A_j`, the value of column `j` at the row prices `duals`
fn column_price(problem: &LpProblem, duals: &[f64], j: usize) -> f64 {
    problem
        .constraints
        .iter()
        .zip(duals)
        .map(|(c, y)| c.coefficients[j] * y)
        .sum()
}

/// Row duals as `d(objective)/d(rhs)` in the problem's own sense.
///
/// CBC's sign for a maximize model depends on how it negated the objective internally, so the
/// sign is taken from stationarity: every column strictly inside its bounds must price out at
/// `c_j = y . A_j`. Whichever orientation fits the basic columns better wins.
fn oriented_duals(problem: &LpProblem, values: &[f64], duals: Vec<f64>) -> Vec<f64> {
    let residual = |sign: f64| -> f64 {
        (0..problem.num_variables())
            .filter(|&j| values[j].abs() > DUAL_TOLERANCE)
            .map(|j| (problem.objective.coefficients[j] - sign * column_price(problem, &duals, j)).abs())
            .sum()
    };
    if residual(-1.0) < residual(1.0) {
        debug!("cbc duals reported in the opposite sense, flipping");
        duals.into_iter().map(|y| -y).collect()
    } else {
        duals
    }
}

fn parse_status(header: &str) -> SolutionStatus {
    let header = header.trim();
    if header.starts_with("Optimal") {
        SolutionStatus::Optimal
    } else if header.starts_with("Infeasible") || header.starts_with("Integer infeasible") {
        SolutionStatus::Infeasible
    } else if header.starts_with("Unbounded") {
        SolutionStatus::Unbounded
    } else if header.starts_with("Stopped on time") {
        SolutionStatus::TimeLimit
    } else if header.starts_with("Stopped on nodes") {
        SolutionStatus::NodeLimit
    } else if header.starts_with("Stopped on iterations") {
        SolutionStatus::IterationLimit
    } else {
        SolutionStatus::Error
    }
}

fn parse_number(token: &str, line: &str) -> Result<f64, SolverError> {
    token
        .parse::<f64>()
        .map_err(|_| SolverError::MalformedOutput(format!("bad number '{}' in line '{}'", token, line)))
}

fn positional(name: &str, prefix: char) -> Option<usize> {
    name.strip_prefix(prefix)?.parse().ok()
}
