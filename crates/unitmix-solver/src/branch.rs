//! Branch-and-bound over the integer variables of an [`LpProblem`].
//!
//! Open nodes are explored best bound first. Branching bounds live in per-variable
//! lower/upper vectors: lower bounds are shifted out of the rows and only a finite upper
//! bound costs a row. Both children of a node are solved as soon as it is branched, and the
//! objective loss per unit of rounding feeds pseudo-costs that pick the next branching
//! variable. A rounding dive supplies an early incumbent.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::problem::{ConstraintOp, LpProblem, VariableDomain};
use crate::simplex::Solver;
use crate::solution::{Analysis, Solution, SolutionStatus};

/// Dive again every this many nodes once an incumbent exists
const DIVE_INTERVAL: usize = 50;

/// Smallest objective improvement that keeps a node alive
const ABSOLUTE_GAP: f64 = 1e-6;

/// Floor for pseudo-cost products so a zero estimate cannot hide the other direction
const SCORE_FLOOR: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    /// x <= floor(value)
    Down,
    /// x >= ceil(value)
    Up,
}

impl Branch {
    fn opposite(self) -> Self {
        match self {
            Branch::Down => Branch::Up,
            Branch::Up => Branch::Down,
        }
    }

    /// How far `value` moves when rounded in this direction
    fn distance(self, value: f64) -> f64 {
        match self {
            Branch::Down => value - value.floor(),
            Branch::Up => value.ceil() - value,
        }
    }

    fn index(self) -> usize {
        match self {
            Branch::Down => 0,
            Branch::Up => 1,
        }
    }
}

/// Variable bounds in force at a node; every variable starts at `[0, inf)`
#[derive(Debug, Clone, PartialEq)]
struct NodeBounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl NodeBounds {
    fn root(n: usize) -> Self {
        Self {
            lower: vec![0.0; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    /// The bounds of the child on one side of `var = value`, or `None` if that side is empty
    fn branch(&self, var: usize, value: f64, branch: Branch) -> Option<Self> {
        let mut child = self.clone();
        match branch {
            Branch::Down => child.upper[var] = child.upper[var].min(value.floor()),
            Branch::Up => child.lower[var] = child.lower[var].max(value.ceil()),
        }
        (child.lower[var] <= child.upper[var]).then_some(child)
    }

    fn is_root(&self) -> bool {
        self.lower.iter().all(|&lo| lo == 0.0) && self.upper.iter().all(|hi| hi.is_infinite())
    }
}

/// An optimal node relaxation, in the original variables
#[derive(Debug, Clone)]
struct Relaxation {
    values: Vec<f64>,
    objective: f64,
}

enum NodeOutcome {
    Solved(Relaxation),
    Infeasible,
    Unbounded,
    Stopped(SolutionStatus),
}

/// A solved node waiting to be branched
#[derive(Debug)]
struct OpenNode {
    /// Relaxation objective, oriented so larger is better
    bound: f64,
    depth: usize,
    seq: usize,
    bounds: NodeBounds,
    values: Vec<f64>,
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenNode {}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    // Max-heap: best bound, then deepest, then oldest
    fn cmp(&self, other: &Self) -> Ordering {
        self.bound
            .total_cmp(&other.bound)
            .then(self.depth.cmp(&other.depth))
            .then(other.seq.cmp(&self.seq))
    }
}

/// Best integer point so far, objective oriented so larger is better
#[derive(Debug, Clone)]
struct Incumbent {
    values: Vec<f64>,
    objective: f64,
}

/// Average objective loss per unit of rounding, per variable and direction
#[derive(Debug, Clone)]
struct PseudoCosts {
    sums: Vec<[f64; 2]>,
    counts: Vec<[usize; 2]>,
}

impl PseudoCosts {
    fn new(n: usize) -> Self {
        Self {
            sums: vec![[0.0; 2]; n],
            counts: vec![[0; 2]; n],
        }
    }

    fn record(&mut self, var: usize, branch: Branch, degradation: f64) {
        self.sums[var][branch.index()] += degradation;
        self.counts[var][branch.index()] += 1;
    }

    /// Mean over the variables that have been branched in this direction, or 1 if none has
    fn average(&self, branch: Branch) -> f64 {
        let d = branch.index();
        let (total, seen) = self
            .sums
            .iter()
            .zip(&self.counts)
            .filter(|(_, counts)| counts[d] > 0)
            .fold((0.0, 0usize), |(total, seen), (sums, counts)| {
                (total + sums[d] / counts[d] as f64, seen + 1)
            });
        if seen == 0 { 1.0 } else { total / seen as f64 }
    }

    fn estimate(&self, var: usize, branch: Branch, fallback: f64) -> f64 {
        let d = branch.index();
        match self.counts[var][d] {
            0 => fallback,
            count => self.sums[var][d] / count as f64,
        }
    }

    /// The candidate whose weaker branch is expected to lose the most objective.
    /// Ties go to the earliest candidate.
    fn select(&self, candidates: &[(usize, f64)]) -> Option<(usize, f64)> {
        let down_avg = self.average(Branch::Down);
        let up_avg = self.average(Branch::Up);

        let mut best: Option<((usize, f64), f64)> = None;
        for &(var, value) in candidates {
            let down = self.estimate(var, Branch::Down, down_avg) * Branch::Down.distance(value);
            let up = self.estimate(var, Branch::Up, up_avg) * Branch::Up.distance(value);
            let score = down.min(up).max(SCORE_FLOOR) * down.max(up).max(SCORE_FLOOR);
            if best.is_none_or(|(_, s)| score > s) {
                best = Some(((var, value), score));
            }
        }
        best.map(|(candidate, _)| candidate)
    }
}

/// Best-bound branch-and-bound MILP solver built on the simplex [`Solver`].
///
/// Continuous problems are handed straight to the simplex and keep their dual analysis;
/// integer solutions never carry duals. A node is pruned when its relaxation cannot beat the
/// incumbent by more than the relative gap (default `1e-6`).
#[derive(Debug, Clone)]
pub struct BranchAndBound {
    lp: Solver,
    /// Maximum number of nodes to explore
    max_nodes: usize,
    /// Tolerance for integer feasibility
    int_tol: f64,
    /// Relative optimality gap at which a node is pruned
    rel_gap: f64,
    /// Optional wall-clock budget for the whole search
    time_limit: Option<Duration>,
}

impl Default for BranchAndBound {
    fn default() -> Self {
        Self {
            lp: Solver::default(),
            max_nodes: 10000,
            int_tol: 1e-6,
            rel_gap: 1e-6,
            time_limit: None,
        }
    }
}

impl BranchAndBound {
    pub fn new(lp: Solver) -> Self {
        Self {
            lp,
            ..Self::default()
        }
    }

    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn with_int_tolerance(mut self, tol: f64) -> Self {
        self.int_tol = tol;
        self
    }

    pub fn with_relative_gap(mut self, gap: f64) -> Self {
        self.rel_gap = gap;
        self
    }

    pub fn with_time_limit(mut self, limit: Option<Duration>) -> Self {
        self.time_limit = limit;
        self
    }

    pub fn lp_solver(&self) -> &Solver {
        &self.lp
    }

    pub fn solve(&self, problem: &LpProblem) -> Solution {
        if !problem.has_integer_variables() {
            return self.lp.solve(problem);
        }

        let started = Instant::now();
        let deadline = self.time_limit.and_then(|limit| started.checked_add(limit));
        // Compare objectives as if maximizing
        let sense = if problem.objective.minimize { -1.0 } else { 1.0 };
        let integer_count = problem
            .domains
            .iter()
            .filter(|d| **d == VariableDomain::Integer)
            .count();

        let root_bounds = NodeBounds::root(problem.num_variables());
        let root = match self.solve_node(problem, &root_bounds) {
            NodeOutcome::Solved(relaxation) => relaxation,
            NodeOutcome::Infeasible => return Solution { nodes: 1, ..Solution::infeasible() },
            // An unbounded root relaxation leaves the integer problem unbounded or infeasible
            NodeOutcome::Unbounded => return Solution { nodes: 1, ..Solution::unbounded() },
            NodeOutcome::Stopped(status) => {
                return Solution { nodes: 1, ..Solution::without_point(status) };
            }
        };

        let mut open = BinaryHeap::new();
        let mut seq = 0;
        open.push(OpenNode {
            bound: sense * root.objective,
            depth: 0,
            seq,
            bounds: root_bounds,
            values: root.values,
        });

        let mut incumbent: Option<Incumbent> = None;
        let mut costs = PseudoCosts::new(problem.num_variables());
        let mut nodes = 0;

        while let Some(node) = open.pop() {
            if self.pruned(node.bound, incumbent.as_ref()) {
                continue;
            }
            if nodes >= self.max_nodes {
                warn!(nodes, open = open.len() + 1, "branch-and-bound node limit reached");
                return self.stopped(SolutionStatus::NodeLimit, incumbent, problem, nodes);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(nodes, open = open.len() + 1, "branch-and-bound time limit reached");
                return self.stopped(SolutionStatus::TimeLimit, incumbent, problem, nodes);
            }
            nodes += 1;

            let fractional = self.fractional(problem, &node.values);
            if fractional.is_empty() {
                debug!(nodes, depth = node.depth, objective = sense * node.bound, "new incumbent");
                incumbent = Some(Incumbent {
                    values: node.values,
                    objective: node.bound,
                });
                continue;
            }

            if incumbent.is_none() || nodes % DIVE_INTERVAL == 1 {
                if let Some(values) = self.dive(problem, &node, 3 * integer_count, deadline) {
                    let objective = sense * problem.objective_value(&values);
                    if incumbent.as_ref().is_none_or(|best| objective > best.objective) {
                        debug!(nodes, objective = sense * objective, "incumbent from dive");
                        incumbent = Some(Incumbent { values, objective });
                    }
                }
            }

            let Some((var, value)) = costs.select(&fractional) else {
                continue;
            };
            trace!(nodes, var = %problem.variables[var], value, "branching");

            for branch in [Branch::Down, Branch::Up] {
                let Some(bounds) = node.bounds.branch(var, value, branch) else {
                    continue;
                };
                match self.solve_node(problem, &bounds) {
                    NodeOutcome::Solved(child) => {
                        let bound = sense * child.objective;
                        let distance = branch.distance(value).max(self.int_tol);
                        costs.record(var, branch, (node.bound - bound).max(0.0) / distance);
                        if !self.pruned(bound, incumbent.as_ref()) {
                            seq += 1;
                            open.push(OpenNode {
                                bound,
                                depth: node.depth + 1,
                                seq,
                                bounds,
                                values: child.values,
                            });
                        }
                    }
                    NodeOutcome::Infeasible | NodeOutcome::Unbounded => {}
                    NodeOutcome::Stopped(status) => {
                        warn!(nodes, %status, "node relaxation stopped early");
                        return self.stopped(status, incumbent, problem, nodes);
                    }
                }
            }
        }

        debug!(nodes, found = incumbent.is_some(), elapsed = ?started.elapsed(), "branch-and-bound finished");
        match incumbent {
            Some(best) => self.finish(best.values, problem, nodes),
            None => Solution { nodes, ..Solution::infeasible() },
        }
    }

    /// Solve the relaxation of `problem` under `bounds`.
    ///
    /// The LP is posed over `y = x - lower`, so lower bounds only move the right-hand sides
    /// and a row is added per finite upper bound.
    fn solve_node(&self, problem: &LpProblem, bounds: &NodeBounds) -> NodeOutcome {
        let mut shifted = problem.relaxed();
        if !bounds.is_root() {
            for row in &mut shifted.constraints {
                let offset = problem.evaluate_row(row, &bounds.lower);
                row.rhs -= offset;
            }
            let n = problem.num_variables();
            for (var, (&lo, &hi)) in bounds.lower.iter().zip(&bounds.upper).enumerate() {
                if hi.is_finite() {
                    let mut coeffs = vec![0.0; n];
                    coeffs[var] = 1.0;
                    shifted.add_constraint(format!("{}_upper", problem.variables[var]), coeffs, ConstraintOp::Le, hi - lo);
                }
            }
        }

        let solution = self.lp.solve(&shifted);
        match solution.status {
            SolutionStatus::Optimal => {
                let values: Vec<f64> = solution
                    .values
                    .iter()
                    .zip(&bounds.lower)
                    .map(|(y, lo)| y + lo)
                    .collect();
                let objective = problem.objective_value(&values);
                NodeOutcome::Solved(Relaxation { values, objective })
            }
            SolutionStatus::Infeasible => NodeOutcome::Infeasible,
            SolutionStatus::Unbounded => NodeOutcome::Unbounded,
            status => NodeOutcome::Stopped(status),
        }
    }

    /// Round the variable nearest an integer, re-solve, and repeat until the point is integral.
    /// When rounding one way is infeasible the other way is tried; if both fail the dive ends.
    fn dive(&self, problem: &LpProblem, node: &OpenNode, max_steps: usize, deadline: Option<Instant>) -> Option<Vec<f64>> {
        let mut bounds = node.bounds.clone();
        let mut values = node.values.clone();

        for _ in 0..max_steps {
            let fractional = self.fractional(problem, &values);
            let Some((var, value)) = fractional
                .iter()
                .copied()
                .min_by(|a, b| (a.1 - a.1.round()).abs().total_cmp(&(b.1 - b.1.round()).abs()))
            else {
                return Some(values);
            };
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }

            let first = if value.round() > value { Branch::Up } else { Branch::Down };
            let mut moved = false;
            for branch in [first, first.opposite()] {
                let Some(next) = bounds.branch(var, value, branch) else {
                    continue;
                };
                if let NodeOutcome::Solved(relaxation) = self.solve_node(problem, &next) {
                    bounds = next;
                    values = relaxation.values;
                    moved = true;
                    break;
                }
            }
            if !moved {
                return None;
            }
        }

        self.fractional(problem, &values).is_empty().then_some(values)
    }

    /// Integer variables whose value is not integral, in variable order
    fn fractional(&self, problem: &LpProblem, values: &[f64]) -> Vec<(usize, f64)> {
        problem
            .domains
            .iter()
            .zip(values)
            .enumerate()
            .filter(|(_, (domain, value))| {
                **domain == VariableDomain::Integer && (**value - value.round()).abs() > self.int_tol
            })
            .map(|(j, (_, &value))| (j, value))
            .collect()
    }

    fn pruned(&self, bound: f64, incumbent: Option<&Incumbent>) -> bool {
        incumbent.is_some_and(|best| {
            bound <= best.objective + (self.rel_gap * best.objective.abs()).max(ABSOLUTE_GAP)
        })
    }

    fn finish(&self, mut values: Vec<f64>, problem: &LpProblem, nodes: usize) -> Solution {
        for (value, domain) in values.iter_mut().zip(&problem.domains) {
            if *domain == VariableDomain::Integer {
                *value = value.round();
            }
        }
        let objective_value = problem.objective_value(&values);
        Solution {
            nodes,
            ..Solution::optimal(values, objective_value, Analysis::empty())
        }
    }

    /// A search cut short by a budget keeps its best point but is never reported optimal
    fn stopped(
        &self,
        status: SolutionStatus,
        incumbent: Option<Incumbent>,
        problem: &LpProblem,
        nodes: usize,
    ) -> Solution {
        let mut solution = Solution::without_point(status);
        solution.nodes = nodes;
        if let Some(best) = incumbent {
            solution.objective_value = problem.objective_value(&best.values);
            solution.values = best.values;
        }
        solution
    }
}
