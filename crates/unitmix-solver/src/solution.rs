/// The result of solving an LP or MILP problem
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Solution {
    /// Solution status
    pub status: SolutionStatus,
    /// Optimal values for each variable (empty unless a point is available)
    pub values: Vec<f64>,
    /// Optimal objective value
    pub objective_value: f64,
    /// Dual analysis; only populated for continuous problems solved to optimality
    pub analysis: Analysis,
    /// Constraint violations (populated when infeasible)
    pub violations: Vec<ConstraintViolation>,
    /// Branch-and-bound nodes explored (zero for pure LP solves)
    pub nodes: usize,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolutionStatus {
    /// An optimal solution was found
    Optimal,
    /// The problem is infeasible (no solution exists)
    Infeasible,
    /// The problem is unbounded
    Unbounded,
    /// The simplex iteration budget ran out before optimality was proven
    IterationLimit,
    /// Branch-and-bound exhausted its node budget
    NodeLimit,
    /// The wall-clock limit was reached
    TimeLimit,
    /// Solver encountered an error
    Error,
}

impl SolutionStatus {
    pub fn is_optimal(self) -> bool {
        self == SolutionStatus::Optimal
    }

    /// Whether the solve stopped on a work or time budget rather than a proof
    pub fn is_limit(self) -> bool {
        matches!(
            self,
            SolutionStatus::IterationLimit | SolutionStatus::NodeLimit | SolutionStatus::TimeLimit
        )
    }
}

impl std::fmt::Display for SolutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SolutionStatus::Optimal => "optimal",
            SolutionStatus::Infeasible => "infeasible",
            SolutionStatus::Unbounded => "unbounded",
            SolutionStatus::IterationLimit => "iteration limit",
            SolutionStatus::NodeLimit => "node limit",
            SolutionStatus::TimeLimit => "time limit",
            SolutionStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Dual information at the optimum of a continuous problem
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    /// Shadow prices (dual values) for each constraint, in constraint order.
    /// Change in the optimal objective per unit increase of the right-hand side.
    pub shadow_prices: Vec<ShadowPrice>,

    /// Reduced costs for each variable, in variable order.
    /// For non-basic variables, how much the objective coefficient must improve
    /// before the variable enters the solution.
    pub reduced_costs: Vec<ReducedCost>,

    /// Which constraints are binding (non-zero dual) at optimum
    pub binding_constraints: Vec<String>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct ShadowPrice {
    /// Constraint name
    pub constraint: String,
    /// Shadow price value
    pub value: f64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct ReducedCost {
    /// Variable name
    pub variable: String,
    /// Current value in solution
    pub value: f64,
    /// Reduced cost
    pub reduced_cost: f64,
    /// Is this variable in the basis?
    pub is_basic: bool,
}

/// Information about a violated constraint
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct ConstraintViolation {
    /// Constraint name
    pub constraint: String,
    /// Required value (from constraint RHS)
    pub required: f64,
    /// Actual value achieved
    pub actual: f64,
    /// How much the constraint is violated by
    pub violation_amount: f64,
    /// Human-readable description of what's wrong
    pub description: String,
}

impl Solution {
    pub fn optimal(values: Vec<f64>, objective_value: f64, analysis: Analysis) -> Self {
        Self {
            status: SolutionStatus::Optimal,
            values,
            objective_value,
            analysis,
            violations: Vec::new(),
            nodes: 0,
        }
    }

    /// A terminal non-optimal outcome with no usable point
    pub fn without_point(status: SolutionStatus) -> Self {
        let objective_value = match status {
            SolutionStatus::Unbounded => f64::NEG_INFINITY,
            _ => f64::INFINITY,
        };
        Self {
            status,
            values: Vec::new(),
            objective_value,
            analysis: Analysis::default(),
            violations: Vec::new(),
            nodes: 0,
        }
    }

    pub fn infeasible() -> Self {
        Self::without_point(SolutionStatus::Infeasible)
    }

    pub fn unbounded() -> Self {
        Self::without_point(SolutionStatus::Unbounded)
    }
}

impl Analysis {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.shadow_prices.is_empty() && self.reduced_costs.is_empty()
    }

    pub fn shadow_price(&self, constraint: &str) -> Option<f64> {
        self.shadow_prices
            .iter()
            .find(|sp| sp.constraint == constraint)
            .map(|sp| sp.value)
    }

    pub fn reduced_cost(&self, variable: &str) -> Option<f64> {
        self.reduced_costs
            .iter()
            .find(|rc| rc.variable == variable)
            .map(|rc| rc.reduced_cost)
    }
}
