/// Represents a linear (or mixed-integer linear) programming problem.
///
/// All variables are implicitly bounded below by zero.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct LpProblem {
    /// Variable names
    pub variables: Vec<String>,
    /// Domain of each variable, parallel to `variables`
    pub domains: Vec<VariableDomain>,
    /// Objective function coefficients
    pub objective: Objective,
    /// Constraints
    pub constraints: Vec<Constraint>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Objective {
    /// Coefficients for each variable
    pub coefficients: Vec<f64>,
    /// Whether to minimize or maximize
    pub minimize: bool,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Constraint {
    /// Name/label for the constraint (for diagnostics and dual reporting)
    pub name: String,
    /// Coefficients for each variable
    pub coefficients: Vec<f64>,
    /// Comparison operator
    pub op: ConstraintOp,
    /// Right-hand side value
    pub rhs: f64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    /// Less than or equal (<=)
    Le,
    /// Greater than or equal (>=)
    Ge,
    /// Equal (=)
    Eq,
}

/// Value domain of a decision variable
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariableDomain {
    #[default]
    Continuous,
    Integer,
}

impl std::fmt::Display for VariableDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VariableDomain::Continuous => write!(f, "continuous"),
            VariableDomain::Integer => write!(f, "integer"),
        }
    }
}

impl LpProblem {
    pub fn new(variables: Vec<String>) -> Self {
        let n = variables.len();
        Self {
            variables,
            domains: vec![VariableDomain::Continuous; n],
            objective: Objective {
                coefficients: vec![0.0; n],
                minimize: true,
            },
            constraints: Vec::new(),
        }
    }

    /// Create a problem whose variables all share one domain
    pub fn with_domain(variables: Vec<String>, domain: VariableDomain) -> Self {
        let mut problem = Self::new(variables);
        problem.domains.fill(domain);
        problem
    }

    pub fn set_objective(&mut self, coefficients: Vec<f64>, minimize: bool) {
        self.objective = Objective { coefficients, minimize };
    }

    pub fn add_constraint(&mut self, name: impl Into<String>, coefficients: Vec<f64>, op: ConstraintOp, rhs: f64) {
        self.constraints.push(Constraint {
            name: name.into(),
            coefficients,
            op,
            rhs,
        });
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn has_integer_variables(&self) -> bool {
        self.domains.iter().any(|d| *d == VariableDomain::Integer)
    }

    /// The same problem with every variable continuous
    pub fn relaxed(&self) -> Self {
        let mut relaxed = self.clone();
        relaxed.domains.fill(VariableDomain::Continuous);
        relaxed
    }

    /// Left-hand side of a constraint at the given point
    pub fn evaluate_row(&self, constraint: &Constraint, values: &[f64]) -> f64 {
        constraint
            .coefficients
            .iter()
            .zip(values)
            .map(|(coef, value)| coef * value)
            .sum()
    }

    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.objective
            .coefficients
            .iter()
            .zip(values)
            .map(|(coef, value)| coef * value)
            .sum()
    }
}
