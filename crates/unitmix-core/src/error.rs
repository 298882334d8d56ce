use thiserror::Error;
use unitmix_solver::{ConstraintViolation, SolutionStatus, VariableDomain};

/// Which of the two solves of an optimization a result or failure belongs to
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// The integer program that produces the unit mix
    Integer,
    /// The continuous relaxation used for sensitivity analysis
    Relaxed,
}

impl RunKind {
    pub fn domain(self) -> VariableDomain {
        match self {
            RunKind::Integer => VariableDomain::Integer,
            RunKind::Relaxed => VariableDomain::Continuous,
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunKind::Integer => write!(f, "integer"),
            RunKind::Relaxed => write!(f, "relaxed"),
        }
    }
}

/// The input payload is not internally consistent
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("No unit types supplied")]
    NoUnitTypes,
    #[error("Duplicate unit type: {0}")]
    DuplicateUnitType(String),
    #[error("Unit type '{unit_type}' has minimum occupancy {household_size} but the AMI schedule has no entry for it")]
    MissingAmiEntry { unit_type: String, household_size: u32 },
}

#[derive(Error, Debug)]
pub enum OptimizeError {
    #[error("Input inconsistency: {0}")]
    Input(#[from] InputError),
    #[error(
        "The {run} model is infeasible (net residential area {net_residential_area} sq ft, set-aside {set_aside_percent}%): {reason}"
    )]
    Infeasible {
        run: RunKind,
        reason: String,
        violations: Vec<ConstraintViolation>,
        net_residential_area: f64,
        set_aside_percent: f64,
    },
    #[error("The {run} model is unbounded")]
    Unbounded { run: RunKind },
    #[error("Solver unavailable for the {run} run: {reason}")]
    SolverUnavailable { run: RunKind, reason: String },
    #[error("The {run} solve stopped on its {status} before proving optimality")]
    SolverTimeout { run: RunKind, status: SolutionStatus },
    #[error("The {run} solve failed: {reason}")]
    SolverFailed { run: RunKind, reason: String },
}

impl OptimizeError {
    /// The run that failed, when the failure came from solving
    pub fn run(&self) -> Option<RunKind> {
        match self {
            OptimizeError::Input(_) => None,
            OptimizeError::Infeasible { run, .. }
            | OptimizeError::Unbounded { run }
            | OptimizeError::SolverUnavailable { run, .. }
            | OptimizeError::SolverTimeout { run, .. }
            | OptimizeError::SolverFailed { run, .. } => Some(*run),
        }
    }
}
