use thiserror::Error;
use tracing::{info, warn};

use crate::branch::BranchAndBound;
use crate::problem::LpProblem;
use crate::solution::{Solution, SolutionStatus};

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Solver '{solver}' is unavailable: {reason}")]
    Unavailable { solver: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed solver output: {0}")]
    MalformedOutput(String),
}

/// Something that can take a fully specified problem to a terminal status.
///
/// Implementations block until the solve finishes. A returned [`Solution`] may carry any
/// status; only `Err` means the solver itself could not be run.
///
/// Duals of an optimal continuous solve are reported in the problem's own sense, whatever the
/// underlying solver uses: a shadow price is `d(objective)/d(rhs)` and a reduced cost is
/// `c_j - y . A_j`, zero for basic variables. A binding `<=` row of a maximize problem therefore
/// has a non-negative price.
pub trait Backend {
    fn name(&self) -> &'static str;

    fn solve(&self, problem: &LpProblem) -> Result<Solution, SolverError>;
}

/// In-process simplex and branch-and-bound
#[derive(Debug, Clone, Default)]
pub struct BuiltinBackend {
    search: BranchAndBound,
}

impl BuiltinBackend {
    pub fn new(search: BranchAndBound) -> Self {
        Self { search }
    }
}

impl Backend for BuiltinBackend {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn solve(&self, problem: &LpProblem) -> Result<Solution, SolverError> {
        info!(
            variables = problem.num_variables(),
            constraints = problem.num_constraints(),
            integer = problem.has_integer_variables(),
            "solving with builtin backend"
        );
        let mut solution = self.search.solve(problem);
        if solution.status == SolutionStatus::Infeasible {
            solution.violations = self.search.lp_solver().diagnose(problem);
            warn!(violations = solution.violations.len(), "problem is infeasible");
        }
        Ok(solution)
    }
}
