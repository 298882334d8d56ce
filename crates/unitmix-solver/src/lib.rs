mod backend;
mod branch;
pub mod cbc;
mod problem;
mod simplex;
mod solution;

pub use backend::{Backend, BuiltinBackend, SolverError};
pub use branch::BranchAndBound;
pub use cbc::CbcCommand;
pub use problem::{Constraint, ConstraintOp, LpProblem, Objective, VariableDomain};
pub use simplex::Solver;
pub use solution::{Analysis, ConstraintViolation, ReducedCost, ShadowPrice, Solution, SolutionStatus};
