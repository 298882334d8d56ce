//! Residential unit-mix optimization.
//!
//! A [`ProjectInput`] is turned into market and affordable unit records, formulated as a
//! mixed-integer program maximizing worst-case annual profit, solved, and summarized. The
//! continuous relaxation of the same program can then be solved for shadow prices, reduced
//! costs and a precision ratio.

pub mod config;
pub mod derive;
mod error;
pub mod extract;
pub mod gateway;
pub mod input;
pub mod model;
mod optimizer;
pub mod sensitivity;

pub use config::{BackendKind, MissingAmiPolicy, OptimizerConfig, SolverSettings};
pub use derive::{DerivedMetricsCalculator, DerivedUnitPair, DerivedUnitRecord, Tenure, UnitTypeId};
pub use error::{InputError, OptimizeError, RunKind};
pub use extract::{ResultExtractor, SolutionSummary, UnitAllocation};
pub use gateway::{DualReport, SolvedModel, SolverGateway};
pub use input::{AmiSchedule, PolicyParameters, ProjectInput, UnitTypeSpec};
pub use model::{ModelBuilder, OptimizationModel};
pub use optimizer::UnitMixOptimizer;
pub use sensitivity::{SensitivityAnalyzer, SensitivityReport, precision_ratio};
