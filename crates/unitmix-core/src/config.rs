use std::path::PathBuf;
use std::time::Duration;

use unitmix_solver::{Backend, BranchAndBound, BuiltinBackend, CbcCommand, Solver};

/// What to do when a unit type's minimum occupancy has no AMI income
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingAmiPolicy {
    /// Fail with `InputError::MissingAmiEntry`
    #[default]
    Reject,
    /// Treat the income as zero, which prices the affordable unit at zero rent
    Zero,
}

impl std::str::FromStr for MissingAmiPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject" => Ok(MissingAmiPolicy::Reject),
            "zero" => Ok(MissingAmiPolicy::Zero),
            other => Err(format!("unknown missing-AMI policy '{}' (expected reject or zero)", other)),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "lowercase"))]
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BackendKind {
    /// In-process simplex and branch-and-bound
    #[default]
    Builtin,
    /// External COIN-OR CBC executable
    Cbc { path: PathBuf },
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSettings {
    pub backend: BackendKind,
    /// Simplex pivots per phase
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Branch-and-bound nodes
    pub node_limit: usize,
    /// Wall-clock budget per solve, in seconds
    pub time_limit_secs: Option<f64>,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Builtin,
            max_iterations: 10000,
            tolerance: 1e-9,
            node_limit: 10000,
            time_limit_secs: None,
        }
    }
}

impl SolverSettings {
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_node_limit(mut self, limit: usize) -> Self {
        self.node_limit = limit;
        self
    }

    pub fn with_time_limit_secs(mut self, secs: Option<f64>) -> Self {
        self.time_limit_secs = secs;
        self
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn build_backend(&self) -> Box<dyn Backend> {
        match &self.backend {
            BackendKind::Builtin => {
                let lp = Solver::new()
                    .with_max_iterations(self.max_iterations)
                    .with_tolerance(self.tolerance);
                let search = BranchAndBound::new(lp)
                    .with_max_nodes(self.node_limit)
                    .with_time_limit(self.time_limit());
                Box::new(BuiltinBackend::new(search))
            }
            BackendKind::Cbc { path } => Box::new(
                CbcCommand::new(path.clone())
                    .with_time_limit(self.time_limit())
                    .with_max_nodes(Some(self.node_limit)),
            ),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptimizerConfig {
    pub missing_ami: MissingAmiPolicy,
    pub solver: SolverSettings,
}

impl OptimizerConfig {
    pub fn with_missing_ami(mut self, policy: MissingAmiPolicy) -> Self {
        self.missing_ami = policy;
        self
    }

    pub fn with_solver(mut self, solver: SolverSettings) -> Self {
        self.solver = solver;
        self
    }
}
