mod logging;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use unitmix_core::{
    BackendKind, DerivedMetricsCalculator, DerivedUnitPair, MissingAmiPolicy, OptimizeError,
    OptimizerConfig, ProjectInput, SensitivityReport, SolutionSummary, UnitMixOptimizer,
};

#[derive(Parser)]
#[command(name = "unitmix")]
#[command(about = "Optimal market/affordable residential unit mix for a parcel", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON solver/optimizer configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Solver backend
    #[arg(long, global = true, value_enum)]
    solver: Option<SolverChoice>,

    /// Path to the cbc executable (implies --solver cbc)
    #[arg(long, global = true)]
    cbc_path: Option<PathBuf>,

    /// Wall-clock limit per solve, in seconds
    #[arg(long, global = true)]
    time_limit: Option<f64>,

    /// Branch-and-bound node limit
    #[arg(long, global = true)]
    node_limit: Option<usize>,

    /// Policy for unit types whose occupancy has no AMI entry (reject, zero)
    #[arg(long, global = true)]
    missing_ami: Option<MissingAmiPolicy>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a project payload for consistency
    Check {
        /// The JSON project file
        file: PathBuf,
    },
    /// Print the derived market and affordable unit records
    Derive {
        /// The JSON project file
        file: PathBuf,
        #[arg(short, long, value_enum, default_value = "pretty")]
        format: OutputFormat,
    },
    /// Solve for the optimal unit mix
    Solve {
        /// The JSON project file
        file: PathBuf,
        /// Also solve the continuous relaxation for shadow prices and reduced costs
        #[arg(short, long)]
        sensitivity: bool,
        #[arg(short, long, value_enum, default_value = "pretty")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SolverChoice {
    Builtin,
    Cbc,
}

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {}", e);
            std::process::exit(1);
        }
    };

    match &cli.command {
        Commands::Check { file } => {
            let input = read_project(file);
            let missing = input.missing_household_sizes();
            let derived = DerivedMetricsCalculator::new(&input.ami, config.missing_ami).derive(&input.unit_types);

            match derived {
                Ok(pairs) => {
                    println!("✓ {} is valid", file.display());
                    println!("  {} unit types ({} records)", pairs.len(), 2 * pairs.len());
                    println!("  {} AMI household sizes", input.ami.incomes.len());
                    println!("  net residential area {} sq ft", input.net_residential_area);
                    if !missing.is_empty() {
                        println!("  household sizes priced at zero income: {:?}", missing);
                    }
                }
                Err(e) => {
                    eprintln!("✗ {} has errors:", file.display());
                    eprintln!("  {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Derive { file, format } => {
            let input = read_project(file);
            let pairs = match DerivedMetricsCalculator::new(&input.ami, config.missing_ami).derive(&input.unit_types) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("Input error: {}", e);
                    std::process::exit(1);
                }
            };

            match format {
                OutputFormat::Json => print_json(&pairs),
                OutputFormat::Pretty => print_derived(&pairs),
            }
        }
        Commands::Solve {
            file,
            sensitivity,
            format,
        } => {
            let input = read_project(file);
            let optimizer = match UnitMixOptimizer::new(&input, &config) {
                Ok(o) => o,
                Err(e) => exit_with(&e),
            };

            let summary = match optimizer.optimize() {
                Ok(s) => s,
                Err(e) => exit_with(&e),
            };

            let report = if *sensitivity {
                match optimizer.sensitivity(&summary) {
                    Ok(r) => Some(r),
                    Err(e) => exit_with(&e),
                }
            } else {
                None
            };

            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "solution": summary,
                    "sensitivity": report,
                })),
                OutputFormat::Pretty => {
                    print_summary(&summary, input.net_residential_area);
                    if let Some(ref report) = report {
                        println!();
                        print_sensitivity(report);
                    }
                }
            }
        }
    }
}

fn load_config(cli: &Cli) -> Result<OptimizerConfig, String> {
    let mut config = match &cli.config {
        Some(path) => read_json::<OptimizerConfig>(path)?,
        None => OptimizerConfig::default(),
    };

    match (cli.solver, &cli.cbc_path) {
        (Some(SolverChoice::Builtin), _) => config.solver.backend = BackendKind::Builtin,
        (_, Some(path)) => {
            config.solver.backend = BackendKind::Cbc { path: path.clone() };
        }
        (Some(SolverChoice::Cbc), None) => {
            if !matches!(config.solver.backend, BackendKind::Cbc { .. }) {
                config.solver.backend = BackendKind::Cbc {
                    path: PathBuf::from("cbc"),
                };
            }
        }
        (None, None) => {}
    }
    if let Some(secs) = cli.time_limit {
        config.solver.time_limit_secs = Some(secs);
    }
    if let Some(nodes) = cli.node_limit {
        config.solver.node_limit = nodes;
    }
    if let Some(policy) = cli.missing_ami {
        config.missing_ami = policy;
    }

    tracing::debug!(?config, "effective configuration");
    Ok(config)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let source = std::fs::read_to_string(path).map_err(|e| format!("reading {}: {}", path.display(), e))?;
    serde_json::from_str(&source).map_err(|e| format!("parsing {}: {}", path.display(), e))
}

fn read_project(file: &Path) -> ProjectInput {
    match read_json(file) {
        Ok(input) => input,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => {
            eprintln!("Error encoding JSON: {}", e);
            std::process::exit(1);
        }
    }
}

fn exit_with(err: &OptimizeError) -> ! {
    eprintln!("Error: {}", err);
    if let OptimizeError::Infeasible { violations, .. } = err {
        if !violations.is_empty() {
            eprintln!();
            eprintln!("Violated constraints:");
            for v in violations {
                eprintln!("  {:30} {}", v.constraint, v.description);
            }
        }
    }
    std::process::exit(1);
}

fn print_derived(pairs: &[DerivedUnitPair]) {
    println!(
        "{:20} {:>8} {:>10} {:>10} {:>10} {:>10} {:>12}",
        "Unit", "Sq ft", "Rent", "Sq ft cost", "Rent cost", "Worst cost", "Min salary"
    );
    for pair in pairs {
        for record in pair.records() {
            println!(
                "{:20} {:8.0} {:10.2} {:10.2} {:10.2} {:10.2} {:12.2}",
                record.label,
                record.square_feet,
                record.monthly_rent,
                record.square_foot_cost,
                record.rent_based_cost,
                record.worst_case_cost,
                record.min_annual_salary
            );
        }
    }
}

fn print_summary(summary: &SolutionSummary, net_residential_area: f64) {
    println!("Status: OPTIMAL ({} run)", summary.run);
    println!();
    println!("Unit mix:");
    for a in &summary.allocations {
        println!(
            "  {:20} {:10.2} units   min salary {:12.2}",
            a.label, a.units, a.min_annual_salary
        );
    }
    println!();
    println!("Total units:               {:.2}", summary.total_units);
    println!(
        "Land used:                 {:.2} of {:.2} sq ft ({:.2}%)",
        summary.total_land_used, net_residential_area, summary.land_utilization_rate
    );
    println!("Annual revenue:            {:.2}", summary.annual_revenue);
    println!("Worst-case annual profit:  {:.2}", summary.worst_case_annual_profit);
    println!("Best-case annual profit:   {:.2}", summary.best_case_annual_profit);
}

fn print_sensitivity(report: &SensitivityReport) {
    println!("Sensitivity (continuous relaxation):");
    println!();
    for a in &report.relaxed.allocations {
        println!("  {:20} {:10.4} units", a.label, a.units);
    }
    println!("  Total units:              {:.4}", report.relaxed.total_units);
    println!("  Land utilization:         {:.2}%", report.relaxed.land_utilization_rate);
    println!("  Worst-case annual profit: {:.2}", report.relaxed.worst_case_annual_profit);
    println!("  Best-case annual profit:  {:.2}", report.relaxed.best_case_annual_profit);
    println!("  Precision:                {:.2}%", report.precision);
    println!();

    println!("Shadow prices:");
    for sp in &report.shadow_prices {
        println!("  {:30} {:14.4}", sp.constraint, sp.value);
    }
    println!();

    println!("Reduced costs:");
    for rc in &report.reduced_costs {
        println!("  {:30} {:14.4}", rc.variable, rc.reduced_cost);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitmix_core::{RunKind, Tenure};

    const PARCEL: &str = include_str!("../../../demos/parcel.json");

    fn assert_mix_holds(input: &ProjectInput, optimizer: &UnitMixOptimizer, summary: &SolutionSummary) {
        let area = input.net_residential_area;
        let total = summary.total_units;
        let sum: f64 = summary.allocations.iter().map(|a| a.units).sum();

        assert!((total - sum).abs() < 1e-6, "total {} vs sum {}", total, sum);
        assert!(summary.total_land_used <= area + 1e-6);
        assert!(summary.total_land_used >= 0.9 * area - 1e-6);
        assert!(summary.worst_case_annual_profit <= summary.best_case_annual_profit);

        for (pair, spec) in optimizer.derived().iter().zip(&input.unit_types) {
            let units = summary.units_of(pair.id);
            let affordable = summary.allocation(pair.id, Tenure::Affordable).unwrap().units;
            assert!(affordable >= input.set_aside_percent / 100.0 * units - 1e-6, "{} set-aside", pair.name);
            assert!(units >= spec.min_share_percent / 100.0 * total - 1e-6, "{} min share", pair.name);
            assert!(units <= spec.max_share_percent / 100.0 * total + 1e-6, "{} max share", pair.name);
        }
    }

    #[test]
    fn test_parcel_demo_solves_with_sensitivity() {
        let input: ProjectInput = serde_json::from_str(PARCEL).unwrap();
        assert_eq!(input.unit_types.len(), 3);
        assert!(input.missing_household_sizes().is_empty());

        let optimizer = UnitMixOptimizer::new(&input, &OptimizerConfig::default()).unwrap();
        let summary = optimizer.optimize().unwrap();
        assert_eq!(summary.run, RunKind::Integer);
        assert!(summary.allocations.iter().all(|a| a.units.fract() == 0.0));
        assert_mix_holds(&input, &optimizer, &summary);

        let report = optimizer.sensitivity(&summary).unwrap();
        assert_eq!(report.relaxed.run, RunKind::Relaxed);
        assert_mix_holds(&input, &optimizer, &report.relaxed);
        assert!(report.relaxed.objective_value >= summary.objective_value - 1e-6);
        assert!(report.shadow_prices.iter().any(|sp| sp.constraint == "land_max"));
        assert_eq!(report.reduced_costs.len(), 7);

        let encoded = serde_json::json!({ "solution": summary, "sensitivity": report });
        assert!(encoded["solution"]["total_units"].as_f64().is_some());
    }

    #[test]
    fn test_cbc_demo_config_loads() {
        let config: OptimizerConfig = serde_json::from_str(include_str!("../../../demos/cbc.json")).unwrap();
        assert!(matches!(config.solver.backend, BackendKind::Cbc { .. }));
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "unitmix",
            "solve",
            "parcel.json",
            "--cbc-path",
            "/usr/local/bin/cbc",
            "--node-limit",
            "250",
            "--missing-ami",
            "zero",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();

        assert_eq!(config.solver.backend, BackendKind::Cbc { path: PathBuf::from("/usr/local/bin/cbc") });
        assert_eq!(config.solver.node_limit, 250);
        assert_eq!(config.missing_ami, MissingAmiPolicy::Zero);
    }
}
