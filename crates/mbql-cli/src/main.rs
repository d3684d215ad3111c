//! mbql - inspect MBQL dataset queries and custom expressions
//!
//! Usage:
//!   mbql check <expression> [--policy <policy>] [--json]
//!   mbql validate <query.json>
//!   mbql fingerprint <query.json>
//!   mbql drills <query.json> --click <click.json> [--stage <n>]
//!
//! Examples:
//!   mbql check 'CONCAT("a", 1e)'
//!   mbql validate saved/orders-by-month.json
//!   mbql drills saved/orders.json --click clicks/total-header.json

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mbql_drill::{BasicEngine, ClickContext, QueryEngine};
use mbql_expr::{check_source, DiagnosticPolicy, DiagnosticsPass};
use mbql_ir::validate::validate;
use mbql_ir::DatasetQuery;
use tracing::info;

mod config;
mod logging;

use config::Config;

#[derive(Parser)]
#[command(name = "mbql")]
#[command(about = "Inspect MBQL dataset queries and custom expressions")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./mbql.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run syntax diagnostics on a custom expression
    Check {
        /// Expression source text
        source: String,

        /// Override the configured diagnostics policy (collect-all, first-error)
        #[arg(long)]
        policy: Option<DiagnosticPolicy>,

        /// Print diagnostics as a JSON array instead of rendered text
        #[arg(long)]
        json: bool,
    },

    /// Decode a dataset query and report semantic issues
    Validate {
        /// Path to the dataset query JSON
        file: PathBuf,
    },

    /// Print the SHA-256 fingerprint of a dataset query
    Fingerprint {
        /// Path to the dataset query JSON
        file: PathBuf,
    },

    /// List the drill-throughs available for a click
    Drills {
        /// Path to the dataset query JSON
        file: PathBuf,

        /// Path to the click context JSON
        #[arg(long)]
        click: PathBuf,

        /// Stage the click refers to; negative values count from the last stage
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        stage: i32,

        /// Saved question the query belongs to
        #[arg(long)]
        card_id: Option<i64>,
    },
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match Config::discover(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.logging);

    let result = match cli.command {
        Commands::Check { source, policy, json } => {
            cmd_check(&source, policy.unwrap_or(config.diagnostics.policy), json)
        }
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Fingerprint { file } => cmd_fingerprint(&file),
        Commands::Drills {
            file,
            click,
            stage,
            card_id,
        } => cmd_drills(&file, &click, stage, card_id),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn read_query(file: &Path) -> Result<DatasetQuery> {
    let json = fs::read_to_string(file).with_context(|| format!("reading '{}'", file.display()))?;
    DatasetQuery::from_json_str(&json).with_context(|| format!("decoding '{}'", file.display()))
}

fn cmd_check(source: &str, policy: DiagnosticPolicy, json: bool) -> Result<ExitCode> {
    let pass = DiagnosticsPass::new(policy);
    let diagnostics = check_source(&pass, source)?;
    info!(%policy, count = diagnostics.len(), "Checked expression");

    if json {
        println!("{}", serde_json::to_string_pretty(&diagnostics)?);
    } else if diagnostics.is_empty() {
        println!("No problems found.");
    } else {
        for diagnostic in &diagnostics {
            println!("{}\n", diagnostic.render(source));
        }
    }

    if diagnostics.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn cmd_validate(file: &Path) -> Result<ExitCode> {
    let query = read_query(file)?;
    let issues = validate(&query);

    if issues.is_empty() {
        println!("{}: OK", file.display());
        return Ok(ExitCode::SUCCESS);
    }
    println!("{}: {} issue(s)", file.display(), issues.len());
    for issue in &issues {
        println!("  {}", issue);
    }
    Ok(ExitCode::FAILURE)
}

fn cmd_fingerprint(file: &Path) -> Result<ExitCode> {
    let query = read_query(file)?;
    println!("{}", query.fingerprint()?);
    Ok(ExitCode::SUCCESS)
}

fn cmd_drills(file: &Path, click: &Path, stage: i32, card_id: Option<i64>) -> Result<ExitCode> {
    let query = read_query(file)?;
    let click_json = fs::read_to_string(click).with_context(|| format!("reading '{}'", click.display()))?;
    let click: ClickContext =
        serde_json::from_str(&click_json).with_context(|| format!("decoding click context '{}'", click.display()))?;

    let drills = BasicEngine::new().available_drill_thrus(&query, stage, card_id, &click)?;
    println!("{}", serde_json::to_string_pretty(&drills)?);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_drills_with_negative_stage() {
        let cli = Cli::parse_from(["mbql", "drills", "q.json", "--click", "c.json", "--stage", "-2"]);
        match cli.command {
            Commands::Drills { stage, card_id, .. } => {
                assert_eq!(stage, -2);
                assert_eq!(card_id, None);
            }
            _ => panic!("expected drills"),
        }
    }

    #[test]
    fn test_parse_check_policy() {
        let cli = Cli::parse_from(["mbql", "check", "1e", "--policy", "first-error", "--json"]);
        match cli.command {
            Commands::Check { policy, json, .. } => {
                assert_eq!(policy, Some(DiagnosticPolicy::FirstError));
                assert!(json);
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn test_validate_and_fingerprint_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.json");
        fs::write(
            &path,
            r#"{"type": "query", "database": 1, "query": {"source-table": 2, "order-by": [["asc", ["aggregation", 0]]]}}"#,
        )
        .unwrap();

        assert_eq!(cmd_validate(&path).unwrap(), ExitCode::FAILURE);
        assert_eq!(cmd_fingerprint(&path).unwrap(), ExitCode::SUCCESS);

        fs::write(&path, r#"{"type": "query", "query": {"source-table": 2}}"#).unwrap();
        assert!(cmd_validate(&path).is_err());
    }

    #[test]
    fn test_check_exit_codes() {
        assert_eq!(cmd_check("1 + 2", DiagnosticPolicy::CollectAll, false).unwrap(), ExitCode::SUCCESS);
        assert_eq!(cmd_check(r#"CONCAT("a", 1e)"#, DiagnosticPolicy::CollectAll, false).unwrap(), ExitCode::FAILURE);
        assert_eq!(cmd_check("1e5e3", DiagnosticPolicy::CollectAll, true).unwrap(), ExitCode::FAILURE);
        assert_eq!(cmd_check("1 + 2", DiagnosticPolicy::CollectAll, true).unwrap(), ExitCode::SUCCESS);
    }

    #[test]
    fn test_diagnostics_json_shape() {
        let diagnostics = check_source(&DiagnosticsPass::default(), r#"CONCAT("a", 1e)"#).unwrap();
        assert_eq!(
            serde_json::to_value(&diagnostics).unwrap(),
            serde_json::json!([{"kind": "MissingExponent", "message": "Missing exponent", "start": 12, "end": 14}])
        );
    }
}
