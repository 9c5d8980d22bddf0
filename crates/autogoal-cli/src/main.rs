mod eval;
mod fixtures;
mod simulate;

use anyhow::{Context, Result};
use autogoal_core::AutonomyConfig;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("autogoal")
        .version(autogoal_core::VERSION)
        .about("Autonomous goal pipeline for L2 node operations")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand(
            Command::new("eval")
                .about("Run the end-to-end admission scenarios")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Drive generation ticks and dispatches against a simulated planner")
                .arg(
                    Arg::new("ticks")
                        .long("ticks")
                        .default_value("24")
                        .value_parser(value_parser!(u32))
                        .help("Number of generation ticks"),
                )
                .arg(
                    Arg::new("failure-every")
                        .long("failure-every")
                        .default_value("0")
                        .value_parser(value_parser!(u64))
                        .help("Fail every Nth plan execution (0 never fails)"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(config_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration")
                .arg(config_arg()),
        )
}

fn config_arg() -> Arg {
    Arg::new("file")
        .long("file")
        .value_parser(value_parser!(PathBuf))
        .help("Config file (.toml, .yaml or .yml)")
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &ArgMatches) -> Result<AutonomyConfig> {
    let path = args.get_one::<PathBuf>("file");
    AutonomyConfig::load(path.map(PathBuf::as_path)).context("failed to load configuration")
}

fn required<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing --{name}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("eval", args)) => {
            let report = eval::run().await?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.generate_text());
            }
            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("simulate", args)) => {
            let options = simulate::SimulationOptions {
                ticks: required(args, "ticks")?,
                failure_every: required(args, "failure-every")?,
                seed: required(args, "seed")?,
            };
            let config = load_config(args)?;
            let report = simulate::run(config, options).await?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.generate_text());
            }
        }
        Some(("config", args)) => {
            let config = load_config(args)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        _ => {
            cli().print_help()?;
        }
    }
    Ok(())
}
