//! `dart` - run Commander missions from the terminal

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use dart_core::approval::{ApprovalRequest, Decision, FallbackPrompt};
use dart_core::evaluation::render_batch;
use dart_core::generation::TextGenerator;
use dart_core::prelude::*;
use dart_core::{load_alert, HttpGenerator, HttpToolGateway, HttpVendorEndpoint, InMemoryIncidentMemory};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Asks on the controlling terminal when no operator is subscribed
struct TerminalPrompt;

impl FallbackPrompt for TerminalPrompt {
    fn prompt(&self, request: &ApprovalRequest) -> Decision {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "\n[HITL] {} | {}", request.incident_id, request.reason);
        let _ = writeln!(stderr, "{}", request.plan);
        let _ = write!(stderr, "Approve? [y/N] ");
        let _ = stderr.flush();

        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(_) if matches!(line.trim().to_lowercase().as_str(), "y" | "yes") => Decision::Approve,
            _ => Decision::Deny,
        }
    }
}

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .long("config")
        .short('c')
        .value_parser(value_parser!(PathBuf))
        .help("Commander configuration (TOML)");
    let attempts_arg = Arg::new("max-attempts")
        .long("max-attempts")
        .value_parser(value_parser!(u32).range(1..))
        .help("Override the attempt budget");

    Command::new("dart")
        .version(dart_core::VERSION)
        .about("D.A.R.T. Commander - data incident remediation missions")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("run")
                .about("Run one mission for an alert file")
                .arg(
                    Arg::new("alert")
                        .long("alert")
                        .short('a')
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Alert or scenario file (YAML or JSON)"),
                )
                .arg(config_arg.clone())
                .arg(attempts_arg.clone())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the full mission report as JSON"),
                ),
        )
        .subcommand(
            Command::new("eval")
                .about("Run several alert files and print a batch dashboard")
                .arg(
                    Arg::new("alerts")
                        .required(true)
                        .num_args(1..)
                        .value_parser(value_parser!(PathBuf))
                        .help("Alert or scenario files"),
                )
                .arg(config_arg)
                .arg(attempts_arg),
        )
        .subcommand(Command::new("config").about("Print the default configuration as TOML"))
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &ArgMatches) -> Result<CommanderConfig> {
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => CommanderConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => CommanderConfig::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(max) = args.get_one::<u32>("max-attempts") {
        config.max_attempts = *max;
    }
    config.validate()?;
    Ok(config)
}

fn generators(config: &CommanderConfig) -> Result<GenerationChain> {
    let timeout = Duration::from_secs(config.generation.timeout_secs.unwrap_or(config.gateway.timeout_secs));
    let backends = config
        .generation
        .endpoints
        .iter()
        .map(|url| HttpGenerator::new(url.clone(), timeout).map(|g| Arc::new(g) as Arc<dyn TextGenerator>))
        .collect::<Result<Vec<_>, _>>()?;
    if backends.is_empty() {
        tracing::warn!("no generation endpoints configured; investigations will be inconclusive");
    }
    Ok(GenerationChain::new(backends))
}

struct Wiring {
    services: Services,
    memory: Arc<InMemoryIncidentMemory>,
}

fn wire(config: &CommanderConfig) -> Result<Wiring> {
    let gateway = HttpToolGateway::new(
        config.gateway.base_url.clone(),
        Duration::from_secs(config.gateway.timeout_secs),
    )?;
    let vendor = HttpVendorEndpoint::from_config(&config.vendor)?;
    let memory = Arc::new(match &config.memory_path {
        Some(path) => InMemoryIncidentMemory::load(path)
            .with_context(|| format!("failed to load memory {}", path.display()))?,
        None => InMemoryIncidentMemory::new(),
    });
    let broker = ApprovalBroker::with_fallback(
        Duration::from_secs(config.hitl_timeout_secs),
        Arc::new(TerminalPrompt),
    );

    Ok(Wiring {
        services: Services {
            gateway: Arc::new(gateway),
            vendor: Arc::new(vendor),
            generators: generators(config)?,
            memory: memory.clone(),
            gate: Arc::new(broker),
        },
        memory,
    })
}

fn persist(config: &CommanderConfig, memory: &InMemoryIncidentMemory) {
    if let Some(path) = &config.memory_path {
        match memory.save(path) {
            Ok(()) => tracing::info!(path = %path.display(), records = memory.len(), "memory saved"),
            Err(e) => tracing::error!(path = %path.display(), error = %e, "failed to save memory"),
        }
    }
}

fn scenario_label(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned())
}

async fn run(args: &ArgMatches) -> Result<bool> {
    let config = load_config(args)?;
    let path = args
        .get_one::<PathBuf>("alert")
        .context("--alert is required")?;
    let alert = load_alert(path).with_context(|| format!("failed to load alert {}", path.display()))?;
    let wiring = wire(&config)?;
    let commander = Commander::new(config.clone(), wiring.services);

    let report = commander.run_mission(alert).await;
    persist(&config, &wiring.memory);

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let label = scenario_label(path);
        println!("{}", MissionSummary::from_report(&report, Some(&label)).render_dashboard());
        if let Some(failure) = report.failure() {
            print!("{}", failure.render());
        }
    }
    Ok(report.succeeded())
}

async fn eval(args: &ArgMatches) -> Result<bool> {
    let config = load_config(args)?;
    let paths: Vec<&PathBuf> = args.get_many::<PathBuf>("alerts").into_iter().flatten().collect();
    let wiring = wire(&config)?;
    let commander = Commander::new(config.clone(), wiring.services);

    let mut summaries = Vec::with_capacity(paths.len());
    for path in paths {
        let alert = match load_alert(path) {
            Ok(alert) => alert,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "skipping alert");
                continue;
            }
        };
        let report = commander.run_mission(alert).await;
        summaries.push(MissionSummary::from_report(&report, Some(&scenario_label(path))));
    }
    persist(&config, &wiring.memory);

    if summaries.is_empty() {
        bail!("no alert could be loaded");
    }
    println!("{}", render_batch(&summaries));
    Ok(summaries.iter().all(|s| s.success))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("log-json"));

    let succeeded = match matches.subcommand() {
        Some(("run", args)) => run(args).await?,
        Some(("eval", args)) => eval(args).await?,
        Some(("config", _)) => {
            print!("{}", CommanderConfig::default().to_toml()?);
            true
        }
        _ => unreachable!("subcommand is required"),
    };

    std::process::exit(if succeeded { 0 } else { 1 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn run_parses_overrides() {
        let matches = cli()
            .try_get_matches_from(["dart", "run", "--alert", "a.yaml", "--max-attempts", "5", "--json"])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "run");
        assert_eq!(args.get_one::<u32>("max-attempts"), Some(&5));
        assert!(args.get_flag("json"));
    }

    #[test]
    fn zero_attempts_rejected() {
        assert!(cli()
            .try_get_matches_from(["dart", "run", "--alert", "a.yaml", "--max-attempts", "0"])
            .is_err());
    }

    #[test]
    fn shipped_scenarios_load() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scenarios");
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let alert = load_alert(&path).unwrap_or_else(|e| panic!("{}: {e}", path.display()));
            assert!(!alert.error_code.is_empty());
            loaded += 1;
        }
        assert!(loaded >= 4);
    }

    #[test]
    fn label_is_file_stem() {
        assert_eq!(scenario_label(Path::new("scenarios/01_schema_drift.yaml")), "01_schema_drift");
    }
}
