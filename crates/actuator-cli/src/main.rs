//! CLI binary for running and validating Actuator flow sets.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use actuator_flow::{Environment, FlowSet, Role, Severity};

#[derive(Parser)]
#[command(name = "actuator", version, about = "Dataflow engine for small automation flows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow set from a blueprint file
    Run {
        /// Path to the blueprint .json file
        blueprint: PathBuf,

        /// Global variable, as key=value (value parsed as JSON when possible)
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Print flow events to stderr as JSON lines
        #[arg(long)]
        events: bool,
    },

    /// Validate a blueprint file
    Validate {
        /// Path to the blueprint .json file
        blueprint: PathBuf,
    },

    /// Show the assembled flows of a blueprint, defaults filled in
    Info {
        /// Path to the blueprint .json file
        blueprint: PathBuf,
    },

    /// List every registered component by role
    List,
}

fn parse_var(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty variable name in '{s}'"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to the print sink.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { blueprint, vars, events } => {
            cmd_run(&blueprint, vars, events).await?;
        }
        Commands::Validate { blueprint } => {
            cmd_validate(&blueprint)?;
        }
        Commands::Info { blueprint } => {
            cmd_info(&blueprint)?;
        }
        Commands::List => {
            cmd_list();
        }
    }

    Ok(())
}

fn load_blueprint(path: &Path) -> anyhow::Result<actuator_blueprint::FlowSetBlueprint> {
    actuator_blueprint::load(path).with_context(|| format!("loading {}", path.display()))
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let doc = load_blueprint(path)?;
    let env = Environment::new();
    let diagnostics = actuator_flow::validate(&doc, env.registry());

    if diagnostics.is_empty() {
        println!("Blueprint is valid");
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        let flow = diag.flow.as_deref().unwrap_or("-");
        println!("[{}] {} ({}): {}", severity, diag.rule, flow, diag.message);
        if let Some(fix) = &diag.fix {
            println!("        fix: {}", fix);
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let doc = load_blueprint(path)?;
    let set = FlowSet::from_blueprint(&Environment::new(), &doc)?;

    println!("Flows: {}", set.flows().len());
    if !doc.globals.is_empty() {
        let keys: Vec<&str> = doc.globals.keys().map(String::as_str).collect();
        println!("Globals: {}", keys.join(", "));
    }

    println!("\nFlows:");
    for flow in set.flows() {
        println!(
            "  {}: {} -> {} [monitor={}{}]",
            flow.name(),
            flow.upstreams().join(" | "),
            flow.sink_kind(),
            flow.monitor_kind(),
            if flow.is_threaded() { "" } else { ", inline" }
        );
    }

    Ok(())
}

fn cmd_list() {
    let env = Environment::new();
    for role in Role::ALL {
        println!("{}s:", role);
        for name in env.registry().names(role) {
            println!("  {}", name);
        }
    }
}

async fn cmd_run(path: &Path, vars: Vec<(String, Value)>, events: bool) -> anyhow::Result<()> {
    let doc = load_blueprint(path)?;
    let env = vars
        .into_iter()
        .fold(Environment::new(), |env, (key, value)| env.with_global(key, value));
    let mut set = FlowSet::from_blueprint(&env, &doc)?;
    tracing::info!(path = %path.display(), flows = set.flows().len(), "Running flow set");

    if events {
        let mut rx = set.events().subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{line}");
                }
            }
        });
    }

    let stopper = set.stopper();
    let mut run = tokio::task::spawn_blocking(move || set.run());
    let result = tokio::select! {
        joined = &mut run => joined?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping flows");
            stopper.stop_all();
            run.await?
        }
    };
    result?;

    tracing::info!("Flow set finished");
    Ok(())
}
